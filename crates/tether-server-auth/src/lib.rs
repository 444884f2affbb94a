// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! External identity linking for Tether.
//!
//! This crate provides:
//! - [`ProviderRegistry`] - the live set of trusted identity provider instances
//! - [`AccountLinker`] - resolves a verified external account to one local user
//! - [`AccountStore`] - the storage operations the linker relies on
//!
//! # Sign-in Flow
//!
//! ```text
//! request ─► registry.lookup(config id) ─► provider adapter (token exchange)
//!                                             │
//!           spec + payload + profile ◄────────┘
//!                     │
//!                     ▼
//!            linker.link(actor, ...) ─► AccountStore
//! ```

pub mod actor;
pub mod external_account;
pub mod link;
pub mod provider;
pub mod registry;
pub mod store;
pub mod types;
pub mod user;

pub use actor::Actor;
pub use external_account::{ExternalAccount, ExternalAccountData, ExternalAccountSpec};
pub use link::{AccountLinker, LinkError, LinkOptions};
pub use provider::{Provider, ProviderConfigId};
pub use registry::{ProviderList, ProviderRegistry, ProviderUpdates};
pub use store::{AccountStore, AccountStoreError, ErrorKind};
pub use types::{ExternalAccountId, UserId};
pub use user::{validate_username, NewUser, User, UserUpdate};
