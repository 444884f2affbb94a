// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tether server wiring: logging, the config-driven provider listener and the
//! shared state that ties the registry to the account store.

pub mod logging;
pub mod providers;
pub mod state;
pub mod version;

pub use providers::{spawn_listener, sync_providers, ConfiguredProvider};
pub use state::{create_app_state, AppState, SignInError};
