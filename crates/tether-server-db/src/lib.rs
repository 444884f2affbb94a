// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite storage for Tether accounts.
//!
//! [`AccountRepository`] implements
//! [`AccountStore`](tether_server_auth::AccountStore) over a [`SqlitePool`].

pub mod account;
pub mod error;
pub mod pool;
pub mod schema;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use account::AccountRepository;
pub use error::{DbError, Result};
pub use pool::create_pool;
pub use schema::migrate;
pub use sqlx::sqlite::SqlitePool;
