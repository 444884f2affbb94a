// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::account::AccountRepository;
use crate::pool::create_pool;
use crate::schema::migrate;

/// Single-connection in-memory pool; every connection to `:memory:` would
/// otherwise see its own empty database.
pub async fn create_test_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str(":memory:")
		.unwrap()
		.foreign_keys(true);

	SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.expect("Failed to create test pool")
}

pub async fn create_account_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	migrate(&pool).await.unwrap();
	pool
}

pub async fn create_account_repository() -> AccountRepository {
	AccountRepository::new(create_account_test_pool().await)
}

/// Migrated pool over `tether.db` inside `dir`, configured like production.
///
/// Unlike the in-memory pool this one hands out several connections, so
/// concurrent callers really contend for the database lock.
pub async fn create_file_account_test_pool(dir: &Path) -> SqlitePool {
	let url = format!("sqlite:{}", dir.join("tether.db").display());
	let pool = create_pool(&url).await.expect("Failed to create file pool");
	migrate(&pool).await.unwrap();
	pool
}
