// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Account tables.
//!
//! Every statement is idempotent, so [`migrate`] is safe to run at each
//! startup.

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

const STATEMENTS: &[&str] = &[
	r#"
	CREATE TABLE IF NOT EXISTS users (
		id TEXT PRIMARY KEY,
		username TEXT NOT NULL UNIQUE,
		display_name TEXT NOT NULL,
		avatar_url TEXT,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS user_emails (
		user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
		email TEXT NOT NULL UNIQUE,
		verified_at TEXT,
		created_at TEXT NOT NULL,
		PRIMARY KEY (user_id, email)
	)
	"#,
	r#"
	CREATE TABLE IF NOT EXISTS external_accounts (
		id TEXT PRIMARY KEY,
		user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
		service_type TEXT NOT NULL,
		service_id TEXT NOT NULL,
		account_id TEXT NOT NULL,
		auth_data TEXT,
		account_data TEXT,
		created_at TEXT NOT NULL,
		updated_at TEXT NOT NULL,
		UNIQUE (service_type, service_id, account_id)
	)
	"#,
	"CREATE INDEX IF NOT EXISTS idx_external_accounts_user_id ON external_accounts(user_id)",
];

/// Create the account tables if they do not exist.
#[tracing::instrument(skip(pool))]
pub async fn migrate(pool: &SqlitePool) -> Result<(), DbError> {
	let mut tx = pool.begin().await?;
	for statement in STATEMENTS {
		sqlx::query(statement).execute(&mut *tx).await?;
	}
	tx.commit().await?;

	tracing::info!(statements = STATEMENTS.len(), "account schema up to date");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	#[tokio::test]
	async fn migrate_is_idempotent() {
		let pool = create_test_pool().await;
		migrate(&pool).await.unwrap();
		migrate(&pool).await.unwrap();

		let tables: Vec<String> = sqlx::query_scalar(
			"SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
		)
		.fetch_all(&pool)
		.await
		.unwrap();
		assert_eq!(tables, vec!["external_accounts", "user_emails", "users"]);
	}
}
