// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use tether_server_auth::AccountStoreError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Username already exists: {0}")]
	UsernameExists(String),

	#[error("Email already exists: {0}")]
	EmailExists(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	/// Input rejected before reaching the database. `message` is safe to
	/// show to the caller.
	#[error("Invalid {field} {value:?}: {message}")]
	Invalid {
		field: &'static str,
		value: String,
		message: &'static str,
	},

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for AccountStoreError {
	fn from(err: DbError) -> Self {
		match err {
			DbError::NotFound(msg) => AccountStoreError::NotFound(msg),
			DbError::UsernameExists(username) => AccountStoreError::UsernameExists(username),
			DbError::EmailExists(email) => AccountStoreError::EmailExists(email),
			DbError::Conflict(msg) => AccountStoreError::Conflict(msg),
			invalid @ DbError::Invalid { message, .. } => AccountStoreError::Presentation {
				message: message.to_string(),
				detail: invalid.to_string(),
			},
			other => AccountStoreError::Internal(other.to_string()),
		}
	}
}
