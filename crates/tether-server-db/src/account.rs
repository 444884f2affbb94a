// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Account repository for database operations.
//!
//! Stores users, their emails and the external accounts linked to them.
//! Uniqueness of usernames, emails and external account specs is enforced
//! by table constraints, so concurrent sign-ins for the same identity cannot
//! produce duplicate users.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use tether_server_auth::store::Result as StoreResult;
use tether_server_auth::{
	validate_username, AccountStore, ExternalAccount, ExternalAccountData, ExternalAccountId,
	ExternalAccountSpec, NewUser, User, UserId, UserUpdate,
};

use crate::error::DbError;

const USER_COLUMNS: &str = "u.id, u.username, u.display_name, u.avatar_url, u.created_at, u.updated_at";

#[async_trait]
impl AccountStore for AccountRepository {
	async fn associate_user_and_save(
		&self,
		user_id: UserId,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> StoreResult<()> {
		self
			.associate_user_and_save(user_id, spec, data)
			.await
			.map_err(Into::into)
	}

	async fn lookup_user_and_save(
		&self,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> StoreResult<UserId> {
		self
			.lookup_user_and_save(spec, data)
			.await
			.map_err(Into::into)
	}

	async fn create_user_and_save(
		&self,
		new_user: &NewUser,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> StoreResult<UserId> {
		self
			.create_user_and_save(new_user, spec, data)
			.await
			.map_err(Into::into)
	}

	async fn get_by_id(&self, user_id: UserId) -> StoreResult<User> {
		self.get_by_id(user_id).await.map_err(Into::into)
	}

	async fn get_by_username(&self, username: &str) -> StoreResult<User> {
		self.get_by_username(username).await.map_err(Into::into)
	}

	async fn get_by_verified_email(&self, email: &str) -> StoreResult<User> {
		self.get_by_verified_email(email).await.map_err(Into::into)
	}

	async fn update(&self, user_id: UserId, update: &UserUpdate) -> StoreResult<()> {
		self.update(user_id, update).await.map_err(Into::into)
	}
}

/// Repository for user and external account database operations.
#[derive(Clone)]
pub struct AccountRepository {
	pool: SqlitePool,
}

impl AccountRepository {
	/// Create a new account repository with the given pool.
	///
	/// The pool must point at a database that has been through
	/// [`migrate`](crate::schema::migrate).
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Create a user, its email and its first external account in one
	/// transaction.
	///
	/// # Errors
	/// - `DbError::Invalid` if the username fails validation
	/// - `DbError::UsernameExists` / `DbError::EmailExists` on a uniqueness clash
	/// - `DbError::Conflict` if `spec` is already linked
	///
	/// Nothing is written when any step fails.
	#[tracing::instrument(
		skip(self, new_user, data),
		fields(service_type = %spec.service_type, service_id = %spec.service_id)
	)]
	pub async fn create_user_and_save(
		&self,
		new_user: &NewUser,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> Result<UserId, DbError> {
		validate_username(&new_user.username).map_err(|message| DbError::Invalid {
			field: "username",
			value: new_user.username.clone(),
			message,
		})?;

		let user_id = UserId::generate();
		let now = Utc::now().to_rfc3339();
		// The first statement writes, so the transaction queues for the write
		// lock before it has read anything.
		let mut tx = self.pool.begin().await?;

		sqlx::query(
			r#"
			INSERT INTO users (id, username, display_name, avatar_url, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(user_id.to_string())
		.bind(&new_user.username)
		.bind(&new_user.display_name)
		.bind(&new_user.avatar_url)
		.bind(&now)
		.bind(&now)
		.execute(&mut *tx)
		.await
		.map_err(|e| map_unique_violation(e, new_user))?;

		if !new_user.email.is_empty() {
			let verified_at = new_user.email_is_verified.then(|| now.clone());
			sqlx::query(
				r#"
				INSERT INTO user_emails (user_id, email, verified_at, created_at)
				VALUES (?, ?, ?, ?)
				"#,
			)
			.bind(user_id.to_string())
			.bind(&new_user.email)
			.bind(verified_at)
			.bind(&now)
			.execute(&mut *tx)
			.await
			.map_err(|e| map_unique_violation(e, new_user))?;
		}

		insert_external_account(&mut tx, user_id, spec, data, &now).await?;

		tx.commit().await?;
		tracing::info!(user_id = %user_id, "user created from external account");
		Ok(user_id)
	}

	/// Find the user linked to `spec` and refresh the stored provider data.
	///
	/// A single `UPDATE ... RETURNING`, so the write lock is taken up front
	/// and concurrent sign-ins queue on it rather than failing.
	///
	/// # Errors
	/// `DbError::NotFound` if `spec` is not linked to any user.
	#[tracing::instrument(
		skip(self, data),
		fields(service_type = %spec.service_type, service_id = %spec.service_id)
	)]
	pub async fn lookup_user_and_save(
		&self,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> Result<UserId, DbError> {
		let owner: Option<String> = sqlx::query_scalar(
			r#"
			UPDATE external_accounts
			SET auth_data = ?, account_data = ?, updated_at = ?
			WHERE service_type = ? AND service_id = ? AND account_id = ?
			RETURNING user_id
			"#,
		)
		.bind(encode_json(&data.auth_data)?)
		.bind(encode_json(&data.account_data)?)
		.bind(Utc::now().to_rfc3339())
		.bind(&spec.service_type)
		.bind(&spec.service_id)
		.bind(&spec.account_id)
		.fetch_optional(&self.pool)
		.await?;

		let owner: UserId = match owner {
			Some(owner) => parse_id(&owner, "user_id")?,
			None => return Err(DbError::NotFound(format!("external account {spec}"))),
		};
		tracing::debug!(user_id = %owner, "external account data refreshed");
		Ok(owner)
	}

	/// Link `spec` to an existing user and store `data`.
	///
	/// Relinking a spec to the user that already owns it only refreshes the
	/// data. Runs as one upsert that only touches an existing row when it
	/// belongs to `user_id`.
	///
	/// # Errors
	/// - `DbError::Conflict` if `spec` is linked to a different user
	/// - `DbError::NotFound` if `user_id` does not exist
	#[tracing::instrument(
		skip(self, data),
		fields(user_id = %user_id, service_type = %spec.service_type, service_id = %spec.service_id)
	)]
	pub async fn associate_user_and_save(
		&self,
		user_id: UserId,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> Result<(), DbError> {
		let now = Utc::now().to_rfc3339();
		let linked: Option<String> = sqlx::query_scalar(
			r#"
			INSERT INTO external_accounts (
				id, user_id, service_type, service_id, account_id,
				auth_data, account_data, created_at, updated_at
			) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT (service_type, service_id, account_id) DO UPDATE
			SET auth_data = excluded.auth_data,
			    account_data = excluded.account_data,
			    updated_at = excluded.updated_at
			WHERE external_accounts.user_id = excluded.user_id
			RETURNING user_id
			"#,
		)
		.bind(ExternalAccountId::generate().to_string())
		.bind(user_id.to_string())
		.bind(&spec.service_type)
		.bind(&spec.service_id)
		.bind(&spec.account_id)
		.bind(encode_json(&data.auth_data)?)
		.bind(encode_json(&data.account_data)?)
		.bind(&now)
		.bind(&now)
		.fetch_optional(&self.pool)
		.await
		.map_err(|e| match e {
			sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
				DbError::NotFound(format!("user {user_id}"))
			}
			_ => DbError::Sqlx(e),
		})?;

		// No row back means the conflicting row is owned by someone else.
		if linked.is_none() {
			return Err(DbError::Conflict(format!(
				"external account {spec} is linked to another user"
			)));
		}

		tracing::info!("external account associated");
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn get_by_id(&self, user_id: UserId) -> Result<User, DbError> {
		let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?"))
			.bind(user_id.to_string())
			.fetch_optional(&self.pool)
			.await?;

		match row {
			Some(row) => parse_user_row(&row),
			None => Err(DbError::NotFound(format!("user {user_id}"))),
		}
	}

	/// Exact, case-sensitive username match.
	#[tracing::instrument(skip(self))]
	pub async fn get_by_username(&self, username: &str) -> Result<User, DbError> {
		let row = sqlx::query(&format!(
			"SELECT {USER_COLUMNS} FROM users u WHERE u.username = ?"
		))
		.bind(username)
		.fetch_optional(&self.pool)
		.await?;

		match row {
			Some(row) => parse_user_row(&row),
			None => Err(DbError::NotFound(format!("user with username {username:?}"))),
		}
	}

	/// Only emails with a `verified_at` timestamp match.
	#[tracing::instrument(skip(self, email))]
	pub async fn get_by_verified_email(&self, email: &str) -> Result<User, DbError> {
		let row = sqlx::query(&format!(
			r#"
			SELECT {USER_COLUMNS}
			FROM users u
			JOIN user_emails e ON e.user_id = u.id
			WHERE e.email = ? AND e.verified_at IS NOT NULL
			"#
		))
		.bind(email)
		.fetch_optional(&self.pool)
		.await?;

		match row {
			Some(row) => parse_user_row(&row),
			None => Err(DbError::NotFound("user with verified email".to_string())),
		}
	}

	/// Apply a profile delta. An empty delta writes nothing but still
	/// reports a missing user.
	#[tracing::instrument(skip(self, update), fields(user_id = %user_id))]
	pub async fn update(&self, user_id: UserId, update: &UserUpdate) -> Result<(), DbError> {
		if update.is_empty() {
			return self.get_by_id(user_id).await.map(|_| ());
		}

		let result = sqlx::query(
			r#"
			UPDATE users
			SET display_name = CASE WHEN ?1 THEN ?2 ELSE display_name END,
			    avatar_url = CASE WHEN ?3 THEN ?4 ELSE avatar_url END,
			    updated_at = ?5
			WHERE id = ?6
			"#,
		)
		.bind(update.display_name.is_some())
		.bind(update.display_name.as_deref())
		.bind(update.avatar_url.is_some())
		.bind(update.avatar_url.clone().flatten())
		.bind(Utc::now().to_rfc3339())
		.bind(user_id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("user {user_id}")));
		}

		tracing::debug!("user profile updated");
		Ok(())
	}

	/// Get the stored external account for `spec`, if linked.
	#[tracing::instrument(
		skip(self),
		fields(service_type = %spec.service_type, service_id = %spec.service_id)
	)]
	pub async fn get_external_account(
		&self,
		spec: &ExternalAccountSpec,
	) -> Result<Option<ExternalAccount>, DbError> {
		let row = sqlx::query(
			r#"
			SELECT id, user_id, service_type, service_id, account_id,
			       auth_data, account_data, created_at, updated_at
			FROM external_accounts
			WHERE service_type = ? AND service_id = ? AND account_id = ?
			"#,
		)
		.bind(&spec.service_type)
		.bind(&spec.service_id)
		.bind(&spec.account_id)
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(parse_external_account_row).transpose()
	}

	/// List every external account linked to a user, oldest first.
	#[tracing::instrument(skip(self), fields(user_id = %user_id))]
	pub async fn list_external_accounts(
		&self,
		user_id: UserId,
	) -> Result<Vec<ExternalAccount>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT id, user_id, service_type, service_id, account_id,
			       auth_data, account_data, created_at, updated_at
			FROM external_accounts
			WHERE user_id = ?
			ORDER BY created_at, id
			"#,
		)
		.bind(user_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(parse_external_account_row).collect()
	}
}

async fn insert_external_account(
	conn: &mut SqliteConnection,
	user_id: UserId,
	spec: &ExternalAccountSpec,
	data: &ExternalAccountData,
	now: &str,
) -> Result<(), DbError> {
	sqlx::query(
		r#"
		INSERT INTO external_accounts (
			id, user_id, service_type, service_id, account_id,
			auth_data, account_data, created_at, updated_at
		) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
		"#,
	)
	.bind(ExternalAccountId::generate().to_string())
	.bind(user_id.to_string())
	.bind(&spec.service_type)
	.bind(&spec.service_id)
	.bind(&spec.account_id)
	.bind(encode_json(&data.auth_data)?)
	.bind(encode_json(&data.account_data)?)
	.bind(now)
	.bind(now)
	.execute(&mut *conn)
	.await
	.map_err(|e| match e {
		sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
			DbError::Conflict(format!("external account {spec} is already linked"))
		}
		_ => DbError::Sqlx(e),
	})?;

	Ok(())
}

fn map_unique_violation(err: sqlx::Error, new_user: &NewUser) -> DbError {
	match err {
		sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
			let message = db_err.message();
			if message.contains("users.username") {
				DbError::UsernameExists(new_user.username.clone())
			} else if message.contains("user_emails.email") {
				DbError::EmailExists(new_user.email.clone())
			} else {
				DbError::Conflict(message.to_string())
			}
		}
		_ => DbError::Sqlx(err),
	}
}

fn encode_json(value: &Option<serde_json::Value>) -> Result<Option<String>, DbError> {
	Ok(value.as_ref().map(serde_json::to_string).transpose()?)
}

fn decode_json(value: Option<String>) -> Result<Option<serde_json::Value>, DbError> {
	Ok(value.as_deref().map(serde_json::from_str).transpose()?)
}

fn parse_id<T: std::str::FromStr<Err = uuid::Error>>(s: &str, column: &str) -> Result<T, DbError> {
	s.parse()
		.map_err(|e| DbError::Internal(format!("Invalid {column} UUID: {e}")))
}

fn parse_timestamp(s: &str, column: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(s)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("Invalid {column}: {e}")))
}

fn parse_user_row(row: &SqliteRow) -> Result<User, DbError> {
	let id: String = row.get("id");
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");

	Ok(User {
		id: parse_id(&id, "user id")?,
		username: row.get("username"),
		display_name: row.get("display_name"),
		avatar_url: row.get("avatar_url"),
		created_at: parse_timestamp(&created_at, "created_at")?,
		updated_at: parse_timestamp(&updated_at, "updated_at")?,
	})
}

fn parse_external_account_row(row: &SqliteRow) -> Result<ExternalAccount, DbError> {
	let id: String = row.get("id");
	let user_id: String = row.get("user_id");
	let created_at: String = row.get("created_at");
	let updated_at: String = row.get("updated_at");

	Ok(ExternalAccount {
		id: parse_id(&id, "external account id")?,
		user_id: parse_id(&user_id, "user_id")?,
		spec: ExternalAccountSpec {
			service_type: row.get("service_type"),
			service_id: row.get("service_id"),
			account_id: row.get("account_id"),
		},
		data: ExternalAccountData {
			auth_data: decode_json(row.get("auth_data"))?,
			account_data: decode_json(row.get("account_data"))?,
		},
		created_at: parse_timestamp(&created_at, "created_at")?,
		updated_at: parse_timestamp(&updated_at, "updated_at")?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{create_account_repository, create_file_account_test_pool};
	use proptest::prelude::*;
	use serde_json::json;

	fn new_user(username: &str, email: &str) -> NewUser {
		NewUser {
			username: username.to_string(),
			email: email.to_string(),
			email_is_verified: true,
			display_name: format!("{username} display"),
			avatar_url: None,
		}
	}

	fn spec(account_id: &str) -> ExternalAccountSpec {
		ExternalAccountSpec::new("github", "https://github.com/", account_id)
	}

	fn data(token: &str) -> ExternalAccountData {
		ExternalAccountData {
			auth_data: Some(json!({ "access_token": token })),
			account_data: Some(json!({ "login": "octocat" })),
		}
	}

	async fn count(repo: &AccountRepository, table: &str) -> i64 {
		sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
			.fetch_one(&repo.pool)
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn test_create_and_get_user() {
		let repo = create_account_repository().await;
		let id = repo
			.create_user_and_save(&new_user("alice", "alice@example.com"), &spec("1"), &data("t1"))
			.await
			.unwrap();

		let by_id = repo.get_by_id(id).await.unwrap();
		assert_eq!(by_id.username, "alice");
		assert_eq!(by_id.display_name, "alice display");

		assert_eq!(repo.get_by_username("alice").await.unwrap().id, id);
		assert_eq!(
			repo
				.get_by_verified_email("alice@example.com")
				.await
				.unwrap()
				.id,
			id
		);

		let account = repo.get_external_account(&spec("1")).await.unwrap().unwrap();
		assert_eq!(account.user_id, id);
		assert_eq!(account.data, data("t1"));
	}

	#[tokio::test]
	async fn test_username_match_is_case_sensitive() {
		let repo = create_account_repository().await;
		repo
			.create_user_and_save(&new_user("alice", ""), &spec("1"), &data("t"))
			.await
			.unwrap();

		assert!(matches!(
			repo.get_by_username("Alice").await,
			Err(DbError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_unverified_email_is_not_matched() {
		let repo = create_account_repository().await;
		let mut user = new_user("alice", "alice@example.com");
		user.email_is_verified = false;
		repo
			.create_user_and_save(&user, &spec("1"), &data("t"))
			.await
			.unwrap();

		assert!(matches!(
			repo.get_by_verified_email("alice@example.com").await,
			Err(DbError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_duplicate_username_rolls_back() {
		let repo = create_account_repository().await;
		repo
			.create_user_and_save(&new_user("alice", "a1@example.com"), &spec("1"), &data("t"))
			.await
			.unwrap();

		let err = repo
			.create_user_and_save(&new_user("alice", "a2@example.com"), &spec("2"), &data("t"))
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::UsernameExists(ref u) if u == "alice"));

		assert_eq!(count(&repo, "users").await, 1);
		assert_eq!(count(&repo, "user_emails").await, 1);
		assert!(repo.get_external_account(&spec("2")).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_duplicate_email_rolls_back() {
		let repo = create_account_repository().await;
		repo
			.create_user_and_save(&new_user("alice", "shared@example.com"), &spec("1"), &data("t"))
			.await
			.unwrap();

		let err = repo
			.create_user_and_save(&new_user("bob", "shared@example.com"), &spec("2"), &data("t"))
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::EmailExists(ref e) if e == "shared@example.com"));

		assert!(matches!(
			repo.get_by_username("bob").await,
			Err(DbError::NotFound(_))
		));
		assert_eq!(count(&repo, "external_accounts").await, 1);
	}

	#[tokio::test]
	async fn test_already_linked_spec_conflicts_on_create() {
		let repo = create_account_repository().await;
		repo
			.create_user_and_save(&new_user("alice", ""), &spec("1"), &data("t"))
			.await
			.unwrap();

		let err = repo
			.create_user_and_save(&new_user("bob", ""), &spec("1"), &data("t"))
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));
		assert_eq!(count(&repo, "users").await, 1);
	}

	#[tokio::test]
	async fn test_invalid_username_is_rejected_before_insert() {
		let repo = create_account_repository().await;
		let err = repo
			.create_user_and_save(&new_user("admin", ""), &spec("1"), &data("t"))
			.await
			.unwrap_err();

		match err {
			DbError::Invalid { field, value, .. } => {
				assert_eq!(field, "username");
				assert_eq!(value, "admin");
			}
			other => panic!("expected Invalid, got {other:?}"),
		}
		assert_eq!(count(&repo, "users").await, 0);
	}

	#[tokio::test]
	async fn test_lookup_refreshes_data() {
		let repo = create_account_repository().await;
		let id = repo
			.create_user_and_save(&new_user("alice", ""), &spec("1"), &data("old"))
			.await
			.unwrap();

		let found = repo
			.lookup_user_and_save(&spec("1"), &data("new"))
			.await
			.unwrap();
		assert_eq!(found, id);

		let account = repo.get_external_account(&spec("1")).await.unwrap().unwrap();
		assert_eq!(account.data, data("new"));
	}

	#[tokio::test]
	async fn test_lookup_unlinked_spec_is_not_found() {
		let repo = create_account_repository().await;
		let err = repo
			.lookup_user_and_save(&spec("missing"), &data("t"))
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::NotFound(_)));
	}

	#[tokio::test]
	async fn test_associate_adds_second_account() {
		let repo = create_account_repository().await;
		let id = repo
			.create_user_and_save(&new_user("alice", ""), &spec("1"), &data("t"))
			.await
			.unwrap();

		let gitlab = ExternalAccountSpec::new("gitlab", "https://gitlab.com/", "99");
		repo
			.associate_user_and_save(id, &gitlab, &data("g"))
			.await
			.unwrap();

		let accounts = repo.list_external_accounts(id).await.unwrap();
		assert_eq!(accounts.len(), 2);
		assert!(accounts.iter().any(|a| a.spec == gitlab));
		assert_eq!(repo.lookup_user_and_save(&gitlab, &data("g")).await.unwrap(), id);
	}

	#[tokio::test]
	async fn test_associate_same_user_refreshes_data() {
		let repo = create_account_repository().await;
		let id = repo
			.create_user_and_save(&new_user("alice", ""), &spec("1"), &data("old"))
			.await
			.unwrap();

		repo
			.associate_user_and_save(id, &spec("1"), &data("new"))
			.await
			.unwrap();

		let account = repo.get_external_account(&spec("1")).await.unwrap().unwrap();
		assert_eq!(account.data, data("new"));
		assert_eq!(count(&repo, "external_accounts").await, 1);
	}

	#[tokio::test]
	async fn test_associate_other_users_account_conflicts() {
		let repo = create_account_repository().await;
		let alice = repo
			.create_user_and_save(&new_user("alice", ""), &spec("1"), &data("t"))
			.await
			.unwrap();
		let bob = repo
			.create_user_and_save(&new_user("bob", ""), &spec("2"), &data("t"))
			.await
			.unwrap();

		let err = repo
			.associate_user_and_save(bob, &spec("1"), &data("stolen"))
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::Conflict(_)));

		let account = repo.get_external_account(&spec("1")).await.unwrap().unwrap();
		assert_eq!(account.user_id, alice);
		assert_eq!(account.data, data("t"));
	}

	#[tokio::test]
	async fn test_associate_unknown_user_is_not_found() {
		let repo = create_account_repository().await;
		let err = repo
			.associate_user_and_save(UserId::generate(), &spec("1"), &data("t"))
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::NotFound(_)));
		assert_eq!(count(&repo, "external_accounts").await, 0);
	}

	#[tokio::test]
	async fn test_associate_refreshes_only_own_row() {
		let repo = create_account_repository().await;
		let alice = repo
			.create_user_and_save(&new_user("alice", ""), &spec("1"), &data("t"))
			.await
			.unwrap();

		repo
			.associate_user_and_save(alice, &spec("1"), &data("again"))
			.await
			.unwrap();
		assert_eq!(count(&repo, "external_accounts").await, 1);
		let account = repo.get_external_account(&spec("1")).await.unwrap().unwrap();
		assert_eq!(account.data, data("again"));
		assert!(account.updated_at >= account.created_at);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
	async fn test_concurrent_refreshes_queue_on_the_write_lock() {
		let dir = tempfile::tempdir().unwrap();
		let repo = AccountRepository::new(create_file_account_test_pool(dir.path()).await);
		let owner = repo
			.create_user_and_save(&new_user("alice", "alice@example.com"), &spec("1"), &data("t0"))
			.await
			.unwrap();

		let mut tasks = Vec::new();
		for i in 0..32 {
			let repo = repo.clone();
			tasks.push(tokio::spawn(async move {
				let token = data(&format!("t{i}"));
				if i % 2 == 0 {
					repo.lookup_user_and_save(&spec("1"), &token).await
				} else {
					repo
						.associate_user_and_save(owner, &spec("1"), &token)
						.await
						.map(|()| owner)
				}
			}));
		}

		for task in tasks {
			assert_eq!(task.await.unwrap().unwrap(), owner);
		}
		assert_eq!(count(&repo, "external_accounts").await, 1);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
	async fn test_concurrent_creates_for_one_identity_conflict_cleanly() {
		let dir = tempfile::tempdir().unwrap();
		let repo = AccountRepository::new(create_file_account_test_pool(dir.path()).await);

		let mut tasks = Vec::new();
		for _ in 0..8 {
			let repo = repo.clone();
			tasks.push(tokio::spawn(async move {
				repo
					.create_user_and_save(&new_user("alice", "alice@example.com"), &spec("1"), &data("t"))
					.await
			}));
		}

		let mut created = 0;
		for task in tasks {
			match task.await.unwrap() {
				Ok(_) => created += 1,
				Err(DbError::UsernameExists(username)) => assert_eq!(username, "alice"),
				Err(other) => panic!("expected username conflict, got {other:?}"),
			}
		}
		assert_eq!(created, 1);
		assert_eq!(count(&repo, "users").await, 1);
		assert_eq!(count(&repo, "external_accounts").await, 1);
	}

	#[tokio::test]
	async fn test_update_profile_fields() {
		let repo = create_account_repository().await;
		let mut user = new_user("alice", "");
		user.avatar_url = Some("https://example.com/a.png".to_string());
		let id = repo
			.create_user_and_save(&user, &spec("1"), &data("t"))
			.await
			.unwrap();

		repo
			.update(
				id,
				&UserUpdate {
					display_name: Some("Alice Liddell".to_string()),
					avatar_url: None,
				},
			)
			.await
			.unwrap();
		let stored = repo.get_by_id(id).await.unwrap();
		assert_eq!(stored.display_name, "Alice Liddell");
		assert_eq!(stored.avatar_url.as_deref(), Some("https://example.com/a.png"));
		assert_eq!(stored.username, "alice");

		repo
			.update(
				id,
				&UserUpdate {
					display_name: None,
					avatar_url: Some(None),
				},
			)
			.await
			.unwrap();
		let stored = repo.get_by_id(id).await.unwrap();
		assert_eq!(stored.display_name, "Alice Liddell");
		assert!(stored.avatar_url.is_none());
	}

	#[tokio::test]
	async fn test_update_missing_user_is_not_found() {
		let repo = create_account_repository().await;
		let update = UserUpdate {
			display_name: Some("Ghost".to_string()),
			avatar_url: None,
		};

		assert!(matches!(
			repo.update(UserId::generate(), &update).await,
			Err(DbError::NotFound(_))
		));
		assert!(matches!(
			repo.update(UserId::generate(), &UserUpdate::default()).await,
			Err(DbError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_store_trait_maps_errors() {
		let repo = create_account_repository().await;
		let store: &dyn AccountStore = &repo;

		let err = store.get_by_id(UserId::generate()).await.unwrap_err();
		assert!(err.is_not_found());

		let err = store
			.create_user_and_save(&new_user("root", ""), &spec("1"), &data("t"))
			.await
			.unwrap_err();
		assert_eq!(err.presentation_message(), Some("This username is reserved"));
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(32))]

		/// Creating users from a small username pool succeeds exactly for the
		/// first use of each name.
		#[test]
		fn username_uniqueness_matches_model(picks in prop::collection::vec(0usize..4, 1..12)) {
			let names = ["alice", "bob", "carol", "dave"];
			let rt = tokio::runtime::Runtime::new().unwrap();
			rt.block_on(async {
				let repo = create_account_repository().await;
				let mut seen = std::collections::HashSet::new();

				for (i, pick) in picks.iter().enumerate() {
					let name = names[*pick];
					let result = repo
						.create_user_and_save(&new_user(name, ""), &spec(&i.to_string()), &data("t"))
						.await;

					if seen.insert(name) {
						prop_assert!(result.is_ok());
					} else {
						prop_assert!(matches!(result, Err(DbError::UsernameExists(_))));
					}
				}

				prop_assert_eq!(count(&repo, "users").await as usize, seen.len());
				prop_assert_eq!(count(&repo, "external_accounts").await as usize, seen.len());
				Ok(())
			})?;
		}
	}
}
