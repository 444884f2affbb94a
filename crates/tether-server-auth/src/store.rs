// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Storage operations the linking protocol depends on.
//!
//! Uniqueness of usernames, verified emails and external account specs is
//! enforced by the store. Implementations report violations through the
//! [`AccountStoreError`] variants so callers can branch on
//! [`ErrorKind`] by equality.

use async_trait::async_trait;

use crate::external_account::{ExternalAccountData, ExternalAccountSpec};
use crate::types::UserId;
use crate::user::{NewUser, User, UserUpdate};

/// Classification of an [`AccountStoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	NotFound,
	UsernameExists,
	EmailExists,
	/// A uniqueness conflict other than username or email, e.g. an external
	/// account already linked to a different user.
	Conflict,
	/// The store supplied a message safe to show to the caller.
	Presentation,
	Internal,
}

/// Errors returned by [`AccountStore`] implementations.
///
/// Messages may contain identifiers or storage details and must not be shown
/// to unauthenticated callers, with the exception of
/// [`AccountStoreError::presentation_message`].
#[derive(Debug, thiserror::Error)]
pub enum AccountStoreError {
	#[error("not found: {0}")]
	NotFound(String),

	#[error("username already exists: {0}")]
	UsernameExists(String),

	#[error("email already exists: {0}")]
	EmailExists(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("{detail}")]
	Presentation { message: String, detail: String },

	#[error("storage error: {0}")]
	Internal(String),
}

impl AccountStoreError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			AccountStoreError::NotFound(_) => ErrorKind::NotFound,
			AccountStoreError::UsernameExists(_) => ErrorKind::UsernameExists,
			AccountStoreError::EmailExists(_) => ErrorKind::EmailExists,
			AccountStoreError::Conflict(_) => ErrorKind::Conflict,
			AccountStoreError::Presentation { .. } => ErrorKind::Presentation,
			AccountStoreError::Internal(_) => ErrorKind::Internal,
		}
	}

	/// The caller-safe message, when the store supplied one.
	pub fn presentation_message(&self) -> Option<&str> {
		match self {
			AccountStoreError::Presentation { message, .. } => Some(message),
			_ => None,
		}
	}

	pub fn is_not_found(&self) -> bool {
		self.kind() == ErrorKind::NotFound
	}
}

pub type Result<T> = std::result::Result<T, AccountStoreError>;

/// Users and external accounts, as required by
/// [`AccountLinker`](crate::link::AccountLinker).
#[async_trait]
pub trait AccountStore: Send + Sync {
	/// Links `spec` to `user_id` and stores `data`.
	///
	/// Succeeds if the spec is already linked to `user_id` (the data is
	/// refreshed). Returns [`AccountStoreError::Conflict`] if it is linked to
	/// a different user.
	async fn associate_user_and_save(
		&self,
		user_id: UserId,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> Result<()>;

	/// Finds the user linked to `spec` and refreshes the stored `data`.
	///
	/// Returns [`AccountStoreError::NotFound`] if the spec is not linked.
	async fn lookup_user_and_save(
		&self,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> Result<UserId>;

	/// Creates a user from `new_user` and links `spec` to it, atomically.
	async fn create_user_and_save(
		&self,
		new_user: &NewUser,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> Result<UserId>;

	async fn get_by_id(&self, user_id: UserId) -> Result<User>;

	/// Exact (case-sensitive) username match.
	async fn get_by_username(&self, username: &str) -> Result<User>;

	/// Matches only emails that have been verified.
	async fn get_by_verified_email(&self, email: &str) -> Result<User>;

	async fn update(&self, user_id: UserId, update: &UserUpdate) -> Result<()>;
}
