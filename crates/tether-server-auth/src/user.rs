// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Local user accounts.
//!
//! This module provides:
//! - [`User`] - a stored local account
//! - [`NewUser`] - the candidate profile an identity provider hands us
//! - [`UserUpdate`] - a profile delta; deliberately has no username field
//! - [`validate_username`] - rules enforced when creating accounts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Usernames that cannot be claimed through external sign-in.
pub const RESERVED_USERNAMES: &[&str] = &[
	"root",
	"admin",
	"administrator",
	"system",
	"support",
	"security",
	"noreply",
	"no-reply",
	"tether",
	"api",
	"auth",
	"oauth",
	"login",
	"logout",
	"signup",
	"settings",
	"account",
	"null",
	"undefined",
	"anonymous",
	"guest",
];

/// Check if a username is reserved (case-insensitive).
pub fn is_username_reserved(username: &str) -> bool {
	let lower = username.to_lowercase();
	RESERVED_USERNAMES.iter().any(|&reserved| reserved == lower)
}

/// Validates a username for a newly created account.
///
/// Rules:
/// - 3-39 characters
/// - ASCII letters, digits, `_`, `-` and `.`
/// - Must start with a letter or digit
/// - Cannot be all digits
/// - Cannot be reserved
///
/// The error strings are safe to show to the person signing in.
pub fn validate_username(username: &str) -> Result<(), &'static str> {
	if username.len() < 3 {
		return Err("Username must be at least 3 characters");
	}
	if username.len() > 39 {
		return Err("Username must be at most 39 characters");
	}
	if !username
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
	{
		return Err("Username can only contain letters, numbers, '_', '-' and '.'");
	}
	if !username
		.chars()
		.next()
		.is_some_and(|c| c.is_ascii_alphanumeric())
	{
		return Err("Username must start with a letter or number");
	}
	if username.chars().all(|c| c.is_ascii_digit()) {
		return Err("Username cannot be all numbers");
	}
	if is_username_reserved(username) {
		return Err("This username is reserved");
	}
	Ok(())
}

/// A local user account.
///
/// # PII Handling
///
/// `display_name` and `avatar_url` come from identity providers and should
/// not be logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	pub id: UserId,

	/// Unique username. Chosen at creation and never rewritten from provider
	/// data afterwards.
	pub username: String,

	pub display_name: String,

	pub avatar_url: Option<String>,

	pub created_at: DateTime<Utc>,

	pub updated_at: DateTime<Utc>,
}

/// Candidate profile reported by an identity provider.
///
/// Used to create an account on first sign-in and to refresh the mutable
/// profile fields on later sign-ins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
	pub username: String,

	/// Email reported by the provider. Empty when the provider has none.
	pub email: String,

	/// Whether the provider vouches for `email`. Only verified emails are
	/// stored as verified and matched on during account reuse.
	pub email_is_verified: bool,

	pub display_name: String,

	pub avatar_url: Option<String>,
}

/// Profile delta applied to an existing user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub display_name: Option<String>,

	/// `Some(None)` clears the avatar.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub avatar_url: Option<Option<String>>,
}

impl UserUpdate {
	/// Computes the delta needed to bring `user` in line with the provider's
	/// view of the profile. The username is never part of the delta.
	pub fn diff(user: &User, candidate: &NewUser) -> Self {
		let mut update = UserUpdate::default();
		if user.display_name != candidate.display_name {
			update.display_name = Some(candidate.display_name.clone());
		}
		if user.avatar_url != candidate.avatar_url {
			update.avatar_url = Some(candidate.avatar_url.clone());
		}
		update
	}

	pub fn is_empty(&self) -> bool {
		self.display_name.is_none() && self.avatar_url.is_none()
	}
}
