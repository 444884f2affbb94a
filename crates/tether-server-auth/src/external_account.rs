// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! External account linkages.
//!
//! An external account is the pairing of a provider-issued account identifier
//! with a local user. [`ExternalAccountSpec`] is the durable lookup key;
//! [`ExternalAccountData`] is the provider payload refreshed on every sign-in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ExternalAccountId, UserId};

/// Durable key of an external account.
///
/// Never changes once stored. A given spec is linked to at most one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalAccountSpec {
	/// Kind of identity provider (e.g. "github", "saml", "openidconnect").
	pub service_type: String,

	/// Which instance of that provider kind issued the account (usually the
	/// issuer URL or client ID).
	pub service_id: String,

	/// The account's identifier at the provider.
	pub account_id: String,
}

impl ExternalAccountSpec {
	pub fn new(
		service_type: impl Into<String>,
		service_id: impl Into<String>,
		account_id: impl Into<String>,
	) -> Self {
		Self {
			service_type: service_type.into(),
			service_id: service_id.into(),
			account_id: account_id.into(),
		}
	}
}

impl fmt::Display for ExternalAccountSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}/{}/{}",
			self.service_type, self.service_id, self.account_id
		)
	}
}

/// Opaque provider payload stored alongside the spec.
///
/// # Security
///
/// `auth_data` typically holds tokens. Never log this struct.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalAccountData {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub auth_data: Option<serde_json::Value>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub account_data: Option<serde_json::Value>,
}

impl fmt::Debug for ExternalAccountData {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExternalAccountData")
			.field("auth_data", &self.auth_data.as_ref().map(|_| "[REDACTED]"))
			.field("account_data", &self.account_data.is_some())
			.finish()
	}
}

/// A stored external account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalAccount {
	pub id: ExternalAccountId,
	pub user_id: UserId,
	pub spec: ExternalAccountSpec,
	pub data: ExternalAccountData,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}
