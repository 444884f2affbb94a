// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identity provider instances as seen by the registry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a configured provider instance.
///
/// Ordering is by `(provider_type, id)`, which is the order the registry
/// serves providers in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderConfigId {
	/// Provider kind, e.g. "github" or "openidconnect".
	#[serde(rename = "type")]
	pub provider_type: String,

	/// Distinguishes multiple instances of the same kind.
	pub id: String,
}

impl ProviderConfigId {
	pub fn new(provider_type: impl Into<String>, id: impl Into<String>) -> Self {
		Self {
			provider_type: provider_type.into(),
			id: id.into(),
		}
	}
}

impl fmt::Display for ProviderConfigId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.provider_type, self.id)
	}
}

/// A configured identity provider instance.
///
/// Everything beyond the configuration identity (authorization URLs, token
/// exchange, assertion validation) is specific to the provider kind and is
/// not part of this trait.
pub trait Provider: Send + Sync + fmt::Debug {
	fn config_id(&self) -> ProviderConfigId;
}
