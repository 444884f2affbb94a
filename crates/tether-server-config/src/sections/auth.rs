// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sign-in configuration: account creation policy and the providers to
//! register.

use serde::Deserialize;
use tether_server_auth::ProviderConfigId;

use crate::error::ConfigError;

/// Auth configuration (runtime, fully resolved).
#[derive(Debug, Clone)]
pub struct AuthConfig {
	/// Create a user on first sign-in with an unknown external account.
	pub allow_signup: bool,

	/// Reuse an existing user whose username or verified email matches the
	/// external account's profile.
	pub allow_match_on_username_or_email: bool,

	/// Providers to register, in configuration order.
	pub providers: Vec<ProviderConfigId>,
}

impl Default for AuthConfig {
	fn default() -> Self {
		Self {
			allow_signup: true,
			allow_match_on_username_or_email: true,
			providers: Vec::new(),
		}
	}
}

impl AuthConfig {
	/// Rejects empty provider fields and duplicate provider ids.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let mut seen = std::collections::HashSet::new();
		for provider in &self.providers {
			if provider.provider_type.trim().is_empty() || provider.id.trim().is_empty() {
				return Err(ConfigError::Validation(format!(
					"auth provider '{provider}' must have a non-empty type and id"
				)));
			}
			if !seen.insert(provider) {
				return Err(ConfigError::Validation(format!(
					"auth provider '{provider}' is configured more than once"
				)));
			}
		}
		Ok(())
	}
}

/// Auth configuration layer (partial, for merging).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfigLayer {
	#[serde(default)]
	pub allow_signup: Option<bool>,
	#[serde(default)]
	pub allow_match_on_username_or_email: Option<bool>,
	/// Replaces, not extends, the provider list of lower layers.
	#[serde(default)]
	pub providers: Option<Vec<ProviderConfigId>>,
}

impl AuthConfigLayer {
	pub fn merge(&mut self, other: AuthConfigLayer) {
		if other.allow_signup.is_some() {
			self.allow_signup = other.allow_signup;
		}
		if other.allow_match_on_username_or_email.is_some() {
			self.allow_match_on_username_or_email = other.allow_match_on_username_or_email;
		}
		if other.providers.is_some() {
			self.providers = other.providers;
		}
	}

	pub fn finalize(self) -> AuthConfig {
		let defaults = AuthConfig::default();
		AuthConfig {
			allow_signup: self.allow_signup.unwrap_or(defaults.allow_signup),
			allow_match_on_username_or_email: self
				.allow_match_on_username_or_email
				.unwrap_or(defaults.allow_match_on_username_or_email),
			providers: self.providers.unwrap_or(defaults.providers),
		}
	}
}

/// Parses the `type:id,type:id` form used by the environment.
///
/// Each entry splits at its first `:`, so ids may themselves contain colons
/// (e.g. issuer URLs). Ids cannot contain commas.
pub(crate) fn parse_provider_list(key: &str, value: &str) -> Result<Vec<ProviderConfigId>, ConfigError> {
	value
		.split(',')
		.map(str::trim)
		.filter(|entry| !entry.is_empty())
		.map(|entry| {
			let (provider_type, id) = entry.split_once(':').ok_or_else(|| ConfigError::InvalidValue {
				key: key.to_string(),
				message: format!("provider entry '{entry}' must be in the form 'type:id'"),
			})?;
			Ok(ProviderConfigId {
				provider_type: provider_type.trim().to_string(),
				id: id.trim().to_string(),
			})
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn provider(provider_type: &str, id: &str) -> ProviderConfigId {
		ProviderConfigId {
			provider_type: provider_type.to_string(),
			id: id.to_string(),
		}
	}

	#[test]
	fn test_defaults_allow_signup_and_matching() {
		let config = AuthConfigLayer::default().finalize();
		assert!(config.allow_signup);
		assert!(config.allow_match_on_username_or_email);
		assert!(config.providers.is_empty());
	}

	#[test]
	fn test_providers_from_toml() {
		let layer: AuthConfigLayer = toml::from_str(
			r#"
			allow_signup = false

			[[providers]]
			type = "github"
			id = "https://github.com/"

			[[providers]]
			type = "openidconnect"
			id = "https://accounts.example.com"
			"#,
		)
		.unwrap();

		let config = layer.finalize();
		assert!(!config.allow_signup);
		assert_eq!(
			config.providers,
			vec![
				provider("github", "https://github.com/"),
				provider("openidconnect", "https://accounts.example.com"),
			]
		);
	}

	#[test]
	fn test_merge_replaces_provider_list() {
		let mut base = AuthConfigLayer {
			providers: Some(vec![provider("github", "a"), provider("gitlab", "b")]),
			..Default::default()
		};
		base.merge(AuthConfigLayer {
			providers: Some(vec![provider("saml", "c")]),
			..Default::default()
		});
		assert_eq!(base.finalize().providers, vec![provider("saml", "c")]);
	}

	#[test]
	fn test_parse_provider_list_splits_on_first_colon() {
		let parsed = parse_provider_list(
			"TETHER_SERVER_AUTH_PROVIDERS",
			"github:https://github.com/, saml:okta ,",
		)
		.unwrap();
		assert_eq!(
			parsed,
			vec![provider("github", "https://github.com/"), provider("saml", "okta")]
		);
	}

	#[test]
	fn test_parse_provider_list_rejects_missing_separator() {
		let err = parse_provider_list("TETHER_SERVER_AUTH_PROVIDERS", "github").unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { .. }));
	}

	#[test]
	fn test_validate_rejects_duplicates() {
		let config = AuthConfig {
			providers: vec![provider("github", "a"), provider("github", "a")],
			..Default::default()
		};
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("more than once"));
	}

	#[test]
	fn test_validate_rejects_empty_fields() {
		let config = AuthConfig {
			providers: vec![provider("github", " ")],
			..Default::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_same_id_different_type_is_allowed() {
		let config = AuthConfig {
			providers: vec![provider("github", "a"), provider("gitlab", "a")],
			..Default::default()
		};
		assert!(config.validate().is_ok());
	}

	proptest! {
		/// Ids keep any colons they contain; only the first one separates the type.
		#[test]
		fn provider_list_preserves_colons_in_ids(
			entries in prop::collection::vec(("[a-z]{1,12}", "[a-z0-9:/.]{0,20}[a-z0-9]"), 0..6)
		) {
			let value = entries
				.iter()
				.map(|(t, id)| format!("{t}:{id}"))
				.collect::<Vec<_>>()
				.join(",");

			let parsed = parse_provider_list("TETHER_SERVER_AUTH_PROVIDERS", &value).unwrap();
			let expected: Vec<_> = entries.iter().map(|(t, id)| provider(t, id)).collect();
			prop_assert_eq!(parsed, expected);
		}
	}
}
