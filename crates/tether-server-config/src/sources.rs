// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{AuthConfigLayer, DatabaseConfigLayer, LogFormat, LoggingConfigLayer};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file contributes nothing.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/tether/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: TETHER_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		load_layer(&|name| std::env::var(name).ok())
	}
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn load_layer(lookup: Lookup<'_>) -> Result<ServerConfigLayer, ConfigError> {
	Ok(ServerConfigLayer {
		database: Some(load_database(lookup)),
		logging: Some(load_logging(lookup)?),
		auth: Some(load_auth(lookup)?),
	})
}

fn env_var(lookup: Lookup<'_>, name: &str) -> Option<String> {
	lookup(name).filter(|s| !s.is_empty())
}

fn env_bool(lookup: Lookup<'_>, name: &str) -> Result<Option<bool>, ConfigError> {
	match env_var(lookup, name) {
		Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(Some(true)),
		Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(Some(false)),
		Some(v) => Err(ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid boolean value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn load_database(lookup: Lookup<'_>) -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var(lookup, "TETHER_SERVER_DATABASE_URL"),
	}
}

fn load_logging(lookup: Lookup<'_>) -> Result<LoggingConfigLayer, ConfigError> {
	let format = env_var(lookup, "TETHER_SERVER_LOG_FORMAT")
		.map(|v| {
			v.parse::<LogFormat>().map_err(|_| ConfigError::InvalidValue {
				key: "TETHER_SERVER_LOG_FORMAT".to_string(),
				message: format!("unknown log format '{v}', expected 'text' or 'json'"),
			})
		})
		.transpose()?;

	Ok(LoggingConfigLayer {
		level: env_var(lookup, "TETHER_SERVER_LOG_LEVEL"),
		format,
	})
}

fn load_auth(lookup: Lookup<'_>) -> Result<AuthConfigLayer, ConfigError> {
	const PROVIDERS: &str = "TETHER_SERVER_AUTH_PROVIDERS";

	Ok(AuthConfigLayer {
		allow_signup: env_bool(lookup, "TETHER_SERVER_AUTH_ALLOW_SIGNUP")?,
		allow_match_on_username_or_email: env_bool(
			lookup,
			"TETHER_SERVER_AUTH_ALLOW_MATCH_ON_USERNAME_OR_EMAIL",
		)?,
		providers: env_var(lookup, PROVIDERS)
			.map(|v| crate::sections::parse_provider_list(PROVIDERS, &v))
			.transpose()?,
	})
}
