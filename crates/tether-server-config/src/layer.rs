// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

use crate::sections::{AuthConfigLayer, DatabaseConfigLayer, LoggingConfigLayer};

/// One source's view of the configuration. Absent sections and fields
/// leave lower-precedence values in place.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
	#[serde(default)]
	pub auth: Option<AuthConfigLayer>,
}

impl ServerConfigLayer {
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
		merge_section(&mut self.auth, other.auth, AuthConfigLayer::merge);
	}
}

fn merge_section<T>(current: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (current.as_mut(), other) {
		(Some(current), Some(other)) => merge(current, other),
		(None, Some(other)) => *current = Some(other),
		(_, None) => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn later_layer_overrides_set_fields_only() {
		let mut base: ServerConfigLayer = toml::from_str(
			r#"
			[database]
			url = "sqlite:/var/lib/tether/base.db"

			[logging]
			level = "debug"
			"#,
		)
		.unwrap();

		let overlay: ServerConfigLayer = toml::from_str(
			r#"
			[logging]
			format = "json"
			"#,
		)
		.unwrap();

		base.merge(overlay);

		let database = base.database.unwrap();
		assert_eq!(database.url.as_deref(), Some("sqlite:/var/lib/tether/base.db"));
		let logging = base.logging.unwrap();
		assert_eq!(logging.level.as_deref(), Some("debug"));
		assert!(logging.format.is_some());
	}

	#[test]
	fn unknown_sections_are_rejected() {
		let result: Result<ServerConfigLayer, _> = toml::from_str("[http]\nport = 8080\n");
		assert!(result.is_err());
	}
}
