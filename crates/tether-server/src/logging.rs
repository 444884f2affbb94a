// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process-wide tracing subscriber.

use tether_server_config::{LogFormat, LoggingConfig};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
	let json = config.format == LogFormat::Json;

	tracing_subscriber::registry()
		.with(env_filter(&config.level))
		.with(json.then(|| fmt::layer().json()))
		.with((!json).then(fmt::layer))
		.try_init()
}

fn env_filter(level: &str) -> EnvFilter {
	EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into())
}
