// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tether_server::{logging, sync_providers, version};
use tether_server_auth::ProviderRegistry;
use tether_server_config::ServerConfig;

#[derive(Parser, Debug)]
#[command(
	name = "tether-server",
	about = "External identity linking for Tether",
	version
)]
struct Args {
	/// Config file to use instead of /etc/tether/server.toml
	#[arg(long, global = true, env = "TETHER_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Create or upgrade the account tables
	Migrate,
	/// Print the providers the registry would serve with the current config
	Providers,
	/// Show version and build information
	Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	match args.command {
		Command::Version => {
			println!("{}", version::format_version_info());
		}
		Command::Migrate => {
			let config = load_config(args.config.as_ref())?;
			tracing::info!(database = %config.database.url, "running migrations");
			let pool = tether_server_db::create_pool(&config.database.url).await?;
			tether_server_db::migrate(&pool).await?;
			pool.close().await;
		}
		Command::Providers => {
			let config = load_config(args.config.as_ref())?;
			let registry = ProviderRegistry::new();
			sync_providers(&registry, &config.auth);
			for provider in registry.snapshot().await.iter() {
				println!("{}", provider.config_id());
			}
		}
	}

	Ok(())
}

/// Loads configuration and installs the log subscriber.
fn load_config(path: Option<&PathBuf>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
	let config = match path {
		Some(path) => tether_server_config::load_config_with_file(path)?,
		None => tether_server_config::load_config()?,
	};
	logging::init(&config.logging)?;
	Ok(config)
}
