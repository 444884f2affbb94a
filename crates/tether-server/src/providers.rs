// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keeps the provider registry in line with the `[auth]` configuration.
//!
//! The configuration is treated as the only source of providers: ids that
//! disappear from it are unregistered.

use std::collections::BTreeSet;
use std::sync::Arc;

use tether_server_auth::{Provider, ProviderConfigId, ProviderRegistry, ProviderUpdates};
use tether_server_config::AuthConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// A provider declared in `[[auth.providers]]`.
#[derive(Debug, Clone)]
pub struct ConfiguredProvider {
	id: ProviderConfigId,
}

impl ConfiguredProvider {
	pub fn new(id: ProviderConfigId) -> Self {
		Self { id }
	}
}

impl Provider for ConfiguredProvider {
	fn config_id(&self) -> ProviderConfigId {
		self.id.clone()
	}
}

/// Registers configured providers missing from `registry` and unregisters
/// those no longer configured, in one update. Returns the number of changes.
///
/// The first sync always updates the registry so that readers waiting on a
/// cold registry are released, even with no providers configured.
/// Fixed registries are left alone.
#[instrument(skip_all, fields(configured = config.providers.len()))]
pub fn sync_providers(registry: &ProviderRegistry, config: &AuthConfig) -> usize {
	if registry.is_fixed() {
		debug!("fixed provider registry, skipping sync");
		return 0;
	}

	let current: BTreeSet<ProviderConfigId> = registry
		.try_snapshot()
		.map(|list| list.iter().map(|p| p.config_id()).collect())
		.unwrap_or_default();
	let desired: BTreeSet<ProviderConfigId> = config.providers.iter().cloned().collect();

	let mut updates = ProviderUpdates::new();
	for id in current.difference(&desired) {
		updates.remove_id(id.clone());
	}
	for id in desired.difference(&current) {
		updates.add(Arc::new(ConfiguredProvider::new(id.clone())));
	}

	let changes = updates.len();
	if changes > 0 || !registry.is_ready() {
		registry.update(updates);
		info!(changes, total = desired.len(), "auth providers synced from config");
	}
	changes
}

/// Syncs `registry` with the current value of `config` and again every time
/// it changes. The task ends when the sender is dropped.
pub fn spawn_listener(
	registry: Arc<ProviderRegistry>,
	mut config: watch::Receiver<AuthConfig>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		loop {
			let auth = config.borrow_and_update().clone();
			sync_providers(&registry, &auth);

			if config.changed().await.is_err() {
				debug!("auth config sender dropped, provider listener exiting");
				break;
			}
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	fn id(provider_type: &str, id: &str) -> ProviderConfigId {
		ProviderConfigId::new(provider_type, id)
	}

	fn config(ids: &[ProviderConfigId]) -> AuthConfig {
		AuthConfig {
			providers: ids.to_vec(),
			..Default::default()
		}
	}

	fn registered(registry: &ProviderRegistry) -> Vec<ProviderConfigId> {
		registry
			.try_snapshot()
			.expect("registry should be ready")
			.iter()
			.map(|p| p.config_id())
			.collect()
	}

	#[test]
	fn first_sync_opens_registry_without_providers() {
		let registry = ProviderRegistry::new();
		assert!(!registry.is_ready());

		assert_eq!(sync_providers(&registry, &config(&[])), 0);
		assert!(registry.is_ready());
		assert!(registered(&registry).is_empty());
	}

	#[test]
	fn sync_adds_and_removes_by_diff() {
		let registry = ProviderRegistry::new();
		let github = id("github", "https://github.com/");
		let gitlab = id("gitlab", "https://gitlab.com/");
		let saml = id("saml", "okta");

		assert_eq!(
			sync_providers(&registry, &config(&[saml.clone(), github.clone()])),
			2
		);
		assert_eq!(registered(&registry), vec![github.clone(), saml.clone()]);

		assert_eq!(
			sync_providers(&registry, &config(&[gitlab.clone(), saml.clone()])),
			2
		);
		assert_eq!(registered(&registry), vec![gitlab, saml]);
	}

	#[test]
	fn unchanged_config_keeps_instances() {
		let registry = ProviderRegistry::new();
		let github = id("github", "https://github.com/");
		sync_providers(&registry, &config(&[github.clone()]));
		let before = registry.try_snapshot().unwrap();

		assert_eq!(sync_providers(&registry, &config(&[github])), 0);
		let after = registry.try_snapshot().unwrap();
		assert!(Arc::ptr_eq(&before[0], &after[0]));
	}

	#[test]
	fn fixed_registry_is_not_synced() {
		let registry =
			ProviderRegistry::fixed(vec![Arc::new(ConfiguredProvider::new(id("saml", "okta")))]);
		assert_eq!(sync_providers(&registry, &config(&[])), 0);
		assert_eq!(registered(&registry), vec![id("saml", "okta")]);
	}

	#[tokio::test]
	async fn listener_follows_config_changes() {
		let registry = Arc::new(ProviderRegistry::new());
		let (tx, rx) = watch::channel(config(&[id("github", "public")]));
		let handle = spawn_listener(registry.clone(), rx);

		let first = tokio::time::timeout(Duration::from_secs(5), registry.snapshot())
			.await
			.unwrap();
		assert_eq!(first.len(), 1);

		tx.send(config(&[id("gitlab", "corp"), id("saml", "okta")]))
			.unwrap();
		drop(tx);
		tokio::time::timeout(Duration::from_secs(5), handle)
			.await
			.unwrap()
			.unwrap();

		assert_eq!(
			registered(&registry),
			vec![id("gitlab", "corp"), id("saml", "okta")]
		);
	}
}
