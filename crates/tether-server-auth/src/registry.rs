// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registry of the identity provider instances currently trusted by the
//! deployment.
//!
//! Configuration listeners register and unregister providers with
//! [`ProviderRegistry::update`]; request handlers read them with
//! [`ProviderRegistry::snapshot`] and [`ProviderRegistry::lookup`].
//!
//! # Concurrency
//!
//! ```text
//! update ──► build new Vec ──► lock ─ swap Arc ─ unlock ──► fire ready (once)
//! snapshot ─► wait ready (first time only) ──► lock ─ clone Arc ─ unlock
//! ```
//!
//! Writes are rare and reads happen on every sign-in, so the list is copied on
//! write and readers only clone a pointer under the lock. Readers never see a
//! half-applied update.
//!
//! Reads before the first update wait on a single-fire latch: a
//! [`tokio::sync::watch`] channel that flips to `true` exactly once and wakes
//! every waiter together.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::provider::{Provider, ProviderConfigId};

/// An immutable, sorted view of the registered providers.
pub type ProviderList = Arc<[Arc<dyn Provider>]>;

#[derive(Debug, Clone)]
enum Change {
	Add(Arc<dyn Provider>),
	Remove,
}

/// A batch of registrations and unregistrations applied atomically by
/// [`ProviderRegistry::update`].
///
/// Entries are keyed by [`ProviderConfigId`]; a later entry for the same id
/// replaces an earlier one.
#[derive(Debug, Clone, Default)]
pub struct ProviderUpdates {
	entries: BTreeMap<ProviderConfigId, Change>,
}

impl ProviderUpdates {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register `provider`. If a provider with the same config id is already
	/// registered, this instance replaces it.
	pub fn add(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
		self.entries.insert(provider.config_id(), Change::Add(provider));
		self
	}

	/// Unregister `provider`. It must currently be registered.
	pub fn remove(&mut self, provider: &dyn Provider) -> &mut Self {
		self.remove_id(provider.config_id())
	}

	/// Unregister the provider with this config id. It must currently be
	/// registered.
	pub fn remove_id(&mut self, id: ProviderConfigId) -> &mut Self {
		self.entries.insert(id, Change::Remove);
		self
	}

	/// `true` registers, `false` unregisters.
	pub fn set(&mut self, provider: Arc<dyn Provider>, enabled: bool) -> &mut Self {
		if enabled {
			self.add(provider)
		} else {
			self.remove(provider.as_ref())
		}
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}
}

impl FromIterator<(Arc<dyn Provider>, bool)> for ProviderUpdates {
	fn from_iter<I: IntoIterator<Item = (Arc<dyn Provider>, bool)>>(iter: I) -> Self {
		let mut updates = ProviderUpdates::new();
		for (provider, enabled) in iter {
			updates.set(provider, enabled);
		}
		updates
	}
}

/// The set of active provider instances.
///
/// Construct one per process and share it behind an `Arc`.
pub struct ProviderRegistry {
	providers: Mutex<ProviderList>,
	ready: watch::Sender<bool>,
	fixed: Option<ProviderList>,
}

impl ProviderRegistry {
	/// An empty registry. Reads wait until the first [`update`](Self::update).
	pub fn new() -> Self {
		let (ready, _) = watch::channel(false);
		Self {
			providers: Mutex::new(Arc::from(Vec::new())),
			ready,
			fixed: None,
		}
	}

	/// A registry that always serves `providers` and never waits. Updates are
	/// still accepted but do not affect reads.
	///
	/// Intended for tests.
	pub fn fixed(providers: Vec<Arc<dyn Provider>>) -> Self {
		let mut registry = Self::new();
		registry.fixed = Some(sorted(providers));
		registry
	}

	/// Returns all registered providers sorted by config id.
	///
	/// Waits until [`update`](Self::update) has been called at least once.
	pub async fn snapshot(&self) -> ProviderList {
		if let Some(fixed) = &self.fixed {
			return fixed.clone();
		}
		self.wait_ready().await;
		self.lock().clone()
	}

	/// Like [`snapshot`](Self::snapshot), but returns `None` instead of
	/// waiting when the registry has never been updated.
	pub fn try_snapshot(&self) -> Option<ProviderList> {
		if let Some(fixed) = &self.fixed {
			return Some(fixed.clone());
		}
		if !self.is_ready() {
			return None;
		}
		Some(self.lock().clone())
	}

	/// Returns the provider registered under `id`, if any.
	///
	/// Waits until [`update`](Self::update) has been called at least once.
	pub async fn lookup(&self, id: &ProviderConfigId) -> Option<Arc<dyn Provider>> {
		self
			.snapshot()
			.await
			.iter()
			.find(|p| p.config_id() == *id)
			.cloned()
	}

	/// Whether the registry has been updated at least once.
	pub fn is_ready(&self) -> bool {
		*self.ready.borrow()
	}

	/// Whether this registry was built with [`fixed`](Self::fixed).
	pub fn is_fixed(&self) -> bool {
		self.fixed.is_some()
	}

	/// Applies a batch of registrations and unregistrations atomically.
	///
	/// Providers not mentioned in `updates` are kept. The first call opens the
	/// read gate, even when `updates` is empty.
	///
	/// # Panics
	///
	/// Panics if `updates` unregisters a provider that is not registered. This
	/// is a bug in the caller; the registry is left unchanged.
	pub fn update(&self, updates: ProviderUpdates) {
		let mut current = self.lock();

		for (id, change) in &updates.entries {
			if matches!(change, Change::Remove) && !current.iter().any(|p| p.config_id() == *id) {
				panic!("ProviderRegistry::update: provider to remove is not registered: {id}");
			}
		}

		let mut added = 0usize;
		let mut removed = 0usize;
		let mut next: Vec<Arc<dyn Provider>> = Vec::with_capacity(current.len() + updates.len());
		for provider in current.iter() {
			match updates.entries.get(&provider.config_id()) {
				None => next.push(provider.clone()),
				Some(Change::Remove) => removed += 1,
				// Re-added below; the new instance replaces this one.
				Some(Change::Add(_)) => {}
			}
		}
		for change in updates.entries.into_values() {
			if let Change::Add(provider) = change {
				added += 1;
				next.push(provider);
			}
		}

		*current = sorted(next);
		let total = current.len();
		drop(current);

		let opened = self.ready.send_if_modified(|ready| {
			if *ready {
				false
			} else {
				*ready = true;
				true
			}
		});
		if opened {
			info!(providers = total, "provider registry initialized");
		}
		debug!(added, removed, total, "provider registry updated");
	}

	async fn wait_ready(&self) {
		let mut rx = self.ready.subscribe();
		// The sender lives as long as `self`, so this cannot observe a closed
		// channel.
		let _ = rx.wait_for(|ready| *ready).await;
	}

	fn lock(&self) -> MutexGuard<'_, ProviderList> {
		// Updates validate before mutating, so a poisoned lock still guards a
		// consistent list.
		self.providers.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

impl Default for ProviderRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for ProviderRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProviderRegistry")
			.field("ready", &self.is_ready())
			.field("providers", &self.lock().len())
			.field("fixed", &self.fixed.is_some())
			.finish()
	}
}

fn sorted(mut providers: Vec<Arc<dyn Provider>>) -> ProviderList {
	providers.sort_by_cached_key(|p| p.config_id());
	Arc::from(providers)
}
