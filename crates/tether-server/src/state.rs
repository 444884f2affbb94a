// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared server state and the sign-in entry point.

use std::sync::Arc;

use tether_server_auth::{
	AccountLinker, Actor, ExternalAccountData, ExternalAccountSpec, LinkError, LinkOptions,
	NewUser, ProviderConfigId, ProviderRegistry, UserId,
};
use tether_server_config::ServerConfig;
use tether_server_db::{AccountRepository, SqlitePool};
use tracing::instrument;

/// Errors from [`AppState::complete_sign_in`].
///
/// `Display` is safe to show to the person signing in.
#[derive(Debug, thiserror::Error)]
pub enum SignInError {
	#[error("Unknown authentication provider.")]
	UnknownProvider(ProviderConfigId),

	#[error(transparent)]
	Link(#[from] LinkError),
}

#[derive(Clone)]
pub struct AppState {
	pub registry: Arc<ProviderRegistry>,
	pub accounts: Arc<AccountRepository>,
	pub linker: AccountLinker,
	pub allow_signup: bool,
}

impl AppState {
	/// Resolves a verified external account to a local user.
	///
	/// `provider` must be registered; the registry is consulted first so
	/// sign-ins through a provider that has been removed from configuration
	/// are refused.
	#[instrument(skip_all, fields(provider = %provider, authenticated = actor.is_authenticated()))]
	pub async fn complete_sign_in(
		&self,
		provider: &ProviderConfigId,
		actor: &Actor,
		new_user: &NewUser,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> Result<UserId, SignInError> {
		if self.registry.lookup(provider).await.is_none() {
			tracing::warn!("sign-in through unregistered provider");
			return Err(SignInError::UnknownProvider(provider.clone()));
		}

		let user_id = self
			.linker
			.link(actor, new_user, spec, data, self.allow_signup)
			.await?;
		Ok(user_id)
	}
}

impl std::fmt::Debug for AppState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AppState")
			.field("registry", &self.registry)
			.field("linker", &self.linker)
			.field("allow_signup", &self.allow_signup)
			.finish()
	}
}

/// Wires the account store, linker and an empty provider registry from
/// `config`. The registry stays closed until providers are synced.
pub fn create_app_state(pool: SqlitePool, config: &ServerConfig) -> AppState {
	let accounts = Arc::new(AccountRepository::new(pool));
	let linker = AccountLinker::with_options(
		accounts.clone(),
		LinkOptions {
			allow_match_on_username_or_email: config.auth.allow_match_on_username_or_email,
		},
	);

	AppState {
		registry: Arc::new(ProviderRegistry::new()),
		accounts,
		linker,
		allow_signup: config.auth.allow_signup,
	}
}
