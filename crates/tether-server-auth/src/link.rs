// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolving an external identity to exactly one local account.
//!
//! Called once a provider-specific adapter has verified the external account
//! and extracted its spec, payload and profile.
//!
//! # Decision Flow
//!
//! ```text
//! authenticated actor ──► associate(actor, spec)
//!
//! anonymous actor ──► lookup(spec) ─┬─ found ──► sync display name / avatar
//!                                   └─ not found ─┬─ !create ──► NotFound
//!                                                 └─ create ──► create user
//!                                                      │
//!                     username/email taken ◄───────────┘
//!                        └─► reuse matching user ──► associate(existing, spec)
//! ```
//!
//! # Security
//!
//! Every failure is a [`LinkError`]. Its `Display` is a message safe to show
//! to an unauthenticated caller. The underlying [`AccountStoreError`] may
//! reveal storage details and is only for logs; [`AccountLinker::link`] logs
//! it before returning.

use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use crate::actor::Actor;
use crate::external_account::{ExternalAccountData, ExternalAccountSpec};
use crate::store::{AccountStore, AccountStoreError, ErrorKind};
use crate::types::UserId;
use crate::user::{NewUser, UserUpdate};

const ASSOCIATION_FAILED: &str = "Unexpected error associating the external account with your \
	user account. Most likely another user is already linked with this external account. A site \
	admin or the other user can unlink it to fix this problem.";

const LOOKUP_FAILED: &str = "Unexpected error looking up the user account associated with the \
	external account. Ask a site admin for help.";

const NOT_PROVISIONED: &str =
	"User account has not been created yet. A site admin may have to create one for you.";

const USER_FETCH_FAILED: &str =
	"Unexpected error getting the user account. Ask a site admin for help.";

const PROFILE_UPDATE_FAILED: &str = "Unexpected error updating the user account with new profile \
	information from the external account. Ask a site admin for help.";

const CREATE_FAILED: &str = "Unable to create a new user account due to a conflict or other \
	unexpected error. Ask a site admin for help.";

const REUSE_ASSOCIATION_FAILED: &str = "Unexpected error associating the external account with \
	the existing user account that has the same username or email address.";

/// Behavior switches for [`AccountLinker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
	/// When account creation collides with an existing username or verified
	/// email, link the external account to that existing user instead of
	/// failing.
	pub allow_match_on_username_or_email: bool,
}

impl Default for LinkOptions {
	fn default() -> Self {
		Self {
			allow_match_on_username_or_email: true,
		}
	}
}

/// A failed linking attempt.
///
/// `Display` yields only the safe message. The store error is reachable
/// through [`std::error::Error::source`] and [`LinkError::store_error`].
#[derive(Debug, thiserror::Error)]
#[error("{safe_message}")]
pub struct LinkError {
	safe_message: String,
	#[source]
	source: AccountStoreError,
}

impl LinkError {
	fn new(safe_message: impl Into<String>, source: AccountStoreError) -> Self {
		Self {
			safe_message: safe_message.into(),
			source,
		}
	}

	/// Text that may be shown to the caller.
	pub fn safe_message(&self) -> &str {
		&self.safe_message
	}

	/// Kind of the underlying store error. `ErrorKind::NotFound` means the
	/// external account is unknown and creation was not requested.
	pub fn kind(&self) -> ErrorKind {
		self.source.kind()
	}

	pub fn is_not_found(&self) -> bool {
		self.kind() == ErrorKind::NotFound
	}

	/// The underlying error. May contain sensitive details.
	pub fn store_error(&self) -> &AccountStoreError {
		&self.source
	}

	pub fn into_store_error(self) -> AccountStoreError {
		self.source
	}
}

/// Runs the linking protocol against an [`AccountStore`].
///
/// Holds no locks; concurrent sign-ins for the same new identity are
/// serialized by the store's uniqueness constraints and surface as the
/// username/email-exists branches.
#[derive(Clone)]
pub struct AccountLinker {
	store: Arc<dyn AccountStore>,
	options: LinkOptions,
}

impl AccountLinker {
	pub fn new(store: Arc<dyn AccountStore>) -> Self {
		Self::with_options(store, LinkOptions::default())
	}

	pub fn with_options(store: Arc<dyn AccountStore>, options: LinkOptions) -> Self {
		Self { store, options }
	}

	pub fn options(&self) -> LinkOptions {
		self.options
	}

	/// Resolves the external account to a local user, creating or linking as
	/// needed.
	///
	/// - Authenticated `actor`: the external account is linked to the actor.
	/// - Anonymous `actor`: the previously linked user is returned and their
	///   display name and avatar refreshed from `new_user`. Unknown accounts
	///   are created from `new_user` when `create_if_not_exist` is set, and
	///   fail with [`ErrorKind::NotFound`] otherwise.
	///
	/// The username of an existing user is never changed.
	#[instrument(
		skip_all,
		fields(
			service_type = %spec.service_type,
			service_id = %spec.service_id,
			authenticated = actor.is_authenticated(),
			create_if_not_exist = create_if_not_exist
		)
	)]
	pub async fn link(
		&self,
		actor: &Actor,
		new_user: &NewUser,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
		create_if_not_exist: bool,
	) -> Result<UserId, LinkError> {
		let result = self
			.resolve(actor, new_user, spec, data, create_if_not_exist)
			.await;

		match &result {
			Ok(user_id) => debug!(user_id = %user_id, "external account resolved"),
			Err(e) => warn!(
				kind = ?e.kind(),
				error = %e.store_error(),
				safe_message = %e.safe_message(),
				"external account linking failed"
			),
		}
		result
	}

	async fn resolve(
		&self,
		actor: &Actor,
		new_user: &NewUser,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
		create_if_not_exist: bool,
	) -> Result<UserId, LinkError> {
		if let Some(user_id) = actor.user_id() {
			self
				.store
				.associate_user_and_save(user_id, spec, data)
				.await
				.map_err(|e| LinkError::new(ASSOCIATION_FAILED, e))?;
			return Ok(user_id);
		}

		let user_id = match self.store.lookup_user_and_save(spec, data).await {
			Ok(user_id) => user_id,
			Err(e) if e.is_not_found() => {
				if !create_if_not_exist {
					return Err(LinkError::new(NOT_PROVISIONED, e));
				}
				return self.create(new_user, spec, data).await;
			}
			Err(e) => return Err(LinkError::new(LOOKUP_FAILED, e)),
		};

		self.sync_profile(user_id, new_user).await
	}

	async fn create(
		&self,
		new_user: &NewUser,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> Result<UserId, LinkError> {
		let err = match self.store.create_user_and_save(new_user, spec, data).await {
			Ok(user_id) => {
				debug!(user_id = %user_id, "created user for external account");
				return Ok(user_id);
			}
			Err(e) => e,
		};

		match err.kind() {
			ErrorKind::UsernameExists => {
				let safe_message = format!(
					"The username {:?} already exists and is not linked to this external account. \
					 If possible, sign in with the external account you used previously. If that's \
					 not possible, a site admin can unlink or delete the account with that username \
					 to fix this problem.",
					new_user.username
				);
				if !self.options.allow_match_on_username_or_email {
					return Err(LinkError::new(safe_message, err));
				}
				match self.store.get_by_username(&new_user.username).await {
					Ok(existing) => self.associate_existing(existing.id, spec, data).await,
					Err(lookup_err) => {
						error!(
							error = %lookup_err,
							original_error = %err,
							"unable to reuse user account with matching username"
						);
						Err(LinkError::new(safe_message, err))
					}
				}
			}
			ErrorKind::EmailExists => {
				let safe_message = format!(
					"The email address {:?} already exists and is associated with a different user. \
					 A site admin can remove the email address from that user to fix this problem.",
					new_user.email
				);
				if !self.options.allow_match_on_username_or_email {
					return Err(LinkError::new(safe_message, err));
				}
				match self.store.get_by_verified_email(&new_user.email).await {
					Ok(existing) => self.associate_existing(existing.id, spec, data).await,
					Err(lookup_err) => {
						error!(
							error = %lookup_err,
							original_error = %err,
							"unable to reuse user account with matching email"
						);
						Err(LinkError::new(safe_message, err))
					}
				}
			}
			ErrorKind::Presentation => {
				let safe_message = err.presentation_message().unwrap_or(CREATE_FAILED).to_string();
				Err(LinkError::new(safe_message, err))
			}
			_ => Err(LinkError::new(CREATE_FAILED, err)),
		}
	}

	async fn associate_existing(
		&self,
		user_id: UserId,
		spec: &ExternalAccountSpec,
		data: &ExternalAccountData,
	) -> Result<UserId, LinkError> {
		self
			.store
			.associate_user_and_save(user_id, spec, data)
			.await
			.map_err(|e| LinkError::new(REUSE_ASSOCIATION_FAILED, e))?;
		debug!(user_id = %user_id, "linked external account to existing user");
		Ok(user_id)
	}

	async fn sync_profile(&self, user_id: UserId, new_user: &NewUser) -> Result<UserId, LinkError> {
		let user = self
			.store
			.get_by_id(user_id)
			.await
			.map_err(|e| LinkError::new(USER_FETCH_FAILED, e))?;

		let update = UserUpdate::diff(&user, new_user);
		if !update.is_empty() {
			self
				.store
				.update(user.id, &update)
				.await
				.map_err(|e| LinkError::new(PROFILE_UPDATE_FAILED, e))?;
			debug!(
				user_id = %user.id,
				display_name_changed = update.display_name.is_some(),
				avatar_changed = update.avatar_url.is_some(),
				"synced profile from external account"
			);
		}

		Ok(user.id)
	}
}

impl std::fmt::Debug for AccountLinker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AccountLinker")
			.field("options", &self.options)
			.finish_non_exhaustive()
	}
}
