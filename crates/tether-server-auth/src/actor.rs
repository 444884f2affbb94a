// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The authentication context of the current request.

use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Who is making the current request.
///
/// An authenticated actor signing in through an identity provider is linking
/// an additional external account to their own user. An anonymous actor is
/// signing in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
	user_id: Option<UserId>,
}

impl Actor {
	/// An unauthenticated actor.
	pub fn anonymous() -> Self {
		Self { user_id: None }
	}

	/// An actor authenticated as `user_id`.
	pub fn user(user_id: UserId) -> Self {
		Self {
			user_id: Some(user_id),
		}
	}

	pub fn is_authenticated(&self) -> bool {
		self.user_id.is_some()
	}

	/// The authenticated user, if any.
	pub fn user_id(&self) -> Option<UserId> {
		self.user_id
	}
}
