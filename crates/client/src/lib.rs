// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Portal client: authenticated access to the school portal REST API.
//!
//! Requests carry the stored bearer credential. Authorization failures are
//! recovered by a single shared refresh, after which each failed call is
//! replayed once. A refresh that cannot succeed ends the session.

pub mod account;
pub mod auth;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod refresh;
pub mod session;

use std::sync::Arc;

pub use crate::account::{AuthPayload, RegisterRequest, Role, UserProfile};
pub use crate::client::{ApiClient, ApiClientBuilder, PendingCall};
pub use crate::config::ClientConfig;
pub use crate::credential::{CredentialPair, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use crate::error::ClientError;
pub use crate::refresh::{RefreshCoordinator, Refresher};
pub use crate::session::{NoopObserver, SessionEvent, SessionObserver};

/// Build a client backed by the credential file under the configured state dir.
pub fn connect(config: ClientConfig) -> Result<Arc<ApiClient>, ClientError> {
    tracing::debug!(api = %config.base_url(), state = %config.state_dir().display(), "connecting");
    ApiClient::builder(config).build()
}
