// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer credential attachment for outbound calls.

use std::sync::Arc;

use reqwest::RequestBuilder;

use crate::credential::CredentialStore;

/// Attaches the stored access credential to outbound requests.
///
/// Reads the store on every call; requests made without a stored access
/// credential go out anonymously.
#[derive(Clone)]
pub struct RequestAuthenticator {
    store: Arc<dyn CredentialStore>,
}

impl RequestAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// The access credential a request built right now would carry.
    pub fn current_access(&self) -> Option<String> {
        self.store.get().access
    }

    /// Attach `Authorization: Bearer <access>` if an access credential is stored.
    pub fn authenticate(&self, req: RequestBuilder) -> RequestBuilder {
        apply_bearer(req, self.current_access().as_deref())
    }
}

/// Attach a bearer header when `access` is present; leave the request untouched otherwise.
pub fn apply_bearer(req: RequestBuilder, access: Option<&str>) -> RequestBuilder {
    match access {
        Some(token) => req.bearer_auth(token),
        None => req,
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
