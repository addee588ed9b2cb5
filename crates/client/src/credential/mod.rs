// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential storage: the access/refresh pair behind a get/set/clear contract.
//!
//! The store is the only owner of the pair. Everything else reads it per
//! request and writes back through it; nothing caches it beyond one call.

pub mod persist;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

pub use persist::FileCredentialStore;

/// Persistence key for the access credential.
pub const ACCESS_KEY: &str = "access";
/// Persistence key for the refresh credential.
pub const REFRESH_KEY: &str = "refresh";

/// Access/refresh credential pair. Both values are opaque.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        Self { access: Some(access.into()), refresh }
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

/// Durable key-value holder for the credential pair.
///
/// `set` and `clear` must be persisted before they return.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> CredentialPair;
    fn set(&self, pair: &CredentialPair) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

/// In-process store with no backing file.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    pair: Mutex<CredentialPair>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self { pair: Mutex::new(pair) }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> CredentialPair {
        self.pair.lock().clone()
    }

    fn set(&self, pair: &CredentialPair) -> Result<(), ClientError> {
        *self.pair.lock() = pair.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.pair.lock() = CredentialPair::default();
        Ok(())
    }
}
