// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session teardown and session lifecycle events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::credential::CredentialStore;

/// Hosting application hooks used when the session ends.
pub trait SessionObserver: Send + Sync {
    /// Current application location (route path), if the host has one.
    fn current_location(&self) -> Option<String>;

    /// The session was torn down; the host should navigate to `target`.
    fn on_terminated(&self, target: &str);
}

/// Observer for hosts without navigation (CLI, background workers).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn current_location(&self) -> Option<String> {
        None
    }

    fn on_terminated(&self, _target: &str) {}
}

/// Events emitted over the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Login or registration stored a new credential pair.
    LoggedIn { role: Option<String> },
    /// The user logged out.
    LoggedOut,
    /// A refresh episode minted a new access credential.
    Refreshed,
    /// Credentials were cleared and the session ended.
    Terminated { reason: String },
}

/// Clears credentials and tells the host to leave the authenticated area.
pub struct SessionTerminator {
    store: Arc<dyn CredentialStore>,
    observer: Arc<dyn SessionObserver>,
    login_route: String,
    guest_routes: Vec<String>,
}

impl SessionTerminator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        observer: Arc<dyn SessionObserver>,
        login_route: impl Into<String>,
        guest_routes: Vec<String>,
    ) -> Self {
        Self { store, observer, login_route: login_route.into(), guest_routes }
    }

    /// Clear credentials and signal navigation to the login route.
    ///
    /// Navigation is suppressed when the host is already on a guest route.
    /// Returns whether the navigation signal was sent.
    pub fn terminate(&self) -> bool {
        if let Err(e) = self.store.clear() {
            tracing::warn!(err = %e, "failed to clear credentials on session end");
        }

        let location = self.observer.current_location();
        if let Some(ref loc) = location {
            if self.is_guest_location(loc) {
                tracing::debug!(location = %loc, "already on a guest route, not redirecting");
                return false;
            }
        }

        tracing::info!(target_route = %self.login_route, "session ended, redirecting to login");
        self.observer.on_terminated(&self.login_route);
        true
    }

    /// Whether `location` is one of the guest routes or nested beneath one.
    pub fn is_guest_location(&self, location: &str) -> bool {
        let path = location.split(['?', '#']).next().unwrap_or_default();
        self.guest_routes.iter().any(|route| route_matches(route, path))
    }
}

fn route_matches(route: &str, path: &str) -> bool {
    let route = route.trim_end_matches('/');
    if route.is_empty() {
        return path.is_empty() || path == "/";
    }
    match path.strip_prefix(route) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Publish a session event, ignoring the no-subscriber case.
pub(crate) fn publish(tx: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    let _ = tx.send(event);
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
