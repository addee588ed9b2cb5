// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential refresh.
//!
//! The first authorization failure seen while idle leads a refresh episode.
//! Failures arriving while the episode is in flight subscribe to it and are
//! released together with its single outcome. A failed episode clears the
//! stored credentials and ends the session exactly once.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::credential::CredentialStore;
use crate::error::ClientError;
use crate::session::{publish, SessionEvent, SessionTerminator};

/// Body sent to the refresh endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// Successful refresh endpoint response. `refresh` is present only when the
/// server rotates the refresh credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshedCredentials {
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

pub type RefreshFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RefreshedCredentials, ClientError>> + Send + 'a>>;

/// Exchanges a refresh credential for a new access credential.
pub trait Refresher: Send + Sync {
    fn refresh<'a>(&'a self, refresh: &'a str) -> RefreshFuture<'a>;
}

/// Refresher that calls the refresh endpoint directly, outside the
/// authenticated client, so a 401 here never re-enters the coordinator.
pub struct HttpRefresher {
    http: reqwest::Client,
    url: String,
}

impl HttpRefresher {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self { http, url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Perform a single refresh request.
    pub async fn do_refresh(&self, refresh: &str) -> Result<RefreshedCredentials, ClientError> {
        let body = RefreshRequest { refresh: refresh.to_owned() };
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::RefreshRejected(format!("refresh request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ClientError::RefreshRejected(format!("refresh failed ({status}): {text}")));
        }

        resp.json::<RefreshedCredentials>()
            .await
            .map_err(|e| ClientError::RefreshRejected(format!("unusable refresh response: {e}")))
    }
}

impl Refresher for HttpRefresher {
    fn refresh<'a>(&'a self, refresh: &'a str) -> RefreshFuture<'a> {
        Box::pin(self.do_refresh(refresh))
    }
}

/// Outcome shared by every caller of one refresh episode.
type RefreshOutcome = Result<String, ClientError>;

enum RefreshState {
    Idle,
    /// Waiters subscribe to the sender; it is consumed when the episode settles.
    Refreshing(broadcast::Sender<RefreshOutcome>),
}

/// Coordinates credential refreshes across concurrent callers.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn Refresher>,
    terminator: SessionTerminator,
    event_tx: broadcast::Sender<SessionEvent>,
    refresh_timeout: Option<Duration>,
    attempts: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn Refresher>,
        terminator: SessionTerminator,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            store,
            refresher,
            terminator,
            event_tx,
            refresh_timeout: None,
            attempts: AtomicU64::new(0),
        }
    }

    /// Bound each refresh call. A refresh that exceeds the bound fails the
    /// episode like any other refresh failure.
    pub fn with_refresh_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Whether a refresh episode is in flight.
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock(), RefreshState::Refreshing(_))
    }

    /// Callers currently queued behind the in-flight refresh.
    pub fn waiters(&self) -> usize {
        match &*self.state.lock() {
            RefreshState::Refreshing(tx) => tx.receiver_count(),
            RefreshState::Idle => 0,
        }
    }

    /// Number of refresh calls issued so far.
    pub fn refresh_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Obtain a fresh access credential after an authorization failure.
    ///
    /// Leads a new episode when idle, otherwise waits on the one in flight.
    pub async fn recover(&self) -> Result<String, ClientError> {
        let waiter = {
            let mut state = self.state.lock();
            match &*state {
                RefreshState::Refreshing(tx) => Some(tx.subscribe()),
                RefreshState::Idle => {
                    let (tx, _) = broadcast::channel(1);
                    *state = RefreshState::Refreshing(tx);
                    None
                }
            }
        };

        match waiter {
            Some(rx) => wait_for(rx).await,
            None => self.lead().await,
        }
    }

    async fn lead(&self) -> RefreshOutcome {
        let mut episode = Episode { state: &self.state, settled: false };
        let outcome = self.run_refresh().await;
        let waiters = episode.settle(&outcome);

        match outcome {
            Ok(access) => {
                tracing::info!(waiters, "credentials refreshed");
                publish(&self.event_tx, SessionEvent::Refreshed);
                Ok(access)
            }
            Err(e) => {
                if e.is_session_fatal() {
                    tracing::warn!(waiters, err = %e, "credential refresh failed, ending session");
                    publish(
                        &self.event_tx,
                        SessionEvent::Terminated { reason: e.as_str().to_owned() },
                    );
                    self.terminator.terminate();
                } else {
                    tracing::debug!(waiters, err = %e, "credential refresh abandoned");
                }
                Err(e)
            }
        }
    }

    async fn run_refresh(&self) -> RefreshOutcome {
        let Some(refresh) = self.store.get().refresh else {
            tracing::warn!("authorization failed with no refresh credential");
            self.clear_store();
            return Err(ClientError::RefreshUnavailable);
        };

        self.attempts.fetch_add(1, Ordering::Relaxed);
        let attempt = self.refresher.refresh(&refresh);
        let result = match self.refresh_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::RefreshRejected(format!(
                    "refresh timed out after {}ms",
                    limit.as_millis()
                ))),
            },
            None => attempt.await,
        };

        let fresh = match result {
            Ok(fresh) => fresh,
            Err(e) => {
                self.clear_store();
                return Err(match e {
                    ClientError::RefreshRejected(_) | ClientError::RefreshUnavailable => e,
                    other => ClientError::RefreshRejected(other.to_string()),
                });
            }
        };

        let mut next = self.store.get();
        if next.refresh.as_deref() != Some(refresh.as_str()) {
            // Logout or a new login replaced the pair while the refresh was in flight.
            tracing::debug!("credentials changed during refresh, discarding result");
            return Err(ClientError::RefreshInterrupted);
        }
        next.access = Some(fresh.access.clone());
        if let Some(rotated) = fresh.refresh {
            next.refresh = Some(rotated);
        }
        if let Err(e) = self.store.set(&next) {
            tracing::warn!(err = %e, "failed to persist refreshed credentials");
        }
        Ok(fresh.access)
    }

    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!(err = %e, "failed to clear credentials");
        }
    }
}

async fn wait_for(mut rx: broadcast::Receiver<RefreshOutcome>) -> RefreshOutcome {
    match rx.recv().await {
        Ok(outcome) => outcome,
        Err(_) => Err(ClientError::RefreshInterrupted),
    }
}

/// One in-flight refresh. Returns the coordinator to idle even if the
/// leading task is dropped mid-refresh; waiters then see the channel close.
struct Episode<'a> {
    state: &'a Mutex<RefreshState>,
    settled: bool,
}

impl Episode<'_> {
    /// Return to idle and release every waiter with `outcome`.
    fn settle(&mut self, outcome: &RefreshOutcome) -> usize {
        self.settled = true;
        let previous = std::mem::replace(&mut *self.state.lock(), RefreshState::Idle);
        match previous {
            RefreshState::Refreshing(tx) => {
                let waiters = tx.receiver_count();
                let _ = tx.send(outcome.clone());
                waiters
            }
            RefreshState::Idle => 0,
        }
    }
}

impl Drop for Episode<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!("refresh leader dropped, releasing waiters");
            *self.state.lock() = RefreshState::Idle;
        }
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
