// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared HTTP client for the portal API.
//!
//! Every call goes out with the stored bearer credential. A 401 hands the
//! call to the refresh coordinator and replays it once with the new
//! credential; anything else is passed through untouched.

use std::sync::Arc;

use reqwest::{Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::auth::{apply_bearer, RequestAuthenticator};
use crate::config::ClientConfig;
use crate::credential::{CredentialStore, FileCredentialStore};
use crate::error::ClientError;
use crate::refresh::{HttpRefresher, RefreshCoordinator, Refresher};
use crate::session::{NoopObserver, SessionEvent, SessionObserver, SessionTerminator};

/// Install the process-wide rustls crypto provider. Safe to call repeatedly.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// A captured outbound request that can be replayed once after a refresh.
#[derive(Debug, Clone)]
pub struct PendingCall {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    retried: bool,
}

impl PendingCall {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: vec![], body: None, retried: false }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, ClientError> {
        Ok(self.with_body(serde_json::to_value(body)?))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn retried(&self) -> bool {
        self.retried
    }

    /// Consume the single replay. Returns `false` if it was already used.
    pub fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }
}

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn CredentialStore>>,
    observer: Option<Arc<dyn SessionObserver>>,
    refresher: Option<Arc<dyn Refresher>>,
}

impl ApiClientBuilder {
    /// Credential store. Defaults to the credential file under the state dir.
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Host hooks for session termination. Defaults to [`NoopObserver`].
    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Refresh implementation. Defaults to POSTing the configured refresh URL.
    pub fn refresher(mut self, refresher: Arc<dyn Refresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn build(self) -> Result<Arc<ApiClient>, ClientError> {
        install_crypto_provider();

        let mut http = reqwest::Client::builder();
        if let Some(timeout) = self.config.request_timeout() {
            http = http.timeout(timeout);
        }
        let http = http.build().map_err(|e| ClientError::Transport(e.to_string()))?;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(FileCredentialStore::open(self.config.credential_path())),
        };
        let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));
        let refresh_url = self.config.refresh_url();
        let refresher = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(HttpRefresher::new(http.clone(), refresh_url.clone())),
        };

        let (event_tx, _) = broadcast::channel(64);
        let terminator = SessionTerminator::new(
            Arc::clone(&store),
            observer,
            self.config.login_route.clone(),
            self.config.guest_routes.clone(),
        );
        let coordinator =
            RefreshCoordinator::new(Arc::clone(&store), refresher, terminator, event_tx.clone())
                .with_refresh_timeout(self.config.refresh_timeout());

        Ok(Arc::new(ApiClient {
            authenticator: RequestAuthenticator::new(Arc::clone(&store)),
            config: self.config,
            http,
            refresh_url,
            store,
            coordinator,
            event_tx,
        }))
    }
}

/// Authenticated HTTP client shared by every call site.
pub struct ApiClient {
    config: ClientConfig,
    http: reqwest::Client,
    refresh_url: String,
    store: Arc<dyn CredentialStore>,
    authenticator: RequestAuthenticator,
    coordinator: RefreshCoordinator,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder { config, store: None, observer: None, refresher: None }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn events(&self) -> &broadcast::Sender<SessionEvent> {
        &self.event_tx
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Whether an access credential is currently stored.
    pub fn is_authenticated(&self) -> bool {
        self.authenticator.current_access().is_some()
    }

    /// Send a call, recovering once from an authorization failure.
    ///
    /// Returns the response for any status other than 401, unchanged.
    pub async fn execute(&self, mut call: PendingCall) -> Result<Response, ClientError> {
        let access = self.authenticator.current_access();
        let resp = self.dispatch(&call, access.as_deref()).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        if self.is_refresh_call(&call) {
            tracing::debug!(path = %call.path, "refresh endpoint rejected authorization");
            return Err(ClientError::AuthExpired);
        }
        if !call.mark_retried() {
            return Err(ClientError::RetryExhausted);
        }

        // A refresh or login may have replaced the credential while this call was in flight.
        let fresh = match self.authenticator.current_access() {
            Some(current) if access.as_deref() != Some(current.as_str()) => {
                tracing::debug!(method = %call.method, path = %call.path, "credential replaced in flight, replaying");
                current
            }
            _ => {
                tracing::debug!(method = %call.method, path = %call.path, "authorization failed, refreshing");
                self.coordinator.recover().await?
            }
        };

        let replay = self.dispatch(&call, Some(&fresh)).await?;
        if replay.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(method = %call.method, path = %call.path, "authorization failed after refresh");
            return Err(ClientError::RetryExhausted);
        }
        Ok(replay)
    }

    /// Send a call and decode a successful JSON response.
    pub async fn call_json<T: DeserializeOwned>(&self, call: PendingCall) -> Result<T, ClientError> {
        let resp = self.execute(call).await?;
        decode_json(error_for_status(resp).await?).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.call_json(PendingCall::get(path)).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call_json(PendingCall::post(path).with_json(body)?).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call_json(PendingCall::put(path).with_json(body)?).await
    }

    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call_json(PendingCall::patch(path).with_json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let resp = self.execute(PendingCall::delete(path)).await?;
        error_for_status(resp).await?;
        Ok(())
    }

    fn is_refresh_call(&self, call: &PendingCall) -> bool {
        self.config.url(&call.path) == self.refresh_url
    }

    fn request_url(&self, call: &PendingCall) -> Result<Url, ClientError> {
        let raw = self.config.url(&call.path);
        let mut url =
            Url::parse(&raw).map_err(|e| ClientError::Transport(format!("invalid url {raw}: {e}")))?;
        if !call.query.is_empty() {
            url.query_pairs_mut().extend_pairs(call.query.iter());
        }
        Ok(url)
    }

    async fn dispatch(&self, call: &PendingCall, access: Option<&str>) -> Result<Response, ClientError> {
        let url = self.request_url(call)?;
        let mut req = self.http.request(call.method.clone(), url);
        if let Some(ref body) = call.body {
            req = req.json(body);
        }
        let resp = apply_bearer(req, access).send().await.map_err(|e| {
            tracing::debug!(method = %call.method, path = %call.path, err = %e, "request failed");
            ClientError::Transport(e.to_string())
        })?;
        tracing::trace!(method = %call.method, path = %call.path, status = resp.status().as_u16(), "response");
        Ok(resp)
    }
}

/// Turn a non-success response into [`ClientError::Status`].
pub async fn error_for_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status { status: status.as_u16(), body })
}

/// Decode a JSON body. An empty body decodes as `null`.
pub async fn decode_json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let bytes = resp.bytes().await.map_err(|e| ClientError::Transport(e.to_string()))?;
    if bytes.is_empty() {
        return Ok(serde_json::from_value(serde_json::Value::Null)?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
