// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the authenticated portal client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Base URL of the portal REST API.
    #[arg(long, default_value = "http://127.0.0.1:8000/api", env = "PORTAL_API_URL")]
    pub api_url: String,

    /// Path of the token refresh endpoint, relative to the API URL.
    #[arg(long, default_value = "/token/refresh/", env = "PORTAL_REFRESH_PATH")]
    pub refresh_path: String,

    /// Directory holding persisted credentials.
    #[arg(long, env = "PORTAL_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Route the application is sent to when the session ends.
    #[arg(long, default_value = "/login", env = "PORTAL_LOGIN_ROUTE")]
    pub login_route: String,

    /// Routes reachable without a session. Termination never redirects away from these.
    #[arg(
        long = "guest-route",
        default_values_t = [String::from("/login"), String::from("/register")],
        value_delimiter = ',',
        env = "PORTAL_GUEST_ROUTES"
    )]
    pub guest_routes: Vec<String>,

    /// Per-request timeout in milliseconds. Unset means no timeout.
    #[arg(long, env = "PORTAL_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Upper bound on a credential refresh in milliseconds. Unset means
    /// queued callers wait for as long as the refresh call takes.
    #[arg(long, env = "PORTAL_REFRESH_TIMEOUT_MS")]
    pub refresh_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000/api".to_owned(),
            refresh_path: "/token/refresh/".to_owned(),
            state_dir: None,
            login_route: "/login".to_owned(),
            guest_routes: vec!["/login".to_owned(), "/register".to_owned()],
            request_timeout_ms: None,
            refresh_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    /// Config pointed at `api_url` with every other field defaulted.
    pub fn for_api(api_url: impl Into<String>) -> Self {
        Self { api_url: api_url.into(), ..Self::default() }
    }

    /// API base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url(), path)
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }

    pub fn refresh_url(&self) -> String {
        self.url(&self.refresh_path)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn refresh_timeout(&self) -> Option<Duration> {
        self.refresh_timeout_ms.map(Duration::from_millis)
    }

    /// Resolve the state directory.
    ///
    /// Uses `--state-dir` if set, then `$XDG_STATE_HOME/portal`,
    /// then `$HOME/.local/state/portal`.
    pub fn state_dir(&self) -> PathBuf {
        match self.state_dir {
            Some(ref dir) => dir.clone(),
            None => default_state_dir(),
        }
    }

    pub fn credential_path(&self) -> PathBuf {
        self.state_dir().join("credentials.json")
    }
}

fn default_state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("portal");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/portal");
    }
    PathBuf::from(".portal")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
