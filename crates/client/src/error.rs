// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced by the authenticated request layer.
///
/// Cloneable so a single refresh outcome can be fanned out to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Network or connectivity failure unrelated to authorization.
    Transport(String),
    /// 401 on a call that may not be recovered (the refresh call itself).
    AuthExpired,
    /// No refresh credential stored; the session cannot be renewed.
    RefreshUnavailable,
    /// The refresh endpoint failed or returned an unusable body.
    RefreshRejected(String),
    /// 401 on a call that already consumed its single replay.
    RetryExhausted,
    /// The task driving the refresh went away before it settled.
    RefreshInterrupted,
    /// Non-success, non-401 response returned by a typed helper.
    Status { status: u16, body: String },
    /// Response body did not match the expected shape.
    Decode(String),
    /// Credential persistence failed.
    Storage(String),
}

impl ClientError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT",
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::RefreshUnavailable => "REFRESH_UNAVAILABLE",
            Self::RefreshRejected(_) => "REFRESH_REJECTED",
            Self::RetryExhausted => "RETRY_EXHAUSTED",
            Self::RefreshInterrupted => "REFRESH_INTERRUPTED",
            Self::Status { .. } => "STATUS",
            Self::Decode(_) => "DECODE",
            Self::Storage(_) => "STORAGE",
        }
    }

    /// Whether this failure ends the session (and triggers termination).
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::RefreshUnavailable | Self::RefreshRejected(_))
    }

    /// HTTP status carried by the error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::AuthExpired | Self::RetryExhausted => Some(401),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::AuthExpired => f.write_str("authorization expired"),
            Self::RefreshUnavailable => f.write_str("no refresh credential, session ended"),
            Self::RefreshRejected(msg) => write!(f, "credential refresh rejected: {msg}"),
            Self::RetryExhausted => f.write_str("authorization failed after refresh"),
            Self::RefreshInterrupted => f.write_str("credential refresh interrupted"),
            Self::Status { status, body } if body.is_empty() => write!(f, "HTTP {status}"),
            Self::Status { status, body } => write!(f, "HTTP {status}: {body}"),
            Self::Decode(msg) => write!(f, "invalid response body: {msg}"),
            Self::Storage(msg) => write!(f, "credential storage: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
