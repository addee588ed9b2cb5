// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Account endpoints: the calls that create and destroy the credential pair.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::client::{ApiClient, PendingCall};
use crate::credential::CredentialPair;
use crate::error::ClientError;
use crate::refresh::RefreshRequest;
use crate::session::{publish, SessionEvent};

/// Portal user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Manager,
    Teacher,
    Student,
    Applicant,
}

impl Role {
    /// Parse a role name, ignoring case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "manager" => Some(Self::Manager),
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            "applicant" => Some(Self::Applicant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Manager => "MANAGER",
            Self::Teacher => "TEACHER",
            Self::Student => "STUDENT",
            Self::Applicant => "APPLICANT",
        }
    }

    /// Route name of the role's dashboard.
    pub fn landing_route(&self) -> &'static str {
        match self {
            Self::Admin => "admin-dashboard",
            Self::Manager => "manager-dashboard",
            Self::Teacher => "teacher-dashboard",
            Self::Student => "student-dashboard",
            Self::Applicant => "applicant-dashboard",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Landing route for an optional role; users without a known role land on `home`.
pub fn landing_route(role: Option<Role>) -> &'static str {
    role.map(|r| r.landing_route()).unwrap_or("home")
}

/// Current user as returned by `GET /auth/me/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub student_full_name: Option<String>,
    #[serde(default)]
    pub parent_full_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

impl UserProfile {
    pub fn role(&self) -> Option<Role> {
        self.role.as_deref().and_then(Role::parse)
    }

    pub fn landing_route(&self) -> &'static str {
        landing_route(self.role())
    }
}

/// Token pair issued at login or registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedTokens {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Login/registration response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub user: UserProfile,
    pub tokens: IssuedTokens,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// New applicant registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub student_full_name: String,
    #[serde(default)]
    pub parent_full_name: String,
    pub password: String,
    pub parent_password: String,
}

impl ApiClient {
    /// Log in and store the issued credential pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthPayload, ClientError> {
        self.authenticate_with("/auth/login/", email, password).await
    }

    /// Log in through the admin allow-list endpoint.
    pub async fn admin_login(&self, email: &str, password: &str) -> Result<AuthPayload, ClientError> {
        self.authenticate_with("/auth/admin-login/", email, password).await
    }

    /// Register a new applicant; the response logs them in.
    pub async fn register(&self, req: &RegisterRequest) -> Result<AuthPayload, ClientError> {
        let payload: AuthPayload =
            self.call_json(PendingCall::post("/auth/register/").with_json(req)?).await?;
        self.adopt(&payload);
        Ok(payload)
    }

    /// Fetch the current user.
    pub async fn me(&self) -> Result<UserProfile, ClientError> {
        self.get_json("/auth/me/").await
    }

    /// End the session: ask the server to forget the refresh credential,
    /// then clear local credentials.
    ///
    /// The server call is best effort and sent without a bearer header so an
    /// expired access credential cannot start a refresh during logout.
    pub async fn logout(&self) -> Result<(), ClientError> {
        if let Some(refresh) = self.store().get().refresh {
            let url = self.config().url("/auth/logout/");
            let body = RefreshRequest { refresh };
            match self.http().post(&url).json(&body).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::debug!(status = resp.status().as_u16(), "server logout not acknowledged");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(err = %e, "server logout failed"),
            }
        }
        self.store().clear()?;
        publish(self.events(), SessionEvent::LoggedOut);
        tracing::info!("logged out");
        Ok(())
    }

    async fn authenticate_with(
        &self,
        path: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthPayload, ClientError> {
        let body = LoginRequest { email: email.trim().to_lowercase(), password: password.to_owned() };
        let payload: AuthPayload = self.call_json(PendingCall::post(path).with_json(&body)?).await?;
        self.adopt(&payload);
        Ok(payload)
    }

    /// Store the issued pair. A failed write is logged, not returned.
    fn adopt(&self, payload: &AuthPayload) {
        let pair = CredentialPair::new(payload.tokens.access.clone(), payload.tokens.refresh.clone());
        if let Err(e) = self.store().set(&pair) {
            tracing::warn!(err = %e, "failed to persist credentials after login");
        }
        let role = payload.user.role().map(|r| r.as_str().to_owned());
        tracing::info!(user = %payload.user.email, role = ?role, "logged in");
        publish(self.events(), SessionEvent::LoggedIn { role });
    }
}

#[cfg(test)]
#[path = "account_tests.rs"]
mod tests;
