// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential, identity, and wire types for the `/auth/*` endpoints.

use serde::{Deserialize, Serialize};

/// Machine-readable code the API returns with a 401 when the access token expired.
pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";

/// Access + refresh token pair. Always stored and replaced as a unit.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), refresh_token: refresh_token.into() }
    }
}

// Tokens stay out of logs and panic messages.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Last-known user profile snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Remaining profile fields, kept so renderers see the full record.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Derived session state. `Refreshing` only exists while a renewal is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("unauthenticated"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Refreshing => f.write_str("refreshing"),
        }
    }
}

/// Point-in-time view of the session for shells and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    /// Access token expiry in epoch millis, as read from its claims.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
}

/// Body of `POST /auth/login` and `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    pub identifier: String,
    pub secret: String,
}

/// Body of `POST /auth/refresh` and `POST /auth/logout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Response of the credential-issuing endpoints.
///
/// Registration may omit the pair when the deployment requires a separate login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Identity>,
}

impl TokenResponse {
    /// Extract the credential pair.
    ///
    /// `Ok(None)` when neither token is present; a half pair is a protocol error.
    pub fn credential(&self) -> Result<Option<Credential>, String> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) => Ok(Some(Credential::new(access, refresh))),
            (None, None) => Ok(None),
            (Some(_), None) => Err("response has an access token but no refresh token".to_owned()),
            (None, Some(_)) => Err("response has a refresh token but no access token".to_owned()),
        }
    }
}

/// Response of `GET /auth/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub user: Identity,
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorText {
    error: String,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl ErrorBody {
    /// Parse an error payload, accepting `{"error":{..}}`, `{"error":"..."}`
    /// and a flat `{code, message}`.
    pub fn parse(body: &[u8]) -> Option<Self> {
        if let Ok(envelope) = serde_json::from_slice::<ErrorResponse>(body) {
            return Some(envelope.error);
        }
        if let Ok(ErrorText { error }) = serde_json::from_slice::<ErrorText>(body) {
            return Some(Self { code: None, message: error });
        }
        serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .filter(|b| b.code.is_some() || !b.message.is_empty())
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
