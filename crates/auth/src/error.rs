// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::transport::TransportError;

/// Errors surfaced by the session manager and the request authorizer.
///
/// `Clone` because a single renewal result is handed to every caller that
/// joined the in-flight exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Login or registration was refused. Carries the server's reason verbatim.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, code: Option<String>, message: String },
    /// The renewal credential was refused or the session ended mid-flight.
    #[error("session expired")]
    SessionExpired,
    /// No credential is stored.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The replayed request reported expiry again right after a renewal.
    #[error("request rejected after credential renewal")]
    ReplayRejected,
    #[error("transport: {0}")]
    Transport(String),
    /// Non-success response from an authorized call or a transient renewal response.
    #[error("api error ({status}): {message}")]
    Api { status: u16, code: Option<String>, message: String },
    /// The server answered with a payload we could not interpret.
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl AuthError {
    /// Whether the caller must drop UI state and send the user to sign-in.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::NotAuthenticated)
    }

    /// Whether retrying the user's action later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "REJECTED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::ReplayRejected => "REPLAY_REJECTED",
            Self::Transport(_) => "TRANSPORT",
            Self::Api { .. } => "API_ERROR",
            Self::Protocol(_) => "PROTOCOL",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<TransportError> for AuthError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
