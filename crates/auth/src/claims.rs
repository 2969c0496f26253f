// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unverified JWT expiry reading for client-side scheduling.
//!
//! Signatures are never checked here. The server enforces authorization; the
//! expiry only decides when the client should renew.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    #[error("expected 3 dot-separated segments, found {0}")]
    Segments(usize),
    #[error("payload is not base64url: {0}")]
    Base64(String),
    #[error("payload is not a JSON claim set: {0}")]
    Json(String),
    #[error("missing 'exp' claim")]
    MissingExpiry,
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<serde_json::Value>,
}

/// Decode the `exp` claim of a JWT-shaped token, in epoch milliseconds.
pub fn decode_expiry(token: &str) -> Result<u64, ClaimError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(ClaimError::Segments(parts.len()));
    }

    // Some issuers pad their segments even though RFC 7515 says not to.
    let payload = parts[1].trim_end_matches('=');
    let decoded =
        URL_SAFE_NO_PAD.decode(payload).map_err(|e| ClaimError::Base64(e.to_string()))?;
    let claims: Claims =
        serde_json::from_slice(&decoded).map_err(|e| ClaimError::Json(e.to_string()))?;

    let exp_secs = claims
        .exp
        .as_ref()
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)))
        .ok_or(ClaimError::MissingExpiry)?;
    Ok(exp_secs.saturating_mul(1000))
}

/// Expiry of an access token in epoch millis.
///
/// Fails soft: anything undecodable reads as already expired (`0`), which
/// makes the scheduler renew instead of trusting a dead token.
pub fn expiry_of(token: &str) -> u64 {
    match decode_expiry(token) {
        Ok(ms) => ms,
        Err(e) => {
            tracing::debug!(err = %e, "unreadable access token expiry, treating as expired");
            0
        }
    }
}

pub fn is_expired(expires_at_ms: u64, now_ms: u64) -> bool {
    now_ms >= expires_at_ms
}

/// Whether expiry falls within `window_ms` of now (or has already passed).
pub fn is_near_expiry(expires_at_ms: u64, now_ms: u64, window_ms: u64) -> bool {
    expires_at_ms.saturating_sub(now_ms) <= window_ms
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
