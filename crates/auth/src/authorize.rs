// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer authorization with renew-and-replay on expiry.
//!
//! Built from two pure pieces, [`authorize`] and [`on_unauthorized`], around
//! the transport. Replay is bounded to one attempt per call.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::AuthError;
use crate::model::Credential;
use crate::refresh::RefreshCoordinator;
use crate::store::TokenStore;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// What to do with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the response to the caller as-is.
    Deliver,
    /// The access token expired: renew and replay.
    Renew,
}

/// Attach `Authorization: Bearer <token>`, replacing any existing value.
pub fn authorize(request: ApiRequest, access_token: &str) -> ApiRequest {
    request.with_header("authorization", format!("Bearer {access_token}"))
}

/// Only the distinguished expiry signal triggers renewal. A 401 for any other
/// reason is a real authorization failure and is delivered untouched.
pub fn on_unauthorized(response: &ApiResponse) -> Verdict {
    if response.is_token_expired() {
        Verdict::Renew
    } else {
        Verdict::Deliver
    }
}

/// Authorizes outbound calls with the stored credential.
#[derive(Clone)]
pub struct RequestAuthorizer {
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
}

impl RequestAuthorizer {
    pub fn new(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self { store, transport, coordinator }
    }

    /// Send `request` with the current access token.
    ///
    /// On the expiry signal, renews through the coordinator and replays once.
    /// Non-expiry failures, including other 401s, come back as `Ok` responses.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse, AuthError> {
        let Some(credential) = self.store.get() else {
            return Err(AuthError::NotAuthenticated);
        };
        let sent_with = credential.access_token;

        let resp = self.transport.send(authorize(request.clone(), &sent_with)).await?;
        if on_unauthorized(&resp) == Verdict::Deliver {
            return Ok(resp);
        }

        tracing::debug!(path = %request.path, "access token expired, renewing");
        let renewed = self.renewed_since(&sent_with).await?;

        let replay = self.transport.send(authorize(request.clone(), &renewed.access_token)).await?;
        if on_unauthorized(&replay) == Verdict::Renew {
            tracing::warn!(path = %request.path, "request still expired after renewal");
            return Err(AuthError::ReplayRejected);
        }
        Ok(replay)
    }

    /// Like [`call`](Self::call), decoding a 2xx JSON body and mapping any
    /// other status to [`AuthError::Api`].
    pub async fn call_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, AuthError> {
        let resp = self.call(request).await?;
        if !resp.is_success() {
            let body = resp.error_detail();
            return Err(AuthError::Api { status: resp.status, code: body.code, message: body.message });
        }
        resp.json().map_err(|e| AuthError::Protocol(e.to_string()))
    }

    /// A credential newer than `stale`: the one a concurrent renewal already
    /// stored, or the result of a renewal started (or joined) now.
    async fn renewed_since(&self, stale: &str) -> Result<Credential, AuthError> {
        match self.store.get() {
            Some(current) if current.access_token != stale => Ok(current),
            Some(_) => self.coordinator.refresh().await,
            None => Err(AuthError::SessionExpired),
        }
    }
}

#[cfg(test)]
#[path = "authorize_tests.rs"]
mod tests;
