// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: sign-in, sign-up, sign-out, and "who am I".
//!
//! [`SessionManager`] is an explicit instance built from injected storage,
//! clock, and transport. It and the [`RefreshCoordinator`] are the only
//! writers of the token store.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::authorize::RequestAuthorizer;
use crate::claims;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::events::{SessionEvent, EVENT_CAPACITY};
use crate::model::{
    Credential, Identity, MeResponse, RefreshRequest, SessionState, SessionStatus, SignInRequest,
    TokenResponse,
};
use crate::refresh::RefreshCoordinator;
use crate::scheduler::{AutoRefreshScheduler, RefreshPolicy};
use crate::store::TokenStore;
use crate::transport::{ApiRequest, ApiResponse, Transport};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const LOGOUT_ALL_PATH: &str = "/auth/logout-all";
pub const ME_PATH: &str = "/auth/me";

/// Outcome of [`SessionManager::register`].
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// The deployment issued credentials immediately; the session is live.
    SignedIn(Identity),
    /// The account exists but the caller still has to log in.
    LoginRequired(Identity),
}

/// Injected collaborators.
pub struct SessionDeps {
    pub store: Arc<dyn TokenStore>,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
}

pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    coordinator: RefreshCoordinator,
    authorizer: RequestAuthorizer,
    scheduler: AutoRefreshScheduler,
}

impl SessionManager {
    pub fn new(deps: SessionDeps, policy: RefreshPolicy) -> Self {
        let SessionDeps { store, transport, clock } = deps;
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let coordinator =
            RefreshCoordinator::new(Arc::clone(&store), Arc::clone(&transport), event_tx);
        let authorizer = RequestAuthorizer::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            coordinator.clone(),
        );
        let scheduler = AutoRefreshScheduler::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            coordinator.clone(),
            policy,
        );
        Self { store, transport, clock, coordinator, authorizer, scheduler }
    }

    /// Sign in. On rejection the server's reason is returned verbatim and
    /// nothing is stored.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Identity, AuthError> {
        let body = self.sign_in(LOGIN_PATH, identifier, secret).await?;
        let credential = body
            .credential()
            .map_err(AuthError::Protocol)?
            .ok_or_else(|| AuthError::Protocol("login response carries no credential".into()))?;
        let user =
            body.user.ok_or_else(|| AuthError::Protocol("login response carries no user".into()))?;
        self.establish(credential, user.clone());
        Ok(user)
    }

    /// Create an account. Some deployments sign the user in immediately;
    /// the result says which happened.
    pub async fn register(&self, identifier: &str, secret: &str) -> Result<Registration, AuthError> {
        let body = self.sign_in(REGISTER_PATH, identifier, secret).await?;
        let credential = body.credential().map_err(AuthError::Protocol)?;
        let user = body
            .user
            .ok_or_else(|| AuthError::Protocol("register response carries no user".into()))?;
        match credential {
            Some(credential) => {
                self.establish(credential, user.clone());
                Ok(Registration::SignedIn(user))
            }
            None => Ok(Registration::LoginRequired(user)),
        }
    }

    /// Sign out locally, then tell the server on a best-effort basis.
    ///
    /// Local state is always cleared, whether or not the server is reachable.
    pub async fn logout(&self) {
        // A renewal in flight rotates the refresh token; revoke the one it lands.
        self.coordinator.settle().await;
        let refresh_token = self.store.get().map(|c| c.refresh_token);
        self.teardown();

        let Some(refresh_token) = refresh_token else {
            return;
        };
        let request = match ApiRequest::post(LOGOUT_PATH).json(&RefreshRequest { refresh_token }) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(err = %e, "failed to encode logout request");
                return;
            }
        };
        match self.transport.send(request).await {
            Ok(resp) if resp.is_success() => tracing::debug!("server session revoked"),
            Ok(resp) => tracing::warn!(status = resp.status, "server refused logout"),
            Err(e) => tracing::warn!(err = %e, "logout not delivered to server"),
        }
    }

    /// Revoke every refresh token issued to this identity.
    ///
    /// Local state is cleared regardless; the server outcome is returned so
    /// the caller knows whether other devices were signed out.
    pub async fn logout_all_devices(&self) -> Result<(), AuthError> {
        let result = self.authorizer.call(ApiRequest::post(LOGOUT_ALL_PATH)).await;
        self.teardown();
        let resp = result?;
        if resp.is_success() {
            tracing::info!("all sessions revoked");
            Ok(())
        } else {
            Err(api_error(&resp))
        }
    }

    /// Fetch the canonical identity and refresh the cached copy.
    pub async fn current_identity(&self) -> Result<Identity, AuthError> {
        let session = self.coordinator.session_token();
        let me: MeResponse = self.authorizer.call_json(ApiRequest::get(ME_PATH)).await?;
        // A logout while the call was in flight must not resurrect the cache.
        if !session.is_cancelled() && self.store.get().is_some() {
            self.store.set_cached_identity(me.user.clone());
        }
        Ok(me.user)
    }

    /// Resume a session persisted by an earlier run. Returns whether one was found.
    pub fn resume(&self) -> bool {
        if self.store.get().is_none() {
            return false;
        }
        tracing::debug!("resuming persisted session");
        self.coordinator.begin_session();
        self.scheduler.start();
        true
    }

    pub fn state(&self) -> SessionState {
        if self.coordinator.is_refreshing() {
            SessionState::Refreshing
        } else if self.store.get().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state();
        let expires_at_ms = self.store.get().map(|c| claims::expiry_of(&c.access_token));
        let now = self.clock.now_ms();
        SessionStatus {
            state,
            identity: self.store.cached_identity(),
            expires_at_ms,
            expires_in_secs: expires_at_ms.map(|at| at.saturating_sub(now) / 1000),
        }
    }

    /// Last-known identity, for rendering before `/auth/me` answers.
    pub fn cached_identity(&self) -> Option<Identity> {
        self.store.cached_identity()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.coordinator.subscribe()
    }

    /// The authorizer business-data callers route their requests through.
    pub fn authorizer(&self) -> &RequestAuthorizer {
        &self.authorizer
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &AutoRefreshScheduler {
        &self.scheduler
    }

    async fn sign_in(
        &self,
        path: &str,
        identifier: &str,
        secret: &str,
    ) -> Result<TokenResponse, AuthError> {
        let request = ApiRequest::post(path)
            .json(&SignInRequest { identifier: identifier.to_owned(), secret: secret.to_owned() })
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let resp = self.transport.send(request).await?;
        if !resp.is_success() {
            let body = resp.error_detail();
            tracing::info!(path, status = resp.status, code = ?body.code, "sign-in rejected");
            return Err(AuthError::Rejected {
                status: resp.status,
                code: body.code,
                message: body.message,
            });
        }
        resp.json().map_err(|e| AuthError::Protocol(e.to_string()))
    }

    fn establish(&self, credential: Credential, user: Identity) {
        self.coordinator.begin_session();
        self.store.set(credential);
        self.store.set_cached_identity(user.clone());
        self.scheduler.start();
        tracing::info!(user_id = %user.id, "signed in");
        let _ = self.coordinator.events().send(SessionEvent::LoggedIn { user_id: user.id });
    }

    fn teardown(&self) {
        self.scheduler.stop();
        self.coordinator.end_session();
        self.store.clear();
        tracing::info!("signed out");
        let _ = self.coordinator.events().send(SessionEvent::LoggedOut);
    }
}

fn api_error(resp: &ApiResponse) -> AuthError {
    let body = resp.error_detail();
    AuthError::Api { status: resp.status, code: body.code, message: body.message }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
