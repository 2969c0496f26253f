// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential renewal.
//!
//! Every caller that needs a fresh credential while a renewal is already
//! running awaits the same exchange. Refresh tokens rotate on use, so a second
//! concurrent exchange would spend an already-spent token and look like a
//! dead session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::AuthError;
use crate::events::SessionEvent;
use crate::model::{Credential, RefreshRequest, TokenResponse};
use crate::store::TokenStore;
use crate::transport::{ApiRequest, ApiResponse, Transport};

pub const REFRESH_PATH: &str = "/auth/refresh";

type SharedRenewal = Shared<BoxFuture<'static, Result<Credential, AuthError>>>;

/// The renewal currently running, tagged with the session it belongs to.
struct InFlight {
    id: u64,
    epoch: u64,
    renewal: SharedRenewal,
}

/// Identity of the current authenticated session.
///
/// `epoch` moves on every login/logout. A renewal only writes its result if
/// the epoch it started under is still current.
struct SessionSlot {
    epoch: u64,
    token: CancellationToken,
}

struct Inner {
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<SessionEvent>,
    session: Mutex<SessionSlot>,
    in_flight: Mutex<Option<InFlight>>,
    next_flight: AtomicU64,
    /// Exchanges sent to the renewal endpoint since construction.
    exchanges: AtomicU64,
    /// Credential pairs issued in the current session, login included.
    generation: AtomicU64,
}

/// Performs `POST /auth/refresh` with single-flight semantics. Cheap to clone.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                events,
                session: Mutex::new(SessionSlot { epoch: 0, token: CancellationToken::new() }),
                in_flight: Mutex::new(None),
                next_flight: AtomicU64::new(0),
                exchanges: AtomicU64::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Renew the credential pair, joining a renewal already in flight.
    pub async fn refresh(&self) -> Result<Credential, AuthError> {
        let epoch = self.inner.session.lock().epoch;
        let renewal = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(flight) if flight.epoch == epoch => {
                    tracing::debug!(flight = flight.id, "joining in-flight renewal");
                    flight.renewal.clone()
                }
                _ => {
                    let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let renewal = self.start(id, epoch);
                    *slot = Some(InFlight { id, epoch, renewal: renewal.clone() });
                    renewal
                }
            }
        };
        renewal.await
    }

    /// Spawn the exchange so it completes even if every waiter goes away.
    fn start(&self, id: u64, epoch: u64) -> SharedRenewal {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _clear = ClearInFlight { inner: Arc::clone(&inner), id };
            inner.exchange(epoch).await
        });
        async move {
            task.await.unwrap_or_else(|e| Err(AuthError::Internal(format!("renewal task: {e}"))))
        }
        .boxed()
        .shared()
    }

    /// Wait out a renewal already in flight for the current session without
    /// starting one.
    pub(crate) async fn settle(&self) {
        let epoch = self.inner.session.lock().epoch;
        let renewal = self
            .inner
            .in_flight
            .lock()
            .as_ref()
            .filter(|flight| flight.epoch == epoch)
            .map(|flight| flight.renewal.clone());
        if let Some(renewal) = renewal {
            let _ = renewal.await;
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Number of renewal exchanges sent to the server.
    pub fn exchanges(&self) -> u64 {
        self.inner.exchanges.load(Ordering::SeqCst)
    }

    /// Credential generation of the current session: 1 after login, +1 per renewal.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Start a new session (login). Ends the previous one, invalidating any
    /// renewal or identity fetch still in flight for it.
    pub(crate) fn begin_session(&self) {
        let mut session = self.inner.session.lock();
        session.epoch += 1;
        session.token.cancel();
        session.token = CancellationToken::new();
        self.inner.generation.store(1, Ordering::SeqCst);
    }

    /// End the current session (logout). Cancels everything tied to it.
    pub(crate) fn end_session(&self) {
        let mut session = self.inner.session.lock();
        session.epoch += 1;
        session.token.cancel();
    }

    /// Token cancelled when the current session ends, by logout or by rejection.
    pub fn session_token(&self) -> CancellationToken {
        self.inner.session.lock().token.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn events(&self) -> &broadcast::Sender<SessionEvent> {
        &self.inner.events
    }
}

struct ClearInFlight {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        let mut slot = self.inner.in_flight.lock();
        if slot.as_ref().is_some_and(|f| f.id == self.id) {
            *slot = None;
        }
    }
}

impl Inner {
    async fn exchange(&self, epoch: u64) -> Result<Credential, AuthError> {
        let Some(current) = self.store.get() else {
            tracing::debug!("no stored credential to renew");
            return Err(AuthError::SessionExpired);
        };

        let request = ApiRequest::post(REFRESH_PATH)
            .json(&RefreshRequest { refresh_token: current.refresh_token })
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        self.exchanges.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(epoch, "renewing credential");
        let resp = match self.transport.send(request).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(err = %e, "credential renewal failed, will retry on next trigger");
                let err = AuthError::from(e);
                self.emit(SessionEvent::RefreshFailed { error: err.to_string() });
                return Err(err);
            }
        };

        if resp.is_success() {
            self.accept(epoch, &resp)
        } else if is_rejection(resp.status) {
            self.expire(epoch, &resp);
            Err(AuthError::SessionExpired)
        } else {
            let body = resp.error_detail();
            tracing::warn!(status = resp.status, msg = %body.message, "renewal endpoint unavailable");
            let err = AuthError::Api { status: resp.status, code: body.code, message: body.message };
            self.emit(SessionEvent::RefreshFailed { error: err.to_string() });
            Err(err)
        }
    }

    fn accept(&self, epoch: u64, resp: &ApiResponse) -> Result<Credential, AuthError> {
        let parsed = resp
            .json::<TokenResponse>()
            .map_err(|e| e.to_string())
            .and_then(|body| match body.credential()? {
                Some(credential) => Ok((credential, body.user)),
                None => Err("renewal response carries no credential".to_owned()),
            });
        let (credential, user) = match parsed {
            Ok(parsed) => parsed,
            Err(msg) => {
                tracing::warn!(err = %msg, "malformed renewal response");
                let err = AuthError::Protocol(msg);
                self.emit(SessionEvent::RefreshFailed { error: err.to_string() });
                return Err(err);
            }
        };

        // Hold the session lock across check + write so a concurrent logout
        // either sees our write (and clears it) or makes us discard.
        let session = self.session.lock();
        if session.epoch != epoch {
            tracing::info!("session ended during renewal, discarding result");
            return Err(AuthError::SessionExpired);
        }
        self.store.set(credential.clone());
        if let Some(user) = user {
            self.store.set_cached_identity(user);
        }
        drop(session);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(generation, "credential renewed");
        self.emit(SessionEvent::Refreshed { generation });
        Ok(credential)
    }

    fn expire(&self, epoch: u64, resp: &ApiResponse) {
        let mut session = self.session.lock();
        if session.epoch != epoch {
            tracing::info!("stale renewal rejected after session change, ignoring");
            return;
        }
        let reason = resp.error_detail().message;
        tracing::warn!(status = resp.status, reason = %reason, "refresh token rejected, ending session");
        self.store.clear();
        session.epoch += 1;
        session.token.cancel();
        drop(session);
        self.emit(SessionEvent::Expired);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

/// Client errors from the renewal endpoint mean the refresh token is dead.
/// Throttling and request timeouts are transient.
fn is_rejection(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
