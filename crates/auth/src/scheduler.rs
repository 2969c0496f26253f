// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive renewal timer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::claims;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::refresh::RefreshCoordinator;
use crate::store::TokenStore;

/// How often to check and how close to expiry to renew.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub check_interval: Duration,
    pub window: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self { check_interval: Duration::from_secs(60), window: Duration::from_secs(300) }
    }
}

/// Renews the credential shortly before expiry, independent of user requests.
///
/// Runs as one background task per session. The task's token is a child of
/// the coordinator's session token, so a rejected renewal stops it too.
pub struct AutoRefreshScheduler {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    coordinator: RefreshCoordinator,
    policy: RefreshPolicy,
    running: Mutex<Option<CancellationToken>>,
}

impl AutoRefreshScheduler {
    pub fn new(
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        coordinator: RefreshCoordinator,
        policy: RefreshPolicy,
    ) -> Self {
        Self { store, clock, coordinator, policy, running: Mutex::new(None) }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Start the timer for the current session, restarting it if already running.
    pub fn start(&self) {
        let cancel = self.coordinator.session_token().child_token();
        if let Some(previous) = self.running.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let check = Check {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            coordinator: self.coordinator.clone(),
            window_ms: self.policy.window.as_millis() as u64,
        };
        let interval = self.policy.check_interval;
        tracing::debug!(?interval, "auto-refresh started");

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                check.run().await;
            }
            tracing::debug!("auto-refresh stopped");
        });
    }

    /// Cancel the timer. Idempotent.
    pub fn stop(&self) {
        if let Some(cancel) = self.running.lock().take() {
            cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().is_some_and(|c| !c.is_cancelled())
    }
}

impl Drop for AutoRefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One timer tick's worth of state.
struct Check {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    coordinator: RefreshCoordinator,
    window_ms: u64,
}

impl Check {
    async fn run(&self) {
        let Some(credential) = self.store.get() else {
            return;
        };
        let expires_at = claims::expiry_of(&credential.access_token);
        let now = self.clock.now_ms();
        if !claims::is_near_expiry(expires_at, now, self.window_ms) {
            tracing::trace!(expires_in_ms = expires_at.saturating_sub(now), "credential fresh");
            return;
        }

        tracing::debug!(expires_in_ms = expires_at.saturating_sub(now), "proactive renewal");
        match self.coordinator.refresh().await {
            Ok(_) => {}
            // The coordinator has already purged the store and ended the session.
            Err(AuthError::SessionExpired) => {
                tracing::info!("session expired during proactive renewal");
            }
            Err(e) => tracing::warn!(err = %e, "proactive renewal failed, retrying next tick"),
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
