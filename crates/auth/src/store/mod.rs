// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential persistence boundary.
//!
//! Pure storage: no network or scheduling logic lives behind this trait, so
//! everything above it can run against [`MemoryTokenStore`] in tests.

pub mod file;

use std::path::PathBuf;

use parking_lot::Mutex;

use crate::model::{Credential, Identity};

pub use file::FileTokenStore;

/// Synchronous key/value store for the credential pair and cached identity.
///
/// `get` and `set` operate on the whole pair so a reader can never observe
/// an access token from one generation next to a refresh token from another.
pub trait TokenStore: Send + Sync + 'static {
    fn get(&self) -> Option<Credential>;
    fn set(&self, credential: Credential);
    /// Remove the pair and the cached identity together.
    fn clear(&self);
    fn cached_identity(&self) -> Option<Identity>;
    fn set_cached_identity(&self, identity: Identity);
    fn clear_cached_identity(&self);
}

/// Everything a store holds, as one unit.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    pub credential: Option<Credential>,
    pub identity: Option<Identity>,
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Snapshot>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a credential already present (e.g. restored from elsewhere).
    pub fn with_credential(credential: Credential) -> Self {
        Self { inner: Mutex::new(Snapshot { credential: Some(credential), identity: None }) }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<Credential> {
        self.inner.lock().credential.clone()
    }

    fn set(&self, credential: Credential) {
        self.inner.lock().credential = Some(credential);
    }

    fn clear(&self) {
        *self.inner.lock() = Snapshot::default();
    }

    fn cached_identity(&self) -> Option<Identity> {
        self.inner.lock().identity.clone()
    }

    fn set_cached_identity(&self, identity: Identity) {
        self.inner.lock().identity = Some(identity);
    }

    fn clear_cached_identity(&self) {
        self.inner.lock().identity = None;
    }
}

/// Resolve the state directory for persisted sessions.
///
/// Checks `DASHAUTH_STATE_DIR`, then `$XDG_STATE_HOME/dashauth`,
/// then `$HOME/.local/state/dashauth`.
pub fn state_dir() -> PathBuf {
    state_dir_with(|name| std::env::var(name).ok())
}

pub(crate) fn state_dir_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = env("DASHAUTH_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = env("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("dashauth");
    }
    if let Some(home) = env("HOME") {
        return PathBuf::from(home).join(".local/state/dashauth");
    }
    PathBuf::from(".dashauth")
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
