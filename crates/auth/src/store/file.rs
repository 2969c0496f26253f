// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable token store: one JSON document, written atomically (tmp + rename).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::{Credential, Identity};
use crate::store::{Snapshot, TokenStore};

/// On-disk layout. Each key is independently optional.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

impl PersistedSession {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            access_token: snapshot.credential.as_ref().map(|c| c.access_token.clone()),
            refresh_token: snapshot.credential.as_ref().map(|c| c.refresh_token.clone()),
            identity: snapshot.identity.clone(),
        }
    }

    fn into_snapshot(self) -> Snapshot {
        // A lone token is unusable; drop it rather than expose half a pair.
        let credential = match (self.access_token, self.refresh_token) {
            (Some(access), Some(refresh)) => Some(Credential::new(access, refresh)),
            _ => None,
        };
        Snapshot { credential, identity: self.identity }
    }

    fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.identity.is_none()
    }
}

/// File-backed [`TokenStore`].
///
/// The file is read once at open; afterwards the in-memory snapshot is
/// authoritative for this process and every mutation is written through.
/// Write failures are logged and do not fail the caller.
pub struct FileTokenStore {
    path: PathBuf,
    inner: Mutex<Snapshot>,
}

impl FileTokenStore {
    /// Open the store at `path`, loading any existing session.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = match load(&path) {
            Ok(Some(persisted)) => persisted.into_snapshot(),
            Ok(None) => Snapshot::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), err = %e, "ignoring unreadable session file");
                Snapshot::default()
            }
        };
        Self { path, inner: Mutex::new(snapshot) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to the snapshot and write the result while still holding the lock,
    /// so file writes land in the same order as the in-memory updates.
    fn update(&self, f: impl FnOnce(&mut Snapshot)) {
        let mut snapshot = self.inner.lock();
        f(&mut *snapshot);
        let persisted = PersistedSession::from_snapshot(&snapshot);
        let result = if persisted.is_empty() { remove(&self.path) } else { save(&self.path, &persisted) };
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), err = %e, "failed to persist session");
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<Credential> {
        self.inner.lock().credential.clone()
    }

    fn set(&self, credential: Credential) {
        self.update(|s| s.credential = Some(credential));
    }

    fn clear(&self) {
        self.update(|s| *s = Snapshot::default());
    }

    fn cached_identity(&self) -> Option<Identity> {
        self.inner.lock().identity.clone()
    }

    fn set_cached_identity(&self, identity: Identity) {
        self.update(|s| s.identity = Some(identity));
    }

    fn clear_cached_identity(&self) {
        self.update(|s| s.identity = None);
    }
}

/// Load a persisted session. `Ok(None)` when the file does not exist.
pub fn load(path: &Path) -> anyhow::Result<Option<PersistedSession>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Save a persisted session atomically (write tmp + rename).
///
/// The temp name is unique per write (PID + counter) so a shorter write can
/// never inherit trailing bytes from a longer one racing on the same file.
pub fn save(path: &Path, session: &PersistedSession) -> anyhow::Result<()> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(session)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    restrict_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn remove(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
