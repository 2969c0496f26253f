// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle notifications for the application shell.

use serde::{Deserialize, Serialize};

/// Broadcast on every session transition. Never carries token values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    LoggedIn { user_id: String },
    /// A renewal completed. The login pair is generation 1.
    Refreshed { generation: u64 },
    /// A renewal failed transiently. The session is still usable.
    #[serde(rename = "refresh:failed")]
    RefreshFailed { error: String },
    /// The renewal credential was rejected; the store has been purged.
    Expired,
    LoggedOut,
}

pub(crate) const EVENT_CAPACITY: usize = 64;
