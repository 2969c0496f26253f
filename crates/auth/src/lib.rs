// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod authorize;
pub mod claims;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod refresh;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod test_support;
pub mod transport;

pub use authorize::RequestAuthorizer;
pub use error::AuthError;
pub use events::SessionEvent;
pub use model::{Credential, Identity, SessionState, SessionStatus};
pub use refresh::RefreshCoordinator;
pub use scheduler::{AutoRefreshScheduler, RefreshPolicy};
pub use session::{Registration, SessionDeps, SessionManager};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
