// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end tests over real HTTP.
//!
//! Serves the in-memory fake identity provider behind an axum listener on
//! `127.0.0.1:0`, so the library's `HttpTransport` and the real `dashauth`
//! binary can both talk to it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use dashauth::clock::{Clock, SystemClock};
use dashauth::scheduler::RefreshPolicy;
use dashauth::session::{SessionDeps, SessionManager};
use dashauth::store::TokenStore;
use dashauth::test_support::FakeIdentity;
use dashauth::transport::{ApiRequest, HttpTransport, Transport};

pub use dashauth::transport::ensure_crypto;

pub const ALICE: &str = "alice@example.test";
pub const ALICE_SECRET: &str = "hunter2";

/// Resolve the path to the compiled `dashauth` binary.
pub fn dashauth_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    let target = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| workspace.join("target"));
    target.join("debug").join("dashauth")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A fake identity provider listening on a loopback port. Stops on drop.
pub struct MockServer {
    pub identity: Arc<FakeIdentity>,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl MockServer {
    /// Serve with the system clock, so token expiries match the binary's clock.
    pub async fn start() -> anyhow::Result<Self> {
        Self::with_clock(Arc::new(SystemClock)).await
    }

    pub async fn with_clock(clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let identity = FakeIdentity::new(clock);
        identity.seed_user(ALICE, ALICE_SECRET);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let app = Router::new().fallback(dispatch).with_state(Arc::clone(&identity));
        let stop = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).with_graceful_shutdown(stop.cancelled_owned()).await;
        });

        Ok(Self { identity, addr, shutdown })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// A session manager talking to this server over HTTP.
    pub fn session(
        &self,
        store: Arc<dyn TokenStore>,
        policy: RefreshPolicy,
    ) -> anyhow::Result<SessionManager> {
        self.session_with_timeout(store, policy, Duration::from_secs(5))
    }

    pub fn session_with_timeout(
        &self,
        store: Arc<dyn TokenStore>,
        policy: RefreshPolicy,
        timeout: Duration,
    ) -> anyhow::Result<SessionManager> {
        ensure_crypto();
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(self.base_url(), timeout)?);
        Ok(SessionManager::new(SessionDeps { store, transport, clock: Arc::new(SystemClock) }, policy))
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch(
    State(identity): State<Arc<FakeIdentity>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path_and_query().map_or(uri.path(), |p| p.as_str()).to_owned();
    let mut request = ApiRequest::new(method, path);
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    if !body.is_empty() {
        match serde_json::from_slice(&body) {
            Ok(value) => request.body = Some(value),
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }

    let resp = identity.handle(request).await;
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], resp.body).into_response()
}
