// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Library flows over a real HTTP listener through `HttpTransport`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use dashauth::clock::SystemClock;
use dashauth::scheduler::RefreshPolicy;
use dashauth::session::{SessionDeps, SessionManager};
use dashauth::store::{FileTokenStore, MemoryTokenStore, TokenStore};
use dashauth::test_support::{RefreshMode, DATA_PATH};
use dashauth::transport::{ApiRequest, HttpTransport};
use dashauth::AuthError;
use dashauth_specs::{ensure_crypto, free_port, MockServer, ALICE, ALICE_SECRET};

fn memory() -> Arc<dyn TokenStore> {
    Arc::new(MemoryTokenStore::new())
}

#[tokio::test]
async fn login_and_authorized_call() -> anyhow::Result<()> {
    let server = MockServer::start().await?;
    let session = server.session(memory(), RefreshPolicy::default())?;

    let user = session.login(ALICE, ALICE_SECRET).await?;
    assert_eq!(user.email.as_deref(), Some(ALICE));

    let resp = session.authorizer().call(ApiRequest::get(DATA_PATH)).await?;
    assert_eq!(resp.status, 200);
    assert_eq!(server.identity.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn rejected_login_is_verbatim_over_http() -> anyhow::Result<()> {
    let server = MockServer::start().await?;
    let session = server.session(memory(), RefreshPolicy::default())?;

    match session.login(ALICE, "wrong").await {
        Err(AuthError::Rejected { status, code, message }) => {
            assert_eq!(status, 401);
            assert_eq!(code.as_deref(), Some("INVALID_CREDENTIALS"));
            assert_eq!(message, "invalid identifier or secret");
        }
        other => anyhow::bail!("expected rejection, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_expired_calls_refresh_once() -> anyhow::Result<()> {
    let server = MockServer::start().await?;
    let session = server.session(memory(), RefreshPolicy::default())?;
    session.login(ALICE, ALICE_SECRET).await?;
    server.identity.expire_access_tokens();
    server.identity.set_refresh_delay(Duration::from_millis(50));

    let authorizer = session.authorizer();
    let results = join_all((0..5).map(|_| authorizer.call(ApiRequest::get(DATA_PATH)))).await;

    assert_eq!(server.identity.refresh_calls(), 1);
    for result in results {
        assert_eq!(result?.status, 200);
    }
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_ends_session() -> anyhow::Result<()> {
    let server = MockServer::start().await?;
    let store = memory();
    let session = server.session(Arc::clone(&store), RefreshPolicy::default())?;
    session.login(ALICE, ALICE_SECRET).await?;
    server.identity.set_refresh_mode(RefreshMode::Reject);

    assert_eq!(session.coordinator().refresh().await, Err(AuthError::SessionExpired));
    assert!(store.get().is_none());
    assert!(!session.scheduler().is_running());
    Ok(())
}

#[tokio::test]
async fn slow_refresh_times_out_as_transient() -> anyhow::Result<()> {
    let server = MockServer::start().await?;
    let store = memory();
    let timeout = Duration::from_millis(100);
    let session = server.session_with_timeout(Arc::clone(&store), RefreshPolicy::default(), timeout)?;
    session.login(ALICE, ALICE_SECRET).await?;
    let before = store.get();
    server.identity.set_refresh_delay(Duration::from_millis(500));

    let result = session.coordinator().refresh().await;
    assert!(matches!(result, Err(AuthError::Transport(_))), "got {result:?}");
    assert_eq!(store.get(), before);
    Ok(())
}

#[tokio::test]
async fn unreachable_server_is_transport_error() -> anyhow::Result<()> {
    ensure_crypto();
    // Nothing listens on a released port.
    let port = free_port()?;
    let transport = HttpTransport::new(format!("http://127.0.0.1:{port}"), Duration::from_secs(2))?;
    let session = SessionManager::new(
        SessionDeps { store: memory(), transport: Arc::new(transport), clock: Arc::new(SystemClock) },
        RefreshPolicy::default(),
    );

    let result = session.login(ALICE, ALICE_SECRET).await;
    assert!(matches!(result, Err(AuthError::Transport(_))), "got {result:?}");
    assert!(result.is_err_and(|e| e.is_transient()));
    Ok(())
}

#[tokio::test]
async fn logout_survives_server_going_away() -> anyhow::Result<()> {
    let server = MockServer::start().await?;
    let store = memory();
    let session = server.session(Arc::clone(&store), RefreshPolicy::default())?;
    session.login(ALICE, ALICE_SECRET).await?;

    server.stop();
    session.logout().await;
    assert!(store.get().is_none());
    assert!(!session.scheduler().is_running());
    Ok(())
}

#[tokio::test]
async fn file_store_resumes_across_managers() -> anyhow::Result<()> {
    let server = MockServer::start().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");

    let first = server.session(Arc::new(FileTokenStore::open(&path)), RefreshPolicy::default())?;
    first.login(ALICE, ALICE_SECRET).await?;
    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
    assert!(raw["accessToken"].is_string());
    assert!(raw["refreshToken"].is_string());
    assert_eq!(raw["identity"]["email"], ALICE);
    drop(first);

    let second = server.session(Arc::new(FileTokenStore::open(&path)), RefreshPolicy::default())?;
    assert!(second.resume());
    assert_eq!(second.cached_identity().and_then(|i| i.email).as_deref(), Some(ALICE));
    let user = second.current_identity().await?;
    assert_eq!(user.email.as_deref(), Some(ALICE));

    second.logout().await;
    assert!(!path.exists());
    Ok(())
}

#[tokio::test]
async fn proactive_renewal_over_http() -> anyhow::Result<()> {
    let server = MockServer::start().await?;
    // Tokens live 2s; renew anything expiring within 1.5s.
    server.identity.set_access_ttl(Duration::from_secs(2));
    let policy =
        RefreshPolicy { check_interval: Duration::from_millis(50), window: Duration::from_millis(1500) };
    let store = memory();
    let session = server.session(Arc::clone(&store), policy)?;
    session.login(ALICE, ALICE_SECRET).await?;
    let before = store.get();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while session.coordinator().generation() < 2 {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "no proactive renewal");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_ne!(store.get(), before);
    Ok(())
}
