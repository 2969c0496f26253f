// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `dashauth` binary against the
//! mock identity server.

use std::path::Path;
use std::process::Output;

use tokio::process::Command;

use dashauth_specs::{dashauth_binary, MockServer, ALICE, ALICE_SECRET};

async fn dashauth(base_url: &str, store: &Path, args: &[&str]) -> anyhow::Result<Output> {
    let binary = dashauth_binary();
    anyhow::ensure!(binary.exists(), "dashauth binary not found at {}", binary.display());
    let output = Command::new(&binary)
        .arg("--base-url")
        .arg(base_url)
        .arg("--store")
        .arg(store)
        .args(args)
        .env("DASHAUTH_LOG", "warn")
        .env_remove("DASHAUTH_SECRET")
        .output()
        .await?;
    Ok(output)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[tokio::test]
async fn login_status_whoami_logout() -> anyhow::Result<()> {
    let server = MockServer::start().await?;
    let dir = tempfile::tempdir()?;
    let store = dir.path().join("session.json");
    let url = server.base_url();

    let out = dashauth(&url, &store, &["login", ALICE, "--secret", ALICE_SECRET]).await?;
    assert!(out.status.success(), "login failed: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(stdout(&out).trim(), format!("signed in as {ALICE}"));
    assert!(store.exists());

    let out = dashauth(&url, &store, &["status"]).await?;
    assert!(out.status.success());
    let status: serde_json::Value = serde_json::from_str(&stdout(&out))?;
    assert_eq!(status["state"], "authenticated");
    assert_eq!(status["identity"]["email"], ALICE);

    let out = dashauth(&url, &store, &["whoami"]).await?;
    assert!(out.status.success());
    let user: serde_json::Value = serde_json::from_str(&stdout(&out))?;
    assert_eq!(user["email"], ALICE);

    let out = dashauth(&url, &store, &["logout"]).await?;
    assert!(out.status.success());
    assert!(!store.exists());
    assert_eq!(server.identity.active_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn whoami_renews_expired_session() -> anyhow::Result<()> {
    let server = MockServer::start().await?;
    let dir = tempfile::tempdir()?;
    let store = dir.path().join("session.json");
    let url = server.base_url();

    let out = dashauth(&url, &store, &["login", ALICE, "--secret", ALICE_SECRET]).await?;
    assert!(out.status.success());
    let before = std::fs::read_to_string(&store)?;
    server.identity.expire_access_tokens();

    let out = dashauth(&url, &store, &["whoami"]).await?;
    assert!(out.status.success(), "whoami failed: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(server.identity.refresh_calls(), 1);
    assert_ne!(std::fs::read_to_string(&store)?, before);
    Ok(())
}

#[tokio::test]
async fn login_secret_from_stdin() -> anyhow::Result<()> {
    use std::process::Stdio;
    use tokio::io::AsyncWriteExt;

    let server = MockServer::start().await?;
    let dir = tempfile::tempdir()?;
    let store = dir.path().join("session.json");

    let mut child = Command::new(dashauth_binary())
        .arg("--base-url")
        .arg(server.base_url())
        .arg("--store")
        .arg(&store)
        .args(["login", ALICE])
        .env_remove("DASHAUTH_SECRET")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(format!("{ALICE_SECRET}\n").as_bytes()).await?;
    }
    let out = child.wait_with_output().await?;
    assert!(out.status.success());
    assert!(store.exists());
    Ok(())
}

#[tokio::test]
async fn rejected_login_exits_nonzero() -> anyhow::Result<()> {
    let server = MockServer::start().await?;
    let dir = tempfile::tempdir()?;
    let store = dir.path().join("session.json");

    let out = dashauth(&server.base_url(), &store, &["login", ALICE, "--secret", "wrong"]).await?;
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid identifier or secret"));
    assert!(!store.exists());
    Ok(())
}

#[tokio::test]
async fn invalid_config_exits_two() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = dir.path().join("session.json");
    let out = dashauth("ftp://nowhere", &store, &["status"]).await?;
    assert_eq!(out.status.code(), Some(2));
    Ok(())
}

#[tokio::test]
async fn status_without_session() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = dir.path().join("session.json");
    let out = dashauth("http://127.0.0.1:9", &store, &["status"]).await?;
    assert!(out.status.success());
    let status: serde_json::Value = serde_json::from_str(&stdout(&out))?;
    assert_eq!(status["state"], "unauthenticated");
    Ok(())
}
