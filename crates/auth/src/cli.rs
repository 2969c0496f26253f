// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subcommand execution for the `dashauth` binary.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::clock::SystemClock;
use crate::config::{Command, Config};
use crate::error::AuthError;
use crate::events::SessionEvent;
use crate::model::Identity;
use crate::session::{Registration, SessionDeps, SessionManager};
use crate::store::FileTokenStore;
use crate::transport::HttpTransport;

/// Build a session against the configured deployment and run one subcommand.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let path = config.store_path();
    let store = Arc::new(FileTokenStore::open(&path));
    let transport = Arc::new(HttpTransport::new(&config.base_url, config.http_timeout())?);
    let session = SessionManager::new(
        SessionDeps { store, transport, clock: Arc::new(SystemClock) },
        config.refresh_policy(),
    );
    tracing::debug!(store = %path.display(), base_url = %config.base_url, "session ready");

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    execute(&session, config.command, &mut std::io::stdout(), shutdown).await
}

pub async fn execute(
    session: &SessionManager,
    command: Command,
    out: &mut impl Write,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Command::Login { identifier, secret } => {
            let secret = resolve_secret(secret)?;
            let user = session.login(&identifier, &secret).await?;
            writeln!(out, "signed in as {}", label(&user))?;
        }
        Command::Register { identifier, secret } => {
            let secret = resolve_secret(secret)?;
            match session.register(&identifier, &secret).await? {
                Registration::SignedIn(user) => {
                    writeln!(out, "registered and signed in as {}", label(&user))?;
                }
                Registration::LoginRequired(user) => {
                    writeln!(out, "registered {}; run `dashauth login` to sign in", label(&user))?;
                }
            }
        }
        Command::Whoami => {
            let user = session.current_identity().await.map_err(with_hint)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&user)?)?;
        }
        Command::Status => {
            writeln!(out, "{}", serde_json::to_string_pretty(&session.status())?)?;
        }
        Command::Logout => {
            session.logout().await;
            writeln!(out, "signed out")?;
        }
        Command::LogoutAll => {
            session.logout_all_devices().await.map_err(with_hint)?;
            writeln!(out, "signed out of all devices")?;
        }
        Command::Keepalive { for_secs } => {
            keepalive(session, for_secs.map(Duration::from_secs), out, shutdown).await?;
        }
    }
    Ok(())
}

/// Run the auto-refresh timer until shutdown, the time limit, or session expiry.
async fn keepalive(
    session: &SessionManager,
    limit: Option<Duration>,
    out: &mut impl Write,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut events = session.subscribe();
    if !session.resume() {
        anyhow::bail!("not signed in; run `dashauth login`");
    }
    tracing::info!(policy = ?session.scheduler().policy(), "keeping session alive");

    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            _ = &mut deadline => break Ok(()),
            event = events.recv() => match event {
                Ok(event) => {
                    writeln!(out, "{}", serde_json::to_string(&event)?)?;
                    if event == SessionEvent::Expired {
                        break Err(anyhow::anyhow!("session expired; run `dashauth login`"));
                    }
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };
    session.scheduler().stop();
    result
}

/// The explicit secret, else one line from stdin.
fn resolve_secret(secret: Option<String>) -> anyhow::Result<String> {
    if let Some(secret) = secret {
        return Ok(secret);
    }
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let secret = line.trim_end_matches(['\r', '\n']).to_owned();
    if secret.is_empty() {
        anyhow::bail!("no secret given: pass --secret or pipe it on stdin");
    }
    Ok(secret)
}

fn label(user: &Identity) -> &str {
    user.email.as_deref().unwrap_or(&user.id)
}

fn with_hint(e: AuthError) -> anyhow::Error {
    if e.requires_login() {
        anyhow::anyhow!("{e}; run `dashauth login`")
    } else {
        e.into()
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
