// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::scheduler::RefreshPolicy;
use crate::store;

/// Session file name inside the state directory.
pub const SESSION_FILE: &str = "session.json";

/// Sign in to a dashboard deployment and keep the session alive.
#[derive(Debug, Parser)]
#[command(name = "dashauth", version, about)]
pub struct Config {
    /// Base URL of the dashboard API.
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "DASHAUTH_BASE_URL", global = true)]
    pub base_url: String,

    /// Session file. Defaults to `session.json` in the state directory.
    #[arg(long, env = "DASHAUTH_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// How often the auto-refresh timer checks the access token, in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "DASHAUTH_REFRESH_CHECK_MS", global = true)]
    pub refresh_check_ms: u64,

    /// Renew once the access token is this close to expiry, in milliseconds.
    #[arg(long, default_value_t = 300_000, env = "DASHAUTH_REFRESH_WINDOW_MS", global = true)]
    pub refresh_window_ms: u64,

    /// Per-request HTTP timeout in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "DASHAUTH_HTTP_TIMEOUT_MS", global = true)]
    pub http_timeout_ms: u64,

    /// Log filter (tracing EnvFilter syntax).
    #[arg(long, default_value = "warn", env = "DASHAUTH_LOG", global = true)]
    pub log_level: String,

    /// Log format (text or json).
    #[arg(long, default_value = "text", env = "DASHAUTH_LOG_FORMAT", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Sign in and persist the session.
    Login {
        identifier: String,
        /// Secret to sign in with. Read from stdin when omitted.
        #[arg(long, env = "DASHAUTH_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },
    /// Create an account, signing in if the deployment allows it.
    Register {
        identifier: String,
        #[arg(long, env = "DASHAUTH_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },
    /// Fetch the signed-in identity from the server.
    Whoami,
    /// Print the local session state without contacting the server.
    Status,
    /// Sign out of this device.
    Logout,
    /// Sign out of every device.
    LogoutAll,
    /// Keep the session alive, printing lifecycle events as JSON lines.
    Keepalive {
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        for_secs: Option<u64>,
    },
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = self.base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("--base-url must start with http:// or https://, got {url:?}");
        }
        if self.refresh_check_ms == 0 {
            anyhow::bail!("--refresh-check-ms must be greater than zero");
        }
        if self.http_timeout_ms == 0 {
            anyhow::bail!("--http-timeout-ms must be greater than zero");
        }
        match self.log_format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("invalid log format: {other} (expected text or json)"),
        }
        if let Command::Keepalive { for_secs: Some(0) } = self.command {
            anyhow::bail!("--for-secs must be greater than zero");
        }
        Ok(())
    }

    pub fn refresh_check_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_check_ms)
    }

    pub fn refresh_window(&self) -> Duration {
        Duration::from_millis(self.refresh_window_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy { check_interval: self.refresh_check_interval(), window: self.refresh_window() }
    }

    /// Explicit `--store`, else the session file in the state directory.
    pub fn store_path(&self) -> PathBuf {
        match self.store {
            Some(ref path) => path.clone(),
            None => store::state_dir().join(SESSION_FILE),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
