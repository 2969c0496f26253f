// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    session_expired = { AuthError::SessionExpired, true },
    not_authenticated = { AuthError::NotAuthenticated, true },
    replay_rejected = { AuthError::ReplayRejected, false },
    transport = { AuthError::Transport("connection refused".into()), false },
    protocol = { AuthError::Protocol("bad json".into()), false },
)]
fn requires_login(err: AuthError, expected: bool) {
    assert_eq!(err.requires_login(), expected);
}

#[yare::parameterized(
    transport = { AuthError::Transport("reset".into()), true },
    bad_gateway = { AuthError::Api { status: 502, code: None, message: String::new() }, true },
    throttled = { AuthError::Api { status: 429, code: None, message: String::new() }, true },
    forbidden = { AuthError::Api { status: 403, code: None, message: String::new() }, false },
    expired = { AuthError::SessionExpired, false },
)]
fn is_transient(err: AuthError, expected: bool) {
    assert_eq!(err.is_transient(), expected);
}

#[test]
fn rejection_message_is_verbatim() -> anyhow::Result<()> {
    let err = AuthError::Rejected {
        status: 423,
        code: Some("ACCOUNT_LOCKED".into()),
        message: "account locked".into(),
    };
    assert_eq!(err.to_string(), "rejected (423): account locked");
    assert_eq!(err.code(), "REJECTED");
    Ok(())
}

#[test]
fn transport_error_converts() -> anyhow::Result<()> {
    let err: AuthError = TransportError::Timeout.into();
    assert!(matches!(err, AuthError::Transport(_)));
    assert!(err.is_transient());
    Ok(())
}
