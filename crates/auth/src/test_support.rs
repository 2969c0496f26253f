// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a fake identity server, token minting, and a
//! session harness.
//!
//! [`FakeIdentity`] implements the `/auth/*` contract in memory, with
//! single-use rotating refresh tokens. It is a [`Transport`] on its own and
//! can also sit behind a real HTTP listener via [`FakeIdentity::handle`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};

use crate::clock::{Clock, ManualClock};
use crate::model::{Credential, Identity, RefreshRequest, SignInRequest, TOKEN_EXPIRED};
use crate::scheduler::RefreshPolicy;
use crate::session::{SessionDeps, SessionManager};
use crate::store::{MemoryTokenStore, TokenStore};
use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

/// Protected resource that answers 200 for any valid token.
pub const DATA_PATH: &str = "/api/data";
/// Protected resource that always answers 401 with a non-expiry code.
pub const ADMIN_PATH: &str = "/api/admin";

/// Build a JWT-shaped token whose payload is `claims`. The signature is junk.
pub fn mint_jwt_with(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// Build an access token expiring at `exp_secs`.
pub fn mint_jwt(exp_secs: u64, sub: &str, nonce: u64) -> String {
    mint_jwt_with(&json!({ "sub": sub, "exp": exp_secs, "jti": nonce }))
}

/// Minimal identity record.
pub fn identity(id: &str) -> Identity {
    Identity {
        id: id.to_owned(),
        email: Some(format!("{id}@example.test")),
        display_name: None,
        extra: serde_json::Map::new(),
    }
}

/// How the fake answers `/auth/refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Rotate the pair when the presented refresh token is current.
    Rotate,
    /// Refuse every refresh token.
    Reject,
    /// Answer with this status (e.g. 503) without touching any session.
    Unavailable(u16),
}

struct FakeUser {
    identity: Identity,
    secret: String,
    locked: bool,
}

/// One login's chain of rotating tokens.
struct Family {
    user_id: String,
    access_token: String,
    refresh_token: String,
    generation: u64,
    access_expired: bool,
    revoked: bool,
}

struct FakeState {
    users: HashMap<String, FakeUser>,
    families: Vec<Family>,
    /// Every access token ever issued, mapped to its family.
    issued: HashMap<String, usize>,
    hits: HashMap<String, u32>,
    refresh_mode: RefreshMode,
    refresh_delay: Duration,
    me_delay: Duration,
    refresh_reply_delay: Duration,
    access_ttl_secs: u64,
    auto_login_on_register: bool,
    always_expired: bool,
    seq: u64,
}

/// In-memory identity provider implementing the `/auth/*` contract.
pub struct FakeIdentity {
    clock: Arc<dyn Clock>,
    state: Mutex<FakeState>,
    offline: AtomicBool,
}

impl FakeIdentity {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            state: Mutex::new(FakeState {
                users: HashMap::new(),
                families: Vec::new(),
                issued: HashMap::new(),
                hits: HashMap::new(),
                refresh_mode: RefreshMode::Rotate,
                refresh_delay: Duration::ZERO,
                me_delay: Duration::ZERO,
                refresh_reply_delay: Duration::ZERO,
                access_ttl_secs: 900,
                auto_login_on_register: true,
                always_expired: false,
                seq: 0,
            }),
            offline: AtomicBool::new(false),
        })
    }

    /// Create an account directly.
    pub fn seed_user(&self, identifier: &str, secret: &str) -> Identity {
        let mut state = self.state.lock();
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(identifier.to_owned()),
            display_name: Some(identifier.split('@').next().unwrap_or(identifier).to_owned()),
            extra: serde_json::Map::new(),
        };
        state.users.insert(
            identifier.to_owned(),
            FakeUser { identity: identity.clone(), secret: secret.to_owned(), locked: false },
        );
        identity
    }

    pub fn lock_user(&self, identifier: &str) {
        if let Some(user) = self.state.lock().users.get_mut(identifier) {
            user.locked = true;
        }
    }

    /// Make the network unreachable: every send fails with a connect error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        self.state.lock().refresh_mode = mode;
    }

    /// Delay every `/auth/refresh` answer, widening the race window.
    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state.lock().refresh_delay = delay;
    }

    /// Delay `/auth/refresh` answers after the rotation has been applied.
    pub fn set_refresh_reply_delay(&self, delay: Duration) {
        self.state.lock().refresh_reply_delay = delay;
    }

    /// Delay every `/auth/me` answer.
    pub fn set_me_delay(&self, delay: Duration) {
        self.state.lock().me_delay = delay;
    }

    pub fn set_access_ttl(&self, ttl: Duration) {
        self.state.lock().access_ttl_secs = ttl.as_secs();
    }

    pub fn set_auto_login_on_register(&self, enabled: bool) {
        self.state.lock().auto_login_on_register = enabled;
    }

    /// Report every access token as expired, including freshly renewed ones.
    pub fn set_always_expired(&self, enabled: bool) {
        self.state.lock().always_expired = enabled;
    }

    /// Report the current access token of every session as expired until renewed.
    pub fn expire_access_tokens(&self) {
        for family in &mut self.state.lock().families {
            family.access_expired = true;
        }
    }

    /// Requests delivered to `path` so far.
    pub fn hits(&self, path: &str) -> u32 {
        self.state.lock().hits.get(path).copied().unwrap_or(0)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.hits("/auth/refresh")
    }

    /// Sessions whose refresh token is still honoured.
    pub fn active_sessions(&self) -> usize {
        self.state.lock().families.iter().filter(|f| !f.revoked).count()
    }

    /// Handle one request. Shared by the in-memory transport and HTTP fronts.
    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        let delay = {
            let mut state = self.state.lock();
            *state.hits.entry(request.path.clone()).or_default() += 1;
            match request.path.as_str() {
                "/auth/refresh" => state.refresh_delay,
                "/auth/me" => state.me_delay,
                _ => Duration::ZERO,
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let resp = self.route(&request);
        let reply_delay = match request.path.as_str() {
            "/auth/refresh" => self.state.lock().refresh_reply_delay,
            _ => Duration::ZERO,
        };
        if !reply_delay.is_zero() {
            tokio::time::sleep(reply_delay).await;
        }
        resp
    }

    fn route(&self, request: &ApiRequest) -> ApiResponse {
        let post = request.method == Method::POST;
        let get = request.method == Method::GET;
        match request.path.as_str() {
            "/auth/login" if post => self.login(request),
            "/auth/register" if post => self.register(request),
            "/auth/refresh" if post => self.refresh(request),
            "/auth/logout" if post => self.logout(request),
            "/auth/logout-all" if post => self.with_user(request, |state, user_id| {
                for family in state.families.iter_mut().filter(|f| f.user_id == user_id) {
                    family.revoked = true;
                }
                ApiResponse::new(204, Vec::new())
            }),
            "/auth/me" if get => self.with_user(request, |state, user_id| {
                match find_identity(state, user_id) {
                    Some(user) => ApiResponse::json_body(200, &json!({ "user": user })),
                    None => error(404, "USER_NOT_FOUND", "user not found"),
                }
            }),
            DATA_PATH if get => self.with_user(request, |_, user_id| {
                ApiResponse::json_body(200, &json!({ "ok": true, "user": user_id }))
            }),
            ADMIN_PATH if get => self.with_user(request, |_, _| {
                error(401, "INSUFFICIENT_SCOPE", "admin scope required")
            }),
            _ => error(404, "NOT_FOUND", "no such route"),
        }
    }

    fn login(&self, request: &ApiRequest) -> ApiResponse {
        let Some(body) = parse::<SignInRequest>(request) else {
            return error(400, "BAD_REQUEST", "expected identifier and secret");
        };
        let mut state = self.state.lock();
        let identity = match state.users.get(&body.identifier) {
            Some(user) if user.secret != body.secret => None,
            Some(user) if user.locked => {
                return error(423, "ACCOUNT_LOCKED", "account locked");
            }
            Some(user) => Some(user.identity.clone()),
            None => None,
        };
        let Some(identity) = identity else {
            return error(401, "INVALID_CREDENTIALS", "invalid identifier or secret");
        };
        let credential = self.issue(&mut *state, &identity.id);
        token_body(&credential, &identity)
    }

    fn register(&self, request: &ApiRequest) -> ApiResponse {
        let Some(body) = parse::<SignInRequest>(request) else {
            return error(400, "BAD_REQUEST", "expected identifier and secret");
        };
        if self.state.lock().users.contains_key(&body.identifier) {
            return error(409, "IDENTIFIER_TAKEN", "identifier already registered");
        }
        let identity = self.seed_user(&body.identifier, &body.secret);
        let mut state = self.state.lock();
        if !state.auto_login_on_register {
            return ApiResponse::json_body(201, &json!({ "user": identity }));
        }
        let credential = self.issue(&mut *state, &identity.id);
        token_body(&credential, &identity)
    }

    fn refresh(&self, request: &ApiRequest) -> ApiResponse {
        let Some(body) = parse::<RefreshRequest>(request) else {
            return error(400, "BAD_REQUEST", "expected refreshToken");
        };
        let mut state = self.state.lock();
        match state.refresh_mode {
            RefreshMode::Reject => {
                return error(401, "INVALID_REFRESH_TOKEN", "refresh token revoked");
            }
            RefreshMode::Unavailable(status) => {
                return error(status, "UNAVAILABLE", "identity service unavailable");
            }
            RefreshMode::Rotate => {}
        }

        let Some(idx) = state
            .families
            .iter()
            .position(|f| !f.revoked && f.refresh_token == body.refresh_token)
        else {
            return error(401, "INVALID_REFRESH_TOKEN", "refresh token is not current");
        };

        state.seq += 1;
        let seq = state.seq;
        let exp = self.clock.now_ms() / 1000 + state.access_ttl_secs;
        let family = &mut state.families[idx];
        family.generation += 1;
        family.access_token = mint_jwt(exp, &family.user_id, seq);
        family.refresh_token = format!("rt-{idx}-{}-{seq}", family.generation);
        family.access_expired = false;
        let credential = Credential::new(&family.access_token, &family.refresh_token);
        let user_id = family.user_id.clone();
        state.issued.insert(credential.access_token.clone(), idx);

        match find_identity(&state, &user_id) {
            Some(identity) => token_body(&credential, &identity),
            None => error(404, "USER_NOT_FOUND", "user not found"),
        }
    }

    fn logout(&self, request: &ApiRequest) -> ApiResponse {
        let Some(body) = parse::<RefreshRequest>(request) else {
            return error(400, "BAD_REQUEST", "expected refreshToken");
        };
        let mut state = self.state.lock();
        for family in state.families.iter_mut().filter(|f| f.refresh_token == body.refresh_token) {
            family.revoked = true;
        }
        ApiResponse::new(204, Vec::new())
    }

    /// Authenticate the bearer and run `f` with the caller's user id.
    fn with_user(
        &self,
        request: &ApiRequest,
        f: impl FnOnce(&mut FakeState, &str) -> ApiResponse,
    ) -> ApiResponse {
        let Some(token) = request.bearer() else {
            return error(401, "MISSING_TOKEN", "bearer token required");
        };
        let mut state = self.state.lock();
        let Some(&idx) = state.issued.get(token) else {
            return error(401, "INVALID_TOKEN", "unknown token");
        };
        let family = &state.families[idx];
        if family.revoked {
            return error(401, "SESSION_REVOKED", "session revoked");
        }
        let exp_ms = crate::claims::expiry_of(token);
        let expired = state.always_expired
            || family.access_token != token
            || family.access_expired
            || self.clock.now_ms() >= exp_ms;
        if expired {
            return error(401, TOKEN_EXPIRED, "access token expired");
        }
        let user_id = family.user_id.clone();
        f(&mut *state, &user_id)
    }

    fn issue(&self, state: &mut FakeState, user_id: &str) -> Credential {
        state.seq += 1;
        let seq = state.seq;
        let idx = state.families.len();
        let exp = self.clock.now_ms() / 1000 + state.access_ttl_secs;
        let credential = Credential::new(mint_jwt(exp, user_id, seq), format!("rt-{idx}-1-{seq}"));
        state.families.push(Family {
            user_id: user_id.to_owned(),
            access_token: credential.access_token.clone(),
            refresh_token: credential.refresh_token.clone(),
            generation: 1,
            access_expired: false,
            revoked: false,
        });
        state.issued.insert(credential.access_token.clone(), idx);
        credential
    }
}

impl Transport for FakeIdentity {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + Send + '_>> {
        Box::pin(async move {
            if self.offline.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("fake identity server offline".to_owned()));
            }
            Ok(self.handle(request).await)
        })
    }
}

fn find_identity(state: &FakeState, user_id: &str) -> Option<Identity> {
    state.users.values().find(|u| u.identity.id == user_id).map(|u| u.identity.clone())
}

fn parse<T: serde::de::DeserializeOwned>(request: &ApiRequest) -> Option<T> {
    request.body.clone().and_then(|b| serde_json::from_value(b).ok())
}

fn error(status: u16, code: &str, message: &str) -> ApiResponse {
    ApiResponse::json_body(status, &json!({ "error": { "code": code, "message": message } }))
}

fn token_body(credential: &Credential, identity: &Identity) -> ApiResponse {
    ApiResponse::json_body(
        200,
        &json!({
            "accessToken": credential.access_token,
            "refreshToken": credential.refresh_token,
            "user": identity,
        }),
    )
}

/// A session manager wired to a [`FakeIdentity`] with a manual clock and
/// memory store. Timer intervals are short so tests run in milliseconds.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub server: Arc<FakeIdentity>,
    pub store: Arc<MemoryTokenStore>,
    pub session: SessionManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(RefreshPolicy {
            check_interval: Duration::from_millis(10),
            window: Duration::from_secs(300),
        })
    }

    pub fn with_policy(policy: RefreshPolicy) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let server = FakeIdentity::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let store = Arc::new(MemoryTokenStore::new());
        let session = SessionManager::new(
            SessionDeps {
                store: Arc::clone(&store) as Arc<dyn TokenStore>,
                transport: Arc::clone(&server) as Arc<dyn Transport>,
                clock: Arc::clone(&clock) as Arc<dyn Clock>,
            },
            policy,
        );
        Self { clock, server, store, session }
    }

    /// Seed `alice@example.test` and log her in.
    pub async fn logged_in(self) -> anyhow::Result<Self> {
        self.server.seed_user("alice@example.test", "hunter2");
        self.session.login("alice@example.test", "hunter2").await?;
        Ok(self)
    }

    /// The stored credential, or an error if the store is empty.
    pub fn credential(&self) -> anyhow::Result<Credential> {
        self.store.get().ok_or_else(|| anyhow::anyhow!("store is empty"))
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `cond` every few milliseconds until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Assert that `$expr` is an `Err` whose display contains `$substr`.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
