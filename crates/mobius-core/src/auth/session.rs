//! Session controller: login, register, refresh, logout.
//!
//! `AuthSession` is the only writer of the token store. Writes are
//! serialized through one async mutex, and concurrent refresh requests are
//! coalesced onto a single shared in-flight future so the backend sees at
//! most one refresh call per expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::store::{TokenStore, TokenStoreError};
use crate::api::{attach_bearer, ApiError, ApiRequest, Dispatcher, TransportError};
use crate::models::{AuthResponse, Credentials, Registration, Session, User};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

const SESSION_PATHS: [&str; 4] = [LOGIN_PATH, REGISTER_PATH, REFRESH_PATH, LOGOUT_PATH];

/// Endpoints that are never subject to 401 refresh-and-retry.
///
/// Accepts every form the dispatcher resolves: `/auth/login`, `auth/login`,
/// or an absolute URL whose path ends in the endpoint.
pub fn is_session_endpoint(path: &str) -> bool {
    match Url::parse(path) {
        Ok(url) => {
            let resolved = url.path().trim_end_matches('/');
            SESSION_PATHS.iter().any(|endpoint| resolved.ends_with(endpoint))
        }
        Err(_) => {
            let relative = path.split(['?', '#']).next().unwrap_or(path).trim_matches('/');
            SESSION_PATHS
                .iter()
                .any(|endpoint| endpoint.trim_start_matches('/') == relative)
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token refresh failed: {0}")]
    Request(#[source] Arc<TransportError>),

    #[error("Failed to store refreshed tokens: {0}")]
    Storage(#[source] Arc<TokenStoreError>),

    #[error("Token refresh did not complete: {0}")]
    Interrupted(String),
}

impl AuthError {
    /// The raw backend failure behind a failed refresh call
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            AuthError::Request(e) => Some(e),
            _ => None,
        }
    }
}

/// Session lifecycle:
/// `Anonymous -> Authenticating -> Authenticated -> (Refreshing -> Authenticated | Anonymous)`,
/// plus `Authenticated -> Anonymous` on logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
}

#[derive(Debug, Clone)]
struct Snapshot {
    state: SessionState,
    user: Option<User>,
}

/// The last refresh the backend did not complete, keyed by the token it used
#[derive(Debug, Clone)]
struct FailedRefresh {
    id: u64,
    refresh_token: String,
    error: AuthError,
}

/// A refresh failure seen from the 401 path. `refresh_id` names the
/// backend refresh that failed; it is `None` when no call was made.
#[derive(Debug)]
pub(crate) struct RefreshFailure {
    pub refresh_id: Option<u64>,
    pub error: AuthError,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Session, AuthError>>>;
type InflightSlot = Arc<Mutex<Option<(u64, SharedRefresh)>>>;

/// Everything a refresh needs, cloneable into a spawned task
#[derive(Clone)]
struct SessionCore {
    dispatcher: Dispatcher,
    tokens: Arc<dyn TokenStore>,
    snapshot: Arc<RwLock<Snapshot>>,
    writes: Arc<tokio::sync::Mutex<()>>,
    last_failure: Arc<Mutex<Option<FailedRefresh>>>,
}

impl SessionCore {
    fn set_snapshot(&self, state: SessionState, user: Option<User>) -> Snapshot {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *snapshot, Snapshot { state, user })
    }

    fn enter(&self, state: SessionState) -> Snapshot {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let previous = snapshot.clone();
        snapshot.state = state;
        previous
    }

    fn restore(&self, previous: Snapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = previous;
    }

    fn failure_for(&self, refresh_token: &str) -> Option<FailedRefresh> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|failed| failed.refresh_token == refresh_token)
            .cloned()
    }

    fn fail_refresh(&self, id: u64, refresh_token: String, error: AuthError) -> AuthError {
        self.set_snapshot(SessionState::Anonymous, None);
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(FailedRefresh {
            id,
            refresh_token,
            error: error.clone(),
        });
        error
    }

    /// Shared body of login and register
    async fn authenticate(&self, path: &'static str, body: Value) -> Result<Session, ApiError> {
        let _write = self.writes.lock().await;
        let previous = self.enter(SessionState::Authenticating);

        let request = ApiRequest::post(path).json(body);
        let outcome = self
            .dispatcher
            .dispatch(&request)
            .await
            .and_then(|response| response.json::<AuthResponse>())
            .and_then(|auth| match auth.refresh_token {
                Some(refresh_token) => Ok(Session {
                    user: auth.user,
                    access_token: auth.token,
                    refresh_token,
                }),
                None => Err(TransportError::UnexpectedBody(format!(
                    "{path} response is missing refreshToken"
                ))),
            });

        let session = match outcome {
            Ok(session) => session,
            Err(failure) => {
                self.restore(previous);
                return Err(failure.into());
            }
        };

        if let Err(e) = self.tokens.set_tokens(session.stored_tokens()) {
            self.restore(previous);
            return Err(e.into());
        }
        self.set_snapshot(SessionState::Authenticated, Some(session.user.clone()));
        Ok(session)
    }

    async fn refresh(self, id: u64, refresh_token: String) -> Result<Session, AuthError> {
        let _write = self.writes.lock().await;
        self.enter(SessionState::Refreshing);

        let request = ApiRequest::post(REFRESH_PATH).json(json!({ "refreshToken": refresh_token }));
        let auth = match self
            .dispatcher
            .dispatch(&request)
            .await
            .and_then(|response| response.json::<AuthResponse>())
        {
            Ok(auth) => auth,
            Err(failure) => {
                warn!(error = %failure, refresh_id = id, "Token refresh failed");
                let error = AuthError::Request(Arc::new(failure));
                return Err(self.fail_refresh(id, refresh_token, error));
            }
        };

        let rotated = auth.refresh_token.is_some();
        let session = Session {
            user: auth.user,
            access_token: auth.token,
            refresh_token: auth.refresh_token.unwrap_or_else(|| refresh_token.clone()),
        };
        if let Err(e) = self.tokens.set_tokens(session.stored_tokens()) {
            warn!(error = %e, "Failed to persist refreshed tokens");
            let error = AuthError::Storage(Arc::new(e));
            return Err(self.fail_refresh(id, refresh_token, error));
        }

        self.set_snapshot(SessionState::Authenticated, Some(session.user.clone()));
        info!(user = %session.user.email, rotated, refresh_id = id, "Access token refreshed");
        Ok(session)
    }
}

/// Clears the token store when dropped, so logout tears the session down
/// even if its future is cancelled mid-request.
struct Teardown<'a>(&'a SessionCore);

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.tokens.clear_tokens() {
            warn!(error = %e, "Failed to clear stored tokens");
        }
        self.0.set_snapshot(SessionState::Anonymous, None);
        info!("Session cleared");
    }
}

/// Frees the in-flight slot once its refresh task ends, however it ends
struct ReleaseSlot {
    inflight: InflightSlot,
    id: u64,
}

impl Drop for ReleaseSlot {
    fn drop(&mut self) {
        let mut slot = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(slot.as_ref(), Some((current, _)) if *current == self.id) {
            *slot = None;
        }
    }
}

pub struct AuthSession {
    core: SessionCore,
    inflight: InflightSlot,
    refresh_ids: AtomicU64,
    torn_down: AtomicU64,
}

impl AuthSession {
    /// A store that already holds tokens starts out `Authenticated`
    /// (restored session, user unknown until the next login or refresh).
    pub fn new(dispatcher: Dispatcher, tokens: Arc<dyn TokenStore>) -> Self {
        let state = if tokens.has_tokens() {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous
        };

        Self {
            core: SessionCore {
                dispatcher,
                tokens,
                snapshot: Arc::new(RwLock::new(Snapshot { state, user: None })),
                writes: Arc::new(tokio::sync::Mutex::new(())),
                last_failure: Arc::new(Mutex::new(None)),
            },
            inflight: Arc::new(Mutex::new(None)),
            refresh_ids: AtomicU64::new(0),
            torn_down: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        self.core
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    pub fn current_user(&self) -> Option<User> {
        self.core
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .user
            .clone()
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.core.tokens
    }

    /// Log in with email and password, storing both tokens on success.
    /// On failure the token store is untouched.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let body = serde_json::to_value(Credentials { email, password })
            .map_err(TransportError::Encode)?;
        let session = self.core.authenticate(LOGIN_PATH, body).await?;
        info!(user = %session.user.email, "Logged in");
        Ok(session)
    }

    /// Create an account; same contract as `login`
    pub async fn register(&self, email: &str, password: &str, name: &str) -> Result<Session, ApiError> {
        let body = serde_json::to_value(Registration { email, password, name })
            .map_err(TransportError::Encode)?;
        let session = self.core.authenticate(REGISTER_PATH, body).await?;
        info!(user = %session.user.email, "Registered");
        Ok(session)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// Uses `refresh_token` if given, otherwise the stored one. Callers that
    /// arrive while a refresh is already in flight await that same refresh
    /// instead of starting another. The refresh runs as its own task, so it
    /// completes even if every caller awaiting it is dropped.
    pub async fn refresh_token(&self, refresh_token: Option<&str>) -> Result<Session, AuthError> {
        let (_, refresh) = self
            .join_or_start(refresh_token, false)
            .map_err(|failure| failure.error)?;
        refresh.await
    }

    /// Refresh on behalf of a request that got a 401. A stored refresh token
    /// that the last refresh already failed with is not sent again; that
    /// failure is returned instead.
    pub(crate) async fn refresh_for_retry(&self) -> Result<Session, RefreshFailure> {
        let (id, refresh) = self.join_or_start(None, true)?;
        refresh.await.map_err(|error| RefreshFailure {
            refresh_id: Some(id),
            error,
        })
    }

    /// True for exactly one caller per failed refresh, which then owns the
    /// logout and login redirect. Failures without a backend call always claim.
    pub(crate) fn claim_teardown(&self, refresh_id: Option<u64>) -> bool {
        match refresh_id {
            Some(id) => self.torn_down.fetch_max(id + 1, Ordering::SeqCst) <= id,
            None => true,
        }
    }

    fn join_or_start(
        &self,
        refresh_token: Option<&str>,
        reuse_failure: bool,
    ) -> Result<(u64, SharedRefresh), RefreshFailure> {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((id, refresh)) = inflight.as_ref() {
            debug!(refresh_id = id, "Joining in-flight token refresh");
            return Ok((*id, refresh.clone()));
        }

        let token = refresh_token
            .map(str::to_owned)
            .or_else(|| self.core.tokens.refresh_token())
            .ok_or(RefreshFailure {
                refresh_id: None,
                error: AuthError::NoRefreshToken,
            })?;
        if reuse_failure {
            if let Some(failed) = self.core.failure_for(&token) {
                debug!(refresh_id = failed.id, "Refresh token already failed; not retrying it");
                return Err(RefreshFailure {
                    refresh_id: Some(failed.id),
                    error: failed.error,
                });
            }
        }

        let id = self.refresh_ids.fetch_add(1, Ordering::Relaxed);
        let release = ReleaseSlot {
            inflight: Arc::clone(&self.inflight),
            id,
        };
        let task = tokio::spawn(self.core.clone().refresh(id, token).map(move |result| {
            drop(release);
            result
        }));
        let refresh = async move {
            task.await
                .unwrap_or_else(|e| Err(AuthError::Interrupted(e.to_string())))
        }
        .boxed()
        .shared();

        *inflight = Some((id, refresh.clone()));
        Ok((id, refresh))
    }

    /// Best-effort backend logout. Local tokens are always cleared, whatever
    /// the backend says and even if the call never completes.
    pub async fn logout(&self) {
        let _write = self.core.writes.lock().await;
        let _teardown = Teardown(&self.core);

        let request = ApiRequest::post(LOGOUT_PATH).json(json!({}));
        let request = match attach_bearer(request, self.core.tokens.access_token().as_deref()) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Stored access token is not a valid header; skipping backend logout");
                return;
            }
        };

        match self.core.dispatcher.dispatch(&request).await {
            Ok(_) => debug!("Backend logout acknowledged"),
            Err(e) => warn!(error = %e, "Backend logout failed; clearing local session anyway"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_endpoint_forms() {
        assert!(is_session_endpoint("/auth/login"));
        assert!(is_session_endpoint("auth/refresh"));
        assert!(is_session_endpoint("/auth/logout/"));
        assert!(is_session_endpoint("https://api.example.com/api/v1/auth/register"));
        assert!(!is_session_endpoint("/auth"));
        assert!(!is_session_endpoint("/contexts/auth/login"));
        assert!(!is_session_endpoint("https://api.example.com/api/v1/contexts"));
    }
}
