//! Shared helpers for client integration tests
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use mobius_core::api::{ApiResponse, PreparedRequest, Transport, TransportError};
use mobius_core::{ApiClient, ClientConfig, MemoryTokenStore, StoredTokens, TokenStore};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

pub const BASE_URL: &str = "http://backend.test";

/// One request as seen by the scripted backend
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub correlation_id: Option<String>,
    pub body: Option<Value>,
}

type Handler = dyn Fn(Call) -> BoxFuture<'static, Result<ApiResponse, TransportError>> + Send + Sync;

/// In-process transport answering every request through a test-provided handler
pub struct ScriptedTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new<F, Fut>(handler: F) -> Arc<Self>
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse, TransportError>> + Send + 'static,
    {
        Arc::new(Self {
            handler: Box::new(move |call: Call| handler(call).boxed()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: PreparedRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>> {
        let header = |name: &str| {
            request
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let call = Call {
            method: request.method.clone(),
            path: request.url.path().to_string(),
            authorization: header(AUTHORIZATION.as_str()),
            correlation_id: header("x-correlation-id"),
            body: request.body.clone(),
        };
        self.calls.lock().unwrap().push(call.clone());
        (self.handler)(call)
    }
}

pub fn respond(status: u16, body: Value) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::from_json(StatusCode::from_u16(status).unwrap(), &body))
}

pub fn network_down() -> Result<ApiResponse, TransportError> {
    let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
    Err(TransportError::NoResponse(Box::new(io)))
}

pub fn user_json(email: &str) -> Value {
    json!({
        "id": "u-1",
        "email": email,
        "name": "Test User",
        "role": "user",
        "createdAt": "2024-05-01T12:00:00Z",
        "updatedAt": "2024-05-01T12:00:00Z"
    })
}

pub fn auth_body(token: &str, refresh_token: Option<&str>) -> Value {
    let mut body = json!({ "user": user_json("t@example.com"), "token": token });
    if let Some(refresh_token) = refresh_token {
        body["refreshToken"] = json!(refresh_token);
    }
    body
}

pub fn bearer(token: &str) -> Option<String> {
    Some(format!("Bearer {token}"))
}

/// Client wired to a scripted transport, plus a counter of login redirects
pub struct Harness {
    pub client: ApiClient,
    pub transport: Arc<ScriptedTransport>,
    pub tokens: Arc<MemoryTokenStore>,
    pub redirects: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(transport: Arc<ScriptedTransport>, tokens: Option<StoredTokens>) -> Self {
        Self::with_timeout(transport, tokens, Duration::from_secs(5))
    }

    pub fn with_timeout(
        transport: Arc<ScriptedTransport>,
        tokens: Option<StoredTokens>,
        timeout: Duration,
    ) -> Self {
        let store = Arc::new(match tokens {
            Some(tokens) => MemoryTokenStore::with_tokens(tokens),
            None => MemoryTokenStore::new(),
        });
        let redirects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&redirects);

        let client = ApiClient::builder(ClientConfig::new(BASE_URL, timeout))
            .transport(transport.clone())
            .token_store(store.clone())
            .login_redirect(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .build()
            .expect("Failed to build client");

        Self {
            client,
            transport,
            tokens: store,
            redirects,
        }
    }

    pub fn redirect_count(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> (Option<String>, Option<String>) {
        (self.tokens.access_token(), self.tokens.refresh_token())
    }
}
