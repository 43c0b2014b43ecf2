//! Authenticated API client.
//!
//! Each call runs a fixed pipeline:
//!
//! 1. attach the stored access token (`attach_bearer`)
//! 2. dispatch through the transport
//! 3. on a 401 that hasn't been retried yet, refresh once and re-dispatch
//!    the same request exactly once
//! 4. classify anything else that failed
//!
//! A failed refresh tears the session down, runs the login-redirect effect,
//! and returns the refresh failure itself rather than a classified error.
//! Requests that fail alongside it share that one refresh and one teardown.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::classify::ClassifiedError;
use super::request::{attach_bearer, ApiRequest, ApiResponse};
use super::transport::{Dispatcher, ReqwestTransport, Transport, TransportError};
use super::ApiError;
use crate::auth::{AuthError, AuthSession, LoginRedirect, MemoryTokenStore, NoRedirect, TokenStore};
use crate::config::ClientConfig;

pub struct ApiClientBuilder {
    config: ClientConfig,
    tokens: Option<Arc<dyn TokenStore>>,
    transport: Option<Arc<dyn Transport>>,
    redirect: Option<Arc<dyn LoginRedirect>>,
}

impl ApiClientBuilder {
    pub fn token_store(mut self, tokens: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn login_redirect(mut self, redirect: Arc<dyn LoginRedirect>) -> Self {
        self.redirect = Some(redirect);
        self
    }

    /// Defaults: in-memory token store, reqwest transport, no redirect
    pub fn build(self) -> Result<ApiClient, reqwest::Error> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        let dispatcher = Dispatcher::new(&self.config, transport);

        Ok(ApiClient {
            session: Arc::new(AuthSession::new(dispatcher.clone(), tokens)),
            dispatcher,
            redirect: self.redirect.unwrap_or_else(|| Arc::new(NoRedirect)),
        })
    }
}

/// API client for the Mobius backend.
/// Clone is cheap - clones share the transport, token store and session.
#[derive(Clone)]
pub struct ApiClient {
    dispatcher: Dispatcher,
    session: Arc<AuthSession>,
    redirect: Arc<dyn LoginRedirect>,
}

impl ApiClient {
    /// Client with default collaborators
    pub fn new(config: ClientConfig) -> Result<Self, reqwest::Error> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            tokens: None,
            transport: None,
            redirect: None,
        }
    }

    /// The session controller (login, register, refresh, logout)
    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        self.session.token_store()
    }

    /// Send one logical request, refreshing and retrying once on 401
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let request = self.authorize(request)?;
        match self.dispatcher.dispatch(&request).await {
            Ok(response) => Ok(response),
            Err(failure) if failure.is_unauthorized() && request.allows_refresh() => {
                self.refresh_and_retry(request).await
            }
            Err(failure) => Err(reject(&request, failure)),
        }
    }

    /// Request interceptor: attach the current access token, if any
    fn authorize(&self, request: ApiRequest) -> Result<ApiRequest, ApiError> {
        let token = self.token_store().access_token();
        Ok(attach_bearer(request, token.as_deref())?)
    }

    async fn refresh_and_retry(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let current = self.token_store().access_token();
        let sent_with = request.bearer_token();

        match (current.as_deref(), sent_with) {
            (Some(current), sent) if Some(current) != sent => {
                debug!(
                    correlation_id = request.correlation_id(),
                    "Access token changed while request was in flight; retrying without refresh"
                );
            }
            (None, Some(_)) => {
                debug!(
                    correlation_id = request.correlation_id(),
                    "Session ended while request was in flight"
                );
                return Err(ApiError::Reauthentication(AuthError::NoRefreshToken));
            }
            _ => {
                if let Err(failure) = self.session.refresh_for_retry().await {
                    if self.session.claim_teardown(failure.refresh_id) {
                        warn!(
                            error = %failure.error,
                            correlation_id = request.correlation_id(),
                            "Could not re-authenticate; ending session"
                        );
                        self.session.logout().await;
                        self.redirect.redirect_to_login();
                    }
                    return Err(ApiError::Reauthentication(failure.error));
                }
            }
        }

        request.mark_retried();
        let request = self.authorize(request)?;
        self.dispatcher
            .dispatch(&request)
            .await
            .map_err(|failure| reject(&request, failure))
    }

    // ===== Typed helpers =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(ApiRequest::get(path)).await?;
        decode(&response)
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::post(path).json(encode(body)?);
        decode(&self.request(request).await?)
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::put(path).json(encode(body)?);
        decode(&self.request(request).await?)
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::patch(path).json(encode(body)?);
        decode(&self.request(request).await?)
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(ApiRequest::delete(path)).await?;
        decode(&response)
    }
}

/// Failure interceptor for everything that isn't a recoverable 401
fn reject(request: &ApiRequest, failure: TransportError) -> ApiError {
    let classified = ClassifiedError::from(failure);
    debug!(
        method = %request.method(),
        path = request.path(),
        correlation_id = request.correlation_id(),
        code = %classified.code(),
        status = classified.status(),
        "Request rejected"
    );
    classified.into()
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(body).map_err(|e| TransportError::Encode(e).into())
}

fn decode<T: DeserializeOwned>(response: &ApiResponse) -> Result<T, ApiError> {
    response.json().map_err(ApiError::from)
}
