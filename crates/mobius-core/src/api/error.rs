use reqwest::header::InvalidHeaderValue;
use thiserror::Error;

use super::classify::{ClassifiedError, ErrorCode};
use super::transport::TransportError;
use crate::auth::{AuthError, TokenStoreError};

/// Error returned to callers of `ApiClient` and `AuthSession`
#[derive(Error, Debug)]
pub enum ApiError {
    /// Any failed request, normalized by the classifier
    #[error(transparent)]
    Classified(#[from] ClassifiedError),

    /// A 401 could not be recovered because the refresh itself failed.
    /// Carries the refresh failure unchanged; the session has been torn down.
    #[error("Session could not be re-authenticated: {0}")]
    Reauthentication(#[source] AuthError),

    #[error("Invalid authorization header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    #[error("Token storage failed: {0}")]
    Storage(#[from] TokenStoreError),
}

impl From<TransportError> for ApiError {
    fn from(failure: TransportError) -> Self {
        ApiError::Classified(failure.into())
    }
}

impl ApiError {
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            ApiError::Classified(e) => Some(e),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.classified().map(ClassifiedError::code)
    }

    pub fn status(&self) -> Option<u16> {
        self.classified().and_then(ClassifiedError::status)
    }

    pub fn is_reauthentication(&self) -> bool {
        matches!(self, ApiError::Reauthentication(_))
    }
}
