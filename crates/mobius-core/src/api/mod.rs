//! REST API client module for the Mobius backend.
//!
//! This module provides the `ApiClient` for authenticated requests, the
//! transport seam it sends through, and the classifier that turns raw
//! failures into `ClassifiedError`s.
//!
//! Requests carry the access token as a bearer credential. A 401 triggers
//! one coalesced token refresh and a single retry of the original request.

pub mod classify;
pub mod client;
pub mod error;
pub mod request;
pub mod transport;

pub use classify::{classify, ClassifiedError, ErrorCode};
pub use client::{ApiClient, ApiClientBuilder};
pub use error::ApiError;
pub use request::{attach_bearer, ApiRequest, ApiResponse, CORRELATION_ID_HEADER};
pub use transport::{Dispatcher, PreparedRequest, ReqwestTransport, Transport, TransportError};
