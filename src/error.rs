//! Errors crossing the proxy core boundary.
//!
//! A policy denial is not an error: it is an ordinary `403` response. Faults
//! inside auditors never surface here either; they are logged where they occur.
use axum::{
    body::Body as AxumBody,
    response::{IntoResponse, Response},
};
use hyper::StatusCode;
use thiserror::Error;

use crate::ports::http_client::HttpClientError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// Malformed manifest or unresolvable pluggable spec, fatal at load
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Role or auditor resolution failed while handling a request
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// The outbound call to the target failed
    #[error("Upstream error: {0}")]
    Upstream(#[from] HttpClientError),

    /// The incoming request could not be mapped or read
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An audited request body exceeded the buffering limit (bytes)
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
}

pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    /// Status code used when the error is rendered for the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Configuration(_) | ProxyError::Resolution(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ProxyError::Upstream(_) => "Upstream request failed",
            ProxyError::BadRequest(_) => "Bad request",
            ProxyError::PayloadTooLarge(_) => "Payload too large",
            _ => "Internal server error",
        };
        Response::builder()
            .status(status)
            .body(AxumBody::from(message))
            .unwrap_or_else(|_| status.into_response())
    }
}
