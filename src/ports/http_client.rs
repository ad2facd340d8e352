use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to the target fails or the exchange breaks off
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for forwarding requests to the target
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to the target service
    ///
    /// # Arguments
    /// * `req` - The outgoing request, URI already pointing at the target
    ///
    /// # Returns
    /// A future that resolves to the target's response, with a streaming body,
    /// or an error. Dropping the future cancels the exchange.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
