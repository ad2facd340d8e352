use async_trait::async_trait;
use hyper::{HeaderMap, StatusCode};
use thiserror::Error;

use crate::config::models::{Params, Role};

/// Error type for calls to remote role / auditor services
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RemoteServiceError {
    /// Error when the service cannot be reached
    #[error("Request to {url} failed: {message}")]
    RequestFailed { url: String, message: String },

    /// Error when the service answers with a non-success status
    #[error("Service {url} returned error status: {status}")]
    Status { url: String, status: StatusCode },

    /// Error when the service answer cannot be decoded
    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

/// Result type for remote service calls
pub type RemoteServiceResult<T> = Result<T, RemoteServiceError>;

/// What a remote auditor asks of the rest of its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteVerdict {
    /// Pass the event on unchanged
    Continue,
    /// The service answered `null`: stop the chain for this event
    Stop,
}

/// RemoteService defines the port for plain HTTP services declared through
/// `service` in the manifest
#[async_trait]
pub trait RemoteService: Send + Sync + 'static {
    /// Ask a roles service for the roles of a caller
    ///
    /// # Arguments
    /// * `url` - The service URL
    /// * `params` - Sent as query parameters
    /// * `headers` - End-to-end headers of the incoming request
    ///
    /// # Returns
    /// The decoded list of roles, `None` if the service answered `null`
    async fn fetch_roles(
        &self,
        url: &str,
        params: &Params,
        headers: &HeaderMap,
    ) -> RemoteServiceResult<Option<Vec<Role>>>;

    /// Deliver an audit event to an auditor service
    ///
    /// # Arguments
    /// * `url` - The service URL
    /// * `params` - Sent as query parameters
    /// * `event` - JSON rendering of the event
    async fn post_audit(
        &self,
        url: &str,
        params: &Params,
        event: &serde_json::Value,
    ) -> RemoteServiceResult<RemoteVerdict>;
}
