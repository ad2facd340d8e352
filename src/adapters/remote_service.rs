use std::time::Duration;

use async_trait::async_trait;
use hyper::{HeaderMap, header};
use reqwest::Client;

use crate::{
    config::models::{Params, Role},
    ports::remote_service::{
        RemoteService, RemoteServiceError, RemoteServiceResult, RemoteVerdict,
    },
    utils::end_to_end,
};

/// Calls remote roles providers and auditors over HTTP with reqwest.
///
/// * Roles: `GET <url>?<params>` carrying the caller's end-to-end headers; the
///   answer is a JSON list of role names, or `null` for no answer.
/// * Auditors: `POST <url>?<params>` with the event as JSON; an answer of `null`
///   stops the chain for the event, anything else lets it continue.
#[derive(Clone)]
pub struct ReqwestRemoteService {
    client: Client,
}

impl ReqwestRemoteService {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn request_failed(url: &str, e: reqwest::Error) -> RemoteServiceError {
        RemoteServiceError::RequestFailed {
            url: url.to_string(),
            message: e.to_string(),
        }
    }

    async fn success_body(url: &str, resp: reqwest::Response) -> RemoteServiceResult<bytes::Bytes> {
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteServiceError::Status {
                url: url.to_string(),
                status,
            });
        }
        resp.bytes().await.map_err(|e| Self::request_failed(url, e))
    }
}

impl Default for ReqwestRemoteService {
    fn default() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl RemoteService for ReqwestRemoteService {
    async fn fetch_roles(
        &self,
        url: &str,
        params: &Params,
        headers: &HeaderMap,
    ) -> RemoteServiceResult<Option<Vec<Role>>> {
        let mut headers = end_to_end(headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        tracing::debug!("Fetching roles from {}", url);
        let resp = self
            .client
            .get(url)
            .query(params)
            .headers(headers)
            .send()
            .await
            .map_err(|e| Self::request_failed(url, e))?;

        let body = Self::success_body(url, resp).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&body).map_err(|e| RemoteServiceError::InvalidResponse {
            url: url.to_string(),
            message: format!("expected a JSON list of roles: {e}"),
        })
    }

    async fn post_audit(
        &self,
        url: &str,
        params: &Params,
        event: &serde_json::Value,
    ) -> RemoteServiceResult<RemoteVerdict> {
        let resp = self
            .client
            .post(url)
            .query(params)
            .json(event)
            .send()
            .await
            .map_err(|e| Self::request_failed(url, e))?;

        let body = Self::success_body(url, resp).await?;
        if body.trim_ascii() == b"null" {
            Ok(RemoteVerdict::Stop)
        } else {
            Ok(RemoteVerdict::Continue)
        }
    }
}
