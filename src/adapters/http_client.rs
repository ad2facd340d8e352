use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tracing::Instrument;

use crate::{
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
    tracing_setup::create_target_span,
    utils::{header_names, strip_hop_by_hop},
};

/// HTTP client adapter using Hyper with Rustls.
///
/// Responsibilities:
/// * Drops hop-by-hop headers and points `Host` at the target
/// * Forces request version to HTTP/1.1
/// * Converts between Hyper body and Axum body types, streaming both ways
///
/// No retries and no timeouts: a failed call is reported once, and dropping the
/// returned future cancels the exchange.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::info!("Created HTTP client for the target");
        Ok(Self { client })
    }

    /// `Host` value for the request's URI, `None` if it has no host.
    fn host_header(req: &Request<AxumBody>) -> Option<HeaderValue> {
        let host = req.uri().host()?;
        let value = match req.uri().port_u16() {
            Some(port) => HeaderValue::from_str(&format!("{host}:{port}")),
            None => HeaderValue::from_str(host),
        };
        value.ok()
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let target_identifier = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            req.uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );
        let span = create_target_span(
            &target_identifier,
            req.method().as_str(),
            req.uri().path(),
        );

        let Some(host) = Self::host_header(&req) else {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        };
        strip_hop_by_hop(req.headers_mut());
        req.headers_mut().insert(header::HOST, host);

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;

        let method = parts.method.clone();
        let uri = parts.uri.clone();

        async move {
            tracing::info!("Sending request: {} {}", method, uri);
            tracing::debug!("Outgoing request headers: {}", header_names(&parts.headers));

            match self.client.request(Request::from_parts(parts, body)).await {
                Ok(response) => {
                    tracing::Span::current()
                        .record("http.status_code", response.status().as_u16());

                    let (mut parts, hyper_body) = response.into_parts();
                    // The body is re-framed by the server towards the caller
                    parts.headers.remove(header::TRANSFER_ENCODING);

                    Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
                }
                Err(e) => {
                    tracing::Span::current().record("http.status_code", 599u16);
                    tracing::error!(
                        "Error making request to target {} ({} {}): {}",
                        target_identifier,
                        method,
                        uri,
                        e
                    );
                    Err(HttpClientError::ConnectionError(format!(
                        "Request to {method} {uri} failed: {e}"
                    )))
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use axum::{Router, routing::get};
    use http_body_util::BodyExt;
    use hyper::HeaderMap;
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        assert!(HttpClientAdapter::new().is_ok());
    }

    #[tokio::test]
    async fn test_uri_without_host_is_rejected() {
        let client = HttpClientAdapter::new().unwrap();
        let req = Request::get("/relative").body(AxumBody::empty()).unwrap();
        let result = client.send_request(req).await;
        assert!(matches!(result, Err(HttpClientError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClientAdapter::new().unwrap();
        let req = Request::get(format!("http://{addr}/"))
            .body(AxumBody::empty())
            .unwrap();
        let result = client.send_request(req).await;
        assert!(matches!(result, Err(HttpClientError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_forwards_host_and_drops_hop_by_hop() {
        let app = Router::new().route(
            "/echo",
            get(|headers: HeaderMap| async move {
                format!(
                    "{}|{}",
                    headers
                        .get(header::HOST)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or(""),
                    headers.contains_key("keep-alive")
                )
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let client = HttpClientAdapter::new().unwrap();
        let req = Request::get(format!("http://{addr}/echo"))
            .header(header::HOST, "proxy.local")
            .header("keep-alive", "timeout=5")
            .body(AxumBody::empty())
            .unwrap();
        let response = client.send_request(req).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, format!("{addr}|false"));
    }
}
