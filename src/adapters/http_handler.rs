use std::sync::Arc;

use axum::{
    Router,
    body::Body as AxumBody,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
};
use hyper::Request;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{core::ProxyService, tracing_setup::create_request_span};

/// Shared state of the proxy route.
#[derive(Clone)]
struct RouteState {
    proxy: Arc<ProxyService>,
    /// Mount point without trailing slash; empty for `/`
    mount: Arc<str>,
}

impl RouteState {
    /// The part of `path` below the mount point, without leading slash.
    fn tail<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(&*self.mount)
            .unwrap_or(path)
            .trim_start_matches('/')
    }
}

/// Router forwarding everything below `mount` according to the proxy's manifest.
///
/// `{mount}/{path}?{query}` is mapped to `{target}/{path}?{query}`. Requests no rule
/// applies to, and requests outside the mount point, get a 404.
pub fn proxy_route(mount: &str, proxy: Arc<ProxyService>) -> Router {
    let mount = mount.trim_end_matches('/');
    let state = RouteState {
        proxy,
        mount: Arc::from(mount),
    };

    let mut router = Router::new()
        .route(&format!("{mount}/{{*path}}"), any(proxy_handler))
        .route(&format!("{mount}/"), any(proxy_handler));
    if !mount.is_empty() {
        router = router.route(mount, any(proxy_handler));
    }

    router
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<AxumBody>| {
            create_request_span(
                req.method().as_str(),
                req.uri().path(),
                &Uuid::new_v4().to_string(),
            )
        }))
}

async fn proxy_handler(State(state): State<RouteState>, req: Request<AxumBody>) -> Response {
    let tail = state.tail(req.uri().path()).to_string();
    match state.proxy.handle(req, &tail).await {
        Ok(Some(response)) => response,
        Ok(None) => not_found().await,
        Err(e) => {
            tracing::warn!("Request failed: {}", e);
            e.into_response()
        }
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::Mutex,
    };

    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::models::{Manifest, RolesProviderSpec, RouteRule},
        ports::http_client::{HttpClient, HttpClientResult},
    };

    #[derive(Default)]
    struct RecordingClient {
        uris: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response> {
            self.uris.lock().unwrap().push(req.uri().to_string());
            Ok((StatusCode::OK, "proxied").into_response())
        }
    }

    fn router(mount: &str, client: Arc<RecordingClient>) -> Router {
        let manifest = Manifest::new("http://target.local/base")
            .with_roles_provider(RolesProviderSpec::fixed(["domain:example.com"]))
            .with_rule(RouteRule::matching("/base/v1/files{/*}?").unwrap())
            .with_rule(
                RouteRule::matching("/base/v1/*")
                    .unwrap()
                    .with_role("domain:example.com")
                    .allowed(),
            );
        let proxy = ProxyService::builder(manifest)
            .client(client)
            .vars(HashMap::new())
            .build()
            .unwrap();
        proxy_route(mount, Arc::new(proxy))
    }

    async fn call(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::get(uri).body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_root_mount_maps_path_and_query() {
        let client = Arc::new(RecordingClient::default());
        let (status, body) = call(router("/", client.clone()), "/v1/models?limit=1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "proxied");
        assert_eq!(
            *client.uris.lock().unwrap(),
            vec!["http://target.local/base/v1/models?limit=1"]
        );
    }

    #[tokio::test]
    async fn test_nested_mount() {
        let client = Arc::new(RecordingClient::default());
        let (status, _) = call(router("/api/", client.clone()), "/api/v1/chat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            *client.uris.lock().unwrap(),
            vec!["http://target.local/base/v1/chat"]
        );

        let (status, _) = call(router("/api", client.clone()), "/other/v1/chat").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_denied_and_unmatched() {
        let client = Arc::new(RecordingClient::default());

        let (status, body) = call(router("/", client.clone()), "/v1/files/abc").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Forbidden");

        let (status, _) = call(router("/", client.clone()), "/v2/anything").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(client.uris.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tail() {
        let state = |mount: &str| RouteState {
            proxy: Arc::new(
                ProxyService::builder(Manifest::new("http://target.local"))
                    .client(Arc::new(RecordingClient::default()))
                    .build()
                    .unwrap(),
            ),
            mount: Arc::from(mount),
        };
        assert_eq!(state("").tail("/v1/models"), "v1/models");
        assert_eq!(state("/api").tail("/api/v1/models"), "v1/models");
        assert_eq!(state("/api").tail("/api"), "");
    }
}
