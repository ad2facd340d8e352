//! Proxy orchestration.
//!
//! The `ProxyService` ties the manifest to the request path:
//! * maps the incoming request onto the target URL
//! * resolves roles and auditors concurrently
//! * selects the governing rule
//! * hands the request to the [`Forwarder`]
//!
//! The manifest is validated once at construction and shared read-only after that.
use std::{collections::HashMap, sync::Arc};

use axum::{body::Body as AxumBody, response::Response};
use hyper::{Request, Uri};

use crate::{
    adapters::{HttpClientAdapter, ModuleRegistry, ProcessEnv, ReqwestRemoteService},
    config::{ManifestValidator, models::Manifest},
    core::{
        audit::{AuditDispatcher, resolve_auditor},
        forwarder::{DEFAULT_MAX_BODY_SIZE, Forwarder},
        pluggable::ResolutionContext,
        roles::resolve_roles,
        rules::select_rule,
        snapshot::RequestSnapshot,
    },
    error::{ProxyError, ProxyResult},
    ports::{
        capability_loader::CapabilityLoader, environment::Environment, http_client::HttpClient,
        remote_service::RemoteService,
    },
};

/// Serves requests according to one manifest.
pub struct ProxyService {
    manifest: Arc<Manifest>,
    resolution: ResolutionContext,
    forwarder: Forwarder,
    dispatcher: AuditDispatcher,
}

impl ProxyService {
    /// Service with the default adapters: hyper client, built-in module registry,
    /// process environment and reqwest for remote services.
    pub fn new(manifest: Manifest) -> ProxyResult<Self> {
        Self::builder(manifest).build()
    }

    pub fn builder(manifest: Manifest) -> ProxyServiceBuilder {
        ProxyServiceBuilder {
            manifest,
            client: None,
            loader: None,
            env: None,
            remote: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The dispatcher delivering this service's audit events.
    pub fn dispatcher(&self) -> &AuditDispatcher {
        &self.dispatcher
    }

    /// Map a path tail and query onto the target: `{target}/{tail}?{query}`.
    pub fn target_uri(&self, tail: &str, query: Option<&str>) -> ProxyResult<Uri> {
        let mut url = format!(
            "{}/{}",
            self.manifest.target.trim_end_matches('/'),
            tail.trim_start_matches('/')
        );
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }
        url.parse::<Uri>()
            .map_err(|e| ProxyError::BadRequest(format!("Cannot map request to '{url}': {e}")))
    }

    /// Handle a request whose path below the mount point is `tail`.
    ///
    /// Returns `Ok(None)` when no rule applies, leaving the answer to the caller.
    pub async fn handle(
        &self,
        request: Request<AxumBody>,
        tail: &str,
    ) -> ProxyResult<Option<Response>> {
        let incoming = RequestSnapshot::of(&request);
        let uri = self.target_uri(tail, request.uri().query())?;

        let (mut parts, body) = request.into_parts();
        parts.uri = uri;
        let outgoing = RequestSnapshot::from_parts(&parts, None);

        let (roles, pipeline) = tokio::try_join!(
            resolve_roles(
                &incoming,
                self.manifest.roles_provider.as_ref(),
                &self.resolution
            ),
            resolve_auditor(&outgoing, &self.manifest.auditors, &self.resolution),
        )
        .inspect_err(|e| {
            tracing::error!(
                "Failed to resolve {} {}: {}",
                incoming.method,
                incoming.uri,
                e
            )
        })?;

        let Some(rule) = select_rule(
            &self.manifest.route_rules,
            &parts.method,
            parts.uri.path(),
            &roles,
        ) else {
            return Ok(None);
        };

        let sink = self.dispatcher.open(pipeline);
        let response = self
            .forwarder
            .forward(Request::from_parts(parts, body), rule, &roles, &sink)
            .await?;
        Ok(Some(response))
    }

    /// Wait for every queued audit event to be delivered.
    pub async fn shutdown(&self) {
        self.dispatcher.drain().await;
    }
}

/// Swaps the adapters used by a [`ProxyService`].
pub struct ProxyServiceBuilder {
    manifest: Manifest,
    client: Option<Arc<dyn HttpClient>>,
    loader: Option<Arc<dyn CapabilityLoader>>,
    env: Option<Arc<dyn Environment>>,
    remote: Option<Arc<dyn RemoteService>>,
    max_body_size: usize,
}

impl ProxyServiceBuilder {
    pub fn client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn CapabilityLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn env(mut self, env: Arc<dyn Environment>) -> Self {
        self.env = Some(env);
        self
    }

    /// Use a fixed set of variables instead of the process environment.
    pub fn vars(self, vars: HashMap<String, String>) -> Self {
        self.env(Arc::new(vars))
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteService>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Cap on request bodies buffered for auditing, in bytes.
    pub fn max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Validate the manifest and assemble the service.
    pub fn build(self) -> ProxyResult<ProxyService> {
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(ModuleRegistry::with_builtins()));
        ManifestValidator::validate(&self.manifest, loader.as_ref())
            .map_err(|e| ProxyError::Configuration(e.to_string()))?;

        let client = match self.client {
            Some(client) => client,
            None => Arc::new(HttpClientAdapter::new().map_err(|e| {
                ProxyError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?),
        };
        let env = self.env.unwrap_or_else(|| Arc::new(ProcessEnv));
        let remote = self
            .remote
            .unwrap_or_else(|| Arc::new(ReqwestRemoteService::default()));

        tracing::info!(
            upstream = %self.manifest.target,
            rules = self.manifest.route_rules.len(),
            auditors = self.manifest.auditors.len(),
            "Proxy service ready"
        );

        Ok(ProxyService {
            manifest: Arc::new(self.manifest),
            resolution: ResolutionContext {
                env: env.clone(),
                loader,
                remote,
            },
            forwarder: Forwarder::new(client, env).with_max_body_size(self.max_body_size),
            dispatcher: AuditDispatcher::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;
    use hyper::{Method, StatusCode};

    use super::*;
    use crate::{
        config::models::{AuditorSpec, RolesProviderSpec, RouteRule, Selector},
        core::{
            audit::{AuditEvent, AuditKind, AuditOutcome, auditor_fn},
            roles::{BoxError, roles_fn},
        },
        ports::http_client::HttpClientResult,
    };

    /// Answers 200 echoing the requested URI.
    #[derive(Default)]
    struct EchoClient {
        calls: Mutex<Vec<Uri>>,
    }

    #[async_trait]
    impl HttpClient for EchoClient {
        async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response> {
            self.calls.lock().unwrap().push(req.uri().clone());
            Ok((StatusCode::OK, req.uri().to_string()).into_response())
        }
    }

    fn demo_manifest() -> Manifest {
        Manifest::new("https://api.example.com/")
            .with_roles_provider(RolesProviderSpec::fixed(["domain:example.com"]))
            .with_rule(RouteRule::matching("/v1/files{/*}?").unwrap())
            .with_rule(
                RouteRule::matching("/v1/*")
                    .unwrap()
                    .with_role("domain:example.com")
                    .allowed(),
            )
    }

    fn service(manifest: Manifest, client: Arc<EchoClient>) -> ProxyService {
        ProxyService::builder(manifest)
            .client(client)
            .vars(HashMap::new())
            .build()
            .unwrap()
    }

    fn get(path: &str) -> Request<AxumBody> {
        Request::get(format!("http://proxy.local{path}"))
            .body(AxumBody::empty())
            .unwrap()
    }

    #[test]
    fn test_target_uri() {
        let proxy = service(Manifest::new("https://api.example.com/"), Arc::default());
        assert_eq!(
            proxy.target_uri("v1/models", Some("limit=2")).unwrap(),
            "https://api.example.com/v1/models?limit=2"
        );
        assert_eq!(
            proxy.target_uri("", None).unwrap(),
            "https://api.example.com/"
        );
    }

    #[test]
    fn test_invalid_manifest_is_configuration_error() {
        let result = ProxyService::builder(Manifest::new("not a url"))
            .client(Arc::new(EchoClient::default()))
            .build();
        assert!(matches!(result, Err(ProxyError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_allowed_request_is_forwarded_to_target() {
        let client = Arc::new(EchoClient::default());
        let proxy = service(demo_manifest(), client.clone());

        let response = proxy
            .handle(get("/v1/models?limit=2"), "v1/models")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            client.calls.lock().unwrap()[0],
            "https://api.example.com/v1/models?limit=2"
        );
    }

    #[tokio::test]
    async fn test_denied_and_unmatched_requests() {
        let client = Arc::new(EchoClient::default());
        let proxy = service(demo_manifest(), client.clone());

        let denied = proxy
            .handle(get("/v1/files/abc"), "v1/files/abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let unmatched = proxy.handle(get("/v2/models"), "v2/models").await.unwrap();
        assert!(unmatched.is_none());
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_role_failure_stops_before_rules() {
        let client = Arc::new(EchoClient::default());
        let manifest = demo_manifest().with_roles_provider(RolesProviderSpec::inline(roles_fn(
            |_, _| async { Err::<Option<Vec<String>>, BoxError>("directory offline".into()) },
        )));
        let proxy = service(manifest, client.clone());

        let result = proxy.handle(get("/v1/models"), "v1/models").await;
        assert!(matches!(result, Err(ProxyError::Resolution(_))));
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auditor_sees_outgoing_request_and_shutdown_drains() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let log = log.clone();
            auditor_fn(move |event: AuditEvent| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push((event.kind, event.request.uri.to_string()));
                    Ok(AuditOutcome::Unchanged)
                }
            })
        };
        let manifest = demo_manifest().with_auditor(
            AuditorSpec::inline(recorder).with_method(Selector::one(Method::GET)),
        );
        let proxy = service(manifest, Arc::default());

        let response = proxy
            .handle(get("/v1/models"), "v1/models")
            .await
            .unwrap()
            .unwrap();
        response.into_body().collect().await.unwrap();
        proxy.shutdown().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (AuditKind::Request, "https://api.example.com/v1/models".to_string()),
                (AuditKind::Response, "https://api.example.com/v1/models".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_auditor_failure_does_not_wait_for_roles() {
        // Roles never arrive, so only a concurrent auditor lookup can end the request
        let manifest = demo_manifest()
            .with_roles_provider(RolesProviderSpec::inline(roles_fn(|_, _| {
                std::future::pending::<Result<Option<Vec<String>>, BoxError>>()
            })))
            .with_auditor(AuditorSpec::module("${AUDIT_MODULE}"));
        let client = Arc::new(EchoClient::default());
        let proxy = ProxyService::builder(manifest)
            .client(client.clone())
            .vars(HashMap::from([(
                "AUDIT_MODULE".to_string(),
                "audit:missing".to_string(),
            )]))
            .build()
            .unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            proxy.handle(get("/v1/models"), "v1/models"),
        )
        .await
        .expect("auditor resolution was held up by role resolution");
        assert!(matches!(result, Err(ProxyError::Resolution(_))));
        assert!(client.calls.lock().unwrap().is_empty());
    }
}
