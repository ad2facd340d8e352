//! Forwarding of a request under its selected rule.
//!
//! A denying rule answers `403` on the spot. An allowing rule forwards the request
//! to the target with the rule's headers applied. When the request is audited the
//! exchange is tracked by a [`Lifecycle`]: exactly one of `response`, `error` or
//! `aborted` is emitted for it, whichever settles first.
use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use axum::{
    body::Body as AxumBody,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::{Request, StatusCode};

use crate::{
    config::models::RouteRule,
    core::{
        audit::{AuditContext, AuditKind, AuditSink},
        roles::RoleSet,
        snapshot::{RequestSnapshot, ResponseSnapshot},
        substitute::substitute_headers,
    },
    error::{ProxyError, ProxyResult},
    ports::{
        environment::Environment,
        http_client::{HttpClient, HttpClientError},
    },
};

const DISCONNECTED_BEFORE_RESPONSE: &str = "client disconnected before the response arrived";
const DISCONNECTED_DURING_BODY: &str = "client disconnected while the response body was streaming";

/// Largest request body buffered for auditing, in bytes
pub const DEFAULT_MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

/// Executes the decision of the selected rule.
#[derive(Clone)]
pub struct Forwarder {
    client: Arc<dyn HttpClient>,
    env: Arc<dyn Environment>,
    max_body_size: usize,
}

impl Forwarder {
    pub fn new(client: Arc<dyn HttpClient>, env: Arc<dyn Environment>) -> Self {
        Self {
            client,
            env,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Cap on the request body buffered when the exchange is audited.
    /// Larger bodies are rejected with `413` before anything is sent.
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Deny or forward `request` according to `rule`.
    ///
    /// `request` must already address the target. Events go to `sink`; a disabled
    /// sink skips all audit work, including buffering of the request body.
    pub async fn forward(
        &self,
        request: Request<AxumBody>,
        rule: &Arc<RouteRule>,
        roles: &RoleSet,
        sink: &AuditSink,
    ) -> ProxyResult<Response> {
        if !rule.allow {
            tracing::info!(rule = %rule, "Denied {} {}", request.method(), request.uri());
            if sink.is_enabled() {
                let ctx = AuditContext::new(roles.clone(), rule.clone(), RequestSnapshot::of(&request));
                sink.emit(ctx.event(AuditKind::Denied));
            }
            return Ok((StatusCode::FORBIDDEN, "Forbidden").into_response());
        }

        let (mut parts, body) = request.into_parts();
        parts.headers = substitute_headers(&rule.headers, &parts.headers, self.env.as_ref());

        if !sink.is_enabled() {
            let response = self
                .client
                .send_request(Request::from_parts(parts, body))
                .await?;
            return Ok(response);
        }

        let body = Limited::new(body, self.max_body_size)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    tracing::warn!(
                        "Request body of {} {} exceeds {} bytes",
                        parts.method,
                        parts.uri,
                        self.max_body_size
                    );
                    ProxyError::PayloadTooLarge(self.max_body_size)
                } else {
                    ProxyError::BadRequest(format!("Failed to read request body: {e}"))
                }
            })?
            .to_bytes();

        let ctx = AuditContext::new(
            roles.clone(),
            rule.clone(),
            RequestSnapshot::from_parts(&parts, Some(body.clone())),
        );
        sink.emit(ctx.event(AuditKind::Request));

        let lifecycle = Arc::new(Lifecycle::new(ctx, sink.clone()));
        let guard = AbortGuard::arm(lifecycle.clone());
        let result = self
            .client
            .send_request(Request::from_parts(parts, AxumBody::from(body)))
            .await;
        guard.disarm();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                lifecycle.fail(&e);
                return Err(e.into());
            }
        };

        let snapshot = ResponseSnapshot::of(&response);
        if response.body().is_end_stream() {
            lifecycle.respond(snapshot);
            return Ok(response);
        }

        let (parts, body) = response.into_parts();
        let body = AuditedBody {
            inner: body,
            response: Some(snapshot),
            lifecycle,
        };
        Ok(Response::from_parts(parts, AxumBody::new(body)))
    }
}

/// Settles an audited exchange exactly once.
struct Lifecycle {
    settled: AtomicBool,
    ctx: AuditContext,
    sink: AuditSink,
}

impl Lifecycle {
    fn new(ctx: AuditContext, sink: AuditSink) -> Self {
        Self {
            settled: AtomicBool::new(false),
            ctx,
            sink,
        }
    }

    /// True for the one caller that gets to settle the exchange.
    fn settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn respond(&self, response: ResponseSnapshot) {
        if self.settle() {
            let mut event = self.ctx.event(AuditKind::Response);
            event.response = Some(response);
            self.sink.emit(event);
        }
    }

    fn fail(&self, error: &HttpClientError) {
        if self.settle() {
            let mut event = self.ctx.event(AuditKind::Error);
            event.error = Some(error.to_string());
            self.sink.emit(event);
        }
    }

    fn abort(&self, reason: impl Into<String>) {
        if self.settle() {
            let reason = reason.into();
            tracing::debug!(id = %self.ctx.id, "Exchange aborted: {}", reason);
            let mut event = self.ctx.event(AuditKind::Aborted);
            event.reason = Some(reason);
            self.sink.emit(event);
        }
    }
}

/// Emits `aborted` if dropped while still armed, i.e. when the forwarding future
/// is cancelled during the outbound call.
struct AbortGuard(Option<Arc<Lifecycle>>);

impl AbortGuard {
    fn arm(lifecycle: Arc<Lifecycle>) -> Self {
        Self(Some(lifecycle))
    }

    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.0.take() {
            lifecycle.abort(DISCONNECTED_BEFORE_RESPONSE);
        }
    }
}

/// Passes the target's response body through unchanged, settling the exchange
/// when the body ends or is dropped unfinished.
struct AuditedBody {
    inner: AxumBody,
    /// Taken on completion
    response: Option<ResponseSnapshot>,
    lifecycle: Arc<Lifecycle>,
}

impl AuditedBody {
    fn complete(&mut self) {
        if let Some(response) = self.response.take() {
            self.lifecycle.respond(response);
        }
    }
}

impl Body for AuditedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(None) => this.complete(),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.complete(),
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!("Response stream from target failed: {}", e);
                this.lifecycle
                    .abort(format!("response stream from target failed: {e}"));
            }
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for AuditedBody {
    fn drop(&mut self) {
        self.lifecycle.abort(DISCONNECTED_DURING_BODY);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::Mutex,
        time::Duration,
    };

    use async_trait::async_trait;
    use futures_util::{StreamExt, stream};
    use hyper::{HeaderMap, Method};

    use super::*;
    use crate::{
        adapters::{ModuleRegistry, ReqwestRemoteService},
        config::models::AuditorSpec,
        core::{
            audit::{AuditDispatcher, AuditEvent, AuditOutcome, auditor_fn, resolve_auditor},
            pluggable::ResolutionContext,
        },
        ports::http_client::HttpClientResult,
    };

    type Seen = Arc<Mutex<Vec<(Method, String, HeaderMap, Bytes)>>>;

    /// Records what it is sent and answers with `reply`.
    struct StubClient {
        seen: Seen,
        reply: fn() -> HttpClientResult<Response>,
    }

    #[async_trait]
    impl HttpClient for StubClient {
        async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response> {
            let (parts, body) = req.into_parts();
            let body = body.collect().await.unwrap().to_bytes();
            self.seen
                .lock()
                .unwrap()
                .push((parts.method, parts.uri.to_string(), parts.headers, body));
            (self.reply)()
        }
    }

    /// Never answers.
    struct HangingClient;

    #[async_trait]
    impl HttpClient for HangingClient {
        async fn send_request(&self, _req: Request<AxumBody>) -> HttpClientResult<Response> {
            std::future::pending().await
        }
    }

    fn forwarder(client: impl HttpClient) -> Forwarder {
        let env = HashMap::from([("API_KEY".to_string(), "s3cr3t".to_string())]);
        Forwarder::new(Arc::new(client), Arc::new(env))
    }

    fn stub(reply: fn() -> HttpClientResult<Response>) -> (StubClient, Seen) {
        let seen = Seen::default();
        (
            StubClient {
                seen: seen.clone(),
                reply,
            },
            seen,
        )
    }

    fn ok_reply() -> HttpClientResult<Response> {
        Ok((StatusCode::OK, "hello").into_response())
    }

    async fn recording_sink(
        dispatcher: &AuditDispatcher,
        log: Arc<Mutex<Vec<AuditEvent>>>,
    ) -> AuditSink {
        let auditor = auditor_fn(move |event: AuditEvent| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(event);
                Ok(AuditOutcome::Unchanged)
            }
        });
        let ctx = ResolutionContext {
            env: Arc::new(HashMap::<String, String>::new()),
            loader: Arc::new(ModuleRegistry::new()),
            remote: Arc::new(ReqwestRemoteService::default()),
        };
        let request = RequestSnapshot::of(&Request::get("http://target/").body(()).unwrap());
        let pipeline = resolve_auditor(&request, &[AuditorSpec::inline(auditor)], &ctx)
            .await
            .unwrap();
        dispatcher.open(pipeline)
    }

    fn kinds(log: &Mutex<Vec<AuditEvent>>) -> Vec<AuditKind> {
        log.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    fn request() -> Request<AxumBody> {
        Request::builder()
            .method(Method::POST)
            .uri("http://target/v1/chat?stream=false")
            .header("x-caller", "test")
            .body(AxumBody::from("{\"q\":1}"))
            .unwrap()
    }

    fn allow_rule() -> Arc<RouteRule> {
        Arc::new(
            RouteRule::matching("/v1/*")
                .unwrap()
                .allowed()
                .with_header("Authorization", "Bearer ${API_KEY}"),
        )
    }

    #[tokio::test]
    async fn test_deny_answers_forbidden_and_audits() {
        let (client, seen) = stub(ok_reply);
        let dispatcher = AuditDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = recording_sink(&dispatcher, log.clone()).await;

        let rule = Arc::new(RouteRule::matching("/v1/files{/*}?").unwrap());
        let response = forwarder(client)
            .forward(request(), &rule, &RoleSet::new(), &sink)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(seen.lock().unwrap().is_empty());

        drop(sink);
        dispatcher.drain().await;
        let events = log.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditKind::Denied);
        assert_eq!(events[0].request.uri, "http://target/v1/chat?stream=false");
    }

    #[tokio::test]
    async fn test_allow_forwards_with_substituted_headers() {
        let (client, seen) = stub(ok_reply);

        let response = forwarder(client)
            .forward(request(), &allow_rule(), &RoleSet::new(), &AuditSink::disabled())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "hello");

        let seen = seen.lock().unwrap();
        let (method, uri, headers, body) = &seen[0];
        assert_eq!(method, Method::POST);
        assert_eq!(uri, "http://target/v1/chat?stream=false");
        assert_eq!(headers["authorization"], "Bearer s3cr3t");
        assert_eq!(headers["x-caller"], "test");
        assert_eq!(body, "{\"q\":1}");
    }

    #[tokio::test]
    async fn test_audited_exchange_emits_request_then_response() {
        let (client, seen) = stub(|| {
            let body = AxumBody::from_stream(stream::iter(vec![
                Ok::<_, std::io::Error>(Bytes::from("hel")),
                Ok(Bytes::from("lo")),
            ]));
            Ok(Response::new(body))
        });
        let dispatcher = AuditDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = recording_sink(&dispatcher, log.clone()).await;

        let response = forwarder(client)
            .forward(request(), &allow_rule(), &RoleSet::new(), &sink)
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "hello");
        assert_eq!(seen.lock().unwrap()[0].3, "{\"q\":1}");

        drop(sink);
        dispatcher.drain().await;
        assert_eq!(kinds(&log), vec![AuditKind::Request, AuditKind::Response]);

        let events = log.lock().unwrap();
        assert_eq!(events[0].request.body.as_deref(), Some(&b"{\"q\":1}"[..]));
        assert_eq!(events[0].request.headers["authorization"], "Bearer s3cr3t");
        assert_eq!(events[1].response.as_ref().unwrap().status, StatusCode::OK);
        assert_eq!(events[0].id, events[1].id);
    }

    #[tokio::test]
    async fn test_upstream_failure_emits_error() {
        let (client, _) = stub(|| Err(HttpClientError::ConnectionError("refused".into())));
        let dispatcher = AuditDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = recording_sink(&dispatcher, log.clone()).await;

        let result = forwarder(client)
            .forward(request(), &allow_rule(), &RoleSet::new(), &sink)
            .await;
        assert!(matches!(result, Err(ProxyError::Upstream(_))));

        drop(sink);
        dispatcher.drain().await;
        assert_eq!(kinds(&log), vec![AuditKind::Request, AuditKind::Error]);
        assert!(log.lock().unwrap()[1].error.as_deref().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_body_dropped_mid_stream_emits_aborted() {
        let (client, _) = stub(|| {
            let chunks = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from("partial"))])
                .chain(stream::pending());
            Ok(Response::new(AxumBody::from_stream(chunks)))
        });
        let dispatcher = AuditDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = recording_sink(&dispatcher, log.clone()).await;

        let response = forwarder(client)
            .forward(request(), &allow_rule(), &RoleSet::new(), &sink)
            .await
            .unwrap();
        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), "partial");
        drop(body);

        drop(sink);
        dispatcher.drain().await;
        assert_eq!(kinds(&log), vec![AuditKind::Request, AuditKind::Aborted]);
        assert_eq!(
            log.lock().unwrap()[1].reason.as_deref(),
            Some(DISCONNECTED_DURING_BODY)
        );
    }

    #[tokio::test]
    async fn test_cancelled_fetch_emits_aborted() {
        let dispatcher = AuditDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = recording_sink(&dispatcher, log.clone()).await;

        let forwarder = forwarder(HangingClient);
        let rule = allow_rule();
        let roles = RoleSet::new();
        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            forwarder.forward(request(), &rule, &roles, &sink),
        )
        .await;
        assert!(outcome.is_err());

        drop(sink);
        dispatcher.drain().await;
        assert_eq!(kinds(&log), vec![AuditKind::Request, AuditKind::Aborted]);
        assert_eq!(
            log.lock().unwrap()[1].reason.as_deref(),
            Some(DISCONNECTED_BEFORE_RESPONSE)
        );
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_before_sending() {
        let (client, seen) = stub(ok_reply);
        let dispatcher = AuditDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = recording_sink(&dispatcher, log.clone()).await;

        let oversized = Request::post("http://target/v1/files")
            .body(AxumBody::from(vec![b'x'; 64]))
            .unwrap();
        let result = forwarder(client)
            .with_max_body_size(16)
            .forward(oversized, &allow_rule(), &RoleSet::new(), &sink)
            .await;
        match result {
            Err(e @ ProxyError::PayloadTooLarge(16)) => {
                assert_eq!(e.status_code(), StatusCode::PAYLOAD_TOO_LARGE)
            }
            other => panic!("expected PayloadTooLarge, got {other:?}"),
        }
        assert!(seen.lock().unwrap().is_empty());

        drop(sink);
        dispatcher.drain().await;
        assert!(kinds(&log).is_empty());
    }

    #[tokio::test]
    async fn test_body_within_cap_is_forwarded() {
        let (client, seen) = stub(ok_reply);
        let dispatcher = AuditDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = recording_sink(&dispatcher, log.clone()).await;

        let response = forwarder(client)
            .with_max_body_size(7)
            .forward(request(), &allow_rule(), &RoleSet::new(), &sink)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(seen.lock().unwrap()[0].3, "{\"q\":1}");
    }

    #[tokio::test]
    async fn test_empty_response_settles_immediately() {
        let (client, _) = stub(|| Ok(StatusCode::NO_CONTENT.into_response()));
        let dispatcher = AuditDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = recording_sink(&dispatcher, log.clone()).await;

        let response = forwarder(client)
            .forward(request(), &allow_rule(), &RoleSet::new(), &sink)
            .await
            .unwrap();
        // never read
        drop(response);

        drop(sink);
        dispatcher.drain().await;
        assert_eq!(kinds(&log), vec![AuditKind::Request, AuditKind::Response]);
    }
}
