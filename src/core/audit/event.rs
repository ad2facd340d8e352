use std::{fmt, future::Future, str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    config::models::{Params, RouteRule},
    core::{
        roles::{BoxError, RoleSet},
        snapshot::{RequestSnapshot, ResponseSnapshot},
    },
};

/// The kinds of actions that are audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A request was denied by an `allow: false` rule
    Denied,
    /// An allowed request is about to be forwarded
    Request,
    /// The target's response completed
    Response,
    /// The forwarded call failed
    Error,
    /// The caller went away before the exchange completed
    Aborted,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Denied => "denied",
            AuditKind::Request => "request",
            AuditKind::Response => "response",
            AuditKind::Error => "error",
            AuditKind::Aborted => "aborted",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "denied" => Ok(AuditKind::Denied),
            "request" => Ok(AuditKind::Request),
            "response" => Ok(AuditKind::Response),
            "error" => Ok(AuditKind::Error),
            "aborted" => Ok(AuditKind::Aborted),
            other => Err(format!("unknown audit kind '{other}'")),
        }
    }
}

/// One proxy lifecycle occurrence.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Shared by every event of the same request
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub roles: RoleSet,
    /// The rule that triggered the action
    pub rule: Arc<RouteRule>,
    /// Incoming request for `denied`, outgoing request otherwise
    pub request: Arc<RequestSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSnapshot>,
    /// Set for `error` only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set for `aborted` only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The `params` of the auditor being invoked
    pub params: Params,
}

/// The per-request facts shared by all of its audit events.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub id: Uuid,
    pub roles: RoleSet,
    pub rule: Arc<RouteRule>,
    pub request: Arc<RequestSnapshot>,
}

impl AuditContext {
    pub fn new(roles: RoleSet, rule: Arc<RouteRule>, request: RequestSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            roles,
            rule,
            request: Arc::new(request),
        }
    }

    /// A bare event of `kind` for this request.
    pub fn event(&self, kind: AuditKind) -> AuditEvent {
        AuditEvent {
            id: self.id,
            timestamp: Utc::now(),
            kind,
            roles: self.roles.clone(),
            rule: self.rule.clone(),
            request: self.request.clone(),
            response: None,
            error: None,
            reason: None,
            params: Params::new(),
        }
    }
}

/// What an auditor asks of the rest of its chain.
#[derive(Debug, Clone)]
pub enum AuditOutcome {
    /// Pass the event on unchanged
    Unchanged,
    /// Pass this event on instead
    Replace(AuditEvent),
    /// Stop: no further chain link, nor the spec's own handler, sees this event
    Stop,
}

/// Handles audit events emitted by the proxy.
#[async_trait]
pub trait Auditor: Send + Sync {
    async fn audit(&self, event: &AuditEvent) -> Result<AuditOutcome, BoxError>;
}

/// Adapts an async closure into an [`Auditor`].
pub struct FnAuditor<F>(F);

#[async_trait]
impl<F, Fut> Auditor for FnAuditor<F>
where
    F: Fn(AuditEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AuditOutcome, BoxError>> + Send,
{
    async fn audit(&self, event: &AuditEvent) -> Result<AuditOutcome, BoxError> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure as a shareable auditor.
pub fn auditor_fn<F, Fut>(f: F) -> Arc<dyn Auditor>
where
    F: Fn(AuditEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AuditOutcome, BoxError>> + Send + 'static,
{
    Arc::new(FnAuditor(f))
}

#[cfg(test)]
mod tests {
    use hyper::Request;

    use super::*;

    #[test]
    fn test_kind_round_trip_names() {
        for kind in [
            AuditKind::Denied,
            AuditKind::Request,
            AuditKind::Response,
            AuditKind::Error,
            AuditKind::Aborted,
        ] {
            assert_eq!(kind.as_str().parse::<AuditKind>(), Ok(kind));
        }
        assert!("forwarded".parse::<AuditKind>().is_err());
    }

    #[test]
    fn test_events_share_request_id() {
        let request = RequestSnapshot::of(&Request::get("http://t/v1").body(()).unwrap());
        let ctx = AuditContext::new(RoleSet::new(), Arc::new(RouteRule::default()), request);

        let first = ctx.event(AuditKind::Request);
        let second = ctx.event(AuditKind::Response);
        assert_eq!(first.id, second.id);
        assert_eq!(second.kind, AuditKind::Response);

        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["kind"], "request");
        assert_eq!(json["rule"]["pattern"], "*");
        assert!(json.get("response").is_none());
    }
}
