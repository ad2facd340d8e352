//! Auditor resolution and chain execution.
//!
//! Every auditor spec whose method / pattern filters match the request takes part.
//! For each event, the participating specs whose `kind` filter admits the event run
//! one after another in declaration order. Within a spec, the `chain` links run
//! first; each may replace the event or stop the spec altogether. Unless stopped, the
//! spec's own handler then receives the final event.
//!
//! A failing or panicking link or handler only ends the handling of its own spec.
use std::{panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;

use crate::{
    config::models::{AuditorSpec, Params, Selector},
    core::{
        audit::event::{AuditEvent, AuditKind, AuditOutcome, Auditor},
        pattern,
        pluggable::{PluggableSpec, ResolutionContext, Resolved},
        roles::BoxError,
        snapshot::RequestSnapshot,
    },
    error::ProxyResult,
    ports::remote_service::{RemoteService, RemoteVerdict},
};

/// A resolved auditor or chain link together with its params.
struct Handler {
    target: Resolved<dyn Auditor>,
    params: Params,
}

impl Handler {
    fn resolve(
        spec: &PluggableSpec<dyn Auditor>,
        ctx: &ResolutionContext,
    ) -> ProxyResult<Option<Self>> {
        Ok(ctx.resolve(spec)?.map(|target| Self {
            target,
            params: spec.params.clone(),
        }))
    }

    async fn invoke(
        &self,
        event: &AuditEvent,
        remote: &dyn RemoteService,
    ) -> Result<AuditOutcome, BoxError> {
        let mut event = event.clone();
        event.params = self.params.clone();

        match &self.target {
            Resolved::Local(auditor) => auditor.audit(&event).await,
            Resolved::Remote(url) => {
                let body = serde_json::to_value(&event)?;
                match remote.post_audit(url, &self.params, &body).await? {
                    RemoteVerdict::Continue => Ok(AuditOutcome::Unchanged),
                    RemoteVerdict::Stop => Ok(AuditOutcome::Stop),
                }
            }
        }
    }
}

struct ResolvedSpec {
    /// Position in the manifest, for log messages
    index: usize,
    kind: Selector<AuditKind>,
    chain: Vec<Handler>,
    handler: Option<Handler>,
}

impl ResolvedSpec {
    async fn run(&self, event: AuditEvent, remote: &dyn RemoteService) -> Result<(), BoxError> {
        let mut current = event;
        for link in &self.chain {
            match link.invoke(&current, remote).await? {
                AuditOutcome::Unchanged => {}
                AuditOutcome::Replace(replacement) => current = replacement,
                AuditOutcome::Stop => {
                    tracing::trace!(auditor = self.index, "Auditor chain stopped");
                    return Ok(());
                }
            }
        }

        if let Some(handler) = &self.handler {
            handler.invoke(&current, remote).await?;
        }
        Ok(())
    }
}

/// The auditors applicable to one request.
pub struct AuditPipeline {
    specs: Vec<ResolvedSpec>,
    remote: Arc<dyn RemoteService>,
}

impl AuditPipeline {
    /// Number of participating auditor specs.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Run every participating spec that handles `event.kind`, in declaration order.
    pub async fn dispatch(&self, event: AuditEvent) {
        for spec in self.specs.iter().filter(|s| s.kind.admits(&event.kind)) {
            let run = AssertUnwindSafe(spec.run(event.clone(), self.remote.as_ref()));
            match run.catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    auditor = spec.index,
                    kind = %event.kind,
                    "Auditor failed: {}",
                    e
                ),
                Err(_) => tracing::error!(
                    auditor = spec.index,
                    kind = %event.kind,
                    "Auditor panicked"
                ),
            }
        }
    }
}

/// Build the audit pipeline for `request`.
///
/// Returns `None` when no spec applies, so callers can skip all audit work.
pub async fn resolve_auditor(
    request: &RequestSnapshot,
    specs: &[AuditorSpec],
    ctx: &ResolutionContext,
) -> ProxyResult<Option<AuditPipeline>> {
    let mut resolved = Vec::new();

    for (index, spec) in specs.iter().enumerate() {
        if !spec.method.admits(&request.method) || !pattern::matches(&spec.pattern, request.path())
        {
            continue;
        }

        let chain = spec
            .chain
            .iter()
            .map(|link| Handler::resolve(link, ctx))
            .collect::<ProxyResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        let handler = Handler::resolve(&spec.source, ctx)?;

        if chain.is_empty() && handler.is_none() {
            tracing::debug!(auditor = index, "Auditor spec declares no handler, skipping");
            continue;
        }

        resolved.push(ResolvedSpec {
            index,
            kind: spec.kind.clone(),
            chain,
            handler,
        });
    }

    if resolved.is_empty() {
        return Ok(None);
    }

    Ok(Some(AuditPipeline {
        specs: resolved,
        remote: ctx.remote.clone(),
    }))
}
