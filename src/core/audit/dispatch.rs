//! Delivery of audit events off the request path.
//!
//! Each audited request gets its own unbounded queue drained by a single worker
//! task, so the events of one request reach the auditors in emission order while
//! emission itself never waits on an auditor. Workers are spawned on a
//! [`TaskTracker`], letting shutdown wait for queued events to be delivered.
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use crate::core::audit::{AuditEvent, AuditPipeline};

/// Spawns and tracks per-request audit workers.
#[derive(Clone, Default)]
pub struct AuditDispatcher {
    tracker: TaskTracker,
}

impl AuditDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a sink for one request. Without a pipeline the sink is disabled and
    /// no worker is spawned.
    pub fn open(&self, pipeline: Option<AuditPipeline>) -> AuditSink {
        let Some(pipeline) = pipeline else {
            return AuditSink::disabled();
        };

        let pipeline = Arc::new(pipeline);
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEvent>();
        self.tracker.spawn(async move {
            while let Some(event) = rx.recv().await {
                pipeline.dispatch(event).await;
            }
        });

        AuditSink { tx: Some(tx) }
    }

    /// Number of workers still delivering events.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every queued event has been delivered.
    ///
    /// Workers finish once the last sink of their request is dropped.
    pub async fn drain(&self) {
        self.tracker.close();
        tracing::info!("Draining {} audit worker(s)", self.tracker.len());
        self.tracker.wait().await;
        tracing::info!("Audit workers drained");
    }
}

/// The emitting end of a request's audit queue.
#[derive(Clone, Default)]
pub struct AuditSink {
    tx: Option<mpsc::UnboundedSender<AuditEvent>>,
}

impl AuditSink {
    /// A sink that drops everything; used when no auditor applies.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue `event` for delivery. Never blocks.
    pub fn emit(&self, event: AuditEvent) {
        if let Some(tx) = &self.tx {
            let kind = event.kind;
            if tx.send(event).is_err() {
                tracing::warn!(%kind, "Audit worker gone, event dropped");
            }
        }
    }
}
