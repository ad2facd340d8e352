//! The audit pipeline: events, auditors, chains and their delivery.
pub mod dispatch;
pub mod event;
pub mod pipeline;

pub use dispatch::{AuditDispatcher, AuditSink};
pub use event::{
    AuditContext, AuditEvent, AuditKind, AuditOutcome, Auditor, FnAuditor, auditor_fn,
};
pub use pipeline::{AuditPipeline, resolve_auditor};
