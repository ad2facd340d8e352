pub mod audit;
pub mod forwarder;
pub mod pattern;
pub mod pluggable;
pub mod proxy;
pub mod roles;
pub mod rules;
pub mod snapshot;
pub mod substitute;

pub use audit::{AuditEvent, AuditKind, AuditOutcome, Auditor, auditor_fn};
pub use forwarder::Forwarder;
pub use pattern::RoutePattern;
pub use proxy::{ProxyService, ProxyServiceBuilder};
pub use roles::{RoleSet, RolesProvider, roles_fn};
