//! Rulegate - a manifest-driven reverse proxy with access rules and auditing.
//!
//! Rulegate forwards requests to a single target service. Every request is checked
//! against an ordered list of **route rules** (URL pattern, method and role); the first
//! applicable rule decides whether it is forwarded, and which headers are injected into
//! the outgoing request. Unmatched requests are left to the caller (the router answers
//! 404).
//!
//! # Features
//! - Ordered route rules with URLPattern-style pathname patterns
//! - Pluggable role resolution: fixed roles, in-process functions, registered modules
//!   or a remote HTTP service
//! - `${VAR}` placeholders in header templates and locators, filled from the environment
//! - Auditing of `denied`, `request`, `response`, `error` and `aborted` events through
//!   chainable auditors; exactly one of `response`, `error` or `aborted` per forwarded request
//! - Manifests in YAML, JSON or TOML, with validation
//! - Structured tracing via `tracing` and graceful shutdown that drains pending audits
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use rulegate::{Manifest, ProxyService, RolesProviderSpec, RouteRule, proxy_route};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let manifest = Manifest::new("https://api.example.com")
//!     .with_roles_provider(RolesProviderSpec::fixed(["domain:example.com"]))
//!     .with_rule(
//!         RouteRule::matching("/v1/*")?
//!             .with_role("domain:example.com")
//!             .with_header("Authorization", "Bearer ${API_KEY}")
//!             .allowed(),
//!     );
//! let proxy = Arc::new(ProxyService::new(manifest)?);
//! let app = proxy_route("/", proxy);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! axum::serve(listener, app).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the rule and audit logic inside `core`. Prefer the re-exports below over reaching into
//! internal modules directly.
//!
//! # Error Handling
//! Library operations return [`ProxyError`]; the binary and the manifest loader use
//! `eyre::Result<T>` with context attached through `WrapErr`.
pub mod config;
pub mod error;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{ConsoleAuditor, HttpClientAdapter, ModuleRegistry, ProcessEnv, proxy_route},
    config::{AuditorSpec, Manifest, ManifestValidator, RolesProviderSpec, RouteRule, Selector},
    core::{
        AuditEvent, AuditKind, AuditOutcome, Auditor, ProxyService, ProxyServiceBuilder,
        RoleSet, RolesProvider, auditor_fn, roles_fn,
    },
    error::{ProxyError, ProxyResult},
    ports::http_client::HttpClient,
    utils::{GracefulShutdown, ShutdownReason},
};
