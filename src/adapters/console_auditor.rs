//! Auditors that write events to the log.
//!
//! Registered as the `console` and `console-log` modules. Both log under the
//! `rulegate::audit` target and print the caller's roles when the spec sets
//! `params.log` to `"roles"`.
use async_trait::async_trait;

use crate::core::{
    audit::{AuditEvent, AuditOutcome, Auditor},
    roles::BoxError,
};

/// Logs one line per event, plus the abort reason and roles when present.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleAuditor {
    /// Log at debug level and leave out the abort reason
    quiet: bool,
}

impl ConsoleAuditor {
    /// The `console` auditor: info level, includes abort reasons.
    pub fn new() -> Self {
        Self { quiet: false }
    }

    /// The `console-log` auditor: debug level.
    pub fn debug() -> Self {
        Self { quiet: true }
    }

    /// The lines logged for `event`.
    pub fn lines(&self, event: &AuditEvent) -> Vec<String> {
        let indent = " ".repeat(event.kind.as_str().len());
        let mut lines = vec![format!(
            "{} rule: \"{}\", url: \"{}\"",
            event.kind, event.rule, event.request.uri
        )];
        match &event.reason {
            Some(reason) if !self.quiet => lines.push(format!("{indent} reason: {reason}")),
            _ => {}
        }
        if event.params.get("log").is_some_and(|v| v == "roles") {
            let roles: Vec<&str> = event.roles.iter().map(String::as_str).collect();
            lines.push(format!("{indent} roles: {}", roles.join(",")));
        }
        lines
    }
}

impl Default for ConsoleAuditor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Auditor for ConsoleAuditor {
    async fn audit(&self, event: &AuditEvent) -> Result<AuditOutcome, BoxError> {
        for line in self.lines(event) {
            if self.quiet {
                tracing::debug!(target: "rulegate::audit", id = %event.id, "{}", line);
            } else {
                tracing::info!(target: "rulegate::audit", id = %event.id, "{}", line);
            }
        }
        Ok(AuditOutcome::Unchanged)
    }
}
