use std::{collections::HashMap, sync::Arc};

use crate::{
    adapters::console_auditor::ConsoleAuditor,
    core::{audit::Auditor, roles::RolesProvider},
    ports::capability_loader::CapabilityLoader,
};

/// Maps module locators to in-process implementations.
///
/// Roles providers and auditors live in separate namespaces, so the same locator
/// may name one of each.
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    roles_providers: HashMap<String, Arc<dyn RolesProvider>>,
    auditors: HashMap<String, Arc<dyn Auditor>>,
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `console` and `console-log` auditors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_auditor("console", Arc::new(ConsoleAuditor::new()));
        registry.register_auditor("console-log", Arc::new(ConsoleAuditor::debug()));
        registry
    }

    /// Register a roles provider, replacing any previous one under `locator`.
    pub fn register_roles_provider(
        &mut self,
        locator: impl Into<String>,
        provider: Arc<dyn RolesProvider>,
    ) -> &mut Self {
        let locator = locator.into();
        tracing::debug!("Registered roles provider module '{}'", locator);
        self.roles_providers.insert(locator, provider);
        self
    }

    /// Register an auditor, replacing any previous one under `locator`.
    pub fn register_auditor(
        &mut self,
        locator: impl Into<String>,
        auditor: Arc<dyn Auditor>,
    ) -> &mut Self {
        let locator = locator.into();
        tracing::debug!("Registered auditor module '{}'", locator);
        self.auditors.insert(locator, auditor);
        self
    }
}

impl CapabilityLoader for ModuleRegistry {
    fn roles_provider(&self, locator: &str) -> Option<Arc<dyn RolesProvider>> {
        self.roles_providers.get(locator).cloned()
    }

    fn auditor(&self, locator: &str) -> Option<Arc<dyn Auditor>> {
        self.auditors.get(locator).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::roles::roles_fn;

    #[test]
    fn test_builtins() {
        let registry = ModuleRegistry::with_builtins();
        assert!(registry.auditor("console").is_some());
        assert!(registry.auditor("console-log").is_some());
        assert!(registry.auditor("missing").is_none());
        assert!(registry.roles_provider("console").is_none());
    }

    #[test]
    fn test_separate_namespaces() {
        let mut registry = ModuleRegistry::new();
        registry.register_roles_provider("acme", roles_fn(|_, _| async { Ok(None) }));
        assert!(registry.roles_provider("acme").is_some());
        assert!(registry.auditor("acme").is_none());
    }
}
