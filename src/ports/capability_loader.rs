use std::sync::Arc;

use crate::core::{audit::Auditor, roles::RolesProvider};

/// CapabilityLoader defines the port for resolving a module locator to an
/// implementation of a pluggable capability
pub trait CapabilityLoader: Send + Sync + 'static {
    /// Look up the roles provider registered under `locator`
    fn roles_provider(&self, locator: &str) -> Option<Arc<dyn RolesProvider>>;

    /// Look up the auditor registered under `locator`
    fn auditor(&self, locator: &str) -> Option<Arc<dyn Auditor>>;
}
