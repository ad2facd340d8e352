//! Resolution of pluggable capabilities.
//!
//! A capability declared in the manifest comes from exactly one source, picked by
//! fixed precedence: an inline function, then a module locator (looked up through
//! the [`CapabilityLoader`] port), then a remote service URL. Roles providers add
//! a static list in front of these (see [`crate::core::roles`]).
//!
//! Module and service locators may contain `${VAR}` placeholders. A locator that is
//! empty after substitution is treated as absent, so `module: "${ROLES_MODULE}"`
//! falls through to `service` when the variable is unset.
use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    config::models::Params,
    core::{audit::Auditor, roles::RolesProvider, substitute::substitute},
    error::{ProxyError, ProxyResult},
    ports::{
        capability_loader::CapabilityLoader, environment::Environment,
        remote_service::RemoteService,
    },
};

/// The collaborators needed to resolve capabilities at request time.
#[derive(Clone)]
pub struct ResolutionContext {
    pub env: Arc<dyn Environment>,
    pub loader: Arc<dyn CapabilityLoader>,
    pub remote: Arc<dyn RemoteService>,
}

/// A capability signature that can be looked up by module locator.
pub trait Capability: Send + Sync + 'static {
    /// Human readable name used in error messages.
    const NAME: &'static str;

    fn load(loader: &dyn CapabilityLoader, locator: &str) -> Option<Arc<Self>>;
}

impl Capability for dyn RolesProvider {
    const NAME: &'static str = "roles provider";

    fn load(loader: &dyn CapabilityLoader, locator: &str) -> Option<Arc<Self>> {
        loader.roles_provider(locator)
    }
}

impl Capability for dyn Auditor {
    const NAME: &'static str = "auditor";

    fn load(loader: &dyn CapabilityLoader, locator: &str) -> Option<Arc<Self>> {
        loader.auditor(locator)
    }
}

/// Declaration of a pluggable function.
///
/// `C` is the capability trait object, e.g. `dyn RolesProvider`.
#[derive(Serialize, Deserialize)]
#[serde(bound(deserialize = ""))]
pub struct PluggableSpec<C: ?Sized> {
    /// In-process implementation; takes precedence over `module` and `service`
    #[serde(skip)]
    pub inline: Option<Arc<C>>,
    /// Locator of a registered implementation; takes precedence over `service`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// URL of an external HTTP service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Passed to the function or service on every call
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
}

impl<C: ?Sized> Default for PluggableSpec<C> {
    fn default() -> Self {
        Self {
            inline: None,
            module: None,
            service: None,
            params: Params::new(),
        }
    }
}

impl<C: ?Sized> Clone for PluggableSpec<C> {
    fn clone(&self) -> Self {
        Self {
            inline: self.inline.clone(),
            module: self.module.clone(),
            service: self.service.clone(),
            params: self.params.clone(),
        }
    }
}

impl<C: ?Sized> fmt::Debug for PluggableSpec<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluggableSpec")
            .field("inline", &self.inline.as_ref().map(|_| "<fn>"))
            .field("module", &self.module)
            .field("service", &self.service)
            .field("params", &self.params)
            .finish()
    }
}

impl<C: ?Sized> PluggableSpec<C> {
    pub fn inline(capability: Arc<C>) -> Self {
        Self {
            inline: Some(capability),
            ..Default::default()
        }
    }

    pub fn module(locator: impl Into<String>) -> Self {
        Self {
            module: Some(locator.into()),
            ..Default::default()
        }
    }

    pub fn service(url: impl Into<String>) -> Self {
        Self {
            service: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// True if no source is declared at all.
    pub fn is_empty(&self) -> bool {
        self.inline.is_none() && self.module.is_none() && self.service.is_none()
    }
}

/// A capability after resolution.
pub enum Resolved<C: ?Sized> {
    /// Callable in-process (inline or loaded from a module)
    Local(Arc<C>),
    /// URL of a remote service, placeholders already substituted
    Remote(String),
}

impl<C: ?Sized> Clone for Resolved<C> {
    fn clone(&self) -> Self {
        match self {
            Resolved::Local(capability) => Resolved::Local(capability.clone()),
            Resolved::Remote(url) => Resolved::Remote(url.clone()),
        }
    }
}

impl<C: ?Sized> fmt::Debug for Resolved<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Local(_) => f.write_str("Local(<fn>)"),
            Resolved::Remote(url) => f.debug_tuple("Remote").field(url).finish(),
        }
    }
}

impl<C: ?Sized + Capability> PluggableSpec<C> {
    /// Resolve this spec to a callable, honouring source precedence.
    ///
    /// Returns `Ok(None)` when no source is declared. A module locator with no
    /// registered implementation is a resolution error.
    pub fn resolve(
        &self,
        env: &dyn Environment,
        loader: &dyn CapabilityLoader,
    ) -> ProxyResult<Option<Resolved<C>>> {
        if let Some(inline) = &self.inline {
            return Ok(Some(Resolved::Local(inline.clone())));
        }

        if let Some(module) = self.module.as_deref() {
            let locator = substitute(module, env);
            if !locator.is_empty() {
                return match C::load(loader, &locator) {
                    Some(capability) => Ok(Some(Resolved::Local(capability))),
                    None => Err(ProxyError::Resolution(format!(
                        "No {} module registered for '{locator}'",
                        C::NAME
                    ))),
                };
            }
        }

        if let Some(service) = self.service.as_deref() {
            let url = substitute(service, env);
            if !url.is_empty() {
                return Ok(Some(Resolved::Remote(url)));
            }
        }

        Ok(None)
    }
}

impl ResolutionContext {
    /// Resolve `spec` against this context's environment and loader.
    pub fn resolve<C: ?Sized + Capability>(
        &self,
        spec: &PluggableSpec<C>,
    ) -> ProxyResult<Option<Resolved<C>>> {
        spec.resolve(self.env.as_ref(), self.loader.as_ref())
    }
}
