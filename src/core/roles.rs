//! Role resolution.
//!
//! The roles of a request come from the manifest's `rolesProvider`, in order of
//! precedence: a static `as` list, an inline function, a registered module, a
//! remote service. A failure of any dynamic source fails the request; it is never
//! read as "no roles".
use std::{collections::BTreeSet, future::Future, sync::Arc};

use async_trait::async_trait;

use crate::{
    config::models::{Params, Role, RolesProviderSpec},
    core::{
        pluggable::{ResolutionContext, Resolved},
        snapshot::RequestSnapshot,
    },
    error::{ProxyError, ProxyResult},
};

/// Boxed error returned by user supplied capabilities.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The roles held by a caller. Order is irrelevant.
pub type RoleSet = BTreeSet<Role>;

/// Provides the roles determined from an incoming request.
#[async_trait]
pub trait RolesProvider: Send + Sync {
    /// # Arguments
    /// * `request` - The incoming request
    /// * `params` - The `params` of the declaring spec
    ///
    /// # Returns
    /// The caller's roles, or `None` when the provider has no answer
    async fn provide_roles(
        &self,
        request: &RequestSnapshot,
        params: &Params,
    ) -> Result<Option<Vec<Role>>, BoxError>;
}

/// Adapts an async closure into a [`RolesProvider`].
pub struct FnRolesProvider<F>(F);

#[async_trait]
impl<F, Fut> RolesProvider for FnRolesProvider<F>
where
    F: Fn(RequestSnapshot, Params) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Vec<Role>>, BoxError>> + Send,
{
    async fn provide_roles(
        &self,
        request: &RequestSnapshot,
        params: &Params,
    ) -> Result<Option<Vec<Role>>, BoxError> {
        (self.0)(request.clone(), params.clone()).await
    }
}

/// Wrap an async closure as a shareable roles provider.
pub fn roles_fn<F, Fut>(f: F) -> Arc<dyn RolesProvider>
where
    F: Fn(RequestSnapshot, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Vec<Role>>, BoxError>> + Send + 'static,
{
    Arc::new(FnRolesProvider(f))
}

/// Determine the roles of `request` according to `spec`.
pub async fn resolve_roles(
    request: &RequestSnapshot,
    spec: Option<&RolesProviderSpec>,
    ctx: &ResolutionContext,
) -> ProxyResult<RoleSet> {
    let Some(spec) = spec else {
        return Ok(RoleSet::new());
    };

    if let Some(roles) = &spec.as_roles {
        return Ok(roles.iter().cloned().collect());
    }

    let params = &spec.source.params;
    let roles = match ctx.resolve(&spec.source)? {
        None => None,
        Some(Resolved::Local(provider)) => provider
            .provide_roles(request, params)
            .await
            .map_err(|e| ProxyError::Resolution(format!("Roles provider failed: {e}")))?,
        Some(Resolved::Remote(url)) => ctx
            .remote
            .fetch_roles(&url, params, &request.headers)
            .await
            .map_err(|e| ProxyError::Resolution(e.to_string()))?,
    };

    let roles: RoleSet = roles.unwrap_or_default().into_iter().collect();
    tracing::debug!(?roles, "Resolved roles for {} {}", request.method, request.uri);
    Ok(roles)
}
