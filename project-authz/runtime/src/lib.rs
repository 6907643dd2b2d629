#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use project_authz_cache as cache;
pub use project_authz_core as core;
pub use project_authz_k8s_api as k8s;
pub use project_authz_k8s_index as index;

mod args;

pub use self::args::Args;

use std::sync::Arc;

/// Serves project discovery from an authorization cache.
#[derive(Clone, Debug)]
pub struct ProjectDiscover(Arc<cache::AuthorizationCache>);

impl ProjectDiscover {
    pub fn new(cache: Arc<cache::AuthorizationCache>) -> Self {
        Self(cache)
    }

    /// Waits until projects can be discovered, i.e. until the cache has been synchronized.
    pub async fn ready(&self) {
        self.0.ready().await
    }
}

#[async_trait::async_trait]
impl core::DiscoverProjects for ProjectDiscover {
    async fn list_projects(&self, user: &core::UserInfo) -> anyhow::Result<Vec<core::Namespace>> {
        Ok(self.0.list(user))
    }

    async fn watch_projects(
        &self,
        user: core::UserInfo,
        scope: core::Scope,
        include_existing: bool,
    ) -> anyhow::Result<core::ProjectStream> {
        let stream = self.0.watch(user, scope, include_existing);
        Ok(Box::pin(stream))
    }
}
