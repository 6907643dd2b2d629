use crate::{
    cache::{AuthorizationCache, CacheMetrics},
    core::PermissionLister,
    index::{self, NamespaceIndex, RbacIndex, RbacReviewer, ReviewAccess},
    k8s::{self, watcher},
    ProjectDiscover,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{num::NonZeroUsize, sync::Arc};
use tokio::time::Duration;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "project-authz",
    about = "Indexes the projects each user may access"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "project_authz=info,warn",
        env = "PROJECT_AUTHZ_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The number of seconds between synchronizations of the authorization cache.
    #[clap(
        long = "sync-period",
        default_value = "1",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    sync_period_secs: u64,

    /// The number of events each project watch may buffer before it is terminated.
    #[clap(long, default_value = "1000")]
    watch_queue_capacity: NonZeroUsize,

    /// The verb a subject must be granted on a namespace to see it as a project.
    #[clap(long, default_value = "get")]
    review_verb: String,

    /// The resource a subject must be granted access to on a namespace to see it as a project.
    #[clap(long, default_value = "namespaces")]
    review_resource: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            sync_period_secs,
            watch_queue_capacity,
            review_verb,
            review_resource,
        } = self;

        // Build the mirrors that the authorization cache reads from.
        let (namespaces, namespace_index) = NamespaceIndex::shared();
        let (permissions, rbac_index) = RbacIndex::shared();

        let mut prom = <Registry>::default();
        let cache_metrics =
            CacheMetrics::register(prom.sub_registry_with_prefix("authorization_cache"));
        index::metrics::register(
            prom.sub_registry_with_prefix("authorization_index"),
            namespace_index.clone(),
            rbac_index.clone(),
        );
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches.

        let nss = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(namespace_index, nss).instrument(info_span!("namespaces")),
        );

        let roles = runtime.watch_all::<k8s::Role>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(rbac_index.clone(), roles).instrument(info_span!("roles")),
        );

        let role_bindings = runtime.watch_all::<k8s::RoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(rbac_index.clone(), role_bindings)
                .instrument(info_span!("rolebindings")),
        );

        let cluster_roles = runtime.watch_all::<k8s::ClusterRole>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(rbac_index.clone(), cluster_roles)
                .instrument(info_span!("clusterroles")),
        );

        let cluster_role_bindings =
            runtime.watch_all::<k8s::ClusterRoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(rbac_index.clone(), cluster_role_bindings)
                .instrument(info_span!("clusterrolebindings")),
        );

        let reviewer = RbacReviewer::new(
            rbac_index,
            ReviewAccess {
                verb: review_verb,
                resource: review_resource,
            },
        );
        let cache = Arc::new(
            AuthorizationCache::new(
                Arc::new(namespaces),
                [Arc::new(permissions) as Arc<dyn PermissionLister>],
                Arc::new(reviewer),
                cache_metrics,
            )
            .with_watch_queue_capacity(watch_queue_capacity.get()),
        );
        let discover = ProjectDiscover::new(cache.clone());

        // Spawn the synchronizer, the only writer of the cache's indexes.
        tokio::spawn(
            synchronize(
                cache,
                Duration::from_secs(sync_period_secs),
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("authorization_cache")),
        );

        // The admin server does not report ready until project discovery is ready.
        let initialized = runtime.initialized_handle();
        tokio::spawn(
            async move {
                discover.ready().await;
                drop(initialized);
            }
            .instrument(info_span!("readiness")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn synchronize(cache: Arc<AuthorizationCache>, period: Duration, drain: drain::Watch) {
    info!(?period, "Synchronizing authorization cache");
    tokio::select! {
        _ = AuthorizationCache::run(cache, period) => {}
        _ = drain.signaled() => {
            tracing::debug!("Stopping synchronization");
        }
    }
}
