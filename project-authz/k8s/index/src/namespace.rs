use ahash::AHashMap as HashMap;
use kubert::index::IndexClusterResource;
use parking_lot::RwLock;
use project_authz_core::{NamespaceLister, NamespaceVersion};
use project_authz_k8s_api::{self as k8s, ResourceExt};
use std::sync::Arc;

pub type SharedNamespaceIndex = Arc<RwLock<NamespaceIndex>>;

/// Holds every namespace in the cluster, keyed by name.
#[derive(Debug, Default)]
pub struct NamespaceIndex {
    by_name: HashMap<String, k8s::Namespace>,
}

/// Supports lookups against a shared namespace index.
#[derive(Clone, Debug)]
pub struct NamespaceReader(SharedNamespaceIndex);

// === impl NamespaceIndex ===

impl NamespaceIndex {
    pub fn shared() -> (NamespaceReader, SharedNamespaceIndex) {
        let index = Arc::new(RwLock::new(Self::default()));
        (NamespaceReader(index.clone()), index)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl IndexClusterResource<k8s::Namespace> for NamespaceIndex {
    fn apply(&mut self, ns: k8s::Namespace) {
        let name = ns.name_unchecked();
        tracing::trace!(%name, resource_version = ?k8s::resource_version(&ns), "Indexing namespace");
        self.by_name.insert(name, ns);
    }

    fn delete(&mut self, name: String) {
        tracing::trace!(%name, "Removing namespace");
        self.by_name.remove(&name);
    }
}

// === impl NamespaceReader ===

impl NamespaceLister for NamespaceReader {
    fn namespaces(&self) -> Vec<NamespaceVersion> {
        self.0
            .read()
            .by_name
            .iter()
            .map(|(name, ns)| NamespaceVersion {
                name: name.clone(),
                resource_version: k8s::resource_version(ns).unwrap_or_default(),
            })
            .collect()
    }

    fn namespace(&self, name: &str) -> Option<k8s::Namespace> {
        self.0.read().by_name.get(name).cloned()
    }
}
