use crate::Namespace;

/// Identifies a permission-defining object.
///
/// Cluster-scoped objects have no namespace; a change to any of them affects every namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub kind: &'static str,
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceVersion {
    pub name: String,
    pub resource_version: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionVersion {
    pub id: ResourceId,
    pub resource_version: String,
}

/// A local, up-to-date view of the cluster's namespaces.
pub trait NamespaceLister: Send + Sync {
    fn namespaces(&self) -> Vec<NamespaceVersion>;

    fn namespace(&self, name: &str) -> Option<Namespace>;
}

/// A local, up-to-date view of a collection of permission-defining objects.
pub trait PermissionLister: Send + Sync {
    fn permissions(&self) -> Vec<PermissionVersion>;
}

// === impl ResourceId ===

impl ResourceId {
    pub fn namespaced(kind: &'static str, namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(kind: &'static str, name: impl ToString) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_none()
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}.{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}
