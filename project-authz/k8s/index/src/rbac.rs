use ahash::AHashMap as HashMap;
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use parking_lot::RwLock;
use project_authz_core::{PermissionLister, PermissionVersion, ResourceId};
use project_authz_k8s_api::{self as k8s, rbac, ResourceExt};
use std::sync::Arc;

pub type SharedRbacIndex = Arc<RwLock<RbacIndex>>;

pub const KIND_ROLE: &str = "Role";
pub const KIND_ROLE_BINDING: &str = "RoleBinding";
pub const KIND_CLUSTER_ROLE: &str = "ClusterRole";
pub const KIND_CLUSTER_ROLE_BINDING: &str = "ClusterRoleBinding";

/// Holds the cluster's RBAC objects.
///
/// Roles and role bindings are scoped to a namespace, whereas cluster roles and cluster role
/// bindings apply cluster-wide.
#[derive(Debug, Default)]
pub struct RbacIndex {
    pub(crate) roles: HashMap<String, HashMap<String, k8s::Role>>,
    pub(crate) role_bindings: HashMap<String, HashMap<String, k8s::RoleBinding>>,
    pub(crate) cluster_roles: HashMap<String, k8s::ClusterRole>,
    pub(crate) cluster_role_bindings: HashMap<String, k8s::ClusterRoleBinding>,
}

/// Lists the versions of all indexed RBAC objects.
#[derive(Clone, Debug)]
pub struct RbacReader(SharedRbacIndex);

// === impl RbacIndex ===

impl RbacIndex {
    pub fn shared() -> (RbacReader, SharedRbacIndex) {
        let index = Arc::new(RwLock::new(Self::default()));
        (RbacReader(index.clone()), index)
    }

    /// Returns the number of indexed objects of the given kind.
    pub fn size(&self, kind: &str) -> usize {
        match kind {
            KIND_ROLE => self.roles.values().map(|m| m.len()).sum(),
            KIND_ROLE_BINDING => self.role_bindings.values().map(|m| m.len()).sum(),
            KIND_CLUSTER_ROLE => self.cluster_roles.len(),
            KIND_CLUSTER_ROLE_BINDING => self.cluster_role_bindings.len(),
            _ => 0,
        }
    }

    /// Returns the rules of the role referenced from a binding in `namespace`.
    ///
    /// Role bindings may refer to a `Role` in their own namespace or to a `ClusterRole`; cluster
    /// role bindings may only refer to a `ClusterRole` (and pass no namespace).
    pub(crate) fn rules(
        &self,
        namespace: Option<&str>,
        role_ref: &k8s::RoleRef,
    ) -> Option<&[k8s::PolicyRule]> {
        if role_ref.api_group != rbac::API_GROUP {
            return None;
        }
        let rules = match (role_ref.kind.as_str(), namespace) {
            (rbac::KIND_ROLE, Some(ns)) => self.roles.get(ns)?.get(&role_ref.name)?.rules.as_ref(),
            (rbac::KIND_CLUSTER_ROLE, _) => self.cluster_roles.get(&role_ref.name)?.rules.as_ref(),
            _ => return None,
        };
        Some(rules.map(Vec::as_slice).unwrap_or_default())
    }
}

fn insert_namespaced<T: ResourceExt>(
    index: &mut HashMap<String, HashMap<String, T>>,
    kind: &'static str,
    resource: T,
) {
    let Some(namespace) = resource.namespace() else {
        tracing::warn!(%kind, name = %resource.name_unchecked(), "Ignoring resource without a namespace");
        return;
    };
    let name = resource.name_unchecked();
    tracing::trace!(%kind, %namespace, %name, "Indexing");
    index.entry(namespace).or_default().insert(name, resource);
}

fn remove_namespaced<T>(
    index: &mut HashMap<String, HashMap<String, T>>,
    kind: &'static str,
    namespace: String,
    name: String,
) {
    tracing::trace!(%kind, %namespace, %name, "Removing");
    if let Some(by_name) = index.get_mut(&namespace) {
        by_name.remove(&name);
        if by_name.is_empty() {
            index.remove(&namespace);
        }
    }
}

impl IndexNamespacedResource<k8s::Role> for RbacIndex {
    fn apply(&mut self, role: k8s::Role) {
        insert_namespaced(&mut self.roles, KIND_ROLE, role);
    }

    fn delete(&mut self, namespace: String, name: String) {
        remove_namespaced(&mut self.roles, KIND_ROLE, namespace, name);
    }
}

impl IndexNamespacedResource<k8s::RoleBinding> for RbacIndex {
    fn apply(&mut self, binding: k8s::RoleBinding) {
        insert_namespaced(&mut self.role_bindings, KIND_ROLE_BINDING, binding);
    }

    fn delete(&mut self, namespace: String, name: String) {
        remove_namespaced(&mut self.role_bindings, KIND_ROLE_BINDING, namespace, name);
    }
}

impl IndexClusterResource<k8s::ClusterRole> for RbacIndex {
    fn apply(&mut self, role: k8s::ClusterRole) {
        let name = role.name_unchecked();
        tracing::trace!(kind = %KIND_CLUSTER_ROLE, %name, "Indexing");
        self.cluster_roles.insert(name, role);
    }

    fn delete(&mut self, name: String) {
        tracing::trace!(kind = %KIND_CLUSTER_ROLE, %name, "Removing");
        self.cluster_roles.remove(&name);
    }
}

impl IndexClusterResource<k8s::ClusterRoleBinding> for RbacIndex {
    fn apply(&mut self, binding: k8s::ClusterRoleBinding) {
        let name = binding.name_unchecked();
        tracing::trace!(kind = %KIND_CLUSTER_ROLE_BINDING, %name, "Indexing");
        self.cluster_role_bindings.insert(name, binding);
    }

    fn delete(&mut self, name: String) {
        tracing::trace!(kind = %KIND_CLUSTER_ROLE_BINDING, %name, "Removing");
        self.cluster_role_bindings.remove(&name);
    }
}

// === impl RbacReader ===

impl RbacReader {
    pub fn index(&self) -> &SharedRbacIndex {
        &self.0
    }
}

impl PermissionLister for RbacReader {
    fn permissions(&self) -> Vec<PermissionVersion> {
        fn namespaced<'a, T: ResourceExt>(
            kind: &'static str,
            index: &'a HashMap<String, HashMap<String, T>>,
        ) -> impl Iterator<Item = PermissionVersion> + 'a {
            index.iter().flat_map(move |(ns, by_name)| {
                by_name.iter().map(move |(name, obj)| PermissionVersion {
                    id: ResourceId::namespaced(kind, ns, name),
                    resource_version: k8s::resource_version(obj).unwrap_or_default(),
                })
            })
        }

        fn cluster<'a, T: ResourceExt>(
            kind: &'static str,
            index: &'a HashMap<String, T>,
        ) -> impl Iterator<Item = PermissionVersion> + 'a {
            index.iter().map(move |(name, obj)| PermissionVersion {
                id: ResourceId::cluster(kind, name),
                resource_version: k8s::resource_version(obj).unwrap_or_default(),
            })
        }

        let index = self.0.read();
        namespaced(KIND_ROLE, &index.roles)
            .chain(namespaced(KIND_ROLE_BINDING, &index.role_bindings))
            .chain(cluster(KIND_CLUSTER_ROLE, &index.cluster_roles))
            .chain(cluster(KIND_CLUSTER_ROLE_BINDING, &index.cluster_role_bindings))
            .collect()
    }
}
