#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod rbac;

pub use k8s_openapi::api::{self, core::v1::Namespace};
pub use kube::{
    api::{ObjectMeta, Resource, ResourceExt},
    runtime::watcher,
};

pub use self::rbac::{ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject};

/// Returns the resource version of an object, if it has been persisted.
///
/// Resource versions are opaque: they may only be compared for equality.
pub fn resource_version<T: ResourceExt>(obj: &T) -> Option<String> {
    obj.meta().resource_version.clone()
}

/// Builds a `Namespace` that carries nothing but its name.
///
/// Used to describe namespaces that are no longer present in the cluster.
pub fn namespace_named(name: impl ToString) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_version_is_read_from_metadata() {
        let mut ns = namespace_named("foo");
        assert_eq!(resource_version(&ns), None);
        ns.metadata.resource_version = Some("42".to_string());
        assert_eq!(resource_version(&ns).as_deref(), Some("42"));
        assert_eq!(ns.name_unchecked(), "foo");
    }
}
