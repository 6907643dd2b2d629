use crate::{
    rbac::{KIND_CLUSTER_ROLE_BINDING, KIND_ROLE_BINDING},
    NamespaceIndex, RbacIndex, RbacReviewer, ReviewAccess,
};
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use parking_lot::RwLock;
use project_authz_core::{NamespaceLister, PermissionLister, ResourceId, Reviewer};
use project_authz_k8s_api::{self as k8s, rbac};
use std::sync::Arc;

#[test]
fn namespaces_are_listed_with_versions() {
    let _tracing = init_tracing();
    let (reader, index) = NamespaceIndex::shared();

    apply_cluster(&index, mk_ns("foo", "1"));
    apply_cluster(&index, mk_ns("bar", "2"));
    let mut listed = reader
        .namespaces()
        .into_iter()
        .map(|ns| (ns.name, ns.resource_version))
        .collect::<Vec<_>>();
    listed.sort();
    assert_eq!(
        listed,
        vec![
            ("bar".to_string(), "2".to_string()),
            ("foo".to_string(), "1".to_string())
        ]
    );

    apply_cluster(&index, mk_ns("foo", "3"));
    assert_eq!(
        reader.namespace("foo").and_then(|ns| k8s::resource_version(&ns)),
        Some("3".to_string())
    );

    IndexClusterResource::<k8s::Namespace>::delete(&mut *index.write(), "foo".to_string());
    assert!(reader.namespace("foo").is_none());
    assert_eq!(reader.namespaces().len(), 1);
}

#[test]
fn permissions_are_scoped() {
    let _tracing = init_tracing();
    let (reader, index) = RbacIndex::shared();

    apply_namespaced(
        &index,
        mk_role_binding(
            "foo",
            "viewers",
            rbac::KIND_CLUSTER_ROLE,
            "view",
            vec![mk_subject(rbac::SUBJECT_USER, "bob", None)],
        ),
    );
    apply_cluster(
        &index,
        mk_cluster_role_binding(
            "admins",
            "admin",
            vec![mk_subject(rbac::SUBJECT_GROUP, "system:admins", None)],
        ),
    );

    let mut permissions = reader
        .permissions()
        .into_iter()
        .map(|p| (p.id, p.resource_version))
        .collect::<Vec<_>>();
    permissions.sort();
    assert_eq!(
        permissions,
        vec![
            (
                ResourceId::cluster(KIND_CLUSTER_ROLE_BINDING, "admins"),
                "1".to_string()
            ),
            (
                ResourceId::namespaced(KIND_ROLE_BINDING, "foo", "viewers"),
                "1".to_string()
            ),
        ]
    );

    IndexNamespacedResource::<k8s::RoleBinding>::delete(
        &mut *index.write(),
        "foo".to_string(),
        "viewers".to_string(),
    );
    assert_eq!(reader.permissions().len(), 1);
    assert!(index.read().role_bindings.is_empty());
}

#[test]
fn role_binding_grants_namespace_access() {
    let _tracing = init_tracing();
    let (_, index) = RbacIndex::shared();
    apply_namespaced(
        &index,
        mk_role(
            "foo",
            "namespace-reader",
            vec![mk_rule(&["get", "list"], &["namespaces"], &[])],
        ),
    );
    apply_namespaced(
        &index,
        mk_role_binding(
            "foo",
            "readers",
            rbac::KIND_ROLE,
            "namespace-reader",
            vec![
                mk_subject(rbac::SUBJECT_USER, "bob", None),
                mk_subject(rbac::SUBJECT_GROUP, "employee", None),
                mk_subject(rbac::SUBJECT_SERVICE_ACCOUNT, "builder", None),
            ],
        ),
    );

    let reviewer = RbacReviewer::new(index, ReviewAccess::default());
    let review = reviewer.review("foo").expect("review must succeed");
    assert_eq!(
        review.users,
        vec!["bob".to_string(), "system:serviceaccount:foo:builder".to_string()]
    );
    assert_eq!(review.groups, vec!["employee".to_string()]);
    assert_eq!(review.evaluation_error, None);

    // The binding doesn't apply to other namespaces.
    let review = reviewer.review("bar").expect("review must succeed");
    assert!(review.users.is_empty());
    assert!(review.groups.is_empty());
}

#[test]
fn cluster_role_binding_grants_all_namespaces() {
    let _tracing = init_tracing();
    let (_, index) = RbacIndex::shared();
    apply_cluster(
        &index,
        mk_cluster_role("cluster-reader", vec![mk_rule(&["*"], &["*"], &[])]),
    );
    apply_cluster(
        &index,
        mk_cluster_role_binding(
            "cluster-readers",
            "cluster-reader",
            vec![
                mk_subject(rbac::SUBJECT_GROUP, "system:cluster-readers", None),
                mk_subject(rbac::SUBJECT_SERVICE_ACCOUNT, "monitor", Some("infra")),
            ],
        ),
    );

    let reviewer = RbacReviewer::new(index, ReviewAccess::default());
    for ns in ["foo", "bar"] {
        let review = reviewer.review(ns).expect("review must succeed");
        assert_eq!(review.groups, vec!["system:cluster-readers".to_string()]);
        assert_eq!(
            review.users,
            vec!["system:serviceaccount:infra:monitor".to_string()]
        );
    }
}

#[test]
fn rules_must_match_verb_resource_and_name() {
    let _tracing = init_tracing();
    let (_, index) = RbacIndex::shared();
    apply_cluster(
        &index,
        mk_cluster_role(
            "pod-reader",
            vec![mk_rule(&["get"], &["pods"], &[])],
        ),
    );
    apply_cluster(
        &index,
        mk_cluster_role(
            "namespace-writer",
            vec![mk_rule(&["update"], &["namespaces"], &[])],
        ),
    );
    apply_cluster(
        &index,
        mk_cluster_role(
            "foo-reader",
            vec![mk_rule(&["get"], &["namespaces"], &["foo"])],
        ),
    );
    for (binding, role, user) in [
        ("pods", "pod-reader", "alice"),
        ("writers", "namespace-writer", "mallory"),
        ("foo", "foo-reader", "bob"),
    ] {
        apply_cluster(
            &index,
            mk_cluster_role_binding(
                binding,
                role,
                vec![mk_subject(rbac::SUBJECT_USER, user, None)],
            ),
        );
    }

    let reviewer = RbacReviewer::new(index, ReviewAccess::default());
    assert_eq!(
        reviewer.review("foo").expect("review must succeed").users,
        vec!["bob".to_string()]
    );
    assert!(reviewer
        .review("bar")
        .expect("review must succeed")
        .users
        .is_empty());
}

#[test]
fn missing_role_is_a_partial_result() {
    let _tracing = init_tracing();
    let (_, index) = RbacIndex::shared();
    apply_cluster(
        &index,
        mk_cluster_role("view", vec![mk_rule(&["get"], &["namespaces"], &[])]),
    );
    apply_namespaced(
        &index,
        mk_role_binding(
            "foo",
            "viewers",
            rbac::KIND_CLUSTER_ROLE,
            "view",
            vec![mk_subject(rbac::SUBJECT_USER, "bob", None)],
        ),
    );
    apply_namespaced(
        &index,
        mk_role_binding(
            "foo",
            "dangling",
            rbac::KIND_ROLE,
            "deleted",
            vec![mk_subject(rbac::SUBJECT_USER, "alice", None)],
        ),
    );

    let reviewer = RbacReviewer::new(index, ReviewAccess::default());
    let review = reviewer.review("foo").expect("review must succeed");
    assert_eq!(review.users, vec!["bob".to_string()]);
    let error = review.evaluation_error.expect("evaluation error must be set");
    assert!(error.contains("RoleBinding foo/dangling"), "{error}");
}

fn apply_namespaced<I, T>(index: &Arc<RwLock<I>>, resource: T)
where
    I: IndexNamespacedResource<T>,
{
    index.write().apply(resource);
}

fn apply_cluster<I, T>(index: &Arc<RwLock<I>>, resource: T)
where
    I: IndexClusterResource<T>,
{
    index.write().apply(resource);
}

fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .finish(),
    )
}

fn mk_meta(ns: Option<&str>, name: &str) -> k8s::ObjectMeta {
    k8s::ObjectMeta {
        namespace: ns.map(ToString::to_string),
        name: Some(name.to_string()),
        resource_version: Some("1".to_string()),
        ..Default::default()
    }
}

fn mk_ns(name: &str, resource_version: &str) -> k8s::Namespace {
    k8s::Namespace {
        metadata: k8s::ObjectMeta {
            name: Some(name.to_string()),
            resource_version: Some(resource_version.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn mk_rule(verbs: &[&str], resources: &[&str], names: &[&str]) -> k8s::PolicyRule {
    let strings = |v: &[&str]| v.iter().map(ToString::to_string).collect::<Vec<_>>();
    k8s::PolicyRule {
        api_groups: Some(vec!["".to_string()]),
        resources: Some(strings(resources)),
        resource_names: (!names.is_empty()).then(|| strings(names)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

fn mk_role(ns: &str, name: &str, rules: Vec<k8s::PolicyRule>) -> k8s::Role {
    k8s::Role {
        metadata: mk_meta(Some(ns), name),
        rules: Some(rules),
    }
}

fn mk_cluster_role(name: &str, rules: Vec<k8s::PolicyRule>) -> k8s::ClusterRole {
    k8s::ClusterRole {
        metadata: mk_meta(None, name),
        rules: Some(rules),
        ..Default::default()
    }
}

fn mk_subject(kind: &str, name: &str, ns: Option<&str>) -> k8s::Subject {
    k8s::Subject {
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: ns.map(ToString::to_string),
        ..Default::default()
    }
}

fn mk_role_ref(kind: &str, name: &str) -> k8s::RoleRef {
    k8s::RoleRef {
        api_group: rbac::API_GROUP.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn mk_role_binding(
    ns: &str,
    name: &str,
    role_kind: &str,
    role: &str,
    subjects: Vec<k8s::Subject>,
) -> k8s::RoleBinding {
    k8s::RoleBinding {
        metadata: mk_meta(Some(ns), name),
        role_ref: mk_role_ref(role_kind, role),
        subjects: Some(subjects),
    }
}

fn mk_cluster_role_binding(
    name: &str,
    role: &str,
    subjects: Vec<k8s::Subject>,
) -> k8s::ClusterRoleBinding {
    k8s::ClusterRoleBinding {
        metadata: mk_meta(None, name),
        role_ref: mk_role_ref(rbac::KIND_CLUSTER_ROLE, role),
        subjects: Some(subjects),
    }
}
