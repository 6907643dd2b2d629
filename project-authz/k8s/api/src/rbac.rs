pub use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};

/// The API group of RBAC role references.
pub const API_GROUP: &str = "rbac.authorization.k8s.io";

pub const KIND_ROLE: &str = "Role";
pub const KIND_CLUSTER_ROLE: &str = "ClusterRole";

pub const SUBJECT_USER: &str = "User";
pub const SUBJECT_GROUP: &str = "Group";
pub const SUBJECT_SERVICE_ACCOUNT: &str = "ServiceAccount";

/// Matches any verb, resource, API group, or resource name in a policy rule.
pub const WILDCARD: &str = "*";

/// Formats the user name that Kubernetes authenticates a service account as.
pub fn service_account_user(namespace: &str, name: &str) -> String {
    format!("system:serviceaccount:{namespace}:{name}")
}
