use crate::rbac::SharedRbacIndex;
use project_authz_core::{Review, ReviewError, Reviewer};
use project_authz_k8s_api::{self as k8s, rbac, ResourceExt};
use std::collections::BTreeSet;

/// The access a subject must hold on a namespace in order to see it as a project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewAccess {
    pub verb: String,
    pub resource: String,
}

/// Answers reviews by evaluating the indexed RBAC bindings.
#[derive(Clone, Debug)]
pub struct RbacReviewer {
    index: SharedRbacIndex,
    access: ReviewAccess,
}

#[derive(Debug, Default)]
struct Subjects {
    users: BTreeSet<String>,
    groups: BTreeSet<String>,
    errors: Vec<String>,
}

// === impl ReviewAccess ===

impl Default for ReviewAccess {
    fn default() -> Self {
        Self {
            verb: "get".to_string(),
            resource: "namespaces".to_string(),
        }
    }
}

impl ReviewAccess {
    /// Indicates whether the rule grants this access on the named namespace.
    ///
    /// Namespaces belong to the core API group, so only rules for the core group (or any group)
    /// apply.
    fn is_granted_by(&self, rule: &k8s::PolicyRule, namespace: &str) -> bool {
        fn matches(values: &[String], value: &str) -> bool {
            values.iter().any(|v| v == rbac::WILDCARD || v == value)
        }

        let api_groups = rule.api_groups.as_deref().unwrap_or_default();
        let resources = rule.resources.as_deref().unwrap_or_default();
        let names = rule.resource_names.as_deref().unwrap_or_default();

        matches(&rule.verbs, &self.verb)
            && matches(api_groups, "")
            && matches(resources, &self.resource)
            && (names.is_empty() || names.iter().any(|n| n == namespace))
    }
}

// === impl RbacReviewer ===

impl RbacReviewer {
    pub fn new(index: SharedRbacIndex, access: ReviewAccess) -> Self {
        Self { index, access }
    }
}

impl Reviewer for RbacReviewer {
    fn review(&self, namespace: &str) -> Result<Review, ReviewError> {
        let index = self.index.read();
        let mut subjects = Subjects::default();

        if let Some(bindings) = index.role_bindings.get(namespace) {
            for binding in bindings.values() {
                match index.rules(Some(namespace), &binding.role_ref) {
                    Some(rules) => {
                        if rules.iter().any(|r| self.access.is_granted_by(r, namespace)) {
                            subjects.extend(namespace, binding.subjects.as_deref());
                        }
                    }
                    None => subjects.errors.push(format!(
                        "RoleBinding {namespace}/{}: {} {} not found",
                        binding.name_unchecked(),
                        binding.role_ref.kind,
                        binding.role_ref.name,
                    )),
                }
            }
        }

        for binding in index.cluster_role_bindings.values() {
            match index.rules(None, &binding.role_ref) {
                Some(rules) => {
                    if rules.iter().any(|r| self.access.is_granted_by(r, namespace)) {
                        // Service account subjects of cluster bindings must name their namespace.
                        subjects.extend("", binding.subjects.as_deref());
                    }
                }
                None => subjects.errors.push(format!(
                    "ClusterRoleBinding {}: {} {} not found",
                    binding.name_unchecked(),
                    binding.role_ref.kind,
                    binding.role_ref.name,
                )),
            }
        }

        let Subjects {
            users,
            groups,
            errors,
        } = subjects;
        if !errors.is_empty() {
            tracing::debug!(%namespace, ?errors, "Partial review");
        }
        Ok(Review {
            users: users.into_iter().collect(),
            groups: groups.into_iter().collect(),
            evaluation_error: (!errors.is_empty()).then(|| errors.join("; ")),
        })
    }
}

// === impl Subjects ===

impl Subjects {
    fn extend(&mut self, binding_ns: &str, subjects: Option<&[k8s::Subject]>) {
        for subject in subjects.unwrap_or_default() {
            match subject.kind.as_str() {
                rbac::SUBJECT_USER => {
                    self.users.insert(subject.name.clone());
                }
                rbac::SUBJECT_GROUP => {
                    self.groups.insert(subject.name.clone());
                }
                rbac::SUBJECT_SERVICE_ACCOUNT => {
                    let ns = subject.namespace.as_deref().unwrap_or(binding_ns);
                    if ns.is_empty() {
                        self.errors.push(format!(
                            "ServiceAccount {} has no namespace",
                            subject.name
                        ));
                        continue;
                    }
                    self.users
                        .insert(rbac::service_account_user(ns, &subject.name));
                }
                kind => self.errors.push(format!("unknown subject kind {kind}")),
            }
        }
    }
}
