use crate::{cache::AuthorizationCache, subjects::Subjects};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::RwLock;
use project_authz_core::{PermissionVersion, ResourceId};
use std::{collections::BTreeMap, time::Instant};

/// State that is only accessed by the synchronizer.
#[derive(Debug, Default)]
pub(crate) struct SyncState {
    /// The most recent successful review of each namespace.
    pub reviews: HashMap<String, ReviewRecord>,

    /// The resource versions of cluster-wide permission objects observed by the last pass.
    cluster_versions: HashMap<ResourceId, String>,
}

/// Describes what may have changed about a namespace since it was last reviewed.
#[derive(Debug)]
pub(crate) struct ReviewRequest {
    namespace: String,
    namespace_version: Option<String>,
    permission_versions: HashMap<ResourceId, String>,

    /// Permission objects that were recorded for this namespace but no longer exist.
    removed: HashSet<ResourceId>,
}

/// The outcome of a namespace's last review and the resource versions it was based on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ReviewRecord {
    pub namespace_version: Option<String>,
    pub permission_versions: HashMap<ResourceId, String>,
    pub users: HashSet<String>,
    pub groups: HashSet<String>,
}

/// The subject indexes being updated by a pass.
///
/// An incremental pass updates the live indexes in place, taking the write lock only briefly for
/// each change. A full rebuild populates fresh indexes that replace the live ones when the pass
/// completes.
enum Working<'a> {
    Live(&'a RwLock<Subjects>),
    Fresh(Subjects),
}

// === impl AuthorizationCache ===

impl AuthorizationCache {
    /// Brings the subject indexes up to date with the namespace and permission mirrors.
    ///
    /// Namespaces are only reviewed when they have never been reviewed, or when a resource version
    /// relevant to them has changed. Any change to a cluster-wide permission object invalidates
    /// every prior review.
    pub fn synchronize(&self) {
        let start = Instant::now();
        let mut state = self.state.lock();
        let SyncState {
            reviews,
            cluster_versions,
        } = &mut *state;

        let permissions = self
            .permissions
            .iter()
            .flat_map(|lister| lister.permissions())
            .collect::<Vec<_>>();

        let observed = permissions
            .iter()
            .filter(|p| p.id.is_cluster_scoped())
            .map(|p| (p.id.clone(), p.resource_version.clone()))
            .collect::<HashMap<_, _>>();
        let full_rebuild = *cluster_versions != observed;
        if full_rebuild {
            tracing::info!(
                permissions = observed.len(),
                "Cluster-wide permissions changed; rebuilding"
            );
            self.metrics.full_rebuild();
            *cluster_versions = observed;
        }

        let (mut subjects, previous) = if full_rebuild {
            (
                Working::Fresh(Subjects::default()),
                Some(std::mem::take(reviews)),
            )
        } else {
            (Working::Live(&self.subjects), None)
        };

        let (requests, namespaces) = self.requests(permissions, reviews);
        for request in requests.into_values() {
            self.sync_request(&mut subjects, reviews, request);
        }

        self.purge(&namespaces, &mut subjects, reviews, previous);

        if let Working::Fresh(fresh) = subjects {
            *self.subjects.write() = fresh;
        }

        let sizes = {
            let subjects = self.subjects.read();
            (subjects.users.len(), subjects.groups.len(), reviews.len())
        };
        self.metrics.synced(start.elapsed(), sizes);
        tracing::debug!(
            full_rebuild,
            users = sizes.0,
            groups = sizes.1,
            namespaces = sizes.2,
            "Synchronized"
        );
        self.mark_ready();
    }

    /// Builds one review request per namespace, returning the requests along with the names of all
    /// namespaces that currently exist.
    fn requests(
        &self,
        permissions: Vec<PermissionVersion>,
        reviews: &HashMap<String, ReviewRecord>,
    ) -> (BTreeMap<String, ReviewRequest>, HashSet<String>) {
        let mut requests = BTreeMap::<String, ReviewRequest>::new();
        let mut namespaces = HashSet::new();

        for ns in self.namespaces.namespaces() {
            namespaces.insert(ns.name.clone());
            requests
                .entry(ns.name.clone())
                .or_insert_with(|| ReviewRequest::new(ns.name))
                .namespace_version = Some(ns.resource_version);
        }

        // A change to a namespaced permission object only requires its own namespace to be
        // reviewed again.
        let mut current = HashSet::new();
        for PermissionVersion {
            id,
            resource_version,
        } in permissions
        {
            let Some(ns) = id.namespace.clone() else {
                continue;
            };
            // Objects may linger briefly in namespaces that are being deleted.
            if !namespaces.contains(&ns) {
                continue;
            }
            current.insert(id.clone());
            requests
                .entry(ns.clone())
                .or_insert_with(|| ReviewRequest::new(ns))
                .permission_versions
                .insert(id, resource_version);
        }

        for (ns, record) in reviews {
            if !namespaces.contains(ns) {
                continue;
            }
            for id in record.permission_versions.keys() {
                if !current.contains(id) {
                    requests
                        .entry(ns.clone())
                        .or_insert_with(|| ReviewRequest::new(ns.clone()))
                        .removed
                        .insert(id.clone());
                }
            }
        }

        (requests, namespaces)
    }

    fn sync_request(
        &self,
        subjects: &mut Working<'_>,
        reviews: &mut HashMap<String, ReviewRecord>,
        request: ReviewRequest,
    ) {
        let last = reviews.get(&request.namespace);
        if skip_review(&request, last) {
            self.metrics.review_skipped();
            return;
        }

        self.metrics.reviewed();
        let review = match self.reviewer.review(&request.namespace) {
            Ok(review) => review,
            Err(error) => {
                // The namespace keeps its prior record (if any) and is reviewed again next pass.
                self.metrics.review_failed();
                tracing::warn!(namespace = %request.namespace, %error, "Failed to review namespace");
                return;
            }
        };
        if let Some(error) = &review.evaluation_error {
            self.metrics.partially_evaluated();
            tracing::info!(namespace = %request.namespace, %error, "Namespace review was incomplete");
        }
        tracing::debug!(
            namespace = %request.namespace,
            users = review.users.len(),
            groups = review.groups.len(),
            "Reviewed"
        );

        let users = review.users.into_iter().collect::<HashSet<_>>();
        let groups = review.groups.into_iter().collect::<HashSet<_>>();
        let empty = HashSet::new();
        let prior = match last {
            Some(last) => (&last.users, &last.groups),
            None => (&empty, &empty),
        };
        subjects.update(|s| s.update(&request.namespace, prior, (&users, &groups)));

        let namespace = request.namespace.clone();
        let record = ReviewRecord::new(request, last, users, groups);
        self.notify(&namespace, &record.users, &record.groups);
        reviews.insert(namespace, record);
    }

    /// Removes all state for namespaces that no longer exist.
    fn purge(
        &self,
        namespaces: &HashSet<String>,
        subjects: &mut Working<'_>,
        reviews: &mut HashMap<String, ReviewRecord>,
        previous: Option<HashMap<String, ReviewRecord>>,
    ) {
        let empty = HashSet::new();

        let deleted = reviews
            .keys()
            .filter(|ns| !namespaces.contains(*ns))
            .cloned()
            .collect::<Vec<_>>();
        for ns in deleted {
            if let Some(record) = reviews.remove(&ns) {
                tracing::debug!(namespace = %ns, "Purging deleted namespace");
                subjects.update(|s| {
                    s.update(&ns, (&record.users, &record.groups), (&empty, &empty))
                });
                self.notify(&ns, &empty, &empty);
                self.metrics.purged();
            }
        }

        // A full rebuild discards prior records without purging them. Watchers must still learn
        // about every namespace that has no record after the rebuild, whether it was deleted or
        // its review failed.
        if let Some(previous) = previous {
            for ns in previous.keys().filter(|ns| !reviews.contains_key(*ns)) {
                if namespaces.contains(ns) {
                    tracing::debug!(namespace = %ns, "Revoking access to unreviewed namespace");
                } else {
                    tracing::debug!(namespace = %ns, "Purging deleted namespace");
                    self.metrics.purged();
                }
                self.notify(ns, &empty, &empty);
            }
        }
    }
}

/// Indicates whether a review can be skipped because nothing in the request differs from what
/// the last review was based on.
fn skip_review(request: &ReviewRequest, last: Option<&ReviewRecord>) -> bool {
    let Some(last) = last else {
        return false;
    };

    if let Some(version) = &request.namespace_version {
        if last.namespace_version.as_ref() != Some(version) {
            return false;
        }
    }

    if request
        .removed
        .iter()
        .any(|id| last.permission_versions.contains_key(id))
    {
        return false;
    }

    request
        .permission_versions
        .iter()
        .all(|(id, version)| last.permission_versions.get(id) == Some(version))
}

// === impl ReviewRequest ===

impl ReviewRequest {
    fn new(namespace: String) -> Self {
        Self {
            namespace,
            namespace_version: None,
            permission_versions: HashMap::new(),
            removed: HashSet::new(),
        }
    }
}

// === impl ReviewRecord ===

impl ReviewRecord {
    /// Records a review, carrying forward any versions from the last record that the request
    /// doesn't supersede.
    fn new(
        request: ReviewRequest,
        last: Option<&ReviewRecord>,
        users: HashSet<String>,
        groups: HashSet<String>,
    ) -> Self {
        let ReviewRequest {
            namespace: _,
            namespace_version,
            permission_versions,
            removed,
        } = request;

        let mut versions = last
            .map(|l| l.permission_versions.clone())
            .unwrap_or_default();
        versions.retain(|id, _| !removed.contains(id));
        versions.extend(permission_versions);

        Self {
            namespace_version: namespace_version
                .or_else(|| last.and_then(|l| l.namespace_version.clone())),
            permission_versions: versions,
            users,
            groups,
        }
    }
}

// === impl Working ===

impl Working<'_> {
    fn update(&mut self, f: impl FnOnce(&mut Subjects)) {
        match self {
            Self::Live(subjects) => f(&mut subjects.write()),
            Self::Fresh(subjects) => f(subjects),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    fn rb(ns: &str, name: &str) -> ResourceId {
        ResourceId::namespaced("RoleBinding", ns, name)
    }

    fn versions(
        versions: std::collections::HashMap<ResourceId, &str>,
    ) -> HashMap<ResourceId, String> {
        versions
            .into_iter()
            .map(|(id, v)| (id, v.to_string()))
            .collect()
    }

    fn record(namespace_version: &str, permissions: &[(ResourceId, &str)]) -> ReviewRecord {
        ReviewRecord {
            namespace_version: Some(namespace_version.to_string()),
            permission_versions: permissions
                .iter()
                .map(|(id, v)| (id.clone(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn review_is_never_skipped_without_a_record() {
        let request = ReviewRequest::new("foo".to_string());
        assert!(!skip_review(&request, None));
    }

    #[test]
    fn review_is_skipped_when_versions_match() {
        let last = record("1", &[(rb("foo", "a"), "10"), (rb("foo", "b"), "20")]);

        let mut request = ReviewRequest::new("foo".to_string());
        request.namespace_version = Some("1".to_string());
        assert!(skip_review(&request, Some(&last)));

        // Requests need not carry every version; only the versions they do carry are compared.
        let mut request = ReviewRequest::new("foo".to_string());
        request.permission_versions = versions(hashmap! { rb("foo", "a") => "10" });
        assert!(skip_review(&request, Some(&last)));
    }

    #[test]
    fn review_is_required_when_versions_differ() {
        let last = record("1", &[(rb("foo", "a"), "10")]);

        let mut request = ReviewRequest::new("foo".to_string());
        request.namespace_version = Some("2".to_string());
        assert!(!skip_review(&request, Some(&last)));

        let mut request = ReviewRequest::new("foo".to_string());
        request.permission_versions = versions(hashmap! { rb("foo", "a") => "11" });
        assert!(!skip_review(&request, Some(&last)));

        let mut request = ReviewRequest::new("foo".to_string());
        request.permission_versions = versions(hashmap! { rb("foo", "new") => "1" });
        assert!(!skip_review(&request, Some(&last)));

        let mut request = ReviewRequest::new("foo".to_string());
        request.removed.insert(rb("foo", "a"));
        assert!(!skip_review(&request, Some(&last)));
    }

    #[test]
    fn record_merges_versions() {
        let last = record("1", &[(rb("foo", "a"), "10"), (rb("foo", "b"), "20")]);

        let mut request = ReviewRequest::new("foo".to_string());
        request.permission_versions = versions(hashmap! { rb("foo", "a") => "11" });
        request.removed.insert(rb("foo", "b"));

        let next = ReviewRecord::new(request, Some(&last), HashSet::new(), HashSet::new());
        assert_eq!(next.namespace_version.as_deref(), Some("1"));
        assert_eq!(
            next.permission_versions,
            versions(hashmap! { rb("foo", "a") => "11" })
        );
    }
}
