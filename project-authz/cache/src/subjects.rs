use ahash::{AHashMap as HashMap, AHashSet as HashSet};

/// Maps each subject to the namespaces it may access.
///
/// A subject is never stored with an empty set of namespaces.
#[derive(Debug, Default)]
pub(crate) struct SubjectIndex {
    by_subject: HashMap<String, HashSet<String>>,
}

/// The user and group indexes, which are always updated together.
#[derive(Debug, Default)]
pub(crate) struct Subjects {
    pub users: SubjectIndex,
    pub groups: SubjectIndex,
}

// === impl SubjectIndex ===

impl SubjectIndex {
    pub fn add(&mut self, subject: &str, namespace: &str) {
        if let Some(namespaces) = self.by_subject.get_mut(subject) {
            namespaces.insert(namespace.to_string());
            return;
        }
        let namespaces = std::iter::once(namespace.to_string()).collect();
        self.by_subject.insert(subject.to_string(), namespaces);
    }

    pub fn remove(&mut self, subject: &str, namespace: &str) {
        if let Some(namespaces) = self.by_subject.get_mut(subject) {
            namespaces.remove(namespace);
            if namespaces.is_empty() {
                self.by_subject.remove(subject);
            }
        }
    }

    pub fn namespaces<'a>(&'a self, subject: &str) -> impl Iterator<Item = &'a String> + 'a {
        self.by_subject.get(subject).into_iter().flatten()
    }

    #[cfg(test)]
    pub fn contains(&self, subject: &str) -> bool {
        self.by_subject.contains_key(subject)
    }

    pub fn len(&self) -> usize {
        self.by_subject.len()
    }
}

// === impl Subjects ===

impl Subjects {
    /// Replaces the grants for `namespace`, given the users and groups that previously had access.
    pub fn update(
        &mut self,
        namespace: &str,
        (prior_users, prior_groups): (&HashSet<String>, &HashSet<String>),
        (users, groups): (&HashSet<String>, &HashSet<String>),
    ) {
        for user in prior_users.difference(users) {
            self.users.remove(user, namespace);
        }
        for group in prior_groups.difference(groups) {
            self.groups.remove(group, namespace);
        }
        for user in users {
            self.users.add(user, namespace);
        }
        for group in groups {
            self.groups.add(group, namespace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_subjects_are_removed() {
        let mut index = SubjectIndex::default();
        index.add("bob", "foo");
        index.add("bob", "bar");
        assert_eq!(index.namespaces("bob").count(), 2);

        index.remove("bob", "foo");
        assert!(index.contains("bob"));
        index.remove("bob", "bar");
        assert!(!index.contains("bob"));
        assert_eq!(index.len(), 0);

        // Removing an unknown subject is a no-op.
        index.remove("alice", "foo");
        assert_eq!(index.namespaces("alice").count(), 0);
    }

    #[test]
    fn update_replaces_grants() {
        let set = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<HashSet<_>>();
        let mut subjects = Subjects::default();
        subjects.update(
            "foo",
            (&set(&[]), &set(&[])),
            (&set(&["bob", "alice"]), &set(&["employee"])),
        );
        subjects.update(
            "foo",
            (&set(&["bob", "alice"]), &set(&["employee"])),
            (&set(&["bob"]), &set(&[])),
        );
        assert!(subjects.users.contains("bob"));
        assert!(!subjects.users.contains("alice"));
        assert_eq!(subjects.groups.len(), 0);
    }
}
