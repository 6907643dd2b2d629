use ahash::AHashSet as HashSet;

/// The authenticated identity on whose behalf projects are listed or watched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub groups: Vec<String>,
}

/// Limits the namespaces a watch may report on.
///
/// Scope-restricted credentials (e.g. tokens issued for a fixed set of projects) may only observe
/// the namespaces they were issued for, even when RBAC grants more.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    All,
    Namespaces(HashSet<String>),
}

// === impl UserInfo ===

impl UserInfo {
    pub fn new(name: impl ToString, groups: impl IntoIterator<Item = impl ToString>) -> Self {
        Self {
            name: name.to_string(),
            groups: groups.into_iter().map(|g| g.to_string()).collect(),
        }
    }

    /// Indicates whether the user is named in `users` or belongs to one of `groups`.
    pub fn is_granted(&self, users: &HashSet<String>, groups: &HashSet<String>) -> bool {
        users.contains(&self.name) || self.groups.iter().any(|g| groups.contains(g))
    }
}

// === impl Scope ===

impl Scope {
    pub const WILDCARD: &'static str = "*";

    /// Builds a scope from a list of namespace names, where `*` grants every namespace.
    pub fn from_names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let names = names.into_iter().map(Into::into).collect::<HashSet<String>>();
        if names.contains(Self::WILDCARD) {
            return Self::All;
        }
        Self::Namespaces(names)
    }

    pub fn allows(&self, namespace: &str) -> bool {
        match self {
            Self::All => true,
            Self::Namespaces(names) => names.contains(namespace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_scope_allows_everything() {
        let scope = Scope::from_names(["foo", "*"]);
        assert_eq!(scope, Scope::All);
        assert!(scope.allows("bar"));
    }

    #[test]
    fn explicit_scope_allows_listed_names() {
        let scope = Scope::from_names(["foo"]);
        assert!(scope.allows("foo"));
        assert!(!scope.allows("bar"));
    }

    #[test]
    fn granted_by_user_or_group() {
        let users = ["bob"].into_iter().map(String::from).collect();
        let groups = ["employee"].into_iter().map(String::from).collect();

        assert!(UserInfo::new("bob", Vec::<String>::new()).is_granted(&users, &groups));
        assert!(UserInfo::new("eve", ["employee"]).is_granted(&users, &groups));
        assert!(!UserInfo::new("alice", ["contractor"]).is_granted(&users, &groups));
    }
}
