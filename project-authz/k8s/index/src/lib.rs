//! Project Authorization Index
//!
//! Maintains local mirrors of the cluster resources that determine which projects a user may see:
//!
//! - Every `Namespace` is indexed by name so that the authorization cache can enumerate namespaces
//!   and their resource versions, and resolve a name to a full object when notifying watches.
//! - `Role`s and `RoleBinding`s are indexed per namespace. A change to one of these only affects
//!   the visibility of its own namespace.
//! - `ClusterRole`s and `ClusterRoleBinding`s are indexed cluster-wide. A change to one of these
//!   may affect the visibility of every namespace.
//!
//! ```text
//! [ Namespace ]   [ Role ] <- [ RoleBinding ]   [ ClusterRole ] <- [ ClusterRoleBinding ]
//! ```
//!
//! The indexes are updated by `kubert::index` watch tasks and read by the authorization cache
//! through the `NamespaceLister`, `PermissionLister`, and `Reviewer` interfaces.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
pub mod namespace;
pub mod rbac;
mod reviewer;

#[cfg(test)]
mod tests;

pub use self::{
    namespace::{NamespaceIndex, NamespaceReader, SharedNamespaceIndex},
    rbac::{RbacIndex, RbacReader, SharedRbacIndex},
    reviewer::{RbacReviewer, ReviewAccess},
};
