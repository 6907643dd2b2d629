#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod mirror;
pub mod projects;
mod review;
mod user;

pub use self::{
    mirror::{NamespaceLister, NamespaceVersion, PermissionLister, PermissionVersion, ResourceId},
    projects::{DiscoverProjects, ProjectEvent, ProjectStream, WatchError},
    review::{Review, ReviewError, Reviewer},
    user::{Scope, UserInfo},
};
pub use project_authz_k8s_api::Namespace;
