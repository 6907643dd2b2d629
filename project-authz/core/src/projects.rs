use crate::{Namespace, Scope, UserInfo};
use anyhow::Result;
use futures::prelude::*;
use std::pin::Pin;

/// A change in the set of projects visible to a user.
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectEvent {
    Added(Namespace),
    Modified(Namespace),
    Deleted(Namespace),
    Error(WatchError),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// The watch could not keep up with cache updates and was terminated.
    #[error("watch queue is full")]
    QueueFull,
}

pub type ProjectStream = Pin<Box<dyn Stream<Item = ProjectEvent> + Send + 'static>>;

/// Models project visibility discovery.
#[async_trait::async_trait]
pub trait DiscoverProjects {
    /// Lists the projects the user may currently see.
    async fn list_projects(&self, user: &UserInfo) -> Result<Vec<Namespace>>;

    /// Watches the projects the user may see within `scope`.
    ///
    /// When `include_existing` is set, the stream begins with an `Added` event for every project
    /// already visible to the user.
    async fn watch_projects(
        &self,
        user: UserInfo,
        scope: Scope,
        include_existing: bool,
    ) -> Result<ProjectStream>;
}
