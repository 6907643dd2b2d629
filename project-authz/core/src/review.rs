/// The outcome of evaluating who may access a namespace.
///
/// `evaluation_error` is a diagnostic that may accompany an otherwise valid (possibly partial)
/// result. It does not indicate that the review failed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Review {
    pub users: Vec<String>,
    pub groups: Vec<String>,
    pub evaluation_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("namespace {0} not found")]
    NamespaceNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Computes the users and groups permitted to access a namespace.
///
/// Reviews may be expensive; callers are expected to avoid repeating them when nothing relevant has
/// changed.
pub trait Reviewer: Send + Sync {
    fn review(&self, namespace: &str) -> Result<Review, ReviewError>;
}
