//! Project Authorization Cache
//!
//! Determining which namespaces a user may see requires evaluating authorization rules for every
//! namespace, which is far too expensive to do on each request. Instead, the cache periodically
//! synchronizes a subject index:
//!
//! - Every namespace is reviewed to determine the users and groups that may access it. The
//!   outcome of each review is recorded along with the resource versions it was based on.
//! - On subsequent passes, a namespace is only reviewed again when its own resource version, or
//!   the resource version of a namespaced permission object, has changed.
//! - When a cluster-wide permission object changes, every namespace may be affected, so the
//!   indexes are rebuilt from scratch and swapped in once the pass completes.
//!
//! ```text
//! [ Namespace ] ----\
//!                    +--> [ ReviewRequest ] --> [ Reviewer ] --> [ user/group -> namespaces ]
//! [ Permission ] ---/                                                     |
//!                                                                         v
//!                                                    [ ProjectWatch ] per watching client
//! ```
//!
//! Each membership change is broadcast to the registered watches. Watches never block the
//! synchronizer: each buffers events in a bounded queue and terminates itself with an error when
//! its consumer falls too far behind.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod metrics;
mod subjects;
mod sync;
pub mod watch;


pub use self::{
    cache::AuthorizationCache,
    metrics::{CacheMetrics, WatchMetrics},
    watch::{
        CacheWatcher, ProjectWatch, ProjectWatchStream, StopHandle, WatchConfig, WatchableCache,
        WatcherId,
    },
};
