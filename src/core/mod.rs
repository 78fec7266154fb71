pub mod checksum;
pub mod engine;
pub mod reconciler;
pub mod resolver;
pub mod watcher;

pub use checksum::calculate_hash;
pub use engine::{Initialized, SyncEngine, SyncReport, WatchTarget};
pub use reconciler::{Outcome, Reconciler, RemoteListing};
pub use resolver::{resolve_file, PathResolver, Resolution, SkipReason, TrackedPath};
pub use watcher::{ChangeEvent, FsSubscription, WatchLoop, WatchState, WatchSummary};
