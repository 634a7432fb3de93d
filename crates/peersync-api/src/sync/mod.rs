pub mod coordinator;

pub use coordinator::{PullSummary, PushSummary, SyncCoordinator, SyncCoordinatorConfig, SyncError};
