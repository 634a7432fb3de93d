pub mod api;
pub mod node;
pub mod sync;

pub use api::{build_router, ApiConfig, ApiServer, AppState};
pub use node::{Node, RunningNode};
pub use sync::{SyncCoordinator, SyncCoordinatorConfig, SyncError};
