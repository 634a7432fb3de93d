/// HTTP surface of a node
///
/// - peer replication endpoints (`/get_changes`, `/get_full_state`, `/push_change`)
/// - front-end endpoints (`/api/push`, `/api/pull`, `/api/status`)
/// - live events over Server-Sent Events (`/events`)
pub mod handlers;
pub mod models;
pub mod server;

pub use handlers::AppState;
pub use models::ErrorResponse;
pub use server::{build_router, ApiConfig, ApiServer};
