pub mod apply;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod ignore;
pub mod journal;
pub mod outbox;
pub mod peers;
pub mod snapshot;
pub mod types;

pub use apply::{ApplyEngine, ApplyOutcome, ApplyReport};
pub use capture::ChangeCapture;
pub use config::NodeConfig;
pub use error::{ApplyError, ChangeValidationError, ConfigError, JournalError};
pub use events::{EventBus, NodeEvent};
pub use ignore::IgnoredPaths;
pub use journal::ChangeJournal;
pub use outbox::PendingOutbox;
pub use peers::{PeerClient, PeerDirectory, Selection};
pub use types::{ChangeKind, ChangeRecord, IncomingChange, SnapshotEntry};
