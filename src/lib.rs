pub mod cli;

pub use peersync_api::{api, node, sync, Node, RunningNode, SyncCoordinator};
pub use peersync_core::{
    apply, capture, config, error, events, journal, peers, snapshot, types, NodeConfig,
};
