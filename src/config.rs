//! Runtime configuration for a node (spec.md §4.2 "configurable gossip
//! interval"; ambient addition grounded in
//! `examples/original_source/cmd/dledger/main.go`'s port/peers.txt
//! handling).
use std::path::PathBuf;
use std::time::Duration;

use crate::address::Address;

/// Everything a node needs to start: where to listen, who else is in the
/// roster, and how often to gossip.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// This node's own `host:port`, must appear in the roster file.
    pub listen: Address,
    /// Path to the roster file (spec.md §6 "Roster format").
    pub roster_path: PathBuf,
    /// Delay between the end of one gossip round and the start of the
    /// next.
    pub gossip_interval: Duration,
}

impl NodeConfig {
    /// Default gossip interval, chosen to match the original
    /// implementation's tight polling loop without busy-spinning.
    pub const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_millis(500);

    /// Builds a config with the default gossip interval.
    pub fn new(listen: Address, roster_path: PathBuf) -> Self {
        Self {
            listen,
            roster_path,
            gossip_interval: Self::DEFAULT_GOSSIP_INTERVAL,
        }
    }
}
