//! A peer-to-peer hashgraph aBFT consensus engine: every participant
//! maintains a local DAG of events, gossips it pairwise with random
//! peers, and derives an identical total order of transactions without
//! a leader or central coordinator.
#![deny(missing_docs)]

pub mod address;
pub mod config;
pub mod consensus;
pub mod error;
pub mod event;
pub mod gossip;
pub mod graph;
pub mod node;
pub mod rpc;
pub mod store;
