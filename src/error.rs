//! Error taxonomy for the hashgraph core (see spec.md §7).
use thiserror::Error;

/// Errors raised by the Event Store, Graph Relations, Consensus Kernel,
/// Gossip Engine and RPC transport.
#[derive(Debug, Error)]
pub enum Error {
    /// An event referenced a parent signature that is not in the store.
    #[error("parent event missing: {0}")]
    ParentMissing(String),

    /// An event's signature already exists in the store.
    #[error("duplicate event signature")]
    DuplicateSignature,

    /// A structural invariant (self-parent author, cycle, round
    /// regression) was violated. Indicates a bug or a Byzantine peer.
    #[error("structural invariant violated: {0}")]
    StructuralViolation(String),

    /// Transient transport failure; never fatal, retried on the next
    /// gossip interval.
    #[error("rpc transport error: {0}")]
    Rpc(#[from] std::io::Error),

    /// Malformed wire payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The roster file did not include this node's own address.
    #[error("roster does not include local address {0}")]
    NotInRoster(String),
}
