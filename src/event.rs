//! The `Event` record and its invariants (spec.md §3).
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::address::Address;

/// A globally unique event identifier. Stands in for a real digital
/// signature (spec.md §1, §3): a production implementation must replace
/// this with the bytes of an actual cryptographic signature over the
/// event contents.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Signature(Uuid);

impl Signature {
    /// Generates a fresh random signature.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One `(sender, receiver, amount)` record flushed from a node's local
/// transaction buffer into an event (spec.md §3, §9).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Address of the sender.
    pub sender: Address,
    /// Address of the receiver.
    pub receiver: Address,
    /// Amount transferred, in minor units. Economic validation (balances,
    /// double-spend checks) is out of scope (spec.md §1 Non-goals); the
    /// core only carries transactions, it never interprets them.
    pub amount: u64,
}

mod time_nanos {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(time: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let nanos = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        nanos.to_string().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let nanos: String = Deserialize::deserialize(d)?;
        let nanos: u128 = nanos.parse().map_err(serde::de::Error::custom)?;
        let secs = (nanos / 1_000_000_000) as u64;
        let subsec = (nanos % 1_000_000_000) as u32;
        Ok(UNIX_EPOCH + Duration::new(secs, subsec))
    }
}

mod opt_time_nanos {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(time: &Option<SystemTime>, s: S) -> Result<S::Ok, S::Error> {
        let nanos = time.map(|t| {
            t.duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
                .to_string()
        });
        nanos.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SystemTime>, D::Error> {
        let raw: Option<String> = Deserialize::deserialize(d)?;
        match raw {
            Some(nanos) => {
                let nanos: u128 = nanos.parse().map_err(serde::de::Error::custom)?;
                let secs = (nanos / 1_000_000_000) as u64;
                let subsec = (nanos % 1_000_000_000) as u32;
                Ok(Some(UNIX_EPOCH + Duration::new(secs, subsec)))
            }
            None => Ok(None),
        }
    }
}

/// An immutable-by-convention point in the hashgraph DAG (spec.md §3).
///
/// Fields above the line are set once at creation and never change.
/// Fields below the line are consensus-derived and mutable only by the
/// Consensus Kernel under the write lock (spec.md §3 invariant 6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Address of the creator.
    pub owner: Address,
    /// Globally unique identifier of this event.
    pub signature: Signature,
    /// Signature of the self-parent (previous event by the same author),
    /// or `None` iff this is an initial event.
    pub self_parent: Option<Signature>,
    /// Signature of the other-parent (most recent known event from the
    /// peer that triggered this event's creation), or `None` iff this is
    /// an initial event.
    pub other_parent: Option<Signature>,
    /// Wall-clock time of creation at the owner.
    #[serde(with = "time_nanos")]
    pub timestamp: SystemTime,
    /// Transactions flushed into this event from the owner's local
    /// buffer. Emitted even when empty (spec.md §6).
    pub transactions: Vec<Transaction>,

    /// Round assigned by `divide_rounds`. Always >= 1 once set.
    pub round: u64,
    /// Whether this event is the first its author created in `round`.
    pub is_witness: bool,
    /// Whether this witness was decided famous. Meaningless unless
    /// `is_fame_decided`.
    pub is_famous: bool,
    /// Whether `is_famous` has been finally decided for this witness.
    pub is_fame_decided: bool,
    /// The round in which this event was received into the total order.
    pub round_received: Option<u64>,
    /// The median timestamp computed by `find_order`.
    #[serde(with = "opt_time_nanos")]
    pub consensus_timestamp: Option<SystemTime>,
    /// Diagnostic-only: wall-clock time between creation and being
    /// ordered.
    pub latency: Option<Duration>,
}

impl Event {
    /// True iff this event has no parents (the sole initial event of its
    /// author).
    pub fn is_initial(&self) -> bool {
        self.self_parent.is_none() && self.other_parent.is_none()
    }

    /// Constructs the initial event for `owner`: round 1, a witness by
    /// definition (spec.md §3 invariant 4), no parents.
    pub fn initial(owner: Address, timestamp: SystemTime) -> Self {
        Self {
            owner,
            signature: Signature::generate(),
            self_parent: None,
            other_parent: None,
            timestamp,
            transactions: Vec::new(),
            round: 1,
            is_witness: true,
            is_famous: false,
            is_fame_decided: false,
            round_received: None,
            consensus_timestamp: None,
            latency: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_event_is_witness_of_round_one() {
        let e = Event::initial(Address::new("127.0.0.1:9000"), SystemTime::now());
        assert!(e.is_initial());
        assert!(e.is_witness);
        assert_eq!(e.round, 1);
    }

    #[test]
    fn signatures_are_unique() {
        assert_ne!(Signature::generate(), Signature::generate());
    }
}
