//! The Event Store (spec.md §4.1): the local DAG, per-author ordered
//! sequences, a signature-indexed lookup, a per-round witness index, and
//! the progress cursors and transaction buffer.
use std::collections::HashMap;
use std::time::SystemTime;

use crate::address::Address;
use crate::error::Error;
use crate::event::{Event, Signature, Transaction};

/// Holds the local DAG and everything the Graph Relations and Consensus
/// Kernel need to operate on it. Owned behind a single
/// `std::sync::RwLock` by `Node` (spec.md §5); every lookup here yields a
/// shared read-only handle, per spec.md §3 "Ownership & lifecycle".
#[derive(Debug, Default)]
pub struct Store {
    /// `Hashgraph[author]`: each author's events in creation order.
    hashgraph: HashMap<Address, Vec<Signature>>,
    /// Signature-indexed lookup of every event in the store.
    events: HashMap<Signature, Event>,
    /// `Witnesses[author][round]`.
    witnesses: HashMap<Address, HashMap<u64, Signature>>,
    /// `FirstRoundOfFameUndecided[author]`, monotonically non-decreasing.
    first_round_of_fame_undecided: HashMap<Address, u64>,
    /// `FirstEventOfNotConsensusIndex[author]`, an index into
    /// `hashgraph[author]`, monotonically non-decreasing.
    first_event_of_not_consensus_index: HashMap<Address, usize>,
    /// The append-only total order, as signatures in decided order.
    consensus_order: Vec<Signature>,
    /// The author's buffered, not-yet-flushed transactions.
    transaction_buffer: Vec<Transaction>,
    /// `see` memoization cache (spec.md §4.3). Never invalidated: once an
    /// event's round/witness flags are set they never change, so a cached
    /// `see` result is valid forever.
    pub(crate) see_cache: HashMap<(Signature, Signature), bool>,
}

impl Store {
    /// Creates an empty store and immediately seeds it with the local
    /// node's own initial event (spec.md §4.1 "Initial setup").
    pub fn new(roster: impl Iterator<Item = Address>, local: &Address, now: SystemTime) -> Self {
        let mut store = Self::default();
        for addr in roster {
            store.hashgraph.entry(addr.clone()).or_default();
            store.witnesses.entry(addr).or_default();
        }
        let initial = Event::initial(local.clone(), now);
        store
            .append(initial)
            .expect("seeding the local initial event cannot fail");
        store
    }

    /// Appends `event`, validating invariants 1–4 of spec.md §3.
    ///
    /// Duplicates are rejected with `Error::DuplicateSignature`; the
    /// caller (the sync handler) treats this as a no-op, per spec.md §7
    /// "Duplicate event on append". Missing parents are rejected with
    /// `Error::ParentMissing`; the caller drops the event silently and
    /// relies on a later sync to resupply it (spec.md §7). A self-parent
    /// owned by another author, a self-reference, or a round regression
    /// against either parent is rejected with `Error::StructuralViolation`
    /// (spec.md §7: "indicates a bug or a Byzantine peer").
    pub fn append(&mut self, event: Event) -> Result<(), Error> {
        if self.events.contains_key(&event.signature) {
            return Err(Error::DuplicateSignature);
        }
        if event.self_parent == Some(event.signature) || event.other_parent == Some(event.signature) {
            return Err(Error::StructuralViolation(
                "event references itself as a parent".into(),
            ));
        }
        if let Some(sig) = event.self_parent {
            let parent = self
                .events
                .get(&sig)
                .ok_or_else(|| Error::ParentMissing(sig.to_string()))?;
            if parent.owner != event.owner {
                return Err(Error::StructuralViolation(
                    "self-parent owned by another author".into(),
                ));
            }
            if event.round < parent.round {
                return Err(Error::StructuralViolation(
                    "round regression against self-parent".into(),
                ));
            }
        }
        if let Some(sig) = event.other_parent {
            let parent = self
                .events
                .get(&sig)
                .ok_or_else(|| Error::ParentMissing(sig.to_string()))?;
            if event.round < parent.round {
                return Err(Error::StructuralViolation(
                    "round regression against other-parent".into(),
                ));
            }
        }

        let author = event.owner.clone();
        let sig = event.signature;
        let round = event.round;
        let is_witness = event.is_witness;

        self.hashgraph.entry(author.clone()).or_default().push(sig);
        if is_witness {
            self.witnesses.entry(author).or_default().insert(round, sig);
        }
        self.events.insert(sig, event);
        Ok(())
    }

    /// `getBySig`.
    pub fn get(&self, sig: &Signature) -> Option<&Event> {
        self.events.get(sig)
    }

    /// Mutable lookup, used only by the Consensus Kernel to set the
    /// consensus-derived fields under the write lock.
    pub(crate) fn get_mut(&mut self, sig: &Signature) -> Option<&mut Event> {
        self.events.get_mut(sig)
    }

    /// `witnessAt(author, round)`.
    pub fn witness_at(&self, author: &Address, round: u64) -> Option<&Event> {
        let sig = self.witnesses.get(author)?.get(&round)?;
        self.events.get(sig)
    }

    /// `findWitnessesOfARound(r)`: the witness of each author for round
    /// `r`, where present. An author may transiently lack a witness for
    /// `r` (spec.md §4.3); absent authors are simply omitted.
    pub fn witnesses_of_round(&self, round: u64) -> Vec<&Event> {
        self.witnesses
            .values()
            .filter_map(|by_round| by_round.get(&round))
            .filter_map(|sig| self.events.get(sig))
            .collect()
    }

    /// `hashgraphLengths()`: number of events known per author.
    pub fn hashgraph_lengths(&self) -> HashMap<Address, usize> {
        self.hashgraph
            .iter()
            .map(|(addr, events)| (addr.clone(), events.len()))
            .collect()
    }

    /// The tail (most recently created) event of `author`, if any.
    pub fn tail(&self, author: &Address) -> Option<&Event> {
        let sig = self.hashgraph.get(author)?.last()?;
        self.events.get(sig)
    }

    /// The ordered sequence of signatures created by `author`.
    pub fn sequence(&self, author: &Address) -> &[Signature] {
        self.hashgraph
            .get(author)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The last `n` events created by `author`, in sequence order, for
    /// packaging into a `SyncAllEvents` payload (spec.md §4.2 step 3).
    pub fn tail_events(&self, author: &Address, n: usize) -> Vec<Event> {
        let seq = self.sequence(author);
        let start = seq.len().saturating_sub(n);
        seq[start..]
            .iter()
            .filter_map(|sig| self.events.get(sig))
            .cloned()
            .collect()
    }

    /// All known authors (the roster as seen by this store).
    pub fn authors(&self) -> impl Iterator<Item = &Address> {
        self.hashgraph.keys()
    }

    /// `N`, the fixed population size (spec.md §3 "Roster").
    pub fn population(&self) -> usize {
        self.hashgraph.len()
    }

    /// The highest round any witness currently exists at, or 0 if none.
    pub fn max_witness_round(&self) -> u64 {
        self.witnesses
            .values()
            .flat_map(|by_round| by_round.keys())
            .copied()
            .max()
            .unwrap_or(0)
    }

    /// `FirstRoundOfFameUndecided[author]`, defaulting to 1 for an author
    /// with no decided witnesses yet.
    pub fn first_round_of_fame_undecided(&self, author: &Address) -> u64 {
        self.first_round_of_fame_undecided
            .get(author)
            .copied()
            .unwrap_or(1)
    }

    /// Advances `FirstRoundOfFameUndecided[author]`, enforcing spec.md §3
    /// invariant 7 (monotonically non-decreasing).
    pub(crate) fn advance_first_round_of_fame_undecided(&mut self, author: &Address, round: u64) {
        let entry = self
            .first_round_of_fame_undecided
            .entry(author.clone())
            .or_insert(1);
        if round > *entry {
            *entry = round;
        }
    }

    /// `FirstEventOfNotConsensusIndex[author]`.
    pub fn first_event_of_not_consensus_index(&self, author: &Address) -> usize {
        self.first_event_of_not_consensus_index
            .get(author)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn advance_first_event_of_not_consensus_index(
        &mut self,
        author: &Address,
        index: usize,
    ) {
        let entry = self
            .first_event_of_not_consensus_index
            .entry(author.clone())
            .or_insert(0);
        if index > *entry {
            *entry = index;
        }
    }

    /// Events of `author` not yet assigned a `round_received`, in
    /// creation order.
    pub(crate) fn not_yet_consensus(&self, author: &Address) -> Vec<Signature> {
        let start = self.first_event_of_not_consensus_index(author);
        self.sequence(author)[start..].to_vec()
    }

    /// The decided total order so far, oldest first (spec.md §4.4 "Total
    /// order").
    pub fn consensus_order(&self) -> &[Signature] {
        &self.consensus_order
    }

    pub(crate) fn push_consensus(&mut self, sig: Signature) {
        self.consensus_order.push(sig);
    }

    /// Re-sorts the tail of the consensus list that shares a
    /// `round_received` with `from`, by the composite key
    /// `(round_received, consensus_timestamp, signature)` (spec.md §4.4
    /// "Total order").
    pub(crate) fn resort_from(&mut self, from: usize) {
        let events = &self.events;
        self.consensus_order[from..].sort_by(|a, b| {
            let ea = &events[a];
            let eb = &events[b];
            ea.round_received
                .cmp(&eb.round_received)
                .then(ea.consensus_timestamp.cmp(&eb.consensus_timestamp))
                .then(a.cmp(b))
        });
    }

    /// Appends a transaction to the local buffer. Callers must already
    /// hold the write lock (spec.md §9 "Transaction buffer ownership").
    pub fn submit_transaction(&mut self, sender: Address, receiver: Address, amount: u64) {
        self.transaction_buffer.push(Transaction {
            sender,
            receiver,
            amount,
        });
    }

    /// Drains the transaction buffer, for flushing into a new self-event.
    pub(crate) fn drain_transactions(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.transaction_buffer)
    }
}
