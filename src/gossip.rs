//! Gossip Engine (spec.md §4.2): peer selection, the two-RPC sync
//! exchange, and failure semantics. Grounded on the original
//! `hashgraphMain` loop's commented-out sync steps and `gossipRoutine`'s
//! call order (select peer, sync, create event).
use std::sync::RwLock;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::address::{Address, Roster};
use crate::event::Event;
use crate::rpc::{Client, GetNumberOfMissingEventsRequest, SyncAllEventsRequest};
use crate::store::Store;

/// One full gossip round: pick a random peer, exchange missing-event
/// counts, push events, and let the peer fold in a new self-event linking
/// back to us (the responder-creates-new-event variant, spec.md §4.2 Open
/// Question).
///
/// Returns `false` if no peer could be reached; callers use this only for
/// logging, gossip never stops retrying on failure (spec.md §4.2 Failure
/// semantics).
pub fn gossip_once(store: &RwLock<Store>, roster: &Roster) -> bool {
    let peers: Vec<Address> = roster.peers().cloned().collect();
    let Some(peer) = peers.choose(&mut rand::thread_rng()) else {
        return false;
    };

    let known: Vec<(Address, usize)> = {
        let store = store.read().unwrap();
        store
            .hashgraph_lengths()
            .into_iter()
            .map(|(a, n)| (a, n))
            .collect()
    };

    let missing = match Client::get_number_of_missing_events(
        peer,
        GetNumberOfMissingEventsRequest { known },
    ) {
        Ok(response) => response.missing,
        Err(err) => {
            warn!(peer = %peer, error = %err, "GetNumberOfMissingEvents failed");
            return false;
        }
    };

    let to_send: Vec<Event> = {
        let store = store.read().unwrap();
        missing
            .into_iter()
            .filter(|&(_, count)| count > 0)
            .flat_map(|(author, count)| store.tail_events(&author, count as usize))
            .collect()
    };

    let local = roster.local().clone();
    let response = match Client::sync_all_events(
        peer,
        SyncAllEventsRequest {
            caller: local,
            events: to_send,
        },
    ) {
        Ok(response) => response,
        Err(err) => {
            warn!(peer = %peer, error = %err, "SyncAllEvents failed");
            return false;
        }
    };

    debug!(peer = %peer, appended = response.appended, "gossip round complete");
    true
}

/// Drives [`gossip_once`] forever at `interval`. Intended to run on its
/// own thread (spec.md §5 "gossip initiator thread").
///
/// `DivideRounds`/`DecideFame`/`FindOrder` are not run here: spec.md §4.2
/// step 4 runs them only on the responder, inline with the write lock
/// already held while appending the new self-event (`Node::
/// handle_sync_all_events`). An initiator's own store is never mutated by
/// `gossip_once`, so there is nothing for this loop to process.
pub fn gossip_loop(store: &RwLock<Store>, roster: &Roster, interval: Duration) -> ! {
    loop {
        gossip_once(store, roster);
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    /// A peerless roster never panics, just reports failure.
    #[test]
    fn gossip_once_returns_false_with_no_peers() {
        let local = Address::new("127.0.0.1:9000");
        let roster = Roster::from_pairs(
            [(local.clone(), "solo".to_string())],
            local.clone(),
        )
        .unwrap();
        let store = RwLock::new(Store::new(
            roster.addresses().cloned(),
            &local,
            SystemTime::now(),
        ));
        assert!(!gossip_once(&store, &roster));
    }
}
