//! Ties the Event Store, Graph Relations, Consensus Kernel, Gossip Engine
//! and RPC transport into one running node (spec.md §5): a single
//! `RwLock<Store>`, a gossip-initiator thread, and a thread-per-connection
//! RPC accept loop.
use std::net::TcpStream;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::address::{Address, Roster};
use crate::config::NodeConfig;
use crate::event::Event;
use crate::gossip::gossip_loop;
use crate::rpc::{
    self, GetNumberOfMissingEventsResponse, SyncAllEventsRequest, SyncAllEventsResponse,
};
use crate::store::Store;

/// A running participant. Cloning shares the same underlying store and
/// roster (both behind `Arc`), so the gossip thread and every connection
/// handler thread operate on one logical node.
#[derive(Clone)]
pub struct Node {
    store: Arc<RwLock<Store>>,
    roster: Arc<Roster>,
    config: NodeConfig,
}

impl Node {
    /// Builds a node and seeds its store with the local initial event.
    pub fn new(roster: Roster, config: NodeConfig) -> Self {
        let now = SystemTime::now();
        let store = Store::new(roster.addresses().cloned(), roster.local(), now);
        Self {
            store: Arc::new(RwLock::new(store)),
            roster: Arc::new(roster),
            config,
        }
    }

    /// This node's own address.
    pub fn local(&self) -> &Address {
        self.roster.local()
    }

    /// Blocks until every peer in the roster accepts a TCP connection.
    /// Supplemented from `examples/original_source/pkg/dledger/dlegder.go`
    /// (`WaitForPeers`): startup plumbing, not consensus logic, so it is
    /// in scope despite not being named in spec.md.
    pub fn wait_for_peers(&self, retry_interval: Duration) {
        for peer in self.roster.peers() {
            loop {
                match TcpStream::connect(peer.as_str()) {
                    Ok(_) => break,
                    Err(err) => {
                        warn!(peer = %peer, error = %err, "peer not reachable yet, retrying");
                        thread::sleep(retry_interval);
                    }
                }
            }
        }
        info!("all peers reachable");
    }

    /// Buffers a transaction for inclusion in this node's next self-event
    /// (spec.md §9 "Transaction buffer ownership").
    pub fn submit_transaction(&self, receiver: Address, amount: u64) {
        let mut store = self.store.write().unwrap();
        let local = self.roster.local().clone();
        store.submit_transaction(local, receiver, amount);
    }

    /// The decided total order so far, as a snapshot.
    pub fn consensus_order(&self) -> Vec<crate::event::Signature> {
        self.store.read().unwrap().consensus_order().to_vec()
    }

    /// Spawns the gossip-initiator thread and the RPC accept loop, both
    /// detached (spec.md §5 "parallel threads, not cooperative").
    pub fn start(&self) -> Result<(), crate::error::Error> {
        let listener = rpc::bind(self.roster.local())?;

        let gossip_node = self.clone();
        thread::spawn(move || {
            gossip_loop(
                &gossip_node.store,
                &gossip_node.roster,
                gossip_node.config.gossip_interval,
            )
        });

        let accept_node = self.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let node = accept_node.clone();
                        thread::spawn(move || node.handle_connection(stream));
                    }
                    Err(err) => warn!(error = %err, "failed to accept connection"),
                }
            }
        });

        Ok(())
    }

    fn handle_connection(&self, stream: std::net::TcpStream) {
        let store = self.store.clone();
        let local = self.roster.local().clone();
        let result = rpc::serve_connection(
            stream,
            move |request| {
                let store = store.read().unwrap();
                let lengths = store.hashgraph_lengths();
                let missing = request
                    .known
                    .into_iter()
                    .map(|(author, known_len)| {
                        let actual = lengths.get(&author).copied().unwrap_or(0);
                        (author, known_len as i64 - actual as i64)
                    })
                    .collect();
                GetNumberOfMissingEventsResponse { missing }
            },
            move |request| self.handle_sync_all_events(request, local.clone()),
        );
        if let Err(err) = result {
            warn!(error = %err, "rpc connection failed");
        }
    }

    /// Responder-creates-new-event (spec.md §4.2 Open Question): appends
    /// the pushed events, folds in one new self-event whose other-parent
    /// is the caller's latest known tail, then runs `DivideRounds`,
    /// `DecideFame` and `FindOrder` — all under the single write lock
    /// acquired here, for its full duration (spec.md §5 "`SyncAllEvents`
    /// takes a write lock for the full duration of: append-missing,
    /// create-new-event, DivideRounds, DecideFame, FindOrder").
    fn handle_sync_all_events(
        &self,
        request: SyncAllEventsRequest,
        local: Address,
    ) -> SyncAllEventsResponse {
        let mut store = self.store.write().unwrap();
        let mut pending = request.events;
        let mut appended = 0;

        // Events may arrive with cross-author parent dependencies not
        // satisfiable in the given order; retry until a full pass makes
        // no progress.
        loop {
            let before = pending.len();
            pending.retain(|event| match store.append(event.clone()) {
                Ok(()) => {
                    appended += 1;
                    false
                }
                // Duplicate on append is idempotent and silent (spec.md §7).
                Err(crate::error::Error::DuplicateSignature) => false,
                Err(crate::error::Error::StructuralViolation(reason)) => {
                    tracing::error!(signature = %event.signature, %reason, "structural violation on append");
                    false
                }
                Err(_) => true,
            });
            if pending.len() == before {
                break;
            }
        }
        for event in &pending {
            warn!(signature = %event.signature, "dropping event with unresolved parents");
        }

        let other_parent = store.tail(&request.caller).map(|e| e.signature);
        if let Some(other_parent) = other_parent {
            let self_parent = store
                .tail(&local)
                .map(|e| e.signature)
                .expect("node's own initial event always exists");
            let round = store
                .get(&self_parent)
                .unwrap()
                .round
                .max(store.get(&other_parent).unwrap().round);
            let transactions = store.drain_transactions();
            let new_event = Event {
                owner: local,
                signature: crate::event::Signature::generate(),
                self_parent: Some(self_parent),
                other_parent: Some(other_parent),
                timestamp: SystemTime::now(),
                transactions,
                round,
                is_witness: false,
                is_famous: false,
                is_fame_decided: false,
                round_received: None,
                consensus_timestamp: None,
                latency: None,
            };
            let new_sig = new_event.signature;
            store
                .append(new_event)
                .expect("freshly constructed event cannot violate append invariants");
            store.divide_rounds(new_sig);
        }

        store.decide_fame();
        store.find_order(SystemTime::now());

        SyncAllEventsResponse { appended }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Signature};
    use crate::gossip;
    use std::net::TcpListener;

    fn node_pair(extra: &[Address]) -> (Node, Node, TcpListener) {
        let a_addr = Address::new("127.0.0.1:1");
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let b_addr = Address::new(listener.local_addr().unwrap().to_string());

        let mut pairs = vec![
            (a_addr.clone(), "A".to_string()),
            (b_addr.clone(), "B".to_string()),
        ];
        for addr in extra {
            pairs.push((addr.clone(), addr.to_string()));
        }

        let roster_a = Roster::from_pairs(pairs.clone(), a_addr.clone()).unwrap();
        let roster_b = Roster::from_pairs(pairs, b_addr.clone()).unwrap();
        let node_a = Node::new(roster_a, NodeConfig::new(a_addr, "peers.txt".into()));
        let node_b = Node::new(roster_b, NodeConfig::new(b_addr, "peers.txt".into()));
        (node_a, node_b, listener)
    }

    /// Appends `count` events owned by `author` onto `store`, chained by
    /// self-parent only, to pad a hashgraph length without going through a
    /// real gossip exchange.
    fn seed_author_events(store: &RwLock<Store>, author: &Address, count: usize) {
        if count == 0 {
            return;
        }
        let mut store = store.write().unwrap();
        let first = Event::initial(author.clone(), SystemTime::now());
        let mut prev = first.signature;
        store.append(first).unwrap();
        for _ in 1..count {
            let event = Event {
                owner: author.clone(),
                signature: Signature::generate(),
                self_parent: Some(prev),
                other_parent: None,
                timestamp: SystemTime::now(),
                transactions: Vec::new(),
                round: 1,
                is_witness: false,
                is_famous: false,
                is_fame_decided: false,
                round_received: None,
                consensus_timestamp: None,
                latency: None,
            };
            prev = event.signature;
            store.append(event).unwrap();
        }
    }

    /// spec.md §8 S1: two-node deadlock-free sync. A gossips to B; B ends up
    /// with A's initial event, its own initial event, and exactly one new
    /// self-event linking the two, still at round 1 and not a witness.
    #[test]
    fn s1_two_node_sync_produces_one_round_one_non_witness_event() {
        let (node_a, node_b, listener) = node_pair(&[]);

        let server_node = node_b.clone();
        let server = thread::spawn(move || {
            for _ in 0..2 {
                let (stream, _) = listener.accept().unwrap();
                server_node.handle_connection(stream);
            }
        });

        assert!(gossip::gossip_once(&node_a.store, &node_a.roster));
        server.join().unwrap();

        let store = node_b.store.read().unwrap();
        let lengths = store.hashgraph_lengths();
        assert_eq!(lengths[node_a.local()], 1);
        assert_eq!(lengths[node_b.local()], 2);

        let new_event = store.tail(node_b.local()).unwrap();
        assert!(!new_event.is_witness);
        assert_eq!(new_event.round, 1);
        let self_parent = store.get(&new_event.self_parent.unwrap()).unwrap();
        let other_parent = store.get(&new_event.other_parent.unwrap()).unwrap();
        assert_eq!(&self_parent.owner, node_b.local());
        assert_eq!(&other_parent.owner, node_a.local());
    }

    /// spec.md §8 S5: a negative `toSend` (responder ahead on that author)
    /// is tolerated, not sent, and does not grow the responder's store.
    #[test]
    fn s5_negative_to_send_is_not_sent() {
        let c_addr = Address::new("127.0.0.1:2");
        let (node_a, node_b, listener) = node_pair(&[c_addr.clone()]);

        seed_author_events(&node_a.store, &c_addr, 5);
        seed_author_events(&node_b.store, &c_addr, 7);

        let server_node = node_b.clone();
        let server = thread::spawn(move || {
            for _ in 0..2 {
                let (stream, _) = listener.accept().unwrap();
                server_node.handle_connection(stream);
            }
        });

        assert!(gossip::gossip_once(&node_a.store, &node_a.roster));
        server.join().unwrap();

        let store = node_b.store.read().unwrap();
        assert_eq!(store.sequence(&c_addr).len(), 7);
    }

    /// spec.md §8 S6: re-running `SyncAllEvents` with the same payload is
    /// idempotent on the pushed events (no duplicates), though each call
    /// still folds in its own new self-event.
    #[test]
    fn s6_duplicate_sync_all_events_is_idempotent_on_pushed_events() {
        let (node_a, node_b, listener) = node_pair(&[]);
        let b_addr = node_b.local().clone();

        let server_node = node_b.clone();
        let server = thread::spawn(move || {
            for _ in 0..2 {
                let (stream, _) = listener.accept().unwrap();
                server_node.handle_connection(stream);
            }
        });

        let a_init = node_a
            .store
            .read()
            .unwrap()
            .tail(node_a.local())
            .unwrap()
            .clone();
        let request = SyncAllEventsRequest {
            caller: node_a.local().clone(),
            events: vec![a_init],
        };

        crate::rpc::Client::sync_all_events(&b_addr, request.clone()).unwrap();
        crate::rpc::Client::sync_all_events(&b_addr, request).unwrap();
        server.join().unwrap();

        let store = node_b.store.read().unwrap();
        assert_eq!(store.sequence(node_a.local()).len(), 1);
        assert_eq!(store.sequence(node_b.local()).len(), 3);
    }
}
