//! Graph Relations (spec.md §4.3): `see`, `strongly_see`, the BFS used by
//! `strongly_see`, and `findWitnessesOfARound`.
//!
//! `see` is specified recursively but implemented as an explicit worklist
//! over a memoization cache (spec.md §9 "Recursion in `see`": the
//! recursive formulation can blow the stack on deep DAGs).
use std::collections::{HashMap, HashSet, VecDeque};

use crate::address::{supermajority, Address};
use crate::event::Signature;
use crate::store::Store;

impl Store {
    /// `see(x, y)`: x can reach y through parent edges, with the
    /// author-based shortcut and witness same-round exclusion of spec.md
    /// §4.3.
    pub fn see(&mut self, x: Signature, y: Signature) -> bool {
        if let Some(&cached) = self.see_cache.get(&(x, y)) {
            return cached;
        }

        let mut stack = vec![(x, y)];
        while let Some(&(cx, cy)) = stack.last() {
            if self.see_cache.contains_key(&(cx, cy)) {
                stack.pop();
                continue;
            }

            let (ex_owner, ex_round, ex_witness, ex_initial, ex_sp, ex_op) = {
                let ex = self.get(&cx).expect("see: x not in store");
                (
                    ex.owner.clone(),
                    ex.round,
                    ex.is_witness,
                    ex.is_initial(),
                    ex.self_parent,
                    ex.other_parent,
                )
            };
            let (ey_owner, ey_round) = {
                let ey = self.get(&cy).expect("see: y not in store");
                (ey.owner.clone(), ey.round)
            };

            if cx == cy {
                self.see_cache.insert((cx, cy), true);
                stack.pop();
                continue;
            }
            if ex_owner == ey_owner && ex_round > ey_round {
                self.see_cache.insert((cx, cy), true);
                stack.pop();
                continue;
            }
            if ex_round < ey_round || ex_initial || (ex_witness && ex_round == ey_round) {
                self.see_cache.insert((cx, cy), false);
                stack.pop();
                continue;
            }

            let sp_ready = ex_sp.map_or(true, |s| self.see_cache.contains_key(&(s, cy)));
            let op_ready = ex_op.map_or(true, |s| self.see_cache.contains_key(&(s, cy)));

            if sp_ready && op_ready {
                let sp_sees = ex_sp.map_or(false, |s| self.see_cache[&(s, cy)]);
                let op_sees = ex_op.map_or(false, |s| self.see_cache[&(s, cy)]);
                self.see_cache.insert((cx, cy), sp_sees || op_sees);
                stack.pop();
            } else {
                if let (Some(s), false) = (ex_sp, sp_ready) {
                    stack.push((s, cy));
                }
                if let (Some(s), false) = (ex_op, op_ready) {
                    stack.push((s, cy));
                }
            }
        }
        self.see_cache[&(x, y)]
    }

    /// `getLatestAncestorFromAllNodes(e, minRound)`: BFS from `e` through
    /// both parent edges, expanding only nodes whose round is at least
    /// `min_round`, recording the most recent event visited per author.
    pub fn latest_ancestor_from_all_nodes(
        &mut self,
        e: Signature,
        min_round: u64,
    ) -> HashMap<Address, Signature> {
        let mut latest: HashMap<Address, Signature> = HashMap::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(e);
        visited.insert(e);

        while let Some(cur) = queue.pop_front() {
            let (round, owner, self_parent, other_parent) = {
                let ev = self
                    .get(&cur)
                    .expect("latest_ancestor_from_all_nodes: missing event");
                (ev.round, ev.owner.clone(), ev.self_parent, ev.other_parent)
            };

            // Rounds are non-decreasing along parent edges, so once a
            // node falls below min_round every ancestor of it does too:
            // stop expanding this branch.
            if round < min_round {
                continue;
            }

            let replace = match latest.get(&owner) {
                None => true,
                Some(&incumbent) if incumbent == cur => false,
                Some(&incumbent) => {
                    let incumbent_round = self
                        .get(&incumbent)
                        .expect("latest_ancestor_from_all_nodes: missing incumbent")
                        .round;
                    if round != incumbent_round {
                        round > incumbent_round
                    } else {
                        self.see(cur, incumbent)
                    }
                }
            };
            if replace {
                latest.insert(owner, cur);
            }

            for parent in [self_parent, other_parent].into_iter().flatten() {
                if visited.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
        }

        latest
    }

    /// `stronglySee(x, y)`: the latest ancestors of `x` from every author,
    /// taken no earlier than `y`'s round, include a supermajority that see
    /// `y`.
    pub fn strongly_see(&mut self, x: Signature, y: Signature) -> bool {
        let min_round = self.get(&y).expect("strongly_see: y not in store").round;
        let ancestors = self.latest_ancestor_from_all_nodes(x, min_round);
        let population = self.population();
        let count = ancestors.values().filter(|&&a| self.see(a, y)).count();
        supermajority(count, population)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use std::time::SystemTime;

    fn addr(n: u16) -> Address {
        Address::new(format!("127.0.0.1:{}", 9000 + n))
    }

    fn child(owner: Address, self_parent: Signature, other_parent: Option<Signature>) -> Event {
        Event {
            owner,
            signature: Signature::generate(),
            self_parent: Some(self_parent),
            other_parent,
            timestamp: SystemTime::now(),
            transactions: Vec::new(),
            round: 1,
            is_witness: false,
            is_famous: false,
            is_fame_decided: false,
            round_received: None,
            consensus_timestamp: None,
            latency: None,
        }
    }

    #[test]
    fn own_later_event_sees_own_earlier_event() {
        let mut store = Store::default();
        let a1 = Event::initial(addr(0), SystemTime::now());
        let a1_sig = a1.signature;
        store.append(a1).unwrap();
        let a2 = child(addr(0), a1_sig, None);
        let a2_sig = a2.signature;
        store.append(a2).unwrap();

        assert!(store.see(a2_sig, a1_sig));
        assert!(!store.see(a1_sig, a2_sig));
    }

    #[test]
    fn event_sees_itself_is_true_by_equality() {
        let mut store = Store::default();
        let a1 = Event::initial(addr(0), SystemTime::now());
        let sig = a1.signature;
        store.append(a1).unwrap();
        assert!(store.see(sig, sig));
    }

    #[test]
    fn other_parent_linked_event_sees_both_parents() {
        let mut store = Store::default();
        let a1 = Event::initial(addr(0), SystemTime::now());
        let a1_sig = a1.signature;
        store.append(a1).unwrap();
        let b1 = Event::initial(addr(1), SystemTime::now());
        let b1_sig = b1.signature;
        store.append(b1).unwrap();
        let b2 = child(addr(1), b1_sig, Some(a1_sig));
        let b2_sig = b2.signature;
        store.append(b2).unwrap();

        assert!(store.see(b2_sig, a1_sig));
        assert!(store.see(b2_sig, b1_sig));
    }

    #[test]
    fn memoized_see_matches_fresh_computation() {
        let mut store = Store::default();
        let a1 = Event::initial(addr(0), SystemTime::now());
        let a1_sig = a1.signature;
        store.append(a1).unwrap();
        let b1 = Event::initial(addr(1), SystemTime::now());
        let b1_sig = b1.signature;
        store.append(b1).unwrap();
        let b2 = child(addr(1), b1_sig, Some(a1_sig));
        let b2_sig = b2.signature;
        store.append(b2).unwrap();

        let first = store.see(b2_sig, a1_sig);
        assert!(store.see_cache.contains_key(&(b2_sig, a1_sig)));
        let second = store.see(b2_sig, a1_sig);
        assert_eq!(first, second);
    }

    #[test]
    fn strongly_see_requires_supermajority_of_authors() {
        // Four authors, each seeds a round-1 witness chained through the
        // previous author's event; the final event's ancestor-per-author
        // set should include all four and strongly see the first.
        let mut store = Store::default();
        let a = Event::initial(addr(0), SystemTime::now());
        let a_sig = a.signature;
        store.append(a).unwrap();
        let b = Event::initial(addr(1), SystemTime::now());
        let b_sig = b.signature;
        store.append(b).unwrap();
        let c = Event::initial(addr(2), SystemTime::now());
        let c_sig = c.signature;
        store.append(c).unwrap();
        let d = Event::initial(addr(3), SystemTime::now());
        let d_sig = d.signature;
        store.append(d).unwrap();

        let b2 = child(addr(1), b_sig, Some(a_sig));
        let b2_sig = b2.signature;
        store.append(b2).unwrap();
        let c2 = child(addr(2), c_sig, Some(b2_sig));
        let c2_sig = c2.signature;
        store.append(c2).unwrap();
        let d2 = child(addr(3), d_sig, Some(c2_sig));
        let d2_sig = d2.signature;
        store.append(d2).unwrap();

        assert!(store.strongly_see(d2_sig, a_sig));
    }
}
