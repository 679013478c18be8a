//! Consensus Kernel (spec.md §4.4): `divide_rounds`, `decide_fame`,
//! `find_order`, and the total order they feed.
use std::time::SystemTime;

use crate::address::{supermajority, Address};
use crate::event::Signature;
use crate::store::Store;

impl Store {
    /// `DivideRounds(e)`: assigns `e.round` and `e.is_witness` from its
    /// parents' rounds and how many round-`r` witnesses it strongly sees.
    ///
    /// Initial events are constructed pre-flagged as round-1 witnesses and
    /// never passed here (spec.md §4.4).
    pub fn divide_rounds(&mut self, e: Signature) {
        let (self_parent, other_parent) = {
            let ev = self.get(&e).expect("divide_rounds: event not in store");
            (
                ev.self_parent
                    .expect("divide_rounds: non-initial event has a self parent"),
                ev.other_parent
                    .expect("divide_rounds: non-initial event has an other parent"),
            )
        };
        let p_round = self.get(&self_parent).unwrap().round;
        let q_round = self.get(&other_parent).unwrap().round;
        let r = p_round.max(q_round);

        let witnesses: Vec<Signature> = self
            .witnesses_of_round(r)
            .iter()
            .map(|w| w.signature)
            .collect();
        let population = self.population();
        let strongly_seen = witnesses
            .iter()
            .filter(|&&w| self.strongly_see(e, w))
            .count();

        let round = if supermajority(strongly_seen, population) {
            r + 1
        } else {
            r
        };
        let is_witness = round > p_round;

        let ev = self.get_mut(&e).unwrap();
        ev.round = round;
        ev.is_witness = is_witness;
    }

    /// `DecideFame`: virtual voting over witnesses with undecided fame.
    pub fn decide_fame(&mut self) {
        let population = self.population();
        let authors: Vec<Address> = self.authors().cloned().collect();

        let mut undecided: Vec<(Address, u64, Signature)> = Vec::new();
        for author in &authors {
            let mut round = self.first_round_of_fame_undecided(author);
            loop {
                match self.witness_at(author, round) {
                    Some(ev) if !ev.is_fame_decided => {
                        undecided.push((author.clone(), round, ev.signature));
                        round += 1;
                    }
                    Some(_) => round += 1,
                    None => break,
                }
            }
        }

        let max_round = self.max_witness_round();
        for (owner, x_round, x_sig) in undecided {
            if self.get(&x_sig).map_or(true, |e| e.is_fame_decided) {
                continue;
            }
            let mut decided = false;
            for y_round in (x_round + 1)..=max_round {
                let mut ys: Vec<Signature> = self
                    .witnesses_of_round(y_round)
                    .iter()
                    .map(|w| w.signature)
                    .collect();
                ys.sort_by_key(|s| self.get(s).unwrap().owner.clone());

                for y in ys {
                    let mut voters: Vec<Signature> = self
                        .witnesses_of_round(y_round - 1)
                        .iter()
                        .map(|w| w.signature)
                        .collect();
                    voters.retain(|&s| self.strongly_see(y, s));

                    let (mut trues, mut falses) = (0usize, 0usize);
                    for s in &voters {
                        if self.see(*s, x_sig) {
                            trues += 1;
                        } else {
                            falses += 1;
                        }
                    }
                    let majority = trues >= falses;
                    let decisive = if majority {
                        supermajority(trues, population)
                    } else {
                        supermajority(falses, population)
                    };
                    if decisive {
                        let ev = self.get_mut(&x_sig).unwrap();
                        ev.is_famous = majority;
                        ev.is_fame_decided = true;
                        self.advance_first_round_of_fame_undecided(&owner, x_round + 1);
                        decided = true;
                        break;
                    }
                }
                if decided {
                    break;
                }
            }
            // If no y converges a vote yet (decided == false), x stays in
            // the undecided pool; later gossip rounds bring new witnesses
            // that may supply the missing votes. A coin round for
            // pathological non-convergence is a known omission (spec.md
            // §4.4, §9) and is not implemented here.
        }
    }

    /// `FindOrder`: assigns `round_received` and `consensus_timestamp` to
    /// every event whose deciding round is now fully fame-decided, and
    /// appends it to the total order.
    pub fn find_order(&mut self, now: SystemTime) {
        let r_star = self
            .authors()
            .map(|a| self.first_round_of_fame_undecided(a))
            .min()
            .unwrap_or(1);
        let authors: Vec<Address> = self.authors().cloned().collect();

        for author in authors {
            loop {
                let idx = self.first_event_of_not_consensus_index(&author);
                let pending = self.not_yet_consensus(&author);
                let Some(&sig) = pending.first() else {
                    break;
                };
                let e_round = self.get(&sig).unwrap().round;

                let mut found = None;
                for r in e_round..r_star {
                    if self.round_fame_complete_and_sees(r, sig) {
                        found = Some(r);
                        break;
                    }
                }
                let Some(r) = found else {
                    break;
                };

                self.assign_consensus(sig, r, now);
                self.advance_first_event_of_not_consensus_index(&author, idx + 1);
            }
        }

        self.resort_from(0);
    }

    fn round_fame_complete_and_sees(&mut self, round: u64, e: Signature) -> bool {
        let witnesses: Vec<Signature> = self
            .witnesses_of_round(round)
            .iter()
            .map(|w| w.signature)
            .collect();
        let mut famous = Vec::new();
        let mut has_nonfamous = false;
        for w in &witnesses {
            let ev = self.get(w).unwrap();
            if ev.is_fame_decided {
                if ev.is_famous {
                    famous.push(*w);
                } else {
                    has_nonfamous = true;
                }
            }
        }
        if !has_nonfamous {
            return false;
        }
        famous.into_iter().all(|w| self.see(w, e))
    }

    fn assign_consensus(&mut self, e: Signature, round: u64, now: SystemTime) {
        let e_round = self.get(&e).unwrap().round;
        let famous: Vec<Signature> = self
            .witnesses_of_round(round)
            .iter()
            .filter(|w| w.is_fame_decided && w.is_famous)
            .map(|w| w.signature)
            .collect();

        let mut s_set = Vec::new();
        for w in famous {
            let mut cur = w;
            loop {
                let (cur_round, self_parent) = {
                    let ev = self.get(&cur).unwrap();
                    (ev.round, ev.self_parent)
                };
                if cur_round < e_round {
                    break;
                }
                let sees = self.see(cur, e);
                let parent_sees = self_parent.map_or(false, |p| self.see(p, e));
                if sees && !parent_sees {
                    s_set.push(cur);
                    break;
                }
                match self_parent {
                    Some(p) => cur = p,
                    None => break,
                }
            }
        }

        let created = self.get(&e).unwrap().timestamp;
        let mut timestamps: Vec<SystemTime> =
            s_set.iter().map(|s| self.get(s).unwrap().timestamp).collect();
        timestamps.sort();
        let median = if timestamps.is_empty() {
            created
        } else {
            timestamps[timestamps.len() / 2]
        };

        let ev = self.get_mut(&e).unwrap();
        ev.round_received = Some(round);
        ev.consensus_timestamp = Some(median);
        ev.latency = now.duration_since(created).ok();
        self.push_consensus(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use std::time::{Duration, SystemTime};

    fn addr(n: u16) -> Address {
        Address::new(format!("127.0.0.1:{}", 9000 + n))
    }

    fn child(owner: Address, self_parent: Signature, other_parent: Signature) -> Event {
        Event {
            owner,
            signature: Signature::generate(),
            self_parent: Some(self_parent),
            other_parent: Some(other_parent),
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

    /// spec.md §8 S1: two-node sync produces a round-1, non-witness event.
    #[test]
    fn two_node_sync_produces_round_one_non_witness() {
        let mut store = Store::default();
        let a1 = Event::initial(addr(0), SystemTime::now());
        let a1_sig = a1.signature;
        store.append(a1).unwrap();
        let b1 = Event::initial(addr(1), SystemTime::now());
        let b1_sig = b1.signature;
        store.append(b1).unwrap();

        let mut b2 = child(addr(1), b1_sig, a1_sig);
        b2.round = 0; // placeholder, overwritten by divide_rounds
        let b2_sig = b2.signature;
        store.append(b2).unwrap();
        store.divide_rounds(b2_sig);

        let b2 = store.get(&b2_sig).unwrap();
        assert_eq!(b2.round, 1);
        assert!(!b2.is_witness);
    }

    /// spec.md §8 S4: median timestamp, odd and even |S|.
    #[test]
    fn median_timestamp_matches_spec_examples() {
        let base = SystemTime::UNIX_EPOCH;
        let odd: Vec<SystemTime> = [10u64, 30, 20, 50, 40]
            .iter()
            .map(|ns| base + Duration::from_nanos(*ns))
            .collect();
        let mut sorted = odd.clone();
        sorted.sort();
        assert_eq!(sorted[sorted.len() / 2], base + Duration::from_nanos(30));

        let even: Vec<SystemTime> = [10u64, 20, 30, 40]
            .iter()
            .map(|ns| base + Duration::from_nanos(*ns))
            .collect();
        let mut sorted = even.clone();
        sorted.sort();
        assert_eq!(sorted[sorted.len() / 2], base + Duration::from_nanos(30));
    }

    /// spec.md §8 property 3: at most one witness per (author, round).
    #[test]
    fn witness_uniqueness_per_author_round() {
        let mut store = Store::default();
        let a1 = Event::initial(addr(0), SystemTime::now());
        let a1_sig = a1.signature;
        store.append(a1).unwrap();
        assert_eq!(store.witnesses_of_round(1).len(), 1);
        assert_eq!(store.witness_at(&addr(0), 1).unwrap().signature, a1_sig);
    }
}
