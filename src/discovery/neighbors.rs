// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Soft state about every peer heard on the broadcast radio.

use crate::node_id::NodeId;
use crate::wire::Advertisement;

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// One observed peer.
#[derive(Clone, Copy, Debug)]
pub struct Neighbor {
    pub centrality: f32,
    pub router_rssi: f32,
    pub in_tree: bool,
    pub ttl: u16,
    pub last_rx: Instant,
    pub last_tx: Instant,
}

impl Neighbor {
    pub fn advertisement(&self, id: NodeId) -> Advertisement {
        Advertisement {
            id,
            centrality: self.centrality,
            router_rssi: self.router_rssi,
            in_tree: self.in_tree,
            ttl: self.ttl,
        }
    }
}

/// Outcome of recording an advertisement.
#[derive(Debug)]
pub enum Recorded {
    /// First sight of this peer: forward its advertisement once, ttl bumped.
    New(Advertisement),
    Known,
}

/// What a sweep decided: rows to drop, quiet peers to relay on their behalf.
#[derive(Default)]
pub struct Sweep {
    pub evicted: Vec<NodeId>,
    pub relays: Vec<Advertisement>,
}

/// Mapping of peer id to its latest observed state, owned by the broadcast
/// core; the transport reads snapshots for candidate selection.
pub struct NeighborTable {
    self_id: NodeId,
    rows: BTreeMap<NodeId, Neighbor>,
    last_changed: Instant,
}

impl NeighborTable {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            rows: BTreeMap::new(),
            last_changed: Instant::now(),
        }
    }

    /// Stores this node's own advertisement row; never evicted or relayed.
    pub fn record_self(&mut self, adv: &Advertisement, now: Instant) {
        let _ = self.rows.insert(
            self.self_id,
            Neighbor {
                centrality: adv.centrality,
                router_rssi: adv.router_rssi,
                in_tree: adv.in_tree,
                ttl: adv.ttl,
                last_rx: now,
                last_tx: now,
            },
        );
    }

    /// Ingests a received advertisement.
    ///
    /// A new peer is forwarded once immediately (ttl + 1) and bumps the
    /// settling clock; a known peer only refreshes its row, keeping the
    /// lowest ttl seen.
    pub fn record_ad(&mut self, adv: &Advertisement, now: Instant) -> Recorded {
        if adv.id == self.self_id {
            return Recorded::Known;
        }
        match self.rows.get_mut(&adv.id) {
            Some(row) => {
                row.centrality = adv.centrality;
                row.router_rssi = adv.router_rssi;
                row.in_tree = adv.in_tree;
                row.ttl = row.ttl.min(adv.ttl);
                row.last_rx = now;
                Recorded::Known
            }
            None => {
                let _ = self.rows.insert(
                    adv.id,
                    Neighbor {
                        centrality: adv.centrality,
                        router_rssi: adv.router_rssi,
                        in_tree: adv.in_tree,
                        ttl: adv.ttl,
                        last_rx: now,
                        last_tx: now,
                    },
                );
                self.last_changed = now;
                let mut relay = *adv;
                relay.ttl = adv.ttl.saturating_add(1);
                Recorded::New(relay)
            }
        }
    }

    /// Ages the table: evicts rows silent for twice the relay period and
    /// relays rows not forwarded for one relay period, so the graph stays
    /// connected beyond one hop.
    pub fn sweep(&mut self, now: Instant, relay_after: Duration) -> Sweep {
        let mut actions = Sweep::default();
        let eviction_after = 2 * relay_after;

        for (id, row) in &mut self.rows {
            if *id == self.self_id {
                continue;
            }
            if now.saturating_duration_since(row.last_rx) > eviction_after {
                actions.evicted.push(*id);
            } else if now.saturating_duration_since(row.last_tx) > relay_after {
                let mut relay = row.advertisement(*id);
                relay.ttl = row.ttl.saturating_add(1);
                row.last_tx = now;
                actions.relays.push(relay);
            }
        }
        for id in &actions.evicted {
            let _ = self.rows.remove(id);
            self.last_changed = now;
        }
        actions
    }

    pub fn last_changed(&self) -> Instant {
        self.last_changed
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Neighbor> {
        self.rows.get(&id)
    }

    /// All peer ids, self excluded.
    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.rows
            .keys()
            .copied()
            .filter(|id| *id != self.self_id)
            .collect()
    }

    /// Peers not yet claimed into the tree.
    pub fn claim_candidates(&self) -> Vec<NodeId> {
        self.rows
            .iter()
            .filter(|(id, row)| **id != self.self_id && !row.in_tree)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn id(byte: u8) -> NodeId {
        NodeId::from_bytes([0, 0, 0, 0, 0, byte])
    }

    fn adv(byte: u8, ttl: u16) -> Advertisement {
        Advertisement {
            id: id(byte),
            centrality: 0.0,
            router_rssi: 0.0,
            in_tree: false,
            ttl,
        }
    }

    const RELAY_AFTER: Duration = Duration::from_millis(13_000);

    #[test]
    fn first_sight_forwards_exactly_once() {
        let mut table = NeighborTable::new(id(0));
        let now = Instant::now();

        assert_matches!(table.record_ad(&adv(1, 0), now), Recorded::New(relay) => {
            assert_eq!(relay.ttl, 1);
        });
        // the same advertisement again, in quick succession
        assert_matches!(table.record_ad(&adv(1, 0), now), Recorded::Known);
    }

    #[test]
    fn known_rows_keep_the_lowest_ttl() {
        let mut table = NeighborTable::new(id(0));
        let now = Instant::now();
        let _ = table.record_ad(&adv(1, 2), now);
        let _ = table.record_ad(&adv(1, 5), now);
        assert_eq!(table.get(id(1)).unwrap().ttl, 2);
        let _ = table.record_ad(&adv(1, 1), now);
        assert_eq!(table.get(id(1)).unwrap().ttl, 1);
    }

    #[test]
    fn own_advertisement_is_ignored() {
        let mut table = NeighborTable::new(id(0));
        let before = table.last_changed();
        assert_matches!(
            table.record_ad(&adv(0, 0), Instant::now()),
            Recorded::Known
        );
        assert_eq!(table.last_changed(), before);
    }

    #[test]
    fn silence_evicts_after_twice_the_relay_period() {
        let mut table = NeighborTable::new(id(0));
        let start = Instant::now();
        let _ = table.record_ad(&adv(1, 0), start);

        let at = start + 2 * RELAY_AFTER;
        assert!(table.sweep(at, RELAY_AFTER).evicted.is_empty());

        let at = start + 2 * RELAY_AFTER + Duration::from_millis(1);
        let swept = table.sweep(at, RELAY_AFTER);
        assert_eq!(swept.evicted, vec![id(1)]);
        assert!(!table.contains(id(1)));
        assert_eq!(table.last_changed(), at);
    }

    #[test]
    fn quiet_rows_are_relayed_with_bumped_ttl() {
        let mut table = NeighborTable::new(id(0));
        let start = Instant::now();
        let _ = table.record_ad(&adv(1, 3), start);

        let at = start + RELAY_AFTER + Duration::from_millis(1);
        let swept = table.sweep(at, RELAY_AFTER);
        assert_eq!(swept.relays.len(), 1);
        assert_eq!(swept.relays[0].id, id(1));
        assert_eq!(swept.relays[0].ttl, 4);

        // relayed just now, nothing further to do
        assert!(table.sweep(at, RELAY_AFTER).relays.is_empty());
    }

    #[test]
    fn self_row_is_never_swept() {
        let mut table = NeighborTable::new(id(0));
        let start = Instant::now();
        table.record_self(&adv(0, 0), start);

        let at = start + 10 * RELAY_AFTER;
        let swept = table.sweep(at, RELAY_AFTER);
        assert!(swept.evicted.is_empty());
        assert!(swept.relays.is_empty());
        assert!(table.contains(id(0)));
        assert!(table.peer_ids().is_empty());
    }

    #[test]
    fn claim_candidates_exclude_in_tree_peers() {
        let mut table = NeighborTable::new(id(0));
        let now = Instant::now();
        let _ = table.record_ad(&adv(1, 0), now);
        let mut rooted = adv(2, 0);
        rooted.in_tree = true;
        let _ = table.record_ad(&rooted, now);

        assert_eq!(table.claim_candidates(), vec![id(1)]);
        assert_eq!(table.peer_ids(), vec![id(1), id(2)]);
    }
}
