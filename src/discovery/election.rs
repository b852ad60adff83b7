// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Root election: once the neighbour set has settled and no in-tree peer
//! has ever been observed, the lowest id among self and neighbours wins.
//! A configured root id short-circuits the rule.

use super::{DiscoveryCore, JoinSignal};
use crate::node_id::NodeId;
use crate::wire::Frame;

use tokio::time::{sleep, Instant};

impl DiscoveryCore {
    pub(super) async fn election_loop(self) {
        let settle = self.config().timing.settle();
        let poll = self.config().timing.sweep();
        loop {
            if self.seen_topology() {
                debug!(
                    "{}: another node is already in a tree, waiting to be claimed",
                    self.id()
                );
                return;
            }
            let last_changed = self
                .neighbors()
                .read()
                .expect("poisoned lock")
                .last_changed();
            if Instant::now().saturating_duration_since(last_changed) >= settle {
                break;
            }
            sleep(poll).await;
        }

        let peers = self
            .neighbors()
            .read()
            .expect("poisoned lock")
            .peer_ids();
        let winner = electoral_winner(self.id(), &peers, self.config().root);
        if winner == self.id() {
            info!("{}: elected root of the mesh", self.id());
            self.set_in_tree(true);
            self.status().send_modify(|s| s.is_root = true);
            if self.config().emit_root_elected {
                let adv = crate::wire::Advertisement {
                    id: self.id(),
                    centrality: 0.0,
                    router_rssi: 0.0,
                    in_tree: true,
                    ttl: 0,
                };
                if let Err(error) = self
                    .send_frame(NodeId::BROADCAST, &Frame::RootElected(adv))
                    .await
                {
                    warn!("{}: failed to announce election: {error}", self.id());
                }
            }
            self.signal_join(JoinSignal::Root);
        } else {
            info!(
                "{}: {winner} should become root, waiting to be claimed",
                self.id()
            );
        }
    }
}

/// Deterministic selector over the local view: a configured root wins
/// outright, otherwise the lowest id of self and all neighbours.
fn electoral_winner(self_id: NodeId, peers: &[NodeId], configured: Option<NodeId>) -> NodeId {
    if let Some(root) = configured {
        return root;
    }
    peers
        .iter()
        .copied()
        .chain(std::iter::once(self_id))
        .min()
        .unwrap_or(self_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> NodeId {
        NodeId::from_bytes([0, 0, 0, 0, 0, byte])
    }

    #[test]
    fn lowest_id_wins() {
        assert_eq!(electoral_winner(id(2), &[id(3), id(5)], None), id(2));
        assert_eq!(electoral_winner(id(4), &[id(3), id(5)], None), id(3));
    }

    #[test]
    fn a_lone_node_elects_itself() {
        assert_eq!(electoral_winner(id(9), &[], None), id(9));
    }

    #[test]
    fn configured_root_overrides_the_rule() {
        assert_eq!(electoral_winner(id(1), &[id(2)], Some(id(2))), id(2));
    }
}
