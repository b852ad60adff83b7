// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Topology synchronisation.
//!
//! Parents push their full packed tree to each child periodically; any
//! add/loss of a child travels as an incremental change event up to the
//! root, which folds it into its own tree and echoes the result back down.

use super::{Ingress, TransportCore};
use crate::node_id::NodeId;
use crate::topology::Tree;
use crate::wire::tree_msg::{TopologyChange, TreeMsg};

impl TransportCore {
    /// Full-tree replacement, accepted only from our parent (or, at the
    /// root, from itself as its own source).
    pub(super) async fn on_propagate(&self, msg: TreeMsg, _ingress: Ingress) {
        let packed = match msg.topology() {
            Ok(Some(packed)) => packed,
            // blank propagates from children are beacons
            Ok(None) => return,
            Err(error) => {
                trace!("{}: malformed topology frame: {error}", self.id());
                return;
            }
        };
        let Ok(src) = msg.src_id() else { return };
        let tree = match Tree::unpack(&packed) {
            Ok(tree) => tree,
            Err(error) => {
                trace!("{}: malformed packed tree: {error}", self.id());
                return;
            }
        };
        let replaced = self.with_links(|links| {
            let from_parent = links.parent_id == Some(src);
            let from_own_root = links
                .tree
                .as_ref()
                .map(|current| current.root() == src)
                .unwrap_or(false);
            if !(from_parent || from_own_root) {
                return false;
            }
            links.tree = Some(tree);
            self.refresh_routes(links);
            true
        });
        if replaced {
            trace!("{}: topology refreshed from {src}", self.id());
        }
    }

    /// An incremental change event.
    ///
    /// With no local tree yet, the carried one is adopted. At the root the
    /// changed id is folded in: a known id means the node died, an unknown
    /// one is attached below its origin. Intermediates replace their tree
    /// wholesale. In every case the updated tree is echoed to our children.
    pub(super) async fn on_changed(&self, msg: TreeMsg) {
        let change = match msg.change() {
            Ok(change) => change,
            Err(error) => {
                trace!("{}: malformed change frame: {error}", self.id());
                return;
            }
        };
        let Ok(origin) = msg.src_id() else { return };

        let applied = self.with_links(|links| {
            let changed = change.changed_id;
            match links.tree.as_mut() {
                None => match Tree::unpack(&change.new_topology) {
                    Ok(tree) => {
                        debug!("{}: adopting first topology", self.id());
                        links.tree = Some(tree);
                        self.refresh_routes(links);
                        true
                    }
                    Err(error) => {
                        trace!("{}: malformed packed tree: {error}", self.id());
                        false
                    }
                },
                Some(tree) if tree.root() == self.id() => {
                    if tree.contains(changed) {
                        // the changed node died
                        let _ = tree.remove(changed);
                    } else if tree.contains(origin) {
                        // a new node below its origin, possibly with a
                        // subtree it already accumulated
                        match Tree::unpack(&change.new_topology) {
                            Ok(carried) if carried.contains(changed) => {
                                let subtree = carried.pack_subtree(changed);
                                if let Some(subtree) = subtree {
                                    let _ = tree.attach(origin, &subtree);
                                }
                            }
                            _ => {
                                let _ = tree.add_child(origin, changed);
                            }
                        }
                    } else {
                        trace!(
                            "{}: change from unknown origin {origin}, ignored",
                            self.id()
                        );
                        return false;
                    }
                    self.refresh_routes(links);
                    true
                }
                Some(_) => match Tree::unpack(&change.new_topology) {
                    Ok(tree) => {
                        links.tree = Some(tree);
                        self.refresh_routes(links);
                        true
                    }
                    Err(error) => {
                        trace!("{}: malformed packed tree: {error}", self.id());
                        false
                    }
                },
            }
        });
        if applied {
            self.echo_change_to_children(change.changed_id).await;
        }
    }

    /// Reports a local child add/loss towards the root. The root folds the
    /// change in directly and echoes downward.
    pub(super) async fn emit_topology_changed(&self, changed: NodeId) {
        let snapshot = self.with_links(|links| {
            links
                .tree
                .as_ref()
                .map(|tree| (tree.root(), tree.pack(), tree.root() == self.id()))
        });
        let Some((root, packed, is_root)) = snapshot else {
            return;
        };
        if is_root {
            self.echo_change_to_children(changed).await;
            return;
        }
        let change = TopologyChange {
            changed_id: changed,
            new_topology: packed,
        };
        match TreeMsg::changed(self.id(), root.to_hex(), &change) {
            Ok(msg) => self.on_frame(msg, Ingress::Local).await,
            Err(error) => warn!("{}: failed to encode change: {error}", self.id()),
        }
    }

    /// Sends the current tree to each child as a change event.
    async fn echo_change_to_children(&self, changed: NodeId) {
        let snapshot = self.with_links(|links| {
            links.tree.as_ref().map(|tree| {
                let targets: Vec<_> = links
                    .children
                    .iter()
                    .map(|(id, link)| (*id, link.clone()))
                    .collect();
                (tree.pack(), targets)
            })
        });
        let Some((packed, targets)) = snapshot else {
            return;
        };
        let change = TopologyChange {
            changed_id: changed,
            new_topology: packed,
        };
        for (child, link) in targets {
            match TreeMsg::changed(self.id(), child.to_hex(), &change)
                .and_then(|msg| msg.to_line())
            {
                Ok(line) => self.send_checked(Some(child), &link, &line).await,
                Err(error) => warn!("{}: failed to encode change: {error}", self.id()),
            }
        }
    }
}
