// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! In-memory rooted tree of the mesh, keyed by node id.
//!
//! The arena holds parent/children links as ids rather than owning pointers,
//! so back-references cannot form ownership cycles. `routes` is a derived
//! view: every descendant maps to the direct child through which it is
//! reached; it is recomputed by the owner on every mutation.

use crate::error::{Error, Result};
use crate::node_id::NodeId;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The nested `{node, child: […]}` record a tree travels as inside
/// topology frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackedNode {
    pub node: NodeId,
    #[serde(default)]
    pub child: Vec<PackedNode>,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Links {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// The single-rooted tree every node keeps a copy of.
#[derive(Clone, Debug, PartialEq)]
pub struct Tree {
    root: NodeId,
    nodes: BTreeMap<NodeId, Links>,
}

impl Tree {
    pub fn new(root: NodeId) -> Self {
        let mut nodes = BTreeMap::new();
        let _ = nodes.insert(root, Links::default());
        Self { root, nodes }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|links| links.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|links| links.children.clone())
            .unwrap_or_default()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Inserts `child` as the last child of `parent`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.contains(child) {
            return Err(Error::Routing(child));
        }
        let links = self.nodes.get_mut(&parent).ok_or(Error::Routing(parent))?;
        links.children.push(child);
        let _ = self.nodes.insert(
            child,
            Links {
                parent: Some(parent),
                children: Vec::new(),
            },
        );
        Ok(())
    }

    /// Grafts a packed subtree below `parent`.
    pub fn attach(&mut self, parent: NodeId, subtree: &PackedNode) -> Result<()> {
        self.add_child(parent, subtree.node)?;
        for child in &subtree.child {
            self.attach(subtree.node, child)?;
        }
        Ok(())
    }

    /// Removes a node and its whole subtree. The root cannot be removed.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        if id == self.root {
            return Err(Error::Routing(id));
        }
        let links = self.nodes.remove(&id).ok_or(Error::Routing(id))?;
        if let Some(parent) = links.parent {
            if let Some(parent_links) = self.nodes.get_mut(&parent) {
                parent_links.children.retain(|c| *c != id);
            }
        }
        for child in links.children {
            // children of a removed node always exist in the arena
            let _ = self.remove(child);
        }
        Ok(())
    }

    /// Preorder list of all nodes below `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        for child in self.children(id) {
            out.push(child);
            out.extend(self.descendants(child));
        }
        out
    }

    /// The routing view from `from`: each descendant mapped to the direct
    /// child on the path towards it.
    pub fn routes(&self, from: NodeId) -> BTreeMap<NodeId, NodeId> {
        let mut table = BTreeMap::new();
        for child in self.children(from) {
            let _ = table.insert(child, child);
            for descendant in self.descendants(child) {
                let _ = table.insert(descendant, child);
            }
        }
        table
    }

    /// Distance from the root, when the node is present.
    pub fn depth(&self, id: NodeId) -> Option<usize> {
        if !self.contains(id) {
            return None;
        }
        let mut depth = 0;
        let mut cursor = id;
        while let Some(parent) = self.parent(cursor) {
            depth += 1;
            cursor = parent;
        }
        Some(depth)
    }

    pub fn pack(&self) -> PackedNode {
        self.pack_from(self.root)
    }

    /// Packs only the subtree rooted at `id`, when present.
    pub fn pack_subtree(&self, id: NodeId) -> Option<PackedNode> {
        self.contains(id).then(|| self.pack_from(id))
    }

    fn pack_from(&self, id: NodeId) -> PackedNode {
        PackedNode {
            node: id,
            child: self
                .children(id)
                .into_iter()
                .map(|child| self.pack_from(child))
                .collect(),
        }
    }

    /// Rebuilds a tree from its packed form; duplicate ids are malformed.
    pub fn unpack(packed: &PackedNode) -> Result<Self> {
        let mut tree = Tree::new(packed.node);
        for child in &packed.child {
            tree.attach(packed.node, child)
                .map_err(|_| Error::Codec("duplicate node in packed tree".to_string()))?;
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn id(byte: u8) -> NodeId {
        NodeId::from_bytes([0, 0, 0, 0, 0, byte])
    }

    fn chain(len: u8) -> Tree {
        let mut tree = Tree::new(id(0));
        for i in 1..len {
            tree.add_child(id(i - 1), id(i)).unwrap();
        }
        tree
    }

    #[test]
    fn add_and_remove_keep_links_symmetric() {
        let mut tree = Tree::new(id(0));
        tree.add_child(id(0), id(1)).unwrap();
        tree.add_child(id(0), id(2)).unwrap();
        tree.add_child(id(1), id(3)).unwrap();

        assert_eq!(tree.parent(id(3)), Some(id(1)));
        assert_eq!(tree.children(id(0)), vec![id(1), id(2)]);
        assert_eq!(tree.depth(id(3)), Some(2));

        tree.remove(id(1)).unwrap();
        assert!(!tree.contains(id(1)));
        assert!(!tree.contains(id(3)), "subtree goes with its root");
        assert_eq!(tree.children(id(0)), vec![id(2)]);
    }

    #[test]
    fn duplicate_or_unknown_ids_are_rejected() {
        let mut tree = chain(3);
        assert_matches!(tree.add_child(id(0), id(2)), Err(Error::Routing(_)));
        assert_matches!(tree.add_child(id(9), id(4)), Err(Error::Routing(_)));
        assert_matches!(tree.remove(id(0)), Err(Error::Routing(_)));
        assert_matches!(tree.remove(id(9)), Err(Error::Routing(_)));
    }

    #[test]
    fn descendants_are_preorder() {
        let mut tree = Tree::new(id(0));
        tree.add_child(id(0), id(1)).unwrap();
        tree.add_child(id(0), id(4)).unwrap();
        tree.add_child(id(1), id(2)).unwrap();
        tree.add_child(id(1), id(3)).unwrap();

        assert_eq!(tree.descendants(id(0)), vec![id(1), id(2), id(3), id(4)]);
        assert!(tree.descendants(id(2)).is_empty());
    }

    #[test]
    fn routes_map_descendants_to_direct_children() {
        let mut tree = Tree::new(id(0));
        tree.add_child(id(0), id(1)).unwrap();
        tree.add_child(id(0), id(2)).unwrap();
        tree.add_child(id(1), id(3)).unwrap();
        tree.add_child(id(3), id(4)).unwrap();

        let routes = tree.routes(id(0));
        assert_eq!(routes.get(&id(1)), Some(&id(1)));
        assert_eq!(routes.get(&id(3)), Some(&id(1)));
        assert_eq!(routes.get(&id(4)), Some(&id(1)));
        assert_eq!(routes.get(&id(2)), Some(&id(2)));
        assert_eq!(routes.get(&id(0)), None);

        // every mapped hop is a direct child and an ancestor of the target
        for (descendant, hop) in &routes {
            assert_eq!(tree.parent(*hop), Some(id(0)));
            let mut cursor = *descendant;
            while let Some(parent) = tree.parent(cursor) {
                if cursor == *hop {
                    break;
                }
                cursor = parent;
            }
            assert_eq!(cursor, *hop);
        }

        // an interior node only routes its own subtree
        let routes = tree.routes(id(1));
        assert_eq!(routes.get(&id(3)), Some(&id(3)));
        assert_eq!(routes.get(&id(4)), Some(&id(3)));
        assert_eq!(routes.get(&id(2)), None);
    }

    #[test]
    fn unpack_rejects_duplicate_ids() {
        let packed = PackedNode {
            node: id(0),
            child: vec![
                PackedNode {
                    node: id(1),
                    child: vec![],
                },
                PackedNode {
                    node: id(1),
                    child: vec![],
                },
            ],
        };
        assert_matches!(Tree::unpack(&packed), Err(Error::Codec(_)));
    }

    #[test]
    fn packed_form_matches_wire_shape() {
        let tree = chain(2);
        let json = serde_json::to_value(tree.pack()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "node": "000000000000",
                "child": [{"node": "000000000001", "child": []}]
            })
        );
    }

    proptest! {
        #[test]
        fn pack_round_trips(parents in proptest::collection::vec(0usize..16, 0..16)) {
            // parents[i] links node i+1 below some earlier node
            let mut tree = Tree::new(id(0));
            for (i, parent) in parents.iter().enumerate() {
                let child = id((i + 1) as u8);
                let parent = id((*parent % (i + 1)) as u8);
                tree.add_child(parent, child).unwrap();
            }
            prop_assert_eq!(Tree::unpack(&tree.pack()).unwrap(), tree);
        }
    }
}
