// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Tree frames: one JSON record per line on a parent/child stream.

use crate::error::{Error, Result};
use crate::node_id::NodeId;
use crate::topology::PackedNode;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Full tree pushed from a parent to each child.
pub const FLAG_TOPOLOGY_PROPAGATE: u8 = 1;
/// Incremental change reported towards the root and echoed back down.
pub const FLAG_TOPOLOGY_CHANGED: u8 = 2;
/// First application flag; everything at or above it is application traffic.
pub const FLAG_APP: u8 = 3;

/// `dst` of a frame flooded to the whole mesh.
pub const DST_BROADCAST: &str = "ffffffffffff";
/// `dst` of the beacon a child sends so its parent can register its id.
pub const DST_PARENT: &str = "parent";
/// `dst` used when the root echoes a change to each of its children.
pub const DST_CHILDREN: &str = "children";

/// One tree frame. `src`/`dst` are 12-char hex ids, except for the reserved
/// `dst` forms above.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeMsg {
    pub src: String,
    pub dst: String,
    pub flag: u8,
    pub msg: Value,
}

/// Payload of a TOPOLOGY_CHANGED frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopologyChange {
    pub changed_id: NodeId,
    pub new_topology: PackedNode,
}

impl TreeMsg {
    pub fn propagate(src: NodeId, dst: impl Into<String>, tree: Option<&PackedNode>) -> Result<Self> {
        let msg = match tree {
            Some(packed) => serde_json::to_value(packed)?,
            None => Value::Null,
        };
        Ok(Self {
            src: src.to_hex(),
            dst: dst.into(),
            flag: FLAG_TOPOLOGY_PROPAGATE,
            msg,
        })
    }

    pub fn changed(src: NodeId, dst: impl Into<String>, change: &TopologyChange) -> Result<Self> {
        Ok(Self {
            src: src.to_hex(),
            dst: dst.into(),
            flag: FLAG_TOPOLOGY_CHANGED,
            msg: serde_json::to_value(change)?,
        })
    }

    pub fn app(src: NodeId, dst: impl Into<String>, payload: Value) -> Self {
        Self {
            src: src.to_hex(),
            dst: dst.into(),
            flag: FLAG_APP,
            msg: payload,
        }
    }

    /// Serialises to one newline-terminated record.
    pub fn to_line(&self) -> Result<String> {
        Ok(format!("{}\n", serde_json::to_string(self)?))
    }

    /// Parses one record; frames with an unknown flag are malformed and get
    /// dropped by the caller.
    pub fn parse_line(line: &str) -> Result<Self> {
        let msg: TreeMsg = serde_json::from_str(line)?;
        if msg.flag < FLAG_TOPOLOGY_PROPAGATE {
            return Err(Error::Codec(format!("unknown tree frame flag {}", msg.flag)));
        }
        Ok(msg)
    }

    pub fn src_id(&self) -> Result<NodeId> {
        self.src.parse()
    }

    /// The destination as a node id, when it is one.
    pub fn dst_id(&self) -> Option<NodeId> {
        if self.dst == DST_PARENT || self.dst == DST_CHILDREN {
            return None;
        }
        self.dst.parse().ok()
    }

    pub fn is_broadcast(&self) -> bool {
        self.dst == DST_BROADCAST
    }

    pub fn is_app(&self) -> bool {
        self.flag >= FLAG_APP
    }

    /// The packed tree of a propagate frame; `None` for the empty beacon.
    pub fn topology(&self) -> Result<Option<PackedNode>> {
        if self.msg.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(self.msg.clone())?))
    }

    pub fn change(&self) -> Result<TopologyChange> {
        Ok(serde_json::from_value(self.msg.clone())?)
    }
}
