// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::{AppEvent, NodeCmd, NodeStatus};
use crate::error::{Error, Result};
use crate::node_id::NodeId;

use serde_json::Value;
use tokio::sync::{mpsc, watch};

/// The application's endpoint to a running [`super::Node`]: sends addressed
/// by node id, delivered frames, and a status watch. Survives node resets.
pub struct NodeHandle {
    id: NodeId,
    cmd_tx: mpsc::Sender<NodeCmd>,
    app_rx: mpsc::Receiver<AppEvent>,
    status_rx: watch::Receiver<NodeStatus>,
}

impl NodeHandle {
    pub(super) fn new(
        id: NodeId,
        cmd_tx: mpsc::Sender<NodeCmd>,
        app_rx: mpsc::Receiver<AppEvent>,
        status_rx: watch::Receiver<NodeStatus>,
    ) -> Self {
        Self {
            id,
            cmd_tx,
            app_rx,
            status_rx,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Reports a button press of the given duration to the node.
    pub async fn press_button(&self, held_ms: u64) -> Result<()> {
        self.send_cmd(NodeCmd::Button { held_ms }).await
    }

    /// Single destination via routing.
    pub async fn send_to(&self, dst: NodeId, payload: Value) -> Result<()> {
        self.send_cmd(NodeCmd::SendTo(dst, payload)).await
    }

    /// Every known node via routing.
    pub async fn send_to_all(&self, payload: Value) -> Result<()> {
        self.send_cmd(NodeCmd::SendToAll(payload)).await
    }

    /// Directly connected peers only.
    pub async fn send_to_nodes(&self, payload: Value, peers: Vec<NodeId>) -> Result<()> {
        self.send_cmd(NodeCmd::SendToNodes(payload, peers)).await
    }

    /// The next application frame addressed to this node (or flooded);
    /// `None` once the node is gone.
    pub async fn next_app_event(&mut self) -> Option<AppEvent> {
        self.app_rx.recv().await
    }

    /// Current node status.
    pub fn status(&self) -> NodeStatus {
        self.status_rx.borrow().clone()
    }

    /// Waits until the status satisfies the predicate and returns it.
    pub async fn wait_status(
        &mut self,
        mut predicate: impl FnMut(&NodeStatus) -> bool,
    ) -> Result<NodeStatus> {
        loop {
            {
                let status = self.status_rx.borrow();
                if predicate(&status) {
                    return Ok(status.clone());
                }
            }
            self.status_rx
                .changed()
                .await
                .map_err(|_| Error::Channel("node status"))?;
        }
    }

    async fn send_cmd(&self, cmd: NodeCmd) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::Channel("node commands"))
    }
}
