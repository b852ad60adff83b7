// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The node aggregate: one broadcast core, one transport core, and the
//! reset cycle that ties them together.
//!
//! Losing the parent discards the whole local tree; the node then rebuilds
//! both cores from scratch and re-enters the election/claim cycle with its
//! credential intact. Applications talk to the node through a channel-based
//! handle, so a reset never invalidates their endpoint.

mod api;

pub use api::NodeHandle;

use crate::config::Config;
use crate::crypto::Credential;
use crate::discovery::DiscoveryCore;
use crate::error::Result;
use crate::node_id::NodeId;
use crate::radio::{BroadcastRadioRef, WifiRef};
use crate::transport::TransportCore;

use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Point-in-time view of a node, published on a watch channel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeStatus {
    pub has_credential: bool,
    pub in_tree: bool,
    pub is_root: bool,
    pub parent: Option<NodeId>,
    /// Every id in the currently known tree, self included once linked.
    pub tree_nodes: Vec<NodeId>,
}

impl NodeStatus {
    pub fn tree_size(&self) -> usize {
        self.tree_nodes.len()
    }
}

/// An application frame delivered to this node.
#[derive(Clone, Debug)]
pub struct AppEvent {
    pub src: NodeId,
    pub payload: Value,
}

#[derive(Debug)]
pub(crate) enum NodeCmd {
    SendTo(NodeId, Value),
    SendToAll(Value),
    SendToNodes(Value, Vec<NodeId>),
    Button { held_ms: u64 },
}

/// One mesh node, generic over its radio drivers.
pub struct Node {
    id: NodeId,
    config: Arc<Config>,
    radio: BroadcastRadioRef,
    wifi: WifiRef,
    credential: Arc<RwLock<Credential>>,
    cmd_rx: mpsc::Receiver<NodeCmd>,
    app_tx: mpsc::Sender<AppEvent>,
    status_tx: watch::Sender<NodeStatus>,
    cancel: CancellationToken,
}

impl Node {
    pub fn new(
        id: NodeId,
        config: Config,
        radio: BroadcastRadioRef,
        wifi: WifiRef,
    ) -> Result<(Self, NodeHandle)> {
        let credential = Arc::new(RwLock::new(config.credential()?));
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (app_tx, app_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(NodeStatus::default());
        let node = Self {
            id,
            config: Arc::new(config),
            radio,
            wifi,
            credential,
            cmd_rx,
            app_tx,
            status_tx,
            cancel: CancellationToken::new(),
        };
        let handle = NodeHandle::new(id, cmd_tx, app_rx, status_rx);
        Ok((node, handle))
    }

    /// Runs the node until its handle is dropped. Each pass of the outer
    /// loop is one life of the two cores; parent loss starts the next one.
    pub async fn run(mut self) -> Result<()> {
        info!("{}: node starting", self.id);
        loop {
            let cycle = self.cancel.child_token();
            let reset = CancellationToken::new();
            let (join_tx, join_rx) = watch::channel(None);

            let discovery = DiscoveryCore::new(
                self.id,
                self.config.clone(),
                self.radio.clone(),
                self.credential.clone(),
                join_tx,
                self.status_tx.clone(),
                cycle.clone(),
            );
            let transport = TransportCore::new(
                self.config.clone(),
                discovery.clone(),
                self.wifi.clone(),
                self.app_tx.clone(),
                join_rx,
                self.status_tx.clone(),
                reset.clone(),
                cycle.clone(),
            );

            discovery.start();
            {
                let transport = transport.clone();
                let id = self.id;
                discovery.spawn_task(async move {
                    if let Err(error) = transport.run().await {
                        warn!("{id}: transport failed, resetting: {error}");
                        transport.request_reset();
                    }
                });
            }

            let shutdown = loop {
                tokio::select! {
                    _ = reset.cancelled() => break false,
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(cmd) => self.dispatch(cmd, &discovery, &transport).await,
                        None => break true,
                    },
                }
            };
            cycle.cancel();
            if shutdown {
                info!("{}: handle dropped, node stopping", self.id);
                return Ok(());
            }

            // forget everything but the credential and go again
            self.status_tx.send_modify(|status| {
                let has_credential = status.has_credential;
                *status = NodeStatus::default();
                status.has_credential = has_credential;
            });
            info!("{}: re-entering discovery after reset", self.id);
        }
    }

    async fn dispatch(&self, cmd: NodeCmd, discovery: &DiscoveryCore, transport: &TransportCore) {
        match cmd {
            NodeCmd::Button { held_ms } => discovery.on_button(held_ms).await,
            NodeCmd::SendTo(dst, payload) => {
                if let Err(error) = transport.send_to(dst, payload).await {
                    warn!("{}: send failed: {error}", self.id);
                }
            }
            NodeCmd::SendToAll(payload) => {
                if let Err(error) = transport.send_to_all(payload).await {
                    warn!("{}: broadcast send failed: {error}", self.id);
                }
            }
            NodeCmd::SendToNodes(payload, peers) => {
                if let Err(error) = transport.send_to_nodes(payload, &peers).await {
                    warn!("{}: direct send failed: {error}", self.id);
                }
            }
        }
    }
}
