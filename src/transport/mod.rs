// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The connection-oriented side of a node: one stream up to the parent, a
//! listening server for children, routing of tree frames, the claim loop
//! that grows the tree, and failure-driven repair.
//!
//! Parent loss is terminal for the local subtree: the whole node resets and
//! re-enters the election/claim cycle. Child loss is a single deletion plus
//! a change event towards the root.

mod bridge;
mod listener;
mod sync;

use crate::config::Config;
use crate::discovery::{DiscoveryCore, JoinSignal};
use crate::error::{Error, Result};
use crate::node::{AppEvent, NodeStatus};
use crate::node_id::NodeId;
use crate::radio::WifiRef;
use crate::topology::Tree;
use crate::wire::tree_msg::{TreeMsg, DST_PARENT, FLAG_TOPOLOGY_CHANGED, FLAG_TOPOLOGY_PROPAGATE};

use futures::future::join_all;
use rand::Rng;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// A live stream to a directly connected peer.
#[derive(Clone)]
pub(crate) struct PeerLink {
    addr: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl PeerLink {
    fn new(addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            addr,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    async fn send_raw(&self, line: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// Where a frame came in from, so broadcast fan-out can skip the ingress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Ingress {
    Parent,
    Child(NodeId),
    Bridge,
    Local,
}

#[derive(Default)]
struct Links {
    parent: Option<PeerLink>,
    parent_id: Option<NodeId>,
    children: BTreeMap<NodeId, PeerLink>,
    bridge: Option<PeerLink>,
    tree: Option<Tree>,
    routes: BTreeMap<NodeId, NodeId>,
}

/// The stream-transport side of a node.
#[derive(Clone)]
pub struct TransportCore {
    inner: Arc<Inner>,
}

struct Inner {
    id: NodeId,
    config: Arc<Config>,
    discovery: DiscoveryCore,
    wifi: WifiRef,
    links: StdMutex<Links>,
    app_tx: mpsc::Sender<AppEvent>,
    join_rx: watch::Receiver<Option<JoinSignal>>,
    status: watch::Sender<NodeStatus>,
    /// Cancelled by us on parent loss; the node tears down and starts over.
    reset: CancellationToken,
    cancel: CancellationToken,
}

impl TransportCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        discovery: DiscoveryCore,
        wifi: WifiRef,
        app_tx: mpsc::Sender<AppEvent>,
        join_rx: watch::Receiver<Option<JoinSignal>>,
        status: watch::Sender<NodeStatus>,
        reset: CancellationToken,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: discovery.id(),
                config,
                discovery,
                wifi,
                links: StdMutex::new(Links::default()),
                app_tx,
                join_rx,
                status,
                reset,
                cancel,
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub(crate) fn discovery(&self) -> &DiscoveryCore {
        &self.inner.discovery
    }

    /// Waits for the broadcast layer's verdict, links up, then serves
    /// children and claims new ones.
    pub async fn run(&self) -> Result<()> {
        let mut join_rx = self.inner.join_rx.clone();
        let signal = loop {
            let current = join_rx.borrow().clone();
            if let Some(signal) = current {
                break signal;
            }
            if join_rx.changed().await.is_err() {
                return Err(Error::Channel("join signal"));
            }
        };

        match signal {
            JoinSignal::Root => {
                info!("{}: starting a tree with self at the root", self.id());
                self.with_links(|links| {
                    links.tree = Some(Tree::new(self.inner.id));
                    self.refresh_routes(links);
                });
                if self.inner.config.user_bridge {
                    let core = self.clone();
                    self.spawn_task(bridge::serve(core));
                }
            }
            JoinSignal::Station { ssid, password } => {
                self.connect_to_parent(&ssid, &password).await?;
            }
        }

        self.spawn_task(listener::serve(self.clone()));
        Ok(())
    }

    /// Joins the parent's access point and opens the tree stream to it. The
    /// parent's id is learnt from the first frame it sends.
    async fn connect_to_parent(&self, ssid: &str, password: &str) -> Result<()> {
        let gateway = self.inner.wifi.join(ssid, password).await?;
        info!("{}: joined parent network {ssid}, gateway {gateway}", self.id());

        let stream = TcpStream::connect(gateway).await?;
        let addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let link = PeerLink::new(addr, write_half);
        self.with_links(|links| links.parent = Some(link));
        info!("{}: connection to parent open", self.id());

        self.spawn_task(self.clone().beacon_loop());
        self.spawn_task(self.clone().parent_reader(read_half));
        Ok(())
    }

    /// Periodic empty frame addressed to `"parent"`; its only purpose is to
    /// let the parent associate this connection with our id.
    async fn beacon_loop(self) {
        let period = self.inner.config.timing.beacon();
        loop {
            let Some(parent) = self.with_links(|links| links.parent.clone()) else {
                return;
            };
            match TreeMsg::propagate(self.inner.id, DST_PARENT, None)
                .and_then(|msg| msg.to_line())
            {
                Ok(line) => {
                    if parent.send_raw(&line).await.is_err() {
                        return;
                    }
                }
                Err(error) => warn!("{}: failed to encode beacon: {error}", self.id()),
            }
            sleep(period).await;
        }
    }

    async fn parent_reader(self, read_half: OwnedReadHalf) {
        use tokio::io::AsyncBufReadExt;
        let mut lines = tokio::io::BufReader::new(read_half).lines();
        let mut registered = false;
        while let Ok(Some(line)) = lines.next_line().await {
            let msg = match TreeMsg::parse_line(&line) {
                Ok(msg) => msg,
                Err(error) => {
                    trace!("{}: dropping tree frame: {error}", self.id());
                    continue;
                }
            };
            if !registered {
                // application frames are ignored until the peer introduces
                // itself with a topology frame
                if msg.is_app() {
                    continue;
                }
                let Ok(parent_id) = msg.src_id() else { continue };
                info!("{}: parent registered as {parent_id}", self.id());
                self.with_links(|links| links.parent_id = Some(parent_id));
                self.inner
                    .status
                    .send_modify(|s| s.parent = Some(parent_id));
                registered = true;
            }
            self.on_frame(msg, Ingress::Parent).await;
        }
        self.parent_lost();
    }

    /// The whole subtree tears down with the parent: reset and re-enter the
    /// election/claim cycle.
    pub(crate) fn parent_lost(&self) {
        warn!("{}: parent connection lost, resetting node", self.id());
        self.request_reset();
    }

    /// Resets the whole node; the policy of last resort.
    pub(crate) fn request_reset(&self) {
        self.inner.reset.cancel();
    }

    /// Periodically grants AP credentials to one not-yet-claimed neighbour
    /// while there is child capacity.
    pub(super) async fn claim_loop(self) {
        let period = self.inner.config.timing.claim();
        loop {
            sleep(period).await;
            let (tree_ids, child_count) = match self.with_links(|links| {
                links.tree.as_ref().map(|tree| {
                    (
                        tree.ids().collect::<Vec<_>>(),
                        tree.children(self.inner.id).len(),
                    )
                })
            }) {
                Some(snapshot) => snapshot,
                None => continue,
            };
            if child_count >= self.inner.config.max_children {
                continue;
            }
            let mut candidates = self.inner.discovery.claim_candidates();
            candidates.retain(|candidate| !tree_ids.contains(candidate));
            if candidates.is_empty() {
                continue;
            }
            let target = candidates[rand::thread_rng().gen_range(0..candidates.len())];
            if let Err(error) = self.inner.discovery.claim_child(target).await {
                warn!("{}: claim of {target} failed: {error}", self.id());
            }
        }
    }

    /// Routes one tree frame: deliver, flood, or pass along the tree.
    pub(crate) async fn on_frame(&self, msg: TreeMsg, ingress: Ingress) {
        if msg.dst == self.inner.id.to_hex() {
            self.dispatch(msg, ingress).await;
        } else if msg.is_broadcast() {
            self.dispatch(msg.clone(), ingress).await;
            self.fan_out(&msg, ingress).await;
        } else if msg.dst == DST_PARENT {
            // a child's beacon; the reader already used it for registration
        } else {
            self.route_onward(msg).await;
        }
    }

    async fn dispatch(&self, msg: TreeMsg, ingress: Ingress) {
        match msg.flag {
            FLAG_TOPOLOGY_PROPAGATE => self.on_propagate(msg, ingress).await,
            FLAG_TOPOLOGY_CHANGED => self.on_changed(msg).await,
            _ if msg.is_app() => self.deliver_app(msg).await,
            _ => trace!("{}: unknown flag {}, dropped", self.id(), msg.flag),
        }
    }

    async fn deliver_app(&self, msg: TreeMsg) {
        let Ok(src) = msg.src_id() else {
            trace!("{}: app frame with bad source, dropped", self.id());
            return;
        };
        let event = AppEvent {
            src,
            payload: msg.msg,
        };
        // an application failure never takes the connection down
        if let Err(error) = self.inner.app_tx.send(event).await {
            warn!("{}: application deliver failed: {error}", self.id());
        }
    }

    /// Forwards a flooded frame once to every directly connected peer
    /// except the one it came in on.
    async fn fan_out(&self, msg: &TreeMsg, ingress: Ingress) {
        let line = match msg.to_line() {
            Ok(line) => line,
            Err(error) => {
                warn!("{}: failed to encode frame: {error}", self.id());
                return;
            }
        };
        let targets = self.with_links(|links| {
            let mut targets = Vec::new();
            if ingress != Ingress::Parent {
                if let (Some(link), id) = (links.parent.clone(), links.parent_id) {
                    targets.push((id, link));
                }
            }
            for (child, link) in &links.children {
                if ingress != Ingress::Child(*child) {
                    targets.push((Some(*child), link.clone()));
                }
            }
            if ingress != Ingress::Bridge {
                if let Some(link) = links.bridge.clone() {
                    targets.push((Some(NodeId::USER_BRIDGE), link.clone()));
                }
            }
            targets
        });
        let sends = targets.into_iter().map(|(peer, link)| {
            let line = line.clone();
            async move { self.send_checked(peer, &link, &line).await }
        });
        let _ = join_all(sends).await;
    }

    /// Unicast along the tree: a descendant goes through the mapped child,
    /// anything else goes up to the parent.
    async fn route_onward(&self, msg: TreeMsg) {
        let Some(dst) = msg.dst_id() else {
            trace!("{}: unroutable destination {:?}, dropped", self.id(), msg.dst);
            return;
        };
        let line = match msg.to_line() {
            Ok(line) => line,
            Err(error) => {
                warn!("{}: failed to encode frame: {error}", self.id());
                return;
            }
        };
        let target = self.with_links(|links| {
            if links.parent_id == Some(dst) {
                return links.parent.clone().map(|link| (Some(dst), link));
            }
            if let Some(link) = links.children.get(&dst) {
                return Some((Some(dst), link.clone()));
            }
            if dst == NodeId::USER_BRIDGE {
                if let Some(link) = links.bridge.clone() {
                    return Some((Some(NodeId::USER_BRIDGE), link));
                }
            }
            if let Some(hop) = links.routes.get(&dst) {
                if let Some(link) = links.children.get(hop) {
                    return Some((Some(*hop), link.clone()));
                }
            }
            links.parent.clone().map(|link| (links.parent_id, link))
        });
        match target {
            Some((peer, link)) => self.send_checked(peer, &link, &line).await,
            None => debug!("{}: no route to {dst}, dropped", self.id()),
        }
    }

    /// Sends one line, cross-checking the peer against the broadcast-layer
    /// neighbour table first; a dead or unwritable peer is closed. Closing
    /// runs as its own task, since it can trigger further sends.
    async fn send_checked(&self, peer: Option<NodeId>, link: &PeerLink, line: &str) {
        if let Some(peer) = peer {
            if peer != NodeId::USER_BRIDGE && !self.inner.discovery.neighbor_alive(peer) {
                debug!("{}: peer {peer} no longer heard on the radio", self.id());
                self.close_peer_task(peer);
                return;
            }
        }
        if let Err(error) = link.send_raw(line).await {
            debug!("{}: send to {peer:?} failed: {error}", self.id());
            if let Some(peer) = peer {
                self.close_peer_task(peer);
            }
        }
    }

    fn close_peer_task(&self, peer: NodeId) {
        let core = self.clone();
        self.spawn_task(async move { core.close_peer(peer).await });
    }

    async fn close_peer(&self, peer: NodeId) {
        enum Kind {
            Parent,
            Child,
            Bridge,
            Unknown,
        }
        let kind = self.with_links(|links| {
            if links.parent_id == Some(peer) {
                Kind::Parent
            } else if links.children.contains_key(&peer) {
                Kind::Child
            } else if peer == NodeId::USER_BRIDGE && links.bridge.is_some() {
                links.bridge = None;
                Kind::Bridge
            } else {
                Kind::Unknown
            }
        });
        match kind {
            Kind::Parent => self.parent_lost(),
            Kind::Child => self.close_child(peer).await,
            Kind::Bridge => info!("{}: user bridge disconnected", self.id()),
            Kind::Unknown => {}
        }
    }

    /// Drops a child connection and its subtree, then reports the change.
    pub(crate) async fn close_child(&self, child: NodeId) {
        let removed = self.with_links(|links| {
            let had_link = links.children.remove(&child).is_some();
            let mut removed = had_link;
            if let Some(tree) = links.tree.as_mut() {
                if tree.contains(child) {
                    let _ = tree.remove(child);
                    removed = true;
                }
            }
            if removed {
                self.refresh_routes(links);
            }
            removed
        });
        if removed {
            info!("{}: child {child} disconnected", self.id());
            self.emit_topology_changed(child).await;
        }
    }

    /// Registers a freshly accepted child connection: into the connection
    /// map, into the tree below self, change event towards the root.
    pub(crate) async fn adopt_child(&self, child: NodeId, link: PeerLink) -> Result<()> {
        let addr = link.addr;
        let adopted = self.with_links(|links| {
            let tree = links.tree.as_mut().ok_or(Error::Routing(child))?;
            // a reconnecting child may still have a stale row
            if tree.contains(child) {
                let _ = tree.remove(child);
            }
            tree.add_child(self.inner.id, child)?;
            let _ = links.children.insert(child, link);
            self.refresh_routes(links);
            Ok::<_, Error>(())
        });
        adopted?;
        info!("{}: child {child} joined from {addr}", self.id());
        self.emit_topology_changed(child).await;
        Ok(())
    }

    /// Application interface: single destination via routing.
    pub async fn send_to(&self, dst: NodeId, payload: serde_json::Value) -> Result<()> {
        let msg = TreeMsg::app(self.inner.id, dst.to_hex(), payload);
        self.on_frame(msg, Ingress::Local).await;
        Ok(())
    }

    /// Application interface: every known node via routing.
    pub async fn send_to_all(&self, payload: serde_json::Value) -> Result<()> {
        let targets: Vec<NodeId> = self.with_links(|links| {
            links
                .tree
                .as_ref()
                .map(|tree| tree.ids().filter(|id| *id != self.inner.id).collect())
                .unwrap_or_default()
        });
        for dst in targets {
            let msg = TreeMsg::app(self.inner.id, dst.to_hex(), payload.clone());
            self.on_frame(msg, Ingress::Local).await;
        }
        Ok(())
    }

    /// Application interface: directly connected peers only.
    pub async fn send_to_nodes(&self, payload: serde_json::Value, peers: &[NodeId]) -> Result<()> {
        for peer in peers {
            let link = self.with_links(|links| {
                if links.parent_id == Some(*peer) {
                    links.parent.clone()
                } else if *peer == NodeId::USER_BRIDGE {
                    links.bridge.clone()
                } else {
                    links.children.get(peer).cloned()
                }
            });
            let Some(link) = link else {
                debug!("{}: {peer} is not directly connected, skipped", self.id());
                continue;
            };
            let msg = TreeMsg::app(self.inner.id, peer.to_hex(), payload.clone());
            self.send_checked(Some(*peer), &link, &msg.to_line()?).await;
        }
        Ok(())
    }

    fn with_links<R>(&self, f: impl FnOnce(&mut Links) -> R) -> R {
        let mut links = self.inner.links.lock().expect("poisoned lock");
        f(&mut links)
    }

    /// Recomputed on every topology mutation.
    fn refresh_routes(&self, links: &mut Links) {
        links.routes = links
            .tree
            .as_ref()
            .map(|tree| tree.routes(self.inner.id))
            .unwrap_or_default();
        let tree_nodes: Vec<NodeId> = links
            .tree
            .as_ref()
            .map(|tree| tree.ids().collect())
            .unwrap_or_default();
        let is_root = links
            .tree
            .as_ref()
            .is_some_and(|tree| tree.root() == self.inner.id);
        self.inner.status.send_modify(|s| {
            s.tree_nodes = tree_nodes;
            s.is_root = is_root;
        });
    }

    pub(crate) fn spawn_task<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.inner.cancel.clone();
        let _handle = task::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = fut => {}
            }
        });
    }
}
