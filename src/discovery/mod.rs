// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The broadcast layer: periodic self-advertisement, neighbour aging and
//! relaying, frame ingest, the button-gated credential exchange and root
//! election. Hosts the claim primitive the transport layer uses to grow the
//! tree.

mod election;
mod mps;
pub mod neighbors;

pub use mps::{MPS_PRESS_MAX_MS, MPS_PRESS_MIN_MS};

use self::mps::Mps;
use self::neighbors::{NeighborTable, Recorded};
use crate::config::Config;
use crate::crypto::{self, Credential};
use crate::error::Result;
use crate::node::NodeStatus;
use crate::node_id::NodeId;
use crate::radio::BroadcastRadioRef;
use crate::wire::{self, Advertisement, Frame, WifiCredsGrant};

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::task;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// How a node learns it may bring up its transport side: it either won the
/// election, or a parent claimed it with station credentials.
#[derive(Clone, Debug)]
pub enum JoinSignal {
    Root,
    Station { ssid: String, password: String },
}

/// This node's own access point identity; the password is minted at startup.
#[derive(Clone, Debug)]
pub struct ApIdentity {
    pub essid: String,
    pub password: String,
}

impl ApIdentity {
    fn new(id: NodeId) -> Self {
        let password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self {
            // fits one AES block
            essid: format!("ap-{}", id.to_hex()),
            password,
        }
    }
}

/// The broadcast-radio side of a node.
#[derive(Clone)]
pub struct DiscoveryCore {
    inner: Arc<Inner>,
}

struct Inner {
    id: NodeId,
    config: Arc<Config>,
    radio: BroadcastRadioRef,
    credential: Arc<RwLock<Credential>>,
    neighbors: RwLock<NeighborTable>,
    seen_topology: AtomicBool,
    in_tree: AtomicBool,
    mps: Mps,
    ap: ApIdentity,
    join_tx: watch::Sender<Option<JoinSignal>>,
    status: watch::Sender<NodeStatus>,
    cancel: CancellationToken,
}

impl DiscoveryCore {
    pub fn new(
        id: NodeId,
        config: Arc<Config>,
        radio: BroadcastRadioRef,
        credential: Arc<RwLock<Credential>>,
        join_tx: watch::Sender<Option<JoinSignal>>,
        status: watch::Sender<NodeStatus>,
        cancel: CancellationToken,
    ) -> Self {
        let has_credential = !credential.read().expect("poisoned lock").is_zero();
        status.send_modify(|s| s.has_credential = has_credential);
        Self {
            inner: Arc::new(Inner {
                id,
                config,
                radio,
                credential,
                neighbors: RwLock::new(NeighborTable::new(id)),
                seen_topology: AtomicBool::new(false),
                in_tree: AtomicBool::new(false),
                mps: Mps::default(),
                ap: ApIdentity::new(id),
                join_tx,
                status,
                cancel,
            }),
        }
    }

    /// Spawns all broadcast-layer tasks. Advertisement, sweeping and the
    /// election only begin once the node holds a credential.
    pub fn start(&self) {
        let core = self.clone();
        self.spawn_task(async move {
            if let Err(error) = core.inner.radio.add_peer(NodeId::BROADCAST, None).await {
                error!("Failed to register the broadcast peer: {error}");
                return;
            }
            core.spawn_task(core.clone().ingest_loop());

            core.wait_for_credential().await;
            info!("{}: credential present, joining the mesh", core.id());

            core.spawn_task(core.clone().advertise_loop());
            core.spawn_task(core.clone().sweep_loop());
            core.spawn_task(core.clone().election_loop());
        });
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn ap(&self) -> &ApIdentity {
        &self.inner.ap
    }

    pub(crate) fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn radio(&self) -> &BroadcastRadioRef {
        &self.inner.radio
    }

    pub(crate) fn mps(&self) -> &Mps {
        &self.inner.mps
    }

    pub(crate) fn status(&self) -> &watch::Sender<NodeStatus> {
        &self.inner.status
    }

    pub fn credential(&self) -> Credential {
        *self.inner.credential.read().expect("poisoned lock")
    }

    pub fn has_credential(&self) -> bool {
        !self.credential().is_zero()
    }

    pub(crate) fn store_credential(&self, credential: Credential) {
        *self.inner.credential.write().expect("poisoned lock") = credential;
        self.inner.status.send_modify(|s| s.has_credential = true);
    }

    pub fn in_tree(&self) -> bool {
        self.inner.in_tree.load(Ordering::Relaxed)
    }

    pub(crate) fn set_in_tree(&self, in_tree: bool) {
        self.inner.in_tree.store(in_tree, Ordering::Relaxed);
        self.inner.status.send_modify(|s| s.in_tree = in_tree);
    }

    pub fn seen_topology(&self) -> bool {
        self.inner.seen_topology.load(Ordering::Relaxed)
    }

    pub(crate) fn signal_join(&self, signal: JoinSignal) {
        let _ = self.inner.join_tx.send(Some(signal));
    }

    /// Is this peer still heard on the broadcast radio?
    pub fn neighbor_alive(&self, id: NodeId) -> bool {
        self.inner
            .neighbors
            .read()
            .expect("poisoned lock")
            .contains(id)
    }

    /// Neighbours advertising themselves as not yet in the tree.
    pub fn claim_candidates(&self) -> Vec<NodeId> {
        self.inner
            .neighbors
            .read()
            .expect("poisoned lock")
            .claim_candidates()
    }

    /// Grants this node's AP credentials to a chosen neighbour over the
    /// authenticated broadcast channel.
    pub async fn claim_child(&self, target: NodeId) -> Result<()> {
        let credential = self.credential();
        let ap = &self.inner.ap;
        info!("{}: claiming {target} for AP {}", self.id(), ap.essid);
        let grant = WifiCredsGrant {
            dst: target,
            essid_len: ap.essid.len() as u16,
            essid_enc: crypto::encrypt_block(&credential, &ap.essid),
            password_enc: crypto::encrypt_block(&credential, &ap.password),
        };
        self.send_frame(NodeId::BROADCAST, &Frame::WifiCreds(grant))
            .await
    }

    pub(crate) async fn send_frame(&self, dst: NodeId, frame: &Frame) -> Result<()> {
        let datagram = wire::encode(frame, self.inner.id, &self.credential());
        self.inner.radio.send(dst, datagram).await
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

    async fn wait_for_credential(&self) {
        let poll = self.inner.config.timing.mps_retry();
        while !self.has_credential() {
            sleep(poll).await;
        }
    }

    async fn ingest_loop(self) {
        loop {
            match self.inner.radio.recv().await {
                Ok(datagram) => self.handle_datagram(&datagram).await,
                Err(error) => {
                    debug!("{}: broadcast radio gone: {error}", self.id());
                    return;
                }
            }
        }
    }

    async fn handle_datagram(&self, datagram: &[u8]) {
        let credential = self.credential();
        let in_window = self.inner.mps.window_open();
        let (src, frame) = match wire::decode(datagram, &credential, in_window) {
            Ok(decoded) => decoded,
            Err(error) => {
                trace!("{}: dropping frame: {error}", self.id());
                return;
            }
        };
        trace!("{}: frame from {src}: {frame:?}", self.id());
        match frame {
            Frame::Advertise(adv) => self.on_advertise(adv).await,
            Frame::RootElected(adv) => {
                if self.inner.config.emit_root_elected {
                    self.on_advertise(adv).await;
                } else {
                    trace!("{}: ROOT_ELECTED capability disabled, dropped", self.id());
                }
            }
            Frame::WifiCreds(grant) => self.on_wifi_creds(grant).await,
            Frame::Creds(creds) => self.on_creds_frame(creds).await,
        }
    }

    async fn on_advertise(&self, adv: Advertisement) {
        if adv.id == self.inner.id {
            return;
        }
        if adv.in_tree {
            self.inner.seen_topology.store(true, Ordering::Relaxed);
        }
        let relay = {
            let mut neighbors = self.inner.neighbors.write().expect("poisoned lock");
            match neighbors.record_ad(&adv, Instant::now()) {
                Recorded::New(relay) => Some(relay),
                Recorded::Known => None,
            }
        };
        if let Some(relay) = relay {
            debug!("{}: new neighbour {}, forwarding once", self.id(), adv.id);
            if let Err(error) = self
                .send_frame(NodeId::BROADCAST, &Frame::Advertise(relay))
                .await
            {
                warn!("{}: failed to forward advertisement: {error}", self.id());
            }
        }
    }

    async fn on_wifi_creds(&self, grant: WifiCredsGrant) {
        if grant.dst != self.inner.id || self.in_tree() {
            return;
        }
        let credential = self.credential();
        let essid_full = crypto::decrypt_block(&credential, &grant.essid_enc);
        let len = (grant.essid_len as usize).min(essid_full.len());
        let ssid = essid_full[..len].to_string();
        let password = crypto::decrypt_block(&credential, &grant.password_enc);
        info!("{}: claimed by a parent, station SSID {ssid}", self.id());
        self.set_in_tree(true);
        self.signal_join(JoinSignal::Station { ssid, password });
    }

    async fn advertise_loop(self) {
        let period = self.inner.config.timing.advertise();
        loop {
            let (centrality, router_rssi) = self.centrality_and_router_rssi().await;
            let adv = Advertisement {
                id: self.inner.id,
                centrality,
                router_rssi,
                in_tree: self.in_tree(),
                ttl: 0,
            };
            self.inner
                .neighbors
                .write()
                .expect("poisoned lock")
                .record_self(&adv, Instant::now());
            if let Err(error) = self
                .send_frame(NodeId::BROADCAST, &Frame::Advertise(adv))
                .await
            {
                warn!("{}: failed to advertise: {error}", self.id());
            }
            sleep(period).await;
        }
    }

    async fn sweep_loop(self) {
        let period = self.inner.config.timing.sweep();
        let relay_after = self.inner.config.timing.relay();
        loop {
            sleep(period).await;
            let actions = {
                let mut neighbors = self.inner.neighbors.write().expect("poisoned lock");
                neighbors.sweep(Instant::now(), relay_after)
            };
            for id in &actions.evicted {
                debug!("{}: neighbour {id} timed out", self.id());
            }
            for relay in actions.relays {
                if let Err(error) = self
                    .send_frame(NodeId::BROADCAST, &Frame::Advertise(relay))
                    .await
                {
                    warn!("{}: failed to relay advertisement: {error}", self.id());
                }
            }
        }
    }

    /// Centrality from the current scan: one share per scanned peer already
    /// in the neighbour table, weighted by 1/√|rssi|; the named router's
    /// RSSI is reported verbatim.
    async fn centrality_and_router_rssi(&self) -> (f32, f32) {
        let records = match self.inner.radio.scan().await {
            Ok(records) => records,
            Err(error) => {
                debug!("{}: scan failed: {error}", self.id());
                return (0.0, 0.0);
            }
        };
        let mut centrality = 0.0;
        let mut router_rssi = 0.0;
        let neighbors = self.inner.neighbors.read().expect("poisoned lock");
        for record in records {
            if Some(record.ssid.as_str()) == self.inner.config.router_ssid.as_deref() {
                router_rssi = record.rssi;
            } else if neighbors.contains(record.mac) {
                if record.rssi == 0.0 {
                    centrality += 1.0;
                } else {
                    centrality += 1.0 / record.rssi.abs().sqrt();
                }
            }
        }
        (centrality, router_rssi)
    }

    pub(crate) fn neighbors(&self) -> &RwLock<NeighborTable> {
        &self.inner.neighbors
    }
}
