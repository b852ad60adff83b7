// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! In-process drivers: an in-memory broadcast bus and an access-point
//! registry over loopback TCP. They let a whole mesh run inside one host
//! process, for the integration tests and the binary.

use crate::crypto::MasterKey;
use crate::error::{Error, Result};
use crate::node_id::NodeId;
use crate::radio::{BroadcastRadio, ScanRecord, Wifi};

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

const SIM_RSSI: f32 = -42.0;
const ROUTER_MAC: NodeId = NodeId::from_bytes([0xee, 0xee, 0xee, 0xee, 0xee, 0xee]);

struct ApEntry {
    owner: NodeId,
    password: String,
    server: SocketAddr,
}

#[derive(Default)]
struct NetInner {
    radios: BTreeMap<NodeId, mpsc::Sender<Bytes>>,
    aps: BTreeMap<String, ApEntry>,
    router: Option<(String, f32)>,
}

/// The shared medium: every radio on it hears every broadcast.
#[derive(Clone, Default)]
pub struct SimNet {
    inner: Arc<StdMutex<NetInner>>,
}

impl SimNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings a new radio onto the air. The PMK is accepted opaquely, as a
    /// real driver would.
    pub fn radio(&self, id: NodeId, _pmk: &MasterKey) -> Arc<SimRadio> {
        let (tx, rx) = mpsc::channel(256);
        let _ = self
            .inner
            .lock()
            .expect("poisoned lock")
            .radios
            .insert(id, tx);
        Arc::new(SimRadio {
            id,
            net: self.clone(),
            rx: Mutex::new(rx),
            peers: StdMutex::new(BTreeSet::new()),
        })
    }

    pub fn wifi(&self, id: NodeId) -> Arc<SimWifi> {
        Arc::new(SimWifi {
            id,
            net: self.clone(),
        })
    }

    /// Plants an upstream router into every scan, for the RSSI observable.
    pub fn plant_router(&self, ssid: &str, rssi: f32) {
        self.inner.lock().expect("poisoned lock").router = Some((ssid.to_string(), rssi));
    }

    /// Takes a node's radio off the air; its broadcasts stop being heard.
    pub fn silence(&self, id: NodeId) {
        let mut inner = self.inner.lock().expect("poisoned lock");
        let _ = inner.radios.remove(&id);
        inner.aps.retain(|_, entry| entry.owner != id);
    }
}

/// One radio on the simulated bus.
pub struct SimRadio {
    id: NodeId,
    net: SimNet,
    rx: Mutex<mpsc::Receiver<Bytes>>,
    peers: StdMutex<BTreeSet<NodeId>>,
}

#[async_trait]
impl BroadcastRadio for SimRadio {
    async fn send(&self, dst: NodeId, datagram: Bytes) -> Result<()> {
        let targets: Vec<mpsc::Sender<Bytes>> = {
            let inner = self.net.inner.lock().expect("poisoned lock");
            if dst.is_broadcast() {
                inner
                    .radios
                    .iter()
                    .filter(|(id, _)| **id != self.id)
                    .map(|(_, tx)| tx.clone())
                    .collect()
            } else {
                if !self.peers.lock().expect("poisoned lock").contains(&dst) {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "peer not registered",
                    )));
                }
                inner.radios.get(&dst).cloned().into_iter().collect()
            }
        };
        for target in targets {
            // the air is lossy; a full receive queue just drops the frame
            let _ = target.try_send(datagram.clone());
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Bytes> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::Channel("broadcast radio"))
    }

    async fn add_peer(&self, peer: NodeId, _lmk: Option<MasterKey>) -> Result<()> {
        if !peer.is_broadcast() {
            let _ = self.peers.lock().expect("poisoned lock").insert(peer);
        }
        Ok(())
    }

    async fn del_peer(&self, peer: NodeId) -> Result<()> {
        let _ = self.peers.lock().expect("poisoned lock").remove(&peer);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<ScanRecord>> {
        let inner = self.net.inner.lock().expect("poisoned lock");
        let mut records = Vec::new();
        for id in inner.radios.keys().filter(|id| **id != self.id) {
            let ssid = inner
                .aps
                .iter()
                .find(|(_, entry)| entry.owner == *id)
                .map(|(essid, _)| essid.clone())
                .unwrap_or_else(|| format!("node-{id}"));
            records.push(ScanRecord {
                ssid,
                mac: *id,
                rssi: SIM_RSSI,
            });
        }
        if let Some((ssid, rssi)) = &inner.router {
            records.push(ScanRecord {
                ssid: ssid.clone(),
                mac: ROUTER_MAC,
                rssi: *rssi,
            });
        }
        Ok(records)
    }
}

/// The station/AP seam over the in-process registry.
pub struct SimWifi {
    id: NodeId,
    net: SimNet,
}

#[async_trait]
impl Wifi for SimWifi {
    async fn join(&self, ssid: &str, password: &str) -> Result<SocketAddr> {
        let inner = self.net.inner.lock().expect("poisoned lock");
        let entry = inner.aps.get(ssid).ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no access point {ssid}"),
            ))
        })?;
        if entry.password != password {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "wrong access point password",
            )));
        }
        Ok(entry.server)
    }

    async fn leave(&self) -> Result<()> {
        Ok(())
    }

    async fn publish_ap(&self, ssid: &str, password: &str, server: SocketAddr) -> Result<()> {
        let mut inner = self.net.inner.lock().expect("poisoned lock");
        let _ = inner.aps.insert(
            ssid.to_string(),
            ApEntry {
                owner: self.id,
                password: password.to_string(),
                server,
            },
        );
        Ok(())
    }
}
