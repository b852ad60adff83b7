// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Seams to the radio drivers and physical I/O, which live outside the core.
//!
//! The broadcast radio is a connectionless datagram channel with MAC
//! addressing and per-peer link encryption keyed by the LMK; the PMK is
//! handed to the driver at construction. The wifi seam joins a parent's
//! access point (resolving to the socket address its tree server listens on)
//! and publishes this node's own access point.

use crate::crypto::MasterKey;
use crate::error::Result;
use crate::node_id::NodeId;

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

/// One entry of an access-point scan, used for the centrality observable.
#[derive(Clone, Debug)]
pub struct ScanRecord {
    pub ssid: String,
    pub mac: NodeId,
    pub rssi: f32,
}

/// The connectionless broadcast radio.
#[async_trait]
pub trait BroadcastRadio: Send + Sync {
    /// Sends a datagram to a peer, or to everyone when `dst` is the
    /// broadcast address. Unicast requires the peer to be registered.
    async fn send(&self, dst: NodeId, datagram: Bytes) -> Result<()>;

    /// Receives the next datagram, at most 250 bytes.
    async fn recv(&self) -> Result<Bytes>;

    /// Registers a peer, optionally with an LMK for link encryption.
    async fn add_peer(&self, peer: NodeId, lmk: Option<MasterKey>) -> Result<()>;

    /// Drops a registered peer and its key material.
    async fn del_peer(&self, peer: NodeId) -> Result<()>;

    /// Scans for visible access points.
    async fn scan(&self) -> Result<Vec<ScanRecord>>;
}

/// The station/access-point side of the transport radio.
#[async_trait]
pub trait Wifi: Send + Sync {
    /// Joins an access point; resolves to the address the network's tree
    /// server is reachable at.
    async fn join(&self, ssid: &str, password: &str) -> Result<SocketAddr>;

    /// Leaves the currently joined network, if any.
    async fn leave(&self) -> Result<()>;

    /// Brings up this node's own access point and associates it with the
    /// given server address.
    async fn publish_ap(&self, ssid: &str, password: &str, server: SocketAddr) -> Result<()>;
}

pub type BroadcastRadioRef = Arc<dyn BroadcastRadio>;
pub type WifiRef = Arc<dyn Wifi>;
