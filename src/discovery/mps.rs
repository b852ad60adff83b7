// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The manual pairing procedure: a five step, button-gated exchange that
//! hands the 32 byte signing credential to an uninitialised node.
//!
//! Both sides must be inside their acceptance window, since neither can
//! verify the other's frames across the credential boundary. The peer is
//! registered with the LMK around the unicast phase and dropped again at
//! UNREG or when the window lapses.

use super::DiscoveryCore;
use crate::crypto::Credential;
use crate::error::{Error, Result};
use crate::node_id::NodeId;
use crate::wire::{CredsExchange, Frame, MpsStage};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

/// Shortest button press that opens the pairing window, in milliseconds.
pub const MPS_PRESS_MIN_MS: u64 = 4250;

/// Longest button press that still opens the pairing window.
pub const MPS_PRESS_MAX_MS: u64 = 2 * MPS_PRESS_MIN_MS;

/// Pairing state shared by the holder and requester roles.
#[derive(Default)]
pub(crate) struct Mps {
    window_open: AtomicBool,
    /// Peers currently registered with the LMK for this exchange.
    registered: StdMutex<BTreeSet<NodeId>>,
    /// Serialises outstanding credential requests.
    request_gate: Mutex<()>,
}

impl Mps {
    pub(crate) fn window_open(&self) -> bool {
        self.window_open.load(Ordering::Relaxed)
    }
}

impl DiscoveryCore {
    /// Button press handler. A press inside the pairing band opens the
    /// acceptance window; a node without a credential additionally starts
    /// requesting one.
    pub async fn on_button(&self, held_ms: u64) {
        if !(MPS_PRESS_MIN_MS..=MPS_PRESS_MAX_MS).contains(&held_ms) {
            debug!("{}: button held {held_ms}ms, outside pairing band", self.id());
            return;
        }
        let core = self.clone();
        self.spawn_task(async move { core.open_acceptance_window().await });
        if !self.has_credential() {
            let core = self.clone();
            self.spawn_task(async move {
                if let Err(error) = core.request_credentials().await {
                    warn!("{}: credential request failed: {error}", core.id());
                }
            });
        }
    }

    /// Opens the acceptance window for the configured period; leftover
    /// exchange peers are dropped when it lapses.
    async fn open_acceptance_window(&self) {
        let mps = self.mps();
        if mps.window_open.swap(true, Ordering::Relaxed) {
            return;
        }
        let window = self.config().timing.mps_window();
        info!("{}: pairing allowed for {window:?}", self.id());
        sleep(window).await;
        mps.window_open.store(false, Ordering::Relaxed);
        info!("{}: pairing window closed", self.id());

        let leftovers: Vec<NodeId> = {
            let mut registered = mps.registered.lock().expect("poisoned lock");
            std::mem::take(&mut *registered).into_iter().collect()
        };
        for peer in leftovers {
            let _ = self.radio().del_peer(peer).await;
        }
    }

    /// Requester role: broadcast SYN until a credential lands or the window
    /// deadline passes. A mutex keeps it to one outstanding request, held
    /// across the whole exchange on purpose.
    async fn request_credentials(&self) -> Result<()> {
        let mps = self.mps();
        let _request = mps.request_gate.lock().await;
        if self.has_credential() {
            return Ok(());
        }
        match timeout(self.config().timing.mps_window(), self.syn_loop()).await {
            Ok(result) => {
                info!("{}: credential obtained", self.id());
                result
            }
            Err(_) => Err(Error::MpsTimeout),
        }
    }

    async fn syn_loop(&self) -> Result<()> {
        let retry = self.config().timing.mps_retry();
        while !self.has_credential() {
            let syn = CredsExchange {
                stage: MpsStage::Syn,
                src: self.id(),
                payload: [0; 32],
            };
            self.send_frame(NodeId::BROADCAST, &Frame::Creds(syn)).await?;
            sleep(retry).await;
        }
        Ok(())
    }

    /// Dispatches one exchange frame; roles fall out of whether this node
    /// holds a credential.
    pub(crate) async fn on_creds_frame(&self, creds: CredsExchange) {
        if !self.mps().window_open() {
            trace!("{}: exchange frame outside pairing window, dropped", self.id());
            return;
        }
        let holder = self.has_credential();
        let peer = creds.src;
        let result = match creds.stage {
            MpsStage::Syn if holder => {
                debug!("{}: pairing request from {peer}", self.id());
                self.register_exchange_peer(peer).await;
                self.send_exchange(NodeId::BROADCAST, MpsStage::SynAck, [0; 32])
                    .await
            }
            MpsStage::SynAck if !holder => {
                self.register_exchange_peer(peer).await;
                self.send_exchange(peer, MpsStage::Obtain, [0; 32]).await
            }
            MpsStage::Obtain if holder => {
                self.send_exchange(peer, MpsStage::Respond, *self.credential().as_bytes())
                    .await
            }
            MpsStage::Respond if !holder => {
                let granted = Credential::from_bytes(creds.payload);
                if granted.is_zero() {
                    trace!("{}: empty credential payload, dropped", self.id());
                    return;
                }
                self.store_credential(granted);
                let result = self.send_exchange(peer, MpsStage::Unreg, [0; 32]).await;
                self.drop_exchange_peer(peer).await;
                result
            }
            MpsStage::Unreg => {
                self.drop_exchange_peer(peer).await;
                Ok(())
            }
            stage => {
                trace!("{}: {stage:?} does not fit our role, dropped", self.id());
                Ok(())
            }
        };
        if let Err(error) = result {
            warn!("{}: exchange step failed: {error}", self.id());
        }
    }

    async fn send_exchange(&self, dst: NodeId, stage: MpsStage, payload: [u8; 32]) -> Result<()> {
        let creds = CredsExchange {
            stage,
            src: self.id(),
            payload,
        };
        self.send_frame(dst, &Frame::Creds(creds)).await
    }

    async fn register_exchange_peer(&self, peer: NodeId) {
        let newly = {
            let mut registered = self.mps().registered.lock().expect("poisoned lock");
            registered.insert(peer)
        };
        if newly {
            let lmk = self.config().lmk;
            if let Err(error) = self.radio().add_peer(peer, Some(lmk)).await {
                warn!("{}: failed to register {peer} with LMK: {error}", self.id());
            }
        }
    }

    async fn drop_exchange_peer(&self, peer: NodeId) {
        let was_registered = {
            let mut registered = self.mps().registered.lock().expect("poisoned lock");
            registered.remove(&peer)
        };
        if was_registered {
            let _ = self.radio().del_peer(peer).await;
        }
    }
}
