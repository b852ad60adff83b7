// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! User bridge: the root accepts plain tree frames from a PC under the
//! reserved bridge id. While connected, the bridge behaves like one more
//! directly connected peer as far as routing is concerned.

use super::{Ingress, PeerLink, TransportCore};
use crate::wire::tree_msg::TreeMsg;

use std::net::Ipv4Addr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

pub(super) async fn serve(core: TransportCore) {
    let port = core.inner.config.bridge_port;
    let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
        Ok(listener) => listener,
        Err(error) => {
            warn!("{}: failed to bind the user bridge: {error}", core.id());
            return;
        }
    };
    match listener.local_addr() {
        Ok(addr) => info!("{}: user bridge listening on {addr}", core.id()),
        Err(_) => info!("{}: user bridge listening", core.id()),
    }

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!("{}: bridge accept failed: {error}", core.id());
                return;
            }
        };
        info!("{}: user PC connected from {addr}", core.id());
        let (read_half, write_half) = stream.into_split();
        // a newer connection replaces any previous one
        core.with_links(|links| links.bridge = Some(PeerLink::new(addr, write_half)));

        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match TreeMsg::parse_line(&line) {
                Ok(msg) => core.on_frame(msg, Ingress::Bridge).await,
                Err(error) => trace!("{}: dropping bridge frame: {error}", core.id()),
            }
        }
        core.with_links(|links| links.bridge = None);
        info!("{}: user PC {addr} disconnected", core.id());
    }
}
