// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Server side of the tree: accepts child connections once this node has a
//! row in the topology, registers each child by its first frame, and keeps a
//! per-child propagation task running.

use super::{Ingress, PeerLink, TransportCore};
use crate::node_id::NodeId;
use crate::wire::tree_msg::TreeMsg;

use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

/// Brings up the access point and serves children forever.
pub(super) async fn serve(core: TransportCore) {
    // the topology has to hold self before we can parent anyone; the root
    // created it, everyone else waits for the first propagate
    let poll = core.inner.config.timing.sweep();
    loop {
        let present = core.with_links(|links| {
            links
                .tree
                .as_ref()
                .map(|tree| tree.contains(core.id()))
                .unwrap_or(false)
        });
        if present {
            break;
        }
        sleep(poll).await;
    }

    let port = core.inner.config.server_port;
    let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
        Ok(listener) => listener,
        Err(error) => {
            error!("{}: failed to bind the tree server: {error}", core.id());
            return;
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(error) => {
            error!("{}: failed to read the server address: {error}", core.id());
            return;
        }
    };

    let ap = core.discovery().ap().clone();
    if let Err(error) = core
        .inner
        .wifi
        .publish_ap(&ap.essid, &ap.password, local_addr)
        .await
    {
        error!("{}: failed to bring up the access point: {error}", core.id());
        return;
    }
    info!("{}: serving children on {local_addr}", core.id());

    core.spawn_task(core.clone().claim_loop());

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                trace!("{}: incoming child connection from {addr}", core.id());
                core.spawn_task(handle_child(core.clone(), stream, addr));
            }
            Err(error) => {
                warn!("{}: accept failed: {error}", core.id());
                return;
            }
        }
    }
}

/// One child connection, from registration to EOF.
async fn handle_child(core: TransportCore, stream: TcpStream, addr: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // the first topology frame carries the child's id; application frames
    // are ignored until then
    let (child, first_msg) = loop {
        match lines.next_line().await {
            Ok(Some(line)) => match TreeMsg::parse_line(&line) {
                Ok(msg) if !msg.is_app() => match msg.src_id() {
                    Ok(id) => break (id, msg),
                    Err(_) => continue,
                },
                Ok(_) => continue,
                Err(error) => {
                    trace!("{}: dropping tree frame: {error}", core.id());
                    continue;
                }
            },
            _ => {
                debug!("{}: connection from {addr} died unregistered", core.id());
                return;
            }
        }
    };

    let link = PeerLink::new(addr, write_half);
    if let Err(error) = core.adopt_child(child, link).await {
        warn!("{}: could not adopt {child}: {error}", core.id());
        return;
    }
    core.spawn_task(propagate_loop(core.clone(), child));
    core.on_frame(first_msg, Ingress::Child(child)).await;

    while let Ok(Some(line)) = lines.next_line().await {
        match TreeMsg::parse_line(&line) {
            Ok(msg) => core.on_frame(msg, Ingress::Child(child)).await,
            Err(error) => trace!("{}: dropping tree frame: {error}", core.id()),
        }
    }
    core.close_child(child).await;
}

/// Pushes the full packed tree to one child until it disconnects.
async fn propagate_loop(core: TransportCore, child: NodeId) {
    let period = core.inner.config.timing.propagate();
    loop {
        let Some((link, packed)) = core.with_links(|links| {
            links
                .children
                .get(&child)
                .cloned()
                .map(|link| (link, links.tree.as_ref().map(|tree| tree.pack())))
        }) else {
            return;
        };
        match TreeMsg::propagate(core.id(), child.to_hex(), packed.as_ref())
            .and_then(|msg| msg.to_line())
        {
            Ok(line) => core.send_checked(Some(child), &link, &line).await,
            Err(error) => warn!("{}: failed to encode topology: {error}", core.id()),
        }
        sleep(period).await;
    }
}
