// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Host-side harness: brings up a small simulated mesh in one process and
//! runs the blink application on it. Radio drivers are out of the core's
//! scope, so the in-process simulator stands in for them here; on hardware
//! this entry point is replaced by the firmware image.

use clap::Parser;
use eyre::Result;
use meshnode::app::{BlinkApp, LogLed};
use meshnode::config::Config;
use meshnode::crypto::MasterKey;
use meshnode::log::init_node_logging;
use meshnode::sim::SimNet;
use meshnode::{Node, NodeId};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "meshnode", about = "Runs a simulated self-forming tree mesh")]
struct Opt {
    /// Node configuration file (JSON); a built-in demo config is used when
    /// absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for rotating log files; stdout when absent.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of simulated nodes.
    #[arg(long, default_value_t = 3)]
    nodes: usize,

    /// Announce a blink from the first node every this many milliseconds.
    #[arg(long)]
    blink_ms: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    let _log_guard = init_node_logging(&opt.log_dir);

    let base = match &opt.config {
        Some(path) => Config::from_file(path)?,
        None => demo_config()?,
    };

    let net = SimNet::new();
    for index in 0..opt.nodes {
        let id = NodeId::from_bytes([0, 0, 0, 0, 0, (index + 1) as u8]);
        let mut config = base.clone();
        // every simulated node needs its own server port on this host
        config.server_port = 0;
        // the lowest id wins the election; only the root serves a bridge
        config.user_bridge = base.user_bridge && index == 0;

        let radio = net.radio(id, &config.pmk);
        let wifi = net.wifi(id);
        let (node, handle) = Node::new(id, config, radio, wifi)?;
        tokio::spawn(async move {
            if let Err(err) = node.run().await {
                error!("{id}: node stopped: {err}");
            }
        });

        let app = BlinkApp::new(handle, Arc::new(LogLed));
        let blink = (index == 0)
            .then_some(opt.blink_ms.map(Duration::from_millis))
            .flatten();
        tokio::spawn(async move {
            if let Err(err) = app.run(blink).await {
                error!("blink app stopped: {err}");
            }
        });
    }

    info!("{} simulated nodes on the air; ctrl-c to stop", opt.nodes);
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

/// Keys for trying things out; real deployments read them from the config
/// file on flash.
fn demo_config() -> Result<Config> {
    Ok(Config {
        credential: Some("meshnode demo credential".to_string()),
        pmk: MasterKey::from_secret("meshnode-pmk-001")?,
        lmk: MasterKey::from_secret("meshnode-lmk-001")?,
        root: None,
        router_ssid: None,
        server_port: 0,
        bridge_port: meshnode::config::BRIDGE_PORT,
        user_bridge: true,
        max_children: meshnode::config::MAX_CHILDREN,
        emit_root_elected: false,
        timing: Default::default(),
    })
}
