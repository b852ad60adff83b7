// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Node configuration, read once at startup from a JSON file.
//!
//! PMK and LMK are mandatory and must be exactly 16 bytes; anything else is
//! fatal. The preshared credential is optional — a node without one starts
//! uninitialised and waits for the button-gated exchange. Every protocol
//! period is exposed as a tunable with the firmware defaults.

use crate::crypto::{Credential, MasterKey};
use crate::error::{Error, Result};
use crate::node_id::NodeId;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Fixed port the tree transport server binds on every node.
pub const SERVER_PORT: u16 = 1234;

/// Port on which the root accepts plain tree frames from a user PC.
pub const BRIDGE_PORT: u16 = 4321;

/// Default cap on direct children per node.
pub const MAX_CHILDREN: usize = 2;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Preshared mesh credential, at most 32 bytes, zero padded.
    #[serde(default)]
    pub credential: Option<String>,
    /// Primary master key for the broadcast radio link encryption.
    pub pmk: MasterKey,
    /// Local master key registered per peer during the credential exchange.
    pub lmk: MasterKey,
    /// Optional fixed root identifier; overrides the election rule.
    #[serde(default)]
    pub root: Option<NodeId>,
    /// SSID of the named router whose RSSI is reported in advertisements.
    #[serde(default)]
    pub router_ssid: Option<String>,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,
    /// Accept user PC connections on the bridge port when this node is root.
    #[serde(default)]
    pub user_bridge: bool,
    #[serde(default = "default_max_children")]
    pub max_children: usize,
    /// Capability flag for the reserved ROOT_ELECTED frame type.
    #[serde(default)]
    pub emit_root_elected: bool,
    #[serde(default)]
    pub timing: Timing,
}

fn default_server_port() -> u16 {
    SERVER_PORT
}

fn default_bridge_port() -> u16 {
    BRIDGE_PORT
}

fn default_max_children() -> usize {
    MAX_CHILDREN
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&data)?;
        let _ = config.credential()?;
        Ok(config)
    }

    /// The starting credential: the preshared one, or zero when absent.
    pub fn credential(&self) -> Result<Credential> {
        match &self.credential {
            Some(secret) => Credential::from_preshared(secret),
            None => Ok(Credential::zero()),
        }
    }
}

/// Protocol periods, all in milliseconds, defaulting to the firmware values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Period of the self-advertisement broadcast.
    pub advertise_ms: u64,
    /// Period after which a quiet neighbour is relayed on its behalf;
    /// twice this of rx silence evicts the row.
    pub relay_ms: u64,
    /// Period of the neighbour table sweep.
    pub sweep_ms: u64,
    /// How long the neighbour set must stay unchanged before election.
    pub settle_ms: u64,
    /// Length of the credential exchange acceptance window and the overall
    /// deadline of one exchange attempt.
    pub mps_window_ms: u64,
    /// Retry period of the requester's SYN broadcast.
    pub mps_retry_ms: u64,
    /// Period of the empty beacon a child sends its parent.
    pub beacon_ms: u64,
    /// Period of the full-tree propagation from parent to each child.
    pub propagate_ms: u64,
    /// Period of the child-claim round.
    pub claim_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            advertise_ms: 5_000,
            relay_ms: 13_000,
            sweep_ms: 1_000,
            settle_ms: 5_000,
            mps_window_ms: 45_000,
            mps_retry_ms: 5_000,
            beacon_ms: 15_000,
            propagate_ms: 7_000,
            claim_ms: 14_000,
        }
    }
}

impl Timing {
    pub fn advertise(&self) -> Duration {
        Duration::from_millis(self.advertise_ms)
    }

    pub fn relay(&self) -> Duration {
        Duration::from_millis(self.relay_ms)
    }

    /// Rx silence after which a neighbour row is evicted.
    pub fn eviction(&self) -> Duration {
        Duration::from_millis(2 * self.relay_ms)
    }

    pub fn sweep(&self) -> Duration {
        Duration::from_millis(self.sweep_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn mps_window(&self) -> Duration {
        Duration::from_millis(self.mps_window_ms)
    }

    pub fn mps_retry(&self) -> Duration {
        Duration::from_millis(self.mps_retry_ms)
    }

    pub fn beacon(&self) -> Duration {
        Duration::from_millis(self.beacon_ms)
    }

    pub fn propagate(&self) -> Duration {
        Duration::from_millis(self.propagate_ms)
    }

    pub fn claim(&self) -> Duration {
        Duration::from_millis(self.claim_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let file = write_config(
            r#"{"pmk": "0123456789abcdef", "lmk": "fedcba9876543210"}"#,
        );
        let config = Config::from_file(file.path()).unwrap();
        assert!(config.credential().unwrap().is_zero());
        assert_eq!(config.server_port, SERVER_PORT);
        assert_eq!(config.bridge_port, BRIDGE_PORT);
        assert_eq!(config.max_children, MAX_CHILDREN);
        assert_eq!(config.timing.advertise_ms, 5_000);
        assert!(!config.emit_root_elected);
    }

    #[test]
    fn missing_master_keys_are_fatal() {
        let file = write_config(r#"{"pmk": "0123456789abcdef"}"#);
        assert_matches!(Config::from_file(file.path()), Err(Error::Json(_)));
    }

    #[test]
    fn wrong_length_master_keys_are_fatal() {
        let file = write_config(r#"{"pmk": "0123456789abcdef", "lmk": "short"}"#);
        assert_matches!(Config::from_file(file.path()), Err(Error::Json(_)));
    }

    #[test]
    fn full_config_round_trips() {
        let file = write_config(
            r#"{
                "credential": "preshared secret",
                "pmk": "0123456789abcdef",
                "lmk": "fedcba9876543210",
                "root": "3c71bfe48b89",
                "router_ssid": "upstream",
                "server_port": 0,
                "user_bridge": true,
                "max_children": 3,
                "timing": {"advertise_ms": 250, "settle_ms": 500}
            }"#,
        );
        let config = Config::from_file(file.path()).unwrap();
        assert!(!config.credential().unwrap().is_zero());
        assert_eq!(config.root.unwrap().to_hex(), "3c71bfe48b89");
        assert_eq!(config.router_ssid.as_deref(), Some("upstream"));
        assert_eq!(config.max_children, 3);
        assert_eq!(config.timing.advertise_ms, 250);
        // unspecified periods keep their defaults
        assert_eq!(config.timing.propagate_ms, 7_000);
    }
}
