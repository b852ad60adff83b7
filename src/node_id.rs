// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::error::{Error, Result};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length in bytes of a node identifier (a MAC style address).
pub const NODE_ID_LEN: usize = 6;

/// A 6 byte node identifier.
///
/// Rendered everywhere as 12 lowercase hex characters, which is also the form
/// used inside tree frames.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// The all-ones broadcast address.
    pub const BROADCAST: NodeId = NodeId([0xff; NODE_ID_LEN]);

    /// Reserved identifier of the user PC bridge peer.
    pub const USER_BRIDGE: NodeId = NodeId([0xff, 0x00, 0x00, 0x00, 0x00, 0x00]);

    pub const fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; NODE_ID_LEN] = slice
            .try_into()
            .map_err(|_| Error::Codec(format!("node id must be {NODE_ID_LEN} bytes")))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// The 12 character lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|_| Error::Codec(format!("invalid node id: {s:?}")))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn hex_round_trip() {
        let id = NodeId::from_bytes([0x3c, 0x71, 0xbf, 0xe4, 0x8b, 0x89]);
        assert_eq!(id.to_hex(), "3c71bfe48b89");
        assert_eq!("3c71bfe48b89".parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn reserved_ids() {
        assert_eq!(NodeId::BROADCAST.to_hex(), "ffffffffffff");
        assert_eq!(NodeId::USER_BRIDGE.to_hex(), "ff0000000000");
        assert!(NodeId::BROADCAST.is_broadcast());
        assert!(!NodeId::USER_BRIDGE.is_broadcast());
    }

    #[test]
    fn rejects_malformed_input() {
        assert_matches!("3c71bfe48b".parse::<NodeId>(), Err(Error::Codec(_)));
        assert_matches!("not hex at all".parse::<NodeId>(), Err(Error::Codec(_)));
        assert_matches!(NodeId::from_slice(&[1, 2, 3]), Err(Error::Codec(_)));
    }
}
