// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Wire codecs for the two message families.
//!
//! Broadcast frames are fixed big-endian layouts with an HMAC-SHA256 suffix:
//! `magic | length | src[6] | type | body | digest[32]`, where `length`
//! counts everything after `src` including the digest. Tree frames are
//! newline-delimited JSON records, handled in [`tree_msg`].

pub mod tree_msg;

use crate::crypto::{self, Credential, DIGEST_LEN};
use crate::error::{Error, Result};
use crate::node_id::{NodeId, NODE_ID_LEN};

use bytes::{BufMut, Bytes, BytesMut};

/// First byte of every broadcast frame.
pub const MAGIC: u8 = 0x99;

/// Bytes preceding the signed region: magic, length and source address.
pub const HEADER_LEN: usize = 2 + NODE_ID_LEN;

/// Largest datagram the broadcast radio will hand us.
pub const MAX_DATAGRAM: usize = 250;

const KIND_ADVERTISE: u8 = 1;
const KIND_ROOT_ELECTED: u8 = 2;
const KIND_SEND_WIFI_CREDS: u8 = 3;
const KIND_OBTAIN_CREDS: u8 = 7;

const ADVERTISE_BODY_LEN: usize = 17;
const WIFI_CREDS_BODY_LEN: usize = 40;

/// Body length of an OBTAIN_CREDS frame: stage, source and payload.
pub const OBTAIN_CREDS_BODY_LEN: usize = 39;

/// Periodic self-description of a node, also relayed by neighbours.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Advertisement {
    pub id: NodeId,
    pub centrality: f32,
    pub router_rssi: f32,
    pub in_tree: bool,
    pub ttl: u16,
}

/// A claim: AES-encrypted station credentials for the sender's access point,
/// addressed to one chosen neighbour.
#[derive(Clone, Copy, PartialEq, custom_debug::Debug)]
pub struct WifiCredsGrant {
    pub dst: NodeId,
    pub essid_len: u16,
    #[debug(skip)]
    pub essid_enc: [u8; 16],
    #[debug(skip)]
    pub password_enc: [u8; 16],
}

/// Stages of the button-gated credential exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MpsStage {
    Syn = 0,
    SynAck = 1,
    Obtain = 2,
    Respond = 3,
    Unreg = 4,
}

impl TryFrom<u8> for MpsStage {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Syn),
            1 => Ok(Self::SynAck),
            2 => Ok(Self::Obtain),
            3 => Ok(Self::Respond),
            4 => Ok(Self::Unreg),
            other => Err(Error::Codec(format!("invalid exchange stage {other}"))),
        }
    }
}

/// One step of the credential exchange. The payload carries the credential
/// only in the RESPOND stage; it is zero everywhere else.
#[derive(Clone, Copy, PartialEq, custom_debug::Debug)]
pub struct CredsExchange {
    pub stage: MpsStage,
    pub src: NodeId,
    #[debug(skip)]
    pub payload: [u8; 32],
}

/// A decoded broadcast frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Advertise(Advertisement),
    /// Reserved type, same shape as an advertisement; only emitted when the
    /// capability flag is set.
    RootElected(Advertisement),
    WifiCreds(WifiCredsGrant),
    Creds(CredsExchange),
}

impl Frame {
    fn kind(&self) -> u8 {
        match self {
            Frame::Advertise(_) => KIND_ADVERTISE,
            Frame::RootElected(_) => KIND_ROOT_ELECTED,
            Frame::WifiCreds(_) => KIND_SEND_WIFI_CREDS,
            Frame::Creds(_) => KIND_OBTAIN_CREDS,
        }
    }

    fn encode_body(&self, body: &mut BytesMut) {
        match self {
            Frame::Advertise(adv) | Frame::RootElected(adv) => {
                body.put_slice(adv.id.as_bytes());
                body.put_f32(adv.centrality);
                body.put_f32(adv.router_rssi);
                body.put_u8(adv.in_tree as u8);
                body.put_u16(adv.ttl);
            }
            Frame::WifiCreds(grant) => {
                body.put_slice(grant.dst.as_bytes());
                body.put_u16(grant.essid_len);
                body.put_slice(&grant.essid_enc);
                body.put_slice(&grant.password_enc);
            }
            Frame::Creds(creds) => {
                body.put_u8(creds.stage as u8);
                body.put_slice(creds.src.as_bytes());
                body.put_slice(&creds.payload);
            }
        }
    }
}

/// Packs a frame and signs it with the given credential.
pub fn encode(frame: &Frame, src: NodeId, credential: &Credential) -> Bytes {
    let mut signed = BytesMut::with_capacity(1 + WIFI_CREDS_BODY_LEN);
    signed.put_u8(frame.kind());
    frame.encode_body(&mut signed);
    let digest = crypto::sign(credential, &signed);

    let mut out = BytesMut::with_capacity(HEADER_LEN + signed.len() + DIGEST_LEN);
    out.put_u8(MAGIC);
    out.put_u8((signed.len() + DIGEST_LEN) as u8);
    out.put_slice(src.as_bytes());
    out.put_slice(&signed);
    out.put_slice(&digest);
    out.freeze()
}

/// Parses and verifies one broadcast frame from the start of `buf`; trailing
/// bytes beyond the declared length are ignored (receive buffers come in
/// fixed-size).
///
/// On digest mismatch the frame is rejected with [`Error::Signature`], unless
/// the receiver is inside the exchange acceptance window and the signed
/// region is exactly OBTAIN_CREDS sized — the only way a node with a zero
/// credential can take delivery of its first secret, carried in the body's
/// trailing 32 bytes.
pub fn decode(buf: &[u8], credential: &Credential, in_mps_window: bool) -> Result<(NodeId, Frame)> {
    if buf.len() < HEADER_LEN {
        return Err(Error::Codec("truncated header".to_string()));
    }
    if buf[0] != MAGIC {
        return Err(Error::Codec(format!("bad magic byte {:#04x}", buf[0])));
    }
    let length = buf[1] as usize;
    let src = NodeId::from_slice(&buf[2..HEADER_LEN])?;
    if length <= DIGEST_LEN || buf.len() < HEADER_LEN + length {
        return Err(Error::Codec("truncated frame".to_string()));
    }

    let signed = &buf[HEADER_LEN..HEADER_LEN + length - DIGEST_LEN];
    let digest = &buf[HEADER_LEN + length - DIGEST_LEN..HEADER_LEN + length];

    if !crypto::verify(credential, signed, digest)
        && !(in_mps_window && signed.len() == 1 + OBTAIN_CREDS_BODY_LEN)
    {
        return Err(Error::Signature);
    }

    Ok((src, parse_signed(signed)?))
}

fn parse_advertisement(body: &[u8]) -> Result<Advertisement> {
    if body.len() != ADVERTISE_BODY_LEN {
        return Err(Error::Codec("bad advertisement body length".to_string()));
    }
    Ok(Advertisement {
        id: NodeId::from_slice(&body[..6])?,
        centrality: f32::from_be_bytes(body[6..10].try_into().expect("sliced to 4 bytes")),
        router_rssi: f32::from_be_bytes(body[10..14].try_into().expect("sliced to 4 bytes")),
        in_tree: body[14] != 0,
        ttl: u16::from_be_bytes([body[15], body[16]]),
    })
}

fn parse_signed(signed: &[u8]) -> Result<Frame> {
    let kind = signed[0];
    let body = &signed[1..];
    match kind {
        KIND_ADVERTISE => Ok(Frame::Advertise(parse_advertisement(body)?)),
        KIND_ROOT_ELECTED => Ok(Frame::RootElected(parse_advertisement(body)?)),
        KIND_SEND_WIFI_CREDS => {
            if body.len() != WIFI_CREDS_BODY_LEN {
                return Err(Error::Codec("bad claim body length".to_string()));
            }
            Ok(Frame::WifiCreds(WifiCredsGrant {
                dst: NodeId::from_slice(&body[..6])?,
                essid_len: u16::from_be_bytes([body[6], body[7]]),
                essid_enc: body[8..24].try_into().expect("sliced to 16 bytes"),
                password_enc: body[24..40].try_into().expect("sliced to 16 bytes"),
            }))
        }
        KIND_OBTAIN_CREDS => {
            if body.len() != OBTAIN_CREDS_BODY_LEN {
                return Err(Error::Codec("bad exchange body length".to_string()));
            }
            Ok(Frame::Creds(CredsExchange {
                stage: MpsStage::try_from(body[0])?,
                src: NodeId::from_slice(&body[1..7])?,
                payload: body[7..39].try_into().expect("sliced to 32 bytes"),
            }))
        }
        other => Err(Error::Codec(format!("unknown frame type {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn cred() -> Credential {
        Credential::from_preshared("wire codec test credential").unwrap()
    }

    fn id(byte: u8) -> NodeId {
        NodeId::from_bytes([0, 0, 0, 0, 0, byte])
    }

    #[test]
    fn advertise_layout_is_bit_exact() {
        let adv = Advertisement {
            id: id(0xa0),
            centrality: 0.0,
            router_rssi: 0.0,
            in_tree: false,
            ttl: 0,
        };
        let buf = encode(&Frame::Advertise(adv), id(0xa0), &cred());
        assert_eq!(buf[0], MAGIC);
        // length byte counts type, body and digest
        assert_eq!(buf[1] as usize, 1 + ADVERTISE_BODY_LEN + DIGEST_LEN);
        assert_eq!(&buf[2..8], id(0xa0).as_bytes());
        assert_eq!(buf[8], KIND_ADVERTISE);
        assert_eq!(buf.len(), HEADER_LEN + 1 + ADVERTISE_BODY_LEN + DIGEST_LEN);
    }

    #[test]
    fn trailing_receive_buffer_padding_is_ignored() {
        let adv = Advertisement {
            id: id(1),
            centrality: 1.5,
            router_rssi: -74.2,
            in_tree: true,
            ttl: 3,
        };
        let mut padded = vec![0u8; MAX_DATAGRAM];
        let buf = encode(&Frame::Advertise(adv), id(1), &cred());
        padded[..buf.len()].copy_from_slice(&buf);

        let (src, frame) = decode(&padded, &cred(), false).unwrap();
        assert_eq!(src, id(1));
        assert_eq!(frame, Frame::Advertise(adv));
    }

    #[test]
    fn tampered_digest_is_rejected() {
        let adv = Advertisement {
            id: id(1),
            centrality: 0.0,
            router_rssi: 0.0,
            in_tree: false,
            ttl: 0,
        };
        let mut buf = encode(&Frame::Advertise(adv), id(1), &cred()).to_vec();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert_matches!(decode(&buf, &cred(), false), Err(Error::Signature));
    }

    #[test]
    fn wrong_credential_is_rejected() {
        let adv = Advertisement {
            id: id(1),
            centrality: 0.0,
            router_rssi: 0.0,
            in_tree: false,
            ttl: 0,
        };
        let buf = encode(&Frame::Advertise(adv), id(1), &cred());
        let other = Credential::from_preshared("a different credential").unwrap();
        assert_matches!(decode(&buf, &other, false), Err(Error::Signature));
        // the window exception never applies to advertisement-sized bodies
        assert_matches!(decode(&buf, &other, true), Err(Error::Signature));
    }

    #[test]
    fn window_exception_admits_unverifiable_exchange_frames() {
        let mut payload = [0u8; 32];
        payload.copy_from_slice(cred().as_bytes());
        let respond = Frame::Creds(CredsExchange {
            stage: MpsStage::Respond,
            src: id(2),
            payload,
        });
        let buf = encode(&respond, id(2), &cred());

        // an uninitialised receiver cannot verify the digest
        assert_matches!(decode(&buf, &Credential::zero(), false), Err(Error::Signature));

        let (src, frame) = decode(&buf, &Credential::zero(), true).unwrap();
        assert_eq!(src, id(2));
        assert_matches!(frame, Frame::Creds(creds) => {
            assert_eq!(creds.stage, MpsStage::Respond);
            assert_eq!(&creds.payload, cred().as_bytes());
        });
    }

    #[test]
    fn out_of_range_stage_is_dropped() {
        let creds = Frame::Creds(CredsExchange {
            stage: MpsStage::Syn,
            src: id(3),
            payload: [0; 32],
        });
        let mut buf = encode(&creds, id(3), &cred()).to_vec();
        // stage byte sits right after the type byte
        buf[HEADER_LEN + 1] = 5;
        assert_matches!(decode(&buf, &cred(), true), Err(Error::Codec(_)));
    }

    #[test]
    fn unknown_type_is_dropped() {
        let adv = Advertisement {
            id: id(1),
            centrality: 0.0,
            router_rssi: 0.0,
            in_tree: false,
            ttl: 0,
        };
        let mut buf = encode(&Frame::Advertise(adv), id(1), &cred()).to_vec();
        buf[HEADER_LEN] = 9;
        // re-sign so only the type is at fault
        let signed_end = buf.len() - DIGEST_LEN;
        let digest = crypto::sign(&cred(), &buf[HEADER_LEN..signed_end]);
        buf[signed_end..].copy_from_slice(&digest);
        assert_matches!(decode(&buf, &cred(), false), Err(Error::Codec(_)));
    }

    #[test]
    fn truncated_frames_are_dropped() {
        assert_matches!(decode(&[MAGIC, 40], &cred(), false), Err(Error::Codec(_)));
        let adv = Advertisement {
            id: id(1),
            centrality: 0.0,
            router_rssi: 0.0,
            in_tree: false,
            ttl: 0,
        };
        let buf = encode(&Frame::Advertise(adv), id(1), &cred());
        assert_matches!(
            decode(&buf[..buf.len() - 4], &cred(), false),
            Err(Error::Codec(_))
        );
    }

    proptest! {
        #[test]
        fn advertisement_round_trips(
            raw_id in any::<[u8; 6]>(),
            centrality in 0.0f32..1000.0,
            router_rssi in -120.0f32..0.0,
            in_tree in any::<bool>(),
            ttl in any::<u16>(),
            key in any::<[u8; 32]>(),
        ) {
            let credential = Credential::from_bytes(key);
            let adv = Advertisement {
                id: NodeId::from_bytes(raw_id),
                centrality,
                router_rssi,
                in_tree,
                ttl,
            };
            let buf = encode(&Frame::Advertise(adv), NodeId::from_bytes(raw_id), &credential);
            let (src, frame) = decode(&buf, &credential, false).unwrap();
            prop_assert_eq!(src, NodeId::from_bytes(raw_id));
            prop_assert_eq!(frame, Frame::Advertise(adv));
        }

        #[test]
        fn claim_round_trips(
            dst in any::<[u8; 6]>(),
            essid_len in 0u16..=16,
            essid_enc in any::<[u8; 16]>(),
            password_enc in any::<[u8; 16]>(),
            key in any::<[u8; 32]>(),
        ) {
            let credential = Credential::from_bytes(key);
            let grant = WifiCredsGrant {
                dst: NodeId::from_bytes(dst),
                essid_len,
                essid_enc,
                password_enc,
            };
            let src = NodeId::from_bytes([1, 2, 3, 4, 5, 6]);
            let buf = encode(&Frame::WifiCreds(grant), src, &credential);
            let (_, frame) = decode(&buf, &credential, false).unwrap();
            prop_assert_eq!(frame, Frame::WifiCreds(grant));
        }

        #[test]
        fn exchange_round_trips(
            stage in 0u8..=4,
            src in any::<[u8; 6]>(),
            payload in any::<[u8; 32]>(),
            key in any::<[u8; 32]>(),
        ) {
            let credential = Credential::from_bytes(key);
            let creds = CredsExchange {
                stage: MpsStage::try_from(stage).unwrap(),
                src: NodeId::from_bytes(src),
                payload,
            };
            let buf = encode(&Frame::Creds(creds), NodeId::from_bytes(src), &credential);
            let (_, frame) = decode(&buf, &credential, false).unwrap();
            prop_assert_eq!(frame, Frame::Creds(creds));
        }
    }
}
