// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The mesh-wide signing credential and the two primitives built on it:
//! HMAC-SHA256 digests over broadcast frames, and single-block AES-128
//! encryption of the station SSID/password handed out in a child claim.

use crate::error::{Error, Result};

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Length of the mesh signing credential, equal to the HMAC-SHA256 digest size.
pub const CREDENTIAL_LEN: usize = 32;

/// Length of an HMAC-SHA256 digest.
pub const DIGEST_LEN: usize = 32;

/// Length of the broadcast radio's master keys (PMK/LMK) and of the AES block.
pub const MASTER_KEY_LEN: usize = 16;

// Fixed IV folded into the single-block SSID/password encryption.
const CREDS_IV: [u8; MASTER_KEY_LEN] = *b"1234123412341234";

/// The 32 byte secret shared by all mesh members.
///
/// All-zero means "uninitialised": such a node cannot verify frames and must
/// obtain the credential through the button-gated exchange. The first 16
/// bytes double as the AES-128 key for claim payloads.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Credential([u8; CREDENTIAL_LEN]);

impl Credential {
    pub const fn zero() -> Self {
        Self([0; CREDENTIAL_LEN])
    }

    pub const fn from_bytes(bytes: [u8; CREDENTIAL_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds a credential from a preshared secret of at most 32 bytes,
    /// zero-padded to the full length.
    pub fn from_preshared(secret: &str) -> Result<Self> {
        let raw = secret.as_bytes();
        if raw.len() > CREDENTIAL_LEN {
            return Err(Error::Config(format!(
                "preshared credential longer than {CREDENTIAL_LEN} bytes"
            )));
        }
        let mut bytes = [0u8; CREDENTIAL_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self(bytes))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; CREDENTIAL_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; CREDENTIAL_LEN] {
        &self.0
    }

    fn aes_key(&self) -> &[u8] {
        &self.0[..MASTER_KEY_LEN]
    }
}

impl fmt::Debug for Credential {
    // Never print key material.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "Credential(unset)")
        } else {
            write!(f, "Credential(..)")
        }
    }
}

/// A 16 byte master key (PMK or LMK) consumed opaquely by the broadcast
/// radio driver for its link-layer encryption.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);

impl MasterKey {
    pub fn from_secret(secret: &str) -> Result<Self> {
        let bytes: [u8; MASTER_KEY_LEN] = secret
            .as_bytes()
            .try_into()
            .map_err(|_| Error::Config(format!("LMK and PMK keys must be {MASTER_KEY_LEN} bytes long")))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey(..)")
    }
}

impl Serialize for MasterKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(&self.0))
    }
}

impl<'de> Deserialize<'de> for MasterKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_secret(&s).map_err(de::Error::custom)
    }
}

/// HMAC-SHA256 digest over `msg` keyed by the credential.
pub fn sign(credential: &Credential, msg: &[u8]) -> [u8; DIGEST_LEN] {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(credential.as_bytes()).expect("hmac accepts any key length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// Constant-time digest verification.
pub fn verify(credential: &Credential, msg: &[u8], digest: &[u8]) -> bool {
    if digest.len() != DIGEST_LEN {
        return false;
    }
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(credential.as_bytes()).expect("hmac accepts any key length");
    mac.update(msg);
    mac.verify_slice(digest).is_ok()
}

/// Encrypts a short string into one AES block, zero-padded/truncated to 16
/// bytes, keyed by the first half of the credential.
pub fn encrypt_block(credential: &Credential, value: &str) -> [u8; MASTER_KEY_LEN] {
    let cipher = Aes128::new(GenericArray::from_slice(credential.aes_key()));
    let mut block = [0u8; MASTER_KEY_LEN];
    let raw = value.as_bytes();
    let n = raw.len().min(MASTER_KEY_LEN);
    block[..n].copy_from_slice(&raw[..n]);
    for (b, iv) in block.iter_mut().zip(CREDS_IV.iter()) {
        *b ^= iv;
    }
    let mut out = GenericArray::from(block);
    cipher.encrypt_block(&mut out);
    out.into()
}

/// Inverse of [`encrypt_block`]; trailing padding is stripped.
pub fn decrypt_block(credential: &Credential, block: &[u8; MASTER_KEY_LEN]) -> String {
    let cipher = Aes128::new(GenericArray::from_slice(credential.aes_key()));
    let mut out = GenericArray::from(*block);
    cipher.decrypt_block(&mut out);
    let mut plain: [u8; MASTER_KEY_LEN] = out.into();
    for (b, iv) in plain.iter_mut().zip(CREDS_IV.iter()) {
        *b ^= iv;
    }
    let end = plain
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(MASTER_KEY_LEN);
    String::from_utf8_lossy(&plain[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn credential() -> Credential {
        Credential::from_preshared("a shared secret").unwrap()
    }

    #[test]
    fn preshared_is_zero_padded() {
        let cred = credential();
        assert!(!cred.is_zero());
        assert_eq!(&cred.as_bytes()[..15], b"a shared secret");
        assert!(cred.as_bytes()[15..].iter().all(|b| *b == 0));
    }

    #[test]
    fn preshared_too_long_is_rejected() {
        let long = "x".repeat(CREDENTIAL_LEN + 1);
        assert_matches!(Credential::from_preshared(&long), Err(Error::Config(_)));
    }

    #[test]
    fn master_key_length_is_enforced() {
        assert!(MasterKey::from_secret("0123456789abcdef").is_ok());
        assert_matches!(MasterKey::from_secret("too short"), Err(Error::Config(_)));
        assert_matches!(
            MasterKey::from_secret("longer than sixteen bytes"),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn sign_verify_round_trip() {
        let cred = credential();
        let digest = sign(&cred, b"frame body");
        assert!(verify(&cred, b"frame body", &digest));
        assert!(!verify(&cred, b"other body", &digest));
        assert!(!verify(&Credential::zero(), b"frame body", &digest));
        assert!(!verify(&cred, b"frame body", &digest[..16]));
    }

    #[test]
    fn block_encryption_round_trip() {
        let cred = credential();
        for value in ["ap-3c71bfe48b89", "tiny", "exactly16bytes!!"] {
            let enc = encrypt_block(&cred, value);
            assert_ne!(&enc[..value.len().min(16)], value.as_bytes());
            assert_eq!(decrypt_block(&cred, &enc), value);
        }
    }

    #[test]
    fn block_encryption_truncates_to_one_block() {
        let cred = credential();
        let enc = encrypt_block(&cred, "a value that is longer than one block");
        assert_eq!(decrypt_block(&cred, &enc), "a value that is ");
    }
}
