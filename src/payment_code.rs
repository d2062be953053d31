// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Payment codes
//!
//! A payment code is an 80 byte payload:
//!
//! | bytes    | content                          |
//! |----------|----------------------------------|
//! | `0`      | version (`0x01`)                 |
//! | `1`      | features bitfield                |
//! | `2..35`  | compressed public key            |
//! | `35..67` | chain code                       |
//! | `67..80` | reserved, zero                   |
//!
//! Its textual form is the base58check encoding of the payload prefixed with `0x47`.

use std::fmt;
use std::str::FromStr;

use bitcoin::base58;
use bitcoin::bip32::{ChainCode, ChildNumber, Fingerprint, Xpub};
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Address, Network, NetworkKind, ScriptBuf};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, PaymentCodeError};
use crate::keys::SecpCtx;
use crate::notification::BlindingFactor;
use crate::types::KeyPair;

/// Length of the binary payload
pub const PAYLOAD_LEN: usize = 80;
/// The only version we understand
pub const VERSION: u8 = 0x01;
/// Prefix byte of the base58check form
const BASE58_PREFIX: u8 = 0x47;

/// Offset of the public key's x-coordinate, the first blinded byte
const BLINDED_START: usize = 3;
/// End of the chain code, exclusive
const BLINDED_END: usize = 67;

#[derive(Copy, Clone, PartialEq, Eq, Debug, PartialOrd, Ord, Hash)]
pub struct PaymentCode {
    pub version: u8,
    pub features: u8,
    pub public_key: PublicKey,
    pub chain_code: ChainCode,
}

impl PaymentCode {
    /// Version 1 payment code with no features set
    pub fn new(public_key: PublicKey, chain_code: ChainCode) -> Self {
        PaymentCode {
            version: VERSION,
            features: 0x00,
            public_key,
            chain_code,
        }
    }

    pub fn decode(data: &[u8]) -> Result<PaymentCode, PaymentCodeError> {
        if data.len() != PAYLOAD_LEN {
            return Err(PaymentCodeError::WrongDataLength(data.len()));
        }

        let version = data[0];
        if version != VERSION {
            return Err(PaymentCodeError::UnknownVersion(version));
        }
        let features = data[1];
        let sign = data[2];
        if sign != 0x02 && sign != 0x03 {
            return Err(PaymentCodeError::InvalidPublicKeySign(sign));
        }

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&data[35..67]);

        Ok(PaymentCode {
            version,
            features,
            public_key: PublicKey::from_slice(&data[2..35])
                .map_err(|_| PaymentCodeError::InvalidPublicKey)?,
            chain_code: ChainCode::from(chain_code),
        })
    }

    /// Unmask a payload read from a notification transaction and decode it
    pub fn decode_blinded(
        data: &[u8],
        blinding_factor: &BlindingFactor,
    ) -> Result<PaymentCode, PaymentCodeError> {
        if data.len() != PAYLOAD_LEN {
            return Err(PaymentCodeError::WrongDataLength(data.len()));
        }

        let mut data = data.to_vec();
        blinding_factor.apply(&mut data[BLINDED_START..BLINDED_END]);

        Self::decode(&data)
    }

    pub fn encode(&self) -> [u8; PAYLOAD_LEN] {
        let mut ret = [0; PAYLOAD_LEN];
        ret[0] = self.version;
        ret[1] = self.features;
        ret[2..35].copy_from_slice(&self.public_key.serialize()[..]);
        ret[35..67].copy_from_slice(&self.chain_code[..]);
        ret
    }

    /// Encode and mask the public key x-coordinate and chain code
    pub fn encode_blinded(&self, blinding_factor: &BlindingFactor) -> [u8; PAYLOAD_LEN] {
        let mut encoded = self.encode();
        blinding_factor.apply(&mut encoded[BLINDED_START..BLINDED_END]);

        encoded
    }

    /// The public key the counterparty reaches us with, `M/0`
    pub fn notification_key(&self, secp: &SecpCtx) -> Result<PublicKey, Error> {
        self.derive(secp, 0)
    }

    pub fn notification_address(
        &self,
        secp: &SecpCtx,
        network: Network,
    ) -> Result<Address, Error> {
        Ok(KeyPair::from_public_key(self.notification_key(secp)?).address(network))
    }

    pub(crate) fn notification_script(&self, secp: &SecpCtx) -> Result<ScriptBuf, Error> {
        Ok(KeyPair::from_public_key(self.notification_key(secp)?).script_pubkey())
    }

    /// Derive the `index`-th non-hardened child public key
    pub fn derive(&self, secp: &SecpCtx, index: u32) -> Result<PublicKey, Error> {
        let child = ChildNumber::from_normal_idx(index).map_err(|_| Error::InvalidIndex(index))?;

        Ok(self.to_xpub().derive_pub(secp, &[child])?.public_key)
    }

    fn to_xpub(&self) -> Xpub {
        Xpub {
            network: NetworkKind::Main,
            depth: 0,
            parent_fingerprint: Fingerprint::from([0u8; 4]),
            child_number: ChildNumber::Normal { index: 0 },
            public_key: self.public_key,
            chain_code: self.chain_code,
        }
    }
}

impl fmt::Display for PaymentCode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut prefixed = [0; PAYLOAD_LEN + 1];
        prefixed[0] = BASE58_PREFIX;
        prefixed[1..].copy_from_slice(&self.encode()[..]);
        fmt.write_str(&base58::encode_check(&prefixed[..]))
    }
}

impl FromStr for PaymentCode {
    type Err = PaymentCodeError;

    fn from_str(inp: &str) -> Result<PaymentCode, PaymentCodeError> {
        let data = base58::decode_check(inp)?;

        if data.len() != PAYLOAD_LEN + 1 {
            return Err(PaymentCodeError::WrongDataLength(data.len().saturating_sub(1)));
        }
        if data[0] != BASE58_PREFIX {
            return Err(PaymentCodeError::InvalidPrefix(data[0]));
        }

        PaymentCode::decode(&data[1..])
    }
}

impl Serialize for PaymentCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PaymentCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PaymentCode::from_str(&s).map_err(de::Error::custom)
    }
}
