// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::fmt;

use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::{Address, Network, ScriptBuf};

use crate::keys::SecpCtx;

/// A derived key, either a full key pair or a bare public key.
///
/// Derivation routines hand these out by value: importing one into a [`KeyStore`] moves a copy
/// into the watch set, so nothing is shared with the deriver.
///
/// [`KeyStore`]: crate::blockchain::KeyStore
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct KeyPair {
    public_key: PublicKey,
    secret_key: Option<SecretKey>,
}

impl KeyPair {
    /// Build a key pair from a secret key
    pub fn from_secret_key(secp: &SecpCtx, secret_key: SecretKey) -> Self {
        KeyPair {
            public_key: PublicKey::from_secret_key(secp, &secret_key),
            secret_key: Some(secret_key),
        }
    }

    /// Build a watch-only key
    pub fn from_public_key(public_key: PublicKey) -> Self {
        KeyPair {
            public_key,
            secret_key: None,
        }
    }

    /// Return the public half
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Return the secret half, if known
    pub fn secret_key(&self) -> Option<SecretKey> {
        self.secret_key
    }

    /// Whether this key can sign
    pub fn has_secret_key(&self) -> bool {
        self.secret_key.is_some()
    }

    /// The P2PKH address of the compressed public key
    pub fn address(&self, network: Network) -> Address {
        Address::p2pkh(bitcoin::PublicKey::new(self.public_key).pubkey_hash(), network)
    }

    /// The P2PKH `script_pubkey` of the compressed public key
    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&bitcoin::PublicKey::new(self.public_key).pubkey_hash())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("has_secret_key", &self.secret_key.is_some())
            .finish()
    }
}
