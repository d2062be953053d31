// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! BIP47 account
//!
//! The account key lives at `m/47'/0'/0'`. Its public half plus chain code form our
//! [`PaymentCode`], and its non-hardened children are the keys the other party combines with a
//! shared secret to derive payment addresses. Child `0` doubles as the notification key.

use std::fmt;

use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::SecretKey;
use bitcoin::{Address, Network, NetworkKind};

use super::SecpCtx;
use crate::error::Error;
use crate::payment_code::PaymentCode;
use crate::types::KeyPair;

/// `m/47'/0'/0'`
const BIP47_PATH: [ChildNumber; 3] = [
    ChildNumber::Hardened { index: 47 },
    ChildNumber::Hardened { index: 0 },
    ChildNumber::Hardened { index: 0 },
];

/// Index of the child used as notification key
pub const NOTIFICATION_INDEX: u32 = 0;

/// BIP47 account derived from a wallet seed.
///
/// The account is a pure function of the seed: the same seed always yields the same
/// notification key and the same child sequence.
#[derive(Clone)]
pub struct Account {
    xprv: Xpriv,
    xpub: Xpub,
}

impl Account {
    /// Derive the account at `m/47'/0'/0'` from the raw seed bytes
    pub fn from_seed(secp: &SecpCtx, seed: &[u8]) -> Result<Self, Error> {
        let master = Xpriv::new_master(NetworkKind::Main, seed)?;
        let xprv = master.derive_priv(secp, &BIP47_PATH)?;

        Ok(Account {
            xpub: Xpub::from_priv(secp, &xprv),
            xprv,
        })
    }

    /// Our own payment code
    pub fn payment_code(&self) -> PaymentCode {
        PaymentCode::new(self.xpub.public_key, self.xpub.chain_code)
    }

    /// Derive the `index`-th non-hardened child of the account key.
    ///
    /// Fails with [`Error::InvalidIndex`] for indexes in the hardened range.
    pub fn child_key(&self, secp: &SecpCtx, index: u32) -> Result<KeyPair, Error> {
        Ok(KeyPair::from_secret_key(secp, self.child_secret(secp, index)?))
    }

    /// The notification key pair (child `0`)
    pub fn notification_key(&self, secp: &SecpCtx) -> Result<KeyPair, Error> {
        self.child_key(secp, NOTIFICATION_INDEX)
    }

    /// The address other wallets send our notification transactions to
    pub fn notification_address(
        &self,
        secp: &SecpCtx,
        network: Network,
    ) -> Result<Address, Error> {
        Ok(self.notification_key(secp)?.address(network))
    }

    pub(crate) fn child_secret(&self, secp: &SecpCtx, index: u32) -> Result<SecretKey, Error> {
        let child = ChildNumber::from_normal_idx(index).map_err(|_| Error::InvalidIndex(index))?;
        let derived = self.xprv.derive_priv(secp, &[child])?;

        Ok(derived.private_key)
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("payment_code", &self.payment_code().to_string())
            .finish()
    }
}
