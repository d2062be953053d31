// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Wallet and chain collaborators
//!
//! The payment channel engine doesn't track UTXOs, sign or sync blocks on its own. It drives a
//! [`KeyStore`] that watches the keys it derives and a [`ChainSource`] that knows the chain tip,
//! can rewind its view of the chain and broadcasts transactions.

use std::ops::Deref;
use std::sync::Arc;

use bitcoin::{OutPoint, Script, Transaction, Txid};
use futures::future::BoxFuture;

use crate::error::Error;
use crate::types::KeyPair;

/// The wallet side: keys we watch and outputs we own
pub trait KeyStore {
    /// Register `key` so that payments to its address are picked up
    fn import_watch_key(&self, key: KeyPair) -> Result<(), Error>;

    /// Return every key registered through [`KeyStore::import_watch_key`].
    ///
    /// Keys already in here aren't imported again when channels are loaded or merged.
    fn imported_keys(&self) -> Result<Vec<KeyPair>, Error>;

    /// Whether `script` belongs to the wallet
    fn is_mine(&self, script: &Script) -> Result<bool, Error>;

    /// Whether the output spent by `outpoint` belongs to the wallet
    fn owns_outpoint(&self, outpoint: &OutPoint) -> Result<bool, Error>;
}

/// The chain side
pub trait ChainSource {
    /// Height of the best block we know about
    fn current_height(&self) -> Result<u32, Error>;

    /// Forget everything above `height` so it's scanned again.
    ///
    /// The engine calls this with its channel map unlocked: an implementation may replay the
    /// blocks it forgot through [`Bip47Wallet::process_received`] before returning.
    ///
    /// [`Bip47Wallet::process_received`]: crate::wallet::Bip47Wallet::process_received
    fn rollback_to(&self, height: u32) -> Result<(), Error>;

    fn broadcast(&self, tx: Transaction) -> BoxFuture<'_, Result<Txid, Error>>;
}

impl<T: KeyStore> KeyStore for Arc<T> {
    fn import_watch_key(&self, key: KeyPair) -> Result<(), Error> {
        self.deref().import_watch_key(key)
    }

    fn imported_keys(&self) -> Result<Vec<KeyPair>, Error> {
        self.deref().imported_keys()
    }

    fn is_mine(&self, script: &Script) -> Result<bool, Error> {
        self.deref().is_mine(script)
    }

    fn owns_outpoint(&self, outpoint: &OutPoint) -> Result<bool, Error> {
        self.deref().owns_outpoint(outpoint)
    }
}

impl<T: ChainSource> ChainSource for Arc<T> {
    fn current_height(&self) -> Result<u32, Error> {
        self.deref().current_height()
    }

    fn rollback_to(&self, height: u32) -> Result<(), Error> {
        self.deref().rollback_to(height)
    }

    fn broadcast(&self, tx: Transaction) -> BoxFuture<'_, Result<Txid, Error>> {
        self.deref().broadcast(tx)
    }
}
