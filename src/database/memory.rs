// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! In-memory collaborator
//!
//! This module defines [`MemoryBackend`], a [`KeyStore`] and [`ChainSource`] that keeps
//! everything in memory. It records the rollbacks and broadcasts it's asked for, which makes
//! it handy in tests.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use bitcoin::{OutPoint, Script, ScriptBuf, Transaction, Txid};
use futures::future::{self, BoxFuture, FutureExt};

use crate::blockchain::{ChainSource, KeyStore};
use crate::error::Error;
use crate::types::KeyPair;

#[derive(Debug, Default)]
struct Inner {
    scripts: HashSet<ScriptBuf>,
    outpoints: HashSet<OutPoint>,
    keys: Vec<KeyPair>,
    height: u32,
    rollbacks: Vec<u32>,
    broadcasts: Vec<Transaction>,
    broadcast_error: Option<String>,
}

/// In-memory wallet and chain
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    /// Create a new empty backend at height `0`
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, Inner>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::Backend("memory backend lock poisoned".into()))
    }

    /// Treat `script` as one of the wallet's own
    pub fn add_script(&self, script: ScriptBuf) -> Result<(), Error> {
        self.inner()?.scripts.insert(script);
        Ok(())
    }

    /// Treat the output at `outpoint` as one of the wallet's own
    pub fn add_outpoint(&self, outpoint: OutPoint) -> Result<(), Error> {
        self.inner()?.outpoints.insert(outpoint);
        Ok(())
    }

    pub fn set_height(&self, height: u32) -> Result<(), Error> {
        self.inner()?.height = height;
        Ok(())
    }

    /// Make every following broadcast fail with `error`, or succeed again with `None`
    pub fn set_broadcast_error(&self, error: Option<String>) -> Result<(), Error> {
        self.inner()?.broadcast_error = error;
        Ok(())
    }

    /// Heights passed to [`ChainSource::rollback_to`], in order
    pub fn rollbacks(&self) -> Result<Vec<u32>, Error> {
        Ok(self.inner()?.rollbacks.clone())
    }

    /// Transactions successfully broadcast, in order
    pub fn broadcasts(&self) -> Result<Vec<Transaction>, Error> {
        Ok(self.inner()?.broadcasts.clone())
    }
}

impl KeyStore for MemoryBackend {
    fn import_watch_key(&self, key: KeyPair) -> Result<(), Error> {
        let mut inner = self.inner()?;
        if !inner.keys.contains(&key) {
            inner.keys.push(key);
        }

        Ok(())
    }

    fn imported_keys(&self) -> Result<Vec<KeyPair>, Error> {
        Ok(self.inner()?.keys.clone())
    }

    fn is_mine(&self, script: &Script) -> Result<bool, Error> {
        let inner = self.inner()?;

        Ok(inner.scripts.contains(script)
            || inner
                .keys
                .iter()
                .any(|k| k.script_pubkey().as_script() == script))
    }

    fn owns_outpoint(&self, outpoint: &OutPoint) -> Result<bool, Error> {
        Ok(self.inner()?.outpoints.contains(outpoint))
    }
}

impl ChainSource for MemoryBackend {
    fn current_height(&self) -> Result<u32, Error> {
        Ok(self.inner()?.height)
    }

    fn rollback_to(&self, height: u32) -> Result<(), Error> {
        let mut inner = self.inner()?;
        if height > inner.height {
            return Err(Error::Backend(format!(
                "can't roll back to {}, the tip is at {}",
                height, inner.height
            )));
        }

        inner.rollbacks.push(height);
        inner.height = height;
        Ok(())
    }

    fn broadcast(&self, tx: Transaction) -> BoxFuture<'_, Result<Txid, Error>> {
        let res = self.inner().and_then(|mut inner| match &inner.broadcast_error {
            Some(e) => Err(Error::Backend(e.clone())),
            None => {
                let txid = tx.compute_txid();
                inner.broadcasts.push(tx);
                Ok(txid)
            }
        });

        future::ready(res).boxed()
    }
}
