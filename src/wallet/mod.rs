// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Payment channel engine
//!
//! This module defines [`Bip47Wallet`], which classifies the transactions the wallet sees and
//! keeps the [`Channel`]s up to date:
//!
//! * a notification transaction addressed to us opens a channel and starts watching the first
//!   address the counterparty will pay us at;
//! * a payment to one of those addresses starts watching the next one;
//! * a notification transaction we broadcast marks the channel as usable for sending, and a
//!   payment we make on a channel moves it to the next outgoing address.
//!
//! Every change is written through the [`PersistBackend`] right away.
//!
//! ## Example
//!
//! ```
//! # use std::sync::Arc;
//! # use bdk_bip47::*;
//! # use bdk_bip47::bitcoin::Network;
//! let backend = Arc::new(MemoryBackend::new());
//! let wallet = Bip47Wallet::create(
//!     &[0x42; 64],
//!     Arc::clone(&backend),
//!     Arc::clone(&backend),
//!     (),
//!     Bip47Params::new().network(Network::Testnet),
//! )?;
//!
//! println!("Share this: {}", wallet.payment_code());
//! # Ok::<_, bdk_bip47::Error>(())
//! ```

use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{Address, Amount, Network, OutPoint, ScriptBuf, Transaction, TxOut, Txid};

use crate::blockchain::{ChainSource, KeyStore};
use crate::channel::{Channel, ChannelStore};
use crate::derivation::{receive_key, send_key};
use crate::error::Error;
use crate::keys::{Account, SecpCtx};
use crate::notification;
use crate::payment_code::PaymentCode;
use crate::persist::PersistBackend;

pub mod params;

pub use params::Bip47Params;

/// What a transaction turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxClass {
    /// A notification transaction opened the channel keyed by `channel`
    Notification {
        channel: String,
        payment_code: PaymentCode,
        rescan: RescanOutcome,
    },
    /// A notification for a channel that already has incoming addresses
    DuplicateNotification { channel: String },
    /// A payment on `channel`, the next incoming address was derived at `next_index`
    Payment { channel: String, next_index: u32 },
    /// A payment to an incoming address that was already paid
    DuplicatePayment { channel: String },
    /// We notified the owner of `channel`
    NotificationSent {
        channel: String,
        txid: Txid,
        rescan: RescanOutcome,
    },
    /// We paid `channel` at outgoing `index`
    PaymentSent { channel: String, index: u32 },
    /// Nothing to do with payment channels
    Irrelevant,
}

/// Result of asking the chain to rescan around a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescanOutcome {
    /// The chain was rolled back to this height
    RolledBack(u32),
    Skipped(SkipReason),
}

/// Why a rescan didn't happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The transaction isn't confirmed
    Unconfirmed,
    /// The transaction is confirmed too close to genesis to rewind below it
    TooShallow { height: u32 },
    /// The transaction is confirmed above the best block we know about
    AboveTip { height: u32, tip: u32 },
    /// The chain source failed
    Backend(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unconfirmed => write!(f, "transaction unconfirmed"),
            SkipReason::TooShallow { height } => {
                write!(f, "height {} is too close to genesis", height)
            }
            SkipReason::AboveTip { height, tip } => {
                write!(f, "height {} is above our tip {}", height, tip)
            }
            SkipReason::Backend(e) => write!(f, "chain source error: {}", e),
        }
    }
}

/// A transaction reported by the wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvent {
    /// The wallet received `tx`, confirmed at `height` if known
    Received {
        tx: Transaction,
        height: Option<u32>,
    },
    /// The wallet sent `tx`, confirmed at `height` if known
    Sent {
        tx: Transaction,
        height: Option<u32>,
    },
}

struct State<P> {
    channels: ChannelStore,
    persist: P,
}

/// The BIP47 payment channel engine.
///
/// `K` watches the keys we derive, `C` is our view of the chain and `P` persists the channels.
/// Transactions are processed one at a time: the channel map stays locked from classification
/// to the end of the save. The rescan that follows a notification runs once the lock is released,
/// so the chain source may call back into the engine.
pub struct Bip47Wallet<K, C, P = ()> {
    secp: SecpCtx,
    account: Account,
    network: Network,
    notification_value: Amount,
    rescan_depth: u32,
    notification_script: ScriptBuf,
    key_store: K,
    chain: C,
    state: Mutex<State<P>>,
}

impl<K, C, P> Bip47Wallet<K, C, P>
where
    K: KeyStore,
    C: ChainSource,
    P: PersistBackend,
{
    /// Create an engine with no channels.
    ///
    /// Our notification key is imported in `key_store` so that notifications get picked up.
    pub fn create(
        seed: &[u8],
        key_store: K,
        chain: C,
        persist: P,
        params: Bip47Params,
    ) -> Result<Self, Error> {
        let secp = Secp256k1::new();
        let account = Account::from_seed(&secp, seed)?;
        let notification_key = account.notification_key(&secp)?;

        key_store.import_watch_key(notification_key)?;
        log::info!(
            "Created BIP47 wallet for {}, notification address {}",
            account.payment_code(),
            notification_key.address(params.network)
        );

        Ok(Bip47Wallet {
            notification_script: notification_key.script_pubkey(),
            secp,
            account,
            network: params.network,
            notification_value: params.notification_value,
            rescan_depth: params.rescan_depth,
            key_store,
            chain,
            state: Mutex::new(State {
                channels: ChannelStore::new(),
                persist,
            }),
        })
    }

    /// Create an engine and load the channels saved in `persist`.
    ///
    /// The keys of every incoming address are imported again in `key_store`.
    pub fn load(
        seed: &[u8],
        key_store: K,
        chain: C,
        mut persist: P,
        params: Bip47Params,
    ) -> Result<Self, Error> {
        let channels = persist.load().map_err(|e| {
            log::error!("Failed to load channels: {:?}", e);
            Error::PersistenceFailure(format!("{:?}", e))
        })?;

        let wallet = Self::create(seed, key_store, chain, persist, params)?;
        {
            let mut state = wallet.state();
            let merged = state
                .channels
                .import(&wallet.secp, wallet.network, channels);
            for channel in state.channels.iter() {
                wallet.watch_incoming_keys(channel)?;
            }
            log::info!("Loaded {} channels", merged);
        }

        Ok(wallet)
    }

    fn state(&self) -> MutexGuard<'_, State<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn key_store(&self) -> &K {
        &self.key_store
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    /// Our payment code
    pub fn payment_code(&self) -> PaymentCode {
        self.account.payment_code()
    }

    /// The address other wallets send our notification transactions to
    pub fn notification_address(&self) -> Result<Address, Error> {
        self.account.notification_address(&self.secp, self.network)
    }

    /// Build the outputs of a notification transaction to `recipient`.
    ///
    /// The first input of the transaction must spend `outpoint`, signing with `input_key`.
    pub fn notification_outputs(
        &self,
        recipient: &PaymentCode,
        input_key: &SecretKey,
        outpoint: &OutPoint,
    ) -> Result<Vec<TxOut>, Error> {
        notification::notification_outputs(
            &self.secp,
            &self.payment_code(),
            recipient,
            input_key,
            outpoint,
            self.notification_value,
        )
    }

    /// Broadcast `tx` and, once the chain source accepted it, process it as sent
    pub async fn broadcast(&self, tx: Transaction) -> Result<Txid, Error> {
        let txid = self.chain.broadcast(tx.clone()).await?;
        log::debug!("Broadcast {}", txid);

        self.process_sent(&tx, None)?;
        Ok(txid)
    }

    /// Process a transaction the wallet received, confirmed at `height` if known
    pub fn process_received(&self, tx: &Transaction, height: Option<u32>) -> Result<TxClass, Error> {
        let class = self.classify_received(tx)?;
        Ok(self.rescan_after(class, height))
    }

    /// Process a transaction the wallet sent, confirmed at `height` if known
    pub fn process_sent(&self, tx: &Transaction, height: Option<u32>) -> Result<TxClass, Error> {
        let class = self.classify_sent(tx)?;
        Ok(self.rescan_after(class, height))
    }

    fn classify_received(&self, tx: &Transaction) -> Result<TxClass, Error> {
        let mut state = self.state();
        let txid = tx.compute_txid();

        if notification::is_notification_to(tx, &self.notification_script) {
            let notification_key = self
                .account
                .notification_key(&self.secp)?
                .secret_key()
                .ok_or(Error::InvalidKey)?;

            match notification::decode_notification(&self.secp, &notification_key, tx) {
                Ok(Some(payment_code)) => return self.open_incoming(&mut state, txid, payment_code),
                Ok(None) => {
                    log::debug!("{} pays our notification address with no payload", txid);
                }
                Err(e) if notification::is_foreign_payload(&e) => {
                    log::warn!("{} carries a payload we can't read: {}", txid, e);
                }
                Err(e) => {
                    log::warn!("Failed to decode notification {}: {}", txid, e);
                }
            }
            return Ok(TxClass::Irrelevant);
        }

        for output in &tx.output {
            let address = match Address::from_script(&output.script_pubkey, self.network) {
                Ok(address) => address.to_string(),
                Err(_) => continue,
            };
            if let Some(key) = state.channels.key_for_incoming_address(&address) {
                return self.advance_incoming(&mut state, &key, &address);
            }
        }

        log::debug!("{} is not channel related", txid);
        Ok(TxClass::Irrelevant)
    }

    fn classify_sent(&self, tx: &Transaction) -> Result<TxClass, Error> {
        let mut state = self.state();
        let txid = tx.compute_txid();

        if let Some(key) = self.outgoing_notification_address(tx)? {
            let already_sent = state
                .channels
                .get(&key)
                .map(Channel::is_notification_sent)
                .unwrap_or(false);
            if already_sent {
                log::debug!("Notification to `{}` was already recorded", key);
                return Ok(TxClass::DuplicateNotification { channel: key });
            }

            state.channels.get_or_insert(&key).set_sent(txid);
            log::info!("Sent notification {} to `{}`", txid, key);

            self.save(&mut state)?;
            return Ok(TxClass::NotificationSent {
                channel: key,
                txid,
                // set by `rescan_after`
                rescan: RescanOutcome::Skipped(SkipReason::Unconfirmed),
            });
        }

        let candidates: Vec<(String, PaymentCode, u32)> = state
            .channels
            .iter()
            .filter_map(|c| {
                c.payment_code
                    .map(|pc| (c.notification_address.clone(), pc, c.current_outgoing_index))
            })
            .collect();
        for (key, payment_code, index) in candidates {
            let script = send_key(&self.secp, &self.account, &payment_code, index)?.script_pubkey();
            if !tx.output.iter().any(|o| o.script_pubkey == script) {
                continue;
            }

            if let Some(channel) = state.channels.get_mut(&key) {
                channel.increment_outgoing_index();
            }
            log::info!("Paid `{}` at outgoing index {}", key, index);

            self.save(&mut state)?;
            return Ok(TxClass::PaymentSent {
                channel: key,
                index,
            });
        }

        log::debug!("{} is not channel related", txid);
        Ok(TxClass::Irrelevant)
    }

    /// Dispatch `event` to [`Bip47Wallet::process_received`] or [`Bip47Wallet::process_sent`]
    pub fn handle(&self, event: &TxEvent) -> Result<TxClass, Error> {
        match event {
            TxEvent::Received { tx, height } => self.process_received(tx, *height),
            TxEvent::Sent { tx, height } => self.process_sent(tx, *height),
        }
    }

    /// Process events until every sender is dropped.
    ///
    /// A transaction that fails to process is logged and skipped.
    pub fn run(&self, events: Receiver<TxEvent>) {
        for event in events {
            if let Err(e) = self.handle(&event) {
                log::error!("Failed to process transaction: {}", e);
            }
        }
    }

    /// Fill in the rescan of a notification, with the channel map unlocked
    fn rescan_after(&self, mut class: TxClass, height: Option<u32>) -> TxClass {
        if let TxClass::Notification { rescan, .. } | TxClass::NotificationSent { rescan, .. } =
            &mut class
        {
            *rescan = self.rescan(height);
        }
        class
    }

    /// Ask the chain to rewind below `height`, so that payments confirmed next to a notification
    /// are scanned again with the new addresses watched.
    ///
    /// Never fails: anything that prevents the rollback is logged and reported as skipped.
    pub fn rescan(&self, height: Option<u32>) -> RescanOutcome {
        let skipped = |reason: SkipReason| {
            log::warn!("Skipping rescan: {}", reason);
            RescanOutcome::Skipped(reason)
        };

        let height = match height {
            Some(height) => height,
            None => {
                log::debug!("Not rescanning for an unconfirmed transaction");
                return RescanOutcome::Skipped(SkipReason::Unconfirmed);
            }
        };
        let target = match height.checked_sub(self.rescan_depth) {
            Some(target) => target,
            None => return skipped(SkipReason::TooShallow { height }),
        };
        let tip = match self.chain.current_height() {
            Ok(tip) => tip,
            Err(e) => return skipped(SkipReason::Backend(e.to_string())),
        };
        if height > tip {
            return skipped(SkipReason::AboveTip { height, tip });
        }

        match self.chain.rollback_to(target) {
            Ok(()) => {
                log::info!("Rolled the chain back to {}", target);
                RescanOutcome::RolledBack(target)
            }
            Err(e) => skipped(SkipReason::Backend(e.to_string())),
        }
    }

    /// The channel keyed by `notification_address`
    pub fn channel_for(&self, notification_address: &str) -> Option<Channel> {
        self.state().channels.get(notification_address).cloned()
    }

    /// The channel with the owner of `payment_code`
    pub fn channel_for_payment_code(&self, payment_code: &PaymentCode) -> Option<Channel> {
        let state = self.state();

        match payment_code.notification_address(&self.secp, self.network) {
            Ok(address) => state.channels.get(&address.to_string()).cloned(),
            Err(_) => state.channels.by_payment_code(payment_code).cloned(),
        }
    }

    /// The channel that issued the incoming `address`
    pub fn channel_for_address(&self, address: &str) -> Option<Channel> {
        self.state().channels.by_incoming_address(address).cloned()
    }

    /// The payment code of the party expected to pay us at `address`
    pub fn payment_code_for_address(&self, address: &str) -> Option<PaymentCode> {
        self.state()
            .channels
            .by_incoming_address(address)
            .and_then(|c| c.payment_code)
    }

    /// Every channel, sorted by key
    pub fn channels(&self) -> Vec<Channel> {
        self.state().channels.to_vec()
    }

    /// The address to pay the owner of `channel` at next
    pub fn next_outgoing_address(&self, channel: &Channel) -> Result<Address, Error> {
        let payment_code = channel.payment_code.ok_or(Error::InvalidPaymentCode)?;

        Ok(send_key(
            &self.secp,
            &self.account,
            &payment_code,
            channel.current_outgoing_index,
        )?
        .address(self.network))
    }

    /// Whether we can pay `payment_code` without notifying them first.
    ///
    /// A channel created before we knew the counterparty's payment code gets it filled in.
    pub fn can_send_to(&self, payment_code: &PaymentCode) -> Result<bool, Error> {
        let key = payment_code
            .notification_address(&self.secp, self.network)?
            .to_string();
        let mut state = self.state();

        let (sent, updated) = match state.channels.get_mut(&key) {
            None => return Ok(false),
            Some(channel) if channel.payment_code.is_none() => {
                channel.payment_code = Some(*payment_code);
                (channel.is_notification_sent(), true)
            }
            Some(channel) => (channel.is_notification_sent(), false),
        };
        if updated {
            log::debug!("Filled in the payment code of `{}`", key);
            self.save(&mut state)?;
        }

        Ok(sent)
    }

    /// Merge `channels` in the channel map and save.
    ///
    /// A channel already in memory is merged with [`Channel::merge`] and never moves backwards.
    pub fn import_channels(&self, channels: Vec<Channel>) -> Result<usize, Error> {
        let mut state = self.state();
        let merged = state.channels.import(&self.secp, self.network, channels);
        for channel in state.channels.iter() {
            self.watch_incoming_keys(channel)?;
        }

        self.save(&mut state)?;
        Ok(merged)
    }

    fn open_incoming(
        &self,
        state: &mut State<P>,
        txid: Txid,
        payment_code: PaymentCode,
    ) -> Result<TxClass, Error> {
        let key = payment_code
            .notification_address(&self.secp, self.network)?
            .to_string();

        if state
            .channels
            .get(&key)
            .map(Channel::has_incoming_addresses)
            .unwrap_or(false)
        {
            log::debug!("Duplicate notification {} for `{}`", txid, key);
            return Ok(TxClass::DuplicateNotification { channel: key });
        }

        let first = receive_key(&self.secp, &self.account, &payment_code, 0)?;
        self.key_store.import_watch_key(first)?;

        let channel = state.channels.get_or_insert(&key);
        channel.payment_code.get_or_insert(payment_code);
        channel.ntx_hash.get_or_insert(txid);
        channel.add_incoming_address(first.address(self.network).to_string(), 0);
        log::info!("Opened incoming channel `{}` from {}", key, payment_code);

        self.save(state)?;

        Ok(TxClass::Notification {
            channel: key,
            payment_code,
            // set by `rescan_after`
            rescan: RescanOutcome::Skipped(SkipReason::Unconfirmed),
        })
    }

    fn advance_incoming(
        &self,
        state: &mut State<P>,
        key: &str,
        address: &str,
    ) -> Result<TxClass, Error> {
        let channel = state
            .channels
            .get_mut(key)
            .ok_or(Error::InvalidPaymentCode)?;
        if channel.incoming_address(address).map(|a| a.seen).unwrap_or(true) {
            log::debug!("{} on `{}` was already seen", address, key);
            return Ok(TxClass::DuplicatePayment {
                channel: key.to_string(),
            });
        }
        let payment_code = channel.payment_code.ok_or(Error::InvalidPaymentCode)?;

        let next_index = channel.next_incoming_index();
        let next = receive_key(&self.secp, &self.account, &payment_code, next_index)?;
        self.key_store.import_watch_key(next)?;

        channel.add_incoming_address(next.address(self.network).to_string(), next_index);
        channel.mark_seen(address);
        log::info!("Payment on `{}`, now watching index {}", key, next_index);

        self.save(state)?;
        Ok(TxClass::Payment {
            channel: key.to_string(),
            next_index,
        })
    }

    /// The notification address `tx` notifies, if it's a notification we sent
    fn outgoing_notification_address(&self, tx: &Transaction) -> Result<Option<String>, Error> {
        if notification::notification_payload(tx).is_none() || tx.input.is_empty() {
            return Ok(None);
        }
        for txin in &tx.input {
            if !self.key_store.owns_outpoint(&txin.previous_output)? {
                return Ok(None);
            }
        }

        for output in &tx.output {
            if output.value != self.notification_value
                || !output.script_pubkey.is_p2pkh()
                || self.key_store.is_mine(&output.script_pubkey)?
            {
                continue;
            }
            if let Ok(address) = Address::from_script(&output.script_pubkey, self.network) {
                return Ok(Some(address.to_string()));
            }
        }

        Ok(None)
    }

    fn watch_incoming_keys(&self, channel: &Channel) -> Result<(), Error> {
        let payment_code = match channel.payment_code {
            Some(payment_code) => payment_code,
            None => return Ok(()),
        };

        let watched = self.key_store.imported_keys()?;
        for incoming in &channel.incoming_addresses {
            let key = receive_key(&self.secp, &self.account, &payment_code, incoming.index)?;
            if key.address(self.network).to_string() != incoming.address {
                log::warn!(
                    "Incoming address {} of `{}` doesn't match our keys",
                    incoming.address,
                    channel.notification_address
                );
                continue;
            }
            if !watched.contains(&key) {
                self.key_store.import_watch_key(key)?;
            }
        }

        Ok(())
    }

    fn save(&self, state: &mut State<P>) -> Result<(), Error> {
        let channels = state.channels.to_vec();

        state.persist.save(&channels).map_err(|e| {
            log::error!("Failed to save channels: {:?}", e);
            Error::PersistenceFailure(format!("{:?}", e))
        })
    }
}

impl<K, C, P> fmt::Debug for Bip47Wallet<K, C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bip47Wallet")
            .field("account", &self.account)
            .field("network", &self.network)
            .finish()
    }
}
