// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Payment channels
//!
//! A [`Channel`] is everything we know about one counterparty: their payment code, the
//! addresses we handed out for them to pay us, how far we got paying them, and whether we told
//! them about our own payment code yet. Channels are keyed by the counterparty's notification
//! address and live in a [`ChannelStore`].
//!
//! The serialized form of a channel is the record layout persisted by [`PersistBackend`]s:
//!
//! ```json
//! {
//!   "paymentCode": "PM8T...",
//!   "notificationAddress": "1JDd...",
//!   "incomingAddresses": [{ "address": "1Aa...", "index": 0, "seen": true }],
//!   "currentIncomingIndex": 0,
//!   "currentOutgoingIndex": 0,
//!   "status": "unsent",
//!   "ntxHash": null
//! }
//! ```
//!
//! [`PersistBackend`]: crate::persist::PersistBackend

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

use crate::payment_code::PaymentCode;

pub mod store;

pub use store::ChannelStore;

/// Whether we broadcast our own notification transaction to a counterparty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// We never notified the counterparty
    #[default]
    Unsent,
    /// Our notification transaction was broadcast
    Sent,
}

/// An address we derived for the counterparty to pay us
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncomingAddress {
    pub address: String,
    pub index: u32,
    /// Set once a payment arrived at `address`
    #[serde(default)]
    pub seen: bool,
}

/// Per-counterparty state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    #[serde(default)]
    pub payment_code: Option<PaymentCode>,
    /// Counterparty's notification address, the channel key
    #[serde(default)]
    pub notification_address: String,
    #[serde(default)]
    pub incoming_addresses: Vec<IncomingAddress>,
    /// Index of the most recently derived incoming address
    #[serde(default)]
    pub current_incoming_index: u32,
    /// Index of the next address we'll pay the counterparty at
    #[serde(default)]
    pub current_outgoing_index: u32,
    #[serde(default)]
    pub status: ChannelStatus,
    /// The notification transaction that established the channel
    #[serde(default)]
    pub ntx_hash: Option<Txid>,
}

impl Channel {
    /// Create a new, empty channel keyed by `notification_address`
    pub fn new(notification_address: String) -> Self {
        Channel {
            payment_code: None,
            notification_address,
            incoming_addresses: Vec::new(),
            current_incoming_index: 0,
            current_outgoing_index: 0,
            status: ChannelStatus::Unsent,
            ntx_hash: None,
        }
    }

    pub fn with_payment_code(notification_address: String, payment_code: PaymentCode) -> Self {
        Channel {
            payment_code: Some(payment_code),
            ..Channel::new(notification_address)
        }
    }

    /// Whether our notification transaction was broadcast
    pub fn is_notification_sent(&self) -> bool {
        self.status == ChannelStatus::Sent
    }

    /// Record the broadcast of our notification transaction
    pub fn set_sent(&mut self, txid: Txid) {
        self.status = ChannelStatus::Sent;
        self.ntx_hash = Some(txid);
    }

    pub fn has_incoming_addresses(&self) -> bool {
        !self.incoming_addresses.is_empty()
    }

    /// The index the next incoming address must be derived at
    pub fn next_incoming_index(&self) -> u32 {
        self.incoming_addresses.len() as u32
    }

    /// Append the address derived at `index`.
    ///
    /// Returns `false` and leaves the channel untouched unless `index` is exactly
    /// [`Channel::next_incoming_index`], so that an index is never issued twice.
    pub fn add_incoming_address(&mut self, address: String, index: u32) -> bool {
        if index != self.next_incoming_index() {
            return false;
        }

        self.incoming_addresses.push(IncomingAddress {
            address,
            index,
            seen: false,
        });
        self.current_incoming_index = index;

        true
    }

    pub fn incoming_address(&self, address: &str) -> Option<&IncomingAddress> {
        self.incoming_addresses
            .iter()
            .find(|a| a.address == address)
    }

    /// Mark `address` as paid. Returns `true` if it wasn't already.
    pub fn mark_seen(&mut self, address: &str) -> bool {
        match self
            .incoming_addresses
            .iter_mut()
            .find(|a| a.address == address)
        {
            Some(a) if !a.seen => {
                a.seen = true;
                true
            }
            _ => false,
        }
    }

    pub fn increment_outgoing_index(&mut self) {
        self.current_outgoing_index += 1;
    }

    /// Restore the invariants of a record read back from storage
    pub(crate) fn normalize(&mut self) {
        self.incoming_addresses.sort_by_key(|a| a.index);
        let contiguous = self
            .incoming_addresses
            .iter()
            .enumerate()
            .take_while(|(i, a)| a.index == *i as u32)
            .count();
        self.incoming_addresses.truncate(contiguous);

        self.current_incoming_index = self.next_incoming_index().saturating_sub(1);
    }

    /// Fold `other`, another copy of this channel, into `self`.
    ///
    /// `other` is normalized first. Nothing moves backwards: the longer run of incoming
    /// addresses wins and `seen` flags stay set. The sent status, the payment code and the
    /// notification txid are kept once known. Returns `true` if `self` changed.
    pub fn merge(&mut self, mut other: Channel) -> bool {
        other.normalize();
        let before = self.clone();

        if self.payment_code.is_none() {
            self.payment_code = other.payment_code;
        }
        if self.ntx_hash.is_none() {
            self.ntx_hash = other.ntx_hash;
        }
        if other.is_notification_sent() {
            self.status = ChannelStatus::Sent;
        }
        self.current_outgoing_index = self
            .current_outgoing_index
            .max(other.current_outgoing_index);

        for (i, theirs) in other.incoming_addresses.into_iter().enumerate() {
            match self.incoming_addresses.get_mut(i) {
                Some(ours) => ours.seen |= theirs.seen,
                None => self.incoming_addresses.push(theirs),
            }
        }
        self.current_incoming_index = self.next_incoming_index().saturating_sub(1);

        *self != before
    }
}
