// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::collections::HashMap;

use bitcoin::Network;

use super::Channel;
use crate::keys::SecpCtx;
use crate::payment_code::PaymentCode;

/// In-memory map of notification address to [`Channel`]
#[derive(Debug, Clone, Default)]
pub struct ChannelStore {
    channels: HashMap<String, Channel>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, notification_address: &str) -> Option<&Channel> {
        self.channels.get(notification_address)
    }

    pub fn get_mut(&mut self, notification_address: &str) -> Option<&mut Channel> {
        self.channels.get_mut(notification_address)
    }

    /// Return the channel keyed by `notification_address`, creating an empty one if needed
    pub fn get_or_insert(&mut self, notification_address: &str) -> &mut Channel {
        self.channels
            .entry(notification_address.to_string())
            .or_insert_with(|| Channel::new(notification_address.to_string()))
    }

    pub fn by_payment_code(&self, payment_code: &PaymentCode) -> Option<&Channel> {
        self.channels
            .values()
            .find(|c| c.payment_code.as_ref() == Some(payment_code))
    }

    /// Find the channel that issued the incoming `address`
    pub fn by_incoming_address(&self, address: &str) -> Option<&Channel> {
        self.channels
            .values()
            .find(|c| c.incoming_address(address).is_some())
    }

    /// Key of the channel that issued the incoming `address`
    pub(crate) fn key_for_incoming_address(&self, address: &str) -> Option<String> {
        self.by_incoming_address(address)
            .map(|c| c.notification_address.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// All channels, sorted by key
    pub fn to_vec(&self) -> Vec<Channel> {
        let mut channels: Vec<_> = self.channels.values().cloned().collect();
        channels.sort_by(|a, b| a.notification_address.cmp(&b.notification_address));
        channels
    }

    /// Merge channels read back from storage.
    ///
    /// A record without notification address gets it recomputed from its payment code, records
    /// with neither are dropped. A record for a channel already in memory is folded into it with
    /// [`Channel::merge`], so an older copy never winds a channel back. Returns the number of
    /// channels added or changed.
    pub fn import<I>(&mut self, secp: &SecpCtx, network: Network, channels: I) -> usize
    where
        I: IntoIterator<Item = Channel>,
    {
        let mut merged = 0;

        for mut channel in channels {
            if channel.notification_address.is_empty() {
                let address = channel
                    .payment_code
                    .as_ref()
                    .and_then(|pc| pc.notification_address(secp, network).ok());
                match address {
                    Some(address) => channel.notification_address = address.to_string(),
                    None => {
                        log::warn!("Dropping a channel record with no key and no payment code");
                        continue;
                    }
                }
            }
            channel.normalize();

            match self.channels.get_mut(&channel.notification_address) {
                Some(existing) => {
                    if existing.merge(channel) {
                        merged += 1;
                    } else {
                        log::debug!(
                            "Channel `{}` already knows everything the imported copy has",
                            existing.notification_address
                        );
                    }
                }
                None => {
                    self.channels
                        .insert(channel.notification_address.clone(), channel);
                    merged += 1;
                }
            }
        }

        merged
    }
}
