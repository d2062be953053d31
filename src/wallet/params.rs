// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use bitcoin::{Amount, Network};

use crate::notification::NOTIFICATION_VALUE;

/// Number of blocks a confirmed notification rewinds the chain by
pub const DEFAULT_RESCAN_DEPTH: u32 = 2;

/// Parameters for [`Bip47Wallet::create`] and [`Bip47Wallet::load`].
///
/// [`Bip47Wallet::create`]: crate::wallet::Bip47Wallet::create
/// [`Bip47Wallet::load`]: crate::wallet::Bip47Wallet::load
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bip47Params {
    pub(crate) network: Network,
    pub(crate) notification_value: Amount,
    pub(crate) rescan_depth: u32,
}

impl Bip47Params {
    /// Construct parameters with default values.
    ///
    /// Default values: `network` = [`Network::Bitcoin`], `notification_value` =
    /// [`NOTIFICATION_VALUE`], `rescan_depth` = [`DEFAULT_RESCAN_DEPTH`]
    pub fn new() -> Self {
        Self {
            network: Network::Bitcoin,
            notification_value: NOTIFICATION_VALUE,
            rescan_depth: DEFAULT_RESCAN_DEPTH,
        }
    }

    /// Set `network`.
    pub fn network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Value of the output paying a notification address.
    pub fn notification_value(mut self, value: Amount) -> Self {
        self.notification_value = value;
        self
    }

    /// How many blocks below a confirmed notification the chain is rolled back to.
    pub fn rescan_depth(mut self, depth: u32) -> Self {
        self.rescan_depth = depth;
        self
    }
}

impl Default for Bip47Params {
    fn default() -> Self {
        Self::new()
    }
}
