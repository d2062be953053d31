// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

//! BIP47 reusable payment codes
//!
//! Two parties exchange a static [`PaymentCode`] once. From then on every payment goes to a fresh
//! address both sides derive on their own, and that nobody else can link to the payment code.
//!
//! The crate is organized bottom-up:
//!
//! * [`keys`]: the secret point two key pairs agree on, and the [`Account`] derived from a seed;
//! * [`payment_code`]: the 80 byte payment code and its text form;
//! * [`notification`]: building and reading the transactions that carry a masked payment code;
//! * [`derivation`]: the per-index send and receive keys of a channel;
//! * [`channel`]: per-counterparty state and the in-memory [`ChannelStore`];
//! * [`wallet`]: the [`Bip47Wallet`] engine that turns the transactions a wallet sees into
//!   channel updates.
//!
//! The engine doesn't sign, sync or store anything on its own. It talks to a [`KeyStore`] and a
//! [`ChainSource`], and saves channels through a [`PersistBackend`].
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use bdk_bip47::bitcoin::Network;
//! use bdk_bip47::{Bip47Params, Bip47Wallet, MemoryBackend, PaymentCode};
//! # use bdk_bip47::Error;
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let wallet = Bip47Wallet::create(
//!     &[0x42; 64],
//!     Arc::clone(&backend),
//!     Arc::clone(&backend),
//!     (),
//!     Bip47Params::new().network(Network::Regtest),
//! )?;
//!
//! let their_code: PaymentCode = "PM8TJS2JxQ5ztXUpBBRnpTbcUXbUHy2T1abfrb3KkAAtMEGNbey4oumH7Hc578WgQJhPjBxteQ5GHHToTYHE3A1w6p7tU6KSoFmWBVbFGjKPisZDbP97".parse()?;
//! assert!(!wallet.can_send_to(&their_code)?);
//! # Ok::<_, Error>(())
//! ```

pub extern crate bitcoin;

#[macro_use]
pub(crate) mod error;
pub mod blockchain;
pub mod channel;
pub mod database;
pub mod derivation;
pub mod keys;
pub mod notification;
pub mod payment_code;
pub mod persist;
pub(crate) mod types;
pub mod wallet;

pub use blockchain::{ChainSource, KeyStore};
pub use channel::{Channel, ChannelStatus, ChannelStore, IncomingAddress};
pub use database::MemoryBackend;
pub use error::{Error, PaymentCodeError};
pub use keys::{Account, SecretPoint};
pub use payment_code::PaymentCode;
pub use persist::PersistBackend;
#[cfg(feature = "file-store")]
pub use persist::{FileStoreError, JsonFileStore};
pub use types::*;
pub use wallet::{Bip47Params, Bip47Wallet, RescanOutcome, SkipReason, TxClass, TxEvent};
