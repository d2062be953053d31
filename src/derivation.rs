// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Payment key derivation
//!
//! Given our [`Account`] and the counterparty's [`PaymentCode`], derive the sequence of keys the
//! two parties agree on without talking to each other:
//!
//! * the receiver computes `b_i + s·G` with the secret key `b_i`, where `s` is the digest of the
//!   [`SecretPoint`] between `b_i` and the sender's notification key `A`;
//! * the sender computes `B_i + s·G` with `s` the digest of the [`SecretPoint`] between its
//!   notification secret `a` and `B_i`.
//!
//! Both sides end up with the same public key for the same index, only the receiver knows the
//! secret key.

use bitcoin::secp256k1::SecretKey;

use crate::error::Error;
use crate::keys::account::NOTIFICATION_INDEX;
use crate::keys::{Account, SecpCtx, SecretPoint};
use crate::payment_code::PaymentCode;
use crate::types::KeyPair;

/// Key at `index` of the incoming channel from `sender`, including its secret key
pub fn receive_key(
    secp: &SecpCtx,
    account: &Account,
    sender: &PaymentCode,
    index: u32,
) -> Result<KeyPair, Error> {
    let child: SecretKey = account.child_secret(secp, index)?;
    let secret_point = SecretPoint::new(secp, &child, &sender.notification_key(secp)?)?;

    let key = child.add_tweak(&secret_point.to_scalar()?)?;
    Ok(KeyPair::from_secret_key(secp, key))
}

/// Public key at `index` of the outgoing channel to `recipient`
pub fn send_key(
    secp: &SecpCtx,
    account: &Account,
    recipient: &PaymentCode,
    index: u32,
) -> Result<KeyPair, Error> {
    let notification = account.child_secret(secp, NOTIFICATION_INDEX)?;
    let child = recipient.derive(secp, index)?;
    let secret_point = SecretPoint::new(secp, &notification, &child)?;

    let key = child.add_exp_tweak(secp, &secret_point.to_scalar()?)?;
    Ok(KeyPair::from_public_key(key))
}
