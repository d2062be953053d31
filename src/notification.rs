// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Notification transactions
//!
//! A notification transaction carries the sender's payment code, masked so that only the
//! recipient can read it, in an `OP_RETURN` output, and pays a dust amount to the recipient's
//! notification address so that the recipient's wallet picks it up.
//!
//! The mask is `HMAC-SHA512(outpoint, x)` where `outpoint` is the serialized outpoint spent by
//! the first input and `x` is the [`SecretPoint`] between the key of that input and the
//! recipient's notification key. Only the public key x-coordinate and the chain code are masked.

use std::fmt;

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha512, Hash, HashEngine, Hmac, HmacEngine};
use bitcoin::script::{Instruction, PushBytesBuf};
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Transaction, TxIn, TxOut};

use crate::error::{Error, PaymentCodeError};
use crate::keys::{SecpCtx, SecretPoint};
use crate::payment_code::{PaymentCode, PAYLOAD_LEN};

/// Value of the output paying the recipient's notification address
pub const NOTIFICATION_VALUE: Amount = Amount::from_sat(546);

/// The 64 byte mask applied to a payment code payload
#[derive(Clone)]
pub struct BlindingFactor([u8; 64]);

impl BlindingFactor {
    pub fn new(secret_point: &SecretPoint, outpoint: &OutPoint) -> Self {
        let mut hmac = HmacEngine::<sha512::Hash>::new(&serialize(outpoint));
        hmac.input(secret_point.as_bytes());

        BlindingFactor(Hmac::<sha512::Hash>::from_engine(hmac).to_byte_array())
    }

    /// XOR `data` with the mask, in place
    pub(crate) fn apply(&self, data: &mut [u8]) {
        for (a, b) in data.iter_mut().zip(&self.0[..]) {
            *a ^= b;
        }
    }
}

impl fmt::Debug for BlindingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlindingFactor(..)")
    }
}

/// Mask `our_code` for `recipient`, spending `outpoint` with `input_key` as first input
pub fn blinded_payload(
    secp: &SecpCtx,
    our_code: &PaymentCode,
    recipient: &PaymentCode,
    input_key: &SecretKey,
    outpoint: &OutPoint,
) -> Result<[u8; PAYLOAD_LEN], Error> {
    let secret_point = SecretPoint::new(secp, input_key, &recipient.notification_key(secp)?)?;
    let blinding_factor = BlindingFactor::new(&secret_point, outpoint);

    Ok(our_code.encode_blinded(&blinding_factor))
}

/// Build the two outputs of a notification transaction to `recipient`.
///
/// The first input of the final transaction must spend `outpoint` with `input_key`, and must
/// expose the public key of `input_key` in its `script_sig` or witness.
pub fn notification_outputs(
    secp: &SecpCtx,
    our_code: &PaymentCode,
    recipient: &PaymentCode,
    input_key: &SecretKey,
    outpoint: &OutPoint,
    value: Amount,
) -> Result<Vec<TxOut>, Error> {
    let payload = blinded_payload(secp, our_code, recipient, input_key, outpoint)?;
    let data = PushBytesBuf::try_from(payload.to_vec()).map_err(|_| Error::InvalidPaymentCode)?;

    Ok(vec![
        TxOut {
            value: Amount::ZERO,
            script_pubkey: ScriptBuf::new_op_return(&data),
        },
        TxOut {
            value,
            script_pubkey: recipient.notification_script(secp)?,
        },
    ])
}

/// Return the data pushed by the first `OP_RETURN` output carrying exactly 80 bytes
pub fn notification_payload(tx: &Transaction) -> Option<&[u8]> {
    tx.output
        .iter()
        .filter(|o| o.script_pubkey.is_op_return())
        .find_map(|o| match o.script_pubkey.instructions().nth(1) {
            Some(Ok(Instruction::PushBytes(data))) if data.len() == PAYLOAD_LEN => {
                Some(data.as_bytes())
            }
            _ => None,
        })
}

/// Whether `tx` looks like a notification transaction addressed to `notification_script`
pub fn is_notification_to(tx: &Transaction, notification_script: &Script) -> bool {
    notification_payload(tx).is_some()
        && tx
            .output
            .iter()
            .any(|o| o.script_pubkey.as_script() == notification_script)
}

/// Recover the public key exposed by an input.
///
/// P2PKH inputs push it second in the `script_sig`, P2WPKH inputs keep it second in the witness.
pub fn designated_pubkey(txin: &TxIn) -> Option<PublicKey> {
    if let Some(Ok(Instruction::PushBytes(pk))) = txin.script_sig.instructions().nth(1) {
        return PublicKey::from_slice(pk.as_bytes()).ok();
    }

    txin.witness
        .nth(1)
        .and_then(|pk| PublicKey::from_slice(pk).ok())
}

/// Read the payment code a notification transaction carries, using our notification key.
///
/// Returns `Ok(None)` if `tx` doesn't have the shape of a notification transaction, and
/// [`Error::MalformedPaymentCode`] if it does but the unmasked payload is not a payment code,
/// which usually means the notification was meant for somebody else.
pub fn decode_notification(
    secp: &SecpCtx,
    notification_key: &SecretKey,
    tx: &Transaction,
) -> Result<Option<PaymentCode>, Error> {
    let txin = match tx.input.first() {
        Some(txin) => txin,
        None => return Ok(None),
    };
    let pk = match designated_pubkey(txin) {
        Some(pk) => pk,
        None => return Ok(None),
    };
    let payload = match notification_payload(tx) {
        Some(payload) => payload,
        None => return Ok(None),
    };

    let secret_point = SecretPoint::new(secp, notification_key, &pk)?;
    let blinding_factor = BlindingFactor::new(&secret_point, &txin.previous_output);

    PaymentCode::decode_blinded(payload, &blinding_factor)
        .map(Some)
        .map_err(Error::MalformedPaymentCode)
}

/// Whether `err` is the outcome of unmasking a payload that wasn't meant for us
pub(crate) fn is_foreign_payload(err: &Error) -> bool {
    matches!(
        err,
        Error::MalformedPaymentCode(
            PaymentCodeError::InvalidPublicKey | PaymentCodeError::InvalidPublicKeySign(_)
        )
    )
}
