// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::fmt;

use bitcoin::base58;

/// Errors that can be thrown by the BIP47 engine and its building blocks
#[derive(Debug)]
pub enum Error {
    /// A key is malformed, or an agreement/tweak produced an unusable point or scalar
    InvalidKey,
    /// A payment code payload or its textual form could not be decoded
    MalformedPaymentCode(PaymentCodeError),
    /// The derivation index is outside of the non-hardened range
    InvalidIndex(u32),
    /// The payment code needed for this operation is missing or unusable
    InvalidPaymentCode,
    /// Writing or reading the persisted channels failed
    PersistenceFailure(String),
    /// The wallet or chain collaborator reported an error
    Backend(String),
    /// A secp256k1 error
    Secp256k1(bitcoin::secp256k1::Error),
    /// BIP32 error
    Bip32(bitcoin::bip32::Error),
}

/// Reasons a payment code fails to decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentCodeError {
    /// The payload is not exactly 80 bytes long
    WrongDataLength(usize),
    /// Only version `0x01` payment codes are supported
    UnknownVersion(u8),
    /// The textual form doesn't start with the `0x47` prefix byte
    InvalidPrefix(u8),
    /// The first byte of the public key is neither `0x02` nor `0x03`
    InvalidPublicKeySign(u8),
    /// The public key is not a point on the curve
    InvalidPublicKey,
    /// Base58check decoding error
    Base58(String),
}

impl fmt::Display for PaymentCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongDataLength(len) => write!(f, "expected 80 bytes of payload, got {}", len),
            Self::UnknownVersion(v) => write!(f, "unsupported payment code version {:#04x}", v),
            Self::InvalidPrefix(p) => write!(f, "invalid payment code prefix {:#04x}", p),
            Self::InvalidPublicKeySign(s) => write!(f, "invalid public key sign byte {:#04x}", s),
            Self::InvalidPublicKey => write!(f, "public key is not on the curve"),
            Self::Base58(err) => write!(f, "base58 error: {}", err),
        }
    }
}

impl std::error::Error for PaymentCodeError {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "Invalid key"),
            Self::MalformedPaymentCode(err) => write!(f, "Malformed payment code: {}", err),
            Self::InvalidIndex(index) => write!(f, "Invalid derivation index: {}", index),
            Self::InvalidPaymentCode => write!(f, "Missing or invalid payment code"),
            Self::PersistenceFailure(err) => write!(f, "Persistence failure: {}", err),
            Self::Backend(err) => write!(f, "Backend error: {}", err),
            Self::Secp256k1(err) => write!(f, "Secp256k1 error: {}", err),
            Self::Bip32(err) => write!(f, "BIP32 error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

macro_rules! impl_error {
    ( $from:ty, $to:ident ) => {
        impl_error!($from, $to, Error);
    };
    ( $from:ty, $to:ident, $impl_for:ty ) => {
        impl std::convert::From<$from> for $impl_for {
            fn from(err: $from) -> Self {
                <$impl_for>::$to(err)
            }
        }
    };
}

impl_error!(PaymentCodeError, MalformedPaymentCode);
impl_error!(bitcoin::bip32::Error, Bip32);

impl From<bitcoin::secp256k1::Error> for Error {
    fn from(err: bitcoin::secp256k1::Error) -> Self {
        match err {
            bitcoin::secp256k1::Error::InvalidPublicKey
            | bitcoin::secp256k1::Error::InvalidSecretKey
            | bitcoin::secp256k1::Error::InvalidTweak => Error::InvalidKey,
            other => Error::Secp256k1(other),
        }
    }
}

impl From<base58::Error> for PaymentCodeError {
    fn from(err: base58::Error) -> Self {
        PaymentCodeError::Base58(err.to_string())
    }
}

impl From<base58::Error> for Error {
    fn from(err: base58::Error) -> Self {
        Error::MalformedPaymentCode(err.into())
    }
}
