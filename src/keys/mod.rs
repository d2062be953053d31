// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Key material
//!
//! This module contains the elliptic-curve secret agreement every other BIP47 component builds
//! on, and the [`Account`] derived from a wallet seed.

use std::fmt;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{All, PublicKey, Scalar, Secp256k1, SecretKey};

use crate::error::Error;

pub mod account;

pub use account::Account;

/// Secp256k1 context used throughout the crate
pub type SecpCtx = Secp256k1<All>;

/// The x-coordinate of the point `a·B`, shared between the owners of `a` and `b`.
///
/// [`SecretPoint::new`] is symmetric: `new(a, B) == new(b, A)` for the key pairs `(a, A)` and
/// `(b, B)`. The raw coordinate keys the notification mask, while [`SecretPoint::digest`] is the
/// whitened form used to offset payment keys.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretPoint([u8; 32]);

impl SecretPoint {
    /// Multiply `public_key` by `secret_key` and keep the x-coordinate of the result
    pub fn new(
        secp: &SecpCtx,
        secret_key: &SecretKey,
        public_key: &PublicKey,
    ) -> Result<Self, Error> {
        let point = public_key.mul_tweak(secp, &Scalar::from(*secret_key))?;

        let mut x = [0u8; 32];
        x.copy_from_slice(&point.serialize()[1..33]);
        Ok(SecretPoint(x))
    }

    /// Same as [`SecretPoint::new`], parsing both keys from their serialized form first.
    ///
    /// Fails with [`Error::InvalidKey`] if either slice isn't a valid key.
    pub fn from_slices(
        secp: &SecpCtx,
        secret_key: &[u8],
        public_key: &[u8],
    ) -> Result<Self, Error> {
        let secret_key = SecretKey::from_slice(secret_key).map_err(|_| Error::InvalidKey)?;
        let public_key = PublicKey::from_slice(public_key).map_err(|_| Error::InvalidKey)?;

        Self::new(secp, &secret_key, &public_key)
    }

    /// Return the raw x-coordinate
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// SHA256 of the x-coordinate
    pub fn digest(&self) -> [u8; 32] {
        sha256::Hash::hash(&self.0).to_byte_array()
    }

    /// Interpret [`SecretPoint::digest`] as a scalar.
    ///
    /// Fails with [`Error::InvalidKey`] in the (negligible) case the digest is not below the curve
    /// order.
    pub fn to_scalar(&self) -> Result<Scalar, Error> {
        Scalar::from_be_bytes(self.digest()).map_err(|_| Error::InvalidKey)
    }
}

impl fmt::Debug for SecretPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretPoint(..)")
    }
}
