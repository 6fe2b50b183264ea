//! Reversible obfuscation of internal integer identifiers.
//!
//! Ids are mapped through a modular multiply-and-xor permutation over the
//! 31-bit range and rendered as exactly eight lowercase hex characters. The
//! mapping hides row counts and creation order from clients; it is not
//! encryption.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::{fmt, sync::OnceLock};

/// Largest value the permutation operates on (2^31 - 1).
pub const MAX_ID: u64 = 0x7fff_ffff;

pub const DEFAULT_MULTIPLIER: u64 = 3_714_939_857;
pub const DEFAULT_MASK: u64 = 4_237_402_219;

const ENCODED_LEN: usize = 8;

#[derive(Debug)]
pub struct IdCodec {
    multiplier: u64,
    mask: u64,
    inverse: OnceLock<u64>,
}

impl IdCodec {
    /// Build a codec from a multiplier and xor mask.
    ///
    /// # Errors
    ///
    /// The multiplier must be odd (invertible modulo 2^31) and the mask must
    /// fit in 32 bits so encoded values stay eight hex characters wide.
    pub fn new(multiplier: u64, mask: u64) -> Result<Self> {
        if multiplier % 2 == 0 {
            return Err(Error::bad_parameter("id codec multiplier must be odd"));
        }
        if mask > u64::from(u32::MAX) {
            return Err(Error::bad_parameter("id codec mask must fit in 32 bits"));
        }
        Ok(Self {
            multiplier,
            mask,
            inverse: OnceLock::new(),
        })
    }

    /// Encode a non-negative id.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` for negative input.
    pub fn encode(&self, id: i32) -> Result<String> {
        let id = u64::try_from(id).map_err(|_| Error::bad_parameter("id must not be negative"))?;
        let permuted = (id.wrapping_mul(self.multiplier) & MAX_ID) ^ self.mask;
        Ok(format!("{permuted:08x}"))
    }

    /// Decode an encoded id.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` when the input is not exactly eight hex
    /// characters or does not lie in the image of [`IdCodec::encode`].
    pub fn decode(&self, encoded: &str) -> Result<i32> {
        if encoded.len() != ENCODED_LEN || !encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::bad_parameter("malformed id"));
        }
        let raw = u64::from_str_radix(encoded, 16).map_err(|_| Error::bad_parameter("malformed id"))?;
        let unmasked = raw ^ self.mask;
        if unmasked > MAX_ID {
            return Err(Error::bad_parameter("malformed id"));
        }
        let id = unmasked.wrapping_mul(self.inverse()) & MAX_ID;
        i32::try_from(id).map_err(|_| Error::bad_parameter("malformed id"))
    }

    /// Whether `encoded` is the encoding of zero, the "unset" sentinel.
    #[must_use]
    pub fn is_empty_id(&self, encoded: &str) -> bool {
        matches!(self.decode(encoded), Ok(0))
    }

    /// Modular inverse of the multiplier, computed on first use.
    fn inverse(&self) -> u64 {
        *self.inverse.get_or_init(|| modular_inverse(self.multiplier))
    }
}

impl Default for IdCodec {
    fn default() -> Self {
        Self {
            multiplier: DEFAULT_MULTIPLIER,
            mask: DEFAULT_MASK,
            inverse: OnceLock::new(),
        }
    }
}

/// Inverse of an odd `a` modulo 2^31 by Newton iteration.
///
/// `a * a == 1 (mod 8)` for odd `a`, and every step doubles the number of
/// correct low bits: 3, 6, 12, 24, 48.
fn modular_inverse(a: u64) -> u64 {
    let mut x = a;
    for _ in 0..4 {
        x = x.wrapping_mul(2u64.wrapping_sub(a.wrapping_mul(x)));
    }
    x & MAX_ID
}

/// An id that has already been obfuscated for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObfuscatedId(String);

impl ObfuscatedId {
    /// # Errors
    ///
    /// Returns `BadParameter` for negative ids.
    pub fn new(codec: &IdCodec, id: i32) -> Result<Self> {
        codec.encode(id).map(Self)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObfuscatedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ObfuscatedId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
