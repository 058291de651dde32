// SPDX-License-Identifier: MIT

//! Security strength policy.
//!
//! Only the strengths listed in SP 800-90A for SHA-256 are accepted;
//! every length the DRBG derives from a strength lives here.
use crate::Error;

/// Largest security strength, in bits, an instance may request.
pub const MAX_SEC_STRENGTH_BITS: u32 = 256;

/// Maximum personalization string length in bytes.
pub const MAX_PERS_STR_BYTES: usize = 32;

/// Maximum number of bytes returned by a single generate call.
pub const MAX_BYTES_PER_REQUEST: usize = 1024;

/// Supported security strengths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    Bits112,
    Bits128,
    Bits192,
    Bits256,
}

impl Strength {
    /// Map a strength in bits to a supported level.
    ///
    /// # Error
    ///
    /// Returns [`Error::BadLength`] for zero, for values above
    /// [`MAX_SEC_STRENGTH_BITS`] and for unsupported intermediate
    /// values.
    pub fn from_bits(bits: u32) -> Result<Self, Error> {
        match bits {
            112 => Ok(Strength::Bits112),
            128 => Ok(Strength::Bits128),
            192 => Ok(Strength::Bits192),
            256 => Ok(Strength::Bits256),
            _ => Err(Error::BadLength),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Strength::Bits112 => 112,
            Strength::Bits128 => 128,
            Strength::Bits192 => 192,
            Strength::Bits256 => 256,
        }
    }

    /// Minimum entropy input length in bytes.
    pub fn entropy_len(self) -> usize {
        (self.bits() / 8) as usize
    }

    /// Nonce length in bytes, half the entropy input.
    pub fn nonce_len(self) -> usize {
        self.entropy_len() / 2
    }

    /// Check that a generate request for `requested` bits can be served
    /// by an instance of this strength.
    pub fn check_request(self, requested: u32) -> Result<(), Error> {
        if requested > MAX_SEC_STRENGTH_BITS || requested > self.bits() {
            return Err(Error::BadLength);
        }
        Ok(())
    }
}

impl TryFrom<u32> for Strength {
    type Error = Error;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        Strength::from_bits(bits)
    }
}

pub(crate) fn check_personal(personal: &[u8]) -> Result<(), Error> {
    if personal.len() > MAX_PERS_STR_BYTES {
        return Err(Error::BadLength);
    }
    Ok(())
}

pub(crate) fn check_request_len(len: usize) -> Result<(), Error> {
    if len == 0 || len > MAX_BYTES_PER_REQUEST {
        return Err(Error::BadLength);
    }
    Ok(())
}
