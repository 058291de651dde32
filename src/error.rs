// SPDX-License-Identifier: MIT

//! Error type returned by every DRBG operation.
use crate::entropy;

use core::{
    fmt,
    fmt::{Display, Formatter},
};
use hmac::digest::InvalidLength;

/// Failure conditions reported by the DRBG.
///
/// Validation failures ([`BadParameter`](Error::BadParameter),
/// [`BadLength`](Error::BadLength) and
/// [`NotAvailable`](Error::NotAvailable)) are detected before any
/// entropy is drawn and leave existing state untouched.
#[derive(Debug)]
pub enum Error {
    /// Memory for the seed material could not be allocated.
    OutOfMemory,
    /// The handle does not refer to a live instance.
    BadParameter,
    /// A strength, personalization string or request length is out of
    /// bounds.
    BadLength,
    /// Every registry slot is in use, or the registry is not
    /// initialized.
    NotAvailable,
    /// The entropy source failed while seeding or reseeding.
    EntropyFail(entropy::Error),
    /// The keyed hash primitive rejected its input.
    Hmac(InvalidLength),
}

impl From<entropy::Error> for Error {
    fn from(error: entropy::Error) -> Self {
        Error::EntropyFail(error)
    }
}

impl core::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "drbg error: out of memory"),
            Error::BadParameter => write!(f, "drbg error: invalid handle"),
            Error::BadLength => write!(f, "drbg error: invalid length"),
            Error::NotAvailable => write!(f, "drbg error: no instantiation slot available"),
            Error::EntropyFail(e) => write!(f, "drbg error: {}", e),
            Error::Hmac(e) => write!(f, "drbg error: hmac failure: {}", e),
        }
    }
}
