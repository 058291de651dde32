// SPDX-License-Identifier: MIT

//! A process-wide registry for callers that cannot thread a
//! [`Registry`] value through their code.
//!
//! The global registry exists between a call to [`init`] and a call
//! to [`teardown`]. Every other function in this module fails with
//! [`Error::NotAvailable`] outside that window.
//!
//! # Example
//!
//! ```
//! use ntru_drbg::{entropy::OsEntropy, global};
//!
//! # use ntru_drbg::Error;
//! # fn main() -> Result<(), Error> {
//! global::init();
//! let handle = global::instantiate(256, None, Box::new(OsEntropy::default()))?;
//! let mut random_data = [0u8; 32];
//! global::generate(handle, 256, &mut random_data)?;
//! global::uninstantiate(handle)?;
//! global::teardown();
//! # Ok(())
//! # }
//! ```
use crate::{
    entropy::Entropy,
    registry::{Handle, Registry},
    Error,
};

use std::{
    boxed::Box,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::debug;

static GLOBAL: RwLock<Option<Arc<Registry>>> = RwLock::new(None);

/// Create the global registry. Calling `init` again while it exists
/// keeps the current registry and its instances.
pub fn init() {
    let mut global = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if global.is_none() {
        *global = Some(Arc::new(Registry::new()));
        debug!("global drbg registry initialized");
    }
}

/// Drop the global registry. Every instance is wiped once calls still
/// in flight have returned.
pub fn teardown() {
    let registry = GLOBAL.write().unwrap_or_else(PoisonError::into_inner).take();
    if registry.is_some() {
        debug!("global drbg registry torn down");
    }
}

fn registry() -> Result<Arc<Registry>, Error> {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(Error::NotAvailable)
}

/// See [`Registry::instantiate`] for details.
pub fn instantiate(
    strength_bits: u32,
    personal: Option<&[u8]>,
    entropy: Box<dyn Entropy + Send>,
) -> Result<Handle, Error> {
    registry()?.instantiate(strength_bits, personal, entropy)
}

/// See [`Registry::uninstantiate`] for details.
pub fn uninstantiate(handle: Handle) -> Result<(), Error> {
    registry()?.uninstantiate(handle)
}

/// See [`Registry::reseed`] for details.
pub fn reseed(handle: Handle) -> Result<(), Error> {
    registry()?.reseed(handle)
}

/// See [`Registry::generate`] for details.
pub fn generate(handle: Handle, strength_bits: u32, bytes: &mut [u8]) -> Result<(), Error> {
    registry()?.generate(handle, strength_bits, bytes)
}
