// SPDX-License-Identifier: MIT

//! An implementation of the crypographic random number generator
//! HMAC_DRBG as defined by NIST [SP 800-90A
//! Rev. 1](https://csrc.nist.gov/publications/detail/sp/800-90a/rev-1/final),
//! serving key generation, blinding and padding for a lattice
//! public-key cryptosystem.
//!
//! HMAC_DRBG is a Cryptographically Secure Pseudorandom Number
//! Generator (CSPRNG) that may be used for generating sensitive data
//! such as encryption keys. The implementation uses HMAC-SHA-256 and
//! supports security strengths of 112, 128, 192 and 256 bits.
//!
//! # Quick Example
//!
//! Instances live in a fixed-capacity
//! [`Registry`](crate::registry::Registry) and are addressed by
//! handle. The `std` feature is required for this approach.
//!
//! ```
//! # #[cfg(feature = "std")]
//! use ntru_drbg::{entropy::OsEntropy, registry::Registry};
//!
//! # use ntru_drbg::Error;
//! #
//! # fn main() -> Result<(),Error> {
//! #
//! # #[cfg(feature = "std")]
//! # {
//! let registry: Registry = Registry::new();
//! let handle = registry.instantiate(256, None, Box::new(OsEntropy::default()))?;
//! let mut random_data = [0u8; 32];
//! registry.generate(handle, 256, &mut random_data)?;
//! registry.uninstantiate(handle)?;
//! # }
//! #
//! # Ok(())
//! # }
//! ```
//!
//! Otherwise a single instance may be constructed by hand using the
//! [`HmacBuilder`](hmac_drbg::HmacBuilder) class. This approach
//! doesn't require the `std` feature.
//!
//! Entropy is supplied through the [`Entropy`](entropy::Entropy)
//! trait. Sources for the host OS, the x86_64 `RDSEED` instruction
//! and fixed test vectors are provided.
//!
#![no_std]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod entropy;
mod error;
pub mod hmac_drbg;
pub mod strength;

#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod global;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod registry;

pub use entropy::MAX_BYTES_PER_BYTE_OF_ENTROPY;
pub use error::Error;
#[cfg(feature = "std")]
pub use registry::{Handle, Registry, MAX_INSTANTIATIONS};
pub use strength::{MAX_BYTES_PER_REQUEST, MAX_PERS_STR_BYTES, MAX_SEC_STRENGTH_BITS};
