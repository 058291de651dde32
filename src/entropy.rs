//
// Copyright (c) 2023 Daniel Ottavio
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE
//
//! Traits and types for defining entropy sources.
//!
//! An entropy source is anything implementing [`Entropy`]. The DRBG
//! asks the source how many raw bytes it needs to deliver one byte of
//! full entropy, initializes it once per instantiation and then pulls
//! raw bytes one at a time. Each group of that many raw bytes is
//! condensed into one byte of seed material.
use alloc::{
    boxed::Box,
    string::{String, ToString},
    vec::Vec,
};
use core::{
    fmt,
    fmt::{Debug, Display, Formatter},
};
use sha2::{Digest, Sha256};
use tracing::warn;
use zeroize::{Zeroize, Zeroizing};

/// Upper bound on the conditioning ratio an entropy source may
/// report.
pub const MAX_BYTES_PER_BYTE_OF_ENTROPY: u8 = 8;

/// Error type for entropy source failures.
#[derive(Debug)]
pub struct Error {
    inner: String,
}

/// Represents a source of cryptograplicly secure random data. It's
/// primary use-case is to seed random number generators.
pub trait Entropy {
    /// Number of raw bytes this source must deliver for one byte of
    /// full entropy. Must be in `1..=MAX_BYTES_PER_BYTE_OF_ENTROPY`.
    fn bytes_per_entropy_byte(&mut self) -> Result<u8, Error>;

    /// Prepare the underlying source. Called once before the first
    /// fetch of every instantiation.
    fn init(&mut self) -> Result<(), Error>;

    /// Fetch one raw byte from the source.
    ///
    /// # Error
    ///
    /// Returns an error if there is a problem with the underlying
    /// entropy source.
    fn fetch_byte(&mut self) -> Result<u8, Error>;
}

impl<E> Entropy for Box<E>
where
    E: Entropy + ?Sized,
{
    fn bytes_per_entropy_byte(&mut self) -> Result<u8, Error> {
        (**self).bytes_per_entropy_byte()
    }

    fn init(&mut self) -> Result<(), Error> {
        (**self).init()
    }

    fn fetch_byte(&mut self) -> Result<u8, Error> {
        (**self).fetch_byte()
    }
}

impl Error {
    /// Create a new error by wrapping an underlying entropy source
    /// error.
    ///
    /// # Example
    /// ```
    /// use ntru_drbg::entropy::Error;
    ///
    /// fn fetch_byte() -> Result<u8, Error> {
    ///    let mut byte = [0u8; 1];
    ///    getrandom::getrandom(&mut byte).map_err(Error::new)?;
    ///    Ok(byte[0])
    /// }
    /// ```
    pub fn new<E>(error: E) -> Self
    where
        E: Display + Debug,
    {
        Self {
            inner: error.to_string(),
        }
    }
}

impl core::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "entropy error: {}", self.inner)
    }
}

/// Initialize `source` ahead of an instantiation.
pub(crate) fn prepare<E>(source: &mut E) -> Result<(), crate::Error>
where
    E: Entropy + ?Sized,
{
    source.init().inspect_err(log_failure)?;
    Ok(())
}

/// Draw `len` bytes of entropy input from `source`.
///
/// Every output byte consumes `ratio` raw bytes from the source. At a
/// ratio of 1 the raw byte is used as-is; otherwise the group is
/// condensed to the first byte of its SHA-256 digest. The returned
/// buffer has exact capacity for `spare` more bytes, so appending a
/// personalization string never reallocates seed material.
pub(crate) fn collect<E>(
    source: &mut E,
    len: usize,
    spare: usize,
) -> Result<Zeroizing<Vec<u8>>, crate::Error>
where
    E: Entropy + ?Sized,
{
    let ratio = source.bytes_per_entropy_byte().inspect_err(log_failure)?;
    if ratio == 0 || ratio > MAX_BYTES_PER_BYTE_OF_ENTROPY {
        let error = Error::new(format_args!("conditioning ratio {} out of range", ratio));
        log_failure(&error);
        return Err(error.into());
    }
    let ratio = usize::from(ratio);

    let mut seed = Zeroizing::new(Vec::new());
    seed.try_reserve_exact(len + spare)
        .map_err(|_| crate::Error::OutOfMemory)?;
    let mut group = Zeroizing::new([0u8; MAX_BYTES_PER_BYTE_OF_ENTROPY as usize]);
    for _ in 0..len {
        for raw in group[..ratio].iter_mut() {
            *raw = source.fetch_byte().inspect_err(log_failure)?;
        }
        seed.push(condense(&group[..ratio]));
    }
    Ok(seed)
}

fn condense(group: &[u8]) -> u8 {
    match group {
        [byte] => *byte,
        _ => Sha256::digest(group)[0],
    }
}

fn log_failure(error: &Error) {
    warn!(%error, "entropy source failure");
}

/// An entropy source that draws random data from the host operating
/// system.
///
/// Bytes are read from [`getrandom`](getrandom::getrandom) in small
/// batches; consumed bytes are wiped from the internal buffer.
///
/// ```
/// use ntru_drbg::entropy::{OsEntropy, Entropy};
///
/// # use ntru_drbg::entropy::Error;
/// #
/// # fn main() -> Result<(),Error> {
/// #
/// let mut entropy = OsEntropy::default();
/// entropy.init()?;
/// let byte = entropy.fetch_byte()?;
/// #
/// # Ok(())
/// # }
/// ```
pub struct OsEntropy {
    pool: [u8; OS_POOL_LEN],
    pos: usize,
}

const OS_POOL_LEN: usize = 64;

impl Default for OsEntropy {
    fn default() -> Self {
        Self {
            pool: [0u8; OS_POOL_LEN],
            pos: OS_POOL_LEN,
        }
    }
}

impl OsEntropy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Drop for OsEntropy {
    fn drop(&mut self) {
        self.pool.zeroize();
    }
}

impl Entropy for OsEntropy {
    fn bytes_per_entropy_byte(&mut self) -> Result<u8, Error> {
        Ok(1)
    }

    fn init(&mut self) -> Result<(), Error> {
        self.pool.zeroize();
        self.pos = OS_POOL_LEN;
        Ok(())
    }

    /// # Error
    ///
    /// Returns any error from `getrandom`.
    fn fetch_byte(&mut self) -> Result<u8, Error> {
        if self.pos == OS_POOL_LEN {
            getrandom::getrandom(&mut self.pool).map_err(Error::new)?;
            self.pos = 0;
        }
        let byte = self.pool[self.pos];
        self.pool[self.pos] = 0;
        self.pos += 1;
        Ok(byte)
    }
}

/// Commands understood by a callback entropy source. See
/// [`FnEntropy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntropyCmd {
    /// Write the conditioning ratio to the output byte.
    BytesPerEntropyByte,
    /// Initialize the source. The output byte is ignored.
    Init,
    /// Write one raw entropy byte to the output byte.
    GetByte,
}

/// Adapts a single callback of the form `fn(cmd, &mut out) -> bool`
/// into an [`Entropy`] source. The callback returns `false` on
/// failure.
///
/// ```
/// use ntru_drbg::entropy::{Entropy, EntropyCmd, FnEntropy};
///
/// let mut counter = 0u8;
/// let mut entropy = FnEntropy::new(move |cmd, out: &mut u8| {
///     match cmd {
///         EntropyCmd::BytesPerEntropyByte => *out = 1,
///         EntropyCmd::Init => {}
///         EntropyCmd::GetByte => {
///             counter = counter.wrapping_add(1);
///             *out = counter;
///         }
///     }
///     true
/// });
/// assert_eq!(entropy.bytes_per_entropy_byte().unwrap(), 1);
/// ```
pub struct FnEntropy<F> {
    f: F,
}

impl<F> FnEntropy<F>
where
    F: FnMut(EntropyCmd, &mut u8) -> bool,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    fn call(&mut self, cmd: EntropyCmd) -> Result<u8, Error> {
        let mut out = 0u8;
        if (self.f)(cmd, &mut out) {
            Ok(out)
        } else {
            Err(Error::new(format_args!("callback failed on {:?}", cmd)))
        }
    }
}

impl<F> Entropy for FnEntropy<F>
where
    F: FnMut(EntropyCmd, &mut u8) -> bool,
{
    fn bytes_per_entropy_byte(&mut self) -> Result<u8, Error> {
        self.call(EntropyCmd::BytesPerEntropyByte)
    }

    fn init(&mut self) -> Result<(), Error> {
        self.call(EntropyCmd::Init).map(|_| ())
    }

    fn fetch_byte(&mut self) -> Result<u8, Error> {
        self.call(EntropyCmd::GetByte)
    }
}

/// A deterministic source that replays a fixed byte string, for
/// known-answer testing.
///
/// The source fails once every byte has been handed out, which also
/// makes it useful for exercising entropy failures at a precise
/// point.
///
/// ```
/// use ntru_drbg::entropy::{Entropy, VectorEntropy};
///
/// let mut entropy = VectorEntropy::new([0xaau8, 0xbb]);
/// entropy.init().unwrap();
/// assert_eq!(entropy.fetch_byte().unwrap(), 0xaa);
/// assert_eq!(entropy.fetch_byte().unwrap(), 0xbb);
/// assert!(entropy.fetch_byte().is_err());
/// ```
pub struct VectorEntropy {
    bytes: Vec<u8>,
    pos: usize,
    ratio: u8,
    ready: bool,
}

impl VectorEntropy {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            pos: 0,
            ratio: 1,
            ready: false,
        }
    }

    /// Report `ratio` raw bytes per byte of entropy. The value is
    /// passed through unchecked.
    pub fn with_ratio(mut self, ratio: u8) -> Self {
        self.ratio = ratio;
        self
    }

    /// Number of bytes not yet handed out.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

impl Drop for VectorEntropy {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl Entropy for VectorEntropy {
    fn bytes_per_entropy_byte(&mut self) -> Result<u8, Error> {
        Ok(self.ratio)
    }

    fn init(&mut self) -> Result<(), Error> {
        self.ready = true;
        Ok(())
    }

    fn fetch_byte(&mut self) -> Result<u8, Error> {
        if !self.ready {
            return Err(Error::new("test vector not initialized"));
        }
        let byte = self
            .bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::new("test vector exhausted"))?;
        self.pos += 1;
        Ok(byte)
    }
}

/// An entropy source backed by the x86_64 `RDSEED` instruction.
///
/// [`init`](Entropy::init) fails on CPUs without `RDSEED` support, and
/// no byte is fetched until it has succeeded.
#[cfg(all(feature = "rdseed", target_arch = "x86_64"))]
#[cfg_attr(docsrs, doc(cfg(all(feature = "rdseed", target_arch = "x86_64"))))]
pub struct RdseedEntropy {
    word: [u8; 8],
    pos: usize,
    supported: bool,
}

#[cfg(all(feature = "rdseed", target_arch = "x86_64"))]
const RDSEED_RETRIES: usize = 128;

#[cfg(all(feature = "rdseed", target_arch = "x86_64"))]
impl RdseedEntropy {
    pub fn new() -> Self {
        Self {
            word: [0u8; 8],
            pos: 8,
            supported: false,
        }
    }
}

#[cfg(all(feature = "rdseed", target_arch = "x86_64"))]
impl Drop for RdseedEntropy {
    fn drop(&mut self) {
        self.word.zeroize();
    }
}

#[cfg(all(feature = "rdseed", target_arch = "x86_64"))]
#[target_feature(enable = "rdseed")]
unsafe fn rdseed64() -> Option<u64> {
    let mut value = 0u64;
    for _ in 0..RDSEED_RETRIES {
        if core::arch::x86_64::_rdseed64_step(&mut value) == 1 {
            return Some(value);
        }
        core::hint::spin_loop();
    }
    None
}

#[cfg(all(feature = "rdseed", target_arch = "x86_64"))]
impl Entropy for RdseedEntropy {
    fn bytes_per_entropy_byte(&mut self) -> Result<u8, Error> {
        Ok(1)
    }

    fn init(&mut self) -> Result<(), Error> {
        self.supported = std::is_x86_feature_detected!("rdseed");
        if !self.supported {
            return Err(Error::new("rdseed not supported by this cpu"));
        }
        self.pos = self.word.len();
        Ok(())
    }

    fn fetch_byte(&mut self) -> Result<u8, Error> {
        if !self.supported {
            return Err(Error::new("rdseed source not initialized"));
        }
        if self.pos == self.word.len() {
            // SAFETY: `supported` is only set after runtime detection
            // of the rdseed feature.
            let value = unsafe { rdseed64() }.ok_or_else(|| Error::new("rdseed retries exhausted"))?;
            self.word = value.to_le_bytes();
            self.pos = 0;
        }
        let byte = self.word[self.pos];
        self.word[self.pos] = 0;
        self.pos += 1;
        Ok(byte)
    }
}
