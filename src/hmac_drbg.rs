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
//! A module to facilitate the HMAC_DRBG algorithm.
//!
//! The HMAC_DRBG algorithm is implemented via the [`HmacDrbg`]
//! type. This type may be instantiated using the builder class
//! [`HmacBuilder`]. The same state machine backs every slot of the
//! [`Registry`](crate::registry::Registry).
//!
use crate::{
    entropy::{self, Entropy},
    strength::{self, Strength, MAX_BYTES_PER_REQUEST},
    Error,
};

use hmac::{digest::Output, Hmac, Mac};
use sha2::Sha256;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use alloc::vec::Vec;

#[cfg(feature = "rand_core")]
use rand_core::{TryCryptoRng, TryRngCore};

type HmacSha256 = Hmac<Sha256>;
type Value = Output<HmacSha256>;

/// Number of generate requests served between two seedings, unless a
/// smaller interval is configured. This is the SP 800-90A maximum for
/// HMAC_DRBG.
pub const RESEED_INTERVAL: u64 = 1 << 48;

/// Working state of one HMAC_DRBG instantiation: the key `K`, the
/// value `V` and the bookkeeping needed to decide when to reseed.
///
/// `K` and `V` are wiped on [`clear`](State::clear) and on drop. The
/// keyed hash is a black box: the inner and outer pad state that
/// `Hmac<Sha256>` derives from `K` lives on the stack for a single
/// HMAC call and is not wiped, since neither `hmac` nor `sha2`
/// exposes a zeroizing core.
pub(crate) struct State {
    key: Value,
    v: Value,
    reseed_ctr: u64,
    reseed_itr: u64,
    strength: Strength,
}

impl Default for State {
    fn default() -> Self {
        Self {
            key: Value::default(),
            v: Value::default(),
            reseed_ctr: 0,
            reseed_itr: RESEED_INTERVAL,
            strength: Strength::Bits256,
        }
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.clear();
    }
}

impl State {
    /// Seed the state from `entropy` and the personalization string.
    ///
    /// Nothing is written to `self` until the entropy input and nonce
    /// have been collected.
    pub(crate) fn instantiate<E>(
        &mut self,
        strength: Strength,
        personal: &[u8],
        reseed_itr: u64,
        entropy: &mut E,
    ) -> Result<(), Error>
    where
        E: Entropy + ?Sized,
    {
        strength::check_personal(personal)?;
        entropy::prepare(entropy)?;
        let seed_len = strength.entropy_len() + strength.nonce_len();
        let mut seed = entropy::collect(entropy, seed_len, personal.len())?;
        seed.extend_from_slice(personal);

        self.key.fill(0x00);
        self.v.fill(0x01);
        self.strength = strength;
        self.reseed_itr = reseed_itr;
        if let Err(e) = self.update(&seed) {
            self.clear();
            return Err(e);
        }
        self.reseed_ctr = 1;
        Ok(())
    }

    /// Mix `strength.entropy_len()` fresh bytes of entropy into the
    /// state and restart the reseed counter.
    pub(crate) fn reseed<E>(&mut self, entropy: &mut E) -> Result<(), Error>
    where
        E: Entropy + ?Sized,
    {
        let seed = entropy::collect(entropy, self.strength.entropy_len(), 0)?;
        self.update(&seed)?;
        self.reseed_ctr = 1;
        Ok(())
    }

    /// Fill `bytes` with output for a request of `requested` bits of
    /// security strength.
    ///
    /// `bytes` is only written once every step has succeeded.
    pub(crate) fn generate<E>(
        &mut self,
        requested: u32,
        bytes: &mut [u8],
        entropy: &mut E,
    ) -> Result<(), Error>
    where
        E: Entropy + ?Sized,
    {
        strength::check_request_len(bytes.len())?;
        self.strength.check_request(requested)?;

        if self.reseed_ctr > self.reseed_itr {
            debug!(reseed_ctr = self.reseed_ctr, "reseed interval reached");
            self.reseed(entropy)?;
        }

        let mut tmp_buf = Zeroizing::new([0u8; MAX_BYTES_PER_REQUEST]);
        let out = &mut tmp_buf[..bytes.len()];
        for blk in out.chunks_mut(self.v.len()) {
            self.advance()?;
            blk.copy_from_slice(&self.v[..blk.len()]);
        }
        self.update(&[])?;
        self.reseed_ctr += 1;
        bytes.copy_from_slice(out);
        Ok(())
    }

    pub(crate) fn strength(&self) -> Strength {
        self.strength
    }

    /// Wipe `K` and `V` in place.
    pub(crate) fn clear(&mut self) {
        self.key.as_mut_slice().zeroize();
        self.v.as_mut_slice().zeroize();
        self.reseed_ctr = 0;
    }

    #[cfg(test)]
    pub(crate) fn reseed_ctr(&self) -> u64 {
        self.reseed_ctr
    }

    #[cfg(test)]
    pub(crate) fn is_zeroed(&self) -> bool {
        self.key.iter().chain(self.v.iter()).all(|b| *b == 0)
    }

    /// HMAC_DRBG update function. The second round only runs when
    /// `data` is non-empty.
    fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        self.update_round(0x00, data)?;
        if !data.is_empty() {
            self.update_round(0x01, data)?;
        }
        Ok(())
    }

    // K = HMAC(K, V || sep || data), then V = HMAC(K, V)
    fn update_round(&mut self, sep: u8, data: &[u8]) -> Result<(), Error> {
        let mut mac = self.mac()?;
        mac.update(&self.v);
        mac.update(&[sep]);
        mac.update(data);
        self.key = mac.finalize().into_bytes();
        self.advance()
    }

    // V = HMAC(K, V)
    fn advance(&mut self) -> Result<(), Error> {
        let mut mac = self.mac()?;
        mac.update(&self.v);
        self.v = mac.finalize().into_bytes();
        Ok(())
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(&self.key).map_err(Error::Hmac)
    }
}

/// Implementation of HMAC_DRBG using SHA-256 as outlined by [SP 800-90A
/// Rev. 1](https://csrc.nist.gov/publications/detail/sp/800-90a/rev-1/final).
/// Instantiation of this type is performed using the builder class
/// [`HmacBuilder`].
///
/// # Example
///
/// ```
/// use ntru_drbg::{hmac_drbg::HmacBuilder, entropy::OsEntropy};
///
/// # use ntru_drbg::Error;
/// #
/// # fn main() -> Result<(), Error> {
/// #
/// // Build a new instance
/// let mut drbg = HmacBuilder::new(OsEntropy::default()).build()?;
///
/// // Generate random data
/// let mut random_data = [0u8; 32];
/// drbg.fill_bytes(&mut random_data)?;
///
/// // Reseed the instance
/// drbg.reseed()?;
/// #
/// # Ok(())
/// # }
/// ```
pub struct HmacDrbg<E> {
    state: State,
    entropy: E,
}

/// Builder class for allocating `HmacDrbg` instances.
///
/// The security strength for new instances is 256 bit by default.
///
/// # Example
/// ```
/// use ntru_drbg::{hmac_drbg::HmacBuilder, entropy::OsEntropy};
///
/// # use ntru_drbg::Error;
/// #
/// # fn main() -> Result<(), Error> {
/// #
/// let my_info = 0u32;
/// let mut drbg = HmacBuilder::new(OsEntropy::default())
///     .strength(192)
///     .personal(&my_info.to_be_bytes())
///     .reseed_interval(1 << 14)
///     .build()?;
/// #
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HmacBuilder<'a, E> {
    personal: Option<&'a [u8]>,
    strength: u32,
    reseed_itr: u64,
    entropy: E,
}

impl<'a, E> HmacBuilder<'a, E>
where
    E: Entropy,
{
    pub fn new(entropy: E) -> Self {
        Self {
            personal: None,
            strength: Strength::Bits256.bits(),
            reseed_itr: RESEED_INTERVAL,
            entropy,
        }
    }

    /// Specify the security strength in bits: one of 112, 128, 192 or
    /// 256. Unsupported values make [`build`](Self::build) fail.
    pub fn strength(mut self, bits: u32) -> HmacBuilder<'a, E> {
        self.strength = bits;
        self
    }

    /// Specify the reseed interval for the HMAC_DRBG instance.
    ///
    /// This interval represents the number of calls to the underlying
    /// generation function before new entropy must be added. This
    /// happens automatically. Lowering this value increases security
    /// at the cost of more frequent calls to the entropy source.
    ///
    /// By default, this value is 2^48.
    ///
    /// # Panics
    ///
    /// The reseed interval must be in `1..=2^48`. This function panics
    /// otherwise.
    pub fn reseed_interval(mut self, reseed_itr: u64) -> HmacBuilder<'a, E> {
        if reseed_itr == 0 || reseed_itr > RESEED_INTERVAL {
            panic!("HmacDrbg: reseed interval out of range")
        }
        self.reseed_itr = reseed_itr;
        self
    }

    /// Specify the personalization info used to initialize the
    /// HMAC_DRBG instance. At most 32 bytes.
    ///
    /// By default, this value is empty.
    pub fn personal(mut self, personal: &'a [u8]) -> HmacBuilder<'a, E> {
        self.personal = Some(personal);
        self
    }

    /// Build and return a new [`HmacDrbg`] instance.
    ///
    /// The new instance is seeded with entropy input and a nonce sized
    /// for the requested strength, followed by the personalization
    /// info.
    ///
    /// # Error
    ///
    /// Returns [`Error::BadLength`] for an unsupported strength or an
    /// oversized personalization string, and
    /// [`Error::EntropyFail`] when there is a problem reading from the
    /// entropy source.
    pub fn build(mut self) -> Result<HmacDrbg<E>, Error> {
        let strength = Strength::from_bits(self.strength)?;
        let personal = self.personal.unwrap_or(&[]);
        let mut state = State::default();
        state.instantiate(strength, personal, self.reseed_itr, &mut self.entropy)?;
        debug!(strength = strength.bits(), "instantiated hmac drbg");
        Ok(HmacDrbg {
            state,
            entropy: self.entropy,
        })
    }
}

impl<E> HmacDrbg<E>
where
    E: Entropy,
{
    /// Generate `bytes.len()` random bytes at `strength_bits` of
    /// security strength, which may not exceed the instance strength.
    ///
    /// This function automatically reseeds `self` once the reseed
    /// interval has been met.
    ///
    /// # Error
    ///
    /// Returns [`Error::BadLength`] if `bytes` is empty or longer than
    /// [`MAX_BYTES_PER_REQUEST`], or if the strength is too high.
    /// Returns [`Error::EntropyFail`] when an automatic reseed fails.
    /// `bytes` is left untouched on error.
    pub fn generate(&mut self, strength_bits: u32, bytes: &mut [u8]) -> Result<(), Error> {
        self.state.generate(strength_bits, bytes, &mut self.entropy)
    }

    /// Fill the slice `bytes` with random data at the instance's full
    /// strength.
    ///
    /// There is no limit to the length of `bytes`. The slice is passed
    /// in chunks no larger than [`MAX_BYTES_PER_REQUEST`] to the
    /// underlying generate function. Output is staged and only copied
    /// into `bytes` once every chunk has succeeded.
    ///
    /// # Error
    ///
    /// Returns an error when there is an problem reading from the
    /// entropy source during an automatic reseed, or
    /// [`Error::OutOfMemory`] if the staging buffer cannot be
    /// allocated. `bytes` is left untouched on error.
    pub fn fill_bytes(&mut self, bytes: &mut [u8]) -> Result<(), Error> {
        let strength = self.state.strength().bits();
        match bytes.len() {
            0 => return Ok(()),
            len if len <= MAX_BYTES_PER_REQUEST => {
                return self.state.generate(strength, bytes, &mut self.entropy)
            }
            _ => {}
        }
        let mut staged = Zeroizing::new(Vec::new());
        staged
            .try_reserve_exact(bytes.len())
            .map_err(|_| Error::OutOfMemory)?;
        staged.resize(bytes.len(), 0);

        for blk in staged.chunks_mut(MAX_BYTES_PER_REQUEST) {
            self.state.generate(strength, blk, &mut self.entropy)?;
        }
        bytes.copy_from_slice(&staged);
        Ok(())
    }

    /// Reseed with fresh entropy sized for the instance strength.
    ///
    /// # Error
    ///
    /// Returns an error when there is an problem reading from the
    /// entropy source.
    pub fn reseed(&mut self) -> Result<(), Error> {
        self.state.reseed(&mut self.entropy)
    }

    pub fn strength(&self) -> Strength {
        self.state.strength()
    }
}

#[cfg(feature = "rand_core")]
#[cfg_attr(docsrs, doc(cfg(feature = "rand_core")))]
impl<E> TryCryptoRng for HmacDrbg<E> where E: Entropy {}

#[cfg(feature = "rand_core")]
#[cfg_attr(docsrs, doc(cfg(feature = "rand_core")))]
impl<E> TryRngCore for HmacDrbg<E>
where
    E: Entropy,
{
    type Error = Error;

    fn try_next_u32(&mut self) -> Result<u32, Self::Error> {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn try_fill_bytes(&mut self, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.fill_bytes(bytes)
    }
}
