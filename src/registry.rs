// SPDX-License-Identifier: MIT

//! A fixed-capacity registry of HMAC_DRBG instances.
//!
//! Callers never hold a generator directly. [`Registry::instantiate`]
//! seeds a generator in a free slot and returns an opaque [`Handle`]
//! that the other operations take. Uninstantiating a handle wipes the
//! slot's key material and makes the handle permanently invalid, even
//! once the slot is reused.
//!
//! # Example
//!
//! ```
//! use ntru_drbg::{entropy::OsEntropy, registry::Registry};
//!
//! # use ntru_drbg::Error;
//! #
//! # fn main() -> Result<(), Error> {
//! let registry: Registry = Registry::new();
//! let handle = registry.instantiate(256, Some(b"keygen".as_slice()), Box::new(OsEntropy::default()))?;
//!
//! let mut random_data = [0u8; 32];
//! registry.generate(handle, 256, &mut random_data)?;
//!
//! registry.uninstantiate(handle)?;
//! # Ok(())
//! # }
//! ```
use crate::{
    entropy::Entropy,
    hmac_drbg::{State, RESEED_INTERVAL},
    strength::{self, Strength},
    Error,
};

use std::{
    boxed::Box,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, warn};

/// Default number of instances a registry can hold at once.
pub const MAX_INSTANTIATIONS: usize = 4;

const INDEX_BITS: u32 = 8;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = u32::MAX >> INDEX_BITS;

/// Opaque identifier of one live instance.
///
/// The low 8 bits select the slot; the remaining bits carry the
/// slot's generation, which changes every time the slot is freed. A
/// generation is never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    fn new(index: usize, generation: u32) -> Self {
        Handle((generation << INDEX_BITS) | index as u32)
    }

    /// Rebuild a handle from its integer form. Unknown values are
    /// rejected by the registry with [`Error::BadParameter`].
    pub fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    pub fn into_raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }

    fn generation(self) -> u32 {
        self.0 >> INDEX_BITS
    }
}

#[derive(Default)]
struct Slot {
    state: State,
    entropy: Option<Box<dyn Entropy + Send>>,
    generation: u32,
    occupied: bool,
}

/// A table of up to `N` HMAC_DRBG instances shared between threads.
///
/// Slot allocation and release are serialized by one allocation lock.
/// Every slot has its own lock, so operations on different handles
/// run in parallel while operations on the same handle never
/// interleave. Entropy is only ever drawn under a slot lock.
pub struct Registry<const N: usize = MAX_INSTANTIATIONS> {
    slots: [Mutex<Slot>; N],
    reserved: Mutex<[bool; N]>,
    reseed_itr: u64,
}

impl<const N: usize> Default for Registry<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<const N: usize> Registry<N> {
    const VALID_CAPACITY: () = assert!(N > 0 && N <= 1 << INDEX_BITS);

    /// Create an empty registry whose instances reseed every 2^48
    /// requests.
    pub fn new() -> Self {
        Self::with_reseed_interval(RESEED_INTERVAL)
    }

    /// Create an empty registry whose instances reseed automatically
    /// after `reseed_itr` generate requests.
    ///
    /// # Panics
    ///
    /// The reseed interval must be in `1..=2^48`. This function panics
    /// otherwise.
    pub fn with_reseed_interval(reseed_itr: u64) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;
        if reseed_itr == 0 || reseed_itr > RESEED_INTERVAL {
            panic!("Registry: reseed interval out of range")
        }
        Self {
            slots: core::array::from_fn(|_| Mutex::new(Slot::default())),
            reserved: Mutex::new([false; N]),
            reseed_itr,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Seed a new instance with `strength_bits` of security strength
    /// and return its handle.
    ///
    /// `entropy` is initialized once, then supplies the entropy input
    /// and nonce. The registry keeps it for later reseeds and drops it
    /// on [`uninstantiate`](Self::uninstantiate).
    ///
    /// # Error
    ///
    /// - [`Error::BadLength`] for an unsupported strength or a
    ///   personalization string over 32 bytes.
    /// - [`Error::NotAvailable`] when every slot is in use.
    /// - [`Error::EntropyFail`] or [`Error::OutOfMemory`] while
    ///   seeding. The slot is released again.
    pub fn instantiate(
        &self,
        strength_bits: u32,
        personal: Option<&[u8]>,
        mut entropy: Box<dyn Entropy + Send>,
    ) -> Result<Handle, Error> {
        let strength = Strength::from_bits(strength_bits)?;
        let personal = personal.unwrap_or(&[]);
        strength::check_personal(personal)?;

        let index = self.reserve().ok_or_else(|| {
            warn!(capacity = N, "no instantiation slot available");
            Error::NotAvailable
        })?;

        let mut slot = lock(&self.slots[index]);
        if let Err(e) = slot
            .state
            .instantiate(strength, personal, self.reseed_itr, entropy.as_mut())
        {
            lock(&self.reserved)[index] = false;
            return Err(e);
        }
        slot.entropy = Some(entropy);
        slot.occupied = true;
        debug!(slot = index, strength = strength.bits(), "instantiated drbg");
        Ok(Handle::new(index, slot.generation))
    }

    /// Destroy the instance behind `handle`, wiping its key and value
    /// before the slot is released.
    ///
    /// A slot whose generation counter is exhausted is retired instead
    /// of released, which permanently lowers the capacity by one.
    ///
    /// # Error
    ///
    /// Returns [`Error::BadParameter`] if `handle` is not live.
    pub fn uninstantiate(&self, handle: Handle) -> Result<(), Error> {
        let mut slot = self.locate(handle)?;
        slot.state.clear();
        slot.entropy = None;
        slot.occupied = false;
        if slot.generation == GENERATION_MASK {
            // generations never repeat, so the slot stays reserved
            warn!(slot = handle.index(), "slot generations exhausted, retiring slot");
            return Ok(());
        }
        slot.generation += 1;
        lock(&self.reserved)[handle.index()] = false;
        debug!(slot = handle.index(), "uninstantiated drbg");
        Ok(())
    }

    /// Mix fresh entropy into the instance behind `handle`.
    ///
    /// # Error
    ///
    /// Returns [`Error::BadParameter`] if `handle` is not live, and
    /// propagates entropy and HMAC failures.
    pub fn reseed(&self, handle: Handle) -> Result<(), Error> {
        let mut slot = self.locate(handle)?;
        let Slot { state, entropy, .. } = &mut *slot;
        let entropy = entropy.as_mut().ok_or(Error::BadParameter)?;
        state.reseed(entropy)?;
        debug!(slot = handle.index(), "reseeded drbg");
        Ok(())
    }

    /// Fill `bytes` from the instance behind `handle` at
    /// `strength_bits` of security strength.
    ///
    /// The instance reseeds itself first when its reseed interval has
    /// been reached.
    ///
    /// # Error
    ///
    /// Checked in order: [`Error::BadParameter`] if `handle` is not
    /// live, [`Error::BadLength`] if `bytes` is empty or longer than
    /// 1024 bytes, [`Error::BadLength`] if `strength_bits` exceeds the
    /// instance strength. An automatic reseed may fail with
    /// [`Error::EntropyFail`]. `bytes` is left untouched on error.
    pub fn generate(&self, handle: Handle, strength_bits: u32, bytes: &mut [u8]) -> Result<(), Error> {
        let mut slot = self.locate(handle)?;
        let Slot { state, entropy, .. } = &mut *slot;
        let entropy = entropy.as_mut().ok_or(Error::BadParameter)?;
        state.generate(strength_bits, bytes, entropy)
    }

    fn reserve(&self) -> Option<usize> {
        let mut reserved = lock(&self.reserved);
        let index = reserved.iter().position(|r| !r)?;
        reserved[index] = true;
        Some(index)
    }

    fn locate(&self, handle: Handle) -> Result<MutexGuard<'_, Slot>, Error> {
        let slot = lock(self.slots.get(handle.index()).ok_or(Error::BadParameter)?);
        if !slot.occupied || slot.generation != handle.generation() {
            return Err(Error::BadParameter);
        }
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        entropy::{EntropyCmd, FnEntropy, OsEntropy, VectorEntropy},
        registry::{lock, Handle, Registry, GENERATION_MASK, MAX_INSTANTIATIONS},
        strength::MAX_BYTES_PER_REQUEST,
        Error,
    };
    use std::{boxed::Box, sync::Arc, thread, vec, vec::Vec};

    fn os() -> Box<OsEntropy> {
        Box::new(OsEntropy::default())
    }

    #[test]
    fn capacity_cycles() -> Result<(), Error> {
        let registry: Registry = Registry::new();
        assert_eq!(registry.capacity(), MAX_INSTANTIATIONS);
        for _ in 0..3 {
            let mut handles = Vec::new();
            for _ in 0..MAX_INSTANTIATIONS {
                handles.push(registry.instantiate(256, None, os())?);
            }
            assert!(matches!(
                registry.instantiate(256, None, os()),
                Err(Error::NotAvailable)
            ));
            // a full registry still serves the live handles
            let mut bytes = [0u8; 16];
            for h in &handles {
                registry.generate(*h, 256, &mut bytes)?;
            }
            for h in handles {
                registry.uninstantiate(h)?;
            }
        }
        Ok(())
    }

    #[test]
    fn known_answer() -> Result<(), Error> {
        let mut input =
            hex::decode("ca851911349384bffe89de1cbdc46e6831e44d34a4fb935ee285dd14b71a7488").unwrap();
        input.extend(hex::decode("659ba96c601dc69fc902940805ec0ca8").unwrap());
        let output = hex::decode("e528e9abf2dece54d47c7e75e5fe302149f817ea9fb4bee6f4199697d04d5b89d54fbb978a15b5c443c9ec21036d2460b6f73ebad0dc2aba6e624abf07745bc107694bb7547bb0995f70de25d6b29e2d3011bb19d27676c07162c8b5ccde0668961df86803482cb37ed6d5c0bb8d50cf1f50d476aa0458bdaba806f48be9dcb8").unwrap();

        let registry: Registry = Registry::new();
        let handle = registry.instantiate(256, None, Box::new(VectorEntropy::new(input)))?;
        let mut bytes = vec![0u8; output.len()];
        registry.generate(handle, 256, &mut bytes)?;
        registry.generate(handle, 256, &mut bytes)?;
        assert_eq!(output, bytes);
        registry.uninstantiate(handle)
    }

    #[test]
    fn known_answer_single_request() -> Result<(), Error> {
        let mut input =
            hex::decode("ca851911349384bffe89de1cbdc46e6831e44d34a4fb935ee285dd14b71a7488").unwrap();
        input.extend(hex::decode("659ba96c601dc69fc902940805ec0ca8").unwrap());
        let output = hex::decode("591adfe6e6ee9ba3e7d11ed51db04b3bf9600c1733c0b0c4486eb8230bc56344b563ba9bd6858c0e4a04888c0b13cd4e024d2866f8f5b2bf4db1d83e27bd1eae").unwrap();

        let registry: Registry = Registry::new();
        let handle = registry.instantiate(256, None, Box::new(VectorEntropy::new(input)))?;
        let mut bytes = [0u8; 64];
        registry.generate(handle, 256, &mut bytes)?;
        assert_eq!(output, bytes);
        registry.uninstantiate(handle)
    }

    #[test]
    fn callback_entropy() -> Result<(), Error> {
        let registry: Registry = Registry::new();
        let mut counter = 0u8;
        let source = FnEntropy::new(move |cmd, out: &mut u8| {
            match cmd {
                EntropyCmd::BytesPerEntropyByte => *out = 2,
                EntropyCmd::Init => {}
                EntropyCmd::GetByte => {
                    counter = counter.wrapping_add(1);
                    *out = counter;
                }
            }
            true
        });
        let handle = registry.instantiate(128, Some(b"blinding".as_slice()), Box::new(source))?;
        let mut first = [0u8; 16];
        let mut second = [0u8; 16];
        registry.generate(handle, 128, &mut first)?;
        registry.reseed(handle)?;
        registry.generate(handle, 128, &mut second)?;
        assert_ne!(first, second);

        let failing = FnEntropy::new(|cmd, _: &mut u8| cmd != EntropyCmd::Init);
        assert!(matches!(
            registry.instantiate(128, None, Box::new(failing)),
            Err(Error::EntropyFail(_))
        ));
        registry.uninstantiate(handle)
    }

    #[test]
    fn rejected_generate_keeps_counter() -> Result<(), Error> {
        let registry: Registry = Registry::new();
        let handle = registry.instantiate(192, None, os())?;
        let mut bytes = [0u8; 16];
        registry.generate(handle, 192, &mut bytes)?;
        let counter = || lock(&registry.slots[handle.index()]).state.reseed_ctr();
        assert_eq!(counter(), 2);

        let mut big = vec![0u8; MAX_BYTES_PER_REQUEST + 1];
        assert!(registry.generate(handle, 192, &mut big).is_err());
        assert!(registry.generate(handle, 256, &mut bytes).is_err());
        assert_eq!(counter(), 2);
        registry.uninstantiate(handle)
    }

    #[test]
    fn exhausted_generation_retires_slot() -> Result<(), Error> {
        let registry: Registry<1> = Registry::new();
        let first = registry.instantiate(256, None, os())?;
        registry.uninstantiate(first)?;

        lock(&registry.slots[0]).generation = GENERATION_MASK;
        let last = registry.instantiate(256, None, os())?;
        registry.uninstantiate(last)?;
        assert!(matches!(
            registry.instantiate(256, None, os()),
            Err(Error::NotAvailable)
        ));
        for stale in [first, last] {
            assert!(matches!(registry.uninstantiate(stale), Err(Error::BadParameter)));
            assert!(matches!(registry.reseed(stale), Err(Error::BadParameter)));
        }
        Ok(())
    }

    #[test]
    fn generate_lengths() -> Result<(), Error> {
        let registry: Registry = Registry::new();
        let handle = registry.instantiate(192, None, os())?;

        let mut empty = [0u8; 0];
        assert!(matches!(
            registry.generate(handle, 192, &mut empty),
            Err(Error::BadLength)
        ));
        let mut big = vec![0u8; MAX_BYTES_PER_REQUEST + 1];
        assert!(matches!(
            registry.generate(handle, 192, &mut big),
            Err(Error::BadLength)
        ));
        let mut max = vec![0u8; MAX_BYTES_PER_REQUEST];
        registry.generate(handle, 192, &mut max)?;

        // weaker requests only
        let mut bytes = [0u8; 8];
        registry.generate(handle, 128, &mut bytes)?;
        assert!(matches!(
            registry.generate(handle, 256, &mut bytes),
            Err(Error::BadLength)
        ));
        Ok(())
    }

    #[test]
    fn instantiate_lengths() -> Result<(), Error> {
        let registry: Registry = Registry::new();
        for bits in [0, 100, 257, 1024] {
            assert!(matches!(
                registry.instantiate(bits, None, os()),
                Err(Error::BadLength)
            ));
        }
        let personal = [0x42u8; 33];
        assert!(matches!(
            registry.instantiate(256, Some(&personal[..]), os()),
            Err(Error::BadLength)
        ));
        // rejected requests never hold a slot
        for _ in 0..MAX_INSTANTIATIONS {
            registry.instantiate(256, Some(&personal[..32]), os())?;
        }
        Ok(())
    }

    #[test]
    fn state_advances() -> Result<(), Error> {
        let registry: Registry = Registry::new();
        let handle = registry.instantiate(256, None, Box::new(VectorEntropy::new([9u8; 48])))?;
        let mut first = [0u8; 64];
        let mut second = [0u8; 64];
        registry.generate(handle, 256, &mut first)?;
        registry.generate(handle, 256, &mut second)?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn auto_reseed_entropy_failure() -> Result<(), Error> {
        let registry: Registry = Registry::with_reseed_interval(3);
        // exactly enough for entropy input and nonce, nothing for a reseed
        let handle = registry.instantiate(256, None, Box::new(VectorEntropy::new([5u8; 48])))?;

        let mut bytes = [0u8; 32];
        for _ in 0..3 {
            registry.generate(handle, 256, &mut bytes)?;
        }
        let mut untouched = [0xa5u8; 32];
        assert!(matches!(
            registry.generate(handle, 256, &mut untouched),
            Err(Error::EntropyFail(_))
        ));
        assert_eq!([0xa5u8; 32], untouched);
        assert!(matches!(registry.reseed(handle), Err(Error::EntropyFail(_))));

        registry.uninstantiate(handle)
    }

    #[test]
    fn explicit_reseed() -> Result<(), Error> {
        let registry: Registry = Registry::with_reseed_interval(1);
        let handle = registry.instantiate(128, None, os())?;
        let mut bytes = [0u8; 16];
        for _ in 0..4 {
            registry.reseed(handle)?;
            registry.generate(handle, 128, &mut bytes)?;
            registry.generate(handle, 128, &mut bytes)?;
        }
        Ok(())
    }

    #[test]
    fn stale_handles() -> Result<(), Error> {
        let registry: Registry = Registry::new();
        assert!(matches!(
            registry.uninstantiate(Handle::from_raw(0)),
            Err(Error::BadParameter)
        ));
        assert!(matches!(
            registry.uninstantiate(Handle::from_raw(u32::MAX)),
            Err(Error::BadParameter)
        ));

        let old = registry.instantiate(256, None, os())?;
        registry.uninstantiate(old)?;
        assert!(matches!(registry.uninstantiate(old), Err(Error::BadParameter)));

        // the slot is reused under a new generation
        let new = registry.instantiate(256, None, os())?;
        assert_ne!(old, new);
        assert_eq!(Handle::from_raw(new.into_raw()), new);
        let mut bytes = [0u8; 8];
        assert!(matches!(
            registry.generate(old, 256, &mut bytes),
            Err(Error::BadParameter)
        ));
        assert!(matches!(registry.reseed(old), Err(Error::BadParameter)));
        assert!(matches!(registry.uninstantiate(old), Err(Error::BadParameter)));
        registry.uninstantiate(new)
    }

    #[test]
    fn uninstantiate_zeroes_slot() -> Result<(), Error> {
        let registry: Registry = Registry::new();
        let handle = registry.instantiate(256, None, os())?;
        let index = handle.index();
        assert!(!lock(&registry.slots[index]).state.is_zeroed());

        registry.uninstantiate(handle)?;
        let slot = lock(&registry.slots[index]);
        assert!(slot.state.is_zeroed());
        assert!(slot.entropy.is_none());
        Ok(())
    }

    #[test]
    fn failed_instantiate_frees_slot() -> Result<(), Error> {
        let registry: Registry<2> = Registry::new();
        for _ in 0..4 {
            assert!(matches!(
                registry.instantiate(256, None, Box::new(VectorEntropy::new([1u8; 47]))),
                Err(Error::EntropyFail(_))
            ));
        }
        registry.instantiate(256, None, os())?;
        registry.instantiate(256, None, os())?;
        assert!(matches!(
            registry.instantiate(256, None, os()),
            Err(Error::NotAvailable)
        ));
        Ok(())
    }

    #[test]
    fn multi_thread() {
        let registry: Arc<Registry> = Arc::new(Registry::new());
        let mut handles = Vec::with_capacity(MAX_INSTANTIATIONS);
        for _ in 0..MAX_INSTANTIATIONS {
            let registry = Arc::clone(&registry);
            let h = thread::spawn(move || {
                for _ in 0..32 {
                    let handle = registry.instantiate(256, None, os()).unwrap();
                    let mut buf = [0u8; 8];
                    registry.generate(handle, 256, &mut buf).unwrap();
                    assert_ne!([0u8; 8], buf);
                    registry.uninstantiate(handle).unwrap();
                }
            });
            handles.push(h)
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn shared_handle() -> Result<(), Error> {
        let registry: Arc<Registry> = Arc::new(Registry::with_reseed_interval(16));
        let handle = registry.instantiate(256, None, os())?;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let mut outputs = Vec::new();
                for _ in 0..64 {
                    let mut buf = [0u8; 32];
                    registry.generate(handle, 256, &mut buf).unwrap();
                    outputs.push(buf);
                }
                outputs
            }));
        }
        let mut all: Vec<[u8; 32]> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 8 * 64);
        registry.uninstantiate(handle)
    }
}
