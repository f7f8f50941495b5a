//! Deterministic state hashing
//!
//! `std`'s `RandomState` is randomly keyed per process, and the SipHash
//! output of `DefaultHasher` is not guaranteed to stay the same across Rust
//! releases. Either would let program-state abstractions drift between
//! otherwise identical runs. The [`StateHasher`] uses a fixed seed and a
//! multiply/xor mix with a final avalanche step, so its values are pinned.

use std::hash::{BuildHasher, Hash, Hasher};

/// Fixed-seed, non-cryptographic hasher
#[derive(Debug, Clone)]
pub struct StateHasher {
    state: u64,
}

impl StateHasher {
    const SEED: u64 = 0x2545_f491_4f6c_dd1d;
    const MULTIPLIER: u64 = 0x9e37_79b9_7f4a_7c15;

    pub fn new() -> Self {
        Self { state: Self::SEED }
    }

    /// Fold an already computed hash into this one
    pub fn combine(&mut self, other: u64) -> &mut Self {
        self.write_u64(other);
        self
    }
}

impl Default for StateHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for StateHasher {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state = self.state.wrapping_mul(Self::MULTIPLIER) ^ u64::from(byte);
        }
    }

    fn write_u8(&mut self, i: u8) {
        self.state = self.state.wrapping_mul(Self::MULTIPLIER) ^ u64::from(i);
    }

    fn write_u32(&mut self, i: u32) {
        self.state = self.state.wrapping_mul(Self::MULTIPLIER) ^ u64::from(i);
    }

    fn write_u64(&mut self, i: u64) {
        self.state = self.state.wrapping_mul(Self::MULTIPLIER) ^ i;
    }

    fn write_usize(&mut self, i: usize) {
        self.write_u64(i as u64);
    }

    fn finish(&self) -> u64 {
        let mut h = self.state;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^= h >> 33;
        h
    }
}

/// Builder for [`StateHasher`], usable with `HashMap::with_hasher`
#[derive(Debug, Clone, Copy, Default)]
pub struct StateHasherBuilder;

impl BuildHasher for StateHasherBuilder {
    type Hasher = StateHasher;

    fn build_hasher(&self) -> StateHasher {
        StateHasher::new()
    }
}

/// Deterministic hash of a single value
pub fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = StateHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
