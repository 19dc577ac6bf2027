//! Hash/equality strategy over raw key bytes.
//!
//! The map never learns what a key means; it only hands `dsize_key` bytes to
//! the strategy. Implementations must be deterministic and pure for the life
//! of the map, and `equal(a, b)` must imply `hash(a) == hash(b)`.

use core::hash::BuildHasher;

pub trait KeyHash: Send + Sync {
    fn hash(&self, key: &[u8]) -> u64;

    #[inline]
    fn equal(&self, a: &[u8], b: &[u8]) -> bool {
        a == b
    }
}

/// Hashes key bytes with any [`BuildHasher`]; equality is byte-exact.
#[derive(Clone, Debug, Default)]
pub struct DefaultKeyHash<S = ahash::RandomState> {
    hasher: S,
}

impl DefaultKeyHash {
    /// Randomly seeded `ahash` strategy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S> DefaultKeyHash<S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self { hasher }
    }
}

impl<S> KeyHash for DefaultKeyHash<S>
where
    S: BuildHasher + Send + Sync,
{
    #[inline]
    fn hash(&self, key: &[u8]) -> u64 {
        self.hasher.hash_one(key)
    }
}
