//! Hashmap: the public facade over one device backend.
//!
//! Every call validates its buffers before touching the backend, so a
//! structural error (wrong byte count, mismatched batch lengths) leaves the
//! map unchanged. Per-key outcomes come back as masks. An allocation failure
//! during growth or rehash poisons the instance; every later call returns
//! `HashmapError::Poisoned`.

use crate::backend::Backend;
use crate::config::{Device, HashmapConfig, MAX_SLOTS};
use crate::error::{expect_bytes, expect_len, record_count, HashmapError, Result};
use crate::handle::Handle;
use crate::key_hash::{DefaultKeyHash, KeyHash};
use crate::parallel::ParallelBackend;
use crate::sequential::SequentialBackend;

/// Output of [`Hashmap::unpack`]: `masks[i]` is true iff handle `i` resolved.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Unpacked {
    pub keys: Vec<u8>,
    pub values: Vec<u8>,
    pub masks: Vec<bool>,
}

pub struct Hashmap {
    device: Device,
    dsize_key: usize,
    dsize_value: usize,
    max_load_factor: f32,
    backend: Box<dyn Backend>,
    poisoned: bool,
}

impl core::fmt::Debug for Hashmap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hashmap")
            .field("device", &self.device)
            .field("dsize_key", &self.dsize_key)
            .field("dsize_value", &self.dsize_value)
            .field("len", &self.backend.len())
            .field("bucket_count", &self.backend.bucket_count())
            .field("capacity", &self.backend.capacity())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl Hashmap {
    /// Builds a map hashing keys with [`DefaultKeyHash`].
    pub fn new(config: HashmapConfig) -> Result<Self> {
        Self::with_key_hash(config, DefaultKeyHash::new())
    }

    pub fn with_key_hash<H>(config: HashmapConfig, key_hash: H) -> Result<Self>
    where
        H: KeyHash + 'static,
    {
        config.validate()?;
        let buckets = config.bucket_count();
        let (dk, dv) = (config.dsize_key, config.dsize_value);
        let backend: Box<dyn Backend> = match config.device {
            Device::Sequential => Box::new(SequentialBackend::new(key_hash, buckets, dk, dv)?),
            Device::Parallel => {
                Box::new(ParallelBackend::new(key_hash, buckets, dk, dv, config.threads)?)
            }
        };
        tracing::debug!(
            device = %config.device,
            buckets,
            dsize_key = dk,
            dsize_value = dv,
            "hashmap created"
        );
        Ok(Self {
            device: config.device,
            dsize_key: dk,
            dsize_value: dv,
            max_load_factor: config.max_load_factor,
            backend,
            poisoned: false,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }
    pub fn dsize_key(&self) -> usize {
        self.dsize_key
    }
    pub fn dsize_value(&self) -> usize {
        self.dsize_value
    }
    pub fn len(&self) -> usize {
        self.backend.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn bucket_count(&self) -> usize {
        self.backend.bucket_count()
    }
    /// Total slots, including overflow slabs of the parallel device.
    pub fn capacity(&self) -> usize {
        self.backend.capacity()
    }
    pub fn load_factor(&self) -> f32 {
        self.len() as f32 / self.bucket_count() as f32
    }

    fn check(&self) -> Result<()> {
        if self.poisoned {
            return Err(HashmapError::Poisoned);
        }
        Ok(())
    }

    fn poison_on_err<T>(&mut self, r: Result<T>) -> Result<T> {
        if r.is_err() {
            self.poisoned = true;
        }
        r
    }

    fn threshold(&self, buckets: usize) -> usize {
        (buckets as f64 * self.max_load_factor as f64).floor() as usize
    }

    /// Rehashes ahead of an insert of `n` keys if the load threshold would
    /// be crossed. Counts every key in the batch, present or not.
    ///
    /// Below the threshold, a backend that cannot reuse erased slots is
    /// compacted in place once live entries, tombstones and the batch would
    /// claim more than `compaction_limit(buckets)` slots.
    fn grow_for(&mut self, n: usize) -> Result<()> {
        let needed = self.len().saturating_add(n);
        let buckets = self.bucket_count();
        if needed <= self.threshold(buckets) {
            let dead = self.backend.tombstones();
            if dead > 0 && needed.saturating_add(dead) > compaction_limit(buckets) {
                tracing::debug!(buckets, len = self.len(), tombstones = dead, "compacting");
                return self.rehash_to(buckets);
            }
            return Ok(());
        }
        let mut target = buckets.saturating_mul(2);
        while self.threshold(target) < needed && target <= MAX_SLOTS {
            target = target.saturating_mul(2);
        }
        if target > MAX_SLOTS {
            let r = Err(HashmapError::ResourceExhausted {
                slots: target,
                bytes: usize::MAX,
            });
            return self.poison_on_err(r);
        }
        tracing::debug!(from = buckets, to = target, len = self.len(), batch = n, "growing");
        self.rehash_to(target)
    }

    fn rehash_to(&mut self, buckets: usize) -> Result<()> {
        let r = self.backend.rehash(buckets);
        let r = self.poison_on_err(r);
        if r.is_ok() {
            tracing::debug!(buckets, len = self.len(), "rehashed");
        }
        r
    }

    /// Inserts `keys[i] -> values[i]` for keys not yet present.
    ///
    /// `masks[i]` is false when the key already existed (or appeared earlier
    /// in the batch); its handle then names the resident entry and its value
    /// is left untouched. May grow or compact the map first, which
    /// invalidates handles issued before this call.
    pub fn insert(&mut self, keys: &[u8], values: &[u8]) -> Result<(Vec<Handle>, Vec<bool>)> {
        let n = record_count("keys", keys, self.dsize_key)?;
        let mut handles = vec![Handle::INVALID; n];
        let mut masks = vec![false; n];
        self.insert_into(keys, values, &mut handles, &mut masks)?;
        Ok((handles, masks))
    }

    pub fn insert_into(
        &mut self,
        keys: &[u8],
        values: &[u8],
        handles: &mut [Handle],
        masks: &mut [bool],
    ) -> Result<()> {
        self.check()?;
        let n = record_count("keys", keys, self.dsize_key)?;
        expect_bytes("values", values, n, self.dsize_value)?;
        expect_len("handles", handles.len(), n)?;
        expect_len("masks", masks.len(), n)?;
        self.grow_for(n)?;
        let r = self.backend.insert(keys, values, handles, masks);
        self.poison_on_err(r)?;
        tracing::trace!(
            batch = n,
            inserted = masks.iter().filter(|&&m| m).count(),
            "insert"
        );
        Ok(())
    }

    pub fn find(&self, keys: &[u8]) -> Result<(Vec<Handle>, Vec<bool>)> {
        let n = record_count("keys", keys, self.dsize_key)?;
        let mut handles = vec![Handle::INVALID; n];
        let mut masks = vec![false; n];
        self.find_into(keys, &mut handles, &mut masks)?;
        Ok((handles, masks))
    }

    pub fn find_into(&self, keys: &[u8], handles: &mut [Handle], masks: &mut [bool]) -> Result<()> {
        self.check()?;
        let n = record_count("keys", keys, self.dsize_key)?;
        expect_len("handles", handles.len(), n)?;
        expect_len("masks", masks.len(), n)?;
        self.backend.find(keys, handles, masks);
        tracing::trace!(batch = n, found = masks.iter().filter(|&&m| m).count(), "find");
        Ok(())
    }

    pub fn contains(&self, keys: &[u8]) -> Result<Vec<bool>> {
        self.find(keys).map(|(_, masks)| masks)
    }

    /// `masks[i]` is true iff this call removed `keys[i]`.
    pub fn erase(&mut self, keys: &[u8]) -> Result<Vec<bool>> {
        let n = record_count("keys", keys, self.dsize_key)?;
        let mut masks = vec![false; n];
        self.erase_into(keys, &mut masks)?;
        Ok(masks)
    }

    pub fn erase_into(&mut self, keys: &[u8], masks: &mut [bool]) -> Result<()> {
        self.check()?;
        let n = record_count("keys", keys, self.dsize_key)?;
        expect_len("masks", masks.len(), n)?;
        self.backend.erase(keys, masks);
        tracing::trace!(batch = n, erased = masks.iter().filter(|&&m| m).count(), "erase");
        Ok(())
    }

    /// Rebuilds with `buckets` (rounded up to a power of two) and replays
    /// every live entry. Reclaims tombstones and overflow slabs; every handle
    /// issued before the call stops resolving.
    pub fn rehash(&mut self, buckets: usize) -> Result<()> {
        self.check()?;
        let target = buckets.checked_next_power_of_two().unwrap_or(usize::MAX);
        if buckets == 0 || target > MAX_SLOTS {
            return Err(HashmapError::invalid(format!(
                "bucket count {buckets} is outside 1..={MAX_SLOTS}"
            )));
        }
        if target < self.len() {
            return Err(HashmapError::invalid(format!(
                "{target} buckets cannot hold {} live entries",
                self.len()
            )));
        }
        self.rehash_to(target)
    }

    /// Drops every entry; the bucket count is kept and all handles go stale.
    pub fn clear(&mut self) -> Result<()> {
        self.check()?;
        let r = self.backend.clear();
        self.poison_on_err(r)
    }

    /// Handles of all live entries; the count is the vector's length.
    pub fn iterators(&self) -> Result<Vec<Handle>> {
        self.check()?;
        Ok(self.backend.iterators())
    }

    /// Gathers key and value bytes for the handles whose mask is set.
    /// Unselected, stale or erased handles yield zeroed records and
    /// `masks[i] = false` in the output.
    pub fn unpack(&self, handles: &[Handle], masks: &[bool]) -> Result<Unpacked> {
        let n = handles.len();
        let mut out = Unpacked {
            keys: vec![0; n * self.dsize_key],
            values: vec![0; n * self.dsize_value],
            masks: vec![false; n],
        };
        self.unpack_into(handles, masks, &mut out.keys, &mut out.values, &mut out.masks)?;
        Ok(out)
    }

    pub fn unpack_into(
        &self,
        handles: &[Handle],
        masks: &[bool],
        keys_out: &mut [u8],
        values_out: &mut [u8],
        out_masks: &mut [bool],
    ) -> Result<()> {
        self.check()?;
        let n = handles.len();
        expect_len("masks", masks.len(), n)?;
        expect_bytes("keys_out", keys_out, n, self.dsize_key)?;
        expect_bytes("values_out", values_out, n, self.dsize_value)?;
        expect_len("out_masks", out_masks.len(), n)?;
        self.backend.unpack(handles, masks, keys_out, values_out, out_masks);
        Ok(())
    }

    /// Overwrites the values of the entries named by selected handles.
    /// Returns which handles were live and written.
    pub fn assign(&mut self, handles: &[Handle], masks: &[bool], values: &[u8]) -> Result<Vec<bool>> {
        let mut out = vec![false; handles.len()];
        self.assign_into(handles, masks, values, &mut out)?;
        Ok(out)
    }

    pub fn assign_into(
        &mut self,
        handles: &[Handle],
        masks: &[bool],
        values: &[u8],
        out_masks: &mut [bool],
    ) -> Result<()> {
        self.check()?;
        let n = handles.len();
        expect_len("masks", masks.len(), n)?;
        expect_bytes("values", values, n, self.dsize_value)?;
        expect_len("out_masks", out_masks.len(), n)?;
        self.backend.assign(handles, masks, values, out_masks);
        Ok(())
    }
}

/// Claimed slots (live + tombstones) tolerated before a same-size rehash.
fn compaction_limit(buckets: usize) -> usize {
    buckets.saturating_add(buckets / 2)
}
