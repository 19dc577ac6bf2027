//! SequentialBackend: single-threaded slot pool with a host-side index.
//!
//! Keys are processed one at a time in batch order, so within one insert
//! batch the first occurrence of a key claims a slot and later duplicates see
//! it as already present. The index maps hashes to slot numbers; each slot's
//! hash is stored next to it so rebuilding the index never calls back into
//! the `KeyHash` strategy.
//!
//! Slot allocation: erased slots go on a free list and are reused before any
//! never-claimed slot, so a pool of `n` slots always holds `n` live entries.
//!
//! Not safe for concurrent external calls without an external lock; the
//! facade's `&mut self` methods enforce this.

use crate::backend::{record, Backend};
use crate::error::{HashmapError, Result};
use crate::handle::Handle;
use crate::key_hash::KeyHash;
use crate::slot_pool::{SlotPool, SlotState};
use hashbrown::HashTable;

pub(crate) struct SequentialBackend<H> {
    key_hash: H,
    dsize_key: usize,
    dsize_value: usize,
    pool: SlotPool,
    hashes: Vec<u64>,
    index: HashTable<u32>,
    free: Vec<u32>,
    next_fresh: usize,
    len: usize,
}

impl<H: KeyHash> SequentialBackend<H> {
    pub(crate) fn new(key_hash: H, buckets: usize, dsize_key: usize, dsize_value: usize) -> Result<Self> {
        let pool = SlotPool::new(buckets, dsize_key, dsize_value, 0)?;
        let (hashes, index) = Self::alloc_index(buckets)?;
        Ok(Self {
            key_hash,
            dsize_key,
            dsize_value,
            pool,
            hashes,
            index,
            free: Vec::new(),
            next_fresh: 0,
            len: 0,
        })
    }

    fn alloc_index(buckets: usize) -> Result<(Vec<u64>, HashTable<u32>)> {
        let exhausted = || HashmapError::ResourceExhausted {
            slots: buckets,
            bytes: buckets.saturating_mul(core::mem::size_of::<u64>() + core::mem::size_of::<u32>()),
        };
        let mut hashes = Vec::new();
        hashes.try_reserve_exact(buckets).map_err(|_| exhausted())?;
        hashes.resize(buckets, 0);
        let mut index = HashTable::new();
        // The table only ever holds slot numbers, so the hasher is never
        // consulted while it is empty.
        index.try_reserve(buckets, |_: &u32| 0).map_err(|_| exhausted())?;
        Ok((hashes, index))
    }

    fn lookup(&self, hash: u64, key: &[u8]) -> Option<usize> {
        let pool = &self.pool;
        self.index
            .find(hash, |&s| {
                // SAFETY: indexed slots are Occupied and no claim can start
                // while `self` is borrowed.
                self.key_hash.equal(unsafe { pool.key(s as usize) }, key)
            })
            .map(|&s| s as usize)
    }

    /// Next reusable slot: most recently erased first, then never-claimed.
    fn take_slot(&mut self) -> Option<(usize, SlotState)> {
        if let Some(s) = self.free.pop() {
            return Some((s as usize, SlotState::Tombstone));
        }
        if self.next_fresh < self.pool.len() {
            self.next_fresh += 1;
            return Some((self.next_fresh - 1, SlotState::Empty));
        }
        None
    }

    fn insert_one(&mut self, key: &[u8], value: &[u8]) -> (Handle, bool) {
        let hash = self.key_hash.hash(key);
        if let Some(s) = self.lookup(hash, key) {
            return (self.pool.handle(s), false);
        }
        let Some((slot, from)) = self.take_slot() else {
            debug_assert!(false, "facade must grow the pool before it fills");
            return (Handle::INVALID, false);
        };
        let claimed = self.pool.claim_from(slot, from);
        debug_assert!(claimed, "free slot {slot} was not {from:?}");
        // SAFETY: the slot was moved to Busy just above.
        let h = unsafe { self.pool.fill(slot, key, value) };
        self.hashes[slot] = hash;
        let hashes = &self.hashes;
        self.index
            .insert_unique(hash, slot as u32, |&s| hashes[s as usize]);
        self.len += 1;
        (h, true)
    }

    fn erase_one(&mut self, key: &[u8]) -> bool {
        let hash = self.key_hash.hash(key);
        let pool = &self.pool;
        let key_hash = &self.key_hash;
        // SAFETY: as in `lookup`.
        let entry = self
            .index
            .find_entry(hash, |&s| key_hash.equal(unsafe { pool.key(s as usize) }, key));
        let Ok(entry) = entry else {
            return false;
        };
        let (slot, _) = entry.remove();
        let erased = self.pool.try_erase(slot as usize);
        debug_assert!(erased);
        self.free.push(slot);
        self.len -= 1;
        true
    }

    /// Swaps in an empty pool of `buckets` slots and returns the old one.
    fn reset(&mut self, buckets: usize) -> Result<(SlotPool, Vec<u64>)> {
        let pool = SlotPool::new(
            buckets,
            self.dsize_key,
            self.dsize_value,
            self.pool.epoch().wrapping_add(1),
        )?;
        let (hashes, index) = Self::alloc_index(buckets)?;
        let old_pool = core::mem::replace(&mut self.pool, pool);
        let old_hashes = core::mem::replace(&mut self.hashes, hashes);
        self.index = index;
        self.free.clear();
        self.next_fresh = 0;
        self.len = 0;
        Ok((old_pool, old_hashes))
    }
}

impl<H: KeyHash> Backend for SequentialBackend<H> {
    fn insert(
        &mut self,
        keys: &[u8],
        values: &[u8],
        handles: &mut [Handle],
        masks: &mut [bool],
    ) -> Result<()> {
        for i in 0..handles.len() {
            let (h, ok) = self.insert_one(
                record(keys, self.dsize_key, i),
                record(values, self.dsize_value, i),
            );
            handles[i] = h;
            masks[i] = ok;
        }
        Ok(())
    }

    fn find(&self, keys: &[u8], handles: &mut [Handle], masks: &mut [bool]) {
        for i in 0..handles.len() {
            let key = record(keys, self.dsize_key, i);
            match self.lookup(self.key_hash.hash(key), key) {
                Some(s) => {
                    handles[i] = self.pool.handle(s);
                    masks[i] = true;
                }
                None => {
                    handles[i] = Handle::INVALID;
                    masks[i] = false;
                }
            }
        }
    }

    fn erase(&mut self, keys: &[u8], masks: &mut [bool]) {
        for (i, mask) in masks.iter_mut().enumerate() {
            *mask = self.erase_one(record(keys, self.dsize_key, i));
        }
    }

    fn rehash(&mut self, buckets: usize) -> Result<()> {
        debug_assert!(buckets >= self.len);
        let (old_pool, old_hashes) = self.reset(buckets)?;
        for s in old_pool.occupied() {
            let slot = self.next_fresh;
            self.next_fresh += 1;
            let claimed = self.pool.claim_from(slot, SlotState::Empty);
            debug_assert!(claimed);
            // SAFETY: `old_pool` is owned here, so nothing else touches it;
            // `slot` was claimed just above.
            unsafe { self.pool.fill(slot, old_pool.key(s), old_pool.value(s)) };
            let hash = old_hashes[s];
            self.hashes[slot] = hash;
            let hashes = &self.hashes;
            self.index
                .insert_unique(hash, slot as u32, |&k| hashes[k as usize]);
            self.len += 1;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let buckets = self.pool.len();
        self.reset(buckets).map(|_| ())
    }

    fn iterators(&self) -> Vec<Handle> {
        self.pool.occupied().map(|s| self.pool.handle(s)).collect()
    }

    fn locate(&self, h: Handle) -> Option<(&SlotPool, usize)> {
        self.pool.resolve(h).map(|s| (&self.pool, s))
    }

    fn dsize_key(&self) -> usize {
        self.dsize_key
    }

    fn dsize_value(&self) -> usize {
        self.dsize_value
    }

    fn len(&self) -> usize {
        self.len
    }

    fn bucket_count(&self) -> usize {
        self.pool.len()
    }

    fn capacity(&self) -> usize {
        self.pool.len()
    }
}
