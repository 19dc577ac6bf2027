//! ParallelBackend: one rayon dispatch per batch, one logical worker per key.
//!
//! Slots live in one or more slabs, each a power-of-two `SlotPool`. A key's
//! probe sequence walks every slot of the first slab linearly from its home
//! bucket, then every slot of the next slab, and so on. Workers only ever
//! claim `Empty` slots (CAS Empty -> Busy), so a slot never becomes `Empty`
//! again within one pool generation. That gives two guarantees:
//!
//! - Find may stop at the first `Empty` slot: had the key been placed further
//!   along, that slot would already have been non-empty.
//! - Exactly one worker claims a given key. A worker that loses a CAS, or
//!   meets a `Busy` slot, waits for the slot to publish and compares keys, so
//!   it cannot walk past a slot that holds (or is about to hold) its own key.
//!
//! Tombstones are skipped and never reused here; a rehash reclaims them. The
//! facade compacts with a same-size rehash once tombstones pile up, which
//! bounds both the overflow slabs and the length of a missing key's probe.
//! Before an insert dispatch the backend makes sure at least one never-claimed
//! slot exists per key in the batch, appending an overflow slab if needed.
//! Every worker then finds a slot: it scans all slabs in full and each other
//! worker consumes at most one `Empty` slot.

use crate::backend::{record, records_mut, unpack_one, Backend};
use crate::config::MAX_SLOTS;
use crate::error::{HashmapError, Result};
use crate::handle::Handle;
use crate::key_hash::KeyHash;
use crate::slot_pool::{SlotPool, SlotState};
use rayon::prelude::*;
use std::sync::Arc;

/// Smallest overflow slab appended when never-claimed slots run out.
const MIN_OVERFLOW_SLAB: usize = 64;

pub(crate) struct ParallelBackend<H> {
    key_hash: H,
    dsize_key: usize,
    dsize_value: usize,
    /// `slabs[0]` is the primary bucket array; the rest are overflow.
    slabs: Vec<SlotPool>,
    len: usize,
    /// Slots that have left `Empty`: live entries plus tombstones.
    claimed: usize,
    threads: Option<Arc<rayon::ThreadPool>>,
}

impl<H: KeyHash> ParallelBackend<H> {
    pub(crate) fn new(
        key_hash: H,
        buckets: usize,
        dsize_key: usize,
        dsize_value: usize,
        threads: Option<usize>,
    ) -> Result<Self> {
        let threads = match threads {
            Some(n) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("byte-hashmap-{i}"))
                    .build()
                    .map_err(|e| HashmapError::DeviceUnavailable(e.to_string()))?,
            )),
            None => None,
        };
        Ok(Self {
            key_hash,
            dsize_key,
            dsize_value,
            slabs: vec![SlotPool::new(buckets, dsize_key, dsize_value, 0)?],
            len: 0,
            claimed: 0,
            threads,
        })
    }

    /// Runs `op` on the dedicated pool if there is one; blocks until done.
    fn dispatch<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.threads {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    fn epoch(&self) -> u32 {
        self.slabs[0].epoch()
    }

    /// Every slot a key may occupy, in probe order.
    fn probe(&self, hash: u64) -> impl Iterator<Item = (&SlotPool, usize)> + '_ {
        self.slabs.iter().flat_map(move |slab| {
            let mask = slab.len() - 1;
            let home = hash as usize & mask;
            (0..slab.len()).map(move |step| (slab, (home + step) & mask))
        })
    }

    /// Appends an overflow slab unless `n` never-claimed slots remain.
    fn reserve_fresh(&mut self, n: usize) -> Result<()> {
        let capacity = self.capacity();
        let fresh = capacity - self.claimed;
        if fresh >= n {
            return Ok(());
        }
        let size = (n - fresh).next_power_of_two().max(MIN_OVERFLOW_SLAB);
        if capacity + size > MAX_SLOTS {
            return Err(HashmapError::ResourceExhausted {
                slots: capacity + size,
                bytes: usize::MAX,
            });
        }
        let slab = SlotPool::new(size, self.dsize_key, self.dsize_value, self.epoch())?.with_offset(capacity);
        tracing::debug!(
            slab = self.slabs.len(),
            size,
            fresh,
            batch = n,
            "spilling into overflow slab"
        );
        self.slabs.push(slab);
        Ok(())
    }

    fn insert_one(&self, key: &[u8], value: &[u8]) -> (Handle, bool) {
        let hash = self.key_hash.hash(key);
        for (slab, s) in self.probe(hash) {
            if slab.state(s) == SlotState::Empty && slab.try_claim(s) {
                // SAFETY: the CAS above made this worker the slot's only writer.
                return (unsafe { slab.fill(s, key, value) }, true);
            }
            // Someone else holds the slot; wait for it to publish.
            if slab.settled_state(s) == SlotState::Occupied
                // SAFETY: the slot is published and Occupied slots are never
                // reclaimed during a dispatch.
                && self.key_hash.equal(unsafe { slab.key(s) }, key)
            {
                return (slab.handle(s), false);
            }
        }
        debug_assert!(false, "no free slot despite reserve_fresh");
        (Handle::INVALID, false)
    }

    fn find_one(&self, key: &[u8]) -> Option<(&SlotPool, usize)> {
        let hash = self.key_hash.hash(key);
        for (slab, s) in self.probe(hash) {
            match slab.settled_state(s) {
                SlotState::Empty => return None,
                // SAFETY: published and not reclaimable while `self` is shared.
                SlotState::Occupied if self.key_hash.equal(unsafe { slab.key(s) }, key) => {
                    return Some((slab, s));
                }
                _ => {}
            }
        }
        None
    }

    fn erase_one(&self, key: &[u8]) -> bool {
        // A concurrent eraser of the same key may win the transition; the key
        // is gone either way and only one worker reports it.
        self.find_one(key)
            .is_some_and(|(slab, s)| slab.try_erase(s))
    }

    /// Replaces all slabs with a single empty primary slab of the next epoch.
    fn reset(&mut self, buckets: usize) -> Result<Vec<SlotPool>> {
        let primary = SlotPool::new(
            buckets,
            self.dsize_key,
            self.dsize_value,
            self.epoch().wrapping_add(1),
        )?;
        self.len = 0;
        self.claimed = 0;
        Ok(core::mem::replace(&mut self.slabs, vec![primary]))
    }
}

impl<H: KeyHash> Backend for ParallelBackend<H> {
    fn insert(
        &mut self,
        keys: &[u8],
        values: &[u8],
        handles: &mut [Handle],
        masks: &mut [bool],
    ) -> Result<()> {
        self.reserve_fresh(handles.len())?;
        let (dk, dv) = (self.dsize_key, self.dsize_value);
        let this = &*self;
        let added: usize = this.dispatch(|| {
            handles
                .par_iter_mut()
                .zip(masks.par_iter_mut())
                .enumerate()
                .map(|(i, (h, m))| {
                    let (handle, ok) = this.insert_one(record(keys, dk, i), record(values, dv, i));
                    *h = handle;
                    *m = ok;
                    ok as usize
                })
                .sum()
        });
        self.len += added;
        self.claimed += added;
        Ok(())
    }

    fn find(&self, keys: &[u8], handles: &mut [Handle], masks: &mut [bool]) {
        let dk = self.dsize_key;
        self.dispatch(|| {
            handles
                .par_iter_mut()
                .zip(masks.par_iter_mut())
                .enumerate()
                .for_each(|(i, (h, m))| match self.find_one(record(keys, dk, i)) {
                    Some((slab, s)) => {
                        *h = slab.handle(s);
                        *m = true;
                    }
                    None => {
                        *h = Handle::INVALID;
                        *m = false;
                    }
                })
        });
    }

    fn erase(&mut self, keys: &[u8], masks: &mut [bool]) {
        let dk = self.dsize_key;
        let this = &*self;
        let erased: usize = this.dispatch(|| {
            masks
                .par_iter_mut()
                .enumerate()
                .map(|(i, m)| {
                    *m = this.erase_one(record(keys, dk, i));
                    *m as usize
                })
                .sum()
        });
        self.len -= erased;
    }

    fn rehash(&mut self, buckets: usize) -> Result<()> {
        debug_assert!(buckets >= self.len);
        let old = self.reset(buckets)?;
        let live: Vec<(usize, usize)> = old
            .iter()
            .enumerate()
            .flat_map(|(i, slab)| slab.occupied().map(move |s| (i, s)))
            .collect();
        let this = &*self;
        let placed: usize = this.dispatch(|| {
            live.par_iter()
                .map(|&(i, s)| {
                    // SAFETY: `old` is owned by this call and no longer shared.
                    let (key, value) = unsafe { (old[i].key(s), old[i].value(s)) };
                    this.insert_one(key, value).1 as usize
                })
                .sum()
        });
        debug_assert_eq!(placed, live.len());
        self.len = placed;
        self.claimed = placed;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let buckets = self.bucket_count();
        self.reset(buckets).map(|_| ())
    }

    fn iterators(&self) -> Vec<Handle> {
        self.dispatch(|| {
            self.slabs
                .par_iter()
                .flat_map_iter(|slab| slab.occupied().map(move |s| slab.handle(s)))
                .collect()
        })
    }

    fn locate(&self, h: Handle) -> Option<(&SlotPool, usize)> {
        // Offsets ascend from 0, so the owning slab is the last one starting
        // at or before the handle's slot.
        let i = self.slabs.partition_point(|slab| slab.offset() <= h.slot());
        let slab = self.slabs.get(i.checked_sub(1)?)?;
        slab.resolve(h).map(|s| (slab, s))
    }

    fn dsize_key(&self) -> usize {
        self.dsize_key
    }

    fn dsize_value(&self) -> usize {
        self.dsize_value
    }

    fn unpack(
        &self,
        handles: &[Handle],
        masks: &[bool],
        keys_out: &mut [u8],
        values_out: &mut [u8],
        out_masks: &mut [bool],
    ) {
        let n = handles.len();
        let keys = records_mut(keys_out, self.dsize_key, n);
        let values = records_mut(values_out, self.dsize_value, n);
        self.dispatch(|| {
            handles
                .par_iter()
                .zip(masks)
                .zip(keys)
                .zip(values)
                .zip(out_masks.par_iter_mut())
                .for_each(|((((&h, &m), k), v), out)| {
                    let found = if m { self.locate(h) } else { None };
                    *out = unpack_one(found, k, v);
                })
        });
    }

    fn assign(&mut self, handles: &[Handle], masks: &[bool], values: &[u8], out_masks: &mut [bool]) {
        let dv = self.dsize_value;
        let this = &*self;
        this.dispatch(|| {
            handles
                .par_iter()
                .zip(masks)
                .zip(out_masks.par_iter_mut())
                .enumerate()
                .for_each(|(i, ((&h, &m), out))| {
                    let found = if m { this.locate(h) } else { None };
                    // Duplicate handles serialise on the slot's Busy state.
                    *out = found.is_some_and(|(slab, s)| slab.assign(s, record(values, dv, i)));
                })
        });
    }

    fn len(&self) -> usize {
        self.len
    }

    fn tombstones(&self) -> usize {
        self.claimed - self.len
    }

    fn bucket_count(&self) -> usize {
        self.slabs[0].len()
    }

    fn capacity(&self) -> usize {
        self.slabs.iter().map(SlotPool::len).sum()
    }
}
