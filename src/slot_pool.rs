//! SlotPool: fixed-capacity storage of (key bytes, value bytes, state, version).
//!
//! Keys and values live in two contiguous byte slabs indexed by slot, so the
//! layout never depends on what the bytes mean. Each slot carries an atomic
//! state machine:
//!
//! ```text
//! Empty --claim--> Busy --fill--> Occupied --erase--> Tombstone
//!                                  |    ^
//!                                  lock  unlock   (value assignment)
//! ```
//!
//! Payload bytes of a slot are written only while its state is `Busy`, by the
//! thread that moved it there. The transition out of `Busy` is a release
//! store, so any reader that acquires `Occupied` sees the complete key and
//! value. Tombstones only return to `Empty` when the pool is rebuilt; the
//! sequential backend may reclaim them through `claim_from` because it holds
//! the pool exclusively.

use crate::error::{HashmapError, Result};
use crate::handle::{pack, Handle};
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub(crate) enum SlotState {
    Empty = 0,
    Busy = 1,
    Occupied = 2,
    Tombstone = 3,
}

impl SlotState {
    #[inline]
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SlotState::Empty,
            1 => SlotState::Busy,
            2 => SlotState::Occupied,
            _ => SlotState::Tombstone,
        }
    }
}

pub(crate) struct SlotPool {
    dsize_key: usize,
    dsize_value: usize,
    epoch: u32,
    /// Global index of this pool's first slot, as seen in handles.
    offset: usize,
    keys: Box<[UnsafeCell<u8>]>,
    values: Box<[UnsafeCell<u8>]>,
    states: Box<[AtomicU8]>,
    versions: Box<[AtomicU32]>,
}

// Payload cells are only written by the thread holding the slot in `Busy`
// (or through `&mut self`), and only read after an acquire of a published
// state; see the module docs.
unsafe impl Sync for SlotPool {}

fn try_boxed<T>(n: usize, slots: usize, bytes: usize, f: impl Fn() -> T) -> Result<Box<[T]>> {
    let mut v = Vec::new();
    if v.try_reserve_exact(n).is_err() {
        tracing::warn!(slots, bytes, "slot pool allocation failed");
        return Err(HashmapError::ResourceExhausted { slots, bytes });
    }
    v.extend((0..n).map(|_| f()));
    Ok(v.into_boxed_slice())
}

impl SlotPool {
    pub(crate) fn new(slots: usize, dsize_key: usize, dsize_value: usize, epoch: u32) -> Result<Self> {
        let per_slot = dsize_key
            .checked_add(dsize_value)
            .and_then(|w| w.checked_add(core::mem::size_of::<u8>() + core::mem::size_of::<u32>()));
        let bytes = per_slot.and_then(|w| w.checked_mul(slots));
        let (Some(key_bytes), Some(value_bytes), Some(bytes)) = (
            slots.checked_mul(dsize_key),
            slots.checked_mul(dsize_value),
            bytes,
        ) else {
            tracing::warn!(slots, "slot pool size overflows usize");
            return Err(HashmapError::ResourceExhausted {
                slots,
                bytes: usize::MAX,
            });
        };

        Ok(Self {
            dsize_key,
            dsize_value,
            epoch,
            offset: 0,
            keys: try_boxed(key_bytes, slots, bytes, || UnsafeCell::new(0u8))?,
            values: try_boxed(value_bytes, slots, bytes, || UnsafeCell::new(0u8))?,
            states: try_boxed(slots, slots, bytes, || AtomicU8::new(SlotState::Empty as u8))?,
            versions: try_boxed(slots, slots, bytes, || AtomicU32::new(0))?,
        })
    }

    /// Places this pool after `offset` slots of earlier pools.
    pub(crate) fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[inline]
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub(crate) fn epoch(&self) -> u32 {
        self.epoch
    }

    #[inline]
    pub(crate) fn state(&self, slot: usize) -> SlotState {
        SlotState::from_u8(self.states[slot].load(Ordering::Acquire))
    }

    /// Spins past a concurrent claim or assignment and returns the settled state.
    #[inline]
    pub(crate) fn settled_state(&self, slot: usize) -> SlotState {
        loop {
            match self.state(slot) {
                SlotState::Busy => core::hint::spin_loop(),
                s => return s,
            }
        }
    }

    #[inline]
    fn transition(&self, slot: usize, from: SlotState, to: SlotState) -> bool {
        self.states[slot]
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Empty -> Busy. The winner must follow up with [`fill`](Self::fill).
    #[inline]
    pub(crate) fn try_claim(&self, slot: usize) -> bool {
        self.transition(slot, SlotState::Empty, SlotState::Busy)
    }

    /// Like `try_claim` but from an arbitrary state; used to reclaim
    /// tombstones under exclusive access.
    #[inline]
    pub(crate) fn claim_from(&mut self, slot: usize, from: SlotState) -> bool {
        self.transition(slot, from, SlotState::Busy)
    }

    /// Writes key then value into a claimed slot, bumps its version and
    /// publishes it as Occupied. Returns the handle for the new entry.
    ///
    /// # Safety
    /// The caller must have moved `slot` to `Busy` via `try_claim` or
    /// `claim_from` and not yet published it.
    pub(crate) unsafe fn fill(&self, slot: usize, key: &[u8], value: &[u8]) -> Handle {
        debug_assert_eq!(self.state(slot), SlotState::Busy);
        Self::write(&self.keys, slot, self.dsize_key, key);
        Self::write(&self.values, slot, self.dsize_value, value);
        let version = self.versions[slot]
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1);
        self.states[slot].store(SlotState::Occupied as u8, Ordering::Release);
        Handle::new(self.offset + slot, self.epoch, version)
    }

    /// Occupied -> Tombstone.
    #[inline]
    pub(crate) fn try_erase(&self, slot: usize) -> bool {
        self.transition(slot, SlotState::Occupied, SlotState::Tombstone)
    }

    /// Overwrites the value of a live slot, spinning while another writer
    /// holds it. Returns false if the slot is no longer Occupied.
    pub(crate) fn assign(&self, slot: usize, value: &[u8]) -> bool {
        loop {
            if self.transition(slot, SlotState::Occupied, SlotState::Busy) {
                break;
            }
            if self.settled_state(slot) != SlotState::Occupied {
                return false;
            }
        }
        // SAFETY: this thread moved the slot to Busy above.
        unsafe { Self::write(&self.values, slot, self.dsize_value, value) };
        self.states[slot].store(SlotState::Occupied as u8, Ordering::Release);
        true
    }

    #[inline]
    pub(crate) fn generation(&self, slot: usize) -> u64 {
        pack(self.epoch, self.versions[slot].load(Ordering::Acquire))
    }

    /// Handle for the entry currently in `slot`.
    #[inline]
    pub(crate) fn handle(&self, slot: usize) -> Handle {
        Handle::new(
            self.offset + slot,
            self.epoch,
            self.versions[slot].load(Ordering::Acquire),
        )
    }

    /// Local slot index if `h` still names a live entry in this pool.
    #[inline]
    pub(crate) fn resolve(&self, h: Handle) -> Option<usize> {
        let slot = h.slot().checked_sub(self.offset)?;
        if slot >= self.len() || self.state(slot) != SlotState::Occupied {
            return None;
        }
        (self.generation(slot) == h.generation()).then_some(slot)
    }

    /// Key bytes of a published slot.
    ///
    /// # Safety
    /// `slot` must have been observed as Occupied or Tombstone, and no claim of
    /// it may start while the returned borrow is alive.
    #[inline]
    pub(crate) unsafe fn key(&self, slot: usize) -> &[u8] {
        Self::read(&self.keys, slot, self.dsize_key)
    }

    /// Value bytes of a published slot.
    ///
    /// # Safety
    /// As for [`key`](Self::key); additionally no `assign` of the slot may run
    /// concurrently.
    #[inline]
    pub(crate) unsafe fn value(&self, slot: usize) -> &[u8] {
        Self::read(&self.values, slot, self.dsize_value)
    }

    /// Occupied slots in index order.
    pub(crate) fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(move |&i| self.state(i) == SlotState::Occupied)
    }

    #[inline]
    unsafe fn read(buf: &[UnsafeCell<u8>], slot: usize, width: usize) -> &[u8] {
        let start = slot * width;
        let cells = &buf[start..start + width];
        core::slice::from_raw_parts(UnsafeCell::raw_get(cells.as_ptr()), width)
    }

    #[inline]
    unsafe fn write(buf: &[UnsafeCell<u8>], slot: usize, width: usize, src: &[u8]) {
        debug_assert_eq!(src.len(), width);
        let start = slot * width;
        let cells = &buf[start..start + width];
        core::ptr::copy_nonoverlapping(src.as_ptr(), UnsafeCell::raw_get(cells.as_ptr()), width);
    }
}
