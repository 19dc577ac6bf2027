//! Backend: the device contract shared by the sequential and parallel maps.
//!
//! The facade validates every buffer before calling in, so backends can rely
//! on these shapes for a batch of `n` keys:
//! - `keys.len() == n * dsize_key`, `values.len() == n * dsize_value`
//! - `handles.len() == masks.len() == n`
//! - unpack/assign buffers sized to the handle count
//!
//! Per-key conditions (missing key, duplicate key, stale handle) are written
//! into the masks and never abort the batch.

use crate::error::Result;
use crate::handle::Handle;
use crate::slot_pool::SlotPool;

pub(crate) trait Backend: Send + Sync {
    /// Inserts absent keys. Existing keys keep their value and report
    /// `mask = false` with the handle of the resident entry. Fails only if
    /// the backend had to allocate and could not.
    fn insert(&mut self, keys: &[u8], values: &[u8], handles: &mut [Handle], masks: &mut [bool])
        -> Result<()>;

    /// Read-only lookup; misses report `Handle::INVALID` and `mask = false`.
    fn find(&self, keys: &[u8], handles: &mut [Handle], masks: &mut [bool]);

    /// Turns live entries into tombstones; `mask = true` for each key erased
    /// by this call.
    fn erase(&mut self, keys: &[u8], masks: &mut [bool]);

    /// Rebuilds into a fresh pool of `buckets` slots and replays every live
    /// entry. All previously issued handles stop resolving.
    fn rehash(&mut self, buckets: usize) -> Result<()>;

    /// Drops every entry, keeping the bucket count. Handles go stale as for
    /// `rehash`.
    fn clear(&mut self) -> Result<()>;

    /// Handles of every live entry, in slot order.
    fn iterators(&self) -> Vec<Handle>;

    /// The pool and local slot a handle names, if it is still live.
    fn locate(&self, h: Handle) -> Option<(&SlotPool, usize)>;

    fn dsize_key(&self) -> usize;

    fn dsize_value(&self) -> usize;

    /// Gathers keys/values for the handles selected by `masks`. `out_masks`
    /// reports which handles resolved; other output records are zeroed.
    fn unpack(
        &self,
        handles: &[Handle],
        masks: &[bool],
        keys_out: &mut [u8],
        values_out: &mut [u8],
        out_masks: &mut [bool],
    ) {
        let (dk, dv) = (self.dsize_key(), self.dsize_value());
        for (i, (&h, &m)) in handles.iter().zip(masks).enumerate() {
            let found = if m { self.locate(h) } else { None };
            out_masks[i] = unpack_one(
                found,
                &mut keys_out[i * dk..(i + 1) * dk],
                &mut values_out[i * dv..(i + 1) * dv],
            );
        }
    }

    /// Scatters `values` into the entries named by the selected handles.
    fn assign(&mut self, handles: &[Handle], masks: &[bool], values: &[u8], out_masks: &mut [bool]) {
        let dv = self.dsize_value();
        for (i, (&h, &m)) in handles.iter().zip(masks).enumerate() {
            let found = if m { self.locate(h) } else { None };
            out_masks[i] = found.is_some_and(|(pool, slot)| pool.assign(slot, record(values, dv, i)));
        }
    }

    /// Live entries.
    fn len(&self) -> usize;

    /// Erased slots that still lengthen probe sequences and that only a
    /// rehash can reclaim.
    fn tombstones(&self) -> usize {
        0
    }

    /// Primary bucket count, a power of two.
    fn bucket_count(&self) -> usize;

    /// Total slots, including any overflow slabs.
    fn capacity(&self) -> usize;
}

/// The `i`th `width`-byte record of `buf`.
#[inline]
pub(crate) fn record(buf: &[u8], width: usize, i: usize) -> &[u8] {
    &buf[i * width..(i + 1) * width]
}

/// Splits `buf` into `n` disjoint records; works for zero-width records too.
pub(crate) fn records_mut(buf: &mut [u8], width: usize, n: usize) -> Vec<&mut [u8]> {
    if width == 0 {
        return (0..n).map(|_| <&mut [u8]>::default()).collect();
    }
    buf.chunks_mut(width).collect()
}

/// Copies one resolved entry out, or zeroes the output records.
#[inline]
pub(crate) fn unpack_one(found: Option<(&SlotPool, usize)>, key_out: &mut [u8], value_out: &mut [u8]) -> bool {
    match found {
        Some((pool, slot)) => {
            // SAFETY: `locate` only returns Occupied slots, and unpack runs
            // under `&self`, where no claim or assignment can be in flight.
            unsafe {
                key_out.copy_from_slice(pool.key(slot));
                value_out.copy_from_slice(pool.value(slot));
            }
            true
        }
        None => {
            key_out.fill(0);
            value_out.fill(0);
            false
        }
    }
}
