//! Opaque iterator handles: a slot index plus the generation it was issued at.

/// Points at one slot of one pool generation.
///
/// The generation packs the pool epoch (bumped by rehash/clear) in the high
/// half and the slot's claim counter in the low half, so a handle stops
/// resolving once its slot is erased and reclaimed or the pool is rebuilt.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle {
    slot: u32,
    generation: u64,
}

impl Handle {
    /// Never resolves; returned alongside `mask = false`.
    pub const INVALID: Handle = Handle {
        slot: u32::MAX,
        generation: u64::MAX,
    };

    pub(crate) fn new(slot: usize, epoch: u32, version: u32) -> Self {
        debug_assert!(slot < u32::MAX as usize);
        Handle {
            slot: slot as u32,
            generation: pack(epoch, version),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot as usize
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::INVALID
    }
}

#[inline]
pub(crate) fn pack(epoch: u32, version: u32) -> u64 {
    ((epoch as u64) << 32) | version as u64
}
