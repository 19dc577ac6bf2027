//! byte-hashmap: a batched, fixed-layout key/value hashmap over raw bytes,
//! with a sequential and a parallel backend behind one contract.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: one associative structure for geometry pipelines (voxel hashing,
//!   point deduplication, correspondence lookup) that behaves the same on a
//!   single thread and on a massively parallel device.
//! - Layers:
//!   - SlotPool: fixed-capacity slabs of key bytes, value bytes, an atomic
//!     per-slot state (Empty/Busy/Occupied/Tombstone) and a claim counter.
//!   - Backend: the device contract. `SequentialBackend` walks keys in batch
//!     order over a `hashbrown::HashTable` index; `ParallelBackend` runs one
//!     rayon worker per key with CAS slot claims and linear probing.
//!   - Hashmap: public facade. Validates buffers, grows by load factor,
//!     and dispatches to the backend chosen at construction.
//!
//! Constraints
//! - Keys and values are opaque `dsize_key`/`dsize_value` byte records;
//!   meaning lives only in the injected `KeyHash` strategy.
//! - Unique keys: at most one Occupied slot per key, on both backends.
//! - Batched: N keys in, N handles and N masks out. Per-key conditions never
//!   abort a batch; only structural errors do.
//! - Unordered: neither iteration nor slot placement follows key order.
//!
//! Handles and generations
//! - A `Handle` is a slot index plus the generation it was issued at: the
//!   pool epoch (bumped by rehash/clear) and the slot's claim counter. A
//!   handle whose generation no longer matches resolves to nothing, so stale
//!   handles read as `mask = false` instead of returning another entry.
//!
//! Duplicate keys within one insert batch
//! - Exactly one occurrence claims the slot; every other occurrence reports
//!   `mask = false` with the winner's handle. The sequential backend always
//!   picks the first occurrence; on the parallel backend the winner is
//!   whichever worker's CAS lands first.
//!
//! Concurrency
//! - Mutating calls take `&mut self`; read-only calls (`find`, `unpack`,
//!   `iterators`) take `&self` and may run concurrently with each other.
//! - Each parallel call is one blocking dispatch; there is no pipelining
//!   across calls and no cancellation.
//!
//! Notes and non-goals
//! - No persistence and no ordering guarantee among keys.
//! - Rehash, explicit or from growth, invalidates every outstanding handle.
//!   So does the same-size compaction that reclaims parallel tombstones.
//! - A failed allocation during growth or rehash poisons the instance.

mod backend;
mod config;
mod error;
mod handle;
mod hashmap;
mod key_hash;
mod parallel;
mod sequential;
mod slot_pool;

#[cfg(test)]
mod hashmap_proptest;

// Public surface
pub use config::{Device, HashmapConfig, DEFAULT_MAX_LOAD_FACTOR};
pub use error::{HashmapError, Result};
pub use handle::Handle;
pub use hashmap::{Hashmap, Unpacked};
pub use key_hash::{DefaultKeyHash, KeyHash};
