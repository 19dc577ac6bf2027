#![cfg(test)]

// Property tests for Hashmap kept inside the crate so they can use the
// colliding test strategy and reach both backends through the facade.

use crate::key_hash::testing::ConstKeyHash;
use crate::{Device, Handle, Hashmap, HashmapConfig};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};

// Keys are indices into a small pool so batches hit duplicates and
// previously erased keys often.
#[derive(Clone, Debug)]
enum Op {
    Insert(Vec<(u32, u32)>),
    Find(Vec<u32>),
    Erase(Vec<u32>),
    Rehash(usize),
    Assign(u32, u32),
    Iterate,
    Clear,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let key = 0u32..24;
    let op = prop_oneof![
        4 => proptest::collection::vec((key.clone(), any::<u32>()), 0..12).prop_map(Op::Insert),
        2 => proptest::collection::vec(key.clone(), 0..12).prop_map(Op::Find),
        2 => proptest::collection::vec(key.clone(), 0..8).prop_map(Op::Erase),
        1 => (1usize..64).prop_map(Op::Rehash),
        1 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::Assign(k, v)),
        1 => Just(Op::Iterate),
        1 => Just(Op::Clear),
    ];
    proptest::collection::vec(op, 1..40)
}

fn bytes(ks: impl IntoIterator<Item = u32>) -> Vec<u8> {
    ks.into_iter().flat_map(u32::to_ne_bytes).collect()
}

fn words(b: &[u8]) -> Vec<u32> {
    b.chunks(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn snapshot(m: &Hashmap) -> BTreeMap<u32, u32> {
    let handles = m.iterators().unwrap();
    let out = m.unpack(&handles, &vec![true; handles.len()]).unwrap();
    assert!(out.masks.iter().all(|&x| x), "iterators must resolve");
    words(&out.keys).into_iter().zip(words(&out.values)).collect()
}

fn run(mut sut: Hashmap, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let sequential = sut.device() == Device::Sequential;
    let mut model: HashMap<u32, u32> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            Op::Insert(batch) => {
                let bucket_before = sut.bucket_count();
                let (handles, masks) = sut
                    .insert(&bytes(batch.iter().map(|p| p.0)), &bytes(batch.iter().map(|p| p.1)))
                    .unwrap();
                if sut.bucket_count() != bucket_before {
                    stale.clear();
                }
                let mut groups: HashMap<u32, Vec<usize>> = HashMap::new();
                for (i, (k, _)) in batch.iter().enumerate() {
                    groups.entry(*k).or_default().push(i);
                }
                for (k, idxs) in groups {
                    let winners: Vec<usize> = idxs.iter().copied().filter(|&i| masks[i]).collect();
                    if model.contains_key(&k) {
                        prop_assert!(winners.is_empty(), "present key {} must not re-insert", k);
                    } else {
                        prop_assert_eq!(winners.len(), 1, "exactly one claim for key {}", k);
                        if sequential {
                            prop_assert_eq!(winners[0], idxs[0], "first occurrence wins");
                        }
                        model.insert(k, batch[winners[0]].1);
                    }
                    let h = handles[idxs[0]];
                    prop_assert!(idxs.iter().all(|&i| handles[i] == h), "duplicates share a handle");
                }
            }
            Op::Find(keys) => {
                let (handles, masks) = sut.find(&bytes(keys.iter().copied())).unwrap();
                let out = sut.unpack(&handles, &masks).unwrap();
                for (i, k) in keys.iter().enumerate() {
                    prop_assert_eq!(masks[i], model.contains_key(k));
                    prop_assert_eq!(out.masks[i], masks[i]);
                    if let Some(v) = model.get(k) {
                        prop_assert_eq!(words(&out.values)[i], *v);
                    }
                }
            }
            Op::Erase(keys) => {
                let (handles, _) = sut.find(&bytes(keys.iter().copied())).unwrap();
                let masks = sut.erase(&bytes(keys.iter().copied())).unwrap();
                let mut seen = std::collections::HashSet::new();
                for (i, k) in keys.iter().enumerate() {
                    let expect = seen.insert(*k) && model.contains_key(k);
                    if sequential {
                        prop_assert_eq!(masks[i], expect);
                    }
                }
                for k in &keys {
                    let hits = keys
                        .iter()
                        .zip(&masks)
                        .filter(|&(kk, m)| kk == k && *m)
                        .count();
                    prop_assert_eq!(hits, model.contains_key(k) as usize);
                }
                for k in &keys {
                    model.remove(k);
                }
                stale.extend(handles.into_iter().filter(|h| !h.is_invalid()));
            }
            Op::Rehash(buckets) => {
                let target = buckets.next_power_of_two();
                let before = sut.iterators().unwrap();
                match sut.rehash(buckets) {
                    Ok(()) => {
                        prop_assert!(target >= model.len());
                        stale.clear();
                        stale.extend(before);
                    }
                    Err(_) => prop_assert!(target < model.len()),
                }
            }
            Op::Assign(k, v) => {
                let (handles, masks) = sut.find(&bytes([k])).unwrap();
                let out = sut.assign(&handles, &masks, &bytes([v])).unwrap();
                prop_assert_eq!(out[0], model.contains_key(&k));
                if let Some(slot) = model.get_mut(&k) {
                    *slot = v;
                }
            }
            Op::Iterate => {
                let got = snapshot(&sut);
                let want: BTreeMap<u32, u32> = model.iter().map(|(k, v)| (*k, *v)).collect();
                prop_assert_eq!(got, want);
            }
            Op::Clear => {
                stale.extend(sut.iterators().unwrap());
                sut.clear().unwrap();
                model.clear();
            }
        }

        // Stale handles never resolve, whatever happened since.
        if !stale.is_empty() {
            let out = sut.unpack(&stale, &vec![true; stale.len()]).unwrap();
            prop_assert!(out.masks.iter().all(|&x| !x), "stale handle resolved");
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }
    Ok(())
}

// Property: state-machine equivalence against std::collections::HashMap.
// Invariants exercised across random batch sequences on both devices:
// - One claim per distinct absent key; present keys never re-insert.
// - Find/unpack agree with the model; erase reports each key once.
// - Handles of erased entries, and all handles before a rehash/clear, go stale.
// - `iterators` enumerates exactly the model's entries.
proptest! {
    #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]
    #[test]
    fn prop_sequential_matches_model(ops in arb_ops()) {
        let m = Hashmap::new(HashmapConfig::new(4, 4, 4)).unwrap();
        run(m, ops)?;
    }

    #[test]
    fn prop_parallel_matches_model(ops in arb_ops()) {
        let m = Hashmap::new(HashmapConfig::new(4, 4, 4).device(Device::Parallel).threads(4)).unwrap();
        run(m, ops)?;
    }

    #[test]
    fn prop_colliding_hash_matches_model(ops in arb_ops(), parallel in any::<bool>()) {
        let device = if parallel { Device::Parallel } else { Device::Sequential };
        let m = Hashmap::with_key_hash(HashmapConfig::new(8, 4, 4).device(device), ConstKeyHash).unwrap();
        run(m, ops)?;
    }
}
