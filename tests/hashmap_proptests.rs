// Hashmap property tests across devices.
//
// Property 1: device equivalence.
//  - Setup: one map per device, same config, fed the same batches.
//  - Batches carry distinct keys, so the result of each call is fully
//    determined and both devices must report identical masks.
//  - Operations: insert batch, erase batch, find batch, rehash.
//  - At the end: both maps enumerate the same (key, value) pairs.
//
// Property 2: growth never loses entries.
//  - Model: BTreeMap of everything inserted (first write wins).
//  - Invariant: after each batch, every model key is found with its value
//    and load_factor() <= max_load_factor.
use byte_hashmap::{Device, Hashmap, HashmapConfig};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug)]
enum Op {
    Insert(BTreeSet<u16>, u32),
    Erase(BTreeSet<u16>),
    Find(BTreeSet<u16>),
    Rehash(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    let set = || proptest::collection::btree_set(any::<u16>().prop_map(|k| k % 256), 0..48);
    prop_oneof![
        4 => (set(), any::<u32>()).prop_map(|(s, v)| Op::Insert(s, v)),
        2 => set().prop_map(Op::Erase),
        2 => set().prop_map(Op::Find),
        1 => (1usize..1024).prop_map(Op::Rehash),
    ]
}

fn keys(s: &BTreeSet<u16>) -> Vec<u8> {
    s.iter().flat_map(|k| k.to_le_bytes()).collect()
}

fn contents(m: &Hashmap) -> BTreeMap<u16, u32> {
    let it = m.iterators().unwrap();
    let out = m.unpack(&it, &vec![true; it.len()]).unwrap();
    out.keys
        .chunks(2)
        .zip(out.values.chunks(4))
        .map(|(k, v)| (u16::from_le_bytes([k[0], k[1]]), u32::from_le_bytes([v[0], v[1], v[2], v[3]])))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    // Property 1: sequential and parallel agree batch by batch.
    #[test]
    fn prop_devices_agree(ops in proptest::collection::vec(arb_op(), 1..32)) {
        let cfg = HashmapConfig::new(8, 2, 4);
        let mut seq = Hashmap::new(cfg.clone()).unwrap();
        let mut par = Hashmap::new(cfg.device(Device::Parallel).threads(4)).unwrap();

        for op in ops {
            match op {
                Op::Insert(s, base) => {
                    let vs: Vec<u8> = (0..s.len() as u32)
                        .flat_map(|i| base.wrapping_add(i).to_le_bytes())
                        .collect();
                    let a = seq.insert(&keys(&s), &vs).unwrap().1;
                    let b = par.insert(&keys(&s), &vs).unwrap().1;
                    prop_assert_eq!(a, b);
                }
                Op::Erase(s) => {
                    prop_assert_eq!(seq.erase(&keys(&s)).unwrap(), par.erase(&keys(&s)).unwrap());
                }
                Op::Find(s) => {
                    prop_assert_eq!(seq.contains(&keys(&s)).unwrap(), par.contains(&keys(&s)).unwrap());
                }
                Op::Rehash(n) => {
                    prop_assert_eq!(seq.rehash(n).is_ok(), par.rehash(n).is_ok());
                    prop_assert_eq!(seq.bucket_count(), par.bucket_count());
                }
            }
            prop_assert_eq!(seq.len(), par.len());
        }
        prop_assert_eq!(contents(&seq), contents(&par));
    }

    // Property 2: entries survive any amount of growth.
    #[test]
    fn prop_growth_keeps_entries(
        batches in proptest::collection::vec(proptest::collection::vec(any::<u16>(), 0..200), 1..12),
        parallel in any::<bool>(),
        factor in 0.25f32..=1.0,
    ) {
        let device = if parallel { Device::Parallel } else { Device::Sequential };
        let mut m = Hashmap::new(HashmapConfig::new(2, 2, 4).device(device).max_load_factor(factor)).unwrap();
        let mut model: BTreeMap<u16, u32> = BTreeMap::new();

        for (round, batch) in batches.iter().enumerate() {
            let ks: Vec<u8> = batch.iter().flat_map(|k| k.to_le_bytes()).collect();
            let vs: Vec<u8> = batch.iter().flat_map(|_| (round as u32).to_le_bytes()).collect();
            let (_, masks) = m.insert(&ks, &vs).unwrap();
            let distinct: BTreeSet<u16> = batch.iter().copied().filter(|k| !model.contains_key(k)).collect();
            prop_assert_eq!(masks.iter().filter(|&&x| x).count(), distinct.len());
            for k in batch {
                model.entry(*k).or_insert(round as u32);
            }
            prop_assert_eq!(m.len(), model.len());
            prop_assert!(m.load_factor() <= factor);
        }
        prop_assert_eq!(contents(&m), model);
    }
}
