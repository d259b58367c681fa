use super::*;

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

fn validate_tree<P: Ord + Debug>(t: &Tree<P>) {
    if let Err(v) = t.verify() {
        panic!("tree invariant broken: {v}");
    }

    let items: Vec<&P> = t.iter().collect();
    assert_eq!(items.len(), t.len(), "in-order walk must see every live node");
    for pair in items.windows(2) {
        assert!(pair[0] < pair[1], "in-order walk must be strictly increasing");
    }

    let live = (0..t.slot_count() as NodeIndex)
        .filter(|&i| t.enum_slot(i).is_some())
        .count();
    assert_eq!(live, t.len(), "occupied slots must match Tree::len");
    assert!(t.slot_count() <= t.capacity());
    assert_eq!(t.root().is_none(), t.is_empty());
}

#[derive(Clone, Debug)]
enum TreeOp {
    Insert(u32),
    Delete(u32),
    Contains(u32),
    Compact,
    Shrink,
}

fn tree_ops_strategy() -> impl Strategy<Value = Vec<TreeOp>> {
    // A small key range keeps duplicates and hits on delete frequent.
    let key = 0u32..512;
    let op = prop_oneof![
        50 => key.clone().prop_map(TreeOp::Insert),
        30 => key.clone().prop_map(TreeOp::Delete),
        17 => key.prop_map(TreeOp::Contains),
        2 => Just(TreeOp::Compact),
        1 => Just(TreeOp::Shrink),
    ];
    prop::collection::vec(op, 0..=600)
}

#[derive(Clone, Debug)]
enum MapOp {
    Insert(i64, i64),
    Replace(i64, i64),
    Increment(i64, i64),
    Remove(i64),
    Get(i64),
    Shrink,
}

fn map_ops_strategy() -> impl Strategy<Value = Vec<MapOp>> {
    // Non-negative and small, so every integer map type accepts them.
    let key = 0i64..64;
    let value = 0i64..1000;
    let op = prop_oneof![
        35 => (key.clone(), value.clone()).prop_map(|(k, v)| MapOp::Insert(k, v)),
        15 => (key.clone(), value).prop_map(|(k, v)| MapOp::Replace(k, v)),
        15 => (key.clone(), 0i64..100).prop_map(|(k, d)| MapOp::Increment(k, d)),
        20 => key.clone().prop_map(MapOp::Remove),
        14 => key.prop_map(MapOp::Get),
        1 => Just(MapOp::Shrink),
    ];
    prop::collection::vec(op, 0..=400)
}

/// Key bytes for string-keyed maps. Zero padding keeps byte order equal to
/// numeric order, so one model serves every map type.
fn str_key(k: i64) -> Vec<u8> {
    format!("k{k:03}").into_bytes()
}

fn with_key<R>(map_type: MapType, k: i64, f: impl FnOnce(Key<'_>) -> R) -> R {
    if map_type.has_str_keys() {
        let bytes = str_key(k);
        f(Key::Str(&bytes))
    } else {
        f(Key::Int(k))
    }
}

fn with_value<R>(map_type: MapType, v: i64, f: impl FnOnce(Value<'_>) -> R) -> R {
    match map_type {
        MapType::IntStr | MapType::StrStr => {
            let text = format!("v{v}");
            f(Value::Str(text.as_bytes()))
        }
        MapType::IntPtr | MapType::StrPtr => f(Value::Opaque(Opaque(v as usize))),
        _ => f(Value::Int(v)),
    }
}

fn has_int_values(map_type: MapType) -> bool {
    matches!(
        map_type,
        MapType::I32I32 | MapType::U32U32 | MapType::IntInt | MapType::StrInt
    )
}

/// Read a stored value back as the model's integer.
fn observe(v: Value<'_>) -> i64 {
    match v {
        Value::Str(s) => std::str::from_utf8(&s[1..])
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(i64::MIN),
        Value::Opaque(p) => p.0 as i64,
        other => other.as_int().unwrap_or(i64::MIN),
    }
}

fn observe_key(k: Key<'_>) -> i64 {
    match k {
        Key::Str(s) => std::str::from_utf8(&s[1..])
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(i64::MIN),
        other => other.as_int().unwrap_or(i64::MIN),
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_tree_equivalence(ops in tree_ops_strategy()) {
        let mut t: Tree<u32> = Tree::new();
        let mut m: BTreeSet<u32> = BTreeSet::new();

        for op in ops {
            match op {
                TreeOp::Insert(k) => {
                    t.insert(k).unwrap();
                    m.insert(k);
                }
                TreeOp::Delete(k) => {
                    prop_assert_eq!(t.delete(&k), m.remove(&k));
                }
                TreeOp::Contains(k) => {
                    prop_assert_eq!(t.contains(&k), m.contains(&k));
                    prop_assert_eq!(t.locate(&k).copied(), m.get(&k).copied());
                }
                TreeOp::Compact => {
                    t.compact();
                    prop_assert_eq!(t.slot_count(), t.len());
                }
                TreeOp::Shrink => {
                    t.shrink();
                    prop_assert_eq!(t.slot_count(), t.len());
                }
            }

            prop_assert_eq!(t.len(), m.len());
            prop_assert!(t.verify().is_ok());
        }

        validate_tree(&t);
        let got: Vec<u32> = t.iter().copied().collect();
        let expected: Vec<u32> = m.iter().copied().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_map_equivalence(map_type in any::<MapType>(), ops in map_ops_strategy()) {
        let mut map = Map::new(map_type);
        let mut m: BTreeMap<i64, i64> = BTreeMap::new();

        for op in ops {
            match op {
                MapOp::Insert(k, v) => {
                    with_key(map_type, k, |key| with_value(map_type, v, |value| map.insert(key, value)))
                        .unwrap();
                    m.entry(k).or_insert(v);
                }
                MapOp::Replace(k, v) => {
                    with_key(map_type, k, |key| with_value(map_type, v, |value| map.replace(key, value)))
                        .unwrap();
                    m.insert(k, v);
                }
                MapOp::Increment(k, d) => {
                    let res = with_key(map_type, k, |key| map.increment(key, d));
                    if has_int_values(map_type) {
                        prop_assert!(res.is_ok());
                        *m.entry(k).or_insert(0) += d;
                    } else {
                        prop_assert_eq!(res, Err(Error::TypeMismatch { map_type }));
                    }
                }
                MapOp::Remove(k) => {
                    let removed = with_key(map_type, k, |key| map.remove(key));
                    prop_assert_eq!(removed, m.remove(&k).is_some());
                }
                MapOp::Get(k) => {
                    let got = with_key(map_type, k, |key| map.get(key).map(observe));
                    prop_assert_eq!(got, m.get(&k).copied());
                }
                MapOp::Shrink => map.shrink(),
            }
            prop_assert_eq!(map.len(), m.len());
            prop_assert!(map.verify().is_ok());
        }

        let got: Vec<(i64, i64)> = map.iter().map(|(k, v)| (observe_key(k), observe(v))).collect();
        let expected: Vec<(i64, i64)> = m.into_iter().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_map_clone_is_deep(map_type in any::<MapType>(), ops in map_ops_strategy()) {
        let mut map = Map::new(map_type);
        for op in ops {
            if let MapOp::Insert(k, v) = op {
                with_key(map_type, k, |key| with_value(map_type, v, |value| map.insert(key, value)))
                    .unwrap();
            }
        }
        let copy = map.try_clone().unwrap();
        let before: Vec<(i64, i64)> = map.iter().map(|(k, v)| (observe_key(k), observe(v))).collect();
        map.reset();
        prop_assert!(map.is_empty());
        let after: Vec<(i64, i64)> = copy.iter().map(|(k, v)| (observe_key(k), observe(v))).collect();
        prop_assert_eq!(before, after);
        prop_assert_eq!(copy.map_type(), map_type);
    }

    #[test]
    fn prop_routes_in_range(
        shards in 1usize..=32,
        int_keys in prop::collection::vec(any::<i64>(), 0..64),
        str_keys in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..40), 0..64),
    ) {
        let dm = ShardedMap::new(MapType::StrInt, shards, 0).unwrap();
        for k in int_keys {
            let r = dm.int_route(k);
            prop_assert!(r < shards);
            prop_assert_eq!(r, dm.int_route(k));
        }
        for k in str_keys {
            let r = dm.str_route(&k);
            prop_assert!(r < shards);
            prop_assert_eq!(r, dm.route(k.as_slice()));
        }
    }

    #[test]
    fn prop_str_route_ignores_suffix(
        shards in 1usize..=32,
        prefix in prop::collection::vec(any::<u8>(), 16),
        a in prop::collection::vec(any::<u8>(), 0..24),
        b in prop::collection::vec(any::<u8>(), 0..24),
    ) {
        let dm = ShardedMap::new(MapType::StrStr, shards, 0).unwrap();
        let ka: Vec<u8> = prefix.iter().chain(&a).copied().collect();
        let kb: Vec<u8> = prefix.iter().chain(&b).copied().collect();
        prop_assert_eq!(dm.str_route(&ka), dm.str_route(&kb));
    }

    #[test]
    fn prop_sharded_matches_model(
        shards in 1usize..=8,
        ops in map_ops_strategy(),
    ) {
        let mut dm = ShardedMap::new(MapType::IntInt, shards, 32).unwrap();
        let mut m: BTreeMap<i64, i64> = BTreeMap::new();

        for op in ops {
            match op {
                MapOp::Insert(k, v) => {
                    dm.insert(k, v).unwrap();
                    m.entry(k).or_insert(v);
                }
                MapOp::Replace(k, v) => {
                    dm.replace(k, v).unwrap();
                    m.insert(k, v);
                }
                MapOp::Increment(k, d) => {
                    dm.increment(k, d).unwrap();
                    *m.entry(k).or_insert(0) += d;
                }
                MapOp::Remove(k) => {
                    prop_assert_eq!(dm.remove(k), m.remove(&k).is_some());
                }
                MapOp::Get(k) => {
                    prop_assert_eq!(dm.get(k).and_then(Value::as_int), m.get(&k).copied());
                }
                MapOp::Shrink => dm.shrink(),
            }
            prop_assert!(dm.verify().is_ok());
        }

        prop_assert_eq!(dm.len(), m.len());
        prop_assert!(dm.verify().is_ok());
        prop_assert!(dm.verify_routing().is_ok());
        let mut got: Vec<(i64, i64)> = dm
            .iter()
            .map(|(k, v)| (observe_key(k), observe(v)))
            .collect();
        got.sort_unstable();
        let expected: Vec<(i64, i64)> = m.into_iter().collect();
        prop_assert_eq!(got, expected);
    }
}

/// Calls `f` with every ordering of `items`, generated in place by
/// successive swaps (Heap's algorithm).
fn permutations<T: Clone>(items: &[T], mut f: impl FnMut(&[T])) {
    let mut perm = items.to_vec();
    let mut counters = vec![0usize; perm.len()];
    f(&perm);
    let mut i = 1;
    while i < perm.len() {
        if counters[i] < i {
            let j = if i % 2 == 0 { 0 } else { counters[i] };
            perm.swap(j, i);
            f(&perm);
            counters[i] += 1;
            i = 1;
        } else {
            counters[i] = 0;
            i += 1;
        }
    }
}

#[test]
fn permutations_are_distinct_and_complete() {
    let mut seen = BTreeSet::new();
    permutations(&[1u8, 2, 3, 4, 5], |p| {
        assert!(seen.insert(p.to_vec()), "repeated ordering {p:?}");
    });
    assert_eq!(seen.len(), 120);
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<u8> = (1..=7).collect();

    permutations(&keys, |perm| {
        let mut t: Tree<u8> = Tree::new();
        for &k in perm {
            t.insert(k).unwrap();
            validate_tree(&t);
        }
        let got: Vec<u8> = t.iter().copied().collect();
        assert_eq!(got, keys);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys: Vec<u8> = (1..=7).collect();

    // Insert in a fixed order, then remove in all permutations.
    let mut base: Tree<u8> = Tree::new();
    for &k in &keys {
        base.insert(k).unwrap();
    }

    permutations(&keys, |perm| {
        let mut t = base.clone();
        let mut m: BTreeSet<u8> = keys.iter().copied().collect();

        for k in perm {
            assert_eq!(t.delete(k), m.remove(k));
            assert_eq!(t.len(), m.len());
            validate_tree(&t);
        }
        assert!(t.is_empty());
        assert!(t.root().is_none());

        // Every slot is vacant and queued for reuse.
        for k in (1..=7).rev() {
            t.insert(k).unwrap();
        }
        assert_eq!(t.slot_count(), 7);
        validate_tree(&t);
    });
}

#[test]
fn exhaustive_map_remove_order_str_keys() {
    let keys = ["a", "b", "c", "aa", "ab", "ba"];

    let mut base = Map::new(MapType::StrInt);
    for (i, k) in keys.iter().enumerate() {
        base.insert(*k, i as i64).unwrap();
    }

    permutations(&keys, |perm| {
        let mut map = base.clone();
        for (n, k) in perm.iter().enumerate() {
            assert!(map.remove(*k));
            assert_eq!(map.len(), keys.len() - n - 1);
            assert!(map.verify().is_ok());
        }
        assert!(map.is_empty());
    });
}
