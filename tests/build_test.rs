use rand::prelude::*;
use stripemap::{Error, MapConfig, StripedMap};

fn random_pairs(seed: u64, n: usize, key_space: u32) -> Vec<(String, i32)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let key = format!("user{}", rng.gen_range(0..key_space));
            (key, rng.gen())
        })
        .collect()
}

fn sorted(mut pairs: Vec<(String, i32)>) -> Vec<(String, i32)> {
    pairs.sort();
    pairs
}

#[test]
fn build_matches_sequential_insert() {
    // plenty of duplicates so last-write-wins matters
    let pairs = random_pairs(42, 50_000, 10_000);

    let sequential = StripedMap::new();
    for (k, v) in &pairs {
        sequential.insert(k, *v);
    }

    let built = StripedMap::build(pairs.clone());
    assert_eq!(built.size(), sequential.size());
    for (k, _) in &pairs {
        assert_eq!(built.search(k), sequential.search(k));
    }
    assert_eq!(sorted(built.snapshot()), sorted(sequential.snapshot()));
    assert_eq!(built.min(), sequential.min());
    assert_eq!(built.max(), sequential.max());
}

#[test]
fn build_last_duplicate_wins() {
    let pairs = vec![
        ("a".to_string(), 1),
        ("b".to_string(), 2),
        ("a".to_string(), 3),
        ("c".to_string(), 4),
        ("b".to_string(), 5),
        ("a".to_string(), 6),
    ];
    let config = MapConfig {
        buckets: 16,
        stripes: 4,
        build_threads: 3,
    };
    let map = StripedMap::build_with_config(pairs, config).unwrap();
    assert_eq!(map.size(), 3);
    assert_eq!(map.search("a"), Ok(6));
    assert_eq!(map.search("b"), Ok(5));
    assert_eq!(map.search("c"), Ok(4));
}

#[test]
fn build_sizes_from_input() {
    let pairs = random_pairs(7, 200_000, u32::MAX);
    let map = StripedMap::build(pairs);
    assert_eq!(map.bucket_count(), 200_000 / 20);
    assert!(map.stripe_count() < map.bucket_count());
}

#[test]
fn build_edge_inputs() {
    let empty = StripedMap::build(Vec::new());
    assert!(empty.is_empty());
    assert_eq!(empty.min(), None);

    let one = StripedMap::build(vec![("solo".to_string(), -1)]);
    assert_eq!(one.size(), 1);
    assert_eq!(one.search("solo"), Ok(-1));

    // more threads than pairs
    let config = MapConfig {
        buckets: 64,
        stripes: 8,
        build_threads: 32,
    };
    let few = StripedMap::build_with_config(
        vec![("x".to_string(), 1), ("y".to_string(), 2)],
        config,
    )
    .unwrap();
    assert_eq!(few.size(), 2);
}

#[test]
fn build_rejects_bad_config() {
    let config = MapConfig {
        buckets: 4,
        stripes: 4,
        build_threads: 1,
    };
    let err = StripedMap::build_with_config(vec![], config).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn built_map_accepts_live_operations() {
    let pairs: Vec<(String, i32)> = (0..10_000).map(|i| (format!("n{}", i), i)).collect();
    let map = StripedMap::build(pairs);
    assert_eq!(map.size(), 10_000);

    map.insert("n0", 123_456);
    assert_eq!(map.delete("n9999"), Ok(9_999));
    assert_eq!(map.size(), 9_999);
    assert_eq!(map.max(), Some(123_456));
    assert_eq!(map.min(), Some(1));
}
