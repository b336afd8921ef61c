mod common;

use common::{key, ram_tree, setup, value_for, QrSequence};
use micro_db::TreeConfig;
use rand::seq::SliceRandom;

#[test]
fn test_shuffled_dense_sequence() {
    setup();
    let cfg = TreeConfig {
        num_buffers: 4,
        ..Default::default()
    };
    let mut tree = ram_tree(2048, &cfg);

    let mut keys: Vec<u32> = (1..=500).collect();
    keys.shuffle(&mut rand::thread_rng());

    for (n, k) in keys.iter().enumerate() {
        tree.put(&key(*k), &value_for(*k, cfg.data_size)).unwrap();

        // every key inserted so far must stay reachable
        for earlier in &keys[..=n] {
            let got = tree.get_value(&key(*earlier)).unwrap();
            assert_eq!(
                got,
                Some(value_for(*earlier, cfg.data_size)),
                "key {} lost after inserting {}",
                earlier,
                k
            );
        }
    }
    tree.check_integrity(false).unwrap();

    let records: Vec<_> = tree
        .range(Some(&key(1)), Some(&key(500)))
        .unwrap()
        .collect();
    assert_eq!(records.len(), 500);
    for (i, (k, v)) in records.iter().enumerate() {
        let expect = i as u32 + 1;
        assert_eq!(k[..], key(expect)[..]);
        assert_eq!(v[..], value_for(expect, cfg.data_size)[..]);
    }
}

#[test]
fn test_insert_then_get() {
    setup();
    let cfg = TreeConfig::default();
    let mut tree = ram_tree(512, &cfg);

    tree.put(&key(42), &value_for(42, cfg.data_size)).unwrap();
    for k in 100..200 {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }
    assert_eq!(
        tree.get_value(&key(42)).unwrap(),
        Some(value_for(42, cfg.data_size))
    );
}

#[test]
fn test_last_write_wins() {
    setup();
    let cfg = TreeConfig::default();
    let mut tree = ram_tree(512, &cfg);

    // enough keys to push the tree past a single root leaf
    for k in 1..=100 {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }
    tree.put(&key(7), &value_for(7000, cfg.data_size)).unwrap();
    tree.put(&key(7), &value_for(7777, cfg.data_size)).unwrap();

    assert_eq!(
        tree.get_value(&key(7)).unwrap(),
        Some(value_for(7777, cfg.data_size))
    );

    // still exactly one record under that key
    let hits: Vec<_> = tree.range(Some(&key(7)), Some(&key(7))).unwrap().collect();
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_get_out_of_range() {
    setup();
    let cfg = TreeConfig::default();
    let mut tree = ram_tree(2048, &cfg);
    for k in 1..=500 {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }

    assert_eq!(tree.get_value(&key(0)).unwrap(), None);
    assert_eq!(tree.get_value(&key(u32::max_value())).unwrap(), None);
    assert_eq!(tree.get_value(&key(3_500_000)).unwrap(), None);
}

#[test]
fn test_sequential_fill_splits() {
    setup();
    let cfg = TreeConfig::default();
    let mut tree = ram_tree(512, &cfg);

    // a 512-byte page holds 31 records of 16 bytes
    for k in 1..=31 {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }
    assert_eq!(tree.levels(), 1);
    assert_eq!(tree.num_nodes(), 1);

    // one more record splits the root leaf
    tree.put(&key(32), &value_for(32, cfg.data_size)).unwrap();
    assert_eq!(tree.levels(), 2);
    assert_eq!(tree.num_nodes(), 3);

    for k in 33..=1000 {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }
    tree.check_integrity(true).unwrap();

    let records: Vec<_> = tree.range(None, None).unwrap().collect();
    assert_eq!(records.len(), 1000);
}

#[test]
fn test_capacity_error() {
    setup();
    // a two-page medium can hold the root and nothing else
    let cfg = TreeConfig {
        erase_block_pages: 1,
        ..Default::default()
    };
    let mut tree = ram_tree(2, &cfg);

    let err = tree.put(&key(1), &value_for(1, cfg.data_size)).unwrap_err();
    assert!(
        err.to_string().contains("capacity"),
        "unexpected error: {}",
        err
    );
}

#[test]
fn test_large_random_workload() {
    setup();
    let cfg = TreeConfig {
        num_buffers: 8,
        ..Default::default()
    };
    let mut tree = ram_tree(32768, &cfg);

    for k in QrSequence::new(100_000, 0) {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }

    // verify through an independently ordered stream over the same keys
    let mut out = vec![0u8; cfg.data_size];
    for k in QrSequence::new(100_000, 1) {
        assert!(tree.get(&key(k), &mut out).unwrap(), "key {} missing", k);
        assert_eq!(out, value_for(k, cfg.data_size));
    }
    tree.check_integrity(false).unwrap();
}
