mod common;

use common::{key, ram_tree, setup, value_for};
use itertools::Itertools;
use micro_db::TreeConfig;
use rand::seq::SliceRandom;

fn filled_tree(cfg: &TreeConfig, n: u32) -> micro_db::BTree<micro_db::RamMedium> {
    let mut tree = ram_tree(2048, cfg);
    let mut keys: Vec<u32> = (1..=n).collect();
    keys.shuffle(&mut rand::thread_rng());
    for k in keys {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }
    tree
}

#[test]
fn test_full_scan_yields_every_key_once() {
    setup();
    let cfg = TreeConfig::default();
    let mut tree = filled_tree(&cfg, 500);

    let keys: Vec<u32> = tree
        .range(None, None)
        .unwrap()
        .map(|(k, _)| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&k);
            u32::from_ne_bytes(b)
        })
        .collect();

    assert_eq!(keys.len(), 500);
    assert!(keys.iter().tuple_windows().all(|(a, b)| a < b));
    assert_eq!(keys.first(), Some(&1));
    assert_eq!(keys.last(), Some(&500));
}

#[test]
fn test_range_is_closed_on_both_ends() {
    setup();
    let cfg = TreeConfig::default();
    let mut tree = filled_tree(&cfg, 500);

    let records: Vec<_> = tree
        .range(Some(&key(40)), Some(&key(299)))
        .unwrap()
        .collect();
    assert_eq!(records.len(), 260);
    for (i, (k, v)) in records.iter().enumerate() {
        let expect = 40 + i as u32;
        assert_eq!(k[..], key(expect)[..]);
        assert_eq!(v[..], value_for(expect, cfg.data_size)[..]);
    }
}

#[test]
fn test_range_bounds_between_keys() {
    setup();
    let cfg = TreeConfig::default();
    let mut tree = ram_tree(512, &cfg);
    for k in (2..=100).step_by(2) {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }

    // bounds that match no record exactly
    let keys: Vec<_> = tree
        .range(Some(&key(5)), Some(&key(9)))
        .unwrap()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![key(6).to_vec(), key(8).to_vec()]);
}

#[test]
fn test_empty_ranges() {
    setup();
    let cfg = TreeConfig::default();
    let mut tree = filled_tree(&cfg, 500);

    assert_eq!(tree.range(Some(&key(501)), None).unwrap().count(), 0);
    assert_eq!(
        tree.range(Some(&key(200)), Some(&key(100))).unwrap().count(),
        0
    );

    let mut empty = ram_tree(512, &TreeConfig::default());
    assert_eq!(empty.range(None, None).unwrap().count(), 0);
}

#[test]
fn test_next_into_without_allocation() {
    setup();
    let cfg = TreeConfig::default();
    let mut tree = filled_tree(&cfg, 100);

    let mut k = [0u8; 4];
    let mut v = vec![0u8; cfg.data_size];
    let mut it = tree.range(Some(&key(90)), None).unwrap();
    let mut expect = 90;
    while it.next_into(&mut k, &mut v).unwrap() {
        assert_eq!(k, key(expect));
        assert_eq!(v, value_for(expect, cfg.data_size));
        expect += 1;
    }
    assert_eq!(expect, 101);
}
