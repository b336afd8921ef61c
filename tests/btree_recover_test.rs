mod common;

use common::{key, setup, value_for};
use micro_db::{BTree, FileMedium, TreeConfig};
use rand::seq::SliceRandom;

fn db_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("micro-db-{}-{}.db", name, std::process::id()))
}

#[test]
fn test_close_then_recover() {
    setup();
    let cfg = TreeConfig {
        num_buffers: 4,
        ..Default::default()
    };
    let path = db_path("recover");

    {
        let medium = FileMedium::create(&path, cfg.page_size, 4096).unwrap();
        let mut tree = BTree::open(medium, &cfg).unwrap();
        let mut keys: Vec<u32> = (1..=500).collect();
        keys.shuffle(&mut rand::thread_rng());
        for k in keys {
            tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
        }
        tree.close().unwrap();
    }

    let medium = FileMedium::open_existing(&path, cfg.page_size).unwrap();
    let mut tree = BTree::recover(medium, &cfg).unwrap();

    for k in 1..=500 {
        assert_eq!(
            tree.get_value(&key(k)).unwrap(),
            Some(value_for(k, cfg.data_size)),
            "key {} lost across recovery",
            k
        );
    }
    let records: Vec<_> = tree.range(None, None).unwrap().collect();
    assert_eq!(records.len(), 500);
    tree.check_integrity(false).unwrap();

    // the recovered tree keeps accepting writes
    for k in 501..=600 {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }
    for k in 1..=600 {
        assert!(tree.get_value(&key(k)).unwrap().is_some());
    }
    tree.close().unwrap();

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_recover_after_wrap() {
    setup();
    let cfg = TreeConfig {
        num_buffers: 2,
        erase_block_pages: 4,
        ..Default::default()
    };
    let path = db_path("recover-wrap");

    {
        let medium = FileMedium::create(&path, cfg.page_size, 256).unwrap();
        let mut tree = BTree::open(medium, &cfg).unwrap();
        for k in 1..=400 {
            tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
        }
        // a second pass of updates keeps the head circling
        for k in 1..=400 {
            tree.put(&key(k), &value_for(k + 7000, cfg.data_size)).unwrap();
        }
        assert!(tree.wrapped_memory());
        tree.close().unwrap();
    }

    let medium = FileMedium::open_existing(&path, cfg.page_size).unwrap();
    let mut tree = BTree::recover(medium, &cfg).unwrap();
    for k in 1..=400 {
        assert_eq!(
            tree.get_value(&key(k)).unwrap(),
            Some(value_for(k + 7000, cfg.data_size)),
            "key {} wrong after wrap + recovery",
            k
        );
    }
    tree.check_integrity(false).unwrap();
    tree.close().unwrap();

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_recover_twice_is_stable() {
    setup();
    let cfg = TreeConfig::default();
    let path = db_path("recover-twice");

    {
        let medium = FileMedium::create(&path, cfg.page_size, 1024).unwrap();
        let mut tree = BTree::open(medium, &cfg).unwrap();
        for k in 1..=200 {
            tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
        }
        tree.close().unwrap();
    }

    for _ in 0..2 {
        let medium = FileMedium::open_existing(&path, cfg.page_size).unwrap();
        let mut tree = BTree::recover(medium, &cfg).unwrap();
        for k in 1..=200 {
            assert_eq!(
                tree.get_value(&key(k)).unwrap(),
                Some(value_for(k, cfg.data_size))
            );
        }
        tree.close().unwrap();
    }

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_recover_without_a_root_fails() {
    setup();
    let cfg = TreeConfig::default();
    let path = db_path("recover-empty");

    // a medium that was never initialized has no root to find
    FileMedium::create(&path, cfg.page_size, 256).unwrap();
    let medium = FileMedium::open_existing(&path, cfg.page_size).unwrap();
    assert!(BTree::recover(medium, &cfg).is_err());

    std::fs::remove_file(&path).ok();
}
