mod common;

use common::{key, ram_tree, setup, value_for, QrSequence};
use micro_db::TreeConfig;

// Exercises live-page relocation under the tightest buffer budget: two
// buffers, four-page erase blocks, and enough churn to wrap the medium.
#[test]
fn test_wrap_around_recycling() {
    setup();
    let cfg = TreeConfig {
        num_buffers: 2,
        erase_block_pages: 4,
        ..Default::default()
    };
    let mut tree = ram_tree(16384, &cfg);

    for k in QrSequence::new(100_000, 0) {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }
    assert!(tree.wrapped_memory(), "medium never wrapped");

    let mut out = vec![0u8; cfg.data_size];
    for k in QrSequence::new(100_000, 1) {
        assert!(
            tree.get(&key(k), &mut out).unwrap(),
            "key {} lost across recycling",
            k
        );
        assert_eq!(out, value_for(k, cfg.data_size));
    }
    tree.check_integrity(false).unwrap();
}

#[test]
fn test_mapping_exhaustion_spills_to_disk_chains() {
    setup();
    let cfg = TreeConfig {
        num_buffers: 2,
        erase_block_pages: 4,
        mapping_capacity: 4,
        ..Default::default()
    };
    let mut tree = ram_tree(64, &cfg);

    for k in QrSequence::new(300, 0) {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }
    assert!(tree.wrapped_memory());
    assert!(
        tree.chain_writes() > 0,
        "a four-entry table under this churn must spill to next-id chains"
    );

    for k in 1..=300 {
        assert_eq!(
            tree.get_value(&key(k)).unwrap(),
            Some(value_for(k, cfg.data_size)),
            "key {} unreadable after chaining",
            k
        );
    }
    tree.check_integrity(false).unwrap();
}

#[test]
fn test_updates_survive_recycling() {
    setup();
    let cfg = TreeConfig {
        num_buffers: 2,
        erase_block_pages: 4,
        ..Default::default()
    };
    let mut tree = ram_tree(256, &cfg);

    // three full passes of overwrites keep the write head circling
    for round in 0..3u32 {
        for k in 1..=400 {
            tree.put(&key(k), &value_for(k * 10 + round, cfg.data_size))
                .unwrap();
        }
    }
    assert!(tree.wrapped_memory());

    for k in 1..=400 {
        assert_eq!(
            tree.get_value(&key(k)).unwrap(),
            Some(value_for(k * 10 + 2, cfg.data_size))
        );
    }
    tree.check_integrity(false).unwrap();
}

#[test]
fn test_stats_track_the_workload() {
    setup();
    let cfg = TreeConfig::default();
    let mut tree = ram_tree(512, &cfg);

    for k in 1..=200 {
        tree.put(&key(k), &value_for(k, cfg.data_size)).unwrap();
    }
    let mut out = vec![0u8; cfg.data_size];
    for k in 1..=200 {
        tree.get(&key(k), &mut out).unwrap();
    }

    let stats = tree.stats();
    assert!(stats.writes > 0);
    assert!(stats.reads > 0);
    assert!(stats.hits > 0);
    // the root leaf phase rewrites in place
    assert!(stats.overwrites > 0);
    tree.print_stats();
}
