//! # Store Integration Tests
//!
//! End-to-end coverage of the public surface: round-trips, tree order under
//! mixed workloads, the two-stage deletion model, space reuse, lock
//! enforcement, vacuum, and crash-marker detection.

use tempfile::tempdir;

use burrowdb::{rebuild, Error, Key, Lifecycle, Metadata, Store};

fn create_test_store() -> (Store, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let mut store = Store::create(dir.path().join("store")).unwrap();
    store.seed_rng(1234);
    (store, dir)
}

fn payload_for(n: u64) -> Vec<u8> {
    format!("record-{n:08}-{}", "x".repeat((n % 40) as usize)).into_bytes()
}

fn fetch(store: &mut Store, key: &Key) -> Vec<u8> {
    let offset = store.get(key).unwrap();
    store.read_blob(offset).unwrap()
}

mod roundtrip_tests {
    use super::*;

    #[test]
    fn every_inserted_key_reads_back_exactly() {
        let (mut store, _dir) = create_test_store();

        for n in 0..500u64 {
            store
                .insert(Key::from_u64(n), Metadata::default(), &payload_for(n))
                .unwrap();
        }

        for n in 0..500u64 {
            assert_eq!(fetch(&mut store, &Key::from_u64(n)), payload_for(n));
        }
    }

    #[test]
    fn missing_keys_read_as_not_found() {
        let (mut store, _dir) = create_test_store();
        store
            .insert(Key::from_u64(1), Metadata::default(), b"one")
            .unwrap();

        assert!(matches!(
            store.get(&Key::from_u64(2)),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn marker_keys_store_no_payload() {
        let (mut store, _dir) = create_test_store();
        store
            .insert(Key::from_u64(1), Metadata::default(), b"")
            .unwrap();

        assert_eq!(store.get(&Key::from_u64(1)).unwrap(), 0);
        assert!(matches!(store.read_blob(0), Err(Error::Corruption { .. })));
    }

    #[test]
    fn duplicate_insert_leaves_value_unchanged() {
        let (mut store, _dir) = create_test_store();
        let key = Key::from_u64(1);
        store.insert(key, Metadata::default(), b"first").unwrap();

        let result = store.insert(key, Metadata::default(), b"second");

        assert!(matches!(result, Err(Error::AlreadyExists { .. })));
        assert_eq!(fetch(&mut store, &key), b"first");
    }
}

mod order_tests {
    use super::*;

    fn assert_sorted(store: &mut Store) {
        let keys = store.keys_in_order().unwrap();
        assert!(
            keys.windows(2).all(|w| w[0].0 < w[1].0),
            "in-order walk must yield strictly increasing keys"
        );
    }

    #[test]
    fn order_holds_under_interleaved_mutations() {
        let (mut store, _dir) = create_test_store();

        for n in 0..1000u64 {
            // Spread inserts around so node splits land mid-tree.
            let shuffled = (n * 7919) % 1000;
            store
                .insert(
                    Key::from_u64(shuffled),
                    Metadata::default(),
                    &payload_for(shuffled),
                )
                .unwrap();
        }
        assert_sorted(&mut store);

        for n in (0..1000u64).step_by(4) {
            store.delete(&Key::from_u64(n)).unwrap();
        }
        assert_sorted(&mut store);

        for n in (1..1000u64).step_by(4) {
            store.purge(&Key::from_u64(n)).unwrap();
        }
        assert_sorted(&mut store);

        // Soft-deleted entries remain in the walk; purged ones do not.
        assert_eq!(store.keys_in_order().unwrap().len(), 750);
    }
}

mod deletion_tests {
    use super::*;

    #[test]
    fn soft_delete_hides_but_preserves_the_record() {
        let (mut store, _dir) = create_test_store();
        let key = Key::from_u64(42);
        store.insert(key, Metadata::default(), b"soft target").unwrap();

        store.delete(&key).unwrap();

        assert!(matches!(store.get(&key), Err(Error::NotFound { .. })));
        let offset = store.get_force(&key).unwrap();
        assert_eq!(store.read_blob(offset).unwrap(), b"soft target");
        assert_eq!(
            store.keys_in_order().unwrap()[0].1.lifecycle,
            Lifecycle::Recycle
        );
    }

    #[test]
    fn purge_removes_even_the_forced_view() {
        let (mut store, _dir) = create_test_store();
        let key = Key::from_u64(42);
        store.insert(key, Metadata::default(), b"hard target").unwrap();

        store.purge(&key).unwrap();

        assert!(matches!(store.get(&key), Err(Error::NotFound { .. })));
        assert!(matches!(store.get_force(&key), Err(Error::NotFound { .. })));
    }

    #[test]
    fn purged_heap_block_is_reused_by_the_next_insert() {
        let (mut store, _dir) = create_test_store();
        let key = Key::from_u64(1);
        store.insert(key, Metadata::default(), &[7u8; 128]).unwrap();
        let freed_offset = store.get(&key).unwrap();

        store.purge(&key).unwrap();
        store
            .insert(Key::from_u64(2), Metadata::default(), &[9u8; 128])
            .unwrap();

        assert_eq!(store.get(&Key::from_u64(2)).unwrap(), freed_offset);
    }

    #[test]
    fn purge_of_missing_key_is_not_found() {
        let (mut store, _dir) = create_test_store();

        assert!(matches!(
            store.purge(&Key::from_u64(9)),
            Err(Error::NotFound { .. })
        ));
    }
}

mod space_reuse_tests {
    use super::*;

    #[test]
    fn dense_payload_reuses_the_freed_block() {
        let (mut store, _dir) = create_test_store();
        let key = Key::from_u64(1);
        store.insert(key, Metadata::default(), &[1u8; 100]).unwrap();
        let freed = store.get(&key).unwrap();
        store.purge(&key).unwrap();

        // 80 / 100 = 80% >= the 75% density threshold.
        store
            .insert(Key::from_u64(2), Metadata::default(), &[2u8; 80])
            .unwrap();

        assert_eq!(store.get(&Key::from_u64(2)).unwrap(), freed);
        assert_eq!(fetch(&mut store, &Key::from_u64(2)), vec![2u8; 80]);
    }

    #[test]
    fn sparse_payload_gets_a_fresh_block() {
        let (mut store, _dir) = create_test_store();
        let key = Key::from_u64(1);
        store.insert(key, Metadata::default(), &[1u8; 100]).unwrap();
        let freed = store.get(&key).unwrap();
        store.purge(&key).unwrap();

        // 60 / 100 = 60% < 75%: the freed block stays cached instead.
        store
            .insert(Key::from_u64(2), Metadata::default(), &[2u8; 60])
            .unwrap();

        assert_ne!(store.get(&Key::from_u64(2)).unwrap(), freed);
    }

    #[test]
    fn heap_chain_lists_fresh_allocations_newest_first() {
        let (mut store, _dir) = create_test_store();
        for n in 1..=3u64 {
            store
                .insert(Key::from_u64(n), Metadata::default(), &payload_for(n))
                .unwrap();
        }

        let chain = store.heap_chain().unwrap();

        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0], store.get(&Key::from_u64(3)).unwrap());
        assert_eq!(chain[2], store.get(&Key::from_u64(1)).unwrap());
    }
}

mod metadata_tests {
    use super::*;

    #[test]
    fn syslock_refuses_mutation_and_preserves_metadata() {
        let (mut store, _dir) = create_test_store();
        let key = Key::from_u64(5);
        let mut locked = Metadata::default();
        locked.syslock = true;
        locked.importance = 2;
        store.insert(key, locked, b"guarded").unwrap();

        let mut attempt = locked;
        attempt.importance = 8;

        assert!(matches!(
            store.set_metadata(&key, attempt),
            Err(Error::Locked { .. })
        ));
        assert_eq!(store.get_metadata(&key).unwrap().importance, 2);
        assert!(matches!(store.delete(&key), Err(Error::Locked { .. })));
    }

    #[test]
    fn unlocked_records_accept_metadata_rewrites() {
        let (mut store, _dir) = create_test_store();
        let key = Key::from_u64(5);
        store.insert(key, Metadata::default(), b"open").unwrap();

        let mut updated = Metadata::default();
        updated.importance = 9;
        updated.freeze = true;
        store.set_metadata(&key, updated).unwrap();

        assert_eq!(store.get_metadata(&key).unwrap(), updated);
    }

    #[test]
    fn update_replaces_payload_without_touching_metadata() {
        let (mut store, _dir) = create_test_store();
        let key = Key::from_u64(5);
        let mut meta = Metadata::default();
        meta.importance = 6;
        store.insert(key, meta, b"v1").unwrap();

        store.update(&key, b"v2 with more bytes").unwrap();

        assert_eq!(fetch(&mut store, &key), b"v2 with more bytes");
        assert_eq!(store.get_metadata(&key).unwrap().importance, 6);
    }
}

mod vacuum_tests {
    use super::*;

    #[test]
    fn rebuild_preserves_live_and_drops_recycled() {
        let (mut store, _dir) = create_test_store();
        for n in 0..400u64 {
            store
                .insert(Key::from_u64(n), Metadata::default(), &payload_for(n))
                .unwrap();
        }
        for n in (0..400u64).step_by(5) {
            store.delete(&Key::from_u64(n)).unwrap();
        }

        let dst_dir = tempdir().unwrap();
        let mut fresh = Store::create(dst_dir.path().join("fresh")).unwrap();
        rebuild(&mut store, &mut fresh).unwrap();

        for n in 0..400u64 {
            let key = Key::from_u64(n);
            if n % 5 == 0 {
                assert!(matches!(fresh.get(&key), Err(Error::NotFound { .. })));
                assert!(matches!(fresh.get_force(&key), Err(Error::NotFound { .. })));
            } else {
                assert_eq!(fetch(&mut fresh, &key), payload_for(n));
            }
        }
        assert_eq!(fresh.keys_in_order().unwrap().len(), 320);
    }

    #[test]
    fn rebuild_keeps_metadata_of_live_records() {
        let (mut store, _dir) = create_test_store();
        let key = Key::from_u64(1);
        let mut meta = Metadata::default();
        meta.importance = 5;
        meta.syslock = true;
        store.insert(key, meta, b"kept").unwrap();

        let dst_dir = tempdir().unwrap();
        let mut fresh = Store::create(dst_dir.path().join("fresh")).unwrap();
        rebuild(&mut store, &mut fresh).unwrap();

        assert_eq!(fresh.get_metadata(&key).unwrap(), meta);
        assert_eq!(fetch(&mut fresh, &key), b"kept");
    }
}

mod shutdown_tests {
    use super::*;

    #[test]
    fn clean_close_and_reopen_preserves_everything() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let mut store = Store::create(&path).unwrap();
            for n in 0..300u64 {
                store
                    .insert(Key::from_u64(n), Metadata::default(), &payload_for(n))
                    .unwrap();
            }
            store.delete(&Key::from_u64(11)).unwrap();
            store.close().unwrap();
        }

        let mut store = Store::open(&path).unwrap();

        assert!(store.was_clean_shutdown());
        assert_eq!(store.keys_in_order().unwrap().len(), 300);
        assert_eq!(fetch(&mut store, &Key::from_u64(12)), payload_for(12));
        assert!(matches!(
            store.get(&Key::from_u64(11)),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn skipped_close_is_detected_as_unclean() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let mut store = Store::create(&path).unwrap();
            store
                .insert(Key::from_u64(1), Metadata::default(), b"unflushed")
                .unwrap();
            // Dropped without close: the OPEN markers stay on disk.
        }

        let store = Store::open(&path).unwrap();

        assert!(!store.was_clean_shutdown());
    }

    #[test]
    fn unclean_store_recovers_through_rebuild() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let mut store = Store::create(&path).unwrap();
            for n in 0..50u64 {
                store
                    .insert(Key::from_u64(n), Metadata::default(), &payload_for(n))
                    .unwrap();
            }
        }

        let mut crashed = Store::open(&path).unwrap();
        assert!(!crashed.was_clean_shutdown());

        let dst_dir = tempdir().unwrap();
        let mut fresh = Store::create(dst_dir.path().join("recovered")).unwrap();
        rebuild(&mut crashed, &mut fresh).unwrap();

        for n in 0..50u64 {
            assert_eq!(fetch(&mut fresh, &Key::from_u64(n)), payload_for(n));
        }
        fresh.close().unwrap();
    }

    #[test]
    fn sync_checkpoints_without_closing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        let mut store = Store::create(&path).unwrap();
        store
            .insert(Key::from_u64(1), Metadata::default(), b"checkpointed")
            .unwrap();

        store.sync().unwrap();
        // More writes after the checkpoint re-dirty the store.
        store
            .insert(Key::from_u64(2), Metadata::default(), b"after")
            .unwrap();
        store.close().unwrap();

        let mut store = Store::open(&path).unwrap();
        assert!(store.was_clean_shutdown());
        assert_eq!(fetch(&mut store, &Key::from_u64(2)), b"after");
    }
}
