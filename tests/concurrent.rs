//! # Concurrency Tests
//!
//! Readers traversing the live list while a writer churns records on
//! independent slots. Every payload a reader observes must have passed its
//! Adler-32 validation inside `read_data`; a record that vanishes mid-read
//! surfaces as an error or a terminated walk, never as torn data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::tempdir;

use stranddb::RecordStore;

fn padded(label: &str, capacity: usize) -> Vec<u8> {
    let mut data = label.as_bytes().to_vec();
    data.resize(capacity, b' ');
    data
}

#[test]
fn eight_readers_traverse_while_a_writer_churns() {
    let dir = tempdir().unwrap();
    let store = Arc::new(RecordStore::open(dir.path().join("churn.db")).unwrap());

    const STABLE: usize = 50;
    for i in 0..STABLE {
        store
            .create_record(&padded(&format!("stable-{i}"), 32))
            .unwrap();
    }

    let barrier = Arc::new(Barrier::new(9));
    let writer_done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let writer_done = Arc::clone(&writer_done);
            thread::spawn(move || {
                barrier.wait();
                while !writer_done.load(Ordering::Acquire) {
                    let mut cursor = store.first_record().expect("stable head must exist");
                    let mut seen = 0usize;
                    loop {
                        match cursor.read_data() {
                            Ok(payload) => {
                                // Checksum already validated inside
                                // read_data; check the payload is one of
                                // ours, not an interleaving of two writes.
                                assert!(
                                    payload.starts_with(b"stable-") || payload.starts_with(b"temp-"),
                                    "unexpected payload {:?}",
                                    String::from_utf8_lossy(&payload)
                                );
                                if payload.starts_with(b"stable-") {
                                    seen += 1;
                                }
                            }
                            // The record was deleted between the move and
                            // the read; only churned slots may do that.
                            Err(_) => assert!(seen >= STABLE, "a stable record vanished"),
                        }
                        if !cursor.next() {
                            break;
                        }
                    }
                    assert!(seen >= STABLE, "walk saw {seen} of {STABLE} stable records");
                }
            })
        })
        .collect();

    let writer = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        let writer_done = Arc::clone(&writer_done);
        thread::spawn(move || {
            barrier.wait();
            for round in 0..200 {
                let mut cursor = store
                    .create_record(&padded(&format!("temp-{round}"), 32))
                    .unwrap();
                assert!(store.remove_record(&mut cursor).unwrap());
            }
            writer_done.store(true, Ordering::Release);
        })
    };

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(store.total_records(), STABLE as u64);

    let mut cursor = store.first_record().unwrap();
    let mut count = 0;
    loop {
        assert!(cursor.read_data().unwrap().starts_with(b"stable-"));
        count += 1;
        if !cursor.next() {
            break;
        }
    }
    assert_eq!(count, STABLE);
}

#[test]
fn parallel_creators_on_one_store_keep_the_list_consistent() {
    let dir = tempdir().unwrap();
    let store = Arc::new(RecordStore::open(dir.path().join("parallel.db")).unwrap());

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..25 {
                    store
                        .create_record(&padded(&format!("t{t}-{i}"), 24))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.total_records(), 100);

    // Forward walk reaches every record exactly once.
    let mut offsets = Vec::new();
    let mut cursor = store.first_record().unwrap();
    loop {
        offsets.push(cursor.position());
        cursor.read_data().unwrap();
        if !cursor.next() {
            break;
        }
    }
    assert_eq!(offsets.len(), 100);
    let mut deduped = offsets.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(deduped.len(), 100);
}

/// Races in-place updates against a growth relocation of the same record.
/// The relocation holds the record's lock from its header read until the
/// old slot is free-listed, so every in-place update lands entirely before
/// it (and is superseded) or entirely after it (and fails on the deleted
/// slot); none may vanish mid-flight while still reporting success.
#[test]
fn same_record_updates_serialize_with_growth_relocation() {
    let dir = tempdir().unwrap();
    let store = Arc::new(RecordStore::open(dir.path().join("grow-race.db")).unwrap());

    let offset = store
        .create_record(&padded("seed", 32))
        .unwrap()
        .position();
    let grown = vec![0xB6u8; 64];

    let barrier = Arc::new(Barrier::new(2));

    let in_place = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let mut cursor = store.get_record(offset).unwrap();
            barrier.wait();
            let mut completed = 0u32;
            for i in 0..300 {
                if cursor.set_data(&padded(&format!("fit-{i}"), 32)).is_err() {
                    // The slot moved away underneath us; it stays deleted,
                    // so every retry must keep failing.
                    for _ in 0..3 {
                        assert!(cursor.set_data(&padded("retry", 32)).is_err());
                    }
                    break;
                }
                completed += 1;
            }
            completed
        })
    };

    let relocator = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        let grown = grown.clone();
        thread::spawn(move || {
            let mut cursor = store.get_record(offset).unwrap();
            barrier.wait();
            cursor.set_data(&grown).unwrap();
            cursor.position()
        })
    };

    let completed = in_place.join().unwrap();
    let new_offset = relocator.join().unwrap();
    assert!(completed <= 300);
    assert_ne!(new_offset, offset);

    // The relocated record is the single live record and carries exactly
    // the relocating writer's payload; the old slot is free.
    assert_eq!(store.total_records(), 1);
    assert_eq!(store.total_free_records(), 1);
    assert!(store.get_record(offset).is_none());

    let survivor = store.first_record().unwrap();
    assert_eq!(survivor.position(), new_offset);
    assert_eq!(survivor.read_data().unwrap(), grown);
}

/// Races in-place updates against removal of the same record. The removal
/// holds the record's lock across unlinking and free-listing, so an
/// update either completes before the delete or fails afterwards; a
/// successful update is never silently discarded mid-removal.
#[test]
fn same_record_updates_serialize_with_removal() {
    let dir = tempdir().unwrap();
    let store = Arc::new(RecordStore::open(dir.path().join("remove-race.db")).unwrap());

    let offset = store
        .create_record(&padded("victim", 32))
        .unwrap()
        .position();

    let barrier = Arc::new(Barrier::new(2));

    let in_place = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let mut cursor = store.get_record(offset).unwrap();
            barrier.wait();
            for i in 0..300 {
                if cursor.set_data(&padded(&format!("fit-{i}"), 32)).is_err() {
                    // Deleted underneath us; deletion is final.
                    for _ in 0..3 {
                        assert!(cursor.set_data(&padded("retry", 32)).is_err());
                    }
                    assert!(!cursor.is_valid());
                    break;
                }
            }
        })
    };

    let remover = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let mut cursor = store.get_record(offset).unwrap();
            barrier.wait();
            assert!(store.remove_record(&mut cursor).unwrap());
        })
    };

    in_place.join().unwrap();
    remover.join().unwrap();

    assert_eq!(store.total_records(), 0);
    assert_eq!(store.total_free_records(), 1);
    assert!(store.get_record(offset).is_none());
    assert!(store.first_record().is_none());

    // The freed slot survived the race intact: a fitting allocation
    // reuses it and round-trips cleanly.
    let recycled = store.create_record(&padded("recycled", 32)).unwrap();
    assert_eq!(recycled.position(), offset);
    assert_eq!(recycled.read_data().unwrap(), padded("recycled", 32));
}

#[test]
fn concurrent_point_readers_on_disjoint_records() {
    let dir = tempdir().unwrap();
    let store = Arc::new(RecordStore::open(dir.path().join("points.db")).unwrap());

    let offsets: Vec<u64> = (0..64)
        .map(|i| {
            store
                .create_record(&padded(&format!("point-{i}"), 48))
                .unwrap()
                .position()
        })
        .collect();

    let offsets = Arc::new(offsets);
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            let offsets = Arc::clone(&offsets);
            thread::spawn(move || {
                for round in 0..50 {
                    let index = (t * 7 + round * 13) % offsets.len();
                    let cursor = store.get_record(offsets[index]).unwrap();
                    let payload = cursor.read_data().unwrap();
                    assert!(payload.starts_with(format!("point-{index}").as_bytes()));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
