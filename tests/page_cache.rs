//! # Page Cache Integration Tests
//!
//! The cache is exercised directly here (no record layer): durability
//! round trips through flush/reopen, byte-range splitting across page
//! boundaries, eviction pressure beyond the pool capacity, and concurrent
//! access from multiple threads.

use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::tempdir;

use stranddb::{PageCache, MIN_CACHE_SIZE, PAGE_SIZE};

fn patterned_page(seed: u64) -> Vec<u8> {
    (0..PAGE_SIZE)
        .map(|i| (seed.wrapping_mul(31).wrapping_add(i as u64) % 251) as u8)
        .collect()
}

mod durability_tests {
    use super::*;

    #[test]
    fn every_page_round_trips_through_flush_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.db");
        let pages = 48u64;

        {
            let cache = PageCache::open(&path, false, MIN_CACHE_SIZE).unwrap();
            for page in 0..pages {
                cache.write_page(page, &patterned_page(page)).unwrap();
            }
            cache.flush().unwrap();
        }

        let cache = PageCache::open(&path, false, MIN_CACHE_SIZE).unwrap();
        for page in 0..pages {
            let mut out = vec![0u8; PAGE_SIZE];
            assert_eq!(cache.read_page(page, &mut out).unwrap(), PAGE_SIZE);
            assert_eq!(out, patterned_page(page), "page {page}");
        }
    }

    #[test]
    fn byte_writes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bytes.db");

        let span_start = 3 * PAGE_SIZE as u64 - 100;
        let payload: Vec<u8> = (0..200u8).collect();

        {
            let cache = PageCache::open(&path, false, MIN_CACHE_SIZE).unwrap();
            cache.write(span_start, &payload).unwrap();
            cache.flush().unwrap();
        }

        let cache = PageCache::open(&path, false, MIN_CACHE_SIZE).unwrap();
        let mut out = vec![0u8; payload.len()];
        assert_eq!(cache.read(span_start, &mut out).unwrap(), payload.len());
        assert_eq!(out, payload);
    }
}

mod eviction_tests {
    use super::*;

    #[test]
    fn working_set_larger_than_pool_stays_correct() {
        let dir = tempdir().unwrap();
        let cache = PageCache::open(dir.path().join("evict.db"), false, MIN_CACHE_SIZE).unwrap();
        let frames = (cache.cache_size() / PAGE_SIZE) as u64;
        let pages = frames * 4;

        for page in 0..pages {
            cache.write_page(page, &patterned_page(page)).unwrap();
        }

        // Reads force evicted pages back in through the gate.
        for page in 0..pages {
            let mut out = vec![0u8; PAGE_SIZE];
            assert_eq!(cache.read_page(page, &mut out).unwrap(), PAGE_SIZE);
            assert_eq!(out, patterned_page(page), "page {page}");
        }

        // The page just read is resident, so this one is a guaranteed hit.
        let mut out = vec![0u8; PAGE_SIZE];
        cache.read_page(pages - 1, &mut out).unwrap();

        let stats = cache.stats();
        assert!(stats.misses >= pages, "evictions imply re-loads");
        assert!(stats.requests > stats.misses);
    }

    #[test]
    fn repeated_hits_keep_the_hot_page_resident() {
        let dir = tempdir().unwrap();
        let cache = PageCache::open(dir.path().join("hot.db"), false, MIN_CACHE_SIZE).unwrap();

        cache.write_page(0, &patterned_page(0)).unwrap();
        cache.reset_stats();

        let mut out = vec![0u8; PAGE_SIZE];
        for _ in 0..100 {
            cache.read_page(0, &mut out).unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.requests, 100);
        assert_eq!(stats.misses, 0);
        assert!((stats.hit_rate() - 100.0).abs() < f64::EPSILON);
    }
}

mod concurrency_tests {
    use super::*;

    #[test]
    fn concurrent_readers_share_pages() {
        let dir = tempdir().unwrap();
        let cache =
            Arc::new(PageCache::open(dir.path().join("shared.db"), false, MIN_CACHE_SIZE).unwrap());

        for page in 0..16u64 {
            cache.write_page(page, &patterned_page(page)).unwrap();
        }

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for round in 0..100u64 {
                        let page = (t + round) % 16;
                        let mut out = vec![0u8; PAGE_SIZE];
                        assert_eq!(cache.read_page(page, &mut out).unwrap(), PAGE_SIZE);
                        assert_eq!(out, patterned_page(page));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn writers_on_disjoint_pages_do_not_interfere() {
        let dir = tempdir().unwrap();
        let cache =
            Arc::new(PageCache::open(dir.path().join("disjoint.db"), false, MIN_CACHE_SIZE).unwrap());

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    // Each thread owns a stride of pages far enough apart
                    // to force eviction traffic between the writers.
                    for round in 0..32u64 {
                        let page = t * 64 + round;
                        cache.write_page(page, &patterned_page(page)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        cache.flush().unwrap();

        for t in 0..4u64 {
            for round in 0..32u64 {
                let page = t * 64 + round;
                let mut out = vec![0u8; PAGE_SIZE];
                assert_eq!(cache.read_page(page, &mut out).unwrap(), PAGE_SIZE);
                assert_eq!(out, patterned_page(page), "page {page}");
            }
        }
    }
}
