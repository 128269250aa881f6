//! # Configuration Constants
//!
//! This module centralizes the engine's tuning constants. Values that depend
//! on each other are co-located and guarded by compile-time assertions so a
//! change to one cannot silently invalidate another.
//!
//! ```text
//! PAGE_SIZE (8192 bytes)
//!       │
//!       ├─> MIN_CACHE_SIZE  (256 KiB = 32 pages, hard floor)
//!       │     The cache rounds any requested budget down to whole pages
//!       │     and never allocates fewer than MIN_CACHE_SIZE / PAGE_SIZE
//!       │     frames.
//!       │
//!       └─> DEFAULT_CACHE_SIZE (1 MiB = 128 pages)
//!
//! FREE_LOOKUP_DEPTH_MIN (64)
//!       │
//!       └─> Free-list scans visit at least this many candidates before
//!           giving up; the effective depth grows with the free list as
//!           total_free_records / FREE_LOOKUP_RATIO.
//! ```

/// Size of one cache page in bytes. This is the unit of file I/O; all disk
/// reads and writes are whole pages at offsets aligned to this value.
pub const PAGE_SIZE: usize = 8192;

/// Hard floor for the page cache budget. Requests below this are raised to
/// it so the pool always holds enough frames to make eviction meaningful.
pub const MIN_CACHE_SIZE: usize = 256 * 1024;

/// Default page cache budget when the caller does not specify one.
pub const DEFAULT_CACHE_SIZE: usize = 1024 * 1024;

/// Sentinel for "no such page/record/offset". Stored on disk verbatim, so
/// the value is part of the file format.
pub const NOT_FOUND: u64 = u64::MAX;

/// Minimum number of free-list candidates examined per allocation.
pub const FREE_LOOKUP_DEPTH_MIN: u64 = 64;

/// Divisor applied to `total_free_records` to widen the free-list scan as
/// fragmentation grows. Effective depth is
/// `max(FREE_LOOKUP_DEPTH_MIN, total_free_records / FREE_LOOKUP_RATIO)`.
pub const FREE_LOOKUP_RATIO: u64 = 10;

const _: () = assert!(
    MIN_CACHE_SIZE % PAGE_SIZE == 0,
    "cache floor must be a whole number of pages"
);

const _: () = assert!(
    DEFAULT_CACHE_SIZE >= MIN_CACHE_SIZE,
    "default cache budget must not be below the floor"
);

const _: () = assert!(
    PAGE_SIZE.is_power_of_two(),
    "page size must be a power of two for offset arithmetic"
);
