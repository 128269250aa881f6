//! # Storage Layer
//!
//! The paged I/O foundation of the engine: a positional file gate plus an
//! LRU page cache, with the checksum primitive both upper layers share.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Record Store (store::)        │
//! ├─────────────────────────────────────┤
//! │   Page Cache (LRU + frame locks)     │   storage::cache
//! ├─────────────────────────────────────┤
//! │  Positional File Gate (read_at/..)   │   storage::disk
//! └─────────────────────────────────────┘
//! ```
//!
//! All file traffic moves in whole [`PAGE_SIZE`] pages through the gate;
//! the cache turns that into byte-granularity random access with
//! fetch-before-write semantics. Callers that only need raw paged I/O can
//! use [`PageCache`] directly; the record store composes on top.
//!
//! ## Module Organization
//!
//! - `disk`: positional whole-page file I/O (`PagedFile`)
//! - `cache`: LRU buffer pool with per-frame locks (`PageCache`)
//! - `checksum`: the Adler-32 variant fixed by the file format

mod cache;
mod checksum;
mod disk;

pub use cache::{CacheStats, PageCache};
pub use checksum::adler32;
pub use disk::PagedFile;

pub use crate::config::PAGE_SIZE;
