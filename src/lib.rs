//! # stranddb: embeddable single-file record storage engine
//!
//! stranddb persists variable-length binary records (up to 4 GiB each)
//! inside one file, exposing them as a doubly linked list with cursor
//! navigation, free-slot reuse of deleted records, and Adler-32 integrity
//! checks over every header and payload. All file traffic flows through a
//! fixed-budget LRU page cache with fetch-before-write semantics.
//!
//! ## Quick Start
//!
//! ```no_run
//! use stranddb::RecordStore;
//!
//! # fn main() -> eyre::Result<()> {
//! let store = RecordStore::open("./knowledge.db")?;
//!
//! let cursor = store.create_record(b"hello")?;
//! assert_eq!(cursor.read_data()?, b"hello");
//!
//! // Walk the live list front to back.
//! if let Some(mut record) = store.first_record() {
//!     loop {
//!         println!("{} bytes at offset {}", record.data_length(), record.position());
//!         if !record.next() {
//!             break;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Record Store (lists + cursors)     │  store::
//! ├─────────────────────────────────────┤
//! │   Page Cache (LRU buffer pool)       │  storage::cache
//! ├─────────────────────────────────────┤
//! │   Positional File Gate               │  storage::disk
//! └─────────────────────────────────────┘
//! ```
//!
//! Callers use [`RecordStore`] (or [`PageCache`] directly for raw paged
//! I/O). The store translates record offsets into byte ranges; the cache
//! splits them across 8 KiB pages and performs whole-page positional I/O
//! through the gate.
//!
//! ## Guarantees and Non-Goals
//!
//! - One process owns the file; multiple `RecordStore` instances against
//!   distinct files coexist freely.
//! - Durability is best-effort via explicit [`RecordStore::flush`]; there
//!   is no journal and no crash recovery beyond checksum detection.
//! - Operations on disjoint records run in parallel; per-record locks and
//!   a short list-surgery critical section provide thread safety.

pub mod config;
pub mod storage;
pub mod store;

pub use config::{DEFAULT_CACHE_SIZE, MIN_CACHE_SIZE, NOT_FOUND, PAGE_SIZE};
pub use storage::{CacheStats, PageCache, PagedFile};
pub use store::{RecordCursor, RecordStore, RECORD_HEADER_SIZE, STORAGE_HEADER_SIZE};
