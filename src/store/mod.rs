//! # Record Store Layer
//!
//! Variable-length record management on top of the page cache: a doubly
//! linked list of live records, a parallel free list of deleted slots, and
//! cursors for traversal and mutation. See [`RecordStore`] for the public
//! entry point and the locking discipline, and the `header` module for the
//! on-disk format.
//!
//! ## Module Organization
//!
//! - `header`: zerocopy structs for the storage and record headers
//! - `locks`: ref-counted per-record lock table
//! - `store`: `RecordStore` lifecycle and CRUD entry points
//! - `alloc`: slot allocation (first record / free-list claim / append)
//! - `freelist`: free-list scan, claim, and tail-append
//! - `cursor`: `RecordCursor`

mod alloc;
mod cursor;
mod freelist;
mod header;
mod locks;
mod store;

pub use cursor::RecordCursor;
pub use header::{
    RecordHeader, StorageHeader, RECORD_DELETED_FLAG, RECORD_HEADER_SIZE, STORAGE_HEADER_SIZE,
    STORAGE_SIGNATURE, STORAGE_VERSION,
};
pub use store::RecordStore;
