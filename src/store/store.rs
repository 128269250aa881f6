//! # Record Store
//!
//! `RecordStore` persists variable-length records inside one file as a
//! doubly linked list layered on the page cache. Deleted records join a
//! second, parallel linked list (the free list) and their slots are reused
//! by later allocations. Callers navigate and mutate records through
//! [`RecordCursor`](super::cursor::RecordCursor) handles.
//!
//! ## Locking discipline
//!
//! Four mechanisms compose, always in this order on any code path:
//!
//! 1. **Lifecycle lock**: shared by every operation, exclusive for
//!    open/close/flush. Guarantees no operation straddles a close.
//! 2. **List-surgery mutex**: serializes every structural mutation of the
//!    live and free lists (create, remove, relocate, free-slot claim).
//!    Reads and in-place updates never take it.
//! 3. **Per-record locks**: shared for readers, exclusive for writers;
//!    batches (sibling relinking) are taken in ascending offset order.
//!    The record a structural operation mutates keeps its exclusive lock
//!    from validation until its slot has changed lists, so same-record
//!    operations serialize around the whole removal or relocation. Only
//!    surgery paths hold several record locks, and the surgery mutex
//!    keeps those paths mutually exclusive.
//! 4. **Header lock**: guards the in-memory storage header; taken last,
//!    never held across record-level I/O.
//!
//! The store hands out cursors holding an `Arc` of the shared state, so a
//! cursor outlives its `RecordStore` handle; once the store is closed every
//! cursor operation fails without touching the file.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use zerocopy::IntoBytes;

use crate::config::{
    DEFAULT_CACHE_SIZE, FREE_LOOKUP_DEPTH_MIN, FREE_LOOKUP_RATIO, NOT_FOUND,
};
use crate::storage::{adler32, CacheStats, PageCache};

use super::cursor::RecordCursor;
use super::header::{
    RecordHeader, StorageHeader, RECORD_HEADER_SIZE, STORAGE_HEADER_SIZE,
};
use super::locks::RecordLockTable;

pub struct RecordStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub(crate) cache: PageCache,
    pub(crate) header: RwLock<StorageHeader>,
    /// `true` while the store is open. Shared guard = operation in flight.
    pub(crate) lifecycle: RwLock<bool>,
    /// Serializes structural mutations of the live and free lists.
    pub(crate) list_lock: Mutex<()>,
    pub(crate) locks: RecordLockTable,
    pub(crate) free_lookup_depth: AtomicU64,
    pub(crate) read_only: bool,
}

impl RecordStore {
    /// Opens (or creates) a writable store at `path` with the default
    /// cache budget.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, false, DEFAULT_CACHE_SIZE)
    }

    /// Opens a store with explicit mode and cache budget. An empty
    /// writable file receives a fresh storage header; anything else must
    /// carry a valid signature and version or the open fails.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        read_only: bool,
        cache_bytes: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let cache = PageCache::open(path, read_only, cache_bytes)?;

        let header = if cache.file_size()? == 0 {
            ensure!(
                !read_only,
                "cannot initialize empty storage file '{}' read-only",
                path.display()
            );
            let header = StorageHeader::new();
            let written = cache.write(0, header.as_bytes())?;
            ensure!(
                written == STORAGE_HEADER_SIZE,
                "short write while initializing storage header"
            );
            debug!("created record store at '{}'", path.display());
            header
        } else {
            let mut bytes = [0u8; STORAGE_HEADER_SIZE];
            let read = cache.read(0, &mut bytes)?;
            ensure!(
                read == STORAGE_HEADER_SIZE,
                "storage file '{}' is too small to hold a header",
                path.display()
            );
            let header = StorageHeader::from_bytes(&bytes)?;
            debug!(
                "opened record store at '{}' ({} records, {} free)",
                path.display(),
                header.total_records(),
                header.total_free_records()
            );
            header
        };

        let depth = lookup_depth_for(header.total_free_records());
        Ok(Self {
            inner: Arc::new(StoreInner {
                cache,
                header: RwLock::new(header),
                lifecycle: RwLock::new(true),
                list_lock: Mutex::new(()),
                locks: RecordLockTable::new(),
                free_lookup_depth: AtomicU64::new(depth),
                read_only,
            }),
        })
    }

    /// Persists the storage header and all dirty cache pages.
    pub fn flush(&self) -> Result<()> {
        let lifecycle = self.inner.lifecycle.write();
        ensure!(*lifecycle, "record store is closed");

        if !self.inner.read_only {
            let header = self.inner.header.read();
            self.inner.persist_header(&header)?;
        }
        self.inner.cache.flush()
    }

    /// Flushes and closes the store. Further operations on the store or on
    /// any outstanding cursor fail. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.write();
        if !*lifecycle {
            return Ok(());
        }

        let result = if self.inner.read_only {
            Ok(())
        } else {
            let header = self.inner.header.read();
            self.inner
                .persist_header(&header)
                .and_then(|_| self.inner.cache.flush())
        };

        *lifecycle = false;
        result
    }

    pub fn is_open(&self) -> bool {
        *self.inner.lifecycle.read()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Number of live records.
    pub fn total_records(&self) -> u64 {
        self.inner.header.read().total_records()
    }

    /// Number of deleted records awaiting reuse.
    pub fn total_free_records(&self) -> u64 {
        self.inner.header.read().total_free_records()
    }

    /// Physical file size in bytes.
    pub fn file_size(&self) -> Result<u64> {
        self.inner.cache.file_size()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Creates a new record holding `data` and returns a cursor positioned
    /// on it. The record's capacity equals the payload length; the slot
    /// comes from the free list when a large-enough deleted record is
    /// found within the bounded scan, otherwise from the end of the file.
    pub fn create_record(&self, data: &[u8]) -> Result<RecordCursor> {
        let _op = self.inner.operation_guard()?;
        ensure!(!self.inner.read_only, "record store is read-only");
        ensure!(!data.is_empty(), "record payload must not be empty");
        ensure!(
            data.len() <= u32::MAX as usize,
            "record payload of {} bytes exceeds addressable capacity",
            data.len()
        );

        let _surgery = self.inner.list_lock.lock();
        let (offset, header) =
            self.inner
                .allocate_record(data.len() as u32, data, super::alloc::LinkMode::Tail)?;

        Ok(RecordCursor::new(Arc::clone(&self.inner), offset, header))
    }

    /// Returns a cursor for the record at `offset`, or `None` when the
    /// offset does not resolve to a live, intact record.
    pub fn get_record(&self, offset: u64) -> Option<RecordCursor> {
        let _op = self.inner.operation_guard().ok()?;
        self.cursor_at(offset)
    }

    /// Cursor on the head of the live list.
    pub fn first_record(&self) -> Option<RecordCursor> {
        let _op = self.inner.operation_guard().ok()?;
        let first = self.inner.header.read().first_record();
        self.cursor_at(first)
    }

    /// Cursor on the tail of the live list.
    pub fn last_record(&self) -> Option<RecordCursor> {
        let _op = self.inner.operation_guard().ok()?;
        let last = self.inner.header.read().last_record();
        self.cursor_at(last)
    }

    fn cursor_at(&self, offset: u64) -> Option<RecordCursor> {
        if offset == NOT_FOUND {
            return None;
        }
        let header = {
            let _rec = self.inner.locks.read(offset);
            self.inner.read_record_header(offset).ok()??
        };
        if header.is_deleted() {
            return None;
        }
        Some(RecordCursor::new(Arc::clone(&self.inner), offset, header))
    }

    /// Deletes the record under `cursor`: unlinks it from the live list,
    /// pushes its slot onto the free list, and moves the cursor to the
    /// right sibling (else left, else invalidates it). Returns `Ok(false)`
    /// when the record is already gone.
    pub fn remove_record(&self, cursor: &mut RecordCursor) -> Result<bool> {
        let _op = self.inner.operation_guard()?;
        ensure!(!self.inner.read_only, "record store is read-only");
        ensure!(
            Arc::ptr_eq(&self.inner, cursor.shared_store()),
            "cursor belongs to a different record store"
        );

        let position = cursor.position();
        if position == NOT_FOUND {
            return Ok(false);
        }

        let _surgery = self.inner.list_lock.lock();

        // The victim's exclusive lock is held from validation until its
        // slot has joined the free list; a same-record update racing this
        // removal lands entirely before or entirely after it.
        let _victim_guard = self.inner.locks.write(position);

        let Some(mut victim_header) = self.inner.read_record_header(position)? else {
            return Ok(false);
        };
        if victim_header.is_deleted() {
            return Ok(false);
        }

        let left = victim_header.previous();
        let right = victim_header.next();

        // Patch the live list around the victim.
        let landing = if left != NOT_FOUND && right != NOT_FOUND {
            let _guards = self.inner.locks.write_many(&[left, right]);
            let mut left_header = self.inner.require_header(left)?;
            let mut right_header = self.inner.require_header(right)?;
            left_header.set_next(right);
            right_header.set_previous(left);
            self.inner.write_record_header(left, &mut left_header)?;
            self.inner.write_record_header(right, &mut right_header)?;
            Some((right, right_header))
        } else if left != NOT_FOUND {
            let _guard = self.inner.locks.write(left);
            let mut left_header = self.inner.require_header(left)?;
            left_header.set_next(NOT_FOUND);
            self.inner.write_record_header(left, &mut left_header)?;
            Some((left, left_header))
        } else if right != NOT_FOUND {
            let _guard = self.inner.locks.write(right);
            let mut right_header = self.inner.require_header(right)?;
            right_header.set_previous(NOT_FOUND);
            self.inner.write_record_header(right, &mut right_header)?;
            Some((right, right_header))
        } else {
            None
        };

        {
            let mut header = self.inner.header.write();
            if left == NOT_FOUND {
                header.set_first_record(right);
            }
            if right == NOT_FOUND {
                header.set_last_record(left);
            }
            let new_total_records = header.total_records() - 1;
            header.set_total_records(new_total_records);
            self.inner.persist_header(&header)?;
        }

        self.inner.add_to_free_list(position, &mut victim_header)?;

        match landing {
            Some((offset, header)) => cursor.reposition(offset, header),
            None => cursor.invalidate(),
        }

        Ok(true)
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("record store closed uncleanly: {e:#}");
        }
    }
}

impl StoreInner {
    /// Shared lifecycle guard held for the duration of one operation.
    /// Fails once the store is closed.
    pub(crate) fn operation_guard(&self) -> Result<RwLockReadGuard<'_, bool>> {
        let guard = self.lifecycle.read();
        ensure!(*guard, "record store is closed");
        Ok(guard)
    }

    /// Reads and validates the record header at `offset`. `Ok(None)` for a
    /// short read or a checksum mismatch (the record is treated as
    /// missing); `Err` only for I/O failures underneath the cache. The
    /// caller must hold the record's lock.
    pub(crate) fn read_record_header(&self, offset: u64) -> Result<Option<RecordHeader>> {
        let mut bytes = [0u8; RECORD_HEADER_SIZE];
        let read = self.cache.read(offset, &mut bytes)?;
        if read != RECORD_HEADER_SIZE {
            return Ok(None);
        }

        let header = RecordHeader::from_bytes(&bytes)?;
        if !header.verify() {
            warn!("corrupt record header at offset {offset}");
            return Ok(None);
        }
        Ok(Some(header))
    }

    /// Like [`read_record_header`](Self::read_record_header) but a missing
    /// or corrupt header is an error, for records the linked-list
    /// structure says must exist.
    pub(crate) fn require_header(&self, offset: u64) -> Result<RecordHeader> {
        self.read_record_header(offset)?
            .ok_or_else(|| eyre::eyre!("missing or corrupt record header at offset {offset}"))
    }

    /// Seals and writes `header` at `offset`. The caller must hold the
    /// record's exclusive lock.
    pub(crate) fn write_record_header(
        &self,
        offset: u64,
        header: &mut RecordHeader,
    ) -> Result<()> {
        header.seal();
        let written = self.cache.write(offset, header.as_bytes())?;
        ensure!(
            written == RECORD_HEADER_SIZE,
            "short write of record header at offset {offset}"
        );
        Ok(())
    }

    /// Seals and writes `header` followed by its payload. The caller must
    /// hold the record's exclusive lock.
    pub(crate) fn write_record(
        &self,
        offset: u64,
        header: &mut RecordHeader,
        data: &[u8],
    ) -> Result<()> {
        self.write_record_header(offset, header)?;
        let written = self.cache.write(offset + RECORD_HEADER_SIZE as u64, data)?;
        ensure!(
            written == data.len(),
            "short write of record payload at offset {offset}"
        );
        Ok(())
    }

    /// Writes the in-memory storage header to the file and retunes the
    /// free-list lookup depth from the current free-record count.
    pub(crate) fn persist_header(&self, header: &StorageHeader) -> Result<()> {
        let written = self.cache.write(0, header.as_bytes())?;
        ensure!(
            written == STORAGE_HEADER_SIZE,
            "short write of storage header"
        );
        self.free_lookup_depth.store(
            lookup_depth_for(header.total_free_records()),
            Ordering::Relaxed,
        );
        Ok(())
    }

    /// Payload checksum as stored in record headers.
    pub(crate) fn payload_checksum(data: &[u8]) -> u32 {
        adler32(data)
    }
}

fn lookup_depth_for(total_free_records: u64) -> u64 {
    FREE_LOOKUP_DEPTH_MIN.max(total_free_records / FREE_LOOKUP_RATIO)
}
