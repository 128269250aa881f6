//! # Record Cursor
//!
//! A cursor names one record by file offset and carries a snapshot of its
//! header. Cursors are handed out by the store (`create_record`,
//! `get_record`, `first_record`, `last_record`) and stay usable after the
//! `RecordStore` handle is dropped (they share the store's state through
//! an `Arc`), but every operation fails once the store is closed.
//!
//! The cached header is refreshed from disk by `next`/`previous` (so
//! neighbour updates are picked up) and by `is_valid`. Mutation goes
//! through `&mut self`; a cursor is `Send` and concurrent traversal uses
//! one cursor per thread.

use std::sync::Arc;

use eyre::{ensure, Result};

use crate::config::NOT_FOUND;
use crate::storage::adler32;

use super::header::{RecordHeader, RECORD_HEADER_SIZE};
use super::store::StoreInner;

pub struct RecordCursor {
    store: Arc<StoreInner>,
    position: u64,
    header: RecordHeader,
}

impl RecordCursor {
    pub(crate) fn new(store: Arc<StoreInner>, position: u64, header: RecordHeader) -> Self {
        Self {
            store,
            position,
            header,
        }
    }

    /// File offset of the record, or [`NOT_FOUND`] once invalidated.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Payload length of the record as last observed; `0` once
    /// invalidated.
    pub fn data_length(&self) -> u32 {
        if self.position == NOT_FOUND {
            0
        } else {
            self.header.data_length()
        }
    }

    /// Immutable slot capacity; `0` once invalidated.
    pub fn record_capacity(&self) -> u32 {
        if self.position == NOT_FOUND {
            0
        } else {
            self.header.record_capacity()
        }
    }

    /// Offset of the right sibling as last observed, or [`NOT_FOUND`].
    pub fn next_position(&self) -> u64 {
        if self.position == NOT_FOUND {
            NOT_FOUND
        } else {
            self.header.next()
        }
    }

    /// Offset of the left sibling as last observed, or [`NOT_FOUND`].
    pub fn prev_position(&self) -> u64 {
        if self.position == NOT_FOUND {
            NOT_FOUND
        } else {
            self.header.previous()
        }
    }

    /// Re-reads the record header from the store: `true` iff the record
    /// still exists, parses, checksums, and is not deleted.
    pub fn is_valid(&self) -> bool {
        if self.position == NOT_FOUND {
            return false;
        }
        let Ok(_op) = self.store.operation_guard() else {
            return false;
        };

        let _rec = self.store.locks.read(self.position);
        matches!(
            self.store.read_record_header(self.position),
            Ok(Some(header)) if !header.is_deleted()
        )
    }

    /// Moves to the right sibling. Returns `false` without moving at the
    /// live-list tail; invalidates the cursor when the current record can
    /// no longer be read.
    pub fn next(&mut self) -> bool {
        self.step(true)
    }

    /// Moves to the left sibling. Returns `false` without moving at the
    /// live-list head; invalidates the cursor when the current record can
    /// no longer be read.
    pub fn previous(&mut self) -> bool {
        self.step(false)
    }

    fn step(&mut self, forward: bool) -> bool {
        if self.position == NOT_FOUND {
            return false;
        }
        let Ok(_op) = self.store.operation_guard() else {
            return false;
        };

        // Refresh the cached header so sibling relinking done after this
        // cursor was created is honoured.
        let refreshed = {
            let _rec = self.store.locks.read(self.position);
            self.store.read_record_header(self.position)
        };
        let Ok(Some(current)) = refreshed else {
            drop(_op);
            self.invalidate();
            return false;
        };
        if current.is_deleted() {
            // The record was freed under this cursor; its links now thread
            // the free list and must not be followed.
            drop(_op);
            self.invalidate();
            return false;
        }
        self.header = current;

        let target = if forward {
            current.next()
        } else {
            current.previous()
        };
        if target == NOT_FOUND {
            return false;
        }

        // A cursor sitting on the list tail (resp. head) per the storage
        // header does not move even if its own link looks ahead.
        {
            let storage = self.store.header.read();
            if forward && storage.last_record() == self.position {
                return false;
            }
            if !forward && storage.first_record() == self.position {
                return false;
            }
        }

        let landed = {
            let _rec = self.store.locks.read(target);
            self.store.read_record_header(target)
        };
        match landed {
            Ok(Some(header)) if !header.is_deleted() => {
                self.position = target;
                self.header = header;
                true
            }
            _ => {
                drop(_op);
                self.invalidate();
                false
            }
        }
    }

    /// Reads the record payload, verifying it against the header's
    /// Adler-32 checksum. Fails when the record is deleted, its header is
    /// corrupt, or the payload does not match its checksum.
    pub fn read_data(&self) -> Result<Vec<u8>> {
        ensure!(self.position != NOT_FOUND, "cursor is invalidated");
        let _op = self.store.operation_guard()?;

        let _rec = self.store.locks.read(self.position);
        let header = self.store.require_header(self.position)?;
        ensure!(
            !header.is_deleted(),
            "record at offset {} is deleted",
            self.position
        );

        let length = header.data_length() as usize;
        let mut data = vec![0u8; length];
        let read = self
            .store
            .cache
            .read(self.position + RECORD_HEADER_SIZE as u64, &mut data)?;
        ensure!(
            read == length,
            "short payload read at offset {}: {} of {} bytes",
            self.position,
            read,
            length
        );
        ensure!(
            adler32(&data) == header.data_checksum(),
            "payload checksum mismatch at offset {}",
            self.position
        );

        Ok(data)
    }

    /// Replaces the record payload. Fits are rewritten in place; payloads
    /// larger than the slot capacity relocate the record to a new slot and
    /// reposition the cursor there. On failure the cursor stays where it
    /// was.
    pub fn set_data(&mut self, data: &[u8]) -> Result<()> {
        ensure!(self.position != NOT_FOUND, "cursor is invalidated");
        let _op = self.store.operation_guard()?;
        ensure!(!self.store.read_only, "record store is read-only");
        ensure!(!data.is_empty(), "record payload must not be empty");
        ensure!(
            data.len() <= u32::MAX as usize,
            "record payload of {} bytes exceeds addressable capacity",
            data.len()
        );

        // In-place path: the payload fits the slot.
        {
            let _rec = self.store.locks.write(self.position);
            let mut header = self.store.require_header(self.position)?;
            ensure!(
                !header.is_deleted(),
                "record at offset {} is deleted",
                self.position
            );

            if data.len() as u32 <= header.record_capacity() {
                header.set_data_length(data.len() as u32);
                header.set_data_checksum(adler32(data));
                self.store.write_record(self.position, &mut header, data)?;
                self.header = header;
                return Ok(());
            }
        }

        // Growth path: relocate into a larger slot. Relocation re-acquires
        // the record's exclusive lock and keeps it until the old slot is
        // on the free list, so a racing same-record operation lands
        // entirely before or entirely after the move. Capacity is
        // immutable, so the fit decision cannot be invalidated in between.
        let (new_position, new_header) = self.store.relocate_record(self.position, data)?;
        self.position = new_position;
        self.header = new_header;
        Ok(())
    }

    pub(crate) fn shared_store(&self) -> &Arc<StoreInner> {
        &self.store
    }

    pub(crate) fn reposition(&mut self, position: u64, header: RecordHeader) {
        self.position = position;
        self.header = header;
    }

    pub(crate) fn invalidate(&mut self) {
        self.position = NOT_FOUND;
        self.header = RecordHeader::new(0);
    }
}
