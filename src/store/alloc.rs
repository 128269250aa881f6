//! Record slot allocation.
//!
//! Three paths, tried in order: the very first record lands right after
//! the storage header, later allocations first scan the free list for a
//! deleted slot of sufficient capacity, and fall back to appending at the
//! end-of-data watermark. All paths run under the store's list-surgery
//! mutex; the caller guarantees that.

use eyre::{ensure, Result};

use crate::config::NOT_FOUND;

use super::header::{RecordHeader, RECORD_HEADER_SIZE, STORAGE_HEADER_SIZE};
use super::store::StoreInner;

/// How a freshly allocated slot joins the live list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkMode {
    /// Append to the live-list tail (record creation).
    Tail,
    /// Leave the slot unlinked; the caller splices it in place of an
    /// existing record (relocation on update).
    Detached,
}

impl StoreInner {
    /// Allocates a slot of `capacity` bytes, writes `data` into it, and
    /// returns the slot offset with its sealed header. Caller holds the
    /// list-surgery mutex.
    pub(crate) fn allocate_record(
        &self,
        capacity: u32,
        data: &[u8],
        link: LinkMode,
    ) -> Result<(u64, RecordHeader)> {
        ensure!(capacity > 0, "record capacity must not be zero");

        let (no_live, no_free) = {
            let header = self.header.read();
            (
                header.last_record() == NOT_FOUND,
                header.first_free_record() == NOT_FOUND,
            )
        };

        if no_live && no_free {
            return self.create_first_record(capacity, data);
        }

        if let Some(claimed) = self.claim_from_free_list(capacity, data, link)? {
            return Ok(claimed);
        }

        self.append_record(capacity, data, link)
    }

    /// The first record of an empty store sits immediately after the
    /// storage header.
    fn create_first_record(&self, capacity: u32, data: &[u8]) -> Result<(u64, RecordHeader)> {
        let offset = STORAGE_HEADER_SIZE as u64;

        let mut header = RecordHeader::new(capacity);
        header.set_data_length(data.len() as u32);
        header.set_data_checksum(Self::payload_checksum(data));

        {
            let _rec = self.locks.write(offset);
            self.write_record(offset, &mut header, data)?;
        }

        let mut storage = self.header.write();
        storage.set_first_record(offset);
        storage.set_last_record(offset);
        storage.set_end_of_data(offset + RECORD_HEADER_SIZE as u64 + capacity as u64);
        let new_total_records = storage.total_records() + 1;
        storage.set_total_records(new_total_records);
        self.persist_header(&storage)?;

        Ok((offset, header))
    }

    /// Appends a new slot at the end-of-data watermark.
    fn append_record(
        &self,
        capacity: u32,
        data: &[u8],
        link: LinkMode,
    ) -> Result<(u64, RecordHeader)> {
        // Reserve the slot. Only list surgery moves end_of_data, and the
        // caller holds that mutex, so the reservation cannot race.
        let (offset, tail) = {
            let mut storage = self.header.write();
            let offset = storage.end_of_data();
            storage.set_end_of_data(offset + RECORD_HEADER_SIZE as u64 + capacity as u64);
            (offset, storage.last_record())
        };

        let mut header = RecordHeader::new(capacity);
        header.set_data_length(data.len() as u32);
        header.set_data_checksum(Self::payload_checksum(data));

        match link {
            LinkMode::Tail => {
                if tail != NOT_FOUND {
                    header.set_previous(tail);
                    let _guards = self.locks.write_many(&[tail, offset]);
                    let mut tail_header = self.require_header(tail)?;
                    tail_header.set_next(offset);
                    self.write_record_header(tail, &mut tail_header)?;
                    self.write_record(offset, &mut header, data)?;
                } else {
                    let _rec = self.locks.write(offset);
                    self.write_record(offset, &mut header, data)?;
                }

                let mut storage = self.header.write();
                if tail == NOT_FOUND {
                    storage.set_first_record(offset);
                }
                storage.set_last_record(offset);
                let new_total_records = storage.total_records() + 1;
                storage.set_total_records(new_total_records);
                self.persist_header(&storage)?;
            }
            LinkMode::Detached => {
                {
                    let _rec = self.locks.write(offset);
                    self.write_record(offset, &mut header, data)?;
                }
                let storage = self.header.read();
                self.persist_header(&storage)?;
            }
        }

        Ok((offset, header))
    }

    /// Moves the record at `old_offset` into a freshly allocated slot big
    /// enough for `data`, splices the new slot into the old one's list
    /// position, and free-lists the old slot. Returns the new offset and
    /// header. Used by cursor updates that outgrow their capacity.
    pub(crate) fn relocate_record(
        &self,
        old_offset: u64,
        data: &[u8],
    ) -> Result<(u64, RecordHeader)> {
        let _surgery = self.list_lock.lock();

        // The old slot's exclusive lock is held from the header read until
        // the slot has joined the free list; a same-record in-place update
        // or removal racing this relocation serializes entirely before or
        // entirely after it.
        let _old_guard = self.locks.write(old_offset);

        let mut old_header = self.require_header(old_offset)?;
        ensure!(
            !old_header.is_deleted(),
            "cannot update deleted record at offset {old_offset}"
        );

        let left = old_header.previous();
        let right = old_header.next();

        let (new_offset, mut new_header) =
            self.allocate_record(data.len() as u32, data, LinkMode::Detached)?;

        // Splice the new slot where the old record sat.
        new_header.set_previous(left);
        new_header.set_next(right);
        {
            let _rec = self.locks.write(new_offset);
            self.write_record_header(new_offset, &mut new_header)?;
        }

        if left != NOT_FOUND {
            let _guard = self.locks.write(left);
            let mut left_header = self.require_header(left)?;
            left_header.set_next(new_offset);
            self.write_record_header(left, &mut left_header)?;
        }
        if right != NOT_FOUND {
            let _guard = self.locks.write(right);
            let mut right_header = self.require_header(right)?;
            right_header.set_previous(new_offset);
            self.write_record_header(right, &mut right_header)?;
        }

        self.add_to_free_list(old_offset, &mut old_header)?;

        {
            let mut storage = self.header.write();
            if left == NOT_FOUND {
                storage.set_first_record(new_offset);
            }
            if right == NOT_FOUND {
                storage.set_last_record(new_offset);
            }
            self.persist_header(&storage)?;
        }

        Ok((new_offset, new_header))
    }
}
