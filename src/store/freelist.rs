//! Free-list maintenance.
//!
//! Deleted records form a doubly linked list parallel to the live list,
//! threaded through the same `next`/`previous` header fields and flagged
//! by the DELETED bit. Deletion appends to the free-list tail; allocation
//! scans from the head (first-fit) up to the self-tuning lookup depth and
//! claims the first slot whose immutable capacity is large enough. There
//! is no coalescing.
//!
//! Every function here runs under the store's list-surgery mutex.

use std::sync::atomic::Ordering;

use eyre::Result;
use log::warn;

use crate::config::NOT_FOUND;

use super::alloc::LinkMode;
use super::header::RecordHeader;
use super::store::StoreInner;

impl StoreInner {
    /// First-fit scan of the free list for a slot of at least `capacity`
    /// bytes. On success the slot is unlinked from the free list, revived,
    /// filled with `data`, and (in [`LinkMode::Tail`]) appended to the
    /// live list. `Ok(None)` when no candidate fits within the bounded
    /// scan.
    pub(crate) fn claim_from_free_list(
        &self,
        capacity: u32,
        data: &[u8],
        link: LinkMode,
    ) -> Result<Option<(u64, RecordHeader)>> {
        let (mut offset, total_free) = {
            let header = self.header.read();
            (header.first_free_record(), header.total_free_records())
        };
        if total_free == 0 {
            return Ok(None);
        }

        let depth = self.free_lookup_depth.load(Ordering::Relaxed);
        let mut steps = 0u64;

        while offset != NOT_FOUND && steps < depth {
            let candidate = {
                let _rec = self.locks.read(offset);
                self.read_record_header(offset)?
            };
            let Some(free_header) = candidate else {
                // The chain is unreadable past this point; give up on
                // reuse rather than risk linking through a corrupt slot.
                warn!("unreadable free-list entry at offset {offset}; abandoning scan");
                return Ok(None);
            };

            if !free_header.is_deleted() {
                warn!("free-list entry at offset {offset} is not marked deleted; skipping");
                offset = free_header.next();
                steps += 1;
                continue;
            }

            if free_header.record_capacity() >= capacity {
                return self.claim_slot(offset, &free_header, data, link).map(Some);
            }

            offset = free_header.next();
            steps += 1;
        }

        Ok(None)
    }

    /// Revives one free slot: unlink from the free list, clear DELETED,
    /// write the new payload, and optionally relink at the live tail.
    fn claim_slot(
        &self,
        offset: u64,
        free_header: &RecordHeader,
        data: &[u8],
        link: LinkMode,
    ) -> Result<(u64, RecordHeader)> {
        self.unlink_free_record(offset, free_header)?;

        // Capacity is immutable; the revived record keeps the slot's.
        let mut header = RecordHeader::new(free_header.record_capacity());
        header.set_data_length(data.len() as u32);
        header.set_data_checksum(Self::payload_checksum(data));

        match link {
            LinkMode::Tail => {
                let tail = self.header.read().last_record();
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
                let _rec = self.locks.write(offset);
                self.write_record(offset, &mut header, data)?;
            }
        }

        Ok((offset, header))
    }

    /// Unlinks a record from the free list, patching its free-list
    /// neighbours and the storage header's head/tail/counter.
    fn unlink_free_record(&self, offset: u64, header: &RecordHeader) -> Result<()> {
        let left = header.previous();
        let right = header.next();

        if left != NOT_FOUND && right != NOT_FOUND {
            let _guards = self.locks.write_many(&[left, right]);
            let mut left_header = self.require_header(left)?;
            let mut right_header = self.require_header(right)?;
            left_header.set_next(right);
            right_header.set_previous(left);
            self.write_record_header(left, &mut left_header)?;
            self.write_record_header(right, &mut right_header)?;
        } else if left != NOT_FOUND {
            let _guard = self.locks.write(left);
            let mut left_header = self.require_header(left)?;
            left_header.set_next(NOT_FOUND);
            self.write_record_header(left, &mut left_header)?;
        } else if right != NOT_FOUND {
            let _guard = self.locks.write(right);
            let mut right_header = self.require_header(right)?;
            right_header.set_previous(NOT_FOUND);
            self.write_record_header(right, &mut right_header)?;
        }

        let mut storage = self.header.write();
        if left == NOT_FOUND {
            storage.set_first_free_record(right);
        }
        if right == NOT_FOUND {
            storage.set_last_free_record(left);
        }
        let new_total_free_records = storage.total_free_records() - 1;
        storage.set_total_free_records(new_total_free_records);
        self.persist_header(&storage)?;

        Ok(())
    }

    /// Appends the record at `offset` to the free-list tail: marks it
    /// DELETED, zeroes its payload metadata, and links it after the
    /// current tail. The caller already holds the record's exclusive lock
    /// (and keeps holding it until this returns, so no same-record
    /// operation can slide in between unlinking and free-listing) and has
    /// verified that `header` is the live header stored at `offset`.
    pub(crate) fn add_to_free_list(&self, offset: u64, header: &mut RecordHeader) -> Result<()> {
        let old_tail = self.header.read().last_free_record();

        header.set_next(NOT_FOUND);
        header.set_previous(old_tail);
        header.set_data_length(0);
        header.set_data_checksum(0);
        header.mark_deleted();

        if old_tail != NOT_FOUND {
            let _tail_guard = self.locks.write(old_tail);
            let mut tail_header = self.require_header(old_tail)?;
            tail_header.set_next(offset);
            self.write_record_header(old_tail, &mut tail_header)?;
        }
        self.write_record_header(offset, header)?;

        let mut storage = self.header.write();
        if storage.first_free_record() == NOT_FOUND {
            storage.set_first_free_record(offset);
        }
        storage.set_last_free_record(offset);
        let new_total_free_records = storage.total_free_records() + 1;
        storage.set_total_free_records(new_total_free_records);
        self.persist_header(&storage)?;

        Ok(())
    }
}
