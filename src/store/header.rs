//! # On-Disk Header Definitions
//!
//! Type-safe, zerocopy-based structs for the two fixed-layout headers of
//! the record file format:
//!
//! 1. **Storage header**: the first 64 bytes of the file. Carries the
//!    signature/version stamp, the end-of-data watermark, and the head,
//!    tail and length of both linked lists (live records and free
//!    records).
//! 2. **Record header**: 40 bytes in front of every record payload.
//!    Doubly linked list pointers, flag bits, capacity/length, and two
//!    Adler-32 checksums: one over the payload, one over the header
//!    itself.
//!
//! ## Layout
//!
//! ```text
//! Storage header (64 bytes at offset 0)        Record header (40 bytes)
//! Offset  Size  Field                          Offset  Size  Field
//! 0       4     signature (0x574F4E4B)         0       8     next
//! 4       4     version (1)                    8       8     previous
//! 8       8     end_of_data                    16      8     bit_flags
//! 16      8     total_records                  24      4     record_capacity
//! 24      8     first_record                   28      4     data_length
//! 32      8     last_record                    32      4     data_checksum
//! 40      8     total_free_records             36      4     head_checksum
//! 48      8     first_free_record
//! 56      8     last_free_record
//! ```
//!
//! All multi-byte fields are little-endian via zerocopy's `U32`/`U64`
//! wrappers; both structs are `Unaligned` so they can be read from any
//! byte offset. `head_checksum` covers the 36 header bytes before it, so
//! a torn or stray header write is detected on the next read.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::NOT_FOUND;
use crate::storage::adler32;

/// "KNOW" little-endian, the file signature.
pub const STORAGE_SIGNATURE: u32 = 0x574F_4E4B;
pub const STORAGE_VERSION: u32 = 1;

pub const STORAGE_HEADER_SIZE: usize = 64;
pub const RECORD_HEADER_SIZE: usize = 40;

/// Header bytes covered by `head_checksum` (everything before it).
pub const RECORD_HEADER_PAYLOAD_SIZE: usize = RECORD_HEADER_SIZE - 4;

/// Bit 63 of `bit_flags`: the record sits on the free list.
pub const RECORD_DELETED_FLAG: u64 = 1 << 63;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct StorageHeader {
    signature: U32,
    version: U32,
    end_of_data: U64,
    total_records: U64,
    first_record: U64,
    last_record: U64,
    total_free_records: U64,
    first_free_record: U64,
    last_free_record: U64,
}

const _: () = assert!(std::mem::size_of::<StorageHeader>() == STORAGE_HEADER_SIZE);

impl StorageHeader {
    /// Header of a freshly created, empty store.
    pub fn new() -> Self {
        Self {
            signature: U32::new(STORAGE_SIGNATURE),
            version: U32::new(STORAGE_VERSION),
            end_of_data: U64::new(STORAGE_HEADER_SIZE as u64),
            total_records: U64::new(0),
            first_record: U64::new(NOT_FOUND),
            last_record: U64::new(NOT_FOUND),
            total_free_records: U64::new(0),
            first_free_record: U64::new(NOT_FOUND),
            last_free_record: U64::new(NOT_FOUND),
        }
    }

    /// Parses and validates a storage header. Signature or version
    /// mismatch is fatal for the open path.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= STORAGE_HEADER_SIZE,
            "buffer too small for StorageHeader: {} < {}",
            bytes.len(),
            STORAGE_HEADER_SIZE
        );

        let header = Self::read_from_bytes(&bytes[..STORAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse StorageHeader: {:?}", e))?;

        ensure!(
            header.signature.get() == STORAGE_SIGNATURE,
            "invalid storage file signature {:#010x}",
            header.signature.get()
        );

        ensure!(
            header.version.get() == STORAGE_VERSION,
            "unsupported storage version: {} (expected {})",
            header.version.get(),
            STORAGE_VERSION
        );

        Ok(header)
    }

    pub fn signature(&self) -> u32 {
        self.signature.get()
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn end_of_data(&self) -> u64 {
        self.end_of_data.get()
    }

    pub fn set_end_of_data(&mut self, offset: u64) {
        self.end_of_data = U64::new(offset);
    }

    pub fn total_records(&self) -> u64 {
        self.total_records.get()
    }

    pub fn set_total_records(&mut self, count: u64) {
        self.total_records = U64::new(count);
    }

    pub fn first_record(&self) -> u64 {
        self.first_record.get()
    }

    pub fn set_first_record(&mut self, offset: u64) {
        self.first_record = U64::new(offset);
    }

    pub fn last_record(&self) -> u64 {
        self.last_record.get()
    }

    pub fn set_last_record(&mut self, offset: u64) {
        self.last_record = U64::new(offset);
    }

    pub fn total_free_records(&self) -> u64 {
        self.total_free_records.get()
    }

    pub fn set_total_free_records(&mut self, count: u64) {
        self.total_free_records = U64::new(count);
    }

    pub fn first_free_record(&self) -> u64 {
        self.first_free_record.get()
    }

    pub fn set_first_free_record(&mut self, offset: u64) {
        self.first_free_record = U64::new(offset);
    }

    pub fn last_free_record(&self) -> u64 {
        self.last_free_record.get()
    }

    pub fn set_last_free_record(&mut self, offset: u64) {
        self.last_free_record = U64::new(offset);
    }
}

impl Default for StorageHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RecordHeader {
    next: U64,
    previous: U64,
    bit_flags: U64,
    record_capacity: U32,
    data_length: U32,
    data_checksum: U32,
    head_checksum: U32,
}

const _: () = assert!(std::mem::size_of::<RecordHeader>() == RECORD_HEADER_SIZE);

impl RecordHeader {
    /// An unlinked, live header with the given capacity and no payload.
    pub fn new(capacity: u32) -> Self {
        Self {
            next: U64::new(NOT_FOUND),
            previous: U64::new(NOT_FOUND),
            bit_flags: U64::new(0),
            record_capacity: U32::new(capacity),
            data_length: U32::new(0),
            data_checksum: U32::new(0),
            head_checksum: U32::new(0),
        }
    }

    /// Parses a record header without checksum validation; see
    /// [`RecordHeader::verify`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= RECORD_HEADER_SIZE,
            "buffer too small for RecordHeader: {} < {}",
            bytes.len(),
            RECORD_HEADER_SIZE
        );

        Self::read_from_bytes(&bytes[..RECORD_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse RecordHeader: {:?}", e))
    }

    /// Recomputes `head_checksum` over the 36 preceding bytes. Must be the
    /// last mutation before the header is written out.
    pub fn seal(&mut self) {
        let sum = adler32(&self.as_bytes()[..RECORD_HEADER_PAYLOAD_SIZE]);
        self.head_checksum = U32::new(sum);
    }

    /// Checks `head_checksum` against the stored header bytes.
    pub fn verify(&self) -> bool {
        adler32(&self.as_bytes()[..RECORD_HEADER_PAYLOAD_SIZE]) == self.head_checksum.get()
    }

    pub fn next(&self) -> u64 {
        self.next.get()
    }

    pub fn set_next(&mut self, offset: u64) {
        self.next = U64::new(offset);
    }

    pub fn previous(&self) -> u64 {
        self.previous.get()
    }

    pub fn set_previous(&mut self, offset: u64) {
        self.previous = U64::new(offset);
    }

    pub fn bit_flags(&self) -> u64 {
        self.bit_flags.get()
    }

    pub fn is_deleted(&self) -> bool {
        self.bit_flags.get() & RECORD_DELETED_FLAG != 0
    }

    pub fn mark_deleted(&mut self) {
        self.bit_flags = U64::new(self.bit_flags.get() | RECORD_DELETED_FLAG);
    }

    pub fn clear_deleted(&mut self) {
        self.bit_flags = U64::new(self.bit_flags.get() & !RECORD_DELETED_FLAG);
    }

    pub fn record_capacity(&self) -> u32 {
        self.record_capacity.get()
    }

    pub fn data_length(&self) -> u32 {
        self.data_length.get()
    }

    pub fn set_data_length(&mut self, length: u32) {
        self.data_length = U32::new(length);
    }

    pub fn data_checksum(&self) -> u32 {
        self.data_checksum.get()
    }

    pub fn set_data_checksum(&mut self, sum: u32) {
        self.data_checksum = U32::new(sum);
    }

    pub fn head_checksum(&self) -> u32 {
        self.head_checksum.get()
    }
}
