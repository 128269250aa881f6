//! # Per-Record Lock Table
//!
//! Fine-grained reader/writer locks keyed by record file offset, layered
//! above the page cache so operations on disjoint records proceed in
//! parallel even when their headers share a page.
//!
//! Entries are created lazily on first use and erased when the last guard
//! for an offset drops, so the table stays proportional to the number of
//! records currently being touched, not the number of records in the file.
//! The reference count is the `Arc` strong count: the map holds one clone,
//! every outstanding guard holds another.
//!
//! When a caller needs several record locks at once (sibling relinking),
//! [`RecordLockTable::write_many`] acquires them in ascending offset order,
//! which is the crate-wide deadlock-avoidance order for record locks.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use smallvec::SmallVec;

type Entry = Arc<RwLock<()>>;

pub(crate) struct RecordLockTable {
    map: Mutex<HashMap<u64, Entry>>,
}

impl RecordLockTable {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, offset: u64) -> Entry {
        let mut map = self.map.lock();
        map.entry(offset)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Releases the table entry for `offset` if no guard still holds it.
    fn reclaim(&self, offset: u64) {
        let mut map = self.map.lock();
        if let Some(entry) = map.get(&offset) {
            if Arc::strong_count(entry) == 1 {
                map.remove(&offset);
            }
        }
    }

    /// Shared lock for readers of the record at `offset`.
    pub fn read(&self, offset: u64) -> RecordReadGuard<'_> {
        let entry = self.entry(offset);
        let guard = RwLock::read_arc(&entry);
        RecordReadGuard {
            table: self,
            offset,
            guard: Some(guard),
        }
    }

    /// Exclusive lock for writers of the record at `offset`.
    pub fn write(&self, offset: u64) -> RecordWriteGuard<'_> {
        let entry = self.entry(offset);
        let guard = RwLock::write_arc(&entry);
        RecordWriteGuard {
            table: self,
            offset,
            guard: Some(guard),
        }
    }

    /// Exclusive locks on every distinct offset in `offsets`, acquired in
    /// ascending order.
    pub fn write_many(&self, offsets: &[u64]) -> SmallVec<[RecordWriteGuard<'_>; 4]> {
        let mut sorted: SmallVec<[u64; 4]> = offsets.iter().copied().collect();
        sorted.sort_unstable();
        sorted.dedup();
        sorted.into_iter().map(|offset| self.write(offset)).collect()
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.map.lock().len()
    }
}

pub(crate) struct RecordReadGuard<'a> {
    table: &'a RecordLockTable,
    offset: u64,
    guard: Option<ArcRwLockReadGuard<RawRwLock, ()>>,
}

impl Drop for RecordReadGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table.reclaim(self.offset);
    }
}

pub(crate) struct RecordWriteGuard<'a> {
    table: &'a RecordLockTable,
    offset: u64,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, ()>>,
}

impl Drop for RecordWriteGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table.reclaim(self.offset);
    }
}
