//! # LRU Page Cache
//!
//! Fixed-capacity buffer pool between callers and the positional file gate.
//! The cache presents byte-granularity random access over the file while
//! performing all real I/O in whole 8 KiB pages, amortizing and coalescing
//! disk traffic.
//!
//! ## Structure
//!
//! - A pre-allocated array of page frames, each a `PAGE_SIZE` buffer plus
//!   binding metadata behind its own `parking_lot::RwLock`.
//! - A `hashbrown` map from file page number to frame index.
//! - An arena-backed intrusive LRU list over frame indices. Each frame's
//!   list node is addressed by its index, so promotion and eviction are
//!   O(1) splices with no allocation and no raw pointers.
//! - A pool mutex guarding the map, the LRU list, and the vacant-frame
//!   list. Critical sections are short and never span disk I/O.
//!
//! ## Locking discipline
//!
//! The pool lock resolves a page number to a frame index; the frame's own
//! lock guards its contents. The pool lock is always released before a
//! frame lock is taken. Because a frame can be rebound between those two
//! steps, every frame-lock acquisition re-verifies the binding and retries
//! the lookup on mismatch. Byte-range operations iterate page by page and
//! never hold two frame locks at once.
//!
//! ## Fetch-before-write
//!
//! A write into any page first faults the page into a frame (a disk read),
//! so a partial-page update preserves the surrounding bytes. This is the
//! only correct way to do sub-page writes through a page-granular gate.
//!
//! ## Failure semantics
//!
//! A short read past end-of-file leaves the frame CLEAN with the short
//! length recorded; the missing tail is never materialized as data. A
//! failed write-back during eviction restores the old binding and surfaces
//! an I/O error, leaving the frame DIRTY so the data survives for a retry.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use log::warn;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::disk::PagedFile;
use super::PAGE_SIZE;
use crate::config::{DEFAULT_CACHE_SIZE, MIN_CACHE_SIZE, NOT_FOUND};

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    Clean,
    Dirty,
}

struct FrameData {
    /// File page currently bound to this frame, `NOT_FOUND` when vacant.
    page_no: u64,
    state: PageState,
    /// Number of valid bytes in `data`; short of `PAGE_SIZE` only for the
    /// page straddling end-of-file.
    len: usize,
    data: Box<[u8]>,
}

impl FrameData {
    fn vacant() -> Self {
        Self {
            page_no: NOT_FOUND,
            state: PageState::Clean,
            len: 0,
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }
}

#[derive(Clone, Copy)]
struct LruNode {
    prev: usize,
    next: usize,
}

/// Intrusive doubly linked recency list. Node `i` belongs to frame `i`, so
/// handles stay stable across splices.
struct LruList {
    nodes: Vec<LruNode>,
    head: usize,
    tail: usize,
}

impl LruList {
    fn new(capacity: usize) -> Self {
        Self {
            nodes: vec![LruNode { prev: NIL, next: NIL }; capacity],
            head: NIL,
            tail: NIL,
        }
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx] = LruNode {
            prev: NIL,
            next: self.head,
        };
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn unlink(&mut self, idx: usize) {
        let LruNode { prev, next } = self.nodes[idx];
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[idx] = LruNode {
            prev: NIL,
            next: NIL,
        };
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head != idx {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn tail(&self) -> Option<usize> {
        (self.tail != NIL).then_some(self.tail)
    }
}

struct PoolState {
    /// file page number -> frame index, for resident pages only.
    map: HashMap<u64, usize>,
    lru: LruList,
    /// Frame indices never yet bound; drained before eviction starts.
    vacant: Vec<usize>,
    /// Pool-side view of each frame's binding, readable without the frame
    /// lock. Kept in step with `map` under the pool mutex.
    page_of: Vec<u64>,
}

impl PoolState {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            lru: LruList::new(capacity),
            vacant: (0..capacity).rev().collect(),
            page_of: vec![NOT_FOUND; capacity],
        }
    }
}

/// Snapshot of the cache's activity counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl CacheStats {
    /// Cache hit rate in percent; zero when no requests were made.
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.requests as f64 * 100.0
        }
    }
}

pub struct PageCache {
    file: PagedFile,
    frames: Vec<RwLock<FrameData>>,
    pool: Mutex<PoolState>,
    requests: AtomicU64,
    misses: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl PageCache {
    /// Opens `path` through a positional gate and allocates `cache_bytes`
    /// of frames (rounded down to whole pages, floored at
    /// [`MIN_CACHE_SIZE`]).
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool, cache_bytes: usize) -> Result<Self> {
        let file = PagedFile::open(path, read_only)?;
        Ok(Self::with_file(file, cache_bytes))
    }

    /// Opens with the default 1 MiB budget.
    pub fn open_default<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        Self::open(path, read_only, DEFAULT_CACHE_SIZE)
    }

    pub fn with_file(file: PagedFile, cache_bytes: usize) -> Self {
        let capacity = Self::frame_count(cache_bytes);
        Self {
            file,
            frames: (0..capacity).map(|_| RwLock::new(FrameData::vacant())).collect(),
            pool: Mutex::new(PoolState::new(capacity)),
            requests: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    fn frame_count(cache_bytes: usize) -> usize {
        cache_bytes.max(MIN_CACHE_SIZE) / PAGE_SIZE
    }

    pub fn is_read_only(&self) -> bool {
        self.file.is_read_only()
    }

    /// Cache capacity in bytes (whole frames).
    pub fn cache_size(&self) -> usize {
        self.frames.len() * PAGE_SIZE
    }

    /// Physical size of the underlying file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        self.file.size()
    }

    pub fn stats(&self) -> CacheStats {
        let requests = self.requests.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            requests,
            hits: requests.saturating_sub(misses),
            misses,
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
    }

    /// Reads up to `buf.len()` bytes starting at file offset `position`.
    /// Returns the number of bytes copied, short when the range extends
    /// past the end of the stored data. Empty buffers read nothing.
    pub fn read(&self, position: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut copied = 0usize;
        while copied < buf.len() {
            let offset = position + copied as u64;
            let page_no = offset / PAGE_SIZE as u64;
            let page_off = (offset % PAGE_SIZE as u64) as usize;
            let want = (buf.len() - copied).min(PAGE_SIZE - page_off);

            let frame = self.frame_for_read(page_no)?;
            let avail = frame.len.saturating_sub(page_off);
            let n = want.min(avail);
            buf[copied..copied + n].copy_from_slice(&frame.data[page_off..page_off + n]);
            drop(frame);

            copied += n;
            if n < want {
                break;
            }
        }

        self.bytes_read.fetch_add(copied as u64, Ordering::Relaxed);
        Ok(copied)
    }

    /// Writes `buf` at file offset `position` through the cache, marking
    /// every touched page dirty. Empty buffers write nothing. Fails on a
    /// read-only cache with no state change.
    pub fn write(&self, position: u64, buf: &[u8]) -> Result<usize> {
        ensure!(!self.file.is_read_only(), "page cache is read-only");
        if buf.is_empty() {
            return Ok(0);
        }

        let mut copied = 0usize;
        while copied < buf.len() {
            let offset = position + copied as u64;
            let page_no = offset / PAGE_SIZE as u64;
            let page_off = (offset % PAGE_SIZE as u64) as usize;
            let n = (buf.len() - copied).min(PAGE_SIZE - page_off);

            let mut frame = self.frame_for_write(page_no)?;
            frame.data[page_off..page_off + n].copy_from_slice(&buf[copied..copied + n]);
            frame.state = PageState::Dirty;
            frame.len = frame.len.max(page_off + n);
            drop(frame);

            copied += n;
        }

        self.bytes_written.fetch_add(copied as u64, Ordering::Relaxed);
        Ok(copied)
    }

    /// Whole-page read fast path. Returns the valid length of the page.
    pub fn read_page(&self, page_no: u64, buf: &mut [u8]) -> Result<usize> {
        ensure!(
            buf.len() == PAGE_SIZE,
            "page buffer is {} bytes, expected {}",
            buf.len(),
            PAGE_SIZE
        );

        let frame = self.frame_for_read(page_no)?;
        let avail = frame.len;
        buf[..avail].copy_from_slice(&frame.data[..avail]);
        drop(frame);

        self.bytes_read.fetch_add(avail as u64, Ordering::Relaxed);
        Ok(avail)
    }

    /// Whole-page write fast path.
    pub fn write_page(&self, page_no: u64, buf: &[u8]) -> Result<usize> {
        ensure!(!self.file.is_read_only(), "page cache is read-only");
        ensure!(
            buf.len() == PAGE_SIZE,
            "page buffer is {} bytes, expected {}",
            buf.len(),
            PAGE_SIZE
        );

        let mut frame = self.frame_for_write(page_no)?;
        frame.data.copy_from_slice(buf);
        frame.state = PageState::Dirty;
        frame.len = PAGE_SIZE;
        drop(frame);

        self.bytes_written.fetch_add(PAGE_SIZE as u64, Ordering::Relaxed);
        Ok(PAGE_SIZE)
    }

    /// Writes back every dirty frame in ascending file-page order, then
    /// flushes the gate. A frame that fails to persist stays dirty and
    /// bound; the first such failure is returned after the sweep.
    pub fn flush(&self) -> Result<()> {
        if self.file.is_read_only() {
            return Ok(());
        }

        let mut resident: Vec<(u64, usize)> = {
            let pool = self.pool.lock();
            pool.map.iter().map(|(&page, &idx)| (page, idx)).collect()
        };
        resident.sort_unstable_by_key(|&(page, _)| page);

        let mut first_err: Option<eyre::Report> = None;
        for (page, idx) in resident {
            let mut frame = self.frames[idx].write();
            if frame.page_no != page || frame.state != PageState::Dirty {
                continue;
            }
            match self.file.write_page(page, &frame.data) {
                Ok(()) => frame.state = PageState::Clean,
                Err(e) => {
                    warn!("write-back of page {page} failed; frame stays dirty: {e:#}");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e).wrap_err("flush left dirty pages in the cache"),
            None => self.file.flush(),
        }
    }

    /// Resizes the buffer pool: flushes, drops every frame, reallocates at
    /// the new budget (floored at [`MIN_CACHE_SIZE`]) and resets the
    /// counters. Returns the effective size in bytes.
    pub fn set_cache_size(&mut self, cache_bytes: usize) -> Result<usize> {
        self.flush()?;

        let capacity = Self::frame_count(cache_bytes);
        self.frames = (0..capacity).map(|_| RwLock::new(FrameData::vacant())).collect();
        *self.pool.get_mut() = PoolState::new(capacity);
        self.reset_stats();

        Ok(capacity * PAGE_SIZE)
    }

    fn frame_for_read(&self, page_no: u64) -> Result<RwLockReadGuard<'_, FrameData>> {
        loop {
            let idx = self.lookup_or_load(page_no)?;
            let frame = self.frames[idx].read();
            if frame.page_no == page_no {
                return Ok(frame);
            }
            // Frame was rebound between lookup and lock; retry.
        }
    }

    fn frame_for_write(&self, page_no: u64) -> Result<RwLockWriteGuard<'_, FrameData>> {
        loop {
            let idx = self.lookup_or_load(page_no)?;
            let frame = self.frames[idx].write();
            if frame.page_no == page_no {
                return Ok(frame);
            }
        }
    }

    /// Resolves `page_no` to a frame index, loading the page from the gate
    /// on a miss. On a miss the binding is claimed in the map before any
    /// I/O happens, so concurrent lookups of the same page converge on one
    /// frame; they block on its lock until the load completes.
    fn lookup_or_load(&self, page_no: u64) -> Result<usize> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let idx = {
            let mut pool = self.pool.lock();
            if let Some(&idx) = pool.map.get(&page_no) {
                pool.lru.move_to_front(idx);
                return Ok(idx);
            }

            self.misses.fetch_add(1, Ordering::Relaxed);

            let idx = match pool.vacant.pop() {
                Some(idx) => idx,
                None => {
                    let Some(tail) = pool.lru.tail() else {
                        bail!("page cache has no frames to evict");
                    };
                    pool.lru.unlink(tail);
                    let old_page = pool.page_of[tail];
                    pool.map.remove(&old_page);
                    tail
                }
            };

            pool.map.insert(page_no, idx);
            pool.page_of[idx] = page_no;
            pool.lru.push_front(idx);
            idx
        };

        // Pool lock released; the victim's write-back and the new page's
        // load happen under the frame lock alone.
        let mut frame = self.frames[idx].write();

        if frame.state == PageState::Dirty {
            if let Err(e) = self.file.write_page(frame.page_no, &frame.data) {
                self.restore_binding(idx, page_no, frame.page_no);
                return Err(e).wrap_err_with(|| {
                    format!("failed to evict dirty page {}", frame.page_no)
                });
            }
            frame.state = PageState::Clean;
        }

        frame.page_no = page_no;
        frame.data.fill(0);
        match self.file.read_page(page_no, &mut frame.data) {
            Ok(n) => {
                frame.len = n;
                frame.state = PageState::Clean;
            }
            Err(e) => {
                frame.page_no = NOT_FOUND;
                frame.len = 0;
                frame.state = PageState::Clean;
                self.release_binding(idx, page_no);
                return Err(e);
            }
        }

        Ok(idx)
    }

    /// Undo a claimed binding after a failed victim write-back: the frame
    /// keeps its dirty old page and goes back into the map under it.
    fn restore_binding(&self, idx: usize, new_page: u64, old_page: u64) {
        let mut pool = self.pool.lock();
        if pool.page_of[idx] != new_page {
            // Someone else already reclaimed the slot; they own it now.
            return;
        }
        pool.map.remove(&new_page);
        pool.map.insert(old_page, idx);
        pool.page_of[idx] = old_page;
    }

    /// Undo a claimed binding after a failed load: the frame becomes
    /// vacant again.
    fn release_binding(&self, idx: usize, page_no: u64) {
        let mut pool = self.pool.lock();
        if pool.page_of[idx] != page_no {
            return;
        }
        pool.map.remove(&page_no);
        pool.page_of[idx] = NOT_FOUND;
        pool.lru.unlink(idx);
        pool.vacant.push(idx);
    }
}
