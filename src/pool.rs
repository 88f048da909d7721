//! The allocator core: owned pool state and the paging engine.
//!
//! All reads and writes against the virtual pool go through a bounded set of
//! big-class page buffers. Victim selection ranks candidates in strict
//! priority order — a buffer already holding the range, a partial overlap
//! (which must be reconciled anyway), an unmapped buffer, a clean buffer,
//! and finally a dirty buffer chosen FIFO — so that hot dirty pages are
//! written back as late as possible without letting long-clean pages
//! monopolize the slots.
//!
//! ```text
//! read/write ──▶ locked pages (write-through) ──▶ pull_raw ──▶ BackingStore
//!                                                  │
//!                                        victim selection + write-back
//! ```

use std::fmt;
use std::io;

use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::freelist::{BlockHeader, HEADER_SIZE, START_OFFSET};
use crate::page::{ClassId, PageClass, CLASS_ORDER};
use crate::store::BackingStore;
use crate::{VAddr, VSize};

/// Rounds a dirty page may dodge eviction before it is treated as a
/// preferred victim anyway.
pub(crate) const PAGE_MAX_CLEAN_SKIPS: u8 = 5;

/// Victim-selection ranks, best first. Ordering is significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FindState {
    Full,
    Partial,
    Empty,
    Clean,
    Dirty,
    None,
}

/// Traffic counters, reset by [`VirtAlloc::start`].
#[derive(Debug, Default, Clone)]
pub struct PoolStats {
    /// Live virtual bytes, block headers included.
    pub mem_used: VSize,
    /// High-water mark of `mem_used`.
    pub max_mem_used: VSize,
    /// Big pages read in from the store (swaps).
    pub page_reads: u64,
    /// Big pages written back to the store.
    pub page_writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool: {} bytes live (peak {}), {} page reads / {} writes, {:.1} KB in / {:.1} KB out",
            self.mem_used,
            self.max_mem_used,
            self.page_reads,
            self.page_writes,
            self.bytes_read as f64 / 1024.0,
            self.bytes_written as f64 / 1024.0,
        )
    }
}

/// The virtual-memory allocator.
///
/// Owns the backing store, the three page-buffer classes and the free-list
/// anchors. Constructed cold; [`start`](Self::start) initializes every slot
/// and the store, [`stop`](Self::stop) releases the store. Strictly
/// single-threaded and not re-entrant.
pub struct VirtAlloc<S> {
    pub(crate) store: S,
    pub(crate) pool_size: VSize,
    pub(crate) small: PageClass,
    pub(crate) medium: PageClass,
    pub(crate) big: PageClass,
    /// RAM-resident free-list head sentinel (`BASE_ADDR`).
    pub(crate) base_free_list: BlockHeader,
    /// Roving entry point into the circular free list; zero until the first
    /// allocation.
    pub(crate) free_pointer: VAddr,
    /// Next untouched store offset; only ever grows.
    pub(crate) pool_free_pos: VAddr,
    /// FIFO rotation hint for dirty-page eviction (big class).
    pub(crate) next_page_to_swap: i8,
    pub(crate) stats: PoolStats,
    started: bool,
}

impl<S: BackingStore> VirtAlloc<S> {
    /// Build an allocator from a validated geometry and a store.
    ///
    /// Panics if the geometry is degenerate; call
    /// [`PoolConfig::validate`] first to handle that gracefully.
    pub fn new(config: PoolConfig, store: S) -> Self {
        config.validate().expect("invalid pool geometry");
        Self {
            store,
            pool_size: config.pool_size,
            small: PageClass::new(config.small.count, config.small.size),
            medium: PageClass::new(config.medium.count, config.medium.size),
            big: PageClass::new(config.big.count, config.big.size),
            base_free_list: BlockHeader::default(),
            free_pointer: 0,
            pool_free_pos: 0,
            next_page_to_swap: 0,
            stats: PoolStats::default(),
            started: false,
        }
    }

    /// Reset all allocator state and initialize the backing store.
    ///
    /// Must be paired with [`stop`](Self::stop); starting twice is a
    /// contract violation.
    pub fn start(&mut self) -> io::Result<()> {
        assert!(!self.started, "start() called twice without stop()");
        self.free_pointer = 0;
        self.next_page_to_swap = 0;
        self.base_free_list = BlockHeader::default();
        self.pool_free_pos = START_OFFSET + HEADER_SIZE;
        self.stats = PoolStats::default();
        self.small.reset(false);
        self.medium.reset(false);
        self.big.reset(true);
        self.store.start()?;
        self.started = true;
        info!(
            "virtual pool started: {} bytes, pages {}x{}/{}x{}/{}x{}",
            self.pool_size,
            self.small.pages.len(),
            self.small.size,
            self.medium.pages.len(),
            self.medium.size,
            self.big.pages.len(),
            self.big.size,
        );
        Ok(())
    }

    /// Release the backing store. In-RAM page contents are discarded, not
    /// flushed; call [`flush`](Self::flush) first if they matter.
    pub fn stop(&mut self) -> io::Result<()> {
        if self.started {
            self.store.stop()?;
            self.started = false;
            info!("virtual pool stopped");
        }
        Ok(())
    }

    pub fn pool_size(&self) -> VSize {
        self.pool_size
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn class(&self, id: ClassId) -> &PageClass {
        match id {
            ClassId::Small => &self.small,
            ClassId::Medium => &self.medium,
            ClassId::Big => &self.big,
        }
    }

    pub(crate) fn class_mut(&mut self, id: ClassId) -> &mut PageClass {
        match id {
            ClassId::Small => &mut self.small,
            ClassId::Medium => &mut self.medium,
            ClassId::Big => &mut self.big,
        }
    }

    /// Write a big page back to the store if it is dirty.
    pub(crate) fn sync_big_page(&mut self, index: i8) -> io::Result<()> {
        let big_size = self.big.size;
        let page = &mut self.big.pages[index as usize];
        assert!(page.start != 0, "sync of an unmapped page");
        if page.dirty {
            let wrsize = (self.pool_size - page.start).min(big_size) as usize;
            self.store.write(page.start, &page.pool[..wrsize])?;
            page.dirty = false;
            page.clean_skips = 0;
            self.stats.page_writes += 1;
            self.stats.bytes_written += wrsize as u64;
            debug!("page {} written back ({} bytes at {})", index, wrsize, page.start);
        }
        Ok(())
    }

    /// Fill `buf` with the bytes at `[p, p + buf.len())`, preferring content
    /// still sitting in mapped big pages over the store.
    ///
    /// A request never exceeds the big page size, so at most two mapped
    /// pages can overlap it: one covering the front, one covering the tail.
    pub(crate) fn copy_raw(&mut self, buf: &mut [u8], mut p: VAddr) -> io::Result<()> {
        let big_size = self.big.size;
        let mut size = buf.len() as VSize;
        let mut cursor = 0usize;
        let mut i = self.big.free_index;
        while i != -1 && size > 0 {
            let page = &self.big.pages[i as usize];
            let next = page.next;
            if page.start != 0 {
                let page_end = page.start + big_size;
                if p >= page.start && p < page_end {
                    let offset = (p - page.start) as usize;
                    let copysize = size.min(page.size - offset as VSize) as usize;
                    buf[cursor..cursor + copysize]
                        .copy_from_slice(&page.pool[offset..offset + copysize]);
                    cursor += copysize;
                    p += copysize as VAddr;
                    size -= copysize as VSize;
                } else if p < page.start && p + size > page.start {
                    let offset = (page.start - p) as usize;
                    let copysize = (size - offset as VSize).min(page.size) as usize;
                    buf[cursor + offset..cursor + offset + copysize]
                        .copy_from_slice(&page.pool[..copysize]);
                    size = offset as VSize;
                }
            }
            i = next;
        }
        if size > 0 {
            self.store.read(p, &mut buf[cursor..cursor + size as usize])?;
            self.stats.bytes_read += size as u64;
        }
        Ok(())
    }

    /// Reverse of [`copy_raw`](Self::copy_raw): land `data` at `p`, updating
    /// mapped big pages in place and writing the remainder to the store.
    ///
    /// A mapped page is only touched (and marked dirty) when the incoming
    /// bytes actually differ, so syncing a clean lock never forces a
    /// spurious page write-back.
    pub(crate) fn save_raw(&mut self, data: &[u8], mut p: VAddr) -> io::Result<()> {
        let big_size = self.big.size;
        let mut size = data.len() as VSize;
        let mut cursor = 0usize;
        let mut i = self.big.free_index;
        while i != -1 && size > 0 {
            let page = &mut self.big.pages[i as usize];
            let next = page.next;
            if page.start != 0 {
                let page_end = page.start + big_size;
                if p >= page.start && p < page_end {
                    let offset = (p - page.start) as usize;
                    let copysize = size.min(page.size - offset as VSize) as usize;
                    let src = &data[cursor..cursor + copysize];
                    if page.dirty || &page.pool[offset..offset + copysize] != src {
                        page.pool[offset..offset + copysize].copy_from_slice(src);
                        page.dirty = true;
                    }
                    cursor += copysize;
                    p += copysize as VAddr;
                    size -= copysize as VSize;
                } else if p < page.start && p + size > page.start {
                    let offset = (page.start - p) as usize;
                    let copysize = (size - offset as VSize).min(page.size) as usize;
                    let src = &data[cursor + offset..cursor + offset + copysize];
                    if page.dirty || &page.pool[..copysize] != src {
                        page.pool[..copysize].copy_from_slice(src);
                        page.dirty = true;
                    }
                    size = offset as VSize;
                }
            }
            i = next;
        }
        if size > 0 {
            self.store.write(p, &data[cursor..cursor + size as usize])?;
            self.stats.bytes_written += size as u64;
        }
        Ok(())
    }

    /// Make `[p, p + size)` resident in some big page and return the page's
    /// index. The workhorse behind every raw access.
    ///
    /// Candidates are ranked FULL > PARTIAL > EMPTY > CLEAN > DIRTY-FIFO;
    /// every partially overlapping page met along the way is synced and
    /// invalidated so no partial overlap survives the call. With
    /// `forcestart` the mapping must begin exactly at `p`.
    pub(crate) fn pull_raw(
        &mut self,
        p: VAddr,
        size: VSize,
        readonly: bool,
        forcestart: bool,
    ) -> io::Result<i8> {
        assert!(p != 0 && p < self.pool_size);
        debug_assert!(size <= self.big.size);

        let big_size = self.big.size;
        let mut index: i8 = -1;
        let mut state = FindState::None;

        if let Some(i) = self.big.find_mapped_free(p, size, forcestart) {
            index = i;
            state = FindState::Full;
        } else {
            let new_page_end = p + big_size;
            let mut i = self.big.free_index;
            while i != -1 {
                let (start, next) = {
                    let page = &self.big.pages[i as usize];
                    (page.start, page.next)
                };
                if start != 0 {
                    let page_end = start + big_size;
                    if (p >= start && p < page_end)
                        || (new_page_end >= start && new_page_end <= page_end)
                    {
                        index = i;
                        self.sync_big_page(i)?;
                        self.big.pages[i as usize].start = 0;
                        state = FindState::Partial;
                    }
                } else if state != FindState::Partial {
                    index = i;
                    state = FindState::Empty;
                }
                if state > FindState::Clean {
                    let page = &mut self.big.pages[i as usize];
                    if !page.dirty {
                        index = i;
                        state = FindState::Clean;
                    } else {
                        page.clean_skips += 1;
                        if page.clean_skips >= PAGE_MAX_CLEAN_SKIPS {
                            index = i;
                            state = FindState::Clean;
                        } else if state != FindState::Dirty && i == self.next_page_to_swap {
                            index = i;
                            state = FindState::Dirty;
                        }
                    }
                }
                i = next;
            }
        }

        assert!(index != -1, "no free big pages available");

        if state != FindState::Full {
            if self.big.pages[index as usize].start != 0 {
                self.sync_big_page(index)?;
            }
            if state == FindState::Dirty {
                self.next_page_to_swap = self.big.pages[index as usize].next;
                if self.next_page_to_swap == -1 {
                    self.next_page_to_swap = self.big.free_index;
                }
            } else {
                self.next_page_to_swap = self.big.free_index;
            }
            let rdsize = (self.pool_size - p).min(big_size) as usize;
            let page = &mut self.big.pages[index as usize];
            page.start = p;
            self.store.read(p, &mut page.pool[..rdsize])?;
            self.stats.page_reads += 1;
            self.stats.bytes_read += rdsize as u64;
            debug!("page {} swapped to {} ({} bytes)", index, p, rdsize);
        }

        if !readonly {
            self.big.pages[index as usize].dirty = true;
        }
        debug_assert!(p >= self.big.pages[index as usize].start);
        Ok(index)
    }

    /// Land `data` at `p` through the page cache.
    pub(crate) fn push_raw(&mut self, p: VAddr, data: &[u8]) -> io::Result<()> {
        let index = self.pull_raw(p, data.len() as VSize, false, false)?;
        let page = &mut self.big.pages[index as usize];
        let offset = (p - page.start) as usize;
        page.pool[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy a locked page's buffer into the page cache so that paged I/O
    /// observes its current bytes.
    fn mirror_locked(&mut self, id: ClassId, index: i8) -> io::Result<()> {
        let (start, data) = {
            let page = &self.class(id).pages[index as usize];
            (page.start, page.pool[..page.size as usize].to_vec())
        };
        debug!("mirroring partially overlapping locked page at {}", start);
        self.push_raw(start, &data)
    }

    /// Read `size` bytes at `p` and return them as a borrowed slice.
    ///
    /// The slice lives in a page buffer: it is valid only until the next
    /// allocator call. Locked pages are consulted first, so a pinned range
    /// always reads its freshest bytes; a partially overlapping locked page
    /// is mirrored into the page cache before the fallback paged read.
    pub fn read(&mut self, p: VAddr, size: VSize) -> io::Result<&[u8]> {
        assert!(p != 0);
        let pend = p + size;

        let mut mirrors: Vec<(ClassId, i8)> = Vec::new();
        let mut full: Option<(ClassId, i8, usize)> = None;
        'scan: for id in CLASS_ORDER {
            let class = self.class(id);
            let mut i = class.locked_index;
            while i != -1 {
                let page = &class.pages[i as usize];
                let begin_overlaps = p >= page.start && p < page.start + page.size;
                let end_overlaps = p < page.start && pend > page.start;
                if begin_overlaps {
                    let offset = (p - page.start) as usize;
                    if offset as VSize + size <= page.size {
                        full = Some((id, i, offset));
                        break 'scan;
                    }
                }
                if begin_overlaps || end_overlaps {
                    mirrors.push((id, i));
                }
                i = page.next;
            }
        }

        for (id, i) in mirrors {
            self.mirror_locked(id, i)?;
        }
        if let Some((id, i, offset)) = full {
            let page = &self.class(id).pages[i as usize];
            return Ok(&page.pool[offset..offset + size as usize]);
        }

        let index = self.pull_raw(p, size, true, false)?;
        let page = &self.big.pages[index as usize];
        let offset = (p - page.start) as usize;
        Ok(&page.pool[offset..offset + size as usize])
    }

    /// Write `data` at `p`.
    ///
    /// Locked pages covering any part of the range are updated in place and
    /// marked dirty; a range fully inside one locked page short-circuits,
    /// everything else also lands in the page cache.
    pub fn write(&mut self, p: VAddr, data: &[u8]) -> io::Result<()> {
        assert!(p != 0);
        let size = data.len() as VSize;
        let pend = p + size;

        for id in CLASS_ORDER {
            let class = self.class_mut(id);
            let mut i = class.locked_index;
            while i != -1 {
                let page = &mut class.pages[i as usize];
                let begin_overlaps = p >= page.start && p < page.start + page.size;
                let end_overlaps = p < page.start && pend > page.start;
                if !page.dirty && (begin_overlaps || end_overlaps) {
                    page.dirty = true;
                }
                if begin_overlaps {
                    let offset = (p - page.start) as usize;
                    if offset as VSize + size <= page.size {
                        page.pool[offset..offset + data.len()].copy_from_slice(data);
                        return Ok(());
                    }
                    let fit = page.size as usize - offset;
                    page.pool[offset..offset + fit].copy_from_slice(&data[..fit]);
                } else if end_overlaps {
                    let offset = (page.start - p) as usize;
                    let fit = (data.len() - offset).min(page.size as usize);
                    page.pool[..fit].copy_from_slice(&data[offset..offset + fit]);
                }
                i = page.next;
            }
        }

        self.push_raw(p, data)
    }

    /// Write back every dirty big page. Locked pages are the lock holders'
    /// responsibility and are left alone.
    pub fn flush(&mut self) -> io::Result<()> {
        let mut i = self.big.free_index;
        while i != -1 {
            let (start, next) = {
                let page = &self.big.pages[i as usize];
                (page.start, page.next)
            };
            if start != 0 {
                self.sync_big_page(i)?;
            }
            i = next;
        }
        Ok(())
    }

    /// [`flush`](Self::flush), then drop every big-page mapping so the next
    /// access reloads from the store.
    pub fn clear_pages(&mut self) -> io::Result<()> {
        let mut i = self.big.free_index;
        while i != -1 {
            let (start, next) = {
                let page = &self.big.pages[i as usize];
                (page.start, page.next)
            };
            if start != 0 {
                self.sync_big_page(i)?;
                self.big.pages[i as usize].start = 0;
            }
            i = next;
        }
        Ok(())
    }

    /// Stream zeros into `[start, start + n)` of the store, using big page 0
    /// as the scratch buffer. Intended for pre-zeroing a fresh pool right
    /// after [`start`](Self::start), before any page is mapped.
    pub fn write_zeros(&mut self, start: VAddr, n: VSize) -> io::Result<()> {
        assert!(
            self.big.pages[0].start == 0,
            "write_zeros needs an unmapped scratch page"
        );
        let big_size = self.big.size;
        self.big.pages[0].pool.fill(0);
        let mut written: VSize = 0;
        while written < n {
            let chunk = (n - written).min(big_size) as usize;
            self.store
                .write(start + written, &self.big.pages[0].pool[..chunk])?;
            written += chunk as VSize;
        }
        Ok(())
    }

    /// Big-class slots that are neither locked nor mapping anything.
    pub fn free_big_pages(&self) -> u8 {
        self.big.free_unmapped()
    }

    pub fn unlocked_small_pages(&self) -> u8 {
        self.small.unlocked()
    }

    pub fn unlocked_medium_pages(&self) -> u8 {
        self.medium.unlocked()
    }

    pub fn unlocked_big_pages(&self) -> u8 {
        self.big.unlocked()
    }

    pub fn small_page_count(&self) -> u8 {
        self.small.pages.len() as u8
    }

    pub fn medium_page_count(&self) -> u8 {
        self.medium.pages.len() as u8
    }

    pub fn big_page_count(&self) -> u8 {
        self.big.pages.len() as u8
    }

    pub fn small_page_size(&self) -> VSize {
        self.small.size
    }

    pub fn medium_page_size(&self) -> VSize {
        self.medium.size
    }

    pub fn big_page_size(&self) -> VSize {
        self.big.size
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ClassConfig;
    use crate::store::MemStore;

    pub(crate) fn test_config() -> PoolConfig {
        PoolConfig {
            pool_size: 4096,
            small: ClassConfig { count: 2, size: 16 },
            medium: ClassConfig { count: 2, size: 64 },
            big: ClassConfig { count: 4, size: 256 },
        }
    }

    pub(crate) fn started() -> VirtAlloc<MemStore> {
        let config = test_config();
        let mut alloc = VirtAlloc::new(config, MemStore::new(config.pool_size));
        alloc.start().unwrap();
        alloc
    }

    /// Mapped free big pages must be pairwise disjoint, and so must locked
    /// pages across all classes.
    pub(crate) fn assert_disjoint(alloc: &VirtAlloc<MemStore>) {
        let mut free_ranges: Vec<(VAddr, VAddr)> = Vec::new();
        let mut i = alloc.big.free_index;
        while i != -1 {
            let page = &alloc.big.pages[i as usize];
            if page.start != 0 {
                free_ranges.push((page.start, page.start + page.size));
            }
            i = page.next;
        }
        let mut locked_ranges: Vec<(VAddr, VAddr)> = Vec::new();
        for id in CLASS_ORDER {
            let class = alloc.class(id);
            let mut i = class.locked_index;
            while i != -1 {
                let page = &class.pages[i as usize];
                if page.size > 0 {
                    locked_ranges.push((page.start, page.start + page.size));
                }
                i = page.next;
            }
        }
        for ranges in [&free_ranges, &locked_ranges] {
            for (n, a) in ranges.iter().enumerate() {
                for b in ranges.iter().skip(n + 1) {
                    assert!(
                        a.1 <= b.0 || b.1 <= a.0,
                        "overlapping mapped ranges {a:?} and {b:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_start_resets_state() {
        let alloc = started();
        assert_eq!(alloc.pool_free_pos, START_OFFSET + HEADER_SIZE);
        assert_eq!(alloc.free_pointer, 0);
        assert_eq!(alloc.free_big_pages(), 4);
        assert_eq!(alloc.unlocked_small_pages(), 2);
    }

    #[test]
    #[should_panic(expected = "start() called twice")]
    fn test_double_start_panics() {
        let mut alloc = started();
        alloc.start().unwrap();
    }

    #[test]
    fn test_stop_start_cycle() {
        let mut alloc = started();
        alloc.write(100, b"keep").unwrap();
        alloc.flush().unwrap();
        alloc.stop().unwrap();
        alloc.start().unwrap();
        assert_eq!(alloc.read(100, 4).unwrap(), b"keep");
    }

    #[test]
    fn test_write_read_roundtrip() {
        let mut alloc = started();
        alloc.write(500, b"hello world").unwrap();
        assert_eq!(alloc.read(500, 11).unwrap(), b"hello world");
        assert_disjoint(&alloc);
    }

    #[test]
    fn test_read_spanning_two_pages() {
        let mut alloc = started();
        // Map two adjacent pages, then read a range straddling the seam.
        let pattern: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        alloc.write(256, &pattern).unwrap();
        alloc.write(512, &pattern).unwrap();
        let bytes = alloc.read(480, 64).unwrap().to_vec();
        assert_eq!(&bytes[..32], &pattern[32..]);
        assert_eq!(&bytes[32..], &pattern[..32]);
        assert_disjoint(&alloc);
    }

    #[test]
    fn test_eviction_and_reload() {
        let mut alloc = started();
        // Touch more distinct pages than the big class holds.
        for n in 0..8u32 {
            let addr = 256 + n * 256;
            let byte = n as u8 + 1;
            alloc.write(addr, &[byte; 16]).unwrap();
        }
        for n in 0..8u32 {
            let addr = 256 + n * 256;
            let byte = n as u8 + 1;
            assert_eq!(alloc.read(addr, 16).unwrap(), &[byte; 16]);
        }
        assert!(alloc.stats.page_writes > 0, "evictions must write back");
        assert_disjoint(&alloc);
    }

    #[test]
    fn test_flush_lands_in_store() {
        let mut alloc = started();
        alloc.write(300, b"durable").unwrap();
        assert_ne!(&alloc.store().contents()[300..307], b"durable");
        alloc.flush().unwrap();
        assert_eq!(&alloc.store().contents()[300..307], b"durable");
    }

    #[test]
    fn test_flush_is_idempotent_on_clean_pages() {
        let mut alloc = started();
        alloc.write(300, b"once").unwrap();
        alloc.flush().unwrap();
        let writes = alloc.stats.page_writes;
        alloc.flush().unwrap();
        assert_eq!(alloc.stats.page_writes, writes);
    }

    #[test]
    fn test_clear_pages_forces_reload() {
        let mut alloc = started();
        alloc.write(700, b"reload me").unwrap();
        alloc.clear_pages().unwrap();
        assert_eq!(alloc.free_big_pages(), 4);
        let reads = alloc.stats.page_reads;
        assert_eq!(alloc.read(700, 9).unwrap(), b"reload me");
        assert!(alloc.stats.page_reads > reads);
    }

    #[test]
    fn test_full_hit_avoids_io() {
        let mut alloc = started();
        alloc.write(600, &[5; 32]).unwrap();
        let reads = alloc.stats.page_reads;
        alloc.read(610, 8).unwrap();
        alloc.write(620, &[6; 4]).unwrap();
        assert_eq!(alloc.stats.page_reads, reads, "resident range must not swap");
    }

    #[test]
    fn test_write_zeros() {
        let mut alloc = started();
        alloc.write_zeros(0, 4096).unwrap();
        assert!(alloc.store().contents().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pull_at_pool_tail_truncates_read() {
        let mut alloc = started();
        // Last page only covers 4096 - 3968 = 128 bytes.
        alloc.write(3968, &[9; 64]).unwrap();
        assert_eq!(alloc.read(3968, 64).unwrap(), &[9; 64]);
    }

    #[test]
    fn test_full_pool_sweep_bounded_write_backs() {
        let config = PoolConfig {
            pool_size: 64 * 1024,
            small: ClassConfig { count: 2, size: 16 },
            medium: ClassConfig { count: 2, size: 64 },
            big: ClassConfig { count: 8, size: 512 },
        };
        let mut alloc = VirtAlloc::new(config, MemStore::new(config.pool_size));
        alloc.start().unwrap();

        let chunks = config.pool_size / 512;
        for n in 0..chunks {
            // Address 0 is the null sentinel, so the first chunk starts
            // just past it.
            let (addr, len) = if n == 0 { (8, 504) } else { (n * 512, 512) };
            alloc.write(addr, &vec![n as u8; len as usize]).unwrap();
        }
        for n in (0..chunks).rev() {
            let (addr, len) = if n == 0 { (8, 504) } else { (n * 512, 512) };
            assert_eq!(
                alloc.read(addr, len).unwrap(),
                vec![n as u8; len as usize].as_slice()
            );
        }
        // Each page's content crosses the store roughly once, plus slack
        // for the buffers still resident when the read sweep begins.
        let bound = chunks as u64 + 2 * config.big.count as u64;
        assert!(
            alloc.stats.page_writes <= bound,
            "{} write-backs exceeds bound {}",
            alloc.stats.page_writes,
            bound
        );
        assert_disjoint(&alloc);
    }

    #[test]
    fn test_dirty_fifo_rotates_victims() {
        let mut alloc = started();
        // Dirty every page, then keep touching new ranges; the FIFO hint
        // must spread evictions instead of thrashing one slot.
        for n in 0..4u32 {
            alloc.write(256 + n * 256, &[1; 8]).unwrap();
        }
        let first_victim = alloc.next_page_to_swap;
        for n in 4..10u32 {
            alloc.write(256 + n * 256, &[2; 8]).unwrap();
        }
        assert_ne!(
            alloc.next_page_to_swap, first_victim,
            "FIFO hint should have advanced"
        );
        assert_disjoint(&alloc);
    }
}
