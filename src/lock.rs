//! Pinning virtual ranges into page buffers.
//!
//! A lock keeps `[addr, addr + len)` resident in one buffer for as long as
//! it is held, so the bytes stay addressable through
//! [`lock_slice`](VirtAlloc::lock_slice) across arbitrary allocator
//! traffic. Two flavors differ in how they treat existing locks:
//!
//! - [`make_data_lock`](VirtAlloc::make_data_lock) is *elastic*: it may
//!   shrink its own request to dodge a pinned lock, adopt a buffer that
//!   already maps the address, evict stale unpinned locks that stand in the
//!   way, and resolve a begin-overlap by inheriting the pinned buffer's
//!   bytes and shrinking that buffer to its prefix.
//! - [`make_fitting_lock`](VirtAlloc::make_fitting_lock) is *strict*: it
//!   never resizes an existing pinned lock, instead fitting the request
//!   into the gap (or into the containing lock) and reporting the span it
//!   actually got.
//!
//! Released small/medium buffers stay on the locked chain as hot candidates
//! for the next matching lock; released big buffers return to the free
//! chain so they can resume general paged I/O.

use std::io;

use tracing::debug;

use crate::page::{ClassId, CLASS_ORDER};
use crate::store::BackingStore;
use crate::{VAddr, VSize, VirtAlloc};

/// A held lock: the pinned virtual range. Pass `addr` to
/// [`VirtAlloc::lock_slice`] / [`VirtAlloc::release_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedRange {
    pub addr: VAddr,
    /// Span actually granted; may be shorter than requested when the range
    /// had to fit around other pinned locks.
    pub len: VSize,
}

impl<S: BackingStore> VirtAlloc<S> {
    /// Locate the locked buffer whose mapped range contains `p`.
    fn find_locked_any(&self, p: VAddr) -> Option<(ClassId, i8)> {
        for id in CLASS_ORDER {
            if let Some(i) = self.class(id).find_locked(p) {
                return Some((id, i));
            }
        }
        None
    }

    /// Borrow the pinned bytes at `p` (which must lie inside a locked
    /// range) up to the end of the owning buffer's mapping.
    pub fn lock_slice(&self, p: VAddr) -> &[u8] {
        let (id, i) = self
            .find_locked_any(p)
            .expect("lock_slice: address is not locked");
        let page = &self.class(id).pages[i as usize];
        let offset = (p - page.start) as usize;
        &page.pool[offset..page.size as usize]
    }

    /// Mutable variant of [`lock_slice`](Self::lock_slice); marks the
    /// buffer dirty.
    pub fn lock_slice_mut(&mut self, p: VAddr) -> &mut [u8] {
        let (id, i) = self
            .find_locked_any(p)
            .expect("lock_slice_mut: address is not locked");
        let page = &mut self.class_mut(id).pages[i as usize];
        page.dirty = true;
        let offset = (p - page.start) as usize;
        &mut page.pool[offset..page.size as usize]
    }

    /// Write a locked buffer's current bytes back through the page cache /
    /// store. The dirty flag is left for the caller to manage.
    pub(crate) fn sync_locked_page(&mut self, id: ClassId, index: i8) -> io::Result<()> {
        let (start, size, dirty) = {
            let page = &self.class(id).pages[index as usize];
            (page.start, page.size, page.dirty)
        };
        assert!(start != 0, "sync of an unmapped locked page");
        if dirty {
            let data = self.class(id).pages[index as usize].pool[..size as usize].to_vec();
            self.save_raw(&data, start)?;
        }
        Ok(())
    }

    /// Move a slot from the free chain to the locked chain.
    ///
    /// For the big class the data is made resident first, so the slot
    /// arrives already loaded; a mapping shorter than the class size is
    /// synced immediately because its tail lies outside the lock range and
    /// would otherwise be lost to the holder's writes.
    pub(crate) fn lock_page(&mut self, id: ClassId, ptr: VAddr, size: VSize) -> io::Result<i8> {
        let index;
        if id == ClassId::Big {
            // The eventual readonly flag is applied by the caller.
            self.pull_raw(ptr, size, true, true)?;
            index = self
                .big
                .find_mapped_free(ptr, size, true)
                .expect("freshly pulled page vanished");
            if size < self.big.size {
                self.sync_big_page(index)?;
            }
        } else {
            index = self.class(id).free_index;
        }

        self.class_mut(id).unlink_free(index);
        if id == ClassId::Big && self.next_page_to_swap == index {
            self.next_page_to_swap = self.big.free_index;
        }
        self.class_mut(id).push_locked(index);
        debug!("locked slot {:?}/{} for {}", id, index, ptr);
        Ok(index)
    }

    /// Move a locked slot back to the free chain, returning its successor
    /// in the locked chain (so eviction can continue a walk).
    ///
    /// Small/medium buffers are synced unconditionally. A big buffer is
    /// synced only when it was shrunk below the class size — a shrunk
    /// buffer cannot serve as a normal I/O page, so its mapping is dropped
    /// and the full size restored.
    pub(crate) fn free_locked_page(&mut self, id: ClassId, index: i8) -> io::Result<i8> {
        if id != ClassId::Big {
            self.sync_locked_page(id, index)?;
        } else if self.big.pages[index as usize].size < self.big.size {
            self.sync_locked_page(id, index)?;
            let big_size = self.big.size;
            let page = &mut self.big.pages[index as usize];
            page.start = 0;
            page.size = big_size;
        }

        let class = self.class_mut(id);
        let ret = class.pages[index as usize].next;
        class.unlink_locked(index);
        class.push_free(index);
        class.pages[index as usize].locks = 0;
        if id == ClassId::Big && self.next_page_to_swap == -1 {
            self.next_page_to_swap = self.big.free_index;
        }
        debug!("released slot {:?}/{} to the free chain", id, index);
        Ok(ret)
    }

    /// Pin `[ptr, ptr + size)` into the smallest class that fits,
    /// resolving any overlap with existing locks.
    ///
    /// Returns the pinned range (possibly shrunk to dodge a pinned
    /// neighbor), or `None` when every candidate slot in every class is
    /// pinned. Re-locking an address already pinned must not request a
    /// smaller size than the existing lock holds.
    pub fn make_data_lock(
        &mut self,
        ptr: VAddr,
        mut size: VSize,
        readonly: bool,
    ) -> io::Result<Option<LockedRange>> {
        assert!(ptr != 0, "lock of the null address");
        assert!(size <= self.big.size, "lock larger than a big page");

        let mut pinfo = if size <= self.small.size {
            ClassId::Small
        } else if size <= self.medium.size {
            ClassId::Medium
        } else {
            ClassId::Big
        };

        let mut chosen: Option<(ClassId, i8)> = None;
        let mut old_slot: Option<(ClassId, i8)> = None;
        let mut sec_slot: Option<(ClassId, i8)> = None;
        let mut fix_beginning = false;
        let mut shrunk = false;

        'scan: for id in CLASS_ORDER {
            let mut i = self.class(id).locked_index;
            while i != -1 {
                let (pstart, psize, plocks, pnext) = {
                    let page = &self.class(id).pages[i as usize];
                    (page.start, page.size, page.locks, page.next)
                };
                if pstart == ptr {
                    if pinfo != id {
                        if plocks == 0 {
                            // Stale lock of another size class; clear it out.
                            i = self.free_locked_page(id, i)?;
                            continue;
                        }
                        // Still pinned in another (resized) class: adopt it.
                        if self.class(id).size < self.class(pinfo).size {
                            size = size.min(self.class(id).size);
                        }
                        pinfo = id;
                    } else if psize > size {
                        debug_assert!(plocks == 0);
                        // Unpinned leftover is oversized; park the excess
                        // tail back in the page cache and shrink.
                        let tail =
                            self.class(id).pages[i as usize].pool[size as usize..psize as usize].to_vec();
                        self.save_raw(&tail, ptr + size)?;
                        self.class_mut(id).pages[i as usize].size = size;
                    }
                    chosen = Some((id, i));
                    if self.class(id).pages[i as usize].size == size {
                        break 'scan;
                    }
                } else {
                    let end_overlaps = ptr < pstart && ptr + size > pstart;
                    let begin_overlaps = ptr > pstart && ptr < pstart + psize;
                    if plocks > 0 {
                        if end_overlaps {
                            // Shrink the request so it stops short of the
                            // pinned lock.
                            size = pstart - ptr;
                            shrunk = true;
                        } else if begin_overlaps {
                            // Resolved after a slot is chosen; the chosen
                            // slot itself could be an overlap candidate.
                            fix_beginning = true;
                        }
                    } else if end_overlaps || begin_overlaps {
                        // Unpinned overlapping leftovers would stand in the
                        // way forever; evict them now.
                        i = self.free_locked_page(id, i)?;
                        continue;
                    } else if old_slot.is_none() {
                        if pinfo == id {
                            old_slot = Some((id, i));
                        } else if sec_slot.is_none() && self.class(pinfo).size < self.class(id).size
                        {
                            sec_slot = Some((id, i));
                        }
                    }
                }
                i = pnext;
            }
        }

        if let Some((cid, ci)) = chosen {
            debug_assert!(size >= self.class(cid).pages[ci as usize].size);
            debug_assert!(!fix_beginning);
        }

        // A request shrunk below the medium size no longer deserves a big
        // slot; big slots are precious as the only paged-I/O buffers.
        if shrunk
            && size <= self.medium.size
            && pinfo == ClassId::Big
            && chosen.map_or(true, |(cid, ci)| self.class(cid).pages[ci as usize].locks == 0)
        {
            let old_pinfo = pinfo;
            if size <= self.small.size {
                if self.small.free_index != -1 {
                    pinfo = ClassId::Small;
                } else if let Some(idx) = self.small.find_unused_locked() {
                    pinfo = ClassId::Small;
                    old_slot = Some((ClassId::Small, idx));
                }
            }
            if pinfo == old_pinfo {
                if self.medium.free_index != -1 {
                    pinfo = ClassId::Medium;
                } else if let Some(idx) = self.medium.find_unused_locked() {
                    pinfo = ClassId::Medium;
                    old_slot = Some((ClassId::Medium, idx));
                }
            }
            if pinfo != old_pinfo {
                if let Some((cid, ci)) = chosen.take() {
                    self.free_locked_page(cid, ci)?;
                }
            }
        }

        let (cid, slot);
        if let Some((existing_cid, existing_slot)) = chosen {
            // Reusing a buffer that already maps the address; widen its
            // content if the request outgrew it.
            let current = self.class(existing_cid).pages[existing_slot as usize].size;
            if size > current {
                let mut buf = vec![0u8; (size - current) as usize];
                self.copy_raw(&mut buf, ptr + current)?;
                self.class_mut(existing_cid).pages[existing_slot as usize].pool
                    [current as usize..size as usize]
                    .copy_from_slice(&buf);
            }
            cid = existing_cid;
            slot = existing_slot;
        } else {
            if self.class(pinfo).free_index == -1 && old_slot.is_none() {
                // Preferred class is full; try a bigger one.
                if self.class(pinfo).size < self.medium.size && self.medium.free_index != -1 {
                    pinfo = ClassId::Medium;
                } else if self.class(pinfo).size < self.big.size && self.big.free_index != -1 {
                    pinfo = ClassId::Big;
                }
            }

            // Bytes already valid at the front of the new buffer.
            let mut copy_offset: VSize = 0;
            let new_slot;
            if self.class(pinfo).free_index != -1 {
                if pinfo == ClassId::Big {
                    // lock_page loads big pages up front.
                    copy_offset = size;
                }
                new_slot = self.lock_page(pinfo, ptr, size)?;
            } else {
                if old_slot.is_none() {
                    if let Some((sid, si)) = sec_slot {
                        pinfo = sid;
                        old_slot = Some((sid, si));
                    }
                }
                match old_slot {
                    Some((oid, oi)) => {
                        debug_assert!(oid == pinfo);
                        self.sync_locked_page(oid, oi)?;
                        self.class_mut(oid).pages[oi as usize].dirty = false;
                        new_slot = oi;
                    }
                    None => {
                        debug!("data lock at {} denied: all slots pinned", ptr);
                        return Ok(None);
                    }
                }
            }

            if fix_beginning {
                // A pinned lock starts before us and reaches into our
                // range. Its bytes are the authoritative version of the
                // overlap: copy them in, then shrink it to its prefix so
                // this lock owns the tail. Only possible once the target
                // slot is known, since the slot choice may evict buffers.
                let mut fixed = false;
                for id in CLASS_ORDER {
                    let mut i = self.class(id).locked_index;
                    while i != -1 {
                        let (pstart, psize, pnext) = {
                            let page = &self.class(id).pages[i as usize];
                            (page.start, page.size, page.next)
                        };
                        if !(id == pinfo && i == new_slot)
                            && ptr > pstart
                            && ptr < pstart + psize
                        {
                            debug_assert!(!fixed);
                            let overlap_off = (ptr - pstart) as usize;
                            let copysize = (psize - overlap_off as VSize).min(size);
                            let data = self.class(id).pages[i as usize].pool
                                [overlap_off..overlap_off + copysize as usize]
                                .to_vec();
                            self.class_mut(pinfo).pages[new_slot as usize].pool
                                [..copysize as usize]
                                .copy_from_slice(&data);
                            copy_offset = copy_offset.max(copysize);
                            self.class_mut(id).pages[i as usize].size = overlap_off as VSize;
                            fixed = true;
                        }
                        i = pnext;
                    }
                }
            }

            if copy_offset < size {
                let mut buf = vec![0u8; (size - copy_offset) as usize];
                self.copy_raw(&mut buf, ptr + copy_offset)?;
                self.class_mut(pinfo).pages[new_slot as usize].pool
                    [copy_offset as usize..size as usize]
                    .copy_from_slice(&buf);
            }
            self.class_mut(pinfo).pages[new_slot as usize].start = ptr;
            cid = pinfo;
            slot = new_slot;
        }

        let page = &mut self.class_mut(cid).pages[slot as usize];
        if !page.dirty {
            page.dirty = !readonly;
        }
        page.locks += 1;
        page.size = size;
        debug_assert!(size <= self.class(cid).size);
        debug!("data lock at {} ({} bytes) in {:?}/{}", ptr, size, cid, slot);
        Ok(Some(LockedRange { addr: ptr, len: size }))
    }

    /// Pin `ptr` without disturbing any existing pinned lock.
    ///
    /// If `ptr` already lies inside a locked buffer, that buffer is shared
    /// and the span clipped to what it holds. Otherwise the request is
    /// shrunk to stop short of any pinned lock it would run into, a slot is
    /// drawn from whatever class can host the result (largest first,
    /// falling back to a smaller class with a further clipped span), and
    /// the data is loaded. The granted span is reported in the returned
    /// range.
    pub fn make_fitting_lock(
        &mut self,
        ptr: VAddr,
        mut size: VSize,
        readonly: bool,
    ) -> io::Result<Option<LockedRange>> {
        assert!(ptr != 0, "lock of the null address");
        size = size.min(self.big.size);

        let mut unused: [Option<i8>; 3] = [None, None, None];
        let mut found: Option<(ClassId, i8)> = None;
        'scan: for id in CLASS_ORDER {
            let mut i = self.class(id).locked_index;
            while i != -1 {
                let (pstart, psize, plocks, pnext) = {
                    let page = &self.class(id).pages[i as usize];
                    (page.start, page.size, page.locks, page.next)
                };
                if ptr >= pstart && ptr < pstart + psize {
                    found = Some((id, i));
                    break 'scan;
                }
                if ptr < pstart && ptr + size > pstart {
                    if plocks == 0 {
                        i = self.free_locked_page(id, i)?;
                        continue;
                    }
                    // Clip to the gap before the pinned lock.
                    size = pstart - ptr;
                }
                if plocks == 0 && unused[id.pos()].is_none() {
                    unused[id.pos()] = Some(i);
                }
                i = pnext;
            }
        }

        let (cid, index);
        if let Some((fid, fi)) = found {
            let page = &self.class(fid).pages[fi as usize];
            let offset = ptr - page.start;
            size = size.min(page.size - offset);
            cid = fid;
            index = fi;
        } else {
            let mut pick: Option<ClassId> = None;
            let mut undersized: Option<ClassId> = None;
            for id in CLASS_ORDER {
                if self.class(id).free_index != -1 || unused[id.pos()].is_some() {
                    if size <= self.class(id).size {
                        pick = Some(id);
                    } else {
                        undersized = Some(id);
                    }
                }
            }
            let pid = match (pick, undersized) {
                (Some(id), _) => id,
                (None, Some(id)) => {
                    // Nothing big enough anywhere; grant what the largest
                    // available class can hold.
                    size = self.class(id).size;
                    id
                }
                (None, None) => {
                    debug!("fitting lock at {} denied: all slots pinned", ptr);
                    return Ok(None);
                }
            };

            let sync_pool;
            let idx;
            if self.class(pid).free_index != -1 {
                idx = self.lock_page(pid, ptr, size)?;
                // Big pages arrive loaded from lock_page.
                sync_pool = pid != ClassId::Big;
            } else {
                idx = unused[pid.pos()].unwrap();
                self.sync_locked_page(pid, idx)?;
                self.class_mut(pid).pages[idx as usize].dirty = false;
                sync_pool = true;
            }
            if sync_pool {
                let mut buf = vec![0u8; size as usize];
                self.copy_raw(&mut buf, ptr)?;
                self.class_mut(pid).pages[idx as usize].pool[..size as usize]
                    .copy_from_slice(&buf);
            }
            let page = &mut self.class_mut(pid).pages[idx as usize];
            page.start = ptr;
            page.size = size;
            cid = pid;
            index = idx;
        }

        let page = &mut self.class_mut(cid).pages[index as usize];
        page.locks += 1;
        if !page.dirty {
            page.dirty = !readonly;
        }
        debug!("fitting lock at {} ({} bytes) in {:?}/{}", ptr, size, cid, index);
        Ok(Some(LockedRange { addr: ptr, len: size }))
    }

    /// Drop one pin on the lock covering `ptr`.
    ///
    /// When the pin count reaches zero, a big-class buffer rejoins the free
    /// chain (resuming paged-I/O duty); small/medium buffers stay on the
    /// locked chain as hot candidates for the next matching lock.
    pub fn release_lock(&mut self, ptr: VAddr) -> io::Result<()> {
        let (id, index) = self
            .find_locked_any(ptr)
            .expect("release of an address that is not locked");
        let page = &mut self.class_mut(id).pages[index as usize];
        assert!(page.locks > 0, "release of an address that is not locked");
        page.locks -= 1;
        if page.locks == 0 {
            if let Some(big_index) = self.big.find_locked(ptr) {
                self.free_locked_page(ClassId::Big, big_index)?;
            }
        }
        Ok(())
    }
}
