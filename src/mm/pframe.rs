//! Page-frame cache (component H): the global map from (memory object,
//! page index) to the one physical frame backing it, plus pin/dirty/
//! writeback bookkeeping and LRU eviction.
//!
//! Busy frames (mid fill, mid writeback) don't block inside this module —
//! consistent with this crate's "context parameter, not hidden globals"
//! discipline, a caller that hits a busy frame sleeps cancellably on the
//! [`WaitQueue`] this cache hands back, then retries `get`.

use crate::{
    error::{KernelError, KernelResult},
    mm::{mmobj::MmObjId, PhysFrame},
    sync::WaitQueue,
};
use alloc::collections::BTreeMap;

/// Key identifying one page-frame slot: a memory object and the page
/// index within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameKey {
    pub obj: MmObjId,
    pub index: usize,
}

struct Entry {
    frame: PhysFrame,
    dirty: bool,
    pinned: u32,
    busy: bool,
    waiters: WaitQueue,
    last_used: u64,
}

/// Caches the single resident frame for each (object, index) pair in the
/// system. Invariant (spec.md §8): at most one resident frame exists per
/// key, enforced by `BTreeMap` keying.
#[derive(Default)]
pub struct PageFrameCache {
    entries: BTreeMap<FrameKey, Entry>,
    clock: u64,
}

impl PageFrameCache {
    pub const fn new() -> PageFrameCache {
        PageFrameCache {
            entries: BTreeMap::new(),
            clock: 0,
        }
    }

    fn touch(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up the frame for `key`, if resident and not currently busy.
    /// Returns `Err(Interrupted)`-free `None`-like `Busy` signal via the
    /// waiters queue: callers check `is_busy` before calling `get`.
    pub fn is_busy(&self, key: FrameKey) -> bool {
        self.entries.get(&key).is_some_and(|e| e.busy)
    }

    pub fn waiters(&mut self, key: FrameKey) -> &mut WaitQueue {
        &mut self.entries.entry(key).or_insert_with(|| Entry {
            frame: PhysFrame::default(),
            dirty: false,
            pinned: 0,
            busy: true,
            waiters: WaitQueue::new(),
            last_used: 0,
        }).waiters
    }

    pub fn get(&mut self, key: FrameKey) -> Option<PhysFrame> {
        let now = self.touch();
        let entry = self.entries.get_mut(&key)?;
        if entry.busy {
            return None;
        }
        entry.last_used = now;
        Some(entry.frame)
    }

    /// Install a freshly filled frame as resident and not busy.
    pub fn insert(&mut self, key: FrameKey, frame: PhysFrame) {
        let now = self.touch();
        self.entries.insert(
            key,
            Entry {
                frame,
                dirty: false,
                pinned: 0,
                busy: false,
                waiters: WaitQueue::new(),
                last_used: now,
            },
        );
    }

    pub fn remove(&mut self, key: FrameKey) -> Option<PhysFrame> {
        self.entries.remove(&key).map(|e| e.frame)
    }

    pub fn pin(&mut self, key: FrameKey) {
        if let Some(e) = self.entries.get_mut(&key) {
            e.pinned += 1;
        }
    }

    pub fn unpin(&mut self, key: FrameKey) {
        if let Some(e) = self.entries.get_mut(&key) {
            e.pinned = e.pinned.saturating_sub(1);
        }
    }

    pub fn mark_dirty(&mut self, key: FrameKey) {
        if let Some(e) = self.entries.get_mut(&key) {
            e.dirty = true;
        }
    }

    pub fn mark_clean(&mut self, key: FrameKey) {
        if let Some(e) = self.entries.get_mut(&key) {
            e.dirty = false;
        }
    }

    pub fn is_dirty(&self, key: FrameKey) -> bool {
        self.entries.get(&key).is_some_and(|e| e.dirty)
    }

    /// Flush (writeback) `key`: the caller supplies the actual I/O;
    /// bookkeeping here only clears the dirty bit on success.
    pub fn flush(&mut self, key: FrameKey, writeback: impl FnOnce(PhysFrame) -> KernelResult<()>) -> KernelResult<()> {
        let Some(entry) = self.entries.get(&key) else {
            return Ok(());
        };
        if !entry.dirty {
            return Ok(());
        }
        writeback(entry.frame)?;
        self.mark_clean(key);
        Ok(())
    }

    /// Pick an eviction victim: the least-recently-used unpinned, clean,
    /// non-busy frame. Callers should `flush` dirty frames before
    /// eviction is attempted (the writeback daemon's job); this picks only
    /// among frames already clean to avoid evicting un-written data.
    pub fn lru_victim(&self) -> Option<FrameKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.pinned == 0 && !e.busy && !e.dirty)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| *k)
    }

    pub fn evict(&mut self, key: FrameKey) -> KernelResult<PhysFrame> {
        let entry = self.entries.get(&key).ok_or(KernelError::NotFound)?;
        if entry.pinned != 0 || entry.busy {
            return Err(KernelError::InvalidArg);
        }
        Ok(self.entries.remove(&key).unwrap().frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::mmobj::{MemObjectKind, MmObjTable};

    fn key(table: &mut MmObjTable, index: usize) -> FrameKey {
        let obj = table.alloc(MemObjectKind::Anon);
        FrameKey { obj, index }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut table = MmObjTable::new();
        let mut cache = PageFrameCache::new();
        let k = key(&mut table, 0);
        cache.insert(k, PhysFrame(7));
        assert_eq!(cache.get(k), Some(PhysFrame(7)));
    }

    #[test]
    fn pinned_frames_are_never_lru_victims() {
        let mut table = MmObjTable::new();
        let mut cache = PageFrameCache::new();
        let k = key(&mut table, 0);
        cache.insert(k, PhysFrame(1));
        cache.pin(k);
        assert_eq!(cache.lru_victim(), None);
        cache.unpin(k);
        assert_eq!(cache.lru_victim(), Some(k));
    }

    #[test]
    fn dirty_frames_are_excluded_until_flushed() {
        let mut table = MmObjTable::new();
        let mut cache = PageFrameCache::new();
        let k = key(&mut table, 0);
        cache.insert(k, PhysFrame(1));
        cache.mark_dirty(k);
        assert_eq!(cache.lru_victim(), None);
        cache.flush(k, |_| Ok(())).unwrap();
        assert_eq!(cache.lru_victim(), Some(k));
    }
}
