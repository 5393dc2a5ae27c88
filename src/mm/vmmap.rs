//! VM map (component G): the ordered, disjoint set of VM areas making up
//! one address space. Adapted from the teacher's `uvmalloc`/`uvmdealloc`
//! page-table bookkeeping, generalized from "one flat process size" to an
//! ordered list of independently-protected areas.

use crate::{
    error::{KernelError, KernelResult},
    mm::{mmobj::MmObjTable, vmarea::VmArea, AreaFlags, PageRange, VirtPage},
};
use alloc::vec::Vec;

/// The ordered area list for one address space. Areas are kept sorted by
/// `range.start` and pairwise disjoint (spec.md §8 invariant).
#[derive(Default)]
pub struct VmMap {
    areas: Vec<VmArea>,
}

impl VmMap {
    pub const fn new() -> VmMap {
        VmMap { areas: Vec::new() }
    }

    pub fn areas(&self) -> &[VmArea] {
        &self.areas
    }

    pub fn areas_mut(&mut self) -> &mut [VmArea] {
        &mut self.areas
    }

    pub fn lookup(&self, page: VirtPage) -> Option<&VmArea> {
        self.areas.iter().find(|a| a.range.contains(page))
    }

    pub fn lookup_mut(&mut self, page: VirtPage) -> Option<&mut VmArea> {
        self.areas.iter_mut().find(|a| a.range.contains(page))
    }

    fn insert_sorted(&mut self, area: VmArea) {
        let pos = self
            .areas
            .partition_point(|a| a.range.start.0 < area.range.start.0);
        self.areas.insert(pos, area);
    }

    /// Find a gap at least `range.len()` pages wide, preferring `range`
    /// itself if it's free. With `FIXED` set the area must land exactly at
    /// `range` or the call fails.
    fn find_hole(&self, range: PageRange, fixed: bool) -> KernelResult<PageRange> {
        if self.areas.iter().all(|a| !a.range.overlaps(&range)) {
            return Ok(range);
        }
        if fixed {
            return Err(KernelError::NoSpace);
        }
        let len = range.len();
        let mut candidate_start = range.start.0;
        for area in &self.areas {
            let candidate = PageRange::new(VirtPage(candidate_start), VirtPage(candidate_start + len));
            if candidate.end.0 <= area.range.start.0 {
                return Ok(candidate);
            }
            candidate_start = candidate_start.max(area.range.end.0);
        }
        Ok(PageRange::new(
            VirtPage(candidate_start),
            VirtPage(candidate_start + len),
        ))
    }

    /// Install a new area, returning the virtual page it starts at.
    pub fn map(&mut self, mut area: VmArea) -> KernelResult<VirtPage> {
        let fixed = area.flags.contains(AreaFlags::FIXED);
        let placed = self.find_hole(area.range, fixed)?;
        let start = placed.start;
        area.range = placed;
        self.insert_sorted(area);
        Ok(start)
    }

    /// Remove every area overlapping `range`, splitting areas that
    /// straddle its edges, releasing each removed area's object reference.
    pub fn remove(&mut self, range: PageRange, objects: &mut MmObjTable) {
        let mut i = 0;
        while i < self.areas.len() {
            if !self.areas[i].range.overlaps(&range) {
                i += 1;
                continue;
            }
            let area = self.areas.remove(i);
            if area.range.start.0 < range.start.0 {
                let mut head = area.clone();
                head.range = PageRange::new(area.range.start, range.start);
                objects.ref_obj(head.object);
                self.areas.insert(i, head);
                i += 1;
            }
            if range.end.0 < area.range.end.0 {
                let mut tail = area.clone();
                tail.range = PageRange::new(range.end, area.range.end);
                objects.ref_obj(tail.object);
                self.areas.insert(i, tail);
                i += 1;
            }
            objects.put(area.object);
        }
    }

    /// Produce a structurally identical map with every area's object
    /// refcounted once more. Used as the first step of fork before the
    /// shadow-reparenting pass replaces the private areas' objects.
    pub fn clone_with(&self, objects: &mut MmObjTable) -> VmMap {
        for area in &self.areas {
            objects.ref_obj(area.object);
        }
        VmMap {
            areas: self.areas.clone(),
        }
    }

    /// Release every area's object reference. Leaves the map empty.
    pub fn destroy(&mut self, objects: &mut MmObjTable) {
        for area in self.areas.drain(..) {
            objects.put(area.object);
        }
    }
}
