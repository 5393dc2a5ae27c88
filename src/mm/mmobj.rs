//! Memory object (component F): a polymorphic page source with
//! refcount-at-zero freeing and a resident-page set.
//!
//! The source side of this spec (and the teacher's own `Pagetable`
//! handling) models the shadow graph with raw back-pointers and manual
//! refcounting. Design Notes §9 calls that unsafe under a borrow checker;
//! here every object lives in a slab (`MmObjTable`) and is named by a
//! generation-checked [`MmObjId`] rather than a pointer, so `shadowed`
//! (owning) and `bottom_obj` (non-owning) links can never dangle silently.

use crate::{
    error::{KernelError, KernelResult},
    mm::PhysFrame,
};
use alloc::{collections::BTreeMap, vec::Vec};

/// Opaque, generation-checked handle to a slot in a [`MmObjTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MmObjId {
    index: u32,
    generation: u32,
}

/// Identifies the vnode backing a FILE object. Vnode access itself is an
/// external collaborator (see [`crate::collab::Vnode`]); this table only
/// needs something hashable and `Copy` to name one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VnodeId(pub u32);

/// The polymorphic payload of a memory object (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemObjectKind {
    /// Zero-filled on first touch.
    Anon,
    /// A private copy-on-write layer. `shadowed` is the object directly
    /// beneath this one in the chain (owning reference); `bottom_obj` is
    /// the non-shadow object at the chain's root (non-owning, used to
    /// resolve reads without walking the whole chain every time).
    Shadow {
        shadowed: MmObjId,
        bottom_obj: MmObjId,
    },
    /// Backed by a vnode; pages are read through the file.
    File { vnode: VnodeId },
}

impl MemObjectKind {
    pub fn is_shadow(&self) -> bool {
        matches!(self, MemObjectKind::Shadow { .. })
    }
}

/// One memory object. `refcount` counts external holders *plus* resident
/// pages (spec.md §8 invariant: `refcount == external_refs + nrespages`),
/// so a single counter governs freeing: the object is live exactly as
/// long as anything — a VM area, a shadow above it, or a resident page —
/// points to it.
pub struct MmObj {
    pub kind: MemObjectKind,
    refcount: u32,
    resident: BTreeMap<usize, PhysFrame>,
}

impl MmObj {
    pub fn nrespages(&self) -> usize {
        self.resident.len()
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    pub fn is_resident(&self, index: usize) -> bool {
        self.resident.contains_key(&index)
    }

    pub fn resident_frame(&self, index: usize) -> Option<PhysFrame> {
        self.resident.get(&index).copied()
    }

    pub fn resident_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.resident.keys().copied()
    }
}

struct Slot {
    generation: u32,
    obj: Option<MmObj>,
}

/// Slab of every live memory object in the kernel. Owns the allocation
/// and freeing of [`MmObj`]s; callers never see a bare pointer.
#[derive(Default)]
pub struct MmObjTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl MmObjTable {
    pub const fn new() -> MmObjTable {
        MmObjTable {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Number of live objects currently occupying a slot.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a fresh object with one external reference (refcount 1,
    /// no resident pages).
    pub fn alloc(&mut self, kind: MemObjectKind) -> MmObjId {
        let obj = MmObj {
            kind,
            refcount: 1,
            resident: BTreeMap::new(),
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.obj = Some(obj);
            MmObjId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                obj: Some(obj),
            });
            MmObjId {
                index,
                generation: 0,
            }
        }
    }

    fn slot(&self, id: MmObjId) -> Option<&Slot> {
        let slot = self.slots.get(id.index as usize)?;
        (slot.generation == id.generation).then_some(slot)
    }

    fn slot_mut(&mut self, id: MmObjId) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(id.index as usize)?;
        (slot.generation == id.generation).then_some(slot)
    }

    pub fn get(&self, id: MmObjId) -> Option<&MmObj> {
        self.slot(id)?.obj.as_ref()
    }

    pub fn get_mut(&mut self, id: MmObjId) -> Option<&mut MmObj> {
        self.slot_mut(id)?.obj.as_mut()
    }

    /// Walk a shadow's `bottom_obj` link.
    pub fn bottom_of(&self, id: MmObjId) -> MmObjId {
        match self.get(id).map(|o| &o.kind) {
            Some(MemObjectKind::Shadow { bottom_obj, .. }) => *bottom_obj,
            _ => id,
        }
    }

    /// Add one external reference.
    pub fn ref_obj(&mut self, id: MmObjId) {
        if let Some(slot) = self.slot_mut(id) {
            if let Some(obj) = slot.obj.as_mut() {
                obj.refcount += 1;
            }
        }
    }

    /// Drop one external reference, freeing (and recursively putting the
    /// `shadowed` parent of) the object if this was the last one.
    pub fn put(&mut self, id: MmObjId) {
        let Some(slot) = self.slot_mut(id) else {
            return;
        };
        let Some(obj) = slot.obj.as_mut() else {
            return;
        };
        debug_assert!(obj.refcount > 0, "put on already-dead object");
        obj.refcount -= 1;
        if obj.refcount != 0 {
            return;
        }
        let kind = slot.obj.take().unwrap().kind;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        if let MemObjectKind::Shadow { shadowed, .. } = kind {
            self.put(shadowed);
        }
    }

    /// Resolve a page for a read, walking the shadow chain from `top`
    /// towards the bottom object. Returns the first object that already
    /// has `index` resident, filling the bottom object on a full miss via
    /// `fill`.
    pub fn lookup_page(
        &mut self,
        top: MmObjId,
        index: usize,
        fill: impl FnOnce(&mut Self, MmObjId, usize) -> KernelResult<PhysFrame>,
    ) -> KernelResult<(MmObjId, PhysFrame)> {
        let mut cur = top;
        loop {
            if let Some(frame) = self.get(cur).and_then(|o| o.resident_frame(index)) {
                return Ok((cur, frame));
            }
            match self.get(cur).map(|o| &o.kind) {
                Some(MemObjectKind::Shadow { shadowed, .. }) => cur = *shadowed,
                Some(_) => {
                    let frame = fill(self, cur, index)?;
                    self.fill_page(cur, index, frame);
                    return Ok((cur, frame));
                }
                None => return Err(KernelError::NotFound),
            }
        }
    }

    /// Install `frame` as resident at `index` in `id`, counting it toward
    /// the object's refcount.
    pub fn fill_page(&mut self, id: MmObjId, index: usize, frame: PhysFrame) {
        if let Some(obj) = self.get_mut(id) {
            if obj.resident.insert(index, frame).is_none() {
                obj.refcount += 1;
            }
        }
    }

    /// Remove the resident page at `index` from `id` (eviction), releasing
    /// the refcount share it held.
    pub fn evict_page(&mut self, id: MmObjId, index: usize) -> Option<PhysFrame> {
        let obj = self.get_mut(id)?;
        let frame = obj.resident.remove(&index);
        if frame.is_some() {
            obj.refcount -= 1;
        }
        frame
    }
}
