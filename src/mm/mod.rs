//! Virtual memory engine: memory objects (F), the page-frame cache (H),
//! VM areas and maps (G), the fork/shadow engine (I), and the
//! copy-on-write fault path that resolves what fork set up. Grounded on
//! the teacher's `mem::virtual_memory` module (`uvmcopy`, `uvmalloc`, page
//! table walks over `Pagetable`), generalized from xv6's flat
//! "copy everything on fork" model to shadow-object copy-on-write.

pub mod fault;
pub mod fork;
pub mod mmobj;
pub mod pframe;
pub mod vmarea;
pub mod vmmap;

/// A physical page frame number, handed out by the external
/// [`crate::collab::FrameAllocator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysFrame(pub u64);

/// A virtual page number (address / page size) within one address space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPage(pub u64);

/// A half-open range of virtual page numbers, `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRange {
    pub start: VirtPage,
    pub end: VirtPage,
}

impl PageRange {
    pub fn new(start: VirtPage, end: VirtPage) -> PageRange {
        debug_assert!(start.0 <= end.0, "inverted page range");
        PageRange { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.0 - self.start.0
    }

    pub fn is_empty(&self) -> bool {
        self.start.0 == self.end.0
    }

    pub fn overlaps(&self, other: &PageRange) -> bool {
        self.start.0 < other.end.0 && other.start.0 < self.end.0
    }

    pub fn contains(&self, page: VirtPage) -> bool {
        self.start.0 <= page.0 && page.0 < self.end.0
    }
}

bitflags::bitflags! {
    /// Page protection bits, independent of how the area is shared.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Prot: u8 {
        const READ  = 0b001;
        const WRITE = 0b010;
        const EXEC  = 0b100;
    }
}

bitflags::bitflags! {
    /// VM area flags (spec.md §3): sharing discipline plus placement hints.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AreaFlags: u8 {
        /// Copy-on-write: writes are private to this address space.
        const PRIVATE = 0b0001;
        /// Writes are visible to every mapper of the underlying object.
        const SHARED  = 0b0010;
        /// `map` must place the area at the exact requested range or fail.
        const FIXED   = 0b0100;
        /// Anonymous (zero-filled) backing, not file-backed.
        const ANON    = 0b1000;
    }
}
