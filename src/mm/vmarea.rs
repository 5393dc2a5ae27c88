//! VM area (component G): one contiguous, uniformly protected region of
//! an address space, bound to one memory object.

use crate::mm::{mmobj::MmObjId, AreaFlags, PageRange, Prot};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmArea {
    pub range: PageRange,
    pub prot: Prot,
    pub flags: AreaFlags,
    /// Offset into the backing object, in pages (relevant for FILE objects).
    pub file_offset: usize,
    pub object: MmObjId,
}

impl VmArea {
    pub fn is_private(&self) -> bool {
        self.flags.contains(AreaFlags::PRIVATE)
    }

    pub fn is_shared(&self) -> bool {
        self.flags.contains(AreaFlags::SHARED)
    }
}
