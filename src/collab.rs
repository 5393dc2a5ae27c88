//! Collaborator traits (component J): named interfaces for the
//! subsystems spec.md puts deliberately out of scope — the physical-frame
//! allocator, the per-address-space page table, the VFS/vnode layer, and
//! the ELF loader. The core only ever calls through these traits, the way
//! the teacher's code calls through `extern "C"` into assembly and C
//! routines it doesn't implement (`kalloc`, `mappages`, ...) — here the
//! boundary is a Rust trait object instead of an FFI declaration, since
//! there's no separately compiled C half to link against.

use crate::{
    error::KernelError,
    mm::{PhysFrame, Prot, VirtPage},
};

/// Hands out and reclaims physical page frames. Backed by the slab/page
/// allocator in a real boot image; out of scope here.
pub trait FrameAllocator {
    fn alloc_frame(&self) -> Result<PhysFrame, KernelError>;
    fn free_frame(&self, f: PhysFrame);
}

/// One address space's page-table: the thing fork, exec and the
/// page-fault path install mappings into. Out of scope: the actual
/// hardware page-table walker.
pub trait AddressSpace {
    fn map(&mut self, va: VirtPage, frame: PhysFrame, prot: Prot) -> Result<(), KernelError>;
    fn unmap(&mut self, va: VirtPage);
    fn protect(&mut self, va: VirtPage, prot: Prot);
    fn unmap_range(&mut self, start: VirtPage, end: VirtPage);
    fn flush_tlb(&self);
}

/// A file, as seen by the memory subsystem: page-granular read/write.
/// Out of scope: the VFS dispatch and the on-disk filesystem behind it.
pub trait Vnode {
    fn read_page(&self, page_index: usize, buf: &mut [u8]) -> Result<(), KernelError>;
    fn write_page(&self, page_index: usize, buf: &[u8]) -> Result<(), KernelError>;
}

/// The image an executable loads into a freshly built address space.
pub struct LoadedImage {
    pub entry_point: usize,
    pub initial_brk: usize,
}

/// Builds a process's address space from an executable file. Out of
/// scope: the ELF parser.
pub trait Loader {
    fn load_image(
        &self,
        path: &str,
        address_space: &mut dyn AddressSpace,
    ) -> Result<LoadedImage, KernelError>;
}
