//! A pedagogical x86 monolithic kernel core: process/thread lifecycle,
//! the cooperative kernel scheduler, and a copy-on-write virtual-memory
//! engine built on shadow-object chains.
//!
//! Adapted from the teacher's xv6-riscv port, which fuses process and
//! thread into one `Proc` and copies every page eagerly on fork. This
//! crate splits process (component E) from thread (component D), and
//! replaces the eager copy with lazy copy-on-write over a slab of
//! generation-checked memory objects (components F–I). Subsystems the
//! spec puts deliberately out of scope — physical-frame allocation, page
//! tables, the VFS, the ELF loader, interrupt/trap entry — are named
//! only as collaborator traits in [`collab`]; nothing in this crate
//! implements them.
#![no_std]
#![allow(clippy::missing_safety_doc)]

extern crate alloc;

pub mod boot;
pub mod collab;
pub mod config;
pub mod error;
pub mod klog;
pub mod mm;
pub mod proc;
pub mod sync;
pub mod syscall;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("panic: {info}");
    loop {
        core::hint::spin_loop();
    }
}
