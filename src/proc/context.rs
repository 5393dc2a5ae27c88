//! Context & stack (component A): saved register state for kernel context
//! switches, and the kernel-stack allocation backing each thread.
//!
//! The register set is the x86 callee-saved set (mirrors the teacher's
//! RISC-V `Context`, which saves `ra`/`sp` plus `s0..s11`): everything a
//! `swtch`-style routine needs to resume a thread mid-function. The
//! `Regs` struct is the architecture-specific "regs on the fork stack"
//! layout the design notes call out as a bit-exact boundary between the
//! scheduler, the fork path and the interrupt-exit trampoline; the
//! trampoline itself is out of this crate's scope (see the external
//! interfaces), so `Regs` only needs to be a faithful, inspectable record
//! of what the trampoline would push and pop.

use crate::config::KSTACK_SIZE;
use alloc::boxed::Box;

/// Saved callee-saved registers for a suspended kernel thread.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Context {
    pub ebx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub eip: u32,
    pub esp: u32,
}

impl Context {
    pub const fn new() -> Context {
        Context {
            ebx: 0,
            esi: 0,
            edi: 0,
            ebp: 0,
            eip: 0,
            esp: 0,
        }
    }
}

/// The trap frame saved by the (out-of-scope) interrupt/syscall entry
/// trampoline: the full set of user-visible registers at the moment a
/// thread entered the kernel. `fork` clones this verbatim into the child
/// and then zeroes `eax` so the child observes a `0` return value.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Regs {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub eip: u32,
    pub esp: u32,
    pub eflags: u32,
}

impl Regs {
    /// Apply the `fork` return-value convention: the child's accumulator
    /// (`eax`) reads 0.
    pub fn as_fork_child(mut self) -> Regs {
        self.eax = 0;
        self
    }
}

/// A thread's exclusively owned kernel stack. Released when the thread is
/// reaped.
pub struct KernelStack {
    storage: Box<[u8; KSTACK_SIZE]>,
}

impl KernelStack {
    pub fn new() -> KernelStack {
        KernelStack {
            storage: Box::new([0u8; KSTACK_SIZE]),
        }
    }

    /// Address one past the last byte of the stack: where a descending
    /// x86 stack starts.
    pub fn top(&self) -> usize {
        self.storage.as_ptr() as usize + KSTACK_SIZE
    }
}

impl Default for KernelStack {
    fn default() -> Self {
        KernelStack::new()
    }
}

/// Build the initial context for a brand new thread so that resuming it
/// (via [`arch_switch_context`]) enters `entry` with a fresh frame. On real
/// x86 hardware this pushes a trampoline return address onto the new
/// stack; that trampoline is the architecture-specific glue named in the
/// design notes and lives outside this crate.
pub fn initial_context(stack: &KernelStack, entry: usize) -> Context {
    Context {
        eip: entry as u32,
        esp: stack.top() as u32,
        ..Context::new()
    }
}

#[cfg(not(test))]
extern "C" {
    /// Save the registers of the currently running thread into `from` and
    /// restore the registers of `to`, transferring control to it. The real
    /// implementation lives in architecture-specific assembly (out of
    /// scope for this crate, named here as the external boundary).
    pub fn arch_switch_context(from: *mut Context, to: *mut Context);
}

/// Host test double: there is no second stack to jump to in a unit test
/// process, so a context switch is modeled as exchanging the saved
/// register snapshots. This is enough to exercise every piece of
/// scheduler bookkeeping (who is "current", what got saved) without
/// pretending to transfer control flow on a CPU that doesn't have the
/// other thread's stack mapped.
#[cfg(test)]
pub unsafe fn arch_switch_context(from: *mut Context, to: *mut Context) {
    core::mem::swap(&mut *from, &mut *to);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_context_points_at_entry_and_stack_top() {
        let stack = KernelStack::new();
        let ctx = initial_context(&stack, 0xdead_beef);
        assert_eq!(ctx.eip, 0xdead_beef);
        assert_eq!(ctx.esp as usize, stack.top() as u32 as usize);
    }

    #[test]
    fn switch_exchanges_snapshots() {
        let mut a = Context {
            eip: 1,
            ..Context::new()
        };
        let mut b = Context {
            eip: 2,
            ..Context::new()
        };
        unsafe { arch_switch_context(&mut a, &mut b) };
        assert_eq!(a.eip, 2);
        assert_eq!(b.eip, 1);
    }
}
