//! Per-CPU state (single CPU only — spec.md's Non-goals exclude SMP).
//! Design Notes §9 treats `curproc`/`curthr` as architecturally
//! inescapable on a cooperative single-CPU kernel but asks that they be
//! modeled as a context parameter rather than a bare global; `Cpu` is
//! that parameter, threaded explicitly through every scheduler entry
//! point instead of read from a `static mut` the way the teacher's
//! `cpus[cpuid()]` is.

use crate::proc::{context::Context, thread::ThreadId};

pub struct Cpu {
    /// The thread currently in state RUN on this CPU, if any (none only
    /// during the earliest boot instant, before the idle thread exists).
    pub current: Option<ThreadId>,
    /// `swtch`-style context for the scheduler's own frame, resumed when a
    /// thread yields back to `Scheduler::switch`.
    pub scheduler_context: Context,
}

impl Cpu {
    pub const fn new() -> Cpu {
        Cpu {
            current: None,
            scheduler_context: Context::new(),
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Cpu::new()
    }
}
