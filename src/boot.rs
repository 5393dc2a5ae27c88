//! Boot sequence (component N): the bootstrap → IDLE → INIT chain.
//! Grounded on the teacher's `main.rs`/`start.rs` (`kinit` → `userinit` →
//! `scheduler()`), reshaped so the whole chain is just calls into owned
//! state instead of writes through `static mut cpus`/`proc` globals —
//! the "context parameter, not hidden globals" discipline Design Notes
//! §9 asks for is threaded all the way up to this entry point.

use crate::{
    collab::AddressSpace,
    error::KernelResult,
    proc::{cpu::Cpu, lifecycle, process::ProcessTable, scheduler::Scheduler, thread::ThreadState},
};
use alloc::boxed::Box;

/// Everything the running core owns: the one CPU's state, the scheduler
/// (and through it the thread table), the process table, and the global
/// memory-object table fork and the page-fault path share. Mirrors the
/// teacher's `cpus[NCPU]`/global `proc[NPROC]` pair, collapsed to the
/// single-CPU case spec.md's Non-goals call for and owned by one struct
/// instead of living in statics.
pub struct Kernel {
    pub cpu: Cpu,
    pub scheduler: Scheduler,
    pub processes: ProcessTable,
    pub objects: crate::mm::mmobj::MmObjTable,
}

impl Kernel {
    pub const fn new() -> Kernel {
        Kernel {
            cpu: Cpu::new(),
            scheduler: Scheduler::new(),
            processes: ProcessTable::new(),
            objects: crate::mm::mmobj::MmObjTable::new(),
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::new()
    }
}

/// Bring up IDLE and INIT (spec.md §6). `idle_page_dir` is the kernel's
/// own page directory (IDLE never runs user code); `init_page_dir` and
/// `init_entry` describe INIT's address space and where it starts
/// running. Building either page directory, and loading INIT's image
/// into it, is the external [`AddressSpace`]/[`crate::collab::Loader`]
/// collaborators' job — out of this crate's scope per spec.md's
/// Non-goals (ELF loading, driver bring-up) — so the caller hands both
/// in already built. Leaves INIT runnable and IDLE installed as the
/// current thread, ready for the first `Scheduler::switch`.
pub fn bootstrap(
    kernel: &mut Kernel,
    idle_page_dir: Box<dyn AddressSpace>,
    init_page_dir: Box<dyn AddressSpace>,
    init_entry: usize,
) -> KernelResult<()> {
    log::info!("bootstrap: creating IDLE");
    let idle = kernel.processes.create_idle();
    kernel.processes.get_mut(idle).unwrap().vm = Some(crate::proc::process::ProcessVm {
        map: crate::mm::vmmap::VmMap::new(),
        page_dir: idle_page_dir,
    });

    let idle_thread =
        lifecycle::thread_create(&mut kernel.scheduler, &mut kernel.processes, idle, 0, 0, 0)?;
    kernel.cpu.current = Some(idle_thread);
    kernel
        .scheduler
        .threads
        .get_mut(idle_thread)
        .unwrap()
        .state = ThreadState::Run;

    log::info!("bootstrap: creating INIT");
    let init = kernel.processes.create_init();
    kernel.processes.get_mut(init).unwrap().vm = Some(crate::proc::process::ProcessVm {
        map: crate::mm::vmmap::VmMap::new(),
        page_dir: init_page_dir,
    });
    let init_thread = lifecycle::thread_create(
        &mut kernel.scheduler,
        &mut kernel.processes,
        init,
        init_entry,
        0,
        0,
    )?;
    kernel.scheduler.make_runnable(init_thread);

    log::info!("bootstrap: complete, INIT runnable");
    Ok(())
}
