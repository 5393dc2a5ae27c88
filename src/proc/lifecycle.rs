//! Process and thread lifecycle orchestration (spec.md §4.2): the parts
//! of components D/E that aren't just table bookkeeping — `proc_create`/
//! `thread_create`, `thread_exit`, the process-level cleanup
//! `proc_thread_exited` runs once a process's last thread is gone, and
//! `do_waitpid`'s reap-or-sleep loop.

use crate::{
    collab::AddressSpace,
    error::{KernelError, KernelResult},
    mm::vmmap::VmMap,
    proc::{
        cpu::Cpu,
        process::{ProcessId, ProcessState, ProcessTable, ProcessVm},
        scheduler::Scheduler,
        thread::{ThreadId, ThreadState},
    },
};
use alloc::{boxed::Box, vec::Vec};

/// `proc_create` (spec.md §4.2): allocate a PID, zero the file table,
/// attach to `parent`, and install an empty VM map over `page_dir` — a
/// page directory "cloned from the kernel template" by the external
/// [`crate::collab::AddressSpace`] collaborator; building one is out of
/// this crate's scope, so the caller supplies it already built.
pub fn proc_create(
    processes: &mut ProcessTable,
    parent: ProcessId,
    page_dir: Box<dyn AddressSpace>,
) -> KernelResult<ProcessId> {
    let pid = processes.create(parent)?;
    processes.get_mut(pid).unwrap().vm = Some(ProcessVm {
        map: VmMap::new(),
        page_dir,
    });
    Ok(pid)
}

/// `thread_create` (spec.md §4.2): allocate a kernel stack and an initial
/// context so resuming the thread enters `entry(arg1, arg2)` with a
/// fresh frame, and attach it to `proc_id`'s thread set. `arg1`/`arg2`
/// land in the initial user register frame; how a real trampoline would
/// present them as `entry`'s actual arguments is architecture-specific
/// and out of this crate's scope.
pub fn thread_create(
    sched: &mut Scheduler,
    processes: &mut ProcessTable,
    proc_id: ProcessId,
    entry: usize,
    arg1: u32,
    arg2: u32,
) -> KernelResult<ThreadId> {
    let tid = sched.threads.create(proc_id, entry);
    {
        let t = sched.threads.get_mut(tid).unwrap();
        t.user_regs.ecx = arg1;
        t.user_regs.edx = arg2;
    }
    processes
        .get_mut(proc_id)
        .ok_or(KernelError::InvalidArg)?
        .threads
        .try_push(tid)
        .map_err(|_| KernelError::MaxThreads)?;
    Ok(tid)
}

/// Mark the current thread EXITED with `retval`, and — once its process
/// has no more RUN/RUNNABLE/SLEEP threads — run `proc_thread_exited`.
/// Never returns: the final act is `Scheduler::switch`-ing away. The
/// thread's own table entry (and its kernel stack) is *not* freed here;
/// per spec.md §3 that happens "on reap", i.e. inside `do_waitpid` once
/// the parent collects this process.
pub fn thread_exit(
    cpu: &mut Cpu,
    sched: &mut Scheduler,
    processes: &mut ProcessTable,
    objects: &mut crate::mm::mmobj::MmObjTable,
    retval: i64,
) -> ! {
    let tid = cpu.current.expect("thread_exit with no current thread");
    let owner = sched.threads.get(tid).expect("dead thread").owner;

    {
        let t = sched.threads.get_mut(tid).unwrap();
        t.state = ThreadState::Exited;
        t.retval = retval;
    }

    let still_alive = processes
        .get(owner)
        .map(|p| {
            p.threads.iter().any(|&t| {
                sched
                    .threads
                    .get(t)
                    .is_some_and(|th| th.state != ThreadState::Exited)
            })
        })
        .unwrap_or(false);

    if !still_alive {
        proc_thread_exited(sched, processes, objects, owner, retval as i32);
    }

    sched.switch(cpu);
    unreachable!("thread_exit: switch resumed an exited thread");
}

/// Process-level cleanup once `pid`'s last thread has exited (spec.md
/// §4.2): close every file, destroy the VM map (releasing every area's
/// object reference — this is what tears down whatever remains of its
/// shadow chains), reparent children to INIT, wake the parent's wait
/// queue, and mark the process DEAD. The PID and exit status are
/// retained until the parent reaps it.
fn proc_thread_exited(
    sched: &mut Scheduler,
    processes: &mut ProcessTable,
    objects: &mut crate::mm::mmobj::MmObjTable,
    pid: ProcessId,
    exit_status: i32,
) {
    if let Some(p) = processes.get_mut(pid) {
        p.files.close_all();
        if let Some(vm) = p.vm.as_mut() {
            vm.map.destroy(objects);
        }
        p.vm = None;
        p.exit_status = exit_status;
        p.state = ProcessState::Dead;
    }

    processes.reparent_children_to_init(pid);

    if let Some(parent) = processes.get(pid).and_then(|p| p.parent) {
        if let Some(parent_proc) = processes.get_mut(parent) {
            sched.broadcast_on(&mut parent_proc.wait_queue);
        }
    }
}

/// `do_waitpid` (spec.md §4.2): reap a matching DEAD child if one exists
/// now, otherwise sleep cancellably on the parent's child-exit queue and
/// retry. `pid == -1` matches any child. Returns `(child_pid,
/// exit_status)`.
pub fn do_waitpid(
    cpu: &mut Cpu,
    sched: &mut Scheduler,
    processes: &mut ProcessTable,
    pid: i32,
) -> KernelResult<(i32, i32)> {
    let caller_tid = cpu.current.expect("waitpid with no current thread");
    let parent = sched.threads.get(caller_tid).expect("dead thread").owner;

    loop {
        if !processes.has_child(parent, pid) {
            return Err(KernelError::NoChild);
        }
        if let Some(child) = processes.find_dead_child(parent, pid) {
            // The reaper's job (spec.md §3): release the dead child's
            // kernel stacks now that nothing can resume them.
            if let Some(child_proc) = processes.get(child) {
                let dead_threads: Vec<ThreadId> = child_proc.threads.iter().copied().collect();
                for t in dead_threads {
                    sched.threads.remove(t);
                }
            }
            let status = processes.reap(parent, child)?;
            return Ok((child.0, status));
        }
        let cancelled = {
            let parent_proc = processes.get_mut(parent).expect("parent vanished");
            sched.sleep_cancellable_on(cpu, &mut parent_proc.wait_queue)
        };
        if cancelled {
            return Err(KernelError::Interrupted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::fakes::FakeAddressSpace;

    /// Boots IDLE and INIT and leaves IDLE's thread sitting runnable in
    /// the scheduler's run queue, so any `Scheduler::switch` a test
    /// triggers (via `thread_exit`) always has somewhere to go, exactly
    /// as a real boot guarantees by never letting the run queue empty
    /// out entirely.
    fn boot_to_init() -> (Scheduler, ProcessTable, crate::mm::mmobj::MmObjTable) {
        let mut sched = Scheduler::new();
        let mut processes = ProcessTable::new();
        let objects = crate::mm::mmobj::MmObjTable::new();
        let idle = processes.create_idle();
        processes.create_init();
        let idle_thread = thread_create(&mut sched, &mut processes, idle, 0, 0, 0).unwrap();
        sched.make_runnable(idle_thread);
        (sched, processes, objects)
    }

    #[test]
    fn orphan_is_reparented_to_init_on_parent_exit() {
        let (mut sched, mut processes, mut objects) = boot_to_init();
        let parent = proc_create(
            &mut processes,
            ProcessId(crate::config::PID_INIT),
            Box::new(FakeAddressSpace::new()),
        )
        .unwrap();
        let child = proc_create(&mut processes, parent, Box::new(FakeAddressSpace::new())).unwrap();

        let parent_thread =
            thread_create(&mut sched, &mut processes, parent, 0, 0, 0).unwrap();
        let mut cpu = Cpu::new();
        cpu.current = Some(parent_thread);
        sched.threads.get_mut(parent_thread).unwrap().state = ThreadState::Run;

        thread_exit(&mut cpu, &mut sched, &mut processes, &mut objects, 0);

        assert_eq!(
            processes.get(child).unwrap().parent,
            Some(ProcessId(crate::config::PID_INIT))
        );
        assert!(processes
            .get(ProcessId(crate::config::PID_INIT))
            .unwrap()
            .children
            .contains(&child));
    }

    #[test]
    fn waitpid_any_child_returns_the_one_that_died_first() {
        let (mut sched, mut processes, _objects) = boot_to_init();
        let parent = proc_create(
            &mut processes,
            ProcessId(crate::config::PID_INIT),
            Box::new(FakeAddressSpace::new()),
        )
        .unwrap();
        let c1 = proc_create(&mut processes, parent, Box::new(FakeAddressSpace::new())).unwrap();
        let c2 = proc_create(&mut processes, parent, Box::new(FakeAddressSpace::new())).unwrap();
        thread_create(&mut sched, &mut processes, c1, 0, 0, 0).unwrap();
        thread_create(&mut sched, &mut processes, c2, 0, 0, 0).unwrap();

        processes.get_mut(c2).unwrap().state = ProcessState::Dead;
        processes.get_mut(c2).unwrap().exit_status = 22;

        let parent_thread =
            thread_create(&mut sched, &mut processes, parent, 0, 0, 0).unwrap();
        let mut cpu = Cpu::new();
        cpu.current = Some(parent_thread);
        sched.threads.get_mut(parent_thread).unwrap().state = ThreadState::Run;

        let (pid, status) = do_waitpid(&mut cpu, &mut sched, &mut processes, -1).unwrap();
        assert_eq!(pid, c2.0);
        assert_eq!(status, 22);

        processes.get_mut(c1).unwrap().state = ProcessState::Dead;
        processes.get_mut(c1).unwrap().exit_status = 11;
        let (pid2, status2) = do_waitpid(&mut cpu, &mut sched, &mut processes, -1).unwrap();
        assert_eq!(pid2, c1.0);
        assert_eq!(status2, 11);
    }

    #[test]
    fn waitpid_with_no_children_reports_no_child() {
        let (mut sched, mut processes, _objects) = boot_to_init();
        let parent = proc_create(
            &mut processes,
            ProcessId(crate::config::PID_INIT),
            Box::new(FakeAddressSpace::new()),
        )
        .unwrap();
        let parent_thread =
            thread_create(&mut sched, &mut processes, parent, 0, 0, 0).unwrap();
        let mut cpu = Cpu::new();
        cpu.current = Some(parent_thread);

        let result = do_waitpid(&mut cpu, &mut sched, &mut processes, -1);
        assert_eq!(result, Err(KernelError::NoChild));
    }
}
