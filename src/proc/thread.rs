//! Thread (component D): a kernel thread's identity, stack, saved context,
//! and state machine. Adapted from the teacher's `Proc`/`Cpu` split — the
//! teacher fuses "thread" and "process" into one `Proc` struct (xv6 has no
//! user-level threading); this crate splits them per spec.md's distinct
//! D/E components, since a process may own more than one thread.

use crate::{
    config::NTHREADS_PER_PROC,
    proc::{
        context::{Context, KernelStack, Regs},
        process::ProcessId,
    },
};
use arrayvec::ArrayVec;

/// Unique identifier for a thread, valid for the lifetime of the slab slot
/// it names. Never reused while the thread it named is still reachable
/// from a process's thread set or a wait queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

/// A thread's position in the scheduler state machine (spec.md §4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// Currently executing on the (single) CPU.
    Run,
    /// On the scheduler's runnable queue, eligible to run next.
    Runnable,
    /// Blocked on a wait queue; does not respond to `cancel`.
    Sleep,
    /// Blocked on a wait queue; `cancel` wakes it early with `Interrupted`.
    SleepCancellable,
    /// Has run `thread_exit`; awaiting reaping by `proc_thread_exited`.
    Exited,
}

/// A kernel thread: saved context, exclusive stack, and the process it
/// belongs to. Threads within a process share everything else (address
/// space, file table) by construction — they're variants on the same
/// `Process`.
pub struct Thread {
    pub id: ThreadId,
    pub owner: ProcessId,
    pub stack: KernelStack,
    pub context: Context,
    pub state: ThreadState,
    /// Set by `cancel`; consulted the next time this thread enters
    /// `sleep_cancellable_on`. Sticky until consumed.
    pub cancel_pending: bool,
    pub retval: i64,
    /// The user-visible register frame this thread returns to on its way
    /// back out of the kernel (the "regs on the fork stack" Design Notes
    /// §9 calls out as an architecture-specific external interface). Fork
    /// clones this verbatim from the parent and zeroes `eax` in the child.
    pub user_regs: Regs,
}

impl Thread {
    pub fn new(id: ThreadId, owner: ProcessId, entry: usize) -> Thread {
        let stack = KernelStack::new();
        let context = crate::proc::context::initial_context(&stack, entry);
        Thread {
            id,
            owner,
            stack,
            context,
            state: ThreadState::Runnable,
            cancel_pending: false,
            retval: 0,
            user_regs: Regs::default(),
        }
    }

    /// Consume a pending cancellation. Returns whether one was pending.
    pub fn take_cancel(&mut self) -> bool {
        core::mem::replace(&mut self.cancel_pending, false)
    }
}

/// Fixed-capacity set of the threads a single process owns, mirroring the
/// teacher's preference for statically sized per-process tables (`ofile`,
/// `name`) over heap-growable collections in hot process state.
pub type ThreadSet = ArrayVec<ThreadId, NTHREADS_PER_PROC>;

/// Owns every live [`Thread`], keyed by [`ThreadId`]. The scheduler and
/// process code name threads by id and look them up here rather than
/// passing `&mut Thread` references around, so a thread can be found from
/// either its process's thread set or a wait queue without aliasing.
#[derive(Default)]
pub struct ThreadTable {
    threads: alloc::collections::BTreeMap<u32, Thread>,
    next_id: u32,
}

impl ThreadTable {
    pub const fn new() -> ThreadTable {
        ThreadTable {
            threads: alloc::collections::BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn create(&mut self, owner: ProcessId, entry: usize) -> ThreadId {
        let id = ThreadId(self.next_id);
        self.next_id += 1;
        self.threads.insert(id.0, Thread::new(id, owner, entry));
        id
    }

    /// Clone `from`'s saved context into a brand new thread owned by
    /// `owner` (spec.md §4.3 step 1: "Clone the current thread into
    /// `newthr`"). The new thread gets its own kernel stack; the context
    /// is copied verbatim, and the user-visible register frame is copied
    /// with the fork-return-0 convention already applied (spec.md §4.3
    /// step 8: "the child's `eax` set to 0"), since `clone_thread` has no
    /// other caller than `fork`. `owner` is a placeholder until the child
    /// process exists; the caller patches `Thread::owner` once it does.
    pub fn clone_thread(&mut self, from: ThreadId, owner: ProcessId) -> Option<ThreadId> {
        let source = self.threads.get(&from.0)?;
        let source_context = source.context;
        let source_regs = source.user_regs;
        let id = ThreadId(self.next_id);
        self.next_id += 1;
        let stack = KernelStack::new();
        let mut context = source_context;
        context.esp = stack.top() as u32;
        self.threads.insert(
            id.0,
            Thread {
                id,
                owner,
                stack,
                context,
                state: ThreadState::Runnable,
                cancel_pending: false,
                retval: 0,
                user_regs: source_regs.as_fork_child(),
            },
        );
        Some(id)
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id.0)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.threads.get_mut(&id.0)
    }

    pub fn remove(&mut self, id: ThreadId) -> Option<Thread> {
        self.threads.remove(&id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_is_runnable_with_entry_installed() {
        let t = Thread::new(ThreadId(1), ProcessId(1), 0x1000);
        assert_eq!(t.state, ThreadState::Runnable);
        assert_eq!(t.context.eip, 0x1000);
        assert!(!t.cancel_pending);
    }

    #[test]
    fn take_cancel_clears_flag() {
        let mut t = Thread::new(ThreadId(1), ProcessId(1), 0);
        t.cancel_pending = true;
        assert!(t.take_cancel());
        assert!(!t.take_cancel());
    }

    #[test]
    fn clone_thread_zeroes_eax_in_the_copy() {
        let mut table = ThreadTable::new();
        let parent = table.create(ProcessId(1), 0x1000);
        table.get_mut(parent).unwrap().user_regs.eax = 42;
        let child = table.clone_thread(parent, ProcessId(1)).unwrap();
        assert_eq!(table.get(parent).unwrap().user_regs.eax, 42);
        assert_eq!(table.get(child).unwrap().user_regs.eax, 0);
        assert_ne!(table.get(parent).unwrap().context.esp, 0);
        assert_ne!(
            table.get(parent).unwrap().context.esp,
            table.get(child).unwrap().context.esp
        );
    }
}
