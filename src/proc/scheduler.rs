//! Scheduler (component C): cooperative, single-CPU multitasking over the
//! [`ThreadTable`]. Adapted from the teacher's `sched`/`swtch`/`sleep`
//! trio (which call through a `static mut cpus` and raw `*mut Proc`
//! pointers) into methods on an owned `Scheduler` that take the CPU and
//! wait queues as explicit parameters, per Design Notes §9.

use crate::proc::{
    context::arch_switch_context,
    cpu::Cpu,
    thread::{ThreadId, ThreadState, ThreadTable},
};
use crate::sync::WaitQueue;

/// Owns the thread table and the single run queue. A real build also
/// owns the idle thread's id so `switch` always has somewhere to go when
/// nothing else is runnable; tests that don't need an idle thread simply
/// never let the run queue go empty across a `switch` call.
pub struct Scheduler {
    pub threads: ThreadTable,
    run_queue: WaitQueue,
}

impl Scheduler {
    pub const fn new() -> Scheduler {
        Scheduler {
            threads: ThreadTable::new(),
            run_queue: WaitQueue::new(),
        }
    }

    /// Make `thread` eligible to run: append it to the run queue and mark
    /// it RUNNABLE, regardless of its previous state.
    pub fn make_runnable(&mut self, thread: ThreadId) {
        if let Some(t) = self.threads.get_mut(thread) {
            t.state = ThreadState::Runnable;
        }
        self.run_queue.enqueue(thread);
    }

    /// Two raw-pointer grabs into the same table, never aliased (the ids
    /// differ), so `arch_switch_context` can take `&mut` to each context
    /// without the table supporting disjoint mutable borrows natively —
    /// the same trick the teacher's code plays with `addr_of_mut!` into
    /// the C-style `proc` array.
    fn swap_contexts(&mut self, from: ThreadId, to: ThreadId) {
        let from_ctx = &mut self.threads.get_mut(from).expect("dead thread").context as *mut _;
        let to_ctx = &mut self.threads.get_mut(to).expect("dead thread").context as *mut _;
        unsafe { arch_switch_context(from_ctx, to_ctx) };
    }

    /// Dequeue the next runnable thread and transfer control to it.
    /// Interrupts must be disabled across this call by the caller (spec.md
    /// §4.1: "interrupts are disabled across the two-step
    /// {dequeue-next, context-switch}"); that discipline lives with the
    /// external interrupt controller and is out of this crate's scope, so
    /// it is only documented here, not enforced.
    pub fn switch(&mut self, cpu: &mut Cpu) {
        let from = cpu.current.expect("switch with no current thread");
        let to = self
            .run_queue
            .dequeue()
            .expect("no runnable thread to switch to");
        if let Some(t) = self.threads.get_mut(to) {
            t.state = ThreadState::Run;
        }
        cpu.current = Some(to);
        self.swap_contexts(from, to);
    }

    /// Give up the CPU for one scheduling round.
    pub fn yield_now(&mut self, cpu: &mut Cpu) {
        let current = cpu.current.expect("yield with no current thread");
        if let Some(t) = self.threads.get_mut(current) {
            t.state = ThreadState::Runnable;
        }
        self.run_queue.enqueue(current);
        self.switch(cpu);
    }

    /// Sleep uncancellably on `queue`.
    pub fn sleep_on(&mut self, cpu: &mut Cpu, queue: &mut WaitQueue) {
        let current = cpu.current.expect("sleep with no current thread");
        if let Some(t) = self.threads.get_mut(current) {
            t.state = ThreadState::Sleep;
        }
        queue.enqueue(current);
        self.switch(cpu);
    }

    /// Sleep cancellably on `queue`. Returns `true` if this sleep ended by
    /// cancellation rather than a matching `wakeup_on`/`broadcast_on`.
    pub fn sleep_cancellable_on(&mut self, cpu: &mut Cpu, queue: &mut WaitQueue) -> bool {
        let current = cpu.current.expect("sleep with no current thread");
        if let Some(t) = self.threads.get_mut(current) {
            if t.cancel_pending {
                // Sticky cancellation from an earlier uncancellable sleep:
                // consume it immediately without actually blocking.
                t.cancel_pending = false;
                return true;
            }
            t.state = ThreadState::SleepCancellable;
        }
        queue.enqueue(current);
        self.switch(cpu);
        self.threads
            .get_mut(current)
            .map(|t| t.take_cancel())
            .unwrap_or(false)
    }

    /// Wake the head of `queue`, if any, returning its id.
    pub fn wakeup_on(&mut self, queue: &mut WaitQueue) -> Option<ThreadId> {
        let thread = queue.dequeue()?;
        self.make_runnable(thread);
        Some(thread)
    }

    /// Wake every thread currently on `queue` (arrivals after this call
    /// are unaffected).
    pub fn broadcast_on(&mut self, queue: &mut WaitQueue) {
        while self.wakeup_on(queue).is_some() {}
    }

    /// Cancel `thread`, which must currently be sleeping on `queue`. Only
    /// a SLEEP_CANCELLABLE thread wakes immediately; a SLEEP (uncancellable)
    /// thread only has the flag recorded, consulted at its next cancellable
    /// sleep.
    pub fn cancel(&mut self, thread: ThreadId, queue: &mut WaitQueue) {
        let Some(t) = self.threads.get_mut(thread) else {
            return;
        };
        t.cancel_pending = true;
        if t.state == ThreadState::SleepCancellable {
            queue.remove(thread);
            t.state = ThreadState::Runnable;
            self.run_queue.enqueue(thread);
        }
    }

    /// Mark the current thread EXITED with `retval` and switch away. The
    /// caller (process-level exit logic) is responsible for moving it to
    /// the process's dead-thread list and invoking `proc_thread_exited`
    /// once the process has no more live threads.
    pub fn exit_current(&mut self, cpu: &mut Cpu, retval: i64) {
        let current = cpu.current.expect("exit with no current thread");
        if let Some(t) = self.threads.get_mut(current) {
            t.state = ThreadState::Exited;
            t.retval = retval;
        }
        self.switch(cpu);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::process::ProcessId;

    fn spawn(sched: &mut Scheduler, entry: usize) -> ThreadId {
        let id = sched.threads.create(ProcessId(1), entry);
        sched.make_runnable(id);
        id
    }

    #[test]
    fn yield_requeues_current_thread_at_the_back() {
        let mut sched = Scheduler::new();
        let a = spawn(&mut sched, 1);
        let b = spawn(&mut sched, 2);
        let mut cpu = Cpu::new();
        cpu.current = Some(a);
        sched.threads.get_mut(a).unwrap().state = ThreadState::Run;
        sched.run_queue.remove(a);

        sched.yield_now(&mut cpu);
        assert_eq!(cpu.current, Some(b));
        assert_eq!(sched.threads.get(a).unwrap().state, ThreadState::Runnable);
    }

    #[test]
    fn wakeup_on_wakes_only_the_head() {
        let mut sched = Scheduler::new();
        let a = sched.threads.create(ProcessId(1), 0);
        let b = sched.threads.create(ProcessId(1), 0);
        let mut q = WaitQueue::new();
        sched.threads.get_mut(a).unwrap().state = ThreadState::SleepCancellable;
        sched.threads.get_mut(b).unwrap().state = ThreadState::SleepCancellable;
        q.enqueue(a);
        q.enqueue(b);

        let woken = sched.wakeup_on(&mut q);
        assert_eq!(woken, Some(a));
        assert_eq!(sched.threads.get(a).unwrap().state, ThreadState::Runnable);
        assert_eq!(sched.threads.get(b).unwrap().state, ThreadState::SleepCancellable);
    }

    #[test]
    fn broadcast_wakes_everyone_present_at_call_time() {
        let mut sched = Scheduler::new();
        let a = sched.threads.create(ProcessId(1), 0);
        let b = sched.threads.create(ProcessId(1), 0);
        let mut q = WaitQueue::new();
        q.enqueue(a);
        q.enqueue(b);

        sched.broadcast_on(&mut q);
        assert!(q.is_empty());
        assert_eq!(sched.threads.get(a).unwrap().state, ThreadState::Runnable);
        assert_eq!(sched.threads.get(b).unwrap().state, ThreadState::Runnable);
    }

    #[test]
    fn cancel_wakes_a_cancellable_sleeper_and_sets_the_flag() {
        let mut sched = Scheduler::new();
        let a = sched.threads.create(ProcessId(1), 0);
        sched.threads.get_mut(a).unwrap().state = ThreadState::SleepCancellable;
        let mut q = WaitQueue::new();
        q.enqueue(a);

        sched.cancel(a, &mut q);
        assert!(!q.contains(a));
        assert_eq!(sched.threads.get(a).unwrap().state, ThreadState::Runnable);
        assert!(sched.threads.get(a).unwrap().cancel_pending);
    }

    #[test]
    fn cancel_on_uncancellable_sleeper_only_sets_the_sticky_flag() {
        let mut sched = Scheduler::new();
        let a = sched.threads.create(ProcessId(1), 0);
        sched.threads.get_mut(a).unwrap().state = ThreadState::Sleep;
        let mut q = WaitQueue::new();
        q.enqueue(a);

        sched.cancel(a, &mut q);
        assert!(q.contains(a));
        assert_eq!(sched.threads.get(a).unwrap().state, ThreadState::Sleep);
        assert!(sched.threads.get(a).unwrap().cancel_pending);
    }
}
