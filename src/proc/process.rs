//! Process (component E): PID allocation, parent/child tree, thread set,
//! file table, address-space handle, and the exit/wait protocol.
//! Generalized from the teacher's flat `Proc` (which fuses process and
//! thread state, xv6 having no user-level threading) into a process that
//! owns a [`ThreadSet`] and delegates register/stack/state bookkeeping to
//! [`crate::proc::thread::Thread`].

use crate::{
    collab::Vnode,
    config::{NFILES, PID_FIRST_DYNAMIC, PID_IDLE, PID_INIT},
    error::{KernelError, KernelResult},
    mm::vmmap::VmMap,
    proc::thread::{ThreadId, ThreadSet},
    sync::WaitQueue,
};
use alloc::{collections::BTreeMap, rc::Rc, vec::Vec};
use core::cell::RefCell;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub i32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Dead,
}

/// An open file: a shared vnode plus the private (per-open, but shared
/// across `dup`) seek offset. Reference counted so `dup`/`dup2`/`fork`
/// can hand out another handle onto the same open file without copying
/// it, matching spec.md's "fork contract" (shared file handles, bumped
/// refcount).
pub struct OpenFile {
    pub vnode: Rc<dyn Vnode>,
    pub offset: RefCell<usize>,
}

/// Fixed-size per-process file descriptor table (spec.md: "file table of
/// fixed size NFILES"), mirroring the teacher's `[*mut File; NOFILE]`
/// array without the raw pointers. Each slot carries its own close-on-exec
/// bit alongside the handle, the way the teacher's `File` struct carries
/// per-fd flags rather than a single table-wide one.
pub struct FileTable {
    slots: [Option<Rc<OpenFile>>; NFILES],
    cloexec: [bool; NFILES],
}

impl FileTable {
    pub fn new() -> FileTable {
        FileTable {
            slots: core::array::from_fn(|_| None),
            cloexec: [false; NFILES],
        }
    }

    pub fn get(&self, fd: usize) -> Option<&Rc<OpenFile>> {
        self.slots.get(fd)?.as_ref()
    }

    /// Install `file` at the lowest-numbered free descriptor. `cloexec`
    /// marks the descriptor to be closed by `close_on_exec` rather than
    /// surviving `execve` (spec.md §6 execve contract: "closes files
    /// marked close-on-exec").
    pub fn install(&mut self, file: Rc<OpenFile>, cloexec: bool) -> KernelResult<usize> {
        let fd = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(KernelError::TooManyFiles)?;
        self.slots[fd] = Some(file);
        self.cloexec[fd] = cloexec;
        Ok(fd)
    }

    /// Duplicate `fd` onto a fresh lowest-numbered descriptor. Per POSIX
    /// `dup`, the new descriptor is never close-on-exec, regardless of
    /// `fd`'s own flag.
    pub fn dup(&mut self, fd: usize) -> KernelResult<usize> {
        let file = self.get(fd).ok_or(KernelError::BadFd)?.clone();
        self.install(file, false)
    }

    /// Duplicate `fd` onto exactly `target`, closing whatever was there.
    /// Like `dup`, `target` is never left close-on-exec.
    pub fn dup2(&mut self, fd: usize, target: usize) -> KernelResult<()> {
        let file = self.get(fd).ok_or(KernelError::BadFd)?.clone();
        *self.slots.get_mut(target).ok_or(KernelError::BadFd)? = Some(file);
        if let Some(flag) = self.cloexec.get_mut(target) {
            *flag = false;
        }
        Ok(())
    }

    pub fn close(&mut self, fd: usize) -> KernelResult<()> {
        let slot = self.slots.get_mut(fd).ok_or(KernelError::BadFd)?;
        if slot.take().is_none() {
            return Err(KernelError::BadFd);
        }
        if let Some(flag) = self.cloexec.get_mut(fd) {
            *flag = false;
        }
        Ok(())
    }

    /// Close every descriptor (process exit).
    pub fn close_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.cloexec = [false; NFILES];
    }

    /// Close only the descriptors marked close-on-exec, leaving the rest
    /// open in the new image (spec.md §6 execve contract).
    pub fn close_on_exec(&mut self) {
        for (slot, flag) in self.slots.iter_mut().zip(self.cloexec.iter_mut()) {
            if *flag {
                *slot = None;
                *flag = false;
            }
        }
    }

    /// Copy every descriptor into a new table, bumping each file's
    /// refcount (the `Rc` clone) and carrying over each fd's close-on-exec
    /// flag, for `fork`.
    pub fn fork_copy(&self) -> FileTable {
        FileTable {
            slots: core::array::from_fn(|i| self.slots[i].clone()),
            cloexec: self.cloexec,
        }
    }
}

impl Default for FileTable {
    fn default() -> Self {
        FileTable::new()
    }
}

/// A process's address space: the VM area map plus the page directory
/// (the external [`crate::collab::AddressSpace`] implementation). Kernel
/// processes have none.
pub struct ProcessVm {
    pub map: VmMap,
    pub page_dir: alloc::boxed::Box<dyn crate::collab::AddressSpace>,
}

pub struct Process {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub children: Vec<ProcessId>,
    pub threads: ThreadSet,
    pub vm: Option<ProcessVm>,
    pub cwd: Option<Rc<dyn Vnode>>,
    pub files: FileTable,
    pub start_brk: usize,
    pub brk: usize,
    pub state: ProcessState,
    pub exit_status: i32,
    /// Parents block here in `do_waitpid` until a child dies.
    pub wait_queue: WaitQueue,
}

impl Process {
    fn new(pid: ProcessId, parent: Option<ProcessId>) -> Process {
        Process {
            pid,
            parent,
            children: Vec::new(),
            threads: ThreadSet::new(),
            vm: None,
            cwd: None,
            files: FileTable::new(),
            start_brk: 0,
            brk: 0,
            state: ProcessState::Running,
            exit_status: 0,
            wait_queue: WaitQueue::new(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.state == ProcessState::Dead
    }
}

/// Owns every live [`Process`], keyed by PID. PID 1 and 2 are reserved for
/// IDLE and INIT by the early boot convention (spec.md §3).
pub struct ProcessTable {
    processes: BTreeMap<i32, Process>,
    next_pid: i32,
}

impl ProcessTable {
    pub fn new() -> ProcessTable {
        ProcessTable {
            processes: BTreeMap::new(),
            next_pid: PID_FIRST_DYNAMIC,
        }
    }

    fn alloc_pid(&mut self) -> i32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// Create the IDLE process (PID reserved, no parent). Must be called
    /// exactly once during boot.
    pub fn create_idle(&mut self) -> ProcessId {
        let id = ProcessId(PID_IDLE);
        self.processes.insert(PID_IDLE, Process::new(id, None));
        id
    }

    /// Create INIT as a child of IDLE.
    pub fn create_init(&mut self) -> ProcessId {
        let id = ProcessId(PID_INIT);
        self.processes
            .insert(PID_INIT, Process::new(id, Some(ProcessId(PID_IDLE))));
        self.attach_child(ProcessId(PID_IDLE), id);
        id
    }

    /// Allocate a PID, zero the file table, and attach to `parent`.
    /// Corresponds to spec.md §4.2 `proc_create`.
    pub fn create(&mut self, parent: ProcessId) -> KernelResult<ProcessId> {
        if self.processes.len() >= crate::config::NPROC {
            return Err(KernelError::MaxProcesses);
        }
        let pid = self.alloc_pid();
        let id = ProcessId(pid);
        self.processes.insert(pid, Process::new(id, Some(parent)));
        self.attach_child(parent, id);
        Ok(id)
    }

    fn attach_child(&mut self, parent: ProcessId, child: ProcessId) {
        if let Some(p) = self.processes.get_mut(&parent.0) {
            p.children.push(child);
        }
    }

    pub fn get(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(&id.0)
    }

    pub fn get_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&id.0)
    }

    /// Reparent every child of `id` to INIT (spec.md §4.2 exit cleanup).
    /// Returns INIT's id so the caller can wake its wait queue.
    pub fn reparent_children_to_init(&mut self, id: ProcessId) -> ProcessId {
        let init = ProcessId(PID_INIT);
        let children = self
            .processes
            .get_mut(&id.0)
            .map(|p| core::mem::take(&mut p.children))
            .unwrap_or_default();
        for child in &children {
            if let Some(c) = self.processes.get_mut(&child.0) {
                c.parent = Some(init);
            }
        }
        if let Some(init_proc) = self.processes.get_mut(&init.0) {
            init_proc.children.extend(children);
        }
        init
    }

    /// Reap a dead child: remove it from `parent`'s children set, free its
    /// PID, and return its exit status. `do_waitpid` calls this once it
    /// has found a matching dead child.
    pub fn reap(&mut self, parent: ProcessId, child: ProcessId) -> KernelResult<i32> {
        let status = {
            let child_proc = self.processes.get(&child.0).ok_or(KernelError::NoChild)?;
            if !child_proc.is_dead() {
                return Err(KernelError::InvalidArg);
            }
            child_proc.exit_status
        };
        if let Some(p) = self.processes.get_mut(&parent.0) {
            p.children.retain(|&c| c != child);
        }
        self.processes.remove(&child.0);
        Ok(status)
    }

    /// Find a dead child of `parent` matching `pid` (-1 for "any"),
    /// without removing it yet.
    pub fn find_dead_child(&self, parent: ProcessId, pid: i32) -> Option<ProcessId> {
        let p = self.processes.get(&parent.0)?;
        p.children
            .iter()
            .copied()
            .find(|&c| (pid == -1 || c.0 == pid) && self.processes.get(&c.0).is_some_and(Process::is_dead))
    }

    pub fn has_child(&self, parent: ProcessId, pid: i32) -> bool {
        self.processes
            .get(&parent.0)
            .is_some_and(|p| p.children.iter().any(|&c| pid == -1 || c.0 == pid))
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        ProcessTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_attaches_to_parent_children() {
        let mut table = ProcessTable::new();
        table.create_idle();
        let init = table.create_init();
        let child = table.create(init).unwrap();
        assert_eq!(table.get(init).unwrap().children, alloc::vec![child]);
        assert_eq!(table.get(child).unwrap().parent, Some(init));
    }

    #[test]
    fn reparent_moves_children_to_init_and_updates_parent_pointer() {
        let mut table = ProcessTable::new();
        table.create_idle();
        table.create_init();
        let parent = table.create(ProcessId(PID_INIT)).unwrap();
        let child = table.create(parent).unwrap();

        table.reparent_children_to_init(parent);
        assert_eq!(table.get(child).unwrap().parent, Some(ProcessId(PID_INIT)));
        assert!(table.get(ProcessId(PID_INIT)).unwrap().children.contains(&child));
    }

    #[test]
    fn reap_removes_child_and_returns_status() {
        let mut table = ProcessTable::new();
        table.create_idle();
        table.create_init();
        let child = table.create(ProcessId(PID_INIT)).unwrap();
        table.get_mut(child).unwrap().state = ProcessState::Dead;
        table.get_mut(child).unwrap().exit_status = 7;

        let status = table.reap(ProcessId(PID_INIT), child).unwrap();
        assert_eq!(status, 7);
        assert!(!table.get(ProcessId(PID_INIT)).unwrap().children.contains(&child));
        assert!(table.get(child).is_none());
    }

    #[test]
    fn file_table_dup_shares_the_same_open_file() {
        use crate::collab::fakes::FakeVnode;
        let mut files = FileTable::new();
        let file = Rc::new(OpenFile {
            vnode: Rc::new(FakeVnode::new(1)),
            offset: RefCell::new(0),
        });
        let fd = files.install(file, false).unwrap();
        let dup_fd = files.dup(fd).unwrap();
        assert!(Rc::ptr_eq(files.get(fd).unwrap(), files.get(dup_fd).unwrap()));
    }

    #[test]
    fn close_on_exec_only_closes_descriptors_marked_cloexec() {
        use crate::collab::fakes::FakeVnode;
        let mut files = FileTable::new();
        let stdout = Rc::new(OpenFile {
            vnode: Rc::new(FakeVnode::new(1)),
            offset: RefCell::new(0),
        });
        let tmp = Rc::new(OpenFile {
            vnode: Rc::new(FakeVnode::new(1)),
            offset: RefCell::new(0),
        });
        let stdout_fd = files.install(stdout, false).unwrap();
        let tmp_fd = files.install(tmp, true).unwrap();

        files.close_on_exec();

        assert!(files.get(stdout_fd).is_some());
        assert!(files.get(tmp_fd).is_none());
    }

    #[test]
    fn dup_never_inherits_the_source_descriptors_cloexec_flag() {
        use crate::collab::fakes::FakeVnode;
        let mut files = FileTable::new();
        let file = Rc::new(OpenFile {
            vnode: Rc::new(FakeVnode::new(1)),
            offset: RefCell::new(0),
        });
        let fd = files.install(file, true).unwrap();
        let dup_fd = files.dup(fd).unwrap();

        files.close_on_exec();

        assert!(files.get(fd).is_none());
        assert!(files.get(dup_fd).is_some());
    }
}
