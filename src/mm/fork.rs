//! Fork & shadow engine (component I, spec.md §4.3) — the hard core of
//! the crate. Clones a process's address space so that private pages are
//! copy-on-write between parent and child while shared pages stay shared,
//! and opportunistically collapses shadow chains so repeated forking
//! doesn't grow them linearly.
//!
//! Grounded on the teacher's `uvmcopy` (`mem::virtual_memory` in the
//! pre-transform tree), which walks a `Pagetable` and eagerly `memmove`s
//! every page into a freshly allocated twin. This module keeps the same
//! "clone the map, walk its areas" shape but defers the copy: instead of
//! copying pages, it inserts a pair of [`MmObjId`] shadows per PRIVATE
//! area and lets the existing copy-on-write fault path (resolved through
//! [`MmObjTable::lookup_page`]) do the actual copying lazily.

use crate::{
    collab::AddressSpace,
    config::MAX_MM_OBJECTS,
    error::{KernelError, KernelResult},
    mm::{
        mmobj::{MemObjectKind, MmObjId, MmObjTable},
        PageRange,
    },
    proc::{
        cpu::Cpu,
        process::{ProcessId, ProcessTable, ProcessVm},
        scheduler::Scheduler,
        thread::ThreadId,
    },
};
use alloc::{boxed::Box, vec::Vec};

/// Pre-allocate `count` placeholder shadow slots (spec.md §4.3 step 3).
/// Each slot starts as an `Anon` object holding a single external
/// reference and nothing else, so on the failure path a plain `put` per
/// slot releases it cleanly — there is no `shadowed` link yet to cascade
/// through, since the real target (`base`) isn't known until step 5.
fn reserve_shadow_pool(objects: &mut MmObjTable, count: usize) -> KernelResult<Vec<MmObjId>> {
    let mut pool = Vec::with_capacity(count);
    for _ in 0..count {
        if objects.len() >= MAX_MM_OBJECTS {
            for id in pool.into_iter().rev() {
                objects.put(id);
            }
            return Err(KernelError::NoMemory);
        }
        pool.push(objects.alloc(MemObjectKind::Anon));
    }
    Ok(pool)
}

/// Opportunistic shadow-chain collapse (spec.md §4.3 step 7). Walks the
/// chain below `top` (the area's freshly installed shadow) and splices
/// out any interior shadow whose external refcount — refcount minus
/// resident pages, i.e. holders other than its resident-page set — is
/// exactly 1, meaning its sole holder is the link above it in the chain.
///
/// This resolves the Open Question in spec.md §9: rather than threading
/// a ref/put pair through every loop iteration (whose correctness the
/// source doesn't actually establish), each splice computes its net
/// refcount delta directly — ref the node being skipped to once before
/// retargeting `above` at it, then `put` the spliced-out node, whose
/// cascade exactly cancels that new ref against the one `above` used to
/// hold through the node being removed. The walk never suspends (no
/// cancellable sleeps, no lock acquisition), matching the invariant that
/// page operations on shadows are non-blocking.
fn collapse_chain(objects: &mut MmObjTable, top: MmObjId) {
    let mut above = top;
    loop {
        let (node, bottom) = match objects.get(above).map(|o| &o.kind) {
            Some(MemObjectKind::Shadow {
                shadowed,
                bottom_obj,
            }) => (*shadowed, *bottom_obj),
            _ => return,
        };
        let node_is_shadow = matches!(
            objects.get(node).map(|o| &o.kind),
            Some(MemObjectKind::Shadow { .. })
        );
        if !node_is_shadow {
            return;
        }

        let external = objects
            .get(node)
            .map(|o| o.refcount() as usize - o.nrespages())
            .unwrap_or(0);
        if external != 1 {
            above = node;
            continue;
        }

        // Migrate every page `node` holds up to the area's top shadow.
        let indices: Vec<usize> = objects.get(node).unwrap().resident_indices().collect();
        for index in indices {
            if let Some(frame) = objects.evict_page(node, index) {
                objects.fill_page(top, index, frame);
            }
        }

        let node_next = match objects.get(node).map(|o| &o.kind) {
            Some(MemObjectKind::Shadow { shadowed, .. }) => *shadowed,
            _ => bottom,
        };
        objects.ref_obj(node_next);
        if let Some(obj) = objects.get_mut(above) {
            obj.kind = MemObjectKind::Shadow {
                shadowed: node_next,
                bottom_obj: bottom,
            };
        }
        objects.put(node);
        // Stay on `above`; it now points directly at `node_next`, which
        // may itself be collapsible.
    }
}

/// `fork(2)`'s core: clone the calling thread and its process's address
/// space into a brand new child process, installing copy-on-write shadow
/// objects over every PRIVATE area. Returns the child's pid in the
/// parent.
///
/// `child_page_dir` is a freshly built page directory from the external
/// [`crate::collab::AddressSpace`] collaborator (spec.md's "creates a new
/// page directory cloned from the kernel template" is out of this
/// crate's scope — constructing one is the caller's job; this function
/// only installs it and unmaps the parent's user range to drive
/// subsequent copy-on-write faults).
///
/// Failure-cleanup order matches spec.md §5's "newobjs → newmap →
/// newthr": on any failure, the shadow pool allocated so far is put
/// first, then the cloned map is destroyed, then the cloned thread is
/// discarded — leaving no observable side effect, per spec.md §7.
pub fn do_fork(
    cpu: &Cpu,
    sched: &mut Scheduler,
    processes: &mut ProcessTable,
    objects: &mut MmObjTable,
    child_page_dir: Box<dyn AddressSpace>,
) -> KernelResult<ProcessId> {
    let parent_thread = cpu.current.expect("fork with no current thread");
    let parent_pid = sched
        .threads
        .get(parent_thread)
        .expect("current thread not in thread table")
        .owner;

    // Step 1: clone the current thread. `owner` is patched to the child
    // once it exists.
    let newthr = sched
        .threads
        .clone_thread(parent_thread, parent_pid)
        .ok_or(KernelError::InvalidArg)?;

    let Some(parent_vm) = processes
        .get(parent_pid)
        .ok_or(KernelError::InvalidArg)?
        .vm
        .as_ref()
    else {
        // Kernel-only processes have no address space to fork.
        sched.threads.remove(newthr);
        return Err(KernelError::InvalidArg);
    };

    // Step 2: clone the VM map structure. Every area's object gains one
    // reference; SHARED areas keep it permanently, PRIVATE areas' extra
    // ref is released again below once the area is redirected to its
    // fresh shadow.
    let mut newmap = parent_vm.map.clone_with(objects);
    let private_count = parent_vm
        .map
        .areas()
        .iter()
        .filter(|a| a.is_private())
        .count();

    // Step 3: pre-allocate two shadows per PRIVATE area.
    let pool = match reserve_shadow_pool(objects, private_count * 2) {
        Ok(pool) => pool,
        Err(e) => {
            newmap.destroy(objects);
            sched.threads.remove(newthr);
            return Err(e);
        }
    };

    let parent_start_brk = processes.get(parent_pid).unwrap().start_brk;
    let parent_brk = processes.get(parent_pid).unwrap().brk;

    // Step 4: create the child process.
    let child_pid = match processes.create(parent_pid) {
        Ok(pid) => pid,
        Err(e) => {
            for id in pool.into_iter().rev() {
                objects.put(id);
            }
            newmap.destroy(objects);
            sched.threads.remove(newthr);
            return Err(e);
        }
    };

    // Step 5: reparent objects. SHARED areas need no further work (done
    // by `clone_with` above); PRIVATE areas get their pre-allocated
    // shadow pair installed.
    let mut pool_iter = pool.into_iter();
    {
        let parent_map = &mut processes
            .get_mut(parent_pid)
            .unwrap()
            .vm
            .as_mut()
            .unwrap()
            .map;
        let parent_areas = parent_map.areas_mut();
        let child_areas = newmap.areas_mut();
        debug_assert_eq!(parent_areas.len(), child_areas.len());

        for (parent_area, child_area) in parent_areas.iter_mut().zip(child_areas.iter_mut()) {
            if !parent_area.is_private() {
                continue;
            }
            let s_old = pool_iter.next().expect("shadow pool exhausted");
            let s_new = pool_iter.next().expect("shadow pool exhausted");
            let base = parent_area.object;
            let bottom = objects.bottom_of(base);

            objects.get_mut(s_old).unwrap().kind = MemObjectKind::Shadow {
                shadowed: base,
                bottom_obj: bottom,
            };
            objects.ref_obj(base);
            objects.get_mut(s_new).unwrap().kind = MemObjectKind::Shadow {
                shadowed: base,
                bottom_obj: bottom,
            };
            objects.ref_obj(base);

            parent_area.object = s_old;
            objects.put(base); // releases parent_area's original direct ref

            child_area.object = s_new;
            objects.put(base); // releases the extra ref `clone_with` gave child_area
        }
    }

    // Install the child's map, thread, brk and page directory.
    {
        let child = processes.get_mut(child_pid).unwrap();
        child.vm = Some(ProcessVm {
            map: newmap,
            page_dir: child_page_dir,
        });
        child.start_brk = parent_start_brk;
        child.brk = parent_brk;
        child
            .threads
            .try_push(newthr)
            .expect("fresh child exceeds thread capacity");
    }
    sched.threads.get_mut(newthr).unwrap().owner = child_pid;

    // Step 6: copy the file descriptor table.
    let new_files = processes.get(parent_pid).unwrap().files.fork_copy();
    processes.get_mut(child_pid).unwrap().files = new_files;

    // Step 7: opportunistic chain collapse over the parent's areas.
    let tops: Vec<MmObjId> = processes
        .get(parent_pid)
        .unwrap()
        .vm
        .as_ref()
        .unwrap()
        .map
        .areas()
        .iter()
        .filter(|a| a.is_private())
        .map(|a| a.object)
        .collect();
    for top in tops {
        collapse_chain(objects, top);
    }

    // Step 8: newthr's context already carries the fork-return-0
    // convention (applied by `clone_thread`) and its own kernel stack;
    // the instruction pointer it resumes at is the userland-return
    // trampoline, an architecture-specific external interface (Design
    // Notes §9) this crate does not own.

    // Step 9: unmap the parent's PRIVATE ranges so subsequent writes
    // trap and drive copy-on-write, then flush.
    {
        let parent = processes.get_mut(parent_pid).unwrap();
        let vm = parent.vm.as_mut().unwrap();
        let ranges: Vec<PageRange> = vm
            .map
            .areas()
            .iter()
            .filter(|a| a.is_private())
            .map(|a| a.range)
            .collect();
        for range in ranges {
            vm.page_dir.unmap_range(range.start, range.end);
        }
        vm.page_dir.flush_tlb();
    }

    // Step 10: make the child runnable.
    sched.make_runnable(newthr);
    Ok(child_pid)
}
