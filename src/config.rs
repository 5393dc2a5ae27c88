//! Kernel-wide configuration constants.
//!
//! Mirrors the teacher's `param.rs`: one place for the magic numbers that
//! size the static kernel tables, rather than scattering them through the
//! modules that use them.

/// Maximum number of live processes.
pub const NPROC: usize = 64;

/// Maximum number of open files per process.
pub const NFILES: usize = 16;

/// Maximum number of threads a single process may own at once.
pub const NTHREADS_PER_PROC: usize = 8;

/// Size, in bytes, of a kernel stack given to a new thread.
pub const KSTACK_SIZE: usize = 4096 * 4;

/// Size, in bytes, of one page.
pub const PAGE_SIZE: usize = 4096;

/// Capacity of a single wait queue (ring-buffer backed, see [`crate::sync::queue`]).
pub const WAIT_QUEUE_CAPACITY: usize = NPROC;

/// Upper bound on live memory objects (anon/shadow/file) system-wide.
/// `fork`'s shadow pre-allocation (spec.md §4.3 step 3) fails with
/// `NO_MEMORY` once this is reached, which is how the crate's tests
/// exercise the fork failure/cleanup path deterministically.
pub const MAX_MM_OBJECTS: usize = 4096;

/// PID reserved for the idle process by the early boot convention.
pub const PID_IDLE: i32 = 1;

/// PID reserved for the init process by the early boot convention.
pub const PID_INIT: i32 = 2;

/// First PID handed out to a process created after `init`.
pub const PID_FIRST_DYNAMIC: i32 = 3;
