//! Crate-wide error type.
//!
//! The teacher's process code returns small hand-rolled `XError` enums
//! (`ProcessError`, `QueueError`, ...) per module. We keep that shape but
//! fold every module's error into one `KernelError` via `snafu`, the way
//! `vesper`'s `BootInfoError` is derived, so the whole crate gets `Display`
//! and `core::error::Error` impls without hand-writing them per variant.

use snafu::Snafu;

#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum KernelError {
    #[snafu(display("out of memory"))]
    NoMemory,

    #[snafu(display("no child processes"))]
    NoChild,

    #[snafu(display("invalid argument"))]
    InvalidArg,

    #[snafu(display("not found"))]
    NotFound,

    #[snafu(display("not a directory"))]
    NotDirectory,

    #[snafu(display("is a directory"))]
    IsDirectory,

    #[snafu(display("already exists"))]
    Exists,

    #[snafu(display("bad file descriptor"))]
    BadFd,

    #[snafu(display("no space left"))]
    NoSpace,

    #[snafu(display("no such device"))]
    NoDevice,

    #[snafu(display("interrupted"))]
    Interrupted,

    #[snafu(display("permission denied"))]
    Permission,

    #[snafu(display("exec format error"))]
    NoExec,

    #[snafu(display("too many open files"))]
    TooManyFiles,

    #[snafu(display("maximum number of processes reached"))]
    MaxProcesses,

    #[snafu(display("maximum number of threads reached"))]
    MaxThreads,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Convert to the negative-errno convention used by the syscall ABI
    /// (non-negative accumulator on success, negative error code on failure).
    pub fn to_errno(self) -> i64 {
        let code: i64 = match self {
            KernelError::NoMemory => 12,       // ENOMEM
            KernelError::NoChild => 10,        // ECHILD
            KernelError::InvalidArg => 22,     // EINVAL
            KernelError::NotFound => 2,        // ENOENT
            KernelError::NotDirectory => 20,   // ENOTDIR
            KernelError::IsDirectory => 21,    // EISDIR
            KernelError::Exists => 17,         // EEXIST
            KernelError::BadFd => 9,           // EBADF
            KernelError::NoSpace => 28,        // ENOSPC
            KernelError::NoDevice => 19,       // ENODEV
            KernelError::Interrupted => 4,     // EINTR
            KernelError::Permission => 1,      // EPERM
            KernelError::NoExec => 8,          // ENOEXEC
            KernelError::TooManyFiles => 24,   // EMFILE
            KernelError::MaxProcesses => 11,   // EAGAIN
            KernelError::MaxThreads => 11,     // EAGAIN
        };
        -code
    }
}
