pub mod queue;
pub mod spinlock;

pub use queue::WaitQueue;
pub use spinlock::Spinlock;
