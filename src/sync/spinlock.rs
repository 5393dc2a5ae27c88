//! A busy-wait lock guarding a value, for critical sections short enough
//! that sleeping would cost more than spinning (refcount bumps, table
//! lookups). Adapted from the teacher's `SpinMutex<T>`: same
//! compare-and-swap core, but without the RISC-V `push_intr_off`/
//! `pop_intr_off` pair, since this crate threads scheduler state through
//! explicit context parameters instead of a per-CPU interrupt-depth global.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

pub struct Spinlock<T> {
    locked: AtomicBool,
    inner: UnsafeCell<T>,
}

impl<T> Spinlock<T> {
    pub const fn new(value: T) -> Spinlock<T> {
        Spinlock {
            locked: AtomicBool::new(false),
            inner: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        while self.locked.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }
        SpinlockGuard { lock: self }
    }

    /// # Safety
    /// Caller must guarantee the lock is actually held and release it
    /// exactly once.
    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

unsafe impl<T: Send> Sync for Spinlock<T> {}
unsafe impl<T: Send> Send for Spinlock<T> {}

pub struct SpinlockGuard<'l, T> {
    lock: &'l Spinlock<T>,
}

impl<'l, T> Deref for SpinlockGuard<'l, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<'l, T> DerefMut for SpinlockGuard<'l, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<'l, T> Drop for SpinlockGuard<'l, T> {
    fn drop(&mut self) {
        unsafe { self.lock.unlock() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_roundtrips_value() {
        let lock = Spinlock::new(5i32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 6);
    }
}
