//! User mode spin lock guarding a value.

use crate::util;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Spins before each `yield_now` once the lock turns out to be contended.
const SPIN_LIMIT: u32 = 64;

/// User mode SpinLock
pub struct SpinLock<T = ()> {
    atomic: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}

unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        SpinLock::new(T::default())
    }
}

impl<T> SpinLock<T> {
    /// Create an unlocked SpinLock owning `data`.
    pub const fn new(data: T) -> Self {
        SpinLock {
            atomic: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Keep trying to lock until success, then return SpinLockGuard.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mut spins = 0u32;
        while self.is_locked()
            || self
                .atomic
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
        {
            spins += 1;
            if spins < SPIN_LIMIT {
                util::pause();
            } else {
                spins = 0;
                thread::yield_now();
            }
        }
        SpinLockGuard::new(self)
    }

    /// Return SpinLockGuard if lock successfully.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if !self.is_locked()
            && self
                .atomic
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        {
            Some(SpinLockGuard::new(self))
        } else {
            None
        }
    }

    /// Return true if locked.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.atomic.load(Ordering::Relaxed)
    }

    /// Mutable access without locking, the borrow checker proves exclusivity.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    #[inline]
    fn unlock(&self) {
        assert!(self
            .atomic
            .compare_exchange(true, false, Ordering::Release, Ordering::Relaxed)
            .is_ok());
    }
}

/// Guard of SpinLock, unlock it when dropped.
pub struct SpinLockGuard<'a, T> {
    spin_lock: &'a SpinLock<T>,
}

impl<'a, T> SpinLockGuard<'a, T> {
    fn new(spin_lock: &'a SpinLock<T>) -> Self {
        SpinLockGuard { spin_lock }
    }
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.spin_lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.spin_lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.spin_lock.unlock();
    }
}
