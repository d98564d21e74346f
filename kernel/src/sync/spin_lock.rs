use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use mutex_api::Mutex;

use crate::{
    cpu::{self, INVALID_CPUID},
    interrupt,
    proc::ops::{self, SleepError},
};

#[derive(Debug, thiserror::Error)]
#[error("lock is already held")]
pub struct TryLockError;

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("waiting process already killed")]
    WaitingProcessAlreadyKilled,
}

impl From<SleepError> for WaitError {
    fn from(error: SleepError) -> Self {
        match error {
            SleepError::SleepingProcessAlreadyKilled => Self::WaitingProcessAlreadyKilled,
        }
    }
}

#[derive(Default)]
pub struct RawSpinLock {
    locked: AtomicBool,
    cpuid: UnsafeCell<usize>,
}

unsafe impl Sync for RawSpinLock {}

impl RawSpinLock {
    pub(super) const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            cpuid: UnsafeCell::new(INVALID_CPUID),
        }
    }

    fn try_acquire(&self) -> Result<(), TryLockError> {
        // disable interrupts to avoid deadlock.
        let int_guard = interrupt::push_disabled();

        assert!(!self.holding());

        // `Ordering::Acquire` tells the compiler and the processor to not move loads or
        // stores past this point, to ensure that the critical section's memory
        // references happen strictly after the lock is acquired.
        // On RISC-V, this emits a fence instruction.
        if self.locked.swap(true, Ordering::Acquire) {
            return Err(TryLockError);
        }

        // Record info about lock acquisition for holding() and debugging.
        unsafe {
            *self.cpuid.get() = cpu::id();
        }

        int_guard.forget(); // drop re-enables interrupts, so we must forget it here.

        Ok(())
    }

    /// Acquires the lock.
    ///
    /// Loops (spins) until the lock is acquired.
    pub(super) fn acquire(&self) {
        // disable interrupts to avoid deadlock.
        let int_guard = interrupt::push_disabled();

        assert!(!self.holding());

        while self.locked.swap(true, Ordering::Acquire) {}

        unsafe {
            *self.cpuid.get() = cpu::id();
        }

        int_guard.forget(); // drop re-enables interrupts, so we must forget it here.
    }

    /// Releases the lock.
    pub(super) fn release(&self) {
        assert!(self.holding());

        unsafe {
            *self.cpuid.get() = INVALID_CPUID;
        }

        self.locked.store(false, Ordering::Release);

        unsafe {
            interrupt::pop_disabled();
        }
    }

    /// Checks whether this cpu is holding the lock.
    ///
    /// Interrupts must be off.
    pub(super) fn holding(&self) -> bool {
        assert!(!interrupt::is_enabled());
        self.locked.load(Ordering::Relaxed) && unsafe { *self.cpuid.get() } == cpu::id()
    }
}

#[derive(Default)]
pub struct SpinLock<T> {
    lock: RawSpinLock,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: RawSpinLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Tries to acquire the lock without spinning.
    pub fn try_lock(&self) -> Result<SpinLockGuard<T>, TryLockError> {
        self.lock.try_acquire()?;
        Ok(SpinLockGuard { lock: self })
    }

    /// Acquires the lock.
    ///
    /// Loops (spins) until the lock is acquired.
    pub fn lock(&self) -> SpinLockGuard<T> {
        self.lock.acquire();
        SpinLockGuard { lock: self }
    }

    /// Builds a guard for a lock this CPU already holds.
    ///
    /// Caller must ensure the lock is currently held by this CPU.
    pub unsafe fn remember_locked(&self) -> SpinLockGuard<T> {
        assert!(self.lock.holding());
        SpinLockGuard { lock: self }
    }
}

impl<T> Mutex for SpinLock<T> {
    type Data = T;
    type Guard<'a>
        = SpinLockGuard<'a, T>
    where
        T: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T> Send for SpinLockGuard<'_, T> where T: Send {}
unsafe impl<T> Sync for SpinLockGuard<'_, T> where T: Sync {}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.lock.release();
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T> SpinLockGuard<'a, T> {
    pub fn into_lock(self) -> &'a SpinLock<T> {
        self.lock
    }
}

/// A condition variable used together with a [`SpinLock`].
///
/// Each instance is its own wait channel: its address identifies the
/// channel passed to [`ops::sleep`]/[`ops::wakeup`].
pub struct SpinLockCondVar {
    _private: (),
}

impl SpinLockCondVar {
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Releases `guard`, sleeps until [`notify()`](Self::notify) is called, then
    /// reacquires the lock.
    ///
    /// Returns `Err` if this process is killed while sleeping.
    pub fn wait<'a, T>(
        &self,
        guard: SpinLockGuard<'a, T>,
    ) -> Result<SpinLockGuard<'a, T>, (SpinLockGuard<'a, T>, WaitError)> {
        ops::sleep(self, guard).map_err(|(guard, e)| (guard, e.into()))
    }

    /// Like [`wait()`](Self::wait), but continues sleeping even if the process is
    /// killed.
    pub fn force_wait<'a, T>(&self, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        ops::force_sleep(self, guard)
    }

    /// Wakes up all processes sleeping on this condition variable.
    pub fn notify(&self) {
        ops::wakeup(self);
    }
}

impl Default for SpinLockCondVar {
    fn default() -> Self {
        Self::new()
    }
}
