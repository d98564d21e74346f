use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

use super::{SpinLock, SpinLockCondVar, TryLockError, WaitError};

#[derive(Debug, thiserror::Error)]
pub enum SleepLockError {
    #[error("locking process already killed")]
    LockingProcessAlreadyKilled,
}

/// A lock that puts the waiting process to sleep instead of spinning.
///
/// Unlike [`SpinLock`], the critical section may itself sleep (e.g. while
/// reading a block from disk), so the lock cannot simply disable interrupts.
pub struct SleepLock<T> {
    locked: SpinLock<bool>,
    cond: SpinLockCondVar,
    data: UnsafeCell<T>,
}

unsafe impl<T> Sync for SleepLock<T> where T: Send {}

impl<T> SleepLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            locked: SpinLock::new(false),
            cond: SpinLockCondVar::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Tries to acquire the lock without sleeping.
    pub fn try_lock(&self) -> Result<SleepLockGuard<T>, TryLockError> {
        let mut locked = self.locked.lock();
        if *locked {
            return Err(TryLockError);
        }
        *locked = true;
        Ok(SleepLockGuard { lock: self })
    }

    /// Acquires the lock, sleeping while it is held by another process.
    ///
    /// Returns `Err` if this process is killed while waiting.
    pub fn lock(&self) -> Result<SleepLockGuard<T>, SleepLockError> {
        let mut locked = self.locked.lock();
        while *locked {
            locked = match self.cond.wait(locked) {
                Ok(locked) => locked,
                Err((_, WaitError::WaitingProcessAlreadyKilled)) => {
                    return Err(SleepLockError::LockingProcessAlreadyKilled);
                }
            };
        }
        *locked = true;
        Ok(SleepLockGuard { lock: self })
    }

    /// Like [`lock()`](Self::lock), but keeps waiting even if the process is
    /// killed.
    pub fn force_lock(&self) -> SleepLockGuard<T> {
        let mut locked = self.locked.lock();
        while *locked {
            locked = self.cond.force_wait(locked);
        }
        *locked = true;
        SleepLockGuard { lock: self }
    }

    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }
}

pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
}

unsafe impl<T> Send for SleepLockGuard<'_, T> where T: Send {}
unsafe impl<T> Sync for SleepLockGuard<'_, T> where T: Sync {}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        *self.lock.locked.lock() = false;
        self.lock.cond.notify();
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}
