use {
    scope_exit::scope_exit,
    std::{
        cell::UnsafeCell,
        fmt,
        hint,
        sync::atomic::{AtomicBool, Ordering::{Acquire, Relaxed, Release}},
    },
};

/// Busy-waiting mutual exclusion over a single flag.
///
/// Acquisition spins until it can flip the flag from clear to set;
/// it never yields to the operating system.
/// This only pays off for critical sections that are short and bounded,
/// such as updating the root set of a control block.
///
/// The lock is not reentrant.
/// Calling [`with`][`Self::with`] on a lock from inside
/// a closure already running under that same lock deadlocks.
pub struct SpinLock<T>
{
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: Access to value is serialized by the flag.
unsafe impl<T: Send> Send for SpinLock<T> { }
unsafe impl<T: Send> Sync for SpinLock<T> { }

impl<T> SpinLock<T>
{
    /// Create an unlocked spin lock.
    pub const fn new(value: T) -> Self
    {
        Self{locked: AtomicBool::new(false), value: UnsafeCell::new(value)}
    }

    /// Run a closure with exclusive access to the protected value.
    ///
    /// The lock is released when the closure returns or panics.
    pub fn with<F, R>(&self, f: F) -> R
        where F: FnOnce(&mut T) -> R
    {
        while self.locked
            .compare_exchange_weak(false, true, Acquire, Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }

        scope_exit! { self.locked.store(false, Release); }

        // SAFETY: We hold the flag until the guard above clears it.
        f(unsafe { &mut *self.value.get() })
    }

    /// Whether some thread currently holds the lock.
    ///
    /// The answer may be stale by the time it is returned.
    pub fn is_locked(&self) -> bool
    {
        self.locked.load(Relaxed)
    }

    /// Access the protected value without locking.
    pub fn get_mut(&mut self) -> &mut T
    {
        self.value.get_mut()
    }

    /// Consume the lock and return the protected value.
    pub fn into_inner(self) -> T
    {
        self.value.into_inner()
    }
}

impl<T> fmt::Debug for SpinLock<T>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}
