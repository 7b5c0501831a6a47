//! Ad-hoc scope guards.
//!
//! Lock flags and visitor counts in this workspace must be restored
//! no matter how a critical section is left,
//! including when a panic unwinds through it.
//! The [`scope_exit!`] macro covers all of those exits with one statement.

#![warn(missing_docs)]

use std::mem::ManuallyDrop;

/// Guard that runs a closure when it goes out of scope.
///
/// Usually created through [`scope_exit!`].
#[must_use = "the closure runs as soon as the guard is dropped"]
pub struct ScopeExit<F>
    where F: FnOnce()
{
    f: ManuallyDrop<F>,
}

impl<F> ScopeExit<F>
    where F: FnOnce()
{
    /// Create a guard that calls `f` when dropped.
    #[inline]
    pub fn new(f: F) -> Self
    {
        Self{f: ManuallyDrop::new(f)}
    }
}

impl<F> Drop for ScopeExit<F>
    where F: FnOnce()
{
    #[inline]
    fn drop(&mut self)
    {
        // SAFETY: Drop runs once, so self.f is never taken twice.
        let f = unsafe { ManuallyDrop::take(&mut self.f) };
        f();
    }
}

/// Define an ad-hoc scope guard.
///
/// The code passed to this macro runs at the end of the enclosing scope,
/// whether the scope is left normally, through `return` or `?`,
/// or by a panic unwinding through it.
/// Guards run in reverse order of definition.
///
/// # Examples
///
/// ```
/// # use scope_exit::scope_exit;
/// use std::cell::RefCell;
/// let log = RefCell::new(Vec::new());
/// {
///     scope_exit! { log.borrow_mut().push("outer"); }
///     scope_exit! { log.borrow_mut().push("inner"); }
///     log.borrow_mut().push("body");
/// }
/// assert_eq!(*log.borrow(), ["body", "inner", "outer"]);
/// ```
#[macro_export]
macro_rules! scope_exit
{
    { $($tt:tt)* } => {
        let __scope_exit = $crate::ScopeExit::new(|| { $($tt)* });
    };
}
