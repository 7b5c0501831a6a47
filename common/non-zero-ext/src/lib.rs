//! Extra methods for non-zero integers.
//!
//! Registries that store counts as non-zero integers
//! can use the absence of an entry to mean zero,
//! and these methods to step the counts without touching raw integers.

#![warn(missing_docs)]

use std::num::{NonZeroU32, NonZeroU64, NonZeroUsize};

/// Extra methods for non-zero integers.
pub trait NonZeroExt: Sized
{
    /// The number 1.
    const ONE: Self;

    /// Add one, or return [`None`] on overflow.
    fn increment(self) -> Option<Self>;

    /// Subtract one, or return [`None`] if the result would be zero.
    fn decrement(self) -> Option<Self>;
}

macro_rules! impl_non_zero_ext
{
    ($($t:ty),*) => {
        $(
            impl NonZeroExt for $t
            {
                const ONE: Self = unsafe { Self::new_unchecked(1) };

                fn increment(self) -> Option<Self>
                {
                    self.checked_add(1)
                }

                fn decrement(self) -> Option<Self>
                {
                    Self::new(self.get() - 1)
                }
            }
        )*
    };
}

impl_non_zero_ext!(NonZeroU32, NonZeroU64, NonZeroUsize);
