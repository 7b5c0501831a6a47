use std::{
    fmt,
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering::Relaxed},
};

/// Identity of something that keeps objects alive.
///
/// Every handle and every [`Rooted`] wrapper draws a fresh identity
/// when it is created, and keeps it for as long as it exists.
/// Identities are only compared and hashed.
/// They are not addresses, so they stay valid when their owner moves.
///
/// [`Rooted`]: `crate::Rooted`
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RootId(NonZeroU64);

impl RootId
{
    /// Draw an identity that was never handed out before.
    pub fn fresh() -> Self
    {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let id = NEXT.fetch_add(1, Relaxed);
        Self(NonZeroU64::new(id).expect("Root identities exhausted"))
    }
}

impl fmt::Debug for RootId
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "RootId(#{})", self.0)
    }
}
