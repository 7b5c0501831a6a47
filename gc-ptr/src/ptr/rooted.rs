use {
    crate::{Propagation, RootId, Trace},
    std::{fmt, ops::Deref},
};

/// Plain value that acts as a root for the handles inside it.
///
/// This is how a struct with [`Gc`] fields is used without
/// allocating it as a managed object itself:
/// the fields forward the identity of the wrapper instead of their own,
/// so cycles reached only through the wrapper are reclaimed
/// when the wrapper is dropped.
///
/// [`Gc`]: `crate::Gc`
pub struct Rooted<T: Trace>
{
    id: RootId,
    value: T,
}

impl<T: Trace> Rooted<T>
{
    /// Wrap a value and connect its handles to a fresh root identity.
    pub fn new(value: T) -> Self
    {
        let id = RootId::fresh();
        value.connect(&mut Propagation::connect(id));
        Self{id, value}
    }

    /// Identity of this root.
    pub fn id(&self) -> RootId
    {
        self.id
    }
}

impl<T: Trace> Deref for Rooted<T>
{
    type Target = T;

    fn deref(&self) -> &T
    {
        &self.value
    }
}

impl<T: Trace> Drop for Rooted<T>
{
    fn drop(&mut self)
    {
        self.value.disconnect(&mut Propagation::disconnect(self.id, true));
    }
}

impl<T: Trace + fmt::Debug> fmt::Debug for Rooted<T>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_struct("Rooted")
            .field("id", &self.id)
            .field("value", &self.value)
            .finish()
    }
}
