use {
    super::{Gc, Pointer, handle::Handle},
    crate::{DetachedError, Propagation, RootId, Storage, Trace},
    std::{fmt, ops::Deref},
};

/// Handle that keeps its object alive and can be dereferenced.
///
/// A root is never demoted: storing one inside a managed object
/// does not forward the roots of the containing object.
/// Roots are for locals and other values outside the object graph.
/// Use [`Gc`] for fields.
///
/// Only `&mut self` methods can change what a root points to,
/// so a shared borrow of a root keeps the object alive.
pub struct Root<T: Trace>
{
    handle: Handle<T>,
}

impl<T: Trace> Root<T>
{
    pub (super) fn from_handle(handle: Handle<T>) -> Self
    {
        Self{handle}
    }

    /// Allocate an object together with its control block.
    pub fn new(value: T) -> Self
    {
        Self::from_handle(Handle::new(value))
    }

    /// Manage an already boxed object.
    pub fn from_box(value: Box<T>) -> Self
    {
        Self::from_handle(Handle::from_box(value))
    }

    /// Identity of this root.
    pub fn id(&self) -> RootId
    {
        self.handle.id()
    }

    /// Borrow the object, or return [`None`] if the root was cleared.
    pub fn get(&self) -> Option<&T>
    {
        // SAFETY: The root identity of this handle is only released
        //         by methods that take &mut self, and by drop.
        unsafe { self.handle.value() }
    }

    /// Whether the root points to an object.
    pub fn is_some(&self) -> bool
    {
        self.handle.is_attached()
    }

    /// Create a field handle to the same object.
    pub fn to_gc(&self) -> Gc<T>
    {
        Gc::from_handle(self.handle.duplicate())
    }

    /// Point at whatever `source` points at.
    pub fn set(&mut self, source: &impl Pointer<T>)
    {
        self.handle.set(source.handle());
    }

    /// Point at nothing.
    pub fn clear(&mut self)
    {
        self.handle.clear();
    }

    /// Whether both handles point to the same object, or both to nothing.
    pub fn ptr_eq(&self, other: &impl Pointer<T>) -> bool
    {
        self.handle.ptr_eq(other.handle())
    }

    /// Root identities this handle registered with its target.
    ///
    /// For a root that is always its own identity alone.
    pub fn roots(&self) -> Vec<RootId>
    {
        self.handle.roots()
    }

    /// Root identities registered with the object and their counts,
    /// sorted by identity.
    pub fn target_roots(&self) -> Vec<(RootId, u32)>
    {
        self.handle.target_roots()
    }

    /// How the object was allocated.
    pub fn storage(&self) -> Option<Storage>
    {
        self.handle.storage()
    }
}

impl<T: Trace> Pointer<T> for Root<T>
{
    fn handle(&self) -> &Handle<T>
    {
        &self.handle
    }
}

impl<T: Trace> Clone for Root<T>
{
    fn clone(&self) -> Self
    {
        Self::from_handle(self.handle.duplicate())
    }
}

impl<T: Trace> Deref for Root<T>
{
    type Target = T;

    /// # Panics
    ///
    /// If the root was cleared.
    fn deref(&self) -> &T
    {
        self.get().expect("Dereferenced a cleared root")
    }
}

impl<T: Trace> TryFrom<&Gc<T>> for Root<T>
{
    type Error = DetachedError;

    fn try_from(gc: &Gc<T>) -> Result<Self, Self::Error>
    {
        gc.root().ok_or_else(DetachedError::new)
    }
}

/// Roots do not forward roots of their container.
impl<T: Trace> Trace for Root<T>
{
    const HAS_HANDLES: bool = false;

    fn connect(&self, _cx: &mut Propagation)
    {
    }

    fn disconnect(&self, _cx: &mut Propagation)
    {
    }
}

impl<T: Trace + fmt::Debug> fmt::Debug for Root<T>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self.get() {
            Some(value) => f.debug_tuple("Root").field(value).finish(),
            None        => f.write_str("Root(<cleared>)"),
        }
    }
}
