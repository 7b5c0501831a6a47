use {
    super::{Pointer, Root, handle::Handle},
    crate::{Propagation, RootId, Storage, Trace},
    std::fmt,
};

/// Handle for storing inside managed objects.
///
/// A `Gc` that is not stored inside a managed object is a root of its own,
/// like a [`Root`].
/// Once the object containing it is reached from a root,
/// it gives up its own identity and only forwards the roots
/// of its container to its target.
/// That is what lets cycles of `Gc` fields be reclaimed.
///
/// All operations take `&self`, because fields are modified
/// through shared references to their containing object.
/// A `Gc` cannot be dereferenced, since the object it points to
/// could be reclaimed by another handle at any time;
/// call [`root`][`Self::root`] to get something that can be.
pub struct Gc<T: Trace>
{
    handle: Handle<T>,
}

impl<T: Trace> Gc<T>
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
    ///
    /// The control block is allocated separately.
    pub fn from_box(value: Box<T>) -> Self
    {
        Self::from_handle(Handle::from_box(value))
    }

    /// Create a handle that points to nothing.
    pub fn null() -> Self
    {
        Self::from_handle(Handle::null())
    }

    /// Identity of this handle as a root.
    pub fn id(&self) -> RootId
    {
        self.handle.id()
    }

    /// Whether the handle points to an object.
    pub fn is_some(&self) -> bool
    {
        self.handle.is_attached()
    }

    /// Whether the handle points to nothing.
    pub fn is_null(&self) -> bool
    {
        !self.is_some()
    }

    /// Create a root to the object, if any.
    pub fn root(&self) -> Option<Root<T>>
    {
        let handle = self.handle.duplicate();
        handle.is_attached().then(|| Root::from_handle(handle))
    }

    /// Point at whatever `source` points at.
    ///
    /// If this handle is stored in an object that was already disconnected
    /// from all of its roots, it stays null.
    pub fn set(&self, source: &impl Pointer<T>)
    {
        self.handle.set(source.handle());
    }

    /// Point at a newly allocated object.
    pub fn set_new(&self, value: T)
    {
        self.assign(Self::new(value));
    }

    /// Point at the object `source` points at, consuming `source`.
    ///
    /// Unlike [`set`][`Self::set`],
    /// this hands over the registrations of `source`
    /// instead of creating new ones.
    pub fn assign(&self, source: Gc<T>)
    {
        self.handle.assign(source.handle);
    }

    /// Move the target out into a new handle, leaving this one null.
    pub fn take(&self) -> Gc<T>
    {
        Self::from_handle(self.handle.take())
    }

    /// Point at nothing.
    ///
    /// If this was the last handle keeping the object alive,
    /// the object is reclaimed before this returns.
    pub fn clear(&self)
    {
        self.handle.clear();
    }

    /// Whether both handles point to the same object, or both to nothing.
    pub fn ptr_eq(&self, other: &impl Pointer<T>) -> bool
    {
        self.handle.ptr_eq(other.handle())
    }

    /// Root identities this handle registered with its target.
    pub fn roots(&self) -> Vec<RootId>
    {
        self.handle.roots()
    }

    /// Root identities registered with the target and their counts,
    /// sorted by identity.
    pub fn target_roots(&self) -> Vec<(RootId, u32)>
    {
        self.handle.target_roots()
    }

    /// How the target was allocated.
    pub fn storage(&self) -> Option<Storage>
    {
        self.handle.storage()
    }
}

impl<T: Trace> Pointer<T> for Gc<T>
{
    fn handle(&self) -> &Handle<T>
    {
        &self.handle
    }
}

impl<T: Trace> Clone for Gc<T>
{
    /// Create another handle to the same object.
    ///
    /// The clone is a root of its own until it is stored in an object.
    fn clone(&self) -> Self
    {
        Self::from_handle(self.handle.duplicate())
    }
}

impl<T: Trace> Default for Gc<T>
{
    fn default() -> Self
    {
        Self::null()
    }
}

impl<T: Trace> Trace for Gc<T>
{
    fn connect(&self, cx: &mut Propagation)
    {
        self.handle.connect_to_root(cx);
    }

    fn disconnect(&self, cx: &mut Propagation)
    {
        self.handle.disconnect_from_root(cx);
    }
}

impl<T: Trace> fmt::Debug for Gc<T>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_tuple("Gc").field(&self.handle).finish()
    }
}
