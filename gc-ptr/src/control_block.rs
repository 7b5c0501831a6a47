use {
    crate::{RootId, SpinLock},
    non_zero_ext::NonZeroExt,
    std::{
        collections::{HashMap, hash_map::Entry::{Occupied, Vacant}},
        mem::ManuallyDrop,
        num::NonZeroU32,
        ptr::NonNull,
    },
};

/// How a managed object and its control block were allocated.
///
/// Consulted only when the object is reclaimed,
/// to free memory in the same shape it was allocated in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Storage
{
    /// Object and control block share one allocation.
    ///
    /// Produced by [`Gc::new`] and [`Root::new`].
    ///
    /// [`Gc::new`]: `crate::Gc::new`
    /// [`Root::new`]: `crate::Root::new`
    CoAllocated,

    /// Object and control block were allocated independently.
    ///
    /// Produced by [`Gc::from_box`] and [`Root::from_box`].
    ///
    /// [`Gc::from_box`]: `crate::Gc::from_box`
    /// [`Root::from_box`]: `crate::Root::from_box`
    Separate,
}

/// Per-object bookkeeping shared by every handle to the object.
pub struct ControlBlock
{
    storage: Storage,
    roots: SpinLock<RootSet>,
}

/// Allocation used by [`Storage::CoAllocated`].
///
/// The control block must be the first field,
/// so that a pointer to it is also a pointer to the whole box.
#[repr(C)]
pub struct GcBox<T>
{
    pub block: ControlBlock,
    pub value: ManuallyDrop<T>,
}

/// Counted root identities of one object.
#[derive(Debug, Default)]
pub struct RootSet
{
    /// How many edges currently register each identity.
    ///
    /// An identity maps to the number of registrations,
    /// and is absent when that number is zero.
    counts: HashMap<RootId, NonZeroU32>,

    /// Number of propagation frames walking the object right now.
    ///
    /// The object is not reclaimed while this is non-zero,
    /// even if `counts` is empty.
    visitors: u32,
}

impl RootSet
{
    /// Register one more edge for `root`.
    ///
    /// Returns whether this is the first registration of `root`.
    pub fn retain(&mut self, root: RootId) -> bool
    {
        const ERR: &str = "Too many registrations of one root";
        match self.counts.entry(root) {
            Occupied(mut entry) => {
                let n = entry.get().increment().expect(ERR);
                entry.insert(n);
                false
            },
            Vacant(entry) => {
                entry.insert(NonZeroU32::ONE);
                true
            },
        }
    }

    /// Unregister `root`.
    ///
    /// A direct release erases the identity regardless of its count;
    /// otherwise one registration is removed.
    /// Returns whether the identity is now completely gone.
    /// Releasing an identity that is not registered does nothing.
    pub fn release(&mut self, root: RootId, direct: bool) -> bool
    {
        match self.counts.entry(root) {
            Occupied(entry) if direct => {
                entry.remove_entry();
                true
            },
            Occupied(mut entry) =>
                match entry.get().decrement() {
                    Some(n) => { entry.insert(n); false },
                    None    => { entry.remove_entry(); true },
                },
            Vacant(..) =>
                false,
        }
    }

    fn pin(&mut self)
    {
        self.visitors = self.visitors.checked_add(1)
            .expect("Too many concurrent visits of one object");
    }

    /// Returns whether the object must now be reclaimed.
    fn unpin(&mut self) -> bool
    {
        self.visitors = self.visitors.checked_sub(1)
            .expect("Unbalanced visit of object");
        self.visitors == 0 && self.counts.is_empty()
    }

    /// Number of registrations of `root`.
    pub fn count(&self, root: RootId) -> u32
    {
        self.counts.get(&root).map_or(0, |n| n.get())
    }

    /// Whether no identity is registered.
    pub fn is_empty(&self) -> bool
    {
        self.counts.is_empty()
    }
}

impl ControlBlock
{
    /// Create a control block with an empty root set.
    pub fn new(storage: Storage) -> Self
    {
        Self{storage, roots: SpinLock::new(RootSet::default())}
    }

    /// How the object was allocated.
    pub fn storage(&self) -> Storage
    {
        self.storage
    }

    /// Register one edge for `root`.
    ///
    /// If this is the first registration of `root`, returns true
    /// and pins the object; the caller must forward the new root
    /// into the payload and then call [`unpin`][`Self::unpin`].
    pub fn retain(&self, root: RootId) -> bool
    {
        self.roots.with(|roots| {
            let first = roots.retain(root);
            if first {
                roots.pin();
            }
            first
        })
    }

    /// Unregister `root`, see [`RootSet::release`].
    ///
    /// If the identity is now gone, returns true
    /// and pins the object; the caller must forward the removal
    /// into the payload and then call [`unpin`][`Self::unpin`].
    pub fn release(&self, root: RootId, direct: bool) -> bool
    {
        self.roots.with(|roots| {
            let cleared = roots.release(root, direct);
            if cleared {
                roots.pin();
            }
            cleared
        })
    }

    /// Keep the object from being reclaimed until [`unpin`][`Self::unpin`].
    ///
    /// Only call this while the root set is known to be non-empty.
    pub fn pin(&self)
    {
        self.roots.with(RootSet::pin);
    }

    /// Undo one [`pin`][`Self::pin`] or one pinning retain or release.
    ///
    /// Returns whether the caller must now reclaim the object.
    /// This is true for exactly one caller: the one that leaves
    /// an object whose root set is empty as its last visitor.
    pub fn unpin(&self) -> bool
    {
        self.roots.with(RootSet::unpin)
    }

    /// Snapshot of the registered identities and their counts.
    pub fn snapshot(&self) -> Vec<(RootId, u32)>
    {
        let mut roots = self.roots.with(|roots| {
            roots.counts.iter()
                .map(|(&root, n)| (root, n.get()))
                .collect::<Vec<_>>()
        });
        roots.sort_unstable();
        roots
    }
}

/// Pin on an object, owned by a propagation wave.
///
/// Waves do not unpin objects as soon as they are done walking them:
/// a sibling handle later in the same wave may still point at the object.
/// Instead the wave collects its pins and releases them when it ends.
pub struct PinnedBlock
{
    value: NonNull<()>,
    block: NonNull<ControlBlock>,
    reclaim: unsafe fn(NonNull<()>, NonNull<ControlBlock>),
}

impl PinnedBlock
{
    /// # Safety
    ///
    /// The caller must own one pin on the block and hand it over.
    /// `reclaim` must free the object in the way it was allocated.
    pub unsafe fn new(
        value: NonNull<()>,
        block: NonNull<ControlBlock>,
        reclaim: unsafe fn(NonNull<()>, NonNull<ControlBlock>),
    ) -> Self
    {
        Self{value, block, reclaim}
    }

    /// The pinned control block.
    pub fn block(&self) -> NonNull<ControlBlock>
    {
        self.block
    }

    /// Give up the pin, reclaiming the object if it was the last one
    /// and no roots are left.
    pub fn release(self)
    {
        // SAFETY: The pin we own keeps the block allocated until here,
        //         and unpin reports true to exactly one caller.
        unsafe {
            if self.block.as_ref().unpin() {
                (self.reclaim)(self.value, self.block);
            }
        }
    }
}
