use {
    crate::{
        Propagation,
        RootId,
        Storage,
        Trace,
        control_block::{ControlBlock, GcBox, PinnedBlock},
    },
    smallvec::{SmallVec, smallvec},
    std::{
        any::type_name,
        fmt,
        mem::{self, ManuallyDrop},
        ptr::{NonNull, addr_of_mut},
        sync::{Mutex, MutexGuard, PoisonError},
    },
};

/// Inline capacity for the root identities of one handle.
///
/// A handle is usually registered under its own identity,
/// or under the identities of the one or two roots reaching its container.
pub const INLINE_ROOTS: usize = 2;

/* -------------------------------------------------------------------------- */
/*                                   Target                                   */
/* -------------------------------------------------------------------------- */

/// Payload and control block of a managed object.
pub (super) struct Target<T>
{
    value: NonNull<T>,
    block: NonNull<ControlBlock>,
}

impl<T> Clone for Target<T>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<T> Copy for Target<T>
{
}

impl<T: Trace> Target<T>
{
    /// Allocate an object and its control block in one block of memory.
    fn co_allocated(value: T) -> Self
    {
        let gc_box = Box::new(GcBox{
            block: ControlBlock::new(Storage::CoAllocated),
            value: ManuallyDrop::new(value),
        });
        let ptr = Box::into_raw(gc_box);
        // SAFETY: ptr is a valid, non-null pointer to the new box.
        // ManuallyDrop<T> has the same layout as T.
        unsafe {
            Self{
                value: NonNull::new_unchecked(addr_of_mut!((*ptr).value).cast()),
                block: NonNull::new_unchecked(addr_of_mut!((*ptr).block)),
            }
        }
    }

    /// Allocate a control block for an already boxed object.
    fn separate(value: Box<T>) -> Self
    {
        let block = Box::new(ControlBlock::new(Storage::Separate));
        Self{
            value: NonNull::from(Box::leak(value)),
            block: NonNull::from(Box::leak(block)),
        }
    }

    /// # Safety
    ///
    /// The object must not have been reclaimed.
    unsafe fn block<'a>(self) -> &'a ControlBlock
    {
        &*self.block.as_ptr()
    }

    /// # Safety
    ///
    /// The object must not be reclaimed while the reference is in use.
    unsafe fn value<'a>(self) -> &'a T
    {
        &*self.value.as_ptr()
    }

    /// Forward a wave into the payload.
    ///
    /// Called after a retain that registered the wave's root for the first
    /// time, or after a release that removed it completely.
    /// Both of those pinned the object.
    /// The pin is handed to the wave and released when the wave ends.
    ///
    /// # Safety
    ///
    /// The caller must own one pin on the object.
    unsafe fn visit(self, cx: &mut Propagation)
    {
        cx.hold(PinnedBlock::new(
            self.value.cast(),
            self.block,
            Self::reclaim_erased,
        ));

        if T::HAS_HANDLES && cx.enter(self.block) {
            log::trace!(
                "{} {:?} through {} at {:p}",
                if cx.is_connect() { "connect" } else { "disconnect" },
                cx.root(),
                type_name::<T>(),
                self.value,
            );
            let value = self.value();
            if cx.is_connect() {
                value.connect(cx);
            } else {
                value.disconnect(cx);
            }
            cx.leave(self.block);
        }
    }

    /// Give up one pin, reclaiming the object if it was the last one
    /// and no roots are left.
    ///
    /// # Safety
    ///
    /// The caller must own one pin on the object.
    unsafe fn unpin(self)
    {
        if self.block().unpin() {
            self.reclaim();
        }
    }

    unsafe fn reclaim_erased(value: NonNull<()>, block: NonNull<ControlBlock>)
    {
        Self{value: value.cast(), block}.reclaim();
    }

    /// Drop the payload and free the memory of the object.
    ///
    /// # Safety
    ///
    /// Must only be called by the last visitor of an object
    /// with an empty root set, as reported by [`ControlBlock::unpin`].
    unsafe fn reclaim(self)
    {
        let storage = self.block().storage();
        log::debug!(
            "reclaiming {} at {:p} ({:?})",
            type_name::<T>(),
            self.value,
            storage,
        );
        match storage {
            Storage::CoAllocated => {
                let ptr = self.block.as_ptr().cast::<GcBox<T>>();
                ManuallyDrop::drop(&mut (*ptr).value);
                drop(Box::from_raw(ptr));
            },
            Storage::Separate => {
                drop(Box::from_raw(self.value.as_ptr()));
                drop(Box::from_raw(self.block.as_ptr()));
            },
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                    Visit                                   */
/* -------------------------------------------------------------------------- */

/// Wave that still has to walk an object.
///
/// Handles collect these while their lock is held,
/// and run them after releasing it.
struct Visit<T>
{
    target: Target<T>,
    cx: Propagation,
}

type Visits<T> = SmallVec<[Visit<T>; 4]>;

impl<T: Trace> Visit<T>
{
    fn connect(target: Target<T>, root: RootId) -> Self
    {
        Self{target, cx: Propagation::connect(root)}
    }

    fn disconnect(target: Target<T>, root: RootId, direct: bool) -> Self
    {
        Self{target, cx: Propagation::disconnect(root, direct)}
    }

    /// # Safety
    ///
    /// The visit must have been created for a pinning retain or release.
    unsafe fn run_all(visits: Visits<T>)
    {
        for mut visit in visits {
            visit.target.visit(&mut visit.cx);
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Handle                                   */
/* -------------------------------------------------------------------------- */

/// Reference-counted pointer engine shared by [`Gc`] and [`Root`].
///
/// [`Gc`]: `super::Gc`
/// [`Root`]: `super::Root`
pub struct Handle<T: Trace>
{
    /// Identity of this handle as a root.
    id: RootId,

    state: Mutex<State<T>>,
}

struct State<T>
{
    /// Root identities this handle registered with its target.
    ///
    /// INVARIANT: Each identity is registered exactly once
    ///            while the handle is attached.
    /// INVARIANT: The handle is detached if this is empty.
    roots: SmallVec<[RootId; INLINE_ROOTS]>,

    target: Option<Target<T>>,

    /// Whether the handle gave up its own identity as a root.
    ///
    /// Handles start out as roots of their own.
    /// The first time a container connects them to one of its roots,
    /// they drop their own identity and only forward the container's.
    demoted: bool,
}

// SAFETY: The state is guarded by a mutex and control blocks by spin locks.
// The payload may be dropped and accessed on any thread holding a handle.
unsafe impl<T: Trace + Send + Sync> Send for Handle<T> { }
unsafe impl<T: Trace + Send + Sync> Sync for Handle<T> { }

impl<T: Trace> Handle<T>
{
    fn with_target(id: RootId, target: Option<Target<T>>) -> Self
    {
        let state = State{roots: smallvec![id], target, demoted: false};
        Self{id, state: Mutex::new(state)}
    }

    fn lock(&self) -> MutexGuard<State<T>>
    {
        self.state.lock().unwrap()
    }

    /// Create a detached handle that is a root of its own.
    pub (super) fn null() -> Self
    {
        Self::with_target(RootId::fresh(), None)
    }

    /// Create a handle to a new object with a co-allocated control block.
    pub (super) fn new(value: T) -> Self
    {
        // SAFETY: The target was just allocated.
        unsafe { Self::adopt(Target::co_allocated(value)) }
    }

    /// Create a handle to a boxed object.
    pub (super) fn from_box(value: Box<T>) -> Self
    {
        // SAFETY: The target was just allocated.
        unsafe { Self::adopt(Target::separate(value)) }
    }

    /// # Safety
    ///
    /// No other handle may know about the target.
    unsafe fn adopt(target: Target<T>) -> Self
    {
        let id = RootId::fresh();
        let first = target.block().retain(id);
        debug_assert!(first, "New object already had roots");
        let this = Self::with_target(id, Some(target));
        if first {
            target.visit(&mut Propagation::connect(id));
        }
        this
    }

    pub (super) fn id(&self) -> RootId
    {
        self.id
    }

    pub (super) fn is_attached(&self) -> bool
    {
        self.lock().target.is_some()
    }

    pub (super) fn roots(&self) -> Vec<RootId>
    {
        self.lock().roots.to_vec()
    }

    pub (super) fn target_roots(&self) -> Vec<(RootId, u32)>
    {
        let state = self.lock();
        // SAFETY: Attached handles keep their object live.
        state.target.map_or_else(Vec::new, |t| unsafe { t.block().snapshot() })
    }

    pub (super) fn storage(&self) -> Option<Storage>
    {
        let state = self.lock();
        // SAFETY: Attached handles keep their object live.
        state.target.map(|t| unsafe { t.block().storage() })
    }

    pub (super) fn ptr_eq(&self, other: &Self) -> bool
    {
        let this = self.lock().target.map(|t| t.block);
        let other = other.lock().target.map(|t| t.block);
        this == other
    }

    /// Borrow the payload.
    ///
    /// # Safety
    ///
    /// The handle must keep its own identity registered
    /// for as long as the reference is in use.
    pub (super) unsafe fn value<'a>(&'a self) -> Option<&'a T>
    {
        self.lock().target.map(|t| t.value())
    }

    /// Create another handle to the same object, rooted in itself.
    pub (super) fn duplicate(&self) -> Self
    {
        let id = RootId::fresh();
        let state = self.lock();
        let target = state.target;
        // SAFETY: Attached handles keep their object live.
        let first = target.map_or(false, |t| unsafe { t.block().retain(id) });
        drop(state);

        let this = Self::with_target(id, target);
        if let (Some(target), true) = (target, first) {
            // SAFETY: The retain above pinned the object.
            unsafe { target.visit(&mut Propagation::connect(id)); }
        }
        this
    }

    /// Pin the target so that it survives until the caller unpins it.
    fn pin(&self) -> Option<Target<T>>
    {
        let state = self.lock();
        if let Some(target) = state.target {
            // SAFETY: Attached handles keep their object live.
            unsafe { target.block().pin(); }
        }
        state.target
    }

    /// Point at whatever `source` points at.
    pub (super) fn set(&self, source: &Self)
    {
        let target = source.pin();
        // SAFETY: The target is pinned until the unpin below.
        unsafe {
            self.rebind(target);
            if let Some(target) = target {
                target.unpin();
            }
        }
    }

    /// Detach from the target.
    pub (super) fn clear(&self)
    {
        // SAFETY: There is no new target.
        unsafe { self.rebind(None); }
    }

    /// Move every root of this handle from the old target to `new`.
    ///
    /// The roots are registered with the new target before they are
    /// released from the old one, so rebinding to the current target
    /// never frees it, even for a moment.
    /// A handle without roots stays detached.
    ///
    /// # Safety
    ///
    /// The new target, if any, must be pinned by the caller.
    unsafe fn rebind(&self, new: Option<Target<T>>)
    {
        let mut visits = Visits::new();
        let mut state = self.lock();
        let new = new.filter(|_| !state.roots.is_empty());
        let old = mem::replace(&mut state.target, new);

        if let Some(target) = new {
            for &root in &state.roots {
                if target.block().retain(root) {
                    visits.push(Visit::connect(target, root));
                }
            }
        }

        if let Some(target) = old {
            for &root in &state.roots {
                let direct = root == self.id;
                if target.block().release(root, direct) {
                    visits.push(Visit::disconnect(target, root, direct));
                }
            }
        }

        drop(state);
        Visit::run_all(visits);
    }

    /// Take over the target and the registrations of `source`.
    ///
    /// Identities held by both handles stay registered as they are.
    /// Identities only this handle holds are registered with the new target,
    /// and identities only `source` holds are released from it.
    pub (super) fn assign(&self, mut source: Self)
    {
        let source_id = source.id;
        let source_state = source.state.get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let source_target = source_state.target.take();
        let source_roots = mem::take(&mut source_state.roots);
        drop(source);

        let mut visits = Visits::new();
        let mut state = self.lock();
        let new = source_target.filter(|_| !state.roots.is_empty());
        let old = mem::replace(&mut state.target, new);

        // SAFETY: The source registrations keep the new target live
        //         until they are released at the end.
        //         Our registrations keep the old target live.
        unsafe {
            if let Some(target) = new {
                for &root in &state.roots {
                    if source_roots.contains(&root) {
                        continue;
                    }
                    if target.block().retain(root) {
                        visits.push(Visit::connect(target, root));
                    }
                }
            }

            if let Some(target) = old {
                for &root in &state.roots {
                    let direct = root == self.id;
                    if target.block().release(root, direct) {
                        visits.push(Visit::disconnect(target, root, direct));
                    }
                }
            }

            if let Some(target) = source_target {
                for &root in &source_roots {
                    if new.is_some() && state.roots.contains(&root) {
                        continue;
                    }
                    let direct = root == source_id;
                    if target.block().release(root, direct) {
                        visits.push(Visit::disconnect(target, root, direct));
                    }
                }
            }

            drop(state);
            Visit::run_all(visits);
        }
    }

    /// Move the target out into a new handle rooted in itself,
    /// leaving this handle detached.
    pub (super) fn take(&self) -> Self
    {
        let id = RootId::fresh();
        let mut visits = Visits::new();
        let mut state = self.lock();
        let target = state.target.take();

        if let Some(target) = target {
            // SAFETY: Our registrations keep the target live.
            unsafe {
                if target.block().retain(id) {
                    visits.push(Visit::connect(target, id));
                }
                for &root in &state.roots {
                    let direct = root == self.id;
                    if target.block().release(root, direct) {
                        visits.push(Visit::disconnect(target, root, direct));
                    }
                }
            }
        }

        drop(state);
        let taken = Self::with_target(id, target);
        // SAFETY: Every visit comes from a pinning retain or release.
        unsafe { Visit::run_all(visits); }
        taken
    }

    /// Register a root that reached the container of this handle.
    pub (super) fn connect_to_root(&self, cx: &mut Propagation)
    {
        let root = cx.root();
        let mut state = self.lock();
        if state.roots.contains(&root) {
            return;
        }
        state.roots.push(root);
        let target = state.target;
        // SAFETY: Attached handles keep their object live.
        let first = target.map_or(false, |t| unsafe { t.block().retain(root) });
        drop(state);

        if let (Some(target), true) = (target, first) {
            // SAFETY: The retain above pinned the object.
            unsafe { target.visit(cx); }
        }

        self.demote();
    }

    /// Release a root that no longer reaches the container of this handle.
    pub (super) fn disconnect_from_root(&self, cx: &mut Propagation)
    {
        let root = cx.root();
        let mut state = self.lock();
        let Some(index) = state.roots.iter().position(|&r| r == root)
            else { return };
        state.roots.remove(index);
        let target = state.target;
        // SAFETY: Attached handles keep their object live.
        let cleared = target.map_or(false, |t| unsafe {
            t.block().release(root, cx.is_direct())
        });
        if state.roots.is_empty() {
            state.target = None;
        }
        drop(state);

        if let (Some(target), true) = (target, cleared) {
            // SAFETY: The release above pinned the object.
            unsafe { target.visit(cx); }
        }
    }

    /// Stop being a root of its own.
    ///
    /// Called after the first root of a container was registered,
    /// so the target never runs out of roots in between.
    fn demote(&self)
    {
        let mut state = self.lock();
        if state.demoted {
            return;
        }
        state.demoted = true;
        let Some(index) = state.roots.iter().position(|&r| r == self.id)
            else { return };
        state.roots.remove(index);
        let target = state.target;
        // SAFETY: Attached handles keep their object live.
        let cleared = target.map_or(false, |t| unsafe {
            t.block().release(self.id, true)
        });
        if state.roots.is_empty() {
            state.target = None;
        }
        drop(state);

        log::trace!("{:?} demoted to a forwarding edge", self.id);
        if let (Some(target), true) = (target, cleared) {
            let mut cx = Propagation::disconnect(self.id, true);
            // SAFETY: The release above pinned the object.
            unsafe { target.visit(&mut cx); }
        }
    }
}

impl<T: Trace> Drop for Handle<T>
{
    fn drop(&mut self)
    {
        let state = self.state.get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(target) = state.target.take() else { return };

        let mut visits = Visits::new();
        for root in mem::take(&mut state.roots) {
            let direct = root == self.id;
            // SAFETY: Our registrations keep the target live.
            if unsafe { target.block().release(root, direct) } {
                visits.push(Visit::disconnect(target, root, direct));
            }
        }

        // SAFETY: Every visit comes from a pinning release.
        unsafe { Visit::run_all(visits); }
    }
}

impl<T: Trace> fmt::Debug for Handle<T>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        let state = self.lock();
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("roots", &state.roots)
            .field("target", &state.target.map(|t| t.value))
            .finish()
    }
}
