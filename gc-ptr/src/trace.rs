//! Forwarding root changes through payloads.
//!
//! Whenever an object gains or loses a root identity,
//! every handle stored inside the object must learn about it,
//! so that the objects those handles point to gain or lose it too.
//! The [`Trace`] trait is how a payload type enumerates its handles.
//! It plays the part a trace function plays in a tracing collector,
//! except that it is called incrementally, one root identity at a time.

use {
    crate::{RootId, control_block::{ControlBlock, PinnedBlock}},
    smallvec::SmallVec,
    std::{
        marker::PhantomData,
        ptr::NonNull,
        sync::atomic::{
            AtomicBool,
            AtomicI32,
            AtomicI64,
            AtomicU32,
            AtomicU64,
            AtomicUsize,
        },
    },
};

/* -------------------------------------------------------------------------- */
/*                                    Trace                                   */
/* -------------------------------------------------------------------------- */

/// Types that can be the payload of a handle.
///
/// Implementations must forward [`connect`][`Self::connect`] and
/// [`disconnect`][`Self::disconnect`] to every handle they contain,
/// directly or through other [`Trace`] fields.
/// If a struct embeds another struct that contains handles,
/// forward to the embedded struct first.
/// Use [`trace_fields!`] to generate such an implementation.
///
/// Types that never contain handles are leaves.
/// They set [`HAS_HANDLES`][`Self::HAS_HANDLES`] to false
/// and implement both methods as no-ops; use [`trace_leaf!`] for that.
///
/// Forgetting to forward to a handle is not undefined behavior,
/// but the handle then never learns about its container's roots.
/// Its target then behaves as if the handle were a root of its own,
/// and is leaked if it is part of a cycle.
///
/// [`trace_fields!`]: `crate::trace_fields`
/// [`trace_leaf!`]: `crate::trace_leaf`
pub trait Trace
{
    /// Whether values of this type can contain handles.
    ///
    /// When false, propagation stops at objects of this type
    /// without calling into them.
    const HAS_HANDLES: bool = true;

    /// Forward a newly added root to every contained handle.
    fn connect(&self, cx: &mut Propagation);

    /// Forward a removed root to every contained handle.
    fn disconnect(&self, cx: &mut Propagation);
}

/* -------------------------------------------------------------------------- */
/*                                 Propagation                                */
/* -------------------------------------------------------------------------- */

/// Inline capacity of the visiting stack.
const INLINE_VISITING: usize = 8;

/// State of one propagation wave.
///
/// A wave forwards the addition or removal of a single root identity
/// through the object graph. The context is threaded through every
/// [`Trace`] call of the wave, and is never shared between waves.
///
/// Objects the wave walked stay pinned until the context is dropped,
/// so no object is reclaimed while a later handle of the same wave
/// may still point at it.
pub struct Propagation
{
    root: RootId,
    direction: Direction,

    /// Control blocks whose payloads this wave is currently walking.
    ///
    /// A wave never walks a payload that is already on this stack,
    /// so a cycle is handled entirely by the frame that entered it first.
    visiting: SmallVec<[NonNull<ControlBlock>; INLINE_VISITING]>,

    /// Pins taken by this wave, released when it ends.
    pinned: SmallVec<[PinnedBlock; INLINE_VISITING]>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Direction
{
    Connect,
    Disconnect{direct: bool},
}

impl Propagation
{
    pub (crate) fn connect(root: RootId) -> Self
    {
        Self::with_direction(root, Direction::Connect)
    }

    pub (crate) fn disconnect(root: RootId, direct: bool) -> Self
    {
        Self::with_direction(root, Direction::Disconnect{direct})
    }

    fn with_direction(root: RootId, direction: Direction) -> Self
    {
        let visiting = SmallVec::new();
        let pinned = SmallVec::new();
        Self{root, direction, visiting, pinned}
    }

    /// The root identity this wave adds or removes.
    pub fn root(&self) -> RootId
    {
        self.root
    }

    /// Whether this wave adds a root.
    pub fn is_connect(&self) -> bool
    {
        self.direction == Direction::Connect
    }

    /// Whether this wave removes a root wholesale.
    ///
    /// A direct removal happens when the root itself goes away.
    /// Every registration of the root is then dead,
    /// so objects erase the identity instead of decrementing its count.
    pub fn is_direct(&self) -> bool
    {
        matches!(self.direction, Direction::Disconnect{direct: true})
    }

    /// Mark a payload as being walked.
    ///
    /// Returns false if this wave is already walking it,
    /// in which case the caller must not walk it again.
    pub (crate) fn enter(&mut self, block: NonNull<ControlBlock>) -> bool
    {
        if self.visiting.contains(&block) {
            log::trace!("{:?} already visiting {:p}", self.root, block);
            return false;
        }
        self.visiting.push(block);
        true
    }

    /// Undo [`enter`][`Self::enter`].
    pub (crate) fn leave(&mut self, block: NonNull<ControlBlock>)
    {
        let top = self.visiting.pop();
        debug_assert_eq!(top, Some(block), "Unbalanced payload visit");
    }

    /// Keep an object pinned until the wave ends.
    pub (crate) fn hold(&mut self, pinned: PinnedBlock)
    {
        self.pinned.push(pinned);
    }
}

impl Drop for Propagation
{
    fn drop(&mut self)
    {
        for pinned in self.pinned.drain(..) {
            pinned.release();
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Macros                                   */
/* -------------------------------------------------------------------------- */

/// Implement [`Trace`] for a struct by forwarding to the listed fields.
///
/// List every field that is or contains a handle.
/// Fields that are plain data can be omitted.
/// With no fields listed, the type is a leaf.
/// An embedded struct that contains handles should be listed first.
///
/// ```
/// use gc_ptr::{Gc, trace_fields};
///
/// struct Leaf;
/// gc_ptr::trace_leaf!(Leaf);
///
/// struct Pair
/// {
///     left: Gc<Leaf>,
///     right: Gc<Leaf>,
///     label: String,
/// }
///
/// trace_fields!(Pair { left, right });
/// ```
///
/// [`Trace`]: `crate::Trace`
#[macro_export]
macro_rules! trace_fields
{
    ($type:ty { $(,)? }) => {
        $crate::trace_leaf!($type);
    };
    ($type:ty { $($field:tt),+ $(,)? }) => {
        impl $crate::Trace for $type
        {
            fn connect(&self, cx: &mut $crate::Propagation)
            {
                $( $crate::Trace::connect(&self.$field, cx); )+
            }

            fn disconnect(&self, cx: &mut $crate::Propagation)
            {
                $( $crate::Trace::disconnect(&self.$field, cx); )+
            }
        }
    };
}

/// Implement [`Trace`] for types that never contain handles.
///
/// [`Trace`]: `crate::Trace`
#[macro_export]
macro_rules! trace_leaf
{
    ($($type:ty),* $(,)?) => {
        $(
            impl $crate::Trace for $type
            {
                const HAS_HANDLES: bool = false;

                fn connect(&self, _cx: &mut $crate::Propagation)
                {
                }

                fn disconnect(&self, _cx: &mut $crate::Propagation)
                {
                }
            }
        )*
    };
}

/* -------------------------------------------------------------------------- */
/*                              Standard library                              */
/* -------------------------------------------------------------------------- */

crate::trace_leaf!(
    (), bool, char, str, String,
    u8, u16, u32, u64, u128, usize,
    i8, i16, i32, i64, i128, isize,
    f32, f64,
    AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize,
);

impl<T: ?Sized> Trace for PhantomData<T>
{
    const HAS_HANDLES: bool = false;

    fn connect(&self, _cx: &mut Propagation)
    {
    }

    fn disconnect(&self, _cx: &mut Propagation)
    {
    }
}

impl<T: Trace + ?Sized> Trace for Box<T>
{
    const HAS_HANDLES: bool = T::HAS_HANDLES;

    fn connect(&self, cx: &mut Propagation)
    {
        (**self).connect(cx);
    }

    fn disconnect(&self, cx: &mut Propagation)
    {
        (**self).disconnect(cx);
    }
}

impl<T: Trace> Trace for Option<T>
{
    const HAS_HANDLES: bool = T::HAS_HANDLES;

    fn connect(&self, cx: &mut Propagation)
    {
        if let Some(value) = self {
            value.connect(cx);
        }
    }

    fn disconnect(&self, cx: &mut Propagation)
    {
        if let Some(value) = self {
            value.disconnect(cx);
        }
    }
}

impl<T: Trace> Trace for [T]
{
    const HAS_HANDLES: bool = T::HAS_HANDLES;

    fn connect(&self, cx: &mut Propagation)
    {
        for element in self {
            element.connect(cx);
        }
    }

    fn disconnect(&self, cx: &mut Propagation)
    {
        for element in self {
            element.disconnect(cx);
        }
    }
}

impl<T: Trace, const N: usize> Trace for [T; N]
{
    const HAS_HANDLES: bool = T::HAS_HANDLES;

    fn connect(&self, cx: &mut Propagation)
    {
        self.as_slice().connect(cx);
    }

    fn disconnect(&self, cx: &mut Propagation)
    {
        self.as_slice().disconnect(cx);
    }
}

impl<T: Trace> Trace for Vec<T>
{
    const HAS_HANDLES: bool = T::HAS_HANDLES;

    fn connect(&self, cx: &mut Propagation)
    {
        self.as_slice().connect(cx);
    }

    fn disconnect(&self, cx: &mut Propagation)
    {
        self.as_slice().disconnect(cx);
    }
}

impl<A: Trace, B: Trace> Trace for (A, B)
{
    const HAS_HANDLES: bool = A::HAS_HANDLES || B::HAS_HANDLES;

    fn connect(&self, cx: &mut Propagation)
    {
        self.0.connect(cx);
        self.1.connect(cx);
    }

    fn disconnect(&self, cx: &mut Propagation)
    {
        self.0.disconnect(cx);
        self.1.disconnect(cx);
    }
}

impl<A: Trace, B: Trace, C: Trace> Trace for (A, B, C)
{
    const HAS_HANDLES: bool =
        A::HAS_HANDLES || B::HAS_HANDLES || C::HAS_HANDLES;

    fn connect(&self, cx: &mut Propagation)
    {
        self.0.connect(cx);
        self.1.connect(cx);
        self.2.connect(cx);
    }

    fn disconnect(&self, cx: &mut Propagation)
    {
        self.0.disconnect(cx);
        self.1.disconnect(cx);
        self.2.disconnect(cx);
    }
}
