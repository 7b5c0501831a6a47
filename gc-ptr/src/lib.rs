//! Deterministic reference-counted pointers that reclaim cycles.
//!
//! Instead of counting references to an object,
//! every object counts the *root identities* that reach it.
//! Handles outside the object graph are roots;
//! handles stored inside objects forward the roots of their container.
//! When the last root reaching a cycle goes away,
//! every object in the cycle loses it at the same time
//! and the whole cycle is reclaimed, immediately and on the current thread.
//!
//! Payload types describe their handles by implementing [`Trace`],
//! usually through [`trace_fields!`] and [`trace_leaf!`].
//!
//! ```
//! use gc_ptr::{Gc, Root, trace_fields};
//!
//! struct Node
//! {
//!     name: &'static str,
//!     next: Gc<Node>,
//! }
//!
//! trace_fields!(Node { next });
//!
//! let a = Root::new(Node{name: "a", next: Gc::null()});
//! a.next.set_new(Node{name: "b", next: Gc::null()});
//!
//! // Close the cycle: b points back to a.
//! let b = a.next.root().unwrap();
//! b.next.set(&a);
//! assert_eq!(b.name, "b");
//!
//! // Dropping the last roots reclaims both objects.
//! drop(b);
//! drop(a);
//! ```
//!
//! Cycles are only reclaimed if every type in them forwards
//! to all of its handles.
//! A handle that is not forwarded to behaves like a root,
//! and keeps its cycle alive.

#![warn(missing_docs)]

pub use self::{
    control_block::Storage,
    error::*,
    ptr::*,
    root_id::*,
    spin_lock::*,
    trace::*,
};

mod control_block;
mod error;
mod ptr;
mod root_id;
mod spin_lock;
mod trace;
