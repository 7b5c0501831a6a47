//! Handles to managed objects.
//!
//! Every handle has a root identity of its own,
//! and keeps a list of the root identities it registered with its target.
//! An object lives as long as some identity is registered with it.
//!
//! When a handle registers an identity with an object for the first time,
//! the object forwards it to the handles in its payload, and so on.
//! When an identity disappears from an object,
//! the object forwards that too, so an unreachable cycle
//! loses its last identity everywhere at once and is reclaimed.

pub use self::{gc::*, root::*, rooted::*};

use {crate::Trace, self::handle::Handle};

mod gc;
mod handle;
mod root;
mod rooted;

/// Handles that can be the source of an assignment.
pub trait Pointer<T: Trace>
{
    #[doc(hidden)]
    fn handle(&self) -> &Handle<T>;
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{Storage, trace_fields, trace_leaf},
        std::{
            sync::{Arc, atomic::{AtomicUsize, Ordering::SeqCst}, mpsc},
            thread,
        },
    };

    /// Counts how many objects were dropped.
    #[derive(Clone, Default)]
    struct Tally(Arc<AtomicUsize>);

    impl Tally
    {
        fn get(&self) -> usize
        {
            self.0.load(SeqCst)
        }
    }

    struct Node
    {
        tally: Tally,
        next: Gc<Node>,
        other: Gc<Node>,
    }

    trace_fields!(Node { next, other });

    impl Node
    {
        fn new(tally: &Tally) -> Self
        {
            Self::with_next(tally, Gc::null())
        }

        fn with_next(tally: &Tally, next: Gc<Node>) -> Self
        {
            Self{tally: tally.clone(), next, other: Gc::null()}
        }
    }

    impl Drop for Node
    {
        fn drop(&mut self)
        {
            self.tally.0.fetch_add(1, SeqCst);
        }
    }

    struct Leaf
    {
        tally: Tally,
    }

    trace_leaf!(Leaf);

    impl Leaf
    {
        fn new(tally: &Tally) -> Self
        {
            Self{tally: tally.clone()}
        }
    }

    impl Drop for Leaf
    {
        fn drop(&mut self)
        {
            self.tally.0.fetch_add(1, SeqCst);
        }
    }

    /* ---------------------------------------------------------------------- */
    /*                               Single roots                             */
    /* ---------------------------------------------------------------------- */

    #[test]
    fn single_root_reclaims_once()
    {
        let tally = Tally::default();
        let root = Root::new(Leaf::new(&tally));
        let copy = root.clone();
        drop(root);
        assert_eq!(tally.get(), 0);
        drop(copy);
        assert_eq!(tally.get(), 1);
    }

    #[test]
    fn clearing_root_reclaims()
    {
        let tally = Tally::default();
        let mut root = Root::new(Leaf::new(&tally));
        root.clear();
        assert_eq!(tally.get(), 1);
        assert!(root.get().is_none());
        drop(root);
        assert_eq!(tally.get(), 1);
    }

    #[test]
    fn storage_follows_constructor()
    {
        let tally = Tally::default();
        let boxed = Root::from_box(Box::new(Leaf::new(&tally)));
        let inline = Gc::new(Leaf::new(&tally));
        assert_eq!(boxed.storage(), Some(Storage::Separate));
        assert_eq!(inline.storage(), Some(Storage::CoAllocated));
        assert_eq!(Gc::<Leaf>::null().storage(), None);
        drop(boxed);
        drop(inline);
        assert_eq!(tally.get(), 2);
    }

    #[test]
    fn unstored_gc_is_its_own_root()
    {
        let tally = Tally::default();
        let gc = Gc::new(Leaf::new(&tally));
        let copy = gc.clone();
        assert_ne!(gc.id(), copy.id());
        assert_eq!(gc.roots(), [gc.id()]);
        assert_eq!(copy.target_roots().len(), 2);
        drop(gc);
        assert_eq!(tally.get(), 0);
        drop(copy);
        assert_eq!(tally.get(), 1);
    }

    #[test]
    #[should_panic(expected = "cleared")]
    fn deref_of_cleared_root_panics()
    {
        let tally = Tally::default();
        let mut root = Root::new(Leaf::new(&tally));
        root.clear();
        root.tally.get();
    }

    #[test]
    fn rooting_null_gc_fails()
    {
        let tally = Tally::default();
        assert!(Root::<Leaf>::try_from(&Gc::null()).is_err());
        let gc = Gc::new(Leaf::new(&tally));
        let root = Root::<Leaf>::try_from(&gc).unwrap();
        assert!(root.ptr_eq(&gc));
        assert!(root.to_gc().ptr_eq(&gc));
        assert_eq!(root.roots(), [root.id()]);
    }

    /* ---------------------------------------------------------------------- */
    /*                                  Graphs                                */
    /* ---------------------------------------------------------------------- */

    #[test]
    fn two_cycle_reclaimed_in_either_order()
    {
        for drop_a_first in [true, false] {
            let tally = Tally::default();
            let a = Root::new(Node::new(&tally));
            a.next.set_new(Node::new(&tally));
            let b = a.next.root().unwrap();
            b.next.set(&a);
            assert!(b.next.ptr_eq(&a));

            if drop_a_first {
                drop(a);
                assert_eq!(tally.get(), 0);
                drop(b);
            } else {
                drop(b);
                assert_eq!(tally.get(), 0);
                drop(a);
            }
            assert_eq!(tally.get(), 2);
        }
    }

    #[test]
    fn self_cycle_reclaimed()
    {
        let tally = Tally::default();
        let a = Root::new(Node::new(&tally));
        a.next.set(&a);
        assert_eq!(a.target_roots(), [(a.id(), 2)]);
        drop(a);
        assert_eq!(tally.get(), 1);
    }

    #[test]
    fn shared_fan_in_survives_one_path()
    {
        let tally = Tally::default();
        let left = Root::new(Node::new(&tally));
        let right = Root::new(Node::new(&tally));
        left.next.set_new(Node::new(&tally));
        right.next.set(&left.next);

        drop(left);
        assert_eq!(tally.get(), 1);
        assert!(right.next.is_some());

        drop(right);
        assert_eq!(tally.get(), 3);
    }

    #[test]
    fn diamond_needs_both_edges_cleared()
    {
        let tally = Tally::default();
        let a = Root::new(Node::new(&tally));
        a.next.set_new(Node::new(&tally));
        a.other.set(&a.next);
        assert_eq!(a.next.target_roots(), [(a.id(), 2)]);

        a.next.clear();
        assert_eq!(tally.get(), 0);
        assert_eq!(a.other.target_roots(), [(a.id(), 1)]);

        a.other.clear();
        assert_eq!(tally.get(), 1);
    }

    #[test]
    fn dropping_root_of_diamond_reclaims_shared_child()
    {
        let tally = Tally::default();
        let a = Root::new(Node::new(&tally));
        a.next.set_new(Node::new(&tally));
        a.other.set(&a.next);
        assert_eq!(a.next.target_roots(), [(a.id(), 2)]);

        // The first edge erases the identity from the child,
        // the second must find it gone while the child is still allocated.
        drop(a);
        assert_eq!(tally.get(), 2);
    }

    #[test]
    fn cycle_entered_through_two_edges()
    {
        let tally = Tally::default();
        let a = Root::new(Node::new(&tally));
        a.next.set_new(Node::new(&tally));
        a.next.root().unwrap().next.set(&a);
        a.other.set(&a.next);
        assert_eq!(a.other.target_roots(), [(a.id(), 2)]);

        drop(a);
        assert_eq!(tally.get(), 2);
    }

    #[test]
    fn cleared_edge_into_cycle_keeps_cycle_alive()
    {
        let tally = Tally::default();
        let a = Root::new(Node::new(&tally));
        a.next.set_new(Node::new(&tally));
        let x = a.next.root().unwrap();
        x.next.set_new(Node::new(&tally));
        x.next.root().unwrap().next.set(&x);
        drop(x);

        // Clearing an edge removes one registration of a's identity.
        // The cycle still counts it through its own edge,
        // and nothing outside the cycle reaches it to remove that one.
        a.next.clear();
        assert_eq!(tally.get(), 0);
        drop(a);
        assert_eq!(tally.get(), 1);
    }

    #[test]
    fn self_assignment_keeps_object()
    {
        let tally = Tally::default();
        let a = Root::new(Node::new(&tally));
        a.next.set_new(Node::new(&tally));
        a.next.set(&a.next);
        assert_eq!(tally.get(), 0);
        assert_eq!(a.next.target_roots(), [(a.id(), 1)]);
    }

    #[test]
    fn stored_gc_forwards_container_roots()
    {
        let tally = Tally::default();
        let inner = Gc::new(Node::new(&tally));
        let inner_id = inner.id();
        let outer = Root::new(Node::with_next(&tally, inner));

        assert_eq!(outer.next.id(), inner_id);
        assert_eq!(outer.next.roots(), [outer.id()]);
        assert_eq!(outer.next.target_roots(), [(outer.id(), 1)]);

        drop(outer);
        assert_eq!(tally.get(), 2);
    }

    #[test]
    fn long_ring_reclaimed()
    {
        const LENGTH: usize = 64;

        let tally = Tally::default();
        let head = Root::new(Node::new(&tally));
        let mut cursor = head.clone();
        for _ in 1 .. LENGTH {
            cursor.next.set_new(Node::new(&tally));
            cursor = cursor.next.root().unwrap();
        }
        cursor.next.set(&head);

        drop(cursor);
        assert_eq!(tally.get(), 0);
        drop(head);
        assert_eq!(tally.get(), LENGTH);
    }

    #[test]
    fn collections_of_handles()
    {
        struct Bag
        {
            items: Vec<Gc<Node>>,
            extra: Option<Box<Gc<Node>>>,
        }

        trace_fields!(Bag { items, extra });

        let tally = Tally::default();
        let items = (0 .. 3).map(|_| Gc::new(Node::new(&tally))).collect();
        let extra = Some(Box::new(Gc::new(Node::new(&tally))));
        let bag = Root::new(Bag{items, extra});
        for item in &bag.items {
            assert_eq!(item.roots(), [bag.id()]);
        }
        drop(bag);
        assert_eq!(tally.get(), 4);
    }

    /* ---------------------------------------------------------------------- */
    /*                                   Moves                                */
    /* ---------------------------------------------------------------------- */

    #[test]
    fn take_and_assign_conserve_reachability()
    {
        let tally = Tally::default();
        let a = Root::new(Node::new(&tally));
        let b = Root::new(Node::new(&tally));
        a.next.set_new(Node::new(&tally));

        let moved = a.next.take();
        assert!(a.next.is_null());
        assert_eq!(tally.get(), 0);
        assert_eq!(moved.target_roots(), [(moved.id(), 1)]);

        b.next.assign(moved);
        assert_eq!(tally.get(), 0);
        assert_eq!(b.next.target_roots(), [(b.id(), 1)]);

        drop(b);
        assert_eq!(tally.get(), 2);
        drop(a);
        assert_eq!(tally.get(), 3);
    }

    #[test]
    fn assign_onto_same_object()
    {
        let tally = Tally::default();
        let a = Root::new(Node::new(&tally));
        a.next.set_new(Node::new(&tally));
        a.next.assign(a.next.clone());
        assert_eq!(tally.get(), 0);
        assert_eq!(a.next.target_roots(), [(a.id(), 1)]);
    }

    #[test]
    fn field_of_rooted_object_accepts_set()
    {
        let tally = Tally::default();
        let a = Root::new(Node::new(&tally));
        a.next.set_new(Node::new(&tally));
        let b = a.next.root().unwrap();
        let c = Root::new(Node::new(&tally));

        // b's object is still rooted by b itself, so its field is live.
        a.next.clear();
        b.next.set(&c);
        assert!(b.next.ptr_eq(&c));

        drop(a);
        drop(b);
        assert_eq!(tally.get(), 2);
        drop(c);
        assert_eq!(tally.get(), 3);
    }

    /* ---------------------------------------------------------------------- */
    /*                                  Rooted                                */
    /* ---------------------------------------------------------------------- */

    #[test]
    fn rooted_value_owns_its_cycles()
    {
        struct Holder
        {
            child: Gc<Node>,
        }

        trace_fields!(Holder { child });

        let tally = Tally::default();
        let holder = Rooted::new(Holder{child: Gc::new(Node::new(&tally))});
        assert_eq!(holder.child.roots(), [holder.id()]);

        holder.child.root().unwrap().next.set(&holder.child);
        assert_eq!(tally.get(), 0);

        drop(holder);
        assert_eq!(tally.get(), 1);
    }

    #[test]
    fn rooted_value_with_two_fields_on_one_object()
    {
        struct Pair
        {
            left: Gc<Node>,
            right: Gc<Node>,
        }

        trace_fields!(Pair { left, right });

        let tally = Tally::default();
        let left = Gc::new(Node::new(&tally));
        let right = left.clone();
        let pair = Rooted::new(Pair{left, right});
        assert_eq!(pair.left.target_roots(), [(pair.id(), 2)]);

        drop(pair);
        assert_eq!(tally.get(), 1);
    }

    /* ---------------------------------------------------------------------- */
    /*                                  Threads                                */
    /* ---------------------------------------------------------------------- */

    #[test]
    fn concurrent_drops_reclaim_once()
    {
        const THREADS: usize = 8;
        const RUNS: usize = 50;

        for _ in 0 .. RUNS {
            let tally = Tally::default();
            let root = Root::new(Leaf::new(&tally));
            let threads: Vec<_> =
                (0 .. THREADS)
                .map(|_| {
                    let copy = root.clone();
                    thread::spawn(move || {
                        for _ in 0 .. 100 {
                            drop(copy.clone());
                        }
                        drop(copy);
                    })
                })
                .collect();
            drop(root);
            for thread in threads {
                thread.join().unwrap();
            }
            assert_eq!(tally.get(), 1);
        }
    }

    #[test]
    fn concurrent_cycle_teardown()
    {
        const THREADS: usize = 8;
        const RUNS: usize = 20;

        for _ in 0 .. RUNS {
            let tally = Tally::default();
            let a = Root::new(Node::new(&tally));
            a.next.set_new(Node::new(&tally));
            a.next.root().unwrap().next.set(&a);

            let threads: Vec<_> =
                (0 .. THREADS)
                .map(|_| {
                    let copy = a.clone();
                    thread::spawn(move || {
                        for _ in 0 .. 50 {
                            let b = copy.next.root().unwrap();
                            assert!(b.next.ptr_eq(&copy));
                        }
                    })
                })
                .collect();
            drop(a);
            for thread in threads {
                thread.join().unwrap();
            }
            assert_eq!(tally.get(), 2);
        }
    }

    #[test]
    fn cycle_outlives_scope_while_thread_holds_copy()
    {
        let tally = Tally::default();
        let a = Root::new(Node::new(&tally));
        a.next.set_new(Node::new(&tally));
        a.next.root().unwrap().next.set(&a);

        let (sender, receiver) = mpsc::channel();
        let copy = a.clone();
        let observed = tally.clone();
        let thread = thread::spawn(move || {
            receiver.recv().unwrap();
            let b = copy.next.root().unwrap();
            assert!(b.next.ptr_eq(&copy));
            assert_eq!(observed.get(), 0);
        });

        drop(a);
        assert_eq!(tally.get(), 0);
        sender.send(()).unwrap();
        thread.join().unwrap();
        assert_eq!(tally.get(), 2);
    }
}
