use core::borrow::Borrow;
use core::cmp::Ordering;
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::Bound;
use core::ops::RangeBounds;
use core::ptr::NonNull;

#[cfg(feature = "std")]
use alloc::boxed::Box;
#[cfg(feature = "std")]
use alloc::string::String;
#[cfg(feature = "std")]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use std::error::Error;
#[cfg(feature = "std")]
use std::io::Write;

use allocator_api2::alloc::Allocator;

use allocated::AllocResult;
use allocated::AllocatorExt;
use allocated::DropGuard;
use allocated::DropGuardResult;
use allocated::DropIn;
use allocated::FromIteratorIn;
use allocated::IntoIteratorIn;

use crate::compare::{Compare, Natural};
use crate::policy::{Multiplicity, Unique};
use crate::tracing_helpers::{debug_log, trace_log};

mod cursor;
mod iters;
mod node;
mod wrapper;

#[cfg(test)]
mod tests;

pub use cursor::{Cursor, CursorMut};
pub use iters::{IntoIter, Iter, Keys, Range, Values, ValuesMut};
use iters::RawRange;
use node::{Link, Node, Side, Slot};
pub use wrapper::{AvlMap, AvlMultiMap, AvlMultiSet, AvlSet, AvlTree};

/// An AVL tree using the allocated pattern.
///
/// This is the low-level "allocated" type that requires manual allocator
/// passing. For most use cases, prefer the [`AvlTree`] wrapper which owns its
/// allocator and provides a safe, ergonomic API.
///
/// # Type Parameters
///
/// - `K`: Key type, ordered by `C`
/// - `V`: Value type (`()` for sets)
/// - `P`: [`Unique`](crate::Unique) or [`Multi`](crate::Multi) key policy
/// - `C`: Comparator, defaults to the keys' [`Ord`] implementation
///
/// # Structure
///
/// Besides the real nodes the tree owns two payload-less sentinel nodes. The
/// low sentinel hangs off the minimum as its left child and the high sentinel
/// off the maximum as its right child; each sentinel's parent link points back
/// at that node. In an empty tree the two sentinels point at each other. This
/// makes "one before the first" and "one past the last" ordinary node
/// positions for [`Cursor`], so the whole sequence can be walked in both
/// directions without special cases.
///
/// # Examples
///
/// ```
/// use allocated_avl::AllocatedAvlTree;
/// use allocated::CountingAllocator;
///
/// let alloc = CountingAllocator::default();
/// let mut tree = AllocatedAvlTree::<u32, String>::new_in(&alloc)?;
///
/// unsafe {
///     tree.insert_in(&alloc, 1, "one".to_string())?;
///     tree.insert_in(&alloc, 2, "two".to_string())?;
/// }
///
/// assert_eq!(tree.len(), 2);
/// # Ok::<(), allocated::AllocErrorWithLayout>(())
/// ```
pub struct AllocatedAvlTree<K, V, P = Unique, C = Natural> {
    root: Link<K, V>,
    low: NonNull<Node<K, V>>,
    high: NonNull<Node<K, V>>,
    n: usize,
    cmp: C,
    phantom: PhantomData<(P, K, V)>,
}

// SAFETY: the tree owns its nodes exclusively; sending or sharing it is the
// same as sending or sharing the keys, values and comparator it holds.
unsafe impl<K: Send, V: Send, P, C: Send> Send for AllocatedAvlTree<K, V, P, C> {}
// SAFETY: as above; `&self` methods never mutate nodes.
unsafe impl<K: Sync, V: Sync, P, C: Sync> Sync for AllocatedAvlTree<K, V, P, C> {}

impl<K, V, P, C: Default> AllocatedAvlTree<K, V, P, C> {
    /// # Errors
    ///
    /// Will return `Err` if allocating the sentinels fails.
    pub fn new_in<A: Allocator>(alloc: &A) -> DropGuardResult<Self, &A> {
        Self::with_compare_in(alloc, C::default())
    }
}

impl<K, V, P, C> AllocatedAvlTree<K, V, P, C> {
    /// Creates an empty tree ordered by `cmp`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if allocating the sentinels fails.
    pub fn with_compare_in<A: Allocator>(alloc: &A, cmp: C) -> DropGuardResult<Self, &A> {
        let mut low = alloc.allocate_from(Node::sentinel())?.into_inner();
        let mut high = match alloc.allocate_from(Node::sentinel()) {
            Ok(high) => high.into_inner(),
            Err(e) => {
                // SAFETY: `low` was allocated by `alloc` just above and never shared
                unsafe { node::deallocate_in(alloc, low) };
                return Err(e.into());
            }
        };

        // SAFETY: both sentinels were just allocated and are exclusively ours
        unsafe {
            low.as_mut().parent = Some(high);
            high.as_mut().parent = Some(low);
        }

        let tree = AllocatedAvlTree {
            root: None,
            low,
            high,
            n: 0,
            cmp,
            phantom: PhantomData,
        };

        // Safety: `alloc` was used above to allocate the sentinels.
        unsafe { Ok(DropGuard::new(tree, alloc)) }
    }

    /// Returns `true` if the tree contains no elements.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Returns the number of elements in the tree.
    pub fn len(&self) -> usize {
        self.n
    }

    /// Height of the tree counted in edges (a single node has height 0), or
    /// `None` when empty.
    pub fn height(&self) -> Option<usize> {
        // SAFETY: the root is live; sentinels never count towards heights
        self.root.map(|r| unsafe { r.as_ref().height } as usize)
    }

    /// Returns a reference to the comparator ordering this tree.
    pub fn comparator(&self) -> &C {
        &self.cmp
    }

    /// A cursor at the first element, or at [`end`](Self::end) if the tree is
    /// empty.
    pub fn begin(&self) -> Cursor<'_, K, V, P, C> {
        Cursor::new(self, self.first_position())
    }

    /// A cursor one past the last element.
    pub fn end(&self) -> Cursor<'_, K, V, P, C> {
        Cursor::new(self, self.high)
    }

    /// Returns the first key-value pair in the tree.
    pub fn first_key_value(&self) -> Option<(&K, &V)> {
        self.begin().key_value()
    }

    /// Returns the last key-value pair in the tree.
    pub fn last_key_value(&self) -> Option<(&K, &V)> {
        let mut cursor = self.end();
        cursor.move_prev();
        cursor.key_value()
    }

    /// Returns an iterator over the key-value pairs of the tree, in order.
    ///
    /// The iterator is double ended; `iter().rev()` walks the tree from the
    /// last element to the first.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.raw_range(),
            len: self.n,
            phantom: PhantomData,
        }
    }

    /// Returns an iterator over the keys of the tree, in order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Returns an iterator over the values of the tree, in key order.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Returns a mutable iterator over the values of the tree, in key order.
    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.raw_range(),
            len: self.n,
            phantom: PhantomData,
        }
    }

    /// A mutable cursor at the first element.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    pub unsafe fn begin_mut_in<'a, 's, A: Allocator>(
        &'s mut self,
        alloc: &'a A,
    ) -> CursorMut<'a, 's, A, K, V, P, C> {
        let node = self.first_position();
        // SAFETY: requirements match function requirements, and `node` was
        // found in this tree
        unsafe { CursorMut::new(self, alloc, node) }
    }

    /// A mutable cursor one past the last element.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    pub unsafe fn end_mut_in<'a, 's, A: Allocator>(
        &'s mut self,
        alloc: &'a A,
    ) -> CursorMut<'a, 's, A, K, V, P, C> {
        let node = self.high;
        // SAFETY: requirements match function requirements, and `node` was
        // found in this tree
        unsafe { CursorMut::new(self, alloc, node) }
    }

    /// Removes and returns the first element.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    pub unsafe fn pop_first_in<A: Allocator>(&mut self, alloc: &A) -> Option<(K, V)> {
        if self.n == 0 {
            return None;
        }
        let first = self.first_position();
        // SAFETY: `first` is a real node; requirements on `alloc` match
        Some(unsafe { self.remove_node_in(alloc, first) }.1)
    }

    /// Removes and returns the last element.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    pub unsafe fn pop_last_in<A: Allocator>(&mut self, alloc: &A) -> Option<(K, V)> {
        if self.n == 0 {
            return None;
        }
        // SAFETY: the high sentinel's parent is the maximum of a non-empty tree
        let last = unsafe { self.high.as_ref().parent }?;
        // SAFETY: `last` is a real node; requirements on `alloc` match
        Some(unsafe { self.remove_node_in(alloc, last) }.1)
    }

    /// Clears the tree, removing all elements. The sentinels are kept.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    pub unsafe fn clear_in<A: Allocator>(&mut self, alloc: &A) {
        debug_log!(len = self.n, "clearing tree");
        self.unset_bounds();
        // SAFETY: sentinels are detached, every remaining node is real and ours
        unsafe { node::drop_subtree_in(alloc, self.root.take()) };
        self.n = 0;
        self.set_bounds();
    }

    /// Exchanges the whole contents of two trees, including their
    /// comparators, in constant time.
    ///
    /// Allocator requirements travel with the contents: after the swap each
    /// tree must be used with the allocator the other one was created with.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    fn first_position(&self) -> NonNull<Node<K, V>> {
        // SAFETY: the low sentinel's parent is the minimum, or the high
        // sentinel when the tree is empty
        unsafe { self.low.as_ref().parent }.unwrap_or(self.high)
    }

    fn raw_range(&self) -> RawRange<K, V> {
        RawRange::new(self.first_position(), self.high)
    }

    pub(crate) fn is_sentinel(&self, n: NonNull<Node<K, V>>) -> bool {
        n == self.low || n == self.high
    }

    /// `link` with the sentinels filtered out.
    #[inline]
    fn real(&self, link: Link<K, V>) -> Link<K, V> {
        link.filter(|&n| !self.is_sentinel(n))
    }

    /// Detaches the sentinels from the minimum and maximum so that structural
    /// changes only ever see real nodes.
    fn unset_bounds(&mut self) {
        if self.n == 0 {
            return;
        }
        // SAFETY: in a non-empty tree the sentinels' parents are the live
        // minimum and maximum
        unsafe {
            if let Some(mut min) = self.low.as_ref().parent {
                min.as_mut().left = None;
            }
            if let Some(mut max) = self.high.as_ref().parent {
                max.as_mut().right = None;
            }
            self.low.as_mut().parent = None;
            self.high.as_mut().parent = None;
        }
    }

    /// Reattaches the sentinels to the current minimum and maximum.
    fn set_bounds(&mut self) {
        // SAFETY: sentinels are detached, so the spines end at real nodes
        unsafe {
            match self.root {
                None => {
                    self.low.as_mut().parent = Some(self.high);
                    self.high.as_mut().parent = Some(self.low);
                }
                Some(root) => {
                    let mut min = node::leftmost(root);
                    min.as_mut().left = Some(self.low);
                    self.low.as_mut().parent = Some(min);

                    let mut max = node::rightmost(root);
                    max.as_mut().right = Some(self.high);
                    self.high.as_mut().parent = Some(max);
                }
            }
        }
    }

    /// Allocates a node for `(key, value)` and attaches it at `slot`, then
    /// rebalances. Nothing is modified if the allocation fails.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object, and `slot`
    /// must be an empty child position (sentinels aside) at which `key`
    /// respects the ordering.
    unsafe fn link_new_in<A: Allocator>(
        &mut self,
        alloc: &A,
        slot: Slot<K, V>,
        key: K,
        value: V,
    ) -> AllocResult<NonNull<Node<K, V>>> {
        let mut new = alloc.allocate_from(Node::new(key, value))?.into_inner();

        self.unset_bounds();
        // SAFETY: `new` is freshly allocated; `slot`'s parent is live and its
        // child position is empty now that the sentinels are detached
        unsafe {
            match slot {
                None => self.root = Some(new),
                Some((mut parent, side)) => {
                    new.as_mut().parent = Some(parent);
                    match side {
                        Side::Left => parent.as_mut().left = Some(new),
                        Side::Right => parent.as_mut().right = Some(new),
                    }
                }
            }
            self.n += 1;

            let start = new.as_ref().parent;
            node::rebalance(&mut self.root, start, true);
        }
        self.set_bounds();

        trace_log!(len = self.n, "inserted node");
        Ok(new)
    }

    /// Unlinks and frees `target`, returning the position that followed it
    /// and its payload.
    ///
    /// A node with two children is not unlinked itself: it swaps payloads with
    /// its in-order successor, which has at most a right child, and that node
    /// is removed instead. The returned position then is `target`, which now
    /// holds the successor's payload.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object, and
    /// `target` must be a real node of this tree.
    unsafe fn remove_node_in<A: Allocator>(
        &mut self,
        alloc: &A,
        mut target: NonNull<Node<K, V>>,
    ) -> (NonNull<Node<K, V>>, (K, V)) {
        debug_assert!(!self.is_sentinel(target));

        // SAFETY: `target` is a live real node; the tree is intact
        let (victim, next) = unsafe {
            let succ = node::next_node(target).unwrap_or(self.high);
            let t = target.as_ref();
            if self.real(t.left).is_some() && self.real(t.right).is_some() {
                let mut succ = succ;
                target.as_mut().swap_payload(succ.as_mut());
                (succ, target)
            } else {
                (target, succ)
            }
        };

        self.unset_bounds();
        // SAFETY: sentinels are detached; `victim` is live with at most one child
        unsafe {
            let v = victim.as_ref();
            let parent = v.parent;
            let child = v.left.or(v.right);
            if let Some(mut child) = child {
                child.as_mut().parent = parent;
            }
            node::replace_child(&mut self.root, parent, victim, child);
            self.n -= 1;

            node::rebalance(&mut self.root, parent, false);
        }
        self.set_bounds();

        trace_log!(len = self.n, "removed node");
        // SAFETY: `victim` is unlinked, real and was allocated by `alloc`
        (next, unsafe { node::take_in(alloc, victim) })
    }

    /// Removes every element from `from` (inclusive) to `to` (exclusive).
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object, and
    /// `from` must not come after `to`.
    unsafe fn remove_between_in<A: Allocator>(
        &mut self,
        alloc: &A,
        from: NonNull<Node<K, V>>,
        to: NonNull<Node<K, V>>,
    ) -> usize {
        // Count first: removing a node with two children frees its successor,
        // which may be `to` itself.
        let count = RawRange::new(from, to).count_nodes();
        let mut cur = from;
        for _ in 0..count {
            // SAFETY: `count` real nodes follow `from`, and each removal hands
            // back the position of the next one
            cur = unsafe { self.remove_node_in(alloc, cur) }.0;
        }
        count
    }

    /// Elements from `lower` (inclusive) up to `upper` (exclusive).
    fn range_between(
        &self,
        lower: NonNull<Node<K, V>>,
        upper: NonNull<Node<K, V>>,
    ) -> Range<'_, K, V> {
        Range {
            inner: RawRange::new(lower, upper),
            phantom: PhantomData,
        }
    }

    #[cfg(test)]
    fn root_key(&self) -> Option<&K> {
        // SAFETY: the root is a live real node
        self.root.map(|r| unsafe { r.as_ref().key() })
    }

    /// Asserts the structural invariants: parent links, cached heights, AVL
    /// balance, sentinel linkage and element count.
    #[cfg(test)]
    pub(crate) fn check_structure(&self) {
        use alloc::vec::Vec;

        // SAFETY: read-only walk over live nodes
        unsafe {
            match self.root {
                None => {
                    assert_eq!(self.n, 0);
                    assert_eq!(self.low.as_ref().parent, Some(self.high));
                    assert_eq!(self.high.as_ref().parent, Some(self.low));
                    return;
                }
                Some(root) => assert_eq!(root.as_ref().parent, None),
            }

            let mut count = 0;
            let mut stack: Vec<NonNull<Node<K, V>>> = self.root.into_iter().collect();
            let mut postorder = Vec::new();
            while let Some(n) = stack.pop() {
                count += 1;
                postorder.push(n);
                for child in [self.real(n.as_ref().left), self.real(n.as_ref().right)]
                    .into_iter()
                    .flatten()
                {
                    assert_eq!(child.as_ref().parent, Some(n), "broken parent link");
                    stack.push(child);
                }
            }
            assert_eq!(count, self.n, "element count");

            for n in postorder.into_iter().rev() {
                let node = n.as_ref();
                let lh = node::height(self.real(node.left));
                let rh = node::height(self.real(node.right));
                assert_eq!(node.height, 1 + lh.max(rh), "stale height");
                assert!((rh - lh).abs() <= 1, "unbalanced node");
            }

            let root = self.root.unwrap_or(self.high);
            let mut min = root;
            while let Some(l) = self.real(min.as_ref().left) {
                min = l;
            }
            let mut max = root;
            while let Some(r) = self.real(max.as_ref().right) {
                max = r;
            }
            assert_eq!(min.as_ref().left, Some(self.low));
            assert_eq!(self.low.as_ref().parent, Some(min));
            assert_eq!(max.as_ref().right, Some(self.high));
            assert_eq!(self.high.as_ref().parent, Some(max));
        }
    }
}

impl<K, V, P, C> AllocatedAvlTree<K, V, P, C> {
    /// Lowest position whose key is not less than `key`, by a single descent.
    fn lower_bound_node<Q>(&self, key: &Q) -> NonNull<Node<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        let mut best = self.high;
        let mut cur = self.root;
        while let Some(n) = cur {
            // SAFETY: `n` is a live real node
            let node = unsafe { n.as_ref() };
            // SAFETY: as above
            if self.cmp.compare(key, unsafe { node.key() }.borrow()) != Ordering::Greater {
                best = n;
                cur = self.real(node.left);
            } else {
                cur = self.real(node.right);
            }
        }
        best
    }

    /// Lowest position whose key is greater than `key`, by a single descent.
    fn upper_bound_node<Q>(&self, key: &Q) -> NonNull<Node<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        let mut best = self.high;
        let mut cur = self.root;
        while let Some(n) = cur {
            // SAFETY: `n` is a live real node
            let node = unsafe { n.as_ref() };
            // SAFETY: as above
            if self.cmp.compare(key, unsafe { node.key() }.borrow()) == Ordering::Less {
                best = n;
                cur = self.real(node.left);
            } else {
                cur = self.real(node.right);
            }
        }
        best
    }

    /// First node whose key equals `key`.
    fn find_node<Q>(&self, key: &Q) -> Option<NonNull<Node<K, V>>>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        let n = self.lower_bound_node(key);
        if n == self.high {
            return None;
        }
        // SAFETY: `n` is not the high sentinel, and lower bounds are never the
        // low sentinel, so it's a real node
        let found = self.cmp.compare(key, unsafe { n.as_ref().key() }.borrow()) == Ordering::Equal;
        found.then_some(n)
    }

    fn bound_nodes<Q, R>(&self, range: &R) -> (NonNull<Node<K, V>>, NonNull<Node<K, V>>)
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
        R: RangeBounds<Q>,
    {
        let lower = match range.start_bound() {
            Bound::Included(k) => self.lower_bound_node(k),
            Bound::Excluded(k) => self.upper_bound_node(k),
            Bound::Unbounded => self.first_position(),
        };
        let upper = match range.end_bound() {
            Bound::Included(k) => self.upper_bound_node(k),
            Bound::Excluded(k) => self.lower_bound_node(k),
            Bound::Unbounded => self.high,
        };

        if lower == self.high {
            return (self.high, self.high);
        }
        if lower == upper || upper == self.high {
            return (lower, upper);
        }

        // Both ends are the first of their run of equal keys, so if the lower
        // end sorts after the upper one the range is empty.
        // SAFETY: neither node is a sentinel
        let (lk, uk) = unsafe { (lower.as_ref().key(), upper.as_ref().key()) };
        if self.cmp.compare(lk.borrow(), uk.borrow()) == Ordering::Greater {
            (upper, upper)
        } else {
            (lower, upper)
        }
    }

    /// Returns `true` if the tree contains an element with the given key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.find_node(key).is_some()
    }

    /// Returns a reference to the value of the first element with the key.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.find(key).value()
    }

    /// Returns the key-value pair of the first element with the key.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.find(key).key_value()
    }

    /// Returns a mutable reference to the value of the first element with the
    /// key.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        let mut n = self.find_node(key)?;
        // SAFETY: `n` is a real node and we hold `&mut self`
        Some(unsafe { n.as_mut().value_mut() })
    }

    /// A cursor at the first element with the key, or at
    /// [`end`](Self::end) if there is none.
    pub fn find<Q>(&self, key: &Q) -> Cursor<'_, K, V, P, C>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        Cursor::new(self, self.find_node(key).unwrap_or(self.high))
    }

    /// A cursor at the first element whose key is not less than `key`.
    pub fn lower_bound<Q>(&self, key: &Q) -> Cursor<'_, K, V, P, C>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        Cursor::new(self, self.lower_bound_node(key))
    }

    /// A cursor at the first element whose key is greater than `key`.
    pub fn upper_bound<Q>(&self, key: &Q) -> Cursor<'_, K, V, P, C>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        Cursor::new(self, self.upper_bound_node(key))
    }

    /// Returns an iterator over every element whose key equals `key`.
    ///
    /// The iterator spans `lower_bound(key)..upper_bound(key)`; in a
    /// [`Multi`](crate::Multi) tree that is the whole run of equal keys.
    pub fn equal_range<Q>(&self, key: &Q) -> Range<'_, K, V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.range_between(self.lower_bound_node(key), self.upper_bound_node(key))
    }

    /// Number of elements whose key equals `key`.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.equal_range(key).count()
    }

    /// Returns an iterator over the elements whose keys lie in `range`.
    ///
    /// An inverted range yields nothing.
    pub fn range<Q, R>(&self, range: R) -> Range<'_, K, V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
        R: RangeBounds<Q>,
    {
        let (lower, upper) = self.bound_nodes(&range);
        self.range_between(lower, upper)
    }

    /// A mutable cursor at the first element with the key, or at the end.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    pub unsafe fn find_mut_in<'a, 's, A: Allocator, Q>(
        &'s mut self,
        alloc: &'a A,
        key: &Q,
    ) -> CursorMut<'a, 's, A, K, V, P, C>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        let node = self.find_node(key).unwrap_or(self.high);
        // SAFETY: requirements match function requirements, and `node` was
        // found in this tree
        unsafe { CursorMut::new(self, alloc, node) }
    }

    /// A mutable cursor at the first element whose key is not less than `key`.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    pub unsafe fn lower_bound_mut_in<'a, 's, A: Allocator, Q>(
        &'s mut self,
        alloc: &'a A,
        key: &Q,
    ) -> CursorMut<'a, 's, A, K, V, P, C>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        let node = self.lower_bound_node(key);
        // SAFETY: requirements match function requirements, and `node` was
        // found in this tree
        unsafe { CursorMut::new(self, alloc, node) }
    }

    /// Removes the first element with the key and returns it.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    pub unsafe fn remove_in<A: Allocator, Q>(&mut self, alloc: &A, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        let n = self.find_node(key)?;
        // SAFETY: `n` is a real node of this tree; requirements on `alloc` match
        Some(unsafe { self.remove_node_in(alloc, n) }.1)
    }

    /// Removes every element with the key, returning how many were removed.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    pub unsafe fn remove_all_in<A: Allocator, Q>(&mut self, alloc: &A, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        let (lower, upper) = (self.lower_bound_node(key), self.upper_bound_node(key));
        // SAFETY: `lower` never comes after `upper`; requirements on `alloc` match
        unsafe { self.remove_between_in(alloc, lower, upper) }
    }

    /// Removes every element whose key lies in `range`, returning how many
    /// were removed.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    pub unsafe fn remove_range_in<A: Allocator, Q, R>(&mut self, alloc: &A, range: R) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
        R: RangeBounds<Q>,
    {
        let (lower, upper) = self.bound_nodes(&range);
        // SAFETY: `bound_nodes` never returns an inverted pair
        unsafe { self.remove_between_in(alloc, lower, upper) }
    }
}

impl<K, V, P: Multiplicity, C: Compare<K>> AllocatedAvlTree<K, V, P, C> {
    /// Finds where `key` belongs by descending from the root.
    ///
    /// Returns `Err` with the existing node when the key is already present
    /// and the policy forbids duplicates. Under [`Multi`](crate::Multi) an
    /// equal key descends right, so it lands after the run of equal keys.
    fn descend(&self, key: &K) -> Result<Slot<K, V>, NonNull<Node<K, V>>> {
        let mut slot = None;
        let mut cur = self.root;
        while let Some(n) = cur {
            // SAFETY: `n` is a live real node
            let node = unsafe { n.as_ref() };
            // SAFETY: as above
            match self.cmp.compare(key, unsafe { node.key() }) {
                Ordering::Less => {
                    slot = Some((n, Side::Left));
                    cur = self.real(node.left);
                }
                Ordering::Equal if !P::ALLOW_DUPLICATES => return Err(n),
                Ordering::Equal | Ordering::Greater => {
                    slot = Some((n, Side::Right));
                    cur = self.real(node.right);
                }
            }
        }
        Ok(slot)
    }

    /// Works out whether a key can be attached right after `hint` without a
    /// descent from the root.
    ///
    /// The hint is usable when it immediately precedes the key's position:
    /// `hint < key < next(hint)`, or `hint <= key < next(hint)` when
    /// duplicates are allowed. The low sentinel counts as smaller than any
    /// key and the high sentinel as larger.
    fn hinted_slot(&self, hint: NonNull<Node<K, V>>, key: &K) -> Option<Slot<K, V>> {
        if self.n == 0 || hint == self.high {
            return None;
        }

        // SAFETY: `hint` is a live node of this tree; its key is only read
        // when it's a real node
        unsafe {
            if hint != self.low {
                match self.cmp.compare(hint.as_ref().key(), key) {
                    Ordering::Less => {}
                    Ordering::Equal if P::ALLOW_DUPLICATES => {}
                    _ => return None,
                }
            }

            let next = node::next_node(hint)?;
            if next != self.high && !self.cmp.lt(key, next.as_ref().key()) {
                return None;
            }

            if hint == self.low {
                Some(Some((next, Side::Left)))
            } else if self.real(hint.as_ref().right).is_none() {
                Some(Some((hint, Side::Right)))
            } else {
                // `next` is the leftmost node of `hint`'s right subtree
                Some(Some((next, Side::Left)))
            }
        }
    }

    /// Inserts `(key, value)` and returns its position plus whether it was
    /// newly inserted.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    unsafe fn insert_node_in<A: Allocator>(
        &mut self,
        alloc: &A,
        key: K,
        value: V,
    ) -> AllocResult<(NonNull<Node<K, V>>, bool)> {
        match self.descend(&key) {
            Err(existing) => Ok((existing, false)),
            Ok(slot) => {
                // SAFETY: `descend` found an empty position for `key`
                let new = unsafe { self.link_new_in(alloc, slot, key, value)? };
                Ok((new, true))
            }
        }
    }

    /// Inserts using `hint` as the likely predecessor of `key`, falling back
    /// to a full descent when it isn't.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object, and `hint`
    /// must be a node of this tree.
    unsafe fn insert_hint_node_in<A: Allocator>(
        &mut self,
        alloc: &A,
        hint: NonNull<Node<K, V>>,
        key: K,
        value: V,
    ) -> AllocResult<(NonNull<Node<K, V>>, bool)> {
        match self.hinted_slot(hint, &key) {
            Some(slot) => {
                trace_log!("hint accepted");
                // SAFETY: `hinted_slot` checked the ordering around the slot
                let new = unsafe { self.link_new_in(alloc, slot, key, value)? };
                Ok((new, true))
            }
            // SAFETY: requirements match function requirements
            None => unsafe { self.insert_node_in(alloc, key, value) },
        }
    }

    /// Inserts a key-value pair into the tree.
    ///
    /// Under the [`Unique`] policy an element with an equal key is left
    /// untouched and `false` is returned alongside a cursor at it. Under the
    /// [`Multi`](crate::Multi) policy the pair is always inserted, after any
    /// elements with an equal key.
    ///
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate this object.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the allocation fails, in which case the tree is
    /// unchanged.
    pub unsafe fn insert_in<'a, 's, A: Allocator>(
        &'s mut self,
        alloc: &'a A,
        key: K,
        value: V,
    ) -> AllocResult<(CursorMut<'a, 's, A, K, V, P, C>, bool)> {
        // SAFETY: requirements match function requirements
        let (node, inserted) = unsafe { self.insert_node_in(alloc, key, value)? };
        // SAFETY: `node` was just linked into this tree by `alloc`
        Ok((unsafe { CursorMut::new(self, alloc, node) }, inserted))
    }
}

impl<K, V, P, C> DropIn for AllocatedAvlTree<K, V, P, C> {
    /// # Safety
    ///
    /// `alloc` must be the allocator used to allocate this object.
    unsafe fn drop_in<A: Allocator>(&mut self, alloc: &A) {
        // SAFETY: requirements match function requirements
        unsafe {
            self.clear_in(alloc);
            node::deallocate_in(alloc, self.low);
            node::deallocate_in(alloc, self.high);
        }
    }
}

impl<'a, K, V, P: Multiplicity, C: Compare<K> + Default, A: Allocator>
    FromIteratorIn<'a, (K, V), A> for AllocatedAvlTree<K, V, P, C>
{
    fn from_iter_in<T>(alloc: &'a A, iter: T) -> DropGuardResult<Self, &'a A>
    where
        T: IntoIterator<Item = (K, V)>,
    {
        let mut tree: DropGuard<Self, &'a A> = Self::new_in(alloc)?;

        for (k, v) in iter {
            // Safety: `alloc` was used to create the `tree`
            unsafe {
                tree.insert_in(alloc, k, v)?;
            }
        }

        Ok(tree)
    }
}

impl<'a, K, V, P, C, A: Allocator + 'a> IntoIteratorIn<'a, A> for AllocatedAvlTree<K, V, P, C> {
    type Item = (K, V);
    type IntoIter = IntoIter<'a, K, V, P, C, A>;

    unsafe fn into_iter_in(self, alloc: &'a A) -> Self::IntoIter {
        IntoIter { tree: self, alloc }
    }
}

impl<'s, K, V, P, C> IntoIterator for &'s AllocatedAvlTree<K, V, P, C> {
    type IntoIter = Iter<'s, K, V>;
    type Item = (&'s K, &'s V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, P, C> fmt::Debug for AllocatedAvlTree<K, V, P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Trees are equal when they have the same length and equal elements in
/// order.
impl<K: PartialEq, V: PartialEq, P, C> PartialEq for AllocatedAvlTree<K, V, P, C> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<K: Eq, V: Eq, P, C> Eq for AllocatedAvlTree<K, V, P, C> {}

/// Lexicographic over the ordered `(key, value)` sequence.
impl<K: PartialOrd, V: PartialOrd, P, C> PartialOrd for AllocatedAvlTree<K, V, P, C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.iter().partial_cmp(other.iter())
    }
}

impl<K: Ord, V: Ord, P, C> Ord for AllocatedAvlTree<K, V, P, C> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.iter().cmp(other.iter())
    }
}

#[cfg(feature = "std")]
impl<K: fmt::Debug, V: fmt::Debug, P, C> AllocatedAvlTree<K, V, P, C> {
    /// Renders the tree in Graphviz dot format.
    ///
    /// # Errors
    ///
    /// Will return `Err` if formatting fails.
    pub fn to_dot(&self) -> Result<String, Box<dyn Error>> {
        let mut data = Vec::default();

        data.write_all(b"digraph G {\n")?;
        if let Some(root) = self.root {
            let is_sentinel = |n| self.is_sentinel(n);
            // SAFETY: the root is a live real node and sentinels are skipped
            unsafe { root.as_ref().to_dot(&mut data, &is_sentinel)? };
        }
        data.write_all(b"}\n")?;

        Ok(String::from_utf8(data)?)
    }
}
