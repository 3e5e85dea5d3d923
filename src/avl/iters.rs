use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::ptr::NonNull;

use allocator_api2::alloc::Allocator;

use allocated::DropIn;

use super::node::{self, Node};
use super::AllocatedAvlTree;

/// A half-open span of node positions, `front` inclusive and `back`
/// exclusive, walked by successor from the front and predecessor from the
/// back until the two meet.
///
/// Only ever built over a tree whose sentinels are attached, with `front` not
/// after `back`.
pub(super) struct RawRange<K, V> {
    front: NonNull<Node<K, V>>,
    back: NonNull<Node<K, V>>,
}

impl<K, V> RawRange<K, V> {
    pub(super) fn new(front: NonNull<Node<K, V>>, back: NonNull<Node<K, V>>) -> Self {
        Self { front, back }
    }

    fn next_node(&mut self) -> Option<NonNull<Node<K, V>>> {
        if self.front == self.back {
            return None;
        }
        let n = self.front;
        // SAFETY: `front` is a real node before `back`, so its successor
        // exists and is at most `back`
        self.front = unsafe { node::next_node(n) }.unwrap_or(self.back);
        Some(n)
    }

    fn next_back_node(&mut self) -> Option<NonNull<Node<K, V>>> {
        if self.front == self.back {
            return None;
        }
        // SAFETY: `back` comes after `front`, so its predecessor is a real
        // node no earlier than `front`
        self.back = unsafe { node::prev_node(self.back) }.unwrap_or(self.front);
        Some(self.back)
    }

    /// Number of positions left, by walking them.
    pub(super) fn count_nodes(mut self) -> usize {
        let mut count = 0;
        while self.next_node().is_some() {
            count += 1;
        }
        count
    }
}

/// An iterator over the key-value pairs of an [`AllocatedAvlTree`], in order.
///
/// This struct is created by the [`iter`](super::AllocatedAvlTree::iter) method on
/// [`AllocatedAvlTree`](super::AllocatedAvlTree). See its documentation for more.
pub struct Iter<'a, K, V> {
    pub(super) inner: RawRange<K, V>,
    pub(super) len: usize,
    pub(super) phantom: PhantomData<&'a Node<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.inner.next_node()?;
        self.len -= 1;
        // SAFETY: nodes strictly inside the range are real and outlive `'a`
        Some(unsafe { key_value(n) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len, Some(self.len))
    }
}

impl<'a, K, V> DoubleEndedIterator for Iter<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let n = self.inner.next_back_node()?;
        self.len -= 1;
        // SAFETY: as in `next`
        Some(unsafe { key_value(n) })
    }
}

impl<'a, K, V> ExactSizeIterator for Iter<'a, K, V> {}

impl<'a, K, V> FusedIterator for Iter<'a, K, V> {}

/// An iterator over the keys of an [`AllocatedAvlTree`], in order.
///
/// This struct is created by the [`keys`](super::AllocatedAvlTree::keys) method on
/// [`AllocatedAvlTree`](super::AllocatedAvlTree). See its documentation for more.
pub struct Keys<'a, K, V> {
    pub(super) inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K, V> DoubleEndedIterator for Keys<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(k, _)| k)
    }
}

impl<'a, K, V> ExactSizeIterator for Keys<'a, K, V> {}

/// An iterator over the values of an [`AllocatedAvlTree`], in key order.
///
/// This struct is created by the [`values`](super::AllocatedAvlTree::values) method on
/// [`AllocatedAvlTree`](super::AllocatedAvlTree). See its documentation for more.
pub struct Values<'a, K, V> {
    pub(super) inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K, V> DoubleEndedIterator for Values<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, v)| v)
    }
}

impl<'a, K, V> ExactSizeIterator for Values<'a, K, V> {}

/// A mutable iterator over the values of an [`AllocatedAvlTree`], in key order.
///
/// This struct is created by the [`values_mut`](super::AllocatedAvlTree::values_mut) method on
/// [`AllocatedAvlTree`](super::AllocatedAvlTree). See its documentation for more.
pub struct ValuesMut<'a, K, V> {
    pub(super) inner: RawRange<K, V>,
    pub(super) len: usize,
    pub(super) phantom: PhantomData<&'a mut Node<K, V>>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        let mut n = self.inner.next_node()?;
        self.len -= 1;
        // SAFETY: each real node is yielded once while the tree is mutably
        // borrowed for `'a`
        Some(unsafe { n.as_mut().value_mut() })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len, Some(self.len))
    }
}

impl<'a, K, V> DoubleEndedIterator for ValuesMut<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let mut n = self.inner.next_back_node()?;
        self.len -= 1;
        // SAFETY: as in `next`
        Some(unsafe { n.as_mut().value_mut() })
    }
}

impl<'a, K, V> ExactSizeIterator for ValuesMut<'a, K, V> {}

/// An iterator over a sub-range of the key-value pairs of an
/// [`AllocatedAvlTree`], in order.
///
/// This struct is created by the [`range`](super::AllocatedAvlTree::range) and
/// [`equal_range`](super::AllocatedAvlTree::equal_range) methods on
/// [`AllocatedAvlTree`](super::AllocatedAvlTree).
pub struct Range<'a, K, V> {
    pub(super) inner: RawRange<K, V>,
    pub(super) phantom: PhantomData<&'a Node<K, V>>,
}

impl<'a, K, V> Iterator for Range<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.inner.next_node()?;
        // SAFETY: nodes strictly inside the range are real and outlive `'a`
        Some(unsafe { key_value(n) })
    }
}

impl<'a, K, V> DoubleEndedIterator for Range<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let n = self.inner.next_back_node()?;
        // SAFETY: as in `next`
        Some(unsafe { key_value(n) })
    }
}

impl<'a, K, V> FusedIterator for Range<'a, K, V> {}

/// An owning iterator over the key-value pairs of an [`AllocatedAvlTree`], in
/// order.
///
/// This struct is created by
/// [`into_iter_in`](allocated::IntoIteratorIn::into_iter_in). Elements not
/// consumed are dropped, and the tree's memory returned to the allocator,
/// when the iterator is dropped.
pub struct IntoIter<'a, K, V, P, C, A: Allocator> {
    pub(super) tree: AllocatedAvlTree<K, V, P, C>,
    pub(super) alloc: &'a A,
}

impl<'a, K, V, P, C, A: Allocator> Iterator for IntoIter<'a, K, V, P, C, A> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: `into_iter_in` requires `alloc` to be the tree's allocator
        unsafe { self.tree.pop_first_in(self.alloc) }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.tree.len(), Some(self.tree.len()))
    }
}

impl<'a, K, V, P, C, A: Allocator> DoubleEndedIterator for IntoIter<'a, K, V, P, C, A> {
    fn next_back(&mut self) -> Option<Self::Item> {
        // SAFETY: as in `next`
        unsafe { self.tree.pop_last_in(self.alloc) }
    }
}

impl<'a, K, V, P, C, A: Allocator> ExactSizeIterator for IntoIter<'a, K, V, P, C, A> {}

impl<'a, K, V, P, C, A: Allocator> Drop for IntoIter<'a, K, V, P, C, A> {
    fn drop(&mut self) {
        // SAFETY: as in `next`; the tree is never used again
        unsafe { self.tree.drop_in(self.alloc) }
    }
}

/// # Safety
///
/// `n` must be a real node that stays live for `'a`.
unsafe fn key_value<'a, K, V>(n: NonNull<Node<K, V>>) -> (&'a K, &'a V) {
    // SAFETY: caller guarantees `n` is a live real node
    unsafe {
        let node: &'a Node<K, V> = n.as_ref();
        (node.key(), node.value())
    }
}
