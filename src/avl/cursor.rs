//! Bidirectional cursors over an [`AllocatedAvlTree`].
//!
//! A cursor sits on a node, which may be one of the two sentinels: the low
//! sentinel one before the first element and the high sentinel one past the
//! last (the tree's [`end`](AllocatedAvlTree::end)). Moving is by in-order
//! successor and predecessor, so every step is O(log n) worst case and O(1)
//! amortised over a full walk.

use core::fmt;
use core::ptr::NonNull;

use allocator_api2::alloc::Allocator;

use allocated::AllocResult;

use crate::compare::Compare;
use crate::policy::Multiplicity;

use super::node::{self, Node};
use super::AllocatedAvlTree;

/// A read-only cursor over a tree.
///
/// Two cursors are equal when they sit on the same node.
pub struct Cursor<'a, K, V, P, C> {
    tree: &'a AllocatedAvlTree<K, V, P, C>,
    node: NonNull<Node<K, V>>,
}

impl<'a, K, V, P, C> Clone for Cursor<'a, K, V, P, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, K, V, P, C> Copy for Cursor<'a, K, V, P, C> {}

impl<'a, K, V, P, C> PartialEq for Cursor<'a, K, V, P, C> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<'a, K, V, P, C> Eq for Cursor<'a, K, V, P, C> {}

impl<'a, K: fmt::Debug, V: fmt::Debug, P, C> fmt::Debug for Cursor<'a, K, V, P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cursor").field(&self.key_value()).finish()
    }
}

impl<'a, K, V, P, C> Cursor<'a, K, V, P, C> {
    pub(super) fn new(tree: &'a AllocatedAvlTree<K, V, P, C>, node: NonNull<Node<K, V>>) -> Self {
        Self { tree, node }
    }

    /// Returns `true` if the cursor is one past the last element.
    pub fn is_end(&self) -> bool {
        self.node == self.tree.high
    }

    /// Returns `true` if the cursor is one before the first element.
    pub fn is_before_begin(&self) -> bool {
        self.node == self.tree.low
    }

    /// The key under the cursor, or `None` on either sentinel.
    pub fn key(&self) -> Option<&'a K> {
        self.key_value().map(|(k, _)| k)
    }

    /// The value under the cursor, or `None` on either sentinel.
    pub fn value(&self) -> Option<&'a V> {
        self.key_value().map(|(_, v)| v)
    }

    /// The key and value under the cursor, or `None` on either sentinel.
    pub fn key_value(&self) -> Option<(&'a K, &'a V)> {
        if self.tree.is_sentinel(self.node) {
            return None;
        }
        // SAFETY: real node borrowed for as long as the tree is
        let node: &'a Node<K, V> = unsafe { self.node.as_ref() };
        // SAFETY: not a sentinel
        Some(unsafe { (node.key(), node.value()) })
    }

    /// Moves to the next element, or to the end after the last one.
    ///
    /// Moving past the end is a caller error; it's caught by a debug
    /// assertion and otherwise leaves the cursor where it is.
    pub fn move_next(&mut self) {
        debug_assert!(!self.is_end(), "cursor moved past the end");
        if !self.is_end() {
            // SAFETY: the tree is borrowed, so its sentinels are attached
            self.node = unsafe { node::next_node(self.node) }.unwrap_or(self.tree.high);
        }
    }

    /// Moves to the previous element, or before the first one. From the end
    /// this lands on the last element.
    ///
    /// Moving before the low sentinel is a caller error; it's caught by a
    /// debug assertion and otherwise leaves the cursor where it is.
    pub fn move_prev(&mut self) {
        debug_assert!(!self.is_before_begin(), "cursor moved before the beginning");
        if !self.is_before_begin() {
            // SAFETY: the tree is borrowed, so its sentinels are attached
            self.node = unsafe { node::prev_node(self.node) }.unwrap_or(self.tree.low);
        }
    }
}

/// A cursor that can also modify the tree: change values, insert with the
/// cursor as a hint, and remove the current element.
///
/// Created by [`AllocatedAvlTree::insert_in`], [`AllocatedAvlTree::find_mut_in`]
/// and friends, which take the allocator once so the cursor's own methods are
/// safe.
pub struct CursorMut<'a, 's, A: Allocator, K, V, P, C> {
    tree: &'s mut AllocatedAvlTree<K, V, P, C>,
    alloc: &'a A,
    node: NonNull<Node<K, V>>,
}

impl<'a, 's, A: Allocator, K: fmt::Debug, V: fmt::Debug, P, C> fmt::Debug
    for CursorMut<'a, 's, A, K, V, P, C>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CursorMut").field(&self.key_value()).finish()
    }
}

impl<'a, 's, A: Allocator, K, V, P, C> CursorMut<'a, 's, A, K, V, P, C> {
    /// # Safety
    ///
    /// `alloc` MUST be the allocator used to allocate `tree`, and `node` must
    /// belong to `tree`.
    pub(super) unsafe fn new(
        tree: &'s mut AllocatedAvlTree<K, V, P, C>,
        alloc: &'a A,
        node: NonNull<Node<K, V>>,
    ) -> Self {
        Self { tree, alloc, node }
    }

    /// A read-only view of the current position.
    pub fn as_cursor(&self) -> Cursor<'_, K, V, P, C> {
        Cursor::new(self.tree, self.node)
    }

    /// See [`Cursor::is_end`].
    pub fn is_end(&self) -> bool {
        self.node == self.tree.high
    }

    /// See [`Cursor::is_before_begin`].
    pub fn is_before_begin(&self) -> bool {
        self.node == self.tree.low
    }

    /// See [`Cursor::key`].
    pub fn key(&self) -> Option<&K> {
        self.key_value().map(|(k, _)| k)
    }

    /// See [`Cursor::value`].
    pub fn value(&self) -> Option<&V> {
        self.key_value().map(|(_, v)| v)
    }

    /// See [`Cursor::key_value`].
    pub fn key_value(&self) -> Option<(&K, &V)> {
        if self.tree.is_sentinel(self.node) {
            return None;
        }
        // SAFETY: real node, borrowed through `self`
        let node = unsafe { self.node.as_ref() };
        // SAFETY: not a sentinel
        Some(unsafe { (node.key(), node.value()) })
    }

    /// The value under the cursor, mutably. Keys can't be changed in place
    /// because that could break the ordering.
    pub fn value_mut(&mut self) -> Option<&mut V> {
        if self.tree.is_sentinel(self.node) {
            return None;
        }
        // SAFETY: real node, exclusively borrowed through `self`
        Some(unsafe { self.node.as_mut().value_mut() })
    }

    /// Converts the cursor into a mutable reference to the current value,
    /// borrowed for as long as the tree is.
    pub fn into_value_mut(self) -> Option<&'s mut V> {
        if self.tree.is_sentinel(self.node) {
            return None;
        }
        let mut node = self.node;
        // SAFETY: real node; the exclusive tree borrow moves into the result
        Some(unsafe { node.as_mut().value_mut() })
    }

    /// See [`Cursor::move_next`].
    pub fn move_next(&mut self) {
        let mut cursor = self.as_cursor();
        cursor.move_next();
        self.node = cursor.node;
    }

    /// See [`Cursor::move_prev`].
    pub fn move_prev(&mut self) {
        let mut cursor = self.as_cursor();
        cursor.move_prev();
        self.node = cursor.node;
    }

    /// Removes the element under the cursor and returns it. The cursor moves
    /// to the element that followed it (or the end).
    ///
    /// Returns `None`, leaving the tree untouched, if the cursor is on a
    /// sentinel.
    pub fn remove_current(&mut self) -> Option<(K, V)> {
        if self.tree.is_sentinel(self.node) {
            return None;
        }
        // SAFETY: `alloc` is the tree's allocator (checked when the cursor was
        // made) and the node is a real node of the tree
        let (next, entry) = unsafe { self.tree.remove_node_in(self.alloc, self.node) };
        self.node = next;
        Some(entry)
    }
}

impl<'a, 's, A: Allocator, K, V, P: Multiplicity, C: Compare<K>> CursorMut<'a, 's, A, K, V, P, C> {
    /// Inserts `(key, value)` using the current position as a hint and moves
    /// the cursor onto the new (or, for a [`Unique`](crate::Unique) tree,
    /// existing) element. Returns whether an element was inserted.
    ///
    /// If the cursor sits right before where `key` belongs, the node is
    /// attached next to it without a descent from the root. Any other position
    /// still gives a correct result through an ordinary insert.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the allocation fails, in which case the tree and
    /// the cursor are unchanged.
    pub fn insert(&mut self, key: K, value: V) -> AllocResult<bool> {
        // SAFETY: `alloc` is the tree's allocator and the cursor's node is
        // part of the tree
        let (node, inserted) =
            unsafe { self.tree.insert_hint_node_in(self.alloc, self.node, key, value)? };
        self.node = node;
        Ok(inserted)
    }
}
