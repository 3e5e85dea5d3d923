//! Ergonomic wrapper for the AVL tree.
//!
//! This module provides [`AvlTree<K, V, P, C, A>`], a wrapper around
//! [`AllocatedAvlTree`] that owns an allocator, making it safe and
//! ergonomic to use, plus the map and set aliases built on it.

use core::borrow::Borrow;
use core::cmp::Ordering;
use core::fmt;
use core::mem;
use core::mem::ManuallyDrop;
use core::ops::RangeBounds;

#[cfg(feature = "std")]
use alloc::boxed::Box;
#[cfg(feature = "std")]
use alloc::string::String;
#[cfg(feature = "std")]
use std::error::Error;

use allocator_api2::alloc::{Allocator, Global};

use allocated::{AllocResult, AllocResultExt, DropIn, FromIteratorIn};

use crate::compare::{Compare, Natural};
use crate::policy::{Multi, Multiplicity, Unique};

use super::{AllocatedAvlTree, Cursor, CursorMut, Iter, Keys, Range, Values, ValuesMut};

/// An ordered map with unique keys.
pub type AvlMap<K, V, C = Natural, A = Global> = AvlTree<K, V, Unique, C, A>;

/// An ordered set.
pub type AvlSet<K, C = Natural, A = Global> = AvlTree<K, (), Unique, C, A>;

/// An ordered map that keeps every inserted pair, duplicates included.
pub type AvlMultiMap<K, V, C = Natural, A = Global> = AvlTree<K, V, Multi, C, A>;

/// An ordered multiset.
pub type AvlMultiSet<K, C = Natural, A = Global> = AvlTree<K, (), Multi, C, A>;

/// An ergonomic AVL tree that owns its allocator.
///
/// This is the recommended type for most use cases. It wraps
/// [`AllocatedAvlTree`] and provides safe methods without requiring
/// `unsafe` blocks or passing allocators manually.
///
/// # Example
///
/// ```
/// use allocated_avl::AvlMap;
///
/// let mut map = AvlMap::new();
/// map.insert(2, "two")?;
/// map.insert(1, "one")?;
///
/// assert_eq!(map.get(&1), Some(&"one"));
/// assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
/// # Ok::<(), allocated::AllocErrorWithLayout>(())
/// ```
pub struct AvlTree<K, V, P = Unique, C = Natural, A: Allocator = Global> {
    alloc: A,
    raw: ManuallyDrop<AllocatedAvlTree<K, V, P, C>>,
}

impl<K, V, P> AvlTree<K, V, P> {
    /// Create a new empty tree using the global allocator and the keys'
    /// natural order.
    ///
    /// # Panics
    ///
    /// Panics if allocation fails.
    #[inline]
    pub fn new() -> Self {
        Self::with_compare(Natural)
    }
}

impl<K, V, P, C> AvlTree<K, V, P, C> {
    /// Create a new empty tree using the global allocator, ordered by `cmp`.
    ///
    /// # Panics
    ///
    /// Panics if allocation fails.
    pub fn with_compare(cmp: C) -> Self {
        let raw = AllocatedAvlTree::with_compare_in(&Global, cmp)
            .handle_alloc_error()
            .into_inner();

        Self { alloc: Global, raw }
    }
}

impl<K, V, P, C: Default> Default for AvlTree<K, V, P, C> {
    fn default() -> Self {
        Self::with_compare(C::default())
    }
}

impl<K, V, P, C, A: Allocator> Drop for AvlTree<K, V, P, C, A> {
    fn drop(&mut self) {
        // SAFETY: `self.raw` was allocated by `self.alloc`, and is not used
        // after being dropped
        unsafe {
            self.raw.drop_in(&self.alloc);
            ManuallyDrop::drop(&mut self.raw);
        }
    }
}

impl<K, V, P, C: Default, A: Allocator> AvlTree<K, V, P, C, A> {
    /// Create a new empty tree using the provided allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn new_in(alloc: A) -> AllocResult<Self> {
        let raw = AllocatedAvlTree::new_in(&alloc)?.into_inner();
        Ok(Self { alloc, raw })
    }
}

impl<K, V, P, C, A: Allocator> AvlTree<K, V, P, C, A> {
    /// Create a new empty tree using the provided allocator, ordered by
    /// `cmp`.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn with_compare_in(alloc: A, cmp: C) -> AllocResult<Self> {
        let raw = AllocatedAvlTree::with_compare_in(&alloc, cmp)?.into_inner();
        Ok(Self { alloc, raw })
    }

    /// Returns a reference to the underlying allocator.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Returns the number of elements in the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the tree contains no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Height of the tree in edges, or `None` when empty.
    pub fn height(&self) -> Option<usize> {
        self.raw.height()
    }

    /// A cursor at the first element, or at the end if the tree is empty.
    pub fn begin(&self) -> Cursor<'_, K, V, P, C> {
        self.raw.begin()
    }

    /// A cursor one past the last element.
    pub fn end(&self) -> Cursor<'_, K, V, P, C> {
        self.raw.end()
    }

    /// A mutable cursor at the first element.
    pub fn begin_mut(&mut self) -> CursorMut<'_, '_, A, K, V, P, C> {
        // SAFETY: `self.alloc` was used to allocate `self.raw`
        unsafe { self.raw.begin_mut_in(&self.alloc) }
    }

    /// A mutable cursor one past the last element.
    pub fn end_mut(&mut self) -> CursorMut<'_, '_, A, K, V, P, C> {
        // SAFETY: `self.alloc` was used to allocate `self.raw`
        unsafe { self.raw.end_mut_in(&self.alloc) }
    }

    /// Returns the first key-value pair in the tree.
    pub fn first_key_value(&self) -> Option<(&K, &V)> {
        self.raw.first_key_value()
    }

    /// Returns the last key-value pair in the tree.
    pub fn last_key_value(&self) -> Option<(&K, &V)> {
        self.raw.last_key_value()
    }

    /// Removes and returns the first element.
    pub fn pop_first(&mut self) -> Option<(K, V)> {
        // SAFETY: `self.alloc` was used to allocate `self.raw`
        unsafe { self.raw.pop_first_in(&self.alloc) }
    }

    /// Removes and returns the last element.
    pub fn pop_last(&mut self) -> Option<(K, V)> {
        // SAFETY: `self.alloc` was used to allocate `self.raw`
        unsafe { self.raw.pop_last_in(&self.alloc) }
    }

    /// Clears the tree, removing all elements.
    pub fn clear(&mut self) {
        // SAFETY: `self.alloc` was used to allocate `self.raw`
        unsafe { self.raw.clear_in(&self.alloc) }
    }

    /// Exchanges the contents of two trees, allocators included, in constant
    /// time.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Gets an iterator over the elements of the tree, in order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        self.raw.iter()
    }

    /// Gets an iterator over the keys of the tree, in order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        self.raw.keys()
    }

    /// Gets an iterator over the values of the tree, in key order.
    pub fn values(&self) -> Values<'_, K, V> {
        self.raw.values()
    }

    /// Gets a mutable iterator over the values of the tree, in key order.
    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        self.raw.values_mut()
    }

    /// Returns `true` if the tree contains an element with the key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.raw.contains_key(key)
    }

    /// Returns a reference to the value of the first element with the key.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.raw.get(key)
    }

    /// Returns the key-value pair of the first element with the key.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.raw.get_key_value(key)
    }

    /// Returns a mutable reference to the value of the first element with
    /// the key.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.raw.get_mut(key)
    }

    /// A cursor at the first element with the key, or at the end.
    pub fn find<Q>(&self, key: &Q) -> Cursor<'_, K, V, P, C>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.raw.find(key)
    }

    /// A mutable cursor at the first element with the key, or at the end.
    pub fn find_mut<Q>(&mut self, key: &Q) -> CursorMut<'_, '_, A, K, V, P, C>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        // SAFETY: `self.alloc` was used to allocate `self.raw`
        unsafe { self.raw.find_mut_in(&self.alloc, key) }
    }

    /// A cursor at the first element whose key is not less than `key`.
    pub fn lower_bound<Q>(&self, key: &Q) -> Cursor<'_, K, V, P, C>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.raw.lower_bound(key)
    }

    /// A mutable cursor at the first element whose key is not less than
    /// `key`. Inserting through it is a hinted insert for keys just below
    /// `key`'s position.
    pub fn lower_bound_mut<Q>(&mut self, key: &Q) -> CursorMut<'_, '_, A, K, V, P, C>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        // SAFETY: `self.alloc` was used to allocate `self.raw`
        unsafe { self.raw.lower_bound_mut_in(&self.alloc, key) }
    }

    /// A cursor at the first element whose key is greater than `key`.
    pub fn upper_bound<Q>(&self, key: &Q) -> Cursor<'_, K, V, P, C>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.raw.upper_bound(key)
    }

    /// Returns an iterator over every element whose key equals `key`.
    pub fn equal_range<Q>(&self, key: &Q) -> Range<'_, K, V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.raw.equal_range(key)
    }

    /// Number of elements whose key equals `key`.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        self.raw.count(key)
    }

    /// Returns an iterator over the elements whose keys lie in `range`.
    pub fn range<Q, R>(&self, range: R) -> Range<'_, K, V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
        R: RangeBounds<Q>,
    {
        self.raw.range(range)
    }

    /// Removes the first element with the key and returns it.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        // SAFETY: `self.alloc` was used to allocate `self.raw`
        unsafe { self.raw.remove_in(&self.alloc, key) }
    }

    /// Removes every element with the key, returning how many were removed.
    pub fn remove_all<Q>(&mut self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
    {
        // SAFETY: `self.alloc` was used to allocate `self.raw`
        unsafe { self.raw.remove_all_in(&self.alloc, key) }
    }

    /// Removes every element whose key lies in `range`, returning how many
    /// were removed.
    pub fn remove_range<Q, R>(&mut self, range: R) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Compare<Q>,
        R: RangeBounds<Q>,
    {
        // SAFETY: `self.alloc` was used to allocate `self.raw`
        unsafe { self.raw.remove_range_in(&self.alloc, range) }
    }
}

impl<K, V, P: Multiplicity, C: Compare<K>, A: Allocator> AvlTree<K, V, P, C, A> {
    /// Inserts a key-value pair into the tree, returning a cursor at the
    /// element with the key and whether it was newly inserted.
    ///
    /// See [`AllocatedAvlTree::insert_in`] for how equal keys are handled.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails, leaving the tree unchanged.
    pub fn insert(
        &mut self,
        key: K,
        value: V,
    ) -> AllocResult<(CursorMut<'_, '_, A, K, V, P, C>, bool)> {
        // SAFETY: `self.alloc` was used to allocate `self.raw`
        unsafe { self.raw.insert_in(&self.alloc, key, value) }
    }
}

impl<K, V, P: Multiplicity, C: Compare<K> + Default> FromIterator<(K, V)> for AvlTree<K, V, P, C> {
    /// # Panics
    ///
    /// Panics if allocation fails.
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let raw = AllocatedAvlTree::from_iter_in(&Global, iter)
            .handle_alloc_error()
            .into_inner();

        Self { alloc: Global, raw }
    }
}

impl<'s, K, V, P, C, A: Allocator> IntoIterator for &'s AvlTree<K, V, P, C, A> {
    type IntoIter = Iter<'s, K, V>;
    type Item = (&'s K, &'s V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, P, C, A: Allocator> fmt::Debug for AvlTree<K, V, P, C, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.raw, f)
    }
}

impl<K: PartialEq, V: PartialEq, P, C, A: Allocator> PartialEq for AvlTree<K, V, P, C, A> {
    fn eq(&self, other: &Self) -> bool {
        *self.raw == *other.raw
    }
}

impl<K: Eq, V: Eq, P, C, A: Allocator> Eq for AvlTree<K, V, P, C, A> {}

impl<K: PartialOrd, V: PartialOrd, P, C, A: Allocator> PartialOrd for AvlTree<K, V, P, C, A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.raw.partial_cmp(&other.raw)
    }
}

impl<K: Ord, V: Ord, P, C, A: Allocator> Ord for AvlTree<K, V, P, C, A> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

#[cfg(feature = "std")]
impl<K: fmt::Debug, V: fmt::Debug, P, C, A: Allocator> AvlTree<K, V, P, C, A> {
    /// Renders the tree in Graphviz dot format.
    ///
    /// # Errors
    ///
    /// Will return `Err` if formatting fails.
    pub fn to_dot(&self) -> Result<String, Box<dyn Error>> {
        self.raw.to_dot()
    }
}
