//! An AVL tree using the _allocated_ pattern for explicit allocator control.
//!
//! This crate provides an ordered associative container backed by a
//! height-balanced binary search tree. Keys are kept in the order given by a
//! comparator, optionally with a value each, and may be unique or repeated:
//!
//! - [`AvlMap`] / [`AvlSet`] - at most one element per key
//! - [`AvlMultiMap`] / [`AvlMultiSet`] - any number of elements per key
//!
//! All four are aliases of [`AvlTree`] with a fixed [`Multiplicity`] policy.
//!
//! # Quick Start
//!
//! ```
//! use allocated_avl::AvlMap;
//!
//! let mut map = AvlMap::new();
//! map.insert(1, "one")?;
//! map.insert(2, "two")?;
//! map.insert(3, "three")?;
//!
//! assert_eq!(map.get(&2), Some(&"two"));
//! assert_eq!(map.len(), 3);
//! # Ok::<(), allocated::AllocErrorWithLayout>(())
//! ```
//!
//! # Cursors
//!
//! Every position in the tree, including one before the first element and one
//! past the last, is a [`Cursor`]. Lookups return cursors, and cursors move
//! in both directions:
//!
//! ```
//! use allocated_avl::AvlMultiSet;
//!
//! let mut set = AvlMultiSet::new();
//! for k in [5, 3, 5, 5, 1] {
//!     set.insert(k, ())?;
//! }
//!
//! assert_eq!(set.count(&5), 3);
//!
//! let mut cursor = set.lower_bound(&4);
//! assert_eq!(cursor.key(), Some(&5));
//! cursor.move_prev();
//! assert_eq!(cursor.key(), Some(&3));
//! # Ok::<(), allocated::AllocErrorWithLayout>(())
//! ```
//!
//! # The Allocated Pattern
//!
//! ## Wrapper Type (Recommended)
//!
//! [`AvlTree<K, V, P, C, A>`] owns its allocator and provides safe methods:
//!
//! ```
//! use allocated_avl::AvlSet;
//!
//! let mut set = AvlSet::new();
//! set.insert(42, ())?;  // No unsafe blocks needed!
//! # Ok::<(), allocated::AllocErrorWithLayout>(())
//! ```
//!
//! ## Allocated Type (Advanced)
//!
//! [`AllocatedAvlTree<K, V, P, C>`] requires the allocator to be passed to
//! every method that allocates or frees, which is what you want when building
//! composite data structures or when you need fine control:
//!
//! ```
//! use allocated_avl::AllocatedAvlTree;
//! use allocated::CountingAllocator;
//!
//! let alloc = CountingAllocator::default();
//! let mut tree = AllocatedAvlTree::<u32, String>::new_in(&alloc)?;
//!
//! unsafe {
//!     tree.insert_in(&alloc, 1, "one".to_string())?;
//! }
//!
//! // Two sentinels plus one node
//! println!("Allocations: {}", alloc.n_allocations());
//! # Ok::<(), allocated::AllocErrorWithLayout>(())
//! ```
//!
//! # Features
//!
//! - `std`: enables [`AvlTree::to_dot`] for rendering a tree with Graphviz.
//! - `tracing`: logs rotations and bulk operations through the `tracing` crate.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(any(feature = "std", test))]
extern crate std;

extern crate alloc;

mod tracing_helpers;

/// The AVL tree, its cursors and iterators.
///
/// This module provides [`avl::AllocatedAvlTree`] and its wrapper
/// [`avl::AvlTree`].
pub mod avl;
pub mod compare;
pub mod policy;

// Re-export the allocated type for advanced use cases
pub use avl::AllocatedAvlTree;

// Re-export wrapper types (recommended for most use cases)
pub use avl::{AvlMap, AvlMultiMap, AvlMultiSet, AvlSet, AvlTree};

pub use avl::{Cursor, CursorMut};
pub use compare::{Compare, Natural};
pub use policy::{Multi, Multiplicity, Unique};
