//! Ordering relations used to arrange keys in the tree.

use core::cmp::Ordering;

/// A total order over `T`.
///
/// The tree never checks that an implementation is consistent. A comparator
/// that is not transitive or not antisymmetric leaves the tree memory-safe but
/// its element order (and therefore lookups) unspecified.
///
/// Any `Fn(&T, &T) -> Ordering` closure is a comparator:
///
/// ```
/// use allocated_avl::AvlTree;
/// use allocated_avl::Unique;
///
/// let mut tree = AvlTree::<u32, (), Unique, _>::with_compare(|a: &u32, b: &u32| b.cmp(a));
/// tree.insert(1, ())?;
/// tree.insert(3, ())?;
/// tree.insert(2, ())?;
///
/// assert_eq!(tree.keys().copied().collect::<Vec<_>>(), vec![3, 2, 1]);
/// # Ok::<(), allocated::AllocErrorWithLayout>(())
/// ```
pub trait Compare<T: ?Sized> {
    /// Compares `a` with `b`.
    fn compare(&self, a: &T, b: &T) -> Ordering;

    #[inline]
    fn lt(&self, a: &T, b: &T) -> bool {
        self.compare(a, b) == Ordering::Less
    }
}

/// The natural order of `T`, as given by its [`Ord`] implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Natural;

impl<T: Ord + ?Sized> Compare<T> for Natural {
    #[inline]
    fn compare(&self, a: &T, b: &T) -> Ordering {
        a.cmp(b)
    }
}

impl<T: ?Sized, F> Compare<T> for F
where
    F: Fn(&T, &T) -> Ordering,
{
    #[inline]
    fn compare(&self, a: &T, b: &T) -> Ordering {
        self(a, b)
    }
}
