#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block
)]

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use core::cell::Cell;
use core::mem::size_of;
use core::mem::ManuallyDrop;
use std::collections::BTreeMap;
use std::error::Error;

use proptest::prelude::*;

use itertools::assert_equal;
use itertools::Itertools;

use allocated::{CollectIn, CountingAllocator};
use allocator_api2::alloc::{AllocError, Allocator, Global, Layout};

use crate::policy::Multi;

use super::*;

#[test]
fn test_constructor() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

    unsafe {
        assert_eq!(tree.n, 0);
        assert_equal(tree.iter().map(|(k, v)| (*k, *v)), vec![]);

        assert_eq!(tree.len(), 0);
        assert!(tree.is_empty());
        assert_eq!(tree.height(), None);

        assert!(!tree.contains_key(&1));
        assert_eq!(tree.get(&1), None);
        assert!(tree.begin() == tree.end());
        assert!(tree.find(&1).is_end());

        assert_eq!(tree.first_key_value(), None);
        assert_eq!(tree.last_key_value(), None);
        assert_eq!(tree.pop_first_in(&alloc), None);
        assert_eq!(tree.pop_last_in(&alloc), None);
        tree.check_structure();

        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    _assert_allocations(alloc, 0);

    Ok(())
}

#[test]
fn test_one() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

    unsafe {
        let (cursor, inserted) = tree.insert_in(&alloc, 1, 1)?;
        assert!(inserted);
        assert_eq!(cursor.key_value(), Some((&1, &1)));

        assert_eq!(tree.n, 1);
        assert_equal(tree.iter().map(|(k, v)| (*k, *v)), vec![(1, 1)]);

        assert_eq!(tree.len(), 1);
        assert!(!tree.is_empty());
        assert_eq!(tree.height(), Some(0));

        assert!(tree.contains_key(&1));
        assert_eq!(tree.get(&1), Some(&1));

        assert_eq!(tree.first_key_value(), Some((&1, &1)));
        assert_eq!(tree.last_key_value(), Some((&1, &1)));
        tree.check_structure();

        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    _assert_allocations(alloc, 1);

    Ok(())
}

#[test]
fn test_3_out_of_order() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

    unsafe {
        tree.insert_in(&alloc, 1, 1)?;
        tree.insert_in(&alloc, 3, 9)?;
        tree.insert_in(&alloc, 2, 4)?;

        // right-left case: one double rotation
        assert_eq!(tree.root_key(), Some(&2));
        assert_eq!(tree.height(), Some(1));
        assert_equal(
            tree.iter().map(|(k, v)| (*k, *v)),
            vec![(1, 1), (2, 4), (3, 9)],
        );
        tree.check_structure();

        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    _assert_allocations(alloc, 3);

    Ok(())
}

#[test]
fn test_ascending_rotations() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

    unsafe {
        tree.insert_in(&alloc, 10, 1)?;
        tree.insert_in(&alloc, 20, 2)?;
        assert_eq!(tree.root_key(), Some(&10));

        tree.insert_in(&alloc, 30, 3)?;
        assert_eq!(tree.root_key(), Some(&20));
        tree.check_structure();

        tree.insert_in(&alloc, 40, 4)?;
        tree.insert_in(&alloc, 50, 5)?;
        assert_eq!(tree.root_key(), Some(&20));
        assert_eq!(tree.height(), Some(2));
        assert_equal(tree.keys().copied(), [10, 20, 30, 40, 50]);
        tree.check_structure();

        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    _assert_allocations(alloc, 5);

    Ok(())
}

#[test]
fn test_descending_rotations() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

    unsafe {
        for k in (1..=15).rev() {
            tree.insert_in(&alloc, k, k * k)?;
            tree.check_structure();
        }

        // 15 keys inserted in order fill a perfect tree
        assert_eq!(tree.height(), Some(3));
        assert_eq!(tree.root_key(), Some(&8));
        assert_equal(
            tree.iter().map(|(k, v)| (*k, *v)),
            (1..=15).map(|i| (i, i * i)),
        );

        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    _assert_allocations(alloc, 15);

    Ok(())
}

#[test]
fn test_remove_inner_node() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

    unsafe {
        for k in [50, 30, 70, 20, 40, 60, 80] {
            tree.insert_in(&alloc, k, k + 1)?;
        }
        assert_eq!(tree.height(), Some(2));

        assert_eq!(tree.remove_in(&alloc, &30), Some((30, 31)));
        assert_eq!(tree.remove_in(&alloc, &30), None);

        assert_eq!(tree.root_key(), Some(&50));
        assert_equal(tree.keys().copied(), [20, 40, 50, 60, 70, 80]);
        assert_equal(tree.values().copied(), [21, 41, 51, 61, 71, 81]);
        assert_eq!(tree.len(), 6);
        tree.check_structure();

        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    _assert_allocations(alloc, 7);

    Ok(())
}

#[test]
fn test_remove_root_of_two() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

    unsafe {
        tree.insert_in(&alloc, 10, 1)?;
        tree.insert_in(&alloc, 20, 2)?;
        assert_eq!(tree.root_key(), Some(&10));

        assert_eq!(tree.remove_in(&alloc, &10), Some((10, 1)));
        assert_eq!(tree.root_key(), Some(&20));
        assert_eq!(tree.first_key_value(), Some((&20, &2)));
        assert_eq!(tree.last_key_value(), Some((&20, &2)));
        tree.check_structure();

        assert_eq!(tree.remove_in(&alloc, &20), Some((20, 2)));
        assert!(tree.is_empty());
        assert!(tree.begin() == tree.end());
        tree.check_structure();

        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    _assert_allocations(alloc, 2);

    Ok(())
}

#[test]
fn test_remove_rebalances_to_root() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

    unsafe {
        // Sparsest AVL tree of height 4: removing 10 unbalances 20, and the
        // rotation there shortens the left subtree of the root.
        for k in [50, 20, 70, 10, 30, 60, 80, 35, 90, 65, 85, 95] {
            tree.insert_in(&alloc, k, k)?;
        }
        tree.check_structure();
        assert_eq!(tree.height(), Some(max_height(12)));

        assert!(tree.remove_in(&alloc, &10).is_some());
        assert_eq!(tree.root_key(), Some(&70));
        assert_eq!(tree.height(), Some(3));

        for k in [60, 65, 50, 20, 95] {
            assert!(tree.remove_in(&alloc, &k).is_some());
            tree.check_structure();
        }
        assert_equal(tree.keys().copied(), [30, 35, 70, 80, 85, 90]);

        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    _assert_allocations(alloc, 12);

    Ok(())
}

#[test]
fn test_unique_duplicate() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

    unsafe {
        tree.insert_in(&alloc, 1, 10)?;
        tree.insert_in(&alloc, 2, 20)?;

        let (cursor, inserted) = tree.insert_in(&alloc, 1, 30)?;
        assert!(!inserted);
        assert_eq!(cursor.key_value(), Some((&1, &10)));

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.count(&1), 1);
        assert_equal(tree.values().copied(), [10, 20]);
        tree.check_structure();

        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    // the rejected duplicate never allocated
    _assert_allocations(alloc, 2);

    Ok(())
}

#[test]
fn test_multi_duplicates() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32, Multi>::new_in(&alloc)?;

    unsafe {
        for (i, k) in [5, 3, 5, 5, 1].into_iter().enumerate() {
            let (_, inserted) = tree.insert_in(&alloc, k, i as u32)?;
            assert!(inserted);
        }
        tree.check_structure();

        assert_eq!(tree.len(), 5);
        assert_eq!(tree.count(&5), 3);
        assert_eq!(tree.count(&4), 0);
        assert_equal(tree.keys().copied(), [1, 3, 5, 5, 5]);

        // equal keys keep their insertion order
        assert_equal(tree.equal_range(&5).map(|(_, v)| *v), [0, 2, 3]);
        assert_equal(tree.equal_range(&5).rev().map(|(_, v)| *v), [3, 2, 0]);
        assert_eq!(tree.get(&5), Some(&0));
        assert_eq!(tree.find(&5).value(), Some(&0));

        assert_eq!(tree.remove_in(&alloc, &5), Some((5, 0)));
        assert_eq!(tree.count(&5), 2);
        assert_eq!(tree.remove_all_in(&alloc, &5), 2);
        assert_eq!(tree.count(&5), 0);
        assert_eq!(tree.remove_all_in(&alloc, &5), 0);
        assert_equal(tree.keys().copied(), [1, 3]);
        tree.check_structure();

        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    _assert_allocations(alloc, 5);

    Ok(())
}

#[test]
fn test_bounds() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let tree: DropGuard<AllocatedAvlTree<u32, u32>, _> =
        [10, 20, 30].into_iter().map(|k| (k, k / 10)).collect_in(&alloc)?;

    assert_eq!(tree.lower_bound(&5).key(), Some(&10));
    assert_eq!(tree.lower_bound(&20).key(), Some(&20));
    assert_eq!(tree.lower_bound(&25).key(), Some(&30));
    assert!(tree.lower_bound(&31).is_end());

    assert_eq!(tree.upper_bound(&5).key(), Some(&10));
    assert_eq!(tree.upper_bound(&20).key(), Some(&30));
    assert!(tree.upper_bound(&30).is_end());

    assert_equal(tree.equal_range(&20).map(|(k, _)| *k), [20]);
    assert_eq!(tree.equal_range(&25).count(), 0);
    assert!(tree.find(&25) == tree.end());

    assert_equal(tree.range(15..=30).map(|(k, _)| *k), [20, 30]);
    assert_equal(tree.range(10..30).map(|(k, _)| *k), [10, 20]);
    assert_equal(tree.range(..20).map(|(k, _)| *k), [10]);
    assert_equal(tree.range(21..).map(|(k, _)| *k), [30]);
    assert_eq!(tree.range(11..12).count(), 0);
    assert_eq!(tree.range(30..10).count(), 0);
    assert_equal(
        tree.range((Bound::Excluded(10), Bound::Excluded(30)))
            .map(|(k, _)| *k),
        [20],
    );

    core::mem::drop(tree);
    _assert_allocations(alloc, 3);

    Ok(())
}

#[test]
fn test_cursor_walk() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let tree: DropGuard<AllocatedAvlTree<u32, u32>, _> =
        (1..=20).map(|k| (k, k * k)).collect_in(&alloc)?;

    let mut cursor = tree.begin();
    let mut forward = Vec::new();
    while !cursor.is_end() {
        forward.push(*cursor.key().unwrap());
        cursor.move_next();
    }
    assert_equal(forward, 1..=20);
    assert_eq!(cursor.key(), None);
    assert!(cursor == tree.end());

    let mut backward = Vec::new();
    cursor.move_prev();
    while !cursor.is_before_begin() {
        backward.push(*cursor.key().unwrap());
        cursor.move_prev();
    }
    assert_equal(backward, (1..=20).rev());
    assert_eq!(cursor.value(), None);

    cursor.move_next();
    assert!(cursor == tree.begin());
    assert_eq!(cursor.key_value(), Some((&1, &1)));

    assert_equal(tree.iter().rev().map(|(k, _)| *k), (1..=20).rev());
    assert_eq!(tree.iter().len(), 20);

    core::mem::drop(tree);
    _assert_allocations(alloc, 20);

    Ok(())
}

#[test]
fn test_cursor_remove() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree: DropGuard<AllocatedAvlTree<u32, u32>, _> =
        (1..=7).map(|k| (k * 10, k)).collect_in(&alloc)?;

    unsafe {
        // 40 is the root and has two children
        let mut cursor = tree.find_mut_in(&alloc, &40);
        assert_eq!(cursor.remove_current(), Some((40, 4)));
        assert_eq!(cursor.key(), Some(&50));
        assert_eq!(cursor.remove_current(), Some((50, 5)));
        assert_eq!(cursor.key(), Some(&60));

        *cursor.value_mut().unwrap() = 600;
        cursor.move_prev();
        assert_eq!(cursor.key(), Some(&30));

        let mut cursor = tree.end_mut_in(&alloc);
        assert_eq!(cursor.remove_current(), None);
        cursor.move_prev();
        assert_eq!(cursor.remove_current(), Some((70, 7)));
        assert!(cursor.is_end());
    }

    tree.check_structure();
    assert_equal(
        tree.iter().map(|(k, v)| (*k, *v)),
        vec![(10, 1), (20, 2), (30, 3), (60, 600)],
    );

    core::mem::drop(tree);
    _assert_allocations(alloc, 7);

    Ok(())
}

#[test]
fn test_hint_insert() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

    unsafe {
        // each insert leaves the cursor right before the next key
        let mut cursor = tree.end_mut_in(&alloc);
        for k in 0..100 {
            assert!(cursor.insert(k, k)?);
            assert_eq!(cursor.key(), Some(&k));
        }

        // a hint in the wrong place still inserts in order
        let mut cursor = tree.begin_mut_in(&alloc);
        assert!(cursor.insert(1000, 0)?);
        assert_eq!(cursor.key(), Some(&1000));
        assert!(!cursor.insert(50, 0)?);
        assert_eq!(cursor.key_value(), Some((&50, &50)));
    }

    tree.check_structure();
    assert_eq!(tree.len(), 101);
    assert_equal(tree.keys().copied(), (0..100).chain([1000]));
    assert!(tree.height().unwrap() <= max_height(tree.len()));

    unsafe {
        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    _assert_allocations(alloc, 101);

    Ok(())
}

#[test]
fn test_hint_insert_multi() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree = AllocatedAvlTree::<u32, u32, Multi>::new_in(&alloc)?;

    unsafe {
        tree.insert_in(&alloc, 1, 0)?;
        tree.insert_in(&alloc, 9, 0)?;

        let mut cursor = tree.lower_bound_mut_in(&alloc, &1);
        for i in 1..=5 {
            assert!(cursor.insert(1, i)?);
        }
        let mut cursor = tree.begin_mut_in(&alloc);
        cursor.move_prev();
        assert!(cursor.insert(0, 0)?);
        assert_eq!(cursor.key(), Some(&0));
    }

    tree.check_structure();
    assert_equal(tree.equal_range(&1).map(|(_, v)| *v), 0..=5);
    assert_equal(tree.keys().copied(), [0, 1, 1, 1, 1, 1, 1, 9]);

    unsafe {
        tree.drop_in(&alloc);
        core::mem::forget(tree);
    }

    _assert_allocations(alloc, 8);

    Ok(())
}

#[test]
fn test_remove_range() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree: DropGuard<AllocatedAvlTree<u32, u32>, _> =
        (0..100).map(|k| (k, k)).collect_in(&alloc)?;

    unsafe {
        assert_eq!(tree.remove_range_in(&alloc, 10..20), 10);
        tree.check_structure();
        assert_eq!(tree.remove_range_in(&alloc, 50..40), 0);
        assert_eq!(tree.remove_range_in(&alloc, 10..20), 0);
        assert_eq!(tree.remove_range_in(&alloc, 90..), 10);
        assert_eq!(tree.remove_range_in(&alloc, ..=4), 5);
        tree.check_structure();
    }

    assert_eq!(tree.len(), 75);
    assert_equal(tree.keys().copied(), (5..10).chain(20..90));

    unsafe {
        assert_eq!(tree.remove_range_in::<_, u32, _>(&alloc, ..), 75);
    }
    assert!(tree.is_empty());
    tree.check_structure();

    core::mem::drop(tree);
    _assert_allocations(alloc, 100);

    Ok(())
}

#[test]
fn test_inverted_ranges() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree: DropGuard<AllocatedAvlTree<u32, u32>, _> =
        (1..=3).map(|k| (k, k)).collect_in(&alloc)?;

    // start past the maximum, end inside the tree
    assert_eq!(tree.range(5..2).count(), 0);
    assert_eq!(tree.range(5..2).rev().count(), 0);
    // end before the minimum
    assert_eq!(tree.range(2..0).count(), 0);
    assert_eq!(tree.range(..0).count(), 0);
    assert_eq!(tree.range((Bound::Excluded(3), Bound::Excluded(3))).count(), 0);
    assert_eq!(tree.range((Bound::Excluded(2), Bound::Excluded(2))).count(), 0);
    assert_eq!(tree.range((Bound::Excluded(3), Bound::Unbounded)).count(), 0);

    unsafe {
        assert_eq!(tree.remove_range_in(&alloc, 5..2), 0);
        assert_eq!(tree.remove_range_in(&alloc, 2..0), 0);
        assert_eq!(tree.remove_range_in(&alloc, (Bound::Excluded(3), Bound::Excluded(3))), 0);
    }
    assert_equal(tree.keys().copied(), 1..=3);
    tree.check_structure();

    unsafe {
        tree.clear_in(&alloc);
    }
    assert_eq!(tree.range((Bound::Excluded(3), Bound::Excluded(3))).count(), 0);
    assert_eq!(tree.range(5..2).count(), 0);
    unsafe {
        assert_eq!(tree.remove_range_in(&alloc, (Bound::Excluded(3), Bound::Excluded(3))), 0);
    }
    tree.check_structure();

    core::mem::drop(tree);
    _assert_allocations(alloc, 3);

    let mut set: AvlSet<u32> = [1, 2, 3].into_iter().map(|k| (k, ())).collect();
    assert_eq!(set.range(5..2).count(), 0);
    assert_eq!(set.remove_range(5..2), 0);
    assert_eq!(set.len(), 3);

    Ok(())
}

/// Fails every allocation once `remaining` reaches zero.
struct FailingAllocator {
    inner: CountingAllocator<Global>,
    remaining: Cell<usize>,
}

impl FailingAllocator {
    fn new(remaining: usize) -> Self {
        Self {
            inner: CountingAllocator::default(),
            remaining: Cell::new(remaining),
        }
    }
}

unsafe impl Allocator for FailingAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        match self.remaining.get() {
            0 => Err(AllocError),
            n => {
                self.remaining.set(n - 1);
                self.inner.allocate(layout)
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { self.inner.deallocate(ptr, layout) }
    }
}

#[test]
fn test_insert_allocation_failure() -> Result<(), Box<dyn Error>> {
    // two sentinels and ten nodes
    let alloc = FailingAllocator::new(12);
    let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

    unsafe {
        for k in 0..10 {
            tree.insert_in(&alloc, k * 2, k)?;
        }

        assert!(tree.insert_in(&alloc, 7, 7).is_err());
        assert!(tree.insert_in(&alloc, 100, 100).is_err());
    }
    assert_eq!(tree.len(), 10);
    assert_equal(tree.iter().map(|(k, v)| (*k, *v)), (0..10).map(|k| (k * 2, k)));
    tree.check_structure();

    unsafe {
        // an existing key needs no allocation
        let (cursor, inserted) = tree.insert_in(&alloc, 4, 0)?;
        assert!(!inserted);
        assert_eq!(cursor.value(), Some(&2));

        let mut cursor = tree.find_mut_in(&alloc, &6);
        assert!(cursor.insert(7, 7).is_err());
        assert_eq!(cursor.key(), Some(&6));
    }
    assert_eq!(tree.len(), 10);
    assert!(!tree.contains_key(&7));
    tree.check_structure();

    unsafe {
        assert_eq!(tree.remove_in(&alloc, &0), Some((0, 0)));
    }
    tree.check_structure();

    core::mem::drop(tree);
    assert_eq!(alloc.inner.net_allocations(), 0);
    assert_eq!(alloc.inner.n_allocations(), 12);

    Ok(())
}

#[test]
fn test_pop() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree: DropGuard<AllocatedAvlTree<u32, u32>, _> =
        (1..=9).map(|k| (k, k * k)).collect_in(&alloc)?;

    unsafe {
        assert_eq!(tree.pop_first_in(&alloc), Some((1, 1)));
        assert_eq!(tree.pop_last_in(&alloc), Some((9, 81)));
        tree.check_structure();
    }
    assert_eq!(tree.first_key_value(), Some((&2, &4)));
    assert_eq!(tree.last_key_value(), Some((&8, &64)));

    core::mem::drop(tree);
    _assert_allocations(alloc, 9);

    Ok(())
}

#[test]
fn test_clear_in() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree: DropGuard<AllocatedAvlTree<u32, u32>, _> =
        (1..=7).map(|k| (k, k * k)).collect_in(&alloc)?;

    unsafe {
        tree.clear_in(&alloc);
    }

    assert!(tree.is_empty());
    assert!(tree.begin() == tree.end());
    tree.check_structure();
    // only the sentinels are left
    assert_eq!(alloc.net_allocations(), 2);

    unsafe {
        tree.insert_in(&alloc, 3, 9)?;
    }
    assert_equal(tree.keys().copied(), [3]);

    core::mem::drop(tree);
    _assert_allocations(alloc, 8);

    Ok(())
}

#[test]
fn test_into_iter() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let tree: DropGuard<AllocatedAvlTree<u32, String>, _> =
        (1..=5).map(|k| (k, k.to_string())).collect_in(&alloc)?;

    unsafe {
        assert_equal(
            ManuallyDrop::into_inner(tree.into_inner()).into_iter_in(&alloc),
            (1..=5).map(|k| (k, k.to_string())),
        );
    }
    _assert_freed(&alloc, 5);

    let alloc = CountingAllocator::default();
    let tree: DropGuard<AllocatedAvlTree<u32, String>, _> =
        (1..=5).map(|k| (k, k.to_string())).collect_in(&alloc)?;

    unsafe {
        let mut iter = ManuallyDrop::into_inner(tree.into_inner()).into_iter_in(&alloc);
        assert_eq!(iter.len(), 5);
        assert_eq!(iter.next(), Some((1, "1".to_string())));
        assert_eq!(iter.next_back(), Some((5, "5".to_string())));
        // the rest is freed with the iterator
    }
    _assert_freed(&alloc, 5);

    Ok(())
}

#[test]
fn test_values_mut() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree: DropGuard<AllocatedAvlTree<u32, u32>, _> =
        (1..=5).map(|k| (k, k)).collect_in(&alloc)?;

    for v in tree.values_mut() {
        *v *= 10;
    }
    *tree.get_mut(&3).unwrap() += 1;
    assert_eq!(tree.get_mut(&6), None);

    assert_equal(tree.values().copied(), [10, 20, 31, 40, 50]);
    assert_equal(tree.values().rev().copied(), [50, 40, 31, 20, 10]);

    core::mem::drop(tree);
    _assert_allocations(alloc, 5);

    Ok(())
}

#[test]
fn test_borrowed_lookup() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let tree: DropGuard<AllocatedAvlTree<String, usize>, _> = ["pear", "apple", "fig"]
        .into_iter()
        .map(|s| (s.to_string(), s.len()))
        .collect_in(&alloc)?;

    assert_eq!(tree.get("fig"), Some(&3));
    assert_eq!(tree.get_key_value("apple"), Some((&"apple".to_string(), &5)));
    assert!(!tree.contains_key("plum"));
    assert_equal(tree.keys().map(String::as_str), ["apple", "fig", "pear"]);

    Ok(())
}

#[test]
fn test_custom_compare() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut tree =
        AllocatedAvlTree::<u32, (), Unique, _>::with_compare_in(&alloc, |a: &u32, b: &u32| {
            b.cmp(a)
        })?;

    unsafe {
        for k in [3, 1, 4, 1, 5, 9, 2, 6] {
            tree.insert_in(&alloc, k, ())?;
        }
    }

    tree.check_structure();
    assert_equal(tree.keys().copied(), [9, 6, 5, 4, 3, 2, 1]);
    assert_eq!(tree.lower_bound(&7).key(), Some(&6));
    assert_eq!(tree.comparator().compare(&1, &2), Ordering::Greater);

    Ok(())
}

#[test]
fn test_swap() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let mut a: DropGuard<AllocatedAvlTree<u32, u32>, _> =
        (1..=3).map(|k| (k, k)).collect_in(&alloc)?;
    let mut b: DropGuard<AllocatedAvlTree<u32, u32>, _> =
        (10..=15).map(|k| (k, k)).collect_in(&alloc)?;

    AllocatedAvlTree::swap(&mut a, &mut b);

    assert_equal(a.keys().copied(), 10..=15);
    assert_equal(b.keys().copied(), 1..=3);
    assert_eq!(a.len(), 6);
    assert_eq!(b.len(), 3);
    a.check_structure();
    b.check_structure();

    core::mem::drop(a);
    core::mem::drop(b);
    assert_eq!(alloc.net_allocations(), 0);

    Ok(())
}

#[test]
fn test_eq_ord() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let build = |keys: &[u32]| -> Result<DropGuard<AllocatedAvlTree<u32, ()>, _>, Box<dyn Error>> {
        Ok(keys.iter().map(|k| (*k, ())).collect_in(&alloc)?)
    };

    let a = build(&[1, 2, 3])?;
    let b = build(&[3, 2, 1])?;
    let c = build(&[1, 2, 4])?;
    let d = build(&[1, 2])?;

    assert!(*a == *b);
    assert!(*a != *c);
    assert!(*a != *d);
    assert!(*a < *c);
    assert!(*d < *a);
    assert_eq!((*c).cmp(&*d), Ordering::Greater);

    Ok(())
}

#[test]
fn test_debug() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let tree: DropGuard<AllocatedAvlTree<u32, char>, _> =
        [(2, 'b'), (1, 'a')].into_iter().collect_in(&alloc)?;

    assert_eq!(std::format!("{:?}", *tree), "{1: 'a', 2: 'b'}");
    assert_eq!(std::format!("{:?}", tree.begin()), "Cursor(Some((1, 'a')))");
    assert_eq!(std::format!("{:?}", tree.end()), "Cursor(None)");

    Ok(())
}

#[cfg(feature = "std")]
#[test]
fn test_to_dot() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();
    let tree: DropGuard<AllocatedAvlTree<u32, u32>, _> =
        (1..=3).map(|k| (k, k)).collect_in(&alloc)?;

    let dot = tree.to_dot()?;
    assert!(dot.starts_with("digraph G {\n"));
    assert_eq!(dot.matches("->").count(), 2);
    assert_eq!(dot.matches("shape=\"record\"").count(), 3);

    Ok(())
}

#[test]
fn test_wrapper() -> Result<(), Box<dyn Error>> {
    let alloc = CountingAllocator::default();

    {
        let mut map = AvlTree::<u32, &str, Unique, Natural, _>::new_in(&alloc)?;
        map.insert(2, "two")?;
        map.insert(1, "one")?;
        let (_, inserted) = map.insert(1, "uno")?;
        assert!(!inserted);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1), Some(&"one"));
        assert_eq!(map.remove(&2), Some((2, "two")));
        assert_eq!(map.remove(&2), None);

        let mut cursor = map.end_mut();
        assert!(cursor.insert(3, "three")?);
        assert_equal(map.iter().map(|(k, v)| (*k, *v)), vec![(1, "one"), (3, "three")]);
    }

    assert_eq!(alloc.net_allocations(), 0);
    assert_eq!(alloc.net_bytes_allocated(), 0);

    Ok(())
}

#[test]
fn test_wrapper_aliases() -> Result<(), Box<dyn Error>> {
    let mut set = AvlSet::new();
    let mut multiset = AvlMultiSet::new();
    for k in [4, 2, 4, 1] {
        set.insert(k, ())?;
        multiset.insert(k, ())?;
    }
    assert_equal(set.keys().copied(), [1, 2, 4]);
    assert_equal(multiset.keys().copied(), [1, 2, 4, 4]);
    assert_eq!(multiset.remove_all(&4), 2);
    assert_eq!(multiset.remove_range(0..2), 1);
    assert_equal(multiset.keys().copied(), [2]);

    let mut a: AvlMap<u32, u32> = (0..10).map(|k| (k, k)).collect();
    let mut b: AvlMap<u32, u32> = (0..3).map(|k| (k, k)).collect();
    assert!(b < a);
    a.swap(&mut b);
    assert!(a < b);
    assert_eq!(a.len(), 3);
    assert_eq!(b.pop_last(), Some((9, 9)));

    let mut multimap = AvlMultiMap::new();
    multimap.insert("k", 1)?;
    multimap.insert("k", 2)?;
    assert_equal(multimap.equal_range("k").map(|(_, v)| *v), [1, 2]);
    multimap.clear();
    assert!(multimap.is_empty());

    Ok(())
}

proptest! {
    #[test]
    fn test_uints(mut map in prop::collection::vec((0..1000u32, 0..1000u32), 1..100)) {
        let alloc = CountingAllocator::default();
        let tree: DropGuard::<AllocatedAvlTree::<u32, u32>, _> = map.iter().copied().collect_in(&alloc)?;

        // first insert of each key wins
        map.sort_by(|a, b| a.0.cmp(&b.0));
        let map: Vec<_> = map.into_iter().unique_by(|v| v.0).collect();

        assert_eq!(tree.len(), map.len());
        assert_equal(tree.iter().map(|(k, _)| *k), map.iter().map(|(k, _)| *k));
        tree.check_structure();
        assert!(tree.height().unwrap() <= max_height(tree.len()));

        core::mem::drop(tree);

        assert_eq!(alloc.net_allocations(), 0);
        assert_eq!(alloc.net_bytes_allocated(), 0);
    }
}

proptest! {
    #[test]
    fn test_strings(mut keys in prop::collection::vec(".*", 1..100)) {
        let alloc = CountingAllocator::default();
        let tree: DropGuard::<AllocatedAvlTree::<String, ()>, _> = keys.iter().map(|s| (s.clone(), ())).collect_in(&alloc)?;

        keys.sort();
        let keys: Vec<_> = keys.into_iter().unique().collect();

        assert_eq!(tree.len(), keys.len());
        for k in &keys {
            assert!(tree.contains_key(k.as_str()));
        }

        core::mem::drop(tree);

        assert_eq!(alloc.net_allocations(), 0);
        assert_eq!(alloc.net_bytes_allocated(), 0);
    }
}

proptest! {
    #[test]
    fn test_insert_remove_all(keys in prop::collection::vec(0..1000u32, 1..200)) {
        let alloc = CountingAllocator::default();
        let mut tree = AllocatedAvlTree::<u32, u32>::new_in(&alloc)?;

        for k in &keys {
            unsafe {
                tree.insert_in(&alloc, *k, *k)?;
            }
        }
        let unique: Vec<_> = keys.iter().copied().sorted().dedup().collect();
        assert_eq!(tree.len(), unique.len());

        for k in keys.iter().rev() {
            unsafe {
                tree.remove_in(&alloc, k);
            }
            tree.check_structure();
        }

        assert!(tree.is_empty());
        assert!(tree.begin() == tree.end());
        // only the sentinels are left until the tree is dropped
        assert_eq!(alloc.net_allocations(), 2);

        core::mem::drop(tree);
        assert_eq!(alloc.net_allocations(), 0);
    }
}

#[derive(Clone, Debug)]
enum Op {
    Insert(u8, u32),
    Remove(u8),
    RemoveRange(u8, u8),
    PopFirst,
    PopLast,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..64u8, any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        2 => (0..64u8).prop_map(Op::Remove),
        1 => (0..64u8, 0..64u8).prop_map(|(a, b)| Op::RemoveRange(a, b)),
        1 => Just(Op::PopFirst),
        1 => Just(Op::PopLast),
    ]
}

proptest! {
    #[test]
    fn test_unique_against_btreemap(ops in prop::collection::vec(op_strategy(), 1..300)) {
        let alloc = CountingAllocator::default();
        let mut tree = AllocatedAvlTree::<u8, u32>::new_in(&alloc)?;
        let mut model = BTreeMap::new();

        for op in &ops {
            unsafe {
                match *op {
                    Op::Insert(k, v) => {
                        let (cursor, inserted) = tree.insert_in(&alloc, k, v)?;
                        assert_eq!(inserted, !model.contains_key(&k));
                        assert_eq!(cursor.key(), Some(&k));
                        model.entry(k).or_insert(v);
                    }
                    Op::Remove(k) => {
                        assert_eq!(tree.remove_in(&alloc, &k), model.remove_entry(&k));
                    }
                    Op::RemoveRange(a, b) => {
                        let expected: Vec<_> = if a <= b {
                            model.range(a..b).map(|(k, _)| *k).collect()
                        } else {
                            Vec::new()
                        };
                        for k in &expected {
                            model.remove(k);
                        }
                        assert_eq!(tree.remove_range_in(&alloc, a..b), expected.len());
                    }
                    Op::PopFirst => assert_eq!(tree.pop_first_in(&alloc), model.pop_first()),
                    Op::PopLast => assert_eq!(tree.pop_last_in(&alloc), model.pop_last()),
                }
            }

            tree.check_structure();
            assert_eq!(tree.len(), model.len());
        }

        assert_equal(tree.iter(), model.iter());
        assert_equal(tree.iter().rev(), model.iter().rev());
        assert_eq!(tree.first_key_value(), model.first_key_value());
        assert_eq!(tree.last_key_value(), model.last_key_value());
        if let Some(h) = tree.height() {
            assert!(h <= max_height(tree.len()));
        }

        core::mem::drop(tree);
        assert_eq!(alloc.net_allocations(), 0);
        assert_eq!(alloc.net_bytes_allocated(), 0);
    }
}

proptest! {
    #[test]
    fn test_multi_against_sorted_vec(ops in prop::collection::vec(op_strategy(), 1..300)) {
        let alloc = CountingAllocator::default();
        let mut tree = AllocatedAvlTree::<u8, u32, Multi>::new_in(&alloc)?;
        let mut model: Vec<(u8, u32)> = Vec::new();

        for op in &ops {
            unsafe {
                match *op {
                    Op::Insert(k, v) => {
                        let (_, inserted) = tree.insert_in(&alloc, k, v)?;
                        assert!(inserted);
                        let at = model.partition_point(|(mk, _)| *mk <= k);
                        model.insert(at, (k, v));
                    }
                    Op::Remove(k) => {
                        let at = model.partition_point(|(mk, _)| *mk < k);
                        let expected = (model.get(at).map(|(mk, _)| *mk) == Some(k))
                            .then(|| model.remove(at));
                        assert_eq!(tree.remove_in(&alloc, &k), expected);
                    }
                    Op::RemoveRange(a, b) => {
                        let before = model.len();
                        model.retain(|(k, _)| !(a <= b && (a..b).contains(k)));
                        assert_eq!(tree.remove_range_in(&alloc, a..b), before - model.len());
                    }
                    Op::PopFirst => {
                        let expected = (!model.is_empty()).then(|| model.remove(0));
                        assert_eq!(tree.pop_first_in(&alloc), expected);
                    }
                    Op::PopLast => assert_eq!(tree.pop_last_in(&alloc), model.pop()),
                }
            }

            tree.check_structure();
            assert_eq!(tree.len(), model.len());
        }

        assert_equal(tree.iter().map(|(k, v)| (*k, *v)), model.iter().copied());
        for k in 0..64u8 {
            assert_eq!(tree.count(&k), model.iter().filter(|(mk, _)| *mk == k).count());
        }

        core::mem::drop(tree);
        assert_eq!(alloc.net_allocations(), 0);
    }
}

/// Largest height (in edges) an AVL tree with `n` nodes can have: the
/// sparsest tree of height `h` has `N(h) = N(h - 1) + N(h - 2) + 1` nodes.
fn max_height(n: usize) -> usize {
    let (mut sparsest, mut next, mut h) = (1, 2, 0);
    while next <= n {
        (sparsest, next) = (next, next + sparsest + 1);
        h += 1;
    }
    h
}

fn _assert_freed<A: Allocator>(alloc: &CountingAllocator<A>, n_nodes: usize) {
    // every tree also allocates its two sentinels
    let n = n_nodes + 2;
    assert_eq!(alloc.net_allocations(), 0);
    assert_eq!(alloc.net_bytes_allocated(), 0);
    assert_eq!(alloc.n_allocations(), n);
    assert_eq!(alloc.n_deallocations(), n);
}

fn _assert_allocations<A: Allocator>(alloc: CountingAllocator<A>, n_nodes: usize) {
    _assert_freed(&alloc, n_nodes);
    let n = n_nodes + 2;
    assert_eq!(alloc.n_bytes_allocated(), n * size_of::<Node<u32, u32>>());
    assert_eq!(alloc.n_bytes_deallocated(), n * size_of::<Node<u32, u32>>());
}
