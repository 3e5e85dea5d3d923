use core::fmt;
use core::mem;
use core::mem::MaybeUninit;
use core::ptr;
use core::ptr::NonNull;

#[cfg(feature = "std")]
use alloc::boxed::Box;
#[cfg(feature = "std")]
use alloc::format;
#[cfg(feature = "std")]
use alloc::vec::Vec;
#[cfg(feature = "std")]
use std::error::Error;
#[cfg(feature = "std")]
use std::io::Write;

use allocator_api2::alloc::{Allocator, Layout};

use crate::tracing_helpers::trace_log;

pub(crate) type Link<K, V> = Option<NonNull<Node<K, V>>>;

/// Which child slot of a parent a new node is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

/// A parent node and the empty child slot a new leaf goes into. `None` means
/// the tree is empty and the leaf becomes the root.
pub(crate) type Slot<K, V> = Option<(NonNull<Node<K, V>>, Side)>;

/// A single tree element.
///
/// `left` and `right` own their targets; `parent` is a back reference that is
/// never freed through. Sentinel nodes reuse this layout with an
/// uninitialised payload.
pub struct Node<K, V> {
    key: MaybeUninit<K>,
    value: MaybeUninit<V>,
    pub(crate) left: Link<K, V>,
    pub(crate) right: Link<K, V>,
    pub(crate) parent: Link<K, V>,
    /// Height of the subtree rooted here; a leaf is 0, an empty subtree -1.
    pub(crate) height: i32,
}

impl<K, V> fmt::Debug for Node<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("key", &"**UNKNOWN**")
            .field("value", &"**UNKNOWN**")
            .field("left", &self.left)
            .field("right", &self.right)
            .field("parent", &self.parent)
            .field("height", &self.height)
            .finish()
    }
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(key: K, value: V) -> Self {
        Node {
            key: MaybeUninit::new(key),
            value: MaybeUninit::new(value),
            left: None,
            right: None,
            parent: None,
            height: 0,
        }
    }

    pub(crate) fn sentinel() -> Self {
        Node {
            key: MaybeUninit::uninit(),
            value: MaybeUninit::uninit(),
            left: None,
            right: None,
            parent: None,
            height: -1,
        }
    }

    /// # Safety
    ///
    /// `self` must not be a sentinel.
    pub(crate) unsafe fn key(&self) -> &K {
        // SAFETY: real nodes always hold an initialised key
        unsafe { self.key.assume_init_ref() }
    }

    /// # Safety
    ///
    /// `self` must not be a sentinel.
    pub(crate) unsafe fn value(&self) -> &V {
        // SAFETY: real nodes always hold an initialised value
        unsafe { self.value.assume_init_ref() }
    }

    /// # Safety
    ///
    /// `self` must not be a sentinel.
    pub(crate) unsafe fn value_mut(&mut self) -> &mut V {
        // SAFETY: real nodes always hold an initialised value
        unsafe { self.value.assume_init_mut() }
    }

    /// Exchanges the payloads of two real nodes, leaving their links alone.
    pub(crate) fn swap_payload(&mut self, other: &mut Self) {
        mem::swap(&mut self.key, &mut other.key);
        mem::swap(&mut self.value, &mut other.value);
    }

    /// Moves the payload out of a real node.
    ///
    /// # Safety
    ///
    /// `self` must not be a sentinel, and the payload must not be read again.
    pub(crate) unsafe fn take_key_value(&mut self) -> (K, V) {
        // SAFETY: real nodes hold an initialised payload; caller forgets it afterwards
        let key = unsafe { self.key.assume_init_read() };
        // SAFETY: as above
        let value = unsafe { self.value.assume_init_read() };
        (key, value)
    }

    /// Drops the payload of a real node in place.
    ///
    /// # Safety
    ///
    /// `self` must not be a sentinel, and the payload must not be read again.
    unsafe fn drop_payload(&mut self) {
        // SAFETY: real nodes hold an initialised payload; caller forgets it afterwards
        unsafe {
            self.key.assume_init_drop();
            self.value.assume_init_drop();
        }
    }
}

/// # Safety
///
/// `link` must be `None` or point to a live node.
#[inline]
pub(crate) unsafe fn height<K, V>(link: Link<K, V>) -> i32 {
    // SAFETY: caller guarantees the pointer is live
    link.map_or(-1, |n| unsafe { n.as_ref().height })
}

/// # Safety
///
/// `n` must be a live real node whose children are real or `None`.
#[inline]
unsafe fn update_height<K, V>(mut n: NonNull<Node<K, V>>) {
    // SAFETY: caller guarantees `n` and its children are live
    unsafe {
        let node = n.as_mut();
        node.height = 1 + height(node.left).max(height(node.right));
    }
}

/// `height(right) - height(left)`.
///
/// # Safety
///
/// `n` must be a live real node whose children are real or `None`.
#[inline]
pub(crate) unsafe fn balance_factor<K, V>(n: NonNull<Node<K, V>>) -> i32 {
    // SAFETY: caller guarantees `n` and its children are live
    unsafe {
        let node = n.as_ref();
        height(node.right) - height(node.left)
    }
}

/// Points whichever link referred to `old` (its parent's child slot, or the
/// root) at `new`.
///
/// # Safety
///
/// `parent` must be `old`'s parent and live.
pub(crate) unsafe fn replace_child<K, V>(
    root: &mut Link<K, V>,
    parent: Link<K, V>,
    old: NonNull<Node<K, V>>,
    new: Link<K, V>,
) {
    match parent {
        None => *root = new,
        Some(mut p) => {
            // SAFETY: caller guarantees `parent` is live
            let p = unsafe { p.as_mut() };
            if p.left == Some(old) {
                p.left = new;
            } else {
                p.right = new;
            }
        }
    }
}

/// Rotates `x` left: its right child takes its place and `x` becomes that
/// child's left child. Returns the new subtree root.
///
/// # Safety
///
/// `x` must be a live real node with a right child, and the sentinels must be
/// detached.
unsafe fn rotate_left<K, V>(
    root: &mut Link<K, V>,
    mut x: NonNull<Node<K, V>>,
) -> NonNull<Node<K, V>> {
    // SAFETY: caller guarantees `x`, its right child and their neighbours are live
    unsafe {
        let Some(mut y) = x.as_ref().right else {
            return x;
        };
        trace_log!(height = x.as_ref().height, "rotate left");

        let parent = x.as_ref().parent;
        let inner = y.as_ref().left;

        x.as_mut().right = inner;
        if let Some(mut inner) = inner {
            inner.as_mut().parent = Some(x);
        }

        y.as_mut().left = Some(x);
        x.as_mut().parent = Some(y);
        y.as_mut().parent = parent;
        replace_child(root, parent, x, Some(y));

        update_height(x);
        update_height(y);
        y
    }
}

/// Mirror image of [`rotate_left`].
///
/// # Safety
///
/// `y` must be a live real node with a left child, and the sentinels must be
/// detached.
unsafe fn rotate_right<K, V>(
    root: &mut Link<K, V>,
    mut y: NonNull<Node<K, V>>,
) -> NonNull<Node<K, V>> {
    // SAFETY: caller guarantees `y`, its left child and their neighbours are live
    unsafe {
        let Some(mut x) = y.as_ref().left else {
            return y;
        };
        trace_log!(height = y.as_ref().height, "rotate right");

        let parent = y.as_ref().parent;
        let inner = x.as_ref().right;

        y.as_mut().left = inner;
        if let Some(mut inner) = inner {
            inner.as_mut().parent = Some(y);
        }

        x.as_mut().right = Some(y);
        y.as_mut().parent = Some(x);
        x.as_mut().parent = parent;
        replace_child(root, parent, y, Some(x));

        update_height(y);
        update_height(x);
        x
    }
}

/// Refreshes the height of `n` and restores its balance with one single or
/// double rotation if needed. Returns the root of the (possibly new) subtree
/// and whether a rotation happened.
///
/// # Safety
///
/// `n` must be a live real node and the sentinels must be detached.
unsafe fn rebalance_at<K, V>(
    root: &mut Link<K, V>,
    n: NonNull<Node<K, V>>,
) -> (NonNull<Node<K, V>>, bool) {
    // SAFETY: caller guarantees `n` is live; rotations only touch its subtree
    unsafe {
        update_height(n);
        match balance_factor(n) {
            2 => {
                if let Some(r) = n.as_ref().right {
                    if balance_factor(r) < 0 {
                        rotate_right(root, r);
                    }
                }
                (rotate_left(root, n), true)
            }
            -2 => {
                if let Some(l) = n.as_ref().left {
                    if balance_factor(l) > 0 {
                        rotate_left(root, l);
                    }
                }
                (rotate_right(root, n), true)
            }
            bf => {
                debug_assert!((-1..=1).contains(&bf));
                (n, false)
            }
        }
    }
}

/// Walks from `start` up to the root, refreshing heights and rotating
/// wherever a node has become unbalanced.
///
/// After a single insertion one rotation restores the height the subtree had
/// before, so the walk may stop there (`stop_after_rotation`). After a
/// removal a rotation can shorten the subtree and unbalance an ancestor, so
/// every level has to be visited.
///
/// # Safety
///
/// `start` must be `None` or a live real node of the tree rooted at `root`,
/// and the sentinels must be detached.
pub(crate) unsafe fn rebalance<K, V>(
    root: &mut Link<K, V>,
    start: Link<K, V>,
    stop_after_rotation: bool,
) {
    let mut cur = start;
    while let Some(n) = cur {
        // SAFETY: `n` is on the path to the root, so it's live
        let (top, rotated) = unsafe { rebalance_at(root, n) };
        if rotated && stop_after_rotation {
            break;
        }
        // SAFETY: `top` was just returned as a live subtree root
        cur = unsafe { top.as_ref().parent };
    }
}

/// Leftmost node of the subtree at `n`.
///
/// # Safety
///
/// `n` must be live. If the sentinels are attached and `n` lies on the left
/// spine of the tree, the result is the low sentinel.
pub(crate) unsafe fn leftmost<K, V>(mut n: NonNull<Node<K, V>>) -> NonNull<Node<K, V>> {
    // SAFETY: caller guarantees every node on the path is live
    while let Some(l) = unsafe { n.as_ref().left } {
        n = l;
    }
    n
}

/// Rightmost node of the subtree at `n`.
///
/// # Safety
///
/// See [`leftmost`].
pub(crate) unsafe fn rightmost<K, V>(mut n: NonNull<Node<K, V>>) -> NonNull<Node<K, V>> {
    // SAFETY: caller guarantees every node on the path is live
    while let Some(r) = unsafe { n.as_ref().right } {
        n = r;
    }
    n
}

/// In-order successor of `n`, with the sentinels attached.
///
/// The maximum's successor is the high sentinel because it hangs off the
/// maximum as a right child; the low sentinel's successor is the minimum (or
/// the high sentinel when the tree is empty) through its parent link.
/// Returns `None` only when called on the high sentinel.
///
/// # Safety
///
/// `n` must be a live node of a tree whose sentinels are attached.
pub(crate) unsafe fn next_node<K, V>(n: NonNull<Node<K, V>>) -> Link<K, V> {
    // SAFETY: caller guarantees the tree is intact
    unsafe {
        if let Some(r) = n.as_ref().right {
            return Some(leftmost(r));
        }

        let mut cur = n;
        loop {
            let p = cur.as_ref().parent?;
            if p.as_ref().right == Some(cur) {
                cur = p;
            } else {
                return Some(p);
            }
        }
    }
}

/// In-order predecessor of `n`, with the sentinels attached. Mirror image of
/// [`next_node`]; returns `None` only when called on the low sentinel.
///
/// # Safety
///
/// `n` must be a live node of a tree whose sentinels are attached.
pub(crate) unsafe fn prev_node<K, V>(n: NonNull<Node<K, V>>) -> Link<K, V> {
    // SAFETY: caller guarantees the tree is intact
    unsafe {
        if let Some(l) = n.as_ref().left {
            return Some(rightmost(l));
        }

        let mut cur = n;
        loop {
            let p = cur.as_ref().parent?;
            if p.as_ref().left == Some(cur) {
                cur = p;
            } else {
                return Some(p);
            }
        }
    }
}

/// Frees a node's memory without touching its payload.
///
/// # Safety
///
/// `n` must have been allocated by `alloc` as a `Node<K, V>` and must not be
/// used afterwards.
pub(crate) unsafe fn deallocate_in<K, V, A: Allocator>(alloc: &A, n: NonNull<Node<K, V>>) {
    // SAFETY: caller guarantees `n` came from `alloc` with this layout
    unsafe {
        alloc.deallocate(n.cast(), Layout::new::<Node<K, V>>());
    }
}

/// Moves the payload out of a real node and frees the node.
///
/// # Safety
///
/// As for [`deallocate_in`], and `n` must not be a sentinel.
pub(crate) unsafe fn take_in<K, V, A: Allocator>(alloc: &A, n: NonNull<Node<K, V>>) -> (K, V) {
    // SAFETY: caller guarantees `n` is a live real node owned by `alloc`
    unsafe {
        let mut node = ptr::read(n.as_ptr());
        deallocate_in(alloc, n);
        node.take_key_value()
    }
}

/// Drops and frees every node of the subtree at `root`, children before
/// parents, without recursion.
///
/// # Safety
///
/// Every node of the subtree must be a real node allocated by `alloc`, and the
/// sentinels must be detached.
pub(crate) unsafe fn drop_subtree_in<K, V, A: Allocator>(alloc: &A, root: Link<K, V>) {
    let mut cur = root;
    while let Some(mut n) = cur {
        // SAFETY: `n` is live until it is freed below; children are unlinked
        // before we descend so nothing is visited twice.
        unsafe {
            let node = n.as_mut();
            if let Some(l) = node.left.take() {
                cur = Some(l);
                continue;
            }
            if let Some(r) = node.right.take() {
                cur = Some(r);
                continue;
            }

            cur = node.parent;
            node.drop_payload();
            deallocate_in(alloc, n);
        }
    }
}

#[cfg(feature = "std")]
impl<K: fmt::Debug, V: fmt::Debug> Node<K, V> {
    /// # Safety
    ///
    /// `self` must be a real node of a tree whose sentinels are detached or
    /// filtered out through `is_sentinel`.
    pub(crate) unsafe fn to_dot(
        &self,
        data: &mut Vec<u8>,
        is_sentinel: &dyn Fn(NonNull<Self>) -> bool,
    ) -> Result<(), Box<dyn Error>> {
        let this = core::ptr::from_ref(self);
        // SAFETY: caller guarantees `self` is a real node
        let (key, value) = unsafe { (self.key(), self.value()) };
        data.write_all(
            format!(
                "\"p{:?}\" [shape=\"record\"; label=\"{{{:?}|{:?}}}|h={}\"];\n",
                this, key, value, self.height
            )
            .as_bytes(),
        )?;

        for child in [self.left, self.right].into_iter().flatten() {
            if is_sentinel(child) {
                continue;
            }
            data.write_all(format!("\"p{:?}\" -> \"p{:?}\";\n", this, child.as_ptr()).as_bytes())?;
            // SAFETY: non-sentinel children are live real nodes
            unsafe { child.as_ref().to_dot(data, is_sentinel)? };
        }

        Ok(())
    }
}
