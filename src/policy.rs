//! Key multiplicity policies.
//!
//! A tree is parameterised by one of these marker types. [`Unique`] trees keep
//! at most one element per key; [`Multi`] trees accept any number of elements
//! comparing equal and keep them adjacent in iteration order.

mod private {
    pub trait Sealed {}

    impl Sealed for super::Unique {}
    impl Sealed for super::Multi {}
}

/// Decides what happens when an inserted key compares equal to a stored one.
pub trait Multiplicity: private::Sealed {
    /// Whether equal keys may coexist in the tree.
    const ALLOW_DUPLICATES: bool;
}

/// At most one element per key. Inserting an existing key is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unique {}

/// Any number of elements per key. An equal key is placed after the existing
/// run of equal keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Multi {}

impl Multiplicity for Unique {
    const ALLOW_DUPLICATES: bool = false;
}

impl Multiplicity for Multi {
    const ALLOW_DUPLICATES: bool = true;
}
