//! An exclusively owned, growable arena of fixed-width storage units.
//!
//! Growth and truncation are two distinct operations, not one generic
//! resize: [`UnitArena::grow_zeroed`] reallocates and zero-fills the new
//! tail, while [`UnitArena::truncate_with_terminator`] stamps a zeroed
//! terminator unit in place without reallocating.

use bytemuck::{Pod, Zeroable};

/// A fixed-width storage element held by a [`UnitArena`].
///
/// Narrow streams store `u8` units, wide streams store `u16` units. The
/// `Pod` bound makes the zero fill and the terminator unit well defined
/// for any width.
pub trait Unit: Pod + 'static {}

impl Unit for u8 {}
impl Unit for u16 {}

/// An owned contiguous buffer of units with a valid size that may be
/// smaller than the underlying allocation.
///
/// The allocation keeps one extra slot past `size` after a growth or a
/// truncation, holding the terminator unit.
pub struct UnitArena<U: Unit> {
    storage: Vec<U>,
    /// Count of valid units, always `<= storage.len()`.
    size: usize,
}

impl<U: Unit> UnitArena<U> {
    /// Creates an arena with no allocation and size zero.
    pub fn new() -> UnitArena<U> {
        UnitArena {
            storage: Vec::new(),
            size: 0,
        }
    }

    /// Creates an arena holding an exact copy of `units`.
    pub fn from_units(units: &[U]) -> UnitArena<U> {
        UnitArena {
            storage: units.to_vec(),
            size: units.len(),
        }
    }

    /// Creates a zero-filled arena of `len` valid units (the allocation
    /// carries the extra terminator slot).
    pub fn zeroed(len: usize) -> UnitArena<U> {
        UnitArena {
            storage: vec![U::zeroed(); len + 1],
            size: len,
        }
    }

    /// Returns the number of valid units.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns true if the arena holds no valid units.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the length of the underlying allocation, which may exceed
    /// [`len`](UnitArena::len) by the terminator slot.
    #[inline]
    pub fn allocated_len(&self) -> usize {
        self.storage.len()
    }

    /// Returns the valid units as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[U] {
        &self.storage[..self.size]
    }

    /// Returns the valid units as a mutable slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [U] {
        &mut self.storage[..self.size]
    }

    /// Returns the entire allocation, including any terminator slot.
    #[inline]
    pub fn allocated(&self) -> &[U] {
        &self.storage
    }

    /// Grows the arena to `new_size` valid units: reallocates to
    /// `new_size + 1` slots, copies the existing units to the head and
    /// zero-fills the rest.
    pub fn grow_zeroed(&mut self, new_size: usize) {
        debug_assert!(new_size > self.size);
        let mut next = vec![U::zeroed(); new_size + 1];
        next[..self.size].copy_from_slice(self.as_slice());
        self.storage = next;
        self.size = new_size;
    }

    /// Truncates the arena to `new_size` valid units by stamping a zeroed
    /// terminator at index `new_size`, without reallocating when the
    /// allocation already has that slot.
    pub fn truncate_with_terminator(&mut self, new_size: usize) {
        debug_assert!(new_size <= self.size);
        if self.storage.len() <= new_size {
            // Exact-size allocation: make room for the terminator.
            self.storage.resize(new_size + 1, U::zeroed());
        } else {
            self.storage[new_size] = U::zeroed();
        }
        self.size = new_size;
    }
}

impl<U: Unit> Default for UnitArena<U> {
    fn default() -> Self {
        UnitArena::new()
    }
}

impl<U: Unit> AsRef<[U]> for UnitArena<U> {
    fn as_ref(&self) -> &[U] {
        self.as_slice()
    }
}

impl<U: Unit + std::fmt::Debug> std::fmt::Debug for UnitArena<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UnitArena").field(&self.as_slice()).finish()
    }
}
