//! Type-safe, generation-counted handles for renderer objects.
//!
//! Handles are how the host refers to renderer-owned resources
//! (textures) and how internal caches address their slots. They
//! provide:
//!
//! - **Type safety**: a handle is generic over a marker type, so a
//!   texture handle cannot be passed where a shader slot is expected.
//! - **Generation counting**: each slot carries a generation that is
//!   bumped on free, so a stale handle to a recycled slot is detected
//!   instead of aliasing the new occupant (the ABA problem).
//!
//! Generation 0 is reserved for the never-allocated [`Handle::INVALID`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A typed generational handle: `(index, generation)`.
#[repr(C)]
pub struct Handle<M> {
    index: u32,
    generation: u32,
    _marker: PhantomData<M>,
}

impl<M> Handle<M> {
    /// Sentinel handle that never refers to a live slot.
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
        _marker: PhantomData,
    };

    /// Creates a handle from raw parts. Normally only the allocator
    /// does this; tests construct handles directly.
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index of this handle.
    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Generation this handle was minted with.
    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Whether this handle could refer to a live slot (generation 0
    /// never does). Liveness proper is the allocator's call.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.generation != 0
    }
}

// Manual impls: derived ones would bound on `M`, which is only a marker.

impl<M> Clone for Handle<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for Handle<M> {}

impl<M> PartialEq for Handle<M> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<M> Eq for Handle<M> {}

impl<M> Hash for Handle<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<M> fmt::Debug for Handle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

/// Generational slot allocator with free-list recycling.
///
/// Allocation, deallocation and liveness checks are all O(1). A slot's
/// generation starts at 1 and is incremented when the slot is freed,
/// invalidating every outstanding handle to the previous occupant.
pub struct HandleAllocator<M> {
    generations: Vec<u32>,
    free_list: Vec<u32>,
    _marker: PhantomData<M>,
}

impl<M> HandleAllocator<M> {
    /// Creates an empty allocator.
    pub fn new() -> Self {
        Self {
            generations: Vec::new(),
            free_list: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Allocates a handle, recycling a freed slot when one exists.
    pub fn allocate(&mut self) -> Handle<M> {
        if let Some(index) = self.free_list.pop() {
            Handle::new(index, self.generations[index as usize])
        } else {
            let index = self.generations.len() as u32;
            self.generations.push(1);
            Handle::new(index, 1)
        }
    }

    /// Frees `handle`'s slot. Returns `false` for stale or invalid
    /// handles, in which case nothing changes.
    pub fn deallocate(&mut self, handle: Handle<M>) -> bool {
        if !self.is_alive(handle) {
            return false;
        }
        let index = handle.index() as usize;
        self.generations[index] = self.generations[index].wrapping_add(1).max(1);
        self.free_list.push(handle.index());
        true
    }

    /// Whether `handle` refers to the current occupant of its slot.
    pub fn is_alive(&self, handle: Handle<M>) -> bool {
        handle.is_valid()
            && (handle.index() as usize) < self.generations.len()
            && self.generations[handle.index() as usize] == handle.generation()
            && !self.free_list.contains(&handle.index())
    }

    /// Number of slots ever created (live or free).
    pub fn slot_count(&self) -> usize {
        self.generations.len()
    }

    /// Number of currently live slots.
    pub fn live_count(&self) -> usize {
        self.generations.len() - self.free_list.len()
    }
}

impl<M> Default for HandleAllocator<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestMarker;

    #[test]
    fn invalid_handle_is_not_valid() {
        let h: Handle<TestMarker> = Handle::INVALID;
        assert!(!h.is_valid());
    }

    #[test]
    fn allocate_and_check_liveness() {
        let mut alloc: HandleAllocator<TestMarker> = HandleAllocator::new();
        let h1 = alloc.allocate();
        let h2 = alloc.allocate();
        assert!(alloc.is_alive(h1));
        assert!(alloc.is_alive(h2));
        assert_ne!(h1, h2);
        assert_eq!(alloc.live_count(), 2);
    }

    #[test]
    fn deallocate_invalidates_stale_handles() {
        let mut alloc: HandleAllocator<TestMarker> = HandleAllocator::new();
        let h1 = alloc.allocate();
        assert!(alloc.deallocate(h1));
        assert!(!alloc.is_alive(h1));
        // Double free is rejected.
        assert!(!alloc.deallocate(h1));

        // Slot reuse mints a new generation; the old handle stays dead.
        let h2 = alloc.allocate();
        assert_eq!(h2.index(), h1.index());
        assert_ne!(h2.generation(), h1.generation());
        assert!(alloc.is_alive(h2));
        assert!(!alloc.is_alive(h1));
    }

    #[test]
    fn handles_are_hashable_map_keys() {
        use std::collections::HashMap;
        let mut alloc: HandleAllocator<TestMarker> = HandleAllocator::new();
        let h = alloc.allocate();
        let mut map = HashMap::new();
        map.insert(h, 7);
        assert_eq!(map.get(&h), Some(&7));
    }
}
