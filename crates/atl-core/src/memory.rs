//! Memory Management
//!
//! Fixed-capacity pools for runtime records that are created and destroyed
//! at a high rate (audio objects, events, standalone files):
//! - Slots are preallocated up front and reused through a free list
//! - Handles carry a generation counter so stale references are detected
//! - Allocation statistics per pool

use std::sync::atomic::{AtomicUsize, Ordering};

/// Memory tracking statistics
#[derive(Debug, Default)]
pub struct MemoryStats {
    /// Slots currently in use
    pub allocated: AtomicUsize,
    /// Peak slots in use
    pub peak: AtomicUsize,
    /// Number of allocations over the pool lifetime
    pub allocation_count: AtomicUsize,
}

impl MemoryStats {
    /// Create new memory stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation
    pub fn record_alloc(&self, size: usize) {
        let new_size = self.allocated.fetch_add(size, Ordering::Relaxed) + size;
        self.allocation_count.fetch_add(1, Ordering::Relaxed);

        let mut peak = self.peak.load(Ordering::Relaxed);
        while new_size > peak {
            match self.peak.compare_exchange_weak(
                peak,
                new_size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
    }

    /// Record a deallocation
    pub fn record_dealloc(&self, size: usize) {
        self.allocated.fetch_sub(size, Ordering::Relaxed);
    }

    /// Get current usage
    pub fn current(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Get peak usage
    pub fn peak_usage(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Get total allocation count
    pub fn count(&self) -> usize {
        self.allocation_count.load(Ordering::Relaxed)
    }
}

/// Stable reference into a [`SlotPool`] with a generation counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotHandle {
    /// Slot index
    index: u32,
    /// Generation counter to detect stale references
    generation: u32,
}

impl SlotHandle {
    /// Create a new handle with the given index and generation
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Get the slot index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Get the slot generation
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Create a null handle (never valid)
    pub fn null() -> Self {
        Self {
            index: u32::MAX,
            generation: 0,
        }
    }

    /// Check if this is a null handle
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX
    }
}

impl Default for SlotHandle {
    fn default() -> Self {
        Self::null()
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Fixed-capacity pool of `T` addressed by generational handles
///
/// All slots are allocated when the pool is created. Removing a value
/// returns its slot to the free list and bumps the slot generation, so a
/// handle to the removed value never resolves to whatever reuses the slot.
pub struct SlotPool<T> {
    slots: Vec<Slot<T>>,
    /// Free slot indices, most recently freed last
    free_list: Vec<u32>,
    stats: MemoryStats,
}

impl<T> SlotPool<T> {
    /// Create a pool with room for `capacity` values
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize - 1);
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();
        // Reversed so the lowest index is handed out first
        let free_list = (0..capacity as u32).rev().collect();

        Self {
            slots,
            free_list,
            stats: MemoryStats::new(),
        }
    }

    /// Store a value, returning `None` when every slot is taken
    pub fn insert(&mut self, value: T) -> Option<SlotHandle> {
        let index = self.free_list.pop()?;
        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.stats.record_alloc(1);
        Some(SlotHandle::new(index, slot.generation))
    }

    /// Store a value built from its own handle
    pub fn insert_with(&mut self, build: impl FnOnce(SlotHandle) -> T) -> Option<SlotHandle> {
        let index = self.free_list.pop()?;
        let slot = &mut self.slots[index as usize];
        let handle = SlotHandle::new(index, slot.generation);
        slot.value = Some(build(handle));
        self.stats.record_alloc(1);
        Some(handle)
    }

    /// Take a value out of the pool and free its slot
    pub fn remove(&mut self, handle: SlotHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.stats.record_dealloc(1);
        Some(value)
    }

    /// Check whether a handle still refers to a live value
    pub fn contains(&self, handle: SlotHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Get a value by handle
    pub fn get(&self, handle: SlotHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Get a mutable value by handle
    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    /// Check if the pool holds no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Check if every slot is taken
    pub fn is_full(&self) -> bool {
        self.free_list.is_empty()
    }

    /// Iterate over live values
    pub fn iter(&self) -> impl Iterator<Item = (SlotHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (SlotHandle::new(index as u32, slot.generation), value))
        })
    }

    /// Iterate mutably over live values
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotHandle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|value| (SlotHandle::new(index as u32, generation), value))
        })
    }

    /// Snapshot of the handles of all live values
    pub fn handles(&self) -> Vec<SlotHandle> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    /// Get pool statistics
    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }
}
