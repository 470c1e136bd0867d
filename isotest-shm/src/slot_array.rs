// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{SharedRegion, SharedValue, ShmError};
use std::{
    ptr,
    sync::atomic::{AtomicUsize, Ordering},
};

/// The in-memory layout behind a [`SharedSlotArray`].
///
/// Exposed so its size can be reasoned about; the fields are only reachable through the array.
#[repr(C)]
pub struct SlotStorage<T, const N: usize> {
    next_slot: AtomicUsize,
    entries: [T; N],
}

// SAFETY: an all-zero AtomicUsize is valid, and the entries are SharedValue themselves.
unsafe impl<T: SharedValue, const N: usize> SharedValue for SlotStorage<T, N> {}

/// A fixed-capacity array in shared memory, with an atomic counter handing out slots.
///
/// Each process calls [`reserve_slot`](Self::reserve_slot) to obtain an index nobody else will
/// receive, then writes only its own slot. The parent calls [`collect`](Self::collect) to take a
/// best-effort snapshot of all reserved entries.
#[derive(Debug)]
pub struct SharedSlotArray<T: SharedValue, const N: usize> {
    region: SharedRegion<SlotStorage<T, N>>,
}

/// A copy of the reserved entries of a [`SharedSlotArray`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot<T> {
    /// The entries for every successfully reserved slot, in slot order.
    pub entries: Vec<T>,

    /// The raw value of the slot counter, including reservations that failed with
    /// [`ShmError::CapacityExceeded`].
    pub reservations: usize,
}

impl<T> Snapshot<T> {
    /// The number of collected entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no slot was reserved.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: SharedValue, const N: usize> SharedSlotArray<T, N> {
    /// Creates a fresh, zeroed slot array called `name`.
    pub fn create(name: impl Into<String>) -> Result<Self, ShmError> {
        Ok(Self {
            region: SharedRegion::create(name)?,
        })
    }

    /// Attaches to an existing slot array called `name`.
    pub fn attach(name: impl Into<String>) -> Result<Self, ShmError> {
        Ok(Self {
            region: SharedRegion::attach(name)?,
        })
    }

    /// The name of the underlying region.
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// The fixed number of slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Claims the next free slot and returns its index.
    ///
    /// Every successful call, from any process, returns a distinct index. Once all `N` slots are
    /// taken, this fails with [`ShmError::CapacityExceeded`].
    pub fn reserve_slot(&self) -> Result<usize, ShmError> {
        let slot = self.region.next_slot.fetch_add(1, Ordering::AcqRel);
        if slot >= N {
            return Err(ShmError::CapacityExceeded { capacity: N, slot });
        }
        Ok(slot)
    }

    /// Reserves a slot and stores `value` in it.
    pub fn push(&mut self, value: T) -> Result<usize, ShmError> {
        let slot = self.reserve_slot()?;
        self.region.entries[slot] = value;
        Ok(slot)
    }

    /// The number of reserved slots, clamped to the capacity.
    pub fn reserved(&self) -> usize {
        self.region.next_slot.load(Ordering::Acquire).min(N)
    }

    /// Returns the entry at `index`, whether or not it has been reserved.
    pub fn slot(&self, index: usize) -> Option<&T> {
        self.region.entries.get(index)
    }

    /// Returns the entry at `index` mutably.
    ///
    /// Only write slots returned by [`reserve_slot`](Self::reserve_slot) in this process.
    pub fn slot_mut(&mut self, index: usize) -> Option<&mut T> {
        self.region.entries.get_mut(index)
    }

    /// Copies out every reserved entry.
    ///
    /// Not transactional: a slot reserved but not yet written by another process is copied as
    /// whatever bytes it holds at that moment.
    pub fn collect(&self) -> Snapshot<T>
    where
        T: Copy,
    {
        let reservations = self.region.next_slot.load(Ordering::Acquire);
        let count = reservations.min(N);
        Snapshot {
            entries: self.region.entries[..count].to_vec(),
            reservations,
        }
    }

    /// Zeroes the counter and every entry.
    pub fn reset(&mut self) {
        let storage = &mut *self.region;
        // SAFETY: SharedValue guarantees all-zero entries are valid, and the slice is N long.
        unsafe { ptr::write_bytes(storage.entries.as_mut_ptr(), 0, N) };
        storage.next_slot.store(0, Ordering::Release);
    }

    /// Unmaps the array and releases its name.
    pub fn remove(self) -> Result<(), ShmError> {
        self.region.remove()
    }
}
