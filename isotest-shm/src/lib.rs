// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Named, OS-backed shared memory for tests that run in isolated processes.
//!
//! A test that runs in a forked child cannot mutate fixtures owned by its parent: the child only
//! sees a copy-on-write snapshot of the parent's memory. This crate provides two small primitives
//! that let hooks running in the parent and test bodies running in children exchange state:
//!
//! * [`SharedRegion`] maps a single fixed-layout value under a POSIX shared memory name.
//! * [`SharedSlotArray`] maps a fixed-capacity array with an atomic slot counter, so that several
//!   processes can each claim a disjoint entry.
//!
//! Both are typed over [`SharedValue`], an unsafe marker trait for types that are valid when
//! zeroed and carry no pointers.
//!
//! # Concurrency contract
//!
//! The mapping is plain memory. Only atomic fields are safe to mutate from several processes at
//! once; anything else needs external coordination (for example, the test scheduler only ever
//! runs one test at a time). The slot counter of [`SharedSlotArray`] is the only built-in
//! synchronization.
//!
//! # Examples
//!
//! ```no_run
//! use isotest_shm::{SharedRegion, SharedValue};
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! #[repr(C)]
//! struct Counter {
//!     value: AtomicU32,
//! }
//!
//! // SAFETY: an all-zero AtomicU32 is valid and Counter holds no pointers.
//! unsafe impl SharedValue for Counter {}
//!
//! let writer = SharedRegion::<Counter>::create("/example_counter")?;
//! writer.value.fetch_add(1, Ordering::SeqCst);
//!
//! let reader = SharedRegion::<Counter>::attach("/example_counter")?;
//! assert_eq!(reader.value.load(Ordering::SeqCst), 1);
//!
//! drop(reader);
//! writer.remove()?;
//! # Ok::<(), isotest_shm::ShmError>(())
//! ```

mod errors;
mod region;
mod slot_array;

pub use errors::ShmError;
pub use region::{SharedRegion, SharedValue, unlink};
pub use slot_array::{SharedSlotArray, SlotStorage, Snapshot};
