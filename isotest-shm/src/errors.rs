// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use nix::errno::Errno;
use thiserror::Error;

/// An error produced while creating, attaching to, or using shared memory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShmError {
    /// The name is not a portable POSIX shared memory name.
    #[error("invalid shared memory name `{name}`: {reason}")]
    InvalidName {
        /// The name that was rejected.
        name: String,

        /// Why the name was rejected.
        reason: &'static str,
    },

    /// The value type has a size of zero, which cannot be mapped.
    #[error("cannot map zero-sized shared value `{name}`")]
    ZeroSized {
        /// The name of the region.
        name: String,
    },

    /// `shm_open` failed.
    #[error("failed to open shared memory `{name}` for {op}")]
    Open {
        /// The name of the region.
        name: String,

        /// Either `create` or `attach`.
        op: &'static str,

        /// The underlying error.
        #[source]
        error: Errno,
    },

    /// Sizing a freshly created object failed.
    #[error("failed to resize shared memory `{name}` to {size} bytes")]
    Truncate {
        /// The name of the region.
        name: String,

        /// The requested size.
        size: usize,

        /// The underlying error.
        #[source]
        error: Errno,
    },

    /// Reading the size of an existing object failed.
    #[error("failed to read the size of shared memory `{name}`")]
    Stat {
        /// The name of the region.
        name: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An existing object is too small for the requested type.
    #[error("shared memory `{name}` is {actual} bytes, but at least {expected} bytes are required")]
    SizeMismatch {
        /// The name of the region.
        name: String,

        /// `size_of::<T>()`.
        expected: usize,

        /// The size of the existing object.
        actual: u64,
    },

    /// `mmap` failed.
    #[error("failed to map shared memory `{name}`")]
    Map {
        /// The name of the region.
        name: String,

        /// The underlying error.
        #[source]
        error: Errno,
    },

    /// `shm_unlink` failed.
    #[error("failed to unlink shared memory `{name}`")]
    Unlink {
        /// The name of the region.
        name: String,

        /// The underlying error.
        #[source]
        error: Errno,
    },

    /// Every slot of a [`SharedSlotArray`](crate::SharedSlotArray) has been reserved.
    #[error("shared slot array capacity exceeded (capacity {capacity}, requested slot {slot})")]
    CapacityExceeded {
        /// The fixed capacity of the array.
        capacity: usize,

        /// The slot index that would have been assigned.
        slot: usize,
    },
}
