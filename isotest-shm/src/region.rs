// Copyright (c) The isotest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::ShmError;
use nix::{
    errno::Errno,
    fcntl::OFlag,
    sys::{
        mman::{self, MapFlags, ProtFlags},
        stat::Mode,
    },
    unistd,
};
use std::{
    fmt,
    fs::File,
    marker::PhantomData,
    mem,
    num::NonZeroUsize,
    ops::{Deref, DerefMut},
    os::fd::{AsFd, OwnedFd},
    ptr::NonNull,
    sync::atomic::{
        AtomicBool, AtomicI8, AtomicI16, AtomicI32, AtomicIsize, AtomicU8, AtomicU16, AtomicU32,
        AtomicUsize,
    },
};

/// A type that can be placed in a [`SharedRegion`].
///
/// # Safety
///
/// Implementors must guarantee that:
///
/// * a value whose bytes are all zero is a valid value of the type,
/// * the type contains no pointers or references (they would be meaningless in another
///   process),
/// * the type has no drop glue, since the memory is shared and never dropped in place.
///
/// Structs should be `#[repr(C)]` so that every process agrees on the layout.
pub unsafe trait SharedValue: Sized + 'static {}

macro_rules! shared_value_impls {
    ($($ty:ty),* $(,)?) => {
        $(
            // SAFETY: zero is a valid bit pattern and the type holds no pointers.
            unsafe impl SharedValue for $ty {}
        )*
    };
}

shared_value_impls!(
    bool, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, AtomicBool, AtomicU8,
    AtomicU16, AtomicU32, AtomicUsize, AtomicI8, AtomicI16, AtomicI32, AtomicIsize,
);

#[cfg(target_has_atomic = "64")]
shared_value_impls!(std::sync::atomic::AtomicU64, std::sync::atomic::AtomicI64);

// SAFETY: an array of zero-valid, pointer-free elements is itself zero-valid and pointer-free.
unsafe impl<T: SharedValue, const N: usize> SharedValue for [T; N] {}

/// A value of type `T` stored in named POSIX shared memory.
///
/// The handle owns one mapping of the region. Dropping it unmaps the memory but leaves the name
/// in place, so other processes can keep attaching; [`remove`](Self::remove) also releases the
/// name. Handles are deliberately not `Clone`: each [`create`](Self::create) or
/// [`attach`](Self::attach) call produces exactly one mapping, and moving the handle moves that
/// ownership.
///
/// Through `Deref`, every process sees the same `T`. Mutating non-atomic fields from several
/// processes at once is a data race; see the [crate documentation](crate) for the contract.
pub struct SharedRegion<T: SharedValue> {
    name: String,
    ptr: NonNull<T>,
    _marker: PhantomData<T>,
}

// SAFETY: the handle uniquely owns its mapping; sending or sharing it is as safe as sending or
// sharing the T it points to.
unsafe impl<T: SharedValue + Send> Send for SharedRegion<T> {}
// SAFETY: see above.
unsafe impl<T: SharedValue + Sync> Sync for SharedRegion<T> {}

impl<T: SharedValue> SharedRegion<T> {
    /// Creates, zero-initializes and maps a fresh region called `name`.
    ///
    /// If a region with this name already exists, for example because a previous run was killed
    /// before it could clean up, it is unlinked and replaced.
    pub fn create(name: impl Into<String>) -> Result<Self, ShmError> {
        let name = name.into();
        validate_name(&name)?;
        let size = value_size::<T>(&name)?;

        let fd = match open(&name, OFlag::O_CREAT | OFlag::O_EXCL) {
            Ok(fd) => fd,
            Err(Errno::EEXIST) => {
                tracing::debug!(name = %name, "replacing stale shared memory region");
                match mman::shm_unlink(name.as_str()) {
                    Ok(()) | Err(Errno::ENOENT) => {}
                    Err(error) => return Err(ShmError::Unlink { name, error }),
                }
                match open(&name, OFlag::O_CREAT | OFlag::O_EXCL) {
                    Ok(fd) => fd,
                    Err(error) => {
                        return Err(ShmError::Open {
                            name,
                            op: "create",
                            error,
                        });
                    }
                }
            }
            Err(error) => {
                return Err(ShmError::Open {
                    name,
                    op: "create",
                    error,
                });
            }
        };

        if let Err(error) = unistd::ftruncate(&fd, size.get() as libc::off_t) {
            // This call created the object, so don't leave an unsized name behind.
            let _ = mman::shm_unlink(name.as_str());
            return Err(ShmError::Truncate {
                name,
                size: size.get(),
                error,
            });
        }

        let ptr = match map::<T>(&name, &fd, size) {
            Ok(ptr) => ptr,
            Err(error) => {
                let _ = mman::shm_unlink(name.as_str());
                return Err(error);
            }
        };

        // SAFETY: the mapping is size_of::<T>() writable bytes and all-zero is a valid T.
        unsafe { ptr.as_ptr().write_bytes(0, 1) };

        Ok(Self {
            name,
            ptr,
            _marker: PhantomData,
        })
    }

    /// Maps an existing region called `name` without re-initializing it.
    pub fn attach(name: impl Into<String>) -> Result<Self, ShmError> {
        let name = name.into();
        validate_name(&name)?;
        let size = value_size::<T>(&name)?;

        let fd = match open(&name, OFlag::empty()) {
            Ok(fd) => fd,
            Err(error) => {
                return Err(ShmError::Open {
                    name,
                    op: "attach",
                    error,
                });
            }
        };

        let file = File::from(fd);
        let actual = match file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(error) => return Err(ShmError::Stat { name, error }),
        };
        if actual < size.get() as u64 {
            return Err(ShmError::SizeMismatch {
                name,
                expected: size.get(),
                actual,
            });
        }

        let ptr = map::<T>(&name, &file, size)?;
        Ok(Self {
            name,
            ptr,
            _marker: PhantomData,
        })
    }

    /// Returns the name this region was created or attached with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a raw pointer to the shared value.
    ///
    /// Useful for byte-level access to non-atomic buffers under external coordination.
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Unmaps this handle and releases the OS-level name.
    ///
    /// Once removed, further [`attach`](Self::attach) calls fail. Processes that already mapped
    /// the region keep their mappings until they drop them. Removing a name that another handle
    /// already removed is not an error.
    pub fn remove(mut self) -> Result<(), ShmError> {
        let name = mem::take(&mut self.name);
        drop(self);
        crate::unlink(&name).map(|_| ())
    }
}

impl<T: SharedValue> Deref for SharedRegion<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: ptr is a live mapping of a valid T for as long as self exists.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: SharedValue> DerefMut for SharedRegion<T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above. Exclusive access within this process follows from &mut self;
        // cross-process exclusivity is the caller's responsibility per the crate contract.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: SharedValue> Drop for SharedRegion<T> {
    fn drop(&mut self) {
        // SAFETY: ptr came from mmap with a length of size_of::<T>() and is unmapped only here.
        if let Err(error) = unsafe { mman::munmap(self.ptr.cast(), mem::size_of::<T>()) } {
            tracing::debug!(name = %self.name, %error, "failed to unmap shared memory region");
        }
    }
}

impl<T: SharedValue> fmt::Debug for SharedRegion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("size", &mem::size_of::<T>())
            .finish_non_exhaustive()
    }
}

/// Releases the shared memory name `name`.
///
/// Returns `Ok(false)` if no region had that name. Use this to clean up after a run that was
/// killed before it could call [`SharedRegion::remove`].
pub fn unlink(name: &str) -> Result<bool, ShmError> {
    validate_name(name)?;
    match mman::shm_unlink(name) {
        Ok(()) => Ok(true),
        Err(Errno::ENOENT) => Ok(false),
        Err(error) => Err(ShmError::Unlink {
            name: name.to_owned(),
            error,
        }),
    }
}

fn open(name: &str, extra: OFlag) -> nix::Result<OwnedFd> {
    mman::shm_open(
        name,
        OFlag::O_RDWR | extra,
        Mode::S_IRUSR | Mode::S_IWUSR,
    )
}

fn map<T>(name: &str, fd: impl AsFd, size: NonZeroUsize) -> Result<NonNull<T>, ShmError> {
    // SAFETY: a new shared mapping without an address hint cannot alias existing memory.
    let addr = unsafe {
        mman::mmap(
            None,
            size,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            fd,
            0,
        )
    }
    .map_err(|error| ShmError::Map {
        name: name.to_owned(),
        error,
    })?;
    Ok(addr.cast())
}

fn value_size<T>(name: &str) -> Result<NonZeroUsize, ShmError> {
    NonZeroUsize::new(mem::size_of::<T>()).ok_or_else(|| ShmError::ZeroSized {
        name: name.to_owned(),
    })
}

fn validate_name(name: &str) -> Result<(), ShmError> {
    let reason = if !name.starts_with('/') {
        Some("must start with `/`")
    } else if name.len() == 1 {
        Some("must have at least one character after `/`")
    } else if name[1..].contains('/') {
        Some("must not contain `/` after the leading one")
    } else if name.contains('\0') {
        Some("must not contain NUL bytes")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ShmError::InvalidName {
            name: name.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;
    use test_case::test_case;

    fn unique_name(tag: &str) -> String {
        format!("/ist-{}-{tag}", std::process::id())
    }

    #[test]
    fn create_then_attach_shares_memory() {
        let name = unique_name("share");
        let writer = SharedRegion::<AtomicU32>::create(&name).expect("region created");
        writer.fetch_add(3, Ordering::SeqCst);

        let reader = SharedRegion::<AtomicU32>::attach(&name).expect("region attached");
        assert_eq!(reader.load(Ordering::SeqCst), 3);

        reader.fetch_add(1, Ordering::SeqCst);
        assert_eq!(writer.load(Ordering::SeqCst), 4, "writes through either handle are shared");

        drop(reader);
        writer.remove().expect("region removed");
    }

    #[test]
    fn create_reclaims_stale_region() {
        let name = unique_name("stale");
        let mut first = SharedRegion::<u64>::create(&name).expect("region created");
        *first = 0xdead_beef;
        // Dropping unmaps but keeps the name, like a run that died before cleanup.
        drop(first);

        let survivor = SharedRegion::<u64>::attach(&name).expect("name survives drop");
        assert_eq!(*survivor, 0xdead_beef);
        drop(survivor);

        let fresh = SharedRegion::<u64>::create(&name).expect("stale region replaced");
        assert_eq!(*fresh, 0, "replacement is zero-initialized");
        fresh.remove().expect("region removed");
    }

    #[test]
    fn attach_after_remove_fails() {
        let name = unique_name("gone");
        let region = SharedRegion::<u32>::create(&name).expect("region created");
        region.remove().expect("region removed");

        let error = SharedRegion::<u32>::attach(&name).expect_err("attach after remove fails");
        assert!(
            matches!(
                error,
                ShmError::Open {
                    op: "attach",
                    error: Errno::ENOENT,
                    ..
                }
            ),
            "unexpected error: {error:?}"
        );
        assert!(!unlink(&name).expect("unlink succeeds"), "name is already gone");
    }

    #[test]
    fn attach_rejects_smaller_object() {
        let name = unique_name("small");
        let region = SharedRegion::<u8>::create(&name).expect("region created");

        let error =
            SharedRegion::<[u64; 1024]>::attach(&name).expect_err("object is too small");
        assert!(
            matches!(error, ShmError::SizeMismatch { expected: 8192, .. }),
            "unexpected error: {error:?}"
        );
        region.remove().expect("region removed");
    }

    #[test]
    fn zero_sized_values_are_rejected() {
        let error = SharedRegion::<[u8; 0]>::create(unique_name("zst")).expect_err("zero-sized");
        assert!(matches!(error, ShmError::ZeroSized { .. }), "unexpected error: {error:?}");
    }

    #[test_case("no-slash" ; "missing leading slash")]
    #[test_case("/" ; "only a slash")]
    #[test_case("/a/b" ; "interior slash")]
    #[test_case("/a\0b" ; "interior nul")]
    fn invalid_names_are_rejected(name: &str) {
        let error = SharedRegion::<u32>::create(name).expect_err("name is invalid");
        assert!(matches!(error, ShmError::InvalidName { .. }), "unexpected error: {error:?}");
    }
}
