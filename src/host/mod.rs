// SPDX-License-Identifier: Apache-2.0

//! The host side of the Keep boundary
//!
//! Every call the bootstrap makes out of the Keep goes through a [`Host`].
//! Memory handed over by the host is only ever read after a [`Platform`]
//! validated it.

#[cfg(feature = "keep")]
pub mod keep;
pub mod nil;

use crate::entry::EntryPoint;
use crate::import::HostArgs;
use crate::tls::ReservedTls;

use std::ffi::{c_char, c_int, c_ulong, CStr};
use std::fmt::{self, Display, Formatter};
use std::mem::align_of;
use std::slice;

/// The status of a host call, `0` meaning success
pub type Status = c_int;

/// A host bridge module
///
/// All of them have to be loaded before the bootstrap does anything else.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Module {
    /// Event polling
    Epoll = 0,
    /// Host file system
    FileSystem = 1,
    /// Name resolution
    Resolver = 2,
    /// Socket interface
    SocketInterface = 3,
}

impl Module {
    /// All modules, in load order
    pub const ALL: [Module; 4] = [
        Module::Epoll,
        Module::FileSystem,
        Module::Resolver,
        Module::SocketInterface,
    ];
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Module::Epoll => "epoll",
            Module::FileSystem => "file system",
            Module::Resolver => "resolver",
            Module::SocketInterface => "socket interface",
        })
    }
}

/// Validates that the memory pointed to by `ptr` is aligned and non-null
///
/// Returns `Some(ptr)`, if so and `None` if not.
pub fn is_aligned_non_null<T>(ptr: usize) -> Option<usize> {
    if ptr == 0 || ptr % align_of::<T>() != 0 {
        return None;
    }
    Some(ptr)
}

/// Platform-specific validation of host memory
pub trait Platform {
    /// Validates that a region for `count` elements of type `T` is:
    /// * in valid address space and readable for the lifetime of `self`.
    /// * "dereferenceable" in the sense defined in [the ptr module documentation].
    /// * ptr is non-null and aligned
    ///
    /// Returns an immutable borrow if valid, otherwise [`EINVAL`](libc::EINVAL).
    ///
    /// [the ptr module documentation]: std::ptr#safety
    fn validate_slice<T: Sized>(&self, ptr: usize, count: usize) -> Result<&[T], c_int>;

    /// Validates that a region of memory represents a C string and is valid for read-only access.
    ///
    /// Returns the bytes of the string including the nul terminator byte if valid,
    /// otherwise [`EINVAL`](libc::EINVAL).
    #[inline]
    fn validate_str(&self, ptr: usize) -> Result<&[u8], c_int> {
        let mut p = ptr;

        loop {
            let byte = self.validate_slice::<u8>(p, 1)?;
            p = p.checked_add(1).ok_or(libc::EINVAL)?;
            if byte[0] == 0 {
                break;
            }
        }

        let len = p.checked_sub(ptr).ok_or(libc::EINVAL)?;
        self.validate_slice(ptr, len)
    }
}

/// A platform sharing the address space with the host
///
/// Pointers are only checked for being non-null and aligned, which is all
/// that can be checked when there is no isolation boundary.
#[derive(Copy, Clone, Debug, Default)]
pub struct Native;

impl Platform for Native {
    fn validate_slice<T: Sized>(&self, ptr: usize, count: usize) -> Result<&[T], c_int> {
        is_aligned_non_null::<T>(ptr).ok_or(libc::EINVAL)?;
        Ok(unsafe { slice::from_raw_parts(ptr as *const T, count) })
    }
}

/// The calls a Keep makes to its host
///
/// Raw pointers returned by [`environ`](Host::environ) and
/// [`premain`](Host::premain) must reference null-terminated arrays of
/// strings which stay valid for the rest of the process.
pub trait Host {
    /// The platform validating memory handed over by this host
    type Platform: Platform;

    /// The platform validating memory handed over by this host
    fn platform(&self) -> &Self::Platform;

    /// Loads a host bridge module
    fn load_module(&mut self, module: Module) -> Status;

    /// The reserved thread-local region, if this host has one
    fn reserved_tls(&self) -> Option<ReservedTls>;

    /// The current environment of the Keep
    fn environ(&self) -> *const *const c_char;

    /// Looks up `key` in the current environment of the Keep
    fn getenv(&self, key: &str) -> Option<&'static CStr> {
        // Safety: `environ()` is a valid null-terminated array by contract.
        let environ = unsafe { crate::merge::scan(self.environ()) };

        environ.into_iter().find_map(|entry| {
            let entry = entry.to_bytes_with_nul();
            match entry.strip_prefix(key.as_bytes()) {
                Some([b'=', value @ ..]) => CStr::from_bytes_with_nul(value).ok(),
                _ => None,
            }
        })
    }

    /// Mounts `source` of type `fstype` at `target`
    fn mount(&mut self, source: &CStr, target: &CStr, fstype: &CStr, flags: c_ulong) -> Status;

    /// Creates the in-Keep memory filesystem called `name`
    fn memfs(&mut self, name: &CStr) -> Status;

    /// Fetches the raw arguments and environment from the host
    fn host_args(&mut self, args: &mut HostArgs) -> Status;

    /// The mesh pre-main hook, populating `argc` and `argv`
    fn premain(&mut self, argc: &mut c_int, argv: &mut *const *const c_char);

    /// Changes the working directory
    fn chdir(&mut self, path: &CStr) -> Status;

    /// The in-memory payload image, starting at its load address
    fn payload(&mut self) -> &mut [u8];

    /// Enters the payload at `entry` with `stack` as its initial stack
    ///
    /// `stack` holds the native process entry layout, starting with `argc`.
    /// On a real Keep, this never returns.
    ///
    /// # Safety
    ///
    /// The payload image has to be relocated and `entry` has to point into it.
    unsafe fn enter(&mut self, entry: EntryPoint, stack: &[usize]) -> c_int;
}
