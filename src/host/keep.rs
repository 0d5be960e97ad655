// SPDX-License-Identifier: Apache-2.0

//! The host of a real Keep
//!
//! The collaborators outside of the bootstrap are bound by symbol. The Keep
//! runtime calls [`enarx_keep_main`] once the image is loaded.

use super::{is_aligned_non_null, Host, Module, Platform, Status};
use crate::config::Config;
use crate::entry::{invoke, EntryPoint};
use crate::import::HostArgs;
use crate::tls::ReservedTls;

use std::ffi::{c_char, c_int, c_ulong, c_void, CStr};
use std::mem::size_of;
use std::ptr::null;
use std::slice;

use log::LevelFilter;

extern "C" {
    static environ: *const *const c_char;

    fn enarx_load_module(module: Module) -> c_int;
    fn enarx_mount(
        source: *const c_char,
        target: *const c_char,
        fstype: *const c_char,
        flags: c_ulong,
        data: *const c_void,
    ) -> c_int;
    fn enarx_memfs(name: *const c_char) -> c_int;
    fn enarx_host_args(args: *mut HostArgs) -> c_int;
    fn enarx_premain(argc: *mut c_int, argv: *mut *const *const c_char);
    fn enarx_is_outside_keep(ptr: *const c_void, size: usize) -> bool;
    fn enarx_chdir(path: *const c_char) -> c_int;
    fn enarx_payload_base() -> *mut u8;
    fn enarx_payload_size() -> usize;
    fn enarx_reserved_tls() -> *const c_void;
    fn enarx_thread_descriptor() -> *const c_void;
}

/// Memory validation against the Keep boundary
///
/// Host memory has to lie entirely outside of the Keep.
#[derive(Copy, Clone, Debug, Default)]
pub struct KeepPlatform;

impl Platform for KeepPlatform {
    fn validate_slice<T: Sized>(&self, ptr: usize, count: usize) -> Result<&[T], c_int> {
        let ptr = is_aligned_non_null::<T>(ptr).ok_or(libc::EINVAL)?;
        let len = count.checked_mul(size_of::<T>()).ok_or(libc::EINVAL)?;
        ptr.checked_add(len).ok_or(libc::EINVAL)?;

        // Safety: only queries the Keep layout.
        if !unsafe { enarx_is_outside_keep(ptr as *const c_void, len) } {
            return Err(libc::EINVAL);
        }

        // Safety: the region is readable host memory.
        Ok(unsafe { slice::from_raw_parts(ptr as *const T, count) })
    }
}

/// The host of a real Keep
#[derive(Debug, Default)]
pub struct KeepHost {
    platform: KeepPlatform,
}

impl Host for KeepHost {
    type Platform = KeepPlatform;

    fn platform(&self) -> &KeepPlatform {
        &self.platform
    }

    fn load_module(&mut self, module: Module) -> Status {
        unsafe { enarx_load_module(module) }
    }

    fn reserved_tls(&self) -> Option<ReservedTls> {
        unsafe {
            Some(ReservedTls {
                region: enarx_reserved_tls() as usize,
                thread_descriptor: enarx_thread_descriptor() as usize,
            })
        }
    }

    fn environ(&self) -> *const *const c_char {
        unsafe { environ }
    }

    fn mount(&mut self, source: &CStr, target: &CStr, fstype: &CStr, flags: c_ulong) -> Status {
        unsafe {
            enarx_mount(
                source.as_ptr(),
                target.as_ptr(),
                fstype.as_ptr(),
                flags,
                null(),
            )
        }
    }

    fn memfs(&mut self, name: &CStr) -> Status {
        unsafe { enarx_memfs(name.as_ptr()) }
    }

    fn host_args(&mut self, args: &mut HostArgs) -> Status {
        unsafe { enarx_host_args(args) }
    }

    fn premain(&mut self, argc: &mut c_int, argv: &mut *const *const c_char) {
        unsafe { enarx_premain(argc, argv) }
    }

    fn chdir(&mut self, path: &CStr) -> Status {
        unsafe { enarx_chdir(path.as_ptr()) }
    }

    fn payload(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(enarx_payload_base(), enarx_payload_size()) }
    }

    unsafe fn enter(&mut self, entry: EntryPoint, stack: &[usize]) -> c_int {
        invoke(entry, stack)
    }
}

/// Entry point of the bootstrap inside a Keep
///
/// Returns a non-zero exit status if the payload could not be started.
#[no_mangle]
pub extern "C" fn enarx_keep_main() -> c_int {
    let _ = env_logger::Builder::new()
        .filter_level(LevelFilter::Error)
        .try_init();

    crate::launch(&mut KeepHost::default(), &Config::default())
}
