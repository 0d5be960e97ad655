// SPDX-License-Identifier: Apache-2.0

//! The payload argument block
//!
//! A payload expects its arguments the way a native process finds them on
//! its initial stack:
//!
//! ```text
//! argv[0] .. argv[argc - 1]  NULL
//! envp[0] .. envp[envc - 1]  NULL
//! aux[0]  .. aux[auxc - 1]   NULL
//! ```
//!
//! [`MergedExecBuffer`] keeps the three sequences apart and only lays them
//! out contiguously when asked to. The strings themselves are never copied.

use crate::import::{FilteredEnvironment, HostArguments};

use std::ffi::{c_char, c_int, CStr, CString};
use std::process::abort;
use std::ptr::null;

use log::error;

/// Number of reserved auxiliary vector slots, not counting the terminator
///
/// A single zero slot followed by the terminator reads as an `AT_NULL`
/// entry, i.e. an empty auxiliary vector.
pub const AUX_RESERVED: usize = 1;

/// Arguments and environment of the payload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergedExecBuffer {
    argv: Vec<&'static CStr>,
    envp: Vec<&'static CStr>,
}

/// Collects the entries of a null-terminated string array
///
/// # Safety
///
/// `array` has to be null or point to a null-terminated array of C strings,
/// all of which stay valid for the rest of the process.
pub unsafe fn scan(array: *const *const c_char) -> Vec<&'static CStr> {
    let mut entries = Vec::new();

    if array.is_null() {
        return entries;
    }

    let mut len = 0;
    while !(*array.add(len)).is_null() {
        len += 1;
    }

    reserve(&mut entries, len);
    for i in 0..len {
        entries.push(CStr::from_ptr(*array.add(i)));
    }

    entries
}

fn reserve<T>(vec: &mut Vec<T>, additional: usize) {
    if vec.try_reserve_exact(additional).is_err() {
        error!("out of memory laying out {additional} argument slots");
        abort();
    }
}

impl MergedExecBuffer {
    /// Creates a buffer from already owned sequences
    pub fn new(argv: Vec<&'static CStr>, envp: Vec<&'static CStr>) -> Self {
        Self { argv, envp }
    }

    /// Merges `argc` arguments from `argv` with the environment `envp`
    ///
    /// The length of `envp` is determined by scanning for its terminator.
    /// Aborts the process if the buffer cannot be allocated.
    ///
    /// # Safety
    ///
    /// `argv` has to point to at least `argc` valid C strings, and `envp`
    /// has to satisfy the requirements of [`scan`]. All strings have to stay
    /// valid for the rest of the process.
    pub unsafe fn merge(
        argc: c_int,
        argv: *const *const c_char,
        envp: *const *const c_char,
    ) -> Self {
        let argc = usize::try_from(argc).unwrap_or_else(|_| {
            error!("negative argument count {argc}");
            abort()
        });

        let mut args = Vec::new();
        reserve(&mut args, argc);
        for i in 0..argc {
            args.push(CStr::from_ptr(*argv.add(i)));
        }

        Self {
            argv: args,
            envp: scan(envp),
        }
    }

    /// Drops the environment entries outside the trust domain of `prefix`
    ///
    /// The retained entries keep their order.
    pub fn retain_env(&mut self, prefix: &str) {
        self.envp.retain(|entry| FilteredEnvironment::admits(entry, prefix));
    }

    /// The arguments
    pub fn argv(&self) -> &[&'static CStr] {
        &self.argv
    }

    /// The environment
    pub fn envp(&self) -> &[&'static CStr] {
        &self.envp
    }

    /// Number of arguments
    pub fn argc(&self) -> usize {
        self.argv.len()
    }

    /// Number of environment entries
    pub fn envc(&self) -> usize {
        self.envp.len()
    }

    /// Total number of slots of the contiguous layout
    pub fn slot_count(&self) -> usize {
        self.argc() + 1 + self.envc() + 1 + AUX_RESERVED + 1
    }

    /// Lays out the contiguous pointer block
    pub fn slots(&self) -> Vec<*const c_char> {
        let mut slots = Vec::new();
        reserve(&mut slots, self.slot_count());

        slots.extend(self.argv.iter().map(|arg| arg.as_ptr()));
        slots.push(null());
        slots.extend(self.envp.iter().map(|env| env.as_ptr()));
        slots.push(null());
        slots.extend([null(); AUX_RESERVED]);
        slots.push(null());

        debug_assert_eq!(slots.len(), self.slot_count());
        slots
    }

    /// Lays out the initial stack of the payload: `argc` followed by the slots
    pub fn stack(&self) -> Vec<usize> {
        let mut stack = Vec::new();
        reserve(&mut stack, self.slot_count() + 1);

        stack.push(self.argc());
        stack.extend(self.slots().into_iter().map(|slot| slot as usize));
        stack
    }
}

impl From<HostArguments> for MergedExecBuffer {
    /// Hands the imported strings over to the payload for good
    fn from(args: HostArguments) -> Self {
        fn leak(strings: Vec<CString>) -> Vec<&'static CStr> {
            strings
                .into_iter()
                .map(|s| &*Box::leak(s.into_boxed_c_str()))
                .collect()
        }

        Self {
            argv: leak(args.argv),
            envp: leak(args.envp.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cstrs(strings: &[&str]) -> Vec<&'static CStr> {
        strings
            .iter()
            .map(|s| &*Box::leak(CString::new(*s).unwrap().into_boxed_c_str()))
            .collect()
    }

    fn raw(strings: &[&'static CStr]) -> Vec<*const c_char> {
        strings.iter().map(|s| s.as_ptr()).chain([null()]).collect()
    }

    #[test]
    fn layout() {
        for argc in 0..4 {
            for envc in 0..4 {
                let argv = cstrs(&vec!["arg"; argc]);
                let envp = cstrs(&vec!["ENARX_X=1"; envc]);
                let buffer = MergedExecBuffer::new(argv.clone(), envp.clone());

                let slots = buffer.slots();
                assert_eq!(slots.len(), argc + 1 + envc + 1 + AUX_RESERVED + 1);

                for (slot, arg) in slots[..argc].iter().zip(&argv) {
                    assert_eq!(*slot, arg.as_ptr());
                }
                assert!(slots[argc].is_null());
                for (slot, env) in slots[argc + 1..][..envc].iter().zip(&envp) {
                    assert_eq!(*slot, env.as_ptr());
                }
                assert!(slots[argc + 1 + envc].is_null());
                assert!(slots[argc + 1 + envc + 1..].iter().all(|s| s.is_null()));
            }
        }
    }

    #[test]
    fn merge() {
        let argv = cstrs(&["/init", "-v"]);
        let envp = cstrs(&["ENARX_A=1", "ENARX_B=2", "ENARX_C=3"]);
        let (argv_raw, envp_raw) = (raw(&argv), raw(&envp));

        let buffer = unsafe { MergedExecBuffer::merge(2, argv_raw.as_ptr(), envp_raw.as_ptr()) };
        assert_eq!(buffer.argv(), &argv[..]);
        assert_eq!(buffer.envp(), &envp[..]);

        // Only the counted arguments are taken.
        let buffer = unsafe { MergedExecBuffer::merge(1, argv_raw.as_ptr(), envp_raw.as_ptr()) };
        assert_eq!(buffer.argc(), 1);
        assert_eq!(buffer.envc(), 3);
    }

    #[test]
    fn retain_env() {
        let argv = cstrs(&["/init"]);
        let envp = cstrs(&["ENARX_B=2", "SECRET=hunter2", "ENARX_A=1", "ENARX=3"]);

        let mut buffer = MergedExecBuffer::new(argv.clone(), envp.clone());
        buffer.retain_env("ENARX_");

        assert_eq!(buffer.argv(), &argv[..]);
        assert_eq!(buffer.envp(), &[envp[0], envp[2]][..]);
        assert_eq!(buffer.envp()[0].as_ptr(), envp[0].as_ptr());
    }

    #[test]
    fn shares_strings() {
        let argv = cstrs(&["/init"]);
        let argv_raw = raw(&argv);
        let envp_raw = raw(&[]);

        let buffer = unsafe { MergedExecBuffer::merge(1, argv_raw.as_ptr(), envp_raw.as_ptr()) };
        assert_eq!(buffer.slots()[0], argv_raw[0]);
    }

    #[test]
    fn stack() {
        let buffer = MergedExecBuffer::new(cstrs(&["/init"]), cstrs(&["ENARX_A=1"]));
        let stack = buffer.stack();

        assert_eq!(stack.len(), buffer.slot_count() + 1);
        assert_eq!(stack[0], 1);
        assert_eq!(stack[1], buffer.argv()[0].as_ptr() as usize);
        assert_eq!(stack[2], 0);
        assert_eq!(stack[3], buffer.envp()[0].as_ptr() as usize);
        assert_eq!(&stack[4..], &[0, 0, 0]);
    }

    #[test]
    fn scan_null() {
        assert!(unsafe { scan(null()) }.is_empty());
    }

    #[test]
    fn from_host_arguments() {
        let args = HostArguments {
            argv: vec![CString::new("/init").unwrap()],
            envp: FilteredEnvironment::filter(
                [
                    CString::new("ENARX_A=1").unwrap(),
                    CString::new("HOME=/").unwrap(),
                ],
                "ENARX_",
            ),
        };

        let buffer = MergedExecBuffer::from(args);
        assert_eq!(buffer.argv(), &cstrs(&["/init"])[..]);
        assert_eq!(buffer.envp(), &cstrs(&["ENARX_A=1"])[..]);
        assert_eq!(buffer.slot_count(), 1 + 1 + 1 + 1 + AUX_RESERVED + 1);
    }
}
