// SPDX-License-Identifier: Apache-2.0

//! Importing arguments and environment across the trust boundary
//!
//! The host hands over two raw string arrays. Both are validated through the
//! host's [`Platform`] and copied into Keep-owned memory before anything
//! looks at their contents. Afterwards, the environment is filtered down to
//! the variables of the trust domain.

use crate::error::Error;
use crate::host::Platform;

use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr::null;

use log::debug;

/// The raw arguments and environment as reported by the host
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct HostArgs {
    /// Number of arguments
    pub argc: c_int,

    /// Null-terminated argument array
    pub argv: *const *const c_char,

    /// Number of environment entries
    pub envc: c_int,

    /// Null-terminated environment array
    pub envp: *const *const c_char,
}

impl Default for HostArgs {
    fn default() -> Self {
        Self {
            argc: 0,
            argv: null(),
            envc: 0,
            envp: null(),
        }
    }
}

/// An environment restricted to the variables of the trust domain
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilteredEnvironment(Vec<CString>);

impl FilteredEnvironment {
    /// Keeps the entries whose key starts with `prefix`, in order
    pub fn filter(environ: impl IntoIterator<Item = CString>, prefix: &str) -> Self {
        Self(
            environ
                .into_iter()
                .filter(|entry| Self::admits(entry, prefix))
                .collect(),
        )
    }

    /// Whether `entry` belongs to the trust domain of `prefix`
    pub fn admits(entry: &CStr, prefix: &str) -> bool {
        entry.to_bytes().starts_with(prefix.as_bytes())
    }

    /// Iterates over the retained entries
    pub fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.0.iter().map(CString::as_c_str)
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no entry was retained
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unwraps the retained entries
    pub fn into_inner(self) -> Vec<CString> {
        self.0
    }
}

/// Arguments and environment owned by the Keep
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostArguments {
    /// Payload arguments
    pub argv: Vec<CString>,

    /// Payload environment
    pub envp: FilteredEnvironment,
}

/// Copies the host arguments into the Keep and filters the environment
///
/// Fails if a count is negative or an array is not terminated right after
/// its last counted entry. Nothing copied so far survives a failure.
pub fn import(
    platform: &impl Platform,
    args: &HostArgs,
    prefix: &str,
) -> Result<HostArguments, Error> {
    let argc = usize::try_from(args.argc)
        .map_err(|_| Error::InvalidHostArgs("negative argument count"))?;
    let envc = usize::try_from(args.envc)
        .map_err(|_| Error::InvalidHostArgs("negative environment count"))?;

    let environ = copy_strings(platform, args.envp, envc)?;
    let envp = FilteredEnvironment::filter(environ, prefix);
    debug!(
        "imported {} of {envc} environment entries with prefix `{prefix}`",
        envp.len()
    );

    let argv = copy_strings(platform, args.argv, argc)?;
    debug!("imported {argc} arguments");

    Ok(HostArguments { argv, envp })
}

fn copy_strings(
    platform: &impl Platform,
    array: *const *const c_char,
    count: usize,
) -> Result<Vec<CString>, Error> {
    if array.is_null() {
        return match count {
            0 => Ok(Vec::new()),
            _ => Err(Error::InvalidHostArgs("missing string array")),
        };
    }

    let len = count
        .checked_add(1)
        .ok_or(Error::InvalidHostArgs("string array too long"))?;
    let slots = platform
        .validate_slice::<usize>(array as usize, len)
        .map_err(|_| Error::InvalidHostArgs("invalid string array"))?;

    let (terminator, entries) = slots
        .split_last()
        .ok_or(Error::InvalidHostArgs("invalid string array"))?;
    if *terminator != 0 {
        return Err(Error::InvalidHostArgs("unterminated string array"));
    }

    let mut strings = Vec::new();
    strings
        .try_reserve_exact(count)
        .map_err(|_| Error::InvalidHostArgs("string array too long"))?;

    for &ptr in entries {
        if ptr == 0 {
            return Err(Error::InvalidHostArgs("string array terminated early"));
        }

        let bytes = platform
            .validate_str(ptr)
            .map_err(|_| Error::InvalidHostArgs("invalid string"))?;
        let string = CString::from_vec_with_nul(bytes.to_vec())
            .map_err(|_| Error::InvalidHostArgs("invalid string"))?;
        strings.push(string);
    }

    Ok(strings)
}
