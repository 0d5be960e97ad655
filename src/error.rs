// SPDX-License-Identifier: Apache-2.0

//! Fatal bootstrap errors

use crate::host::Module;

use std::error;
use std::ffi::{c_int, CString};
use std::fmt::{self, Display, Formatter};

/// Why the working directory could not be entered
#[derive(Debug)]
pub enum CwdError {
    /// The working directory variable is not set
    Unset(String),

    /// The working directory variable is set, but empty
    Empty(String),

    /// The host refused to change into the directory
    Inaccessible {
        /// The requested directory
        path: CString,
        /// The status reported by the host
        status: c_int,
    },
}

impl Display for CwdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CwdError::Unset(var) => write!(f, "`{var}` is not set"),
            CwdError::Empty(var) => write!(f, "`{var}` is empty"),
            CwdError::Inaccessible { path, status } => {
                write!(f, "cannot enter {path:?} (status {status})")
            }
        }
    }
}

/// A fatal bootstrap error
///
/// None of these is recoverable: a partially initialized Keep must never hand
/// control to the payload.
#[derive(Debug)]
pub enum Error {
    /// A host bridge module failed to load
    ModuleLoad {
        /// The module
        module: Module,
        /// The status reported by the host
        status: c_int,
    },

    /// A filesystem could not be mounted
    Mount {
        /// The filesystem type
        fs: &'static str,
        /// The mount point (or name) of the filesystem
        target: String,
        /// The status reported by the host
        status: c_int,
    },

    /// The host supplied invalid arguments or environment
    InvalidHostArgs(&'static str),

    /// The working directory could not be entered
    Cwd(CwdError),

    /// The payload image could not be relocated
    Relocation(rcrt1::Error),
}

impl Error {
    /// The process exit status for this error
    pub fn exit_code(&self) -> c_int {
        libc::EXIT_FAILURE
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::ModuleLoad { module, status } => {
                write!(f, "failed to load the {module} host module (status {status})")
            }
            Error::Mount { fs, target, status } => {
                write!(f, "failed to mount {fs} at `{target}` (status {status})")
            }
            Error::InvalidHostArgs(why) => write!(f, "invalid host arguments: {why}"),
            Error::Cwd(e) => write!(f, "cannot set the working directory: {e}"),
            Error::Relocation(e) => write!(f, "failed to relocate the payload: {e}"),
        }
    }
}

impl error::Error for Error {}

impl From<CwdError> for Error {
    fn from(value: CwdError) -> Self {
        Self::Cwd(value)
    }
}

impl From<rcrt1::Error> for Error {
    fn from(value: rcrt1::Error) -> Self {
        Self::Relocation(value)
    }
}
