// SPDX-License-Identifier: Apache-2.0

//! Trust modes
//!
//! A Keep either runs standalone, taking its arguments from the host, or as
//! part of a mesh, where an orchestration layer provides them through the
//! pre-main hook. The mode is decided once, from the environment, before the
//! filesystem is mounted.

use crate::config::Config;
use crate::error::{CwdError, Error};
use crate::host::Host;

use std::ffi::{CStr, CString};
use std::fmt::{self, Display, Formatter};

/// How much the Keep trusts its host for its inputs
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrustMode {
    /// Arguments are imported from the host
    Standalone,

    /// Arguments come from the pre-main hook
    Mesh,
}

impl TrustMode {
    /// Classifies the value of the trust mode signal
    ///
    /// Only the exact value `1` selects [`TrustMode::Mesh`].
    pub fn from_signal(signal: Option<&CStr>) -> Self {
        match signal.map(CStr::to_bytes) {
            Some(b"1") => Self::Mesh,
            _ => Self::Standalone,
        }
    }
}

impl Display for TrustMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standalone => "standalone",
            Self::Mesh => "mesh",
        })
    }
}

/// A trust mode together with what the mode needs to launch the payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Launch {
    /// Standalone payload
    Standalone {
        /// Working directory to change into before entering the payload
        cwd: CString,
    },

    /// Mesh payload
    Mesh,
}

impl Launch {
    /// Decides the launch mode with the environment lookup `getenv`
    ///
    /// A standalone launch requires a non-empty working directory.
    pub fn from_env<'a>(
        getenv: impl Fn(&str) -> Option<&'a CStr>,
        config: &Config,
    ) -> Result<Self, Error> {
        match TrustMode::from_signal(getenv(&config.premain_var)) {
            TrustMode::Mesh => Ok(Self::Mesh),
            TrustMode::Standalone => match getenv(&config.cwd_var) {
                None => Err(CwdError::Unset(config.cwd_var.clone()).into()),
                Some(cwd) if cwd.to_bytes().is_empty() => {
                    Err(CwdError::Empty(config.cwd_var.clone()).into())
                }
                Some(cwd) => Ok(Self::Standalone { cwd: cwd.into() }),
            },
        }
    }

    /// Decides the launch mode from the environment of `host`
    pub fn from_host(host: &impl Host, config: &Config) -> Result<Self, Error> {
        Self::from_env(|key| host.getenv(key), config)
    }

    /// The trust mode of this launch
    pub fn mode(&self) -> TrustMode {
        match self {
            Self::Standalone { .. } => TrustMode::Standalone,
            Self::Mesh => TrustMode::Mesh,
        }
    }
}
