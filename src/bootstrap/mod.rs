// SPDX-License-Identifier: Apache-2.0
//! The Bootstrap State Machine
//!
//! This file contains the `Bootstrap` type which is a state machine for
//! bringing up a payload. You start by converting a `Config` into a
//! `Bootstrap` and then step through the states, handing the host to every
//! transition. Everything a later state needs is carried by the state value
//! itself; there is no global state.
//!
//! The transitions are strictly linear. Any error ends the bootstrap.
//!
//! The types are defined in sequential order.

mod configured;
mod loaded;
mod mounted;
mod relocated;
mod resolved;

use crate::config::Config;
use crate::entry::Trampoline;
use crate::error::Error;
use crate::host::Host;
use crate::merge::MergedExecBuffer;
use crate::mode::Launch;

use std::ffi::c_int;

use log::error;

/// The first state, indicating successful configuration
pub struct Configured {
    config: Config,
}

/// The second state, indicating that all host bridge modules are loaded
pub struct Loaded {
    config: Config,
}

/// The third state, indicating that the filesystem view is established
pub struct Mounted {
    config: Config,
    launch: Launch,
}

/// The fourth state, indicating that the payload arguments are laid out
pub struct Resolved {
    args: MergedExecBuffer,
}

/// The fifth state, indicating that the payload image is relocated
pub struct Relocated {
    trampoline: Trampoline,
}

/// A bootstrap in state `T`
pub struct Bootstrap<T>(T);

impl From<Config> for Bootstrap<Configured> {
    fn from(config: Config) -> Self {
        Self(Configured { config })
    }
}

impl Bootstrap<Mounted> {
    /// The launch mode decided while mounting
    pub fn launch(&self) -> &Launch {
        &self.0.launch
    }
}

impl Bootstrap<Resolved> {
    /// The arguments the payload will receive
    pub fn args(&self) -> &MergedExecBuffer {
        &self.0.args
    }
}

impl Bootstrap<Relocated> {
    /// The trampoline into the payload
    pub fn trampoline(&self) -> &Trampoline {
        &self.0.trampoline
    }
}

/// Runs the bootstrap from start to the payload
///
/// Only returns, with the status of [`Host::enter`], if the host lets the
/// payload return.
pub fn run(host: &mut impl Host, config: &Config) -> Result<c_int, Error> {
    let configured = Bootstrap::from(config.clone());
    let loaded = configured.next(host)?;
    let mounted = loaded.next(host)?;
    let resolved = mounted.next(host)?;
    let relocated = resolved.next(host)?;
    Ok(relocated.next(host))
}

/// Runs the bootstrap and turns a failure into an exit status
///
/// The failure is reported through the `log` facade.
pub fn launch(host: &mut impl Host, config: &Config) -> c_int {
    match run(host, config) {
        Ok(status) => status,
        Err(e) => {
            error!("bootstrap failed: {e}");
            e.exit_code()
        }
    }
}
