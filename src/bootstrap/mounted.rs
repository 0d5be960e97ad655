// SPDX-License-Identifier: Apache-2.0

use super::{Bootstrap, Mounted, Resolved};
use crate::config::Config;
use crate::error::{CwdError, Error};
use crate::host::Host;
use crate::import::{import, HostArgs};
use crate::merge::MergedExecBuffer;
use crate::mode::Launch;

use std::ffi::{CStr, CString};
use std::ptr::null;

use log::{debug, info};

/// Takes the arguments from the pre-main hook and the filtered current environment
fn mesh(host: &mut impl Host, config: &Config) -> Result<MergedExecBuffer, Error> {
    let mut argc = 0;
    let mut argv = null();

    info!("invoking the pre-main hook");
    host.premain(&mut argc, &mut argv);
    debug!("pre-main hook reported {argc} arguments");

    if argc < 0 {
        return Err(Error::InvalidHostArgs("negative argument count from pre-main"));
    }
    if argc > 0 && argv.is_null() {
        return Err(Error::InvalidHostArgs("missing arguments from pre-main"));
    }

    // Safety: the pre-main hook and the environment hand out process-lifetime
    // string arrays.
    let mut args = unsafe { MergedExecBuffer::merge(argc, argv, host.environ()) };
    args.retain_env(&config.env_prefix);
    Ok(args)
}

/// Imports the arguments from the host and enters the working directory
fn standalone(
    host: &mut impl Host,
    cwd: &CStr,
    config: &Config,
) -> Result<MergedExecBuffer, Error> {
    let mut raw = HostArgs::default();
    match host.host_args(&mut raw) {
        0 => debug!("host reported {} arguments, {} environment entries", raw.argc, raw.envc),
        status => {
            debug!("host argument call failed with status {status}");
            return Err(Error::InvalidHostArgs("host argument call failed"));
        }
    }

    let args = import(host.platform(), &raw, &config.env_prefix)?;

    match host.chdir(cwd) {
        0 => info!("changed the working directory to {cwd:?}"),
        status => {
            return Err(CwdError::Inaccessible {
                path: CString::from(cwd),
                status,
            }
            .into())
        }
    }

    Ok(MergedExecBuffer::from(args))
}

impl Bootstrap<Mounted> {
    /// Obtains the payload arguments according to the launch mode
    pub fn next(self, host: &mut impl Host) -> Result<Bootstrap<Resolved>, Error> {
        let args = match self.0.launch {
            Launch::Mesh => mesh(host, &self.0.config)?,
            Launch::Standalone { ref cwd } => standalone(host, cwd, &self.0.config)?,
        };

        info!(
            "resolved {} arguments and {} environment entries",
            args.argc(),
            args.envc()
        );

        Ok(Bootstrap(Resolved { args }))
    }
}
