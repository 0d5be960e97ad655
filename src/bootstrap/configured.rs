// SPDX-License-Identifier: Apache-2.0

use super::{Bootstrap, Configured, Loaded};
use crate::error::Error;
use crate::host::{Host, Module};
use crate::tls::RESERVED_TLS_SIZE;

use log::{debug, info};

impl Bootstrap<Configured> {
    /// Loads the host bridge modules
    pub fn next(self, host: &mut impl Host) -> Result<Bootstrap<Loaded>, Error> {
        info!("loading host modules");

        for module in Module::ALL {
            match host.load_module(module) {
                0 => debug!("loaded the {module} host module"),
                status => return Err(Error::ModuleLoad { module, status }),
            }
        }

        if let Some(tls) = host.reserved_tls() {
            assert!(
                tls.is_adjacent(),
                "reserved TLS region at {:#x} does not end {RESERVED_TLS_SIZE} bytes later at the thread descriptor {:#x}",
                tls.region,
                tls.thread_descriptor,
            );
        }

        Ok(Bootstrap(Loaded {
            config: self.0.config,
        }))
    }
}
