// SPDX-License-Identifier: Apache-2.0

use super::{Bootstrap, Loaded, Mounted};
use crate::error::Error;
use crate::host::Host;
use crate::mode::Launch;
use crate::mount::mount;

use log::info;

impl Bootstrap<Loaded> {
    /// Decides the launch mode and establishes the filesystem view
    ///
    /// A standalone launch without a working directory fails here, before
    /// anything is mounted.
    pub fn next(self, host: &mut impl Host) -> Result<Bootstrap<Mounted>, Error> {
        let launch = Launch::from_host(&*host, &self.0.config)?;
        info!("mounting the filesystem for a {} payload", launch.mode());

        mount(host, launch.mode(), &self.0.config)?;

        Ok(Bootstrap(Mounted {
            config: self.0.config,
            launch,
        }))
    }
}
