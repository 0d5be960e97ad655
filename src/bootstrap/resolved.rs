// SPDX-License-Identifier: Apache-2.0

use super::{Bootstrap, Relocated, Resolved};
use crate::entry::Trampoline;
use crate::error::Error;
use crate::host::Host;

use log::info;

impl Bootstrap<Resolved> {
    /// Relocates the payload image in place
    pub fn next(self, host: &mut impl Host) -> Result<Bootstrap<Relocated>, Error> {
        let image = host.payload();
        let count = rcrt1::relocate(image)?;
        info!(
            "applied {count} relocations to the payload at {:p}",
            image.as_ptr()
        );

        Ok(Bootstrap(Relocated {
            trampoline: Trampoline::new(self.0.args),
        }))
    }
}
