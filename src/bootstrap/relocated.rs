// SPDX-License-Identifier: Apache-2.0

use super::{Bootstrap, Relocated};
use crate::entry::resolve_entry;
use crate::host::Host;

use std::ffi::c_int;

use log::info;

impl Bootstrap<Relocated> {
    /// Enters the payload
    ///
    /// Panics if the relocated image has no valid entry point.
    pub fn next(self, host: &mut impl Host) -> c_int {
        let entry = resolve_entry(host.payload());
        info!("entering the payload at {entry:?}");

        // Safety: the image was relocated in the previous state and `entry`
        // was validated against it.
        unsafe { self.0.trampoline.invoke(host, entry) }
    }
}
