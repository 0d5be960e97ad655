// SPDX-License-Identifier: Apache-2.0

//! The reserved thread-local region
//!
//! The Keep runtime keeps a fixed-size region in front of the thread
//! descriptor of the initial thread. The bootstrap does not use it, but it
//! insists the layout is what the runtime expects before going any further.

/// Size of the reserved thread-local region in bytes
pub const RESERVED_TLS_SIZE: usize = 1024;

/// Location of the reserved thread-local region
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReservedTls {
    /// Start address of the region
    pub region: usize,

    /// Address of the thread descriptor
    pub thread_descriptor: usize,
}

impl ReservedTls {
    /// Whether the region ends exactly where the thread descriptor starts
    pub fn is_adjacent(&self) -> bool {
        self.region.checked_add(RESERVED_TLS_SIZE) == Some(self.thread_descriptor)
    }
}
