// SPDX-License-Identifier: Apache-2.0

//! The Keep bootstrap
//!
//! This crate takes a freshly loaded Keep, whose payload image has not been
//! relocated yet, and turns it into a running payload. Every input comes
//! from the untrusted host, so everything crossing the boundary is validated
//! and copied before it is used.
//!
//! The bootstrap is a linear state machine (see [`bootstrap`]):
//!
//! 1. load the host bridge modules
//! 2. mount the host filesystem ([`mount`]) according to the [`mode`]
//! 3. obtain the payload arguments, either from the mesh pre-main hook or by
//!    importing them from the host ([`import`]), and lay them out
//!    ([`merge`])
//! 4. relocate the payload image ([`rcrt1`])
//! 5. resolve and enter the payload entry point ([`entry`])
//!
//! Any failure is fatal. There is no retry and no degraded mode.

#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bootstrap;
pub mod config;
pub mod entry;
pub mod error;
pub mod host;
pub mod import;
pub mod merge;
pub mod mode;
pub mod mount;
pub mod tls;

pub use bootstrap::{launch, run};
pub use config::Config;
pub use error::Error;
pub use host::Host;
