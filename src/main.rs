// SPDX-License-Identifier: Apache-2.0

//! Runs a payload through the Keep bootstrap on the nil host

#![deny(clippy::all)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

mod cli;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    let app = cli::Options::parse();
    let status = app.execute()?;
    std::process::exit(status)
}
