// SPDX-License-Identifier: Apache-2.0

mod log;

use self::log::LogOptions;

use std::ffi::CString;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use keep_bootstrap::host::nil::NilHost;
use keep_bootstrap::{launch, Config};
use ::log::info;

/// Runs a static PIE payload through the Keep bootstrap in this process
///
/// The payload is mapped without any isolation. Its arguments are the
/// payload path followed by ARGS, and its environment is the environment of
/// this process, filtered the same way a Keep filters the host environment.
#[derive(Parser, Debug)]
#[clap(version)]
pub struct Options {
    /// Logging options
    #[clap(flatten)]
    logger: LogOptions,

    /// Bootstrap configuration file (TOML)
    #[clap(long, env = "ENARX_BOOTSTRAP_CONFIG")]
    config: Option<PathBuf>,

    /// The payload to run
    payload: PathBuf,

    /// Arguments passed to the payload
    #[clap(allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Options {
    fn config(&self) -> Result<Config> {
        match self.config {
            Some(ref path) => {
                let toml = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read `{}`", path.display()))?;
                Config::from_toml(&toml)
                    .with_context(|| format!("invalid configuration `{}`", path.display()))
            }
            None => Ok(Config::default()),
        }
    }

    fn argv(&self) -> Result<Vec<CString>> {
        let payload = CString::new(self.payload.clone().into_os_string().into_vec())
            .context("payload path contains a NUL byte")?;

        let mut argv = vec![payload];
        for arg in &self.args {
            argv.push(CString::new(arg.as_str()).context("argument contains a NUL byte")?);
        }
        Ok(argv)
    }

    pub fn execute(self) -> Result<i32> {
        self.logger.init();

        info!("logging initialized!");
        info!("CLI opts: {:?}", self);

        let config = self.config()?;
        let argv = self.argv()?;
        let envp = std::env::vars_os()
            .filter_map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend(value.into_vec());
                CString::new(entry).ok()
            })
            .collect();

        let payload = std::fs::read(&self.payload)
            .with_context(|| format!("failed to read `{}`", self.payload.display()))?;
        let mut host = NilHost::new(&payload, argv, envp)?;

        Ok(launch(&mut host, &config))
    }
}
