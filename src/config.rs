// SPDX-License-Identifier: Apache-2.0

//! Bootstrap configuration
//!
//! A Keep always boots with [`Config::default()`], which is part of the
//! measured image. Other values are only meant for running the bootstrap
//! on the nil host.
//!
//! ```
//! use keep_bootstrap::Config;
//!
//! let config = Config::from_toml(r#"mount_point = "/mnt/host""#).unwrap();
//! assert_eq!(config.mount_point, "/mnt/host");
//! assert_eq!(config.env_prefix, "ENARX_");
//! ```

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

/// Only environment variables starting with this prefix enter the Keep
pub const ENV_PREFIX: &str = "ENARX_";

/// Setting this variable to `1` selects the mesh trust mode
pub const PREMAIN_VAR: &str = "ENARX_PREMAIN";

/// The working directory of a standalone payload
pub const CWD_VAR: &str = "ENARX_CWD";

/// Where the host filesystem is mounted in the mesh trust mode
pub const MESH_MOUNT_POINT: &str = "/enarx/hostfs";

/// Name of the in-Keep memory filesystem
pub const MEMFS: &str = "enarx_memfs";

/// The configuration of the bootstrap
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Environment passthrough prefix
    pub env_prefix: String,

    /// Trust mode signal variable
    pub premain_var: String,

    /// Working directory variable
    pub cwd_var: String,

    /// Mount point of the host filesystem in the mesh trust mode
    pub mount_point: String,

    /// Name of the memory filesystem
    pub memfs: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_prefix: ENV_PREFIX.into(),
            premain_var: PREMAIN_VAR.into(),
            cwd_var: CWD_VAR.into(),
            mount_point: MESH_MOUNT_POINT.into(),
            memfs: MEMFS.into(),
        }
    }
}

impl Config {
    /// Parses and validates a TOML configuration
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml).context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration is consistent
    ///
    /// The signal variables have to survive the environment filter, and the
    /// mesh mount point has to be a proper subdirectory of `/`.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.env_prefix.is_empty(), "`env_prefix` must not be empty");

        for var in [&self.premain_var, &self.cwd_var] {
            ensure!(
                var.starts_with(&self.env_prefix),
                "`{var}` does not start with `{}`",
                self.env_prefix
            );
            ensure!(!var.contains('='), "`{var}` must not contain `=`");
        }

        ensure!(
            self.mount_point.starts_with('/') && !self.mount_point.trim_matches('/').is_empty(),
            "`mount_point` must be an absolute path below `/`"
        );
        ensure!(!self.memfs.is_empty(), "`memfs` must not be empty");

        for value in [&self.env_prefix, &self.mount_point, &self.memfs] {
            ensure!(!value.contains('\0'), "{value:?} contains a NUL byte");
        }

        Ok(())
    }
}
