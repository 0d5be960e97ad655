// SPDX-License-Identifier: Apache-2.0

//! The filesystem view of the payload

use crate::config::Config;
use crate::error::Error;
use crate::host::Host;
use crate::mode::TrustMode;

use std::ffi::CString;

use log::{debug, info};

/// The host directory exposed to the payload
pub const HOSTFS_SOURCE: &str = "/";

/// Filesystem type of the host filesystem
pub const HOSTFS_TYPE: &str = "hostfs";

/// Filesystem type of the memory filesystem
pub const MEMFS_TYPE: &str = "memfs";

/// Where the host filesystem is mounted in the given trust mode
///
/// A standalone payload sees the host filesystem at `/`, a mesh payload
/// only below the configured mount point.
pub fn resolve_mount_target(mode: TrustMode, config: &Config) -> &str {
    match mode {
        TrustMode::Standalone => HOSTFS_SOURCE,
        TrustMode::Mesh => &config.mount_point,
    }
}

fn cstring(value: &str, fs: &'static str) -> Result<CString, Error> {
    CString::new(value).map_err(|_| Error::Mount {
        fs,
        target: value.into(),
        status: libc::EINVAL,
    })
}

/// Mounts the host filesystem and registers the memory filesystem
pub fn mount(host: &mut impl Host, mode: TrustMode, config: &Config) -> Result<(), Error> {
    let target = resolve_mount_target(mode, config);
    let source = cstring(HOSTFS_SOURCE, HOSTFS_TYPE)?;
    let fstype = cstring(HOSTFS_TYPE, HOSTFS_TYPE)?;
    let path = cstring(target, HOSTFS_TYPE)?;

    match host.mount(&source, &path, &fstype, 0) {
        0 => info!("mounted {HOSTFS_TYPE} at `{target}` ({mode})"),
        status => {
            return Err(Error::Mount {
                fs: HOSTFS_TYPE,
                target: target.into(),
                status,
            })
        }
    }

    let memfs = cstring(&config.memfs, MEMFS_TYPE)?;
    match host.memfs(&memfs) {
        0 => {
            debug!("registered {MEMFS_TYPE} `{}`", config.memfs);
            Ok(())
        }
        status => Err(Error::Mount {
            fs: MEMFS_TYPE,
            target: config.memfs.clone(),
            status,
        }),
    }
}
