// Kernel and init-system capability detection
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::defaults;
use crate::host::{HostError, HostMemoryState};
use crate::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Cannot load zram module: {0}")]
    ModuleLoad(#[source] HostError),
    #[error("Cannot read compression algorithms: {0}")]
    Unreadable(#[source] HostError),
}

#[derive(Error, Debug)]
#[error("No persistence mechanism: neither systemd, rc.local nor {} is available", defaults::CRON_DIR)]
pub struct UnsupportedHostError;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid compression algorithm name: {0:?}")]
pub struct InvalidAlgorithm(pub String);

/// A compression algorithm name that is safe to place in generated
/// unit files and shell scripts: 1-32 chars of `[a-z0-9-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Algorithm(String);

impl Algorithm {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Algorithm {
    type Err = InvalidAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = (1..=32).contains(&s.len())
            && s
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidAlgorithm(s.to_string()))
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sysfs directory of the managed zram device
pub fn zram_sysfs() -> PathBuf {
    PathBuf::from(format!("/sys/block/zram{}", defaults::ZRAM_DEVICE))
}

/// Device node of the managed zram device
pub fn zram_dev() -> PathBuf {
    PathBuf::from(format!("{}{}", defaults::ZRAM_DEV_PREFIX, defaults::ZRAM_DEVICE))
}

/// Parse a zram `comp_algorithm` listing such as `lzo [lzo-rle] lz4 zstd`
pub fn parse_algorithms(content: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in content
        .split_whitespace()
        .map(|w| w.trim_start_matches('[').trim_end_matches(']'))
        .filter(|w| !w.is_empty())
    {
        if !out.iter().any(|existing| existing == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// Compression algorithms the kernel's zram driver reports, in kernel order.
/// Empty when unknown.
pub fn available_compression_algorithms(host: &dyn HostMemoryState) -> Vec<String> {
    match read_algorithms(host) {
        Ok(algs) => algs,
        Err(e) => {
            warn!("Zram: {} (assuming defaults)", e);
            Vec::new()
        }
    }
}

/// Compression algorithms listed by an already loaded zram driver.
/// Never loads the module; empty when zram is absent.
pub fn known_compression_algorithms(host: &dyn HostMemoryState) -> Vec<String> {
    host.read_file(&zram_sysfs().join("comp_algorithm"))
        .map(|content| parse_algorithms(&content))
        .unwrap_or_default()
}

fn read_algorithms(host: &dyn HostMemoryState) -> Result<Vec<String>, CapabilityError> {
    let control = zram_sysfs().join("comp_algorithm");
    if !host.exists(&control) && !host.exists(Path::new(defaults::ZRAM_MODULE)) {
        info!("Zram: module not loaded, loading it to query algorithms");
        host.run(&[defaults::MODPROBE, "zram", "num_devices=1"])
            .map_err(CapabilityError::ModuleLoad)?;
    }
    let content = host
        .read_file(&control)
        .map_err(CapabilityError::Unreadable)?;
    Ok(parse_algorithms(&content))
}

/// Pick the compression algorithm to use.
///
/// An empty catalog means unknown, so the request is returned unchanged.
/// Otherwise the request wins if available, then the preference list,
/// then whatever the kernel lists first.
pub fn select_compression(requested: &str, available: &[String]) -> String {
    if available.is_empty() || available.iter().any(|a| a == requested) {
        return requested.to_string();
    }
    defaults::ALG_PREFERENCE
        .iter()
        .find(|pref| available.iter().any(|a| a == *pref))
        .map(|pref| pref.to_string())
        .unwrap_or_else(|| available[0].clone())
}

/// How zram activation survives a reboot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMechanism {
    Systemd,
    LegacyInit {
        rc_local: Option<PathBuf>,
        cron: Option<PathBuf>,
    },
}

impl fmt::Display for PersistenceMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceMechanism::Systemd => write!(f, "systemd unit"),
            PersistenceMechanism::LegacyInit { rc_local, cron } => {
                let surfaces: Vec<String> = rc_local
                    .iter()
                    .chain(cron.iter())
                    .map(|p| p.display().to_string())
                    .collect();
                write!(f, "legacy init ({})", surfaces.join(" + "))
            }
        }
    }
}

/// Choose the persistence mechanism for this host.
///
/// systemd needs both a systemd boot and the manager's private socket,
/// so a chroot or container with unit directories but no running
/// manager falls through to the legacy surfaces.
pub fn detect_persistence(
    host: &dyn HostMemoryState,
) -> Result<PersistenceMechanism, UnsupportedHostError> {
    if host.booted_with_systemd() && host.exists(Path::new(defaults::SYSTEMD_PRIVATE_SOCKET)) {
        debug!("Persistence: systemd is running");
        return Ok(PersistenceMechanism::Systemd);
    }

    let rc_local = defaults::RC_LOCAL_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| host.is_writable(p));
    let cron = Some(PathBuf::from(defaults::CRON_DIR)).filter(|p| host.exists(p));

    if rc_local.is_none() && cron.is_none() {
        return Err(UnsupportedHostError);
    }
    Ok(PersistenceMechanism::LegacyInit { rc_local, cron })
}
