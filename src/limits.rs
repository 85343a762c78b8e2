// Memory caps for service units
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::defaults;
use crate::host::{HostError, HostMemoryState};
use crate::meminfo::MemoryProfile;
use crate::provision::{persist, PersistError};
use crate::systemd::systemctl;
use crate::{info, warn};

#[derive(Error, Debug)]
pub enum LimitError {
    #[error("Unit file not found: {0}")]
    UnitNotFound(String),
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: HostError,
    },
    #[error("{0} has no [Service] section")]
    NoServiceSection(PathBuf),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

pub type Result<T> = std::result::Result<T, LimitError>;

/// `MemoryMax=` and `MemoryHigh=` values in MiB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    pub max_mb: u64,
    pub high_mb: u64,
}

impl MemoryLimits {
    pub fn for_total(total_mb: u64) -> Self {
        Self {
            max_mb: total_mb * defaults::MEMORY_MAX_PERCENT / 100,
            high_mb: total_mb * defaults::MEMORY_HIGH_PERCENT / 100,
        }
    }

    pub fn for_profile(profile: &MemoryProfile) -> Self {
        Self::for_total(profile.total_mb())
    }
}

/// Rewrite a unit file so its `[Service]` section carries exactly one
/// `MemoryMax=` and one `MemoryHigh=`, right after the section header.
/// Returns `None` if the unit has no `[Service]` section.
pub fn apply_memory_limits(content: &str, limits: &MemoryLimits) -> Option<String> {
    let mut out: Vec<String> = Vec::new();
    let mut found = false;

    for line in content.lines() {
        let key = line.trim_start();
        if key.starts_with("MemoryMax=") || key.starts_with("MemoryHigh=") {
            continue;
        }
        out.push(line.to_string());
        if line.trim() == "[Service]" && !found {
            found = true;
            out.push(format!("MemoryMax={}M", limits.max_mb));
            out.push(format!("MemoryHigh={}M", limits.high_mb));
        }
    }

    if !found {
        return None;
    }
    let mut rendered = out.join("\n");
    rendered.push('\n');
    Some(rendered)
}

/// Find a unit file by name in the unit search path
pub fn find_unit(host: &dyn HostMemoryState, unit: &str) -> Option<PathBuf> {
    defaults::UNIT_SEARCH_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(unit))
        .find(|path| host.exists(path))
}

/// Cap a service's memory and reload the manager.
/// A failed reload only warns; the new limits apply on next start.
pub fn limit_unit(host: &dyn HostMemoryState, unit: &str, limits: &MemoryLimits) -> Result<PathBuf> {
    let path = find_unit(host, unit).ok_or_else(|| LimitError::UnitNotFound(unit.to_string()))?;
    let content = host.read_file(&path).map_err(|source| LimitError::Read {
        path: path.clone(),
        source,
    })?;
    let updated =
        apply_memory_limits(&content, limits).ok_or_else(|| LimitError::NoServiceSection(path.clone()))?;

    if updated != content {
        persist(host, &path, &updated)?;
        info!(
            "Limits: {} MemoryMax={}M MemoryHigh={}M",
            path.display(),
            limits.max_mb,
            limits.high_mb
        );
    } else {
        info!("Limits: {} already up to date", path.display());
    }

    if let Err(e) = systemctl(host, &["daemon-reload"]) {
        warn!("Limits: {}", e);
    }
    Ok(path)
}
