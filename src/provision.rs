// Errors and outcomes shared by the tier provisioners
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::capability::InvalidAlgorithm;
use crate::host::{HostError, HostMemoryState};

/// Writing durable state (fstab, units, boot hooks) failed
#[derive(Error, Debug)]
#[error("Cannot persist {path}: {source}")]
pub struct PersistError {
    pub path: PathBuf,
    #[source]
    pub source: HostError,
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Algorithm(#[from] InvalidAlgorithm),
    #[error("Not enough space for {path}: need {needed_mb} MiB, {available_mb} MiB free")]
    NoSpace {
        path: PathBuf,
        needed_mb: u64,
        available_mb: u64,
    },
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// What a provisioner did to its tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    /// Size 0 in the plan
    Disabled,
    /// Active now and registered for future boots
    Active { persisted_via: String },
    /// Active now, but nothing will bring it back after a reboot
    ActiveNotPersistent,
}

impl fmt::Display for TierOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierOutcome::Disabled => write!(f, "disabled"),
            TierOutcome::Active { persisted_via } => write!(f, "active (persisted via {})", persisted_via),
            TierOutcome::ActiveNotPersistent => write!(f, "active (NOT persistent across reboot)"),
        }
    }
}

/// Write a durable file, mapping failure to `PersistError`
pub fn persist(host: &dyn HostMemoryState, path: &Path, content: &str) -> std::result::Result<(), PersistError> {
    host.write_file(path, content).map_err(|source| PersistError {
        path: path.to_path_buf(),
        source,
    })
}
