// vm.swappiness persistence and live apply
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;

use crate::defaults;
use crate::host::HostMemoryState;
use crate::provision::{persist, PersistError};
use crate::{info, warn};

/// Contents of the sysctl.d drop-in
pub fn sysctl_conf(swappiness: u32) -> String {
    format!("vm.swappiness = {}\n", swappiness)
}

/// Persist `vm.swappiness` and apply it to the running kernel.
/// Only the persistent write can fail the step.
pub fn apply_swappiness(host: &dyn HostMemoryState, swappiness: u32) -> Result<(), PersistError> {
    let conf = Path::new(defaults::SYSCTL_CONF);
    persist(host, conf, &sysctl_conf(swappiness))?;
    info!("Swappiness: {} written to {}", swappiness, conf.display());

    match host.write_file(Path::new(defaults::PROC_SWAPPINESS), &swappiness.to_string()) {
        Ok(()) => info!("Swappiness: vm.swappiness = {} applied", swappiness),
        Err(e) => warn!("Swappiness: cannot apply now ({}); takes effect on next boot", e),
    }
    Ok(())
}

/// Current kernel value, if readable
pub fn current_swappiness(host: &dyn HostMemoryState) -> Option<u32> {
    host.read_file(Path::new(defaults::PROC_SWAPPINESS))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    #[test]
    fn test_apply_swappiness() {
        let host = FakeHost::new().with_file("/proc/sys/vm/swappiness", "60\n");
        apply_swappiness(&host, 180).unwrap();
        assert_eq!(
            host.file("/etc/sysctl.d/99-memtier.conf").unwrap(),
            "vm.swappiness = 180\n"
        );
        assert_eq!(current_swappiness(&host), Some(180));
    }

    #[test]
    fn test_apply_failure_is_not_fatal() {
        let host = FakeHost::new().read_only("/proc/sys/vm/swappiness");
        apply_swappiness(&host, 180).unwrap();
        assert!(host.file("/etc/sysctl.d/99-memtier.conf").is_some());
    }

    #[test]
    fn test_persist_failure() {
        let host = FakeHost::new().read_only("/etc/sysctl.d/99-memtier.conf");
        let err = apply_swappiness(&host, 180).unwrap_err();
        assert_eq!(err.path, Path::new("/etc/sysctl.d/99-memtier.conf"));
        assert!(host.effects().is_empty());
    }
}
