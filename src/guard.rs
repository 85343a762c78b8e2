// Detection of swap configuration that is already in place
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;

use crate::defaults;
use crate::host::HostMemoryState;
use crate::meminfo::active_swaps;
use crate::debug;

/// Which swap tiers already exist on the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExistingConfigurationState {
    pub zram_present: bool,
    pub non_zram_swap_present: bool,
}

impl ExistingConfigurationState {
    pub fn any_present(&self) -> bool {
        self.zram_present || self.non_zram_swap_present
    }
}

/// Inspect live swap state, unit inventory, the swap file and fstab.
pub fn inspect(host: &dyn HostMemoryState, swapfile: &Path) -> ExistingConfigurationState {
    let swaps = active_swaps(host);

    let zram_swap = swaps.iter().any(|s| s.is_zram());
    let zram_unit = zram_units(host);
    if let Some(unit) = zram_unit.first() {
        debug!("Guard: found zram unit {}", unit);
    }

    let other_swap = swaps.iter().any(|s| !s.is_zram());
    let swapfile_exists = host.exists(swapfile);
    let fstab_swap = host
        .read_file(Path::new(defaults::FSTAB))
        .map(|content| fstab_has_swap(&content))
        .unwrap_or(false);
    debug!(
        "Guard: active non-zram swap={}, {} exists={}, fstab swap={}",
        other_swap,
        swapfile.display(),
        swapfile_exists,
        fstab_swap
    );

    ExistingConfigurationState {
        zram_present: zram_swap || !zram_unit.is_empty(),
        non_zram_swap_present: other_swap || swapfile_exists || fstab_swap,
    }
}

/// Unit files whose name mentions zram, in any unit directory
pub fn zram_units(host: &dyn HostMemoryState) -> Vec<String> {
    defaults::UNIT_SEARCH_DIRS
        .iter()
        .flat_map(|dir| host.glob(&format!("{}/*{}*", dir, defaults::ZRAM_UNIT_FRAGMENT)))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .collect()
}

/// True if an uncommented fstab entry has type `swap`
pub fn fstab_has_swap(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| line.split_whitespace().nth(2) == Some("swap"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    fn state(host: &FakeHost) -> ExistingConfigurationState {
        inspect(host, Path::new("/swapfile"))
    }

    #[test]
    fn test_clean_host() {
        let host = FakeHost::new().with_file("/etc/fstab", "UUID=abc / ext4 defaults 0 1\n");
        assert_eq!(state(&host), ExistingConfigurationState::default());
        assert!(!state(&host).any_present());
    }

    #[test]
    fn test_active_zram() {
        let host = FakeHost::new().with_swap("/dev/zram0", 100);
        let s = state(&host);
        assert!(s.zram_present);
        assert!(!s.non_zram_swap_present);
    }

    #[test]
    fn test_zram_unit_file() {
        let host = FakeHost::new().with_file("/etc/systemd/system/zram-swap.service", "");
        assert!(state(&host).zram_present);

        let host = FakeHost::new().with_file("/usr/lib/systemd/system/systemd-zram-setup@.service", "");
        assert!(state(&host).zram_present);
    }

    #[test]
    fn test_active_partition() {
        let host = FakeHost::new().with_swap("/dev/sda2", -2);
        let s = state(&host);
        assert!(!s.zram_present);
        assert!(s.non_zram_swap_present);
    }

    #[test]
    fn test_swapfile_on_disk() {
        let host = FakeHost::new().with_file("/swapfile", "");
        assert!(state(&host).non_zram_swap_present);
    }

    #[test]
    fn test_fstab_swap_entry() {
        let host = FakeHost::new().with_file("/etc/fstab", "/dev/sdb1 none swap sw 0 0\n");
        assert!(state(&host).non_zram_swap_present);
    }

    #[test]
    fn test_fstab_has_swap() {
        assert!(!fstab_has_swap("# /swapfile none swap sw 0 0\n"));
        assert!(!fstab_has_swap("UUID=x /home ext4 defaults 0 2\n\n"));
        assert!(!fstab_has_swap("/swap/dir /mnt none bind 0 0\n"));
        assert!(fstab_has_swap("  UUID=y\tnone\tswap\tdefaults\t0\t0\n"));
    }

    #[test]
    fn test_inspect_has_no_side_effects() {
        let host = FakeHost::new()
            .with_swap("/dev/zram0", 100)
            .with_file("/swapfile", "");
        let _ = state(&host);
        assert!(host.effects().is_empty());
    }
}
