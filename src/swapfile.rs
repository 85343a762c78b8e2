// Disk-backed swap file tier
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};

use crate::defaults;
use crate::host::HostMemoryState;
use crate::meminfo::is_active_swap;
use crate::provision::{persist, PersistError, ProvisionError, Result, TierOutcome};
use crate::{info, warn};

/// Creates, activates and persists a single swap file
pub struct SwapFileProvisioner<'a> {
    host: &'a dyn HostMemoryState,
    path: PathBuf,
}

impl<'a> SwapFileProvisioner<'a> {
    pub fn new(host: &'a dyn HostMemoryState, path: impl Into<PathBuf>) -> Self {
        Self {
            host,
            path: path.into(),
        }
    }

    /// Make the swap file active at `priority` and listed in fstab.
    ///
    /// An existing file is reused as-is, never resized. Safe to call
    /// again with the same arguments.
    pub fn ensure(&self, size_mb: u64, priority: i32) -> Result<TierOutcome> {
        if size_mb == 0 {
            info!("swapFile: disabled");
            return Ok(TierOutcome::Disabled);
        }

        if self.host.exists(&self.path) {
            info!("swapFile: {} already exists, reusing it", self.path.display());
        } else {
            self.create(size_mb)?;
        }

        self.activate(priority)?;
        self.persist(priority)?;

        info!(
            "swapFile: {} active with priority {}",
            self.path.display(),
            priority
        );
        Ok(TierOutcome::Active {
            persisted_via: defaults::FSTAB.to_string(),
        })
    }

    fn create(&self, size_mb: u64) -> Result<()> {
        if let Some(available_mb) = self.host.available_mb(&self.path) {
            if available_mb < size_mb {
                warn!("swapFile: ENOSPC (need {}MB, have {}MB)", size_mb, available_mb);
                return Err(ProvisionError::NoSpace {
                    path: self.path.clone(),
                    needed_mb: size_mb,
                    available_mb,
                });
            }
        }

        let path = self.path.to_string_lossy();
        info!("swapFile: creating {} ({}MB)", path, size_mb);

        let size_arg = format!("{}M", size_mb);
        if let Err(e) = self.host.run(&["fallocate", "-l", &size_arg, &path]) {
            // Some filesystems reject fallocate; zero-filling always works
            warn!("swapFile: fallocate failed ({}), falling back to dd", e);
            self.discard_partial();
            let of_arg = format!("of={}", path);
            let count_arg = format!("count={}", size_mb);
            if let Err(e) = self
                .host
                .run(&["dd", "if=/dev/zero", &of_arg, "bs=1M", &count_arg])
            {
                self.discard_partial();
                return Err(e.into());
            }
        }

        if let Err(e) = self.host.set_mode(&self.path, 0o600) {
            self.discard_partial();
            return Err(e.into());
        }

        if let Err(e) = self.host.run(&[defaults::MKSWAP, &path]) {
            // Leaving an unformatted file would make the next run reuse it
            self.discard_partial();
            return Err(e.into());
        }
        Ok(())
    }

    fn discard_partial(&self) {
        if self.host.exists(&self.path) {
            if let Err(e) = self.host.remove_file(&self.path) {
                warn!("swapFile: cannot remove {}: {}", self.path.display(), e);
            }
        }
    }

    fn activate(&self, priority: i32) -> Result<()> {
        if is_active_swap(self.host, &self.path) {
            info!("swapFile: {} is active, re-registering", self.path.display());
            if let Err(e) = self.host.swapoff(&self.path) {
                warn!("swapFile: swapoff {} failed: {}", self.path.display(), e);
            }
        }
        self.host.swapon(&self.path, priority)?;
        Ok(())
    }

    fn persist(&self, priority: i32) -> std::result::Result<(), PersistError> {
        let fstab = Path::new(defaults::FSTAB);
        let content = if self.host.exists(fstab) {
            self.host.read_file(fstab).map_err(|source| PersistError {
                path: fstab.to_path_buf(),
                source,
            })?
        } else {
            String::new()
        };

        let updated = upsert_fstab(&content, &self.path, &fstab_line(&self.path, priority));
        if updated == content {
            return Ok(());
        }
        persist(self.host, fstab, &updated)
    }
}

/// Escape a path for an fstab field
fn fstab_field(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\134")
        .replace(' ', "\\040")
        .replace('\t', "\\011")
}

/// The fstab entry registering `path` as swap
pub fn fstab_line(path: &Path, priority: i32) -> String {
    format!("{} none swap sw,pri={} 0 0", fstab_field(path), priority)
}

/// Replace the entry for `path` in place, or append one.
/// Extra entries for the same path are dropped so exactly one remains.
pub fn upsert_fstab(content: &str, path: &Path, line: &str) -> String {
    let field = fstab_field(path);
    let mut out = String::with_capacity(content.len() + line.len() + 1);
    let mut placed = false;

    for existing in content.lines() {
        let trimmed = existing.trim_start();
        let is_ours = !trimmed.starts_with('#')
            && trimmed.split_whitespace().next() == Some(field.as_str());
        if is_ours {
            if !placed {
                out.push_str(line);
                out.push('\n');
                placed = true;
            }
            continue;
        }
        out.push_str(existing);
        out.push('\n');
    }

    if !placed {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    const FSTAB: &str = "UUID=abcd / ext4 defaults 0 1\n";

    #[test]
    fn test_fstab_line() {
        assert_eq!(
            fstab_line(Path::new("/swapfile"), 10),
            "/swapfile none swap sw,pri=10 0 0"
        );
        assert_eq!(
            fstab_line(Path::new("/mnt/my swap"), 5),
            "/mnt/my\\040swap none swap sw,pri=5 0 0"
        );
    }

    #[test]
    fn test_upsert_appends() {
        let out = upsert_fstab(FSTAB, Path::new("/swapfile"), "/swapfile none swap sw,pri=10 0 0");
        assert_eq!(out, format!("{}/swapfile none swap sw,pri=10 0 0\n", FSTAB));
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let content = "# header\n/swapfile none swap defaults 0 0\nUUID=x /home ext4 defaults 0 2\n";
        let out = upsert_fstab(content, Path::new("/swapfile"), "/swapfile none swap sw,pri=10 0 0");
        assert_eq!(
            out,
            "# header\n/swapfile none swap sw,pri=10 0 0\nUUID=x /home ext4 defaults 0 2\n"
        );
    }

    #[test]
    fn test_upsert_collapses_duplicates_and_keeps_comments() {
        let content = "#/swapfile none swap sw 0 0\n/swapfile none swap sw 0 0\n/swapfile none swap sw,pri=3 0 0\n";
        let out = upsert_fstab(content, Path::new("/swapfile"), "/swapfile none swap sw,pri=10 0 0");
        assert_eq!(
            out,
            "#/swapfile none swap sw 0 0\n/swapfile none swap sw,pri=10 0 0\n"
        );
    }

    #[test]
    fn test_upsert_ignores_prefix_paths() {
        let content = "/swapfile2 none swap sw 0 0\n";
        let out = upsert_fstab(content, Path::new("/swapfile"), "/swapfile none swap sw,pri=10 0 0");
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn test_ensure_disabled() {
        let host = FakeHost::new();
        let outcome = SwapFileProvisioner::new(&host, "/swapfile").ensure(0, 10).unwrap();
        assert_eq!(outcome, TierOutcome::Disabled);
        assert!(host.effects().is_empty());
    }

    #[test]
    fn test_ensure_creates_file() {
        let host = FakeHost::new().with_file("/etc/fstab", FSTAB);
        let outcome = SwapFileProvisioner::new(&host, "/swapfile").ensure(1024, 10).unwrap();

        assert!(matches!(outcome, TierOutcome::Active { .. }));
        assert_eq!(
            host.commands(),
            vec!["fallocate -l 1024M /swapfile", "/sbin/mkswap /swapfile"]
        );
        assert_eq!(host.mode("/swapfile"), Some(0o600));
        assert_eq!(host.active_swaps(), vec![(PathBuf::from("/swapfile"), 10)]);
        assert!(host
            .file("/etc/fstab")
            .unwrap()
            .ends_with("/swapfile none swap sw,pri=10 0 0\n"));
    }

    #[test]
    fn test_ensure_falls_back_to_dd() {
        let host = FakeHost::new().failing("fallocate");
        SwapFileProvisioner::new(&host, "/swapfile").ensure(2048, 10).unwrap();
        assert_eq!(
            host.commands(),
            vec![
                "fallocate -l 2048M /swapfile",
                "dd if=/dev/zero of=/swapfile bs=1M count=2048",
                "/sbin/mkswap /swapfile",
            ]
        );
        assert_eq!(host.file("/etc/fstab").unwrap(), "/swapfile none swap sw,pri=10 0 0\n");
    }

    #[test]
    fn test_ensure_twice_writes_one_fstab_line() {
        let host = FakeHost::new().with_file("/etc/fstab", FSTAB);
        let provisioner = SwapFileProvisioner::new(&host, "/swapfile");
        provisioner.ensure(1024, 10).unwrap();
        provisioner.ensure(1024, 10).unwrap();

        let fstab = host.file("/etc/fstab").unwrap();
        assert_eq!(fstab.lines().filter(|l| l.starts_with("/swapfile")).count(), 1);
        // Second run reuses the file and re-registers it
        assert_eq!(host.commands().len(), 2);
        assert_eq!(host.active_swaps().len(), 1);
        assert!(host.effects().contains(&"swapoff /swapfile".to_string()));
    }

    #[test]
    fn test_ensure_reactivates_escaped_path() {
        let path = "/srv/swap\tdir\\a b";
        let host = FakeHost::new().with_file(path, "").with_swap(path, -2);
        SwapFileProvisioner::new(&host, path).ensure(1024, 10).unwrap();
        assert!(host.effects().contains(&format!("swapoff {}", path)));
        assert_eq!(host.active_swaps(), vec![(PathBuf::from(path), 10)]);
    }

    #[test]
    fn test_ensure_reuses_existing_file() {
        let host = FakeHost::new().with_file("/swapfile", "");
        SwapFileProvisioner::new(&host, "/swapfile").ensure(4096, 10).unwrap();
        assert!(host.commands().is_empty());
        assert_eq!(host.active_swaps(), vec![(PathBuf::from("/swapfile"), 10)]);
    }

    #[test]
    fn test_ensure_fixes_wrong_priority() {
        let host = FakeHost::new()
            .with_file("/swapfile", "")
            .with_swap("/swapfile", -2)
            .with_file("/etc/fstab", "/swapfile none swap defaults 0 0\n");
        SwapFileProvisioner::new(&host, "/swapfile").ensure(1024, 10).unwrap();
        assert_eq!(host.active_swaps(), vec![(PathBuf::from("/swapfile"), 10)]);
        assert_eq!(host.file("/etc/fstab").unwrap(), "/swapfile none swap sw,pri=10 0 0\n");
    }

    #[test]
    fn test_ensure_swapoff_failure_is_not_fatal() {
        let host = FakeHost::new()
            .with_file("/swapfile", "")
            .with_swap("/swapfile", 10)
            .failing("swapoff");
        let outcome = SwapFileProvisioner::new(&host, "/swapfile").ensure(1024, 10);
        assert!(outcome.is_ok());
    }

    #[test]
    fn test_ensure_mkswap_failure_removes_file() {
        let host = FakeHost::new().failing("mkswap");
        let err = SwapFileProvisioner::new(&host, "/swapfile").ensure(1024, 10).unwrap_err();
        assert!(matches!(err, ProvisionError::Host(_)));
        assert!(host.file("/swapfile").is_none());
        assert!(host.active_swaps().is_empty());
        assert!(host.file("/etc/fstab").is_none());
    }

    #[test]
    fn test_ensure_no_space() {
        let host = FakeHost::new().with_free_mb(512);
        let err = SwapFileProvisioner::new(&host, "/swapfile").ensure(1024, 10).unwrap_err();
        assert!(matches!(err, ProvisionError::NoSpace { needed_mb: 1024, available_mb: 512, .. }));
        assert!(host.effects().is_empty());
    }

    #[test]
    fn test_ensure_read_only_fstab() {
        let host = FakeHost::new()
            .with_file("/etc/fstab", FSTAB)
            .read_only("/etc/fstab");
        let err = SwapFileProvisioner::new(&host, "/swapfile").ensure(1024, 10).unwrap_err();
        assert!(matches!(err, ProvisionError::Persist(_)));
        // Activation is not rolled back
        assert_eq!(host.active_swaps().len(), 1);
    }
}
