// Zram configuration for memtier
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::{
    detect_persistence, select_compression, zram_dev, zram_sysfs, Algorithm, PersistenceMechanism,
};
use crate::defaults;
use crate::helpers::{shell_quote, MB};
use crate::host::HostMemoryState;
use crate::provision::{persist, PersistError, Result, TierOutcome};
use crate::systemd::{systemctl_retry, ExecLine, UnitFile};
use crate::{info, warn};

/// Everything that flows into the generated unit and script.
/// Built from validated parts only; rendering never sees raw operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZramSetup {
    pub size_bytes: u64,
    pub priority: i32,
    pub algorithm: Algorithm,
}

impl ZramSetup {
    pub fn new(size_mb: u64, priority: i32, algorithm: Algorithm) -> Self {
        Self {
            size_bytes: size_mb.saturating_mul(MB),
            priority,
            algorithm,
        }
    }

    fn attr(&self, name: &str) -> String {
        zram_sysfs().join(name).to_string_lossy().to_string()
    }

    fn dev(&self) -> String {
        zram_dev().to_string_lossy().to_string()
    }

    fn load_module(&self) -> ExecLine {
        ExecLine::new(defaults::MODPROBE)
            .arg("zram")
            .arg("num_devices=1")
    }

    /// Algorithm write guarded by writability; a kernel rejection is ignored
    fn set_algorithm_sh(&self) -> String {
        let attr = shell_quote(&self.attr("comp_algorithm"));
        format!(
            "if [ -w {attr} ]; then echo {alg} > {attr} 2>/dev/null || true; fi",
            attr = attr,
            alg = shell_quote(self.algorithm.as_str())
        )
    }

    fn set_disksize_sh(&self) -> String {
        format!(
            "echo {} > {}",
            self.size_bytes,
            shell_quote(&self.attr("disksize"))
        )
    }

    fn reset_sh(&self) -> String {
        let attr = shell_quote(&self.attr("reset"));
        format!("if [ -w {attr} ]; then echo 1 > {attr}; fi", attr = attr)
    }

    fn swapoff_if_active_sh(&self) -> String {
        let dev = self.dev();
        format!(
            "if grep -q {pattern} {swaps}; then {swapoff} {dev}; fi",
            pattern = shell_quote(&format!("^{} ", dev)),
            swaps = defaults::PROC_SWAPS,
            swapoff = defaults::SWAPOFF,
            dev = shell_quote(&dev)
        )
    }

    fn swapon(&self) -> ExecLine {
        ExecLine::new(defaults::SWAPON)
            .arg("-p")
            .arg(self.priority.to_string())
            .arg(self.dev())
    }

    fn sh(&self, script: String) -> ExecLine {
        ExecLine::new(defaults::SH).arg("-c").arg(script)
    }

    /// oneshot unit that brings zram up on start and tears it down on stop
    pub fn render_unit(&self) -> String {
        UnitFile::new()
            .section("Unit")
            .entry("Description", format!("Compressed swap in RAM on {}", self.dev()))
            .entry("After", "local-fs.target")
            .section("Service")
            .entry("Type", "oneshot")
            .entry("RemainAfterExit", "yes")
            .exec("ExecStart", self.load_module())
            .exec("ExecStart", self.sh(self.set_algorithm_sh()))
            .exec("ExecStart", self.sh(self.set_disksize_sh()))
            .exec("ExecStart", ExecLine::new(defaults::MKSWAP).arg(self.dev()))
            .exec("ExecStart", self.swapon())
            .exec("ExecStop", ExecLine::new(defaults::SWAPOFF).arg(self.dev()))
            .exec("ExecStop", self.sh(self.reset_sh()))
            .section("Install")
            .entry("WantedBy", "multi-user.target")
            .render()
    }

    /// Standalone script with the same sequence; safe to run repeatedly
    pub fn render_script(&self) -> String {
        let dev = shell_quote(&self.dev());
        let lines = [
            "#!/bin/sh".to_string(),
            "# Compressed swap in RAM, for hosts without systemd. Safe to re-run.".to_string(),
            "set -e".to_string(),
            format!("{} zram num_devices=1", defaults::MODPROBE),
            self.swapoff_if_active_sh(),
            self.reset_sh(),
            self.set_algorithm_sh(),
            self.set_disksize_sh(),
            format!("{} {} >/dev/null", defaults::MKSWAP, dev),
            format!("{} -p {} {}", defaults::SWAPON, self.priority, dev),
        ];
        let mut script = lines.join("\n");
        script.push('\n');
        script
    }
}

/// Boot hook line for rc.local
pub fn rc_local_line() -> String {
    format!("{} {} || true", defaults::SH, defaults::ZRAM_SCRIPT)
}

/// Contents of the cron drop-in
pub fn cron_entry() -> String {
    format!(
        "# Activate compressed swap in RAM at boot\n@reboot root {} {}\n",
        defaults::SH,
        defaults::ZRAM_SCRIPT
    )
}

/// Insert `line` into rc.local before a trailing `exit 0`, or append it.
/// Returns `None` if the line is already there.
pub fn add_rc_local_line(content: &str, line: &str) -> Option<String> {
    if content.lines().any(|l| l.trim() == line) {
        return None;
    }

    let mut lines: Vec<&str> = content.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if lines.is_empty() {
        lines.push("#!/bin/sh");
    }

    let exit_at = lines
        .last()
        .filter(|l| l.trim() == "exit 0")
        .map(|_| lines.len() - 1);
    match exit_at {
        Some(idx) => lines.insert(idx, line),
        None => lines.push(line),
    }

    let mut out = lines.join("\n");
    out.push('\n');
    Some(out)
}

/// Service manager retry policy
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: defaults::SYSTEMCTL_ATTEMPTS,
            delay: Duration::from_secs(defaults::SYSTEMCTL_RETRY_DELAY),
        }
    }
}

/// Creates zram0 as swap and installs whatever brings it back at boot
pub struct ZramProvisioner<'a> {
    host: &'a dyn HostMemoryState,
    catalog: Vec<String>,
    retry: RetryPolicy,
}

impl<'a> ZramProvisioner<'a> {
    /// `catalog` is the kernel's list of compressors (empty if unknown)
    pub fn new(host: &'a dyn HostMemoryState, catalog: Vec<String>, retry: RetryPolicy) -> Self {
        Self {
            host,
            catalog,
            retry,
        }
    }

    pub fn ensure(&self, size_mb: u64, priority: i32, compression: &str) -> Result<TierOutcome> {
        if size_mb == 0 {
            info!("Zram: disabled");
            return Ok(TierOutcome::Disabled);
        }

        let selected = select_compression(compression, &self.catalog);
        if selected != compression {
            info!("Zram: {} not supported by kernel, using {}", compression, selected);
        }
        let setup = ZramSetup::new(size_mb, priority, selected.parse()?);
        info!(
            "Zram: size = {} bytes ({} MiB), algorithm {}, priority {}",
            setup.size_bytes, size_mb, setup.algorithm, setup.priority
        );

        match detect_persistence(self.host) {
            Ok(PersistenceMechanism::Systemd) => self.install_unit(&setup),
            Ok(PersistenceMechanism::LegacyInit { rc_local, cron }) => {
                self.install_script(&setup, rc_local.as_deref(), cron.as_deref())
            }
            Err(e) => {
                warn!("Zram: {}", e);
                warn!("Zram: activating for this session only; it will NOT survive a reboot");
                self.install_script(&setup, None, None)
            }
        }
    }

    fn install_unit(&self, setup: &ZramSetup) -> Result<TierOutcome> {
        let unit_path = Path::new(defaults::UNIT_DIR).join(defaults::ZRAM_UNIT);
        info!("Zram: installing {}", unit_path.display());
        persist(self.host, &unit_path, &setup.render_unit())?;

        systemctl_retry(self.host, &["daemon-reload"], self.retry.attempts, self.retry.delay)?;
        systemctl_retry(
            self.host,
            &["enable", "--now", defaults::ZRAM_UNIT],
            self.retry.attempts,
            self.retry.delay,
        )?;

        info!("Zram: {} enabled and started", defaults::ZRAM_UNIT);
        Ok(TierOutcome::Active {
            persisted_via: defaults::ZRAM_UNIT.to_string(),
        })
    }

    fn install_script(
        &self,
        setup: &ZramSetup,
        rc_local: Option<&Path>,
        cron_dir: Option<&Path>,
    ) -> Result<TierOutcome> {
        let script = Path::new(defaults::ZRAM_SCRIPT);
        info!("Zram: installing {}", script.display());
        persist(self.host, script, &setup.render_script())?;
        self.host.set_mode(script, 0o755)?;

        let mut registered: Vec<String> = Vec::new();
        let mut failures: Vec<PersistError> = Vec::new();

        if let Some(rc_local) = rc_local {
            match self.register_rc_local(rc_local) {
                Ok(()) => registered.push(rc_local.display().to_string()),
                Err(e) => failures.push(e),
            }
        }
        if cron_dir.is_some() {
            let cron_file = PathBuf::from(defaults::CRON_FILE);
            match persist(self.host, &cron_file, &cron_entry()) {
                Ok(()) => registered.push(cron_file.display().to_string()),
                Err(e) => failures.push(e),
            }
        }

        for failure in &failures {
            warn!("Zram: {}", failure);
        }
        if registered.is_empty() {
            if let Some(first) = failures.into_iter().next() {
                return Err(first.into());
            }
        }

        info!("Zram: running {}", script.display());
        self.host.run(&[defaults::SH, defaults::ZRAM_SCRIPT])?;

        if registered.is_empty() {
            Ok(TierOutcome::ActiveNotPersistent)
        } else {
            Ok(TierOutcome::Active {
                persisted_via: registered.join(" + "),
            })
        }
    }

    fn register_rc_local(&self, rc_local: &Path) -> std::result::Result<(), PersistError> {
        let content = self.host.read_file(rc_local).map_err(|source| PersistError {
            path: rc_local.to_path_buf(),
            source,
        })?;
        if let Some(updated) = add_rc_local_line(&content, &rc_local_line()) {
            persist(self.host, rc_local, &updated)?;
        }
        if let Err(e) = self.host.set_mode(rc_local, 0o755) {
            warn!("Zram: cannot make {} executable: {}", rc_local.display(), e);
        }
        Ok(())
    }
}

/// Live statistics of the managed zram device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZramStats {
    pub disksize: u64,
    pub algorithm: String,
    pub orig_data_size: u64,
    pub compr_data_size: u64,
    pub mem_used_total: u64,
}

impl ZramStats {
    pub fn compression_ratio(&self) -> f64 {
        if self.compr_data_size > 0 {
            self.orig_data_size as f64 / self.compr_data_size as f64
        } else {
            0.0
        }
    }
}

/// Read zram0 statistics; `None` if the device is absent or unconfigured
pub fn read_stats(host: &dyn HostMemoryState) -> Option<ZramStats> {
    let sysfs = zram_sysfs();
    let read = |name: &str| host.read_file(&sysfs.join(name)).ok();

    let disksize: u64 = read("disksize")?.trim().parse().ok()?;
    if disksize == 0 {
        return None;
    }
    let algorithm = read("comp_algorithm")
        .and_then(|s| {
            s.split_whitespace()
                .find(|w| w.starts_with('['))
                .map(|w| w.trim_matches(|c| c == '[' || c == ']').to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());
    // mm_stat: orig_data_size compr_data_size mem_used_total ...
    let mm: Vec<u64> = read("mm_stat")
        .map(|s| s.split_whitespace().filter_map(|v| v.parse().ok()).collect())
        .unwrap_or_default();

    Some(ZramStats {
        disksize,
        algorithm,
        orig_data_size: mm.first().copied().unwrap_or(0),
        compr_data_size: mm.get(1).copied().unwrap_or(0),
        mem_used_total: mm.get(2).copied().unwrap_or(0),
    })
}
