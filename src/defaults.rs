// Centralised default values and well-known host paths.
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Sizing rules, generated artifacts and the idempotence guard all read
// these, so a path change here moves every writer and reader together.

// ── Sizing ───────────────────────────────────────────────────────────────────

pub const ZRAM_MIN_MB: u64 = 512;
pub const ZRAM_MAX_MB: u64 = 8192;
pub const SWAPFILE_MIN_MB: u64 = 1024;
pub const SWAPFILE_MAX_MB: u64 = 16384;
/// Above the classic 0-100 range on purpose; kernels >= 5.8 accept up to 200.
pub const SWAPPINESS: u32 = 180;
pub const ZRAM_PRIO: i32 = 100;
pub const SWAPFILE_PRIO: i32 = 10;
/// Highest priority the kernel accepts with SWAP_FLAG_PREFER
pub const SWAP_PRIO_MAX: i32 = 32767;
pub const ZRAM_ALG: &str = "zstd";

/// Preferred compressors, best first
pub const ALG_PREFERENCE: [&str; 4] = ["zstd", "lz4", "lzo-rle", "lzo"];

// ── Kernel interfaces ────────────────────────────────────────────────────────

pub const PROC_MEMINFO: &str = "/proc/meminfo";
pub const PROC_SWAPS: &str = "/proc/swaps";
pub const PROC_SWAPPINESS: &str = "/proc/sys/vm/swappiness";
pub const ZRAM_MODULE: &str = "/sys/module/zram";
pub const ZRAM_DEVICE: u32 = 0;
pub const ZRAM_DEV_PREFIX: &str = "/dev/zram";

// ── Persistence surfaces ─────────────────────────────────────────────────────

pub const FSTAB: &str = "/etc/fstab";
pub const SWAPFILE_PATH: &str = "/swapfile";
pub const SYSCTL_CONF: &str = "/etc/sysctl.d/99-memtier.conf";
pub const SYSTEMD_RUNTIME: &str = "/run/systemd/system";
pub const SYSTEMD_PRIVATE_SOCKET: &str = "/run/systemd/private";
pub const UNIT_DIR: &str = "/etc/systemd/system";
pub const UNIT_SEARCH_DIRS: [&str; 4] = [
    "/etc/systemd/system",
    "/run/systemd/system",
    "/usr/lib/systemd/system",
    "/lib/systemd/system",
];
pub const ZRAM_UNIT: &str = "zram-swap.service";
pub const ZRAM_UNIT_FRAGMENT: &str = "zram";
pub const ZRAM_SCRIPT: &str = "/usr/local/sbin/zram-swap.sh";
pub const RC_LOCAL_CANDIDATES: [&str; 2] = ["/etc/rc.local", "/etc/rc.d/rc.local"];
pub const CRON_DIR: &str = "/etc/cron.d";
pub const CRON_FILE: &str = "/etc/cron.d/zram-swap";

// ── Tools ────────────────────────────────────────────────────────────────────

pub const SH: &str = "/bin/sh";
pub const MODPROBE: &str = "/sbin/modprobe";
pub const MKSWAP: &str = "/sbin/mkswap";
pub const SWAPON: &str = "/sbin/swapon";
pub const SWAPOFF: &str = "/sbin/swapoff";

// ── Service manager ──────────────────────────────────────────────────────────

pub const SYSTEMCTL_ATTEMPTS: u32 = 10;
pub const SYSTEMCTL_RETRY_DELAY: u64 = 5;

// ── Service memory limits ────────────────────────────────────────────────────

pub const MEMORY_MAX_PERCENT: u64 = 80;
pub const MEMORY_HIGH_PERCENT: u64 = 75;

// ── Configuration files ──────────────────────────────────────────────────────

pub const CONFIG_FILE: &str = "/etc/memtier.conf";
pub const CONFIG_DROPIN_DIR: &str = "/etc/memtier.conf.d";
