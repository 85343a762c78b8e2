// Memory and swap state parsers for /proc/meminfo and /proc/swaps
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::defaults;
use crate::host::{HostError, HostMemoryState};

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Cannot read memory information: {0}")]
    Host(#[from] HostError),
    #[error("Missing field: {0}")]
    MissingField(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Total memory reported as zero")]
    ZeroMemory,
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// Physical memory snapshot taken once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryProfile {
    total_mb: u64,
}

impl MemoryProfile {
    /// Build a profile; `None` for a zero-sized host
    pub fn new(total_mb: u64) -> Option<Self> {
        (total_mb > 0).then_some(Self { total_mb })
    }

    pub fn total_mb(&self) -> u64 {
        self.total_mb
    }
}

/// Parse the requested fields from meminfo content, values in bytes.
/// Stops reading once every field has been found.
pub fn get_mem_stats(content: &str, fields: &[&str]) -> Result<HashMap<String, u64>> {
    let mut stats = HashMap::new();
    let mut remaining: HashSet<&str> = fields.iter().copied().collect();

    for line in content.lines() {
        // Parse "Key:   value kB" format
        let Some((key, value_part)) = line.split_once(':') else {
            continue;
        };
        if !remaining.contains(key) {
            continue;
        }

        let parts: Vec<&str> = value_part.split_whitespace().collect();
        let value = match parts.as_slice() {
            [num, "kB", ..] => {
                num.parse::<u64>()
                    .map_err(|e| ProbeError::ParseError(format!("{}: {}", key, e)))?
                    * 1024
            }
            [num, ..] => num
                .parse::<u64>()
                .map_err(|e| ProbeError::ParseError(format!("{}: {}", key, e)))?,
            [] => continue,
        };

        stats.insert(key.to_string(), value);
        remaining.remove(key);

        if remaining.is_empty() {
            break;
        }
    }

    if !remaining.is_empty() {
        let mut missing: Vec<_> = remaining.into_iter().collect();
        missing.sort_unstable();
        return Err(ProbeError::MissingField(missing.join(", ")));
    }

    Ok(stats)
}

/// Read total physical memory from the host
pub fn probe(host: &dyn HostMemoryState) -> Result<MemoryProfile> {
    let content = host.read_file(Path::new(defaults::PROC_MEMINFO))?;
    let stats = get_mem_stats(&content, &["MemTotal"])?;
    MemoryProfile::new(stats["MemTotal"] / crate::helpers::MB).ok_or(ProbeError::ZeroMemory)
}

/// One row of /proc/swaps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapEntry {
    pub name: PathBuf,
    pub kind: String,
    pub size_kb: u64,
    pub used_kb: u64,
    pub priority: i32,
}

impl SwapEntry {
    pub fn is_zram(&self) -> bool {
        self.name
            .to_string_lossy()
            .starts_with(defaults::ZRAM_DEV_PREFIX)
    }
}

/// Decode the `\ooo` octal escapes the kernel uses for space, tab,
/// newline and backslash in /proc/swaps names.
pub fn unescape_name(field: &str) -> PathBuf {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let octal = bytes
            .get(i + 1..i + 4)
            .filter(|_| bytes[i] == b'\\')
            .filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)))
            .map(|d| d.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0')))
            .and_then(|v| u8::try_from(v).ok());
        match octal {
            Some(byte) => {
                out.push(byte);
                i += 4;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    PathBuf::from(OsString::from_vec(out))
}

/// Parse /proc/swaps content, skipping the header
pub fn parse_swaps(content: &str) -> Vec<SwapEntry> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }
            Some(SwapEntry {
                name: unescape_name(fields[0]),
                kind: fields[1].to_string(),
                size_kb: fields[2].parse().unwrap_or(0),
                used_kb: fields[3].parse().unwrap_or(0),
                priority: fields[4].parse().unwrap_or(0),
            })
        })
        .collect()
}

/// Currently active swap areas; an unreadable list counts as empty
pub fn active_swaps(host: &dyn HostMemoryState) -> Vec<SwapEntry> {
    host.read_file(Path::new(defaults::PROC_SWAPS))
        .map(|content| parse_swaps(&content))
        .unwrap_or_default()
}

/// Whether `path` is currently registered as active swap
pub fn is_active_swap(host: &dyn HostMemoryState, path: &Path) -> bool {
    active_swaps(host).iter().any(|s| s.name == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    const MEMINFO: &str = "MemTotal:        2097152 kB\n\
                           MemFree:          524288 kB\n\
                           MemAvailable:    1048576 kB\n\
                           HugePages_Total:       0\n";

    #[test]
    fn test_get_mem_stats() {
        let stats = get_mem_stats(MEMINFO, &["MemTotal", "HugePages_Total"]).unwrap();
        assert_eq!(stats["MemTotal"], 2097152 * 1024);
        assert_eq!(stats["HugePages_Total"], 0);
    }

    #[test]
    fn test_get_mem_stats_missing_field() {
        let err = get_mem_stats(MEMINFO, &["SwapTotal"]).unwrap_err();
        assert!(matches!(err, ProbeError::MissingField(ref f) if f == "SwapTotal"));
    }

    #[test]
    fn test_get_mem_stats_bad_number() {
        let err = get_mem_stats("MemTotal: lots kB\n", &["MemTotal"]).unwrap_err();
        assert!(matches!(err, ProbeError::ParseError(_)));
    }

    #[test]
    fn test_probe_total_mb() {
        let host = FakeHost::new().with_meminfo_mb(2048);
        assert_eq!(probe(&host).unwrap().total_mb(), 2048);
    }

    #[test]
    fn test_probe_without_meminfo() {
        let host = FakeHost::new();
        assert!(matches!(probe(&host), Err(ProbeError::Host(_))));
    }

    #[test]
    fn test_probe_zero_memory() {
        let host = FakeHost::new().with_file("/proc/meminfo", "MemTotal: 0 kB\n");
        assert!(matches!(probe(&host), Err(ProbeError::ZeroMemory)));
    }

    #[test]
    fn test_memory_profile_rejects_zero() {
        assert!(MemoryProfile::new(0).is_none());
        assert_eq!(MemoryProfile::new(1).map(|p| p.total_mb()), Some(1));
    }

    #[test]
    fn test_parse_swaps() {
        let content = "Filename\t\t\t\tType\t\tSize\t\tUsed\t\tPriority\n\
                       /dev/zram0                              partition\t1048572\t\t0\t\t100\n\
                       /swapfile                               file\t\t2097148\t\t512\t\t10\n\
                       /mnt/my\\040swap                          file\t\t1024\t\t0\t\t-2\n";
        let swaps = parse_swaps(content);
        assert_eq!(swaps.len(), 3);
        assert!(swaps[0].is_zram());
        assert_eq!(swaps[0].priority, 100);
        assert!(!swaps[1].is_zram());
        assert_eq!(swaps[1].used_kb, 512);
        assert_eq!(swaps[2].name, PathBuf::from("/mnt/my swap"));
        assert_eq!(swaps[2].priority, -2);
    }

    #[test]
    fn test_unescape_name() {
        assert_eq!(unescape_name("/swapfile"), PathBuf::from("/swapfile"));
        assert_eq!(unescape_name("/mnt/a\\011b"), PathBuf::from("/mnt/a\tb"));
        assert_eq!(unescape_name("/mnt/a\\012b"), PathBuf::from("/mnt/a\nb"));
        assert_eq!(unescape_name("/mnt/a\\134b"), PathBuf::from("/mnt/a\\b"));
        assert_eq!(unescape_name("/mnt/x\\040y\\040z"), PathBuf::from("/mnt/x y z"));
        // Not an escape: left as-is
        assert_eq!(unescape_name("/mnt/a\\9b"), PathBuf::from("/mnt/a\\9b"));
        assert_eq!(unescape_name("/mnt/end\\"), PathBuf::from("/mnt/end\\"));
    }

    #[test]
    fn test_is_active_swap_with_escaped_name() {
        let host = FakeHost::new().with_swap("/srv/swap\tdir/swap file", 10);
        assert!(is_active_swap(&host, Path::new("/srv/swap\tdir/swap file")));
    }

    #[test]
    fn test_is_active_swap() {
        let host = FakeHost::new().with_swap("/swapfile", 10);
        assert!(is_active_swap(&host, Path::new("/swapfile")));
        assert!(!is_active_swap(&host, Path::new("/dev/zram0")));
    }
}
