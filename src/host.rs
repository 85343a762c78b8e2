// Host access layer for memtier
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Every read of kernel state and every durable write goes through
// `HostMemoryState`, so the probes and provisioners can run against an
// in-memory host in tests.

use std::ffi::CString;
use std::fs;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::unistd::{access, AccessFlags};
use thiserror::Error;

use crate::debug;
use crate::defaults;

const SWAP_FLAG_PREFER: libc::c_int = 0x8000;
const SWAP_FLAG_PRIO_MASK: libc::c_int = 0x7fff;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },
    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),
}

impl HostError {
    fn io(path: &Path, source: io::Error) -> Self {
        HostError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

/// Host-global memory and swap state: kernel counters, swap list,
/// zram control files, mount table and service manager.
///
/// Paths are always absolute host paths (`/etc/fstab`, `/proc/swaps`).
pub trait HostMemoryState {
    fn read_file(&self, path: &Path) -> Result<String>;
    fn exists(&self, path: &Path) -> bool;
    /// True if the file exists and the caller may write to it
    fn is_writable(&self, path: &Path) -> bool;
    /// Create or truncate `path` and write `content`
    fn write_file(&self, path: &Path, content: &str) -> Result<()>;
    fn remove_file(&self, path: &Path) -> Result<()>;
    fn set_mode(&self, path: &Path, mode: u32) -> Result<()>;
    /// Expand a glob pattern over absolute host paths
    fn glob(&self, pattern: &str) -> Vec<PathBuf>;
    /// Run a privileged command, returning its trimmed stdout
    fn run(&self, cmd: &[&str]) -> Result<String>;
    fn swapon(&self, device: &Path, priority: i32) -> Result<()>;
    fn swapoff(&self, device: &Path) -> Result<()>;
    /// Free space in MiB on the filesystem holding `path`
    fn available_mb(&self, path: &Path) -> Option<u64>;
    /// Whether the host was booted with systemd as its service manager
    fn booted_with_systemd(&self) -> bool;
}

/// The real host, optionally rooted below a directory for file access.
/// Commands and swap syscalls always act on the running kernel.
#[derive(Debug, Clone)]
pub struct SystemHost {
    root: PathBuf,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SystemHost {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match path.strip_prefix("/") {
            Ok(relative) => self.root.join(relative),
            Err(_) => self.root.join(path),
        }
    }

    /// True when file access targets the running system itself
    fn is_live_root(&self) -> bool {
        self.root == Path::new("/")
    }
}

impl HostMemoryState for SystemHost {
    fn read_file(&self, path: &Path) -> Result<String> {
        fs::read_to_string(self.resolve(path)).map_err(|e| HostError::io(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn is_writable(&self, path: &Path) -> bool {
        access(&self.resolve(path), AccessFlags::W_OK).is_ok()
    }

    /// For sysfs/procfs (virtual filesystems), writes without fsync.
    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        let target = self.resolve(path);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&target)
            .map_err(|e| HostError::io(path, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| HostError::io(path, e))?;
        if !path.starts_with("/sys") && !path.starts_with("/proc") {
            file.sync_all().map_err(|e| HostError::io(path, e))?;
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(self.resolve(path)).map_err(|e| HostError::io(path, e))
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(self.resolve(path), fs::Permissions::from_mode(mode))
            .map_err(|e| HostError::io(path, e))
    }

    fn glob(&self, pattern: &str) -> Vec<PathBuf> {
        let root = self.root.to_string_lossy();
        let full = format!(
            "{}/{}",
            glob::Pattern::escape(root.trim_end_matches('/')),
            pattern.trim_start_matches('/')
        );
        let Ok(entries) = glob::glob(&full) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| {
                entry
                    .strip_prefix(&self.root)
                    .ok()
                    .map(|rel| Path::new("/").join(rel))
            })
            .collect()
    }

    fn run(&self, cmd: &[&str]) -> Result<String> {
        let command = cmd.join(" ");
        let Some((program, args)) = cmd.split_first() else {
            return Err(HostError::CommandFailed {
                command,
                detail: "empty command".to_string(),
            });
        };
        debug!("run: {}", command);

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| HostError::CommandFailed {
                command: command.clone(),
                detail: e.to_string(),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(HostError::CommandFailed {
                command,
                detail: if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            })
        }
    }

    fn swapon(&self, device: &Path, priority: i32) -> Result<()> {
        let target = self.resolve(device);
        let c_path = CString::new(target.as_os_str().as_bytes())
            .map_err(|_| HostError::InvalidPath(device.to_path_buf()))?;
        let flags = if priority >= 0 {
            SWAP_FLAG_PREFER | (priority & SWAP_FLAG_PRIO_MASK)
        } else {
            0
        };
        // SAFETY: c_path is a valid NUL-terminated string for the call's duration.
        let ret = unsafe { libc::syscall(libc::SYS_swapon, c_path.as_ptr(), flags) };
        if ret == 0 {
            Ok(())
        } else {
            Err(HostError::io(device, io::Error::last_os_error()))
        }
    }

    fn swapoff(&self, device: &Path) -> Result<()> {
        let target = self.resolve(device);
        let c_path = CString::new(target.as_os_str().as_bytes())
            .map_err(|_| HostError::InvalidPath(device.to_path_buf()))?;
        // SAFETY: c_path is a valid NUL-terminated string for the call's duration.
        let ret = unsafe { libc::syscall(libc::SYS_swapoff, c_path.as_ptr()) };
        if ret == 0 {
            Ok(())
        } else {
            Err(HostError::io(device, io::Error::last_os_error()))
        }
    }

    fn available_mb(&self, path: &Path) -> Option<u64> {
        let target = self.resolve(path);
        let check = if target.exists() {
            target
        } else {
            target.parent()?.to_path_buf()
        };
        nix::sys::statvfs::statvfs(&check)
            .ok()
            .map(|stat| stat.blocks_available() as u64 * stat.fragment_size() as u64 / crate::helpers::MB)
    }

    fn booted_with_systemd(&self) -> bool {
        if self.is_live_root() {
            libsystemd::daemon::booted()
        } else {
            self.exists(Path::new(defaults::SYSTEMD_RUNTIME))
        }
    }
}
