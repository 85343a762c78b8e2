// Helper utilities for memtier
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

pub const MB: u64 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum HelperError {
    #[error("Not running as root")]
    NotRoot,
}

pub type Result<T> = std::result::Result<T, HelperError>;

/// Check if running as root
pub fn am_i_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(HelperError::NotRoot)
    }
}

/// Quote a value for a POSIX shell word.
/// Values made only of safe characters are returned as-is.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '=' | ':'));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Format a size in MiB as human-readable text
pub fn format_mb(mb: u64) -> String {
    if mb >= 1024 && mb % 1024 == 0 {
        format!("{} GiB", mb / 1024)
    } else if mb >= 1024 {
        format!("{:.1} GiB", mb as f64 / 1024.0)
    } else {
        format!("{} MiB", mb)
    }
}

// Logging macros
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        println!("INFO: {}", format!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        eprintln!("WARN: {}", format!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        eprintln!("ERRO: {}", format!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if std::env::var("DEBUG").is_ok() {
            eprintln!("DEBUG: {}", format!($($arg)*))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_passthrough() {
        assert_eq!(shell_quote("/dev/zram0"), "/dev/zram0");
        assert_eq!(shell_quote("lzo-rle"), "lzo-rle");
    }

    #[test]
    fn test_shell_quote_escapes() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("x;rm -rf /"), "'x;rm -rf /'");
    }

    #[test]
    fn test_format_mb() {
        assert_eq!(format_mb(512), "512 MiB");
        assert_eq!(format_mb(2048), "2 GiB");
        assert_eq!(format_mb(1536), "1.5 GiB");
    }
}
