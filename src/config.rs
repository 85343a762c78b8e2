// Configuration parsing for memtier
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::defaults;
use crate::host::HostMemoryState;
use crate::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing key: {0}")]
    MissingKey(String),
    #[error("Parse error for {0}: {1}")]
    ParseError(String, String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration holder
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Load /etc/memtier.conf, then drop-ins sorted by basename.
    /// Later files override earlier ones; a missing file is not an error.
    pub fn load(host: &dyn HostMemoryState) -> Self {
        let mut values = HashMap::new();

        let main = Path::new(defaults::CONFIG_FILE);
        if host.exists(main) {
            match host.read_file(main) {
                Ok(content) => values.extend(Self::parse_config(&content)),
                Err(e) => warn!("Could not load {}: {}", defaults::CONFIG_FILE, e),
            }
        }

        let mut fragments = host.glob(&format!("{}/*.conf", defaults::CONFIG_DROPIN_DIR));
        fragments.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        for path in fragments {
            info!("Load: {}", path.display());
            match host.read_file(&path) {
                Ok(content) => values.extend(Self::parse_config(&content)),
                Err(e) => warn!("Could not load {}: {}", path.display(), e),
            }
        }

        Self { values }
    }

    /// Build a configuration from literal pairs
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Parse `key=value` lines. Values are taken literally: no shell
    /// expansion, surrounding quotes stripped.
    fn parse_config(content: &str) -> HashMap<String, String> {
        let mut config = HashMap::new();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.starts_with('#') || !line.contains('=') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                debug!("Config: {}={}", key.trim(), value);
                config.insert(key.trim().to_string(), value.to_string());
            }
        }

        config
    }

    /// Check if a key has been explicitly set
    pub fn has_explicit(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Get a string value
    pub fn get(&self, key: &str) -> Result<&str> {
        self.values
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    /// Get value as specific type
    pub fn get_as<T: std::str::FromStr>(&self, key: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        let value = self.get(key)?;
        value
            .parse()
            .map_err(|e: T::Err| ConfigError::ParseError(key.to_string(), e.to_string()))
    }

    /// Get optional value
    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    #[test]
    fn test_parse_simple_config() {
        let cfg = Config::parse_config(
            "# comment\n\
             zram_size_mb = 2048\n\
             zram_alg=\"lz4\"\n\
             not a pair\n\
             swappiness=$(reboot)\n",
        );
        assert_eq!(cfg.get("zram_size_mb").map(String::as_str), Some("2048"));
        assert_eq!(cfg.get("zram_alg").map(String::as_str), Some("lz4"));
        assert_eq!(cfg.get("swappiness").map(String::as_str), Some("$(reboot)"));
        assert_eq!(cfg.len(), 3);
    }

    #[test]
    fn test_load_with_dropins() {
        let host = FakeHost::new()
            .with_file("/etc/memtier.conf", "zram_size_mb=1024\nswappiness=100\n")
            .with_file("/etc/memtier.conf.d/20-late.conf", "zram_size_mb=4096\n")
            .with_file("/etc/memtier.conf.d/10-early.conf", "zram_size_mb=2048\nswapfile_size_mb=0\n")
            .with_file("/etc/memtier.conf.d/README", "zram_size_mb=1\n");
        let config = Config::load(&host);
        assert_eq!(config.get_as::<u64>("zram_size_mb").unwrap(), 4096);
        assert_eq!(config.get_as::<u64>("swapfile_size_mb").unwrap(), 0);
        assert_eq!(config.get_as::<u32>("swappiness").unwrap(), 100);
    }

    #[test]
    fn test_load_without_files() {
        let config = Config::load(&FakeHost::new());
        assert!(!config.has_explicit("zram_size_mb"));
        assert!(matches!(config.get("zram_size_mb"), Err(ConfigError::MissingKey(_))));
    }

    #[test]
    fn test_typed_getters() {
        let config = Config::from_pairs([("a", "12"), ("c", "x")]);
        assert_eq!(config.get_as::<u32>("a").unwrap(), 12);
        assert!(matches!(config.get_as::<u32>("c"), Err(ConfigError::ParseError(..))));
        assert_eq!(config.get_opt("c"), Some("x"));
    }
}
