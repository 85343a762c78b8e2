// Swap sizing policy and operator overrides
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

use crate::config::Config;
use crate::defaults;
use crate::helpers::format_mb;
use crate::meminfo::MemoryProfile;
use crate::{info, warn};

/// Sizes, priorities and tunables for both swap tiers.
///
/// A size of 0 disables that tier. Plans are never edited in place:
/// overrides and algorithm negotiation produce a new plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPlan {
    pub zram_size_mb: u64,
    pub zram_priority: i32,
    pub compression: String,
    pub swapfile_size_mb: u64,
    pub swapfile_priority: i32,
    pub swappiness: u32,
}

impl SwapPlan {
    /// Recommended plan for a host with `total_mb` of RAM
    pub fn compute(total_mb: u64) -> Self {
        let half = total_mb / 2;
        Self {
            zram_size_mb: half.clamp(defaults::ZRAM_MIN_MB, defaults::ZRAM_MAX_MB),
            zram_priority: defaults::ZRAM_PRIO,
            compression: defaults::ZRAM_ALG.to_string(),
            swapfile_size_mb: half.clamp(defaults::SWAPFILE_MIN_MB, defaults::SWAPFILE_MAX_MB),
            swapfile_priority: defaults::SWAPFILE_PRIO,
            swappiness: defaults::SWAPPINESS,
        }
    }

    pub fn for_profile(profile: &MemoryProfile) -> Self {
        Self::compute(profile.total_mb())
    }

    pub fn with_compression(&self, compression: String) -> Self {
        Self {
            compression,
            ..self.clone()
        }
    }

    pub fn any_tier_enabled(&self) -> bool {
        self.zram_size_mb > 0 || self.swapfile_size_mb > 0
    }

    /// Config keys and values equivalent to this plan
    pub fn config_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("zram_size_mb", self.zram_size_mb.to_string()),
            ("zram_priority", self.zram_priority.to_string()),
            ("zram_alg", self.compression.clone()),
            ("swapfile_size_mb", self.swapfile_size_mb.to_string()),
            ("swapfile_priority", self.swapfile_priority.to_string()),
            ("swappiness", self.swappiness.to_string()),
        ]
    }
}

impl fmt::Display for SwapPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tier = |size: u64| {
            if size == 0 {
                "disabled".to_string()
            } else {
                format_mb(size)
            }
        };
        writeln!(
            f,
            "  zram:       {} (priority {}, {})",
            tier(self.zram_size_mb),
            self.zram_priority,
            self.compression
        )?;
        writeln!(
            f,
            "  swap file:  {} (priority {})",
            tier(self.swapfile_size_mb),
            self.swapfile_priority
        )?;
        write!(f, "  swappiness: {}", self.swappiness)
    }
}

/// Operator-supplied replacements for plan fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub zram_size_mb: Option<u64>,
    pub zram_priority: Option<i32>,
    pub compression: Option<String>,
    pub swapfile_size_mb: Option<u64>,
    pub swapfile_priority: Option<i32>,
    pub swappiness: Option<u32>,
}

impl Overrides {
    /// Read overrides from configuration; unparsable values are ignored
    pub fn from_config(config: &Config) -> Self {
        fn opt<T: std::str::FromStr>(config: &Config, key: &str) -> Option<T>
        where
            T::Err: fmt::Display,
        {
            if !config.has_explicit(key) {
                return None;
            }
            match config.get_as(key) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Config: ignoring {}", e);
                    None
                }
            }
        }

        Self {
            zram_size_mb: opt(config, "zram_size_mb"),
            zram_priority: opt(config, "zram_priority"),
            compression: config.get_opt("zram_alg").map(str::to_string),
            swapfile_size_mb: opt(config, "swapfile_size_mb"),
            swapfile_priority: opt(config, "swapfile_priority"),
            swappiness: opt(config, "swappiness"),
        }
    }

    /// Fields set here win over `fallback`
    pub fn or(self, fallback: Overrides) -> Self {
        Self {
            zram_size_mb: self.zram_size_mb.or(fallback.zram_size_mb),
            zram_priority: self.zram_priority.or(fallback.zram_priority),
            compression: self.compression.or(fallback.compression),
            swapfile_size_mb: self.swapfile_size_mb.or(fallback.swapfile_size_mb),
            swapfile_priority: self.swapfile_priority.or(fallback.swapfile_priority),
            swappiness: self.swappiness.or(fallback.swappiness),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Overrides::default()
    }
}

/// A negative priority would make the kernel pick its own, out of
/// step with the `pri=` recorded in fstab and the unit.
fn checked_priority(tier: &str, requested: Option<i32>, fallback: i32) -> i32 {
    match requested {
        Some(p) if (0..=defaults::SWAP_PRIO_MAX).contains(&p) => p,
        Some(p) => {
            warn!(
                "{} priority {} is outside 0-{}, using {}",
                tier,
                p,
                defaults::SWAP_PRIO_MAX,
                fallback
            );
            fallback
        }
        None => fallback,
    }
}

/// Show the proposed plan and return the plan to apply.
///
/// Swappiness is capped at the kernel maximum of 200; priorities outside
/// 0..=32767 fall back to the proposed value.
pub fn present(proposed: &SwapPlan, overrides: &Overrides) -> SwapPlan {
    info!("Proposed swap plan:\n{}", proposed);

    if overrides.is_empty() {
        return proposed.clone();
    }

    let swappiness = overrides.swappiness.unwrap_or(proposed.swappiness);
    if swappiness > 200 {
        warn!("Swappiness {} exceeds the kernel maximum, using 200", swappiness);
    }

    let plan = SwapPlan {
        zram_size_mb: overrides.zram_size_mb.unwrap_or(proposed.zram_size_mb),
        zram_priority: checked_priority("zram", overrides.zram_priority, proposed.zram_priority),
        compression: overrides
            .compression
            .clone()
            .unwrap_or_else(|| proposed.compression.clone()),
        swapfile_size_mb: overrides
            .swapfile_size_mb
            .unwrap_or(proposed.swapfile_size_mb),
        swapfile_priority: checked_priority(
            "swap file",
            overrides.swapfile_priority,
            proposed.swapfile_priority,
        ),
        swappiness: swappiness.min(200),
    };

    if plan != *proposed {
        info!("Plan after overrides:\n{}", plan);
    }
    if plan.zram_priority <= plan.swapfile_priority && plan.zram_size_mb > 0 && plan.swapfile_size_mb > 0 {
        warn!(
            "zram priority {} is not above swap file priority {}; disk swap will be used first",
            plan.zram_priority, plan.swapfile_priority
        );
    }
    plan
}
