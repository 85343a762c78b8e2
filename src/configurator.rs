// Two-tier swap configuration run
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;
use std::time::Duration;

use crate::capability::{
    available_compression_algorithms, known_compression_algorithms, select_compression,
};
use crate::config::Config;
use crate::defaults;
use crate::guard::{self, ExistingConfigurationState};
use crate::host::HostMemoryState;
use crate::meminfo::{self, ProbeError};
use crate::plan::{present, Overrides, SwapPlan};
use crate::provision::{PersistError, ProvisionError, TierOutcome};
use crate::swapfile::SwapFileProvisioner;
use crate::sysctl::apply_swappiness;
use crate::zram::{RetryPolicy, ZramProvisioner};
use crate::{error, info, warn};

/// Run settings, from configuration files and the command line
#[derive(Debug, Clone)]
pub struct Settings {
    pub swapfile_path: PathBuf,
    pub retry: RetryPolicy,
    pub overrides: Overrides,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            swapfile_path: PathBuf::from(defaults::SWAPFILE_PATH),
            retry: RetryPolicy::default(),
            overrides: Overrides::default(),
        }
    }
}

impl Settings {
    /// Settings from `config`; fields set in `cli` take precedence
    pub fn from_config(config: &Config, cli: Overrides) -> Self {
        let mut settings = Self {
            overrides: cli.or(Overrides::from_config(config)),
            ..Self::default()
        };
        if let Some(path) = config.get_opt("swapfile_path") {
            settings.swapfile_path = PathBuf::from(path);
        }
        match config.get_as::<u32>("systemctl_attempts") {
            Ok(n) => settings.retry.attempts = n,
            Err(e) if config.has_explicit("systemctl_attempts") => warn!("Config: ignoring {}", e),
            Err(_) => {}
        }
        match config.get_as::<u64>("systemctl_retry_delay") {
            Ok(secs) => settings.retry.delay = Duration::from_secs(secs),
            Err(e) if config.has_explicit("systemctl_retry_delay") => warn!("Config: ignoring {}", e),
            Err(_) => {}
        }
        settings
    }
}

/// What happened to each tier during an applied run
#[derive(Debug)]
pub struct Applied {
    pub plan: SwapPlan,
    pub swapfile: Result<TierOutcome, ProvisionError>,
    pub zram: Result<TierOutcome, ProvisionError>,
    /// `None` when both tiers are disabled
    pub swappiness: Option<Result<(), PersistError>>,
}

#[derive(Debug)]
pub enum Report {
    /// Swap was already set up; nothing was touched
    AlreadyConfigured(ExistingConfigurationState),
    /// Memory could not be probed; nothing was touched
    Skipped(ProbeError),
    Applied(Applied),
}

impl Report {
    /// True if any step of an applied run failed
    pub fn failed(&self) -> bool {
        match self {
            Report::Applied(applied) => {
                applied.swapfile.is_err()
                    || applied.zram.is_err()
                    || applied.swappiness.as_ref().is_some_and(|r| r.is_err())
            }
            _ => false,
        }
    }

    pub fn summary(&self) -> Vec<String> {
        fn tier(outcome: &Result<TierOutcome, ProvisionError>) -> String {
            match outcome {
                Ok(o) => o.to_string(),
                Err(e) => format!("FAILED: {}", e),
            }
        }

        match self {
            Report::AlreadyConfigured(state) => vec![format!(
                "already configured (zram: {}, other swap: {}); nothing changed",
                state.zram_present, state.non_zram_swap_present
            )],
            Report::Skipped(e) => vec![format!("skipped: {}", e)],
            Report::Applied(applied) => {
                let mut lines = vec![
                    format!("swap file:  {}", tier(&applied.swapfile)),
                    format!("zram:       {}", tier(&applied.zram)),
                ];
                lines.push(match &applied.swappiness {
                    None => "swappiness: unchanged".to_string(),
                    Some(Ok(())) => format!("swappiness: {}", applied.plan.swappiness),
                    Some(Err(e)) => format!("swappiness: FAILED: {}", e),
                });
                lines
            }
        }
    }
}

/// Configures zram above a disk swap file, once per host
pub struct Configurator<'a> {
    host: &'a dyn HostMemoryState,
    settings: Settings,
}

impl<'a> Configurator<'a> {
    pub fn new(host: &'a dyn HostMemoryState, settings: Settings) -> Self {
        Self { host, settings }
    }

    /// Recommended plan with operator overrides applied and the
    /// compressor negotiated against the kernel catalog.
    /// Read-only: an unloaded zram module leaves the catalog empty.
    pub fn plan(&self) -> Result<(SwapPlan, Vec<String>), ProbeError> {
        self.negotiate(false)
    }

    /// The catalog is only queried when zram is enabled in the final plan;
    /// `load_module` allows loading zram to read it.
    fn negotiate(&self, load_module: bool) -> Result<(SwapPlan, Vec<String>), ProbeError> {
        let profile = meminfo::probe(self.host)?;
        info!("Memory: {} MiB physical", profile.total_mb());

        let plan = present(&SwapPlan::for_profile(&profile), &self.settings.overrides);
        if plan.zram_size_mb == 0 {
            return Ok((plan, Vec::new()));
        }

        let catalog = if load_module {
            available_compression_algorithms(self.host)
        } else {
            known_compression_algorithms(self.host)
        };
        let plan = plan.with_compression(select_compression(&plan.compression, &catalog));
        Ok((plan, catalog))
    }

    pub fn run(&self) -> Report {
        let state = guard::inspect(self.host, &self.settings.swapfile_path);
        if state.any_present() {
            info!(
                "Existing swap detected (zram: {}, other swap: {}), leaving the host untouched",
                state.zram_present, state.non_zram_swap_present
            );
            return Report::AlreadyConfigured(state);
        }

        let (plan, catalog) = match self.negotiate(true) {
            Ok(planned) => planned,
            Err(e) => {
                warn!("Memory probe failed: {}; skipping swap configuration", e);
                return Report::Skipped(e);
            }
        };

        let swapfile = SwapFileProvisioner::new(self.host, &self.settings.swapfile_path)
            .ensure(plan.swapfile_size_mb, plan.swapfile_priority);
        if let Err(e) = &swapfile {
            error!("swapFile: {}", e);
        }

        let zram = ZramProvisioner::new(self.host, catalog, self.settings.retry).ensure(
            plan.zram_size_mb,
            plan.zram_priority,
            &plan.compression,
        );
        if let Err(e) = &zram {
            error!("Zram: {}", e);
        }

        let swappiness = plan.any_tier_enabled().then(|| {
            let result = apply_swappiness(self.host, plan.swappiness);
            if let Err(e) = &result {
                error!("Swappiness: {}", e);
            }
            result
        });

        Report::Applied(Applied {
            plan,
            swapfile,
            zram,
            swappiness,
        })
    }
}
