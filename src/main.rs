// memtier - zram above a disk swap file, configured once
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use memtier::capability::detect_persistence;
use memtier::config::Config;
use memtier::configurator::{Configurator, Report, Settings};
use memtier::guard;
use memtier::helpers::{am_i_root, format_mb};
use memtier::host::SystemHost;
use memtier::limits::{limit_unit, MemoryLimits};
use memtier::meminfo::{self, active_swaps};
use memtier::plan::Overrides;
use memtier::sysctl::current_swappiness;
use memtier::zram::read_stats;
use memtier::{error, info, warn};

#[derive(Parser)]
#[command(name = "memtier")]
#[command(about = "Configure compressed RAM swap (zram) above a disk swap file")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision both swap tiers unless swap is already configured
    Apply(PlanArgs),
    /// Show the plan that `apply` would use, without changing anything
    Plan(PlanArgs),
    /// Show current swap state
    Status,
    /// Cap a service's memory at 80% (max) / 75% (high) of RAM
    Limit {
        /// Unit name, e.g. gateway.service
        unit: String,
    },
}

/// Plan overrides; each one replaces the recommended value
#[derive(Args, Debug, Default)]
struct PlanArgs {
    /// zram device size in MiB (0 disables zram)
    #[arg(long)]
    zram_size_mb: Option<u64>,
    #[arg(long)]
    zram_priority: Option<i32>,
    /// Compression algorithm for zram
    #[arg(long)]
    zram_alg: Option<String>,
    /// Swap file size in MiB (0 disables the swap file)
    #[arg(long)]
    swapfile_size_mb: Option<u64>,
    #[arg(long)]
    swapfile_priority: Option<i32>,
    /// vm.swappiness (0-200)
    #[arg(long)]
    swappiness: Option<u32>,
    #[arg(long)]
    swapfile_path: Option<PathBuf>,
}

impl PlanArgs {
    fn settings(self, config: &Config) -> Settings {
        let overrides = Overrides {
            zram_size_mb: self.zram_size_mb,
            zram_priority: self.zram_priority,
            compression: self.zram_alg,
            swapfile_size_mb: self.swapfile_size_mb,
            swapfile_priority: self.swapfile_priority,
            swappiness: self.swappiness,
        };
        let mut settings = Settings::from_config(config, overrides);
        if let Some(path) = self.swapfile_path {
            settings.swapfile_path = path;
        }
        settings
    }
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Apply(args)) => apply(args),
        Some(Commands::Plan(args)) => plan(args),
        Some(Commands::Status) => status(),
        Some(Commands::Limit { unit }) => limit(&unit),
        None => {
            // No subcommand provided, show help
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            return;
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Provision swap; `Ok(false)` if a tier failed
fn apply(args: PlanArgs) -> Result<bool, Box<dyn std::error::Error>> {
    am_i_root()?;

    let host = SystemHost::default();
    let config = Config::load(&host);
    let report = Configurator::new(&host, args.settings(&config)).run();

    println!();
    for line in report.summary() {
        println!("{}", line);
    }
    if let Report::Applied(applied) = &report {
        if applied.zram.is_ok() || applied.swapfile.is_ok() {
            info!("Swap configuration complete");
        }
    }
    Ok(!report.failed())
}

/// Print the plan, the kernel's compressors and the persistence mechanism
fn plan(args: PlanArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let host = SystemHost::default();
    let config = Config::load(&host);
    let settings = args.settings(&config);
    let swapfile_path = settings.swapfile_path.clone();
    let configurator = Configurator::new(&host, settings);

    let (plan, catalog) = configurator.plan()?;
    println!("\n=== Plan ===");
    println!("{}", plan);
    println!("  swap file path: {}", swapfile_path.display());

    println!("\n=== Kernel ===");
    if catalog.is_empty() {
        println!("  compressors: unknown");
    } else {
        println!("  compressors: {}", catalog.join(" "));
    }
    match detect_persistence(&host) {
        Ok(mechanism) => println!("  persistence: {}", mechanism),
        Err(e) => println!("  persistence: none ({})", e),
    }

    println!("\n=== Config Keys ===");
    for (key, value) in plan.config_pairs() {
        println!("  {:<20} {}", key, value);
    }

    let state = guard::inspect(&host, &swapfile_path);
    if state.any_present() {
        warn!("Swap is already configured; `apply` would change nothing");
    }
    Ok(true)
}

/// Show swap status
fn status() -> Result<bool, Box<dyn std::error::Error>> {
    let host = SystemHost::default();
    let config = Config::load(&host);
    let settings = Settings::from_config(&config, Overrides::default());

    let state = guard::inspect(&host, &settings.swapfile_path);
    println!("Configured:");
    println!("  zram:          {}", if state.zram_present { "yes" } else { "no" });
    println!(
        "  other swap:    {}",
        if state.non_zram_swap_present { "yes" } else { "no" }
    );

    if let Ok(profile) = meminfo::probe(&host) {
        println!("  memory:        {}", format_mb(profile.total_mb()));
    }
    if let Some(swappiness) = current_swappiness(&host) {
        println!("  swappiness:    {}", swappiness);
    }

    if let Some(stats) = read_stats(&host) {
        println!("\nZram ({}):", stats.algorithm);
        println!("  Capacity:      {}", format_mb(stats.disksize / memtier::helpers::MB));
        println!(
            "  Stored data:   {} -> {} in RAM ({:.1}x ratio)",
            format_mb(stats.orig_data_size / memtier::helpers::MB),
            format_mb(stats.mem_used_total / memtier::helpers::MB),
            stats.compression_ratio()
        );
    }

    println!("\nSwap:");
    let swaps = active_swaps(&host);
    if swaps.is_empty() {
        println!("  none");
    } else {
        println!("  {:<28} {:>10} {:>10} {:>6}", "Device", "Size", "Used", "Prio");
        println!("  {}", "-".repeat(57));
        for swap in &swaps {
            println!(
                "  {:<28} {:>10} {:>10} {:>6}",
                swap.name.display(),
                format_mb(swap.size_kb / 1024),
                format_mb(swap.used_kb / 1024),
                swap.priority
            );
        }
    }
    Ok(true)
}

/// Apply memory caps to a service unit
fn limit(unit: &str) -> Result<bool, Box<dyn std::error::Error>> {
    am_i_root()?;

    let host = SystemHost::default();
    let profile = meminfo::probe(&host)?;
    let limits = MemoryLimits::for_profile(&profile);
    let path = limit_unit(&host, unit, &limits)?;
    info!(
        "{}: MemoryMax={} MemoryHigh={}",
        path.display(),
        format_mb(limits.max_mb),
        format_mb(limits.high_mb)
    );
    Ok(true)
}
