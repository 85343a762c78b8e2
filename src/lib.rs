// memtier - zram above a disk swap file, configured once
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod capability;
pub mod config;
pub mod configurator;
pub mod defaults;
pub mod guard;
pub mod helpers;
pub mod host;
pub mod limits;
pub mod meminfo;
pub mod plan;
pub mod provision;
pub mod swapfile;
pub mod sysctl;
pub mod systemd;
pub mod zram;
