// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use log::error;

use crate::error::Error;
use crate::error::Result;

pub const ZFS_ARC_MAX_PATH: &str = "/sys/module/zfs/parameters/zfs_arc_max";
pub const ZFS_ARC_META_LIMIT_PATH: &str = "/sys/module/zfs/parameters/zfs_arc_meta_limit";
pub const DEFAULT_LOCK_PATH: &str = "/var/run/zfsonlinux_memorymanagement.lock";
pub const DEFAULT_SERVICE: &str = "crashplan";

/// Used memory percentages that define the control bands.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub min_percent: f64,
    pub max_percent: f64,
    pub min_good_percent: f64,
    pub max_good_percent: f64,
    pub max_panic_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            min_percent: 80.0,
            max_percent: 94.0,
            min_good_percent: 89.0,
            max_good_percent: 93.0,
            max_panic_percent: 97.0,
        }
    }
}

impl Thresholds {
    /// Checks `min < min_good < max_good < max < max_panic`.
    pub fn validate(&self) -> Result<()> {
        let ordered = [
            ("min-percent", self.min_percent),
            ("min-good-percent", self.min_good_percent),
            ("max-good-percent", self.max_good_percent),
            ("max-percent", self.max_percent),
            ("max-panic-percent", self.max_panic_percent),
        ];
        for (name, value) in ordered {
            if !value.is_finite() {
                return Err(Error::Config(format!("{} is not a number: {}", name, value)));
            }
        }
        for pair in ordered.windows(2) {
            let (low_name, low) = pair[0];
            let (high_name, high) = pair[1];
            if low >= high {
                return Err(Error::Config(format!(
                    "{} ({}) must be lower than {} ({})",
                    low_name, low, high_name, high
                )));
            }
        }
        Ok(())
    }
}

/// Limits in GiB that replace the values derived from the thresholds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LimitOverrides {
    pub min_limit: Option<f64>,
    pub max_limit: Option<f64>,
    pub min_good_limit: Option<f64>,
    pub max_good_limit: Option<f64>,
}

/// The two ARC parameter files the limit is written to.
#[derive(Clone, Debug, PartialEq)]
pub struct TunablePaths {
    pub arc_max: PathBuf,
    pub arc_meta_limit: PathBuf,
}

impl Default for TunablePaths {
    fn default() -> Self {
        TunablePaths {
            arc_max: PathBuf::from(ZFS_ARC_MAX_PATH),
            arc_meta_limit: PathBuf::from(ZFS_ARC_META_LIMIT_PATH),
        }
    }
}

impl TunablePaths {
    /// Fails when either file is missing, e.g. the zfs module isn't loaded or
    /// a newer module renamed the parameters.
    pub fn check_present(&self) -> Result<()> {
        let missing: Vec<&Path> = [&self.arc_meta_limit, &self.arc_max]
            .into_iter()
            .map(PathBuf::as_path)
            .filter(|path| !path.exists())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        for path in &missing {
            error!("File {} does not exist", path.display());
        }
        Err(Error::Config(format!(
            "missing tunable files: {}",
            missing
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pacing {
    /// Sleep before every measurement.
    pub action: Duration,
    /// Extra sleep after the controller settled on a value.
    pub idle: Duration,
    /// Sleep after a failed iteration.
    pub cooldown: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            action: Duration::from_secs(3),
            idle: Duration::from_secs(10),
            cooldown: Duration::from_secs(30),
        }
    }
}

impl Pacing {
    #[cfg(test)]
    pub fn immediate() -> Self {
        Pacing {
            action: Duration::ZERO,
            idle: Duration::ZERO,
            cooldown: Duration::ZERO,
        }
    }
}

/// Everything the daemon needs, built once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub thresholds: Thresholds,
    pub overrides: LimitOverrides,
    /// Pools whose primarycache is managed. Empty means every imported pool,
    /// listed again each time the cache mode changes.
    pub pools: Vec<String>,
    pub tunable_paths: TunablePaths,
    pub lock_path: PathBuf,
    /// Service restarted on panic.
    pub service: String,
    pub pacing: Pacing,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            thresholds: Thresholds::default(),
            overrides: LimitOverrides::default(),
            pools: Vec::new(),
            tunable_paths: TunablePaths::default(),
            lock_path: PathBuf::from(DEFAULT_LOCK_PATH),
            service: DEFAULT_SERVICE.to_string(),
            pacing: Pacing::default(),
            dry_run: false,
        }
    }
}
