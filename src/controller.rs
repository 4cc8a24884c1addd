// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The feedback loop that steers the ARC limit.
//!
//! Every iteration measures the used memory percentage and applies the first
//! matching rule:
//!
//! 1. above `max_panic_percent`: drop caches, alternate the pools'
//!    primarycache between `metadata` and `none`, restart the dependent
//!    service.
//! 2. above `max_percent`: lower the limit by 1 GiB.
//! 3. below `min_percent`: set primarycache to `all` and raise the limit by
//!    1 GiB.
//! 4. above the good band: jump to `min_good_limit`.
//! 5. below the good band: jump to `max_good_limit`.
//! 6. inside the good band: interpolate between `max_good_limit` and
//!    `min_good_limit`.

use log::error;
use log::info;
use log::warn;

use crate::common::bytes_to_gib;
use crate::common::gib_to_bytes;
use crate::common::round2;
use crate::config::Config;
use crate::config::LimitOverrides;
use crate::config::Thresholds;
use crate::error::Error;
use crate::error::Result;
use crate::memory::MetricsSource;
use crate::shutdown::cancellable;
use crate::shutdown::interruptible_sleep;
use crate::shutdown::ShutdownReason;
use crate::shutdown::ShutdownReceiver;
use crate::tunables::CacheMode;
use crate::tunables::TunableSink;

/// zfs_arc_meta_limit is kept this many GiB below zfs_arc_max.
const META_LIMIT_OFFSET_GIB: f64 = 2.0;

/// Step in GiB for the rules that move the limit gradually.
const LIMIT_STEP_GIB: f64 = 1.0;

/// Range of the ARC limit in GiB.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    /// The lowest value the limit is ever set to.
    pub min_limit: f64,
    /// The highest value the limit is ever set to.
    pub max_limit: f64,
    /// Used when memory usage is close to `max_good_percent`.
    pub min_good_limit: f64,
    /// Used when memory usage is close to `min_good_percent`.
    pub max_good_limit: f64,
}

impl Bounds {
    /// Computes the bounds from the total memory and the thresholds, unless
    /// overridden.
    pub fn derive(
        total_mib: u64,
        thresholds: &Thresholds,
        overrides: &LimitOverrides,
    ) -> Result<Self> {
        let total_gib = total_mib as f64 / 1024.0;
        let from_percent = |percent: f64| (total_gib * (percent / 100.0)).trunc();
        let bounds = Bounds {
            // A quarter of the min_percent share, for extra room below the band.
            min_limit: overrides
                .min_limit
                .unwrap_or_else(|| (total_gib * (thresholds.min_percent / 100.0) / 4.0).trunc()),
            max_limit: overrides
                .max_limit
                .unwrap_or_else(|| from_percent(thresholds.max_percent)),
            min_good_limit: overrides
                .min_good_limit
                .unwrap_or_else(|| from_percent(thresholds.min_good_percent)),
            max_good_limit: overrides
                .max_good_limit
                .unwrap_or_else(|| from_percent(thresholds.max_good_percent)),
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Checks `0 <= min_limit <= min_good_limit <= max_good_limit <= max_limit`.
    pub fn validate(&self) -> Result<()> {
        let ordered = [
            ("min limit", self.min_limit),
            ("min good limit", self.min_good_limit),
            ("max good limit", self.max_good_limit),
            ("max limit", self.max_limit),
        ];
        for (name, value) in ordered {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!("invalid {}: {}", name, value)));
            }
        }
        for pair in ordered.windows(2) {
            let (low_name, low) = pair[0];
            let (high_name, high) = pair[1];
            if low > high {
                return Err(Error::Config(format!(
                    "{} ({} GiB) is above {} ({} GiB)",
                    low_name, low, high_name, high
                )));
            }
        }
        Ok(())
    }

    pub fn clamp(&self, limit: f64) -> f64 {
        limit.max(self.min_limit).min(self.max_limit)
    }
}

/// The adjustment rules, in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rule {
    Panic,
    AboveMax,
    BelowMin,
    AboveGood,
    BelowGood,
    Steady,
}

impl Rule {
    pub fn select(percent: f64, thresholds: &Thresholds) -> Rule {
        if percent > thresholds.max_panic_percent {
            Rule::Panic
        } else if percent > thresholds.max_percent {
            Rule::AboveMax
        } else if percent < thresholds.min_percent {
            Rule::BelowMin
        } else if percent > thresholds.max_good_percent {
            Rule::AboveGood
        } else if percent < thresholds.min_good_percent {
            Rule::BelowGood
        } else {
            Rule::Steady
        }
    }
}

/// Position of `percent` inside the good band (0 at `min_good_percent`, 1 at
/// `max_good_percent`) and the limit for it. The limit moves from
/// `max_good_limit` down to `min_good_limit` as usage climbs.
pub fn steady_state_limit(percent: f64, thresholds: &Thresholds, bounds: &Bounds) -> (f64, f64) {
    let relative = (percent - thresholds.min_good_percent)
        / (thresholds.max_good_percent - thresholds.min_good_percent);
    let limit = bounds.min_good_limit
        + (1.0 - relative) * (bounds.max_good_limit - bounds.min_good_limit);
    (relative, bounds.clamp(round2(limit)))
}

/// How long to wait before the next measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pace {
    /// Measure again after the short action delay.
    Action,
    /// Also wait the idle delay.
    Idle,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControllerState {
    /// The ARC limit in GiB, always within the bounds.
    pub current_limit: f64,
    /// The primarycache last applied to the pools, unknown at startup.
    pub cache_mode: Option<CacheMode>,
}

pub struct Controller<'a, M, T> {
    config: &'a Config,
    bounds: Bounds,
    metrics: &'a M,
    tunables: &'a T,
    state: ControllerState,
}

impl<'a, M: MetricsSource, T: TunableSink> Controller<'a, M, T> {
    pub fn new(config: &'a Config, bounds: Bounds, metrics: &'a M, tunables: &'a T) -> Self {
        Controller {
            config,
            bounds,
            metrics,
            tunables,
            state: ControllerState {
                current_limit: bounds.min_limit,
                cache_mode: None,
            },
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Starts from the current zfs_arc_max, clamped into the bounds, and
    /// writes it back so both tunables agree before the loop starts.
    pub async fn initialize_limit(&mut self) -> Result<f64> {
        let persisted = round2(bytes_to_gib(self.tunables.read_max_limit().await?));
        let limit = self.bounds.clamp(persisted);
        if limit != persisted {
            info!(
                "Persisted limit {:.2} GiB is outside [{}, {}] GiB, using {:.2} GiB",
                persisted, self.bounds.min_limit, self.bounds.max_limit, limit
            );
        }
        let percent = self.metrics.measure().await?.percent_used()?;
        self.set_limit(percent, limit, "before initial settings")
            .await?;
        Ok(limit)
    }

    /// Writes `limit` to zfs_arc_max and `limit - 2 GiB` to
    /// zfs_arc_meta_limit. Both writes are attempted even if the first one
    /// fails; the first failure is returned.
    pub async fn adjust(&self, percent: f64, limit: f64, reason: &str) -> Result<()> {
        let max = gib_to_bytes(limit);
        let meta_limit = gib_to_bytes(limit - META_LIMIT_OFFSET_GIB);

        info!(
            "{:.2} % is {}; new setting is {:.2} GiB, meta_limit = {}, max = {}",
            percent, reason, limit, meta_limit, max
        );

        let meta_result = self.tunables.write_meta_limit(meta_limit).await;
        let max_result = self.tunables.write_max_limit(max).await;
        meta_result.and(max_result)
    }

    async fn set_limit(&mut self, percent: f64, limit: f64, reason: &str) -> Result<()> {
        self.state.current_limit = limit;
        self.adjust(percent, limit, reason).await
    }

    /// The configured pools, or every imported pool when none were given.
    async fn managed_pools(&self) -> Result<Vec<String>> {
        if self.config.pools.is_empty() {
            Ok(self.metrics.list_pools().await?)
        } else {
            Ok(self.config.pools.clone())
        }
    }

    async fn apply_cache_mode(&self, mode: CacheMode) -> Result<()> {
        for pool in self.managed_pools().await? {
            self.tunables.set_cache_mode(&pool, mode).await?;
        }
        Ok(())
    }

    /// Measures once and applies the matching rule.
    pub async fn step(&mut self) -> Result<Pace> {
        let percent = self.metrics.measure().await?.percent_used()?;
        let thresholds = self.config.thresholds;
        let bounds = self.bounds;

        match Rule::select(percent, &thresholds) {
            Rule::Panic => {
                let mode = match self.state.cache_mode {
                    Some(CacheMode::MetadataOnly) => CacheMode::None,
                    _ => CacheMode::MetadataOnly,
                };
                self.state.cache_mode = Some(mode);
                warn!(
                    "{:.2} % exceeds max_panic_percent! dropping cache and setting primarycache={}",
                    percent, mode
                );
                self.tunables.drop_cache().await?;
                self.apply_cache_mode(mode).await?;
                self.tunables.restart_dependent_service().await?;
                // The limit is not touched here, even above min_limit.
                Ok(Pace::Action)
            }
            Rule::AboveMax => {
                if self.state.current_limit > bounds.min_limit {
                    let limit = bounds.clamp(self.state.current_limit - LIMIT_STEP_GIB);
                    self.set_limit(percent, limit, "> max").await?;
                    Ok(Pace::Action)
                } else {
                    info!(
                        "{:.2} % is > max; but limit = {:.2} GiB is too low already; skipping",
                        percent, self.state.current_limit
                    );
                    Ok(Pace::Idle)
                }
            }
            Rule::BelowMin => {
                if self.state.cache_mode != Some(CacheMode::All) {
                    info!("{:.2} % is < min; setting primarycache=all", percent);
                    self.apply_cache_mode(CacheMode::All).await?;
                    self.state.cache_mode = Some(CacheMode::All);
                }
                if self.state.current_limit < bounds.max_limit {
                    let limit = bounds.clamp(self.state.current_limit + LIMIT_STEP_GIB);
                    self.set_limit(percent, limit, "< min").await?;
                    Ok(Pace::Action)
                } else {
                    info!(
                        "{:.2} % is < min; but limit = {:.2} GiB is too high already; no action",
                        percent, self.state.current_limit
                    );
                    Ok(Pace::Idle)
                }
            }
            Rule::AboveGood => {
                self.set_limit(percent, bounds.min_good_limit, "> good")
                    .await?;
                Ok(Pace::Idle)
            }
            Rule::BelowGood => {
                self.set_limit(percent, bounds.max_good_limit, "< good")
                    .await?;
                Ok(Pace::Idle)
            }
            Rule::Steady => {
                let (relative, limit) = steady_state_limit(percent, &thresholds, &bounds);
                let reason = format!("good: relative_goodness = {:.6}", relative);
                self.set_limit(percent, limit, &reason).await?;
                Ok(Pace::Idle)
            }
        }
    }

    /// Runs the loop until a shutdown request arrives. Any other failure is
    /// logged and retried after the cooldown.
    pub async fn run(&mut self, shutdown: &mut ShutdownReceiver) -> ShutdownReason {
        let pacing = self.config.pacing;
        loop {
            let iteration = cancellable(shutdown, async {
                tokio::time::sleep(pacing.action).await;
                if self.step().await? == Pace::Idle {
                    tokio::time::sleep(pacing.idle).await;
                }
                Ok::<(), Error>(())
            })
            .await;

            let Err(err) = iteration else {
                continue;
            };
            if let Some(reason) = err.shutdown_reason() {
                return reason;
            }
            error!(
                "Something went wrong, sleeping {:?} and continuing: {}",
                pacing.cooldown, err
            );
            if let Err(err) = interruptible_sleep(shutdown, pacing.cooldown).await {
                if let Some(reason) = err.shutdown_reason() {
                    return reason;
                }
            }
        }
    }
}
