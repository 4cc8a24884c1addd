// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use log::info;

use crate::config::Config;
use crate::controller::Bounds;
use crate::controller::Controller;
use crate::error::Error;
use crate::error::Result;
use crate::memory::MetricsSource;
use crate::shutdown::cancellable;
use crate::shutdown::ShutdownReason;
use crate::shutdown::ShutdownReceiver;
use crate::singleton::SingletonGuard;
use crate::tunables::TunableSink;

/// Checks the tunables, takes the singleton lock and runs the controller
/// until a shutdown request arrives. Nothing is written before the lock is
/// held, and the lock is released on every return path.
pub async fn run<M: MetricsSource, T: TunableSink>(
    config: &Config,
    metrics: &M,
    tunables: &T,
    shutdown: &mut ShutdownReceiver,
) -> Result<ShutdownReason> {
    config.tunable_paths.check_present()?;

    let _guard = SingletonGuard::acquire(&config.lock_path)?;

    let total_mib = cancellable(shutdown, async {
        metrics.total_memory().await.map_err(Error::from)
    })
    .await?;
    let bounds = Bounds::derive(total_mib, &config.thresholds, &config.overrides)?;
    info!(
        "Total memory {} MiB; limits: min {} GiB, max {} GiB, good {}..{} GiB",
        total_mib,
        bounds.min_limit,
        bounds.max_limit,
        bounds.min_good_limit,
        bounds.max_good_limit
    );

    let mut controller = Controller::new(config, bounds, metrics, tunables);
    cancellable(shutdown, controller.initialize_limit()).await?;

    let reason = controller.run(shutdown).await;
    info!("Stopping: {:?}", reason);
    Ok(reason)
}
