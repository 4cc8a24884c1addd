// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::process::ExitCode;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use log::error;
use log::info;
use log::Level;
use tokio::runtime::Builder;
use tokio::sync::mpsc;

use zfs_memtuned::arguments::Args;
use zfs_memtuned::config::Config;
use zfs_memtuned::daemon;
use zfs_memtuned::memory::SystemMetrics;
use zfs_memtuned::shutdown::install_signal_handlers;
use zfs_memtuned::shutdown::ShutdownReason;
use zfs_memtuned::tunables::DryRunTunables;
use zfs_memtuned::tunables::SysfsTunables;

fn init_logging(args: &Args) -> Result<()> {
    if args.syslog {
        // syslog::Error is not Sync, so it can't carry anyhow context.
        syslog::init_unix(syslog::Facility::LOG_DAEMON, args.log_level)
            .map_err(|e| anyhow!("Failed to initialize syslog: {}", e))?;
    } else {
        stderrlog::new()
            .module(module_path!())
            .verbosity(args.log_level.to_level().unwrap_or(Level::Info))
            .timestamp(stderrlog::Timestamp::Millisecond)
            .init()
            .context("Failed to initialize log")?;
    }
    Ok(())
}

async fn serve(config: &Config) -> Result<ShutdownReason> {
    let (sender, mut shutdown) = mpsc::channel(1);
    install_signal_handlers(sender).context("Failed to install signal handlers")?;

    let metrics = SystemMetrics::probe()
        .await
        .context("Failed to detect the free output format")?;
    let tunables = SysfsTunables::new(config.tunable_paths.clone(), &config.service);

    let result = if config.dry_run {
        info!("Dry run: tunables and services are left untouched");
        let tunables = DryRunTunables::new(tunables);
        daemon::run(config, &metrics, &tunables, &mut shutdown).await
    } else {
        daemon::run(config, &metrics, &tunables, &mut shutdown).await
    };
    match result {
        Ok(reason) => Ok(reason),
        // A signal during startup is still a clean shutdown.
        Err(e) => match e.shutdown_reason() {
            Some(reason) => Ok(reason),
            None => Err(e.into()),
        },
    }
}

fn run(config: &Config) -> Result<ShutdownReason> {
    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(serve(config))
}

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();
    let args = match Args::parse(&argv) {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Nothing is logged before this point, so failures go to stderr.
    if let Err(e) = init_logging(&args) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }
    info!("Starting zfs_memtuned");

    match run(&args.config) {
        Ok(reason) => {
            info!("Exiting after {:?}", reason);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("zfs_memtuned failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_to_stderr() {
        let argv: Vec<String> = ["zfs_memtuned", "-q"]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        let args = Args::parse(&argv).unwrap().unwrap();
        init_logging(&args).unwrap();
        // The global logger can only be installed once.
        assert!(init_logging(&args).is_err());
    }

    #[test]
    fn test_startup_failure_is_reported() {
        let config = Config {
            lock_path: "/nonexistent-dir/zfs_memtuned.lock".into(),
            ..Config::default()
        };
        // Either `free` is unavailable or the tunable files are missing.
        // Both are errors, never a shutdown reason.
        assert!(run(&config).is_err());
    }
}
