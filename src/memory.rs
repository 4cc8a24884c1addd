// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod free;

use async_trait::async_trait;
use log::info;
use thiserror::Error as ThisError;
use tokio::process::Command;

pub use self::free::FreeSchema;
use crate::common::round2;
use crate::process_util::get_output_as_string;
use crate::process_util::ProcessError;

#[derive(Debug, ThisError)]
pub enum MetricsError {
    #[error("{0}")]
    Command(#[from] ProcessError),
    #[error("Couldn't parse output: {0}")]
    Parse(String),
    #[error("Unrecognized free output header: {0}")]
    UnknownSchema(String),
    #[error("Total memory is reported as 0")]
    ZeroTotal,
}

/// Memory usage snapshot in MiB.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Measurement {
    pub total_mib: u64,
    pub used_mib: u64,
}

impl Measurement {
    /// Percentage of total memory in use, rounded to two decimals.
    pub fn percent_used(&self) -> Result<f64, MetricsError> {
        if self.total_mib == 0 {
            return Err(MetricsError::ZeroTotal);
        }
        Ok(round2(
            100.0 * self.used_mib as f64 / self.total_mib as f64,
        ))
    }
}

/// Reports memory usage and the pools whose cache mode is managed.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Total memory in MiB.
    async fn total_memory(&self) -> Result<u64, MetricsError>;

    /// Used memory in MiB.
    async fn used_memory(&self) -> Result<u64, MetricsError>;

    /// Names of the currently imported pools.
    async fn list_pools(&self) -> Result<Vec<String>, MetricsError>;

    async fn measure(&self) -> Result<Measurement, MetricsError> {
        Ok(Measurement {
            total_mib: self.total_memory().await?,
            used_mib: self.used_memory().await?,
        })
    }
}

/// Reads memory from `free -m` and pools from `zpool list`.
pub struct SystemMetrics {
    schema: FreeSchema,
}

impl SystemMetrics {
    /// Runs `free` once to find out which output layout this host has.
    pub async fn probe() -> Result<Self, MetricsError> {
        let schema = FreeSchema::detect(&run_free().await?)?;
        info!("Detected free output schema: {:?}", schema);
        Ok(Self::with_schema(schema))
    }

    pub fn with_schema(schema: FreeSchema) -> Self {
        SystemMetrics { schema }
    }
}

/// The header labels are translated, so `free` runs in the C locale.
fn free_command() -> Command {
    let mut command = Command::new("free");
    command.arg("-m").env("LC_ALL", "C");
    command
}

async fn run_free() -> Result<String, MetricsError> {
    Ok(get_output_as_string(free_command()).await?)
}

fn parse_pool_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl MetricsSource for SystemMetrics {
    async fn total_memory(&self) -> Result<u64, MetricsError> {
        Ok(self.measure().await?.total_mib)
    }

    async fn used_memory(&self) -> Result<u64, MetricsError> {
        Ok(self.measure().await?.used_mib)
    }

    async fn list_pools(&self) -> Result<Vec<String>, MetricsError> {
        let mut command = Command::new("zpool");
        command.args(["list", "-H", "-o", "name"]);
        Ok(parse_pool_list(&get_output_as_string(command).await?))
    }

    // A single `free` run gives a consistent total and used pair.
    async fn measure(&self) -> Result<Measurement, MetricsError> {
        self.schema.parse(&run_free().await?)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use super::*;

    #[test]
    fn test_percent_used() {
        let measurement = Measurement {
            total_mib: 64000,
            used_mib: 61000,
        };
        assert_eq!(measurement.percent_used().unwrap(), 95.31);

        let measurement = Measurement {
            total_mib: 64000,
            used_mib: 62500,
        };
        assert_eq!(measurement.percent_used().unwrap(), 97.66);
    }

    #[test]
    fn test_percent_used_zero_total() {
        assert!(matches!(
            Measurement::default().percent_used(),
            Err(MetricsError::ZeroTotal)
        ));
    }

    #[test]
    fn test_free_runs_in_c_locale() {
        let command = free_command();
        let envs: Vec<_> = command.as_std().get_envs().collect();
        assert_eq!(
            envs,
            vec![(OsStr::new("LC_ALL"), Some(OsStr::new("C")))]
        );
        assert_eq!(
            command.as_std().get_args().collect::<Vec<_>>(),
            vec![OsStr::new("-m")]
        );
    }

    #[test]
    fn test_parse_pool_list() {
        assert_eq!(
            parse_pool_list("tank\nbackup\n\n  rpool \n"),
            vec!["tank", "backup", "rpool"]
        );
        assert!(parse_pool_list("").is_empty());
    }
}
