// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use log::info;
use thiserror::Error as ThisError;
use tokio::process::Command;

use crate::common::read_file_to_u64;
use crate::config::TunablePaths;
use crate::error::Error;
use crate::error::Result;
use crate::process_util::run_command;
use crate::process_util::ProcessError;

/// What the ARC may cache for a pool, i.e. the `primarycache` property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMode {
    All,
    MetadataOnly,
    None,
}

impl CacheMode {
    pub fn to_name(self) -> &'static str {
        match self {
            CacheMode::All => "all",
            CacheMode::MetadataOnly => "metadata",
            CacheMode::None => "none",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.to_name())
    }
}

#[derive(Debug, ThisError)]
pub enum TunableWriteError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Command(#[from] ProcessError),
}

/// Applies limits and cache modes to the system.
#[async_trait]
pub trait TunableSink: Send + Sync {
    /// Current `zfs_arc_max` in bytes.
    async fn read_max_limit(&self) -> Result<u64>;

    async fn write_max_limit(&self, bytes: u64) -> Result<()>;

    async fn write_meta_limit(&self, bytes: u64) -> Result<()>;

    async fn set_cache_mode(&self, pool: &str, mode: CacheMode) -> Result<()>;

    /// Drops the page cache and reclaimable slab objects.
    async fn drop_cache(&self) -> Result<()>;

    async fn restart_dependent_service(&self) -> Result<()>;
}

/// Writes the ARC parameters in sysfs and runs `zfs`, `sysctl` and `service`.
pub struct SysfsTunables {
    paths: TunablePaths,
    service: String,
}

impl SysfsTunables {
    pub fn new(paths: TunablePaths, service: impl Into<String>) -> Self {
        SysfsTunables {
            paths,
            service: service.into(),
        }
    }
}

fn write_tunable(path: &Path, bytes: u64) -> Result<()> {
    std::fs::write(path, bytes.to_string()).map_err(|source| {
        Error::TunableWrite(TunableWriteError::Write {
            path: path.to_path_buf(),
            source,
        })
    })
}

#[async_trait]
impl TunableSink for SysfsTunables {
    async fn read_max_limit(&self) -> Result<u64> {
        read_file_to_u64(&self.paths.arc_max).map_err(|source| {
            Error::TunableWrite(TunableWriteError::Read {
                path: self.paths.arc_max.clone(),
                source,
            })
        })
    }

    async fn write_max_limit(&self, bytes: u64) -> Result<()> {
        write_tunable(&self.paths.arc_max, bytes)
    }

    async fn write_meta_limit(&self, bytes: u64) -> Result<()> {
        write_tunable(&self.paths.arc_meta_limit, bytes)
    }

    async fn set_cache_mode(&self, pool: &str, mode: CacheMode) -> Result<()> {
        let mut command = Command::new("zfs");
        command
            .arg("set")
            .arg(format!("primarycache={}", mode))
            .arg(pool);
        run_command(command)
            .await
            .map_err(|e| Error::TunableWrite(e.into()))
    }

    async fn drop_cache(&self) -> Result<()> {
        let mut command = Command::new("sysctl");
        command.arg("vm.drop_caches=3");
        run_command(command)
            .await
            .map_err(|e| Error::TunableWrite(e.into()))
    }

    async fn restart_dependent_service(&self) -> Result<()> {
        let mut command = Command::new("service");
        command.args([self.service.as_str(), "restart"]);
        run_command(command).await.map_err(Error::Service)
    }
}

/// Logs every change instead of applying it. Reads still reach the system.
pub struct DryRunTunables<T> {
    inner: T,
}

impl<T: TunableSink> DryRunTunables<T> {
    pub fn new(inner: T) -> Self {
        DryRunTunables { inner }
    }
}

#[async_trait]
impl<T: TunableSink> TunableSink for DryRunTunables<T> {
    async fn read_max_limit(&self) -> Result<u64> {
        self.inner.read_max_limit().await
    }

    async fn write_max_limit(&self, bytes: u64) -> Result<()> {
        info!("dry run: zfs_arc_max = {}", bytes);
        Ok(())
    }

    async fn write_meta_limit(&self, bytes: u64) -> Result<()> {
        info!("dry run: zfs_arc_meta_limit = {}", bytes);
        Ok(())
    }

    async fn set_cache_mode(&self, pool: &str, mode: CacheMode) -> Result<()> {
        info!("dry run: zfs set primarycache={} {}", mode, pool);
        Ok(())
    }

    async fn drop_cache(&self) -> Result<()> {
        info!("dry run: sysctl vm.drop_caches=3");
        Ok(())
    }

    async fn restart_dependent_service(&self) -> Result<()> {
        info!("dry run: restart dependent service");
        Ok(())
    }
}
