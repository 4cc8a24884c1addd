// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fakes of the system collaborators for controller and daemon tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::error::Result;
use crate::memory::Measurement;
use crate::memory::MetricsError;
use crate::memory::MetricsSource;
use crate::shutdown::ShutdownReason;
use crate::tunables::CacheMode;
use crate::tunables::TunableSink;
use crate::tunables::TunableWriteError;

pub const TOTAL_MIB: u64 = 64000;

/// Used memory in MiB that gives `percent` of `TOTAL_MIB`.
pub fn used_for_percent(percent: f64) -> u64 {
    (TOTAL_MIB as f64 * percent / 100.0).round() as u64
}

/// Replays scripted measurements. `None` entries fail with a parse error.
/// Once the script runs out, a shutdown request is sent if a sender was
/// given and the measurement never completes.
pub struct FakeMetrics {
    script: Mutex<VecDeque<Option<Measurement>>>,
    pools: Vec<String>,
    shutdown: Option<mpsc::Sender<ShutdownReason>>,
    measure_count: Mutex<usize>,
}

impl FakeMetrics {
    pub fn new(script: impl IntoIterator<Item = Option<Measurement>>) -> Self {
        FakeMetrics {
            script: Mutex::new(script.into_iter().collect()),
            pools: vec!["tank".to_string(), "backup".to_string()],
            shutdown: None,
            measure_count: Mutex::new(0),
        }
    }

    /// Scripted percentages of `TOTAL_MIB`.
    pub fn with_percents(percents: &[f64]) -> Self {
        Self::new(percents.iter().map(|percent| {
            Some(Measurement {
                total_mib: TOTAL_MIB,
                used_mib: used_for_percent(*percent),
            })
        }))
    }

    pub fn shutdown_when_exhausted(mut self, sender: mpsc::Sender<ShutdownReason>) -> Self {
        self.shutdown = Some(sender);
        self
    }

    pub fn measure_count(&self) -> usize {
        *self.measure_count.lock().unwrap()
    }
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn total_memory(&self) -> std::result::Result<u64, MetricsError> {
        Ok(TOTAL_MIB)
    }

    async fn used_memory(&self) -> std::result::Result<u64, MetricsError> {
        Ok(self.measure().await?.used_mib)
    }

    async fn list_pools(&self) -> std::result::Result<Vec<String>, MetricsError> {
        Ok(self.pools.clone())
    }

    async fn measure(&self) -> std::result::Result<Measurement, MetricsError> {
        *self.measure_count.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Some(measurement)) => Ok(measurement),
            Some(None) => Err(MetricsError::Parse("scripted failure".to_string())),
            None => {
                if let Some(sender) = &self.shutdown {
                    let _ = sender.try_send(ShutdownReason::Interrupt);
                }
                std::future::pending().await
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TunableEvent {
    MaxLimit(u64),
    MetaLimit(u64),
    CacheMode(String, CacheMode),
    DropCache,
    RestartService,
}

/// Records every change in memory.
pub struct FakeTunables {
    max_limit: Mutex<u64>,
    events: Mutex<Vec<TunableEvent>>,
    fail_meta_writes: bool,
}

impl FakeTunables {
    pub fn new(max_limit: u64) -> Self {
        FakeTunables {
            max_limit: Mutex::new(max_limit),
            events: Mutex::new(Vec::new()),
            fail_meta_writes: false,
        }
    }

    pub fn failing_meta_writes(mut self) -> Self {
        self.fail_meta_writes = true;
        self
    }

    pub fn events(&self) -> Vec<TunableEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    fn record(&self, event: TunableEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl TunableSink for FakeTunables {
    async fn read_max_limit(&self) -> Result<u64> {
        Ok(*self.max_limit.lock().unwrap())
    }

    async fn write_max_limit(&self, bytes: u64) -> Result<()> {
        *self.max_limit.lock().unwrap() = bytes;
        self.record(TunableEvent::MaxLimit(bytes));
        Ok(())
    }

    async fn write_meta_limit(&self, bytes: u64) -> Result<()> {
        if self.fail_meta_writes {
            return Err(Error::TunableWrite(TunableWriteError::Write {
                path: "zfs_arc_meta_limit".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            }));
        }
        self.record(TunableEvent::MetaLimit(bytes));
        Ok(())
    }

    async fn set_cache_mode(&self, pool: &str, mode: CacheMode) -> Result<()> {
        self.record(TunableEvent::CacheMode(pool.to_string(), mode));
        Ok(())
    }

    async fn drop_cache(&self) -> Result<()> {
        self.record(TunableEvent::DropCache);
        Ok(())
    }

    async fn restart_dependent_service(&self) -> Result<()> {
        self.record(TunableEvent::RestartService);
        Ok(())
    }
}
