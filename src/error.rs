// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;
use std::path::PathBuf;

use thiserror::Error as ThisError;

use crate::memory::MetricsError;
use crate::process_util::ProcessError;
use crate::shutdown::ShutdownReason;
use crate::tunables::TunableWriteError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid thresholds or bounds, or missing tunable files.
    #[error("Configuration error: {0}")]
    Config(String),
    /// The lock file could not be opened or locked.
    #[error("Failed to lock {}: {source}", path.display())]
    LockFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Another instance already holds the lock.
    #[error("Could not obtain lock {}; another process already running?", .0.display())]
    LockHeld(PathBuf),
    /// Memory statistics or the pool list could not be read.
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
    /// A tunable, pool property or sysctl could not be written.
    #[error("Tunable write error: {0}")]
    TunableWrite(#[from] TunableWriteError),
    /// The dependent service could not be restarted.
    #[error("Service error: {0}")]
    Service(#[source] ProcessError),
    /// A shutdown was requested.
    #[error("Cancelled: {0:?}")]
    Cancelled(ShutdownReason),
}

impl Error {
    /// The shutdown request behind a cancellation. Every other error is
    /// retried by the control loop after a cooldown.
    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        match self {
            Error::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_reason() {
        assert_eq!(
            Error::Cancelled(ShutdownReason::Interrupt).shutdown_reason(),
            Some(ShutdownReason::Interrupt)
        );
        assert_eq!(Error::Metrics(MetricsError::ZeroTotal).shutdown_reason(), None);
        assert_eq!(Error::Config("bad".to_string()).shutdown_reason(), None);
    }

    #[test]
    fn test_lock_held_message() {
        let err = Error::LockHeld(PathBuf::from("/run/test.lock"));
        assert_eq!(
            err.to_string(),
            "Could not obtain lock /run/test.lock; another process already running?"
        );
    }
}
