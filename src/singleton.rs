// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::path::PathBuf;

use log::error;
use nix::errno::Errno;
use nix::fcntl::flock;
use nix::fcntl::FlockArg;

use crate::error::Error;
use crate::error::Result;

/// Holds an exclusive flock on a well-known file so only one daemon tunes
/// the ARC at a time. On Drop, the lock is released and the file removed.
///
/// The file is left behind if the process is killed without unwinding
/// (e.g. SIGKILL); the stale file is harmless since the lock itself dies with
/// the process.
pub struct SingletonGuard {
    // Closing the file releases the lock.
    _file: File,
    path: PathBuf,
}

impl SingletonGuard {
    /// Takes the lock without blocking. Fails with `Error::LockHeld` if
    /// another process has it.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| Error::LockFile {
                path: path.to_path_buf(),
                source,
            })?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(SingletonGuard {
                _file: file,
                path: path.to_path_buf(),
            }),
            Err(Errno::EAGAIN) => Err(Error::LockHeld(path.to_path_buf())),
            Err(errno) => Err(Error::LockFile {
                path: path.to_path_buf(),
                source: errno.into(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                error!("Failed to remove lock file {}: {}", self.path.display(), e);
            }
        }
    }
}
