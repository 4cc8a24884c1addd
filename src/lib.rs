// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Adjusts the ZFS ARC limits to keep system memory usage inside a target band.

pub mod arguments;
mod common;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod memory;
pub mod process_util;
pub mod shutdown;
pub mod singleton;
pub mod tunables;

#[cfg(test)]
mod test_utils;

pub use crate::error::Error;
pub use crate::error::Result;
