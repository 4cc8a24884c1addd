// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parses the output of `free -m`.

use super::Measurement;
use super::MetricsError;

/// Layout of the `free` output, which changed in procps-ng 3.3.10.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FreeSchema {
    /// procps-ng >= 3.3.10:
    ///
    /// ```text
    ///               total        used        free      shared  buff/cache   available
    /// Mem:          64000       30000        1000         100       33000       33500
    /// ```
    Available,
    /// procps-ng <= 3.3.9:
    ///
    /// ```text
    ///              total       used       free     shared    buffers     cached
    /// Mem:         64000      63000       1000          0        200      30000
    /// -/+ buffers/cache:      32800      31200
    /// ```
    BuffersCache,
}

impl FreeSchema {
    /// Picks the schema from the header's `available` column or the presence
    /// of the `-/+ buffers/cache:` line.
    pub fn detect(output: &str) -> Result<Self, MetricsError> {
        let header = output
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| MetricsError::Parse("empty output from free".to_string()))?;
        if header.split_whitespace().any(|column| column == "available") {
            Ok(FreeSchema::Available)
        } else if find_row(output, "-/+").is_some() {
            Ok(FreeSchema::BuffersCache)
        } else {
            Err(MetricsError::UnknownSchema(header.trim().to_string()))
        }
    }

    pub fn parse(self, output: &str) -> Result<Measurement, MetricsError> {
        let mem = find_row(output, "Mem:")
            .ok_or_else(|| MetricsError::Parse("no Mem: line in free output".to_string()))?;
        let total = column(&mem, 1)?;
        let used = match self {
            FreeSchema::Available => total.saturating_sub(column(&mem, 6)?),
            FreeSchema::BuffersCache => {
                let row = find_row(output, "-/+").ok_or_else(|| {
                    MetricsError::Parse("no -/+ buffers/cache line in free output".to_string())
                })?;
                column(&row, 2)?
            }
        };
        Ok(Measurement {
            total_mib: total,
            used_mib: used,
        })
    }
}

fn find_row(output: &str, label: &str) -> Option<Vec<String>> {
    output
        .lines()
        .map(|line| {
            line.split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .find(|tokens| tokens.first().map(String::as_str) == Some(label))
}

fn column(row: &[String], index: usize) -> Result<u64, MetricsError> {
    let token = row.get(index).ok_or_else(|| {
        MetricsError::Parse(format!("missing column {} in \"{}\"", index, row.join(" ")))
    })?;
    token
        .parse()
        .map_err(|_| MetricsError::Parse(format!("couldn't parse \"{}\" as u64", token)))
}
