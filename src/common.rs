// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

// Extract the parsing function for unittest.
pub fn parse_file_to_u64<R: BufRead>(reader: R) -> io::Result<u64> {
    let first_line = reader
        .lines()
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "No content in buffer"))??;
    first_line.trim().parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Couldn't parse \"{}\" as u64", first_line),
        )
    })
}

/// Get the first line in a file and parse as u64.
pub fn read_file_to_u64<P: AsRef<Path>>(filename: P) -> io::Result<u64> {
    let reader = File::open(filename).map(BufReader::new)?;
    parse_file_to_u64(reader)
}

/// Rounds to two decimals, the precision limits and percentages are
/// reported and compared with.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Converts GiB to bytes, truncating and saturating at 0.
pub fn gib_to_bytes(gib: f64) -> u64 {
    if gib <= 0.0 {
        0
    } else {
        (gib * BYTES_PER_GIB) as u64
    }
}

pub fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GIB
}
