// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::str::FromStr;

use getopts::Matches;
use getopts::Options;
use log::LevelFilter;

use crate::config::Config;
use crate::config::LimitOverrides;
use crate::config::Thresholds;
use crate::config::DEFAULT_LOCK_PATH;
use crate::config::DEFAULT_SERVICE;
use crate::error::Error;
use crate::error::Result;

const BRIEF: &str = r#"Usage: zfs_memtuned [options] [pool...]
Automatically adjusts the zfsonlinux ARC limits as needed to free up or use up
memory. Pools are only used for setting primarycache (default: all pools).
"#;

/// Parsed command line.
#[derive(Debug)]
pub struct Args {
    pub config: Config,
    pub log_level: LevelFilter,
    pub syslog: bool,
}

fn build_options() -> Options {
    let mut opts = Options::new();
    opts.optflag("d", "debug", "Enable debug level logging");
    opts.optflag("v", "verbose", "Verbose mode");
    opts.optflag("q", "quiet", "Quiet mode");
    opts.optflag("h", "help", "Print this help text");
    opts.optflag(
        "n",
        "dry-run",
        "Log the tunable writes and commands instead of running them",
    );
    opts.optflag("", "syslog", "Log to syslog instead of stderr");
    // These are the limits for the actual reported used RAM.
    opts.optopt(
        "m",
        "min-percent",
        "Minimum used memory percentage before trying to adjust to a good range (default 80)",
        "PERCENT",
    );
    opts.optopt(
        "M",
        "max-percent",
        "Maximum used memory percentage before trying to adjust to a good range (default 94)",
        "PERCENT",
    );
    opts.optopt(
        "g",
        "min-good-percent",
        "Minimum used memory percentage of the good range to stay in (default 89). \
         Lower it significantly if the daemon panics often",
        "PERCENT",
    );
    opts.optopt(
        "G",
        "max-good-percent",
        "Maximum used memory percentage of the good range to stay in (default 93)",
        "PERCENT",
    );
    opts.optopt(
        "P",
        "max-panic-percent",
        "Used memory percentage where caches are dropped immediately (default 97)",
        "PERCENT",
    );
    // These are the limits of what goes in the ARC tunables.
    opts.optopt("", "min-gb", "Lowest ARC limit (derived from min-percent)", "GIB");
    opts.optopt("", "max-gb", "Highest ARC limit (derived from max-percent)", "GIB");
    opts.optopt(
        "",
        "min-good-gb",
        "ARC limit near the top of the good range (derived from min-good-percent)",
        "GIB",
    );
    opts.optopt(
        "",
        "max-good-gb",
        "ARC limit near the bottom of the good range (derived from max-good-percent)",
        "GIB",
    );
    opts.optopt(
        "",
        "service",
        &format!("Service restarted on panic (default {})", DEFAULT_SERVICE),
        "NAME",
    );
    opts.optopt(
        "",
        "lock-file",
        &format!("Single instance lock (default {})", DEFAULT_LOCK_PATH),
        "PATH",
    );
    opts
}

fn parse_opt<T: FromStr>(matches: &Matches, name: &str) -> Result<Option<T>> {
    match matches.opt_str(name) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid value for --{}: {}", name, value))),
    }
}

impl Args {
    /// Parses `argv` including the program name. Returns `Ok(None)` after
    /// printing the usage when help was requested.
    pub fn parse(argv: &[String]) -> Result<Option<Args>> {
        let opts = build_options();
        let matches = opts
            .parse(argv.iter().skip(1))
            .map_err(|e| Error::Config(format!("Failed to parse arguments: {}", e)))?;

        if matches.opt_present("h") {
            println!("{}", opts.usage(BRIEF));
            return Ok(None);
        }

        let defaults = Thresholds::default();
        let thresholds = Thresholds {
            min_percent: parse_opt(&matches, "min-percent")?.unwrap_or(defaults.min_percent),
            max_percent: parse_opt(&matches, "max-percent")?.unwrap_or(defaults.max_percent),
            min_good_percent: parse_opt(&matches, "min-good-percent")?
                .unwrap_or(defaults.min_good_percent),
            max_good_percent: parse_opt(&matches, "max-good-percent")?
                .unwrap_or(defaults.max_good_percent),
            max_panic_percent: parse_opt(&matches, "max-panic-percent")?
                .unwrap_or(defaults.max_panic_percent),
        };
        thresholds.validate()?;

        let overrides = LimitOverrides {
            min_limit: parse_opt(&matches, "min-gb")?,
            max_limit: parse_opt(&matches, "max-gb")?,
            min_good_limit: parse_opt(&matches, "min-good-gb")?,
            max_good_limit: parse_opt(&matches, "max-good-gb")?,
        };

        let log_level = if matches.opt_present("d") {
            LevelFilter::Trace
        } else if matches.opt_present("v") {
            LevelFilter::Debug
        } else if matches.opt_present("q") {
            LevelFilter::Warn
        } else {
            LevelFilter::Info
        };

        let mut config = Config {
            thresholds,
            overrides,
            pools: matches.free.clone(),
            dry_run: matches.opt_present("n"),
            ..Config::default()
        };
        if let Some(service) = matches.opt_str("service") {
            config.service = service;
        }
        if let Some(lock_path) = matches.opt_str("lock-file") {
            config.lock_path = PathBuf::from(lock_path);
        }

        Ok(Some(Args {
            config,
            log_level,
            syslog: matches.opt_present("syslog"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Args>> {
        let argv: Vec<String> = std::iter::once("zfs_memtuned")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();
        Args::parse(&argv)
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]).unwrap().unwrap();
        assert_eq!(args.config, Config::default());
        assert_eq!(args.log_level, LevelFilter::Info);
        assert!(!args.syslog);
    }

    #[test]
    fn test_help() {
        assert!(parse(&["-h"]).unwrap().is_none());
    }

    #[test]
    fn test_full_command_line() {
        let args = parse(&[
            "-m",
            "70",
            "-M",
            "90",
            "-g",
            "75",
            "-G",
            "85",
            "-P",
            "95",
            "--min-gb",
            "2",
            "--max-good-gb",
            "40.5",
            "--service",
            "backupd",
            "--lock-file",
            "/tmp/test.lock",
            "-n",
            "-v",
            "--syslog",
            "tank",
            "backup",
        ])
        .unwrap()
        .unwrap();

        assert_eq!(
            args.config.thresholds,
            Thresholds {
                min_percent: 70.0,
                max_percent: 90.0,
                min_good_percent: 75.0,
                max_good_percent: 85.0,
                max_panic_percent: 95.0,
            }
        );
        assert_eq!(
            args.config.overrides,
            LimitOverrides {
                min_limit: Some(2.0),
                max_good_limit: Some(40.5),
                ..LimitOverrides::default()
            }
        );
        assert_eq!(args.config.pools, vec!["tank", "backup"]);
        assert_eq!(args.config.service, "backupd");
        assert_eq!(args.config.lock_path, PathBuf::from("/tmp/test.lock"));
        assert!(args.config.dry_run);
        assert!(args.syslog);
        assert_eq!(args.log_level, LevelFilter::Debug);
    }

    #[test]
    fn test_log_level_precedence() {
        assert_eq!(parse(&["-q"]).unwrap().unwrap().log_level, LevelFilter::Warn);
        assert_eq!(
            parse(&["-q", "-d"]).unwrap().unwrap().log_level,
            LevelFilter::Trace
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(parse(&["-m", "lots"]), Err(Error::Config(_))));
        assert!(matches!(parse(&["--bogus"]), Err(Error::Config(_))));
        // min-good-percent above max-good-percent.
        assert!(matches!(parse(&["-g", "95"]), Err(Error::Config(_))));
    }
}
