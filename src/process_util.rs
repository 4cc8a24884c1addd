// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Helpers for running the external tools the daemon depends on (`free`,
//! `zpool`, `zfs`, `sysctl` and `service`).

use std::fmt;
use std::io;
use std::process::Output;
use std::process::Stdio;

use log::debug;
use tokio::process::Command;

#[derive(Debug)]
pub enum ErrorKind {
    LaunchProcess(io::Error),
    ExitedNonZero(Output),
}

#[derive(Debug)]
pub struct ProcessError {
    command: String,
    kind: ErrorKind,
}

impl ProcessError {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.kind {
            ErrorKind::LaunchProcess(err) => {
                write!(f, "failed to launch process \"{}\": {}", self.command, err)
            }
            ErrorKind::ExitedNonZero(output) => write!(
                f,
                "command \"{}\" failed: {}\nstdout={}\nstderr={}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            ),
        }
    }
}

impl std::error::Error for ProcessError {}

/// Format the command as a string for logging.
///
/// The debug format of the std command puts quotes around the program and
/// each argument, e.g. `"cmd" "arg1" "arg2"`. Removing all quotes isn't
/// correct in all cases, but good enough for logging purposes.
fn command_to_string(cmd: &Command) -> String {
    format!("{:?}", cmd.as_std()).replace('"', "")
}

/// Run a command and get its stdout as raw bytes. An error is returned if
/// the process fails to launch, or if it exits non-zero.
///
/// The child is killed if the returned future is dropped before it
/// completes, so a shutdown request never waits on a hung tool.
pub async fn get_command_output(mut command: Command) -> Result<Vec<u8>, ProcessError> {
    let cmd_str = command_to_string(&command);
    debug!("running command: {}", cmd_str);

    let output = command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| ProcessError {
            command: cmd_str.clone(),
            kind: ErrorKind::LaunchProcess(err),
        })?;

    if !output.status.success() {
        return Err(ProcessError {
            command: cmd_str,
            kind: ErrorKind::ExitedNonZero(output),
        });
    }
    Ok(output.stdout)
}

/// Run a command and get its stdout as a `String`.
pub async fn get_output_as_string(command: Command) -> Result<String, ProcessError> {
    let stdout = get_command_output(command).await?;
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

/// Run a command for its side effect only. Stdout is discarded, stderr is
/// kept for the error message.
pub async fn run_command(mut command: Command) -> Result<(), ProcessError> {
    command.stdout(Stdio::null());
    get_command_output(command).await.map(|_| ())
}
