// Copyright © 2021 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Helpers for tests that drive libvirt guests: host command execution,
//! SSH sessions into guests, guest network queries and the MAC change
//! procedure.

pub mod mac_change;
pub mod net;
mod session;

use std::process::{ExitStatus, Output};
use std::thread;
use std::time::{Duration, Instant};

pub use session::{GuestSession, SessionError, SshSession};
use thiserror::Error;

#[derive(Debug)]
pub struct PasswordAuth {
    pub username: String,
    pub password: String,
}

impl Default for PasswordAuth {
    fn default() -> Self {
        PasswordAuth {
            username: String::from("root"),
            password: String::from("123456"),
        }
    }
}

pub const DEFAULT_SSH_RETRIES: u8 = 6;
pub const DEFAULT_SSH_TIMEOUT: u8 = 10;

#[derive(Error, Debug)]
pub enum SshCommandError {
    #[error("ssh connection failed")]
    Connection(#[source] std::io::Error),
    #[error("ssh session creation failed")]
    Session(#[source] ssh2::Error),
    #[error("ssh handshake failed")]
    Handshake(#[source] ssh2::Error),
    #[error("ssh authentication failed")]
    Authentication(#[source] ssh2::Error),
    #[error("ssh channel session failed")]
    ChannelSession(#[source] ssh2::Error),
    #[error("ssh command failed")]
    Command(#[source] ssh2::Error),
    #[error("reading ssh command output failed")]
    Output(#[source] std::io::Error),
    #[error("retrieving exit status from ssh command failed")]
    ExitStatus(#[source] ssh2::Error),
    #[error("the exit code indicates failure: {0}")]
    NonZeroExitStatus(i32),
}

pub fn ssh_command_ip_with_auth(
    command: &str,
    auth: &PasswordAuth,
    ip: &str,
    retries: u8,
    timeout: u8,
) -> Result<String, SshCommandError> {
    let mut s = String::new();

    let mut counter = 0;
    loop {
        let mut closure = || -> Result<(), SshCommandError> {
            let session = SshSession::connect(ip, auth, Duration::from_secs(timeout.into()))?;
            let (status, output) = session.exec(command)?;
            s = output;
            session.disconnect();

            if status != 0 {
                Err(SshCommandError::NonZeroExitStatus(status))
            } else {
                Ok(())
            }
        };

        match closure() {
            Ok(_) => break,
            Err(e) => {
                counter += 1;
                if counter >= retries {
                    eprintln!(
                        "\n\n==== Start ssh command output (FAILED) ====\n\n\
                         command=\"{command}\"\n\
                         auth=\"{auth:#?}\"\n\
                         ip=\"{ip}\"\n\
                         output=\"{s}\"\n\
                         error=\"{e:?}\"\n\
                         \n==== End ssh command outout ====\n\n"
                    );

                    return Err(e);
                }
            }
        };
        thread::sleep(Duration::new((timeout * counter).into(), 0));
    }
    Ok(s)
}

pub fn ssh_command_ip(
    command: &str,
    ip: &str,
    retries: u8,
    timeout: u8,
) -> Result<String, SshCommandError> {
    ssh_command_ip_with_auth(command, &PasswordAuth::default(), ip, retries, timeout)
}

pub fn exec_host_command_with_retries(command: &str, retries: u32, interval: Duration) -> bool {
    for _ in 0..retries {
        let s = exec_host_command_output(command).status;
        if !s.success() {
            eprintln!("\n\n==== retrying in {interval:?} ===\n\n");
            thread::sleep(interval);
        } else {
            return true;
        }
    }

    false
}

pub fn exec_host_command_status(command: &str) -> ExitStatus {
    exec_host_command_output(command).status
}

pub fn exec_host_command_output(command: &str) -> Output {
    let output = std::process::Command::new("bash")
        .args(["-c", command])
        .output()
        .unwrap_or_else(|e| panic!("Expected '{command}' to run. Error: {e:?}"));

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        eprintln!(
            "\n\n==== Start 'exec_host_command' failed ==== \
            \n\n---stdout---\n{stdout}\n---stderr---{stderr} \
            \n\n==== End 'exec_host_command' failed ====",
        );
    }

    output
}

pub fn check_lines_count(input: &str, line_count: usize) -> bool {
    if input.lines().count() == line_count {
        true
    } else {
        eprintln!(
            "\n\n==== Start 'check_lines_count' failed ==== \
            \n\ninput = {input}\nline_count = {line_count} \
            \n\n==== End 'check_lines_count' failed ====",
        );

        false
    }
}

pub fn check_matched_lines_count(input: &str, keywords: Vec<&str>, line_count: usize) -> bool {
    let matches: Vec<&str> = input
        .lines()
        .filter(|line| keywords.iter().all(|k| line.contains(k)))
        .collect();

    if matches.len() == line_count {
        true
    } else {
        eprintln!(
            "\n\n==== Start 'check_matched_lines_count' failed ==== \
            \nkeywords = {keywords:?}, line_count = {line_count} \
            \n\ninput = {input} matches = {matches:?} \
            \n\n==== End 'check_matched_lines_count' failed ====",
        );

        false
    }
}

/// Timing of a [`wait_for`] poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitParams {
    pub timeout: Duration,
    /// Delay before the first check.
    pub first: Duration,
    pub step: Duration,
}

impl WaitParams {
    pub const fn new(timeout: Duration, first: Duration, step: Duration) -> Self {
        WaitParams {
            timeout,
            first,
            step,
        }
    }
}

/// Sleeps `first`, then calls `f` every `step` until it returns true or
/// `timeout` elapses. Returns whether `f` succeeded.
pub fn wait_for<F: FnMut() -> bool>(mut f: F, params: WaitParams) -> bool {
    thread::sleep(params.first);
    let start = Instant::now();
    while start.elapsed() < params.timeout {
        if f() {
            return true;
        }
        thread::sleep(params.step);
    }
    false
}
