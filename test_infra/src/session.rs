// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use log::debug;
use ssh2::Session;
use thiserror::Error;

use crate::{PasswordAuth, SshCommandError};

const RESPONSIVE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("ssh transport failed")]
    Ssh(#[from] SshCommandError),
    #[error("guest command {command:?} failed with status {status}: {output}")]
    CommandFailed {
        command: String,
        status: i32,
        output: String,
    },
    #[error("session is closed")]
    Closed,
}

/// A shell inside a running guest.
pub trait GuestSession {
    /// Runs `command` and returns its output, failing on a non-zero exit
    /// status.
    fn cmd(&mut self, command: &str, timeout: Duration) -> Result<String, SessionError>;

    /// Runs `command` and returns its output whatever the exit status.
    fn cmd_output(&mut self, command: &str, timeout: Duration) -> Result<String, SessionError>;

    /// Starts `line` without waiting for it to complete.
    fn sendline(&mut self, line: &str) -> Result<(), SessionError>;

    fn is_responsive(&mut self) -> bool;

    fn close(&mut self);
}

/// [`GuestSession`] over SSH, one channel per command.
pub struct SshSession {
    session: Session,
    closed: bool,
}

impl SshSession {
    pub fn connect(
        ip: &str,
        auth: &PasswordAuth,
        timeout: Duration,
    ) -> Result<Self, SshCommandError> {
        let addr: SocketAddr = format!("{ip}:22").parse().map_err(|_| {
            SshCommandError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid address {ip}"),
            ))
        })?;
        let tcp =
            TcpStream::connect_timeout(&addr, timeout).map_err(SshCommandError::Connection)?;
        let mut session = Session::new().map_err(SshCommandError::Session)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis().try_into().unwrap_or(u32::MAX));
        session.handshake().map_err(SshCommandError::Handshake)?;
        session
            .userauth_password(&auth.username, &auth.password)
            .map_err(SshCommandError::Authentication)?;
        debug!("Logged into {ip} as {}", auth.username);

        Ok(SshSession {
            session,
            closed: false,
        })
    }

    /// Runs `command` and returns its exit status and standard output.
    pub fn exec(&self, command: &str) -> Result<(i32, String), SshCommandError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(SshCommandError::ChannelSession)?;
        channel.exec(command).map_err(SshCommandError::Command)?;

        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(SshCommandError::Output)?;
        // Failing to close does not change the command outcome
        let _ = channel.close();
        let _ = channel.wait_close();

        let status = channel.exit_status().map_err(SshCommandError::ExitStatus)?;
        Ok((status, output))
    }

    pub fn disconnect(mut self) {
        self.close_session();
    }

    fn close_session(&mut self) {
        if !self.closed {
            let _ = self.session.disconnect(None, "closing", None);
            self.closed = true;
        }
    }

    fn run(&mut self, command: &str, timeout: Duration) -> Result<(i32, String), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.session.set_timeout(timeout.as_millis().try_into().unwrap_or(u32::MAX));
        debug!("Sending guest command {command:?}");
        Ok(self.exec(command)?)
    }
}

impl GuestSession for SshSession {
    fn cmd(&mut self, command: &str, timeout: Duration) -> Result<String, SessionError> {
        let (status, output) = self.run(command, timeout)?;
        if status != 0 {
            return Err(SessionError::CommandFailed {
                command: command.to_owned(),
                status,
                output,
            });
        }
        Ok(output)
    }

    fn cmd_output(&mut self, command: &str, timeout: Duration) -> Result<String, SessionError> {
        Ok(self.run(command, timeout)?.1)
    }

    fn sendline(&mut self, line: &str) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        let mut channel = self
            .session
            .channel_session()
            .map_err(SshCommandError::ChannelSession)?;
        channel.exec(line).map_err(SshCommandError::Command)?;
        debug!("Sent guest command {line:?}");
        Ok(())
    }

    fn is_responsive(&mut self) -> bool {
        matches!(self.run("true", RESPONSIVE_TIMEOUT), Ok((0, _)))
    }

    fn close(&mut self) {
        self.close_session();
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close_session();
    }
}
