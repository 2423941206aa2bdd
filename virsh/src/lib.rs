// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Binding to the `virsh` management tool. This is the only place that
//! talks to libvirt; everything else goes through the [`Virsh`] trait.

mod command;

use std::path::Path;
use std::str::FromStr;
use std::string::FromUtf8Error;
use std::time::{Duration, Instant};
use std::{fmt, io, thread};

use bitflags::bitflags;
use log::{info, warn};
use thiserror::Error;

pub use command::{VirshCommand, VirshConfig, DEFAULT_VIRSH_BINARY, DEFAULT_VIRSH_TIMEOUT};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to spawn {0}")]
    Spawn(String, #[source] io::Error),
    #[error("failed waiting for virsh {0}")]
    Wait(String, #[source] io::Error),
    #[error("virsh {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("virsh {command} failed (exit status {status:?}): {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("virsh {command} output is not valid UTF-8")]
    Utf8 {
        command: String,
        #[source]
        source: FromUtf8Error,
    },
    #[error("virsh {command} returned unusable output: {output:?}")]
    UnexpectedOutput { command: String, output: String },
    #[error("domain {0} is still active after shutdown and destroy")]
    StillActive(String),
}

pub type Result<T> = std::result::Result<T, Error>;

bitflags! {
    /// Options understood by `virsh dumpxml`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DumpXmlFlags: u32 {
        const INACTIVE = 1 << 0;
        const SECURITY_INFO = 1 << 1;
        const UPDATE_CPU = 1 << 2;
        const MIGRATABLE = 1 << 3;
    }
}

impl DumpXmlFlags {
    pub fn options(self) -> Vec<&'static str> {
        let mut options = Vec::new();
        if self.contains(DumpXmlFlags::INACTIVE) {
            options.push("--inactive");
        }
        if self.contains(DumpXmlFlags::SECURITY_INFO) {
            options.push("--security-info");
        }
        if self.contains(DumpXmlFlags::UPDATE_CPU) {
            options.push("--update-cpu");
        }
        if self.contains(DumpXmlFlags::MIGRATABLE) {
            options.push("--migratable");
        }
        options
    }
}

/// Domain state as printed by `virsh domstate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainState {
    NoState,
    Running,
    Idle,
    Paused,
    InShutdown,
    ShutOff,
    Crashed,
    PmSuspended,
}

impl FromStr for DomainState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "no state" => Ok(DomainState::NoState),
            "running" => Ok(DomainState::Running),
            "idle" | "blocked" => Ok(DomainState::Idle),
            "paused" => Ok(DomainState::Paused),
            "in shutdown" => Ok(DomainState::InShutdown),
            "shut off" => Ok(DomainState::ShutOff),
            "crashed" => Ok(DomainState::Crashed),
            "pmsuspended" => Ok(DomainState::PmSuspended),
            _ => Err(Error::UnexpectedOutput {
                command: "domstate".to_owned(),
                output: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DomainState::*;
        match self {
            NoState => write!(f, "no state"),
            Running => write!(f, "running"),
            Idle => write!(f, "idle"),
            Paused => write!(f, "paused"),
            InShutdown => write!(f, "in shutdown"),
            ShutOff => write!(f, "shut off"),
            Crashed => write!(f, "crashed"),
            PmSuspended => write!(f, "pmsuspended"),
        }
    }
}

impl DomainState {
    /// Whether the domain holds a running instance. Only a shut off or
    /// crashed domain is quiescent.
    pub fn is_active(&self) -> bool {
        !matches!(self, DomainState::ShutOff | DomainState::Crashed)
    }
}

/// Persist, retrieve and remove domain definitions.
pub trait Virsh {
    fn dumpxml(&self, name: &str, flags: DumpXmlFlags) -> Result<String>;

    /// Defines (or redefines) a domain from the XML stored at `xml_file`.
    fn define(&self, xml_file: &Path) -> Result<()>;

    fn undefine(&self, name: &str) -> Result<()>;

    fn domstate(&self, name: &str) -> Result<DomainState>;

    fn shutdown(&self, name: &str) -> Result<()>;

    fn destroy(&self, name: &str, graceful: bool) -> Result<()>;

    fn is_active(&self, name: &str) -> Result<bool> {
        Ok(self.domstate(name)?.is_active())
    }

    /// Brings `name` to a quiescent state: asks the guest to shut down,
    /// waits up to `timeout`, then falls back to a graceful destroy.
    fn deactivate(&self, name: &str, timeout: Duration) -> Result<()> {
        if !self.is_active(name)? {
            return Ok(());
        }

        info!("Shutting down domain {name}");
        if let Err(e) = self.shutdown(name) {
            warn!("Shutdown request for {name} failed: {e}");
        }

        let start = Instant::now();
        while start.elapsed() < timeout {
            if !self.is_active(name)? {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL.min(timeout));
        }

        warn!("Domain {name} still active after {timeout:?}, destroying it");
        self.destroy(name, true)?;
        if self.is_active(name)? {
            return Err(Error::StillActive(name.to_owned()));
        }

        Ok(())
    }
}
