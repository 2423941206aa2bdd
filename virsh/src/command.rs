// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use log::debug;
use wait_timeout::ChildExt;

use crate::{DomainState, DumpXmlFlags, Error, Result, Virsh};

pub const DEFAULT_VIRSH_BINARY: &str = "virsh";
pub const DEFAULT_VIRSH_TIMEOUT: u64 = 60;

/// How to reach the management tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirshConfig {
    pub binary: PathBuf,
    /// Passed as `-c <uri>`; `virsh` picks its own default when unset.
    pub uri: Option<String>,
    pub timeout: Duration,
}

impl Default for VirshConfig {
    fn default() -> Self {
        VirshConfig {
            binary: PathBuf::from(DEFAULT_VIRSH_BINARY),
            uri: None,
            timeout: Duration::from_secs(DEFAULT_VIRSH_TIMEOUT),
        }
    }
}

/// [`Virsh`] implementation spawning the `virsh` binary for every call.
#[derive(Clone, Debug, Default)]
pub struct VirshCommand {
    config: VirshConfig,
}

fn read_pipe<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

impl VirshCommand {
    pub fn new(config: VirshConfig) -> Self {
        VirshCommand { config }
    }

    pub fn config(&self) -> &VirshConfig {
        &self.config
    }

    fn run<S: AsRef<OsStr>>(&self, subcommand: &str, args: &[S]) -> Result<String> {
        let mut cmd = Command::new(&self.config.binary);
        if let Some(uri) = &self.config.uri {
            cmd.args(["-c", uri.as_str()]);
        }
        cmd.arg(subcommand)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running {cmd:?}");
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(self.config.binary.display().to_string(), e))?;

        // Drain both pipes while waiting so a large dump cannot block the
        // child on a full pipe.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = thread::spawn(move || read_pipe(stdout));
        let stderr_reader = thread::spawn(move || read_pipe(stderr));

        let status = match child
            .wait_timeout(self.config.timeout)
            .map_err(|e| Error::Wait(subcommand.to_owned(), e))?
        {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout {
                    command: subcommand.to_owned(),
                    timeout: self.config.timeout,
                });
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_owned();
            debug!("virsh {subcommand} failed: {stderr}");
            return Err(Error::CommandFailed {
                command: subcommand.to_owned(),
                status: status.code(),
                stderr,
            });
        }

        String::from_utf8(stdout).map_err(|source| Error::Utf8 {
            command: subcommand.to_owned(),
            source,
        })
    }
}

impl Virsh for VirshCommand {
    fn dumpxml(&self, name: &str, flags: DumpXmlFlags) -> Result<String> {
        let mut args = flags.options();
        args.push(name);
        let output = self.run("dumpxml", &args)?;
        if !output.trim_start().starts_with('<') {
            return Err(Error::UnexpectedOutput {
                command: "dumpxml".to_owned(),
                output,
            });
        }
        Ok(output)
    }

    fn define(&self, xml_file: &Path) -> Result<()> {
        self.run("define", &[xml_file]).map(|_| ())
    }

    fn undefine(&self, name: &str) -> Result<()> {
        self.run("undefine", &[name]).map(|_| ())
    }

    fn domstate(&self, name: &str) -> Result<DomainState> {
        let output = self.run("domstate", &[name])?;
        match output.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(line) => line.parse(),
            None => Err(Error::UnexpectedOutput {
                command: "domstate".to_owned(),
                output,
            }),
        }
    }

    fn shutdown(&self, name: &str) -> Result<()> {
        self.run("shutdown", &[name]).map(|_| ())
    }

    fn destroy(&self, name: &str, graceful: bool) -> Result<()> {
        if graceful {
            self.run("destroy", &["--graceful", name]).map(|_| ())
        } else {
            self.run("destroy", &[name]).map(|_| ())
        }
    }
}
