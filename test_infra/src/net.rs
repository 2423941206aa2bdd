// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Guest network queries run through a [`GuestSession`].

use std::thread;
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;

use crate::{GuestSession, SessionError};

const CMD_TIMEOUT: Duration = Duration::from_secs(60);
const WMIC_TIMEOUT: Duration = Duration::from_secs(360);

#[derive(Error, Debug)]
pub enum NetError {
    #[error("guest session failed")]
    Session(#[from] SessionError),
    #[error("no guest interface with MAC address {0}")]
    InterfaceNotFound(String),
    #[error("no NIC with {key}={value:?} reporting {target}")]
    NicAttributeNotFound {
        key: String,
        value: String,
        target: String,
    },
    #[error("no path {0} in the guest")]
    PathNotFound(String),
}

/// How a Windows guest's NIC gets restarted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartMode {
    Netsh,
    Devcon,
}

/// Interface name owning `mac` in `ip -o link` output.
pub fn parse_linux_ifname(ip_link: &str, mac: &str) -> Option<String> {
    ip_link.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        words.find(|w| *w == "link/ether")?;
        if !words.next()?.eq_ignore_ascii_case(mac) {
            return None;
        }
        let name = line.split(':').nth(1)?.trim();
        Some(name.split('@').next().unwrap_or(name).to_owned())
    })
}

pub fn get_linux_ifname(session: &mut dyn GuestSession, mac: &str) -> Result<String, NetError> {
    let output = session.cmd_output("ip -o link show", CMD_TIMEOUT)?;
    let ifname = parse_linux_ifname(&output, mac)
        .ok_or_else(|| NetError::InterfaceNotFound(mac.to_owned()))?;
    debug!("Interface with MAC {mac} is {ifname}");
    Ok(ifname)
}

// wmic prints a header line naming the column, then one value per match.
fn parse_wmic_value(output: &str, target: &str) -> Option<String> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    if !lines.next()?.eq_ignore_ascii_case(target) {
        return None;
    }
    lines.next().map(str::to_owned)
}

/// Looks up `target` of the NIC whose `key` equals `value`.
pub fn get_windows_nic_attribute(
    session: &mut dyn GuestSession,
    key: &str,
    value: &str,
    target: &str,
) -> Result<String, NetError> {
    let cmd = format!("wmic nic where {key}=\"{value}\" get {target}");
    let output = session.cmd_output(&cmd, WMIC_TIMEOUT)?;
    parse_wmic_value(&output, target).ok_or_else(|| NetError::NicAttributeNotFound {
        key: key.to_owned(),
        value: value.to_owned(),
        target: target.to_owned(),
    })
}

/// Disables then re-enables the NIC identified by `connection_id`.
pub fn restart_windows_guest_network(
    session: &mut dyn GuestSession,
    connection_id: &str,
    mode: RestartMode,
    spent_time: Duration,
) -> Result<(), NetError> {
    info!("Restarting guest network {connection_id} using {mode:?}");
    match mode {
        RestartMode::Netsh => {
            session.cmd(
                &format!("netsh interface set interface name=\"{connection_id}\" admin=DISABLED"),
                CMD_TIMEOUT,
            )?;
            thread::sleep(spent_time);
            session.cmd(
                &format!("netsh interface set interface name=\"{connection_id}\" admin=ENABLED"),
                CMD_TIMEOUT,
            )?;
        }
        RestartMode::Devcon => {
            session.cmd(
                &format!("c:\\devcon.exe restart =net \"@PCI\\*\\{connection_id}\""),
                CMD_TIMEOUT,
            )?;
        }
    }
    Ok(())
}

fn parse_drive_letter(output: &str) -> Option<String> {
    let bytes = output.as_bytes();
    bytes.windows(2).find_map(|w| {
        (w[1] == b':' && (w[0].is_ascii_alphanumeric() || w[0] == b'_'))
            .then(|| format!("{}:", w[0] as char))
    })
}

/// Drive letter, such as `D:`, holding `path` in a Windows guest.
pub fn get_drive_letter(session: &mut dyn GuestSession, path: &str) -> Result<String, NetError> {
    let cmd = format!("wmic datafile where \"path='{path}'\" get drive");
    let output = session.cmd_output(&cmd, WMIC_TIMEOUT)?;
    parse_drive_letter(output.trim()).ok_or_else(|| NetError::PathNotFound(path.to_owned()))
}
