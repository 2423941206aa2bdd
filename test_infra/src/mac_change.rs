// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Change the MAC address of a guest NIC from inside the guest.
//!
//! 1) Get a new MAC address and the old one of NIC 0.
//! 2) Set the new address in the guest and renew its IP.
//! 3) Log into the guest again through the new address.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use crate::net::{self, NetError, RestartMode};
use crate::{wait_for, GuestSession, SessionError, WaitParams};

pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(360);
const CMD_TIMEOUT: Duration = Duration::from_secs(60);
const DEVCON_PATH: &str = r"\\devcon\\wxp_x86\\";

/// Outcome of a failed test procedure. `Fail` means the guest misbehaved;
/// everything else means the test could not run properly.
#[derive(Error, Debug)]
pub enum TestError {
    #[error("test failed: {0}")]
    Fail(String),
    #[error("test error: {0}")]
    Error(String),
    #[error("guest session failed")]
    Session(#[from] SessionError),
    #[error("guest network query failed")]
    Net(#[from] NetError),
}

impl TestError {
    pub fn is_failure(&self) -> bool {
        matches!(self, TestError::Fail(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsType {
    Linux,
    Windows,
}

impl FromStr for OsType {
    type Err = TestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(OsType::Linux),
            "windows" => Ok(OsType::Windows),
            _ => Err(TestError::Error(format!("unsupported os_type {s:?}"))),
        }
    }
}

/// The guest under test, as seen by the MAC change procedure.
pub trait GuestVm {
    fn verify_alive(&mut self) -> Result<(), TestError>;

    fn wait_for_serial_login(
        &mut self,
        timeout: Duration,
    ) -> Result<Box<dyn GuestSession>, TestError>;

    fn wait_for_login(&mut self, timeout: Duration) -> Result<Box<dyn GuestSession>, TestError>;

    fn get_mac_address(&self, nic_index: usize) -> String;

    /// Returns the address of NIC `nic_index` to the pool.
    fn free_mac_address(&mut self, nic_index: usize);

    /// Assigns a fresh address from the pool to NIC `nic_index`.
    fn generate_mac_address(&mut self, nic_index: usize) -> String;

    fn set_mac_address(&mut self, nic_index: usize, mac: &str);
}

#[derive(Clone, Debug)]
pub struct MacChangeParams {
    pub os_type: OsType,
    pub os_variant: Option<String>,
    /// `{ifname}` and `{mac}` on Linux, `{index}` and `{mac}` with colons
    /// dropped on Windows.
    pub change_cmd: String,
    /// Windows only, `{index}` is the NIC index.
    pub clean_cmd: Option<String>,
    pub login_timeout: Duration,
    /// Poll on the old session after the change.
    pub settle: WaitParams,
    /// Pause between disabling and enabling a Windows NIC.
    pub net_restart_delay: Duration,
}

impl MacChangeParams {
    pub fn new(os_type: OsType, change_cmd: &str) -> Self {
        MacChangeParams {
            os_type,
            os_variant: None,
            change_cmd: change_cmd.to_owned(),
            clean_cmd: None,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            settle: WaitParams::new(
                Duration::from_secs(120),
                Duration::from_secs(20),
                Duration::from_secs(3),
            ),
            net_restart_delay: Duration::from_secs(5),
        }
    }

    /// Reads `os_type`, `os_variant`, `change_cmd`, `clean_cmd` and
    /// `login_timeout` (seconds) from test parameters.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, TestError> {
        let required = |key: &str| {
            params
                .get(key)
                .ok_or_else(|| TestError::Error(format!("missing test parameter {key}")))
        };
        let os_type = required("os_type")?.parse()?;
        let mut mac_params = MacChangeParams::new(os_type, required("change_cmd")?);
        mac_params.os_variant = params.get("os_variant").cloned();
        mac_params.clean_cmd = params.get("clean_cmd").cloned();
        if let Some(timeout) = params.get("login_timeout") {
            let secs = timeout
                .parse()
                .map_err(|_| TestError::Error(format!("invalid login_timeout {timeout:?}")))?;
            mac_params.login_timeout = Duration::from_secs(secs);
        }
        if mac_params.os_type == OsType::Windows && mac_params.clean_cmd.is_none() {
            return Err(TestError::Error("missing test parameter clean_cmd".to_owned()));
        }
        Ok(mac_params)
    }
}

fn fill(pattern: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(pattern.to_owned(), |cmd, (key, value)| {
        cmd.replace(&format!("{{{key}}}"), value)
    })
}

struct WindowsNic {
    index: u32,
    // Connection name or, with devcon, the device instance suffix
    restart_id: String,
    mode: RestartMode,
}

enum GuestNic {
    Linux { ifname: String },
    Windows(WindowsNic),
}

fn windows_nic(
    session: &mut dyn GuestSession,
    mac: &str,
    params: &MacChangeParams,
) -> Result<WindowsNic, TestError> {
    let connection_id =
        net::get_windows_nic_attribute(session, "macaddress", mac, "netconnectionid")?;
    let index =
        net::get_windows_nic_attribute(session, "netconnectionid", &connection_id, "index")?;
    let index = index
        .parse()
        .map_err(|_| TestError::Error(format!("invalid NIC index {index:?}")))?;

    if params.os_variant.as_deref() != Some("winxp") {
        return Ok(WindowsNic {
            index,
            restart_id: connection_id,
            mode: RestartMode::Netsh,
        });
    }

    let pnp_device_id =
        net::get_windows_nic_attribute(session, "netconnectionid", &connection_id, "pnpdeviceid")?;
    let drive = net::get_drive_letter(session, DEVCON_PATH)?;
    session.cmd(
        &format!(r"xcopy {drive}\devcon\wxp_x86\devcon.exe c:\ "),
        CMD_TIMEOUT,
    )?;
    let restart_id = pnp_device_id
        .rsplit('&')
        .next()
        .unwrap_or(&pnp_device_id)
        .to_owned();
    Ok(WindowsNic {
        index,
        restart_id,
        mode: RestartMode::Devcon,
    })
}

fn change_mac(
    vm: &mut dyn GuestVm,
    serial: &mut dyn GuestSession,
    session: &mut Box<dyn GuestSession>,
    nic: &GuestNic,
    new_mac: &str,
    params: &MacChangeParams,
) -> Result<(), TestError> {
    let change_cmd = match nic {
        GuestNic::Linux { ifname } => {
            fill(&params.change_cmd, &[("ifname", ifname), ("mac", new_mac)])
        }
        GuestNic::Windows(win) => fill(
            &params.change_cmd,
            &[
                ("index", &win.index.to_string()),
                ("mac", &new_mac.replace(':', "")),
            ],
        ),
    };
    serial.cmd(&change_cmd, CMD_TIMEOUT)?;

    info!("Verify the new mac address, and restart the network");
    match nic {
        GuestNic::Linux { ifname } => {
            serial.cmd(&format!("ifconfig | grep -i {new_mac}"), CMD_TIMEOUT)?;
            info!("Mac address change successfully, net restart...");
            serial.sendline(&format!("dhclient -r && dhclient {ifname}"))?;
        }
        GuestNic::Windows(win) => {
            net::restart_windows_guest_network(
                serial,
                &win.restart_id,
                win.mode,
                params.net_restart_delay,
            )?;
            let output = serial.cmd("ipconfig /all", CMD_TIMEOUT)?;
            let dashed = new_mac.replace(':', "-").to_ascii_lowercase();
            if !output.to_ascii_lowercase().contains(&dashed) {
                return Err(TestError::Fail("Guest mac change failed".to_owned()));
            }
            info!("Guest mac have been modified successfully");
        }
    }

    // The IP rarely stays the same, so a live session is only suspicious
    if wait_for(|| session.is_responsive(), params.settle) {
        warn!("The session is still responsive, settings may fail.");
    }
    session.close();

    info!("Re-log into the guest");
    *session = vm.wait_for_login(params.login_timeout)?;
    if !session.is_responsive() {
        return Err(TestError::Fail(
            "The new session is not responsive.".to_owned(),
        ));
    }
    Ok(())
}

fn restore_windows_nic(
    serial: &mut dyn GuestSession,
    win: &WindowsNic,
    params: &MacChangeParams,
) -> Result<(), TestError> {
    if let Some(clean_cmd) = &params.clean_cmd {
        serial.cmd(
            &fill(clean_cmd, &[("index", &win.index.to_string())]),
            CMD_TIMEOUT,
        )?;
    }
    net::restart_windows_guest_network(
        serial,
        &win.restart_id,
        win.mode,
        params.net_restart_delay,
    )?;
    Ok(())
}

pub fn run_mac_change(vm: &mut dyn GuestVm, params: &MacChangeParams) -> Result<(), TestError> {
    vm.verify_alive()?;
    let mut serial = vm.wait_for_serial_login(params.login_timeout)?;
    // Used to assess whether the IP change worked
    let mut session = vm.wait_for_login(params.login_timeout)?;

    let old_mac = vm.get_mac_address(0);
    let new_mac = loop {
        vm.free_mac_address(0);
        let mac = vm.generate_mac_address(0);
        if mac != old_mac {
            break mac;
        }
    };
    info!("The initial MAC address is {old_mac}");

    let nic = match params.os_type {
        OsType::Linux => GuestNic::Linux {
            ifname: net::get_linux_ifname(serial.as_mut(), &old_mac)?,
        },
        OsType::Windows => GuestNic::Windows(windows_nic(session.as_mut(), &old_mac, params)?),
    };

    info!("Changing MAC address to {new_mac}");
    let mut result = change_mac(vm, serial.as_mut(), &mut session, &nic, &new_mac, params);

    if let GuestNic::Windows(win) = &nic {
        let cleanup = restore_windows_nic(serial.as_mut(), win, params);
        vm.set_mac_address(0, &old_mac);
        if let Err(e) = cleanup {
            match result {
                Ok(()) => result = Err(e),
                Err(_) => warn!("Cleanup after a failed MAC change failed: {e}"),
            }
        }
    }
    session.close();

    result
}
