//! Network attachment via a named interface.

use super::NetworkLink;
use crate::config::WifiConfig;
use log::{debug, info, warn};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use std::io;
use std::process::{Child, Command, Stdio};

/// Attached means the interface is up and holds an IPv4 address.
///
/// Association itself is left to NetworkManager; `force_reconnect` asks
/// `nmcli` to join the configured network again. At most one `nmcli` runs
/// at a time; a finished one is reaped before the next is started.
pub struct InterfaceLink {
    interface: String,
    ssid: String,
    passphrase: String,
    /// Program and leading arguments used in place of `nmcli`.
    program: Vec<String>,
    reconnect: Option<Child>,
}

impl InterfaceLink {
    pub fn new(config: &WifiConfig) -> Self {
        Self {
            interface: config.interface.clone(),
            ssid: config.ssid.clone(),
            passphrase: config.passphrase.clone(),
            program: vec!["nmcli".to_string()],
            reconnect: None,
        }
    }

    /// Reap a finished reconnect. Returns `true` while one is still running.
    fn reconnect_running(&mut self) -> bool {
        let Some(child) = self.reconnect.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("[Net] nmcli exited: {}", status);
                self.reconnect = None;
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("[Net] Could not query nmcli: {}", e);
                self.reconnect = None;
                false
            }
        }
    }

    fn reconnect_command(&self) -> Command {
        let mut cmd = Command::new(&self.program[0]);
        cmd.args(&self.program[1..]);
        if self.ssid.is_empty() {
            cmd.args(["device", "connect", &self.interface]);
        } else {
            cmd.args(["device", "wifi", "connect", &self.ssid]);
            if !self.passphrase.is_empty() {
                cmd.args(["password", &self.passphrase]);
            }
            cmd.args(["ifname", &self.interface]);
        }
        cmd
    }
}

impl NetworkLink for InterfaceLink {
    fn is_attached(&self) -> bool {
        let Ok(addrs) = getifaddrs() else {
            return false;
        };

        addrs
            .filter(|ifaddr| ifaddr.interface_name == self.interface)
            .filter(|ifaddr| {
                ifaddr.flags.contains(InterfaceFlags::IFF_UP)
                    && ifaddr.flags.contains(InterfaceFlags::IFF_RUNNING)
            })
            .any(|ifaddr| {
                ifaddr
                    .address
                    .as_ref()
                    .and_then(|addr| addr.as_sockaddr_in())
                    .is_some()
            })
    }

    fn force_reconnect(&mut self) -> io::Result<()> {
        if self.reconnect_running() {
            debug!("[Net] Reconnect of {} still in progress", self.interface);
            return Ok(());
        }

        if self.ssid.is_empty() {
            info!("[Net] Reconnecting {}", self.interface);
        } else {
            info!("[Net] Reconnecting {} to '{}'", self.interface, self.ssid);
        }

        // Not waited on; attachment is observed through `is_attached`.
        match self
            .reconnect_command()
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                self.reconnect = Some(child);
                Ok(())
            }
            Err(e) => {
                warn!("[Net] Could not run nmcli: {}", e);
                Err(e)
            }
        }
    }
}

impl Drop for InterfaceLink {
    fn drop(&mut self) {
        self.reconnect_running();
    }
}
