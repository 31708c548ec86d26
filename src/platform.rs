/*!
 * Platform helpers for the wireless interface
 *
 * - Local MAC discovery
 * - Channel tuning (the capture library cannot change channels itself)
 * - Privilege check
 */

use std::process::Command;

use crate::error::{RunFailure, TransportError};
use crate::target::MacAddr;

/// Check if the process runs with root privileges
#[cfg(unix)]
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

/// Hardware address of `interface`
#[cfg(target_os = "linux")]
pub fn interface_mac(interface: &str) -> Result<MacAddr, RunFailure> {
    let path = format!("/sys/class/net/{}/address", interface);
    let text = std::fs::read_to_string(&path).map_err(|e| {
        tracing::debug!(path = %path, error = %e, "Cannot read interface address");
        RunFailure::NoLocalMac
    })?;
    let mac: MacAddr = text.trim().parse().map_err(|_| RunFailure::NoLocalMac)?;
    if mac.is_zero() {
        return Err(RunFailure::NoLocalMac);
    }
    Ok(mac)
}

#[cfg(target_os = "macos")]
pub fn interface_mac(interface: &str) -> Result<MacAddr, RunFailure> {
    let output = Command::new("ifconfig")
        .arg(interface)
        .output()
        .map_err(|_| RunFailure::NoLocalMac)?;
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("ether "))
        .find_map(|rest| rest.split_whitespace().next()?.parse().ok())
        .ok_or(RunFailure::NoLocalMac)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn interface_mac(_interface: &str) -> Result<MacAddr, RunFailure> {
    Err(RunFailure::NoLocalMac)
}

/// Tune `interface` to `channel`
pub fn set_channel(interface: &str, channel: u8) -> Result<(), TransportError> {
    #[cfg(target_os = "macos")]
    let output = Command::new(
        "/System/Library/PrivateFrameworks/Apple80211.framework/Versions/Current/Resources/airport",
    )
    .arg(format!("--channel={}", channel))
    .output();

    #[cfg(not(target_os = "macos"))]
    let output = Command::new("iw")
        .args(["dev", interface, "set", "channel", &channel.to_string()])
        .output();

    let output = output.map_err(|e| TransportError::Channel {
        channel,
        reason: e.to_string(),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such device") {
            return Err(TransportError::InterfaceGone(interface.to_string()));
        }
        return Err(TransportError::Channel {
            channel,
            reason: stderr.trim().to_string(),
        });
    }
    Ok(())
}
