/*!
 * Target access point description
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 802.11 hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);

    pub fn octets(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 6]
    }

    /// Twelve hex digits without separators (used for session file names)
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02X}", b)).collect()
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 6] = bytes.try_into().ok()?;
        Some(MacAddr(arr))
    }
}

/// Invalid MAC address text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address '{0}'")]
pub struct MacParseError(pub String);

impl FromStr for MacAddr {
    type Err = MacParseError;

    /// Parse `XX:XX:XX:XX:XX:XX` (also accepts `-` as separator)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: Vec<u8> = s
            .trim()
            .split([':', '-'])
            .map(|part| {
                if part.len() == 2 {
                    u8::from_str_radix(part, 16).ok()
                } else {
                    None
                }
            })
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| MacParseError(s.to_string()))?;

        MacAddr::from_slice(&bytes).ok_or_else(|| MacParseError(s.to_string()))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Everything known about the target AP.
///
/// Identity fields are fixed once discovered; `locked` follows what the AP
/// reports (beacon WPS IE or a setup-locked configuration error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointInfo {
    pub bssid: MacAddr,
    pub essid: Option<String>,
    pub channel: Option<u8>,
    pub locked: bool,
}

impl AccessPointInfo {
    pub fn new(bssid: MacAddr) -> Self {
        Self {
            bssid,
            essid: None,
            channel: None,
            locked: false,
        }
    }

    pub fn with_essid(mut self, essid: impl Into<String>) -> Self {
        self.essid = Some(essid.into());
        self
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }
}

impl fmt::Display for AccessPointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.essid, self.channel) {
            (Some(essid), Some(ch)) => write!(f, "{} ({}, Ch {})", essid, self.bssid, ch),
            (Some(essid), None) => write!(f, "{} ({})", essid, self.bssid),
            (None, Some(ch)) => write!(f, "{} (Ch {})", self.bssid, ch),
            (None, None) => write!(f, "{}", self.bssid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac() {
        let mac: MacAddr = "00:90:4C:C1:AC:21".parse().unwrap();
        assert_eq!(mac.0, [0x00, 0x90, 0x4C, 0xC1, 0xAC, 0x21]);
        assert_eq!(mac.to_string(), "00:90:4C:C1:AC:21");
        assert_eq!(mac.to_hex(), "00904CC1AC21");

        let dashed: MacAddr = "00-90-4c-c1-ac-21".parse().unwrap();
        assert_eq!(dashed, mac);
    }

    #[test]
    fn test_parse_mac_rejects_garbage() {
        assert!("00:90:4C:C1:AC".parse::<MacAddr>().is_err());
        assert!("00:90:4C:C1:AC:21:33".parse::<MacAddr>().is_err());
        assert!("zz:90:4C:C1:AC:21".parse::<MacAddr>().is_err());
        assert!("0:90:4C:C1:AC:21".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_ap_display() {
        let ap = AccessPointInfo::new("00:90:4C:C1:AC:21".parse().unwrap())
            .with_essid("TestNet")
            .with_channel(6);
        assert_eq!(ap.to_string(), "TestNet (00:90:4C:C1:AC:21, Ch 6)");
        assert!(!ap.locked);
    }
}
