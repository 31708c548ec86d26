/*!
 * Resume files
 *
 * A run can be interrupted and continued later. The file stores the PIN
 * space cursor and counters for one BSSID as JSON.
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::{CrackStatus, KeyStatus};
use crate::pin::{PinSpace, ResumePoint};
use crate::scheduler::RetryState;
use crate::target::MacAddr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    pub bssid: MacAddr,
    #[serde(default)]
    pub essid: Option<String>,
    pub resume: ResumePoint,
    pub attempts: u64,
    pub pins_rejected: u64,
    pub status: KeyStatus,
    /// Recovered PIN once the run is done
    #[serde(default)]
    pub pin: Option<String>,
    /// Unix seconds
    pub saved_at: u64,
}

impl SessionFile {
    pub fn from_status(bssid: MacAddr, essid: Option<String>, status: &CrackStatus) -> Self {
        let recovered = status.keys.as_ref();
        Self {
            bssid,
            essid: recovered.map(|k| k.essid.clone()).or(essid),
            pin: recovered.map(|k| k.pin.clone()),
            resume: status.resume,
            attempts: status.attempts,
            pins_rejected: status.pins_rejected,
            status: status.key_status,
            saved_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    /// `<dir>/<bssid as 12 hex digits>.json`
    pub fn default_path(dir: &Path, bssid: &MacAddr) -> PathBuf {
        dir.join(format!("{}.json", bssid.to_hex()))
    }

    /// Read a session for `bssid`; a file saved for another AP is refused
    pub fn load(path: &Path, bssid: &MacAddr) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        let session: SessionFile = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse session file {}", path.display()))?;
        if session.bssid != *bssid {
            return Err(anyhow!(
                "Session file {} belongs to {}, not {}",
                path.display(),
                session.bssid,
                bssid
            ));
        }
        Ok(session)
    }

    /// Read a session without checking which AP it belongs to
    pub fn inspect(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Failed to parse session file {}", path.display()))
    }

    /// Write through a temporary file so an interrupted save keeps the old copy
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize session")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// The key was already recovered; resuming would only attack the AP again
    pub fn is_complete(&self) -> bool {
        self.status == KeyStatus::Done && self.pin.is_some()
    }

    pub fn pin_space(&self) -> PinSpace {
        PinSpace::resume(self.resume)
    }

    pub fn retry_state(&self) -> RetryState {
        RetryState {
            attempts: self.attempts,
            pins_rejected: self.pins_rejected,
            ..RetryState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Keys;
    use crate::pin::PinMode;
    use std::time::Duration;

    fn bssid() -> MacAddr {
        "00:90:4C:C1:AC:21".parse().unwrap()
    }

    fn sample() -> SessionFile {
        SessionFile {
            bssid: bssid(),
            essid: Some("TestNet".to_string()),
            resume: ResumePoint {
                mode: PinMode::Split,
                first_half: 1234,
                first_half_confirmed: true,
                second_half: 17,
            },
            attempts: 1252,
            pins_rejected: 1251,
            status: KeyStatus::Working,
            pin: None,
            saved_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = SessionFile::default_path(&dir.path().join("sessions"), &bssid());
        assert!(path.ends_with("00904CC1AC21.json"));

        let session = sample();
        session.save(&path).unwrap();
        let loaded = SessionFile::load(&path, &bssid()).unwrap();
        assert_eq!(loaded, session);
        assert!(!path.with_extension("json.tmp").exists());

        let next = loaded.pin_space().current().unwrap();
        assert_eq!((next.first_half(), next.second_half()), (1234, 17));
        assert_eq!(loaded.retry_state().attempts, 1252);
    }

    #[test]
    fn test_done_session_keeps_result() {
        let status = CrackStatus {
            key_status: KeyStatus::Done,
            pin: Some("12345670".to_string()),
            keys: Some(Keys {
                pin: "12345670".to_string(),
                psk: "hunter2moresecret".to_string(),
                essid: "TestNet".to_string(),
            }),
            attempts: 1802,
            pins_rejected: 1801,
            elapsed: Duration::from_secs(5),
            progress: 16.4,
            resume: sample().resume,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.json");
        SessionFile::from_status(bssid(), None, &status).save(&path).unwrap();

        let loaded = SessionFile::load(&path, &bssid()).unwrap();
        assert!(loaded.is_complete());
        assert_eq!(loaded.pin.as_deref(), Some("12345670"));
        assert_eq!(loaded.essid.as_deref(), Some("TestNet"));
        assert!(!fs::read_to_string(&path).unwrap().contains("hunter2"));
        assert!(!sample().is_complete());
    }

    #[test]
    fn test_other_bssid_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        sample().save(&path).unwrap();
        let other: MacAddr = "02:00:00:00:00:01".parse().unwrap();
        let err = SessionFile::load(&path, &other).unwrap_err();
        assert!(err.to_string().contains("belongs to"));
        assert!(SessionFile::inspect(&path).is_ok());
    }

    #[test]
    fn test_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(SessionFile::load(&path, &bssid()).is_err());
        assert!(SessionFile::load(&dir.path().join("missing.json"), &bssid()).is_err());
    }
}
