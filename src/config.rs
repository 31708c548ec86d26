/*!
 * Attack configuration
 */

use std::time::Duration;

use crate::pin::{PinCandidate, PinMode};
use crate::target::MacAddr;

pub const DEFAULT_RX_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_M57_TIMEOUT: Duration = Duration::from_millis(200);
pub const MAX_M57_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_LOCK_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_FAIL_THRESHOLD: u32 = 10;
pub const DEFAULT_CANDIDATE_RETRIES: u32 = 3;

/// Frequency band scanned while hopping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Band {
    #[default]
    TwoGhz,
    FiveGhz,
}

impl Band {
    /// Channels in hopping order, most common first
    pub fn channels(self) -> &'static [u8] {
        match self {
            Band::TwoGhz => &[1, 6, 11, 2, 3, 4, 5, 7, 8, 9, 10, 12, 13, 14],
            Band::FiveGhz => &[
                36, 40, 44, 48, 149, 153, 157, 161, 165, 52, 56, 60, 64, 100, 104, 108, 112,
                116, 120, 124, 128, 132, 136, 140,
            ],
        }
    }
}

/// How the radio is tuned to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPlan {
    Fixed(u8),
    Hopping(Band),
}

impl Default for ChannelPlan {
    fn default() -> Self {
        ChannelPlan::Hopping(Band::TwoGhz)
    }
}

/// Extra pause every `every` attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurringDelay {
    pub every: u32,
    pub sleep: Duration,
}

#[derive(Debug, Clone)]
pub struct CrackConfig {
    pub bssid: MacAddr,
    pub local_mac: Option<MacAddr>,
    pub essid: Option<String>,
    pub channel: ChannelPlan,

    /// Wait for every reply except those following M5/M7
    pub rx_timeout: Duration,
    /// Wait for the reply to M5 and M7
    pub m57_timeout: Duration,
    /// Pause between attempts
    pub delay: Duration,
    /// Pause after the AP reports it is locked
    pub lock_delay: Duration,
    pub recurring_delay: Option<RecurringDelay>,
    /// Pause once `fail_threshold` consecutive unexpected failures are seen
    pub fail_wait: Duration,
    pub fail_threshold: u32,
    /// Attempts on one candidate before it is skipped
    pub candidate_retry_limit: u32,
    pub max_attempts: Option<u64>,
    pub max_lock_waits: Option<u32>,

    pub ignore_locks: bool,
    /// The AP answers every wrong half with a NACK
    pub nack_always: bool,
    /// Send an EAP-Failure after each attempt
    pub eap_terminate: bool,

    pub pin_mode: PinMode,
    pub start_pin: Option<PinCandidate>,

    /// Probe for the AP (ESSID, channel, lock state) before the first attempt
    pub discover: bool,
    /// Discovery rounds before giving up on finding the AP (`None`: until cancelled)
    pub discover_rounds: Option<u32>,
    /// Authenticate and associate before each attempt
    pub associate: bool,
}

impl CrackConfig {
    pub fn new(bssid: MacAddr) -> Self {
        Self {
            bssid,
            local_mac: None,
            essid: None,
            channel: ChannelPlan::default(),
            rx_timeout: DEFAULT_RX_TIMEOUT,
            m57_timeout: DEFAULT_M57_TIMEOUT,
            delay: DEFAULT_DELAY,
            lock_delay: DEFAULT_LOCK_DELAY,
            recurring_delay: None,
            fail_wait: Duration::ZERO,
            fail_threshold: DEFAULT_FAIL_THRESHOLD,
            candidate_retry_limit: DEFAULT_CANDIDATE_RETRIES,
            max_attempts: None,
            max_lock_waits: None,
            ignore_locks: false,
            nack_always: false,
            eap_terminate: false,
            pin_mode: PinMode::Split,
            start_pin: None,
            discover: true,
            discover_rounds: None,
            associate: true,
        }
    }

    /// Enforce bounds: zero timeouts fall back to defaults, the M5/M7
    /// timeout is capped, counters are at least one.
    pub fn normalized(mut self) -> Self {
        if self.rx_timeout.is_zero() {
            self.rx_timeout = DEFAULT_RX_TIMEOUT;
        }
        if self.m57_timeout.is_zero() {
            self.m57_timeout = DEFAULT_M57_TIMEOUT;
        }
        self.m57_timeout = self.m57_timeout.min(MAX_M57_TIMEOUT);
        self.fail_threshold = self.fail_threshold.max(1);
        self.candidate_retry_limit = self.candidate_retry_limit.max(1);
        if matches!(self.recurring_delay, Some(r) if r.every == 0) {
            self.recurring_delay = None;
        }
        if self.max_attempts == Some(0) {
            self.max_attempts = None;
        }
        self
    }
}

/// Seconds from the command line; non-positive, invalid or out of range values give `default`
pub fn seconds_or(value: f64, default: Duration) -> Duration {
    if value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(default)
    } else {
        default
    }
}

/// Parse `N:M` (every N attempts sleep M seconds)
pub fn parse_recurring_delay(text: &str) -> Option<RecurringDelay> {
    let (every, sleep) = text.split_once(':')?;
    let every: u32 = every.trim().parse().ok()?;
    let sleep: f64 = sleep.trim().parse().ok()?;
    if every == 0 {
        return None;
    }
    Some(RecurringDelay {
        every,
        sleep: Duration::try_from_secs_f64(sleep).ok()?,
    })
}
