/*!
 * WPS PIN space enumeration
 *
 * A WPS PIN is 8 digits: 7 free digits plus a checksum digit. The
 * registration protocol proves each half separately:
 * - first half: digits 1-4 (10,000 values)
 * - second half: digits 5-7 plus the checksum (1,000 values)
 *
 * Split mode walks first halves until one is confirmed, then walks second
 * halves for that fixed first half: at most 11,000 attempts. Full mode walks
 * all 10^7 checksummed PINs for APs that only judge the whole PIN.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

pub const FIRST_HALF_COUNT: u16 = 10_000;
pub const SECOND_HALF_COUNT: u16 = 1_000;
const FULL_PIN_COUNT: u32 = 10_000_000;

/// Which half of the PIN a proof refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Half {
    First,
    Second,
}

impl fmt::Display for Half {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Half::First => f.write_str("first half"),
            Half::Second => f.write_str("second half"),
        }
    }
}

/// Enumeration strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinMode {
    #[default]
    Split,
    Full,
}

/// WPS checksum digit of a 7-digit PIN prefix (weights 3,1,3,1,... from the right)
pub fn checksum(seven_digits: u32) -> u8 {
    let mut pin = seven_digits;
    let mut accum = 0u32;
    while pin > 0 {
        accum += 3 * (pin % 10);
        pin /= 10;
        accum += pin % 10;
        pin /= 10;
    }
    ((10 - accum % 10) % 10) as u8
}

/// True for an 8-digit string whose last digit is the checksum of the first seven
pub fn is_valid_pin(pin: &str) -> bool {
    if pin.len() != 8 || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match pin.parse::<u32>() {
        Ok(value) => checksum(value / 10) as u32 == value % 10,
        Err(_) => false,
    }
}

/// One PIN to submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinCandidate {
    first_half: u16,
    second_half: u16,
}

impl PinCandidate {
    /// `first_half` in 0..10000, `second_half` in 0..1000
    pub fn new(first_half: u16, second_half: u16) -> Option<Self> {
        if first_half >= FIRST_HALF_COUNT || second_half >= SECOND_HALF_COUNT {
            return None;
        }
        Some(Self {
            first_half,
            second_half,
        })
    }

    /// Parse a 7-digit prefix or an 8-digit PIN (the checksum must then match)
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let prefix: u32 = match text.len() {
            7 => text.parse().ok()?,
            8 if is_valid_pin(text) => text[..7].parse().ok()?,
            _ => return None,
        };
        Self::from_prefix(prefix)
    }

    fn from_prefix(prefix: u32) -> Option<Self> {
        if prefix >= FULL_PIN_COUNT {
            return None;
        }
        Self::new((prefix / 1000) as u16, (prefix % 1000) as u16)
    }

    fn prefix(&self) -> u32 {
        self.first_half as u32 * 1000 + self.second_half as u32
    }

    pub fn first_half(&self) -> u16 {
        self.first_half
    }

    pub fn second_half(&self) -> u16 {
        self.second_half
    }

    pub fn checksum(&self) -> u8 {
        checksum(self.prefix())
    }

    /// Full 8-digit PIN
    pub fn as_pin(&self) -> String {
        format!("{:07}{}", self.prefix(), self.checksum())
    }

    /// Digits proven by PSK1
    pub fn first_digits(&self) -> String {
        format!("{:04}", self.first_half)
    }

    /// Digits proven by PSK2 (includes the checksum)
    pub fn second_digits(&self) -> String {
        format!("{:03}{}", self.second_half, self.checksum())
    }
}

impl fmt::Display for PinCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_pin())
    }
}

/// Serializable enumeration cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub mode: PinMode,
    pub first_half: u16,
    pub first_half_confirmed: bool,
    pub second_half: u16,
}

/// Ordered, feedback-driven PIN candidate space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinSpace {
    mode: PinMode,
    /// Next first half to try (== FIRST_HALF_COUNT once exhausted)
    first_half: u16,
    /// Next second half to try (== SECOND_HALF_COUNT once exhausted)
    second_half: u16,
    first_half_confirmed: bool,
}

impl PinSpace {
    pub fn new(mode: PinMode) -> Self {
        Self {
            mode,
            first_half: 0,
            second_half: 0,
            first_half_confirmed: false,
        }
    }

    /// Start the enumeration at a given candidate instead of 00000000.
    ///
    /// In split mode the start second half only applies to the start first
    /// half; later first halves begin again at 000.
    pub fn starting_at(mode: PinMode, start: PinCandidate) -> Self {
        Self {
            mode,
            first_half: start.first_half,
            second_half: start.second_half,
            first_half_confirmed: false,
        }
    }

    /// Continue from a persisted cursor. Out-of-range values clamp to exhausted.
    pub fn resume(point: ResumePoint) -> Self {
        Self {
            mode: point.mode,
            first_half: point.first_half.min(FIRST_HALF_COUNT),
            second_half: point.second_half.min(SECOND_HALF_COUNT),
            first_half_confirmed: point.first_half_confirmed,
        }
    }

    pub fn resume_point(&self) -> ResumePoint {
        ResumePoint {
            mode: self.mode,
            first_half: self.first_half,
            first_half_confirmed: self.first_half_confirmed,
            second_half: self.second_half,
        }
    }

    pub fn mode(&self) -> PinMode {
        self.mode
    }

    pub fn first_half_confirmed(&self) -> bool {
        self.first_half_confirmed
    }

    /// Candidate to try next, `None` once the space is exhausted
    pub fn current(&self) -> Option<PinCandidate> {
        match self.mode {
            PinMode::Split => {
                if self.first_half_confirmed {
                    PinCandidate::new(self.first_half, self.second_half)
                } else if self.first_half < FIRST_HALF_COUNT {
                    // Second half stays at the cursor until the first is known
                    let second = self.second_half.min(SECOND_HALF_COUNT - 1);
                    PinCandidate::new(self.first_half, second)
                } else {
                    None
                }
            }
            PinMode::Full => PinCandidate::new(self.first_half, self.second_half),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.current().is_none()
    }

    /// The AP rejected the first half of the current candidate
    pub fn reject_first_half(&mut self) {
        match self.mode {
            PinMode::Split => {
                // A start or partly walked second half belongs to the rejected first half only
                self.first_half_confirmed = false;
                self.second_half = 0;
                if self.first_half < FIRST_HALF_COUNT {
                    self.first_half += 1;
                }
            }
            PinMode::Full => self.reject_full(),
        }
    }

    /// The first half of the current candidate is proven correct
    pub fn confirm_first_half(&mut self) {
        if self.mode == PinMode::Split && self.first_half < FIRST_HALF_COUNT {
            self.first_half_confirmed = true;
        }
    }

    /// The AP rejected the second half (which implies the first half was accepted)
    pub fn reject_second_half(&mut self) {
        match self.mode {
            PinMode::Split => {
                self.confirm_first_half();
                if self.first_half_confirmed && self.second_half < SECOND_HALF_COUNT {
                    self.second_half += 1;
                }
            }
            PinMode::Full => self.reject_full(),
        }
    }

    /// The whole candidate is wrong without telling which half
    pub fn reject_full(&mut self) {
        match self.mode {
            PinMode::Full => {
                let Some(current) = self.current() else {
                    return;
                };
                let next = current.prefix() + 1;
                self.first_half = (next / 1000) as u16;
                self.second_half = (next % 1000) as u16;
                if self.first_half >= FIRST_HALF_COUNT {
                    self.first_half = FIRST_HALF_COUNT;
                    self.second_half = SECOND_HALF_COUNT;
                }
            }
            PinMode::Split => {
                if self.first_half_confirmed {
                    self.reject_second_half();
                } else {
                    self.reject_first_half();
                }
            }
        }
    }

    /// Worst-case number of candidates
    pub fn total(&self) -> u64 {
        match self.mode {
            PinMode::Split => FIRST_HALF_COUNT as u64 + SECOND_HALF_COUNT as u64,
            PinMode::Full => FULL_PIN_COUNT as u64,
        }
    }

    /// Percentage of the worst case already covered
    pub fn progress(&self) -> f64 {
        let done = match self.mode {
            PinMode::Split => {
                if self.first_half_confirmed {
                    // Everything after the confirmed half is never tried
                    FIRST_HALF_COUNT as u64 + self.second_half as u64
                } else {
                    self.first_half as u64
                }
            }
            PinMode::Full => {
                self.first_half as u64 * SECOND_HALF_COUNT as u64 + self.second_half as u64
            }
        };
        (done.min(self.total()) as f64 / self.total() as f64) * 100.0
    }
}

/// The a-priori sequence: every candidate assumed rejected
impl Iterator for PinSpace {
    type Item = PinCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current()?;
        self.reject_full();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_pins() {
        // Common vendor default PINs
        assert_eq!(checksum(1234567), 0);
        assert_eq!(checksum(1234567) as u32, 12345670 % 10);
        assert!(is_valid_pin("12345670"));
        assert!(is_valid_pin("00000000"));
        assert_eq!(checksum(0), 0);
        assert!(!is_valid_pin("12345678"));
        assert!(!is_valid_pin("1234567"));
        assert!(!is_valid_pin("1234567a"));
    }

    #[test]
    fn test_checksum_roundtrip() {
        for prefix in [0u32, 1, 42, 999_999, 5_555_555, 9_999_999] {
            let pin = format!("{:07}{}", prefix, checksum(prefix));
            assert!(is_valid_pin(&pin), "{}", pin);
            for wrong in 0..10u8 {
                if wrong != checksum(prefix) {
                    assert!(!is_valid_pin(&format!("{:07}{}", prefix, wrong)));
                }
            }
        }
    }

    #[test]
    fn test_candidate_digits() {
        let c = PinCandidate::new(1234, 567).unwrap();
        assert_eq!(c.first_digits(), "1234");
        assert_eq!(c.second_digits(), "5670");
        assert_eq!(c.as_pin(), "12345670");
        assert_eq!(PinCandidate::parse("12345670"), Some(c));
        assert_eq!(PinCandidate::parse("1234567"), Some(c));
        assert_eq!(PinCandidate::parse("12345671"), None);

        let low = PinCandidate::new(7, 3).unwrap();
        assert_eq!(low.first_digits(), "0007");
        assert_eq!(low.as_pin().len(), 8);
        assert!(PinCandidate::new(10_000, 0).is_none());
        assert!(PinCandidate::new(0, 1_000).is_none());
    }

    #[test]
    fn test_split_enumeration_with_feedback() {
        let mut space = PinSpace::new(PinMode::Split);
        assert_eq!(space.current(), PinCandidate::new(0, 0));

        for expected in 0..5u16 {
            assert_eq!(space.current().unwrap().first_half(), expected);
            assert_eq!(space.current().unwrap().second_half(), 0);
            space.reject_first_half();
        }

        space.confirm_first_half();
        assert_eq!(space.current(), PinCandidate::new(5, 0));
        space.reject_second_half();
        space.reject_second_half();
        assert_eq!(space.current(), PinCandidate::new(5, 2));
        assert!(space.first_half_confirmed());
    }

    #[test]
    fn test_split_worst_case_below_11000() {
        let mut space = PinSpace::new(PinMode::Split);
        let mut attempts = 0;
        // Every first half but 9999 rejected, then every second half rejected
        while let Some(c) = space.current() {
            attempts += 1;
            if c.first_half() == 9999 {
                space.confirm_first_half();
                space.reject_second_half();
            } else {
                space.reject_first_half();
            }
        }
        // The confirming attempt already tests second half 000
        assert_eq!(attempts, 10_999);
        assert!(space.is_exhausted());
        assert!((space.progress() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_start_second_half_not_carried_over() {
        let start = PinCandidate::new(0, 998).unwrap();
        let mut space = PinSpace::starting_at(PinMode::Split, start);
        assert_eq!(space.current(), Some(start));
        space.reject_first_half();
        assert_eq!(space.current(), PinCandidate::new(1, 0));

        // A confirmed cursor is kept as is
        let mut resumed = PinSpace::resume(ResumePoint {
            mode: PinMode::Split,
            first_half: 1,
            first_half_confirmed: true,
            second_half: 500,
        });
        assert_eq!(resumed.current(), PinCandidate::new(1, 500));
        resumed.reject_second_half();
        assert_eq!(resumed.current(), PinCandidate::new(1, 501));
    }

    #[test]
    fn test_iterator_a_priori_sequence() {
        let space = PinSpace::new(PinMode::Split);
        let all: Vec<_> = space.collect();
        assert_eq!(all.len(), 10_000);
        assert_eq!(all[0].as_pin(), "00000000");
        assert_eq!(all[9_999].first_half(), 9_999);
    }

    #[test]
    fn test_full_mode_enumeration() {
        let start = PinCandidate::new(9_999, 997).unwrap();
        let space = PinSpace::starting_at(PinMode::Full, start);
        let pins: Vec<String> = space.map(|c| c.as_pin()).collect();
        assert_eq!(pins.len(), 3);
        assert_eq!(pins[0], format!("9999997{}", checksum(9_999_997)));
        assert_eq!(pins[2], format!("9999999{}", checksum(9_999_999)));

        let mut space = PinSpace::starting_at(PinMode::Full, PinCandidate::new(0, 999).unwrap());
        space.reject_first_half();
        assert_eq!(space.current(), PinCandidate::new(1, 0));
    }

    #[test]
    fn test_resume_is_exact_continuation() {
        let mut original = PinSpace::new(PinMode::Split);
        for _ in 0..42 {
            original.reject_first_half();
        }
        original.confirm_first_half();
        for _ in 0..17 {
            original.reject_second_half();
        }

        let point = original.resume_point();
        let resumed = PinSpace::resume(point);
        assert_eq!(resumed.current(), original.current());

        let a: Vec<_> = original.collect();
        let b: Vec<_> = resumed.collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 1_000 - 17);
        assert_eq!(a[0], PinCandidate::new(42, 17).unwrap());
    }

    #[test]
    fn test_resume_point_serializes() {
        let point = ResumePoint {
            mode: PinMode::Split,
            first_half: 1234,
            first_half_confirmed: true,
            second_half: 12,
        };
        let json = serde_json::to_string(&point).unwrap();
        assert!(json.contains("\"split\""));
        let back: ResumePoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, point);
    }
}
