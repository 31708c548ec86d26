/*!
 * Retry scheduler
 *
 * Turns the report of one attempt into the next move: try the same
 * candidate again, advance the PIN space, or end the run. Also decides how
 * long to wait before the next attempt (inter-attempt delay, recurring
 * delay, lock backoff, failure throttling).
 */

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{CrackConfig, RecurringDelay};
use crate::error::RunFailure;
use crate::exchange::{AttemptOutcome, AttemptReport, Keys};
use crate::pin::PinSpace;
use crate::target::AccessPointInfo;
use crate::transport::{CancelToken, POLL_INTERVAL};

/// Interruptible pause
pub trait Sleeper {
    /// Wait for `duration`. Returns false when `cancel` fired first.
    fn pause(&mut self, duration: Duration, cancel: &CancelToken) -> bool;
}

/// Sleeps on the current thread in `POLL_INTERVAL` slices
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn pause(&mut self, duration: Duration, cancel: &CancelToken) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }
}

/// Records requested pauses without sleeping
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    pauses: Vec<Duration>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pauses(&self) -> &[Duration] {
        &self.pauses
    }

    pub fn total(&self) -> Duration {
        self.pauses.iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn pause(&mut self, duration: Duration, cancel: &CancelToken) -> bool {
        self.pauses.push(duration);
        !cancel.is_cancelled()
    }
}

/// Counters carried across attempts
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: u64,
    pub pins_rejected: u64,
    /// Consecutive timeouts and unexpected failures
    pub unexpected_failures: u32,
    /// Attempts spent on the current candidate without a verdict
    pub candidate_retries: u32,
    /// Consecutive lock reports
    pub lock_waits: u32,
    /// Last attempt that produced a clean verdict
    pub last_success: Option<Instant>,
    pub locked: bool,
    /// Candidates given up on after too many inconclusive attempts
    pub skipped: Vec<String>,
}

/// How a run ends
#[derive(Debug)]
pub enum RunEnd {
    Recovered(Keys),
    Failed(RunFailure),
}

#[derive(Debug)]
pub enum Next {
    RetrySame,
    Advance,
    Finish(RunEnd),
}

#[derive(Debug)]
pub struct Decision {
    pub pause: Duration,
    pub next: Next,
}

impl Decision {
    fn finish(end: RunEnd) -> Self {
        Self {
            pause: Duration::ZERO,
            next: Next::Finish(end),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryScheduler {
    delay: Duration,
    lock_delay: Duration,
    recurring_delay: Option<RecurringDelay>,
    fail_wait: Duration,
    fail_threshold: u32,
    candidate_retry_limit: u32,
    max_attempts: Option<u64>,
    max_lock_waits: Option<u32>,
    ignore_locks: bool,
}

impl RetryScheduler {
    pub fn new(config: &CrackConfig) -> Self {
        Self {
            delay: config.delay,
            lock_delay: config.lock_delay,
            recurring_delay: config.recurring_delay,
            fail_wait: config.fail_wait,
            fail_threshold: config.fail_threshold.max(1),
            candidate_retry_limit: config.candidate_retry_limit.max(1),
            max_attempts: config.max_attempts,
            max_lock_waits: config.max_lock_waits,
            ignore_locks: config.ignore_locks,
        }
    }

    /// Decide what follows the attempt described by `report`.
    ///
    /// Exactly one decision is produced per report; `state`, `ap` and `pins`
    /// are updated in place.
    pub fn decide(
        &self,
        report: AttemptReport,
        state: &mut RetryState,
        ap: &mut AccessPointInfo,
        pins: &mut PinSpace,
    ) -> Decision {
        state.attempts += 1;
        let pin = pins.current().map(|p| p.as_pin()).unwrap_or_default();

        // Valid even when the exchange failed later on
        if report.first_half_confirmed && !pins.first_half_confirmed() {
            info!(pin = %pin, "First half confirmed");
            pins.confirm_first_half();
        }

        let mut pause = Duration::ZERO;
        let next = match report.outcome {
            AttemptOutcome::Recovered(keys) => return Decision::finish(RunEnd::Recovered(keys)),
            AttemptOutcome::Cancelled => return Decision::finish(RunEnd::Failed(RunFailure::Cancelled)),
            AttemptOutcome::TransportFailed(e) => {
                return Decision::finish(RunEnd::Failed(RunFailure::Transport(e)))
            }
            AttemptOutcome::FirstHalfRejected => {
                pins.reject_first_half();
                self.verdict(state, ap);
                Next::Advance
            }
            AttemptOutcome::SecondHalfRejected => {
                pins.reject_second_half();
                self.verdict(state, ap);
                Next::Advance
            }
            AttemptOutcome::Locked => {
                ap.locked = true;
                state.locked = true;
                if self.ignore_locks {
                    warn!("AP reports it is locked, continuing anyway");
                } else {
                    state.lock_waits += 1;
                    if let Some(max) = self.max_lock_waits {
                        if state.lock_waits > max {
                            return Decision::finish(RunEnd::Failed(RunFailure::LockedOut(max)));
                        }
                    }
                    warn!(
                        wait_secs = self.lock_delay.as_secs_f64(),
                        waits = state.lock_waits,
                        "AP is locked, backing off"
                    );
                    pause += self.lock_delay;
                }
                Next::RetrySame
            }
            AttemptOutcome::Timeout { awaiting } => {
                debug!(%awaiting, "Attempt timed out");
                pause += self.count_failure(state);
                self.retry_or_skip(state, pins, &pin)
            }
            AttemptOutcome::Unexpected { reason } => {
                debug!(%reason, "Unexpected attempt failure");
                pause += self.count_failure(state);
                self.retry_or_skip(state, pins, &pin)
            }
            AttemptOutcome::Ambiguous { reason } => {
                debug!(%reason, "Inconclusive attempt");
                self.retry_or_skip(state, pins, &pin)
            }
        };

        if matches!(next, Next::Advance) && pins.is_exhausted() {
            return Decision::finish(RunEnd::Failed(RunFailure::PinSpaceExhausted));
        }
        if let Some(max) = self.max_attempts {
            if state.attempts >= max {
                return Decision::finish(RunEnd::Failed(RunFailure::MaxAttemptsReached(max)));
            }
        }

        pause += self.delay;
        if let Some(recurring) = self.recurring_delay {
            if state.attempts % recurring.every as u64 == 0 {
                debug!(sleep_secs = recurring.sleep.as_secs_f64(), "Recurring delay");
                pause += recurring.sleep;
            }
        }
        Decision { pause, next }
    }

    /// A clean accept/reject from the AP
    fn verdict(&self, state: &mut RetryState, ap: &mut AccessPointInfo) {
        state.pins_rejected += 1;
        state.unexpected_failures = 0;
        state.candidate_retries = 0;
        state.lock_waits = 0;
        state.locked = false;
        state.last_success = Some(Instant::now());
        ap.locked = false;
    }

    /// Count a failure; returns the throttling pause once the threshold is exceeded
    fn count_failure(&self, state: &mut RetryState) -> Duration {
        state.unexpected_failures += 1;
        if state.unexpected_failures <= self.fail_threshold {
            return Duration::ZERO;
        }
        state.unexpected_failures = 0;
        if self.fail_wait.is_zero() {
            Duration::ZERO
        } else {
            warn!(
                wait_secs = self.fail_wait.as_secs_f64(),
                threshold = self.fail_threshold,
                "Too many consecutive failures, pausing"
            );
            self.fail_wait
        }
    }

    fn retry_or_skip(&self, state: &mut RetryState, pins: &mut PinSpace, pin: &str) -> Next {
        state.candidate_retries += 1;
        if state.candidate_retries < self.candidate_retry_limit {
            return Next::RetrySame;
        }
        warn!(pin, attempts = state.candidate_retries, "Giving up on candidate");
        state.candidate_retries = 0;
        state.skipped.push(pin.to_string());
        pins.reject_full();
        Next::Advance
    }
}
