/*!
 * Frame transport
 *
 * The attack consumes a raw 802.11 link through `FrameTransport`:
 * - `PcapTransport`: monitor-mode capture and injection on a real interface
 * - `ScriptedAp`: an in-process registrar used by the test suite
 *
 * Receives are bounded by an absolute deadline and a `CancelToken`, checked
 * at least every `POLL_INTERVAL`.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{RecvError, TransportError};

pub mod pcap;
pub mod sim;

pub use self::pcap::PcapTransport;
pub use self::sim::{ApBehavior, ScriptedAp};

/// Upper bound between two cancellation checks of a blocking call
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative cancellation flag shared with a signal handler
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Send and receive bare 802.11 frames filtered to one BSSID
pub trait FrameTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Next frame before `deadline`. Returns `RecvError::Timeout` once the
    /// deadline passes and `RecvError::Cancelled` as soon as `cancel` is set.
    fn receive(&mut self, deadline: Instant, cancel: &CancelToken) -> Result<Vec<u8>, RecvError>;

    fn set_channel(&mut self, channel: u8) -> Result<(), TransportError>;
}

impl<T: FrameTransport + ?Sized> FrameTransport for &mut T {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).send(frame)
    }

    fn receive(&mut self, deadline: Instant, cancel: &CancelToken) -> Result<Vec<u8>, RecvError> {
        (**self).receive(deadline, cancel)
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), TransportError> {
        (**self).set_channel(channel)
    }
}

impl<T: FrameTransport + ?Sized> FrameTransport for Box<T> {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).send(frame)
    }

    fn receive(&mut self, deadline: Instant, cancel: &CancelToken) -> Result<Vec<u8>, RecvError> {
        (**self).receive(deadline, cancel)
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), TransportError> {
        (**self).set_channel(channel)
    }
}

/// Sleep until `deadline` in `POLL_INTERVAL` slices.
///
/// Returns `Timeout` at the deadline, `Cancelled` if the token fires first.
pub fn wait_until(deadline: Instant, cancel: &CancelToken) -> RecvError {
    loop {
        if cancel.is_cancelled() {
            return RecvError::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            return RecvError::Timeout;
        }
        std::thread::sleep((deadline - now).min(POLL_INTERVAL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_wait_until_deadline() {
        let start = Instant::now();
        let err = wait_until(start + Duration::from_millis(30), &CancelToken::new());
        assert!(matches!(err, RecvError::Timeout));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_millis(30) + POLL_INTERVAL * 2);
    }

    #[test]
    fn test_wait_until_cancelled() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let start = Instant::now();
        let err = wait_until(start + Duration::from_secs(10), &token);
        handle.join().unwrap();
        assert!(matches!(err, RecvError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
