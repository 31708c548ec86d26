/*!
 * Error types
 *
 * Per-attempt conditions (timeouts, NACKs, malformed frames) are absorbed by
 * the exchange and the retry scheduler. Only `RunFailure` reaches the caller.
 */

use thiserror::Error;

use crate::wsc::AttrType;

/// Failures of the Diffie-Hellman / key derivation primitives
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("system randomness source unavailable: {0}")]
    RandomnessUnavailable(String),

    #[error("peer public value is out of range")]
    InvalidPublicKey,
}

/// Encrypted settings could not be recovered.
///
/// This signals a corrupted response, never a wrong PIN.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecryptError {
    #[error("encrypted settings too short ({0} bytes)")]
    TooShort(usize),

    #[error("ciphertext length {0} is not a multiple of the block size")]
    BadLength(usize),

    #[error("invalid padding")]
    BadPadding,

    #[error("key wrap authenticator missing")]
    MissingAuthenticator,

    #[error("key wrap authenticator mismatch")]
    AuthenticatorMismatch,

    #[error("decrypted settings are malformed")]
    Malformed,
}

/// A frame or WSC message could not be decoded
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("attribute {0:#06x} overruns the message")]
    BadAttribute(u16),

    #[error("missing attribute {0:?}")]
    MissingAttribute(AttrType),

    #[error("attribute {attr:?} has length {len}, expected {expected}")]
    BadLength {
        attr: AttrType,
        len: usize,
        expected: usize,
    },

    #[error("not a WPS frame")]
    NotWps,
}

/// Frame transport failures (fatal to the run)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("capture device error: {0}")]
    Device(String),

    #[error("interface {0} is gone")]
    InterfaceGone(String),

    #[error("failed to set channel {channel}: {reason}")]
    Channel { channel: u8, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of a bounded receive that produced no frame
#[derive(Debug, Error)]
pub enum RecvError {
    #[error("receive timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Run-terminal conditions, each surfaced with its own reason
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error("maximum number of attempts ({0}) reached")]
    MaxAttemptsReached(u64),

    #[error("AP stayed locked after {0} lock waits")]
    LockedOut(u32),

    #[error("interface error: {0}")]
    Transport(#[from] TransportError),

    #[error("no local MAC address available")]
    NoLocalMac,

    #[error("target AP {0} not found")]
    ApNotFound(String),

    #[error("PIN space exhausted without recovering the key")]
    PinSpaceExhausted,

    #[error("cryptographic failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("cancelled by operator")]
    Cancelled,
}
