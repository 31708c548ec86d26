/*!
 * WPS PIN recovery
 *
 * Online attack against the WPS registration protocol. The AP proves each
 * PIN half separately (M4/M6), so the 10^8 PIN space collapses to at most
 * 10^4 + 10^3 attempts.
 *
 * Layers, bottom-up:
 * - `wsc`, `frame`: attribute TLVs and 802.11/EAP framing
 * - `crypto`, `pin`: key derivation and the candidate space
 * - `exchange`: one M1..M8 attempt as an explicit state machine
 * - `scheduler`, `engine`: retry policy and the attack loop
 * - `transport`: pcap injection and an in-process registrar for tests
 */

pub mod association;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod pin;
pub mod platform;
pub mod scheduler;
pub mod session;
pub mod target;
pub mod transport;
pub mod wsc;

pub use config::CrackConfig;
pub use engine::{CrackEngine, CrackReport, CrackStatus, KeyStatus};
pub use error::RunFailure;
pub use exchange::Keys;
pub use target::{AccessPointInfo, MacAddr};
pub use transport::{CancelToken, FrameTransport};
