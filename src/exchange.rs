/*!
 * WPS registration exchange (enrollee side)
 *
 * One exchange tests one PIN candidate against the AP:
 *
 * ```text
 * EAPOL-Start -> Identity -> WSC_Start -> M1 -> M2 -> M3 -> M4 -> M5 -> M6 -> M7 -> M8 -> Done
 * ```
 *
 * The registrar proves each PIN half in M4 (R-Hash1) and M6 (R-Hash2).
 * A proof that does not match the candidate ends the attempt with a NACK
 * before our own secret for that half is revealed, so a wrong first half
 * never produces an M5.
 *
 * `step` is the pure transition function; `run` drives it over a
 * `FrameTransport` with deadlines and cancellation.
 */

use std::fmt;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, trace, warn};
use zeroize::Zeroize;

use crate::config::CrackConfig;
use crate::crypto::{
    self, Credential, DhKeyPair, ExchangeNonces, ProofContext, SessionKeys, HASH_LEN, NONCE_LEN,
};
use crate::error::{CryptoError, ParseError, RecvError, TransportError};
use crate::frame::{self, EapCode, EapData, EapPacket, EapolType, Inbound, WscOpcode, ENROLLEE_IDENTITY};
use crate::pin::{Half, PinCandidate};
use crate::target::MacAddr;
use crate::transport::{CancelToken, FrameTransport};
use crate::wsc::{
    AttrType, AttrWriter, Attributes, MessageType, CONFIG_ERROR_DEVICE_PASSWORD_AUTH,
    CONFIG_ERROR_SETUP_LOCKED,
};

/// Recovered credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Keys {
    pub pin: String,
    pub psk: String,
    pub essid: String,
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("pin", &self.pin)
            .field("essid", &self.essid)
            .finish_non_exhaustive()
    }
}

/// What the exchange is waiting for from the AP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Awaiting {
    Association,
    Identity,
    WscStart,
    M2,
    M4,
    M6,
    M8,
}

impl fmt::Display for Awaiting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Awaiting::Association => "association",
            Awaiting::Identity => "identity request",
            Awaiting::WscStart => "WSC start",
            Awaiting::M2 => "M2",
            Awaiting::M4 => "M4",
            Awaiting::M6 => "M6",
            Awaiting::M8 => "M8",
        };
        f.write_str(name)
    }
}

/// Where in the exchange a rejection happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackStage {
    /// Before the PIN was involved (awaiting M2)
    Registration,
    FirstHalf,
    SecondHalf,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailReason {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("deauthenticated by the AP")]
    Deauthenticated,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<ParseError> for FailReason {
    fn from(e: ParseError) -> Self {
        FailReason::Malformed(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    EapolStartSent,
    IdentityExchanged,
    M1Sent,
    M2Received,
    M3Sent,
    M4Received,
    M5Sent,
    M6Received,
    M7Sent,
    M8Received,
    Done(Keys),
    /// `by_peer` is false when our own proof check rejected the candidate
    NackReceived { stage: NackStage, by_peer: bool },
    Locked,
    TimedOut { awaiting: Awaiting },
    Failed(FailReason),
}

impl ExchangeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangeState::Done(_)
                | ExchangeState::NackReceived { .. }
                | ExchangeState::Locked
                | ExchangeState::TimedOut { .. }
                | ExchangeState::Failed(_)
        )
    }

    /// Reply this state waits for; `None` for terminal states and for
    /// states that proceed on our side without input
    pub fn awaiting(&self) -> Option<Awaiting> {
        match self {
            ExchangeState::EapolStartSent => Some(Awaiting::Identity),
            ExchangeState::IdentityExchanged => Some(Awaiting::WscStart),
            ExchangeState::M1Sent => Some(Awaiting::M2),
            ExchangeState::M3Sent => Some(Awaiting::M4),
            ExchangeState::M5Sent => Some(Awaiting::M6),
            ExchangeState::M7Sent => Some(Awaiting::M8),
            _ => None,
        }
    }
}

/// Input to the state machine
#[derive(Debug)]
pub enum Event<'a> {
    Start,
    Eap(EapPacket<'a>),
    Deauthenticated,
    Malformed(ParseError),
    /// Continue from a `*Received` state
    Proceed,
    Timeout,
}

/// Per-attempt protocol state and secrets, wiped when the attempt ends
pub struct Session {
    bssid: MacAddr,
    local: MacAddr,
    pin: PinCandidate,
    keypair: DhKeyPair,
    uuid_e: [u8; 16],
    enrollee_nonce: [u8; NONCE_LEN],
    registrar_nonce: [u8; NONCE_LEN],
    peer_public: Vec<u8>,
    keys: Option<SessionKeys>,
    e_s1: [u8; NONCE_LEN],
    e_s2: [u8; NONCE_LEN],
    r_hash2: [u8; HASH_LEN],
    last_message: Vec<u8>,
    eap_id: u8,
    seq: u16,
    first_half_verified: bool,
    second_half_verified: bool,
    messages_sent: Vec<MessageType>,
    credential: Option<Credential>,
}

/// Stable UUID-E for a station address
fn uuid_for(mac: &MacAddr) -> [u8; 16] {
    let digest = Sha256::digest(mac.octets());
    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&digest[..16]);
    uuid[6] = (uuid[6] & 0x0F) | 0x50;
    uuid[8] = (uuid[8] & 0x3F) | 0x80;
    uuid
}

impl Session {
    pub fn new(bssid: MacAddr, local: MacAddr, pin: PinCandidate) -> Result<Self, CryptoError> {
        Ok(Self {
            bssid,
            local,
            pin,
            keypair: crypto::generate_keypair()?,
            uuid_e: uuid_for(&local),
            enrollee_nonce: crypto::random_bytes()?,
            registrar_nonce: [0u8; NONCE_LEN],
            peer_public: Vec::new(),
            keys: None,
            e_s1: crypto::random_bytes()?,
            e_s2: crypto::random_bytes()?,
            r_hash2: [0u8; HASH_LEN],
            last_message: Vec::new(),
            eap_id: 0,
            seq: 0,
            first_half_verified: false,
            second_half_verified: false,
            messages_sent: Vec::new(),
            credential: None,
        })
    }

    /// Erase every secret of the attempt
    pub fn wipe(&mut self) {
        self.keypair.zeroize();
        self.keys = None;
        self.e_s1.zeroize();
        self.e_s2.zeroize();
        self.r_hash2.zeroize();
        self.enrollee_nonce.zeroize();
        self.registrar_nonce.zeroize();
        self.peer_public.zeroize();
        self.last_message.zeroize();
        if let Some(mut credential) = self.credential.take() {
            credential.psk.zeroize();
        }
    }

    fn nonces(&self) -> ExchangeNonces {
        ExchangeNonces {
            enrollee: self.enrollee_nonce,
            registrar: self.registrar_nonce,
        }
    }

    fn proof_context<'a>(&'a self, keys: &'a SessionKeys) -> ProofContext<'a> {
        ProofContext {
            keys,
            enrollee_public: self.keypair.public_key(),
            registrar_public: &self.peer_public,
        }
    }

    fn push_eapol(&mut self, body: &[u8], outbox: &mut Vec<Vec<u8>>) {
        outbox.push(frame::data_to_ap(&self.bssid, &self.local, self.seq, body));
        self.seq = self.seq.wrapping_add(1);
    }

    fn push_eap(&mut self, eap: &[u8], outbox: &mut Vec<Vec<u8>>) {
        let body = frame::eapol(EapolType::EapPacket, eap);
        self.push_eapol(&body, outbox);
    }

    fn push_wsc(&mut self, msg_type: MessageType, opcode: WscOpcode, message: &[u8], outbox: &mut Vec<Vec<u8>>) {
        debug!(msg = %msg_type, len = message.len(), "Sending");
        let eap = frame::eap_wsc(EapCode::Response, self.eap_id, opcode, message);
        self.push_eap(&eap, outbox);
        self.messages_sent.push(msg_type);
    }

    /// Append the authenticator over `last_message || message`, then send
    fn push_authenticated(&mut self, mut w: AttrWriter, outbox: &mut Vec<Vec<u8>>) -> Result<(), FailReason> {
        let msg_type = Attributes::parse(w.as_bytes())?.message_type()?;
        let auth = match &self.keys {
            Some(keys) => crypto::authenticator(&keys.auth_key, &self.last_message, w.as_bytes()),
            None => return Err(FailReason::Malformed("no session keys".into())),
        };
        w.put(AttrType::AUTHENTICATOR, &auth);
        let message = w.finish();
        self.push_wsc(msg_type, WscOpcode::Msg, &message, outbox);
        self.last_message = message;
        Ok(())
    }

    fn send_nack(&mut self, config_error: u16, outbox: &mut Vec<Vec<u8>>) {
        let mut w = AttrWriter::message(MessageType::Nack);
        w.put(AttrType::ENROLLEE_NONCE, &self.enrollee_nonce)
            .put(AttrType::REGISTRAR_NONCE, &self.registrar_nonce)
            .put_u16(AttrType::CONFIG_ERROR, config_error);
        let message = w.finish();
        self.push_wsc(MessageType::Nack, WscOpcode::Nack, &message, outbox);
    }

    fn send_m1(&mut self, outbox: &mut Vec<Vec<u8>>) {
        let mut w = AttrWriter::message(MessageType::M1);
        w.put(AttrType::UUID_E, &self.uuid_e)
            .put(AttrType::MAC_ADDR, self.local.octets())
            .put(AttrType::ENROLLEE_NONCE, &self.enrollee_nonce)
            .put(AttrType::PUBLIC_KEY, self.keypair.public_key())
            .put_u16(AttrType::AUTH_TYPE_FLAGS, 0x0023)
            .put_u16(AttrType::ENCR_TYPE_FLAGS, 0x000F)
            .put_u8(AttrType::CONN_TYPE_FLAGS, 0x01)
            .put_u16(AttrType::CONFIG_METHODS, 0x0188)
            .put_u8(AttrType::WPS_STATE, 0x01)
            .put(AttrType::MANUFACTURER, b"Generic")
            .put(AttrType::MODEL_NAME, b"Enrollee")
            .put(AttrType::MODEL_NUMBER, b"1")
            .put(AttrType::SERIAL_NUMBER, b"1")
            .put(AttrType::PRIMARY_DEVICE_TYPE, &[0x00, 0x01, 0x00, 0x50, 0xF2, 0x04, 0x00, 0x01])
            .put(AttrType::DEVICE_NAME, b"Enrollee")
            .put_u8(AttrType::RF_BANDS, 0x01)
            .put_u16(AttrType::ASSOC_STATE, 0)
            .put_u16(AttrType::DEVICE_PASSWORD_ID, 0)
            .put_u16(AttrType::CONFIG_ERROR, 0)
            .put_u32(AttrType::OS_VERSION, 0x8000_0000);
        let message = w.finish();
        self.push_wsc(MessageType::M1, WscOpcode::Msg, &message, outbox);
        self.last_message = message;
    }

    fn on_m2(&mut self, message: &[u8], attrs: &Attributes) -> Result<ExchangeState, FailReason> {
        let n1 = attrs.require_fixed::<NONCE_LEN>(AttrType::ENROLLEE_NONCE)?;
        if n1 != self.enrollee_nonce {
            debug!("M2 for another session, discarded");
            return Ok(ExchangeState::M1Sent);
        }
        self.registrar_nonce = attrs.require_fixed::<NONCE_LEN>(AttrType::REGISTRAR_NONCE)?;
        let pkr = attrs.require(AttrType::PUBLIC_KEY)?;
        let keys = crypto::derive_keys(&self.keypair, pkr, &self.nonces(), &self.local, &self.pin)?;
        if !crypto::verify_authenticator(&keys.auth_key, &self.last_message, message) {
            return Err(FailReason::Malformed("M2 authenticator mismatch".into()));
        }
        self.peer_public = pkr.to_vec();
        self.keys = Some(keys);
        self.last_message = message.to_vec();
        Ok(ExchangeState::M2Received)
    }

    fn send_m3(&mut self, outbox: &mut Vec<Vec<u8>>) -> Result<ExchangeState, FailReason> {
        let keys = self
            .keys
            .clone()
            .ok_or_else(|| FailReason::Malformed("no session keys".into()))?;
        let ctx = self.proof_context(&keys);
        let e_hash1 = crypto::compute_hash(Half::First, &self.e_s1, &ctx);
        let e_hash2 = crypto::compute_hash(Half::Second, &self.e_s2, &ctx);

        let mut w = AttrWriter::message(MessageType::M3);
        w.put(AttrType::REGISTRAR_NONCE, &self.registrar_nonce)
            .put(AttrType::E_HASH1, &e_hash1)
            .put(AttrType::E_HASH2, &e_hash2);
        self.push_authenticated(w, outbox)?;
        Ok(ExchangeState::M3Sent)
    }

    /// Check that `message` belongs to this session and is authenticated.
    /// `Ok(false)` means it should be discarded.
    fn accept(&self, message: &[u8], attrs: &Attributes) -> Result<bool, FailReason> {
        let n1 = attrs.require_fixed::<NONCE_LEN>(AttrType::ENROLLEE_NONCE)?;
        if n1 != self.enrollee_nonce {
            return Ok(false);
        }
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| FailReason::Malformed("no session keys".into()))?;
        if !crypto::verify_authenticator(&keys.auth_key, &self.last_message, message) {
            return Err(FailReason::Malformed("authenticator mismatch".into()));
        }
        Ok(true)
    }

    /// Decrypt the registrar's secret nonce for `half` and check it against `r_hash`
    fn registrar_proof(&self, attrs: &Attributes, half: Half, r_hash: &[u8]) -> Result<bool, FailReason> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| FailReason::Malformed("no session keys".into()))?;
        let blob = attrs.require(AttrType::ENCRYPTED_SETTINGS)?;
        let settings = crypto::decrypt_settings(blob, keys)
            .map_err(|e| FailReason::Malformed(e.to_string()))?;
        let nonce_attr = match half {
            Half::First => AttrType::R_SNONCE1,
            Half::Second => AttrType::R_SNONCE2,
        };
        let mut secret = settings.secret_nonce(nonce_attr)?;
        let verified = crypto::verify_hash(r_hash, half, &secret, &self.proof_context(keys));
        secret.zeroize();
        Ok(verified)
    }

    fn on_m4(&mut self, message: &[u8], attrs: &Attributes, outbox: &mut Vec<Vec<u8>>) -> Result<ExchangeState, FailReason> {
        if !self.accept(message, attrs)? {
            return Ok(ExchangeState::M3Sent);
        }
        let r_hash1 = attrs.require_fixed::<HASH_LEN>(AttrType::R_HASH1)?;
        let r_hash2 = attrs.require_fixed::<HASH_LEN>(AttrType::R_HASH2)?;
        if !self.registrar_proof(attrs, Half::First, &r_hash1)? {
            debug!(pin = %self.pin, "R-Hash1 mismatch, first half rejected");
            self.send_nack(CONFIG_ERROR_DEVICE_PASSWORD_AUTH, outbox);
            return Ok(ExchangeState::NackReceived {
                stage: NackStage::FirstHalf,
                by_peer: false,
            });
        }
        self.first_half_verified = true;
        self.r_hash2 = r_hash2;
        self.last_message = message.to_vec();
        Ok(ExchangeState::M4Received)
    }

    fn send_secret(&mut self, half: Half, outbox: &mut Vec<Vec<u8>>) -> Result<(), FailReason> {
        let keys = self
            .keys
            .clone()
            .ok_or_else(|| FailReason::Malformed("no session keys".into()))?;
        let (msg_type, attr, mut secret) = match half {
            Half::First => (MessageType::M5, AttrType::E_SNONCE1, self.e_s1),
            Half::Second => (MessageType::M7, AttrType::E_SNONCE2, self.e_s2),
        };
        let mut plain = AttrWriter::new();
        plain.put(attr, &secret);
        secret.zeroize();
        let iv = crypto::random_bytes::<16>()?;
        let encrypted = crypto::encrypt_settings(plain.as_bytes(), &keys, &iv);
        let mut plain = plain.finish();
        plain.zeroize();

        let mut w = AttrWriter::message(msg_type);
        w.put(AttrType::REGISTRAR_NONCE, &self.registrar_nonce)
            .put(AttrType::ENCRYPTED_SETTINGS, &encrypted);
        self.push_authenticated(w, outbox)
    }

    fn on_m6(&mut self, message: &[u8], attrs: &Attributes, outbox: &mut Vec<Vec<u8>>) -> Result<ExchangeState, FailReason> {
        if !self.accept(message, attrs)? {
            return Ok(ExchangeState::M5Sent);
        }
        let r_hash2 = self.r_hash2;
        if !self.registrar_proof(attrs, Half::Second, &r_hash2)? {
            debug!(pin = %self.pin, "R-Hash2 mismatch, second half rejected");
            self.send_nack(CONFIG_ERROR_DEVICE_PASSWORD_AUTH, outbox);
            return Ok(ExchangeState::NackReceived {
                stage: NackStage::SecondHalf,
                by_peer: false,
            });
        }
        self.second_half_verified = true;
        self.last_message = message.to_vec();
        Ok(ExchangeState::M6Received)
    }

    fn on_m8(&mut self, message: &[u8], attrs: &Attributes) -> Result<ExchangeState, FailReason> {
        if !self.accept(message, attrs)? {
            return Ok(ExchangeState::M7Sent);
        }
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| FailReason::Malformed("no session keys".into()))?;
        let blob = attrs.require(AttrType::ENCRYPTED_SETTINGS)?;
        let settings = crypto::decrypt_settings(blob, keys)
            .map_err(|e| FailReason::Malformed(e.to_string()))?;
        self.credential = Some(settings.credential()?);
        self.last_message = message.to_vec();
        Ok(ExchangeState::M8Received)
    }

    fn send_done(&mut self, outbox: &mut Vec<Vec<u8>>) -> Result<ExchangeState, FailReason> {
        let mut w = AttrWriter::message(MessageType::Done);
        w.put(AttrType::ENROLLEE_NONCE, &self.enrollee_nonce)
            .put(AttrType::REGISTRAR_NONCE, &self.registrar_nonce);
        let message = w.finish();
        self.push_wsc(MessageType::Done, WscOpcode::Done, &message, outbox);

        let credential = self
            .credential
            .clone()
            .ok_or_else(|| FailReason::Malformed("M8 without credential".into()))?;
        Ok(ExchangeState::Done(Keys {
            pin: self.pin.as_pin(),
            psk: credential.psk,
            essid: credential.essid,
        }))
    }

    /// EAP-Failure telling the AP to drop the session
    pub fn terminate(&mut self, outbox: &mut Vec<Vec<u8>>) {
        let eap = frame::eap_failure(self.eap_id);
        self.push_eap(&eap, outbox);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("bssid", &self.bssid)
            .field("pin", &self.pin)
            .field("messages_sent", &self.messages_sent)
            .finish_non_exhaustive()
    }
}

fn nack_stage(awaiting: Awaiting) -> NackStage {
    match awaiting {
        Awaiting::M4 | Awaiting::M6 => NackStage::FirstHalf,
        Awaiting::M8 => NackStage::SecondHalf,
        _ => NackStage::Registration,
    }
}

/// Advance the exchange by one event.
///
/// Frames to transmit are appended to `outbox`. Events that do not fit the
/// current state (duplicates, out-of-order messages, stale replies) return
/// the state unchanged.
pub fn step(
    state: ExchangeState,
    event: Event<'_>,
    session: &mut Session,
    outbox: &mut Vec<Vec<u8>>,
) -> ExchangeState {
    if state.is_terminal() {
        return state;
    }

    match event {
        Event::Start => {
            if state != ExchangeState::Idle {
                return state;
            }
            session.push_eapol(&frame::eapol_start(), outbox);
            ExchangeState::EapolStartSent
        }
        Event::Timeout => match state.awaiting() {
            Some(awaiting) => ExchangeState::TimedOut { awaiting },
            None => state,
        },
        Event::Deauthenticated => ExchangeState::Failed(FailReason::Deauthenticated),
        Event::Malformed(e) => match state.awaiting() {
            Some(Awaiting::M2 | Awaiting::M4 | Awaiting::M6 | Awaiting::M8) => {
                ExchangeState::Failed(e.into())
            }
            _ => {
                trace!(error = %e, "Undecodable frame ignored");
                state
            }
        },
        Event::Proceed => {
            let next = match state {
                ExchangeState::M2Received => session.send_m3(outbox),
                ExchangeState::M4Received => session
                    .send_secret(Half::First, outbox)
                    .map(|_| ExchangeState::M5Sent),
                ExchangeState::M6Received => session
                    .send_secret(Half::Second, outbox)
                    .map(|_| ExchangeState::M7Sent),
                ExchangeState::M8Received => session.send_done(outbox),
                other => return other,
            };
            next.unwrap_or_else(ExchangeState::Failed)
        }
        Event::Eap(packet) => {
            let Some(awaiting) = state.awaiting() else {
                return state;
            };
            match on_eap(awaiting, packet, session, outbox) {
                Ok(Some(next)) => next,
                Ok(None) => state,
                Err(reason) => ExchangeState::Failed(reason),
            }
        }
    }
}

/// `Ok(None)` discards the packet
fn on_eap(
    awaiting: Awaiting,
    packet: EapPacket<'_>,
    session: &mut Session,
    outbox: &mut Vec<Vec<u8>>,
) -> Result<Option<ExchangeState>, FailReason> {
    let past_m1 = matches!(awaiting, Awaiting::M2 | Awaiting::M4 | Awaiting::M6 | Awaiting::M8);

    if packet.code == EapCode::Failure {
        if !past_m1 {
            trace!("EAP-Failure before M1 ignored");
            return Ok(None);
        }
        debug!(%awaiting, "EAP-Failure from AP");
        return Ok(Some(ExchangeState::NackReceived {
            stage: nack_stage(awaiting),
            by_peer: true,
        }));
    }
    if packet.code != EapCode::Request {
        return Ok(None);
    }

    match (awaiting, packet.data) {
        (Awaiting::Identity, EapData::Identity(_)) => {
            session.eap_id = packet.id;
            let eap = frame::eap_identity(EapCode::Response, packet.id, ENROLLEE_IDENTITY.as_bytes());
            session.push_eap(&eap, outbox);
            Ok(Some(ExchangeState::IdentityExchanged))
        }
        (Awaiting::WscStart, EapData::Wsc { opcode: WscOpcode::Start, .. }) => {
            session.eap_id = packet.id;
            session.send_m1(outbox);
            Ok(Some(ExchangeState::M1Sent))
        }
        (_, EapData::Wsc { opcode: WscOpcode::Nack, message, .. }) if past_m1 => {
            let config_error = Attributes::parse(message).ok().and_then(|a| a.config_error());
            debug!(%awaiting, ?config_error, "WSC_NACK from AP");
            if config_error == Some(CONFIG_ERROR_SETUP_LOCKED) {
                return Ok(Some(ExchangeState::Locked));
            }
            Ok(Some(ExchangeState::NackReceived {
                stage: nack_stage(awaiting),
                by_peer: true,
            }))
        }
        (_, EapData::Wsc { opcode: WscOpcode::Msg, message, .. }) if past_m1 => {
            let attrs = Attributes::parse(message)?;
            let msg_type = attrs.message_type()?;
            debug!(msg = %msg_type, len = message.len(), "Received");

            let next = match (awaiting, msg_type) {
                (Awaiting::M2, MessageType::M2D) => {
                    if attrs.setup_locked() {
                        ExchangeState::Locked
                    } else {
                        ExchangeState::NackReceived {
                            stage: NackStage::Registration,
                            by_peer: true,
                        }
                    }
                }
                (Awaiting::M2, MessageType::M2) => session.on_m2(message, &attrs)?,
                (Awaiting::M4, MessageType::M4) => session.on_m4(message, &attrs, outbox)?,
                (Awaiting::M6, MessageType::M6) => session.on_m6(message, &attrs, outbox)?,
                (Awaiting::M8, MessageType::M8) => session.on_m8(message, &attrs)?,
                _ => {
                    trace!(msg = %msg_type, %awaiting, "Out of order message discarded");
                    return Ok(None);
                }
            };
            session.eap_id = packet.id;
            Ok(Some(next))
        }
        _ => Ok(None),
    }
}

/// Per-attempt settings of the driver
#[derive(Debug, Clone, Copy)]
pub struct ExchangeOptions {
    pub rx_timeout: Duration,
    pub m57_timeout: Duration,
    pub eap_terminate: bool,
    /// The AP answers every rejected half with a NACK
    pub nack_always: bool,
}

impl ExchangeOptions {
    pub fn from_config(config: &CrackConfig) -> Self {
        Self {
            rx_timeout: config.rx_timeout,
            m57_timeout: config.m57_timeout,
            eap_terminate: config.eap_terminate,
            nack_always: config.nack_always,
        }
    }

    fn timeout_for(&self, state: &ExchangeState) -> Duration {
        match state {
            ExchangeState::M5Sent | ExchangeState::M7Sent => self.m57_timeout,
            _ => self.rx_timeout,
        }
    }
}

/// Classified result of one attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    Recovered(Keys),
    FirstHalfRejected,
    SecondHalfRejected,
    Locked,
    Timeout { awaiting: Awaiting },
    /// Neither a confirmation nor a clean rejection
    Ambiguous { reason: String },
    Unexpected { reason: String },
    Cancelled,
    TransportFailed(TransportError),
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Recovered(_) => write!(f, "key recovered"),
            AttemptOutcome::FirstHalfRejected => write!(f, "first half rejected"),
            AttemptOutcome::SecondHalfRejected => write!(f, "second half rejected"),
            AttemptOutcome::Locked => write!(f, "AP locked"),
            AttemptOutcome::Timeout { awaiting } => write!(f, "timeout waiting for {}", awaiting),
            AttemptOutcome::Ambiguous { reason } => write!(f, "ambiguous: {}", reason),
            AttemptOutcome::Unexpected { reason } => write!(f, "unexpected: {}", reason),
            AttemptOutcome::Cancelled => write!(f, "cancelled"),
            AttemptOutcome::TransportFailed(e) => write!(f, "transport failure: {}", e),
        }
    }
}

#[derive(Debug)]
pub struct AttemptReport {
    pub outcome: AttemptOutcome,
    /// Our proof check accepted the AP's first half commitment
    pub first_half_confirmed: bool,
    pub messages_sent: Vec<MessageType>,
    /// The AP itself sent a NACK or EAP-Failure during this attempt
    pub peer_nack: bool,
}

fn classify_end(state: ExchangeState, session: &Session, opts: &ExchangeOptions) -> AttemptOutcome {
    match state {
        ExchangeState::Done(keys) => AttemptOutcome::Recovered(keys),
        ExchangeState::Locked => AttemptOutcome::Locked,
        ExchangeState::NackReceived { stage, by_peer: false } => match stage {
            NackStage::FirstHalf => AttemptOutcome::FirstHalfRejected,
            NackStage::SecondHalf => AttemptOutcome::SecondHalfRejected,
            NackStage::Registration => AttemptOutcome::Unexpected {
                reason: "rejected before registration".into(),
            },
        },
        ExchangeState::NackReceived { stage, by_peer: true } => match stage {
            NackStage::Registration => AttemptOutcome::Unexpected {
                reason: "NACK before M2".into(),
            },
            NackStage::FirstHalf if session.first_half_verified => AttemptOutcome::Ambiguous {
                reason: "AP rejected a first half it proved".into(),
            },
            NackStage::FirstHalf => AttemptOutcome::FirstHalfRejected,
            NackStage::SecondHalf if session.second_half_verified => AttemptOutcome::Ambiguous {
                reason: "AP rejected a second half it proved".into(),
            },
            NackStage::SecondHalf => AttemptOutcome::SecondHalfRejected,
        },
        ExchangeState::TimedOut { awaiting } => match awaiting {
            Awaiting::M6 | Awaiting::M8 if !opts.nack_always => AttemptOutcome::Ambiguous {
                reason: format!("no reply to {}", if awaiting == Awaiting::M6 { "M5" } else { "M7" }),
            },
            _ => AttemptOutcome::Timeout { awaiting },
        },
        ExchangeState::Failed(reason) => AttemptOutcome::Unexpected {
            reason: reason.to_string(),
        },
        other => AttemptOutcome::Unexpected {
            reason: format!("exchange stopped in {:?}", other),
        },
    }
}

fn flush<T: FrameTransport + ?Sized>(transport: &mut T, outbox: &mut Vec<Vec<u8>>) -> Result<(), TransportError> {
    for frame in outbox.drain(..) {
        transport.send(&frame)?;
    }
    Ok(())
}

/// Run one registration exchange to completion.
///
/// Every wait is bounded: `rx_timeout` for each reply, `m57_timeout` after
/// M5 and M7. The session is wiped before returning.
pub fn run<T: FrameTransport + ?Sized>(
    transport: &mut T,
    session: &mut Session,
    opts: &ExchangeOptions,
    cancel: &CancelToken,
) -> AttemptReport {
    let mut outbox = Vec::new();
    let mut state = step(ExchangeState::Idle, Event::Start, session, &mut outbox);
    let mut deadline = Instant::now() + opts.timeout_for(&state);
    let mut peer_nack = false;

    let outcome = loop {
        if let Err(e) = flush(transport, &mut outbox) {
            break AttemptOutcome::TransportFailed(e);
        }
        if state.is_terminal() {
            if let ExchangeState::NackReceived { by_peer: true, .. } = state {
                peer_nack = true;
            }
            break classify_end(state, session, opts);
        }
        if cancel.is_cancelled() {
            break AttemptOutcome::Cancelled;
        }

        let before = std::mem::discriminant(&state);
        state = if state.awaiting().is_none() {
            step(state, Event::Proceed, session, &mut outbox)
        } else {
            match transport.receive(deadline, cancel) {
                Ok(raw) => match frame::classify(&raw, session.bssid, session.local) {
                    Ok(Some(Inbound::Eap(packet))) => step(state, Event::Eap(packet), session, &mut outbox),
                    Ok(Some(Inbound::Deauthenticated)) => {
                        step(state, Event::Deauthenticated, session, &mut outbox)
                    }
                    Ok(Some(Inbound::Management(_))) | Ok(None) => continue,
                    Err(e) => step(state, Event::Malformed(e), session, &mut outbox),
                },
                Err(RecvError::Timeout) => step(state, Event::Timeout, session, &mut outbox),
                Err(RecvError::Cancelled) => break AttemptOutcome::Cancelled,
                Err(RecvError::Transport(e)) => break AttemptOutcome::TransportFailed(e),
            }
        };
        if std::mem::discriminant(&state) != before {
            trace!(?state, "Exchange state");
            deadline = Instant::now() + opts.timeout_for(&state);
        }
    };

    if opts.eap_terminate && !matches!(outcome, AttemptOutcome::TransportFailed(_)) {
        session.terminate(&mut outbox);
        if let Err(e) = flush(transport, &mut outbox) {
            warn!(error = %e, "Failed to send EAP-Failure");
        }
    }

    let report = AttemptReport {
        outcome,
        first_half_confirmed: session.first_half_verified,
        messages_sent: std::mem::take(&mut session.messages_sent),
        peer_nack,
    };
    session.wipe();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ApBehavior, ScriptedAp};

    fn bssid() -> MacAddr {
        "00:90:4C:C1:AC:21".parse().unwrap()
    }

    fn local() -> MacAddr {
        "02:00:00:00:00:01".parse().unwrap()
    }

    fn ap_pin() -> PinCandidate {
        PinCandidate::parse("12345670").unwrap()
    }

    fn ap() -> ScriptedAp {
        ScriptedAp::new(bssid(), "TestNet", 6, ap_pin(), "hunter2moresecret")
    }

    fn opts() -> ExchangeOptions {
        ExchangeOptions {
            rx_timeout: Duration::from_millis(100),
            m57_timeout: Duration::from_millis(50),
            eap_terminate: false,
            nack_always: false,
        }
    }

    fn attempt(ap: &mut ScriptedAp, pin: &str, opts: &ExchangeOptions) -> AttemptReport {
        let mut session = Session::new(bssid(), local(), PinCandidate::parse(pin).unwrap()).unwrap();
        run(ap, &mut session, opts, &CancelToken::new())
    }

    #[test]
    fn test_correct_pin_recovers_key() {
        let mut ap = ap();
        let report = attempt(&mut ap, "12345670", &opts());
        match report.outcome {
            AttemptOutcome::Recovered(keys) => {
                assert_eq!(keys.pin, "12345670");
                assert_eq!(keys.psk, "hunter2moresecret");
                assert_eq!(keys.essid, "TestNet");
            }
            other => panic!("unexpected outcome: {}", other),
        }
        assert!(report.first_half_confirmed);
        assert_eq!(
            report.messages_sent,
            vec![
                MessageType::M1,
                MessageType::M3,
                MessageType::M5,
                MessageType::M7,
                MessageType::Done
            ]
        );
    }

    #[test]
    fn test_wrong_first_half_never_sends_m5() {
        let mut ap = ap();
        let report = attempt(&mut ap, "00000000", &opts());
        assert!(matches!(report.outcome, AttemptOutcome::FirstHalfRejected));
        assert!(!report.first_half_confirmed);
        assert!(!report.messages_sent.contains(&MessageType::M5));
        assert_eq!(ap.received(), &[MessageType::M1, MessageType::M3, MessageType::Nack]);
    }

    #[test]
    fn test_wrong_second_half_gated_at_m6() {
        let mut ap = ap();
        let report = attempt(&mut ap, "12340002", &opts());
        assert!(matches!(report.outcome, AttemptOutcome::SecondHalfRejected));
        assert!(report.first_half_confirmed);
        assert_eq!(ap.count(MessageType::M5), 1);
        assert_eq!(ap.count(MessageType::M7), 0);
    }

    #[test]
    fn test_duplicates_are_discarded() {
        let mut ap = ap().with_behavior(ApBehavior {
            duplicate: true,
            ..ApBehavior::default()
        });
        let report = attempt(&mut ap, "12345670", &opts());
        assert!(matches!(report.outcome, AttemptOutcome::Recovered(_)));
        assert_eq!(ap.count(MessageType::M1), 1);
        assert_eq!(ap.count(MessageType::M3), 1);
    }

    #[test]
    fn test_locked_nack() {
        let mut ap = ap().with_behavior(ApBehavior {
            lock_after: Some(0),
            lock_sessions: 1,
            ..ApBehavior::default()
        });
        let report = attempt(&mut ap, "12345670", &opts());
        assert!(matches!(report.outcome, AttemptOutcome::Locked));
    }

    #[test]
    fn test_silent_ap_times_out_at_deadline() {
        let mut ap = ap().with_behavior(ApBehavior {
            silent_from: Some(MessageType::M1),
            ..ApBehavior::default()
        });
        let options = opts();
        let start = Instant::now();
        let report = attempt(&mut ap, "12345670", &options);
        let elapsed = start.elapsed();
        assert!(matches!(
            report.outcome,
            AttemptOutcome::Timeout {
                awaiting: Awaiting::M2
            }
        ));
        assert!(elapsed >= options.rx_timeout);
        assert!(elapsed < options.rx_timeout * 5);
    }

    #[test]
    fn test_silence_after_m5_depends_on_nack_behaviour() {
        let behavior = ApBehavior {
            silent_from: Some(MessageType::M5),
            ..ApBehavior::default()
        };
        let mut ap = ap().with_behavior(behavior.clone());
        let report = attempt(&mut ap, "12345670", &opts());
        assert!(matches!(report.outcome, AttemptOutcome::Ambiguous { .. }));
        assert!(report.first_half_confirmed);

        let mut ap = self::ap().with_behavior(behavior);
        let strict = ExchangeOptions {
            nack_always: true,
            ..opts()
        };
        let report = attempt(&mut ap, "12345670", &strict);
        assert!(matches!(
            report.outcome,
            AttemptOutcome::Timeout {
                awaiting: Awaiting::M6
            }
        ));
    }

    #[test]
    fn test_peer_nack_after_proven_half_is_ambiguous() {
        let mut ap = ap().with_behavior(ApBehavior {
            refuse: Some(MessageType::M5),
            ..ApBehavior::default()
        });
        let report = attempt(&mut ap, "12345670", &opts());
        assert!(matches!(report.outcome, AttemptOutcome::Ambiguous { .. }));
        assert!(report.peer_nack);
    }

    #[test]
    fn test_peer_nack_awaiting_m4_rejects_first_half() {
        let mut ap = ap().with_behavior(ApBehavior {
            refuse: Some(MessageType::M3),
            ..ApBehavior::default()
        });
        let report = attempt(&mut ap, "12345670", &opts());
        assert!(matches!(report.outcome, AttemptOutcome::FirstHalfRejected));
        assert!(report.peer_nack);
    }

    #[test]
    fn test_stale_and_out_of_order_events_keep_state() {
        let mut session = Session::new(bssid(), local(), ap_pin()).unwrap();
        let mut outbox = Vec::new();

        let state = step(ExchangeState::Idle, Event::Start, &mut session, &mut outbox);
        assert_eq!(state, ExchangeState::EapolStartSent);
        assert_eq!(outbox.len(), 1);

        // WSC_Start before the identity round
        let eap = frame::eap_wsc(EapCode::Request, 1, WscOpcode::Start, &[]);
        let packet = EapPacket::parse(&eap).unwrap();
        let state = step(state, Event::Eap(packet), &mut session, &mut outbox);
        assert_eq!(state, ExchangeState::EapolStartSent);

        // EAP-Failure before M1 is not a rejection
        let failure = frame::eap_failure(1);
        let packet = EapPacket::parse(&failure).unwrap();
        let state = step(state, Event::Eap(packet), &mut session, &mut outbox);
        assert_eq!(state, ExchangeState::EapolStartSent);

        let state = step(state, Event::Timeout, &mut session, &mut outbox);
        assert_eq!(
            state,
            ExchangeState::TimedOut {
                awaiting: Awaiting::Identity
            }
        );
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn test_eap_terminate_sends_failure() {
        let mut ap = ap();
        let options = ExchangeOptions {
            eap_terminate: true,
            ..opts()
        };
        let report = attempt(&mut ap, "00000000", &options);
        assert!(matches!(report.outcome, AttemptOutcome::FirstHalfRejected));
        assert_eq!(ap.failures_received(), 1);

        let report = attempt(&mut ap, "00000000", &opts());
        assert!(matches!(report.outcome, AttemptOutcome::FirstHalfRejected));
        assert_eq!(ap.failures_received(), 1);
        assert_eq!(ap.sessions(), 2);
    }

    #[test]
    fn test_cancelled_before_reply() {
        let mut ap = ap().with_behavior(ApBehavior {
            silent_from: Some(MessageType::M1),
            ..ApBehavior::default()
        });
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut session = Session::new(bssid(), local(), ap_pin()).unwrap();
        let report = run(&mut ap, &mut session, &opts(), &cancel);
        assert!(matches!(report.outcome, AttemptOutcome::Cancelled));
    }
}
