/*!
 * In-process WPS registrar
 *
 * `ScriptedAp` answers frames the way an access point with a known PIN
 * would: probe and association responses, the EAP identity round, and the
 * registrar half of M1-M8. Replies are queued on `send` and handed out by
 * `receive`. Behaviour knobs reproduce locking, silent and duplicating APs.
 */

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, trace};

use super::{wait_until, CancelToken, FrameTransport};
use crate::crypto::{self, DhKeyPair, ExchangeNonces, ProofContext, SessionKeys, HASH_LEN, NONCE_LEN};
use crate::error::{RecvError, TransportError};
use crate::frame::{self, Dot11Frame, EapCode, EapData, EapPacket, Eapol, EapolType, FrameKind, WscOpcode};
use crate::pin::{Half, PinCandidate};
use crate::target::MacAddr;
use crate::wsc::{
    AttrType, AttrWriter, Attributes, MessageType, CONFIG_ERROR_DEVICE_PASSWORD_AUTH,
    CONFIG_ERROR_SETUP_LOCKED, WSC_VERSION,
};

const REGISTRAR_PRIVATE_KEY: [u8; crypto::PRIVATE_KEY_LEN] = [0x42; crypto::PRIVATE_KEY_LEN];

/// How the simulated AP deviates from a well-behaved registrar
#[derive(Debug, Clone, Default)]
pub struct ApBehavior {
    /// Lock once this many sessions have been started
    pub lock_after: Option<u32>,
    /// Sessions refused while locked before the AP unlocks again
    pub lock_sessions: u32,
    /// Queue every EAP frame twice
    pub duplicate: bool,
    /// Stop answering for the rest of a session once this message arrives
    pub silent_from: Option<MessageType>,
    /// Answer this message with a NACK whatever it contains
    pub refuse: Option<MessageType>,
    /// Ignore this many scan requests before answering
    pub drop_scans: u32,
}

/// Registrar state for one EAPOL session
#[derive(Default)]
struct Registration {
    enrollee: Option<MacAddr>,
    nonces: Option<ExchangeNonces>,
    enrollee_public: Vec<u8>,
    keys: Option<SessionKeys>,
    e_hash1: [u8; HASH_LEN],
    e_hash2: [u8; HASH_LEN],
    r_s2: [u8; NONCE_LEN],
    last_message: Vec<u8>,
    locked: bool,
    silenced: bool,
}

pub struct ScriptedAp {
    bssid: MacAddr,
    essid: String,
    channel: u8,
    pin: PinCandidate,
    psk: String,
    keypair: DhKeyPair,
    uuid_r: [u8; 16],
    behavior: ApBehavior,

    tuned: Option<u8>,
    eap_id: u8,
    seq: u16,
    sessions: u32,
    reg: Registration,
    outbox: VecDeque<Vec<u8>>,
    received: Vec<MessageType>,
    failures_received: u32,
    scans_received: u32,
}

impl ScriptedAp {
    pub fn new(
        bssid: MacAddr,
        essid: impl Into<String>,
        channel: u8,
        pin: PinCandidate,
        psk: impl Into<String>,
    ) -> Self {
        Self {
            bssid,
            essid: essid.into(),
            channel,
            pin,
            psk: psk.into(),
            keypair: DhKeyPair::from_private(REGISTRAR_PRIVATE_KEY),
            uuid_r: [0x52; 16],
            behavior: ApBehavior::default(),
            tuned: None,
            eap_id: 0,
            seq: 0,
            sessions: 0,
            reg: Registration::default(),
            outbox: VecDeque::new(),
            received: Vec::new(),
            failures_received: 0,
            scans_received: 0,
        }
    }

    pub fn with_behavior(mut self, behavior: ApBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Every WSC message type received from enrollees, in order
    pub fn received(&self) -> &[MessageType] {
        &self.received
    }

    pub fn count(&self, msg_type: MessageType) -> usize {
        self.received.iter().filter(|&&m| m == msg_type).count()
    }

    /// Probe requests heard on the AP's channel, answered or not
    pub fn scans_received(&self) -> u32 {
        self.scans_received
    }

    /// EAP-Failure packets sent by enrollees
    pub fn failures_received(&self) -> u32 {
        self.failures_received
    }

    /// Number of EAPOL sessions started so far
    pub fn sessions(&self) -> u32 {
        self.sessions
    }

    pub fn is_locked(&self) -> bool {
        match self.behavior.lock_after {
            Some(after) => {
                self.sessions > after && self.sessions <= after.saturating_add(self.behavior.lock_sessions)
            }
            None => false,
        }
    }

    fn listening(&self) -> bool {
        self.tuned.map_or(true, |ch| ch == self.channel)
    }

    fn next_id(&mut self) -> u8 {
        self.eap_id = self.eap_id.wrapping_add(1);
        self.eap_id
    }

    fn push(&mut self, frame: Vec<u8>) {
        self.outbox.push_back(frame);
    }

    fn push_eap(&mut self, station: &MacAddr, eap: &[u8]) {
        let body = frame::eapol(EapolType::EapPacket, eap);
        let frame = frame::data_from_ap(&self.bssid, station, self.seq, &body);
        self.seq = self.seq.wrapping_add(1);
        if self.behavior.duplicate {
            self.push(frame.clone());
        }
        self.push(frame);
    }

    fn push_wsc(&mut self, station: &MacAddr, opcode: WscOpcode, message: &[u8]) {
        let id = self.next_id();
        let eap = frame::eap_wsc(EapCode::Request, id, opcode, message);
        self.push_eap(station, &eap);
    }

    fn wps_attributes(&self) -> Vec<u8> {
        let mut w = AttrWriter::new();
        w.put_u8(AttrType::VERSION, WSC_VERSION)
            .put_u8(AttrType::WPS_STATE, 0x02);
        if self.is_locked() {
            w.put_u8(AttrType::AP_SETUP_LOCKED, 1);
        }
        w.finish()
    }

    fn fresh_nonce() -> Result<[u8; NONCE_LEN], TransportError> {
        crypto::random_bytes::<NONCE_LEN>().map_err(|e| TransportError::Device(e.to_string()))
    }

    fn start_session(&mut self, station: MacAddr) {
        self.outbox.clear();
        self.sessions += 1;
        self.reg = Registration {
            enrollee: Some(station),
            locked: self.is_locked(),
            ..Registration::default()
        };
        debug!(session = self.sessions, locked = self.reg.locked, "Simulated AP: EAPOL-Start");
        let id = self.next_id();
        let eap = frame::eap_identity(EapCode::Request, id, &[]);
        self.push_eap(&station, &eap);
    }

    fn end_session(&mut self, station: &MacAddr) {
        let id = self.next_id();
        self.push_eap(station, &frame::eap_failure(id));
        self.reg = Registration::default();
    }

    fn handle_eap(&mut self, station: MacAddr, packet: EapPacket<'_>) -> Result<(), TransportError> {
        if packet.code == EapCode::Failure {
            self.failures_received += 1;
            if self.reg.enrollee == Some(station) {
                self.reg = Registration::default();
            }
            return Ok(());
        }
        if self.reg.enrollee != Some(station) || self.reg.silenced {
            return Ok(());
        }
        match (packet.code, packet.data) {
            (EapCode::Response, EapData::Identity(_)) => {
                self.push_wsc(&station, WscOpcode::Start, &[]);
            }
            (EapCode::Response, EapData::Wsc { opcode, message, .. }) => {
                let msg_type = match Attributes::parse(message).and_then(|a| a.message_type()) {
                    Ok(t) => t,
                    Err(_) => return Ok(()),
                };
                trace!(%msg_type, "Simulated AP received");
                self.received.push(msg_type);
                match opcode {
                    WscOpcode::Msg => self.handle_message(station, msg_type, message)?,
                    WscOpcode::Nack | WscOpcode::Done => self.end_session(&station),
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_message(
        &mut self,
        station: MacAddr,
        msg_type: MessageType,
        message: &[u8],
    ) -> Result<(), TransportError> {
        if self.behavior.silent_from == Some(msg_type) {
            self.reg.silenced = true;
            return Ok(());
        }
        if self.behavior.refuse == Some(msg_type) {
            self.nack(&station, CONFIG_ERROR_DEVICE_PASSWORD_AUTH);
            return Ok(());
        }
        let attrs = match Attributes::parse(message) {
            Ok(attrs) => attrs,
            Err(_) => return Ok(()),
        };
        match msg_type {
            MessageType::M1 => self.on_m1(&station, message, &attrs),
            MessageType::M3 => self.on_m3(&station, message, &attrs),
            MessageType::M5 => self.on_m5(&station, message, &attrs),
            MessageType::M7 => self.on_m7(&station, message, &attrs),
            _ => Ok(()),
        }
    }

    fn nack(&mut self, station: &MacAddr, config_error: u16) {
        let mut w = AttrWriter::message(MessageType::Nack);
        if let Some(nonces) = self.reg.nonces {
            w.put(AttrType::ENROLLEE_NONCE, &nonces.enrollee)
                .put(AttrType::REGISTRAR_NONCE, &nonces.registrar);
        }
        w.put_u16(AttrType::CONFIG_ERROR, config_error);
        self.push_wsc(station, WscOpcode::Nack, w.as_bytes());
    }

    /// Append the authenticator over `previous || message` and queue it
    fn send_authenticated(&mut self, station: &MacAddr, mut w: AttrWriter, previous: &[u8], keys: &SessionKeys) {
        let auth = crypto::authenticator(&keys.auth_key, previous, w.as_bytes());
        w.put(AttrType::AUTHENTICATOR, &auth);
        let message = w.finish();
        self.push_wsc(station, WscOpcode::Msg, &message);
        self.reg.last_message = message;
    }

    fn on_m1(&mut self, station: &MacAddr, message: &[u8], attrs: &Attributes) -> Result<(), TransportError> {
        if self.reg.locked {
            self.nack(station, CONFIG_ERROR_SETUP_LOCKED);
            return Ok(());
        }
        let (n1, pke, mac) = match (
            attrs.require_fixed::<NONCE_LEN>(AttrType::ENROLLEE_NONCE),
            attrs.require(AttrType::PUBLIC_KEY),
            attrs.require_fixed::<6>(AttrType::MAC_ADDR),
        ) {
            (Ok(n1), Ok(pke), Ok(mac)) => (n1, pke, MacAddr(mac)),
            _ => return Ok(()),
        };
        let nonces = ExchangeNonces {
            enrollee: n1,
            registrar: Self::fresh_nonce()?,
        };
        let keys = match crypto::derive_keys(&self.keypair, pke, &nonces, &mac, &self.pin) {
            Ok(keys) => keys,
            Err(_) => return Ok(()),
        };

        let mut w = AttrWriter::message(MessageType::M2);
        w.put(AttrType::ENROLLEE_NONCE, &nonces.enrollee)
            .put(AttrType::REGISTRAR_NONCE, &nonces.registrar)
            .put(AttrType::UUID_R, &self.uuid_r)
            .put(AttrType::PUBLIC_KEY, self.keypair.public_key())
            .put_u16(AttrType::AUTH_TYPE_FLAGS, 0x0022)
            .put_u16(AttrType::ENCR_TYPE_FLAGS, 0x000C)
            .put_u8(AttrType::CONN_TYPE_FLAGS, 0x01)
            .put_u16(AttrType::CONFIG_METHODS, 0x0084)
            .put(AttrType::MANUFACTURER, b"Scripted")
            .put(AttrType::MODEL_NAME, b"Registrar")
            .put(AttrType::MODEL_NUMBER, b"1")
            .put(AttrType::SERIAL_NUMBER, b"0001")
            .put(AttrType::PRIMARY_DEVICE_TYPE, &[0x00, 0x06, 0x00, 0x50, 0xF2, 0x04, 0x00, 0x01])
            .put(AttrType::DEVICE_NAME, self.essid.as_bytes())
            .put_u8(AttrType::RF_BANDS, 0x01)
            .put_u16(AttrType::ASSOC_STATE, 0)
            .put_u16(AttrType::CONFIG_ERROR, 0)
            .put_u16(AttrType::DEVICE_PASSWORD_ID, 0)
            .put_u32(AttrType::OS_VERSION, 0x8000_0000);

        self.reg.nonces = Some(nonces);
        self.reg.enrollee_public = pke.to_vec();
        self.send_authenticated(station, w, message, &keys);
        self.reg.keys = Some(keys);
        Ok(())
    }

    /// Keys of the running registration once `message` authenticates
    fn authenticated_keys(&self, message: &[u8]) -> Option<SessionKeys> {
        let keys = self.reg.keys.as_ref()?;
        crypto::verify_authenticator(&keys.auth_key, &self.reg.last_message, message).then(|| keys.clone())
    }

    fn on_m3(&mut self, station: &MacAddr, message: &[u8], attrs: &Attributes) -> Result<(), TransportError> {
        let (Some(keys), Some(nonces)) = (self.authenticated_keys(message), self.reg.nonces) else {
            return Ok(());
        };
        let (e_hash1, e_hash2) = match (
            attrs.require_fixed::<HASH_LEN>(AttrType::E_HASH1),
            attrs.require_fixed::<HASH_LEN>(AttrType::E_HASH2),
        ) {
            (Ok(h1), Ok(h2)) => (h1, h2),
            _ => return Ok(()),
        };
        let r_s1 = Self::fresh_nonce()?;
        let r_s2 = Self::fresh_nonce()?;
        let ctx = ProofContext {
            keys: &keys,
            enrollee_public: &self.reg.enrollee_public,
            registrar_public: self.keypair.public_key(),
        };
        let r_hash1 = crypto::compute_hash(Half::First, &r_s1, &ctx);
        let r_hash2 = crypto::compute_hash(Half::Second, &r_s2, &ctx);

        let mut plain = AttrWriter::new();
        plain.put(AttrType::R_SNONCE1, &r_s1);
        let encrypted = crypto::encrypt_settings(plain.as_bytes(), &keys, &Self::fresh_nonce()?);

        let mut w = AttrWriter::message(MessageType::M4);
        w.put(AttrType::ENROLLEE_NONCE, &nonces.enrollee)
            .put(AttrType::R_HASH1, &r_hash1)
            .put(AttrType::R_HASH2, &r_hash2)
            .put(AttrType::ENCRYPTED_SETTINGS, &encrypted);

        self.reg.e_hash1 = e_hash1;
        self.reg.e_hash2 = e_hash2;
        self.reg.r_s2 = r_s2;
        self.send_authenticated(station, w, message, &keys);
        Ok(())
    }

    /// Check the enrollee's secret nonce for `half` against its commitment
    fn proof_holds(&self, keys: &SessionKeys, attrs: &Attributes, half: Half) -> bool {
        let (nonce_attr, expected) = match half {
            Half::First => (AttrType::E_SNONCE1, &self.reg.e_hash1),
            Half::Second => (AttrType::E_SNONCE2, &self.reg.e_hash2),
        };
        let Ok(blob) = attrs.require(AttrType::ENCRYPTED_SETTINGS) else {
            return false;
        };
        let Ok(settings) = crypto::decrypt_settings(blob, keys) else {
            return false;
        };
        let Ok(secret) = settings.secret_nonce(nonce_attr) else {
            return false;
        };
        let ctx = ProofContext {
            keys,
            enrollee_public: &self.reg.enrollee_public,
            registrar_public: self.keypair.public_key(),
        };
        crypto::verify_hash(expected, half, &secret, &ctx)
    }

    fn on_m5(&mut self, station: &MacAddr, message: &[u8], attrs: &Attributes) -> Result<(), TransportError> {
        let (Some(keys), Some(nonces)) = (self.authenticated_keys(message), self.reg.nonces) else {
            return Ok(());
        };
        if !self.proof_holds(&keys, attrs, Half::First) {
            self.nack(station, CONFIG_ERROR_DEVICE_PASSWORD_AUTH);
            return Ok(());
        }

        let mut plain = AttrWriter::new();
        plain.put(AttrType::R_SNONCE2, &self.reg.r_s2);
        let encrypted = crypto::encrypt_settings(plain.as_bytes(), &keys, &Self::fresh_nonce()?);

        let mut w = AttrWriter::message(MessageType::M6);
        w.put(AttrType::ENROLLEE_NONCE, &nonces.enrollee)
            .put(AttrType::ENCRYPTED_SETTINGS, &encrypted);
        self.send_authenticated(station, w, message, &keys);
        Ok(())
    }

    fn on_m7(&mut self, station: &MacAddr, message: &[u8], attrs: &Attributes) -> Result<(), TransportError> {
        let (Some(keys), Some(nonces)) = (self.authenticated_keys(message), self.reg.nonces) else {
            return Ok(());
        };
        if !self.proof_holds(&keys, attrs, Half::Second) {
            self.nack(station, CONFIG_ERROR_DEVICE_PASSWORD_AUTH);
            return Ok(());
        }

        let mut credential = AttrWriter::new();
        credential
            .put_u8(AttrType::NETWORK_INDEX, 1)
            .put(AttrType::SSID, self.essid.as_bytes())
            .put_u16(AttrType::AUTH_TYPE, 0x0020)
            .put_u16(AttrType::ENCR_TYPE, 0x0008)
            .put(AttrType::NETWORK_KEY, self.psk.as_bytes())
            .put(AttrType::MAC_ADDR, station.octets());
        let mut plain = AttrWriter::new();
        plain.put(AttrType::CREDENTIAL, credential.as_bytes());
        let encrypted = crypto::encrypt_settings(plain.as_bytes(), &keys, &Self::fresh_nonce()?);

        let mut w = AttrWriter::message(MessageType::M8);
        w.put(AttrType::ENROLLEE_NONCE, &nonces.enrollee)
            .put(AttrType::ENCRYPTED_SETTINGS, &encrypted);
        self.send_authenticated(station, w, message, &keys);
        Ok(())
    }
}

impl FrameTransport for ScriptedAp {
    fn send(&mut self, raw: &[u8]) -> Result<(), TransportError> {
        let Ok(frame) = Dot11Frame::parse(raw) else {
            return Ok(());
        };
        if !self.listening() || (frame.addr1 != self.bssid && frame.addr1 != MacAddr::BROADCAST) {
            return Ok(());
        }
        let station = frame.addr2;

        match frame.kind {
            FrameKind::ProbeRequest => {
                self.scans_received += 1;
                if self.scans_received <= self.behavior.drop_scans {
                    debug!(request = self.scans_received, "Simulated AP: scan request dropped");
                    return Ok(());
                }
                let wps = self.wps_attributes();
                let response = frame::probe_response(&self.bssid, &station, &self.essid, self.channel, &wps);
                self.push(response);
            }
            FrameKind::Authentication if frame.auth_sequence() == Some(1) => {
                let response = frame::authentication(&station, &self.bssid, &self.bssid, 2, 0);
                self.push(response);
            }
            FrameKind::AssociationRequest => {
                let response = frame::association_response(&self.bssid, &station, 0, 1);
                self.push(response);
            }
            FrameKind::Data if frame.to_ds => {
                let Ok(eapol) = Eapol::parse(frame.body) else {
                    return Ok(());
                };
                match eapol.packet_type {
                    EapolType::Start => self.start_session(station),
                    EapolType::EapPacket => {
                        if let Ok(packet) = EapPacket::parse(eapol.body) {
                            self.handle_eap(station, packet)?;
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn receive(&mut self, deadline: Instant, cancel: &CancelToken) -> Result<Vec<u8>, RecvError> {
        if cancel.is_cancelled() {
            return Err(RecvError::Cancelled);
        }
        match self.outbox.pop_front() {
            Some(frame) => Ok(frame),
            None => Err(wait_until(deadline, cancel)),
        }
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), TransportError> {
        self.tuned = Some(channel);
        Ok(())
    }
}
