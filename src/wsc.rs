/*!
 * Wi-Fi Simple Configuration attribute codec
 *
 * WSC messages are a flat sequence of TLV attributes:
 * - Type (u16, big endian)
 * - Length (u16, big endian)
 * - Value
 *
 * The same encoding is used inside the WPS vendor IE of beacons and probe
 * responses, inside EAP-WSC messages (M1-M8, NACK, Done) and inside the
 * decrypted Encrypted Settings payload.
 */

use std::fmt;

use crate::error::ParseError;

/// WSC attribute type identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrType(pub u16);

impl AttrType {
    pub const ASSOC_STATE: AttrType = AttrType(0x1002);
    pub const AUTH_TYPE: AttrType = AttrType(0x1003);
    pub const AUTH_TYPE_FLAGS: AttrType = AttrType(0x1004);
    pub const AUTHENTICATOR: AttrType = AttrType(0x1005);
    pub const CONFIG_METHODS: AttrType = AttrType(0x1008);
    pub const CONFIG_ERROR: AttrType = AttrType(0x1009);
    pub const CONN_TYPE_FLAGS: AttrType = AttrType(0x100D);
    pub const CREDENTIAL: AttrType = AttrType(0x100E);
    pub const ENCR_TYPE: AttrType = AttrType(0x100F);
    pub const ENCR_TYPE_FLAGS: AttrType = AttrType(0x1010);
    pub const DEVICE_NAME: AttrType = AttrType(0x1011);
    pub const DEVICE_PASSWORD_ID: AttrType = AttrType(0x1012);
    pub const E_HASH1: AttrType = AttrType(0x1014);
    pub const E_HASH2: AttrType = AttrType(0x1015);
    pub const E_SNONCE1: AttrType = AttrType(0x1016);
    pub const E_SNONCE2: AttrType = AttrType(0x1017);
    pub const ENCRYPTED_SETTINGS: AttrType = AttrType(0x1018);
    pub const ENROLLEE_NONCE: AttrType = AttrType(0x101A);
    pub const KEY_WRAP_AUTHENTICATOR: AttrType = AttrType(0x101E);
    pub const MAC_ADDR: AttrType = AttrType(0x1020);
    pub const MANUFACTURER: AttrType = AttrType(0x1021);
    pub const MSG_TYPE: AttrType = AttrType(0x1022);
    pub const MODEL_NAME: AttrType = AttrType(0x1023);
    pub const MODEL_NUMBER: AttrType = AttrType(0x1024);
    pub const NETWORK_INDEX: AttrType = AttrType(0x1026);
    pub const NETWORK_KEY: AttrType = AttrType(0x1027);
    pub const OS_VERSION: AttrType = AttrType(0x102D);
    pub const PUBLIC_KEY: AttrType = AttrType(0x1032);
    pub const REGISTRAR_NONCE: AttrType = AttrType(0x1039);
    pub const REQUEST_TYPE: AttrType = AttrType(0x103A);
    pub const RF_BANDS: AttrType = AttrType(0x103C);
    pub const R_HASH1: AttrType = AttrType(0x103D);
    pub const R_HASH2: AttrType = AttrType(0x103E);
    pub const R_SNONCE1: AttrType = AttrType(0x103F);
    pub const R_SNONCE2: AttrType = AttrType(0x1040);
    pub const SERIAL_NUMBER: AttrType = AttrType(0x1042);
    pub const WPS_STATE: AttrType = AttrType(0x1044);
    pub const SSID: AttrType = AttrType(0x1045);
    pub const UUID_E: AttrType = AttrType(0x1047);
    pub const UUID_R: AttrType = AttrType(0x1048);
    pub const VERSION: AttrType = AttrType(0x104A);
    pub const PRIMARY_DEVICE_TYPE: AttrType = AttrType(0x1054);
    pub const AP_SETUP_LOCKED: AttrType = AttrType(0x1057);

    pub fn name(&self) -> &'static str {
        match *self {
            Self::AUTHENTICATOR => "Authenticator",
            Self::CONFIG_ERROR => "ConfigurationError",
            Self::CREDENTIAL => "Credential",
            Self::E_HASH1 => "E-Hash1",
            Self::E_HASH2 => "E-Hash2",
            Self::E_SNONCE1 => "E-SNonce1",
            Self::E_SNONCE2 => "E-SNonce2",
            Self::ENCRYPTED_SETTINGS => "EncryptedSettings",
            Self::ENROLLEE_NONCE => "EnrolleeNonce",
            Self::KEY_WRAP_AUTHENTICATOR => "KeyWrapAuthenticator",
            Self::MAC_ADDR => "MacAddress",
            Self::MSG_TYPE => "MessageType",
            Self::NETWORK_KEY => "NetworkKey",
            Self::PUBLIC_KEY => "PublicKey",
            Self::REGISTRAR_NONCE => "RegistrarNonce",
            Self::R_HASH1 => "R-Hash1",
            Self::R_HASH2 => "R-Hash2",
            Self::R_SNONCE1 => "R-SNonce1",
            Self::R_SNONCE2 => "R-SNonce2",
            Self::SSID => "SSID",
            Self::UUID_E => "UUID-E",
            Self::UUID_R => "UUID-R",
            Self::VERSION => "Version",
            Self::AP_SETUP_LOCKED => "APSetupLocked",
            _ => "Attribute",
        }
    }
}

impl fmt::Debug for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#06x})", self.name(), self.0)
    }
}

/// WSC version 1.0 (0x10) as carried in the Version attribute
pub const WSC_VERSION: u8 = 0x10;

/// Configuration Error value reported by an AP that locked its setup
pub const CONFIG_ERROR_SETUP_LOCKED: u16 = 15;

/// Configuration Error value sent when a PIN proof does not verify
pub const CONFIG_ERROR_DEVICE_PASSWORD_AUTH: u16 = 18;

/// Message Type attribute values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Beacon,
    ProbeRequest,
    ProbeResponse,
    M1,
    M2,
    M2D,
    M3,
    M4,
    M5,
    M6,
    M7,
    M8,
    Ack,
    Nack,
    Done,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Self::Beacon,
            0x02 => Self::ProbeRequest,
            0x03 => Self::ProbeResponse,
            0x04 => Self::M1,
            0x05 => Self::M2,
            0x06 => Self::M2D,
            0x07 => Self::M3,
            0x08 => Self::M4,
            0x09 => Self::M5,
            0x0A => Self::M6,
            0x0B => Self::M7,
            0x0C => Self::M8,
            0x0D => Self::Ack,
            0x0E => Self::Nack,
            0x0F => Self::Done,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Beacon => 0x01,
            Self::ProbeRequest => 0x02,
            Self::ProbeResponse => 0x03,
            Self::M1 => 0x04,
            Self::M2 => 0x05,
            Self::M2D => 0x06,
            Self::M3 => 0x07,
            Self::M4 => 0x08,
            Self::M5 => 0x09,
            Self::M6 => 0x0A,
            Self::M7 => 0x0B,
            Self::M8 => 0x0C,
            Self::Ack => 0x0D,
            Self::Nack => 0x0E,
            Self::Done => 0x0F,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Beacon => "Beacon",
            Self::ProbeRequest => "ProbeRequest",
            Self::ProbeResponse => "ProbeResponse",
            Self::M1 => "M1",
            Self::M2 => "M2",
            Self::M2D => "M2D",
            Self::M3 => "M3",
            Self::M4 => "M4",
            Self::M5 => "M5",
            Self::M6 => "M6",
            Self::M7 => "M7",
            Self::M8 => "M8",
            Self::Ack => "WSC_ACK",
            Self::Nack => "WSC_NACK",
            Self::Done => "WSC_DONE",
        };
        f.write_str(name)
    }
}

/// Size of an attribute header (type + length)
pub const ATTR_HEADER_LEN: usize = 4;

/// Borrowed view over a decoded attribute list
#[derive(Debug, Clone, Default)]
pub struct Attributes<'a> {
    items: Vec<(AttrType, &'a [u8])>,
}

impl<'a> Attributes<'a> {
    /// Decode a TLV sequence. Every attribute must fit inside `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        let mut items = Vec::new();
        let mut i = 0;

        while i < data.len() {
            if i + ATTR_HEADER_LEN > data.len() {
                return Err(ParseError::Truncated("attribute header"));
            }
            let attr = u16::from_be_bytes([data[i], data[i + 1]]);
            let len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
            let val_start = i + ATTR_HEADER_LEN;
            let val_end = val_start + len;

            if val_end > data.len() {
                return Err(ParseError::BadAttribute(attr));
            }

            items.push((AttrType(attr), &data[val_start..val_end]));
            i = val_end;
        }

        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AttrType, &'a [u8])> + '_ {
        self.items.iter().copied()
    }

    /// First occurrence of an attribute
    pub fn get(&self, attr: AttrType) -> Option<&'a [u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == attr)
            .map(|(_, value)| *value)
    }

    pub fn require(&self, attr: AttrType) -> Result<&'a [u8], ParseError> {
        self.get(attr).ok_or(ParseError::MissingAttribute(attr))
    }

    /// Fetch a fixed-size attribute
    pub fn require_fixed<const N: usize>(&self, attr: AttrType) -> Result<[u8; N], ParseError> {
        let value = self.require(attr)?;
        value.try_into().map_err(|_| ParseError::BadLength {
            attr,
            len: value.len(),
            expected: N,
        })
    }

    pub fn get_u8(&self, attr: AttrType) -> Option<u8> {
        match self.get(attr)? {
            [b] => Some(*b),
            _ => None,
        }
    }

    pub fn get_u16(&self, attr: AttrType) -> Option<u16> {
        match self.get(attr)? {
            [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Message Type attribute, decoded
    pub fn message_type(&self) -> Result<MessageType, ParseError> {
        let [raw] = self.require_fixed::<1>(AttrType::MSG_TYPE)?;
        MessageType::from_u8(raw).ok_or(ParseError::BadAttribute(AttrType::MSG_TYPE.0))
    }

    pub fn config_error(&self) -> Option<u16> {
        self.get_u16(AttrType::CONFIG_ERROR)
    }

    /// True when the AP reports its PIN setup as locked
    pub fn setup_locked(&self) -> bool {
        self.get_u8(AttrType::AP_SETUP_LOCKED).unwrap_or(0) != 0
            || self.config_error() == Some(CONFIG_ERROR_SETUP_LOCKED)
    }
}

/// Encoder for a TLV sequence
#[derive(Debug, Clone, Default)]
pub struct AttrWriter {
    buf: Vec<u8>,
}

impl AttrWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(512),
        }
    }

    /// Start a WSC message with the Version and Message Type attributes
    pub fn message(msg_type: MessageType) -> Self {
        let mut w = Self::new();
        w.put_u8(AttrType::VERSION, WSC_VERSION);
        w.put_u8(AttrType::MSG_TYPE, msg_type.as_u8());
        w
    }

    pub fn put(&mut self, attr: AttrType, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(&attr.0.to_be_bytes());
        self.buf
            .extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    pub fn put_u8(&mut self, attr: AttrType, value: u8) -> &mut Self {
        self.put(attr, &[value])
    }

    pub fn put_u16(&mut self, attr: AttrType, value: u16) -> &mut Self {
        self.put(attr, &value.to_be_bytes())
    }

    pub fn put_u32(&mut self, attr: AttrType, value: u32) -> &mut Self {
        self.put(attr, &value.to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Length of a trailing Authenticator attribute (header + 8 bytes)
pub const AUTHENTICATOR_ATTR_LEN: usize = ATTR_HEADER_LEN + 8;

/// Split a raw message into the bytes covered by its authenticator and the
/// authenticator value. The Authenticator must be the last attribute.
pub fn split_authenticator(message: &[u8]) -> Result<(&[u8], &[u8]), ParseError> {
    if message.len() < AUTHENTICATOR_ATTR_LEN {
        return Err(ParseError::MissingAttribute(AttrType::AUTHENTICATOR));
    }
    let (covered, tail) = message.split_at(message.len() - AUTHENTICATOR_ATTR_LEN);
    let attr = u16::from_be_bytes([tail[0], tail[1]]);
    let len = u16::from_be_bytes([tail[2], tail[3]]) as usize;
    if AttrType(attr) != AttrType::AUTHENTICATOR || len != 8 {
        return Err(ParseError::MissingAttribute(AttrType::AUTHENTICATOR));
    }
    Ok((covered, &tail[ATTR_HEADER_LEN..]))
}
