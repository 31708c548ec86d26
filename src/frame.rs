/*!
 * 802.11 / EAPOL / EAP-WSC framing
 *
 * Frames handed to and returned by a transport are bare 802.11 frames.
 * Radiotap is handled at the capture boundary (see `strip_radiotap` and
 * `with_radiotap`).
 *
 * Layering of a WPS registration message:
 *
 * ```text
 * 802.11 data | LLC/SNAP (88 8E) | EAPOL (type 0) | EAP | expanded type 254
 *   | Vendor-Id 00 37 2A | Vendor-Type 1 | Op-Code | Flags | WSC attributes
 * ```
 */

use crate::error::ParseError;
use crate::target::MacAddr;

/// LLC/SNAP header announcing an EAPOL (802.1X) payload
pub const LLC_SNAP_EAPOL: [u8; 8] = [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8E];

/// Radiotap header with no fields (version 0, length 8)
pub const RADIOTAP_HEADER: [u8; 8] = [0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Wi-Fi Alliance SMI vendor id used by the EAP-WSC expanded type
pub const WFA_VENDOR_ID: [u8; 3] = [0x00, 0x37, 0x2A];
pub const WFA_VENDOR_TYPE_SIMPLECONFIG: u32 = 1;

/// Microsoft OUI + type 4 marks the WPS vendor IE
pub const WPS_IE_OUI: [u8; 4] = [0x00, 0x50, 0xF2, 0x04];

pub const ENROLLEE_IDENTITY: &str = "WFA-SimpleConfig-Enrollee-1-0";

const EAPOL_VERSION: u8 = 1;
const EAP_TYPE_IDENTITY: u8 = 1;
const EAP_TYPE_EXPANDED: u8 = 254;

const IE_SSID: u8 = 0;
const IE_SUPPORTED_RATES: u8 = 1;
const IE_DS_PARAMS: u8 = 3;
const IE_HT_OPERATION: u8 = 61;
const IE_VENDOR: u8 = 221;

const DOT11_HEADER_LEN: usize = 24;

/// 802.11 frame kinds the attack cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    AssociationRequest,
    AssociationResponse,
    ProbeRequest,
    ProbeResponse,
    Beacon,
    Disassociation,
    Authentication,
    Deauthentication,
    Data,
    Other,
}

impl FrameKind {
    fn from_fc(fc: u8) -> Self {
        let f_type = (fc >> 2) & 0x3;
        let f_subtype = (fc >> 4) & 0xF;
        match (f_type, f_subtype) {
            (0, 0) => Self::AssociationRequest,
            (0, 1) => Self::AssociationResponse,
            (0, 4) => Self::ProbeRequest,
            (0, 5) => Self::ProbeResponse,
            (0, 8) => Self::Beacon,
            (0, 10) => Self::Disassociation,
            (0, 11) => Self::Authentication,
            (0, 12) => Self::Deauthentication,
            (2, _) => Self::Data,
            _ => Self::Other,
        }
    }

    /// Length of the fixed parameters preceding the IEs of a management body
    fn fixed_params_len(self) -> usize {
        match self {
            Self::Beacon | Self::ProbeResponse => 12,
            Self::AssociationRequest => 4,
            Self::AssociationResponse | Self::Authentication => 6,
            _ => 0,
        }
    }
}

/// Borrowed view over a bare 802.11 frame
#[derive(Debug, Clone, Copy)]
pub struct Dot11Frame<'a> {
    pub kind: FrameKind,
    pub to_ds: bool,
    pub from_ds: bool,
    pub protected: bool,
    pub addr1: MacAddr,
    pub addr2: MacAddr,
    pub addr3: MacAddr,
    pub body: &'a [u8],
}

impl<'a> Dot11Frame<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < DOT11_HEADER_LEN {
            return Err(ParseError::Truncated("802.11 header"));
        }

        let fc0 = data[0];
        let fc1 = data[1];
        let kind = FrameKind::from_fc(fc0);
        let to_ds = fc1 & 0x01 != 0;
        let from_ds = fc1 & 0x02 != 0;
        let protected = fc1 & 0x40 != 0;

        // Bridged frames (both DS bits) are never sent to or by an AP we talk to
        if to_ds && from_ds {
            return Err(ParseError::NotWps);
        }

        // QoS data subtypes carry a 2-byte QoS control field
        let mut header_len = DOT11_HEADER_LEN;
        if kind == FrameKind::Data && (fc0 >> 4) & 0x8 != 0 {
            header_len += 2;
        }
        if data.len() < header_len {
            return Err(ParseError::Truncated("802.11 header"));
        }

        let mac_at = |offset: usize| MacAddr::from_slice(&data[offset..offset + 6]);
        let (addr1, addr2, addr3) = match (mac_at(4), mac_at(10), mac_at(16)) {
            (Some(a1), Some(a2), Some(a3)) => (a1, a2, a3),
            _ => return Err(ParseError::Truncated("802.11 addresses")),
        };

        Ok(Self {
            kind,
            to_ds,
            from_ds,
            protected,
            addr1,
            addr2,
            addr3,
            body: &data[header_len..],
        })
    }

    /// BSSID according to the DS bits
    pub fn bssid(&self) -> MacAddr {
        match (self.to_ds, self.from_ds) {
            (true, false) => self.addr1,
            (false, true) => self.addr2,
            _ => self.addr3,
        }
    }

    /// Information elements of a management frame
    pub fn elements(&self) -> InformationElements<'a> {
        let skip = self.kind.fixed_params_len().min(self.body.len());
        InformationElements::new(&self.body[skip..])
    }

    /// Status code of an authentication or association response
    pub fn status_code(&self) -> Option<u16> {
        let offset = match self.kind {
            FrameKind::Authentication => 4,
            FrameKind::AssociationResponse => 2,
            _ => return None,
        };
        let bytes = self.body.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Authentication transaction sequence number
    pub fn auth_sequence(&self) -> Option<u16> {
        if self.kind != FrameKind::Authentication {
            return None;
        }
        let bytes = self.body.get(2..4)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

/// Iterator over tagged information elements
#[derive(Debug, Clone)]
pub struct InformationElements<'a> {
    data: &'a [u8],
}

impl<'a> InformationElements<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn ssid(&self) -> Option<String> {
        self.clone()
            .find(|(id, _)| *id == IE_SSID)
            .and_then(|(_, value)| std::str::from_utf8(value).ok())
            .filter(|s| !s.is_empty() && !s.bytes().all(|b| b == 0))
            .map(|s| s.to_string())
    }

    /// Channel from the DS parameter set, falling back to HT operation
    pub fn channel(&self) -> Option<u8> {
        let ds = self
            .clone()
            .find(|(id, value)| *id == IE_DS_PARAMS && !value.is_empty())
            .map(|(_, value)| value[0]);
        ds.or_else(|| {
            self.clone()
                .find(|(id, value)| *id == IE_HT_OPERATION && !value.is_empty())
                .map(|(_, value)| value[0])
        })
    }

    /// Concatenated WSC attributes of every WPS vendor IE
    pub fn wps_attributes(&self) -> Option<Vec<u8>> {
        let mut out: Option<Vec<u8>> = None;
        for (id, value) in self.clone() {
            if id == IE_VENDOR && value.len() >= 4 && value[..4] == WPS_IE_OUI {
                out.get_or_insert_with(Vec::new)
                    .extend_from_slice(&value[4..]);
            }
        }
        out
    }
}

impl<'a> Iterator for InformationElements<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 2 {
            return None;
        }
        let id = self.data[0];
        let len = self.data[1] as usize;
        if self.data.len() < 2 + len {
            self.data = &[];
            return None;
        }
        let value = &self.data[2..2 + len];
        self.data = &self.data[2 + len..];
        Some((id, value))
    }
}

/// EAPOL packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EapolType {
    EapPacket,
    Start,
    Logoff,
    Key,
    Other(u8),
}

impl EapolType {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::EapPacket,
            1 => Self::Start,
            2 => Self::Logoff,
            3 => Self::Key,
            other => Self::Other(other),
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::EapPacket => 0,
            Self::Start => 1,
            Self::Logoff => 2,
            Self::Key => 3,
            Self::Other(v) => v,
        }
    }
}

/// EAPOL frame carried in a data frame body (after LLC/SNAP)
#[derive(Debug, Clone, Copy)]
pub struct Eapol<'a> {
    pub packet_type: EapolType,
    pub body: &'a [u8],
}

impl<'a> Eapol<'a> {
    /// Parse from a data frame body starting with LLC/SNAP
    pub fn parse(llc_data: &'a [u8]) -> Result<Self, ParseError> {
        if llc_data.len() < LLC_SNAP_EAPOL.len() || llc_data[..8] != LLC_SNAP_EAPOL {
            return Err(ParseError::NotWps);
        }
        let eapol = &llc_data[8..];
        if eapol.len() < 4 {
            return Err(ParseError::Truncated("EAPOL header"));
        }
        let body_len = u16::from_be_bytes([eapol[2], eapol[3]]) as usize;
        if eapol.len() < 4 + body_len {
            return Err(ParseError::Truncated("EAPOL body"));
        }
        Ok(Self {
            packet_type: EapolType::from_u8(eapol[1]),
            // Trailing padding past the declared length is dropped
            body: &eapol[4..4 + body_len],
        })
    }
}

/// EAP codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EapCode {
    Request,
    Response,
    Success,
    Failure,
}

impl EapCode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Success),
            4 => Some(Self::Failure),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Request => 1,
            Self::Response => 2,
            Self::Success => 3,
            Self::Failure => 4,
        }
    }
}

/// EAP-WSC op-codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WscOpcode {
    Start,
    Ack,
    Nack,
    Msg,
    Done,
    FragAck,
}

impl WscOpcode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Start),
            0x02 => Some(Self::Ack),
            0x03 => Some(Self::Nack),
            0x04 => Some(Self::Msg),
            0x05 => Some(Self::Done),
            0x06 => Some(Self::FragAck),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Start => 0x01,
            Self::Ack => 0x02,
            Self::Nack => 0x03,
            Self::Msg => 0x04,
            Self::Done => 0x05,
            Self::FragAck => 0x06,
        }
    }
}

/// Decoded EAP payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EapData<'a> {
    None,
    Identity(&'a [u8]),
    Wsc {
        opcode: WscOpcode,
        flags: u8,
        message: &'a [u8],
    },
    Other(u8),
}

#[derive(Debug, Clone, Copy)]
pub struct EapPacket<'a> {
    pub code: EapCode,
    pub id: u8,
    pub data: EapData<'a>,
}

impl<'a> EapPacket<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < 4 {
            return Err(ParseError::Truncated("EAP header"));
        }
        let code = EapCode::from_u8(data[0]).ok_or(ParseError::NotWps)?;
        let id = data[1];
        let len = u16::from_be_bytes([data[2], data[3]]) as usize;
        if len < 4 || data.len() < len {
            return Err(ParseError::Truncated("EAP packet"));
        }
        let data = &data[..len];

        if matches!(code, EapCode::Success | EapCode::Failure) || len == 4 {
            return Ok(Self {
                code,
                id,
                data: EapData::None,
            });
        }

        let payload = &data[5..];
        let eap_data = match data[4] {
            EAP_TYPE_IDENTITY => EapData::Identity(payload),
            EAP_TYPE_EXPANDED => {
                // Vendor-Id (3) | Vendor-Type (4) | Op-Code (1) | Flags (1)
                if payload.len() < 9 {
                    return Err(ParseError::Truncated("EAP-WSC header"));
                }
                let vendor_type =
                    u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]);
                if payload[..3] != WFA_VENDOR_ID || vendor_type != WFA_VENDOR_TYPE_SIMPLECONFIG {
                    return Err(ParseError::NotWps);
                }
                let opcode = WscOpcode::from_u8(payload[7]).ok_or(ParseError::NotWps)?;
                let flags = payload[8];
                // Length field (flag 0x02) precedes the message when present
                let message = if flags & 0x02 != 0 {
                    payload
                        .get(11..)
                        .ok_or(ParseError::Truncated("EAP-WSC length"))?
                } else {
                    &payload[9..]
                };
                EapData::Wsc {
                    opcode,
                    flags,
                    message,
                }
            }
            other => EapData::Other(other),
        };

        Ok(Self {
            code,
            id,
            data: eap_data,
        })
    }
}

/// Something addressed to the local station by the target AP
#[derive(Debug, Clone, Copy)]
pub enum Inbound<'a> {
    Eap(EapPacket<'a>),
    Deauthenticated,
    Management(Dot11Frame<'a>),
}

/// Filter a received frame down to traffic from `bssid` addressed to `local`.
///
/// Returns `Ok(None)` for unrelated traffic, `Err` when a frame from the AP
/// claims to carry EAP but does not decode.
pub fn classify<'a>(
    raw: &'a [u8],
    bssid: MacAddr,
    local: MacAddr,
) -> Result<Option<Inbound<'a>>, ParseError> {
    let frame = match Dot11Frame::parse(raw) {
        Ok(frame) => frame,
        Err(_) => return Ok(None),
    };
    if frame.addr2 != bssid || (frame.addr1 != local && frame.addr1 != MacAddr::BROADCAST) {
        return Ok(None);
    }

    match frame.kind {
        FrameKind::Data => {
            if frame.protected || !frame.from_ds {
                return Ok(None);
            }
            let eapol = match Eapol::parse(frame.body) {
                Ok(eapol) => eapol,
                Err(ParseError::NotWps) => return Ok(None),
                Err(e) => return Err(e),
            };
            if eapol.packet_type != EapolType::EapPacket {
                return Ok(None);
            }
            Ok(Some(Inbound::Eap(EapPacket::parse(eapol.body)?)))
        }
        FrameKind::Deauthentication | FrameKind::Disassociation if frame.addr1 == local => {
            Ok(Some(Inbound::Deauthenticated))
        }
        _ => Ok(Some(Inbound::Management(frame))),
    }
}

fn push_header(
    out: &mut Vec<u8>,
    fc: [u8; 2],
    addr1: &MacAddr,
    addr2: &MacAddr,
    addr3: &MacAddr,
    seq: u16,
) {
    out.extend_from_slice(&fc);
    out.extend_from_slice(&[0x3A, 0x01]); // Duration
    out.extend_from_slice(addr1.octets());
    out.extend_from_slice(addr2.octets());
    out.extend_from_slice(addr3.octets());
    out.extend_from_slice(&((seq & 0x0FFF) << 4).to_le_bytes());
}

/// EAPOL frame (without LLC/SNAP)
pub fn eapol(packet_type: EapolType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.push(EAPOL_VERSION);
    out.push(packet_type.as_u8());
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub fn eapol_start() -> Vec<u8> {
    eapol(EapolType::Start, &[])
}

/// Data frame from a station to the AP carrying an EAPOL payload
pub fn data_to_ap(bssid: &MacAddr, src: &MacAddr, seq: u16, eapol: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(DOT11_HEADER_LEN + 8 + eapol.len());
    push_header(&mut out, [0x08, 0x01], bssid, src, bssid, seq);
    out.extend_from_slice(&LLC_SNAP_EAPOL);
    out.extend_from_slice(eapol);
    out
}

/// Data frame from the AP to a station carrying an EAPOL payload
pub fn data_from_ap(bssid: &MacAddr, dst: &MacAddr, seq: u16, eapol: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(DOT11_HEADER_LEN + 8 + eapol.len());
    push_header(&mut out, [0x08, 0x02], dst, bssid, bssid, seq);
    out.extend_from_slice(&LLC_SNAP_EAPOL);
    out.extend_from_slice(eapol);
    out
}

fn eap_header(code: EapCode, id: u8, payload_len: usize) -> Vec<u8> {
    let total = 4 + payload_len;
    let mut out = Vec::with_capacity(total);
    out.push(code.as_u8());
    out.push(id);
    out.extend_from_slice(&(total as u16).to_be_bytes());
    out
}

pub fn eap_identity(code: EapCode, id: u8, identity: &[u8]) -> Vec<u8> {
    let mut out = eap_header(code, id, 1 + identity.len());
    out.push(EAP_TYPE_IDENTITY);
    out.extend_from_slice(identity);
    out
}

/// EAP packet with the WSC expanded type
pub fn eap_wsc(code: EapCode, id: u8, opcode: WscOpcode, message: &[u8]) -> Vec<u8> {
    let mut out = eap_header(code, id, 1 + 3 + 4 + 2 + message.len());
    out.push(EAP_TYPE_EXPANDED);
    out.extend_from_slice(&WFA_VENDOR_ID);
    out.extend_from_slice(&WFA_VENDOR_TYPE_SIMPLECONFIG.to_be_bytes());
    out.push(opcode.as_u8());
    out.push(0x00); // Flags
    out.extend_from_slice(message);
    out
}

pub fn eap_failure(id: u8) -> Vec<u8> {
    eap_header(EapCode::Failure, id, 0)
}

fn push_ie(out: &mut Vec<u8>, id: u8, value: &[u8]) {
    out.push(id);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
}

/// WPS vendor IE(s); attributes longer than one IE are split
pub fn wps_ie(attributes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(attributes.len() + 8);
    for chunk in attributes.chunks(251) {
        let mut value = Vec::with_capacity(4 + chunk.len());
        value.extend_from_slice(&WPS_IE_OUI);
        value.extend_from_slice(chunk);
        push_ie(&mut out, IE_VENDOR, &value);
    }
    out
}

const RATES: [u8; 8] = [0x82, 0x84, 0x8B, 0x96, 0x0C, 0x12, 0x18, 0x24];

/// Broadcast (or directed, with `ssid`) probe request
pub fn probe_request(src: &MacAddr, ssid: Option<&str>, wps_attrs: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    push_header(
        &mut out,
        [0x40, 0x00],
        &MacAddr::BROADCAST,
        src,
        &MacAddr::BROADCAST,
        0,
    );
    push_ie(&mut out, IE_SSID, ssid.unwrap_or("").as_bytes());
    push_ie(&mut out, IE_SUPPORTED_RATES, &RATES);
    if !wps_attrs.is_empty() {
        out.extend_from_slice(&wps_ie(wps_attrs));
    }
    out
}

fn beacon_like(
    fc: [u8; 2],
    dst: &MacAddr,
    bssid: &MacAddr,
    ssid: &str,
    channel: u8,
    wps_attrs: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    push_header(&mut out, fc, dst, bssid, bssid, 0);
    out.extend_from_slice(&[0u8; 8]); // Timestamp
    out.extend_from_slice(&100u16.to_le_bytes()); // Beacon interval
    out.extend_from_slice(&0x0411u16.to_le_bytes()); // ESS | Privacy | Short slot
    push_ie(&mut out, IE_SSID, ssid.as_bytes());
    push_ie(&mut out, IE_SUPPORTED_RATES, &RATES);
    push_ie(&mut out, IE_DS_PARAMS, &[channel]);
    if !wps_attrs.is_empty() {
        out.extend_from_slice(&wps_ie(wps_attrs));
    }
    out
}

pub fn beacon(bssid: &MacAddr, ssid: &str, channel: u8, wps_attrs: &[u8]) -> Vec<u8> {
    beacon_like(
        [0x80, 0x00],
        &MacAddr::BROADCAST,
        bssid,
        ssid,
        channel,
        wps_attrs,
    )
}

pub fn probe_response(
    bssid: &MacAddr,
    dst: &MacAddr,
    ssid: &str,
    channel: u8,
    wps_attrs: &[u8],
) -> Vec<u8> {
    beacon_like([0x50, 0x00], dst, bssid, ssid, channel, wps_attrs)
}

/// Open-system authentication frame
pub fn authentication(
    dst: &MacAddr,
    src: &MacAddr,
    bssid: &MacAddr,
    transaction: u16,
    status: u16,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(30);
    push_header(&mut out, [0xB0, 0x00], dst, src, bssid, 0);
    out.extend_from_slice(&0u16.to_le_bytes()); // Open system
    out.extend_from_slice(&transaction.to_le_bytes());
    out.extend_from_slice(&status.to_le_bytes());
    out
}

pub fn association_request(
    bssid: &MacAddr,
    src: &MacAddr,
    ssid: &str,
    wps_attrs: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(96);
    push_header(&mut out, [0x00, 0x00], bssid, src, bssid, 0);
    out.extend_from_slice(&0x0431u16.to_le_bytes()); // Capabilities
    out.extend_from_slice(&10u16.to_le_bytes()); // Listen interval
    push_ie(&mut out, IE_SSID, ssid.as_bytes());
    push_ie(&mut out, IE_SUPPORTED_RATES, &RATES);
    out.extend_from_slice(&wps_ie(wps_attrs));
    out
}

pub fn association_response(bssid: &MacAddr, dst: &MacAddr, status: u16, aid: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(40);
    push_header(&mut out, [0x10, 0x00], dst, bssid, bssid, 0);
    out.extend_from_slice(&0x0411u16.to_le_bytes());
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(&(aid | 0xC000).to_le_bytes());
    push_ie(&mut out, IE_SUPPORTED_RATES, &RATES);
    out
}

pub fn deauthentication(dst: &MacAddr, src: &MacAddr, bssid: &MacAddr, reason: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(26);
    push_header(&mut out, [0xC0, 0x00], dst, src, bssid, 0);
    out.extend_from_slice(&reason.to_le_bytes());
    out
}

/// Remove the radiotap header (and a trailing FCS when flagged)
pub fn strip_radiotap(data: &[u8]) -> Option<&[u8]> {
    if data.len() < 8 || data[0] != 0 {
        return None;
    }
    let radiotap_len = u16::from_le_bytes([data[2], data[3]]) as usize;
    if radiotap_len < 8 || data.len() < radiotap_len {
        return None;
    }

    // Walk the present bitmaps to reach the Flags field
    let mut present_end = 4;
    loop {
        let word = data.get(present_end..present_end + 4)?;
        present_end += 4;
        if word[3] & 0x80 == 0 {
            break;
        }
    }
    let present = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    let mut offset = present_end;
    if present & 0x01 != 0 {
        // TSFT, 8-byte aligned
        offset = (offset + 7) & !7;
        offset += 8;
    }
    let has_fcs = present & 0x02 != 0
        && offset < radiotap_len
        && data[offset] & 0x10 != 0;

    let frame = &data[radiotap_len..];
    if has_fcs && frame.len() >= 4 {
        Some(&frame[..frame.len() - 4])
    } else {
        Some(frame)
    }
}

/// Prepend the minimal radiotap header expected by monitor-mode injection
pub fn with_radiotap(frame: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(RADIOTAP_HEADER.len() + frame.len());
    packet.extend_from_slice(&RADIOTAP_HEADER);
    packet.extend_from_slice(frame);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ap() -> MacAddr {
        "00:90:4C:C1:AC:21".parse().unwrap()
    }

    fn sta() -> MacAddr {
        "02:11:22:33:44:55".parse().unwrap()
    }

    #[test]
    fn test_eap_wsc_through_data_frame() {
        let message = [0x10, 0x4A, 0x00, 0x01, 0x10];
        let eap = eap_wsc(EapCode::Request, 7, WscOpcode::Msg, &message);
        let raw = data_from_ap(&ap(), &sta(), 3, &eapol(EapolType::EapPacket, &eap));

        match classify(&raw, ap(), sta()).unwrap() {
            Some(Inbound::Eap(packet)) => {
                assert_eq!(packet.code, EapCode::Request);
                assert_eq!(packet.id, 7);
                assert_eq!(
                    packet.data,
                    EapData::Wsc {
                        opcode: WscOpcode::Msg,
                        flags: 0,
                        message: &message
                    }
                );
            }
            other => panic!("unexpected {:?}", other),
        }

        // Same frame is ignored when addressed to another station
        let other: MacAddr = "02:00:00:00:00:01".parse().unwrap();
        assert!(classify(&raw, ap(), other).unwrap().is_none());
    }

    #[test]
    fn test_station_frame_layout() {
        let raw = data_to_ap(&ap(), &sta(), 1, &eapol_start());
        let frame = Dot11Frame::parse(&raw).unwrap();
        assert_eq!(frame.kind, FrameKind::Data);
        assert!(frame.to_ds);
        assert_eq!(frame.bssid(), ap());
        assert_eq!(frame.addr2, sta());

        let eapol = Eapol::parse(frame.body).unwrap();
        assert_eq!(eapol.packet_type, EapolType::Start);
        assert!(eapol.body.is_empty());
    }

    #[test]
    fn test_identity_and_failure() {
        let identity = eap_identity(EapCode::Response, 2, ENROLLEE_IDENTITY.as_bytes());
        let packet = EapPacket::parse(&identity).unwrap();
        assert_eq!(packet.code, EapCode::Response);
        assert_eq!(
            packet.data,
            EapData::Identity(ENROLLEE_IDENTITY.as_bytes())
        );

        let failure = eap_failure(9);
        let packet = EapPacket::parse(&failure).unwrap();
        assert_eq!(packet.code, EapCode::Failure);
        assert_eq!(packet.data, EapData::None);
    }

    #[test]
    fn test_beacon_elements() {
        let wps = crate::wsc::AttrWriter::message(crate::wsc::MessageType::Beacon).finish();
        let raw = beacon(&ap(), "TestNet", 6, &wps);
        let frame = Dot11Frame::parse(&raw).unwrap();
        assert_eq!(frame.kind, FrameKind::Beacon);
        assert_eq!(frame.bssid(), ap());

        let ies = frame.elements();
        assert_eq!(ies.ssid().as_deref(), Some("TestNet"));
        assert_eq!(ies.channel(), Some(6));
        assert_eq!(ies.wps_attributes(), Some(wps));
    }

    #[test]
    fn test_long_wps_attributes_split_across_ies() {
        let attrs = vec![0x42u8; 600];
        let ies = wps_ie(&attrs);
        let parsed = InformationElements::new(&ies).wps_attributes().unwrap();
        assert_eq!(parsed, attrs);
        assert_eq!(InformationElements::new(&ies).count(), 3);
    }

    #[test]
    fn test_truncated_eapol_from_ap_is_error() {
        let mut raw = data_from_ap(&ap(), &sta(), 0, &[]);
        raw.extend_from_slice(&[0x01, 0x00, 0x00, 0x20, 0x01]);
        assert!(classify(&raw, ap(), sta()).is_err());
    }

    #[test]
    fn test_radiotap_roundtrip_and_fcs() {
        let frame = deauthentication(&sta(), &ap(), &ap(), 7);
        let packet = with_radiotap(&frame);
        assert_eq!(strip_radiotap(&packet), Some(&frame[..]));

        // Flags field present with FCS bit set
        let mut with_fcs = vec![0x00, 0x00, 0x09, 0x00, 0x02, 0x00, 0x00, 0x00, 0x10];
        with_fcs.extend_from_slice(&frame);
        with_fcs.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(strip_radiotap(&with_fcs), Some(&frame[..]));

        assert_eq!(strip_radiotap(&[0x00, 0x00]), None);
    }

    #[test]
    fn test_deauth_classified() {
        let raw = deauthentication(&sta(), &ap(), &ap(), 3);
        assert!(matches!(
            classify(&raw, ap(), sta()).unwrap(),
            Some(Inbound::Deauthenticated)
        ));
    }
}
