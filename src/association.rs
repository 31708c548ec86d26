/*!
 * Finding and joining the target AP
 *
 * - Discovery: probe for the BSSID (hopping channels if needed) and learn
 *   its ESSID, channel and WPS lock state from the reply.
 * - Association: open system authentication, then an association request
 *   carrying a WPS IE, which is all an AP needs before EAPOL-Start.
 */

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ChannelPlan;
use crate::error::{RecvError, RunFailure};
use crate::frame::{self, FrameKind, Inbound};
use crate::target::{AccessPointInfo, MacAddr};
use crate::transport::{CancelToken, FrameTransport};
use crate::wsc::{AttrType, AttrWriter, Attributes, WSC_VERSION};

/// How long to listen on one channel for the AP
pub const DEFAULT_DWELL: Duration = Duration::from_millis(300);

/// Rounds between two "still searching" log lines
const DISCOVERY_REPORT_EVERY: u32 = 10;

/// WPS IE of an enrollee looking for a registrar
fn enrollee_wps_attributes() -> Vec<u8> {
    let mut w = AttrWriter::new();
    w.put_u8(AttrType::VERSION, WSC_VERSION)
        .put_u8(AttrType::REQUEST_TYPE, 0x01)
        .put_u16(AttrType::CONFIG_METHODS, 0x0188)
        .put_u16(AttrType::DEVICE_PASSWORD_ID, 0x0000);
    w.finish()
}

fn recv_error(e: RecvError) -> Option<RunFailure> {
    match e {
        RecvError::Timeout => None,
        RecvError::Cancelled => Some(RunFailure::Cancelled),
        RecvError::Transport(e) => Some(RunFailure::Transport(e)),
    }
}

/// Learn what a beacon or probe response says about the AP
fn learn(ap: &mut AccessPointInfo, frame: &frame::Dot11Frame<'_>, tuned: u8) {
    let elements = frame.elements();
    if ap.essid.is_none() {
        ap.essid = elements.ssid();
    }
    ap.channel = Some(elements.channel().unwrap_or(tuned));
    if let Some(wps) = elements.wps_attributes() {
        ap.locked = Attributes::parse(&wps)
            .map(|attrs| attrs.setup_locked())
            .unwrap_or(false);
    }
}

/// Probe for the AP and fill in `ap`.
///
/// With a fixed channel only that channel is scanned. When hopping, a
/// previously known channel is tried first, then the band's channel list.
/// Each round sends one request per channel and listens for `dwell` for the
/// AP's response or beacon. Rounds repeat until the AP is heard, `cancel` fires,
/// or `rounds` (when set) is used up.
pub fn discover<T: FrameTransport + ?Sized>(
    transport: &mut T,
    ap: &mut AccessPointInfo,
    local: MacAddr,
    plan: ChannelPlan,
    dwell: Duration,
    rounds: Option<u32>,
    cancel: &CancelToken,
) -> Result<(), RunFailure> {
    let channels: Vec<u8> = match plan {
        ChannelPlan::Fixed(ch) => vec![ch],
        ChannelPlan::Hopping(band) => ap
            .channel
            .into_iter()
            .chain(band.channels().iter().copied())
            .collect(),
    };
    let request = frame::probe_request(&local, ap.essid.as_deref(), &enrollee_wps_attributes());

    let mut round = 0u32;
    while rounds.map_or(true, |max| round < max) {
        round += 1;
        if round > 1 && round % DISCOVERY_REPORT_EVERY == 1 {
            info!(bssid = %ap.bssid, rounds = round - 1, "Still waiting for the AP");
        }
        for &channel in &channels {
            if scan_channel(transport, ap, local, channel, &request, dwell, cancel)? {
                info!(ap = %ap, locked = ap.locked, "Target found");
                return Ok(());
            }
        }
    }

    Err(RunFailure::ApNotFound(ap.bssid.to_string()))
}

/// Ask once on `channel`; true when the AP answered or beaconed
fn scan_channel<T: FrameTransport + ?Sized>(
    transport: &mut T,
    ap: &mut AccessPointInfo,
    local: MacAddr,
    channel: u8,
    request: &[u8],
    dwell: Duration,
    cancel: &CancelToken,
) -> Result<bool, RunFailure> {
    if cancel.is_cancelled() {
        return Err(RunFailure::Cancelled);
    }
    transport.set_channel(channel)?;
    debug!(channel, "Scanning");
    transport.send(request)?;

    let deadline = Instant::now() + dwell;
    loop {
        let raw = match transport.receive(deadline, cancel) {
            Ok(raw) => raw,
            Err(e) => match recv_error(e) {
                Some(failure) => return Err(failure),
                None => return Ok(false),
            },
        };
        let Ok(Some(Inbound::Management(frame))) = frame::classify(&raw, ap.bssid, local) else {
            continue;
        };
        if !matches!(frame.kind, FrameKind::Beacon | FrameKind::ProbeResponse) {
            continue;
        }
        learn(ap, &frame, channel);
        if let Some(found) = ap.channel {
            if found != channel {
                transport.set_channel(found)?;
            }
        }
        return Ok(true);
    }
}

/// Wait for a management frame of `kind` from the AP and return its status code
fn await_response<T: FrameTransport + ?Sized>(
    transport: &mut T,
    ap: &AccessPointInfo,
    local: MacAddr,
    kind: FrameKind,
    deadline: Instant,
    cancel: &CancelToken,
) -> Result<Option<u16>, RunFailure> {
    loop {
        let raw = match transport.receive(deadline, cancel) {
            Ok(raw) => raw,
            Err(e) => match recv_error(e) {
                Some(failure) => return Err(failure),
                None => return Ok(None),
            },
        };
        let Ok(Some(Inbound::Management(frame))) = frame::classify(&raw, ap.bssid, local) else {
            continue;
        };
        if frame.kind != kind || frame.addr1 != local {
            continue;
        }
        if kind == FrameKind::Authentication && frame.auth_sequence() != Some(2) {
            continue;
        }
        return Ok(frame.status_code());
    }
}

/// Authenticate (open system) and associate with the AP.
///
/// Returns `Ok(false)` when the AP does not answer within `timeout` or
/// refuses either step.
pub fn associate<T: FrameTransport + ?Sized>(
    transport: &mut T,
    ap: &AccessPointInfo,
    local: MacAddr,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<bool, RunFailure> {
    transport.send(&frame::authentication(&ap.bssid, &local, &ap.bssid, 1, 0))?;
    match await_response(transport, ap, local, FrameKind::Authentication, Instant::now() + timeout, cancel)? {
        Some(0) => {}
        Some(status) => {
            warn!(status, "Authentication refused");
            return Ok(false);
        }
        None => {
            debug!("No authentication response");
            return Ok(false);
        }
    }

    let essid = ap.essid.as_deref().unwrap_or("");
    transport.send(&frame::association_request(
        &ap.bssid,
        &local,
        essid,
        &enrollee_wps_attributes(),
    ))?;
    match await_response(
        transport,
        ap,
        local,
        FrameKind::AssociationResponse,
        Instant::now() + timeout,
        cancel,
    )? {
        Some(0) => {
            debug!(ap = %ap, "Associated");
            Ok(true)
        }
        Some(status) => {
            warn!(status, "Association refused");
            Ok(false)
        }
        None => {
            debug!("No association response");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Band;
    use crate::pin::PinCandidate;
    use crate::transport::{ApBehavior, ScriptedAp};

    fn bssid() -> MacAddr {
        "00:90:4C:C1:AC:21".parse().unwrap()
    }

    fn local() -> MacAddr {
        "02:00:00:00:00:01".parse().unwrap()
    }

    fn scripted(channel: u8) -> ScriptedAp {
        ScriptedAp::new(
            bssid(),
            "TestNet",
            channel,
            PinCandidate::parse("12345670").unwrap(),
            "hunter2moresecret",
        )
    }

    #[test]
    fn test_discover_hops_to_ap_channel() {
        let mut sim = scripted(6);
        let mut ap = AccessPointInfo::new(bssid());
        discover(
            &mut sim,
            &mut ap,
            local(),
            ChannelPlan::Hopping(Band::TwoGhz),
            Duration::from_millis(20),
            Some(2),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(ap.essid.as_deref(), Some("TestNet"));
        assert_eq!(ap.channel, Some(6));
        assert!(!ap.locked);
    }

    #[test]
    fn test_discover_fixed_wrong_channel() {
        let mut sim = scripted(11);
        let mut ap = AccessPointInfo::new(bssid());
        let err = discover(
            &mut sim,
            &mut ap,
            local(),
            ChannelPlan::Fixed(1),
            Duration::from_millis(20),
            Some(3),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RunFailure::ApNotFound(_)));
    }

    #[test]
    fn test_discover_sees_lock() {
        let mut sim = scripted(1).with_behavior(ApBehavior {
            lock_after: Some(0),
            lock_sessions: 1,
            ..ApBehavior::default()
        });
        // Lock state follows started sessions
        let start = frame::data_to_ap(&bssid(), &local(), 0, &frame::eapol_start());
        sim.send(&start).unwrap();

        let mut ap = AccessPointInfo::new(bssid());
        discover(
            &mut sim,
            &mut ap,
            local(),
            ChannelPlan::Fixed(1),
            Duration::from_millis(20),
            Some(1),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(ap.locked);
    }

    #[test]
    fn test_discover_survives_lost_requests() {
        let mut sim = scripted(6).with_behavior(ApBehavior {
            drop_scans: 3,
            ..ApBehavior::default()
        });
        let mut ap = AccessPointInfo::new(bssid());
        discover(
            &mut sim,
            &mut ap,
            local(),
            ChannelPlan::Fixed(6),
            Duration::from_millis(20),
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(ap.essid.as_deref(), Some("TestNet"));
        assert_eq!(sim.scans_received(), 4);
    }

    #[test]
    fn test_discover_without_limit_stops_on_cancel() {
        let mut sim = scripted(11);
        let mut ap = AccessPointInfo::new(bssid());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = discover(
            &mut sim,
            &mut ap,
            local(),
            ChannelPlan::Fixed(1),
            Duration::from_millis(20),
            None,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, RunFailure::Cancelled));
    }

    #[test]
    fn test_associate() {
        let mut sim = scripted(6);
        let ap = AccessPointInfo::new(bssid()).with_essid("TestNet").with_channel(6);
        let ok = associate(&mut sim, &ap, local(), Duration::from_millis(50), &CancelToken::new()).unwrap();
        assert!(ok);

        // Off channel: nobody answers
        sim.set_channel(1).unwrap();
        let ok = associate(&mut sim, &ap, local(), Duration::from_millis(20), &CancelToken::new()).unwrap();
        assert!(!ok);
    }
}
