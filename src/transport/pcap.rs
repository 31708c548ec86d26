/*!
 * Monitor-mode transport over libpcap
 */

use std::time::Instant;

use pcap::{Active, Capture, Linktype};
use tracing::{debug, info, warn};

use super::{CancelToken, FrameTransport, POLL_INTERVAL};
use crate::error::{RecvError, TransportError};
use crate::frame;
use crate::platform;
use crate::target::MacAddr;

/// Raw 802.11 link on a monitor-mode interface
pub struct PcapTransport {
    interface: String,
    cap: Capture<Active>,
    channel: Option<u8>,
    radiotap: bool,
}

impl PcapTransport {
    /// Open `interface` in monitor mode and filter on traffic from `bssid`
    pub fn open(interface: &str, bssid: &MacAddr) -> Result<Self, TransportError> {
        let mut cap_builder = Capture::from_device(interface)
            .map_err(|e| TransportError::Device(format!("failed to find device: {}", e)))?
            .promisc(true)
            .immediate_mode(true);

        #[cfg(not(target_os = "windows"))]
        {
            cap_builder = cap_builder.rfmon(true);
        }

        let mut cap = cap_builder
            .timeout(POLL_INTERVAL.as_millis() as i32)
            .snaplen(4096)
            .open()
            .map_err(|e| TransportError::Device(format!("failed to open capture device: {}", e)))?;

        // Prefer radiotap framing; plain 802.11 also works
        if cap.get_datalink() != Linktype::IEEE802_11_RADIOTAP {
            if let Err(e) = cap.set_datalink(Linktype::IEEE802_11_RADIOTAP) {
                debug!(error = %e, "Radiotap link type not available");
            }
        }
        let radiotap = cap.get_datalink() == Linktype::IEEE802_11_RADIOTAP;

        let mac = bssid.to_string().to_lowercase();
        let filter = format!(
            "wlan addr1 {mac} or wlan addr2 {mac} or wlan addr3 {mac}",
            mac = mac
        );
        if let Err(e) = cap.filter(&filter, true) {
            warn!(error = %e, "BPF filter rejected, filtering in userspace only");
        }

        info!(interface, radiotap, "Monitor mode enabled");
        Ok(Self {
            interface: interface.to_string(),
            cap,
            channel: None,
            radiotap,
        })
    }
}

impl FrameTransport for PcapTransport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let result = if self.radiotap {
            self.cap.sendpacket(frame::with_radiotap(frame))
        } else {
            self.cap.sendpacket(frame)
        };
        result.map_err(|e| TransportError::Device(format!("send error: {}", e)))
    }

    fn receive(&mut self, deadline: Instant, cancel: &CancelToken) -> Result<Vec<u8>, RecvError> {
        loop {
            if cancel.is_cancelled() {
                return Err(RecvError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(RecvError::Timeout);
            }

            match self.cap.next_packet() {
                Ok(packet) => {
                    let data = if self.radiotap {
                        match frame::strip_radiotap(packet.data) {
                            Some(inner) => inner,
                            None => continue,
                        }
                    } else {
                        packet.data
                    };
                    return Ok(data.to_vec());
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => {
                    return Err(RecvError::Transport(TransportError::Device(format!(
                        "capture error: {}",
                        e
                    ))))
                }
            }
        }
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), TransportError> {
        if self.channel == Some(channel) {
            return Ok(());
        }
        platform::set_channel(&self.interface, channel)?;
        debug!(channel, "Channel set");
        self.channel = Some(channel);
        Ok(())
    }
}
