//! Raw HCI socket backend for beacon scanning.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{
    Advertisement, DecodeError, OBSERVATION_CHANNEL_BUFFER_SIZE, ObservationResult, ScanError,
};
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Active scanning, so scan responses (where most beacons put their name) arrive too
const LE_SCAN_ACTIVE: u8 = 0x01;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;
/// 10ms in 0.625ms units
const SCAN_INTERVAL_SLOTS: u16 = 0x0010;

const AD_TYPE_SHORT_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
const AD_TYPE_TX_POWER: u8 = 0x0A;

/// Largest HCI event: 3 byte header plus 255 bytes of parameters
const HCI_MAX_EVENT_SIZE: usize = 258;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    /// Filter passing only LE meta events.
    fn le_meta_events() -> Self {
        let event = EVT_LE_META_EVENT as usize;
        let mut event_mask = [0u32; 2];
        event_mask[event / 32] |= 1 << (event % 32);

        Self {
            type_mask: 1 << u32::from(HCI_EVENT_PKT),
            event_mask,
            opcode: 0,
        }
    }
}

fn os_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// Encode an HCI command packet.
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

fn scan_parameters_command() -> Vec<u8> {
    let interval = SCAN_INTERVAL_SLOTS.to_le_bytes();
    let params = [
        LE_SCAN_ACTIVE,
        interval[0],
        interval[1],
        // window equals interval: scan continuously
        interval[0],
        interval[1],
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ];
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

fn scan_enable_command(enable: bool) -> Vec<u8> {
    // Duplicate filtering off: every advertisement is a new RSSI reading
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
}

/// A raw HCI socket bound to one controller.
struct HciSocket {
    fd: OwnedFd,
}

impl HciSocket {
    fn open(dev_id: u16) -> Result<Self, ScanError> {
        // SOCK_NONBLOCK is required for AsyncFd
        let raw = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        if raw < 0 {
            return Err(os_error("Failed to create HCI socket"));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const SockaddrHci as *const sockaddr,
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to bind HCI socket"));
        }

        Ok(Self { fd })
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), ScanError> {
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to set HCI filter"));
        }
        Ok(())
    }

    fn send(&self, packet: &[u8]) -> Result<(), ScanError> {
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                packet.as_ptr() as *const c_void,
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to send HCI command"));
        }
        Ok(())
    }
}

/// Walk the AD structures of one advertisement, collecting name and TX power.
fn parse_ad_structures(ad_data: &[u8]) -> (Option<String>, Option<i16>) {
    let mut name = None;
    let mut tx_power = None;
    let mut offset = 0;

    while offset < ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }
        let ad_type = ad_data[offset + 1];
        let value = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_COMPLETE_NAME => name = Some(String::from_utf8_lossy(value).into_owned()),
            AD_TYPE_SHORT_NAME if name.is_none() => {
                name = Some(String::from_utf8_lossy(value).into_owned())
            }
            AD_TYPE_TX_POWER if !value.is_empty() => tx_power = Some(i16::from(value[0] as i8)),
            _ => {}
        }

        offset += 1 + len;
    }

    (name, tx_power)
}

/// Parse the first report of an LE Advertising Report event.
///
/// `event` starts at the HCI packet type byte. Returns `None` for events that
/// carry no report.
fn parse_advertising_report(event: &[u8]) -> Option<Result<Advertisement, DecodeError>> {
    // packet type, event code, parameter length, subevent
    let report = event.get(4..)?;
    if report.first().copied().unwrap_or(0) == 0 {
        return None;
    }

    // num_reports(1) event_type(1) addr_type(1) addr(6) data_len(1)
    let Some(header) = report.get(..10) else {
        return Some(Err(DecodeError::InvalidData(
            "Advertising report too short".into(),
        )));
    };
    let mut addr = [0u8; 6];
    addr.copy_from_slice(&header[3..9]);
    let data_len = header[9] as usize;

    // AD data is followed by a single signed RSSI byte
    let Some(body) = report.get(10..10 + data_len + 1) else {
        return Some(Err(DecodeError::InvalidData(format!(
            "Advertising data length {data_len} exceeds report"
        ))));
    };
    let (ad_data, rssi) = body.split_at(data_len);
    let (local_name, tx_power) = parse_ad_structures(ad_data);

    Some(Ok(Advertisement {
        address: MacAddress::from_le_bytes(addr).to_string(),
        local_name,
        rssi: i16::from(rssi[0] as i8),
        tx_power,
    }))
}

fn is_advertising_report(packet: &[u8]) -> bool {
    packet.len() >= 4
        && packet[0] == HCI_EVENT_PKT
        && packet[1] == EVT_LE_META_EVENT
        && packet[3] == EVT_LE_ADVERTISING_REPORT
}

/// Start scanning for beacons using raw HCI sockets on `hci0`.
///
/// # Arguments
/// * `verbose` - If true, decode errors are sent as Err values; otherwise they're silently dropped.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan(verbose: bool) -> Result<mpsc::Receiver<ObservationResult>, ScanError> {
    let events = HciSocket::open(0)?;
    events.set_filter(&HciFilter::le_meta_events())?;

    // Commands go through a second socket so the event filter stays untouched
    let commands = HciSocket::open(0)?;
    commands.send(&scan_parameters_command())?;
    commands.send(&scan_enable_command(true))?;

    let (tx, rx) = mpsc::channel(OBSERVATION_CHANNEL_BUFFER_SIZE);
    let async_fd = AsyncFd::new(events.fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(async move {
        let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

        'events: loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(error = %e, "HCI socket no longer readable");
                    break;
                }
            };

            // Drain all available packets before waiting again
            loop {
                let read = guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                });
                let n = match read {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) | Ok(Err(_)) => break 'events,
                    Err(_would_block) => break,
                };

                let packet = &buf[..n];
                if !is_advertising_report(packet) {
                    continue;
                }
                let result = match parse_advertising_report(packet) {
                    Some(Ok(advertisement)) => Ok(advertisement.into_observation()),
                    Some(Err(e)) if verbose => Err(e),
                    _ => continue,
                };
                if tx.send(result).await.is_err() {
                    debug!("receiver dropped, stopping HCI scan");
                    break 'events;
                }
            }
        }

        if let Err(e) = commands.send(&scan_enable_command(false)) {
            debug!(error = %e, "could not disable LE scan");
        }
    });

    Ok(rx)
}
