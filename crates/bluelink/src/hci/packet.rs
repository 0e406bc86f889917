//! HCI packet structures and parsing
//!
//! This module contains the command encoder, the event decoders the engine
//! and the upper layers rely on, and the ACL data framing.

use crate::error::HciError;
use crate::hci::constants::*;
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

bitflags! {
    /// Events enabled with the Set Event Mask command
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u64 {
        const DISCONNECTION_COMPLETE = 1 << 4;
        const ENCRYPTION_CHANGE = 1 << 7;
        const HARDWARE_ERROR = 1 << 15;
        const DATA_BUFFER_OVERFLOW = 1 << 25;
        const ENCRYPTION_KEY_REFRESH = 1 << 47;
        const LE_META = 1 << 61;
    }
}

bitflags! {
    /// LE subevents enabled with the LE Set Event Mask command
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LeEventMask: u64 {
        const CONNECTION_COMPLETE = 1 << 0;
        const ADVERTISING_REPORT = 1 << 1;
        const CONNECTION_UPDATE_COMPLETE = 1 << 2;
        const READ_REMOTE_FEATURES_COMPLETE = 1 << 3;
        const LONG_TERM_KEY_REQUEST = 1 << 4;
    }
}

impl Default for EventMask {
    fn default() -> Self {
        EventMask::DISCONNECTION_COMPLETE
            | EventMask::ENCRYPTION_CHANGE
            | EventMask::HARDWARE_ERROR
            | EventMask::DATA_BUFFER_OVERFLOW
            | EventMask::ENCRYPTION_KEY_REFRESH
            | EventMask::LE_META
    }
}

impl Default for LeEventMask {
    fn default() -> Self {
        LeEventMask::CONNECTION_COMPLETE
            | LeEventMask::ADVERTISING_REPORT
            | LeEventMask::CONNECTION_UPDATE_COMPLETE
            | LeEventMask::READ_REMOTE_FEATURES_COMPLETE
            | LeEventMask::LONG_TERM_KEY_REQUEST
    }
}

/// Build an opcode from its group and command fields
pub fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) | (ocf & 0x3ff)
}

/// Commands issued by the host
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum HciCommand {
    // Link Control Commands (OGF: 0x01)
    Disconnect { handle: u16, reason: u8 },

    // Host Controller Commands (OGF: 0x03)
    Reset,
    SetEventMask { mask: EventMask },

    // Informational Parameters (OGF: 0x04)
    ReadBufferSize,
    ReadBdAddr,

    // LE Commands (OGF: 0x08)
    LeSetEventMask { mask: LeEventMask },
    LeReadBufferSize,
    LeSetRandomAddress { address: [u8; 6] },
    LeSetAdvertisingParameters {
        interval_min: u16,
        interval_max: u16,
        advertising_type: u8,
        own_address_type: u8,
        peer_address_type: u8,
        peer_address: [u8; 6],
        channel_map: u8,
        filter_policy: u8,
    },
    LeSetAdvertisingData { data: Vec<u8> },
    LeSetScanResponseData { data: Vec<u8> },
    LeSetAdvertiseEnable { enable: bool },
    LeSetScanParameters {
        scan_type: u8,
        scan_interval: u16,
        scan_window: u16,
        own_address_type: u8,
        filter_policy: u8,
    },
    LeSetScanEnable { enable: bool, filter_duplicates: bool },
    LeCreateConnection {
        scan_interval: u16,
        scan_window: u16,
        filter_policy: u8,
        peer_address_type: u8,
        peer_address: [u8; 6],
        own_address_type: u8,
        conn_interval_min: u16,
        conn_interval_max: u16,
        conn_latency: u16,
        supervision_timeout: u16,
        min_ce_length: u16,
        max_ce_length: u16,
    },
    LeCreateConnectionCancel,
    LeConnectionUpdate {
        handle: u16,
        conn_interval_min: u16,
        conn_interval_max: u16,
        conn_latency: u16,
        supervision_timeout: u16,
        min_ce_length: u16,
        max_ce_length: u16,
    },

    /// Any other command, given as raw opcode fields and parameters
    Raw { ogf: u8, ocf: u16, params: Vec<u8> },
}

impl HciCommand {
    /// Create a raw command from its opcode fields
    pub fn new(ogf: u8, ocf: u16, params: Vec<u8>) -> Self {
        Self::Raw { ogf, ocf, params }
    }

    /// Get the OGF and OCF for this command
    pub fn opcode_parts(&self) -> (u8, u16) {
        match self {
            Self::Disconnect { .. } => (OGF_LINK_CTL, OCF_DISCONNECT),
            Self::Reset => (OGF_HOST_CTL, OCF_RESET),
            Self::SetEventMask { .. } => (OGF_HOST_CTL, OCF_SET_EVENT_MASK),
            Self::ReadBufferSize => (OGF_INFO_PARAM, OCF_READ_BUFFER_SIZE),
            Self::ReadBdAddr => (OGF_INFO_PARAM, OCF_READ_BD_ADDR),
            Self::LeSetEventMask { .. } => (OGF_LE, OCF_LE_SET_EVENT_MASK),
            Self::LeReadBufferSize => (OGF_LE, OCF_LE_READ_BUFFER_SIZE),
            Self::LeSetRandomAddress { .. } => (OGF_LE, OCF_LE_SET_RANDOM_ADDRESS),
            Self::LeSetAdvertisingParameters { .. } => (OGF_LE, OCF_LE_SET_ADVERTISING_PARAMETERS),
            Self::LeSetAdvertisingData { .. } => (OGF_LE, OCF_LE_SET_ADVERTISING_DATA),
            Self::LeSetScanResponseData { .. } => (OGF_LE, OCF_LE_SET_SCAN_RESPONSE_DATA),
            Self::LeSetAdvertiseEnable { .. } => (OGF_LE, OCF_LE_SET_ADVERTISE_ENABLE),
            Self::LeSetScanParameters { .. } => (OGF_LE, OCF_LE_SET_SCAN_PARAMETERS),
            Self::LeSetScanEnable { .. } => (OGF_LE, OCF_LE_SET_SCAN_ENABLE),
            Self::LeCreateConnection { .. } => (OGF_LE, OCF_LE_CREATE_CONNECTION),
            Self::LeCreateConnectionCancel => (OGF_LE, OCF_LE_CREATE_CONNECTION_CANCEL),
            Self::LeConnectionUpdate { .. } => (OGF_LE, OCF_LE_CONNECTION_UPDATE),
            Self::Raw { ogf, ocf, .. } => (*ogf, *ocf),
        }
    }

    /// The 16-bit opcode of this command
    pub fn opcode(&self) -> u16 {
        let (ogf, ocf) = self.opcode_parts();
        opcode(ogf, ocf)
    }

    /// Convert the command to its raw parameter bytes
    pub fn parameters(&self) -> Vec<u8> {
        let mut params = Vec::new();
        match self {
            Self::Reset
            | Self::ReadBufferSize
            | Self::ReadBdAddr
            | Self::LeReadBufferSize
            | Self::LeCreateConnectionCancel => {}

            Self::Disconnect { handle, reason } => {
                params.write_u16::<LittleEndian>(*handle).ok();
                params.push(*reason);
            }

            Self::SetEventMask { mask } => {
                params.write_u64::<LittleEndian>(mask.bits()).ok();
            }

            Self::LeSetEventMask { mask } => {
                params.write_u64::<LittleEndian>(mask.bits()).ok();
            }

            Self::LeSetRandomAddress { address } => params.extend_from_slice(address),

            Self::LeSetAdvertisingParameters {
                interval_min,
                interval_max,
                advertising_type,
                own_address_type,
                peer_address_type,
                peer_address,
                channel_map,
                filter_policy,
            } => {
                params.write_u16::<LittleEndian>(*interval_min).ok();
                params.write_u16::<LittleEndian>(*interval_max).ok();
                params.push(*advertising_type);
                params.push(*own_address_type);
                params.push(*peer_address_type);
                params.extend_from_slice(peer_address);
                params.push(*channel_map);
                params.push(*filter_policy);
            }

            // Both payloads are a length byte followed by a zero-padded 31-byte field
            Self::LeSetAdvertisingData { data } | Self::LeSetScanResponseData { data } => {
                let len = data.len().min(31);
                params.push(len as u8);
                params.extend_from_slice(&data[..len]);
                params.resize(32, 0);
            }

            Self::LeSetAdvertiseEnable { enable } => params.push(*enable as u8),

            Self::LeSetScanParameters {
                scan_type,
                scan_interval,
                scan_window,
                own_address_type,
                filter_policy,
            } => {
                params.push(*scan_type);
                params.write_u16::<LittleEndian>(*scan_interval).ok();
                params.write_u16::<LittleEndian>(*scan_window).ok();
                params.push(*own_address_type);
                params.push(*filter_policy);
            }

            Self::LeSetScanEnable {
                enable,
                filter_duplicates,
            } => {
                params.push(*enable as u8);
                params.push(*filter_duplicates as u8);
            }

            Self::LeCreateConnection {
                scan_interval,
                scan_window,
                filter_policy,
                peer_address_type,
                peer_address,
                own_address_type,
                conn_interval_min,
                conn_interval_max,
                conn_latency,
                supervision_timeout,
                min_ce_length,
                max_ce_length,
            } => {
                params.write_u16::<LittleEndian>(*scan_interval).ok();
                params.write_u16::<LittleEndian>(*scan_window).ok();
                params.push(*filter_policy);
                params.push(*peer_address_type);
                params.extend_from_slice(peer_address);
                params.push(*own_address_type);
                for value in [
                    conn_interval_min,
                    conn_interval_max,
                    conn_latency,
                    supervision_timeout,
                    min_ce_length,
                    max_ce_length,
                ] {
                    params.write_u16::<LittleEndian>(*value).ok();
                }
            }

            Self::LeConnectionUpdate {
                handle,
                conn_interval_min,
                conn_interval_max,
                conn_latency,
                supervision_timeout,
                min_ce_length,
                max_ce_length,
            } => {
                for value in [
                    handle,
                    conn_interval_min,
                    conn_interval_max,
                    conn_latency,
                    supervision_timeout,
                    min_ce_length,
                    max_ce_length,
                ] {
                    params.write_u16::<LittleEndian>(*value).ok();
                }
            }

            Self::Raw { params: raw, .. } => params.extend_from_slice(raw),
        }
        params
    }

    /// Convert the command to a raw HCI packet
    pub fn to_packet(&self) -> Vec<u8> {
        encode_command(self.opcode(), &self.parameters())
    }
}

/// Frame a command: `{type, opcode(2 LE), length(1), params}`
pub fn encode_command(opcode: u16, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.write_u16::<LittleEndian>(opcode).ok();
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// HCI Event packet
#[derive(Debug, Clone)]
pub struct HciEvent {
    pub event_code: u8,
    pub parameter_total_length: u8,
    pub parameters: Vec<u8>,
}

impl HciEvent {
    /// Parse an HCI event from raw bytes (without the packet type byte)
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }

        let event_code = data[0];
        let parameter_total_length = data[1];

        if data.len() < (parameter_total_length as usize + 2) {
            return None;
        }

        let parameters = data[2..(parameter_total_length as usize + 2)].to_vec();

        Some(HciEvent {
            event_code,
            parameter_total_length,
            parameters,
        })
    }

    /// The LE meta subevent code, if this is an LE meta event
    pub fn subevent_code(&self) -> Option<u8> {
        if self.event_code == EVT_LE_META_EVENT {
            self.parameters.first().copied()
        } else {
            None
        }
    }
}

/// Command Complete event: `{num_packets, opcode, return parameters}`
#[derive(Debug, Clone)]
pub struct CommandComplete {
    pub num_packets: u8,
    pub opcode: u16,
    pub return_parameters: Vec<u8>,
}

impl CommandComplete {
    pub fn parse(event: &HciEvent) -> Option<Self> {
        if event.event_code != EVT_CMD_COMPLETE {
            return None;
        }
        let mut cursor = Cursor::new(&event.parameters[..]);
        let num_packets = cursor.read_u8().ok()?;
        let opcode = cursor.read_u16::<LittleEndian>().ok()?;
        let mut return_parameters = Vec::new();
        cursor.read_to_end(&mut return_parameters).ok()?;
        Some(Self {
            num_packets,
            opcode,
            return_parameters,
        })
    }
}

/// Command Status event: `{status, num_packets, opcode}`
#[derive(Debug, Clone, Copy)]
pub struct CommandStatus {
    pub status: u8,
    pub num_packets: u8,
    pub opcode: u16,
}

impl CommandStatus {
    pub fn parse(event: &HciEvent) -> Option<Self> {
        if event.event_code != EVT_CMD_STATUS {
            return None;
        }
        let mut cursor = Cursor::new(&event.parameters[..]);
        Some(Self {
            status: cursor.read_u8().ok()?,
            num_packets: cursor.read_u8().ok()?,
            opcode: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }
}

/// LE Connection Complete Event data
#[derive(Debug, Clone)]
pub struct LeConnectionComplete {
    pub status: u8,
    pub connection_handle: u16,
    pub role: u8,
    pub peer_address_type: u8,
    pub peer_address: [u8; 6],
    pub conn_interval: u16,
    pub conn_latency: u16,
    pub supervision_timeout: u16,
    pub master_clock_accuracy: u8,
}

impl LeConnectionComplete {
    /// Parse an LE Connection Complete event from an HCI Meta Event
    pub fn parse(event: &HciEvent) -> Option<Self> {
        if event.subevent_code() != Some(EVT_LE_CONN_COMPLETE) || event.parameters.len() < 19 {
            return None;
        }

        let mut cursor = Cursor::new(&event.parameters[1..]);
        let status = cursor.read_u8().ok()?;
        let connection_handle = cursor.read_u16::<LittleEndian>().ok()? & ACL_HANDLE_MASK;
        let role = cursor.read_u8().ok()?;
        let peer_address_type = cursor.read_u8().ok()?;
        let mut peer_address = [0u8; 6];
        cursor.read_exact(&mut peer_address).ok()?;

        Some(LeConnectionComplete {
            status,
            connection_handle,
            role,
            peer_address_type,
            peer_address,
            conn_interval: cursor.read_u16::<LittleEndian>().ok()?,
            conn_latency: cursor.read_u16::<LittleEndian>().ok()?,
            supervision_timeout: cursor.read_u16::<LittleEndian>().ok()?,
            master_clock_accuracy: cursor.read_u8().ok()?,
        })
    }
}

/// Disconnection Complete Event data
#[derive(Debug, Clone, Copy)]
pub struct DisconnectionComplete {
    pub status: u8,
    pub connection_handle: u16,
    pub reason: u8,
}

impl DisconnectionComplete {
    pub fn parse(event: &HciEvent) -> Option<Self> {
        if event.event_code != EVT_DISCONN_COMPLETE {
            return None;
        }
        let mut cursor = Cursor::new(&event.parameters[..]);
        Some(Self {
            status: cursor.read_u8().ok()?,
            connection_handle: cursor.read_u16::<LittleEndian>().ok()? & ACL_HANDLE_MASK,
            reason: cursor.read_u8().ok()?,
        })
    }
}

/// Number Of Completed Packets event, as `(handle, count)` pairs
#[derive(Debug, Clone, Default)]
pub struct NumberOfCompletedPackets {
    pub completed: Vec<(u16, u16)>,
}

impl NumberOfCompletedPackets {
    pub fn parse(event: &HciEvent) -> Option<Self> {
        if event.event_code != EVT_NUM_COMP_PKTS {
            return None;
        }
        let mut cursor = Cursor::new(&event.parameters[..]);
        let num_handles = cursor.read_u8().ok()?;
        let mut completed = Vec::with_capacity(num_handles as usize);
        for _ in 0..num_handles {
            let handle = cursor.read_u16::<LittleEndian>().ok()? & ACL_HANDLE_MASK;
            let count = cursor.read_u16::<LittleEndian>().ok()?;
            completed.push((handle, count));
        }
        Some(Self { completed })
    }
}

/// LE Advertising Report Event
#[derive(Debug, Clone)]
pub struct LeAdvertisingReport {
    pub event_type: u8,
    pub address_type: u8,
    pub address: [u8; 6],
    pub data_length: u8,
    pub data: Vec<u8>,
    pub rssi: i8,
}

impl LeAdvertisingReport {
    /// Parse every report carried by an LE Advertising Report meta event
    pub fn parse_from_event(event: &HciEvent) -> Result<Vec<Self>, HciError> {
        if event.subevent_code() != Some(EVT_LE_ADVERTISING_REPORT) {
            return Err(HciError::InvalidPacketFormat);
        }

        let mut cursor = Cursor::new(&event.parameters[1..]);
        let num_reports = cursor.read_u8().map_err(|_| HciError::InvalidPacketFormat)?;
        let mut reports = Vec::with_capacity(num_reports as usize);

        for _ in 0..num_reports {
            reports.push(Self::read_one(&mut cursor).ok_or(HciError::InvalidPacketFormat)?);
        }

        Ok(reports)
    }

    fn read_one(cursor: &mut Cursor<&[u8]>) -> Option<Self> {
        let event_type = cursor.read_u8().ok()?;
        let address_type = cursor.read_u8().ok()?;
        let mut address = [0u8; 6];
        cursor.read_exact(&mut address).ok()?;
        let data_length = cursor.read_u8().ok()?;
        let mut data = vec![0u8; data_length as usize];
        cursor.read_exact(&mut data).ok()?;
        let rssi = cursor.read_i8().ok()?;

        Some(LeAdvertisingReport {
            event_type,
            address_type,
            address,
            data_length,
            data,
            rssi,
        })
    }
}

/// ACL data packet
#[derive(Debug, Clone)]
pub struct AclPacket {
    pub handle: u16,
    pub boundary: u8,
    pub broadcast: u8,
    pub data: Vec<u8>,
}

impl AclPacket {
    /// Parse an ACL packet from raw bytes (without the packet type byte)
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        let handle_flags = cursor.read_u16::<LittleEndian>().ok()?;
        let length = cursor.read_u16::<LittleEndian>().ok()? as usize;

        let payload = &data[HCI_ACL_HDR_SIZE..];
        if payload.len() < length {
            return None;
        }

        Some(Self {
            handle: handle_flags & ACL_HANDLE_MASK,
            boundary: ((handle_flags >> 12) & 0x3) as u8,
            broadcast: ((handle_flags >> 14) & 0x3) as u8,
            data: payload[..length].to_vec(),
        })
    }

    /// True if this fragment continues a previously started PDU
    pub fn is_continuation(&self) -> bool {
        self.boundary == ACL_PB_CONTINUING
    }

    /// Write a full ACL frame header: `{type, handle|flags(2 LE), length(2 LE)}`
    pub fn write_header(out: &mut Vec<u8>, handle: u16, boundary: u8, length: u16) {
        let handle_flags = (handle & ACL_HANDLE_MASK) | ((boundary as u16 & 0x3) << 12);
        out.push(HCI_ACL_PKT);
        out.write_u16::<LittleEndian>(handle_flags).ok();
        out.write_u16::<LittleEndian>(length).ok();
    }
}
