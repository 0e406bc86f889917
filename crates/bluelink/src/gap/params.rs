//! Radio and device configuration
//!
//! Plain structs with `Default` impls. The radio control loop turns them
//! into controller commands; the device facade carries them from the
//! caller to the loop.

use crate::gap::constants::*;
use crate::gap::types::{AddressType, BdAddr};
use crate::hci::{EventMask, HciCommand, LeEventMask};
use crate::l2cap::L2capConfig;
use std::time::Duration;

/// LE scan parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    /// `LE_SCAN_PASSIVE` or `LE_SCAN_ACTIVE`
    pub scan_type: u8,
    /// Scan interval (0.625ms units)
    pub interval: u16,
    /// Scan window (0.625ms units)
    pub window: u16,
    pub filter_policy: u8,
    /// Ask the controller to drop repeated reports
    pub filter_duplicates: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scan_type: LE_SCAN_ACTIVE,
            interval: LE_SCAN_INTERVAL,
            window: LE_SCAN_WINDOW,
            filter_policy: 0x00,
            filter_duplicates: true,
        }
    }
}

impl ScanParams {
    pub fn to_command(&self, own_address_type: u8) -> HciCommand {
        HciCommand::LeSetScanParameters {
            scan_type: self.scan_type,
            scan_interval: self.interval,
            scan_window: self.window,
            own_address_type,
            filter_policy: self.filter_policy,
        }
    }
}

/// LE advertising parameters and payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvParams {
    /// Minimum advertising interval (0.625ms units)
    pub interval_min: u16,
    /// Maximum advertising interval (0.625ms units)
    pub interval_max: u16,
    /// One of the `ADV_*` event types
    pub adv_type: u8,
    pub channel_map: u8,
    pub filter_policy: u8,
    /// Advertising payload, at most 31 bytes
    pub adv_data: Vec<u8>,
    /// Scan response payload, at most 31 bytes
    pub scan_response: Vec<u8>,
}

impl Default for AdvParams {
    fn default() -> Self {
        Self {
            interval_min: LE_ADV_INTERVAL_MIN,
            interval_max: LE_ADV_INTERVAL_MAX,
            adv_type: ADV_IND,
            channel_map: LE_ADV_CHANNEL_ALL,
            filter_policy: 0x00,
            adv_data: Vec::new(),
            scan_response: Vec::new(),
        }
    }
}

impl AdvParams {
    /// Commands that push these parameters and both payloads
    ///
    /// The controller only accepts them while advertising is disabled.
    pub fn to_commands(&self, own_address_type: u8) -> [HciCommand; 3] {
        [
            HciCommand::LeSetAdvertisingParameters {
                interval_min: self.interval_min,
                interval_max: self.interval_max,
                advertising_type: self.adv_type,
                own_address_type,
                peer_address_type: PUBLIC_DEVICE_ADDRESS,
                peer_address: [0; 6],
                channel_map: self.channel_map,
                filter_policy: self.filter_policy,
            },
            HciCommand::LeSetAdvertisingData {
                data: self.adv_data.clone(),
            },
            HciCommand::LeSetScanResponseData {
                data: self.scan_response.clone(),
            },
        ]
    }

    /// True if both payloads fit an advertising PDU
    pub fn payloads_fit(&self) -> bool {
        self.adv_data.len() <= MAX_ADV_DATA_LEN && self.scan_response.len() <= MAX_ADV_DATA_LEN
    }
}

/// Parameters used when initiating a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParams {
    /// Scan interval while initiating (0.625ms units)
    pub scan_interval: u16,
    /// Scan window while initiating (0.625ms units)
    pub scan_window: u16,
    /// Minimum connection interval (1.25ms units)
    pub interval_min: u16,
    /// Maximum connection interval (1.25ms units)
    pub interval_max: u16,
    pub latency: u16,
    /// Supervision timeout (10ms units)
    pub supervision_timeout: u16,
    pub min_ce_length: u16,
    pub max_ce_length: u16,
}

impl Default for ConnParams {
    fn default() -> Self {
        Self {
            scan_interval: LE_SCAN_INTERVAL,
            scan_window: LE_SCAN_WINDOW,
            interval_min: LE_CONN_INTERVAL_MIN,
            interval_max: LE_CONN_INTERVAL_MAX,
            latency: LE_CONN_LATENCY,
            supervision_timeout: LE_SUPERVISION_TIMEOUT,
            min_ce_length: LE_MIN_CE_LENGTH,
            max_ce_length: LE_MAX_CE_LENGTH,
        }
    }
}

impl ConnParams {
    pub fn create_connection(
        &self,
        peer: BdAddr,
        peer_type: AddressType,
        own_address_type: u8,
    ) -> HciCommand {
        HciCommand::LeCreateConnection {
            scan_interval: self.scan_interval,
            scan_window: self.scan_window,
            filter_policy: 0x00,
            peer_address_type: peer_type.into(),
            peer_address: peer.bytes,
            own_address_type,
            conn_interval_min: self.interval_min,
            conn_interval_max: self.interval_max,
            conn_latency: self.latency,
            supervision_timeout: self.supervision_timeout,
            min_ce_length: self.min_ce_length,
            max_ce_length: self.max_ce_length,
        }
    }
}

/// Configuration for a [`Device`](crate::gap::Device)
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub scan: ScanParams,
    pub adv: AdvParams,
    pub conn: ConnParams,
    /// Settings applied to every new L2CAP connection
    pub l2cap: L2capConfig,
    /// Generate and use a static random address instead of the public one
    pub use_random_address: bool,
    /// Default timeout for [`Device::dial`](crate::gap::Device::dial)
    pub dial_timeout: Option<Duration>,
    /// Default timeout for [`Device::accept`](crate::gap::Device::accept)
    pub accept_timeout: Option<Duration>,
    pub event_mask: EventMask,
    pub le_event_mask: LeEventMask,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            scan: ScanParams::default(),
            adv: AdvParams::default(),
            conn: ConnParams::default(),
            l2cap: L2capConfig::default(),
            use_random_address: false,
            dial_timeout: Some(Duration::from_secs(10)),
            accept_timeout: None,
            event_mask: EventMask::default(),
            le_event_mask: LeEventMask::default(),
        }
    }
}
