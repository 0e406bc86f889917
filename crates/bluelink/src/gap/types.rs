//! Type definitions for GAP operations
//!
//! Addresses, roles, advertising reports and the error type shared by the
//! radio control loop and the device facade.

use crate::error::HciError;
use crate::gap::constants::*;
use crate::hci::constants::{LE_ROLE_CENTRAL, LE_ROLE_PERIPHERAL};
use crate::l2cap::L2capError;
use rand::Rng;
use std::fmt;
use thiserror::Error;

/// Error types for radio transitions and device operations
#[derive(Debug, Error)]
pub enum GapError {
    /// The transition is not allowed in the current radio state.
    #[error("Radio state conflict: {0}")]
    Conflict(String),

    #[error("Operation timed out")]
    Timeout,

    /// A connection attempt completed with a non-success status.
    #[error("Connection failed with status {0:#04x}")]
    ConnectionFailed(u8),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The radio control loop or the engine has shut down.
    #[error("Device closed")]
    Closed,

    #[error("HCI error: {0}")]
    Hci(#[from] HciError),

    #[error("L2CAP error: {0}")]
    L2cap(#[from] L2capError),
}

/// Result type for GAP operations
pub type GapResult<T> = std::result::Result<T, GapError>;

/// Local role on an LE link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We initiated the connection
    Central,
    /// We accepted the connection while advertising
    Peripheral,
}

impl Role {
    /// Decode the role byte of an LE Connection Complete event
    pub fn from_le(value: u8) -> Option<Self> {
        match value {
            LE_ROLE_CENTRAL => Some(Role::Central),
            LE_ROLE_PERIPHERAL => Some(Role::Peripheral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
}

impl From<u8> for AddressType {
    fn from(value: u8) -> Self {
        match value {
            PUBLIC_DEVICE_ADDRESS => AddressType::Public,
            RANDOM_DEVICE_ADDRESS => AddressType::Random,
            PUBLIC_IDENTITY_ADDRESS => AddressType::PublicIdentity,
            RANDOM_IDENTITY_ADDRESS => AddressType::RandomIdentity,
            _ => AddressType::Public,
        }
    }
}

impl From<AddressType> for u8 {
    fn from(value: AddressType) -> Self {
        match value {
            AddressType::Public => PUBLIC_DEVICE_ADDRESS,
            AddressType::Random => RANDOM_DEVICE_ADDRESS,
            AddressType::PublicIdentity => PUBLIC_IDENTITY_ADDRESS,
            AddressType::RandomIdentity => RANDOM_IDENTITY_ADDRESS,
        }
    }
}

/// Bluetooth device address, stored little-endian as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() >= 6 {
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(&slice[0..6]);
            Some(Self { bytes })
        } else {
            None
        }
    }

    /// A fresh static random address
    ///
    /// The two most significant bits are set, and the remaining bits are
    /// neither all zeros nor all ones.
    pub fn random_static() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes: [u8; 6] = rng.gen();
            bytes[5] |= 0xC0;
            let rest_all_zero = bytes[..5].iter().all(|&b| b == 0x00) && bytes[5] == 0xC0;
            let rest_all_ones = bytes.iter().all(|&b| b == 0xFF);
            if !rest_all_zero && !rest_all_ones {
                return Self { bytes };
            }
        }
    }

    /// True for a static random address
    pub fn is_static_random(&self) -> bool {
        self.bytes[5] & 0xC0 == 0xC0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}

/// One decoded advertising report, as handed to a scan observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub event_type: u8,
    pub address: BdAddr,
    pub address_type: AddressType,
    pub rssi: i8,
    /// Raw advertising or scan response payload
    pub data: Vec<u8>,
}

impl Advertisement {
    /// True if the advertiser accepts connections
    pub fn is_connectable(&self) -> bool {
        matches!(self.event_type, ADV_IND | ADV_DIRECT_IND)
    }
}

impl From<&crate::hci::LeAdvertisingReport> for Advertisement {
    fn from(report: &crate::hci::LeAdvertisingReport) -> Self {
        Self {
            event_type: report.event_type,
            address: BdAddr::new(report.address),
            address_type: AddressType::from(report.address_type),
            rssi: report.rssi,
            data: report.data.clone(),
        }
    }
}
