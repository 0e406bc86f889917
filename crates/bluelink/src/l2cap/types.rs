//! Type definitions for L2CAP operations
//!
//! This module contains the error type, the link configuration, and the
//! connection parameters carried by LE signaling.

use super::constants::*;
use crate::error::HciError;
use thiserror::Error;

/// Error types specific to L2CAP operations
#[derive(Debug, Error)]
pub enum L2capError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Inbound data violated the negotiated framing on this connection.
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("SDU of {len} bytes exceeds MTU {mtu}")]
    MtuExceeded { len: usize, mtu: u16 },

    #[error("Buffer of {available} bytes too small for {needed} byte SDU")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Connection terminated")]
    ConnectionTerminated,

    #[error("HCI error: {0}")]
    Hci(#[from] HciError),
}

/// Result type for L2CAP operations
pub type L2capResult<T> = std::result::Result<T, L2capError>;

/// Per-connection L2CAP settings applied when a link comes up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capConfig {
    /// Largest SDU accepted from the peer
    pub rx_mtu: u16,
    /// Largest single L2CAP frame payload accepted from the peer
    pub rx_mps: u16,
    /// Largest SDU sent to the peer until changed
    pub tx_mtu: u16,
    /// Largest single L2CAP frame payload sent to the peer
    pub tx_mps: u16,
    /// Carry a 2-byte SDU length and segment SDUs across frames
    pub le_frame: bool,
}

impl Default for L2capConfig {
    fn default() -> Self {
        Self {
            rx_mtu: L2CAP_LE_DEFAULT_MTU,
            rx_mps: L2CAP_LE_DEFAULT_MPS,
            tx_mtu: L2CAP_LE_DEFAULT_MTU,
            tx_mps: L2CAP_LE_DEFAULT_MPS,
            le_frame: false,
        }
    }
}

/// LE Connection Parameter Update request parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParameterUpdate {
    /// Minimum connection interval (1.25ms units)
    pub conn_interval_min: u16,
    /// Maximum connection interval (1.25ms units)
    pub conn_interval_max: u16,
    /// Peripheral latency (number of events)
    pub conn_latency: u16,
    /// Connection supervision timeout (10ms units)
    pub supervision_timeout: u16,
}

impl ConnectionParameterUpdate {
    /// Validates that the parameters are within acceptable ranges
    pub fn validate(&self) -> bool {
        let interval_ok = self.conn_interval_min >= L2CAP_LE_CONN_INTERVAL_MIN
            && self.conn_interval_max <= L2CAP_LE_CONN_INTERVAL_MAX
            && self.conn_interval_min <= self.conn_interval_max;

        let latency_ok = self.conn_latency <= L2CAP_LE_CONN_LATENCY_MAX;

        let timeout_ok = self.supervision_timeout >= L2CAP_LE_SUPERVISION_TIMEOUT_MIN
            && self.supervision_timeout <= L2CAP_LE_SUPERVISION_TIMEOUT_MAX;

        // Supervision timeout (10 ms units) must exceed
        // (1 + latency) * max interval (1.25 ms units) * 2
        let relation_ok = (self.supervision_timeout as u32) * 4
            > (self.conn_interval_max as u32) * (self.conn_latency as u32 + 1);

        interval_ok && latency_ok && timeout_ok && relation_ok
    }
}
