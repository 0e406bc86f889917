//! Error types for the bluelink library
//!
//! This module defines the HCI-level error type shared by the transport,
//! the command/event engine and the buffer pool. The L2CAP and GAP layers
//! define their own error enums that wrap this one.

use thiserror::Error;

/// Errors that can occur when talking to a Bluetooth controller
#[derive(Error, Debug)]
pub enum HciError {
    #[error("Failed to open HCI socket: {0}")]
    SocketError(#[from] std::io::Error),

    #[error("Failed to bind to HCI device: {0}")]
    BindError(std::io::Error),

    #[error("Failed to send HCI packet: {0}")]
    SendError(std::io::Error),

    #[error("Failed to receive HCI packet: {0}")]
    ReceiveError(std::io::Error),

    #[error("Invalid parameter length: {0}")]
    InvalidParamLength(usize),

    #[error("Invalid HCI packet format")]
    InvalidPacketFormat,

    /// The controller answered a command with a non-success status.
    #[error("Command {opcode:#06x} failed with status {status:#04x}")]
    CommandFailed { opcode: u16, status: u8 },

    /// A command with the same opcode is still waiting for its reply.
    #[error("Command {0:#06x} is already outstanding")]
    CommandPending(u16),

    /// The engine hit a fatal transport error and no longer accepts work.
    #[error("HCI transport terminated: {0}")]
    Terminated(String),
}

impl HciError {
    /// Returns the controller status code if this is a rejected command.
    pub fn status(&self) -> Option<u8> {
        match self {
            HciError::CommandFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for errors that end the whole engine.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HciError::SendError(_) | HciError::ReceiveError(_) | HciError::Terminated(_)
        )
    }
}

/// Result type for HCI operations
pub type HciResult<T> = Result<T, HciError>;
