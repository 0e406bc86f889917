//! bluelink - host-side Bluetooth Low Energy transport
//!
//! This library drives a Bluetooth controller over HCI on Unix systems. It
//! provides the command/event engine with host-to-controller flow control,
//! L2CAP fragmentation and reassembly over LE ACL links, and a serialized
//! radio state machine for advertising, scanning and connecting. ATT and
//! GATT are expected to run on top of [`l2cap::Connection`].

pub mod error;
pub mod gap;
pub mod hci;
pub mod l2cap;

// Re-export common types for convenience
pub use error::{HciError, HciResult};
pub use gap::{
    AddressType, Advertisement, BdAddr, Device, DeviceConfig, GapError, GapResult, Outcome, Role,
    Transition,
};
pub use hci::{HciCommand, HciEngine, HciEvent, HciSocket, LeAdvertisingReport, Transport};
pub use l2cap::{Connection, L2capConfig, L2capError, L2capManager, L2capResult};

#[cfg(test)]
mod tests {
    use super::*;

    // No controller is ever registered under this index
    const MISSING_DEVICE: u16 = 0x3FFF;

    #[test]
    fn test_open_missing_adapter_fails() {
        // Without Bluetooth support the socket call fails, otherwise bind does
        match HciSocket::open(MISSING_DEVICE) {
            Err(HciError::SocketError(_)) | Err(HciError::BindError(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a socket for a missing adapter"),
        }
    }

    #[test]
    fn test_device_open_reports_socket_error() {
        match Device::open(MISSING_DEVICE, DeviceConfig::default()) {
            Err(GapError::Hci(HciError::SocketError(_) | HciError::BindError(_))) => {}
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("brought up a missing adapter"),
        }
    }
}
