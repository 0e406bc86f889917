//! Bluetooth HCI (Host Controller Interface) implementation
//!
//! This module holds the wire codec, the transports, the ACL buffer pool
//! and the command/event engine built on top of them.

pub mod constants;
pub mod engine;
pub mod packet;
pub mod pool;
pub mod socket;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use engine::{AclHandler, AclLink, CommandSender, EventHandler, HciEngine};
pub use packet::{
    AclPacket, CommandComplete, CommandStatus, DisconnectionComplete, EventMask, HciCommand,
    HciEvent, LeAdvertisingReport, LeConnectionComplete, LeEventMask, NumberOfCompletedPackets,
};
pub use pool::{Buffer, BufferPool};
pub use socket::HciSocket;
pub use transport::Transport;
