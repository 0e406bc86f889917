//! L2CAP (Logical Link Control and Adaptation Protocol) implementation
//!
//! This module provides the LE side of L2CAP:
//! - Fragmentation of outbound SDUs into controller-sized ACL packets
//! - Reassembly of inbound fragments into frames
//! - Dispatch by channel identifier (ATT, LE signaling, SMP)
//! - LE signaling for connection parameter updates

pub mod conn;
pub mod constants;
pub mod manager;
pub mod packet;
pub mod signaling;
pub mod types;

// Re-export the public API
pub use self::conn::{Connection, LinkInfo};
pub use self::manager::L2capManager;
pub use self::signaling::SignalingMessage;
pub use self::types::*;
