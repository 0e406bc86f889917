//! L2CAP protocol constants

/// Basic L2CAP header: length(2) + channel id(2)
pub const L2CAP_BASIC_HEADER_SIZE: usize = 4;
/// SDU length field carried by the first frame of an LE-frame SDU
pub const L2CAP_SDU_LENGTH_SIZE: usize = 2;
/// Signaling command header: code(1) + identifier(1) + length(2)
pub const L2CAP_COMMAND_HEADER_SIZE: usize = 4;

// Fixed LE channel identifiers
pub const L2CAP_ATTRIBUTE_PROTOCOL_CID: u16 = 0x0004;
pub const L2CAP_LE_SIGNALING_CID: u16 = 0x0005;
pub const L2CAP_SECURITY_MANAGER_CID: u16 = 0x0006;

// MTU / MPS
pub const L2CAP_LE_DEFAULT_MTU: u16 = 23;
pub const L2CAP_LE_DEFAULT_MPS: u16 = 23;

// LE signaling command codes
pub const L2CAP_COMMAND_REJECT: u8 = 0x01;
pub const L2CAP_CONNECTION_PARAMETER_UPDATE_REQUEST: u8 = 0x12;
pub const L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE: u8 = 0x13;

// Command reject reasons
pub const L2CAP_REJECT_NOT_UNDERSTOOD: u16 = 0x0000;
pub const L2CAP_REJECT_INVALID_CID: u16 = 0x0002;

// Connection parameter update results
pub const L2CAP_CONN_PARAM_UPDATE_ACCEPTED: u16 = 0x0000;
pub const L2CAP_CONN_PARAM_UPDATE_REJECTED: u16 = 0x0001;

// Connection parameter ranges (1.25 ms / 10 ms units)
pub const L2CAP_LE_CONN_INTERVAL_MIN: u16 = 0x0006;
pub const L2CAP_LE_CONN_INTERVAL_MAX: u16 = 0x0C80;
pub const L2CAP_LE_CONN_LATENCY_MAX: u16 = 0x01F3;
pub const L2CAP_LE_SUPERVISION_TIMEOUT_MIN: u16 = 0x000A;
pub const L2CAP_LE_SUPERVISION_TIMEOUT_MAX: u16 = 0x0C80;
