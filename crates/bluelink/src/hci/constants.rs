//! HCI protocol constants
//!
//! This module contains constants used in the Bluetooth HCI protocol.

// HCI packet types
pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_ACL_PKT: u8 = 0x02;
pub const HCI_SCO_PKT: u8 = 0x03;
pub const HCI_EVENT_PKT: u8 = 0x04;
pub const HCI_ISO_PKT: u8 = 0x05;
pub const HCI_VENDOR_PKT: u8 = 0xFF;

// Maximum size of HCI command parameters
pub const HCI_MAX_PARAM_LEN: usize = 255;

// Largest frame the reader accepts: type + ACL header + max ACL payload
pub const HCI_MAX_FRAME_SIZE: usize = 1 + 4 + 65535;

// ACL header: handle/flags (2) + data length (2)
pub const HCI_ACL_HDR_SIZE: usize = 4;

// ACL packet boundary flags
pub const ACL_PB_START_NON_FLUSHABLE: u8 = 0x00;
pub const ACL_PB_CONTINUING: u8 = 0x01;
pub const ACL_PB_START_FLUSHABLE: u8 = 0x02;

pub const ACL_HANDLE_MASK: u16 = 0x0FFF;

// Common OGF (Opcode Group Field) values
pub const OGF_LINK_CTL: u8 = 0x01;
pub const OGF_HOST_CTL: u8 = 0x03;
pub const OGF_INFO_PARAM: u8 = 0x04;
pub const OGF_LE: u8 = 0x08;

// Link Control Commands (OGF: 0x01)
pub const OCF_DISCONNECT: u16 = 0x0006;

// Host Controller Commands (OGF: 0x03)
pub const OCF_SET_EVENT_MASK: u16 = 0x0001;
pub const OCF_RESET: u16 = 0x0003;

// Informational Parameters (OGF: 0x04)
pub const OCF_READ_BUFFER_SIZE: u16 = 0x0005;
pub const OCF_READ_BD_ADDR: u16 = 0x0009;

// LE Command OCF values (OGF: 0x08)
pub const OCF_LE_SET_EVENT_MASK: u16 = 0x0001;
pub const OCF_LE_READ_BUFFER_SIZE: u16 = 0x0002;
pub const OCF_LE_SET_RANDOM_ADDRESS: u16 = 0x0005;
pub const OCF_LE_SET_ADVERTISING_PARAMETERS: u16 = 0x0006;
pub const OCF_LE_SET_ADVERTISING_DATA: u16 = 0x0008;
pub const OCF_LE_SET_SCAN_RESPONSE_DATA: u16 = 0x0009;
pub const OCF_LE_SET_ADVERTISE_ENABLE: u16 = 0x000A;
pub const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
pub const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;
pub const OCF_LE_CREATE_CONNECTION: u16 = 0x000D;
pub const OCF_LE_CREATE_CONNECTION_CANCEL: u16 = 0x000E;
pub const OCF_LE_CONNECTION_UPDATE: u16 = 0x0013;

// HCI Events
pub const EVT_DISCONN_COMPLETE: u8 = 0x05;
pub const EVT_CMD_COMPLETE: u8 = 0x0E;
pub const EVT_CMD_STATUS: u8 = 0x0F;
pub const EVT_HARDWARE_ERROR: u8 = 0x10;
pub const EVT_NUM_COMP_PKTS: u8 = 0x13;
pub const EVT_DATA_BUFFER_OVERFLOW: u8 = 0x1A;
pub const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta Events
pub const EVT_LE_CONN_COMPLETE: u8 = 0x01;
pub const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;
pub const EVT_LE_CONN_UPDATE_COMPLETE: u8 = 0x03;

// HCI status codes
pub const HCI_SUCCESS: u8 = 0x00;
pub const HCI_UNKNOWN_CONN_ID: u8 = 0x02;
pub const HCI_CONN_LIMIT_EXCEEDED: u8 = 0x09;
pub const HCI_COMMAND_DISALLOWED: u8 = 0x0C;
pub const HCI_REMOTE_USER_TERMINATED: u8 = 0x13;

// LE connection complete roles
pub const LE_ROLE_CENTRAL: u8 = 0x00;
pub const LE_ROLE_PERIPHERAL: u8 = 0x01;
