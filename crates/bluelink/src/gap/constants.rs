// Address types
pub const PUBLIC_DEVICE_ADDRESS: u8 = 0x00;
pub const RANDOM_DEVICE_ADDRESS: u8 = 0x01;
pub const PUBLIC_IDENTITY_ADDRESS: u8 = 0x02;
pub const RANDOM_IDENTITY_ADDRESS: u8 = 0x03;

// LE Scan parameters
pub const LE_SCAN_PASSIVE: u8 = 0x00;
pub const LE_SCAN_ACTIVE: u8 = 0x01;
pub const LE_SCAN_INTERVAL: u16 = 0x0010; // 10 ms
pub const LE_SCAN_WINDOW: u16 = 0x0010; // 10 ms

// LE Connection parameters
pub const LE_CONN_INTERVAL_MIN: u16 = 0x0006; // 7.5 ms
pub const LE_CONN_INTERVAL_MAX: u16 = 0x0008; // 10 ms
pub const LE_CONN_LATENCY: u16 = 0x0000; // 0
pub const LE_SUPERVISION_TIMEOUT: u16 = 0x0048; // 720 ms
pub const LE_MIN_CE_LENGTH: u16 = 0x0000; // 0 ms
pub const LE_MAX_CE_LENGTH: u16 = 0x0000; // 0 ms

// LE Advertising parameters
pub const LE_ADV_INTERVAL_MIN: u16 = 0x0020; // 20 ms
pub const LE_ADV_INTERVAL_MAX: u16 = 0x0020; // 20 ms
pub const LE_ADV_CHANNEL_ALL: u8 = 0x07;

// Advertising event types
pub const ADV_IND: u8 = 0x00;
pub const ADV_DIRECT_IND: u8 = 0x01;
pub const ADV_NONCONN_IND: u8 = 0x03;

// Advertising payloads are limited to 31 bytes
pub const MAX_ADV_DATA_LEN: usize = 31;
