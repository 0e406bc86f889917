//! L2CAP Packet handling
//!
//! This module provides the basic frame header, the signaling command
//! header, and SDU segmentation into frames.

use super::constants::*;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// L2CAP Packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capHeader {
    /// Length of the L2CAP payload in bytes
    pub length: u16,
    /// Channel Identifier
    pub channel_id: u16,
}

impl L2capHeader {
    /// Create a new L2CAP header
    pub fn new(length: u16, channel_id: u16) -> Self {
        Self { length, channel_id }
    }

    /// Parse an L2CAP header from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < L2CAP_BASIC_HEADER_SIZE {
            return None;
        }

        let mut cursor = Cursor::new(data);
        let length = cursor.read_u16::<LittleEndian>().ok()?;
        let channel_id = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self { length, channel_id })
    }

    /// Serialize the header to bytes
    pub fn to_bytes(&self) -> [u8; L2CAP_BASIC_HEADER_SIZE] {
        let mut result = [0u8; L2CAP_BASIC_HEADER_SIZE];
        LittleEndian::write_u16(&mut result[0..2], self.length);
        LittleEndian::write_u16(&mut result[2..4], self.channel_id);
        result
    }

    /// Size of the whole frame this header announces
    pub fn frame_size(&self) -> usize {
        L2CAP_BASIC_HEADER_SIZE + self.length as usize
    }
}

/// Build one basic frame: header followed by `payload`
pub fn encode_pdu(channel_id: u16, payload: &[u8]) -> Vec<u8> {
    let header = L2capHeader::new(payload.len() as u16, channel_id);
    let mut pdu = Vec::with_capacity(L2CAP_BASIC_HEADER_SIZE + payload.len());
    pdu.extend_from_slice(&header.to_bytes());
    pdu.extend_from_slice(payload);
    pdu
}

/// Split an SDU into the frames that carry it
///
/// In basic mode the SDU travels as a single frame. In LE-frame mode the
/// first frame starts with the 2-byte SDU length, and no frame payload
/// exceeds `mps`.
pub fn segment_sdu(channel_id: u16, sdu: &[u8], mps: usize, le_frame: bool) -> Vec<Vec<u8>> {
    if !le_frame {
        return vec![encode_pdu(channel_id, sdu)];
    }

    let mps = mps.max(L2CAP_SDU_LENGTH_SIZE + 1);
    let mut frames = Vec::new();

    let first_len = sdu.len().min(mps - L2CAP_SDU_LENGTH_SIZE);
    let mut first = Vec::with_capacity(L2CAP_SDU_LENGTH_SIZE + first_len);
    first.extend_from_slice(&(sdu.len() as u16).to_le_bytes());
    first.extend_from_slice(&sdu[..first_len]);
    frames.push(encode_pdu(channel_id, &first));

    for segment in sdu[first_len..].chunks(mps) {
        frames.push(encode_pdu(channel_id, segment));
    }
    frames
}

/// L2CAP Command header used in signaling packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capCommandHeader {
    /// Command code
    pub code: u8,
    /// Command identifier
    pub identifier: u8,
    /// Length of command parameters
    pub length: u16,
}

impl L2capCommandHeader {
    /// Create a new command header
    pub fn new(code: u8, identifier: u8, length: u16) -> Self {
        Self {
            code,
            identifier,
            length,
        }
    }

    /// Parse a command header from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < L2CAP_COMMAND_HEADER_SIZE {
            return None;
        }

        Some(Self {
            code: data[0],
            identifier: data[1],
            length: LittleEndian::read_u16(&data[2..4]),
        })
    }

    /// Serialize the command header to bytes
    pub fn to_bytes(&self) -> [u8; L2CAP_COMMAND_HEADER_SIZE] {
        let mut result = [0u8; L2CAP_COMMAND_HEADER_SIZE];
        result[0] = self.code;
        result[1] = self.identifier;
        LittleEndian::write_u16(&mut result[2..4], self.length);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = L2capHeader::new(0x0017, L2CAP_ATTRIBUTE_PROTOCOL_CID);
        let bytes = header.to_bytes();
        assert_eq!(bytes, [0x17, 0x00, 0x04, 0x00]);
        assert_eq!(L2capHeader::parse(&bytes), Some(header));
        assert_eq!(header.frame_size(), 27);
        assert!(L2capHeader::parse(&bytes[..3]).is_none());
    }

    #[test]
    fn test_segment_basic_mode() {
        let frames = segment_sdu(L2CAP_ATTRIBUTE_PROTOCOL_CID, &[0xAA; 40], 23, false);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..4], &[40, 0, 0x04, 0x00]);
        assert_eq!(frames[0].len(), 44);
    }

    #[test]
    fn test_segment_le_frame_mode() {
        let sdu: Vec<u8> = (0..50).collect();
        let frames = segment_sdu(0x0040, &sdu, 23, true);

        // 21 bytes after the SDU length, then 23 + 6
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..6], &[23, 0, 0x40, 0x00, 50, 0]);
        assert_eq!(&frames[0][6..], &sdu[..21]);
        assert_eq!(&frames[1][4..], &sdu[21..44]);
        assert_eq!(&frames[2][4..], &sdu[44..]);

        // Empty SDUs still carry their length
        let frames = segment_sdu(0x0040, &[], 23, true);
        assert_eq!(frames, vec![vec![2, 0, 0x40, 0x00, 0, 0]]);
    }

    #[test]
    fn test_command_header() {
        let header = L2capCommandHeader::new(L2CAP_COMMAND_REJECT, 7, 2);
        assert_eq!(header.to_bytes(), [0x01, 7, 2, 0]);
        assert_eq!(L2capCommandHeader::parse(&header.to_bytes()), Some(header));
    }
}
