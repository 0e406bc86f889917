//! L2CAP LE signaling channel
//!
//! Only the commands an LE link without connection-oriented channels needs
//! are modeled: command reject and the connection parameter update
//! exchange. Anything else parses as [`SignalingMessage::Unknown`] and is
//! answered with a reject.

use super::constants::*;
use super::packet::*;
use super::types::*;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Handle for identifying signaling transactions
pub type SignalId = u8;

/// L2CAP LE signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    /// Command Reject
    CommandReject {
        identifier: SignalId,
        reason: u16,
        data: Vec<u8>,
    },

    /// Connection Parameter Update Request
    ConnectionParameterUpdateRequest {
        identifier: SignalId,
        params: ConnectionParameterUpdate,
    },

    /// Connection Parameter Update Response
    ConnectionParameterUpdateResponse { identifier: SignalId, result: u16 },

    /// Any command this stack does not implement
    Unknown { code: u8, identifier: SignalId },
}

impl SignalingMessage {
    /// Get the command code for this message
    pub fn command_code(&self) -> u8 {
        match self {
            Self::CommandReject { .. } => L2CAP_COMMAND_REJECT,
            Self::ConnectionParameterUpdateRequest { .. } => {
                L2CAP_CONNECTION_PARAMETER_UPDATE_REQUEST
            }
            Self::ConnectionParameterUpdateResponse { .. } => {
                L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE
            }
            Self::Unknown { code, .. } => *code,
        }
    }

    /// Get the identifier for this message
    pub fn identifier(&self) -> SignalId {
        match self {
            Self::CommandReject { identifier, .. }
            | Self::ConnectionParameterUpdateRequest { identifier, .. }
            | Self::ConnectionParameterUpdateResponse { identifier, .. }
            | Self::Unknown { identifier, .. } => *identifier,
        }
    }

    /// Parse a signaling message from a signaling frame payload
    pub fn parse(data: &[u8]) -> Result<Self, L2capError> {
        let cmd_header = L2capCommandHeader::parse(data)
            .ok_or_else(|| L2capError::InvalidParameter("Signaling data too short".into()))?;

        let params = &data[L2CAP_COMMAND_HEADER_SIZE..];
        if params.len() < cmd_header.length as usize {
            return Err(L2capError::InvalidParameter(
                "Command parameters too short".into(),
            ));
        }
        let params = &params[..cmd_header.length as usize];
        let short = |what: &str| L2capError::InvalidParameter(format!("{} too short", what));

        match cmd_header.code {
            L2CAP_COMMAND_REJECT => {
                let mut cursor = Cursor::new(params);
                let reason = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| short("Command reject"))?;

                Ok(Self::CommandReject {
                    identifier: cmd_header.identifier,
                    reason,
                    data: params[2..].to_vec(),
                })
            }

            L2CAP_CONNECTION_PARAMETER_UPDATE_REQUEST => {
                let mut cursor = Cursor::new(params);
                let mut next = || {
                    cursor
                        .read_u16::<LittleEndian>()
                        .map_err(|_| short("Connection parameter update request"))
                };
                let params = ConnectionParameterUpdate {
                    conn_interval_min: next()?,
                    conn_interval_max: next()?,
                    conn_latency: next()?,
                    supervision_timeout: next()?,
                };

                Ok(Self::ConnectionParameterUpdateRequest {
                    identifier: cmd_header.identifier,
                    params,
                })
            }

            L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE => {
                let mut cursor = Cursor::new(params);
                let result = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| short("Connection parameter update response"))?;

                Ok(Self::ConnectionParameterUpdateResponse {
                    identifier: cmd_header.identifier,
                    result,
                })
            }

            code => Ok(Self::Unknown {
                code,
                identifier: cmd_header.identifier,
            }),
        }
    }

    /// Serialize the signaling message to bytes for transmission
    pub fn serialize(&self) -> Vec<u8> {
        let params = match self {
            Self::CommandReject { reason, data, .. } => {
                let mut params = Vec::with_capacity(2 + data.len());
                params.extend_from_slice(&reason.to_le_bytes());
                params.extend_from_slice(data);
                params
            }

            Self::ConnectionParameterUpdateRequest { params: conn, .. } => {
                let mut params = Vec::with_capacity(8);
                params.extend_from_slice(&conn.conn_interval_min.to_le_bytes());
                params.extend_from_slice(&conn.conn_interval_max.to_le_bytes());
                params.extend_from_slice(&conn.conn_latency.to_le_bytes());
                params.extend_from_slice(&conn.supervision_timeout.to_le_bytes());
                params
            }

            Self::ConnectionParameterUpdateResponse { result, .. } => result.to_le_bytes().to_vec(),

            Self::Unknown { .. } => Vec::new(),
        };

        let cmd_header =
            L2capCommandHeader::new(self.command_code(), self.identifier(), params.len() as u16);

        let mut result = Vec::with_capacity(L2CAP_COMMAND_HEADER_SIZE + params.len());
        result.extend_from_slice(&cmd_header.to_bytes());
        result.extend_from_slice(&params);
        result
    }

    /// Frame this message for the LE signaling channel
    pub fn to_pdu(&self) -> Vec<u8> {
        encode_pdu(L2CAP_LE_SIGNALING_CID, &self.serialize())
    }
}
