// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport frames.
//!
//! ```text
//! ┌──────────┬───────┬──────────┬─────────────────────────────────────┐
//! │ type (3) │ chunk │ size u32 │ payload                             │
//! ├──────────┼───────┼──────────┼─────────────────────────────────────┤
//! │ HEL      │ F     │          │ version, buffers, limits, URL       │
//! │ ACK      │ F     │          │ version, buffers, limits            │
//! │ ERR      │ F     │          │ status, reason                      │
//! │ OPN      │ F     │          │ channel, asym. security, seq, body  │
//! │ MSG/CLO  │ F     │          │ channel, token, seq, body           │
//! └──────────┴───────┴──────────┴─────────────────────────────────────┘
//! ```
//!
//! Only final (`F`) chunks are produced. Inbound continuation chunks are
//! rejected.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::{UaReader, UaWriter};
use crate::error::{EncodingError, UaResult};
use crate::types::StatusCode;

/// Size of the fixed frame header.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Chunk marker for a final chunk.
pub const CHUNK_FINAL: u8 = b'F';

// =============================================================================
// MessageType
// =============================================================================

/// Three-letter frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    Acknowledge,
    Error,
    OpenSecureChannel,
    Message,
    CloseSecureChannel,
}

impl MessageType {
    /// ASCII code on the wire.
    pub const fn code(&self) -> &'static [u8; 3] {
        match self {
            Self::Hello => b"HEL",
            Self::Acknowledge => b"ACK",
            Self::Error => b"ERR",
            Self::OpenSecureChannel => b"OPN",
            Self::Message => b"MSG",
            Self::CloseSecureChannel => b"CLO",
        }
    }

    /// Parses the ASCII code.
    pub fn from_code(code: &[u8]) -> Option<Self> {
        Some(match code {
            b"HEL" => Self::Hello,
            b"ACK" => Self::Acknowledge,
            b"ERR" => Self::Error,
            b"OPN" => Self::OpenSecureChannel,
            b"MSG" => Self::Message,
            b"CLO" => Self::CloseSecureChannel,
            _ => return None,
        })
    }

    /// Returns `true` for frames that belong to a secure channel.
    pub const fn is_secure(&self) -> bool {
        matches!(
            self,
            Self::OpenSecureChannel | Self::Message | Self::CloseSecureChannel
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.code()))
    }
}

/// Parses a frame header, returning the type and total frame size.
pub fn parse_frame_header(header: &[u8]) -> UaResult<(MessageType, usize)> {
    if header.len() < FRAME_HEADER_SIZE {
        return Err(EncodingError::UnexpectedEof {
            structure: "FrameHeader",
        }
        .into());
    }
    let message_type = MessageType::from_code(&header[..3]).ok_or_else(|| {
        EncodingError::invalid(
            "FrameHeader",
            format!("unknown message type {:?}", String::from_utf8_lossy(&header[..3])),
        )
    })?;
    if header[3] != CHUNK_FINAL {
        return Err(EncodingError::invalid(
            "FrameHeader",
            format!("unsupported chunk type '{}'", header[3] as char),
        )
        .into());
    }
    let size = LittleEndian::read_u32(&header[4..8]) as usize;
    if size < FRAME_HEADER_SIZE {
        return Err(EncodingError::invalid("FrameHeader", format!("size {} too small", size)).into());
    }
    Ok((message_type, size))
}

// =============================================================================
// Connection-Protocol Messages
// =============================================================================

/// Hello payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
    pub endpoint_url: String,
}

/// Acknowledge payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcknowledgeMessage {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

/// Error payload sent by the server before closing the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub error: StatusCode,
    pub reason: Option<String>,
}

// =============================================================================
// Secure Frames
// =============================================================================

/// Asymmetric security header of OPN frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsymmetricSecurityHeader {
    pub security_policy_uri: String,
    pub sender_certificate: Option<Vec<u8>>,
    pub receiver_certificate_thumbprint: Option<Vec<u8>>,
}

/// Security header variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityHeader {
    /// OPN frames.
    Asymmetric(AsymmetricSecurityHeader),
    /// MSG and CLO frames.
    Symmetric { token_id: u32 },
}

/// A frame on an (opening or open) secure channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureFrame {
    /// OPN, MSG or CLO.
    pub message_type: MessageType,
    /// Secure channel id (0 while opening).
    pub channel_id: u32,
    /// Security header.
    pub security: SecurityHeader,
    /// Sequence number.
    pub sequence_number: u32,
    /// Request id used for correlation.
    pub request_id: u32,
    /// Service body (type id + structure), possibly enveloped.
    pub body: Vec<u8>,
}

impl SecureFrame {
    /// Token id of symmetric frames (0 for OPN).
    pub fn token_id(&self) -> u32 {
        match self.security {
            SecurityHeader::Symmetric { token_id } => token_id,
            SecurityHeader::Asymmetric(_) => 0,
        }
    }
}

// =============================================================================
// Frame
// =============================================================================

/// One complete transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Hello(HelloMessage),
    Acknowledge(AcknowledgeMessage),
    Error(ErrorMessage),
    Secure(SecureFrame),
}

impl Frame {
    /// Frame type.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Hello(_) => MessageType::Hello,
            Self::Acknowledge(_) => MessageType::Acknowledge,
            Self::Error(_) => MessageType::Error,
            Self::Secure(f) => f.message_type,
        }
    }

    /// Encodes the frame including its header.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = UaWriter::with_capacity(64);
        w.write_raw(self.message_type().code());
        w.write_u8(CHUNK_FINAL);
        w.write_u32(0);

        match self {
            Self::Hello(m) => {
                w.write_u32(m.protocol_version);
                w.write_u32(m.receive_buffer_size);
                w.write_u32(m.send_buffer_size);
                w.write_u32(m.max_message_size);
                w.write_u32(m.max_chunk_count);
                w.write_string(&m.endpoint_url);
            }
            Self::Acknowledge(m) => {
                w.write_u32(m.protocol_version);
                w.write_u32(m.receive_buffer_size);
                w.write_u32(m.send_buffer_size);
                w.write_u32(m.max_message_size);
                w.write_u32(m.max_chunk_count);
            }
            Self::Error(m) => {
                w.write_u32(m.error.0);
                w.write_opt_string(m.reason.as_deref());
            }
            Self::Secure(f) => {
                w.write_u32(f.channel_id);
                match &f.security {
                    SecurityHeader::Asymmetric(h) => {
                        w.write_string(&h.security_policy_uri);
                        w.write_byte_string(h.sender_certificate.as_deref());
                        w.write_byte_string(h.receiver_certificate_thumbprint.as_deref());
                    }
                    SecurityHeader::Symmetric { token_id } => w.write_u32(*token_id),
                }
                w.write_u32(f.sequence_number);
                w.write_u32(f.request_id);
                w.write_raw(&f.body);
            }
        }

        let size = u32::try_from(w.len()).unwrap_or(u32::MAX);
        w.patch_u32(4, size);
        w.into_inner()
    }

    /// Decodes one complete frame.
    pub fn decode(data: &[u8]) -> UaResult<Self> {
        let (message_type, size) = parse_frame_header(data)?;
        if size != data.len() {
            return Err(EncodingError::invalid(
                "Frame",
                format!("header size {} but {} bytes received", size, data.len()),
            )
            .into());
        }

        let mut r = UaReader::new(&data[FRAME_HEADER_SIZE..]);
        Ok(match message_type {
            MessageType::Hello => Self::Hello(HelloMessage {
                protocol_version: r.read_u32()?,
                receive_buffer_size: r.read_u32()?,
                send_buffer_size: r.read_u32()?,
                max_message_size: r.read_u32()?,
                max_chunk_count: r.read_u32()?,
                endpoint_url: r.read_string()?,
            }),
            MessageType::Acknowledge => Self::Acknowledge(AcknowledgeMessage {
                protocol_version: r.read_u32()?,
                receive_buffer_size: r.read_u32()?,
                send_buffer_size: r.read_u32()?,
                max_message_size: r.read_u32()?,
                max_chunk_count: r.read_u32()?,
            }),
            MessageType::Error => Self::Error(ErrorMessage {
                error: StatusCode(r.read_u32()?),
                reason: r.read_opt_string()?,
            }),
            secure => {
                let channel_id = r.read_u32()?;
                let security = if secure == MessageType::OpenSecureChannel {
                    SecurityHeader::Asymmetric(AsymmetricSecurityHeader {
                        security_policy_uri: r.read_string()?,
                        sender_certificate: r.read_byte_string()?,
                        receiver_certificate_thumbprint: r.read_byte_string()?,
                    })
                } else {
                    SecurityHeader::Symmetric {
                        token_id: r.read_u32()?,
                    }
                };
                let sequence_number = r.read_u32()?;
                let request_id = r.read_u32()?;
                Self::Secure(SecureFrame {
                    message_type: secure,
                    channel_id,
                    security,
                    sequence_number,
                    request_id,
                    body: r.rest().to_vec(),
                })
            }
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_layout() {
        let frame = Frame::Hello(HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 65535,
            send_buffer_size: 65535,
            max_message_size: 2_097_152,
            max_chunk_count: 64,
            endpoint_url: "opc.tcp://plc:4840".into(),
        });
        let bytes = frame.encode();
        assert_eq!(&bytes[..4], b"HELF");
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]) as usize, bytes.len());
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_secure_frames_decode() {
        let open = Frame::Secure(SecureFrame {
            message_type: MessageType::OpenSecureChannel,
            channel_id: 0,
            security: SecurityHeader::Asymmetric(AsymmetricSecurityHeader {
                security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#None".into(),
                sender_certificate: None,
                receiver_certificate_thumbprint: None,
            }),
            sequence_number: 1,
            request_id: 1,
            body: vec![0xAA, 0xBB],
        });
        assert_eq!(Frame::decode(&open.encode()).unwrap(), open);

        let msg = Frame::Secure(SecureFrame {
            message_type: MessageType::Message,
            channel_id: 7,
            security: SecurityHeader::Symmetric { token_id: 3 },
            sequence_number: 9,
            request_id: 9,
            body: vec![1, 2, 3],
        });
        let bytes = msg.encode();
        assert_eq!(&bytes[..4], b"MSGF");
        match Frame::decode(&bytes).unwrap() {
            Frame::Secure(f) => {
                assert_eq!(f.token_id(), 3);
                assert_eq!(f.body, vec![1, 2, 3]);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_rejects_continuation_chunks() {
        let mut bytes = Frame::Error(ErrorMessage {
            error: StatusCode::BAD_TIMEOUT,
            reason: None,
        })
        .encode();
        bytes[3] = b'C';
        assert!(Frame::decode(&bytes).is_err());
    }

    #[test]
    fn test_size_mismatch() {
        let mut bytes = Frame::Acknowledge(AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: 1,
            send_buffer_size: 1,
            max_message_size: 1,
            max_chunk_count: 1,
        })
        .encode();
        bytes.push(0);
        assert!(Frame::decode(&bytes).is_err());
    }
}
