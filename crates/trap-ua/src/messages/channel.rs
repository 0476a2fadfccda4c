// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OpenSecureChannel and CloseSecureChannel service bodies.

use chrono::{DateTime, Utc};

use super::header::{RequestHeader, ResponseHeader};
use crate::codec::{BinaryDecode, BinaryEncode, UaReader, UaWriter};
use crate::error::UaResult;
use crate::types::{MessageSecurityMode, SecurityTokenRequestType};

/// Issues or renews a channel security token.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSecureChannelRequest {
    pub request_header: RequestHeader,
    pub client_protocol_version: u32,
    pub request_type: SecurityTokenRequestType,
    pub security_mode: MessageSecurityMode,
    pub client_nonce: Option<Vec<u8>>,
    pub requested_lifetime: u32,
}

impl BinaryEncode for OpenSecureChannelRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
        w.write_u32(self.client_protocol_version);
        w.write_u32(self.request_type.value());
        w.write_u32(self.security_mode.value());
        w.write_byte_string(self.client_nonce.as_deref());
        w.write_u32(self.requested_lifetime);
    }
}

impl BinaryDecode for OpenSecureChannelRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
            client_protocol_version: r.read_u32()?,
            request_type: SecurityTokenRequestType::from_value(r.read_u32()?),
            security_mode: MessageSecurityMode::from_value(r.read_u32()?),
            client_nonce: r.read_byte_string()?,
            requested_lifetime: r.read_u32()?,
        })
    }
}

/// Channel id, token id and lifetime assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSecurityToken {
    pub channel_id: u32,
    pub token_id: u32,
    pub created_at: DateTime<Utc>,
    pub revised_lifetime: u32,
}

impl BinaryEncode for ChannelSecurityToken {
    fn encode(&self, w: &mut UaWriter) {
        w.write_u32(self.channel_id);
        w.write_u32(self.token_id);
        self.created_at.encode(w);
        w.write_u32(self.revised_lifetime);
    }
}

impl BinaryDecode for ChannelSecurityToken {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            channel_id: r.read_u32()?,
            token_id: r.read_u32()?,
            created_at: DateTime::<Utc>::decode(r)?,
            revised_lifetime: r.read_u32()?,
        })
    }
}

/// Response to [`OpenSecureChannelRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct OpenSecureChannelResponse {
    pub response_header: ResponseHeader,
    pub server_protocol_version: u32,
    pub security_token: ChannelSecurityToken,
    pub server_nonce: Option<Vec<u8>>,
}

impl BinaryEncode for OpenSecureChannelResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
        w.write_u32(self.server_protocol_version);
        self.security_token.encode(w);
        w.write_byte_string(self.server_nonce.as_deref());
    }
}

impl BinaryDecode for OpenSecureChannelResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
            server_protocol_version: r.read_u32()?,
            security_token: ChannelSecurityToken::decode(r)?,
            server_nonce: r.read_byte_string()?,
        })
    }
}

/// Closes the secure channel. Servers usually drop the socket instead of answering.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseSecureChannelRequest {
    pub request_header: RequestHeader,
}

impl BinaryEncode for CloseSecureChannelRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
    }
}

impl BinaryDecode for CloseSecureChannelRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseSecureChannelResponse {
    pub response_header: ResponseHeader,
}

impl BinaryEncode for CloseSecureChannelResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
    }
}

impl BinaryDecode for CloseSecureChannelResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
        })
    }
}
