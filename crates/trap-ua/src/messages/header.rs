// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Request and response headers carried by every service message.

use chrono::{DateTime, Utc};

use crate::codec::{BinaryDecode, BinaryEncode, DiagnosticInfo, ExtensionObject, UaReader, UaWriter};
use crate::error::UaResult;
use crate::types::{NodeId, StatusCode};

/// Header of every service request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHeader {
    /// Session authentication token (null before a session exists).
    pub authentication_token: NodeId,
    /// Client send time.
    pub timestamp: DateTime<Utc>,
    /// Client-assigned handle echoed by the server.
    pub request_handle: u32,
    /// Diagnostics bit mask.
    pub return_diagnostics: u32,
    /// Audit log entry id.
    pub audit_entry_id: Option<String>,
    /// Deadline hint in milliseconds.
    pub timeout_hint: u32,
    /// Reserved.
    pub additional_header: ExtensionObject,
}

impl RequestHeader {
    /// Creates a header stamped with the current time.
    pub fn new(authentication_token: NodeId, request_handle: u32, timeout_hint: u32) -> Self {
        Self {
            authentication_token,
            timestamp: Utc::now(),
            request_handle,
            return_diagnostics: 0,
            audit_entry_id: None,
            timeout_hint,
            additional_header: ExtensionObject::null(),
        }
    }
}

impl BinaryEncode for RequestHeader {
    fn encode(&self, w: &mut UaWriter) {
        self.authentication_token.encode(w);
        self.timestamp.encode(w);
        w.write_u32(self.request_handle);
        w.write_u32(self.return_diagnostics);
        w.write_opt_string(self.audit_entry_id.as_deref());
        w.write_u32(self.timeout_hint);
        self.additional_header.encode(w);
    }
}

impl BinaryDecode for RequestHeader {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            authentication_token: NodeId::decode(r)?,
            timestamp: DateTime::<Utc>::decode(r)?,
            request_handle: r.read_u32()?,
            return_diagnostics: r.read_u32()?,
            audit_entry_id: r.read_opt_string()?,
            timeout_hint: r.read_u32()?,
            additional_header: ExtensionObject::decode(r)?,
        })
    }
}

/// Header of every service response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHeader {
    /// Server send time.
    pub timestamp: DateTime<Utc>,
    /// Handle copied from the request.
    pub request_handle: u32,
    /// Service-level result.
    pub service_result: StatusCode,
    /// Service-level diagnostics.
    pub service_diagnostics: DiagnosticInfo,
    /// Strings referenced by diagnostics.
    pub string_table: Vec<String>,
    /// Reserved.
    pub additional_header: ExtensionObject,
}

impl ResponseHeader {
    /// Creates a header answering `request_handle` with `service_result`.
    pub fn new(request_handle: u32, service_result: StatusCode) -> Self {
        Self {
            timestamp: Utc::now(),
            request_handle,
            service_result,
            service_diagnostics: DiagnosticInfo::default(),
            string_table: Vec::new(),
            additional_header: ExtensionObject::null(),
        }
    }

    /// A Good header for `request_handle`.
    pub fn good(request_handle: u32) -> Self {
        Self::new(request_handle, StatusCode::GOOD)
    }
}

impl BinaryEncode for ResponseHeader {
    fn encode(&self, w: &mut UaWriter) {
        self.timestamp.encode(w);
        w.write_u32(self.request_handle);
        self.service_result.encode(w);
        self.service_diagnostics.encode(w);
        w.write_string_array(&self.string_table);
        self.additional_header.encode(w);
    }
}

impl BinaryDecode for ResponseHeader {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            timestamp: DateTime::<Utc>::decode(r)?,
            request_handle: r.read_u32()?,
            service_result: StatusCode::decode(r)?,
            service_diagnostics: DiagnosticInfo::decode(r)?,
            string_table: r.read_string_array()?,
            additional_header: ExtensionObject::decode(r)?,
        })
    }
}
