// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Built-in composite types of the OPC UA binary encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BinaryDecode, BinaryEncode, UaReader, UaWriter};
use crate::error::{EncodingError, UaResult};
use crate::types::{NodeId, NodeIdentifier, StatusCode};
use crate::variant::Variant;

// =============================================================================
// DateTime
// =============================================================================

/// 100 ns ticks between 1601-01-01 and 1970-01-01.
pub const EPOCH_OFFSET_TICKS: i64 = 116_444_736_000_000_000;

/// Converts a UTC timestamp to OPC UA ticks.
pub fn datetime_to_ticks(value: &DateTime<Utc>) -> i64 {
    value
        .timestamp_millis()
        .saturating_mul(10_000)
        .saturating_add(EPOCH_OFFSET_TICKS)
}

/// Converts OPC UA ticks to a UTC timestamp (millisecond precision).
///
/// Zero and out-of-range tick counts map to the Unix epoch.
pub fn ticks_to_datetime(ticks: i64) -> DateTime<Utc> {
    if ticks <= 0 {
        return DateTime::<Utc>::default();
    }
    DateTime::from_timestamp_millis((ticks - EPOCH_OFFSET_TICKS) / 10_000).unwrap_or_default()
}

impl BinaryEncode for DateTime<Utc> {
    fn encode(&self, writer: &mut UaWriter) {
        writer.write_i64(datetime_to_ticks(self));
    }
}

impl BinaryDecode for DateTime<Utc> {
    fn decode(reader: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(ticks_to_datetime(reader.read_i64()?))
    }
}

// =============================================================================
// StatusCode
// =============================================================================

impl BinaryEncode for StatusCode {
    fn encode(&self, writer: &mut UaWriter) {
        writer.write_u32(self.0);
    }
}

impl BinaryDecode for StatusCode {
    fn decode(reader: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(StatusCode(reader.read_u32()?))
    }
}

// =============================================================================
// NodeId / ExpandedNodeId
// =============================================================================

const NODE_ID_TWO_BYTE: u8 = 0x00;
const NODE_ID_FOUR_BYTE: u8 = 0x01;
const NODE_ID_NUMERIC: u8 = 0x02;
const NODE_ID_STRING: u8 = 0x03;
const NODE_ID_GUID: u8 = 0x04;
const NODE_ID_BYTE_STRING: u8 = 0x05;

const EXPANDED_NAMESPACE_URI_FLAG: u8 = 0x80;
const EXPANDED_SERVER_INDEX_FLAG: u8 = 0x40;

fn encode_node_id(node_id: &NodeId, flags: u8, writer: &mut UaWriter) {
    let ns = node_id.namespace_index;
    match &node_id.identifier {
        NodeIdentifier::Numeric(v) if ns == 0 && *v <= 0xFF => {
            writer.write_u8(NODE_ID_TWO_BYTE | flags);
            writer.write_u8(*v as u8);
        }
        NodeIdentifier::Numeric(v) if ns <= 0xFF && *v <= 0xFFFF => {
            writer.write_u8(NODE_ID_FOUR_BYTE | flags);
            writer.write_u8(ns as u8);
            writer.write_u16(*v as u16);
        }
        NodeIdentifier::Numeric(v) => {
            writer.write_u8(NODE_ID_NUMERIC | flags);
            writer.write_u16(ns);
            writer.write_u32(*v);
        }
        NodeIdentifier::String(s) => {
            writer.write_u8(NODE_ID_STRING | flags);
            writer.write_u16(ns);
            writer.write_string(s);
        }
        NodeIdentifier::Guid(g) => {
            writer.write_u8(NODE_ID_GUID | flags);
            writer.write_u16(ns);
            writer.write_guid(g);
        }
        NodeIdentifier::Opaque(b) => {
            writer.write_u8(NODE_ID_BYTE_STRING | flags);
            writer.write_u16(ns);
            writer.write_byte_string(Some(b));
        }
    }
}

/// Decodes a NodeId body, returning it together with the expanded flags.
fn decode_node_id(reader: &mut UaReader<'_>) -> UaResult<(NodeId, u8)> {
    let encoding = reader.read_u8()?;
    let flags = encoding & (EXPANDED_NAMESPACE_URI_FLAG | EXPANDED_SERVER_INDEX_FLAG);
    let node_id = match encoding & 0x3F {
        NODE_ID_TWO_BYTE => NodeId::numeric(0, u32::from(reader.read_u8()?)),
        NODE_ID_FOUR_BYTE => {
            let ns = u16::from(reader.read_u8()?);
            NodeId::numeric(ns, u32::from(reader.read_u16()?))
        }
        NODE_ID_NUMERIC => {
            let ns = reader.read_u16()?;
            NodeId::numeric(ns, reader.read_u32()?)
        }
        NODE_ID_STRING => {
            let ns = reader.read_u16()?;
            NodeId::string(ns, reader.read_string()?)
        }
        NODE_ID_GUID => {
            let ns = reader.read_u16()?;
            NodeId::guid(ns, reader.read_guid()?)
        }
        NODE_ID_BYTE_STRING => {
            let ns = reader.read_u16()?;
            NodeId::opaque(ns, reader.read_byte_string()?.unwrap_or_default())
        }
        other => {
            return Err(EncodingError::invalid(
                "NodeId",
                format!("unknown encoding byte 0x{:02X}", other),
            )
            .into())
        }
    };
    Ok((node_id, flags))
}

impl BinaryEncode for NodeId {
    fn encode(&self, writer: &mut UaWriter) {
        encode_node_id(self, 0, writer);
    }
}

impl BinaryDecode for NodeId {
    fn decode(reader: &mut UaReader<'_>) -> UaResult<Self> {
        let (node_id, flags) = decode_node_id(reader)?;
        if flags != 0 {
            return Err(EncodingError::invalid("NodeId", "expanded flags on plain NodeId").into());
        }
        Ok(node_id)
    }
}

/// NodeId qualified with an optional namespace URI and server index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpandedNodeId {
    /// The local node id.
    pub node_id: NodeId,
    /// Namespace URI overriding the namespace index.
    pub namespace_uri: Option<String>,
    /// Server index (0 = local server).
    pub server_index: u32,
}

impl BinaryEncode for ExpandedNodeId {
    fn encode(&self, writer: &mut UaWriter) {
        let mut flags = 0;
        if self.namespace_uri.is_some() {
            flags |= EXPANDED_NAMESPACE_URI_FLAG;
        }
        if self.server_index != 0 {
            flags |= EXPANDED_SERVER_INDEX_FLAG;
        }
        encode_node_id(&self.node_id, flags, writer);
        if let Some(uri) = &self.namespace_uri {
            writer.write_string(uri);
        }
        if self.server_index != 0 {
            writer.write_u32(self.server_index);
        }
    }
}

impl BinaryDecode for ExpandedNodeId {
    fn decode(reader: &mut UaReader<'_>) -> UaResult<Self> {
        let (node_id, flags) = decode_node_id(reader)?;
        let namespace_uri = if flags & EXPANDED_NAMESPACE_URI_FLAG != 0 {
            reader.read_opt_string()?
        } else {
            None
        };
        let server_index = if flags & EXPANDED_SERVER_INDEX_FLAG != 0 {
            reader.read_u32()?
        } else {
            0
        };
        Ok(Self {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

// =============================================================================
// QualifiedName / LocalizedText
// =============================================================================

/// Namespace-qualified browse name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Namespace index.
    pub namespace_index: u16,
    /// Name text.
    pub name: String,
}

impl QualifiedName {
    /// Creates a qualified name.
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
        }
    }

    /// Returns `true` for the null name.
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && self.name.is_empty()
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ns={};s={}", self.namespace_index, self.name)
    }
}

impl BinaryEncode for QualifiedName {
    fn encode(&self, writer: &mut UaWriter) {
        writer.write_u16(self.namespace_index);
        if self.name.is_empty() {
            writer.write_opt_string(None);
        } else {
            writer.write_string(&self.name);
        }
    }
}

impl BinaryDecode for QualifiedName {
    fn decode(reader: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            namespace_index: reader.read_u16()?,
            name: reader.read_string()?,
        })
    }
}

/// Human-readable text with an optional locale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalizedText {
    /// Locale identifier (e.g. "en-US").
    pub locale: Option<String>,
    /// Text.
    pub text: Option<String>,
}

impl LocalizedText {
    /// Creates text without a locale.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            locale: None,
            text: Some(text.into()),
        }
    }
}

impl std::fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}",
            self.locale.as_deref().unwrap_or(""),
            self.text.as_deref().unwrap_or("")
        )
    }
}

impl BinaryEncode for LocalizedText {
    fn encode(&self, writer: &mut UaWriter) {
        let mut mask = 0u8;
        if self.locale.is_some() {
            mask |= 0x01;
        }
        if self.text.is_some() {
            mask |= 0x02;
        }
        writer.write_u8(mask);
        if let Some(locale) = &self.locale {
            writer.write_string(locale);
        }
        if let Some(text) = &self.text {
            writer.write_string(text);
        }
    }
}

impl BinaryDecode for LocalizedText {
    fn decode(reader: &mut UaReader<'_>) -> UaResult<Self> {
        let mask = reader.read_u8()?;
        let locale = if mask & 0x01 != 0 {
            reader.read_opt_string()?
        } else {
            None
        };
        let text = if mask & 0x02 != 0 {
            reader.read_opt_string()?
        } else {
            None
        };
        Ok(Self { locale, text })
    }
}

// =============================================================================
// ExtensionObject
// =============================================================================

/// A structure wrapped with its binary encoding id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionObject {
    /// Binary encoding node id of the wrapped structure.
    pub type_id: NodeId,
    /// Encoded body, `None` when the object is empty.
    pub body: Option<Vec<u8>>,
}

impl ExtensionObject {
    /// The empty extension object (null type id, no body).
    pub fn null() -> Self {
        Self::default()
    }

    /// Wraps an encodable value under a numeric ns=0 type id.
    pub fn from_encodable<T: BinaryEncode>(type_id: u32, value: &T) -> Self {
        Self {
            type_id: NodeId::numeric(0, type_id),
            body: Some(super::encode_to_vec(value)),
        }
    }

    /// Returns `true` if there is no body.
    pub fn is_null(&self) -> bool {
        self.body.is_none()
    }

    /// Decodes the body as `T` after checking the type id.
    pub fn decode_as<T: BinaryDecode>(&self, type_id: u32) -> UaResult<T> {
        if self.type_id.as_numeric() != Some(type_id) {
            return Err(EncodingError::invalid(
                "ExtensionObject",
                format!("expected type {} but found {}", type_id, self.type_id),
            )
            .into());
        }
        let body = self
            .body
            .as_deref()
            .ok_or(EncodingError::UnexpectedEof {
                structure: "ExtensionObject",
            })?;
        super::decode_from_slice(body)
    }
}

impl BinaryEncode for ExtensionObject {
    fn encode(&self, writer: &mut UaWriter) {
        self.type_id.encode(writer);
        match &self.body {
            Some(body) => {
                writer.write_u8(0x01);
                writer.write_byte_string(Some(body));
            }
            None => writer.write_u8(0x00),
        }
    }
}

impl BinaryDecode for ExtensionObject {
    fn decode(reader: &mut UaReader<'_>) -> UaResult<Self> {
        let type_id = NodeId::decode(reader)?;
        let body = match reader.read_u8()? {
            0x00 => None,
            // binary and XML bodies share the length-prefixed layout
            0x01 | 0x02 => reader.read_byte_string()?,
            other => {
                return Err(EncodingError::invalid(
                    "ExtensionObject",
                    format!("unknown body encoding 0x{:02X}", other),
                )
                .into())
            }
        };
        Ok(Self { type_id, body })
    }
}

// =============================================================================
// DiagnosticInfo
// =============================================================================

/// Vendor diagnostics attached to responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticInfo {
    pub symbolic_id: Option<i32>,
    pub namespace_uri: Option<i32>,
    pub locale: Option<i32>,
    pub localized_text: Option<i32>,
    pub additional_info: Option<String>,
    pub inner_status_code: Option<StatusCode>,
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl BinaryEncode for DiagnosticInfo {
    fn encode(&self, writer: &mut UaWriter) {
        let mut mask = 0u8;
        if self.symbolic_id.is_some() {
            mask |= 0x01;
        }
        if self.namespace_uri.is_some() {
            mask |= 0x02;
        }
        if self.localized_text.is_some() {
            mask |= 0x04;
        }
        if self.locale.is_some() {
            mask |= 0x08;
        }
        if self.additional_info.is_some() {
            mask |= 0x10;
        }
        if self.inner_status_code.is_some() {
            mask |= 0x20;
        }
        if self.inner_diagnostic_info.is_some() {
            mask |= 0x40;
        }
        writer.write_u8(mask);
        if let Some(v) = self.symbolic_id {
            writer.write_i32(v);
        }
        if let Some(v) = self.namespace_uri {
            writer.write_i32(v);
        }
        if let Some(v) = self.locale {
            writer.write_i32(v);
        }
        if let Some(v) = self.localized_text {
            writer.write_i32(v);
        }
        if let Some(v) = &self.additional_info {
            writer.write_string(v);
        }
        if let Some(v) = self.inner_status_code {
            v.encode(writer);
        }
        if let Some(v) = &self.inner_diagnostic_info {
            v.encode(writer);
        }
    }
}

impl BinaryDecode for DiagnosticInfo {
    fn decode(reader: &mut UaReader<'_>) -> UaResult<Self> {
        let mask = reader.read_u8()?;
        let mut info = Self::default();
        if mask & 0x01 != 0 {
            info.symbolic_id = Some(reader.read_i32()?);
        }
        if mask & 0x02 != 0 {
            info.namespace_uri = Some(reader.read_i32()?);
        }
        if mask & 0x08 != 0 {
            info.locale = Some(reader.read_i32()?);
        }
        if mask & 0x04 != 0 {
            info.localized_text = Some(reader.read_i32()?);
        }
        if mask & 0x10 != 0 {
            info.additional_info = reader.read_opt_string()?;
        }
        if mask & 0x20 != 0 {
            info.inner_status_code = Some(StatusCode::decode(reader)?);
        }
        if mask & 0x40 != 0 {
            info.inner_diagnostic_info =
                Some(Box::new(reader.nested("DiagnosticInfo", DiagnosticInfo::decode)?));
        }
        Ok(info)
    }
}

// =============================================================================
// DataValue
// =============================================================================

const DATA_VALUE_VALUE: u8 = 0x01;
const DATA_VALUE_STATUS: u8 = 0x02;
const DATA_VALUE_SOURCE_TIMESTAMP: u8 = 0x04;
const DATA_VALUE_SERVER_TIMESTAMP: u8 = 0x08;
const DATA_VALUE_SOURCE_PICOSECONDS: u8 = 0x10;
const DATA_VALUE_SERVER_PICOSECONDS: u8 = 0x20;

/// A value with its status and timestamps. Absent parts are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataValue {
    pub value: Option<Variant>,
    pub status: Option<StatusCode>,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub source_picoseconds: Option<u16>,
    pub server_timestamp: Option<DateTime<Utc>>,
    pub server_picoseconds: Option<u16>,
}

impl DataValue {
    /// A value with Good status and no timestamps.
    pub fn new(value: Variant) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }

    /// A value-less result carrying only a status.
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// The status, where an absent status means Good.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::GOOD)
    }
}

impl BinaryEncode for DataValue {
    fn encode(&self, writer: &mut UaWriter) {
        let mut mask = 0u8;
        if self.value.is_some() {
            mask |= DATA_VALUE_VALUE;
        }
        if self.status.is_some() {
            mask |= DATA_VALUE_STATUS;
        }
        if self.source_timestamp.is_some() {
            mask |= DATA_VALUE_SOURCE_TIMESTAMP;
        }
        if self.server_timestamp.is_some() {
            mask |= DATA_VALUE_SERVER_TIMESTAMP;
        }
        if self.source_picoseconds.is_some() {
            mask |= DATA_VALUE_SOURCE_PICOSECONDS;
        }
        if self.server_picoseconds.is_some() {
            mask |= DATA_VALUE_SERVER_PICOSECONDS;
        }
        writer.write_u8(mask);
        if let Some(v) = &self.value {
            v.encode(writer);
        }
        if let Some(v) = self.status {
            v.encode(writer);
        }
        if let Some(v) = &self.source_timestamp {
            v.encode(writer);
        }
        if let Some(v) = self.source_picoseconds {
            writer.write_u16(v);
        }
        if let Some(v) = &self.server_timestamp {
            v.encode(writer);
        }
        if let Some(v) = self.server_picoseconds {
            writer.write_u16(v);
        }
    }
}

impl BinaryDecode for DataValue {
    fn decode(reader: &mut UaReader<'_>) -> UaResult<Self> {
        let mask = reader.read_u8()?;
        let mut dv = Self::default();
        if mask & DATA_VALUE_VALUE != 0 {
            dv.value = Some(Variant::decode(reader)?);
        }
        if mask & DATA_VALUE_STATUS != 0 {
            dv.status = Some(StatusCode::decode(reader)?);
        }
        if mask & DATA_VALUE_SOURCE_TIMESTAMP != 0 {
            dv.source_timestamp = Some(DateTime::<Utc>::decode(reader)?);
        }
        if mask & DATA_VALUE_SOURCE_PICOSECONDS != 0 {
            dv.source_picoseconds = Some(reader.read_u16()?);
        }
        if mask & DATA_VALUE_SERVER_TIMESTAMP != 0 {
            dv.server_timestamp = Some(DateTime::<Utc>::decode(reader)?);
        }
        if mask & DATA_VALUE_SERVER_PICOSECONDS != 0 {
            dv.server_picoseconds = Some(reader.read_u16()?);
        }
        Ok(dv)
    }
}

// =============================================================================
// Tests
// =============================================================================
