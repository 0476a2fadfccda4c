// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Read and Write service bodies.

use super::header::{RequestHeader, ResponseHeader};
use crate::codec::{
    BinaryDecode, BinaryEncode, DataValue, DiagnosticInfo, QualifiedName, UaReader, UaWriter,
};
use crate::error::UaResult;
use crate::types::{AttributeId, NodeId, StatusCode, TimestampsToReturn};

/// Addresses one attribute of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadValueId {
    pub node_id: NodeId,
    pub attribute_id: u32,
    pub index_range: Option<String>,
    pub data_encoding: QualifiedName,
}

impl ReadValueId {
    /// The `Value` attribute of `node_id`.
    pub fn value_of(node_id: NodeId) -> Self {
        Self {
            node_id,
            attribute_id: AttributeId::Value.value(),
            index_range: None,
            data_encoding: QualifiedName::default(),
        }
    }
}

impl BinaryEncode for ReadValueId {
    fn encode(&self, w: &mut UaWriter) {
        self.node_id.encode(w);
        w.write_u32(self.attribute_id);
        w.write_opt_string(self.index_range.as_deref());
        self.data_encoding.encode(w);
    }
}

impl BinaryDecode for ReadValueId {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            node_id: NodeId::decode(r)?,
            attribute_id: r.read_u32()?,
            index_range: r.read_opt_string()?,
            data_encoding: QualifiedName::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub request_header: RequestHeader,
    pub max_age: f64,
    pub timestamps_to_return: TimestampsToReturn,
    pub nodes_to_read: Vec<ReadValueId>,
}

impl BinaryEncode for ReadRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
        w.write_f64(self.max_age);
        w.write_u32(self.timestamps_to_return.value());
        w.write_array(&self.nodes_to_read);
    }
}

impl BinaryDecode for ReadRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
            max_age: r.read_f64()?,
            timestamps_to_return: TimestampsToReturn::from_value(r.read_u32()?),
            nodes_to_read: r.read_array()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    pub response_header: ResponseHeader,
    pub results: Vec<DataValue>,
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for ReadResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
        w.write_array(&self.results);
        w.write_array(&self.diagnostic_infos);
    }
}

impl BinaryDecode for ReadResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
            results: r.read_array()?,
            diagnostic_infos: r.read_array()?,
        })
    }
}

/// One attribute write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteValue {
    pub node_id: NodeId,
    pub attribute_id: u32,
    pub index_range: Option<String>,
    pub value: DataValue,
}

impl BinaryEncode for WriteValue {
    fn encode(&self, w: &mut UaWriter) {
        self.node_id.encode(w);
        w.write_u32(self.attribute_id);
        w.write_opt_string(self.index_range.as_deref());
        self.value.encode(w);
    }
}

impl BinaryDecode for WriteValue {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            node_id: NodeId::decode(r)?,
            attribute_id: r.read_u32()?,
            index_range: r.read_opt_string()?,
            value: DataValue::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub request_header: RequestHeader,
    pub nodes_to_write: Vec<WriteValue>,
}

impl BinaryEncode for WriteRequest {
    fn encode(&self, w: &mut UaWriter) {
        self.request_header.encode(w);
        w.write_array(&self.nodes_to_write);
    }
}

impl BinaryDecode for WriteRequest {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            request_header: RequestHeader::decode(r)?,
            nodes_to_write: r.read_array()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteResponse {
    pub response_header: ResponseHeader,
    pub results: Vec<StatusCode>,
    pub diagnostic_infos: Vec<DiagnosticInfo>,
}

impl BinaryEncode for WriteResponse {
    fn encode(&self, w: &mut UaWriter) {
        self.response_header.encode(w);
        w.write_array(&self.results);
        w.write_array(&self.diagnostic_infos);
    }
}

impl BinaryDecode for WriteResponse {
    fn decode(r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(Self {
            response_header: ResponseHeader::decode(r)?,
            results: r.read_array()?,
            diagnostic_infos: r.read_array()?,
        })
    }
}
