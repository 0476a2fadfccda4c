// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Variant codec.
//!
//! [`Variant`] is the wire's tagged union. This module owns both directions of
//! its mapping:
//!
//! - **wire ⇄ Variant**: [`BinaryEncode`]/[`BinaryDecode`] with the encoding
//!   mask (low six bits type id, `0x80` array, `0x40` dimensions)
//! - **Variant → PlcValue**: [`Variant::to_plc_value`], used by read responses
//!   and data change notifications
//! - **PlcValue → Variant**: [`Variant::from_plc_value`], used by writes; the
//!   declared [`PlcDataType`] picks the wire type, or it is inferred from the
//!   first element when the declared type is unresolved
//!
//! A single element is always encoded as a scalar; anything else sets the
//! array flag with the element count.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::codec::{
    BinaryDecode, BinaryEncode, DataValue, DiagnosticInfo, ExpandedNodeId, ExtensionObject,
    LocalizedText, QualifiedName, UaReader, UaWriter,
};
use crate::error::{ConversionError, EncodingError, UaError, UaResult};
use crate::types::{NodeId, PlcDataType, PlcValue, StatusCode};

const ARRAY_FLAG: u8 = 0x80;
const DIMENSIONS_FLAG: u8 = 0x40;
const TYPE_ID_MASK: u8 = 0x3F;

// =============================================================================
// VariantTypeId
// =============================================================================

/// Built-in type id carried in the Variant encoding mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VariantTypeId {
    Boolean = 1,
    SByte = 2,
    Byte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    String = 12,
    DateTime = 13,
    Guid = 14,
    ByteString = 15,
    XmlElement = 16,
    NodeId = 17,
    ExpandedNodeId = 18,
    StatusCode = 19,
    QualifiedName = 20,
    LocalizedText = 21,
    ExtensionObject = 22,
    DataValue = 23,
    Variant = 24,
    DiagnosticInfo = 25,
}

impl VariantTypeId {
    /// Wire value.
    #[inline]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Parses a wire value. Zero (empty) and unknown ids yield `None`.
    pub fn from_value(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Boolean,
            2 => Self::SByte,
            3 => Self::Byte,
            4 => Self::Int16,
            5 => Self::UInt16,
            6 => Self::Int32,
            7 => Self::UInt32,
            8 => Self::Int64,
            9 => Self::UInt64,
            10 => Self::Float,
            11 => Self::Double,
            12 => Self::String,
            13 => Self::DateTime,
            14 => Self::Guid,
            15 => Self::ByteString,
            16 => Self::XmlElement,
            17 => Self::NodeId,
            18 => Self::ExpandedNodeId,
            19 => Self::StatusCode,
            20 => Self::QualifiedName,
            21 => Self::LocalizedText,
            22 => Self::ExtensionObject,
            23 => Self::DataValue,
            24 => Self::Variant,
            25 => Self::DiagnosticInfo,
            _ => return None,
        })
    }

    /// Wire type used to write a declared PLC data type.
    pub fn for_data_type(data_type: &PlcDataType) -> UaResult<Self> {
        Ok(match data_type {
            PlcDataType::Bool => Self::Boolean,
            PlcDataType::Byte => Self::Byte,
            PlcDataType::Sint => Self::SByte,
            PlcDataType::Int => Self::Int16,
            PlcDataType::Uint => Self::UInt16,
            PlcDataType::Dint => Self::Int32,
            PlcDataType::Udint => Self::UInt32,
            PlcDataType::Lint => Self::Int64,
            PlcDataType::Ulint => Self::UInt64,
            PlcDataType::Real => Self::Float,
            PlcDataType::Lreal => Self::Double,
            PlcDataType::String => Self::String,
            PlcDataType::DateAndTime => Self::DateTime,
            PlcDataType::Null | PlcDataType::Unknown(_) => {
                return Err(ConversionError::UnsupportedWriteType {
                    data_type: data_type.to_string(),
                }
                .into())
            }
        })
    }
}

impl fmt::Display for VariantTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// Scalar / Variant
// =============================================================================

/// One element of a Variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(Option<String>),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
    ByteString(Option<Vec<u8>>),
    XmlElement(Option<Vec<u8>>),
    NodeId(NodeId),
    ExpandedNodeId(ExpandedNodeId),
    StatusCode(StatusCode),
    QualifiedName(QualifiedName),
    LocalizedText(LocalizedText),
    ExtensionObject(ExtensionObject),
    DataValue(Box<DataValue>),
    Variant(Box<Variant>),
    DiagnosticInfo(Box<DiagnosticInfo>),
}

impl Scalar {
    /// Wire type id of this element.
    pub fn type_id(&self) -> VariantTypeId {
        match self {
            Self::Boolean(_) => VariantTypeId::Boolean,
            Self::SByte(_) => VariantTypeId::SByte,
            Self::Byte(_) => VariantTypeId::Byte,
            Self::Int16(_) => VariantTypeId::Int16,
            Self::UInt16(_) => VariantTypeId::UInt16,
            Self::Int32(_) => VariantTypeId::Int32,
            Self::UInt32(_) => VariantTypeId::UInt32,
            Self::Int64(_) => VariantTypeId::Int64,
            Self::UInt64(_) => VariantTypeId::UInt64,
            Self::Float(_) => VariantTypeId::Float,
            Self::Double(_) => VariantTypeId::Double,
            Self::String(_) => VariantTypeId::String,
            Self::DateTime(_) => VariantTypeId::DateTime,
            Self::Guid(_) => VariantTypeId::Guid,
            Self::ByteString(_) => VariantTypeId::ByteString,
            Self::XmlElement(_) => VariantTypeId::XmlElement,
            Self::NodeId(_) => VariantTypeId::NodeId,
            Self::ExpandedNodeId(_) => VariantTypeId::ExpandedNodeId,
            Self::StatusCode(_) => VariantTypeId::StatusCode,
            Self::QualifiedName(_) => VariantTypeId::QualifiedName,
            Self::LocalizedText(_) => VariantTypeId::LocalizedText,
            Self::ExtensionObject(_) => VariantTypeId::ExtensionObject,
            Self::DataValue(_) => VariantTypeId::DataValue,
            Self::Variant(_) => VariantTypeId::Variant,
            Self::DiagnosticInfo(_) => VariantTypeId::DiagnosticInfo,
        }
    }

    fn encode_body(&self, w: &mut UaWriter) {
        match self {
            Self::Boolean(v) => w.write_bool(*v),
            Self::SByte(v) => w.write_i8(*v),
            Self::Byte(v) => w.write_u8(*v),
            Self::Int16(v) => w.write_i16(*v),
            Self::UInt16(v) => w.write_u16(*v),
            Self::Int32(v) => w.write_i32(*v),
            Self::UInt32(v) => w.write_u32(*v),
            Self::Int64(v) => w.write_i64(*v),
            Self::UInt64(v) => w.write_u64(*v),
            Self::Float(v) => w.write_f32(*v),
            Self::Double(v) => w.write_f64(*v),
            Self::String(v) => w.write_opt_string(v.as_deref()),
            Self::DateTime(v) => v.encode(w),
            Self::Guid(v) => w.write_guid(v),
            Self::ByteString(v) | Self::XmlElement(v) => w.write_byte_string(v.as_deref()),
            Self::NodeId(v) => v.encode(w),
            Self::ExpandedNodeId(v) => v.encode(w),
            Self::StatusCode(v) => v.encode(w),
            Self::QualifiedName(v) => v.encode(w),
            Self::LocalizedText(v) => v.encode(w),
            Self::ExtensionObject(v) => v.encode(w),
            Self::DataValue(v) => v.encode(w),
            Self::Variant(v) => v.encode(w),
            Self::DiagnosticInfo(v) => v.encode(w),
        }
    }

    fn decode_body(type_id: VariantTypeId, r: &mut UaReader<'_>) -> UaResult<Self> {
        Ok(match type_id {
            VariantTypeId::Boolean => Self::Boolean(r.read_bool()?),
            VariantTypeId::SByte => Self::SByte(r.read_i8()?),
            VariantTypeId::Byte => Self::Byte(r.read_u8()?),
            VariantTypeId::Int16 => Self::Int16(r.read_i16()?),
            VariantTypeId::UInt16 => Self::UInt16(r.read_u16()?),
            VariantTypeId::Int32 => Self::Int32(r.read_i32()?),
            VariantTypeId::UInt32 => Self::UInt32(r.read_u32()?),
            VariantTypeId::Int64 => Self::Int64(r.read_i64()?),
            VariantTypeId::UInt64 => Self::UInt64(r.read_u64()?),
            VariantTypeId::Float => Self::Float(r.read_f32()?),
            VariantTypeId::Double => Self::Double(r.read_f64()?),
            VariantTypeId::String => Self::String(r.read_opt_string()?),
            VariantTypeId::DateTime => Self::DateTime(DateTime::<Utc>::decode(r)?),
            VariantTypeId::Guid => Self::Guid(r.read_guid()?),
            VariantTypeId::ByteString => Self::ByteString(r.read_byte_string()?),
            VariantTypeId::XmlElement => Self::XmlElement(r.read_byte_string()?),
            VariantTypeId::NodeId => Self::NodeId(NodeId::decode(r)?),
            VariantTypeId::ExpandedNodeId => Self::ExpandedNodeId(ExpandedNodeId::decode(r)?),
            VariantTypeId::StatusCode => Self::StatusCode(StatusCode::decode(r)?),
            VariantTypeId::QualifiedName => Self::QualifiedName(QualifiedName::decode(r)?),
            VariantTypeId::LocalizedText => Self::LocalizedText(LocalizedText::decode(r)?),
            VariantTypeId::ExtensionObject => Self::ExtensionObject(ExtensionObject::decode(r)?),
            VariantTypeId::DataValue => {
                Self::DataValue(Box::new(r.nested("DataValue", DataValue::decode)?))
            }
            VariantTypeId::Variant => Self::Variant(Box::new(r.nested("Variant", Variant::decode)?)),
            VariantTypeId::DiagnosticInfo => {
                Self::DiagnosticInfo(Box::new(r.nested("DiagnosticInfo", DiagnosticInfo::decode)?))
            }
        })
    }

    /// Maps this element to an application value.
    pub fn to_plc_value(&self) -> UaResult<PlcValue> {
        Ok(match self {
            Self::Boolean(v) => PlcValue::Bool(*v),
            Self::SByte(v) => PlcValue::Sint(*v),
            Self::Byte(v) => PlcValue::Usint(*v),
            Self::Int16(v) => PlcValue::Int(*v),
            Self::UInt16(v) => PlcValue::Uint(*v),
            Self::Int32(v) => PlcValue::Dint(*v),
            Self::UInt32(v) => PlcValue::Udint(*v),
            Self::Int64(v) => PlcValue::Lint(*v),
            Self::UInt64(v) => PlcValue::Ulint(*v),
            Self::Float(v) => PlcValue::Real(*v),
            Self::Double(v) => PlcValue::Lreal(*v),
            Self::String(v) => PlcValue::String(v.clone().unwrap_or_default()),
            Self::DateTime(v) => PlcValue::DateTime(*v),
            Self::Guid(v) => PlcValue::String(v.to_string()),
            Self::ByteString(v) => PlcValue::Raw(v.clone().unwrap_or_default()),
            Self::NodeId(v) => PlcValue::String(v.to_opc_string()),
            Self::StatusCode(v) => PlcValue::Udint(v.0),
            Self::QualifiedName(v) => PlcValue::String(v.to_string()),
            Self::LocalizedText(v) => PlcValue::String(v.to_string()),
            other => {
                return Err(ConversionError::UnsupportedVariant {
                    type_id: other.type_id().value(),
                }
                .into())
            }
        })
    }

    /// Converts an application value into an element of `target` type.
    fn from_plc_value(target: VariantTypeId, value: &PlcValue) -> UaResult<Self> {
        let mismatch = || -> UaError {
            ConversionError::type_mismatch(target.to_string(), value.type_name()).into()
        };
        let int = || value.as_i64().ok_or_else(mismatch);

        Ok(match target {
            VariantTypeId::Boolean => Self::Boolean(value.as_bool().ok_or_else(mismatch)?),
            VariantTypeId::SByte => Self::SByte(i8::try_from(int()?).map_err(|_| mismatch())?),
            VariantTypeId::Byte => Self::Byte(u8::try_from(int()?).map_err(|_| mismatch())?),
            VariantTypeId::Int16 => Self::Int16(i16::try_from(int()?).map_err(|_| mismatch())?),
            VariantTypeId::UInt16 => Self::UInt16(u16::try_from(int()?).map_err(|_| mismatch())?),
            VariantTypeId::Int32 => Self::Int32(i32::try_from(int()?).map_err(|_| mismatch())?),
            VariantTypeId::UInt32 => Self::UInt32(u32::try_from(int()?).map_err(|_| mismatch())?),
            VariantTypeId::Int64 => Self::Int64(int()?),
            VariantTypeId::UInt64 => match value {
                PlcValue::Ulint(v) => Self::UInt64(*v),
                _ => Self::UInt64(u64::try_from(int()?).map_err(|_| mismatch())?),
            },
            VariantTypeId::Float => Self::Float(value.as_f64().ok_or_else(mismatch)? as f32),
            VariantTypeId::Double => Self::Double(value.as_f64().ok_or_else(mismatch)?),
            VariantTypeId::String => Self::String(Some(value.as_str().ok_or_else(mismatch)?.to_string())),
            VariantTypeId::DateTime => match value {
                PlcValue::DateTime(v) => Self::DateTime(*v),
                _ => return Err(mismatch()),
            },
            _ => return Err(mismatch()),
        })
    }
}

/// Tagged union of wire values, scalar or array.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    /// No value (type id 0).
    #[default]
    Empty,
    /// Single value, array flag clear.
    Scalar(Scalar),
    /// Array value, array flag set.
    Array(VariantArray),
}

/// Homogeneous array payload of a Variant.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantArray {
    /// Element type.
    pub element_type: VariantTypeId,
    /// Elements in order.
    pub elements: Vec<Scalar>,
    /// Multi-dimensional shape, when present.
    pub dimensions: Option<Vec<i32>>,
}

impl Variant {
    /// Wraps one element.
    pub fn scalar(value: Scalar) -> Self {
        Self::Scalar(value)
    }

    /// Builds an array of `element_type` elements.
    pub fn array(element_type: VariantTypeId, elements: Vec<Scalar>) -> UaResult<Self> {
        if let Some(bad) = elements.iter().find(|e| e.type_id() != element_type) {
            return Err(ConversionError::type_mismatch(
                element_type.to_string(),
                bad.type_id().to_string(),
            )
            .into());
        }
        Ok(Self::Array(VariantArray {
            element_type,
            elements,
            dimensions: None,
        }))
    }

    /// Returns `true` if the array flag is set.
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Type id, `None` for `Empty`.
    pub fn type_id(&self) -> Option<VariantTypeId> {
        match self {
            Self::Empty => None,
            Self::Scalar(s) => Some(s.type_id()),
            Self::Array(a) => Some(a.element_type),
        }
    }

    /// Maps the Variant to an application value.
    ///
    /// Arrays become [`PlcValue::List`]. Fails with
    /// [`ConversionError::UnsupportedVariant`] for types without an
    /// application representation.
    pub fn to_plc_value(&self) -> UaResult<PlcValue> {
        match self {
            Self::Empty => Ok(PlcValue::Null),
            Self::Scalar(s) => s.to_plc_value(),
            Self::Array(a) => a
                .elements
                .iter()
                .map(Scalar::to_plc_value)
                .collect::<UaResult<Vec<_>>>()
                .map(PlcValue::List),
        }
    }

    /// Builds the Variant written for `value` under the declared `data_type`.
    ///
    /// An unresolved (`Null`) declared type is inferred from the first
    /// element. Unknown declared types fail with
    /// [`ConversionError::UnsupportedWriteType`].
    pub fn from_plc_value(data_type: &PlcDataType, value: &PlcValue) -> UaResult<Self> {
        let elements = value.elements();
        let resolved = if data_type.is_null() {
            let first = elements.first().ok_or_else(|| {
                UaError::from(ConversionError::CannotInferType {
                    field: value.type_name().to_string(),
                })
            })?;
            infer_data_type(first)?
        } else {
            data_type.clone()
        };
        let target = VariantTypeId::for_data_type(&resolved)?;

        let scalars = elements
            .iter()
            .map(|v| Scalar::from_plc_value(target, v))
            .collect::<UaResult<Vec<_>>>()?;

        match scalars.len() {
            1 => Ok(Self::Scalar(scalars.into_iter().next().ok_or_else(|| {
                UaError::from(EncodingError::invalid("Variant", "empty scalar"))
            })?)),
            _ => Self::array(target, scalars),
        }
    }
}

/// Infers the PLC data type from a runtime value.
pub fn infer_data_type(value: &PlcValue) -> UaResult<PlcDataType> {
    Ok(match value {
        PlcValue::Bool(_) => PlcDataType::Bool,
        PlcValue::Sint(_) => PlcDataType::Sint,
        PlcValue::Usint(_) => PlcDataType::Byte,
        PlcValue::Int(_) => PlcDataType::Int,
        PlcValue::Uint(_) => PlcDataType::Uint,
        PlcValue::Dint(_) => PlcDataType::Dint,
        PlcValue::Udint(_) => PlcDataType::Udint,
        PlcValue::Lint(_) => PlcDataType::Lint,
        PlcValue::Ulint(_) => PlcDataType::Ulint,
        PlcValue::Real(_) => PlcDataType::Real,
        PlcValue::Lreal(_) => PlcDataType::Lreal,
        PlcValue::String(_) => PlcDataType::String,
        PlcValue::DateTime(_) => PlcDataType::DateAndTime,
        other => {
            return Err(ConversionError::CannotInferType {
                field: other.type_name().to_string(),
            }
            .into())
        }
    })
}

impl From<Scalar> for Variant {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl BinaryEncode for Variant {
    fn encode(&self, writer: &mut UaWriter) {
        match self {
            Self::Empty => writer.write_u8(0),
            Self::Scalar(s) => {
                writer.write_u8(s.type_id().value());
                s.encode_body(writer);
            }
            Self::Array(a) => {
                let mut mask = a.element_type.value() | ARRAY_FLAG;
                if a.dimensions.is_some() {
                    mask |= DIMENSIONS_FLAG;
                }
                writer.write_u8(mask);
                writer.write_i32(i32::try_from(a.elements.len()).unwrap_or(i32::MAX));
                for element in &a.elements {
                    element.encode_body(writer);
                }
                if let Some(dims) = &a.dimensions {
                    writer.write_i32(i32::try_from(dims.len()).unwrap_or(i32::MAX));
                    for d in dims {
                        writer.write_i32(*d);
                    }
                }
            }
        }
    }
}

impl BinaryDecode for Variant {
    fn decode(reader: &mut UaReader<'_>) -> UaResult<Self> {
        let mask = reader.read_u8()?;
        let raw_type = mask & TYPE_ID_MASK;
        if raw_type == 0 {
            return Ok(Self::Empty);
        }
        let type_id = VariantTypeId::from_value(raw_type).ok_or(EncodingError::UnknownTypeId {
            type_id: u32::from(raw_type),
        })?;

        if mask & ARRAY_FLAG == 0 {
            return Ok(Self::Scalar(Scalar::decode_body(type_id, reader)?));
        }

        let len = reader.read_i32()?.max(0) as usize;
        let mut elements = Vec::with_capacity(len.min(reader.remaining()));
        for _ in 0..len {
            elements.push(Scalar::decode_body(type_id, reader)?);
        }
        let dimensions = if mask & DIMENSIONS_FLAG != 0 {
            Some(reader.read_array_with(|r| r.read_i32())?)
        } else {
            None
        };
        Ok(Self::Array(VariantArray {
            element_type: type_id,
            elements,
            dimensions,
        }))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_from_slice, encode_to_vec};

    fn roundtrip(v: &Variant) -> Variant {
        decode_from_slice(&encode_to_vec(v)).unwrap()
    }

    #[test]
    fn test_primitive_scalars_and_arrays_roundtrip() {
        let samples = vec![
            Scalar::Boolean(true),
            Scalar::SByte(-7),
            Scalar::Byte(200),
            Scalar::Int16(-1234),
            Scalar::UInt16(54321),
            Scalar::Int32(42),
            Scalar::UInt32(4_000_000_000),
            Scalar::Int64(-9_000_000_000),
            Scalar::UInt64(18_000_000_000_000_000_000),
            Scalar::Float(1.5),
            Scalar::Double(-2.25),
            Scalar::String(Some("text".into())),
            Scalar::DateTime(DateTime::from_timestamp_millis(1_700_000_000_123).unwrap()),
            Scalar::Guid(Uuid::new_v4()),
            Scalar::ByteString(Some(vec![1, 2, 3])),
            Scalar::NodeId(NodeId::string(2, "n")),
            Scalar::StatusCode(StatusCode::BAD_TIMEOUT),
            Scalar::QualifiedName(QualifiedName::new(1, "q")),
            Scalar::LocalizedText(LocalizedText::new("t")),
        ];

        for sample in samples {
            let scalar = Variant::scalar(sample.clone());
            assert_eq!(roundtrip(&scalar), scalar);

            let array = Variant::array(sample.type_id(), vec![sample.clone(); 3]).unwrap();
            let decoded = roundtrip(&array);
            assert!(decoded.is_array());
            assert_eq!(decoded, array);
        }
    }

    #[test]
    fn test_int32_wire_layout() {
        let bytes = encode_to_vec(&Variant::scalar(Scalar::Int32(42)));
        assert_eq!(bytes, vec![0x06, 42, 0, 0, 0]);

        let array = Variant::array(VariantTypeId::Int32, vec![Scalar::Int32(1)]).unwrap();
        let bytes = encode_to_vec(&array);
        assert_eq!(bytes[0], 0x86);
        assert_eq!(&bytes[1..5], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_dimensions_flag() {
        let v = Variant::Array(VariantArray {
            element_type: VariantTypeId::Byte,
            elements: vec![Scalar::Byte(1), Scalar::Byte(2), Scalar::Byte(3), Scalar::Byte(4)],
            dimensions: Some(vec![2, 2]),
        });
        let bytes = encode_to_vec(&v);
        assert_eq!(bytes[0], 0xC3);
        assert_eq!(roundtrip(&v), v);
    }

    #[test]
    fn test_unknown_type_id_fails_decode() {
        let err = decode_from_slice::<Variant>(&[0x1F]).unwrap_err();
        assert!(matches!(
            err,
            UaError::Encoding(EncodingError::UnknownTypeId { type_id: 31 })
        ));
    }

    #[test]
    fn test_to_plc_value_mapping() {
        assert_eq!(
            Variant::scalar(Scalar::Int32(42)).to_plc_value().unwrap(),
            PlcValue::Dint(42)
        );
        assert_eq!(
            Variant::scalar(Scalar::LocalizedText(LocalizedText {
                locale: Some("en".into()),
                text: Some("Open".into()),
            }))
            .to_plc_value()
            .unwrap(),
            PlcValue::String("en|Open".into())
        );
        assert_eq!(
            Variant::scalar(Scalar::QualifiedName(QualifiedName::new(2, "Speed")))
                .to_plc_value()
                .unwrap(),
            PlcValue::String("ns=2;s=Speed".into())
        );
        assert_eq!(
            Variant::scalar(Scalar::StatusCode(StatusCode(0x8034_0000)))
                .to_plc_value()
                .unwrap(),
            PlcValue::Udint(0x8034_0000)
        );

        let blobs = Variant::array(
            VariantTypeId::ByteString,
            vec![Scalar::ByteString(Some(vec![1])), Scalar::ByteString(Some(vec![2, 3]))],
        )
        .unwrap();
        assert_eq!(
            blobs.to_plc_value().unwrap(),
            PlcValue::List(vec![PlcValue::Raw(vec![1]), PlcValue::Raw(vec![2, 3])])
        );

        assert_eq!(Variant::Empty.to_plc_value().unwrap(), PlcValue::Null);
    }

    #[test]
    fn test_extension_object_is_unsupported() {
        let v = Variant::scalar(Scalar::ExtensionObject(ExtensionObject::null()));
        assert!(matches!(
            v.to_plc_value().unwrap_err(),
            UaError::Conversion(ConversionError::UnsupportedVariant { type_id: 22 })
        ));
    }

    #[test]
    fn test_write_with_declared_type() {
        let v = Variant::from_plc_value(&PlcDataType::Int, &PlcValue::Dint(300)).unwrap();
        assert_eq!(v, Variant::scalar(Scalar::Int16(300)));

        let v = Variant::from_plc_value(
            &PlcDataType::Real,
            &PlcValue::List(vec![PlcValue::Lreal(1.0), PlcValue::Lreal(2.0)]),
        )
        .unwrap();
        assert_eq!(
            v,
            Variant::array(VariantTypeId::Float, vec![Scalar::Float(1.0), Scalar::Float(2.0)])
                .unwrap()
        );

        // out of range for the declared width
        assert!(Variant::from_plc_value(&PlcDataType::Sint, &PlcValue::Dint(300)).is_err());
    }

    #[test]
    fn test_write_infers_from_first_element() {
        let cases = [
            (PlcValue::Bool(true), VariantTypeId::Boolean),
            (PlcValue::Sint(1), VariantTypeId::SByte),
            (PlcValue::Int(1), VariantTypeId::Int16),
            (PlcValue::Dint(1), VariantTypeId::Int32),
            (PlcValue::Lint(1), VariantTypeId::Int64),
            (PlcValue::Real(1.0), VariantTypeId::Float),
            (PlcValue::Lreal(1.0), VariantTypeId::Double),
            (PlcValue::String("x".into()), VariantTypeId::String),
        ];
        for (value, expected) in cases {
            let v = Variant::from_plc_value(&PlcDataType::Null, &value).unwrap();
            assert_eq!(v.type_id(), Some(expected));
            assert!(!v.is_array());
        }
    }

    #[test]
    fn test_write_unknown_declared_type_fails() {
        let err = Variant::from_plc_value(
            &PlcDataType::Unknown("STRUCT_X".into()),
            &PlcValue::Dint(1),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported write field type STRUCT_X");

        assert!(Variant::from_plc_value(&PlcDataType::Null, &PlcValue::Null).is_err());
    }

    #[test]
    fn test_deeply_nested_variant_is_rejected() {
        let err = decode_from_slice::<Variant>(&vec![24u8; 2_000_000]).unwrap_err();
        assert!(matches!(
            err,
            UaError::Encoding(EncodingError::NestingTooDeep { structure: "Variant", .. })
        ));

        let mut nested_data_values = Vec::new();
        for _ in 0..200 {
            nested_data_values.extend_from_slice(&[23, 0x01]);
        }
        let err = decode_from_slice::<Variant>(&nested_data_values).unwrap_err();
        assert!(matches!(
            err,
            UaError::Encoding(EncodingError::NestingTooDeep { .. })
        ));
    }

    #[test]
    fn test_shallow_nesting_still_decodes() {
        let inner = Variant::scalar(Scalar::Int32(5));
        let outer = Variant::scalar(Scalar::Variant(Box::new(Variant::scalar(
            Scalar::Variant(Box::new(inner.clone())),
        ))));
        assert_eq!(roundtrip(&outer), outer);
    }
}
