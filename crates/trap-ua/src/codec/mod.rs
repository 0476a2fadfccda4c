// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binary encoding.
//!
//! Every value on the wire is little-endian. Variable-length values (strings,
//! byte strings, arrays) carry an `i32` length prefix where `-1` means null.
//!
//! - [`UaReader`] / [`UaWriter`]: cursor-style primitive access
//! - [`BinaryEncode`] / [`BinaryDecode`]: implemented by every structure
//! - [`builtin`]: the built-in composite types (NodeId, DataValue, ...)

pub mod builtin;

use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use uuid::Uuid;

use crate::error::{EncodingError, UaError, UaResult};

pub use builtin::{
    datetime_to_ticks, ticks_to_datetime, DataValue, DiagnosticInfo, ExpandedNodeId,
    ExtensionObject, LocalizedText, QualifiedName,
};

/// Upper bound for any decoded length prefix.
const MAX_DECODED_LENGTH: usize = 16 * 1024 * 1024;

/// Upper bound for nested Variant, DataValue and DiagnosticInfo values.
pub const MAX_NESTING_DEPTH: usize = 100;

// =============================================================================
// Encode / Decode Traits
// =============================================================================

/// Serializes a value into the OPC UA binary encoding.
pub trait BinaryEncode {
    /// Appends the encoded value to `writer`.
    fn encode(&self, writer: &mut UaWriter);
}

/// Deserializes a value from the OPC UA binary encoding.
pub trait BinaryDecode: Sized {
    /// Reads one value from `reader`.
    fn decode(reader: &mut UaReader<'_>) -> UaResult<Self>;
}

/// Encodes a value into a fresh buffer.
pub fn encode_to_vec<T: BinaryEncode + ?Sized>(value: &T) -> Vec<u8> {
    let mut writer = UaWriter::new();
    value.encode(&mut writer);
    writer.into_inner()
}

/// Decodes a value from a complete buffer.
pub fn decode_from_slice<T: BinaryDecode>(data: &[u8]) -> UaResult<T> {
    let mut reader = UaReader::new(data);
    T::decode(&mut reader)
}

// =============================================================================
// UaWriter
// =============================================================================

/// Growable little-endian output buffer.
#[derive(Debug, Default, Clone)]
pub struct UaWriter {
    buf: Vec<u8>,
}

impl UaWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the writer, returning the buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Overwrites four bytes at `offset` with a `u32`.
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        if let Some(slot) = self.buf.get_mut(offset..offset + 4) {
            LittleEndian::write_u32(slot, value);
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.push(value as u8);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_i16(&mut self, value: i16) {
        let mut b = [0u8; 2];
        LittleEndian::write_i16(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_u32(&mut self, value: u32) {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_i32(&mut self, value: i32) {
        let mut b = [0u8; 4];
        LittleEndian::write_i32(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_u64(&mut self, value: u64) {
        let mut b = [0u8; 8];
        LittleEndian::write_u64(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_i64(&mut self, value: i64) {
        let mut b = [0u8; 8];
        LittleEndian::write_i64(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_f32(&mut self, value: f32) {
        let mut b = [0u8; 4];
        LittleEndian::write_f32(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    pub fn write_f64(&mut self, value: f64) {
        let mut b = [0u8; 8];
        LittleEndian::write_f64(&mut b, value);
        self.buf.extend_from_slice(&b);
    }

    /// Writes raw bytes without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a length prefix, `-1` for `None`.
    fn write_length(&mut self, len: Option<usize>) {
        match len {
            Some(n) => self.write_i32(i32::try_from(n).unwrap_or(i32::MAX)),
            None => self.write_i32(-1),
        }
    }

    /// Writes a non-null string.
    pub fn write_string(&mut self, value: &str) {
        self.write_length(Some(value.len()));
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Writes a string that may be null.
    pub fn write_opt_string(&mut self, value: Option<&str>) {
        match value {
            Some(s) => self.write_string(s),
            None => self.write_length(None),
        }
    }

    /// Writes a byte string that may be null.
    pub fn write_byte_string(&mut self, value: Option<&[u8]>) {
        self.write_length(value.map(<[u8]>::len));
        if let Some(bytes) = value {
            self.buf.extend_from_slice(bytes);
        }
    }

    /// Writes a GUID in its mixed-endian wire layout.
    pub fn write_guid(&mut self, value: &Uuid) {
        let (d1, d2, d3, d4) = value.as_fields();
        self.write_u32(d1);
        self.write_u16(d2);
        self.write_u16(d3);
        self.buf.extend_from_slice(d4);
    }

    /// Writes a length-prefixed array.
    pub fn write_array<T: BinaryEncode>(&mut self, items: &[T]) {
        self.write_length(Some(items.len()));
        for item in items {
            item.encode(self);
        }
    }

    /// Writes a length-prefixed array of strings.
    pub fn write_string_array(&mut self, items: &[String]) {
        self.write_length(Some(items.len()));
        for item in items {
            self.write_string(item);
        }
    }

    /// Writes a length-prefixed array of `u32`.
    pub fn write_u32_array(&mut self, items: &[u32]) {
        self.write_length(Some(items.len()));
        for item in items {
            self.write_u32(*item);
        }
    }

    /// Writes an encodable value.
    pub fn write<T: BinaryEncode + ?Sized>(&mut self, value: &T) {
        value.encode(self);
    }
}

// =============================================================================
// UaReader
// =============================================================================

/// Little-endian cursor over a received buffer.
#[derive(Debug)]
pub struct UaReader<'a> {
    cursor: Cursor<&'a [u8]>,
    depth: usize,
}

impl<'a> UaReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            depth: 0,
        }
    }

    /// Decodes a value that may contain itself, failing past
    /// [`MAX_NESTING_DEPTH`] levels.
    pub fn nested<T>(
        &mut self,
        structure: &'static str,
        decode: impl FnOnce(&mut Self) -> UaResult<T>,
    ) -> UaResult<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(UaError::encoding(EncodingError::NestingTooDeep {
                structure,
                max: MAX_NESTING_DEPTH,
            }));
        }
        self.depth += 1;
        let result = decode(self);
        self.depth -= 1;
        result
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    /// The unread tail.
    pub fn rest(&self) -> &'a [u8] {
        let data: &'a [u8] = *self.cursor.get_ref();
        &data[self.position().min(data.len())..]
    }

    fn eof(structure: &'static str) -> UaError {
        UaError::encoding(EncodingError::UnexpectedEof { structure })
    }

    pub fn read_u8(&mut self) -> UaResult<u8> {
        self.cursor.read_u8().map_err(|_| Self::eof("Byte"))
    }

    pub fn read_i8(&mut self) -> UaResult<i8> {
        self.cursor.read_i8().map_err(|_| Self::eof("SByte"))
    }

    pub fn read_bool(&mut self) -> UaResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> UaResult<u16> {
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| Self::eof("UInt16"))
    }

    pub fn read_i16(&mut self) -> UaResult<i16> {
        self.cursor
            .read_i16::<LittleEndian>()
            .map_err(|_| Self::eof("Int16"))
    }

    pub fn read_u32(&mut self) -> UaResult<u32> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| Self::eof("UInt32"))
    }

    pub fn read_i32(&mut self) -> UaResult<i32> {
        self.cursor
            .read_i32::<LittleEndian>()
            .map_err(|_| Self::eof("Int32"))
    }

    pub fn read_u64(&mut self) -> UaResult<u64> {
        self.cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| Self::eof("UInt64"))
    }

    pub fn read_i64(&mut self) -> UaResult<i64> {
        self.cursor
            .read_i64::<LittleEndian>()
            .map_err(|_| Self::eof("Int64"))
    }

    pub fn read_f32(&mut self) -> UaResult<f32> {
        self.cursor
            .read_f32::<LittleEndian>()
            .map_err(|_| Self::eof("Float"))
    }

    pub fn read_f64(&mut self) -> UaResult<f64> {
        self.cursor
            .read_f64::<LittleEndian>()
            .map_err(|_| Self::eof("Double"))
    }

    /// Reads exactly `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> UaResult<Vec<u8>> {
        if len > self.remaining() {
            return Err(Self::eof("ByteString"));
        }
        let mut bytes = vec![0u8; len];
        self.cursor
            .read_exact(&mut bytes)
            .map_err(|_| Self::eof("ByteString"))?;
        Ok(bytes)
    }

    /// Reads a length prefix. `None` for null.
    fn read_length(&mut self, structure: &'static str) -> UaResult<Option<usize>> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| EncodingError::invalid(structure, format!("negative length {}", len)))?;
        if len > MAX_DECODED_LENGTH {
            return Err(EncodingError::invalid(structure, format!("length {} too large", len)).into());
        }
        Ok(Some(len))
    }

    /// Reads a string that may be null.
    pub fn read_opt_string(&mut self) -> UaResult<Option<String>> {
        match self.read_length("String")? {
            Some(len) => {
                let bytes = self.read_raw(len)?;
                String::from_utf8(bytes)
                    .map(Some)
                    .map_err(|e| EncodingError::invalid("String", e.to_string()).into())
            }
            None => Ok(None),
        }
    }

    /// Reads a string, mapping null to the empty string.
    pub fn read_string(&mut self) -> UaResult<String> {
        Ok(self.read_opt_string()?.unwrap_or_default())
    }

    /// Reads a byte string that may be null.
    pub fn read_byte_string(&mut self) -> UaResult<Option<Vec<u8>>> {
        match self.read_length("ByteString")? {
            Some(len) => self.read_raw(len).map(Some),
            None => Ok(None),
        }
    }

    /// Reads a GUID.
    pub fn read_guid(&mut self) -> UaResult<Uuid> {
        let d1 = self.read_u32()?;
        let d2 = self.read_u16()?;
        let d3 = self.read_u16()?;
        let mut d4 = [0u8; 8];
        self.cursor
            .read_exact(&mut d4)
            .map_err(|_| Self::eof("Guid"))?;
        Ok(Uuid::from_fields(d1, d2, d3, &d4))
    }

    /// Reads a length-prefixed array. Null arrays decode as empty.
    pub fn read_array<T: BinaryDecode>(&mut self) -> UaResult<Vec<T>> {
        self.read_array_with(T::decode)
    }

    /// Reads a length-prefixed array with a custom element decoder.
    pub fn read_array_with<T>(
        &mut self,
        mut decode: impl FnMut(&mut Self) -> UaResult<T>,
    ) -> UaResult<Vec<T>> {
        let len = self.read_length("Array")?.unwrap_or(0);
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(decode(self)?);
        }
        Ok(items)
    }

    /// Reads a length-prefixed array of strings.
    pub fn read_string_array(&mut self) -> UaResult<Vec<String>> {
        self.read_array_with(Self::read_string)
    }

    /// Reads a length-prefixed array of `u32`.
    pub fn read_u32_array(&mut self) -> UaResult<Vec<u32>> {
        self.read_array_with(Self::read_u32)
    }

    /// Reads a decodable value.
    pub fn read<T: BinaryDecode>(&mut self) -> UaResult<T> {
        T::decode(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_are_little_endian() {
        let mut w = UaWriter::new();
        w.write_u32(0x0102_0304);
        w.write_i16(-2);
        assert_eq!(w.into_inner(), vec![0x04, 0x03, 0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn test_null_and_empty_strings() {
        let mut w = UaWriter::new();
        w.write_opt_string(None);
        w.write_string("");
        w.write_string("abc");
        let bytes = w.into_inner();
        assert_eq!(&bytes[..4], &[0xFF, 0xFF, 0xFF, 0xFF]);

        let mut r = UaReader::new(&bytes);
        assert_eq!(r.read_opt_string().unwrap(), None);
        assert_eq!(r.read_opt_string().unwrap(), Some(String::new()));
        assert_eq!(r.read_string().unwrap(), "abc");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_truncated_input_is_eof() {
        let mut r = UaReader::new(&[0x01, 0x02]);
        let err = r.read_u32().unwrap_err();
        assert!(matches!(
            err,
            UaError::Encoding(EncodingError::UnexpectedEof { .. })
        ));

        // length prefix claims more than is available
        let mut r = UaReader::new(&[0x05, 0x00, 0x00, 0x00, b'a']);
        assert!(r.read_opt_string().is_err());
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut r = UaReader::new(&[0xFE, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            r.read_byte_string().unwrap_err(),
            UaError::Encoding(EncodingError::Invalid { .. })
        ));
    }

    #[test]
    fn test_guid_layout() {
        let guid = Uuid::parse_str("72962b91-fa75-4ae6-8d28-b404dc7daf63").unwrap();
        let mut w = UaWriter::new();
        w.write_guid(&guid);
        let bytes = w.into_inner();
        assert_eq!(&bytes[..4], &[0x91, 0x2b, 0x96, 0x72]);
        assert_eq!(UaReader::new(&bytes).read_guid().unwrap(), guid);
    }

    #[test]
    fn test_patch_u32() {
        let mut w = UaWriter::new();
        w.write_u32(0);
        w.write_u8(7);
        w.patch_u32(0, 5);
        assert_eq!(w.into_inner(), vec![5, 0, 0, 0, 7]);
    }
}
