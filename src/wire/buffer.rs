//! Growable byte buffer with a read cursor.

use super::{make_tag, zigzag_decode32, zigzag_decode64, zigzag_encode32, zigzag_encode64, WireType};
use crate::protocol::ProtocolError;

const MAX_VARINT32_BYTES: usize = 5;
const MAX_VARINT64_BYTES: usize = 10;

/// Owned byte buffer that is written by appending and read through a cursor.
///
/// Writes never fail. Reads return a [`ProtocolError`] on truncated or
/// malformed input and leave the cursor where the failed read started, so a
/// failed read never consumes bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl WireBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Create a reader over a copy of `bytes`, cursor at the start.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    // ── Writing ──

    pub fn write_tag(&mut self, field: u32, wire_type: WireType) {
        self.write_uint(make_tag(field, wire_type));
    }

    pub fn write_uint(&mut self, value: u32) {
        self.write_uint64(value as u64);
    }

    pub fn write_int(&mut self, value: i32) {
        self.write_uint(zigzag_encode32(value));
    }

    pub fn write_uint64(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.data.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.data.push(value as u8);
    }

    pub fn write_int64(&mut self, value: i64) {
        self.write_uint64(zigzag_encode64(value));
    }

    pub fn write_bool(&mut self, value: bool) {
        self.data.push(value as u8);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_uint64(bytes.len() as u64);
        self.data.extend_from_slice(bytes);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn write_double(&mut self, value: f64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_float(&mut self, value: f32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append raw bytes with no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    // ── Reading ──

    pub fn read_tag(&mut self) -> Result<(u32, WireType), ProtocolError> {
        let start = self.pos;
        let tag = self.read_uint()?;
        let field = tag >> WireType::BITS;
        let raw_type = (tag & WireType::MASK) as u8;
        match WireType::try_from(raw_type) {
            Ok(wire_type) => Ok((field, wire_type)),
            Err(wire_type) => {
                self.pos = start;
                Err(ProtocolError::ReservedWireType { field, wire_type })
            }
        }
    }

    pub fn read_uint(&mut self) -> Result<u32, ProtocolError> {
        self.read_varint(MAX_VARINT32_BYTES)
            .map(|value| value as u32)
    }

    pub fn read_int(&mut self) -> Result<i32, ProtocolError> {
        self.read_uint().map(zigzag_decode32)
    }

    pub fn read_uint64(&mut self) -> Result<u64, ProtocolError> {
        self.read_varint(MAX_VARINT64_BYTES)
    }

    pub fn read_int64(&mut self) -> Result<i64, ProtocolError> {
        self.read_uint64().map(zigzag_decode64)
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        self.read_uint().map(|value| value != 0)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let start = self.pos;
        let len = self.read_uint64()?;
        match self.take(len) {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let start = self.pos;
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| {
            self.pos = start;
            ProtocolError::InvalidUtf8 { offset: start }
        })
    }

    pub fn read_double(&mut self) -> Result<f64, ProtocolError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    pub fn read_float(&mut self) -> Result<f32, ProtocolError> {
        let bytes = self.take(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(f32::from_le_bytes(raw))
    }

    /// Read a length-delimited region and return a reader over it.
    pub fn read_embedded(&mut self) -> Result<WireBuffer, ProtocolError> {
        self.read_bytes().map(WireBuffer::from)
    }

    /// Skip over the value of a field whose tag has already been read.
    pub fn skip_field(&mut self, wire_type: WireType) -> Result<(), ProtocolError> {
        let start = self.pos;
        let result = match wire_type {
            WireType::Varint => self.read_uint64().map(|_| ()),
            WireType::Fixed64 => self.take(8).map(|_| ()),
            WireType::Fixed32 => self.take(4).map(|_| ()),
            WireType::LengthDelimited => self
                .read_uint64()
                .and_then(|len| self.take(len).map(|_| ())),
        };
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    fn read_varint(&mut self, max_bytes: usize) -> Result<u64, ProtocolError> {
        let start = self.pos;
        let width_bits = if max_bytes == MAX_VARINT32_BYTES { 32 } else { 64 };
        let mut value: u64 = 0;

        for i in 0..max_bytes {
            let Some(&byte) = self.data.get(start + i) else {
                return Err(ProtocolError::Truncated {
                    offset: start,
                    needed: i + 1,
                    remaining: self.data.len() - start,
                });
            };

            let shift = 7 * i as u32;
            let payload = (byte & 0x7F) as u64;

            // The last permitted byte may only carry the bits that still fit.
            let room = width_bits - shift;
            if room < 7 && payload >> room != 0 {
                return Err(ProtocolError::VarintOverflow {
                    offset: start,
                    max_bytes,
                });
            }

            value |= payload << shift;
            if byte & 0x80 == 0 {
                self.pos = start + i + 1;
                return Ok(value);
            }
        }

        Err(ProtocolError::VarintOverflow {
            offset: start,
            max_bytes,
        })
    }

    fn take(&mut self, len: u64) -> Result<&[u8], ProtocolError> {
        let remaining = self.remaining();
        if len > remaining as u64 {
            return Err(ProtocolError::Truncated {
                offset: self.pos,
                needed: usize::try_from(len).unwrap_or(usize::MAX),
                remaining,
            });
        }
        let start = self.pos;
        self.pos += len as usize;
        Ok(&self.data[start..self.pos])
    }
}

impl From<Vec<u8>> for WireBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl AsRef<[u8]> for WireBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
