//! Tagged varint wire format.
//!
//! Every encoded value is preceded by a tag `(field << 3) | wire_type`.
//! Integers are base-128 varints (least-significant group first, high bit
//! set on every byte but the last), signed integers are zigzag-mapped before
//! varint encoding, floats are little-endian fixed-width, and strings/blobs
//! are a varint length followed by the raw bytes.
//!
//! # Example
//!
//! ```
//! use perfscope::wire::{WireBuffer, WireType};
//!
//! let mut buf = WireBuffer::new();
//! buf.write_tag(1, WireType::Varint);
//! buf.write_uint(123);
//! assert_eq!(buf.as_bytes(), &[0x08, 0x7B]);
//!
//! let mut reader = WireBuffer::from_bytes(buf.as_bytes());
//! assert_eq!(reader.read_tag().unwrap(), (1, WireType::Varint));
//! assert_eq!(reader.read_uint().unwrap(), 123);
//! ```

mod buffer;

pub use buffer::WireBuffer;

/// Wire type carried in the low three bits of a tag.
///
/// Values 3 and 4 are reserved (legacy group markers) and 6/7 are unused;
/// none of them can be represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl WireType {
    pub const BITS: u32 = 3;
    pub const MASK: u32 = (1 << Self::BITS) - 1;
}

impl TryFrom<u8> for WireType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            other => Err(other),
        }
    }
}

/// Pack a field number and wire type into a tag.
#[inline]
pub fn make_tag(field: u32, wire_type: WireType) -> u32 {
    (field << WireType::BITS) | wire_type as u32
}

#[inline]
pub fn zigzag_encode32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

#[inline]
pub fn zigzag_decode32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

#[inline]
pub fn zigzag_encode64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn zigzag_decode64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Number of bytes `value` occupies as a varint.
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}
