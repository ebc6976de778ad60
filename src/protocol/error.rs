//! Decode and schema error types.

use crate::protocol::ColumnType;
use crate::wire::WireType;
use thiserror::Error;

/// Malformed or truncated wire bytes.
///
/// Always a local, decode-time failure. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Truncated input: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("Varint overflow at offset {offset} (max {max_bytes} bytes)")]
    VarintOverflow { offset: usize, max_bytes: usize },

    #[error("Reserved wire type {wire_type} in tag for field {field}")]
    ReservedWireType { field: u32, wire_type: u8 },

    #[error("Field {field}: expected wire type {expected:?}, found {actual:?}")]
    UnexpectedWireType {
        field: u32,
        expected: WireType,
        actual: WireType,
    },

    #[error("Unknown column type code {0}")]
    UnknownTypeCode(u32),

    #[error("Unknown timestamp resolution {0}")]
    UnknownResolution(u32),

    #[error("Invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("Column block {actual} out of order (expected {expected})")]
    ColumnOutOfOrder { expected: u32, actual: u32 },

    #[error("Missing required field {0}")]
    MissingField(u32),

    #[error("Expected field {expected}, found field {actual}")]
    UnexpectedField { expected: u32, actual: u32 },

    #[error("Timestamp {0}us is out of range")]
    InvalidTimestamp(u64),

    #[error("Schema violation: {0}")]
    Schema(#[from] SchemaError),
}

/// A sample that does not conform to its manifest.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Column {index} not declared (manifest has {columns} columns)")]
    UnknownColumn { index: u32, columns: usize },

    #[error("Column {index}: expected {expected}, got {actual}")]
    TypeMismatch {
        index: u32,
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("Column {index} set more than once")]
    DuplicateColumn { index: u32 },

    #[error("Sample from source {actual} does not belong to manifest of source {expected}")]
    SourceMismatch { expected: u32, actual: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_display_names_both_types() {
        let err = SchemaError::TypeMismatch {
            index: 2,
            expected: ColumnType::Uint,
            actual: ColumnType::Double,
        };
        let msg = err.to_string();
        assert!(msg.contains("Column 2"));
        assert!(msg.contains("uint"));
        assert!(msg.contains("double"));
    }

    #[test]
    fn test_schema_error_wraps_into_protocol_error() {
        let err: ProtocolError = SchemaError::DuplicateColumn { index: 4 }.into();
        assert!(matches!(err, ProtocolError::Schema(_)));
        assert!(err.to_string().contains("Column 4"));
    }

    #[test]
    fn test_unexpected_wire_type_display() {
        let err = ProtocolError::UnexpectedWireType {
            field: 3,
            expected: WireType::Varint,
            actual: WireType::LengthDelimited,
        };
        assert!(err.to_string().contains("Field 3"));
    }
}
