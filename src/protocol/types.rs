//! Column types, values and timestamp resolutions.

use crate::protocol::ProtocolError;
use crate::wire::WireType;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Declared type of a manifest column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Uint,
    Int64,
    Uint64,
    String,
    Double,
    Float,
    Bool,
}

impl ColumnType {
    /// Type identifier written into manifest column blocks.
    pub fn type_code(self) -> u32 {
        match self {
            ColumnType::Bool => 20,
            ColumnType::Int => 24,
            ColumnType::Uint => 28,
            ColumnType::Int64 => 40,
            ColumnType::Uint64 => 44,
            ColumnType::Float => 56,
            ColumnType::Double => 60,
            ColumnType::String => 64,
        }
    }

    pub fn from_type_code(code: u32) -> Result<Self, ProtocolError> {
        Ok(match code {
            20 => ColumnType::Bool,
            24 => ColumnType::Int,
            28 => ColumnType::Uint,
            40 => ColumnType::Int64,
            44 => ColumnType::Uint64,
            56 => ColumnType::Float,
            60 => ColumnType::Double,
            64 => ColumnType::String,
            other => return Err(ProtocolError::UnknownTypeCode(other)),
        })
    }

    /// Wire type used for values of this column.
    pub fn wire_type(self) -> WireType {
        match self {
            ColumnType::Int
            | ColumnType::Uint
            | ColumnType::Int64
            | ColumnType::Uint64
            | ColumnType::Bool => WireType::Varint,
            ColumnType::Double => WireType::Fixed64,
            ColumnType::Float => WireType::Fixed32,
            ColumnType::String => WireType::LengthDelimited,
        }
    }

    pub fn all() -> &'static [ColumnType] {
        &[
            ColumnType::Int,
            ColumnType::Uint,
            ColumnType::Int64,
            ColumnType::Uint64,
            ColumnType::String,
            ColumnType::Double,
            ColumnType::Float,
            ColumnType::Bool,
        ]
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Int => write!(f, "int"),
            ColumnType::Uint => write!(f, "uint"),
            ColumnType::Int64 => write!(f, "int64"),
            ColumnType::Uint64 => write!(f, "uint64"),
            ColumnType::String => write!(f, "string"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Bool => write!(f, "bool"),
        }
    }
}

/// A single typed cell of a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Uint(u32),
    Int64(i64),
    Uint64(u64),
    String(String),
    Double(f64),
    Float(f32),
    Bool(bool),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Int(_) => ColumnType::Int,
            Value::Uint(_) => ColumnType::Uint,
            Value::Int64(_) => ColumnType::Int64,
            Value::Uint64(_) => ColumnType::Uint64,
            Value::String(_) => ColumnType::String,
            Value::Double(_) => ColumnType::Double,
            Value::Float(_) => ColumnType::Float,
            Value::Bool(_) => ColumnType::Bool,
        }
    }

    /// Zero value of the given type.
    pub fn default_for(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Int => Value::Int(0),
            ColumnType::Uint => Value::Uint(0),
            ColumnType::Int64 => Value::Int64(0),
            ColumnType::Uint64 => Value::Uint64(0),
            ColumnType::String => Value::String(String::new()),
            ColumnType::Double => Value::Double(0.0),
            ColumnType::Float => Value::Float(0.0),
            ColumnType::Bool => Value::Bool(false),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// Unit of the sample timestamp deltas carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// 100 nanosecond ticks
    Precise,
    #[default]
    Usec,
    Msec,
    Second,
    Minute,
    Hour,
}

impl Resolution {
    pub fn code(self) -> u32 {
        match self {
            Resolution::Precise => 0,
            Resolution::Usec => 1,
            Resolution::Msec => 2,
            Resolution::Second => 3,
            Resolution::Minute => 4,
            Resolution::Hour => 5,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, ProtocolError> {
        Ok(match code {
            0 => Resolution::Precise,
            1 => Resolution::Usec,
            2 => Resolution::Msec,
            3 => Resolution::Second,
            4 => Resolution::Minute,
            5 => Resolution::Hour,
            other => return Err(ProtocolError::UnknownResolution(other)),
        })
    }

    /// Length of one unit in nanoseconds.
    pub fn unit_nanos(self) -> i64 {
        match self {
            Resolution::Precise => 100,
            Resolution::Usec => 1_000,
            Resolution::Msec => 1_000_000,
            Resolution::Second => 1_000_000_000,
            Resolution::Minute => 60 * 1_000_000_000,
            Resolution::Hour => 3_600 * 1_000_000_000,
        }
    }

    /// Whole units between `base` and `at`, zero if `at` precedes `base`.
    pub fn units_between(self, base: DateTime<Utc>, at: DateTime<Utc>) -> u64 {
        let delta = at.signed_duration_since(base);
        if delta <= TimeDelta::zero() {
            return 0;
        }
        // Deltas beyond ~292 years overflow nanoseconds; fall back to microseconds.
        match delta.num_nanoseconds() {
            Some(nanos) => (nanos / self.unit_nanos()) as u64,
            None => {
                let micros = delta.num_microseconds().unwrap_or(i64::MAX) as i128;
                ((micros * 1_000) / self.unit_nanos() as i128) as u64
            }
        }
    }

    /// Inverse of [`Resolution::units_between`], truncated to this resolution.
    pub fn offset(self, base: DateTime<Utc>, units: u64) -> DateTime<Utc> {
        let nanos = (units as i128) * (self.unit_nanos() as i128);
        let nanos = i64::try_from(nanos).unwrap_or(i64::MAX);
        base.checked_add_signed(TimeDelta::nanoseconds(nanos))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
