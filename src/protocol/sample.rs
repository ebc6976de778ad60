//! One timestamped row of values referencing manifest columns.

use crate::protocol::{Manifest, SchemaError, Value};
use crate::wire::{make_tag, varint_len, zigzag_encode32, zigzag_encode64};
use chrono::{DateTime, SubsecRound, Utc};

/// A sparse row: only the columns that were set are carried.
///
/// Values keep the order in which they were set. Built through
/// [`SampleBuilder`], which checks every value against the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    source_id: u32,
    timestamp: DateTime<Utc>,
    values: Vec<(u32, Value)>,
}

impl Sample {
    pub fn builder(manifest: &Manifest) -> SampleBuilder<'_> {
        SampleBuilder::new(manifest)
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// `(column index, value)` pairs in write order.
    pub fn values(&self) -> &[(u32, Value)] {
        &self.values
    }

    pub fn get(&self, index: u32) -> Option<&Value> {
        self.values
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check every value against `manifest`.
    pub fn validate(&self, manifest: &Manifest) -> Result<(), SchemaError> {
        if self.source_id != manifest.source_id() {
            return Err(SchemaError::SourceMismatch {
                expected: manifest.source_id(),
                actual: self.source_id,
            });
        }
        for (index, value) in &self.values {
            check_value(manifest, *index, value)?;
        }
        Ok(())
    }

    /// Size in bytes of the encoded value block (tags and values, no header).
    pub fn data_len(&self) -> usize {
        self.values
            .iter()
            .map(|(index, value)| {
                let tag = make_tag(*index, value.column_type().wire_type());
                varint_len(tag as u64) + value_len(value)
            })
            .sum()
    }
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::Int(v) => varint_len(zigzag_encode32(*v) as u64),
        Value::Uint(v) => varint_len(*v as u64),
        Value::Int64(v) => varint_len(zigzag_encode64(*v)),
        Value::Uint64(v) => varint_len(*v),
        Value::Bool(_) => 1,
        Value::Double(_) => 8,
        Value::Float(_) => 4,
        Value::String(s) => varint_len(s.len() as u64) + s.len(),
    }
}

fn check_value(manifest: &Manifest, index: u32, value: &Value) -> Result<(), SchemaError> {
    let expected = manifest
        .column_type(index)
        .ok_or(SchemaError::UnknownColumn {
            index,
            columns: manifest.len(),
        })?;
    let actual = value.column_type();
    if expected != actual {
        return Err(SchemaError::TypeMismatch {
            index,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Builds a [`Sample`] against a manifest.
pub struct SampleBuilder<'a> {
    manifest: &'a Manifest,
    timestamp: Option<DateTime<Utc>>,
    values: Vec<(u32, Value)>,
}

impl<'a> SampleBuilder<'a> {
    pub fn new(manifest: &'a Manifest) -> Self {
        Self {
            manifest,
            timestamp: None,
            values: Vec::new(),
        }
    }

    /// Override the capture time (defaults to the time of `build`).
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set a column, consuming and returning the builder.
    pub fn set(mut self, index: u32, value: impl Into<Value>) -> Result<Self, SchemaError> {
        self.append(index, value)?;
        Ok(self)
    }

    /// Set a column in place.
    pub fn append(&mut self, index: u32, value: impl Into<Value>) -> Result<(), SchemaError> {
        let value = value.into();
        check_value(self.manifest, index, &value)?;
        if self.values.iter().any(|(i, _)| *i == index) {
            return Err(SchemaError::DuplicateColumn { index });
        }
        self.values.push((index, value));
        Ok(())
    }

    /// Set a column by name.
    pub fn set_named(self, name: &str, value: impl Into<Value>) -> Result<Self, SchemaError> {
        let index = self.manifest.index_of(name).unwrap_or(0);
        self.set(index, value)
    }

    pub fn build(self) -> Sample {
        Sample {
            source_id: self.manifest.source_id(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now).trunc_subsecs(6),
            values: self.values,
        }
    }
}

impl Sample {
    /// Assemble a sample from decoded parts. Values are not re-validated.
    pub(crate) fn from_parts(
        source_id: u32,
        timestamp: DateTime<Utc>,
        values: Vec<(u32, Value)>,
    ) -> Self {
        Self {
            source_id,
            timestamp,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ColumnType;

    fn manifest() -> Manifest {
        Manifest::builder(7)
            .column("bps", ColumnType::Uint)
            .column("name", ColumnType::String)
            .column("load", ColumnType::Double)
            .build()
    }

    #[test]
    fn test_sparse_sample_keeps_write_order() {
        let m = manifest();
        let sample = Sample::builder(&m)
            .set(3, 0.5)
            .unwrap()
            .set(1, 10u32)
            .unwrap()
            .build();

        assert_eq!(sample.source_id(), 7);
        assert_eq!(
            sample.values(),
            &[(3, Value::Double(0.5)), (1, Value::Uint(10))]
        );
        assert!(sample.get(2).is_none());
    }

    #[test]
    fn test_unknown_column_rejected() {
        let m = manifest();
        let err = Sample::builder(&m).set(4, 1u32).err().unwrap();
        assert_eq!(err, SchemaError::UnknownColumn { index: 4, columns: 3 });
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let m = manifest();
        let err = Sample::builder(&m).set(1, 1i32).err().unwrap();
        assert_eq!(
            err,
            SchemaError::TypeMismatch {
                index: 1,
                expected: ColumnType::Uint,
                actual: ColumnType::Int,
            }
        );
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let m = manifest();
        let mut builder = Sample::builder(&m);
        builder.append(1, 1u32).unwrap();
        assert_eq!(
            builder.append(1, 2u32),
            Err(SchemaError::DuplicateColumn { index: 1 })
        );
    }

    #[test]
    fn test_set_named() {
        let m = manifest();
        let sample = Sample::builder(&m).set_named("name", "eth0").unwrap().build();
        assert_eq!(sample.get(2), Some(&Value::String("eth0".into())));
        assert!(Sample::builder(&m).set_named("missing", 1u32).is_err());
    }

    #[test]
    fn test_data_len_matches_encoding() {
        let m = manifest();
        let sample = Sample::builder(&m)
            .set(1, 300u32)
            .unwrap()
            .set(2, "lo")
            .unwrap()
            .set(3, 1.0)
            .unwrap()
            .build();
        // tag+2 byte varint, tag+len+2, tag+8
        assert_eq!(sample.data_len(), 3 + 4 + 9);
    }

    #[test]
    fn test_validate_against_other_manifest() {
        let m = manifest();
        let sample = Sample::builder(&m).set(1, 1u32).unwrap().build();
        let other = Manifest::builder(8).column("bps", ColumnType::Uint).build();
        assert!(matches!(
            sample.validate(&other),
            Err(SchemaError::SourceMismatch { expected: 8, actual: 7 })
        ));
        assert!(sample.validate(&m).is_ok());
    }
}
