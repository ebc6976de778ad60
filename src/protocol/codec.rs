//! Manifest and sample-batch encoding.
//!
//! Manifest layout:
//!
//! | field | wire type | content |
//! |---|---|---|
//! | 1 | varint | base timestamp, microseconds since the Unix epoch |
//! | 2 | varint | resolution code |
//! | 3 | varint | source id |
//! | 4 | length-delimited | column blocks, each itself length-prefixed |
//!
//! Column block: `1` index (varint, 1-based), `2` type code (varint),
//! `3` name (length-delimited).
//!
//! A sample batch is a concatenation of records: `1` source id (varint),
//! `2` timestamp delta in manifest resolution units (varint), `3` value block
//! (length-delimited). The value block is a run of `tag(column, wire type)`
//! followed by the value.

use crate::protocol::{ColumnType, Manifest, ProtocolError, Resolution, Sample, SchemaError, Value};
use crate::wire::{varint_len, WireBuffer, WireType};
use chrono::{DateTime, Utc};

const MANIFEST_TIMESTAMP: u32 = 1;
const MANIFEST_RESOLUTION: u32 = 2;
const MANIFEST_SOURCE: u32 = 3;
const MANIFEST_COLUMNS: u32 = 4;

const COLUMN_INDEX: u32 = 1;
const COLUMN_TYPE: u32 = 2;
const COLUMN_NAME: u32 = 3;

const SAMPLE_SOURCE: u32 = 1;
const SAMPLE_TIMESTAMP: u32 = 2;
const SAMPLE_DATA: u32 = 3;

// ── Encoding ──

pub fn encode_manifest(manifest: &Manifest) -> Vec<u8> {
    let mut columns = WireBuffer::new();
    for column in manifest.columns() {
        let mut block = WireBuffer::new();
        block.write_tag(COLUMN_INDEX, WireType::Varint);
        block.write_uint(column.index);
        block.write_tag(COLUMN_TYPE, WireType::Varint);
        block.write_uint(column.column_type.type_code());
        block.write_tag(COLUMN_NAME, WireType::LengthDelimited);
        block.write_string(&column.name);
        columns.write_bytes(block.as_bytes());
    }

    let mut buf = WireBuffer::with_capacity(columns.len() + 16);
    buf.write_tag(MANIFEST_TIMESTAMP, WireType::Varint);
    buf.write_uint64(manifest.timestamp().timestamp_micros().max(0) as u64);
    buf.write_tag(MANIFEST_RESOLUTION, WireType::Varint);
    buf.write_uint(manifest.resolution().code());
    buf.write_tag(MANIFEST_SOURCE, WireType::Varint);
    buf.write_uint(manifest.source_id());
    buf.write_tag(MANIFEST_COLUMNS, WireType::LengthDelimited);
    buf.write_bytes(columns.as_bytes());
    buf.into_bytes()
}

/// Encode samples as a batch against `manifest`.
///
/// Every sample is validated first, so a schema violation yields no output
/// at all rather than a partial buffer.
pub fn encode_samples<'a, I>(manifest: &Manifest, samples: I) -> Result<Vec<u8>, SchemaError>
where
    I: IntoIterator<Item = &'a Sample>,
{
    let mut buf = WireBuffer::new();
    for sample in samples {
        sample.validate(manifest)?;
        write_sample(&mut buf, manifest, sample);
    }
    Ok(buf.into_bytes())
}

/// Encoded size of one sample record, header included.
pub fn sample_record_len(manifest: &Manifest, sample: &Sample) -> usize {
    let delta = manifest
        .resolution()
        .units_between(manifest.timestamp(), sample.timestamp());
    let data = sample.data_len();
    // three single-byte tags
    3 + varint_len(sample.source_id() as u64) + varint_len(delta) + varint_len(data as u64) + data
}

fn write_sample(buf: &mut WireBuffer, manifest: &Manifest, sample: &Sample) {
    let delta = manifest
        .resolution()
        .units_between(manifest.timestamp(), sample.timestamp());

    let mut data = WireBuffer::with_capacity(sample.data_len());
    for (index, value) in sample.values() {
        data.write_tag(*index, value.column_type().wire_type());
        write_value(&mut data, value);
    }

    buf.write_tag(SAMPLE_SOURCE, WireType::Varint);
    buf.write_uint(sample.source_id());
    buf.write_tag(SAMPLE_TIMESTAMP, WireType::Varint);
    buf.write_uint64(delta);
    buf.write_tag(SAMPLE_DATA, WireType::LengthDelimited);
    buf.write_bytes(data.as_bytes());
}

fn write_value(buf: &mut WireBuffer, value: &Value) {
    match value {
        Value::Int(v) => buf.write_int(*v),
        Value::Uint(v) => buf.write_uint(*v),
        Value::Int64(v) => buf.write_int64(*v),
        Value::Uint64(v) => buf.write_uint64(*v),
        Value::String(v) => buf.write_string(v),
        Value::Double(v) => buf.write_double(*v),
        Value::Float(v) => buf.write_float(*v),
        Value::Bool(v) => buf.write_bool(*v),
    }
}

// ── Decoding ──

pub fn decode_manifest(bytes: &[u8]) -> Result<Manifest, ProtocolError> {
    let mut buf = WireBuffer::from_bytes(bytes);
    let mut timestamp = None;
    let mut resolution = None;
    let mut source_id = None;
    let mut columns = None;

    while !buf.is_exhausted() {
        let (field, wire_type) = buf.read_tag()?;
        match field {
            MANIFEST_TIMESTAMP => {
                expect_wire_type(field, WireType::Varint, wire_type)?;
                timestamp = Some(micros_to_datetime(buf.read_uint64()?)?);
            }
            MANIFEST_RESOLUTION => {
                expect_wire_type(field, WireType::Varint, wire_type)?;
                resolution = Some(Resolution::from_code(buf.read_uint()?)?);
            }
            MANIFEST_SOURCE => {
                expect_wire_type(field, WireType::Varint, wire_type)?;
                source_id = Some(buf.read_uint()?);
            }
            MANIFEST_COLUMNS => {
                expect_wire_type(field, WireType::LengthDelimited, wire_type)?;
                columns = Some(decode_columns(buf.read_embedded()?)?);
            }
            _ => buf.skip_field(wire_type)?,
        }
    }

    let mut builder = Manifest::builder(source_id.ok_or(ProtocolError::MissingField(MANIFEST_SOURCE))?)
        .timestamp(timestamp.ok_or(ProtocolError::MissingField(MANIFEST_TIMESTAMP))?)
        .resolution(resolution.ok_or(ProtocolError::MissingField(MANIFEST_RESOLUTION))?);
    for (name, column_type) in columns.ok_or(ProtocolError::MissingField(MANIFEST_COLUMNS))? {
        builder.push(name, column_type);
    }
    Ok(builder.build())
}

fn decode_columns(mut region: WireBuffer) -> Result<Vec<(String, ColumnType)>, ProtocolError> {
    let mut columns = Vec::new();
    while !region.is_exhausted() {
        let mut block = region.read_embedded()?;
        let mut index = None;
        let mut column_type = None;
        let mut name = None;

        while !block.is_exhausted() {
            let (field, wire_type) = block.read_tag()?;
            match field {
                COLUMN_INDEX => {
                    expect_wire_type(field, WireType::Varint, wire_type)?;
                    index = Some(block.read_uint()?);
                }
                COLUMN_TYPE => {
                    expect_wire_type(field, WireType::Varint, wire_type)?;
                    column_type = Some(ColumnType::from_type_code(block.read_uint()?)?);
                }
                COLUMN_NAME => {
                    expect_wire_type(field, WireType::LengthDelimited, wire_type)?;
                    name = Some(block.read_string()?);
                }
                _ => block.skip_field(wire_type)?,
            }
        }

        let expected = columns.len() as u32 + 1;
        let index = index.ok_or(ProtocolError::MissingField(COLUMN_INDEX))?;
        if index != expected {
            return Err(ProtocolError::ColumnOutOfOrder {
                expected,
                actual: index,
            });
        }
        columns.push((
            name.ok_or(ProtocolError::MissingField(COLUMN_NAME))?,
            column_type.ok_or(ProtocolError::MissingField(COLUMN_TYPE))?,
        ));
    }
    Ok(columns)
}

/// Decode a sample batch produced against `manifest`.
///
/// Records are decoded whole; any malformed or truncated record fails the
/// entire batch.
pub fn decode_samples(manifest: &Manifest, bytes: &[u8]) -> Result<Vec<Sample>, ProtocolError> {
    let mut buf = WireBuffer::from_bytes(bytes);
    let mut samples = Vec::new();

    while !buf.is_exhausted() {
        let source_id = read_field(&mut buf, SAMPLE_SOURCE, WireType::Varint)
            .and_then(|_| buf.read_uint())?;
        if source_id != manifest.source_id() {
            return Err(SchemaError::SourceMismatch {
                expected: manifest.source_id(),
                actual: source_id,
            }
            .into());
        }

        let delta = read_field(&mut buf, SAMPLE_TIMESTAMP, WireType::Varint)
            .and_then(|_| buf.read_uint64())?;
        let mut data = read_field(&mut buf, SAMPLE_DATA, WireType::LengthDelimited)
            .and_then(|_| buf.read_embedded())?;

        let mut values: Vec<(u32, Value)> = Vec::new();
        while !data.is_exhausted() {
            let (index, wire_type) = data.read_tag()?;
            let column_type = manifest
                .column_type(index)
                .ok_or(SchemaError::UnknownColumn {
                    index,
                    columns: manifest.len(),
                })?;
            expect_wire_type(index, column_type.wire_type(), wire_type)?;
            if values.iter().any(|(i, _)| *i == index) {
                return Err(SchemaError::DuplicateColumn { index }.into());
            }
            values.push((index, read_value(&mut data, column_type)?));
        }

        let timestamp = manifest.resolution().offset(manifest.timestamp(), delta);
        samples.push(Sample::from_parts(source_id, timestamp, values));
    }

    Ok(samples)
}

fn read_field(buf: &mut WireBuffer, expected: u32, wire_type: WireType) -> Result<(), ProtocolError> {
    let (field, actual) = buf.read_tag()?;
    if field != expected {
        return Err(ProtocolError::UnexpectedField {
            expected,
            actual: field,
        });
    }
    expect_wire_type(field, wire_type, actual)
}

fn read_value(buf: &mut WireBuffer, column_type: ColumnType) -> Result<Value, ProtocolError> {
    Ok(match column_type {
        ColumnType::Int => Value::Int(buf.read_int()?),
        ColumnType::Uint => Value::Uint(buf.read_uint()?),
        ColumnType::Int64 => Value::Int64(buf.read_int64()?),
        ColumnType::Uint64 => Value::Uint64(buf.read_uint64()?),
        ColumnType::String => Value::String(buf.read_string()?),
        ColumnType::Double => Value::Double(buf.read_double()?),
        ColumnType::Float => Value::Float(buf.read_float()?),
        ColumnType::Bool => Value::Bool(buf.read_bool()?),
    })
}

fn expect_wire_type(field: u32, expected: WireType, actual: WireType) -> Result<(), ProtocolError> {
    if expected != actual {
        return Err(ProtocolError::UnexpectedWireType {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

fn micros_to_datetime(micros: u64) -> Result<DateTime<Utc>, ProtocolError> {
    i64::try_from(micros)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .ok_or(ProtocolError::InvalidTimestamp(micros))
}
