//! Schema describing the shape of one source's samples.

use crate::protocol::{ColumnType, Resolution};
use chrono::{DateTime, SubsecRound, Utc};

/// One named, typed column. Indices are 1-based and dense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub index: u32,
    pub name: String,
    pub column_type: ColumnType,
}

/// Ordered column list plus the timestamp base for a source's samples.
///
/// Immutable once built. Sources share it as `Arc<Manifest>` with every
/// subscriber; a schema change means building and emitting a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    source_id: u32,
    resolution: Resolution,
    timestamp: DateTime<Utc>,
    columns: Vec<Column>,
}

impl Manifest {
    pub fn builder(source_id: u32) -> ManifestBuilder {
        ManifestBuilder::new(source_id)
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Base timestamp that sample deltas are relative to.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Look up a column by its 1-based index.
    pub fn column(&self, index: u32) -> Option<&Column> {
        if index == 0 {
            return None;
        }
        self.columns.get(index as usize - 1)
    }

    pub fn column_type(&self, index: u32) -> Option<ColumnType> {
        self.column(index).map(|c| c.column_type)
    }

    /// Index of the column called `name`, if any.
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.index)
    }

    /// True when both manifests declare the same names and types in the same order.
    pub fn same_schema(&self, other: &Manifest) -> bool {
        self.columns == other.columns
    }
}

/// Builder for [`Manifest`]. Columns are numbered in the order they are added.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    source_id: u32,
    resolution: Resolution,
    timestamp: Option<DateTime<Utc>>,
    columns: Vec<Column>,
}

impl ManifestBuilder {
    pub fn new(source_id: u32) -> Self {
        Self {
            source_id,
            resolution: Resolution::default(),
            timestamp: None,
            columns: Vec::new(),
        }
    }

    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Fix the base timestamp. Defaults to the time of [`ManifestBuilder::build`].
    ///
    /// The wire carries microseconds, so the timestamp is truncated to that.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.push(name, column_type);
        self
    }

    /// Append a column in place, returning its index.
    pub fn push(&mut self, name: impl Into<String>, column_type: ColumnType) -> u32 {
        let index = self.columns.len() as u32 + 1;
        self.columns.push(Column {
            index,
            name: name.into(),
            column_type,
        });
        index
    }

    pub fn build(self) -> Manifest {
        Manifest {
            source_id: self.source_id,
            resolution: self.resolution,
            timestamp: self.timestamp.unwrap_or_else(Utc::now).trunc_subsecs(6),
            columns: self.columns,
        }
    }
}
