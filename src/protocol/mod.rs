//! Manifest/sample data model and its binary encoding.
//!
//! A [`Manifest`] declares the columns a source will report; every
//! [`Sample`] that source emits afterwards refers to those columns by their
//! 1-based index. Subscribers always receive a manifest before any sample
//! that depends on it.
//!
//! # Example
//!
//! ```
//! use perfscope::protocol::{self, ColumnType, Manifest, Sample};
//!
//! let manifest = Manifest::builder(3)
//!     .column("bps", ColumnType::Uint)
//!     .column("qps", ColumnType::Uint)
//!     .build();
//! let sample = Sample::builder(&manifest).set(1, 42u32).unwrap().build();
//!
//! let bytes = protocol::encode_samples(&manifest, [&sample]).unwrap();
//! let decoded = protocol::decode_samples(&manifest, &bytes).unwrap();
//! assert_eq!(decoded[0].values(), sample.values());
//! ```

pub mod codec;
pub mod error;
pub mod manifest;
pub mod sample;
pub mod types;

pub use codec::{decode_manifest, decode_samples, encode_manifest, encode_samples, sample_record_len};
pub use error::{ProtocolError, SchemaError};
pub use manifest::{Column, Manifest, ManifestBuilder};
pub use sample::{Sample, SampleBuilder};
pub use types::{ColumnType, Resolution, Value};
