//! Encoders turn manifests and sample batches into delivery payloads.
//!
//! Encoders are pure: output depends only on the inputs, never on state held
//! by the encoder, so a single instance is shared across subscriptions as an
//! `Arc<dyn Encoder>`.
//!
//! Built-in encoders:
//! - `raw` (default) — the plain wire encoding from [`crate::protocol`]
//! - `zlib` — the raw encoding compressed with zlib

mod raw;
mod zlib;

pub use raw::RawEncoder;
pub use zlib::ZlibEncoder;

use crate::protocol::{Manifest, Sample, SchemaError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Identifier of the encoder used when a subscription names none.
pub const DEFAULT_ENCODER: &str = "raw";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Cannot encode sample: {0}")]
    Schema(#[from] SchemaError),

    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

/// Transform from manifests and sample batches to bytes.
///
/// On failure no bytes are returned; implementations build output in a
/// local buffer and only hand it back once complete.
pub trait Encoder: Send + Sync {
    fn encode_manifest(&self, manifest: &Manifest) -> Result<Vec<u8>, EncodeError>;

    fn encode_samples(
        &self,
        manifest: &Manifest,
        samples: &[Arc<Sample>],
    ) -> Result<Vec<u8>, EncodeError>;
}

/// Discovery information for an encoder type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncoderInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
}

impl EncoderInfo {
    pub fn new(id: &str, name: &str, description: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            version: version.to_string(),
        }
    }
}

type EncoderFactory = Box<dyn Fn() -> Arc<dyn Encoder> + Send + Sync>;

struct EncoderEntry {
    info: EncoderInfo,
    factory: EncoderFactory,
}

/// Table of known encoder types, keyed by id.
pub struct EncoderRegistry {
    entries: BTreeMap<String, EncoderEntry>,
}

impl EncoderRegistry {
    /// Registry holding only the built-in encoders.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            entries: BTreeMap::new(),
        };
        registry.register(
            EncoderInfo::new(
                "raw",
                "Raw",
                "Uncompressed tagged varint encoding",
                env!("CARGO_PKG_VERSION"),
            ),
            || Arc::new(RawEncoder),
        );
        registry.register(
            EncoderInfo::new(
                "zlib",
                "Zlib",
                "Raw encoding compressed with zlib",
                env!("CARGO_PKG_VERSION"),
            ),
            || Arc::new(ZlibEncoder::default()),
        );
        registry
    }

    /// Add or replace an encoder type.
    pub fn register<F>(&mut self, info: EncoderInfo, factory: F)
    where
        F: Fn() -> Arc<dyn Encoder> + Send + Sync + 'static,
    {
        self.entries.insert(
            info.id.clone(),
            EncoderEntry {
                info,
                factory: Box::new(factory),
            },
        );
    }

    pub fn create(&self, id: &str) -> Option<Arc<dyn Encoder>> {
        self.entries.get(id).map(|entry| (entry.factory)())
    }

    pub fn infos(&self) -> Vec<EncoderInfo> {
        self.entries.values().map(|e| e.info.clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }
}

impl Default for EncoderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
