use super::{EncodeError, Encoder, RawEncoder};
use crate::protocol::{Manifest, Sample};
use flate2::write::ZlibEncoder as ZlibWriter;
use flate2::Compression;
use std::io::Write;
use std::sync::Arc;

/// Raw encoding wrapped in a zlib stream.
#[derive(Debug, Clone, Copy)]
pub struct ZlibEncoder {
    level: u32,
}

impl ZlibEncoder {
    /// `level` is clamped to 0..=9.
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }

    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let mut writer = ZlibWriter::new(Vec::new(), Compression::new(self.level));
        writer.write_all(raw)?;
        Ok(writer.finish()?)
    }
}

impl Default for ZlibEncoder {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Encoder for ZlibEncoder {
    fn encode_manifest(&self, manifest: &Manifest) -> Result<Vec<u8>, EncodeError> {
        self.compress(&RawEncoder.encode_manifest(manifest)?)
    }

    fn encode_samples(
        &self,
        manifest: &Manifest,
        samples: &[Arc<Sample>],
    ) -> Result<Vec<u8>, EncodeError> {
        self.compress(&RawEncoder.encode_samples(manifest, samples)?)
    }
}
