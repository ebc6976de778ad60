use super::{EncodeError, Encoder};
use crate::protocol::{self, Manifest, Sample};
use std::sync::Arc;

/// Plain wire encoding, no transformation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEncoder;

impl Encoder for RawEncoder {
    fn encode_manifest(&self, manifest: &Manifest) -> Result<Vec<u8>, EncodeError> {
        Ok(protocol::encode_manifest(manifest))
    }

    fn encode_samples(
        &self,
        manifest: &Manifest,
        samples: &[Arc<Sample>],
    ) -> Result<Vec<u8>, EncodeError> {
        Ok(protocol::encode_samples(
            manifest,
            samples.iter().map(|s| s.as_ref()),
        )?)
    }
}
