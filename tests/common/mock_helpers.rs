//! Sink and decoding helpers

use perfscope::id::ChannelId;
use perfscope::protocol::{self, Manifest, Sample};
use perfscope::subscription::{ChannelSink, Delivery, SubscriptionSpec};
use perfscope::wire::{WireBuffer, WireType};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Subscription spec delivering into a crossbeam receiver
pub fn recording_spec(channel: ChannelId) -> (SubscriptionSpec, crossbeam_channel::Receiver<Delivery>) {
    let (sink, rx) = ChannelSink::new(1024);
    (SubscriptionSpec::new(channel, Arc::new(sink)), rx)
}

/// Turns raw deliveries back into manifests and samples, the way a
/// subscriber on the other end of a sink would.
#[derive(Default)]
pub struct Decoder {
    pub manifests: BTreeMap<u32, Manifest>,
    pub samples: Vec<Sample>,
}

impl Decoder {
    pub fn push(&mut self, delivery: &Delivery) {
        match delivery {
            Delivery::Manifest(bytes) => {
                let manifest = protocol::decode_manifest(bytes).unwrap();
                self.manifests.insert(manifest.source_id(), manifest);
            }
            Delivery::Samples(bytes) => {
                let source = leading_source_id(bytes);
                let manifest = self
                    .manifests
                    .get(&source)
                    .unwrap_or_else(|| panic!("samples for source {source} before its manifest"));
                self.samples
                    .extend(protocol::decode_samples(manifest, bytes).unwrap());
            }
        }
    }

    pub fn samples_from(&self, source: u32) -> Vec<&Sample> {
        self.samples.iter().filter(|s| s.source_id() == source).collect()
    }
}

/// Source id of the first record in a sample batch
pub fn leading_source_id(bytes: &[u8]) -> u32 {
    let mut buf = WireBuffer::from_bytes(bytes);
    let (field, wire_type) = buf.read_tag().unwrap();
    assert_eq!((field, wire_type), (1, WireType::Varint));
    buf.read_uint().unwrap()
}
