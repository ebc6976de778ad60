//! Wire compatibility tests
//!
//! Byte-level expectations any subscriber implementation can rely on.

mod common;

use common::builders::bps_qps_manifest;
use common::mock_helpers::Decoder;
use common::{wait_until, FakeProc};
use flate2::read::ZlibDecoder;
use perfscope::config::{AgentConfig, ChannelConfig, SinkConfig, SourceConfig, SubscriptionConfig};
use perfscope::encoder::{Encoder, EncoderRegistry};
use perfscope::protocol::{Sample, Value};
use perfscope::subscription::read_frames;
use perfscope::PipelineBuilder;
use std::io::Read;
use std::sync::Arc;

#[rustfmt::skip]
const MANIFEST: &[u8] = &[
    0x08, 0xC0, 0x84, 0x3D,
    0x10, 0x01,
    0x18, 0x03,
    0x22, 0x14,
    0x09, 0x08, 0x01, 0x10, 0x1C, 0x1A, 0x03, b'b', b'p', b's',
    0x09, 0x08, 0x02, 0x10, 0x1C, 0x1A, 0x03, b'q', b'p', b's',
];

const ZERO_RECORD: [u8; 10] = [0x08, 0x03, 0x10, 0x00, 0x1A, 0x04, 0x08, 0x00, 0x10, 0x00];

fn zero_samples() -> Vec<Arc<Sample>> {
    let manifest = bps_qps_manifest();
    (0..3)
        .map(|_| {
            Arc::new(
                Sample::builder(&manifest)
                    .timestamp(manifest.timestamp())
                    .set(1, 0u32)
                    .unwrap()
                    .set(2, 0u32)
                    .unwrap()
                    .build(),
            )
        })
        .collect()
}

fn inflate(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes).read_to_end(&mut out).unwrap();
    out
}

#[test]
fn test_raw_encoder_golden_bytes() {
    let raw = EncoderRegistry::with_builtins().create("raw").unwrap();
    let manifest = bps_qps_manifest();
    assert_eq!(raw.encode_manifest(&manifest).unwrap(), MANIFEST);

    let batch = raw.encode_samples(&manifest, &zero_samples()).unwrap();
    assert_eq!(batch, ZERO_RECORD.repeat(3));
}

#[test]
fn test_zlib_inflates_to_raw() {
    let registry = EncoderRegistry::with_builtins();
    let raw = registry.create("raw").unwrap();
    let zlib = registry.create("zlib").unwrap();
    let manifest = bps_qps_manifest();
    let samples = zero_samples();

    assert_eq!(inflate(&zlib.encode_manifest(&manifest).unwrap()), MANIFEST);
    assert_eq!(
        inflate(&zlib.encode_samples(&manifest, &samples).unwrap()),
        raw.encode_samples(&manifest, &samples).unwrap()
    );
}

#[test]
fn test_file_sink_recording_decodes() {
    let proc = FakeProc::new();
    let recording = proc.join("out/recording.bin");

    let mut config = AgentConfig::default();
    config.sampling.proc_root = proc.path().to_path_buf();
    config.sampling.default_interval_ms = 3_600_000;
    config.channels.push(ChannelConfig {
        sources: vec![SourceConfig {
            kind: "cpu".to_string(),
            interval_ms: None,
        }],
        ..ChannelConfig::default()
    });
    config.subscriptions.push(SubscriptionConfig {
        channel: 0,
        buffer_size: 1,
        buffer_timeout_ms: 60_000,
        encoder: "raw".to_string(),
        sink: SinkConfig::File {
            path: recording.clone(),
        },
        sources: None,
    });

    let mut pipeline = PipelineBuilder::new(config).build().unwrap();
    let subscription = pipeline.subscription_ids()[0];
    pipeline.start_all().unwrap();
    assert!(wait_until(|| {
        pipeline.subscription_status(subscription).unwrap().stats.samples >= 2
    }));
    pipeline.shutdown();

    let frames = read_frames(&std::fs::read(&recording).unwrap()).unwrap();
    let mut decoder = Decoder::default();
    for frame in &frames {
        decoder.push(frame);
    }
    assert_eq!(decoder.manifests.len(), 1);
    let numbers: Vec<_> = decoder.samples.iter().map(|s| s.get(1).cloned()).collect();
    assert_eq!(numbers, vec![Some(Value::Int(0)), Some(Value::Int(1))]);
}
