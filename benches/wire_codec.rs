//! Benchmarks for the wire codec hot path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use perfscope::encoder::{Encoder, RawEncoder, ZlibEncoder};
use perfscope::protocol::{self, ColumnType, Manifest, Sample};
use perfscope::wire::WireBuffer;
use std::sync::Arc;

/// Shaped like the cpu source: a number plus nine counters
fn cpu_manifest() -> Manifest {
    let mut builder = Manifest::builder(1);
    builder.push("CPU Number", ColumnType::Int);
    for name in ["User", "Nice", "System", "Idle", "I/O Wait", "IRQ", "Soft IRQ", "VM Stolen", "VM Guest"] {
        builder.push(name, ColumnType::Int64);
    }
    builder.build()
}

fn cpu_samples(manifest: &Manifest, count: usize) -> Vec<Arc<Sample>> {
    (0..count)
        .map(|i| {
            let mut sample = Sample::builder(manifest).timestamp(manifest.timestamp());
            sample.append(1, (i % 64) as i32).unwrap();
            for column in 2..=10u32 {
                sample.append(column, (i as i64) * 1_000 + column as i64).unwrap();
            }
            Arc::new(sample.build())
        })
        .collect()
}

fn bench_varint(c: &mut Criterion) {
    let mut group = c.benchmark_group("varint");
    group.throughput(Throughput::Elements(1024));

    group.bench_function("write_uint64", |b| {
        let mut buf = WireBuffer::with_capacity(16 * 1024);
        b.iter(|| {
            buf.clear();
            for i in 0..1024u64 {
                buf.write_uint64(black_box(i << (i % 56)));
            }
        });
    });

    let mut encoded = WireBuffer::new();
    for i in 0..1024u64 {
        encoded.write_uint64(i << (i % 56));
    }
    let bytes = encoded.into_bytes();
    group.bench_function("read_uint64", |b| {
        b.iter(|| {
            let mut buf = WireBuffer::from_bytes(&bytes);
            for _ in 0..1024 {
                black_box(buf.read_uint64().unwrap());
            }
        });
    });

    group.finish();
}

fn bench_samples(c: &mut Criterion) {
    let mut group = c.benchmark_group("samples");
    let manifest = cpu_manifest();

    for count in [1, 64, 1024].iter() {
        let samples = cpu_samples(&manifest, *count);
        let bytes = RawEncoder.encode_samples(&manifest, &samples).unwrap();
        group.throughput(Throughput::Elements(*count as u64));

        group.bench_with_input(BenchmarkId::new("encode_raw", count), &samples, |b, samples| {
            b.iter(|| black_box(RawEncoder.encode_samples(&manifest, samples).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("encode_zlib", count), &samples, |b, samples| {
            let zlib = ZlibEncoder::default();
            b.iter(|| black_box(zlib.encode_samples(&manifest, samples).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", count), &bytes, |b, bytes| {
            b.iter(|| black_box(protocol::decode_samples(&manifest, bytes).unwrap()));
        });
    }

    group.finish();
}

fn bench_manifest(c: &mut Criterion) {
    let manifest = cpu_manifest();
    let bytes = protocol::encode_manifest(&manifest);

    c.bench_function("manifest_encode", |b| {
        b.iter(|| black_box(protocol::encode_manifest(&manifest)));
    });
    c.bench_function("manifest_decode", |b| {
        b.iter(|| black_box(protocol::decode_manifest(&bytes).unwrap()));
    });
}

criterion_group!(benches, bench_varint, bench_samples, bench_manifest);
criterion_main!(benches);
