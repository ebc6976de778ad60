//! Integration tests for the pipeline lifecycle
//!
//! These tests drive the public `Pipeline` API end to end:
//! - Channel start/pause/unpause/stop against host, attached and spawned targets
//! - Sources reading a fake proc filesystem
//! - Subscriptions delivering decodable bytes

mod common;

use common::builders::StepSource;
use common::mock_helpers::{recording_spec, Decoder};
use common::{test_timeout, wait_until, FakeProc};
use perfscope::channel::{ChannelError, ChannelSpec, ChannelState};
use perfscope::protocol::Value;
use perfscope::source::{AnySource, SourceInfo, SourceSettings};
use perfscope::subscription::Delivery;
use perfscope::{AgentError, Pipeline};
use serial_test::serial;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SLOW: Duration = Duration::from_secs(3600);

fn pipeline(proc: &FakeProc) -> Pipeline {
    Pipeline::new(
        SourceSettings {
            proc_root: proc.path().to_path_buf(),
        },
        SLOW,
    )
}

/// Register the `step` plugin type and return a handle to the pass counter
/// of the most recently created instance.
fn register_step(pipeline: &mut Pipeline) -> Arc<Mutex<Arc<AtomicU32>>> {
    let passes = Arc::new(Mutex::new(Arc::new(AtomicU32::new(0))));
    let latest = passes.clone();
    pipeline.register_source_type(SourceInfo::new("step", "Step", "Test counter", "1.0"), move |_| {
        let source = StepSource::new(&["value"]);
        *latest.lock().unwrap() = source.passes();
        AnySource::Plugin(Box::new(source))
    });
    passes
}

fn recv(rx: &crossbeam_channel::Receiver<Delivery>) -> Delivery {
    rx.recv_timeout(test_timeout()).expect("delivery")
}

#[test]
fn test_host_sources_deliver_decodable_samples() {
    let proc = FakeProc::new();
    let mut pipeline = pipeline(&proc);
    let channel = pipeline.create_channel(ChannelSpec::host());
    let cpu = pipeline.add_source(channel, "cpu").unwrap();
    let netdev = pipeline.add_source(channel, "netdev").unwrap();

    let (spec, rx) = recording_spec(channel);
    let subscription = pipeline.create_subscription(spec).unwrap();
    pipeline.start_all().unwrap();

    let mut decoder = Decoder::default();
    assert!(wait_until(|| {
        while let Ok(delivery) = rx.try_recv() {
            decoder.push(&delivery);
        }
        decoder.samples.len() >= 3
    }));

    let cpu_manifest = &decoder.manifests[&cpu.0];
    assert_eq!(cpu_manifest.columns()[0].name, "CPU Number");
    let cpu_samples = decoder.samples_from(cpu.0);
    assert_eq!(cpu_samples.len(), 2);
    assert_eq!(cpu_samples[0].get(1), Some(&Value::Int(0)));
    assert_eq!(cpu_samples[0].get(2), Some(&Value::Int64(1132)));
    assert_eq!(cpu_samples[1].get(1), Some(&Value::Int(1)));

    let net_samples = decoder.samples_from(netdev.0);
    assert_eq!(net_samples.len(), 1);
    assert_eq!(net_samples[0].get(1), Some(&Value::String("lo".to_string())));
    assert_eq!(net_samples[0].get(2), Some(&Value::Uint64(204560)));

    let status = pipeline.subscription_status(subscription).unwrap();
    assert_eq!(status.stats.manifests, 2);
    assert_eq!(status.stats.samples, 3);
    assert!(!status.degraded);

    pipeline.shutdown();
}

#[test]
fn test_attach_reads_target_memory() {
    let proc = FakeProc::new().with_process(4242, "100 50 10 5 0 40 0\n");
    let mut pipeline = pipeline(&proc);
    let channel = pipeline.create_channel(ChannelSpec::attach(4242));
    let memory = pipeline.add_source(channel, "memory").unwrap();
    let (spec, rx) = recording_spec(channel);
    pipeline.create_subscription(spec).unwrap();
    pipeline.start_all().unwrap();
    assert_eq!(pipeline.channel(channel).unwrap().target_pid(), Some(4242));

    let mut decoder = Decoder::default();
    decoder.push(&recv(&rx));
    decoder.push(&recv(&rx));
    let samples = decoder.samples_from(memory.0);
    assert_eq!(samples[0].get(1), Some(&Value::Uint(100)));
    assert_eq!(samples[0].get(5), Some(&Value::Uint(40)));

    // An attached pid is never killed and has no exit status.
    pipeline.stop_channel(channel, true).unwrap();
    assert!(pipeline.channel(channel).unwrap().exit_status().is_none());
}

#[test]
fn test_attach_to_missing_pid_fails() {
    let proc = FakeProc::new();
    let mut pipeline = pipeline(&proc);
    let channel = pipeline.create_channel(ChannelSpec::attach(999_999));
    let err = pipeline.start_channel(channel).unwrap_err();
    assert!(matches!(
        err,
        AgentError::Channel(ChannelError::TargetNotFound { pid: 999_999 })
    ));
    assert_eq!(pipeline.channel(channel).unwrap().state(), ChannelState::Created);
}

#[test]
fn test_add_source_after_start_samples_right_away() {
    let proc = FakeProc::new();
    let mut pipeline = pipeline(&proc);
    register_step(&mut pipeline);
    let channel = pipeline.create_channel(ChannelSpec::host());
    let (spec, rx) = recording_spec(channel);
    let subscription = pipeline.create_subscription(spec).unwrap();
    pipeline.start_all().unwrap();

    let source = pipeline.add_source(channel, "step").unwrap();
    let mut decoder = Decoder::default();
    decoder.push(&recv(&rx));
    decoder.push(&recv(&rx));
    assert_eq!(decoder.manifests[&source.0].columns()[0].name, "value");
    assert_eq!(decoder.samples_from(source.0)[0].get(1), Some(&Value::Uint(1)));

    pipeline.remove_source(channel, source).unwrap();
    assert!(pipeline.channel(channel).unwrap().manifest(source).is_none());
    pipeline.disable_subscription(subscription, true).unwrap();
}

#[test]
fn test_pause_unpause_replays_manifests() {
    let proc = FakeProc::new();
    let mut pipeline = pipeline(&proc);
    let passes = register_step(&mut pipeline);
    let channel = pipeline.create_channel(ChannelSpec::host());
    pipeline.add_source(channel, "step").unwrap();
    let (spec, rx) = recording_spec(channel);
    pipeline.create_subscription(spec).unwrap();
    pipeline.start_all().unwrap();

    assert!(matches!(recv(&rx), Delivery::Manifest(_)));
    assert!(matches!(recv(&rx), Delivery::Samples(_)));

    pipeline.pause_channel(channel).unwrap();
    assert_eq!(pipeline.channel(channel).unwrap().state(), ChannelState::Paused);
    let passes = passes.lock().unwrap().clone();
    assert_eq!(passes.load(Ordering::SeqCst), 1);
    assert!(matches!(
        pipeline.pause_channel(channel),
        Err(AgentError::Channel(ChannelError::InvalidState { op: "pause", .. }))
    ));

    pipeline.unpause_channel(channel).unwrap();
    assert!(matches!(recv(&rx), Delivery::Manifest(_)));
    assert!(matches!(recv(&rx), Delivery::Samples(_)));
    assert_eq!(passes.load(Ordering::SeqCst), 2);

    pipeline.stop_channel(channel, false).unwrap();
    pipeline.stop_channel(channel, false).unwrap();
    assert_eq!(pipeline.channel(channel).unwrap().state(), ChannelState::Stopped);
}

#[test]
fn test_disconnected_sink_degrades_subscription() {
    let proc = FakeProc::new();
    let mut pipeline = pipeline(&proc);
    let channel = pipeline.create_channel(ChannelSpec::host());
    pipeline.add_source(channel, "cpu").unwrap();
    let (spec, rx) = recording_spec(channel);
    let subscription = pipeline.create_subscription(spec).unwrap();
    drop(rx);
    pipeline.start_all().unwrap();

    assert!(wait_until(|| pipeline.subscription_status(subscription).unwrap().degraded));
    let status = pipeline.subscription_status(subscription).unwrap();
    assert!(status.stats.failures > 0);
    assert!(status.last_error.is_some());
    pipeline.shutdown();
}

#[test]
fn test_spawn_failure_leaves_channel_created() {
    let proc = FakeProc::new();
    let mut pipeline = pipeline(&proc);
    let channel = pipeline.create_channel(ChannelSpec::spawn("/nonexistent/perfscope-target"));
    assert!(matches!(
        pipeline.start_channel(channel),
        Err(AgentError::Channel(ChannelError::Spawn { .. }))
    ));
    assert_eq!(pipeline.channel(channel).unwrap().state(), ChannelState::Created);
    pipeline.remove_channel(channel).unwrap();
}

#[test]
#[serial]
fn test_spawned_target_killed_on_stop() {
    let proc = FakeProc::new();
    let mut pipeline = pipeline(&proc);
    let channel = pipeline.create_channel(ChannelSpec::spawn("sleep").args(["30"]));
    pipeline.start_channel(channel).unwrap();
    let handle = pipeline.channel(channel).unwrap();
    assert!(handle.target_pid().is_some());

    pipeline.stop_channel(channel, true).unwrap();
    let status = handle.exit_status().expect("exit status recorded");
    assert!(!status.success());
}

#[test]
#[serial]
fn test_target_exit_stops_channel() {
    let proc = FakeProc::new();
    let mut pipeline = pipeline(&proc);
    register_step(&mut pipeline);
    let channel = pipeline.create_channel(ChannelSpec::spawn("true"));
    pipeline.add_source(channel, "step").unwrap();
    pipeline.start_channel(channel).unwrap();

    let handle = pipeline.channel(channel).unwrap();
    assert!(wait_until(|| handle.state() == ChannelState::Stopped));
    assert!(handle.exit_status().is_some_and(|s| s.success()));

    // A stopped channel can run again.
    pipeline.start_channel(channel).unwrap();
    assert!(wait_until(|| handle.state() == ChannelState::Stopped));
}
