//! Subscription delivery engine.
//!
//! A subscription buffers encoded samples per source and hands them to a
//! [`DeliverySink`] in batches. A batch is flushed when its byte size
//! reaches `buffer_size` or when its oldest sample is `buffer_timeout` old,
//! whichever comes first:
//!
//! | buffer_timeout | buffer_size | behaviour |
//! |---|---|---|
//! | 0 | any | every sample is delivered on its own |
//! | > 0 | 0 | only the timer flushes |
//! | > 0 | > 0 | size or timer, whichever first |
//!
//! Manifests are never batched. Before a new manifest for a source goes
//! out, anything still pending for that source is flushed against the old
//! one, so a subscriber always decodes samples with the schema they were
//! built from.
//!
//! Failed deliveries mark the subscription degraded and park the payload
//! in a bounded retry queue, which is drained ahead of the next delivery.

mod sink;

pub use sink::{read_frames, ChannelSink, Delivery, DeliveryError, DeliverySink, FileSink};

use crate::encoder::{Encoder, DEFAULT_ENCODER};
use crate::id::{ChannelId, SourceId, SubscriptionId};
use crate::protocol::{sample_record_len, Manifest, Sample};
use crossbeam_channel::{after, bounded, never, select, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_RETRY_QUEUE_LEN: usize = 64;
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Parameters for a new subscription.
#[derive(Clone)]
pub struct SubscriptionSpec {
    pub channel: ChannelId,
    /// Flush threshold in encoded bytes. 0 disables the size trigger.
    pub buffer_size: usize,
    /// Maximum age of a pending sample. 0 delivers every sample immediately.
    pub buffer_timeout: Duration,
    pub encoder: String,
    pub sink: Arc<dyn DeliverySink>,
    pub delivery_timeout: Duration,
    /// Only these sources are delivered. `None` means every source on the channel.
    pub sources: Option<Vec<SourceId>>,
    pub retry_queue_len: usize,
}

impl SubscriptionSpec {
    pub fn new(channel: ChannelId, sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            channel,
            buffer_size: 0,
            buffer_timeout: Duration::ZERO,
            encoder: DEFAULT_ENCODER.to_string(),
            sink,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            sources: None,
            retry_queue_len: DEFAULT_RETRY_QUEUE_LEN,
        }
    }

    pub fn buffer(mut self, size: usize, timeout: Duration) -> Self {
        self.buffer_size = size;
        self.buffer_timeout = timeout;
        self
    }

    pub fn encoder(mut self, id: &str) -> Self {
        self.encoder = id.to_string();
        self
    }

    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = SourceId>) -> Self {
        self.sources = Some(sources.into_iter().collect());
        self
    }

    pub fn retry_queue_len(mut self, len: usize) -> Self {
        self.retry_queue_len = len;
        self
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub manifests: u64,
    pub batches: u64,
    pub samples: u64,
    pub bytes: u64,
    pub failures: u64,
    /// Payloads evicted from a full retry queue or lost to encoding errors.
    pub dropped: u64,
}

/// Point-in-time view of a subscription.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    pub id: SubscriptionId,
    pub channel: ChannelId,
    pub encoder: String,
    pub enabled: bool,
    pub degraded: bool,
    pub last_error: Option<String>,
    pub pending_samples: usize,
    pub pending_bytes: usize,
    pub retry_queue: usize,
    pub stats: DeliveryStats,
}

enum Payload {
    Manifest { source: u32, bytes: Vec<u8> },
    Samples { source: u32, bytes: Vec<u8>, count: usize },
}

struct Pending {
    samples: Vec<Arc<Sample>>,
    bytes: usize,
    since: Instant,
}

#[derive(Default)]
struct State {
    enabled: bool,
    degraded: bool,
    last_error: Option<String>,
    manifests: BTreeMap<u32, Arc<Manifest>>,
    pending: BTreeMap<u32, Pending>,
    retry: VecDeque<Payload>,
    /// Sources whose last manifest never reached the sink.
    stale: BTreeSet<u32>,
    stats: DeliveryStats,
}

struct Flusher {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Subscription {
    id: SubscriptionId,
    channel: ChannelId,
    buffer_size: usize,
    buffer_timeout: Duration,
    delivery_timeout: Duration,
    retry_queue_len: usize,
    encoder_id: String,
    encoder: Arc<dyn Encoder>,
    sink: Arc<dyn DeliverySink>,
    sources: Option<BTreeSet<u32>>,
    state: Mutex<State>,
    flusher: Mutex<Option<Flusher>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    this: Weak<Subscription>,
}

impl Subscription {
    /// Create a disabled subscription. `encoder` must be the instance named by `spec.encoder`.
    pub fn new(id: SubscriptionId, spec: SubscriptionSpec, encoder: Arc<dyn Encoder>) -> Arc<Self> {
        let (wake_tx, wake_rx) = bounded(1);
        Arc::new_cyclic(|this| Self {
            id,
            channel: spec.channel,
            buffer_size: spec.buffer_size,
            buffer_timeout: spec.buffer_timeout,
            delivery_timeout: spec.delivery_timeout,
            retry_queue_len: spec.retry_queue_len,
            encoder_id: spec.encoder,
            encoder,
            sink: spec.sink,
            sources: spec
                .sources
                .map(|ids| ids.into_iter().map(|s| s.0).collect()),
            state: Mutex::new(State::default()),
            flusher: Mutex::new(None),
            wake_tx,
            wake_rx,
            this: this.clone(),
        })
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Whether samples from `source` pass the source filter.
    pub fn accepts(&self, source: u32) -> bool {
        self.sources.as_ref().map_or(true, |s| s.contains(&source))
    }

    /// Start delivering. Known manifests are re-sent first.
    pub fn enable(&self) -> Result<(), DeliveryError> {
        let mut result = Ok(());
        {
            let mut state = self.state.lock();
            if state.enabled {
                return Ok(());
            }
            state.enabled = true;
            tracing::info!("Subscription {} enabled", self.id);

            let manifests: Vec<_> = state.manifests.values().cloned().collect();
            for manifest in manifests {
                let Some(payload) = self.encode_manifest(&mut state, &manifest) else {
                    continue;
                };
                if result.is_err() {
                    self.enqueue_retry(&mut state, payload);
                } else {
                    result = self.deliver(&mut state, payload);
                }
            }
        }
        self.start_flusher();
        result
    }

    /// Stop delivering. With `drain`, pending samples get one final flush;
    /// otherwise they are discarded. The flush timer is stopped before this
    /// returns.
    pub fn disable(&self, drain: bool) -> Result<(), DeliveryError> {
        {
            let mut state = self.state.lock();
            if !state.enabled {
                return Ok(());
            }
            state.enabled = false;
        }
        self.stop_flusher();

        let mut state = self.state.lock();
        let mut result = Ok(());
        if drain {
            let sources: Vec<u32> = state.pending.keys().copied().collect();
            for source in sources {
                if let Err(e) = self.flush_source(&mut state, source) {
                    result = Err(e);
                }
            }
        } else {
            let discarded: usize = state.pending.values().map(|p| p.samples.len()).sum();
            state.pending.clear();
            if discarded > 0 {
                tracing::debug!("Subscription {} discarded {} pending samples", self.id, discarded);
            }
        }
        tracing::info!("Subscription {} disabled (drain: {})", self.id, drain);
        result
    }

    /// Flush every pending buffer now.
    pub fn flush(&self) -> Result<(), DeliveryError> {
        let mut state = self.state.lock();
        if !state.enabled {
            return Ok(());
        }
        let mut result = self.drain_retry(&mut state);
        let sources: Vec<u32> = state.pending.keys().copied().collect();
        for source in sources {
            if let Err(e) = self.flush_source(&mut state, source) {
                result = Err(e);
            }
        }
        result
    }

    /// Called by the channel when a source publishes a manifest.
    pub fn on_manifest(&self, manifest: &Arc<Manifest>) {
        let source = manifest.source_id();
        if !self.accepts(source) {
            return;
        }
        let mut state = self.state.lock();
        if !state.enabled {
            state.manifests.insert(source, manifest.clone());
            return;
        }

        if let Err(e) = self.flush_source(&mut state, source) {
            tracing::warn!("Subscription {}: flush before manifest failed: {}", self.id, e);
        }
        state.manifests.insert(source, manifest.clone());
        if let Some(payload) = self.encode_manifest(&mut state, manifest) {
            if let Err(e) = self.deliver(&mut state, payload) {
                tracing::warn!("Subscription {}: manifest delivery failed: {}", self.id, e);
            }
        }
    }

    /// Called by the channel for every sample a source emits.
    pub fn on_sample(&self, sample: &Arc<Sample>) {
        let source = sample.source_id();
        if !self.accepts(source) {
            return;
        }
        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }
        let Some(manifest) = state.manifests.get(&source).cloned() else {
            tracing::debug!("Subscription {}: sample for source {} before its manifest", self.id, source);
            return;
        };

        let len = sample_record_len(&manifest, sample);
        let pending = state.pending.entry(source).or_insert_with(|| Pending {
            samples: Vec::new(),
            bytes: 0,
            since: Instant::now(),
        });
        if pending.samples.is_empty() {
            pending.since = Instant::now();
            let _ = self.wake_tx.try_send(());
        }
        pending.samples.push(sample.clone());
        pending.bytes += len;
        let bytes = pending.bytes;

        if self.needs_flush(bytes) {
            if let Err(e) = self.flush_source(&mut state, source) {
                tracing::warn!("Subscription {}: delivery failed: {}", self.id, e);
            }
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        let state = self.state.lock();
        SubscriptionStatus {
            id: self.id,
            channel: self.channel,
            encoder: self.encoder_id.clone(),
            enabled: state.enabled,
            degraded: state.degraded,
            last_error: state.last_error.clone(),
            pending_samples: state.pending.values().map(|p| p.samples.len()).sum(),
            pending_bytes: state.pending.values().map(|p| p.bytes).sum(),
            retry_queue: state.retry.len(),
            stats: state.stats.clone(),
        }
    }

    fn needs_flush(&self, pending_bytes: usize) -> bool {
        if self.buffer_timeout.is_zero() {
            return true;
        }
        self.buffer_size > 0 && pending_bytes >= self.buffer_size
    }

    fn encode_manifest(&self, state: &mut State, manifest: &Manifest) -> Option<Payload> {
        match self.encoder.encode_manifest(manifest) {
            Ok(bytes) => Some(Payload::Manifest {
                source: manifest.source_id(),
                bytes,
            }),
            Err(e) => {
                tracing::error!("Subscription {}: cannot encode manifest: {}", self.id, e);
                state.stats.dropped += 1;
                None
            }
        }
    }

    fn flush_source(&self, state: &mut State, source: u32) -> Result<(), DeliveryError> {
        let Some(pending) = state.pending.remove(&source) else {
            return Ok(());
        };
        if pending.samples.is_empty() {
            return Ok(());
        }
        let Some(manifest) = state.manifests.get(&source).cloned() else {
            return Ok(());
        };

        match self.encoder.encode_samples(&manifest, &pending.samples) {
            Ok(bytes) => {
                tracing::debug!(
                    "Subscription {}: flushing {} samples ({} bytes) from source {}",
                    self.id,
                    pending.samples.len(),
                    bytes.len(),
                    source
                );
                let count = pending.samples.len();
                self.deliver(state, Payload::Samples { source, bytes, count })
            }
            Err(e) => {
                tracing::error!("Subscription {}: cannot encode samples: {}", self.id, e);
                state.stats.dropped += 1;
                Ok(())
            }
        }
    }

    fn send(&self, payload: &Payload) -> Result<(), DeliveryError> {
        match payload {
            Payload::Manifest { bytes, .. } => self.sink.on_manifest(bytes, self.delivery_timeout),
            Payload::Samples { bytes, .. } => self.sink.on_sample(bytes, self.delivery_timeout),
        }
    }

    /// Send `payload`, preceded by its source's cached manifest if the
    /// subscriber lost the previous one.
    fn send_in_order(&self, state: &mut State, payload: &Payload) -> Result<(), DeliveryError> {
        if let Payload::Samples { source, .. } = payload {
            if state.stale.contains(source) {
                let manifest = state.manifests.get(source).cloned();
                if let Some(resend) = manifest.and_then(|m| self.encode_manifest(state, &m)) {
                    self.send(&resend)?;
                    tracing::debug!("Subscription {}: re-sent manifest of source {}", self.id, source);
                    self.record(state, &resend);
                }
                state.stale.remove(source);
            }
        }
        self.send(payload)
    }

    fn record(&self, state: &mut State, payload: &Payload) {
        match payload {
            Payload::Manifest { source, bytes } => {
                state.stale.remove(source);
                state.stats.manifests += 1;
                state.stats.bytes += bytes.len() as u64;
            }
            Payload::Samples { bytes, count, .. } => {
                state.stats.batches += 1;
                state.stats.samples += *count as u64;
                state.stats.bytes += bytes.len() as u64;
            }
        }
    }

    fn fail(&self, state: &mut State, error: &DeliveryError) {
        if !state.degraded {
            tracing::warn!("Subscription {} degraded: {}", self.id, error);
        }
        state.degraded = true;
        state.last_error = Some(error.to_string());
        state.stats.failures += 1;
    }

    /// Park a payload that could not be sent. A full queue evicts its oldest
    /// sample batch; a manifest is only evicted when nothing else is queued.
    fn enqueue_retry(&self, state: &mut State, payload: Payload) {
        if self.retry_queue_len == 0 {
            self.discard(state, payload);
            return;
        }
        if state.retry.len() >= self.retry_queue_len {
            let victim = state
                .retry
                .iter()
                .position(|p| matches!(p, Payload::Samples { .. }))
                .unwrap_or(0);
            if let Some(evicted) = state.retry.remove(victim) {
                tracing::warn!("Subscription {}: retry queue full, dropping oldest payload", self.id);
                self.discard(state, evicted);
            }
        }
        state.retry.push_back(payload);
    }

    /// A dropped manifest is re-sent from the cache ahead of its source's next batch.
    fn discard(&self, state: &mut State, payload: Payload) {
        state.stats.dropped += 1;
        if let Payload::Manifest { source, .. } = payload {
            state.stale.insert(source);
        }
    }

    /// Re-send queued payloads in order, stopping at the first failure.
    fn drain_retry(&self, state: &mut State) -> Result<(), DeliveryError> {
        while let Some(queued) = state.retry.pop_front() {
            match self.send_in_order(state, &queued) {
                Ok(()) => self.record(state, &queued),
                Err(e) => {
                    state.retry.push_front(queued);
                    self.fail(state, &e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn deliver(&self, state: &mut State, payload: Payload) -> Result<(), DeliveryError> {
        if let Err(e) = self.drain_retry(state) {
            self.enqueue_retry(state, payload);
            return Err(e);
        }
        match self.send_in_order(state, &payload) {
            Ok(()) => {
                self.record(state, &payload);
                if state.degraded {
                    tracing::info!("Subscription {} recovered", self.id);
                    state.degraded = false;
                }
                Ok(())
            }
            Err(e) => {
                self.fail(state, &e);
                self.enqueue_retry(state, payload);
                Err(e)
            }
        }
    }

    // ── Timer flush ──

    fn start_flusher(&self) {
        if self.buffer_timeout.is_zero() {
            return;
        }
        let mut slot = self.flusher.lock();
        if slot.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let wake_rx = self.wake_rx.clone();
        let this = self.this.clone();
        let spawned = thread::Builder::new()
            .name(format!("flush-{}", self.id.0))
            .spawn(move || run_flusher(this, stop_rx, wake_rx));
        match spawned {
            Ok(handle) => *slot = Some(Flusher { stop_tx, handle }),
            Err(e) => tracing::error!("Subscription {}: failed to start flush timer: {}", self.id, e),
        }
    }

    fn stop_flusher(&self) {
        let Some(flusher) = self.flusher.lock().take() else {
            return;
        };
        drop(flusher.stop_tx);
        // A sink callback running on the flusher thread may disable us.
        if flusher.handle.thread().id() == thread::current().id() {
            return;
        }
        if flusher.handle.join().is_err() {
            tracing::error!("Subscription {}: flush timer panicked", self.id);
        }
    }

    /// Time until the oldest pending buffer expires.
    fn next_deadline(&self) -> Option<Duration> {
        let state = self.state.lock();
        if !state.enabled {
            return None;
        }
        let oldest = state
            .pending
            .values()
            .filter(|p| !p.samples.is_empty())
            .map(|p| p.since)
            .min();
        match oldest {
            Some(since) => Some(self.buffer_timeout.saturating_sub(since.elapsed())),
            None if !state.retry.is_empty() => Some(self.buffer_timeout),
            None => None,
        }
    }

    fn flush_expired(&self) {
        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }
        let expired: Vec<u32> = state
            .pending
            .iter()
            .filter(|(_, p)| !p.samples.is_empty() && p.since.elapsed() >= self.buffer_timeout)
            .map(|(source, _)| *source)
            .collect();

        if expired.is_empty() {
            if !state.retry.is_empty() {
                let _ = self.drain_retry(&mut state);
            }
            return;
        }
        for source in expired {
            if let Err(e) = self.flush_source(&mut state, source) {
                tracing::warn!("Subscription {}: timed flush failed: {}", self.id, e);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop_flusher();
    }
}

fn run_flusher(this: Weak<Subscription>, stop_rx: Receiver<()>, wake_rx: Receiver<()>) {
    loop {
        let Some(wait) = this.upgrade().map(|s| s.next_deadline()) else {
            break;
        };
        let timer = match wait {
            Some(wait) => after(wait),
            None => never(),
        };
        select! {
            recv(stop_rx) -> _ => break,
            recv(wake_rx) -> _ => {}
            recv(timer) -> _ => {
                if let Some(subscription) = this.upgrade() {
                    subscription.flush_expired();
                }
            }
        }
    }
}
