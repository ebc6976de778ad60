//! Source worker threads, the exit watcher, and output routing.

use super::Channel;
use crate::id::SourceId;
use crate::protocol::Manifest;
use crate::source::{AnySource, Emission, SampleContext};
use crate::subscription::Subscription;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to a background thread that runs until told to stop.
pub(super) struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn<F>(name: String, body: F) -> Option<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded(0);
        match thread::Builder::new().name(name.clone()).spawn(move || body(stop_rx)) {
            Ok(handle) => Some(Self { stop_tx, handle }),
            Err(e) => {
                tracing::error!("Failed to start thread {}: {}", name, e);
                None
            }
        }
    }

    /// Signal the thread and wait for it. A thread stopping itself is only
    /// signalled, never joined.
    pub(super) fn stop(self) {
        drop(self.stop_tx);
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            tracing::error!("Worker thread panicked");
        }
    }
}

/// Fans source output out to subscribers and caches the latest manifest
/// of every source.
#[derive(Default)]
pub(super) struct Router {
    active: AtomicBool,
    manifests: Mutex<BTreeMap<u32, Arc<Manifest>>>,
    subscribers: Mutex<Vec<Arc<Subscription>>>,
}

impl Router {
    /// Whether samples are forwarded. Manifests always are.
    pub(super) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub(super) fn forward(&self, emitted: Vec<Emission>) {
        for emission in emitted {
            match emission {
                Emission::Manifest(manifest) => {
                    self.manifests
                        .lock()
                        .insert(manifest.source_id(), manifest.clone());
                    for subscriber in self.subscribers() {
                        subscriber.on_manifest(&manifest);
                    }
                }
                Emission::Sample(sample) => {
                    if !self.active.load(Ordering::SeqCst) {
                        continue;
                    }
                    for subscriber in self.subscribers() {
                        subscriber.on_sample(&sample);
                    }
                }
            }
        }
    }

    /// Re-send every cached manifest to every subscriber.
    pub(super) fn replay(&self) {
        let subscribers = self.subscribers();
        for manifest in self.cached_manifests() {
            for subscriber in &subscribers {
                subscriber.on_manifest(&manifest);
            }
        }
    }

    /// Add a subscriber and hand it every cached manifest. A manifest
    /// replaced by a concurrent `forward` is skipped; the newer one reaches
    /// the subscriber through `forward`.
    pub(super) fn subscribe(&self, subscription: Arc<Subscription>) {
        self.subscribers.lock().push(subscription.clone());
        for manifest in self.cached_manifests() {
            let current = self
                .manifests
                .lock()
                .get(&manifest.source_id())
                .is_some_and(|m| Arc::ptr_eq(m, &manifest));
            if current {
                subscription.on_manifest(&manifest);
            }
        }
    }

    fn cached_manifests(&self) -> Vec<Arc<Manifest>> {
        self.manifests.lock().values().cloned().collect()
    }

    pub(super) fn unsubscribe(&self, id: crate::id::SubscriptionId) -> Option<Arc<Subscription>> {
        let mut subscribers = self.subscribers.lock();
        let pos = subscribers.iter().position(|s| s.id() == id)?;
        Some(subscribers.remove(pos))
    }

    pub(super) fn forget(&self, source: SourceId) {
        self.manifests.lock().remove(&source.0);
    }

    pub(super) fn manifest(&self, source: SourceId) -> Option<Arc<Manifest>> {
        self.manifests.lock().get(&source.0).cloned()
    }

    pub(super) fn subscribers(&self) -> Vec<Arc<Subscription>> {
        self.subscribers.lock().clone()
    }
}

/// Run one sampling pass and forward its output.
pub(super) fn sample_once(id: SourceId, source: &Mutex<AnySource>, router: &Router) {
    let mut ctx = SampleContext::new(id);
    let result = source.lock().sample(&mut ctx);
    if let Err(e) = result {
        tracing::warn!("Source {} skipped a tick: {}", id, e);
    }
    // Forward whatever was emitted before a failure; a manifest the source
    // now considers published must reach subscribers.
    router.forward(ctx.into_emitted());
}

/// Start sampling `source` every `interval`, with the first pass right away.
pub(super) fn spawn_source_worker(
    id: SourceId,
    source: Arc<Mutex<AnySource>>,
    router: Arc<Router>,
    interval: Duration,
) -> Option<Worker> {
    Worker::spawn(format!("source-{}", id.0), move |stop_rx| {
        tracing::debug!("Source {} sampling every {:?}", id, interval);
        sample_once(id, &source, &router);
        let ticker = tick(interval);
        loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => sample_once(id, &source, &router),
            }
        }
    })
}

/// Watch a spawned child and stop the channel when it exits on its own.
pub(super) fn spawn_exit_watcher(channel: Weak<Channel>, child: Arc<Mutex<Child>>) -> Option<Worker> {
    let pid = child.lock().id();
    Worker::spawn(format!("watch-{pid}"), move |stop_rx| {
        let ticker = tick(EXIT_POLL_INTERVAL);
        loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => {
                    let status = match child.lock().try_wait() {
                        Ok(status) => status,
                        Err(e) => {
                            tracing::warn!("Cannot poll target {}: {}", pid, e);
                            None
                        }
                    };
                    let Some(status) = status else {
                        continue;
                    };
                    tracing::info!("Target {} exited ({})", pid, status);
                    if let Some(channel) = channel.upgrade() {
                        channel.target_exited(status);
                    }
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::RawEncoder;
    use crate::id::{ChannelId, SubscriptionId};
    use crate::protocol::ColumnType;
    use crate::subscription::{DeliveryError, DeliverySink, SubscriptionSpec};

    /// Sink that looks the source's manifest up in the router on every
    /// delivery, the way a consumer sharing the channel handle would.
    struct LookupSink {
        router: Arc<Router>,
        seen: Mutex<Vec<Option<u32>>>,
    }

    impl DeliverySink for LookupSink {
        fn on_manifest(&self, _bytes: &[u8], _timeout: Duration) -> Result<(), DeliveryError> {
            let cached = self.router.manifest(SourceId(3)).map(|m| m.source_id());
            self.seen.lock().push(cached);
            Ok(())
        }

        fn on_sample(&self, _bytes: &[u8], _timeout: Duration) -> Result<(), DeliveryError> {
            self.router.manifest(SourceId(3));
            Ok(())
        }
    }

    fn enabled_subscription(id: u32, sink: Arc<LookupSink>) -> Arc<Subscription> {
        let spec = SubscriptionSpec::new(ChannelId(1), sink).buffer(0, Duration::ZERO);
        let subscription = Subscription::new(SubscriptionId(id), spec, Arc::new(RawEncoder));
        subscription.enable().unwrap();
        subscription
    }

    #[test]
    fn test_subscribers_may_read_cache_during_delivery() {
        let router = Arc::new(Router::default());
        router.set_active(true);
        let sink = Arc::new(LookupSink {
            router: router.clone(),
            seen: Mutex::new(Vec::new()),
        });
        router.subscribe(enabled_subscription(1, sink.clone()));

        let manifest = Arc::new(Manifest::builder(3).column("value", ColumnType::Uint).build());
        router.forward(vec![Emission::Manifest(manifest.clone())]);
        router.replay();
        router.subscribe(enabled_subscription(2, sink.clone()));
        assert_eq!(*sink.seen.lock(), vec![Some(3); 3]);

        router.forget(SourceId(3));
        assert!(router.manifest(SourceId(3)).is_none());
        assert_eq!(router.subscribers().len(), 2);
    }
}
