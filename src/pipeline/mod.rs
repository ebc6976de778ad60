//! The agent's public API.
//!
//! A [`Pipeline`] owns every channel and subscription and the registries of
//! source and encoder types. It is an ordinary value: embedders create one,
//! drive it through function calls, and call [`Pipeline::shutdown`] when
//! done.
//!
//! # Architecture
//!
//! ```text
//! Pipeline
//!  ├── SourceRegistry   ("cpu", "memory", ... plugins)
//!  ├── EncoderRegistry  ("raw", "zlib", ...)
//!  ├── Channel 1 ── source workers ──┬──► Subscription 1 ──► DeliverySink
//!  │                                 └──► Subscription 2 ──► DeliverySink
//!  └── Channel 2 ── ...
//! ```

mod builder;

pub use builder::PipelineBuilder;

use crate::channel::{Channel, ChannelError, ChannelSpec, ChannelState};
use crate::encoder::{EncoderInfo, EncoderRegistry};
use crate::error::{AgentError, Result};
use crate::id::{ChannelId, IdAllocator, SourceId, SubscriptionId};
use crate::source::{AnySource, SourceInfo, SourceRegistry, SourceSettings};
use crate::subscription::{Subscription, SubscriptionSpec, SubscriptionStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(crate::config::DEFAULT_SAMPLE_INTERVAL_MS);

pub struct Pipeline {
    sources: SourceRegistry,
    encoders: EncoderRegistry,
    channel_ids: IdAllocator,
    subscription_ids: IdAllocator,
    source_ids: Arc<IdAllocator>,
    channels: BTreeMap<ChannelId, Arc<Channel>>,
    subscriptions: BTreeMap<SubscriptionId, Arc<Subscription>>,
    default_interval: Duration,
}

impl Pipeline {
    pub fn new(settings: SourceSettings, default_interval: Duration) -> Self {
        Self {
            sources: SourceRegistry::with_builtins(settings),
            encoders: EncoderRegistry::with_builtins(),
            channel_ids: IdAllocator::new(),
            subscription_ids: IdAllocator::new(),
            source_ids: Arc::new(IdAllocator::new()),
            channels: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            default_interval,
        }
    }

    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    // ==================== Channels ====================

    pub fn create_channel(&mut self, spec: ChannelSpec) -> ChannelId {
        let id = ChannelId(self.channel_ids.next());
        let channel = Channel::new(id, spec, &self.sources.settings().proc_root, self.source_ids.clone());
        tracing::info!("Created channel {} ({:?})", id, channel.spec().target);
        self.channels.insert(id, channel);
        id
    }

    /// Drop a channel that is not running, together with its subscriptions.
    pub fn remove_channel(&mut self, id: ChannelId) -> Result<()> {
        let channel = self.channel(id)?;
        let state = channel.state();
        if matches!(state, ChannelState::Started | ChannelState::Paused) {
            return Err(ChannelError::InvalidState { op: "remove", state }.into());
        }

        let subscriptions: Vec<_> = self
            .subscriptions
            .values()
            .filter(|s| s.channel() == id)
            .map(|s| s.id())
            .collect();
        for subscription in subscriptions {
            self.remove_subscription(subscription)?;
        }
        self.channels.remove(&id);
        tracing::info!("Removed channel {}", id);
        Ok(())
    }

    pub fn channel(&self, id: ChannelId) -> Result<Arc<Channel>> {
        self.channels
            .get(&id)
            .cloned()
            .ok_or(AgentError::UnknownChannel(id))
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.keys().copied().collect()
    }

    pub fn start_channel(&self, id: ChannelId) -> Result<()> {
        Ok(self.channel(id)?.start()?)
    }

    pub fn stop_channel(&self, id: ChannelId, kill_target: bool) -> Result<()> {
        Ok(self.channel(id)?.stop(kill_target)?)
    }

    pub fn pause_channel(&self, id: ChannelId) -> Result<()> {
        Ok(self.channel(id)?.pause()?)
    }

    pub fn unpause_channel(&self, id: ChannelId) -> Result<()> {
        Ok(self.channel(id)?.unpause()?)
    }

    // ==================== Sources ====================

    pub fn add_source(&self, channel: ChannelId, kind: &str) -> Result<SourceId> {
        self.add_source_with_interval(channel, kind, self.default_interval)
    }

    /// Attach a new source of type `kind`. Fails if the type conflicts with
    /// one already on the channel.
    pub fn add_source_with_interval(&self, channel: ChannelId, kind: &str, interval: Duration) -> Result<SourceId> {
        let channel = self.channel(channel)?;
        let info = self
            .sources
            .info(kind)
            .ok_or_else(|| AgentError::UnknownSourceType(kind.to_string()))?;

        for (_, existing) in channel.source_kinds() {
            let conflict = self
                .sources
                .info(&existing)
                .is_some_and(|other| info.conflicts_with(other));
            if conflict {
                return Err(ChannelError::SourceConflict {
                    kind: kind.to_string(),
                    existing,
                }
                .into());
            }
        }

        let source = self
            .sources
            .create(kind)
            .ok_or_else(|| AgentError::UnknownSourceType(kind.to_string()))?;
        Ok(channel.add_source(source, interval))
    }

    pub fn remove_source(&self, channel: ChannelId, source: SourceId) -> Result<()> {
        Ok(self.channel(channel)?.remove_source(source)?)
    }

    pub fn source_types(&self) -> Vec<SourceInfo> {
        self.sources.infos()
    }

    /// Make a plugin source type available to `add_source`.
    pub fn register_source_type<F>(&mut self, info: SourceInfo, factory: F)
    where
        F: Fn(&SourceSettings) -> AnySource + Send + Sync + 'static,
    {
        tracing::info!("Registered source type {} {}", info.id, info.version);
        self.sources.register(info, factory);
    }

    pub fn encoder_types(&self) -> Vec<EncoderInfo> {
        self.encoders.infos()
    }

    // ==================== Subscriptions ====================

    /// Create a disabled subscription on an existing channel. Manifests the
    /// channel already published are handed to it at once.
    pub fn create_subscription(&mut self, spec: SubscriptionSpec) -> Result<SubscriptionId> {
        let channel = self.channel(spec.channel)?;
        let encoder = self
            .encoders
            .create(&spec.encoder)
            .ok_or_else(|| AgentError::UnknownEncoder(spec.encoder.clone()))?;

        let id = SubscriptionId(self.subscription_ids.next());
        let subscription = Subscription::new(id, spec, encoder);
        channel.subscribe(subscription.clone());
        self.subscriptions.insert(id, subscription);
        tracing::info!("Created subscription {} on channel {}", id, channel.id());
        Ok(id)
    }

    pub fn subscription(&self, id: SubscriptionId) -> Result<Arc<Subscription>> {
        self.subscriptions
            .get(&id)
            .cloned()
            .ok_or(AgentError::UnknownSubscription(id))
    }

    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.keys().copied().collect()
    }

    pub fn enable_subscription(&self, id: SubscriptionId) -> Result<()> {
        Ok(self.subscription(id)?.enable()?)
    }

    pub fn disable_subscription(&self, id: SubscriptionId, drain: bool) -> Result<()> {
        Ok(self.subscription(id)?.disable(drain)?)
    }

    /// Detach and drop a subscription. Pending samples are flushed first;
    /// a failed final flush is logged, the subscription is removed anyway.
    pub fn remove_subscription(&mut self, id: SubscriptionId) -> Result<()> {
        let subscription = self
            .subscriptions
            .remove(&id)
            .ok_or(AgentError::UnknownSubscription(id))?;
        if let Some(channel) = self.channels.get(&subscription.channel()) {
            channel.unsubscribe(id);
        }
        if let Err(e) = subscription.disable(true) {
            tracing::warn!("Subscription {}: final flush failed: {}", id, e);
        }
        tracing::info!("Removed subscription {}", id);
        Ok(())
    }

    pub fn subscription_status(&self, id: SubscriptionId) -> Result<SubscriptionStatus> {
        Ok(self.subscription(id)?.status())
    }

    // ==================== Whole pipeline ====================

    /// Enable every subscription, then start every channel that has not run
    /// yet.
    pub fn start_all(&self) -> Result<()> {
        for subscription in self.subscriptions.values() {
            subscription.enable()?;
        }
        for channel in self.channels.values() {
            if channel.state() == ChannelState::Created {
                channel.start()?;
            }
        }
        Ok(())
    }

    /// Stop every channel, killing spawned targets that asked for it, then
    /// drain and disable every subscription. Errors are logged, not returned.
    pub fn shutdown(&mut self) {
        tracing::info!("Shutting down pipeline");
        for channel in self.channels.values() {
            if let Err(e) = channel.stop(channel.spec().kill_on_stop) {
                tracing::warn!("Channel {}: stop failed: {}", channel.id(), e);
            }
        }
        for subscription in self.subscriptions.values() {
            if let Err(e) = subscription.disable(true) {
                tracing::warn!("Subscription {}: final flush failed: {}", subscription.id(), e);
            }
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(SourceSettings::default(), DEFAULT_SAMPLE_INTERVAL)
    }
}
