//! Builds a [`Pipeline`] from an [`AgentConfig`].

use super::Pipeline;
use crate::config::{AgentConfig, SinkConfig, SubscriptionConfig};
use crate::error::{AgentError, Result, ResultExt};
use crate::id::ChannelId;
use crate::source::{AnySource, SourceInfo, SourceSettings};
use crate::subscription::{DeliverySink, FileSink, SubscriptionSpec};
use std::sync::Arc;
use std::time::Duration;

type SourceFactory = Box<dyn Fn(&SourceSettings) -> AnySource + Send + Sync>;

/// Creates the channels, sources and subscriptions a config describes.
/// Nothing is started; call [`Pipeline::start_all`] for that.
pub struct PipelineBuilder {
    config: AgentConfig,
    plugins: Vec<(SourceInfo, SourceFactory)>,
}

impl PipelineBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            plugins: Vec::new(),
        }
    }

    /// Register a plugin source type before the config's sources are created.
    pub fn source_type<F>(mut self, info: SourceInfo, factory: F) -> Self
    where
        F: Fn(&SourceSettings) -> AnySource + Send + Sync + 'static,
    {
        self.plugins.push((info, Box::new(factory)));
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;

        let settings = SourceSettings {
            proc_root: self.config.sampling.proc_root.clone(),
        };
        let mut pipeline = Pipeline::new(settings, self.config.sampling.default_interval());
        for (info, factory) in self.plugins {
            pipeline.register_source_type(info, factory);
        }

        let mut channels = Vec::with_capacity(self.config.channels.len());
        for (index, channel) in self.config.channels.iter().enumerate() {
            let id = pipeline.create_channel(channel.to_spec()?);
            for source in &channel.sources {
                let interval = source
                    .interval_ms
                    .map(|ms| Duration::from_millis(ms.max(1)))
                    .unwrap_or(pipeline.default_interval());
                pipeline
                    .add_source_with_interval(id, &source.kind, interval)
                    .with_context(|| format!("channels[{index}]"))?;
            }
            channels.push(id);
        }

        for (index, subscription) in self.config.subscriptions.iter().enumerate() {
            let spec = subscription_spec(&pipeline, &self.config, subscription, &channels)
                .with_context(|| format!("subscriptions[{index}]"))?;
            pipeline.create_subscription(spec)?;
        }

        tracing::info!(
            "Pipeline built with {} channels and {} subscriptions",
            channels.len(),
            self.config.subscriptions.len()
        );
        Ok(pipeline)
    }
}

fn subscription_spec(
    pipeline: &Pipeline,
    config: &AgentConfig,
    subscription: &SubscriptionConfig,
    channels: &[ChannelId],
) -> Result<SubscriptionSpec> {
    let channel_id = channels[subscription.channel];
    let sink: Arc<dyn DeliverySink> = match &subscription.sink {
        SinkConfig::File { path } => Arc::new(FileSink::create(path)?),
    };

    let mut spec = SubscriptionSpec::new(channel_id, sink)
        .buffer(
            subscription.buffer_size,
            Duration::from_millis(subscription.buffer_timeout_ms),
        )
        .encoder(&subscription.encoder)
        .delivery_timeout(config.delivery.timeout())
        .retry_queue_len(config.delivery.retry_queue_len);

    if let Some(kinds) = &subscription.sources {
        let channel = pipeline.channel(channel_id)?;
        let attached = channel.source_kinds();
        let mut ids = Vec::new();
        for kind in kinds {
            let matching: Vec<_> = attached
                .iter()
                .filter(|(_, k)| k == kind)
                .map(|(id, _)| *id)
                .collect();
            if matching.is_empty() {
                return Err(AgentError::UnknownSourceType(kind.clone()));
            }
            ids.extend(matching);
        }
        spec = spec.sources(ids);
    }
    Ok(spec)
}
