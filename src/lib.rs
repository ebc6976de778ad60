//! # perfscope: host telemetry agent
//!
//! Samples process and system metrics from `/proc` and streams them to
//! subscribers in a compact, self-describing binary format.
//!
//! ## Architecture
//!
//! - **Channels** observe one target (a spawned program, an existing pid,
//!   or the host) and run every attached source on its own worker thread.
//! - **Sources** read `/proc` and emit a manifest (the column schema) once,
//!   then sparse samples against it.
//! - **Subscriptions** batch encoded samples per source and hand them to a
//!   [`DeliverySink`](subscription::DeliverySink) on a size or time trigger.
//! - **Encoders** turn manifests and sample batches into bytes (`raw`,
//!   `zlib`).
//! - **Communication**: crossbeam channels drive worker timers and shutdown.
//!
//! The [`Pipeline`] value owns all of the above and is the public entry
//! point.
//!
//! ## Configuration
//!
//! The `perfscope-agent` binary reads a TOML [`AgentConfig`]; see
//! [`config`] for the format and default location.
//!
//! ## Example
//!
//! ```no_run
//! use perfscope::{ChannelSpec, FileSink, Pipeline, SubscriptionSpec};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> perfscope::Result<()> {
//!     let mut pipeline = Pipeline::default();
//!     let channel = pipeline.create_channel(ChannelSpec::spawn("sleep").args(["5"]));
//!     pipeline.add_source(channel, "memory")?;
//!     pipeline.add_source_with_interval(channel, "cpu", Duration::from_millis(250))?;
//!
//!     let sink = FileSink::create("/tmp/perfscope.bin".as_ref())?;
//!     let spec = SubscriptionSpec::new(channel, Arc::new(sink))
//!         .buffer(4096, Duration::from_secs(1));
//!     let subscription = pipeline.create_subscription(spec)?;
//!
//!     pipeline.enable_subscription(subscription)?;
//!     pipeline.start_channel(channel)?;
//!     std::thread::sleep(Duration::from_secs(5));
//!     pipeline.shutdown();
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod encoder;
pub mod error;
pub mod id;
pub mod pipeline;
pub mod protocol;
pub mod source;
pub mod subscription;
pub mod wire;

// Re-export commonly used types
pub use channel::{Channel, ChannelError, ChannelSpec, ChannelState, Target};
pub use config::AgentConfig;
pub use encoder::{Encoder, EncoderInfo};
pub use error::{AgentError, Result, ResultExt};
pub use id::{ChannelId, SourceId, SubscriptionId};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use protocol::{ColumnType, Manifest, Sample, Value};
pub use source::{AnySource, Source, SourceInfo};
pub use subscription::{DeliverySink, FileSink, SubscriptionSpec, SubscriptionStatus};
