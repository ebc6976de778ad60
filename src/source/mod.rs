//! Sampling sources.
//!
//! Two-layer design:
//! - **`Source` trait** — for third-party sources registered at runtime.
//! - **`BuiltinSource` enum** — the built-in `/proc` readers, dispatched by
//!   `match` without dynamic dispatch.
//!
//! `AnySource` wraps either variant so a channel can drive both uniformly.
//!
//! A source never talks to subscribers directly. Each sampling pass gets a
//! [`SampleContext`] and pushes manifests and samples into it; the channel
//! forwards the collected output once the pass returns. A source emits its
//! manifest lazily, on the first successful read, and before any sample that
//! references it.

mod cpu;
mod memory;
mod netdev;
mod proc;
mod sched;
#[cfg(test)]
pub(crate) mod testing;

pub use cpu::CpuSource;
pub use memory::MemorySource;
pub use netdev::NetDevSource;
pub use sched::SchedSource;

use crate::id::SourceId;
use crate::protocol::{Manifest, Sample, SchemaError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Transient failure reading an OS resource.
///
/// Logged and the tick skipped; never forwarded to subscribers.
#[derive(Error, Debug)]
pub enum SourceReadError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed line in {}: {line:?}", .path.display())]
    Parse { path: PathBuf, line: String },

    #[error("Sample does not match manifest: {0}")]
    Schema(#[from] SchemaError),
}

/// The process a channel is observing, handed to sources on attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetInfo {
    pub pid: Option<u32>,
    /// Whether the channel spawned the process (as opposed to attaching).
    pub spawned: bool,
}

/// One item produced by a sampling pass, in emission order.
#[derive(Debug, Clone)]
pub enum Emission {
    Manifest(Arc<Manifest>),
    Sample(Arc<Sample>),
}

/// Output buffer and environment for one sampling pass.
pub struct SampleContext {
    source_id: SourceId,
    now: DateTime<Utc>,
    emitted: Vec<Emission>,
}

impl SampleContext {
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            now: Utc::now(),
            emitted: Vec::new(),
        }
    }

    /// Source id to stamp on manifests built during this pass.
    pub fn source_id(&self) -> u32 {
        self.source_id.0
    }

    /// Wall-clock time at the start of the pass.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Publish a new manifest. Returns the shared handle for building samples.
    pub fn emit_manifest(&mut self, manifest: Manifest) -> Arc<Manifest> {
        let manifest = Arc::new(manifest);
        self.emitted.push(Emission::Manifest(manifest.clone()));
        manifest
    }

    pub fn emit_sample(&mut self, sample: Sample) {
        self.emitted.push(Emission::Sample(Arc::new(sample)));
    }

    pub fn emitted(&self) -> &[Emission] {
        &self.emitted
    }

    pub fn into_emitted(self) -> Vec<Emission> {
        self.emitted
    }
}

/// Trait for pluggable sources.
pub trait Source: Send {
    /// Type identifier, e.g. `"cpu"`.
    fn kind(&self) -> &str;

    /// Called when the channel starts, with the process being observed.
    fn on_attach(&mut self, _target: &TargetInfo) {}

    /// Read once and push any manifest and samples into `ctx`.
    fn sample(&mut self, ctx: &mut SampleContext) -> Result<(), SourceReadError>;

    /// Called when the channel stops or the source is removed.
    fn on_detach(&mut self) {}
}

/// Enum dispatch for built-in sources.
pub enum BuiltinSource {
    Cpu(CpuSource),
    Memory(MemorySource),
    NetDev(NetDevSource),
    Sched(SchedSource),
}

impl BuiltinSource {
    pub fn kind(&self) -> &str {
        match self {
            BuiltinSource::Cpu(s) => s.kind(),
            BuiltinSource::Memory(s) => s.kind(),
            BuiltinSource::NetDev(s) => s.kind(),
            BuiltinSource::Sched(s) => s.kind(),
        }
    }

    pub fn on_attach(&mut self, target: &TargetInfo) {
        match self {
            BuiltinSource::Cpu(s) => s.on_attach(target),
            BuiltinSource::Memory(s) => s.on_attach(target),
            BuiltinSource::NetDev(s) => s.on_attach(target),
            BuiltinSource::Sched(s) => s.on_attach(target),
        }
    }

    pub fn sample(&mut self, ctx: &mut SampleContext) -> Result<(), SourceReadError> {
        match self {
            BuiltinSource::Cpu(s) => s.sample(ctx),
            BuiltinSource::Memory(s) => s.sample(ctx),
            BuiltinSource::NetDev(s) => s.sample(ctx),
            BuiltinSource::Sched(s) => s.sample(ctx),
        }
    }

    pub fn on_detach(&mut self) {
        match self {
            BuiltinSource::Cpu(s) => s.on_detach(),
            BuiltinSource::Memory(s) => s.on_detach(),
            BuiltinSource::NetDev(s) => s.on_detach(),
            BuiltinSource::Sched(s) => s.on_detach(),
        }
    }
}

/// Wrapper that holds either a built-in source or a plugin.
pub enum AnySource {
    Builtin(BuiltinSource),
    Plugin(Box<dyn Source>),
}

impl AnySource {
    pub fn kind(&self) -> &str {
        match self {
            AnySource::Builtin(s) => s.kind(),
            AnySource::Plugin(s) => s.kind(),
        }
    }

    pub fn on_attach(&mut self, target: &TargetInfo) {
        match self {
            AnySource::Builtin(s) => s.on_attach(target),
            AnySource::Plugin(s) => s.on_attach(target),
        }
    }

    pub fn sample(&mut self, ctx: &mut SampleContext) -> Result<(), SourceReadError> {
        match self {
            AnySource::Builtin(s) => s.sample(ctx),
            AnySource::Plugin(s) => s.sample(ctx),
        }
    }

    pub fn on_detach(&mut self) {
        match self {
            AnySource::Builtin(s) => s.on_detach(),
            AnySource::Plugin(s) => s.on_detach(),
        }
    }
}

impl From<BuiltinSource> for AnySource {
    fn from(source: BuiltinSource) -> Self {
        AnySource::Builtin(source)
    }
}

impl From<Box<dyn Source>> for AnySource {
    fn from(source: Box<dyn Source>) -> Self {
        AnySource::Plugin(source)
    }
}

// ── Discovery ──

/// Discovery information for a source type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    /// Source type ids that cannot share a channel with this one.
    pub conflicts: Vec<String>,
}

impl SourceInfo {
    pub fn new(id: &str, name: &str, description: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            version: version.to_string(),
            conflicts: Vec::new(),
        }
    }

    pub fn with_conflicts(mut self, conflicts: &[&str]) -> Self {
        self.conflicts = conflicts.iter().map(|c| c.to_string()).collect();
        self
    }

    /// True if the two source types may not be attached to the same channel.
    pub fn conflicts_with(&self, other: &SourceInfo) -> bool {
        self.conflicts.iter().any(|c| *c == other.id) || other.conflicts.iter().any(|c| *c == self.id)
    }
}

/// Settings shared by every source a registry creates.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Root of the proc filesystem, normally `/proc`.
    pub proc_root: PathBuf,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
        }
    }
}

type SourceFactory = Box<dyn Fn(&SourceSettings) -> AnySource + Send + Sync>;

struct SourceEntry {
    info: SourceInfo,
    factory: SourceFactory,
}

/// Table of known source types, keyed by id.
pub struct SourceRegistry {
    settings: SourceSettings,
    entries: BTreeMap<String, SourceEntry>,
}

impl SourceRegistry {
    /// Registry holding the built-in `/proc` sources.
    pub fn with_builtins(settings: SourceSettings) -> Self {
        let mut registry = Self {
            settings,
            entries: BTreeMap::new(),
        };
        registry.register(
            SourceInfo::new(
                "cpu",
                "CPU Usage sampling",
                "General CPU usage information about the running machine",
                "0.1.1",
            ),
            |s| BuiltinSource::Cpu(CpuSource::new(&s.proc_root)).into(),
        );
        registry.register(
            SourceInfo::new(
                "memory",
                "Memory usage",
                "Memory usage of the target process",
                "0.1.1",
            ),
            |s| BuiltinSource::Memory(MemorySource::new(&s.proc_root)).into(),
        );
        registry.register(
            SourceInfo::new(
                "netdev",
                "Network usage",
                "Per-interface network device counters",
                "0.1.1",
            ),
            |s| BuiltinSource::NetDev(NetDevSource::new(&s.proc_root)).into(),
        );
        registry.register(
            SourceInfo::new(
                "sched",
                "Scheduler statistics",
                "Scheduler statistics of the target process",
                "0.1.0",
            ),
            |s| BuiltinSource::Sched(SchedSource::new(&s.proc_root)).into(),
        );
        registry
    }

    /// Add or replace a source type.
    pub fn register<F>(&mut self, info: SourceInfo, factory: F)
    where
        F: Fn(&SourceSettings) -> AnySource + Send + Sync + 'static,
    {
        self.entries.insert(
            info.id.clone(),
            SourceEntry {
                info,
                factory: Box::new(factory),
            },
        );
    }

    pub fn create(&self, id: &str) -> Option<AnySource> {
        self.entries
            .get(id)
            .map(|entry| (entry.factory)(&self.settings))
    }

    pub fn info(&self, id: &str) -> Option<&SourceInfo> {
        self.entries.get(id).map(|e| &e.info)
    }

    pub fn infos(&self) -> Vec<SourceInfo> {
        self.entries.values().map(|e| e.info.clone()).collect()
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_builtins(SourceSettings::default())
    }
}
