//! Channels: one observed target plus the sources sampling it.
//!
//! ```text
//!            start             pause
//! Created ─────────▶ Started ◀──────▶ Paused
//!    │                  │    unpause     │
//!    │ stop             │ stop           │ stop
//!    ▼                  ▼                ▼
//! Stopped ◀─────────────┴────────────────┘
//!    │
//!    └──── start (new run) ──▶ Started
//! ```
//!
//! Every source runs on its own worker thread. `stop` and `pause` join
//! those workers before returning, so no tick fires once they return.

mod target;
mod worker;

pub use target::{ChannelSpec, SpawnSpec, Target};

use crate::id::{ChannelId, IdAllocator, SourceId, SubscriptionId};
use crate::protocol::Manifest;
use crate::source::{AnySource, TargetInfo};
use crate::subscription::Subscription;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use worker::{Router, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    Created,
    Started,
    Paused,
    Stopped,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Created => write!(f, "created"),
            ChannelState::Started => write!(f, "started"),
            ChannelState::Paused => write!(f, "paused"),
            ChannelState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No process with pid {pid}")]
    TargetNotFound { pid: u32 },

    #[error("Cannot {op} a {state} channel")]
    InvalidState { op: &'static str, state: ChannelState },

    #[error("Source {0} is not attached to this channel")]
    SourceNotFound(SourceId),

    #[error("Source type {kind} conflicts with attached {existing}")]
    SourceConflict { kind: String, existing: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

struct SourceSlot {
    kind: String,
    interval: Duration,
    source: Arc<Mutex<AnySource>>,
    worker: Option<Worker>,
}

struct Core {
    state: ChannelState,
    target: TargetInfo,
    sources: BTreeMap<SourceId, SourceSlot>,
    child: Option<Arc<Mutex<Child>>>,
    watcher: Option<Worker>,
    exit_status: Option<ExitStatus>,
}

impl Core {
    fn attached(&self) -> bool {
        matches!(self.state, ChannelState::Started | ChannelState::Paused)
    }

    fn take_workers(&mut self) -> Vec<Worker> {
        self.sources
            .values_mut()
            .filter_map(|slot| slot.worker.take())
            .collect()
    }
}

pub struct Channel {
    id: ChannelId,
    spec: ChannelSpec,
    proc_root: PathBuf,
    source_ids: Arc<IdAllocator>,
    core: Mutex<Core>,
    router: Arc<Router>,
    this: Weak<Channel>,
}

impl Channel {
    /// Create a channel in the `Created` state. Source ids come from
    /// `source_ids` so they stay unique across channels.
    pub fn new(id: ChannelId, spec: ChannelSpec, proc_root: &Path, source_ids: Arc<IdAllocator>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id,
            spec,
            proc_root: proc_root.to_path_buf(),
            source_ids,
            core: Mutex::new(Core {
                state: ChannelState::Created,
                target: TargetInfo::default(),
                sources: BTreeMap::new(),
                child: None,
                watcher: None,
                exit_status: None,
            }),
            router: Arc::new(Router::default()),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    pub fn state(&self) -> ChannelState {
        self.core.lock().state
    }

    pub fn target_pid(&self) -> Option<u32> {
        self.core.lock().target.pid
    }

    /// Exit status of a spawned target once it has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.core.lock().exit_status
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.core.lock().sources.keys().copied().collect()
    }

    /// Type ids of the attached sources, by source id.
    pub fn source_kinds(&self) -> Vec<(SourceId, String)> {
        self.core
            .lock()
            .sources
            .iter()
            .map(|(id, slot)| (*id, slot.kind.clone()))
            .collect()
    }

    /// Latest manifest published by a source on this channel.
    pub fn manifest(&self, source: SourceId) -> Option<Arc<Manifest>> {
        self.router.manifest(source)
    }

    /// Attach a source. On a started channel it begins sampling right away;
    /// otherwise it waits for `start` or `unpause`.
    pub fn add_source(&self, source: AnySource, interval: Duration) -> SourceId {
        let id = SourceId(self.source_ids.next());
        let kind = source.kind().to_string();
        let mut slot = SourceSlot {
            kind,
            interval,
            source: Arc::new(Mutex::new(source)),
            worker: None,
        };

        let mut core = self.core.lock();
        if core.attached() {
            slot.source.lock().on_attach(&core.target);
        }
        if core.state == ChannelState::Started {
            slot.worker = worker::spawn_source_worker(id, slot.source.clone(), self.router.clone(), interval);
        }
        tracing::info!("Channel {}: added {} source {} ({:?})", self.id, slot.kind, id, interval);
        core.sources.insert(id, slot);
        id
    }

    pub fn remove_source(&self, id: SourceId) -> Result<(), ChannelError> {
        let (slot, attached) = {
            let mut core = self.core.lock();
            let slot = core.sources.remove(&id).ok_or(ChannelError::SourceNotFound(id))?;
            (slot, core.attached())
        };
        if let Some(worker) = slot.worker {
            worker.stop();
        }
        if attached {
            slot.source.lock().on_detach();
        }
        self.router.forget(id);
        tracing::info!("Channel {}: removed source {}", self.id, id);
        Ok(())
    }

    /// Sample one source outside its timer.
    pub fn sample_now(&self, id: SourceId) -> Result<(), ChannelError> {
        let source = self
            .core
            .lock()
            .sources
            .get(&id)
            .map(|slot| slot.source.clone())
            .ok_or(ChannelError::SourceNotFound(id))?;
        worker::sample_once(id, &source, &self.router);
        Ok(())
    }

    /// Launch or attach to the target and start every source.
    pub fn start(&self) -> Result<(), ChannelError> {
        let mut core = self.core.lock();
        match core.state {
            ChannelState::Created | ChannelState::Stopped => {}
            state => return Err(ChannelError::InvalidState { op: "start", state }),
        }

        let (target, child) = target::launch(&self.spec.target, &self.proc_root)?;
        core.target = target;
        core.exit_status = None;
        core.child = child.map(|c| Arc::new(Mutex::new(c)));
        core.state = ChannelState::Started;
        self.router.set_active(true);

        for (id, slot) in core.sources.iter_mut() {
            slot.source.lock().on_attach(&target);
            slot.worker = worker::spawn_source_worker(*id, slot.source.clone(), self.router.clone(), slot.interval);
        }
        if let Some(child) = core.child.clone() {
            core.watcher = worker::spawn_exit_watcher(self.this.clone(), child);
        }
        tracing::info!("Channel {} started", self.id);
        Ok(())
    }

    /// Suspend sampling. The target keeps running.
    pub fn pause(&self) -> Result<(), ChannelError> {
        let workers = {
            let mut core = self.core.lock();
            if core.state != ChannelState::Started {
                return Err(ChannelError::InvalidState {
                    op: "pause",
                    state: core.state,
                });
            }
            core.state = ChannelState::Paused;
            self.router.set_active(false);
            core.take_workers()
        };
        for worker in workers {
            worker.stop();
        }
        tracing::info!("Channel {} paused", self.id);
        Ok(())
    }

    /// Resume sampling. Subscribers get every cached manifest again first.
    pub fn unpause(&self) -> Result<(), ChannelError> {
        let mut core = self.core.lock();
        if core.state != ChannelState::Paused {
            return Err(ChannelError::InvalidState {
                op: "unpause",
                state: core.state,
            });
        }
        core.state = ChannelState::Started;
        self.router.set_active(true);
        self.router.replay();
        for (id, slot) in core.sources.iter_mut() {
            slot.worker = worker::spawn_source_worker(*id, slot.source.clone(), self.router.clone(), slot.interval);
        }
        tracing::info!("Channel {} unpaused", self.id);
        Ok(())
    }

    /// Stop sampling and detach every source. With `kill_target`, a spawned
    /// target is killed; an attached pid never is. Stopping a stopped
    /// channel does nothing.
    pub fn stop(&self, kill_target: bool) -> Result<(), ChannelError> {
        let (workers, sources, watcher, child) = {
            let mut core = self.core.lock();
            match core.state {
                ChannelState::Stopped => return Ok(()),
                ChannelState::Created => {
                    core.state = ChannelState::Stopped;
                    return Ok(());
                }
                ChannelState::Started | ChannelState::Paused => {}
            }
            core.state = ChannelState::Stopped;
            self.router.set_active(false);
            let workers = core.take_workers();
            let sources: Vec<_> = core.sources.values().map(|s| s.source.clone()).collect();
            (workers, sources, core.watcher.take(), core.child.take())
        };

        for worker in workers {
            worker.stop();
        }
        for source in sources {
            source.lock().on_detach();
        }
        if let Some(watcher) = watcher {
            watcher.stop();
        }
        if let Some(child) = child {
            let status = reap(&mut child.lock(), kill_target)?;
            if status.is_some() {
                self.core.lock().exit_status = status;
            }
        }
        tracing::info!("Channel {} stopped", self.id);
        Ok(())
    }

    /// Route this channel's output to `subscription`. Cached manifests are
    /// delivered to it straight away.
    pub fn subscribe(&self, subscription: Arc<Subscription>) {
        self.router.subscribe(subscription);
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.router.unsubscribe(id)
    }

    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.router.subscribers()
    }

    fn target_exited(&self, status: ExitStatus) {
        self.core.lock().exit_status = Some(status);
        if let Err(e) = self.stop(false) {
            tracing::warn!("Channel {}: stop after target exit failed: {}", self.id, e);
        }
    }
}

/// Collect the child's exit status, killing it first when asked.
fn reap(child: &mut Child, kill: bool) -> Result<Option<ExitStatus>, ChannelError> {
    if let Some(status) = child.try_wait()? {
        return Ok(Some(status));
    }
    if !kill {
        return Ok(None);
    }
    tracing::info!("Killing target {}", child.id());
    child.kill()?;
    Ok(Some(child.wait()?))
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Err(e) = self.stop(self.spec.kill_on_stop) {
            tracing::warn!("Channel {}: stop on drop failed: {}", self.id, e);
        }
    }
}
