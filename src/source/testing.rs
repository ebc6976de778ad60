//! Plugin source used by unit tests across the crate.

use super::{SampleContext, Source, SourceReadError, TargetInfo};
use crate::protocol::{ColumnType, Manifest, Sample};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Emits a single `ticks` column counting its own sampling passes.
/// Clones share the counters.
#[derive(Default, Clone)]
pub(crate) struct CounterSource {
    manifest: Option<Arc<Manifest>>,
    pub ticks: Arc<AtomicU32>,
    pub attached: Arc<AtomicU32>,
}

impl Source for CounterSource {
    fn kind(&self) -> &str {
        "counter"
    }

    fn on_attach(&mut self, _target: &TargetInfo) {
        self.attached.fetch_add(1, Ordering::SeqCst);
    }

    fn sample(&mut self, ctx: &mut SampleContext) -> Result<(), SourceReadError> {
        let manifest = match &self.manifest {
            Some(m) => m.clone(),
            None => {
                let m = ctx.emit_manifest(
                    Manifest::builder(ctx.source_id())
                        .column("ticks", ColumnType::Uint)
                        .build(),
                );
                self.manifest = Some(m.clone());
                m
            }
        };
        let ticks = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.emit_sample(
            Sample::builder(&manifest)
                .timestamp(ctx.now())
                .set(1, ticks)?
                .build(),
        );
        Ok(())
    }

    fn on_detach(&mut self) {
        self.attached.fetch_sub(1, Ordering::SeqCst);
    }
}
