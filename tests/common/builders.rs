//! Test data builders for creating test objects

use perfscope::protocol::{ColumnType, Manifest, Sample};
use perfscope::source::{SampleContext, Source, SourceReadError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Plugin source emitting fixed `uint` columns, all set to the pass number
pub struct StepSource {
    columns: Vec<String>,
    manifest: Option<Arc<Manifest>>,
    passes: Arc<AtomicU32>,
}

impl StepSource {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            manifest: None,
            passes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Shared handle to the pass counter
    pub fn passes(&self) -> Arc<AtomicU32> {
        self.passes.clone()
    }
}

impl Source for StepSource {
    fn kind(&self) -> &str {
        "step"
    }

    fn sample(&mut self, ctx: &mut SampleContext) -> Result<(), SourceReadError> {
        let manifest = match &self.manifest {
            Some(manifest) => manifest.clone(),
            None => {
                let mut builder = Manifest::builder(ctx.source_id());
                for name in &self.columns {
                    builder.push(name.clone(), ColumnType::Uint);
                }
                let manifest = ctx.emit_manifest(builder.build());
                self.manifest = Some(manifest.clone());
                manifest
            }
        };

        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let mut sample = Sample::builder(&manifest).timestamp(ctx.now());
        for index in 1..=manifest.len() as u32 {
            sample.append(index, pass)?;
        }
        ctx.emit_sample(sample.build());
        Ok(())
    }
}

/// The `[bps uint, qps uint]` manifest for source 3
pub fn bps_qps_manifest() -> Manifest {
    use chrono::TimeZone;

    Manifest::builder(3)
        .timestamp(chrono::Utc.timestamp_opt(1, 0).unwrap())
        .column("bps", ColumnType::Uint)
        .column("qps", ColumnType::Uint)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfscope::id::SourceId;

    #[test]
    fn test_step_source() {
        let mut source = StepSource::new(&["a", "b"]);
        let mut ctx = SampleContext::new(SourceId(1));
        source.sample(&mut ctx).unwrap();
        assert_eq!(ctx.emitted().len(), 2);
        assert_eq!(source.passes().load(Ordering::SeqCst), 1);
    }
}
