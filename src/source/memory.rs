//! Target process memory from `/proc/<pid>/statm`.

use super::proc::{parse_fields, read_optional};
use super::{SampleContext, Source, SourceReadError, TargetInfo};
use crate::protocol::{ColumnType, Manifest, Sample};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Emits one sample per tick with the target's page counts.
///
/// Needs a target pid; without one the source stays silent.
pub struct MemorySource {
    proc_root: PathBuf,
    pid: Option<u32>,
    manifest: Option<Arc<Manifest>>,
}

impl MemorySource {
    pub fn new(proc_root: &Path) -> Self {
        Self {
            proc_root: proc_root.to_path_buf(),
            pid: None,
            manifest: None,
        }
    }

    fn manifest(&mut self, ctx: &mut SampleContext) -> Arc<Manifest> {
        if let Some(manifest) = &self.manifest {
            return manifest.clone();
        }
        let manifest = ctx.emit_manifest(
            Manifest::builder(ctx.source_id())
                .column("size", ColumnType::Uint)
                .column("resident", ColumnType::Uint)
                .column("share", ColumnType::Uint)
                .column("text", ColumnType::Uint)
                .column("data", ColumnType::Uint)
                .build(),
        );
        self.manifest = Some(manifest.clone());
        manifest
    }
}

impl Source for MemorySource {
    fn kind(&self) -> &str {
        "memory"
    }

    fn on_attach(&mut self, target: &TargetInfo) {
        self.pid = target.pid;
        if self.pid.is_none() {
            tracing::debug!("Memory source attached without a target pid; no samples will be produced");
        }
    }

    fn sample(&mut self, ctx: &mut SampleContext) -> Result<(), SourceReadError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let path = self.proc_root.join(pid.to_string()).join("statm");
        let Some(content) = read_optional(&path)? else {
            return Ok(());
        };

        // size resident shared text lib data dt
        let Some(fields) = parse_fields::<u32, 6>(&content) else {
            return Err(SourceReadError::Parse {
                path,
                line: content.trim().to_string(),
            });
        };

        let manifest = self.manifest(ctx);
        let sample = Sample::builder(&manifest)
            .timestamp(ctx.now())
            .set(1, fields[0])?
            .set(2, fields[1])?
            .set(3, fields[2])?
            .set(4, fields[3])?
            .set(5, fields[5])?
            .build();
        ctx.emit_sample(sample);
        Ok(())
    }

    fn on_detach(&mut self) {
        self.pid = None;
        self.manifest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SourceId;
    use crate::protocol::Value;
    use crate::source::Emission;

    fn proc_with_statm(pid: u32, content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let pid_dir = dir.path().join(pid.to_string());
        std::fs::create_dir(&pid_dir).unwrap();
        std::fs::write(pid_dir.join("statm"), content).unwrap();
        dir
    }

    #[test]
    fn test_reads_statm_columns() {
        let dir = proc_with_statm(42, "2048 512 128 64 0 900 0\n");
        let mut source = MemorySource::new(dir.path());
        source.on_attach(&TargetInfo {
            pid: Some(42),
            spawned: true,
        });

        let mut ctx = SampleContext::new(SourceId(2));
        source.sample(&mut ctx).unwrap();
        let emitted = ctx.into_emitted();
        assert_eq!(emitted.len(), 2);
        let Emission::Sample(sample) = &emitted[1] else {
            panic!("expected sample");
        };
        assert_eq!(sample.get(1), Some(&Value::Uint(2048)));
        assert_eq!(sample.get(4), Some(&Value::Uint(64)));
        assert_eq!(sample.get(5), Some(&Value::Uint(900)));
    }

    #[test]
    fn test_no_pid_no_samples() {
        let dir = proc_with_statm(42, "1 2 3 4 5 6 7");
        let mut source = MemorySource::new(dir.path());
        source.on_attach(&TargetInfo::default());
        let mut ctx = SampleContext::new(SourceId(2));
        source.sample(&mut ctx).unwrap();
        assert!(ctx.emitted().is_empty());
    }

    #[test]
    fn test_malformed_statm_is_parse_error_without_manifest() {
        let dir = proc_with_statm(7, "garbage\n");
        let mut source = MemorySource::new(dir.path());
        source.on_attach(&TargetInfo {
            pid: Some(7),
            spawned: false,
        });
        let mut ctx = SampleContext::new(SourceId(2));
        assert!(matches!(
            source.sample(&mut ctx),
            Err(SourceReadError::Parse { .. })
        ));
        assert!(ctx.emitted().is_empty());
    }

    #[test]
    fn test_exited_process_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MemorySource::new(dir.path());
        source.on_attach(&TargetInfo {
            pid: Some(999),
            spawned: true,
        });
        let mut ctx = SampleContext::new(SourceId(2));
        source.sample(&mut ctx).unwrap();
        assert!(ctx.emitted().is_empty());
    }
}
