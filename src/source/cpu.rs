//! Per-CPU time counters from `/proc/stat`.

use super::proc::{parse_fields, read_optional};
use super::{SampleContext, Source, SourceReadError};
use crate::protocol::{ColumnType, Manifest, Sample};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const COUNTER_COLUMNS: [&str; 9] = [
    "User",
    "Nice",
    "System",
    "Idle",
    "I/O Wait",
    "IRQ",
    "Soft IRQ",
    "VM Stolen",
    "VM Guest",
];

/// Emits one sample per `cpuN` line of `/proc/stat` each tick.
///
/// The aggregate `cpu` line is skipped.
pub struct CpuSource {
    path: PathBuf,
    manifest: Option<Arc<Manifest>>,
}

impl CpuSource {
    pub fn new(proc_root: &Path) -> Self {
        Self {
            path: proc_root.join("stat"),
            manifest: None,
        }
    }

    fn manifest(&mut self, ctx: &mut SampleContext) -> Arc<Manifest> {
        if let Some(manifest) = &self.manifest {
            return manifest.clone();
        }
        let mut builder = Manifest::builder(ctx.source_id());
        builder.push("CPU Number", ColumnType::Int);
        for name in COUNTER_COLUMNS {
            builder.push(name, ColumnType::Int64);
        }
        let manifest = ctx.emit_manifest(builder.build());
        self.manifest = Some(manifest.clone());
        manifest
    }
}

/// Parse a `cpuN` line into the CPU number and its first nine counters.
fn parse_cpu_line(line: &str) -> Option<(i32, [i64; 9])> {
    let rest = line.strip_prefix("cpu")?;
    let (number, counters) = rest.split_once(char::is_whitespace)?;
    let number = number.parse().ok()?;
    Some((number, parse_fields(counters)?))
}

impl Source for CpuSource {
    fn kind(&self) -> &str {
        "cpu"
    }

    fn sample(&mut self, ctx: &mut SampleContext) -> Result<(), SourceReadError> {
        let Some(content) = read_optional(&self.path)? else {
            return Ok(());
        };

        let manifest = self.manifest(ctx);
        for line in content.lines() {
            let Some((number, counters)) = parse_cpu_line(line) else {
                continue;
            };
            let mut sample = Sample::builder(&manifest).timestamp(ctx.now());
            sample.append(1, number)?;
            for (i, value) in counters.into_iter().enumerate() {
                sample.append(i as u32 + 2, value)?;
            }
            ctx.emit_sample(sample.build());
        }
        Ok(())
    }

    fn on_detach(&mut self) {
        // A fresh run starts with a fresh manifest.
        self.manifest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SourceId;
    use crate::protocol::Value;
    use crate::source::Emission;

    const STAT: &str = "\
cpu  4705 356 584 3699 23 23 0 0 0 0
cpu0 1393280 32966 572056 13343292 6130 0 17875 0 23933 0
cpu1 1335 33 229 1810 4 11 0 0 0 0
intr 114930548 113199788 3 0 5 263 0 4 [... lots more numbers ...]
ctxt 1990473
btime 1062191376
";

    fn run(source: &mut CpuSource) -> Vec<Emission> {
        let mut ctx = SampleContext::new(SourceId(1));
        source.sample(&mut ctx).unwrap();
        ctx.into_emitted()
    }

    #[test]
    fn test_parse_cpu_line() {
        let (n, counters) = parse_cpu_line("cpu1 1335 33 229 1810 4 11 0 0 0 0").unwrap();
        assert_eq!(n, 1);
        assert_eq!(counters, [1335, 33, 229, 1810, 4, 11, 0, 0, 0]);
        assert!(parse_cpu_line("cpu  4705 356 584 3699 23 23 0 0 0 0").is_none());
        assert!(parse_cpu_line("cpu2 1 2 3").is_none());
        assert!(parse_cpu_line("ctxt 1990473").is_none());
    }

    #[test]
    fn test_one_sample_per_cpu() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stat"), STAT).unwrap();
        let mut source = CpuSource::new(dir.path());

        let emitted = run(&mut source);
        assert_eq!(emitted.len(), 3);
        let Emission::Manifest(manifest) = &emitted[0] else {
            panic!("manifest must come first");
        };
        assert_eq!(manifest.len(), 10);
        assert_eq!(manifest.column(1).unwrap().name, "CPU Number");
        assert_eq!(manifest.column(6).unwrap().name, "I/O Wait");

        let Emission::Sample(cpu0) = &emitted[1] else {
            panic!("expected sample");
        };
        assert_eq!(cpu0.get(1), Some(&Value::Int(0)));
        assert_eq!(cpu0.get(2), Some(&Value::Int64(1_393_280)));
        assert_eq!(cpu0.get(10), Some(&Value::Int64(23_933)));
        assert!(cpu0.validate(manifest).is_ok());

        // manifest is not repeated
        let emitted = run(&mut source);
        assert_eq!(emitted.len(), 2);
        assert!(emitted.iter().all(|e| matches!(e, Emission::Sample(_))));
    }

    #[test]
    fn test_missing_stat_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = CpuSource::new(dir.path());
        assert!(run(&mut source).is_empty());
    }
}
