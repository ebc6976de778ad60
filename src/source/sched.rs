//! Scheduler statistics from `/proc/<pid>/sched`.
//!
//! The file is a list of `key : value` lines:
//!
//! ```text
//! se.exec_start                      :     613312708.681735
//! se.nr_migrations                   :                  409
//! ```
//!
//! Values with a decimal point become `double` columns, the rest `int64`.
//! The column set is derived from the file itself, so a kernel that adds or
//! drops a field produces a fresh manifest rather than a mismatched sample.

use super::proc::read_optional;
use super::{SampleContext, Source, SourceReadError, TargetInfo};
use crate::protocol::{ColumnType, Manifest, Sample, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct SchedSource {
    proc_root: PathBuf,
    pid: Option<u32>,
    manifest: Option<Arc<Manifest>>,
}

impl SchedSource {
    pub fn new(proc_root: &Path) -> Self {
        Self {
            proc_root: proc_root.to_path_buf(),
            pid: None,
            manifest: None,
        }
    }

    /// Current manifest, replaced when the parsed entries no longer match it.
    fn manifest_for(&mut self, ctx: &mut SampleContext, entries: &[(&str, Value)]) -> Arc<Manifest> {
        if let Some(manifest) = &self.manifest {
            let matches = manifest.len() == entries.len()
                && manifest
                    .columns()
                    .iter()
                    .zip(entries)
                    .all(|(c, (name, v))| c.name == *name && c.column_type == v.column_type());
            if matches {
                return manifest.clone();
            }
            tracing::debug!("Scheduler fields changed; publishing a new manifest");
        }

        let mut builder = Manifest::builder(ctx.source_id());
        for (name, value) in entries {
            builder.push(*name, value.column_type());
        }
        let manifest = ctx.emit_manifest(builder.build());
        self.manifest = Some(manifest.clone());
        manifest
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '>')
}

/// Parse one `key : value` line. Anything else (headers, separators) is `None`.
fn parse_entry(line: &str) -> Option<(&str, Value)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() || !key.chars().all(is_key_char) {
        return None;
    }
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let value = if value.contains('.') {
        Value::Double(value.parse().ok()?)
    } else {
        Value::Int64(value.parse().ok()?)
    };
    Some((key, value))
}

impl Source for SchedSource {
    fn kind(&self) -> &str {
        "sched"
    }

    fn on_attach(&mut self, target: &TargetInfo) {
        self.pid = target.pid;
    }

    fn sample(&mut self, ctx: &mut SampleContext) -> Result<(), SourceReadError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let path = self.proc_root.join(pid.to_string()).join("sched");
        let Some(content) = read_optional(&path)? else {
            return Ok(());
        };

        let entries: Vec<_> = content.lines().filter_map(parse_entry).collect();
        if entries.is_empty() {
            tracing::warn!("No scheduler entries in {}", path.display());
            return Ok(());
        }

        let manifest = self.manifest_for(ctx, &entries);
        let mut sample = Sample::builder(&manifest).timestamp(ctx.now());
        for (i, (_, value)) in entries.into_iter().enumerate() {
            sample.append(i as u32 + 1, value)?;
        }
        ctx.emit_sample(sample.build());
        Ok(())
    }

    fn on_detach(&mut self) {
        self.pid = None;
        self.manifest = None;
    }
}
