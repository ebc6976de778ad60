//! Network device counters from `/proc/net/dev`.

use super::proc::{parse_fields, read_optional};
use super::{SampleContext, Source, SourceReadError};
use crate::protocol::{ColumnType, Manifest, Sample};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const COUNTER_COLUMNS: [&str; 16] = [
    "rxBytes",
    "rxPackets",
    "rxErrors",
    "rxDropped",
    "rxFifo",
    "rxFrame",
    "rxCompressed",
    "rxMulticast",
    "txBytes",
    "txPackets",
    "txErrors",
    "txDropped",
    "txFifo",
    "txCollisions",
    "txCarrier",
    "txCompressed",
];

/// Emits one sample per interface each tick.
pub struct NetDevSource {
    path: PathBuf,
    manifest: Option<Arc<Manifest>>,
}

impl NetDevSource {
    pub fn new(proc_root: &Path) -> Self {
        Self {
            path: proc_root.join("net").join("dev"),
            manifest: None,
        }
    }

    fn manifest(&mut self, ctx: &mut SampleContext) -> Arc<Manifest> {
        if let Some(manifest) = &self.manifest {
            return manifest.clone();
        }
        let mut builder = Manifest::builder(ctx.source_id());
        builder.push("InterfaceName", ColumnType::String);
        for name in COUNTER_COLUMNS {
            builder.push(name, ColumnType::Uint64);
        }
        let manifest = ctx.emit_manifest(builder.build());
        self.manifest = Some(manifest.clone());
        manifest
    }
}

/// Split `"  eth0: 1 2 ..."` into the interface name and its 16 counters.
///
/// Header lines carry no colon and yield `None`.
fn parse_device_line(line: &str) -> Option<(&str, [u64; 16])> {
    let (name, counters) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, parse_fields(counters)?))
}

impl Source for NetDevSource {
    fn kind(&self) -> &str {
        "netdev"
    }

    fn sample(&mut self, ctx: &mut SampleContext) -> Result<(), SourceReadError> {
        let Some(content) = read_optional(&self.path)? else {
            return Ok(());
        };

        let manifest = self.manifest(ctx);
        for line in content.lines() {
            let Some((name, counters)) = parse_device_line(line) else {
                if line.contains(':') {
                    tracing::debug!("Skipping malformed net device line: {:?}", line);
                }
                continue;
            };
            let mut sample = Sample::builder(&manifest).timestamp(ctx.now());
            sample.append(1, name)?;
            for (i, value) in counters.into_iter().enumerate() {
                sample.append(i as u32 + 2, value)?;
            }
            ctx.emit_sample(sample.build());
        }
        Ok(())
    }

    fn on_detach(&mut self) {
        self.manifest = None;
    }
}
