//! Delivery sinks: where a subscription's encoded bytes go.

use crate::protocol::ProtocolError;
use crate::wire::{WireBuffer, WireType};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Subscriber disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Addressable peer receiving encoded manifests and sample batches.
///
/// Implementations must not block longer than `timeout`.
#[cfg_attr(test, mockall::automock)]
pub trait DeliverySink: Send + Sync {
    fn on_manifest(&self, bytes: &[u8], timeout: Duration) -> Result<(), DeliveryError>;

    fn on_sample(&self, bytes: &[u8], timeout: Duration) -> Result<(), DeliveryError>;
}

/// One delivered payload, as seen by an in-process consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Manifest(Vec<u8>),
    Samples(Vec<u8>),
}

impl Delivery {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Delivery::Manifest(b) | Delivery::Samples(b) => b,
        }
    }
}

// ── ChannelSink ──

/// Sink backed by a bounded crossbeam channel.
pub struct ChannelSink {
    tx: Sender<Delivery>,
}

impl ChannelSink {
    /// Create a sink and the receiver its deliveries arrive on.
    pub fn new(capacity: usize) -> (Self, Receiver<Delivery>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }

    fn send(&self, delivery: Delivery, timeout: Duration) -> Result<(), DeliveryError> {
        self.tx.send_timeout(delivery, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(_) => DeliveryError::Timeout(timeout),
            SendTimeoutError::Disconnected(_) => DeliveryError::Disconnected,
        })
    }
}

impl DeliverySink for ChannelSink {
    fn on_manifest(&self, bytes: &[u8], timeout: Duration) -> Result<(), DeliveryError> {
        self.send(Delivery::Manifest(bytes.to_vec()), timeout)
    }

    fn on_sample(&self, bytes: &[u8], timeout: Duration) -> Result<(), DeliveryError> {
        self.send(Delivery::Samples(bytes.to_vec()), timeout)
    }
}

// ── FileSink ──

const FRAME_MANIFEST: u32 = 1;
const FRAME_SAMPLES: u32 = 2;

/// Appends each delivery to a file as a length-delimited frame.
///
/// Frame field 1 carries a manifest, field 2 a sample batch. Use
/// [`read_frames`] to split a recording back into deliveries.
///
/// Writes are synchronous and ignore the delivery timeout. A slow disk
/// stalls the calling subscription for the duration of the write.
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileSink {
    pub fn create(path: &Path) -> Result<Self, DeliveryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&self, field: u32, bytes: &[u8]) -> Result<(), DeliveryError> {
        let mut frame = WireBuffer::with_capacity(bytes.len() + 8);
        frame.write_tag(field, WireType::LengthDelimited);
        frame.write_bytes(bytes);

        let mut writer = self.writer.lock();
        writer.write_all(frame.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

impl DeliverySink for FileSink {
    fn on_manifest(&self, bytes: &[u8], _timeout: Duration) -> Result<(), DeliveryError> {
        self.write_frame(FRAME_MANIFEST, bytes)
    }

    fn on_sample(&self, bytes: &[u8], _timeout: Duration) -> Result<(), DeliveryError> {
        self.write_frame(FRAME_SAMPLES, bytes)
    }
}

/// Split a [`FileSink`] recording into its deliveries. Unknown frames are skipped.
pub fn read_frames(bytes: &[u8]) -> Result<Vec<Delivery>, ProtocolError> {
    let mut buf = WireBuffer::from_bytes(bytes);
    let mut frames = Vec::new();
    while !buf.is_exhausted() {
        let (field, wire_type) = buf.read_tag()?;
        if wire_type != WireType::LengthDelimited {
            buf.skip_field(wire_type)?;
            continue;
        }
        match field {
            FRAME_MANIFEST => frames.push(Delivery::Manifest(buf.read_bytes()?)),
            FRAME_SAMPLES => frames.push(Delivery::Samples(buf.read_bytes()?)),
            _ => buf.skip_field(wire_type)?,
        }
    }
    Ok(frames)
}
