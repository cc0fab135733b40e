//! # Telemetry Module
//!
//! Frame trace logging to JSONL files with rotation.
//!
//! This module handles:
//! - Turning transport events into trace records
//! - Formatting as JSONL (JSON Lines)
//! - Writing to rotating log files (max N records per file)
//!
//! Example record:
//!
//! ```text
//! {"timestamp":"2026-01-01T12:00:00.125+00:00","transport":"rf","direction":"tx","kind":"frame","command":5,"sequence":3,"bytes":"01"}
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{Event, EventBus, SubscriptionId};

/// Which way the bytes went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    Tx,
    /// Session-level record with no bytes
    Local,
}

/// What a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Undecoded bytes
    Raw,
    /// Decoded frame; `bytes` holds the payload
    Frame,
    InitComplete,
}

/// One JSONL line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceRecord {
    /// RFC 3339, millisecond precision
    pub timestamp: String,
    pub transport: String,
    pub direction: Direction,
    pub kind: RecordKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u8>,
    /// Lowercase hex
    pub bytes: String,
}

impl TraceRecord {
    /// Build a record for `event`, `None` for events that are not traced
    pub fn from_event(transport: &str, event: &Event<'_>) -> Option<Self> {
        let (direction, kind, command, sequence, bytes) = match event {
            Event::RawReceive(bytes) => (Direction::Rx, RecordKind::Raw, None, None, *bytes),
            Event::RawSend(bytes) => (Direction::Tx, RecordKind::Raw, None, None, *bytes),
            Event::FrameReceived(frame) => (
                Direction::Rx,
                RecordKind::Frame,
                Some(frame.command),
                frame.sequence,
                frame.payload.as_slice(),
            ),
            Event::FrameSent(frame) => (
                Direction::Tx,
                RecordKind::Frame,
                Some(frame.command),
                frame.sequence,
                frame.payload.as_slice(),
            ),
            Event::InitComplete => (Direction::Local, RecordKind::InitComplete, None, None, &[][..]),
            Event::PollTick => return None,
        };

        Some(Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            transport: transport.to_string(),
            direction,
            kind,
            command,
            sequence,
            bytes: hex::encode(bytes),
        })
    }
}

/// JSONL writer that starts a new file every `max_records_per_file` records
pub struct FrameTraceWriter {
    dir: PathBuf,
    max_records_per_file: usize,
    file: Option<BufWriter<File>>,
    records_in_file: usize,
    files_created: usize,
}

impl std::fmt::Debug for FrameTraceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTraceWriter")
            .field("dir", &self.dir)
            .field("records_in_file", &self.records_in_file)
            .field("files_created", &self.files_created)
            .finish_non_exhaustive()
    }
}

impl FrameTraceWriter {
    /// Create the log directory if needed; the first file is opened lazily
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new<P: AsRef<Path>>(dir: P, max_records_per_file: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            file: None,
            records_in_file: 0,
            files_created: 0,
        })
    }

    pub fn files_created(&self) -> usize {
        self.files_created
    }

    /// Append one record, rotating first if the current file is full
    pub fn write(&mut self, record: &TraceRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;

        if self.file.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{}", line)?;
            self.records_in_file += 1;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut old) = self.file.take() {
            old.flush()?;
        }

        self.files_created += 1;
        let name = format!(
            "frames_{}_{:04}.jsonl",
            Utc::now().format("%Y%m%d_%H%M%S"),
            self.files_created
        );
        let path = self.dir.join(name);
        debug!("Opening frame trace file {}", path.display());

        self.file = Some(BufWriter::new(File::create(path)?));
        self.records_in_file = 0;
        Ok(())
    }
}

impl Drop for FrameTraceWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush frame trace: {}", e);
        }
    }
}

/// Record every traced event published on `bus`
///
/// Write failures are logged and the event is skipped.
pub fn attach(
    writer: Arc<Mutex<FrameTraceWriter>>,
    bus: &EventBus,
    transport: impl Into<String>,
    priority: u8,
) -> SubscriptionId {
    let transport = transport.into();

    bus.subscribe(priority, move |event| {
        let Some(record) = TraceRecord::from_event(&transport, event) else {
            return;
        };

        let mut writer = writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writer.write(&record) {
            warn!("Failed to write frame trace: {}", e);
        }
    })
}
