//! Sequential event log for trace mode
//!
//! In trace mode every operation produces two [`TraceEvent`]s: the begin
//! half when it is posted and the end half when it completes. Both halves
//! carry the peer, length and tag captured at begin plus the runtime's
//! request id, so a trace converter can pair them again. Each rank closes its
//! log with a [`LocalEpoch`] record used to build the global time axis (see
//! [`crate::global_defs`]).

use crate::error::Result;
use crate::inflight::{InFlightOperation, MatchedOperation};
use crate::types::{Direction, Rank};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Which half of which operation an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    BeginSend,
    EndSend,
    BeginRecv,
    EndRecv,
}

impl TraceEventKind {
    pub fn begin(direction: Direction) -> Self {
        match direction {
            Direction::Send => TraceEventKind::BeginSend,
            Direction::Recv => TraceEventKind::BeginRecv,
        }
    }

    pub fn end(direction: Direction) -> Self {
        match direction {
            Direction::Send => TraceEventKind::EndSend,
            Direction::Recv => TraceEventKind::EndRecv,
        }
    }

    pub fn is_begin(self) -> bool {
        matches!(self, TraceEventKind::BeginSend | TraceEventKind::BeginRecv)
    }
}

/// One timestamped half of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: TraceEventKind,
    /// Timestamp (ns)
    pub timestamp: u64,
    /// World rank of the peer, absent for a wildcard receive's begin half
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<Rank>,
    pub tag: i32,
    pub len: u64,
    /// Correlation id shared by both halves
    pub request_id: u64,
}

impl TraceEvent {
    /// Begin half of an operation that was just inserted in the in-flight table
    pub fn begin_of(op: &InFlightOperation) -> Self {
        Self {
            kind: TraceEventKind::begin(op.direction),
            timestamp: op.start_ns,
            peer: op.peer,
            tag: op.tag,
            len: op.len,
            request_id: op.request_id.0,
        }
    }

    /// End half of a matched operation
    pub fn end_of(op: &MatchedOperation) -> Self {
        Self {
            kind: TraceEventKind::end(op.direction),
            timestamp: op.end_ns,
            peer: Some(op.peer),
            tag: op.tag,
            len: op.len,
            request_id: op.request_id.0,
        }
    }
}

/// First and last timestamp of one rank's trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEpoch {
    pub rank: Rank,
    pub n_procs: u32,
    pub start: u64,
    pub end: u64,
}

/// One line of a JSON-lines trace file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum TraceRecord {
    Event(TraceEvent),
    Epoch(LocalEpoch),
}

/// Destination of trace events
pub trait TraceSink {
    /// Append one event
    fn write_event(&mut self, event: &TraceEvent) -> Result<()>;

    /// Close the trace with this rank's epoch
    fn finish(&mut self, epoch: &LocalEpoch) -> Result<()>;
}

/// In-memory sink; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryTraceSink {
    events: Arc<Mutex<Vec<TraceEvent>>>,
    epoch: Arc<Mutex<Option<LocalEpoch>>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events written so far
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Epoch recorded by `finish`, if any
    pub fn epoch(&self) -> Option<LocalEpoch> {
        *self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TraceSink for MemoryTraceSink {
    fn write_event(&mut self, event: &TraceEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }

    fn finish(&mut self, epoch: &LocalEpoch) -> Result<()> {
        *self.epoch.lock().unwrap_or_else(PoisonError::into_inner) = Some(*epoch);
        Ok(())
    }
}

/// Writes one [`TraceRecord`] per line
pub struct JsonLinesTraceSink<W: Write> {
    writer: W,
    events_written: u64,
}

impl JsonLinesTraceSink<BufWriter<File>> {
    /// Create (or truncate) a trace file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonLinesTraceSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            events_written: 0,
        }
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_record(&mut self, record: &TraceRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> TraceSink for JsonLinesTraceSink<W> {
    fn write_event(&mut self, event: &TraceEvent) -> Result<()> {
        self.write_record(&TraceRecord::Event(event.clone()))?;
        self.events_written += 1;
        Ok(())
    }

    fn finish(&mut self, epoch: &LocalEpoch) -> Result<()> {
        self.write_record(&TraceRecord::Epoch(*epoch))?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Parse a JSON-lines trace produced by [`JsonLinesTraceSink`]
pub fn read_trace(path: impl AsRef<Path>) -> Result<Vec<TraceRecord>> {
    let content = std::fs::read_to_string(path.as_ref())?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}
