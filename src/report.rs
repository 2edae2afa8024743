//! Per-rank result document
//!
//! Written at shutdown as `<result_prefix><rank>.json`. Per-peer arrays are
//! indexed by world rank; message-size histograms are lists of
//! `{message_size, frequency}` sorted by size. `pfprof matrix` reads these
//! files back to build cluster-wide matrices.

use crate::config::{CorrelationPolicy, OutputMode};
use crate::error::Result;
use crate::inflight::InFlightOperation;
use crate::stats::AggregateStatistics;
use crate::types::Rank;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One bucket of a message-size histogram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSizeEntry {
    pub message_size: u64,
    pub frequency: u64,
}

fn size_entries(sizes: &BTreeMap<u64, u64>) -> Vec<MessageSizeEntry> {
    sizes
        .iter()
        .map(|(&message_size, &frequency)| MessageSizeEntry {
            message_size,
            frequency,
        })
        .collect()
}

fn size_map(entries: &[MessageSizeEntry]) -> BTreeMap<u64, u64> {
    let mut map = BTreeMap::new();
    for entry in entries {
        *map.entry(entry.message_size).or_default() += entry.frequency;
    }
    map
}

/// Serialized form of one set of counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficReport {
    pub tx_bytes: Vec<u64>,
    pub rx_bytes: Vec<u64>,
    pub tx_messages: Vec<u64>,
    pub rx_messages: Vec<u64>,
    pub tx_message_sizes: Vec<MessageSizeEntry>,
    pub rx_message_sizes: Vec<MessageSizeEntry>,
}

impl From<&AggregateStatistics> for TrafficReport {
    fn from(stats: &AggregateStatistics) -> Self {
        Self {
            tx_bytes: stats.tx_bytes.clone(),
            rx_bytes: stats.rx_bytes.clone(),
            tx_messages: stats.tx_messages.clone(),
            rx_messages: stats.rx_messages.clone(),
            tx_message_sizes: size_entries(&stats.tx_message_sizes),
            rx_message_sizes: size_entries(&stats.rx_message_sizes),
        }
    }
}

impl TrafficReport {
    /// Convert back into counters
    pub fn to_statistics(&self) -> AggregateStatistics {
        AggregateStatistics {
            tx_bytes: self.tx_bytes.clone(),
            rx_bytes: self.rx_bytes.clone(),
            tx_messages: self.tx_messages.clone(),
            rx_messages: self.rx_messages.clone(),
            tx_message_sizes: size_map(&self.tx_message_sizes),
            rx_message_sizes: size_map(&self.rx_message_sizes),
        }
    }
}

/// Contract violations counted while profiling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyCounters {
    /// Begin for a request id that was still in flight
    pub correlation_conflicts: u64,
    /// End without a matching begin
    pub unmatched_completions: u64,
    /// Duplicate, unknown or untranslatable communicators
    pub registry_violations: u64,
    /// Trace events the sink failed to write
    pub sink_errors: u64,
}

impl AnomalyCounters {
    pub fn total(&self) -> u64 {
        self.correlation_conflicts
            + self.unmatched_completions
            + self.registry_violations
            + self.sink_errors
    }
}

/// Result document of one rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    pub processor_name: String,
    pub rank: Rank,
    pub n_procs: u32,
    pub description: String,
    pub policy: CorrelationPolicy,
    pub output: OutputMode,
    /// Accepted notifications (begin and end halves)
    pub n_events: u64,
    /// Seconds between initialization and shutdown
    pub duration: f64,
    /// Sum over all phases
    #[serde(flatten)]
    pub traffic: TrafficReport,
    pub n_phases: usize,
    pub phases: Vec<TrafficReport>,
    pub anomalies: AnomalyCounters,
    /// Operations still in flight at shutdown
    pub unmatched_operations: Vec<InFlightOperation>,
}

impl ProfileReport {
    /// Counters summed over all phases
    pub fn statistics(&self) -> AggregateStatistics {
        self.traffic.to_statistics()
    }

    /// Counters of one phase
    pub fn phase_statistics(&self, phase: usize) -> Option<AggregateStatistics> {
        self.phases.get(phase).map(TrafficReport::to_statistics)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Write the document to `path`
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Write `<dir>/<prefix><rank>.json`, returning the path
    pub fn write_to_dir(&self, dir: impl AsRef<Path>, prefix: &str) -> Result<PathBuf> {
        let path = dir.as_ref().join(format!("{}{}.json", prefix, self.rank));
        self.write_to(&path)?;
        Ok(path)
    }

    /// Read a document written by [`write_to`](Self::write_to)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }
}
