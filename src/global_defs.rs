//! Global definitions for a set of per-rank traces
//!
//! Each rank's trace ends with its local epoch. Combining them gives the
//! common time axis of the whole run: the global offset is the earliest
//! start over all ranks and the trace length spans to the latest end.
//! Alongside the clock, one location is defined per rank and one
//! communicator covering every rank.

use crate::error::{ProfilerError, Result};
use crate::trace::{read_trace, LocalEpoch, TraceRecord};
use crate::types::Rank;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Timer ticks per second (timestamps are nanoseconds)
pub const TIMER_RESOLUTION: u64 = 1_000_000_000;

/// Properties of the common time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockProperties {
    pub timer_resolution: u64,
    pub global_offset: u64,
    pub trace_length: u64,
}

impl ClockProperties {
    /// Combine the local epochs of every rank
    ///
    /// Returns `None` when `epochs` is empty.
    pub fn from_epochs(epochs: &[LocalEpoch]) -> Option<Self> {
        let start = epochs.iter().map(|e| e.start).min()?;
        let end = epochs.iter().map(|e| e.end).max()?;

        Some(Self {
            timer_resolution: TIMER_RESOLUTION,
            global_offset: start,
            trace_length: end.saturating_sub(start) + 1,
        })
    }
}

/// A process as seen by a trace reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub rank: Rank,
    pub name: String,
}

/// A communicator as seen by a trace reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicatorDefinition {
    pub name: String,
    pub members: Vec<Rank>,
}

/// Definitions shared by every rank's trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalDefinitions {
    pub clock: ClockProperties,
    pub locations: Vec<Location>,
    pub communicators: Vec<CommunicatorDefinition>,
}

impl GlobalDefinitions {
    /// Build definitions from one epoch per rank
    ///
    /// # Errors
    ///
    /// `Config` if no epoch is given, two epochs claim the same rank, or the
    /// ranks disagree about the world size.
    pub fn from_epochs(epochs: &[LocalEpoch]) -> Result<Self> {
        let clock = ClockProperties::from_epochs(epochs)
            .ok_or_else(|| ProfilerError::Config("no trace epochs to combine".to_string()))?;

        let n_procs = epochs[0].n_procs;
        if let Some(other) = epochs.iter().find(|e| e.n_procs != n_procs) {
            return Err(ProfilerError::Config(format!(
                "rank {} reports {} processes, rank {} reports {}",
                epochs[0].rank, n_procs, other.rank, other.n_procs
            )));
        }

        let mut ranks: Vec<Rank> = epochs.iter().map(|e| e.rank).collect();
        ranks.sort_unstable();
        if let Some(pair) = ranks.windows(2).find(|w| w[0] == w[1]) {
            return Err(ProfilerError::Config(format!(
                "duplicate epoch for rank {}",
                pair[0]
            )));
        }

        let locations = (0..n_procs)
            .map(|rank| Location {
                rank,
                name: format!("MPI Rank {}", rank),
            })
            .collect();

        Ok(Self {
            clock,
            locations,
            communicators: vec![CommunicatorDefinition {
                name: "MPI_COMM_WORLD".to_string(),
                members: (0..n_procs).collect(),
            }],
        })
    }

    /// Read the epoch record of every trace file and build the definitions
    pub fn from_trace_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut epochs = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let epoch = read_trace(path)?
                .into_iter()
                .rev()
                .find_map(|record| match record {
                    TraceRecord::Epoch(epoch) => Some(epoch),
                    TraceRecord::Event(_) => None,
                })
                .ok_or_else(|| {
                    ProfilerError::Config(format!("{} has no epoch record", path.display()))
                })?;
            epochs.push(epoch);
        }
        Self::from_epochs(&epochs)
    }
}
