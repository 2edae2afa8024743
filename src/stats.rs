//! Per-peer traffic statistics
//!
//! The [`Aggregator`] folds matched operations into byte and message
//! counters indexed by the peer's world rank, plus exact message-size
//! histograms for each direction. Statistics are split into phases: the
//! engine can close the current phase and open a new one, and the overall
//! totals are the sum over all phases.

use crate::inflight::MatchedOperation;
use crate::types::{Direction, Rank};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Counters for one phase (or the whole run)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStatistics {
    /// Bytes sent, indexed by peer world rank
    pub tx_bytes: Vec<u64>,
    /// Bytes received, indexed by peer world rank
    pub rx_bytes: Vec<u64>,
    /// Messages sent, indexed by peer world rank
    pub tx_messages: Vec<u64>,
    /// Messages received, indexed by peer world rank
    pub rx_messages: Vec<u64>,
    /// Message size (bytes) → number of sends of that size
    pub tx_message_sizes: BTreeMap<u64, u64>,
    /// Message size (bytes) → number of receives of that size
    pub rx_message_sizes: BTreeMap<u64, u64>,
}

/// Summary totals over all peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficTotals {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_messages: u64,
    pub rx_messages: u64,
}

impl AggregateStatistics {
    /// Empty counters for a world of `n_procs` processes
    pub fn new(n_procs: usize) -> Self {
        Self {
            tx_bytes: vec![0; n_procs],
            rx_bytes: vec![0; n_procs],
            tx_messages: vec![0; n_procs],
            rx_messages: vec![0; n_procs],
            tx_message_sizes: BTreeMap::new(),
            rx_message_sizes: BTreeMap::new(),
        }
    }

    /// Number of peers the per-peer arrays cover
    pub fn n_peers(&self) -> usize {
        self.tx_bytes.len()
    }

    fn ensure_peer(&mut self, peer: Rank) {
        let needed = peer as usize + 1;
        if self.tx_bytes.len() < needed {
            self.tx_bytes.resize(needed, 0);
            self.rx_bytes.resize(needed, 0);
            self.tx_messages.resize(needed, 0);
            self.rx_messages.resize(needed, 0);
        }
    }

    /// Fold one completed operation into the counters
    pub fn record(&mut self, op: &MatchedOperation) {
        self.ensure_peer(op.peer);
        let idx = op.peer as usize;

        match op.direction {
            Direction::Send => {
                self.tx_bytes[idx] = self.tx_bytes[idx].saturating_add(op.len);
                self.tx_messages[idx] += 1;
                *self.tx_message_sizes.entry(op.len).or_default() += 1;
            }
            Direction::Recv => {
                self.rx_bytes[idx] = self.rx_bytes[idx].saturating_add(op.len);
                self.rx_messages[idx] += 1;
                *self.rx_message_sizes.entry(op.len).or_default() += 1;
            }
        }
    }

    /// Add another set of counters into this one
    pub fn merge(&mut self, other: &AggregateStatistics) {
        if other.n_peers() > 0 {
            self.ensure_peer(other.n_peers() as Rank - 1);
        }

        for (i, v) in other.tx_bytes.iter().enumerate() {
            self.tx_bytes[i] = self.tx_bytes[i].saturating_add(*v);
        }
        for (i, v) in other.rx_bytes.iter().enumerate() {
            self.rx_bytes[i] = self.rx_bytes[i].saturating_add(*v);
        }
        for (i, v) in other.tx_messages.iter().enumerate() {
            self.tx_messages[i] += v;
        }
        for (i, v) in other.rx_messages.iter().enumerate() {
            self.rx_messages[i] += v;
        }
        for (size, freq) in &other.tx_message_sizes {
            *self.tx_message_sizes.entry(*size).or_default() += freq;
        }
        for (size, freq) in &other.rx_message_sizes {
            *self.rx_message_sizes.entry(*size).or_default() += freq;
        }
    }

    /// Totals over all peers
    pub fn totals(&self) -> TrafficTotals {
        TrafficTotals {
            tx_bytes: self.tx_bytes.iter().sum(),
            rx_bytes: self.rx_bytes.iter().sum(),
            tx_messages: self.tx_messages.iter().sum(),
            rx_messages: self.rx_messages.iter().sum(),
        }
    }

    /// Write a per-peer table (peers without traffic are skipped)
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let totals = self.totals();
        if totals.tx_messages == 0 && totals.rx_messages == 0 {
            writeln!(out, "No point-to-point traffic recorded.")?;
            return Ok(());
        }

        writeln!(out, "    peer     tx bytes  tx msgs     rx bytes  rx msgs")?;
        writeln!(out, "-------- ------------ -------- ------------ --------")?;

        for peer in 0..self.n_peers() {
            if self.tx_messages[peer] == 0 && self.rx_messages[peer] == 0 {
                continue;
            }
            writeln!(
                out,
                "{:>8} {:>12} {:>8} {:>12} {:>8}",
                peer,
                self.tx_bytes[peer],
                self.tx_messages[peer],
                self.rx_bytes[peer],
                self.rx_messages[peer]
            )?;
        }

        writeln!(out, "-------- ------------ -------- ------------ --------")?;
        writeln!(
            out,
            "{:>8} {:>12} {:>8} {:>12} {:>8}",
            "total", totals.tx_bytes, totals.tx_messages, totals.rx_bytes, totals.rx_messages
        )
    }

    /// Print the per-peer table to stderr
    pub fn print_summary(&self) {
        let stderr = io::stderr();
        let mut lock = stderr.lock();
        if let Err(e) = self.write_summary(&mut lock) {
            tracing::warn!("failed to print summary: {}", e);
        }
    }
}

/// Per-peer arrays grow to at most this many times the world size
pub const PEER_GROWTH_FACTOR: usize = 4;

/// Accumulates matched operations, phase by phase
#[derive(Debug)]
pub struct Aggregator {
    n_procs: usize,
    peer_limit: usize,
    /// Closed phases followed by the current one (never empty)
    phases: Vec<AggregateStatistics>,
}

impl Aggregator {
    /// Create an aggregator for a world of `n_procs` processes
    pub fn new(n_procs: usize) -> Self {
        Self {
            n_procs,
            peer_limit: n_procs.max(1) * PEER_GROWTH_FACTOR,
            phases: vec![AggregateStatistics::new(n_procs)],
        }
    }

    /// Record a completed operation in the current phase
    ///
    /// Returns `false`, leaving the counters untouched, when the peer rank is
    /// too far beyond the world size to be a real process.
    pub fn record(&mut self, op: &MatchedOperation) -> bool {
        if op.peer as usize >= self.peer_limit {
            return false;
        }
        if let Some(current) = self.phases.last_mut() {
            current.record(op);
        }
        true
    }

    /// Close the current phase and start a new one, returning its index
    pub fn begin_phase(&mut self) -> usize {
        self.phases.push(AggregateStatistics::new(self.n_procs));
        self.phases.len() - 1
    }

    /// Number of phases, including the current one
    pub fn n_phases(&self) -> usize {
        self.phases.len()
    }

    /// Totals over every phase
    pub fn snapshot(&self) -> AggregateStatistics {
        let mut total = AggregateStatistics::new(self.n_procs);
        for phase in &self.phases {
            total.merge(phase);
        }
        total
    }

    /// Copies of every phase in order
    pub fn phase_snapshots(&self) -> Vec<AggregateStatistics> {
        self.phases.clone()
    }
}
