//! Sender × receiver matrices built from per-rank result documents
//!
//! Row `s`, column `r` holds what rank `s` sent to rank `r`. Only the send
//! side of each document is used, so the matrices are complete under both
//! correlation policies.

use crate::error::{ProfilerError, Result};
use crate::report::ProfileReport;
use serde::Serialize;
use std::collections::BTreeMap;

/// Cluster-wide communication matrices
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficMatrix {
    pub n_procs: usize,
    /// Phase the matrices cover, `None` for the whole run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<usize>,
    pub bytes: Vec<Vec<u64>>,
    pub messages: Vec<Vec<u64>>,
    /// Message size → number of sends of that size, over all ranks
    pub message_sizes: BTreeMap<u64, u64>,
}

impl TrafficMatrix {
    /// Combine one document per rank
    ///
    /// # Errors
    ///
    /// `Config` if two documents carry the same rank or `phase` does not
    /// exist in one of them.
    pub fn from_reports(reports: &[ProfileReport], phase: Option<usize>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for report in reports {
            if !seen.insert(report.rank) {
                return Err(ProfilerError::Config(format!(
                    "rank {} appears in more than one result",
                    report.rank
                )));
            }
        }

        let mut per_rank = Vec::with_capacity(reports.len());
        for report in reports {
            let stats = match phase {
                Some(p) => report.phase_statistics(p).ok_or_else(|| {
                    ProfilerError::Config(format!(
                        "rank {} has {} phases, phase {} requested",
                        report.rank, report.n_phases, p
                    ))
                })?,
                None => report.statistics(),
            };
            per_rank.push((report.rank as usize, stats));
        }

        let n_procs = reports
            .iter()
            .map(|r| r.n_procs as usize)
            .chain(per_rank.iter().map(|(rank, s)| (*rank + 1).max(s.n_peers())))
            .max()
            .unwrap_or(0);

        let mut bytes = vec![vec![0u64; n_procs]; n_procs];
        let mut messages = vec![vec![0u64; n_procs]; n_procs];
        let mut message_sizes = BTreeMap::new();

        for (sender, stats) in &per_rank {
            for (receiver, &b) in stats.tx_bytes.iter().enumerate() {
                bytes[*sender][receiver] = b;
            }
            for (receiver, &m) in stats.tx_messages.iter().enumerate() {
                messages[*sender][receiver] = m;
            }
            for (&size, &freq) in &stats.tx_message_sizes {
                *message_sizes.entry(size).or_default() += freq;
            }
        }

        Ok(Self {
            n_procs,
            phase,
            bytes,
            messages,
            message_sizes,
        })
    }

    /// Total bytes sent over all pairs
    pub fn total_bytes(&self) -> u64 {
        self.bytes.iter().flatten().sum()
    }

    /// Total messages sent over all pairs
    pub fn total_messages(&self) -> u64 {
        self.messages.iter().flatten().sum()
    }

    fn push_grid(out: &mut String, title: &str, grid: &[Vec<u64>]) {
        out.push_str(&format!("{} (row = sender, column = receiver)\n", title));
        out.push_str(&format!("{:>6}", ""));
        for col in 0..grid.len() {
            out.push_str(&format!(" {:>10}", col));
        }
        out.push('\n');
        for (row, values) in grid.iter().enumerate() {
            out.push_str(&format!("{:>6}", row));
            for v in values {
                out.push_str(&format!(" {:>10}", v));
            }
            out.push('\n');
        }
    }

    /// Human-readable matrices and histogram
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if let Some(phase) = self.phase {
            out.push_str(&format!("Phase {}\n", phase));
        }
        Self::push_grid(&mut out, "Bytes", &self.bytes);
        out.push('\n');
        Self::push_grid(&mut out, "Messages", &self.messages);
        out.push('\n');

        out.push_str("Message sizes\n");
        out.push_str(&format!("{:>12} {:>10}\n", "size", "count"));
        for (size, freq) in &self.message_sizes {
            out.push_str(&format!("{:>12} {:>10}\n", size, freq));
        }
        out.push_str(&format!(
            "\nTotal: {} bytes in {} messages\n",
            self.total_bytes(),
            self.total_messages()
        ));
        out
    }

    /// One row per communicating pair
    pub fn to_csv(&self) -> String {
        let mut out = String::from("sender,receiver,bytes,messages\n");
        for sender in 0..self.n_procs {
            for receiver in 0..self.n_procs {
                let messages = self.messages[sender][receiver];
                if messages == 0 {
                    continue;
                }
                out.push_str(&format!(
                    "{},{},{},{}\n",
                    sender, receiver, self.bytes[sender][receiver], messages
                ));
            }
        }
        out
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
