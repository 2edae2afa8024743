//! CLI argument parsing for pfprof

use crate::config::{CorrelationPolicy, OutputMode};
use crate::simulated::TrafficPattern;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for communication matrices
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// CSV format for spreadsheet analysis
    Csv,
}

#[derive(Parser, Debug)]
#[command(name = "pfprof")]
#[command(version)]
#[command(about = "Point-to-point communication profiler for message-passing programs", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Profile a simulated run of a traffic pattern
    Simulate(SimulateArgs),
    /// Combine per-rank results into sender x receiver matrices
    Matrix(MatrixArgs),
    /// Compute global clock properties and definitions from per-rank traces
    Defs(DefsArgs),
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of simulated ranks
    #[arg(short = 'n', long = "procs", value_name = "N", default_value = "4")]
    pub procs: u32,

    /// Traffic pattern of every round
    #[arg(long = "pattern", value_enum, default_value = "ring")]
    pub pattern: TrafficPattern,

    /// Number of rounds
    #[arg(long = "rounds", default_value = "1")]
    pub rounds: u32,

    /// Message size in bytes
    #[arg(long = "size", value_name = "BYTES", default_value = "1024")]
    pub message_size: u64,

    /// Message tag
    #[arg(long = "tag", default_value = "0")]
    pub tag: i32,

    /// Correlation policy (overrides configuration)
    #[arg(long = "policy", value_enum)]
    pub policy: Option<CorrelationPolicy>,

    /// Consumer of matched operations (overrides configuration)
    #[arg(long = "output", value_enum)]
    pub output: Option<OutputMode>,

    /// Directory for per-rank result or trace files
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// TOML configuration file (defaults to PFPROF_CONFIG and PFPROF_* variables)
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Post receives with a wildcard source
    #[arg(long = "wildcard")]
    pub wildcard: bool,

    /// Start a new statistics phase for every round
    #[arg(long = "phase-per-round")]
    pub phase_per_round: bool,

    /// Print each rank's per-peer table to stderr
    #[arg(short = 'c', long = "summary")]
    pub summary: bool,
}

#[derive(Args, Debug)]
pub struct MatrixArgs {
    /// Per-rank result files
    #[arg(required = true, value_name = "RESULT")]
    pub results: Vec<PathBuf>,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Only use this phase
    #[arg(long = "phase", value_name = "INDEX")]
    pub phase: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DefsArgs {
    /// Per-rank trace files
    #[arg(required = true, value_name = "TRACE")]
    pub traces: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_defaults() {
        let cli = Cli::parse_from(["pfprof", "simulate"]);
        match cli.command {
            Command::Simulate(args) => {
                assert_eq!(args.procs, 4);
                assert_eq!(args.pattern, TrafficPattern::Ring);
                assert_eq!(args.message_size, 1024);
                assert!(args.policy.is_none());
                assert!(!cli.debug);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_simulate_flags() {
        let cli = Cli::parse_from([
            "pfprof",
            "--debug",
            "simulate",
            "-n",
            "8",
            "--pattern",
            "all-to-all",
            "--policy",
            "sends-only",
            "--output",
            "trace",
            "-o",
            "/tmp/x",
        ]);
        assert!(cli.debug);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.procs, 8);
        assert_eq!(args.pattern, TrafficPattern::AllToAll);
        assert_eq!(args.policy, Some(CorrelationPolicy::SendsOnly));
        assert_eq!(args.output, Some(OutputMode::Trace));
        assert_eq!(args.output_dir, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn test_matrix_requires_files() {
        assert!(Cli::try_parse_from(["pfprof", "matrix"]).is_err());
        let cli = Cli::try_parse_from(["pfprof", "matrix", "a.json", "--format", "csv"]).unwrap();
        let Command::Matrix(args) = cli.command else {
            panic!("expected matrix");
        };
        assert_eq!(args.results.len(), 1);
        assert!(matches!(args.format, OutputFormat::Csv));
    }
}
