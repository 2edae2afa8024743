use anyhow::{Context, Result};
use clap::Parser;
use pfprof::cli::{Cli, Command, DefsArgs, MatrixArgs, OutputFormat, SimulateArgs};
use pfprof::global_defs::GlobalDefinitions;
use pfprof::matrix::TrafficMatrix;
use pfprof::report::ProfileReport;
use pfprof::simulated::SimulatedCluster;
use pfprof::{OutputMode, ProfilerConfig};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Base configuration plus command-line overrides
fn simulate_config(args: &SimulateArgs) -> Result<ProfilerConfig> {
    let mut config = match &args.config {
        Some(path) => ProfilerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => ProfilerConfig::from_env().context("Invalid PFPROF_* environment")?,
    };

    if let Some(policy) = args.policy {
        config.policy = policy;
    }
    if let Some(output) = args.output {
        config.output = output;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = Some(dir.clone());
    }

    if config.output == OutputMode::Trace && config.output_dir.is_none() {
        anyhow::bail!("Trace output requires --output-dir");
    }
    if let Some(dir) = &config.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }
    Ok(config)
}

fn run_simulate(args: &SimulateArgs) -> Result<()> {
    if args.procs == 0 {
        anyhow::bail!("Need at least one rank");
    }
    let config = simulate_config(args)?;
    let output = config.output;
    let output_dir = config.output_dir.clone();

    let mut cluster =
        SimulatedCluster::new(args.procs, config).with_wildcard_receives(args.wildcard);
    cluster
        .initialize()
        .context("Failed to initialize profiler")?;

    for round in 0..args.rounds {
        if round > 0 && args.phase_per_round {
            cluster.mark_phase();
        }
        cluster.run_round(args.pattern, args.message_size, args.tag);
    }

    let reports = cluster.shutdown().context("Failed to shut down profiler")?;

    for shutdown in &reports {
        let report = &shutdown.report;
        let totals = report.statistics().totals();
        println!(
            "rank {}: sent {} bytes in {} messages, received {} bytes in {} messages, {} events",
            report.rank,
            totals.tx_bytes,
            totals.tx_messages,
            totals.rx_bytes,
            totals.rx_messages,
            report.n_events
        );
        if args.summary {
            eprintln!("--- rank {} ---", report.rank);
            report.statistics().print_summary();
        }
        if let Some(path) = &shutdown.result_path {
            println!("wrote {}", path.display());
        }
    }

    let failed: Vec<&str> = reports
        .iter()
        .filter_map(|r| r.result_error.as_deref())
        .collect();
    for error in &failed {
        eprintln!("error: cannot write result {}", error);
    }

    if cluster.anomalies() > 0 {
        eprintln!("warning: {} anomalous callbacks", cluster.anomalies());
    }

    if !failed.is_empty() {
        anyhow::bail!("Failed to write {} result documents", failed.len());
    }

    if output == OutputMode::Trace {
        if let Some(dir) = output_dir {
            let epochs: Vec<_> = reports.iter().map(|r| r.epoch).collect();
            let defs = GlobalDefinitions::from_epochs(&epochs)?;
            let path = dir.join("pfprof-defs.json");
            std::fs::write(&path, serde_json::to_string_pretty(&defs)?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("wrote {}", path.display());
        }
    }

    Ok(())
}

fn run_matrix(args: &MatrixArgs) -> Result<()> {
    let reports = args
        .results
        .iter()
        .map(|path| {
            ProfileReport::from_file(path)
                .with_context(|| format!("Failed to read result {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let matrix = TrafficMatrix::from_reports(&reports, args.phase)?;
    match args.format {
        OutputFormat::Text => print!("{}", matrix.to_text()),
        OutputFormat::Csv => print!("{}", matrix.to_csv()),
        OutputFormat::Json => println!("{}", matrix.to_json_pretty()?),
    }
    Ok(())
}

fn run_defs(args: &DefsArgs) -> Result<()> {
    let defs = GlobalDefinitions::from_trace_files(&args.traces)
        .context("Failed to build global definitions")?;
    println!("{}", serde_json::to_string_pretty(&defs)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    match &args.command {
        Command::Simulate(sim) => run_simulate(sim),
        Command::Matrix(matrix) => run_matrix(matrix),
        Command::Defs(defs) => run_defs(defs),
    }
}
