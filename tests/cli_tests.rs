// Command-line tests: simulate, matrix and defs subcommands

use predicates::prelude::*;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

fn pfprof() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("pfprof");
    for key in ["PFPROF_CONFIG", "PFPROF_POLICY", "PFPROF_OUTPUT", "PFPROF_OUTPUT_DIR"] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    pfprof()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("matrix"))
        .stdout(predicate::str::contains("defs"));
}

#[test]
fn test_simulate_ring_prints_per_rank_totals() {
    pfprof()
        .args(["simulate", "-n", "3", "--size", "100", "--rounds", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "rank 0: sent 200 bytes in 2 messages, received 200 bytes in 2 messages",
        ))
        .stdout(predicate::str::contains("rank 2:"));
}

#[test]
fn test_simulate_summary_goes_to_stderr() {
    pfprof()
        .args(["simulate", "-n", "2", "--pattern", "pairs", "-c"])
        .assert()
        .success()
        .stderr(predicate::str::contains("tx bytes"))
        .stderr(predicate::str::contains("--- rank 1 ---"));
}

#[test]
fn test_simulate_sends_only_has_no_receives() {
    pfprof()
        .args(["simulate", "-n", "2", "--policy", "sends-only", "--size", "8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("received 0 bytes in 0 messages"));
}

#[test]
fn test_trace_output_requires_directory() {
    pfprof()
        .args(["simulate", "--output", "trace"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--output-dir"));
}

#[test]
fn test_simulate_then_matrix() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();

    pfprof()
        .args(["simulate", "-n", "3", "--size", "10", "-o"])
        .arg(dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("pfprof-result0.json"));

    let results: Vec<_> = (0..3)
        .map(|r| dir.join(format!("pfprof-result{r}.json")))
        .collect();
    for path in &results {
        assert!(path.exists(), "missing {}", path.display());
    }

    pfprof()
        .arg("matrix")
        .args(&results)
        .args(["--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("sender,receiver,bytes,messages"))
        .stdout(predicate::str::contains("0,1,10,1"))
        .stdout(predicate::str::contains("2,0,10,1"));

    pfprof()
        .arg("matrix")
        .args(&results)
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 30 bytes in 3 messages"));

    pfprof()
        .arg("matrix")
        .args(&results)
        .args(["--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"n_procs\": 3"));
}

#[test]
fn test_matrix_phase_selection() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();

    pfprof()
        .args([
            "simulate",
            "-n",
            "2",
            "--pattern",
            "pairs",
            "--rounds",
            "2",
            "--phase-per-round",
            "-o",
        ])
        .arg(dir)
        .assert()
        .success();

    let results = [dir.join("pfprof-result0.json"), dir.join("pfprof-result1.json")];

    pfprof()
        .arg("matrix")
        .args(&results)
        .args(["--phase", "1", "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0,1,1024,1"));

    pfprof()
        .arg("matrix")
        .args(&results)
        .args(["--phase", "5"])
        .assert()
        .failure();
}

#[test]
fn test_trace_simulation_then_defs() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();

    pfprof()
        .args(["simulate", "-n", "2", "--output", "trace", "-o"])
        .arg(dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("pfprof-defs.json"));

    let defs = fs::read_to_string(dir.join("pfprof-defs.json")).unwrap();
    assert!(defs.contains("MPI Rank 1"));

    pfprof()
        .arg("defs")
        .arg(dir.join("pfprof-trace0.jsonl"))
        .arg(dir.join("pfprof-trace1.jsonl"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"timer_resolution\": 1000000000"))
        .stdout(predicate::str::contains("MPI_COMM_WORLD"));
}

#[test]
fn test_matrix_missing_file_fails() {
    pfprof()
        .args(["matrix", "/nonexistent/pfprof-result0.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read result"));
}

#[test]
#[serial]
fn test_policy_from_environment() {
    pfprof()
        .env("PFPROF_POLICY", "sends-only")
        .args(["simulate", "-n", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("received 0 bytes in 0 messages"));
}

#[test]
fn test_config_file_option() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("pfprof.toml");
    fs::write(&config, "policy = \"sends-only\"\n").unwrap();

    pfprof()
        .args(["simulate", "-n", "2", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("received 0 bytes in 0 messages"));

    fs::write(&config, "unknown_key = 1\n").unwrap();
    pfprof()
        .args(["simulate", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
