// Configuration loaded from PFPROF_* environment variables.
// Serialized because the process environment is shared between tests.

use pfprof::config::{CONFIG_ENV, OUTPUT_DIR_ENV, OUTPUT_ENV, POLICY_ENV};
use pfprof::{CorrelationPolicy, OutputMode, ProfilerConfig};
use serial_test::serial;
use std::path::PathBuf;
use tempfile::TempDir;

fn clear_env() {
    for key in [CONFIG_ENV, POLICY_ENV, OUTPUT_ENV, OUTPUT_DIR_ENV] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_empty_environment_gives_defaults() {
    clear_env();
    let config = ProfilerConfig::from_env().unwrap();
    assert_eq!(config, ProfilerConfig::default());
}

#[test]
#[serial]
fn test_policy_and_output_overrides() {
    clear_env();
    std::env::set_var(POLICY_ENV, "sends-only");
    std::env::set_var(OUTPUT_ENV, "trace");
    std::env::set_var(OUTPUT_DIR_ENV, "/tmp/pfprof-out");

    let config = ProfilerConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.policy, CorrelationPolicy::SendsOnly);
    assert_eq!(config.output, OutputMode::Trace);
    assert_eq!(config.output_dir, Some(PathBuf::from("/tmp/pfprof-out")));
}

#[test]
#[serial]
fn test_config_file_then_override() {
    clear_env();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("pfprof.toml");
    std::fs::write(
        &path,
        r#"
policy = "sends-only"
description = "nightly run"
result_prefix = "nightly-"
"#,
    )
    .unwrap();

    std::env::set_var(CONFIG_ENV, &path);
    std::env::set_var(POLICY_ENV, "both-directions");
    let config = ProfilerConfig::from_env().unwrap();
    clear_env();

    // Environment wins over the file
    assert_eq!(config.policy, CorrelationPolicy::BothDirections);
    assert_eq!(config.description, "nightly run");
    assert_eq!(config.result_prefix, "nightly-");
}

#[test]
#[serial]
fn test_invalid_policy_is_rejected() {
    clear_env();
    std::env::set_var(POLICY_ENV, "receives-only");
    let result = ProfilerConfig::from_env();
    clear_env();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("receives-only"));
}

#[test]
#[serial]
fn test_missing_config_file_is_rejected() {
    clear_env();
    std::env::set_var(CONFIG_ENV, "/nonexistent/pfprof.toml");
    let result = ProfilerConfig::from_env();
    clear_env();

    assert!(result.is_err());
}
