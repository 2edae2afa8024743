//! Profiler configuration
//!
//! Loaded from TOML, or from the environment of the profiled process:
//! `PFPROF_CONFIG` names a TOML file, and `PFPROF_POLICY`, `PFPROF_OUTPUT`
//! and `PFPROF_OUTPUT_DIR` override individual keys.
//!
//! # Example TOML
//! ```toml
//! policy = "sends-only"
//! output = "trace"
//! output_dir = "/scratch/run42"
//! ```

use crate::error::{ProfilerError, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming a TOML configuration file
pub const CONFIG_ENV: &str = "PFPROF_CONFIG";
/// Environment override for [`ProfilerConfig::policy`]
pub const POLICY_ENV: &str = "PFPROF_POLICY";
/// Environment override for [`ProfilerConfig::output`]
pub const OUTPUT_ENV: &str = "PFPROF_OUTPUT";
/// Environment override for [`ProfilerConfig::output_dir`]
pub const OUTPUT_DIR_ENV: &str = "PFPROF_OUTPUT_DIR";

/// Which notifications enter the in-flight table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CorrelationPolicy {
    /// Track sends only and drop sends addressed to this process
    SendsOnly,
    /// Track sends and receives in separate id namespaces
    #[default]
    BothDirections,
}

impl CorrelationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CorrelationPolicy::SendsOnly => "sends-only",
            CorrelationPolicy::BothDirections => "both-directions",
        }
    }
}

impl fmt::Display for CorrelationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrelationPolicy {
    type Err = ProfilerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sends-only" | "sends_only" | "send" => Ok(CorrelationPolicy::SendsOnly),
            "both-directions" | "both_directions" | "both" => Ok(CorrelationPolicy::BothDirections),
            other => Err(ProfilerError::Config(format!(
                "unknown correlation policy '{}'",
                other
            ))),
        }
    }
}

/// Consumer of matched operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Per-peer counters and message-size histograms
    #[default]
    Statistics,
    /// Timestamped begin/end events
    Trace,
}

impl FromStr for OutputMode {
    type Err = ProfilerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "statistics" | "stats" => Ok(OutputMode::Statistics),
            "trace" => Ok(OutputMode::Trace),
            other => Err(ProfilerError::Config(format!("unknown output mode '{}'", other))),
        }
    }
}

/// Settings of one profiling session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    pub policy: CorrelationPolicy,
    pub output: OutputMode,
    /// Free text copied into the result document
    pub description: String,
    /// Directory receiving result and trace files; nothing is written when unset
    pub output_dir: Option<PathBuf>,
    pub result_prefix: String,
    pub trace_prefix: String,
    /// Instrumentation event name delivered when an operation is posted
    pub begin_event: String,
    /// Instrumentation event name delivered when an operation completes
    pub end_event: String,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            policy: CorrelationPolicy::default(),
            output: OutputMode::default(),
            description: format!("Generated by pfprof v{}", env!("CARGO_PKG_VERSION")),
            output_dir: None,
            result_prefix: "pfprof-result".to_string(),
            trace_prefix: "pfprof-trace".to_string(),
            begin_event: "PERUSE_COMM_REQ_ACTIVATE".to_string(),
            end_event: "PERUSE_COMM_REQ_COMPLETE".to_string(),
        }
    }
}

impl ProfilerConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProfilerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        if let Some(policy) = lookup(POLICY_ENV) {
            config.policy = policy.parse()?;
        }
        if let Some(output) = lookup(OUTPUT_ENV) {
            config.output = output.parse()?;
        }
        if let Some(dir) = lookup(OUTPUT_DIR_ENV) {
            if !dir.is_empty() {
                config.output_dir = Some(PathBuf::from(dir));
            }
        }

        tracing::debug!(
            "configuration: policy={}, output={:?}, output_dir={:?}",
            config.policy,
            config.output,
            config.output_dir
        );
        Ok(config)
    }

    pub fn with_policy(mut self, policy: CorrelationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Result file of `rank`, if an output directory is configured
    pub fn result_path(&self, rank: u32) -> Option<PathBuf> {
        self.output_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}{}.json", self.result_prefix, rank)))
    }

    /// Trace file of `rank`, if an output directory is configured
    pub fn trace_path(&self, rank: u32) -> Option<PathBuf> {
        self.output_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}{}.jsonl", self.trace_prefix, rank)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ProfilerConfig::default();
        assert_eq!(config.policy, CorrelationPolicy::BothDirections);
        assert_eq!(config.output, OutputMode::Statistics);
        assert!(config.description.starts_with("Generated by pfprof v"));
        assert_eq!(config.begin_event, "PERUSE_COMM_REQ_ACTIVATE");
        assert_eq!(config.end_event, "PERUSE_COMM_REQ_COMPLETE");
        assert!(config.result_path(0).is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ProfilerConfig::from_toml_str(
            r#"
policy = "sends-only"
output_dir = "/tmp/out"
"#,
        )
        .unwrap();

        assert_eq!(config.policy, CorrelationPolicy::SendsOnly);
        assert_eq!(config.output, OutputMode::Statistics);
        assert_eq!(
            config.result_path(3),
            Some(PathBuf::from("/tmp/out/pfprof-result3.json"))
        );
        assert_eq!(
            config.trace_path(3),
            Some(PathBuf::from("/tmp/out/pfprof-trace3.jsonl"))
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ProfilerConfig::from_toml_str("polcy = \"sends-only\"").unwrap_err();
        assert!(matches!(err, ProfilerError::Config(_)));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "sends-only".parse::<CorrelationPolicy>().unwrap(),
            CorrelationPolicy::SendsOnly
        );
        assert_eq!(
            "BOTH".parse::<CorrelationPolicy>().unwrap(),
            CorrelationPolicy::BothDirections
        );
        assert!("sideways".parse::<CorrelationPolicy>().is_err());
        assert_eq!(CorrelationPolicy::SendsOnly.to_string(), "sends-only");
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            (POLICY_ENV, "sends-only"),
            (OUTPUT_ENV, "trace"),
            (OUTPUT_DIR_ENV, "/var/tmp"),
        ]
        .into_iter()
        .collect();

        let config =
            ProfilerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.policy, CorrelationPolicy::SendsOnly);
        assert_eq!(config.output, OutputMode::Trace);
        assert_eq!(config.output_dir, Some(PathBuf::from("/var/tmp")));
    }

    #[test]
    fn test_lookup_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pfprof.toml");
        std::fs::write(&path, "output = \"trace\"\nresult_prefix = \"r\"\n").unwrap();
        let path_str = path.to_string_lossy().to_string();

        let config = ProfilerConfig::from_lookup(|k| {
            (k == CONFIG_ENV).then(|| path_str.clone())
        })
        .unwrap();
        assert_eq!(config.output, OutputMode::Trace);
        assert_eq!(config.result_prefix, "r");
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let err = ProfilerConfig::from_lookup(|k| (k == OUTPUT_ENV).then(|| "xml".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("xml"));
    }
}
