//! pfprof - point-to-point communication profiler for message-passing programs
//!
//! This library correlates the begin and end notifications an
//! instrumentation layer delivers for every send and receive, translates
//! communicator-local peers to world ranks, and folds the completed
//! operations into per-peer traffic statistics or a sequential trace.
//!
//! The [`engine::Engine`] is the entry point; the messaging runtime and the
//! instrumentation layer are reached through the traits in [`instrument`],
//! with in-process implementations in [`simulated`].

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod global_defs;
pub mod inflight;
pub mod instrument;
pub mod matrix;
pub mod rank_table;
pub mod registry;
pub mod report;
pub mod shared;
pub mod simulated;
pub mod stats;
pub mod trace;
pub mod types;

pub use config::{CorrelationPolicy, OutputMode, ProfilerConfig};
pub use engine::{Disposition, Engine, EngineState, ShutdownReport};
pub use error::{ErrorClass, ProfilerError, Result};
pub use shared::SharedEngine;
