//! Correlation engine
//!
//! The [`Engine`] owns every piece of profiling state for one process: the
//! communicator registry, the in-flight table, the statistics aggregator and
//! the optional trace sink. The instrumentation layer drives it through the
//! begin/end callbacks; the host program drives its lifecycle:
//!
//! ```text
//! Uninitialized --initialize()--> Active --shutdown()--> ShutDown
//! ```
//!
//! Callbacks never fail. Contract violations (a request id reused while in
//! flight, a completion without a begin, a peer that cannot be translated)
//! are counted and returned as [`Disposition::Anomaly`], and the counts end
//! up in the shutdown report.
//!
//! # Example
//!
//! ```
//! use pfprof::config::ProfilerConfig;
//! use pfprof::engine::{Disposition, Engine};
//! use pfprof::simulated::{SimulatedInstrumentation, SimulatedRuntime, WORLD};
//! use pfprof::types::Notification;
//!
//! let runtime = SimulatedRuntime::new(0, 2);
//! let mut engine = Engine::new(
//!     ProfilerConfig::default(),
//!     runtime,
//!     SimulatedInstrumentation::default(),
//! );
//! engine.initialize()?;
//!
//! let send = Notification::send(1, WORLD, 1, 256, 0);
//! assert_eq!(engine.on_begin(&send), Disposition::Tracked);
//! assert_eq!(engine.on_end(&send), Disposition::Matched);
//!
//! let report = engine.shutdown()?;
//! assert_eq!(report.statistics().tx_bytes[1], 256);
//! # Ok::<(), pfprof::ProfilerError>(())
//! ```

use crate::config::{CorrelationPolicy, OutputMode, ProfilerConfig};
use crate::error::{ProfilerError, Result};
use crate::inflight::{InFlightOperation, InFlightTable};
use crate::instrument::{Instrumentation, MessagingRuntime, NotificationHandler};
use crate::registry::CommRegistry;
use crate::report::{AnomalyCounters, ProfileReport, TrafficReport};
use crate::stats::{AggregateStatistics, Aggregator};
use crate::trace::{JsonLinesTraceSink, LocalEpoch, TraceEvent, TraceSink};
use crate::types::{
    CommHandle, Direction, EventHandle, EventKind, Notification, Rank, ANY_SOURCE,
};
use std::path::PathBuf;

/// Lifecycle state of an [`Engine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Active,
    ShutDown,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Active => "active",
            EngineState::ShutDown => "shut down",
        }
    }
}

/// What a callback did with its notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Begin recorded in the in-flight table
    Tracked,
    /// End matched with its begin and consumed
    Matched,
    /// Dropped by the correlation policy
    Filtered,
    /// Engine not active, notification discarded
    Ignored,
    /// Contract violation, counted
    Anomaly,
}

/// Everything produced by [`Engine::shutdown`]
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub report: ProfileReport,
    pub epoch: LocalEpoch,
    /// Communicators whose callbacks were released
    pub released_communicators: usize,
    /// Trace events written (trace mode)
    pub trace_events: u64,
    /// Result document written, if an output directory is configured
    pub result_path: Option<PathBuf>,
    /// Why the result document could not be written; the report is still complete
    pub result_error: Option<String>,
}

impl ShutdownReport {
    /// Counters summed over all phases
    pub fn statistics(&self) -> AggregateStatistics {
        self.report.statistics()
    }
}

/// Correlation engine for one process
pub struct Engine<R, I> {
    config: ProfilerConfig,
    runtime: R,
    instrumentation: I,
    state: EngineState,

    world_rank: Rank,
    n_procs: u32,

    registry: CommRegistry,
    inflight: InFlightTable,
    aggregator: Aggregator,
    trace: Option<Box<dyn TraceSink + Send>>,
    trace_events: u64,

    anomalies: AnomalyCounters,
    n_events: u64,
    epoch_start: u64,
}

impl<R, I> Engine<R, I>
where
    R: MessagingRuntime,
    I: Instrumentation,
{
    /// Create an uninitialized engine
    pub fn new(config: ProfilerConfig, runtime: R, instrumentation: I) -> Self {
        let world_rank = runtime.world_rank();
        let n_procs = runtime.world_size();

        Self {
            config,
            runtime,
            instrumentation,
            state: EngineState::Uninitialized,
            world_rank,
            n_procs,
            registry: CommRegistry::default(),
            inflight: InFlightTable::new(),
            aggregator: Aggregator::new(n_procs as usize),
            trace: None,
            trace_events: 0,
            anomalies: AnomalyCounters::default(),
            n_events: 0,
            epoch_start: 0,
        }
    }

    /// Send trace events to `sink` instead of a file; switches to trace output
    pub fn with_trace_sink(mut self, sink: impl TraceSink + Send + 'static) -> Self {
        self.config.output = OutputMode::Trace;
        self.trace = Some(Box::new(sink));
        self
    }

    fn expect_state(&self, expected: EngineState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ProfilerError::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    /// Bring the engine up
    ///
    /// Starts the instrumentation layer, resolves the begin and end event
    /// kinds, opens the trace output in trace mode, and registers the world
    /// and self communicators. On failure the engine stays uninitialized and
    /// no callback stays registered.
    pub fn initialize(&mut self) -> Result<()> {
        self.expect_state(EngineState::Uninitialized)?;

        self.instrumentation
            .init()
            .map_err(|e| ProfilerError::InitializationFailure(e.to_string()))?;

        let begin = self
            .instrumentation
            .query_event(&self.config.begin_event)
            .ok_or_else(|| ProfilerError::UnsupportedEvent(self.config.begin_event.clone()))?;
        let end = self
            .instrumentation
            .query_event(&self.config.end_event)
            .ok_or_else(|| ProfilerError::UnsupportedEvent(self.config.end_event.clone()))?;

        let mut registry =
            CommRegistry::new(vec![(EventKind::Activate, begin), (EventKind::Complete, end)]);

        let mut file_sink = None;
        if self.config.output == OutputMode::Trace && self.trace.is_none() {
            let path = self.config.trace_path(self.world_rank).ok_or_else(|| {
                ProfilerError::InitializationFailure(
                    "trace output requires an output directory".to_string(),
                )
            })?;
            let sink = JsonLinesTraceSink::create(&path).map_err(|e| {
                ProfilerError::InitializationFailure(format!(
                    "cannot open trace file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            tracing::debug!("writing trace to {}", path.display());
            file_sink = Some(sink);
        }

        for comm in [self.runtime.world(), self.runtime.self_comm()] {
            if let Err(e) = registry.register(comm, &self.runtime, &mut self.instrumentation) {
                registry.release_all(&mut self.instrumentation);
                return Err(ProfilerError::InitializationFailure(format!(
                    "cannot register {}: {}",
                    comm, e
                )));
            }
        }

        if let Some(sink) = file_sink {
            self.trace = Some(Box::new(sink));
        }
        self.registry = registry;
        self.epoch_start = self.runtime.now_ns();
        self.state = EngineState::Active;

        tracing::debug!(
            "rank {}/{} initialized (policy: {}, output: {:?})",
            self.world_rank,
            self.n_procs,
            self.config.policy,
            self.config.output
        );
        Ok(())
    }

    /// Start instrumenting a newly created communicator
    pub fn register_communicator(&mut self, comm: CommHandle) -> Result<()> {
        self.expect_state(EngineState::Active)?;
        self.registry
            .register(comm, &self.runtime, &mut self.instrumentation)
            .map_err(|e| {
                self.anomalies.registry_violations += 1;
                tracing::warn!("register {} failed: {}", comm, e);
                e
            })
    }

    /// Stop instrumenting a communicator that is being freed
    pub fn unregister_communicator(&mut self, comm: CommHandle) -> Result<()> {
        self.expect_state(EngineState::Active)?;
        self.registry
            .unregister(comm, &mut self.instrumentation)
            .map_err(|e| {
                self.anomalies.registry_violations += 1;
                tracing::warn!("unregister {} failed: {}", comm, e);
                e
            })
    }

    /// World rank of the notification's peer; `None` for a wildcard receive
    /// on a registered communicator
    fn resolve_peer(&self, n: &Notification) -> Result<Option<Rank>> {
        match self.registry.translate(n.comm, n.peer) {
            Ok(peer) => Ok(Some(peer)),
            Err(_)
                if n.operation == Direction::Recv
                    && n.peer == ANY_SOURCE
                    && self.registry.is_registered(n.comm) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn is_self_send(&self, peer: Option<Rank>) -> bool {
        self.config.policy == CorrelationPolicy::SendsOnly && peer == Some(self.world_rank)
    }

    /// An operation was posted
    pub fn on_begin(&mut self, n: &Notification) -> Disposition {
        if self.state != EngineState::Active {
            tracing::trace!("begin {} ignored: engine {}", n.key(), self.state.as_str());
            return Disposition::Ignored;
        }
        if self.config.policy == CorrelationPolicy::SendsOnly && n.operation == Direction::Recv {
            return Disposition::Filtered;
        }

        let peer = match self.resolve_peer(n) {
            Ok(peer) => peer,
            Err(e) => {
                self.anomalies.registry_violations += 1;
                tracing::warn!("begin {} dropped: {}", n.key(), e);
                return Disposition::Anomaly;
            }
        };

        if self.is_self_send(peer) {
            return Disposition::Filtered;
        }

        let op = InFlightOperation {
            request_id: n.request_id,
            direction: n.operation,
            comm: n.comm,
            local_peer: n.peer,
            peer,
            len: n.byte_len(),
            tag: n.tag,
            start_ns: self.runtime.now_ns(),
        };
        let event = self.trace.is_some().then(|| TraceEvent::begin_of(&op));

        if let Err(e) = self.inflight.begin(op) {
            self.anomalies.correlation_conflicts += 1;
            tracing::warn!("{}", e);
            return Disposition::Anomaly;
        }

        if let Some(event) = event {
            self.emit(&event);
        }

        tracing::trace!("begin {} peer={:?} len={}", n.key(), peer, n.byte_len());
        self.n_events += 1;
        Disposition::Tracked
    }

    /// An operation completed
    pub fn on_end(&mut self, n: &Notification) -> Disposition {
        if self.state != EngineState::Active {
            tracing::trace!("end {} ignored: engine {}", n.key(), self.state.as_str());
            return Disposition::Ignored;
        }
        if self.config.policy == CorrelationPolicy::SendsOnly {
            if n.operation == Direction::Recv {
                return Disposition::Filtered;
            }
            if self.is_self_send(self.registry.translate(n.comm, n.peer).ok()) {
                return Disposition::Filtered;
            }
        }

        let end_ns = self.runtime.now_ns();
        let completion = match self.inflight.end(n.key(), end_ns) {
            Ok(completion) => completion,
            Err(e) if self.resolve_peer(n).is_err() => {
                // Its begin was already counted as a registry violation
                tracing::debug!("{} on untranslatable peer: {}", e, n.peer);
                return Disposition::Anomaly;
            }
            Err(e) => {
                self.anomalies.unmatched_completions += 1;
                tracing::warn!("{}", e);
                return Disposition::Anomaly;
            }
        };

        let fallback = match completion.operation.peer {
            Some(_) => None,
            None => self.registry.translate(completion.operation.comm, n.peer).ok(),
        };
        let Some(matched) = completion.resolve(fallback) else {
            self.anomalies.registry_violations += 1;
            tracing::warn!(
                "completed wildcard receive {} has no resolvable source ({})",
                n.key(),
                n.peer
            );
            return Disposition::Anomaly;
        };

        match self.config.output {
            OutputMode::Statistics => {
                if !self.aggregator.record(&matched) {
                    self.anomalies.registry_violations += 1;
                    tracing::warn!(
                        "end {} dropped: peer {} is far outside a world of {}",
                        n.key(),
                        matched.peer,
                        self.n_procs
                    );
                    return Disposition::Anomaly;
                }
            }
            OutputMode::Trace => self.emit(&TraceEvent::end_of(&matched)),
        }

        tracing::trace!(
            "end {} peer={} len={} after {} ns",
            n.key(),
            matched.peer,
            matched.len,
            matched.duration_ns()
        );
        self.n_events += 1;
        Disposition::Matched
    }

    /// Dispatch a callback delivered on `handle` by the instrumentation layer
    pub fn on_event(&mut self, handle: EventHandle, n: &Notification) -> Disposition {
        match self.registry.kind_of(handle) {
            Some(EventKind::Activate) => self.on_begin(n),
            Some(EventKind::Complete) => self.on_end(n),
            None if self.state == EngineState::Active => {
                self.anomalies.registry_violations += 1;
                tracing::warn!("callback on unregistered {}", handle);
                Disposition::Anomaly
            }
            None => Disposition::Ignored,
        }
    }

    fn emit(&mut self, event: &TraceEvent) {
        let Some(sink) = self.trace.as_mut() else {
            return;
        };
        match sink.write_event(event) {
            Ok(()) => self.trace_events += 1,
            Err(e) => {
                self.anomalies.sink_errors += 1;
                tracing::warn!("trace write failed: {}", e);
            }
        }
    }

    /// Close the current statistics phase and open a new one
    pub fn mark_phase(&mut self) -> usize {
        let phase = self.aggregator.begin_phase();
        tracing::debug!("rank {}: phase {} started", self.world_rank, phase);
        phase
    }

    /// Release every callback, flush the consumers and build the report
    ///
    /// Operations still in flight are listed as unmatched and never reach the
    /// counters. When an output directory is configured the result document
    /// is written to `<output_dir>/<result_prefix><rank>.json`; a failed
    /// write is counted as a sink error and returned in
    /// [`ShutdownReport::result_error`], never in place of the report.
    pub fn shutdown(&mut self) -> Result<ShutdownReport> {
        self.expect_state(EngineState::Active)?;

        let released = self.registry.release_all(&mut self.instrumentation);
        let end_ns = self.runtime.now_ns();

        let leaked = self.inflight.drain();
        for op in &leaked {
            tracing::warn!(
                "{} still in flight at shutdown (peer {:?}, {} bytes, tag {})",
                op.key(),
                op.peer,
                op.len,
                op.tag
            );
        }

        let epoch = LocalEpoch {
            rank: self.world_rank,
            n_procs: self.n_procs,
            start: self.epoch_start,
            end: end_ns.max(self.epoch_start),
        };

        if let Some(mut sink) = self.trace.take() {
            if let Err(e) = sink.finish(&epoch) {
                self.anomalies.sink_errors += 1;
                tracing::warn!("trace finish failed: {}", e);
            }
        }

        let totals = self.aggregator.snapshot();
        let phases: Vec<TrafficReport> = self
            .aggregator
            .phase_snapshots()
            .iter()
            .map(TrafficReport::from)
            .collect();

        let mut report = ProfileReport {
            processor_name: self.runtime.processor_name(),
            rank: self.world_rank,
            n_procs: self.n_procs,
            description: self.config.description.clone(),
            policy: self.config.policy,
            output: self.config.output,
            n_events: self.n_events,
            duration: (epoch.end - epoch.start) as f64 / 1e9,
            traffic: TrafficReport::from(&totals),
            n_phases: phases.len(),
            phases,
            anomalies: self.anomalies,
            unmatched_operations: leaked,
        };

        self.state = EngineState::ShutDown;

        let mut result_path = None;
        let mut result_error = None;
        if let Some(path) = self.config.result_path(self.world_rank) {
            match report.write_to(&path) {
                Ok(()) => {
                    tracing::debug!("wrote {}", path.display());
                    result_path = Some(path);
                }
                Err(e) => {
                    self.anomalies.sink_errors += 1;
                    report.anomalies.sink_errors += 1;
                    tracing::warn!("cannot write result {}: {}", path.display(), e);
                    result_error = Some(format!("{}: {}", path.display(), e));
                }
            }
        }

        tracing::debug!(
            "rank {} shut down: {} events, {} anomalies, {} unmatched",
            self.world_rank,
            self.n_events,
            self.anomalies.total(),
            report.unmatched_operations.len()
        );

        Ok(ShutdownReport {
            report,
            epoch,
            released_communicators: released,
            trace_events: self.trace_events,
            result_path,
            result_error,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn policy(&self) -> CorrelationPolicy {
        self.config.policy
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Counters accumulated so far, summed over phases
    pub fn snapshot(&self) -> AggregateStatistics {
        self.aggregator.snapshot()
    }

    pub fn anomalies(&self) -> AnomalyCounters {
        self.anomalies
    }

    /// Accepted notifications so far
    pub fn n_events(&self) -> u64 {
        self.n_events
    }

    /// Operations currently in flight
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub fn world_rank(&self) -> Rank {
        self.world_rank
    }

    pub fn registry(&self) -> &CommRegistry {
        &self.registry
    }

    pub fn instrumentation(&self) -> &I {
        &self.instrumentation
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }
}

impl<R, I> NotificationHandler for Engine<R, I>
where
    R: MessagingRuntime,
    I: Instrumentation,
{
    fn notify_begin(&mut self, notification: &Notification) {
        self.on_begin(notification);
    }

    fn notify_end(&mut self, notification: &Notification) {
        self.on_end(notification);
    }
}
