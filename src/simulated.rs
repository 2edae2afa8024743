//! In-process messaging runtime and instrumentation layer
//!
//! [`SimulatedRuntime`] and [`SimulatedInstrumentation`] implement the
//! engine's external boundaries without a communication library, so the
//! whole profiler can be exercised in tests and from `pfprof simulate`.
//! [`SimulatedCluster`] drives one engine per rank through a traffic
//! pattern, delivering callbacks through the handles each engine registered
//! exactly as an instrumentation layer would.

use crate::config::ProfilerConfig;
use crate::engine::{Disposition, Engine, ShutdownReport};
use crate::error::{ProfilerError, Result};
use crate::instrument::{Instrumentation, MessagingRuntime};
use crate::types::{
    CommHandle, EventDescriptor, EventHandle, Notification, Rank, ANY_SOURCE,
};
use clap::ValueEnum;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle of the simulated world communicator
pub const WORLD: CommHandle = CommHandle(0);
/// Handle of the simulated self communicator
pub const SELF: CommHandle = CommHandle(1);

/// Manually advanced nanosecond clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock(Arc<AtomicU64>);

impl SimulatedClock {
    pub fn new(start_ns: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start_ns)))
    }

    pub fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Move the clock forward by `ns`
    pub fn advance(&self, ns: u64) {
        self.0.fetch_add(ns, Ordering::SeqCst);
    }
}

/// Messaging runtime of one simulated process
#[derive(Debug, Clone)]
pub struct SimulatedRuntime {
    rank: Rank,
    world_size: u32,
    processor_name: String,
    /// World ranks of every live communicator, in local-rank order
    comms: HashMap<CommHandle, Vec<Rank>>,
    next_comm: u64,
    clock: SimulatedClock,
}

impl SimulatedRuntime {
    /// Process `rank` of a world of `world_size` processes
    pub fn new(rank: Rank, world_size: u32) -> Self {
        let mut comms = HashMap::new();
        comms.insert(WORLD, (0..world_size).collect());
        comms.insert(SELF, vec![rank]);

        Self {
            rank,
            world_size,
            processor_name: format!("sim{:04}", rank),
            comms,
            next_comm: 2,
            clock: SimulatedClock::new(1_000),
        }
    }

    /// Use a clock shared with other simulated processes
    pub fn with_clock(mut self, clock: SimulatedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_processor_name(mut self, name: impl Into<String>) -> Self {
        self.processor_name = name.into();
        self
    }

    pub fn clock(&self) -> &SimulatedClock {
        &self.clock
    }

    /// Move this process's clock forward by `ns`
    pub fn advance(&self, ns: u64) {
        self.clock.advance(ns);
    }

    /// Create a communicator whose local rank `i` is world rank `members[i]`
    pub fn create_comm(&mut self, members: Vec<Rank>) -> CommHandle {
        let handle = CommHandle(self.next_comm);
        self.next_comm += 1;
        self.comms.insert(handle, members);
        handle
    }

    /// Free a communicator, returning whether it existed
    pub fn free_comm(&mut self, comm: CommHandle) -> bool {
        self.comms.remove(&comm).is_some()
    }

    fn members(&self, comm: CommHandle) -> Result<&[Rank]> {
        self.comms
            .get(&comm)
            .map(Vec::as_slice)
            .ok_or_else(|| ProfilerError::Runtime(format!("invalid communicator {}", comm)))
    }
}

impl MessagingRuntime for SimulatedRuntime {
    fn world_rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    fn processor_name(&self) -> String {
        self.processor_name.clone()
    }

    fn world(&self) -> CommHandle {
        WORLD
    }

    fn self_comm(&self) -> CommHandle {
        SELF
    }

    fn comm_size(&self, comm: CommHandle) -> Result<u32> {
        Ok(self.members(comm)?.len() as u32)
    }

    fn translate_to_world(&self, comm: CommHandle, local_ranks: &[u32]) -> Result<Vec<Rank>> {
        let members = self.members(comm)?;
        local_ranks
            .iter()
            .map(|&local| {
                members.get(local as usize).copied().ok_or_else(|| {
                    ProfilerError::Runtime(format!("rank {} not in {}", local, comm))
                })
            })
            .collect()
    }

    fn now_ns(&self) -> u64 {
        self.clock.now()
    }
}

/// Instrumentation layer with a configurable set of supported events
#[derive(Debug, Clone)]
pub struct SimulatedInstrumentation {
    supported: HashMap<String, EventDescriptor>,
    /// Active callbacks: handle → (event, communicator)
    active: HashMap<EventHandle, (EventDescriptor, CommHandle)>,
    next_handle: u64,
    initialized: bool,
    reject_init: bool,
    /// Registrations still allowed to succeed, unlimited when `None`
    registrations_left: Option<usize>,
}

impl Default for SimulatedInstrumentation {
    fn default() -> Self {
        Self::with_events(&["PERUSE_COMM_REQ_ACTIVATE", "PERUSE_COMM_REQ_COMPLETE"])
    }
}

impl SimulatedInstrumentation {
    /// Layer supporting exactly the named events
    pub fn with_events(names: &[&str]) -> Self {
        let supported = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), EventDescriptor(i as i32 + 1)))
            .collect();

        Self {
            supported,
            active: HashMap::new(),
            next_handle: 1,
            initialized: false,
            reject_init: false,
            registrations_left: None,
        }
    }

    /// Make `init` fail
    pub fn reject_init(mut self) -> Self {
        self.reject_init = true;
        self
    }

    /// Let the next `n` registrations succeed and fail every later one
    pub fn fail_registrations_after(&mut self, n: usize) {
        self.registrations_left = Some(n);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Active callback handles on `comm`
    pub fn active_handles(&self, comm: CommHandle) -> Vec<EventHandle> {
        let mut handles: Vec<EventHandle> = self
            .active
            .iter()
            .filter(|(_, (_, c))| *c == comm)
            .map(|(h, _)| *h)
            .collect();
        handles.sort_by_key(|h| h.0);
        handles
    }

    /// Number of active callbacks over all communicators
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Active handle delivering event `name` on `comm`
    pub fn handle_for(&self, comm: CommHandle, name: &str) -> Option<EventHandle> {
        let descriptor = self.supported.get(name)?;
        self.active
            .iter()
            .find(|(_, (d, c))| d == descriptor && *c == comm)
            .map(|(h, _)| *h)
    }
}

impl Instrumentation for SimulatedInstrumentation {
    fn init(&mut self) -> Result<()> {
        if self.reject_init {
            return Err(ProfilerError::Instrumentation(
                "instrumentation layer refused to start".to_string(),
            ));
        }
        self.initialized = true;
        Ok(())
    }

    fn query_event(&self, name: &str) -> Option<EventDescriptor> {
        self.supported.get(name).copied()
    }

    fn register(&mut self, event: EventDescriptor, comm: CommHandle) -> Result<EventHandle> {
        if let Some(left) = self.registrations_left.as_mut() {
            if *left == 0 {
                return Err(ProfilerError::Instrumentation(format!(
                    "cannot register callback on {}",
                    comm
                )));
            }
            *left -= 1;
        }

        let handle = EventHandle(self.next_handle);
        self.next_handle += 1;
        self.active.insert(handle, (event, comm));
        Ok(handle)
    }

    fn deactivate_and_release(&mut self, handle: EventHandle) -> Result<()> {
        self.active
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| ProfilerError::Instrumentation(format!("unknown handle {}", handle)))
    }
}

/// Who talks to whom in one round of [`SimulatedCluster::run_round`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TrafficPattern {
    /// Every rank sends to its right neighbour
    Ring,
    /// Ranks 2k and 2k+1 exchange one message each way
    Pairs,
    /// Every rank sends to every other rank
    AllToAll,
}

impl TrafficPattern {
    /// (sender, receiver) pairs of one round over `n_procs` ranks
    pub fn messages(self, n_procs: u32) -> Vec<(Rank, Rank)> {
        match self {
            TrafficPattern::Ring if n_procs > 1 => {
                (0..n_procs).map(|r| (r, (r + 1) % n_procs)).collect()
            }
            TrafficPattern::Ring => Vec::new(),
            TrafficPattern::Pairs => (0..n_procs)
                .filter_map(|r| {
                    let partner = r ^ 1;
                    (partner < n_procs).then_some((r, partner))
                })
                .collect(),
            TrafficPattern::AllToAll => (0..n_procs)
                .flat_map(|src| {
                    (0..n_procs)
                        .filter(move |&dst| dst != src)
                        .map(move |dst| (src, dst))
                })
                .collect(),
        }
    }
}

/// Smallest-first pool of request ids, reused once an operation completes
#[derive(Debug, Default)]
struct RequestIdPool {
    free: BTreeSet<u64>,
    next: u64,
}

impl RequestIdPool {
    fn acquire(&mut self) -> u64 {
        match self.free.pop_first() {
            Some(id) => id,
            None => {
                self.next += 1;
                self.next
            }
        }
    }

    fn release(&mut self, id: u64) {
        self.free.insert(id);
    }
}

type SimulatedEngine = Engine<SimulatedRuntime, SimulatedInstrumentation>;

/// One message of a round, with the request ids each side posted it under
struct PostedMessage {
    src: Rank,
    dst: Rank,
    send: Notification,
    recv: Notification,
}

/// A set of simulated processes with one engine each
pub struct SimulatedCluster {
    engines: Vec<SimulatedEngine>,
    pools: Vec<RequestIdPool>,
    clock: SimulatedClock,
    begin_event: String,
    end_event: String,
    wildcard_receives: bool,
    anomalies: u64,
}

impl SimulatedCluster {
    /// Build `n_procs` engines sharing one clock and configuration
    pub fn new(n_procs: u32, config: ProfilerConfig) -> Self {
        let clock = SimulatedClock::new(1_000);
        let engines = (0..n_procs)
            .map(|rank| {
                let runtime = SimulatedRuntime::new(rank, n_procs).with_clock(clock.clone());
                Engine::new(config.clone(), runtime, SimulatedInstrumentation::default())
            })
            .collect();

        Self {
            engines,
            pools: (0..n_procs).map(|_| RequestIdPool::default()).collect(),
            clock,
            begin_event: config.begin_event.clone(),
            end_event: config.end_event.clone(),
            wildcard_receives: false,
            anomalies: 0,
        }
    }

    /// Post receives with `ANY_SOURCE` instead of the sender's rank
    pub fn with_wildcard_receives(mut self, enabled: bool) -> Self {
        self.wildcard_receives = enabled;
        self
    }

    pub fn n_procs(&self) -> u32 {
        self.engines.len() as u32
    }

    pub fn engine(&self, rank: Rank) -> Option<&SimulatedEngine> {
        self.engines.get(rank as usize)
    }

    pub fn engine_mut(&mut self, rank: Rank) -> Option<&mut SimulatedEngine> {
        self.engines.get_mut(rank as usize)
    }

    pub fn clock(&self) -> &SimulatedClock {
        &self.clock
    }

    /// Callbacks that came back as [`Disposition::Anomaly`]
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Initialize every engine
    pub fn initialize(&mut self) -> Result<()> {
        for engine in &mut self.engines {
            engine.initialize()?;
        }
        Ok(())
    }

    fn deliver(&mut self, rank: Rank, event: &str, notification: &Notification) -> Disposition {
        let Some(engine) = self.engines.get_mut(rank as usize) else {
            return Disposition::Ignored;
        };
        let handle = engine
            .instrumentation()
            .handle_for(notification.comm, event);
        let disposition = match handle {
            Some(handle) => engine.on_event(handle, notification),
            None => Disposition::Ignored,
        };
        if disposition == Disposition::Anomaly {
            self.anomalies += 1;
        }
        disposition
    }

    /// Run one round of `pattern`
    ///
    /// Every sender posts its sends and every receiver its receives, then
    /// all operations complete in posting order. Request ids of a round are
    /// returned to each rank's pool afterwards, so later rounds reuse them.
    pub fn run_round(&mut self, pattern: TrafficPattern, message_size: u64, tag: i32) -> usize {
        let messages = pattern.messages(self.n_procs());
        let begin_event = self.begin_event.clone();
        let end_event = self.end_event.clone();

        let mut posted = Vec::with_capacity(messages.len());
        for (src, dst) in messages {
            let send_id = self.pools[src as usize].acquire();
            let recv_id = self.pools[dst as usize].acquire();
            let recv_peer = if self.wildcard_receives {
                ANY_SOURCE
            } else {
                src as i32
            };
            posted.push(PostedMessage {
                src,
                dst,
                send: Notification::send(send_id, WORLD, dst as i32, message_size, tag),
                recv: Notification::recv(recv_id, WORLD, recv_peer, message_size, tag),
            });
        }

        for msg in &posted {
            self.deliver(msg.src, &begin_event, &msg.send);
            self.deliver(msg.dst, &begin_event, &msg.recv);
            self.clock.advance(100);
        }

        self.clock.advance(1_000 + message_size);

        for msg in &posted {
            self.deliver(msg.src, &end_event, &msg.send);
            // A wildcard receive learns its source at completion
            let mut completed = msg.recv.clone();
            completed.peer = msg.src as i32;
            self.deliver(msg.dst, &end_event, &completed);
            self.clock.advance(50);
        }

        for msg in &posted {
            self.pools[msg.src as usize].release(msg.send.request_id.0);
            self.pools[msg.dst as usize].release(msg.recv.request_id.0);
        }

        tracing::debug!("simulated round: {:?}, {} messages", pattern, posted.len());
        posted.len()
    }

    /// Start a new statistics phase on every engine
    pub fn mark_phase(&mut self) {
        for engine in &mut self.engines {
            engine.mark_phase();
        }
    }

    /// Shut every engine down, returning the per-rank reports in rank order
    pub fn shutdown(&mut self) -> Result<Vec<ShutdownReport>> {
        self.clock.advance(1_000);
        // Every rank shuts down before the first error is reported
        let results: Vec<Result<ShutdownReport>> =
            self.engines.iter_mut().map(Engine::shutdown).collect();
        results.into_iter().collect()
    }
}
