#![no_main]

use libfuzzer_sys::fuzz_target;
use pfprof::engine::Engine;
use pfprof::simulated::{SimulatedInstrumentation, SimulatedRuntime, SELF, WORLD};
use pfprof::types::{CommHandle, Notification};
use pfprof::{CorrelationPolicy, ProfilerConfig};

// Each 4-byte chunk is one callback: kind, request id, peer, length
fuzz_target!(|data: &[u8]| {
    let policy = match data.first() {
        Some(b) if b & 1 == 1 => CorrelationPolicy::SendsOnly,
        _ => CorrelationPolicy::BothDirections,
    };
    let mut engine = Engine::new(
        ProfilerConfig::default().with_policy(policy),
        SimulatedRuntime::new(0, 4),
        SimulatedInstrumentation::default(),
    );
    if engine.initialize().is_err() {
        return;
    }

    let mut tracked = 0u64;
    for chunk in data.chunks_exact(4) {
        let comm = match chunk[0] >> 6 {
            0 | 1 => WORLD,
            2 => SELF,
            _ => CommHandle(9),
        };
        let id = u64::from(chunk[1] & 0x0f);
        let peer = i32::from(chunk[2] as i8) % 6;
        let len = u64::from(chunk[3]);
        let n = if chunk[0] & 2 == 0 {
            Notification::send(id, comm, peer, len, 0)
        } else {
            Notification::recv(id, comm, peer, len, 0)
        };

        if chunk[0] & 1 == 0 {
            engine.on_begin(&n);
        } else {
            engine.on_end(&n);
        }
        tracked = tracked.max(engine.in_flight() as u64);
    }

    let in_flight = engine.in_flight();
    if let Ok(shutdown) = engine.shutdown() {
        // Everything still open is reported, never counted
        assert_eq!(shutdown.report.unmatched_operations.len(), in_flight);
        assert!(tracked <= 32);
    }
});
