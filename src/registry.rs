//! Registry of instrumented communicators
//!
//! Owns one [`CommunicatorRecord`] per live communicator: its rank table and
//! the callback handles registered for it on the instrumentation layer. The
//! registry is the only component that adds or removes those handles.
//!
//! # Example
//!
//! ```
//! use pfprof::registry::CommRegistry;
//! use pfprof::simulated::{SimulatedInstrumentation, SimulatedRuntime};
//! use pfprof::types::EventKind;
//! use pfprof::instrument::{Instrumentation, MessagingRuntime};
//!
//! let runtime = SimulatedRuntime::new(0, 4);
//! let mut instr = SimulatedInstrumentation::default();
//! let activate = instr.query_event("PERUSE_COMM_REQ_ACTIVATE").unwrap();
//!
//! let mut registry = CommRegistry::new(vec![(EventKind::Activate, activate)]);
//! registry.register(runtime.world(), &runtime, &mut instr)?;
//! assert_eq!(registry.translate(runtime.world(), 3)?, 3);
//! # Ok::<(), pfprof::ProfilerError>(())
//! ```

use crate::error::{ProfilerError, Result};
use crate::instrument::{Instrumentation, MessagingRuntime};
use crate::rank_table::RankTable;
use crate::types::{CommHandle, EventDescriptor, EventHandle, EventKind, Rank};
use std::collections::HashMap;

/// State kept for one registered communicator
#[derive(Debug, Clone)]
pub struct CommunicatorRecord {
    ranks: RankTable,
    handles: HashMap<EventKind, EventHandle>,
}

impl CommunicatorRecord {
    /// Local-to-global rank table
    pub fn ranks(&self) -> &RankTable {
        &self.ranks
    }

    /// Active callback handle per watched event kind
    pub fn handles(&self) -> &HashMap<EventKind, EventHandle> {
        &self.handles
    }
}

/// Registry of instrumented communicators
#[derive(Debug, Default)]
pub struct CommRegistry {
    /// Event kinds registered on every communicator
    watched: Vec<(EventKind, EventDescriptor)>,

    records: HashMap<CommHandle, CommunicatorRecord>,

    /// Reverse index used to dispatch a callback on its handle
    handle_kinds: HashMap<EventHandle, EventKind>,
}

impl CommRegistry {
    /// Create a registry watching the given event kinds
    pub fn new(watched: Vec<(EventKind, EventDescriptor)>) -> Self {
        Self {
            watched,
            records: HashMap::new(),
            handle_kinds: HashMap::new(),
        }
    }

    /// Register `comm`: build its rank table and one callback per watched kind
    ///
    /// # Errors
    ///
    /// `DuplicateRegistration` if `comm` is already present,
    /// `TranslationError` if its ranks cannot be mapped to world ranks, or
    /// the instrumentation layer's error if a callback cannot be registered.
    /// On failure no handle for `comm` stays registered.
    pub fn register<R, I>(&mut self, comm: CommHandle, runtime: &R, instr: &mut I) -> Result<()>
    where
        R: MessagingRuntime + ?Sized,
        I: Instrumentation + ?Sized,
    {
        if self.records.contains_key(&comm) {
            return Err(ProfilerError::DuplicateRegistration(comm));
        }

        let ranks = RankTable::build(runtime, comm)?;

        let mut handles = HashMap::with_capacity(self.watched.len());
        for &(kind, descriptor) in &self.watched {
            match instr.register(descriptor, comm) {
                Ok(handle) => {
                    handles.insert(kind, handle);
                }
                Err(e) => {
                    // Roll back the handles registered so far
                    for handle in handles.into_values() {
                        if let Err(release_err) = instr.deactivate_and_release(handle) {
                            tracing::warn!("failed to release {}: {}", handle, release_err);
                        }
                    }
                    return Err(e);
                }
            }
        }

        for (&kind, &handle) in &handles {
            self.handle_kinds.insert(handle, kind);
        }

        tracing::debug!(
            "registered {} ({} members, {} callbacks)",
            comm,
            ranks.size(),
            handles.len()
        );

        self.records
            .insert(comm, CommunicatorRecord { ranks, handles });
        Ok(())
    }

    /// Release every callback of `comm` and forget its rank table
    ///
    /// All handles are released even if one release fails; the first
    /// failure is returned after the record has been removed.
    pub fn unregister<I>(&mut self, comm: CommHandle, instr: &mut I) -> Result<()>
    where
        I: Instrumentation + ?Sized,
    {
        let record = self
            .records
            .remove(&comm)
            .ok_or(ProfilerError::NotRegistered(comm))?;

        let mut first_err = None;
        for handle in record.handles.into_values() {
            self.handle_kinds.remove(&handle);
            if let Err(e) = instr.deactivate_and_release(handle) {
                tracing::warn!("failed to release {} of {}: {}", handle, comm, e);
                first_err.get_or_insert(e);
            }
        }

        tracing::debug!("unregistered {}", comm);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Unregister every communicator, returning how many were released
    pub fn release_all<I>(&mut self, instr: &mut I) -> usize
    where
        I: Instrumentation + ?Sized,
    {
        let comms: Vec<CommHandle> = self.records.keys().copied().collect();
        let mut released = 0;
        for comm in comms {
            if self.unregister(comm, instr).is_ok() {
                released += 1;
            }
        }
        released
    }

    /// Translate a local rank of `comm` into its world rank
    pub fn translate(&self, comm: CommHandle, local: i32) -> Result<Rank> {
        let record = self
            .records
            .get(&comm)
            .ok_or(ProfilerError::UnknownCommunicator(comm))?;

        record
            .ranks
            .translate(local)
            .ok_or(ProfilerError::TranslationError { comm, local })
    }

    /// Event kind a callback handle was registered for
    pub fn kind_of(&self, handle: EventHandle) -> Option<EventKind> {
        self.handle_kinds.get(&handle).copied()
    }

    /// Record of a registered communicator
    pub fn get(&self, comm: CommHandle) -> Option<&CommunicatorRecord> {
        self.records.get(&comm)
    }

    pub fn is_registered(&self, comm: CommHandle) -> bool {
        self.records.contains_key(&comm)
    }

    /// Number of registered communicators
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Registered communicators, in no particular order
    pub fn communicators(&self) -> impl Iterator<Item = CommHandle> + '_ {
        self.records.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedInstrumentation, SimulatedRuntime};

    fn watched(instr: &SimulatedInstrumentation) -> Vec<(EventKind, EventDescriptor)> {
        vec![
            (
                EventKind::Activate,
                instr.query_event("PERUSE_COMM_REQ_ACTIVATE").unwrap(),
            ),
            (
                EventKind::Complete,
                instr.query_event("PERUSE_COMM_REQ_COMPLETE").unwrap(),
            ),
        ]
    }

    #[test]
    fn test_register_world_is_identity() {
        let runtime = SimulatedRuntime::new(2, 4);
        let mut instr = SimulatedInstrumentation::default();
        let mut registry = CommRegistry::new(watched(&instr));

        registry
            .register(runtime.world(), &runtime, &mut instr)
            .unwrap();

        for r in 0..4 {
            assert_eq!(registry.translate(runtime.world(), r).unwrap(), r as u32);
        }
        assert_eq!(instr.active_handles(runtime.world()).len(), 2);
    }

    #[test]
    fn test_register_subcommunicator_translates() {
        let mut runtime = SimulatedRuntime::new(1, 6);
        let mut instr = SimulatedInstrumentation::default();
        let mut registry = CommRegistry::new(watched(&instr));

        let odd = runtime.create_comm(vec![5, 3, 1]);
        registry.register(odd, &runtime, &mut instr).unwrap();

        assert_eq!(registry.translate(odd, 0).unwrap(), 5);
        assert_eq!(registry.translate(odd, 2).unwrap(), 1);
        assert!(matches!(
            registry.translate(odd, 3),
            Err(ProfilerError::TranslationError { local: 3, .. })
        ));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let runtime = SimulatedRuntime::new(0, 2);
        let mut instr = SimulatedInstrumentation::default();
        let mut registry = CommRegistry::new(watched(&instr));

        registry
            .register(runtime.world(), &runtime, &mut instr)
            .unwrap();
        let err = registry
            .register(runtime.world(), &runtime, &mut instr)
            .unwrap_err();

        assert!(matches!(err, ProfilerError::DuplicateRegistration(_)));
        // The original callbacks are untouched
        assert_eq!(instr.active_handles(runtime.world()).len(), 2);
    }

    #[test]
    fn test_unregister_releases_handles() {
        let runtime = SimulatedRuntime::new(0, 2);
        let mut instr = SimulatedInstrumentation::default();
        let mut registry = CommRegistry::new(watched(&instr));

        registry
            .register(runtime.world(), &runtime, &mut instr)
            .unwrap();
        registry.unregister(runtime.world(), &mut instr).unwrap();

        assert!(instr.active_handles(runtime.world()).is_empty());
        assert!(matches!(
            registry.translate(runtime.world(), 0),
            Err(ProfilerError::UnknownCommunicator(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_unknown_fails() {
        let mut instr = SimulatedInstrumentation::default();
        let mut registry = CommRegistry::new(watched(&instr));

        let err = registry.unregister(CommHandle(42), &mut instr).unwrap_err();
        assert!(matches!(err, ProfilerError::NotRegistered(CommHandle(42))));
    }

    #[test]
    fn test_failed_callback_registration_rolls_back() {
        let runtime = SimulatedRuntime::new(0, 2);
        let mut instr = SimulatedInstrumentation::default();
        let mut registry = CommRegistry::new(watched(&instr));
        instr.fail_registrations_after(1);

        let err = registry.register(runtime.world(), &runtime, &mut instr);
        assert!(err.is_err());
        assert!(!registry.is_registered(runtime.world()));
        assert_eq!(instr.active_count(), 0);
    }

    #[test]
    fn test_unknown_communicator_translation_fails() {
        let runtime = SimulatedRuntime::new(0, 2);
        let mut instr = SimulatedInstrumentation::default();
        let mut registry = CommRegistry::new(watched(&instr));

        assert!(matches!(
            registry.register(CommHandle(77), &runtime, &mut instr),
            Err(ProfilerError::TranslationError {
                comm: CommHandle(77),
                local: 0
            })
        ));
        assert!(matches!(
            registry.translate(CommHandle(77), 0),
            Err(ProfilerError::UnknownCommunicator(_))
        ));
    }

    #[test]
    fn test_kind_of_handle() {
        let runtime = SimulatedRuntime::new(0, 2);
        let mut instr = SimulatedInstrumentation::default();
        let mut registry = CommRegistry::new(watched(&instr));
        registry
            .register(runtime.world(), &runtime, &mut instr)
            .unwrap();

        let record = registry.get(runtime.world()).unwrap();
        let activate = record.handles()[&EventKind::Activate];
        let complete = record.handles()[&EventKind::Complete];
        assert_eq!(registry.kind_of(activate), Some(EventKind::Activate));
        assert_eq!(registry.kind_of(complete), Some(EventKind::Complete));
        assert_eq!(registry.kind_of(EventHandle(9999)), None);
    }

    #[test]
    fn test_release_all() {
        let mut runtime = SimulatedRuntime::new(0, 4);
        let mut instr = SimulatedInstrumentation::default();
        let mut registry = CommRegistry::new(watched(&instr));

        let sub = runtime.create_comm(vec![0, 1]);
        registry
            .register(runtime.world(), &runtime, &mut instr)
            .unwrap();
        registry.register(sub, &runtime, &mut instr).unwrap();

        assert_eq!(registry.release_all(&mut instr), 2);
        assert_eq!(instr.active_count(), 0);
        assert!(registry.is_empty());
    }
}
