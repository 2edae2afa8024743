//! Engine shared between callback threads
//!
//! Some runtimes deliver completion callbacks from a progress thread while
//! the application thread posts new operations. [`SharedEngine`] puts the
//! whole engine behind one mutex held for the duration of each call, so the
//! registry, in-flight table and aggregator always change together.

use crate::engine::{Disposition, Engine, EngineState, ShutdownReport};
use crate::error::Result;
use crate::instrument::{Instrumentation, MessagingRuntime, NotificationHandler};
use crate::stats::AggregateStatistics;
use crate::types::{CommHandle, EventHandle, Notification};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cloneable handle to an [`Engine`] behind a coarse lock
pub struct SharedEngine<R, I> {
    inner: Arc<Mutex<Engine<R, I>>>,
}

impl<R, I> Clone for SharedEngine<R, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, I> SharedEngine<R, I>
where
    R: MessagingRuntime,
    I: Instrumentation,
{
    pub fn new(engine: Engine<R, I>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    // A panic inside a callback must not disable profiling for the other
    // threads, so a poisoned lock is recovered.
    fn lock(&self) -> MutexGuard<'_, Engine<R, I>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the engine
    pub fn with<T>(&self, f: impl FnOnce(&mut Engine<R, I>) -> T) -> T {
        f(&mut self.lock())
    }

    pub fn initialize(&self) -> Result<()> {
        self.lock().initialize()
    }

    pub fn register_communicator(&self, comm: CommHandle) -> Result<()> {
        self.lock().register_communicator(comm)
    }

    pub fn unregister_communicator(&self, comm: CommHandle) -> Result<()> {
        self.lock().unregister_communicator(comm)
    }

    pub fn on_begin(&self, notification: &Notification) -> Disposition {
        self.lock().on_begin(notification)
    }

    pub fn on_end(&self, notification: &Notification) -> Disposition {
        self.lock().on_end(notification)
    }

    pub fn on_event(&self, handle: EventHandle, notification: &Notification) -> Disposition {
        self.lock().on_event(handle, notification)
    }

    pub fn mark_phase(&self) -> usize {
        self.lock().mark_phase()
    }

    pub fn snapshot(&self) -> AggregateStatistics {
        self.lock().snapshot()
    }

    pub fn state(&self) -> EngineState {
        self.lock().state()
    }

    pub fn shutdown(&self) -> Result<ShutdownReport> {
        self.lock().shutdown()
    }
}

impl<R, I> NotificationHandler for SharedEngine<R, I>
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
