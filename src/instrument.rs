//! Boundaries to the instrumentation layer and the messaging runtime
//!
//! The engine never talks to a concrete communication library. It sees the
//! instrumentation layer through [`Instrumentation`] (event discovery and
//! callback registration), the runtime through [`MessagingRuntime`] (group
//! queries, rank translation and timestamps), and receives callbacks through
//! [`NotificationHandler`]. [`crate::simulated`] provides in-process
//! implementations of all three sides.

use crate::error::Result;
use crate::types::{CommHandle, EventDescriptor, EventHandle, Notification, Rank};

/// Callback registration interface of the instrumentation layer
pub trait Instrumentation {
    /// Bring up the instrumentation layer
    fn init(&mut self) -> Result<()>;

    /// Look up a named event kind, `None` if unsupported
    fn query_event(&self, name: &str) -> Option<EventDescriptor>;

    /// Register and activate a callback for `event` on `comm`
    fn register(&mut self, event: EventDescriptor, comm: CommHandle) -> Result<EventHandle>;

    /// Deactivate a callback and release its handle
    fn deactivate_and_release(&mut self, handle: EventHandle) -> Result<()>;
}

/// Group, rank and clock primitives of the messaging runtime
pub trait MessagingRuntime {
    /// Rank of this process in the world communicator
    fn world_rank(&self) -> Rank;

    /// Number of processes in the world communicator
    fn world_size(&self) -> u32;

    /// Host name reported in the result document
    fn processor_name(&self) -> String;

    /// Handle of the world communicator
    fn world(&self) -> CommHandle;

    /// Handle of the communicator containing only this process
    fn self_comm(&self) -> CommHandle;

    /// Number of members of `comm`
    fn comm_size(&self, comm: CommHandle) -> Result<u32>;

    /// Translate local ranks of `comm` into world ranks
    fn translate_to_world(&self, comm: CommHandle, local_ranks: &[u32]) -> Result<Vec<Rank>>;

    /// Current timestamp in nanoseconds
    fn now_ns(&self) -> u64;
}

/// The two callbacks an instrumentation source delivers
///
/// Implemented by [`crate::engine::Engine`] and [`crate::shared::SharedEngine`].
pub trait NotificationHandler {
    /// An operation was posted
    fn notify_begin(&mut self, notification: &Notification);

    /// An operation completed
    fn notify_end(&mut self, notification: &Notification);
}
