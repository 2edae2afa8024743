//! Opaque handles and notification payloads shared across the engine
//!
//! Communicator, event and request handles are compared by identity only:
//! they derive `Eq` and `Hash` so they can key hash maps, but no ordering is
//! implied by their numeric value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Global (world) rank of a process
pub type Rank = u32;

/// Local peer value used by the runtime for "any source" receives
pub const ANY_SOURCE: i32 = -1;

/// Opaque communicator handle supplied by the messaging runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommHandle(pub u64);

impl fmt::Display for CommHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "comm#{}", self.0)
    }
}

/// Callback handle returned by the instrumentation layer on registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventHandle(pub u64);

impl fmt::Display for EventHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event#{}", self.0)
    }
}

/// Descriptor the instrumentation layer hands out for a supported event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventDescriptor(pub i32);

/// Runtime-assigned identifier of one in-flight operation
///
/// Only unique while the operation is outstanding; the runtime may hand the
/// same value out again once the operation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a point-to-point operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Recv,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "send"),
            Direction::Recv => write!(f, "recv"),
        }
    }
}

/// Event kinds the engine watches on every registered communicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Operation posted (begin notification)
    Activate,
    /// Operation completed (end notification)
    Complete,
}

/// Key of the in-flight table: each direction has its own id namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub direction: Direction,
    pub id: RequestId,
}

impl RequestKey {
    pub fn new(direction: Direction, id: RequestId) -> Self {
        Self { direction, id }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.direction, self.id)
    }
}

/// Payload delivered with a begin or end callback
///
/// Mirrors what the instrumentation layer reports about the operation: the
/// communicator it runs on, the communicator-local peer, and the datatype
/// extent and element count from which the byte length is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub request_id: RequestId,
    pub comm: CommHandle,
    pub operation: Direction,
    /// Communicator-local peer rank (negative for wildcard receives)
    pub peer: i32,
    pub count: u64,
    pub datatype_size: u64,
    pub tag: i32,
}

impl Notification {
    /// Notification for a send of `bytes` bytes (datatype extent 1)
    pub fn send(request_id: u64, comm: CommHandle, peer: i32, bytes: u64, tag: i32) -> Self {
        Self {
            request_id: RequestId(request_id),
            comm,
            operation: Direction::Send,
            peer,
            count: bytes,
            datatype_size: 1,
            tag,
        }
    }

    /// Notification for a receive of `bytes` bytes (datatype extent 1)
    pub fn recv(request_id: u64, comm: CommHandle, peer: i32, bytes: u64, tag: i32) -> Self {
        Self {
            operation: Direction::Recv,
            ..Self::send(request_id, comm, peer, bytes, tag)
        }
    }

    /// Replace the element count and datatype extent
    pub fn with_datatype(mut self, count: u64, datatype_size: u64) -> Self {
        self.count = count;
        self.datatype_size = datatype_size;
        self
    }

    /// Payload size in bytes (count × datatype extent)
    pub fn byte_len(&self) -> u64 {
        self.count.saturating_mul(self.datatype_size)
    }

    /// Key of this operation in the in-flight table
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.operation, self.request_id)
    }
}
