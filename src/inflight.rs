//! Table of operations that have begun but not yet completed
//!
//! Keys are only meaningful while an operation is open: the runtime reuses
//! identifiers after completion, so an entry is removed the moment its end
//! notification is matched. Inserting a key that is still open and removing
//! a key that is not open are both contract violations reported to the
//! caller; neither ever overwrites or fabricates an entry.

use crate::error::{ProfilerError, Result};
use crate::types::{CommHandle, Direction, Rank, RequestId, RequestKey};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

/// State captured when an operation begins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightOperation {
    pub request_id: RequestId,
    pub direction: Direction,
    pub comm: CommHandle,
    /// Communicator-local peer as reported at begin
    pub local_peer: i32,
    /// World rank of the peer, `None` for wildcard receives until completion
    pub peer: Option<Rank>,
    /// Payload size in bytes, computed once at begin
    pub len: u64,
    pub tag: i32,
    /// Begin timestamp (ns)
    pub start_ns: u64,
}

impl InFlightOperation {
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.direction, self.request_id)
    }
}

/// A begin/end pair that has been correlated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedOperation {
    pub request_id: RequestId,
    pub direction: Direction,
    pub comm: CommHandle,
    /// World rank of the peer
    pub peer: Rank,
    pub len: u64,
    pub tag: i32,
    pub start_ns: u64,
    pub end_ns: u64,
}

impl MatchedOperation {
    /// Time between begin and end (ns)
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Removed entry stamped with its end time; the peer may still be unresolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub operation: InFlightOperation,
    pub end_ns: u64,
}

impl Completion {
    /// Resolve into a matched operation, using `fallback_peer` when the begin
    /// half did not know its peer (wildcard receive)
    pub fn resolve(self, fallback_peer: Option<Rank>) -> Option<MatchedOperation> {
        let op = self.operation;
        let peer = op.peer.or(fallback_peer)?;
        Some(MatchedOperation {
            request_id: op.request_id,
            direction: op.direction,
            comm: op.comm,
            peer,
            len: op.len,
            tag: op.tag,
            start_ns: op.start_ns,
            end_ns: self.end_ns,
        })
    }
}

/// Open operations keyed by (direction, request id)
#[derive(Debug, Default)]
pub struct InFlightTable {
    open: FnvHashMap<RequestKey, InFlightOperation>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the begin of an operation
    ///
    /// # Errors
    ///
    /// `CorrelationConflict` if an operation with the same key is still open;
    /// the open entry is left untouched.
    pub fn begin(&mut self, operation: InFlightOperation) -> Result<()> {
        let key = operation.key();
        match self.open.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => {
                Err(ProfilerError::CorrelationConflict(key))
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(operation);
                Ok(())
            }
        }
    }

    /// Remove the open operation for `key` and stamp it with `end_ns`
    ///
    /// # Errors
    ///
    /// `UnmatchedCompletion` if no operation with this key is open.
    pub fn end(&mut self, key: RequestKey, end_ns: u64) -> Result<Completion> {
        self.open
            .remove(&key)
            .map(|operation| Completion { operation, end_ns })
            .ok_or(ProfilerError::UnmatchedCompletion(key))
    }

    /// Whether `key` is currently open
    pub fn contains(&self, key: &RequestKey) -> bool {
        self.open.contains_key(key)
    }

    /// Number of open operations
    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Remove every open operation, oldest first
    pub fn drain(&mut self) -> Vec<InFlightOperation> {
        let mut leaked: Vec<InFlightOperation> = self.open.drain().map(|(_, op)| op).collect();
        leaked.sort_by_key(|op| (op.start_ns, op.request_id.0));
        leaked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: u64, direction: Direction, peer: Rank, len: u64, start_ns: u64) -> InFlightOperation {
        InFlightOperation {
            request_id: RequestId(id),
            direction,
            comm: CommHandle(0),
            local_peer: peer as i32,
            peer: Some(peer),
            len,
            tag: 0,
            start_ns,
        }
    }

    #[test]
    fn test_begin_then_end_matches() {
        let mut table = InFlightTable::new();
        table.begin(op(1, Direction::Send, 3, 128, 10)).unwrap();
        assert_eq!(table.len(), 1);

        let matched = table
            .end(RequestKey::new(Direction::Send, RequestId(1)), 25)
            .unwrap()
            .resolve(None)
            .unwrap();

        assert_eq!(matched.peer, 3);
        assert_eq!(matched.len, 128);
        assert_eq!(matched.duration_ns(), 15);
        assert!(table.is_empty());
    }

    #[test]
    fn test_conflicting_begin_keeps_original() {
        let mut table = InFlightTable::new();
        table.begin(op(7, Direction::Send, 1, 10, 0)).unwrap();

        let err = table.begin(op(7, Direction::Send, 2, 99, 5)).unwrap_err();
        assert!(matches!(err, ProfilerError::CorrelationConflict(_)));

        let matched = table
            .end(RequestKey::new(Direction::Send, RequestId(7)), 9)
            .unwrap()
            .resolve(None)
            .unwrap();
        assert_eq!(matched.peer, 1);
        assert_eq!(matched.len, 10);
    }

    #[test]
    fn test_end_twice_is_unmatched() {
        let mut table = InFlightTable::new();
        let key = RequestKey::new(Direction::Send, RequestId(4));
        table.begin(op(4, Direction::Send, 1, 10, 0)).unwrap();

        assert!(table.end(key, 1).is_ok());
        assert!(matches!(
            table.end(key, 2),
            Err(ProfilerError::UnmatchedCompletion(k)) if k == key
        ));
    }

    #[test]
    fn test_directions_are_separate_namespaces() {
        let mut table = InFlightTable::new();
        table.begin(op(5, Direction::Send, 1, 10, 0)).unwrap();
        table.begin(op(5, Direction::Recv, 2, 20, 0)).unwrap();
        assert_eq!(table.len(), 2);

        let recv = table
            .end(RequestKey::new(Direction::Recv, RequestId(5)), 3)
            .unwrap()
            .resolve(None)
            .unwrap();
        assert_eq!(recv.len, 20);
        assert!(table.contains(&RequestKey::new(Direction::Send, RequestId(5))));
    }

    #[test]
    fn test_identifier_reuse_after_completion() {
        let mut table = InFlightTable::new();
        let key = RequestKey::new(Direction::Send, RequestId(5));

        table.begin(op(5, Direction::Send, 1, 100, 0)).unwrap();
        let first = table.end(key, 10).unwrap().resolve(None).unwrap();

        table.begin(op(5, Direction::Send, 2, 300, 20)).unwrap();
        let second = table.end(key, 30).unwrap().resolve(None).unwrap();

        assert_eq!((first.peer, first.len), (1, 100));
        assert_eq!((second.peer, second.len), (2, 300));
    }

    #[test]
    fn test_wildcard_peer_resolves_at_completion() {
        let mut table = InFlightTable::new();
        let mut pending = op(2, Direction::Recv, 0, 64, 0);
        pending.peer = None;
        pending.local_peer = crate::types::ANY_SOURCE;
        table.begin(pending).unwrap();

        let completion = table
            .end(RequestKey::new(Direction::Recv, RequestId(2)), 5)
            .unwrap();
        assert!(completion.clone().resolve(None).is_none());
        assert_eq!(completion.resolve(Some(3)).unwrap().peer, 3);
    }

    #[test]
    fn test_drain_returns_oldest_first() {
        let mut table = InFlightTable::new();
        table.begin(op(1, Direction::Send, 1, 10, 30)).unwrap();
        table.begin(op(2, Direction::Send, 1, 10, 10)).unwrap();
        table.begin(op(3, Direction::Recv, 1, 10, 20)).unwrap();

        let leaked = table.drain();
        let ids: Vec<u64> = leaked.iter().map(|op| op.request_id.0).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert!(table.is_empty());
    }
}
