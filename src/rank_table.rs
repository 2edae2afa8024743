//! Local-to-global rank translation for one communicator

use crate::error::{ProfilerError, Result};
use crate::instrument::MessagingRuntime;
use crate::types::{CommHandle, Rank};

/// World rank of every member of a communicator, indexed by local rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankTable {
    world_ranks: Vec<Rank>,
}

impl RankTable {
    /// Create a table from world ranks listed in local-rank order
    pub fn new(world_ranks: Vec<Rank>) -> Self {
        Self { world_ranks }
    }

    /// Table of a communicator whose local ranks equal world ranks
    pub fn identity(size: u32) -> Self {
        Self::new((0..size).collect())
    }

    /// Build the table of `comm` from the runtime's group primitives
    ///
    /// Queries the communicator size, asks the runtime to translate local
    /// ranks `0..size` into the world group, and checks that one world rank
    /// came back per member. Every failure is a `TranslationError` naming the
    /// first local rank left without a world rank.
    pub fn build<R: MessagingRuntime + ?Sized>(runtime: &R, comm: CommHandle) -> Result<Self> {
        let size = runtime.comm_size(comm).map_err(|e| {
            tracing::warn!("cannot query size of {}: {}", comm, e);
            ProfilerError::TranslationError { comm, local: 0 }
        })?;
        let local: Vec<u32> = (0..size).collect();

        let world_ranks = runtime
            .translate_to_world(comm, &local)
            .map_err(|e| {
                tracing::warn!("rank translation failed for {}: {}", comm, e);
                ProfilerError::TranslationError { comm, local: 0 }
            })?;

        if world_ranks.len() != local.len() {
            tracing::warn!(
                "{} has {} members but {} world ranks came back",
                comm,
                local.len(),
                world_ranks.len()
            );
            // Extra world ranks are blamed on the last member
            let first_missing = world_ranks.len().min(local.len().saturating_sub(1));
            return Err(ProfilerError::TranslationError {
                comm,
                local: i32::try_from(first_missing).unwrap_or(i32::MAX),
            });
        }

        Ok(Self::new(world_ranks))
    }

    /// World rank of local rank `local`, `None` when out of range
    pub fn translate(&self, local: i32) -> Option<Rank> {
        usize::try_from(local)
            .ok()
            .and_then(|idx| self.world_ranks.get(idx).copied())
    }

    /// Number of members
    pub fn size(&self) -> usize {
        self.world_ranks.len()
    }

    /// World ranks in local-rank order
    pub fn world_ranks(&self) -> &[Rank] {
        &self.world_ranks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedRuntime, WORLD};

    /// Runtime whose group translation drops its last answer
    struct ShortTranslation(SimulatedRuntime);

    impl MessagingRuntime for ShortTranslation {
        fn world_rank(&self) -> Rank {
            self.0.world_rank()
        }
        fn world_size(&self) -> u32 {
            self.0.world_size()
        }
        fn processor_name(&self) -> String {
            self.0.processor_name()
        }
        fn world(&self) -> CommHandle {
            self.0.world()
        }
        fn self_comm(&self) -> CommHandle {
            self.0.self_comm()
        }
        fn comm_size(&self, comm: CommHandle) -> Result<u32> {
            self.0.comm_size(comm)
        }
        fn translate_to_world(&self, comm: CommHandle, local_ranks: &[u32]) -> Result<Vec<Rank>> {
            let mut ranks = self.0.translate_to_world(comm, local_ranks)?;
            ranks.pop();
            Ok(ranks)
        }
        fn now_ns(&self) -> u64 {
            self.0.now_ns()
        }
    }

    #[test]
    fn test_build_from_runtime() {
        let mut runtime = SimulatedRuntime::new(0, 8);
        let comm = runtime.create_comm(vec![6, 2, 4]);
        let table = RankTable::build(&runtime, comm).unwrap();
        assert_eq!(table.world_ranks(), &[6, 2, 4]);
        assert_eq!(RankTable::build(&runtime, WORLD).unwrap(), RankTable::identity(8));
    }

    #[test]
    fn test_build_unknown_communicator() {
        let runtime = SimulatedRuntime::new(0, 2);
        let err = RankTable::build(&runtime, CommHandle(42)).unwrap_err();
        assert!(matches!(
            err,
            ProfilerError::TranslationError {
                comm: CommHandle(42),
                local: 0
            }
        ));
    }

    #[test]
    fn test_build_short_translation_names_missing_rank() {
        let runtime = ShortTranslation(SimulatedRuntime::new(0, 4));
        let err = RankTable::build(&runtime, WORLD).unwrap_err();
        assert!(matches!(
            err,
            ProfilerError::TranslationError { comm: WORLD, local: 3 }
        ));
    }

    #[test]
    fn test_identity_translation() {
        let table = RankTable::identity(4);
        for r in 0..4 {
            assert_eq!(table.translate(r), Some(r as u32));
        }
        assert_eq!(table.size(), 4);
    }

    #[test]
    fn test_permutation_translation() {
        let table = RankTable::new(vec![3, 1, 0, 2]);
        assert_eq!(table.translate(0), Some(3));
        assert_eq!(table.translate(3), Some(2));
        // Repeated lookups are stable
        assert_eq!(table.translate(0), table.translate(0));
    }

    #[test]
    fn test_out_of_range_and_negative() {
        let table = RankTable::new(vec![5, 6]);
        assert_eq!(table.translate(2), None);
        assert_eq!(table.translate(-1), None);
        assert_eq!(table.translate(i32::MIN), None);
    }

    #[test]
    fn test_empty_table() {
        let table = RankTable::new(Vec::new());
        assert_eq!(table.size(), 0);
        assert_eq!(table.translate(0), None);
    }
}
