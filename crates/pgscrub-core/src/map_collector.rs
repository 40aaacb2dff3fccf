//! C5: `MapCollector` — tracks who we're still waiting on for the current
//! chunk and aggregates the maps as they arrive.

use std::collections::BTreeSet;

use pgscrub_types::{Epoch, ShardId};

use crate::host::{ScrubMap, ScrubMapSet};

/// Result of feeding one incoming `RepScrubMap` to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorOutcome {
    /// Map accepted, still waiting on at least one more shard.
    StillWaiting,
    /// Map accepted and it was the last one outstanding.
    AllReceived,
    /// Dropped: the message's epoch is older than the PG's current interval
    /// (P6).
    Stale,
}

/// Collects per-chunk maps for one scrub round (§4.5).
pub struct MapCollector {
    awaiting: BTreeSet<ShardId>,
    received: ScrubMapSet,
    any_preempted: bool,
}

impl MapCollector {
    /// Starts a round awaiting every shard in `acting_recovery_backfill`.
    #[must_use]
    pub fn new(expected: &[ShardId]) -> Self {
        Self {
            awaiting: expected.iter().copied().collect(),
            received: ScrubMapSet::new(),
            any_preempted: false,
        }
    }

    /// Records our own locally built map and marks ourselves as no longer
    /// awaited (`markLocalMapReady`).
    pub fn accept_local(&mut self, whoami: ShardId, map: ScrubMap) {
        self.received.insert(whoami, map);
        self.awaiting.remove(&whoami);
    }

    /// Processes an incoming replica map. `current_epoch` is the PG's
    /// current `sameIntervalSince`, used to drop stale replies.
    pub fn accept_remote(
        &mut self,
        from: ShardId,
        msg_epoch: Epoch,
        current_epoch: Epoch,
        preempted: bool,
        map: ScrubMap,
    ) -> CollectorOutcome {
        if msg_epoch < current_epoch {
            tracing::debug!(%from, "dropped stale scrub map reply");
            return CollectorOutcome::Stale;
        }
        if preempted {
            self.any_preempted = true;
        }
        self.received.insert(from, map);
        self.awaiting.remove(&from);
        if self.awaiting.is_empty() {
            CollectorOutcome::AllReceived
        } else {
            CollectorOutcome::StillWaiting
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.awaiting.is_empty()
    }

    #[must_use]
    pub fn awaiting(&self) -> &BTreeSet<ShardId> {
        &self.awaiting
    }

    #[must_use]
    pub fn any_preempted(&self) -> bool {
        self.any_preempted
    }

    /// Hands the accumulated maps to the caller for comparison (§4.8),
    /// consuming the collector.
    #[must_use]
    pub fn into_maps(self) -> ScrubMapSet {
        self.received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ScrubMap;

    fn shards(raw: &[u32]) -> Vec<ShardId> {
        raw.iter().map(|n| ShardId::new(*n)).collect()
    }

    #[test]
    fn local_completion_removes_self_from_awaiting() {
        let mut c = MapCollector::new(&shards(&[0, 1]));
        c.accept_local(ShardId::new(0), ScrubMap::default());
        assert!(!c.is_complete());
        assert!(!c.awaiting().contains(&ShardId::new(0)));
    }

    #[test]
    fn all_received_fires_when_last_awaited_shard_responds() {
        let mut c = MapCollector::new(&shards(&[0, 1]));
        c.accept_local(ShardId::new(0), ScrubMap::default());
        let outcome = c.accept_remote(ShardId::new(1), Epoch::new(5), Epoch::new(5), false, ScrubMap::default());
        assert_eq!(outcome, CollectorOutcome::AllReceived);
        assert!(c.is_complete());
    }

    #[test]
    fn stale_epoch_reply_is_dropped_and_does_not_advance_awaiting() {
        let mut c = MapCollector::new(&shards(&[0, 1]));
        let outcome = c.accept_remote(ShardId::new(1), Epoch::new(3), Epoch::new(5), false, ScrubMap::default());
        assert_eq!(outcome, CollectorOutcome::Stale);
        assert!(c.awaiting().contains(&ShardId::new(1)));
    }

    #[test]
    fn preempted_reply_is_recorded_but_round_still_completes() {
        let mut c = MapCollector::new(&shards(&[0, 1]));
        c.accept_local(ShardId::new(0), ScrubMap::default());
        let outcome = c.accept_remote(ShardId::new(1), Epoch::new(5), Epoch::new(5), true, ScrubMap::default());
        assert_eq!(outcome, CollectorOutcome::AllReceived);
        assert!(c.any_preempted());
    }

    #[test]
    fn into_maps_returns_everything_collected() {
        let mut c = MapCollector::new(&shards(&[0]));
        c.accept_local(ShardId::new(0), ScrubMap::default());
        let maps = c.into_maps();
        assert_eq!(maps.len(), 1);
    }
}
