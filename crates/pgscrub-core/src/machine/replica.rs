//! Replica-path transition table (§4.2 "Replica path states").

use super::{MachineState, ScrubEvent, ScrubMachine, Transition};

/// Replica-path state tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaPhase {
    /// Just opened by `startReplica`, about to enter `BuildMap` (§4.2
    /// "`ReplicaIdle` ← `StartReplica` from `NotActive`").
    Idle,
    BuildMap,
    SendMap,
}

impl ScrubMachine {
    pub(super) fn apply_replica(&mut self, _phase: ReplicaPhase, _event: ScrubEvent) -> Transition {
        // None of the named events (`SchedReplica` included — it's only
        // relevant to a *new* replica session, handled by `PgScrubber`
        // before a machine exists) drive a transition out of a replica
        // phase on their own; every forward step is a same-tick
        // continuation (`begin_replica_build`, `on_local_map_built`,
        // `on_build_in_progress`).
        Transition::Stay
    }

    /// `ReplicaIdle` → `ReplicaActive.BuildMap`: begins building the
    /// replica-local map (§4.2).
    ///
    /// # Panics
    ///
    /// Panics if called while not in `Replica(Idle)`.
    pub fn begin_replica_build(&mut self) -> Transition {
        assert_eq!(self.state(), MachineState::Replica(ReplicaPhase::Idle), "begin_replica_build called outside Idle");
        self.set_replica_phase(ReplicaPhase::BuildMap);
        Transition::BuildLocalMap
    }

    fn set_replica_phase(&mut self, phase: ReplicaPhase) {
        self.state = MachineState::Replica(phase);
    }
}
