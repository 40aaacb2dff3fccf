//! Primary-path transition table (§4.2 "Primary path states").

use pgscrub_types::ObjectKey;

use super::{MachineState, ScrubEvent, ScrubMachine, Transition};

/// Primary-path state tags, in order of progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryPhase {
    ReservingReplicas,
    PendingTimer,
    NewChunk,
    WaitPushes,
    WaitLastUpdate,
    BuildMap,
    DrainReplMaps,
    WaitDigestUpdates,
}

impl ScrubMachine {
    pub(super) fn apply_primary(&mut self, phase: PrimaryPhase, event: ScrubEvent) -> Transition {
        match (phase, event) {
            (PrimaryPhase::ReservingReplicas, ScrubEvent::RemotesReserved) => {
                self.set_primary_phase(PrimaryPhase::PendingTimer);
                Transition::ScheduleChunkSleep
            }
            (PrimaryPhase::ReservingReplicas, ScrubEvent::ReservationFailure) => {
                self.terminal_cleanup();
                Transition::ReleaseReservationsAndStop
            }

            (PrimaryPhase::PendingTimer, ScrubEvent::InternalSchedScrub | ScrubEvent::SchedScrub) => {
                self.set_primary_phase(PrimaryPhase::NewChunk);
                Transition::SelectChunk
            }

            (PrimaryPhase::WaitPushes, ScrubEvent::ActivePushesUpd) => {
                self.set_primary_phase(PrimaryPhase::WaitLastUpdate);
                Transition::ComputeLastUpdate
            }

            (PrimaryPhase::WaitLastUpdate, ScrubEvent::UpdatesApplied) => {
                self.set_primary_phase(PrimaryPhase::BuildMap);
                Transition::BuildLocalMap
            }

            (PrimaryPhase::DrainReplMaps, ScrubEvent::GotReplicas) => {
                self.set_primary_phase(PrimaryPhase::WaitDigestUpdates);
                Transition::CompareAndAwaitDigests
            }

            (PrimaryPhase::WaitDigestUpdates, ScrubEvent::DigestUpdate { pending_digests }) => {
                if pending_digests > 0 {
                    return Transition::Stay;
                }
                if self.chunk_end_is_max() {
                    Transition::FinishSession
                } else {
                    self.set_primary_phase(PrimaryPhase::PendingTimer);
                    Transition::ScheduleChunkSleep
                }
            }

            // SchedScrub/AfterRecoveryScrub/Unblocked arriving in a state
            // that doesn't name them are late or redundant planner ticks;
            // the session is already making forward progress.
            _ => Transition::Stay,
        }
    }

    fn set_primary_phase(&mut self, phase: PrimaryPhase) {
        self.state = MachineState::Primary(phase);
    }

    fn chunk_end_is_max(&self) -> bool {
        self.chunk_end().is_max()
    }

    /// `NewChunk` picked `end` successfully (§4.6): records it, clears the
    /// preemption flag for the new chunk, and moves to `WaitPushes`.
    ///
    /// # Panics
    ///
    /// Panics if called while not in `Primary(NewChunk)` — this is an
    /// internal continuation, never reachable from an externally posted
    /// event.
    pub fn on_chunk_selected(&mut self, end: ObjectKey) -> Transition {
        assert_eq!(self.state(), MachineState::Primary(PrimaryPhase::NewChunk), "on_chunk_selected called outside NewChunk");
        self.set_chunk_bounds(end);
        self.preemption_mut().reset_for_new_chunk();
        self.set_primary_phase(PrimaryPhase::WaitPushes);
        Transition::IssueMapRequests
    }

    /// `NewChunk` found the candidate range blocked by a writer (§4.6):
    /// abandon this attempt, return to `PendingTimer`.
    ///
    /// # Panics
    ///
    /// Panics if called while not in `Primary(NewChunk)`.
    pub fn on_range_unavailable(&mut self) -> Transition {
        assert_eq!(self.state(), MachineState::Primary(PrimaryPhase::NewChunk), "on_range_unavailable called outside NewChunk");
        self.set_primary_phase(PrimaryPhase::PendingTimer);
        Transition::ScheduleChunkSleep
    }

}
