//! C7: `ScrubMachine` — the session state machine (Primary + Replica).
//!
//! Follows the FCIS split the VSR engine uses for its own replica state:
//! this module holds pure state and a flat `(state × event) → transition`
//! table, split across `primary.rs` and `replica.rs` the way the VSR engine
//! splits `normal.rs`/`view_change.rs` off of `replica/state.rs`. No I/O
//! happens here — `apply` and its helper
//! continuations return a [`Transition`] describing what the caller
//! (`PgScrubber`, C8) must do next; the hierarchical "on any state,
//! `EpochChanged` ⇒ `NotActive`" behavior from the source becomes the
//! pre-dispatch filter at the top of [`ScrubMachine::apply`].

mod primary;
mod replica;

use pgscrub_types::{Epoch, ObjectKey, PgId, ScrubPriority, ShardId, Version};

use crate::preemption::PreemptionState;

pub use primary::PrimaryPhase;
pub use replica::ReplicaPhase;

/// Tagged state (§9 design note: "a tagged variant per state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    NotActive,
    Primary(PrimaryPhase),
    Replica(ReplicaPhase),
}

/// The externally posted event set (§4.2 `Events`). Internal same-tick
/// continuations (a chunk being selected, a map-build slice finishing) are
/// not events — they're dedicated methods below, since nothing outside this
/// crate observes them as separate occurrences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrubEvent {
    /// Named for parity with §4.2's event list; never passed to `apply` —
    /// opening a session needs payload (`epoch`, `deep`, flags) that a
    /// unit variant can't carry, so `PgScrubber` calls
    /// [`ScrubMachine::start_primary`] directly instead.
    StartScrub,
    /// See `StartScrub` — superseded by [`ScrubMachine::start_replica`].
    StartReplica,
    AfterRecoveryScrub,
    Unblocked,
    SchedScrub,
    InternalSchedScrub,
    SchedReplica,
    ActivePushesUpd,
    UpdatesApplied,
    DigestUpdate { pending_digests: usize },
    EpochChanged,
    GotReplicas,
    RemotesReserved,
    ReservationFailure,
    FullReset,
}

/// What the caller must do as a result of an `apply`/continuation call. Each
/// variant names an I/O-shaped action against `PgHost`/`OsdServices`/
/// `Scheduler`; executing it and feeding the result back (as an event or a
/// continuation call) is `PgScrubber`'s job, never this module's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No externally visible change; the event was irrelevant or a no-op in
    /// this state.
    Stay,
    /// Opened a Primary session: request replica reservations (C4).
    RequestReplicaReservations,
    /// All reservations settled; releases whatever C4/C2/C3 state remains
    /// and returns to `NotActive` (reservation rejected, or the session was
    /// cancelled before a chunk was ever selected).
    ReleaseReservationsAndStop,
    /// Enter `PendingTimer`: schedule the inter-chunk sleep via C9.
    ScheduleChunkSleep,
    /// Enter `NewChunk`: run C6 and report back via `on_chunk_selected` /
    /// `on_range_unavailable`.
    SelectChunk,
    /// A chunk was picked: issue `RepScrubRequest` to self and every
    /// replica, then wait for pending writes to settle.
    IssueMapRequests,
    /// Compute `subsetLastUpdate` from the PG log and wait for
    /// `lastUpdateApplied` to catch up.
    ComputeLastUpdate,
    /// Build (or continue building) the local primary or replica map.
    BuildLocalMap,
    /// Wait for replica maps via C5 until `awaiting` empties.
    AwaitReplicaMaps,
    /// All maps are in: run §4.8 comparison, then wait for the resulting
    /// digest writes to apply.
    CompareAndAwaitDigests,
    /// The session's last chunk just finished: run `scrubFinish` and return
    /// to `NotActive`.
    FinishSession,
    /// Ship the locally built replica map (or preemption notice) back to
    /// the primary, then return to `NotActive`.
    SendReplicaMap,
    /// The event named a transition that does not exist from the current
    /// state — dropped and logged, never a panic (only hard invariant
    /// violations observed elsewhere in this crate panic).
    Rejected,
}

/// Per-session flags (§3 `flags`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrubFlags {
    pub priority: ScrubPriority,
    pub marked_must: bool,
    pub auto_repair: bool,
    pub check_repair: bool,
    pub deep_scrub_on_error: bool,
}

/// Per-session running tallies (§3 `statistics`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrubStats {
    pub shallow_errors: usize,
    pub deep_errors: usize,
    pub fixed_count: usize,
}

/// Per-chunk error bookkeeping (§3 "error bookkeeping"), cleared at terminal
/// cleanup (P4).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorSets {
    pub missing: Vec<ObjectKey>,
    pub inconsistent: Vec<ObjectKey>,
    pub authoritative: std::collections::BTreeMap<ObjectKey, Vec<ShardId>>,
}

impl ErrorSets {
    fn clear(&mut self) {
        self.missing.clear();
        self.inconsistent.clear();
        self.authoritative.clear();
    }

    #[must_use]
    pub fn total_errors(&self) -> usize {
        self.missing.len() + self.inconsistent.len()
    }
}

/// The pure session state (§3 `ScrubSession`), one per `PgScrubber`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubMachine {
    pg: PgId,
    state: MachineState,
    is_deep: bool,
    epoch_start: Epoch,
    epoch_queued: Epoch,
    chunk_start: ObjectKey,
    chunk_end: ObjectKey,
    max_end: ObjectKey,
    subset_last_update: Version,
    flags: ScrubFlags,
    stats: ScrubStats,
    errors: ErrorSets,
    preemption: PreemptionState,
}

impl ScrubMachine {
    /// A freshly constructed, inactive machine for `pg`. `chunk_divisor`
    /// bounds start at `max_preemptions` (C1); the session proper begins
    /// once `apply(StartScrub)` or `apply(StartReplica)` is called.
    #[must_use]
    pub fn new(pg: PgId, max_preemptions: u32) -> Self {
        Self {
            pg,
            state: MachineState::NotActive,
            is_deep: false,
            epoch_start: Epoch::none(),
            epoch_queued: Epoch::none(),
            chunk_start: ObjectKey::head(""),
            chunk_end: ObjectKey::head(""),
            max_end: ObjectKey::head(""),
            subset_last_update: Version::new(Epoch::none(), 0),
            flags: ScrubFlags::default(),
            stats: ScrubStats::default(),
            errors: ErrorSets::default(),
            preemption: PreemptionState::new(max_preemptions),
        }
    }

    #[must_use]
    pub fn pg(&self) -> PgId {
        self.pg
    }

    #[must_use]
    pub fn state(&self) -> MachineState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state != MachineState::NotActive
    }

    #[must_use]
    pub fn is_deep(&self) -> bool {
        self.is_deep
    }

    #[must_use]
    pub fn epoch_start(&self) -> Epoch {
        self.epoch_start
    }

    #[must_use]
    pub fn epoch_queued(&self) -> Epoch {
        self.epoch_queued
    }

    #[must_use]
    pub fn chunk_start(&self) -> &ObjectKey {
        &self.chunk_start
    }

    #[must_use]
    pub fn chunk_end(&self) -> &ObjectKey {
        &self.chunk_end
    }

    #[must_use]
    pub fn max_end(&self) -> &ObjectKey {
        &self.max_end
    }

    #[must_use]
    pub fn subset_last_update(&self) -> Version {
        self.subset_last_update
    }

    #[must_use]
    pub fn flags(&self) -> ScrubFlags {
        self.flags
    }

    #[must_use]
    pub fn stats(&self) -> ScrubStats {
        self.stats
    }

    #[must_use]
    pub fn errors(&self) -> &ErrorSets {
        &self.errors
    }

    #[must_use]
    pub fn preemption(&self) -> &PreemptionState {
        &self.preemption
    }

    pub fn preemption_mut(&mut self) -> &mut PreemptionState {
        &mut self.preemption
    }

    /// Folds one chunk's comparator output into the session-wide error sets
    /// (§4.1 `scrubFinish` reads these across the *whole* session, not just
    /// the last chunk).
    pub fn accumulate_chunk_errors(&mut self, missing: Vec<ObjectKey>, inconsistent: Vec<ObjectKey>, authoritative: std::collections::BTreeMap<ObjectKey, Vec<ShardId>>) {
        self.errors.missing.extend(missing);
        self.errors.inconsistent.extend(inconsistent);
        self.errors.authoritative.extend(authoritative);
    }

    pub fn set_subset_last_update(&mut self, version: Version) {
        self.subset_last_update = version;
    }

    pub fn record_deltas(&mut self, shallow: usize, deep: usize) {
        self.stats.shallow_errors += shallow;
        self.stats.deep_errors += deep;
    }

    pub fn record_fixed(&mut self, count: usize) {
        self.stats.fixed_count += count;
    }

    pub fn set_check_repair(&mut self, value: bool) {
        self.flags.check_repair = value;
    }

    /// `scrubFinish` step 6: all recorded errors were repaired, so the
    /// running shallow/deep tallies are zeroed rather than left counting
    /// disagreements that no longer exist.
    pub fn clear_error_counts(&mut self) {
        self.stats.shallow_errors = 0;
        self.stats.deep_errors = 0;
    }

    /// `queryState`: a structured snapshot for introspection (§4.1).
    #[must_use]
    pub fn snapshot(&self) -> ScrubMachineSnapshot {
        ScrubMachineSnapshot {
            pg: self.pg,
            state: self.state,
            is_deep: self.is_deep,
            epoch_start: self.epoch_start,
            chunk_start: self.chunk_start.clone(),
            chunk_end: self.chunk_end.clone(),
            max_end: self.max_end.clone(),
            flags: self.flags,
            stats: self.stats,
            total_errors: self.errors.total_errors(),
        }
    }

    /// Starts a fresh Primary session (`startScrub`, §4.1). Returns `false`
    /// (and leaves the machine untouched) if a session is already active —
    /// the caller surfaces `ScrubError::AlreadyActive`.
    #[must_use]
    pub fn start_primary(&mut self, epoch: Epoch, start_at: ObjectKey, deep: bool, flags: ScrubFlags) -> bool {
        if self.is_active() {
            return false;
        }
        self.reset_session_fields();
        self.is_deep = deep;
        self.epoch_start = epoch;
        self.epoch_queued = epoch;
        self.chunk_start = start_at;
        self.flags = flags;
        self.preemption = PreemptionState::new(self.preemption.max_preemptions());
        self.state = MachineState::Primary(PrimaryPhase::ReservingReplicas);
        true
    }

    /// Starts a fresh Replica session (`startReplica`, §4.1).
    #[must_use]
    pub fn start_replica(&mut self, epoch: Epoch, start: ObjectKey, end: ObjectKey, deep: bool, priority: ScrubPriority, allow_preemption: bool) -> bool {
        if self.is_active() {
            return false;
        }
        self.reset_session_fields();
        self.is_deep = deep;
        self.epoch_start = epoch;
        self.epoch_queued = epoch;
        self.chunk_start = start;
        self.chunk_end = end.clone();
        self.max_end = end;
        self.flags.priority = priority;
        self.preemption = if allow_preemption {
            PreemptionState::new(self.preemption.max_preemptions())
        } else {
            PreemptionState::disabled()
        };
        self.state = MachineState::Replica(ReplicaPhase::Idle);
        true
    }

    fn reset_session_fields(&mut self) {
        self.is_deep = false;
        self.epoch_start = Epoch::none();
        self.epoch_queued = Epoch::none();
        self.chunk_start = ObjectKey::head("");
        self.chunk_end = ObjectKey::head("");
        self.max_end = ObjectKey::head("");
        self.subset_last_update = Version::new(Epoch::none(), 0);
        self.flags = ScrubFlags::default();
        self.errors.clear();
    }

    /// `FullReset`/`EpochChanged`/`ReservationFailure` all converge here:
    /// drop all session state and return to `NotActive` (P4, R1).
    pub(crate) fn terminal_cleanup(&mut self) {
        self.reset_session_fields();
        self.state = MachineState::NotActive;
    }

    /// Records a newly selected chunk end and advances `maxEnd` to match
    /// (§4.6 "on success, set `chunkEnd := candidateEnd`, `maxEnd :=
    /// max(maxEnd, chunkEnd)`").
    pub(crate) fn set_chunk_bounds(&mut self, end: ObjectKey) {
        self.chunk_end = end;
        if self.chunk_end > self.max_end {
            self.max_end = self.chunk_end.clone();
        }
    }

    /// Dispatches one posted event (§4.2 `Events`). The pre-dispatch filter
    /// for `EpochChanged` applies uniformly to every active state before
    /// the per-role tables run, per the §9 design note on hierarchical
    /// reuse.
    pub fn apply(&mut self, event: ScrubEvent) -> Transition {
        if matches!(event, ScrubEvent::FullReset) {
            let was_active = self.is_active();
            self.terminal_cleanup();
            return if was_active { Transition::ReleaseReservationsAndStop } else { Transition::Stay };
        }
        if matches!(event, ScrubEvent::EpochChanged) {
            let was_active = self.is_active();
            self.terminal_cleanup();
            return if was_active { Transition::ReleaseReservationsAndStop } else { Transition::Stay };
        }

        match self.state {
            MachineState::NotActive => Self::apply_inactive(event),
            MachineState::Primary(phase) => self.apply_primary(phase, event),
            MachineState::Replica(phase) => self.apply_replica(phase, event),
        }
    }

    /// One `BuildMap` slice finished, Primary or Replica side (§4.2 step
    /// 7): Primary advances to `DrainReplMaps` and waits for replica maps;
    /// Replica advances to `SendMap` to ship the result back.
    ///
    /// # Panics
    ///
    /// Panics if called while not in a `BuildMap` phase.
    pub fn on_local_map_built(&mut self) -> Transition {
        match self.state {
            MachineState::Primary(PrimaryPhase::BuildMap) => {
                self.state = MachineState::Primary(PrimaryPhase::DrainReplMaps);
                Transition::AwaitReplicaMaps
            }
            MachineState::Replica(ReplicaPhase::BuildMap) => {
                self.state = MachineState::Replica(ReplicaPhase::SendMap);
                Transition::SendReplicaMap
            }
            other => panic!("on_local_map_built called outside a BuildMap phase (in {other:?})"),
        }
    }

    /// A `BuildMap` slice returned `IN_PROGRESS`: stay put, the caller
    /// reschedules the same slice via C9.
    #[must_use]
    pub fn on_build_in_progress(&self) -> Transition {
        Transition::Stay
    }

    /// Runs after the caller has finished `scrubFinish`'s bookkeeping for a
    /// `Transition::FinishSession` or `Transition::SendReplicaMap` result:
    /// drops all session state and returns to `NotActive`.
    pub fn finish_session_cleanup(&mut self) {
        self.terminal_cleanup();
    }

    fn apply_inactive(event: ScrubEvent) -> Transition {
        match event {
            ScrubEvent::StartScrub | ScrubEvent::StartReplica => Transition::Rejected,
            _ => Transition::Stay,
        }
    }
}

/// A point-in-time dump of session state (`queryState`, §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrubMachineSnapshot {
    pub pg: PgId,
    pub state: MachineState,
    pub is_deep: bool,
    pub epoch_start: Epoch,
    pub chunk_start: ObjectKey,
    pub chunk_end: ObjectKey,
    pub max_end: ObjectKey,
    pub flags: ScrubFlags,
    pub stats: ScrubStats,
    pub total_errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> ScrubMachine {
        ScrubMachine::new(PgId::new(1), 3)
    }

    #[test]
    fn start_primary_moves_to_reserving_replicas() {
        let mut m = fresh();
        assert!(m.start_primary(Epoch::new(1), ObjectKey::head(""), false, ScrubFlags::default()));
        assert_eq!(m.state(), MachineState::Primary(PrimaryPhase::ReservingReplicas));
    }

    #[test]
    fn start_primary_fails_while_already_active() {
        let mut m = fresh();
        assert!(m.start_primary(Epoch::new(1), ObjectKey::head(""), false, ScrubFlags::default()));
        assert!(!m.start_primary(Epoch::new(1), ObjectKey::head(""), false, ScrubFlags::default()));
    }

    #[test]
    fn epoch_changed_while_inactive_is_a_no_op() {
        let mut m = fresh();
        assert_eq!(m.apply(ScrubEvent::EpochChanged), Transition::Stay);
    }

    #[test]
    fn epoch_changed_while_active_unwinds_the_session() {
        let mut m = fresh();
        m.start_primary(Epoch::new(1), ObjectKey::head(""), false, ScrubFlags::default());
        assert_eq!(m.apply(ScrubEvent::EpochChanged), Transition::ReleaseReservationsAndStop);
        assert_eq!(m.state(), MachineState::NotActive);
    }

    #[test]
    fn full_reset_twice_is_equivalent_to_once_r1() {
        let mut m = fresh();
        m.start_primary(Epoch::new(1), ObjectKey::head(""), false, ScrubFlags::default());
        m.apply(ScrubEvent::FullReset);
        let after_first = m.clone();
        m.apply(ScrubEvent::FullReset);
        assert_eq!(m, after_first, "a second reset must not change anything further");
    }

    #[test]
    fn terminal_cleanup_clears_error_sets_p4() {
        let mut m = fresh();
        m.start_primary(Epoch::new(1), ObjectKey::head(""), false, ScrubFlags::default());
        m.accumulate_chunk_errors(vec![ObjectKey::head("x")], vec![], std::collections::BTreeMap::new());
        m.apply(ScrubEvent::FullReset);
        assert_eq!(m.errors().total_errors(), 0);
    }

    #[test]
    fn a_new_primary_session_gets_a_fresh_preemption_budget() {
        let mut m = ScrubMachine::new(PgId::new(1), 1);
        m.start_primary(Epoch::new(1), ObjectKey::head(""), false, ScrubFlags::default());
        m.preemption_mut().record_preemption(PgId::new(1));
        assert!(!m.preemption().is_preemptible(), "budget of 1 is spent after one preemption");
        m.apply(ScrubEvent::FullReset);
        m.start_primary(Epoch::new(2), ObjectKey::head(""), false, ScrubFlags::default());
        assert!(m.preemption().is_preemptible(), "a fresh session must not inherit the prior session's spent budget");
        assert_eq!(m.preemption().chunk_divisor(), 1, "a fresh session must not inherit the prior session's chunk divisor");
    }
}
