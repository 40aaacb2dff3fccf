//! External collaborator contracts (§6).
//!
//! Everything in this module is a trait: the PG container, the OSD-wide
//! services, the scrub result store, and the wire transport are all out of
//! scope (§1) and referenced only through the capabilities they expose. A
//! caller embedding this crate in a real storage daemon implements these
//! traits once; a test builds a minimal in-memory double instead.
//!
//! Per the design note in §9, these are borrowed capabilities passed into
//! the facade, never owned or reference-counted by it.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use pgscrub_types::{Epoch, ObjectKey, PgId, ScrubPriority, ShardId, Version};

use crate::message::{RepScrubMap, RepScrubRequest, ScrubReserveGrant, ScrubReserveReject, ScrubReserveRelease, ScrubReserveRequest};

/// A per-replica view of one chunk: object keys plus whatever metadata the
/// backend attaches. Contents beyond enumeration are opaque to this crate —
/// interpreting digests and attributes is the comparator's job
/// (`PgHost::compare_scrub_maps`), explicitly out of scope per §1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrubMap {
    pub valid_through: Version,
    pub objects: BTreeMap<ObjectKey, Bytes>,
}

impl ScrubMap {
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

/// The per-shard maps collected for one chunk, keyed by who sent them. Built
/// up by [`crate::map_collector::MapCollector`] and handed to
/// [`PgHost::compare_scrub_maps`] once complete.
pub type ScrubMapSet = BTreeMap<ShardId, ScrubMap>;

/// Outcome of a (possibly partial) map-build slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// The chunk is fully scanned; the accompanying `ScrubMap` is complete.
    Done,
    /// More slices remain; re-enter later at the same position.
    InProgress,
}

/// Omap consistency check results (§4.8 step 2).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OmapStats {
    pub warnings: Vec<String>,
}

/// Comparator output (§4.8 step 3). Computing these values is the backend's
/// job (Non-goal, §1); this crate only routes the result into the session's
/// bookkeeping and repair decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComparisonResult {
    pub missing: Vec<ObjectKey>,
    pub inconsistent: Vec<ObjectKey>,
    /// For each disagreeing object, the shards holding the accepted copy.
    pub authoritative: BTreeMap<ObjectKey, Vec<ShardId>>,
    pub missing_digest: Vec<ObjectKey>,
    pub shallow_errors_delta: usize,
    pub deep_errors_delta: usize,
}

impl ComparisonResult {
    #[must_use]
    pub fn total_errors(&self) -> usize {
        self.missing.len() + self.inconsistent.len()
    }
}

/// The cumulative outcome of a finished session, passed to
/// `PgHost::update_scrub_stamps` (§4.1 steps 6-7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrubOutcome {
    pub deep: bool,
    pub shallow_errors: usize,
    pub deep_errors: usize,
    pub errors_fixed: bool,
    /// Set when repair only partially succeeded: some authoritative copies
    /// were applied but errors remain, so the PG should force a deep rescan
    /// once recovery catches up (§4.1 step 6, `scrubAfterRecovery`).
    pub scrub_after_recovery: bool,
    /// Set when repair was requested but none of the recorded errors had an
    /// authoritative copy to repair from (§4.1 step 6, `PG_STATE_FAILED_REPAIR`).
    pub failed_repair: bool,
}

/// The PG container: object enumeration, transactions, log, and peering
/// state (§6, `PgHost (consumed)`).
pub trait PgHost {
    fn pg_id(&self) -> PgId;

    /// The peering interval epoch this PG is currently in
    /// (`info.history.sameIntervalSince`).
    fn same_interval_since(&self) -> Epoch;

    /// `true` once this epoch has advanced past `since`, i.e. whether an
    /// in-flight session started at `since` should be invalidated.
    fn has_reset_since(&self, since: Epoch) -> bool {
        self.same_interval_since() > since
    }

    fn is_primary(&self) -> bool;
    fn is_active(&self) -> bool;
    fn is_clean(&self) -> bool;
    fn whoami(&self) -> ShardId;
    fn acting_set(&self) -> Vec<ShardId>;
    fn acting_recovery_backfill(&self) -> Vec<ShardId>;
    fn default_scrub_priority(&self) -> ScrubPriority;

    /// Latest version this PG has applied locally
    /// (`recoveryState.lastUpdateApplied`).
    fn last_update_applied(&self) -> Version;

    /// The most recent log entry (projected log first, falling back to the
    /// durable log) touching an object in `[start, end)`, or `None` if
    /// neither log has one (`searchLogForUpdates`, §4.2 `WaitLastUpdate`).
    fn last_log_update_in_range(&self, start: &ObjectKey, end: &ObjectKey) -> Option<Version>;

    /// Lists up to `max` objects (at least `min` if that many exist) from
    /// `start`, returning the objects and the candidate chunk end.
    /// (`backend.objectsListPartial`).
    fn objects_list_partial(&self, start: &ObjectKey, min: usize, max: usize) -> (Vec<ObjectKey>, ObjectKey);

    /// Rounds a key that lands mid-object to that object's boundary
    /// (`getObjectBoundary`), used when the head/clone rule needs to round
    /// a candidate end forward after nothing was popped.
    fn object_boundary(&self, key: &ObjectKey) -> ObjectKey {
        key.clone()
    }

    /// Whether `[start, end)` can be scrubbed right now: no conflicting
    /// writer holds a reservation on an overlapping range
    /// (`rangeAvailableForScrub`).
    fn range_available_for_scrub(&self, start: &ObjectKey, end: &ObjectKey) -> bool;

    /// Whether client ops are currently blocked waiting on this scrub
    /// session (`opsBlockedByScrub`), forwarded to replicas in
    /// `RepScrubRequest` and used by `MapCollector` to flag `GotReplicas`.
    fn ops_blocked_by_scrub(&self) -> bool;

    /// Scans `[start, end)` into a `ScrubMap`, one bounded slice at a time.
    /// Returns `InProgress` with no map while more slices remain; the
    /// caller re-invokes at the same `(start, end, deep)` until `Done`.
    fn build_map_chunk(&mut self, start: &ObjectKey, end: &ObjectKey, deep: bool) -> (BuildStatus, Option<ScrubMap>);

    fn omap_checks(&self, maps: &ScrubMapSet) -> OmapStats;

    /// Computes the comparator decision for the collected maps. Computing
    /// *how* objects are judged equal is a Non-goal (§1); this method is the
    /// seam where that algorithm would plug in.
    fn compare_scrub_maps(&self, maps: &ScrubMapSet, repair: bool) -> ComparisonResult;

    /// Validates object-info and snap-set consistency for the authoritative
    /// copies of a chunk (§4.8 step 5).
    fn scrub_snapshot_metadata(&mut self, authoritative: &ComparisonResult);

    /// Repairs one object using the listed good shards, clearing it from
    /// `missing_from` (§4.1 step 4).
    fn repair_object(&mut self, hobj: &ObjectKey, good_shards: &[ShardId], missing_from: &[ShardId]);

    fn publish_stats_to_osd(&mut self);

    /// Updates the PG's persisted scrub history and error counters (§4.1
    /// step 7).
    fn update_scrub_stamps(&mut self, outcome: &ScrubOutcome);

    /// Requests recovery for this PG after a scrub found unrepaired errors.
    fn queue_peering_event_do_recovery(&mut self);

    fn snap_trim_queue_non_empty(&self) -> bool;

    /// Resumes snapshot trimming, paused for the duration of the scrub.
    fn snap_trimmer_scrub_complete(&mut self);

    /// Shares updated PG info with peers immediately rather than waiting for
    /// the next periodic exchange (§4.1 step 9).
    fn share_pg_info(&mut self);

    /// Re-arms the PG's planned-scrub flags for an immediate deep
    /// auto-repair pass, mirroring `scrubRequested(false, false, true,
    /// pg.plannedScrub)` (§4.1 step 9's `deepScrubOnError` re-arm).
    fn request_auto_repair_rescrub(&mut self);
}

/// OSD-wide services: messaging, scheduler queues, cluster log, timer (§6,
/// `OsdServices (consumed)`).
pub trait OsdServices {
    /// Registers this PG's next scheduled scrub with the external planner,
    /// returning the registration stamp actually used.
    fn reg_pg_scrub(&self, pg: PgId, stamp: Version, min_interval: u64, max_interval: u64, must: bool) -> Version;
    fn unreg_pg_scrub(&self, pg: PgId, stamp: Version);

    fn send_rep_scrub_request(&self, to: ShardId, pg: PgId, req: RepScrubRequest);
    fn send_rep_scrub_map(&self, to: ShardId, pg: PgId, map: RepScrubMap);
    fn send_reserve_request(&self, to: ShardId, pg: PgId, req: ScrubReserveRequest);
    fn send_reserve_grant(&self, to: ShardId, pg: PgId, grant: ScrubReserveGrant);
    fn send_reserve_reject(&self, to: ShardId, pg: PgId, reject: ScrubReserveReject);
    fn send_reserve_release(&self, to: ShardId, pg: PgId, release: ScrubReserveRelease);

    /// Attempts to take one of this OSD's local scrub slots; `false` if the
    /// OSD-wide limit is already reached. `&self` because this counter is
    /// shared OSD-wide across every PG's scrubber, not owned by one PG
    /// (real implementations back it with an atomic or a mutex).
    fn inc_scrubs_local(&self) -> bool;
    fn dec_scrubs_local(&self);
    /// Attempts to take one of this OSD's slots reserved for scrubbing on
    /// behalf of a remote primary.
    fn inc_scrubs_remote(&self) -> bool;
    fn dec_scrubs_remote(&self);

    fn is_recovery_active(&self) -> bool;

    /// Logs a structured terminal-outcome line to the cluster log, at
    /// `error` severity when `is_error` is set (nonzero total errors),
    /// `debug` otherwise (§4.1 step 5).
    fn clog_scrub_outcome(&self, pg: PgId, line: &str, is_error: bool);

    /// The configured sleep duration between chunks, longer for a session
    /// that was not explicitly requested (`must == false`).
    fn scrub_sleep_time(&self, marked_must: bool) -> std::time::Duration;
}

/// Persists intermediate inconsistency records for one session. Created on
/// session init, handed to a deferred on-complete sink on cleanup so it
/// outlives any transaction still referencing it (§3 ownership note).
pub trait ScrubStore {
    fn record_missing(&mut self, hobj: &ObjectKey, missing_from: &[ShardId]);
    fn record_inconsistent(&mut self, hobj: &ObjectKey, authoritative: &[ShardId]);
    /// Persists or discards accumulated records depending on whether this
    /// session is repairing (§4.8 step 6).
    fn flush(&mut self, repair: bool);
}

/// Builds a fresh [`ScrubStore`] for a new session (§3 ownership note: the
/// store is created at session init, not threaded in from outside). Kept as
/// its own trait rather than a constructor bound on `ScrubStore` so the
/// concrete store type never has to be named in
/// [`crate::scrubber::PgScrubber`]'s generic parameters.
pub trait ScrubStoreFactory {
    fn create(&self, pg: PgId) -> Box<dyn ScrubStore>;
}

/// The wire-level messaging layer (§1, out of scope beyond dispatch).
/// `OsdServices`'s `send_*` methods are the actual call sites used by this
/// crate; `Messenger` exists as a named seam for an implementation that
/// wants to separate message construction from OSD bookkeeping.
pub trait Messenger {
    fn dispatch(&self, to: ShardId, pg: PgId, epoch: Epoch, payload: Bytes);
}
