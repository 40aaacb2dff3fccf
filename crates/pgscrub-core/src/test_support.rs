//! In-memory test doubles for [`crate::host::PgHost`] and
//! [`crate::host::OsdServices`].
//!
//! Grounded on the workspace's own preference for hand-rolled fixtures over
//! a mocking framework (see `test_config_3`/`test_config_5` in the VSR
//! engine's repair tests): every field is a plain `Cell`/`RefCell` the test
//! pokes directly rather than an expectation DSL.

#![allow(clippy::missing_errors_doc)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use bytes::Bytes;

use pgscrub_types::{Epoch, ObjectKey, PgId, ScrubPriority, ShardId, Version};

use crate::host::{
    BuildStatus, ComparisonResult, OmapStats, OsdServices, PgHost, ScrubMap, ScrubMapSet, ScrubOutcome, ScrubStore,
};
use crate::message::{RepScrubMap, RepScrubRequest, ScrubReserveGrant, ScrubReserveReject, ScrubReserveRelease, ScrubReserveRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    ScrubRequest { to: ShardId, req: RepScrubRequest },
    ScrubMap { to: ShardId, map: RepScrubMap },
    ReserveRequest { to: ShardId, req: ScrubReserveRequest },
    ReserveGrant { to: ShardId, grant: ScrubReserveGrant },
    ReserveReject { to: ShardId, reject: ScrubReserveReject },
    ReserveRelease { to: ShardId, release: ScrubReserveRelease },
}

pub struct FakeOsdServices {
    local_capacity: u32,
    local_in_use: Cell<u32>,
    remote_capacity: u32,
    remote_in_use: Cell<u32>,
    pub sent: RefCell<Vec<SentMessage>>,
    pub recovery_active: Cell<bool>,
    pub registrations: RefCell<Vec<(PgId, Version, bool)>>,
}

impl FakeOsdServices {
    #[must_use]
    pub fn with_local_capacity(capacity: u32) -> Self {
        Self {
            local_capacity: capacity,
            local_in_use: Cell::new(0),
            remote_capacity: capacity.max(1),
            remote_in_use: Cell::new(0),
            sent: RefCell::new(Vec::new()),
            recovery_active: Cell::new(false),
            registrations: RefCell::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn local_in_use(&self) -> u32 {
        self.local_in_use.get()
    }

    #[must_use]
    pub fn sent_to(&self, target: ShardId) -> Vec<SentMessage> {
        self.sent
            .borrow()
            .iter()
            .filter(|m| sent_message_target(m) == target)
            .cloned()
            .collect()
    }
}

fn sent_message_target(m: &SentMessage) -> ShardId {
    match m {
        SentMessage::ScrubRequest { to, .. }
        | SentMessage::ScrubMap { to, .. }
        | SentMessage::ReserveRequest { to, .. }
        | SentMessage::ReserveGrant { to, .. }
        | SentMessage::ReserveReject { to, .. }
        | SentMessage::ReserveRelease { to, .. } => *to,
    }
}

impl Default for FakeOsdServices {
    fn default() -> Self {
        Self::with_local_capacity(u32::MAX)
    }
}

impl OsdServices for FakeOsdServices {
    fn reg_pg_scrub(&self, pg: PgId, stamp: Version, _min_interval: u64, _max_interval: u64, must: bool) -> Version {
        self.registrations.borrow_mut().push((pg, stamp, must));
        stamp
    }

    fn unreg_pg_scrub(&self, _pg: PgId, _stamp: Version) {}

    fn send_rep_scrub_request(&self, to: ShardId, _pg: PgId, req: RepScrubRequest) {
        self.sent.borrow_mut().push(SentMessage::ScrubRequest { to, req });
    }

    fn send_rep_scrub_map(&self, to: ShardId, _pg: PgId, map: RepScrubMap) {
        self.sent.borrow_mut().push(SentMessage::ScrubMap { to, map });
    }

    fn send_reserve_request(&self, to: ShardId, _pg: PgId, req: ScrubReserveRequest) {
        self.sent.borrow_mut().push(SentMessage::ReserveRequest { to, req });
    }

    fn send_reserve_grant(&self, to: ShardId, _pg: PgId, grant: ScrubReserveGrant) {
        self.sent.borrow_mut().push(SentMessage::ReserveGrant { to, grant });
    }

    fn send_reserve_reject(&self, to: ShardId, _pg: PgId, reject: ScrubReserveReject) {
        self.sent.borrow_mut().push(SentMessage::ReserveReject { to, reject });
    }

    fn send_reserve_release(&self, to: ShardId, _pg: PgId, release: ScrubReserveRelease) {
        self.sent.borrow_mut().push(SentMessage::ReserveRelease { to, release });
    }

    fn inc_scrubs_local(&self) -> bool {
        if self.local_in_use.get() < self.local_capacity {
            self.local_in_use.set(self.local_in_use.get() + 1);
            true
        } else {
            false
        }
    }

    fn dec_scrubs_local(&self) {
        self.local_in_use.set(self.local_in_use.get().saturating_sub(1));
    }

    fn inc_scrubs_remote(&self) -> bool {
        if self.remote_in_use.get() < self.remote_capacity {
            self.remote_in_use.set(self.remote_in_use.get() + 1);
            true
        } else {
            false
        }
    }

    fn dec_scrubs_remote(&self) {
        self.remote_in_use.set(self.remote_in_use.get().saturating_sub(1));
    }

    fn is_recovery_active(&self) -> bool {
        self.recovery_active.get()
    }

    fn clog_scrub_outcome(&self, _pg: PgId, _line: &str, _is_error: bool) {}

    fn scrub_sleep_time(&self, marked_must: bool) -> std::time::Duration {
        if marked_must {
            std::time::Duration::ZERO
        } else {
            std::time::Duration::from_millis(100)
        }
    }
}

/// A single-shard-per-call object catalog plus the knobs the chunk
/// selector, map builder, and comparator read.
pub struct FakePgHost {
    pub pg: PgId,
    pub whoami: ShardId,
    pub acting: Vec<ShardId>,
    pub same_interval_since: Cell<Epoch>,
    pub is_primary: bool,
    pub is_active: bool,
    pub is_clean: bool,
    pub objects: Vec<ObjectKey>,
    pub range_available: Cell<bool>,
    pub ops_blocked: Cell<bool>,
    pub build_status: Cell<BuildStatus>,
    pub comparison: ComparisonResult,
    pub repaired: RefCell<Vec<ObjectKey>>,
    pub stamps_updated: RefCell<Vec<ScrubOutcome>>,
    pub recovery_queued: Cell<bool>,
    pub snap_trim_pending: Cell<bool>,
    pub snap_trim_completed: Cell<bool>,
    pub info_shared: Cell<bool>,
    pub auto_repair_rescrub_requested: Cell<bool>,
}

impl FakePgHost {
    #[must_use]
    pub fn new(pg: PgId, whoami: ShardId, acting: Vec<ShardId>) -> Self {
        Self {
            pg,
            whoami,
            acting,
            same_interval_since: Cell::new(Epoch::new(1)),
            is_primary: true,
            is_active: true,
            is_clean: true,
            objects: Vec::new(),
            range_available: Cell::new(true),
            ops_blocked: Cell::new(false),
            build_status: Cell::new(BuildStatus::Done),
            comparison: ComparisonResult::default(),
            repaired: RefCell::new(Vec::new()),
            stamps_updated: RefCell::new(Vec::new()),
            recovery_queued: Cell::new(false),
            snap_trim_pending: Cell::new(false),
            snap_trim_completed: Cell::new(false),
            info_shared: Cell::new(false),
            auto_repair_rescrub_requested: Cell::new(false),
        }
    }
}

impl PgHost for FakePgHost {
    fn pg_id(&self) -> PgId {
        self.pg
    }

    fn same_interval_since(&self) -> Epoch {
        self.same_interval_since.get()
    }

    fn is_primary(&self) -> bool {
        self.is_primary
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn is_clean(&self) -> bool {
        self.is_clean
    }

    fn whoami(&self) -> ShardId {
        self.whoami
    }

    fn acting_set(&self) -> Vec<ShardId> {
        self.acting.clone()
    }

    fn acting_recovery_backfill(&self) -> Vec<ShardId> {
        self.acting.clone()
    }

    fn default_scrub_priority(&self) -> ScrubPriority {
        ScrubPriority::new(1)
    }

    fn last_update_applied(&self) -> Version {
        Version::new(self.same_interval_since(), 0)
    }

    fn last_log_update_in_range(&self, _start: &ObjectKey, _end: &ObjectKey) -> Option<Version> {
        None
    }

    fn objects_list_partial(&self, start: &ObjectKey, min: usize, max: usize) -> (Vec<ObjectKey>, ObjectKey) {
        let mut objs: Vec<ObjectKey> = self.objects.iter().filter(|k| *k >= start).cloned().collect();
        objs.sort();
        let take = objs.len().min(max.max(min));
        let selected: Vec<ObjectKey> = objs.into_iter().take(take).collect();
        let candidate_end = selected.last().map_or_else(ObjectKey::max, |k| {
            let idx = self.objects.iter().position(|o| o == k).unwrap();
            self.objects.get(idx + 1).cloned().unwrap_or_else(ObjectKey::max)
        });
        (selected, candidate_end)
    }

    fn range_available_for_scrub(&self, _start: &ObjectKey, _end: &ObjectKey) -> bool {
        self.range_available.get()
    }

    fn ops_blocked_by_scrub(&self) -> bool {
        self.ops_blocked.get()
    }

    fn build_map_chunk(&mut self, start: &ObjectKey, end: &ObjectKey, _deep: bool) -> (BuildStatus, Option<ScrubMap>) {
        match self.build_status.get() {
            BuildStatus::InProgress => (BuildStatus::InProgress, None),
            BuildStatus::Done => {
                let mut map = ScrubMap::default();
                for key in self.objects.iter().filter(|k| *k >= start && *k < end) {
                    map.objects.insert(key.clone(), Bytes::new());
                }
                (BuildStatus::Done, Some(map))
            }
        }
    }

    fn omap_checks(&self, _maps: &ScrubMapSet) -> OmapStats {
        OmapStats::default()
    }

    fn compare_scrub_maps(&self, _maps: &ScrubMapSet, _repair: bool) -> ComparisonResult {
        self.comparison.clone()
    }

    fn scrub_snapshot_metadata(&mut self, _authoritative: &ComparisonResult) {}

    fn repair_object(&mut self, hobj: &ObjectKey, _good_shards: &[ShardId], _missing_from: &[ShardId]) {
        self.repaired.borrow_mut().push(hobj.clone());
    }

    fn publish_stats_to_osd(&mut self) {}

    fn update_scrub_stamps(&mut self, outcome: &ScrubOutcome) {
        self.stamps_updated.borrow_mut().push(*outcome);
    }

    fn queue_peering_event_do_recovery(&mut self) {
        self.recovery_queued.set(true);
    }

    fn snap_trim_queue_non_empty(&self) -> bool {
        self.snap_trim_pending.get()
    }

    fn snap_trimmer_scrub_complete(&mut self) {
        self.snap_trim_completed.set(true);
    }

    fn share_pg_info(&mut self) {
        self.info_shared.set(true);
    }

    fn request_auto_repair_rescrub(&mut self) {
        self.auto_repair_rescrub_requested.set(true);
    }
}

#[must_use]
pub fn empty_map_set() -> BTreeMap<ShardId, ScrubMap> {
    BTreeMap::new()
}

/// Records what it was told without persisting anything, for asserting on
/// the sequence of comparator decisions a test produced.
#[derive(Default)]
pub struct FakeScrubStore {
    pub missing: Vec<ObjectKey>,
    pub inconsistent: Vec<ObjectKey>,
    pub flushed: Option<bool>,
}

impl ScrubStore for FakeScrubStore {
    fn record_missing(&mut self, hobj: &ObjectKey, _missing_from: &[ShardId]) {
        self.missing.push(hobj.clone());
    }

    fn record_inconsistent(&mut self, hobj: &ObjectKey, _authoritative: &[ShardId]) {
        self.inconsistent.push(hobj.clone());
    }

    fn flush(&mut self, repair: bool) {
        self.flushed = Some(repair);
    }
}
