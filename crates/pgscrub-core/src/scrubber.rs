//! C8: `PgScrubber` — the imperative shell around [`crate::machine::ScrubMachine`].
//!
//! Owns the scoped reservation guards (C2–C4), the per-chunk map collector
//! (C5), and the session's `ScrubStore`, and interprets every
//! [`Transition`] the machine returns by calling out to the borrowed
//! `PgHost`/`OsdServices`/`Scheduler` capabilities, then feeding the result
//! back into the machine. Mirrors how `replica/mod.rs` wraps
//! `ReplicaState` with the actual storage and network calls its transition
//! table's outputs name.
//!
//! `host: &mut dyn PgHost` is threaded through every entry point rather than
//! stored: the PG it represents is exclusively locked only for the duration
//! of one call (§9 design note), whereas `osd`/`scheduler` are OSD-wide,
//! internally synchronized services this scrubber holds for its entire
//! lifetime.
//!
//! A map-build slice that reports `BuildStatus::InProgress` is driven to
//! completion synchronously within one call in this implementation, calling
//! `Scheduler::enqueue` once per slice purely so an embedder can observe (or
//! rate-limit) the work; it does not actually suspend and re-enter later.
//! `WaitDigestUpdates` is resolved the same way: `PgHost::scrub_snapshot_metadata`
//! is modeled as synchronous, so `pending_digests` is always `0` by the time
//! this facade calls back into the machine. An embedder whose backend
//! genuinely defers either of those can still drive the async path through
//! the public `on_digest_updated` method.

use pgscrub_types::{ObjectKey, PgId, ShardId};

use crate::chunk_selector::{self, ChunkSelection};
use crate::comparison;
use crate::config::Config;
use crate::error::{ScrubError, ScrubResult};
use crate::host::{BuildStatus, OsdServices, PgHost, ScrubMap, ScrubOutcome, ScrubStore, ScrubStoreFactory};
use crate::machine::{MachineState, ScrubEvent, ScrubFlags, ScrubMachine, ScrubMachineSnapshot, Transition};
use crate::map_collector::{CollectorOutcome, MapCollector};
use crate::message::{RepScrubMap, RepScrubRequest, ScrubReserveGrant, ScrubReserveRelease, ScrubReserveRequest};
use crate::replica_reservations::{ReplicaReservations, ReservationOutcome};
use crate::reservation::{LocalReservation, RemotePrimaryReservation};
use crate::scheduler::{self, Scheduler};

/// Parameters for `startScrub` (§4.1). Named fields instead of positional
/// bools since four of five are booleans and a transposed pair would be a
/// silent bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartScrubRequest {
    pub must_scrub: bool,
    pub need_auto: bool,
    pub deep: bool,
    pub auto_repair: bool,
    pub check_repair: bool,
    pub deep_scrub_on_error: bool,
}

/// The imperative shell driving one PG's scrub session end to end (§4.1).
pub struct PgScrubber<'a> {
    whoami: ShardId,
    osd: &'a dyn OsdServices,
    scheduler: &'a dyn Scheduler,
    store_factory: &'a dyn ScrubStoreFactory,
    config: Config,
    machine: ScrubMachine,
    local_reservation: Option<LocalReservation<'a>>,
    remote_reservation: Option<RemotePrimaryReservation<'a>>,
    replica_reservations: Option<ReplicaReservations<'a>>,
    map_collector: Option<MapCollector>,
    store: Option<Box<dyn ScrubStore>>,
    /// Set by `startReplica`: who to ship the finished map back to.
    primary: Option<ShardId>,
    pending_replica_map: Option<ScrubMap>,
}

impl<'a> PgScrubber<'a> {
    #[must_use]
    pub fn new(
        pg: PgId,
        whoami: ShardId,
        osd: &'a dyn OsdServices,
        scheduler: &'a dyn Scheduler,
        store_factory: &'a dyn ScrubStoreFactory,
        config: Config,
    ) -> Self {
        let max_preemptions = config.scrub_max_preemptions;
        Self {
            whoami,
            osd,
            scheduler,
            store_factory,
            config,
            machine: ScrubMachine::new(pg, max_preemptions),
            local_reservation: None,
            remote_reservation: None,
            replica_reservations: None,
            map_collector: None,
            store: None,
            primary: None,
            pending_replica_map: None,
        }
    }

    #[must_use]
    pub fn query_state(&self) -> ScrubMachineSnapshot {
        self.machine.snapshot()
    }

    /// `isEventRelevant` (§4.1): guards a scheduled Primary-side event
    /// against firing after the PG has stopped being an eligible scrub
    /// target, or after a peering reset superseded the queued epoch.
    fn is_event_relevant(&self, host: &dyn PgHost) -> bool {
        let queued = self.machine.epoch_queued();
        let reset_detected = !queued.is_none() && host.has_reset_since(queued);
        host.is_primary() && host.is_active() && host.is_clean() && self.machine.is_active() && !reset_detected
    }

    // ---- Primary entry points -------------------------------------------------

    /// `startScrub` (§4.1 step 1): acquires the local reservation, opens the
    /// session, and kicks off the collective replica-reservation request.
    pub fn start_scrub(&mut self, host: &mut dyn PgHost, request: StartScrubRequest) -> ScrubResult<()> {
        let pg = self.machine.pg();
        if self.machine.is_active() {
            return Err(ScrubError::AlreadyActive(pg));
        }

        let local = LocalReservation::acquire(self.osd, pg);
        if !local.held() {
            return Err(ScrubError::ReservationDenied(pg));
        }
        self.local_reservation = Some(local);

        let priority = self.config.session_priority(request.must_scrub, request.need_auto, host.default_scrub_priority());
        let flags = ScrubFlags {
            priority,
            marked_must: request.must_scrub,
            auto_repair: request.auto_repair,
            check_repair: request.check_repair,
            deep_scrub_on_error: request.deep_scrub_on_error,
        };
        let epoch = host.same_interval_since();
        self.machine.start_primary(epoch, ObjectKey::head(""), request.deep, flags);
        self.store = Some(self.store_factory.create(pg));

        let stamp = host.last_update_applied();
        self.osd.reg_pg_scrub(pg, stamp, 0, 0, request.must_scrub);

        let acting = host.acting_set();
        let (reservations, outcome) = ReplicaReservations::request(self.osd, pg, epoch, self.whoami, &acting);
        self.replica_reservations = Some(reservations);
        match outcome {
            ReservationOutcome::AllGranted => {
                let t = self.machine.apply(ScrubEvent::RemotesReserved);
                self.advance(host, t);
            }
            ReservationOutcome::Pending => {}
            ReservationOutcome::AnyRejected => unreachable!("a freshly issued request cannot already be rejected"),
        }
        Ok(())
    }

    pub fn on_reserve_grant(&mut self, host: &mut dyn PgHost, from: ShardId) {
        let Some(reservations) = &mut self.replica_reservations else { return };
        match reservations.on_grant(from) {
            ReservationOutcome::AllGranted => {
                let t = self.machine.apply(ScrubEvent::RemotesReserved);
                self.advance(host, t);
            }
            ReservationOutcome::AnyRejected => unreachable!("on_grant never reports a rejection"),
            ReservationOutcome::Pending => {}
        }
    }

    pub fn on_reserve_reject(&mut self, host: &mut dyn PgHost, from: ShardId) {
        let Some(reservations) = &mut self.replica_reservations else { return };
        if reservations.on_reject(from) == ReservationOutcome::AnyRejected {
            let t = self.machine.apply(ScrubEvent::ReservationFailure);
            self.advance(host, t);
        }
    }

    pub fn sched_tick(&mut self, host: &mut dyn PgHost) {
        match self.machine.state() {
            MachineState::Primary(_) => {
                if !self.is_event_relevant(host) {
                    return;
                }
                let t = self.machine.apply(ScrubEvent::InternalSchedScrub);
                self.advance(host, t);
            }
            MachineState::Replica(_) => {
                if host.has_reset_since(self.machine.epoch_queued()) {
                    return;
                }
                let t = self.machine.apply(ScrubEvent::SchedReplica);
                self.advance(host, t);
            }
            MachineState::NotActive => {}
        }
    }

    pub fn on_active_pushes_changed(&mut self, host: &mut dyn PgHost) {
        if !self.is_event_relevant(host) {
            return;
        }
        let t = self.machine.apply(ScrubEvent::ActivePushesUpd);
        self.advance(host, t);
    }

    pub fn on_updates_applied(&mut self, host: &mut dyn PgHost) {
        if !self.is_event_relevant(host) {
            return;
        }
        let t = self.machine.apply(ScrubEvent::UpdatesApplied);
        self.advance(host, t);
    }

    pub fn on_digest_updated(&mut self, host: &mut dyn PgHost, pending_digests: usize) {
        if !self.machine.is_active() {
            return;
        }
        self.settle_digests(host, pending_digests);
    }

    /// Decodes and accepts an incoming replica map for the current chunk
    /// (§4.5). A replica that reports `preempted` on a non-preemptible
    /// session is a protocol violation in this crate's own doubles and
    /// backends, never an expected client input.
    pub fn on_replica_map(&mut self, host: &mut dyn PgHost, msg: RepScrubMap) {
        if !self.machine.is_active() {
            return;
        }
        let current_epoch = host.same_interval_since();
        let Ok(map) = postcard::from_bytes::<ScrubMap>(&msg.scrub_map_bytes) else {
            tracing::debug!(pg = %self.machine.pg(), from = %msg.from, "dropped malformed scrub map reply");
            return;
        };
        if msg.preempted {
            assert!(
                self.machine.preemption().is_preemptible() || self.machine.preemption().is_preempted(),
                "replica {} reported a preemption on a non-preemptible session",
                msg.from
            );
        }
        let Some(collector) = &mut self.map_collector else { return };
        let outcome = collector.accept_remote(msg.from, msg.map_epoch, current_epoch, msg.preempted, map);
        if outcome == CollectorOutcome::AllReceived {
            let t = self.machine.apply(ScrubEvent::GotReplicas);
            self.advance(host, t);
        }
    }

    pub fn on_epoch_changed(&mut self, host: &mut dyn PgHost) {
        if !self.machine.is_active() {
            return;
        }
        let t = self.machine.apply(ScrubEvent::EpochChanged);
        self.advance(host, t);
    }

    /// `reset` (§4.1): unconditional teardown, used on interval-reset events
    /// or an operator-requested cancel. `keep_repair_state` is accepted for
    /// API parity with the source's flag of the same name; SPEC_FULL.md §4.1
    /// describes `reset` as an unconditional `FullReset` with no divergent
    /// behavior for the flag, so there is nothing left here to conditionally
    /// preserve.
    pub fn reset(&mut self, host: &mut dyn PgHost, keep_repair_state: bool) {
        let _ = keep_repair_state;
        let t = self.machine.apply(ScrubEvent::FullReset);
        self.teardown_reservations();
        self.store = None;
        self.advance(host, t);
    }

    // ---- Replica entry points ---------------------------------------------

    /// `startReplica` (§4.1, §4.2): opens one chunk's replica-side session.
    /// Does not touch the remote-primary reservation — that is acquired
    /// once per primary session by [`Self::on_reserve_request`], not once
    /// per chunk.
    pub fn start_replica(&mut self, host: &mut dyn PgHost, from: ShardId, req: RepScrubRequest) {
        if req.map_epoch < host.same_interval_since() {
            tracing::debug!(pg = %self.machine.pg(), from = %from, "dropped stale startReplica request");
            return;
        }
        if self.machine.is_active() {
            tracing::debug!(pg = %self.machine.pg(), from = %from, "replica already mid-chunk, dropping overlapping request");
            return;
        }
        self.primary = Some(from);
        self.machine
            .start_replica(req.map_epoch, req.start, req.end, req.deep, req.priority, req.allow_preemption);
        let t = self.machine.begin_replica_build();
        self.advance(host, t);
    }

    /// Incoming `ScrubReserveRequest` from a remote primary (§4.3): attempt
    /// to take this OSD's remote-scrub slot and reply with a grant or
    /// reject.
    pub fn on_reserve_request(&mut self, from: ShardId, req: ScrubReserveRequest) {
        let pg = self.machine.pg();
        if !self.config.scrub_during_recovery && self.osd.is_recovery_active() {
            self.osd.send_reserve_reject(from, pg, crate::message::ScrubReserveReject { map_epoch: req.map_epoch, from: self.whoami });
            return;
        }
        let reservation = RemotePrimaryReservation::acquire(self.osd, pg);
        if reservation.held() {
            self.remote_reservation = Some(reservation);
            self.osd.send_reserve_grant(from, pg, ScrubReserveGrant { map_epoch: req.map_epoch, from: self.whoami });
        } else {
            self.osd
                .send_reserve_reject(from, pg, crate::message::ScrubReserveReject { map_epoch: req.map_epoch, from: self.whoami });
        }
    }

    /// Incoming `ScrubReserveRelease` from the primary (§4.3): releases this
    /// OSD's held (or still-pending) remote-scrub slot. The primary sends
    /// this to every peer at session end regardless of whether a grant is
    /// still in flight, so a late grant crossing this message in the wire
    /// simply finds nothing to release when it eventually arrives (R3).
    pub fn on_reserve_release(&mut self, _release: ScrubReserveRelease) {
        self.remote_reservation = None;
    }

    // ---- Transition interpreter --------------------------------------------

    fn advance(&mut self, host: &mut dyn PgHost, transition: Transition) {
        match transition {
            Transition::Stay | Transition::Rejected => {}
            Transition::RequestReplicaReservations => {
                unreachable!("issued only from start_scrub, which drives ReplicaReservations::request itself")
            }
            Transition::ReleaseReservationsAndStop => self.teardown_reservations(),
            Transition::ScheduleChunkSleep => {
                let delay = scheduler::chunk_sleep(self.osd, self.machine.flags().marked_must);
                self.scheduler.after(delay, Box::new(|| {}));
            }
            Transition::SelectChunk => self.run_chunk_selection(host),
            Transition::IssueMapRequests => self.issue_map_requests(host),
            Transition::ComputeLastUpdate => self.compute_last_update(host),
            Transition::BuildLocalMap => self.build_local_map(host),
            Transition::AwaitReplicaMaps => self.check_replica_maps_complete(host),
            Transition::CompareAndAwaitDigests => self.compare_chunk_and_await_digests(host),
            Transition::FinishSession => self.scrub_finish(host),
            Transition::SendReplicaMap => self.send_replica_map(host),
        }
    }

    fn run_chunk_selection(&mut self, host: &mut dyn PgHost) {
        let pg = self.machine.pg();
        let start = self.machine.chunk_start().clone();
        let divisor = self.machine.preemption().chunk_divisor();
        let selection = chunk_selector::select_chunk(&*host, pg, &start, self.config.scrub_chunk_min, self.config.scrub_chunk_max, divisor);
        match selection {
            ChunkSelection::Selected(end) => {
                let t = self.machine.on_chunk_selected(end);
                self.advance(host, t);
            }
            ChunkSelection::RangeUnavailable => {
                let t = self.machine.on_range_unavailable();
                self.advance(host, t);
            }
        }
    }

    fn issue_map_requests(&mut self, host: &mut dyn PgHost) {
        let pg = self.machine.pg();
        let epoch = self.machine.epoch_start();
        let start = self.machine.chunk_start().clone();
        let end = self.machine.chunk_end().clone();
        let deep = self.machine.is_deep();
        let priority = self.machine.flags().priority;
        let allow_preemption = self.machine.preemption().is_preemptible();
        let ops_blocked = host.ops_blocked_by_scrub();
        let version = host.last_update_applied();
        let expected = host.acting_recovery_backfill();

        for shard in expected.iter().copied().filter(|s| *s != self.whoami) {
            let req = RepScrubRequest {
                version,
                map_epoch: epoch,
                peering_reset: epoch,
                start: start.clone(),
                end: end.clone(),
                deep,
                allow_preemption,
                priority,
                ops_blocked,
            };
            self.osd.send_rep_scrub_request(shard, pg, req);
        }
        self.map_collector = Some(MapCollector::new(&expected));

        if !ops_blocked {
            let t = self.machine.apply(ScrubEvent::ActivePushesUpd);
            self.advance(host, t);
        }
    }

    fn compute_last_update(&mut self, host: &mut dyn PgHost) {
        let start = self.machine.chunk_start().clone();
        let end = self.machine.chunk_end().clone();
        let version = host.last_log_update_in_range(&start, &end).unwrap_or_else(|| host.last_update_applied());
        self.machine.set_subset_last_update(version);
        if host.last_update_applied() >= version {
            let t = self.machine.apply(ScrubEvent::UpdatesApplied);
            self.advance(host, t);
        }
    }

    fn build_local_map(&mut self, host: &mut dyn PgHost) {
        let start = self.machine.chunk_start().clone();
        let end = self.machine.chunk_end().clone();
        let deep = self.machine.is_deep();
        loop {
            match host.build_map_chunk(&start, &end, deep) {
                (BuildStatus::InProgress, _) => {
                    let pg = self.machine.pg();
                    let priority = scheduler::requeue_priority(&self.config, self.machine.flags().priority);
                    self.scheduler.enqueue(pg, priority, Box::new(|| {}));
                }
                (BuildStatus::Done, Some(map)) => {
                    match self.machine.state() {
                        MachineState::Primary(_) => {
                            if let Some(collector) = &mut self.map_collector {
                                collector.accept_local(self.whoami, map);
                            }
                        }
                        MachineState::Replica(_) => {
                            self.pending_replica_map = Some(map);
                        }
                        MachineState::NotActive => {}
                    }
                    let t = self.machine.on_local_map_built();
                    self.advance(host, t);
                    return;
                }
                (BuildStatus::Done, None) => unreachable!("backend reported Done without a map"),
            }
        }
    }

    fn check_replica_maps_complete(&mut self, host: &mut dyn PgHost) {
        let complete = self.map_collector.as_ref().is_some_and(MapCollector::is_complete);
        if complete {
            let t = self.machine.apply(ScrubEvent::GotReplicas);
            self.advance(host, t);
        }
    }

    fn compare_chunk_and_await_digests(&mut self, host: &mut dyn PgHost) {
        let acting = host.acting_set();
        let maps = self.map_collector.take().map(MapCollector::into_maps).unwrap_or_default();
        let repair = self.machine.flags().check_repair;
        let Some(store) = &mut self.store else { return };
        let cmp = comparison::compare_chunk(&mut *host, store.as_mut(), &maps, &acting, repair);
        self.machine.record_deltas(cmp.result.shallow_errors_delta, cmp.result.deep_errors_delta);
        self.machine
            .accumulate_chunk_errors(cmp.result.missing.clone(), cmp.result.inconsistent.clone(), cmp.result.authoritative.clone());
        for warning in &cmp.omap.warnings {
            tracing::debug!(pg = %self.machine.pg(), %warning, "scrub omap check warning");
        }
        self.settle_digests(host, 0);
    }

    fn settle_digests(&mut self, host: &mut dyn PgHost, pending_digests: usize) {
        let t = self.machine.apply(ScrubEvent::DigestUpdate { pending_digests });
        self.advance(host, t);
    }

    fn send_replica_map(&mut self, _host: &mut dyn PgHost) {
        let map = self.pending_replica_map.take().unwrap_or_default();
        let bytes = postcard::to_allocvec(&map).unwrap_or_default();
        let msg = RepScrubMap {
            map_epoch: self.machine.epoch_start(),
            from: self.whoami,
            preempted: self.machine.preemption().is_preempted(),
            scrub_map_bytes: bytes::Bytes::from(bytes),
        };
        let pg = self.machine.pg();
        if let Some(primary) = self.primary {
            self.osd.send_rep_scrub_map(primary, pg, msg);
        }
        self.machine.finish_session_cleanup();
        self.primary = None;
    }

    /// `scrubFinish` (§4.1 step 2 onward — the auto-repair/log/stamp/cleanup
    /// sequence run once the last chunk's comparison settles).
    fn scrub_finish(&mut self, host: &mut dyn PgHost) {
        let pg = self.machine.pg();
        let mut flags = self.machine.flags();
        let errors = self.machine.errors().clone();

        if flags.check_repair && flags.auto_repair && errors.authoritative.len() > self.config.auto_repair_max_errors {
            tracing::debug!(%pg, count = errors.authoritative.len(), "too many authoritative disagreements, suppressing auto-repair for this session");
            flags.check_repair = false;
            self.machine.set_check_repair(false);
        }
        let repair = flags.check_repair;

        // Step 2: a clean errors-within-bounds session re-arms an immediate
        // deep auto-repair pass once this session finishes.
        let rearm_deep_auto_repair =
            flags.deep_scrub_on_error && !errors.authoritative.is_empty() && errors.authoritative.len() <= self.config.auto_repair_max_errors;

        let mut fixed = 0usize;
        if repair {
            for hobj in errors.missing.iter().chain(errors.inconsistent.iter()) {
                if let Some(good) = errors.authoritative.get(hobj) {
                    host.repair_object(hobj, good, &[]);
                    fixed += 1;
                }
            }
        }
        self.machine.record_fixed(fixed);

        let total = errors.total_errors();
        let line = if total == 0 {
            format!("{pg} scrub ok")
        } else if repair {
            format!("{pg} repair {total} errors, {fixed} fixed")
        } else {
            format!("{pg} scrub {total} errors")
        };
        self.osd.clog_scrub_outcome(pg, &line, total > 0);

        // Step 6: since we don't know which individual errors got fixed,
        // counters are only cleared once every recorded error has been.
        let mut scrub_after_recovery = false;
        let mut failed_repair = false;
        if repair && total > 0 {
            if fixed == total {
                self.machine.clear_error_counts();
            } else if fixed > 0 {
                scrub_after_recovery = true;
            } else {
                failed_repair = true;
            }
        }
        let stats = self.machine.stats();

        let outcome = ScrubOutcome {
            deep: self.machine.is_deep(),
            shallow_errors: stats.shallow_errors,
            deep_errors: stats.deep_errors,
            errors_fixed: fixed > 0,
            scrub_after_recovery,
            failed_repair,
        };
        host.update_scrub_stamps(&outcome);

        let has_unrepaired_error = total > 0 && fixed < total;
        if has_unrepaired_error {
            host.queue_peering_event_do_recovery();
        }

        if host.snap_trim_queue_non_empty() {
            host.snap_trimmer_scrub_complete();
        }
        host.publish_stats_to_osd();

        self.teardown_reservations();
        self.store = None;
        self.machine.finish_session_cleanup();

        // Step 9: re-arm, then share info only if the PG is still active and
        // primary once cleanup has run.
        if rearm_deep_auto_repair {
            host.request_auto_repair_rescrub();
        }
        if host.is_active() && host.is_primary() {
            host.share_pg_info();
        }
    }

    fn teardown_reservations(&mut self) {
        self.replica_reservations = None;
        self.local_reservation = None;
        self.map_collector = None;
    }
}
