//! The six end-to-end sessions from SPEC_FULL.md §8, each driven through the
//! public [`pgscrub_core::scrubber::PgScrubber`] facade with the
//! `test-util`-gated doubles in [`pgscrub_core::test_support`]. One
//! `#[test_case]` row per scenario, same shape `mod tests` in `scrubber.rs`
//! already uses for its own fixtures.

use std::cell::RefCell;

use bytes::Bytes;
use test_case::test_case;

use pgscrub_core::chunk_selector;
use pgscrub_core::config::Config;
use pgscrub_core::host::{ComparisonResult, ScrubMap, ScrubStore, ScrubStoreFactory};
use pgscrub_core::machine::{MachineState, ScrubEvent, ScrubFlags, ScrubMachine};
use pgscrub_core::message::RepScrubMap;
use pgscrub_core::scheduler::Scheduler;
use pgscrub_core::scrubber::{PgScrubber, StartScrubRequest};
use pgscrub_core::test_support::{FakeOsdServices, FakePgHost, FakeScrubStore, SentMessage};
use pgscrub_types::{Epoch, ObjectKey, PgId, ShardId};

struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn after(&self, _delay: std::time::Duration, job: pgscrub_core::scheduler::ScheduledJob) {
        job();
    }

    fn enqueue(&self, _pg: PgId, _priority: pgscrub_types::ScrubPriority, job: pgscrub_core::scheduler::ScheduledJob) {
        job();
    }
}

struct FakeStoreFactory {
    created: RefCell<u32>,
}

impl ScrubStoreFactory for FakeStoreFactory {
    fn create(&self, _pg: PgId) -> Box<dyn ScrubStore> {
        *self.created.borrow_mut() += 1;
        Box::new(FakeScrubStore::default())
    }
}

fn request(check_repair: bool) -> StartScrubRequest {
    StartScrubRequest {
        must_scrub: true,
        need_auto: false,
        deep: false,
        auto_repair: true,
        check_repair,
        deep_scrub_on_error: false,
    }
}

/// §8 scenario 1: an empty PG completes a shallow scrub in one tick with no
/// errors and no repairs.
fn scenario_1_empty_pg_shallow_scrub() {
    let osd = FakeOsdServices::default();
    let scheduler = InlineScheduler;
    let store_factory = FakeStoreFactory { created: RefCell::new(0) };
    let pg = PgId::new(1);
    let whoami = ShardId::new(0);
    let mut host = FakePgHost::new(pg, whoami, vec![whoami]);

    let mut scrubber = PgScrubber::new(pg, whoami, &osd, &scheduler, &store_factory, Config::default());
    scrubber.start_scrub(&mut host, request(true)).unwrap();
    scrubber.sched_tick(&mut host);

    assert_eq!(scrubber.query_state().state, MachineState::NotActive);
    assert_eq!(*store_factory.created.borrow(), 1);
    let outcomes = host.stamps_updated.borrow();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].shallow_errors, 0);
    assert_eq!(outcomes[0].deep_errors, 0);
    assert!(!outcomes[0].errors_fixed);
    assert!(host.repaired.borrow().is_empty());
}

fn run_two_replica_divergent_session(check_repair: bool) -> (FakePgHost, FakeOsdServices, ObjectKey) {
    let osd = FakeOsdServices::default();
    let scheduler = InlineScheduler;
    let store_factory = FakeStoreFactory { created: RefCell::new(0) };
    let pg = PgId::new(1);
    let primary = ShardId::new(0);
    let replica = ShardId::new(1);
    let mut host = FakePgHost::new(pg, primary, vec![primary, replica]);
    let divergent = ObjectKey::head("a");
    host.objects = vec![divergent.clone()];
    host.comparison = ComparisonResult {
        missing: vec![],
        inconsistent: vec![divergent.clone()],
        authoritative: [(divergent.clone(), vec![primary])].into_iter().collect(),
        missing_digest: vec![],
        shallow_errors_delta: 1,
        deep_errors_delta: 0,
    };

    let mut scrubber = PgScrubber::new(pg, primary, &osd, &scheduler, &store_factory, Config::default());
    scrubber.start_scrub(&mut host, request(check_repair)).unwrap();
    // Two-member acting set: the reservation stays pending until the
    // replica's grant arrives.
    assert_ne!(scrubber.query_state().state, MachineState::NotActive);
    scrubber.on_reserve_grant(&mut host, replica);
    scrubber.sched_tick(&mut host);

    // The local map is built synchronously, but the chunk can't close until
    // the replica's map arrives.
    assert_ne!(scrubber.query_state().state, MachineState::NotActive, "still waiting on the replica's map");
    let sent_request = osd.sent_to(replica);
    assert_eq!(sent_request.len(), 1, "one RepScrubRequest issued to the replica");

    let map = ScrubMap::default();
    let bytes = postcard::to_allocvec(&map).unwrap();
    scrubber.on_replica_map(
        &mut host,
        RepScrubMap {
            map_epoch: Epoch::new(1),
            from: replica,
            preempted: false,
            scrub_map_bytes: Bytes::from(bytes),
        },
    );

    assert_eq!(scrubber.query_state().state, MachineState::NotActive, "a single-chunk session finishes once the replica map lands");
    drop(scrubber);
    (host, osd, divergent)
}

/// §8 scenario 2: two replicas disagree on one object; `checkRepair` is off,
/// so the divergence is recorded but nothing is written back.
fn scenario_2_divergent_object_no_repair() {
    let (host, _osd, _divergent) = run_two_replica_divergent_session(false);
    let outcomes = host.stamps_updated.borrow();
    assert_eq!(outcomes[0].shallow_errors, 1);
    assert!(!outcomes[0].errors_fixed);
    assert!(host.repaired.borrow().is_empty(), "checkRepair is off, nothing should be written back");
}

/// §8 scenario 3: the same divergence, with `checkRepair`/`autoRepair` on —
/// the authoritative copy is pushed to the disagreeing shard.
fn scenario_3_divergent_object_with_repair() {
    let (host, _osd, divergent) = run_two_replica_divergent_session(true);
    let outcomes = host.stamps_updated.borrow();
    assert!(outcomes[0].errors_fixed);
    assert_eq!(outcomes[0].shallow_errors, 0, "a fully repaired session clears its error counters");
    assert!(!outcomes[0].scrub_after_recovery);
    assert!(!outcomes[0].failed_repair);
    assert_eq!(*host.repaired.borrow(), vec![divergent]);
}

/// §8 scenario 4: a replica rejects the reservation request; the session
/// aborts without ever reaching chunk selection.
fn scenario_4_reservation_reject() {
    let osd = FakeOsdServices::default();
    let scheduler = InlineScheduler;
    let store_factory = FakeStoreFactory { created: RefCell::new(0) };
    let pg = PgId::new(1);
    let primary = ShardId::new(0);
    let replica = ShardId::new(1);
    let mut host = FakePgHost::new(pg, primary, vec![primary, replica]);

    let mut scrubber = PgScrubber::new(pg, primary, &osd, &scheduler, &store_factory, Config::default());
    scrubber.start_scrub(&mut host, request(true)).unwrap();
    scrubber.on_reserve_reject(&mut host, replica);

    assert_eq!(scrubber.query_state().state, MachineState::NotActive);
    assert!(host.stamps_updated.borrow().is_empty(), "a rejected session never reaches scrubFinish");
    assert_eq!(osd.local_in_use(), 0, "the local reservation is released on abort");
    // The scrubber must accept a fresh start once torn down.
    assert!(scrubber.start_scrub(&mut host, request(true)).is_ok());
}

/// §8 scenario 5: the interval changes mid-session; the primary unwinds and
/// releases the still-awaiting peer's reservation.
fn scenario_5_epoch_change_mid_session() {
    let osd = FakeOsdServices::default();
    let scheduler = InlineScheduler;
    let store_factory = FakeStoreFactory { created: RefCell::new(0) };
    let pg = PgId::new(1);
    let primary = ShardId::new(0);
    let replica = ShardId::new(1);
    let mut host = FakePgHost::new(pg, primary, vec![primary, replica]);

    let mut scrubber = PgScrubber::new(pg, primary, &osd, &scheduler, &store_factory, Config::default());
    scrubber.start_scrub(&mut host, request(true)).unwrap();
    assert_ne!(scrubber.query_state().state, MachineState::NotActive, "awaiting the replica's reservation grant");

    host.same_interval_since.set(Epoch::new(2));
    scrubber.on_epoch_changed(&mut host);

    assert_eq!(scrubber.query_state().state, MachineState::NotActive);
    assert!(!host.recovery_queued.get(), "an unwound session never ran scrubFinish, so there is nothing to recover");
    let released = osd.sent_to(replica).into_iter().filter(|m| matches!(m, SentMessage::ReserveRelease { .. })).count();
    assert_eq!(released, 1);
}

/// §8 scenario 6: a concurrent client write lands inside the active chunk
/// and preempts it; the next chunk is selected with a halved window.
fn scenario_6_preemption_from_concurrent_write() {
    let mut machine = ScrubMachine::new(PgId::new(1), 3);
    machine.start_primary(Epoch::new(1), ObjectKey::head(""), false, ScrubFlags::default());
    machine.apply(ScrubEvent::RemotesReserved);
    machine.apply(ScrubEvent::InternalSchedScrub);
    assert_eq!(machine.preemption().chunk_divisor(), 1);

    let blocked = machine.preemption_mut().on_write_in_range(PgId::new(1));
    assert!(!blocked, "the write is let through by yielding the current chunk");
    assert!(machine.preemption().is_preempted());
    assert_eq!(machine.preemption().chunk_divisor(), 2);

    let mut host = FakePgHost::new(PgId::new(1), ShardId::new(0), vec![ShardId::new(0)]);
    host.objects = (0..40).map(|i| ObjectKey::head(format!("obj-{i:03}"))).collect();
    let halved = chunk_selector::select_chunk(&host, PgId::new(1), &ObjectKey::head(""), 20, 20, machine.preemption().chunk_divisor());
    let unpreempted = chunk_selector::select_chunk(&host, PgId::new(1), &ObjectKey::head(""), 20, 20, 1);
    assert_ne!(halved, unpreempted, "a doubled divisor must select a narrower chunk than an unpreempted one would");
}

#[test_case(scenario_1_empty_pg_shallow_scrub; "empty_pg_shallow_scrub")]
#[test_case(scenario_2_divergent_object_no_repair; "two_replicas_one_divergent_object_no_repair")]
#[test_case(scenario_3_divergent_object_with_repair; "two_replicas_one_divergent_object_with_repair")]
#[test_case(scenario_4_reservation_reject; "reservation_reject_aborts_before_chunk_selection")]
#[test_case(scenario_5_epoch_change_mid_session; "epoch_change_mid_session_unwinds_and_releases")]
#[test_case(scenario_6_preemption_from_concurrent_write; "preemption_from_concurrent_write_halves_the_next_chunk")]
fn end_to_end_scenario(run: fn()) {
    run();
}
