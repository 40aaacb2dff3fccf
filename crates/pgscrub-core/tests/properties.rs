//! Algebraic properties from SPEC_FULL.md §8, run against the public API via
//! the `test-util`-gated doubles in [`pgscrub_core::test_support`]. Colocated
//! `#[cfg(test)]` unit tests already cover each property's boundary case
//! with a hand-picked example; these `proptest!` blocks sweep the
//! surrounding input space the way the workspace's own property tests sweep
//! theirs.

use proptest::prelude::*;

use pgscrub_core::test_support::{FakeOsdServices, FakePgHost};
use pgscrub_core::chunk_selector::{self, ChunkSelection};
use pgscrub_core::machine::{ScrubEvent, ScrubFlags, ScrubMachine};
use pgscrub_core::reservation::LocalReservation;
use pgscrub_core::replica_reservations::ReplicaReservations;
use pgscrub_types::{Epoch, ObjectKey, PgId, ShardId};

fn object_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,8}", 0..40).prop_map(|mut names| {
        names.sort();
        names.dedup();
        names
    })
}

fn host_with_names(names: &[String]) -> FakePgHost {
    let mut host = FakePgHost::new(PgId::new(1), ShardId::new(0), vec![ShardId::new(0)]);
    host.objects = names.iter().map(|n| ObjectKey::head(n.clone())).collect();
    host
}

proptest! {
    /// P1: while active, `chunk_start <= chunk_end <= max_end`, and `max_end`
    /// never regresses as chunks are selected one after another.
    #[test]
    fn p1_chunk_bounds_stay_ordered_and_max_end_is_monotonic(names in object_names()) {
        let host = host_with_names(&names);
        let mut machine = ScrubMachine::new(PgId::new(1), 3);
        machine.start_primary(Epoch::new(1), ObjectKey::head(""), false, ScrubFlags::default());
        machine.apply(ScrubEvent::RemotesReserved);

        let mut previous_max = machine.max_end().clone();
        for _ in 0..names.len() + 2 {
            machine.apply(ScrubEvent::InternalSchedScrub);
            let divisor = machine.preemption().chunk_divisor();
            let cursor = machine.chunk_start().clone();
            match chunk_selector::select_chunk(&host, PgId::new(1), &cursor, 5, 10, divisor) {
                ChunkSelection::Selected(end) => {
                    let was_max = end.is_max();
                    machine.on_chunk_selected(end);
                    prop_assert!(machine.chunk_start() <= machine.chunk_end());
                    prop_assert!(machine.chunk_end() <= machine.max_end());
                    prop_assert!(machine.max_end() >= &previous_max);
                    previous_max = machine.max_end().clone();

                    // Drive the rest of the chunk to completion so the next
                    // loop iteration starts back at PendingTimer, the way a
                    // real session advances chunkStart only after comparison.
                    machine.apply(ScrubEvent::ActivePushesUpd);
                    machine.apply(ScrubEvent::UpdatesApplied);
                    machine.on_local_map_built();
                    machine.apply(ScrubEvent::GotReplicas);
                    machine.apply(ScrubEvent::DigestUpdate { pending_digests: 0 });
                    if was_max {
                        break;
                    }
                }
                ChunkSelection::RangeUnavailable => break,
            }
        }
    }

    /// P3: a PG never holds more than one outstanding local reservation at a
    /// time, however many sequential acquire/release cycles run.
    #[test]
    fn p3_local_reservation_count_is_never_more_than_one(cycles in 1usize..20) {
        let osd = FakeOsdServices::with_local_capacity(1);
        for _ in 0..cycles {
            let r = LocalReservation::acquire(&osd, PgId::new(1));
            prop_assert!(r.held());
            prop_assert!(osd.local_in_use() <= 1);
            drop(r);
            prop_assert_eq!(osd.local_in_use(), 0);
        }
    }

    /// R2: calling `early_release` any number of times before drop never
    /// decrements the shared counter more than once.
    #[test]
    fn r2_early_release_is_idempotent_under_repeated_calls(calls in 0usize..10) {
        let osd = FakeOsdServices::with_local_capacity(1);
        let mut r = LocalReservation::acquire(&osd, PgId::new(1));
        prop_assert!(r.held());
        for _ in 0..calls {
            r.early_release();
        }
        drop(r);
        prop_assert_eq!(osd.local_in_use(), 0);
    }

    /// R3: however many peers are still outstanding when `ReplicaReservations`
    /// is destroyed, destruction releases every granted-or-awaiting peer
    /// exactly once.
    #[test]
    fn r3_destruction_releases_every_outstanding_peer_exactly_once(
        peer_count in 1u32..8,
        granted_count in 0u32..8,
    ) {
        let granted_count = granted_count.min(peer_count);
        let osd = FakeOsdServices::default();
        let pg = PgId::new(1);
        let peers: Vec<ShardId> = (1..=peer_count).map(ShardId::new).collect();
        let mut acting = vec![ShardId::new(0)];
        acting.extend(peers.iter().copied());

        drop({
            let (mut reservations, _) = ReplicaReservations::request(&osd, pg, Epoch::new(1), ShardId::new(0), &acting);
            for peer in peers.iter().take(granted_count as usize) {
                reservations.on_grant(*peer);
            }
            reservations
        });

        let total_releases: usize = peers
            .iter()
            .map(|p| osd.sent_to(*p).len())
            .sum();
        prop_assert_eq!(total_releases, peers.len(), "every peer gets exactly one release, granted or not");
    }
}

/// B1 restated as a property rather than a single fixed-size example: any
/// acting set containing only ourselves grants immediately with no messages
/// sent, regardless of how the set is constructed.
#[test]
fn b1_solo_acting_set_always_grants_immediately() {
    let osd = FakeOsdServices::default();
    for whoami in [ShardId::new(0), ShardId::new(7), ShardId::new(200)] {
        let (_r, outcome) = ReplicaReservations::request(&osd, PgId::new(1), Epoch::new(1), whoami, &[whoami]);
        assert_eq!(outcome, pgscrub_core::replica_reservations::ReservationOutcome::AllGranted);
    }
    assert!(osd.sent.borrow().is_empty());
}

/// P6 restated for the machine directly: a `DigestUpdate` carrying a
/// positive `pending_digests` never moves the session past
/// `WaitDigestUpdates`, for any positive count.
proptest! {
    #[test]
    fn p6_pending_digests_always_stalls_the_finish_decision(pending in 1usize..1000) {
        let mut m = ScrubMachine::new(PgId::new(1), 3);
        m.start_primary(Epoch::new(1), ObjectKey::head(""), false, ScrubFlags::default());
        m.apply(ScrubEvent::RemotesReserved);
        m.apply(ScrubEvent::InternalSchedScrub);
        m.on_chunk_selected(ObjectKey::max());
        m.apply(ScrubEvent::ActivePushesUpd);
        m.apply(ScrubEvent::UpdatesApplied);
        m.on_local_map_built();
        m.apply(ScrubEvent::GotReplicas);
        let t = m.apply(ScrubEvent::DigestUpdate { pending_digests: pending });
        prop_assert_eq!(t, pgscrub_core::machine::Transition::Stay);
    }
}
