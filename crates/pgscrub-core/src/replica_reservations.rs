//! C4: `ReplicaReservations` — collective request/grant/reject across the
//! acting set.
//!
//! Grounded on the quorum-collection shape of `replica/repair.rs`'s
//! `RepairState` (a `responses`/`nacks` map driven to a decision by each
//! incoming reply), simplified to this protocol's actual semantics: any
//! single rejection fails the whole reservation, and recovering from
//! destruction must not leak a slot on a peer whose grant is still in
//! flight.

use std::collections::BTreeSet;

use pgscrub_types::PgId;

use crate::host::OsdServices;
use crate::message::{ScrubReserveGrant, ScrubReserveReject, ScrubReserveRelease, ScrubReserveRequest};

/// Outcome of processing one reply, or of construction/destruction itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// No externally visible change yet (still waiting on replies).
    Pending,
    /// Every peer has granted. Emitted at most once per instance.
    AllGranted,
    /// At least one peer rejected. Emitted at most once per instance.
    AnyRejected,
}

/// Tracks the in-flight collective reservation for one primary scrub
/// session. One instance per `ReservingReplicas` sojourn (§4.2); dropping it
/// releases everything outstanding.
pub struct ReplicaReservations<'a> {
    osd: &'a dyn OsdServices,
    pg: PgId,
    epoch: pgscrub_types::Epoch,
    self_id: pgscrub_types::ShardId,
    pending: usize,
    granted: Vec<pgscrub_types::ShardId>,
    awaiting: BTreeSet<pgscrub_types::ShardId>,
    had_rejection: bool,
    all_granted_emitted: bool,
}

impl<'a> ReplicaReservations<'a> {
    /// Sends a `REQUEST` to every peer in `acting` other than `self_id`. An
    /// acting set containing only `self_id` completes immediately with
    /// `AllGranted` (B1) without sending any message.
    #[must_use]
    pub fn request(
        osd: &'a dyn OsdServices,
        pg: PgId,
        epoch: pgscrub_types::Epoch,
        self_id: pgscrub_types::ShardId,
        acting: &[pgscrub_types::ShardId],
    ) -> (Self, ReservationOutcome) {
        let peers: Vec<_> = acting.iter().copied().filter(|s| *s != self_id).collect();
        let mut awaiting = BTreeSet::new();
        for peer in &peers {
            awaiting.insert(*peer);
            osd.send_reserve_request(*peer, pg, ScrubReserveRequest { map_epoch: epoch, from: self_id });
        }
        let pending = peers.len();
        let mut this = Self {
            osd,
            pg,
            epoch,
            self_id,
            pending,
            granted: Vec::new(),
            awaiting,
            had_rejection: false,
            all_granted_emitted: false,
        };
        let outcome = if pending == 0 {
            this.all_granted_emitted = true;
            ReservationOutcome::AllGranted
        } else {
            ReservationOutcome::Pending
        };
        (this, outcome)
    }

    /// Handles an incoming grant. A grant arriving after a rejection (or
    /// arriving twice for the same peer) is absorbed silently — no event,
    /// no double-decrement (R3).
    pub fn on_grant(&mut self, from: pgscrub_types::ShardId) -> ReservationOutcome {
        if self.had_rejection {
            self.osd.send_reserve_release(from, self.pg, ScrubReserveRelease { map_epoch: self.epoch, from: self.self_id });
            self.awaiting.remove(&from);
            return ReservationOutcome::Pending;
        }
        if !self.awaiting.remove(&from) {
            // Already granted (duplicate reply) or never requested: dedup.
            return ReservationOutcome::Pending;
        }
        if self.granted.contains(&from) {
            return ReservationOutcome::Pending;
        }
        self.granted.push(from);
        self.pending = self.pending.saturating_sub(1);
        if self.pending == 0 && !self.all_granted_emitted {
            self.all_granted_emitted = true;
            tracing::debug!(pg = %self.pg, "all replica scrub reservations granted");
            return ReservationOutcome::AllGranted;
        }
        ReservationOutcome::Pending
    }

    /// Handles an incoming rejection. Only the first rejection is
    /// observable; later replies (grant or reject) are late-arrival no-ops.
    pub fn on_reject(&mut self, from: pgscrub_types::ShardId) -> ReservationOutcome {
        self.awaiting.remove(&from);
        if self.had_rejection {
            return ReservationOutcome::Pending;
        }
        self.had_rejection = true;
        tracing::debug!(pg = %self.pg, shard = %from, "replica scrub reservation rejected");
        ReservationOutcome::AnyRejected
    }

    /// Releases every granted peer, plus every peer still outstanding if
    /// any are, and marks further replies as late. Equivalent to C++'s
    /// `release_all`. Called both explicitly (on `ReservationFailure`) and
    /// from `Drop`, so calling it twice must be safe.
    pub fn release_all(&mut self) {
        if self.had_rejection && self.granted.is_empty() && self.awaiting.is_empty() {
            return;
        }
        // Order matters: mark stale *before* sending releases so a grant
        // racing this teardown sees `had_rejection` and self-releases
        // instead of being double-released here.
        self.had_rejection = true;
        for peer in self.granted.drain(..) {
            self.osd.send_reserve_release(peer, self.pg, ScrubReserveRelease { map_epoch: self.epoch, from: self.self_id });
        }
        for peer in std::mem::take(&mut self.awaiting) {
            self.osd.send_reserve_release(peer, self.pg, ScrubReserveRelease { map_epoch: self.epoch, from: self.self_id });
        }
        self.pending = 0;
    }

    #[must_use]
    pub fn granted_count(&self) -> usize {
        self.granted.len()
    }

    #[must_use]
    pub fn is_awaiting_anyone(&self) -> bool {
        !self.awaiting.is_empty()
    }
}

impl Drop for ReplicaReservations<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}
