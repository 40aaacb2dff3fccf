//! C2 (`LocalReservation`) and C3 (`RemotePrimaryReservation`): scoped
//! acquisition of one OSD-wide scrub slot.
//!
//! Both wrap the same shape: construction attempts to increment a shared
//! counter; the value reports whether it actually holds the slot; dropping
//! it (or calling `early_release` explicitly) decrements the counter
//! exactly once. Modeled as plain values whose `Drop` does the release, per
//! the design note in §9 — not as a callback or RAII guard over a raw
//! pointer.

use pgscrub_types::PgId;

use crate::host::OsdServices;

/// A scoped hold on the local OSD's scrub slot (`localScrubs`), acquired
/// when a PG on this OSD starts a primary scrub session.
pub struct LocalReservation<'a> {
    osd: &'a dyn OsdServices,
    pg: PgId,
    held: bool,
}

impl<'a> LocalReservation<'a> {
    /// Attempts to acquire the slot immediately. Check [`Self::held`] to see
    /// whether it succeeded — a failed attempt still returns a value (one
    /// that releases nothing on drop) rather than an `Option`, so callers
    /// can use the same scoping idiom either way.
    #[must_use]
    pub fn acquire(osd: &'a dyn OsdServices, pg: PgId) -> Self {
        let held = osd.inc_scrubs_local();
        Self { osd, pg, held }
    }

    #[must_use]
    pub fn held(&self) -> bool {
        self.held
    }

    /// Releases the slot now instead of waiting for drop. Idempotent: a
    /// second call (or the subsequent drop) is a no-op (R2).
    pub fn early_release(&mut self) {
        if self.held {
            self.osd.dec_scrubs_local();
            self.held = false;
            tracing::debug!(pg = %self.pg, "released local scrub reservation");
        }
    }
}

impl Drop for LocalReservation<'_> {
    fn drop(&mut self) {
        self.early_release();
    }
}

/// A scoped hold on this OSD's slot reserved for scrubbing a chunk on behalf
/// of a remote primary (`remoteScrubs`), acquired when this OSD starts a
/// replica scrub session.
pub struct RemotePrimaryReservation<'a> {
    osd: &'a dyn OsdServices,
    pg: PgId,
    held: bool,
}

impl<'a> RemotePrimaryReservation<'a> {
    #[must_use]
    pub fn acquire(osd: &'a dyn OsdServices, pg: PgId) -> Self {
        let held = osd.inc_scrubs_remote();
        Self { osd, pg, held }
    }

    #[must_use]
    pub fn held(&self) -> bool {
        self.held
    }

    pub fn early_release(&mut self) {
        if self.held {
            self.osd.dec_scrubs_remote();
            self.held = false;
            tracing::debug!(pg = %self.pg, "released remote-primary scrub reservation");
        }
    }
}

impl Drop for RemotePrimaryReservation<'_> {
    fn drop(&mut self) {
        self.early_release();
    }
}
