//! C6: `ChunkSelector` — picks `[start, end)` ranges honoring head/clone
//! boundaries and write availability.
//!
//! The bounds arithmetic (floor of 3, divide by the preemption divisor) and
//! the head/clone back-off loop follow the source's `select_range`
//! literally; nothing here is guesswork. The budget/backoff *shape* —
//! shrink the ask, retry, never block — mirrors the rate-limited scanning
//! idiom in `log_scrubber.rs`'s tour, even though that file's actual
//! wraparound mechanic doesn't apply to a bounded key space.

use pgscrub_types::{ObjectKey, PgId};

use crate::host::PgHost;

/// Outcome of one chunk-selection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkSelection {
    /// `[start, selected_end)` is ready to scan.
    Selected(ObjectKey),
    /// The candidate range is currently blocked by a concurrent writer;
    /// abandon this attempt and let the write's completion re-queue the
    /// session.
    RangeUnavailable,
}

/// Picks the next chunk end starting at `start`, given the configured
/// object-count bounds and the current preemption divisor (§4.6).
///
/// # Panics
///
/// Panics if the backend's listing keeps returning objects that all share
/// one head with no way to reach a boundary — the source treats this as an
/// invariant violation ("somehow we got more than 2 objects which have the
/// same head but are not clones"), not a recoverable condition.
pub fn select_chunk(host: &dyn PgHost, pg: PgId, start: &ObjectKey, chunk_min: u32, chunk_max: u32, divisor: u32) -> ChunkSelection {
    let min_idx = 3usize.max((chunk_min / divisor.max(1)) as usize);
    let max_idx = min_idx.max((chunk_max / divisor.max(1)) as usize);

    let (mut objects, mut candidate_end) = host.objects_list_partial(start, min_idx, max_idx);

    if objects.is_empty() {
        assert!(
            candidate_end.is_max(),
            "empty object listing must report the key-space maximum as its candidate end"
        );
    } else {
        loop {
            let last_head = objects.last().expect("checked non-empty above").head_key();
            if !candidate_end.is_head() || candidate_end != last_head {
                break;
            }
            // The cut landed on a head whose clone we just listed: pull the
            // clone out of this chunk and back the boundary up to it, so
            // head and clone end up on the same side.
            let popped = objects.pop().expect("checked non-empty above");
            assert!(
                !popped.is_head(),
                "two objects shared a head but the popped entry was itself a head, not a clone"
            );
            candidate_end = popped;
            assert!(
                !objects.is_empty() || !candidate_end.is_head(),
                "ran out of objects while chasing a shared head boundary"
            );
        }
        if candidate_end.is_head() {
            candidate_end = host.object_boundary(&candidate_end);
        }
    }

    if !host.range_available_for_scrub(start, &candidate_end) {
        tracing::debug!(%pg, %start, end = %candidate_end, "scrub range currently blocked by a writer, abandoning this chunk attempt");
        return ChunkSelection::RangeUnavailable;
    }

    ChunkSelection::Selected(candidate_end)
}
