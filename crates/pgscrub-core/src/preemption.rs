//! C1: preemption state.
//!
//! Tracks whether the current chunk may be yielded to a concurrent client
//! write, how many times that has already happened this session, and the
//! divisor future chunks should shrink by as a result. Grounded on the
//! source's `preemption_data_t` (`pg_scrubber.cc`): a small counter checked
//! before the costly operation and decremented after, rather than a generic
//! rate-limiter abstraction.

use pgscrub_types::PgId;

/// Preemption bookkeeping for one scrub session (§3 `PreemptionState`, §4.6
/// `writeBlockedByScrub`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreemptionState {
    preemptible: bool,
    preempted: bool,
    remaining_budget: u32,
    chunk_divisor: u32,
    max_preemptions: u32,
}

impl PreemptionState {
    /// Starts a fresh session's preemption state with the configured
    /// budget. `preemptible` starts `true`: each chunk is eligible to yield
    /// until the budget is spent (B3).
    #[must_use]
    pub fn new(max_preemptions: u32) -> Self {
        Self {
            preemptible: true,
            preempted: false,
            remaining_budget: max_preemptions,
            chunk_divisor: 1,
            max_preemptions,
        }
    }

    /// A session that never allows preemption (`allowPreemption == false`
    /// on an inbound `RepScrubRequest`, §6 wire messages): every write in
    /// range blocks, for the whole session.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            preemptible: false,
            preempted: false,
            remaining_budget: 0,
            chunk_divisor: 1,
            max_preemptions: 0,
        }
    }

    #[must_use]
    pub fn max_preemptions(&self) -> u32 {
        self.max_preemptions
    }

    /// Resets the per-chunk `preempted` flag when a new chunk begins
    /// (`NewChunk` entry, §4.2). The budget and divisor persist across
    /// chunks within a session.
    pub fn reset_for_new_chunk(&mut self) {
        self.preempted = false;
    }

    #[must_use]
    pub fn is_preemptible(&self) -> bool {
        self.preemptible
    }

    #[must_use]
    pub fn is_preempted(&self) -> bool {
        self.preempted
    }

    #[must_use]
    pub fn chunk_divisor(&self) -> u32 {
        self.chunk_divisor
    }

    /// Records a preemption: doubles the chunk divisor (future chunks are
    /// smaller, reducing redo cost), spends one unit of budget, and forces
    /// `preemptible := false` once the budget is exhausted (B3).
    pub fn record_preemption(&mut self, pg: PgId) {
        self.preempted = true;
        self.chunk_divisor = self.chunk_divisor.saturating_mul(2);
        self.remaining_budget = self.remaining_budget.saturating_sub(1);
        if self.remaining_budget == 0 {
            self.preemptible = false;
            tracing::debug!(%pg, max = self.max_preemptions, "scrub preemption budget exhausted, no longer preemptible");
        }
    }

    /// `writeBlockedByScrub`'s decision for an object inside the current
    /// chunk (range check is the caller's job, §4.6): `true` means the write
    /// must wait, `false` means it proceeds (either because we yielded the
    /// chunk just now, or because we already did earlier this chunk).
    pub fn on_write_in_range(&mut self, pg: PgId) -> bool {
        if !self.preemptible {
            return true;
        }
        if self.preempted {
            return false;
        }
        self.record_preemption(pg);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_preemptible_with_no_preemptions_yet() {
        let p = PreemptionState::new(3);
        assert!(p.is_preemptible());
        assert!(!p.is_preempted());
        assert_eq!(p.chunk_divisor(), 1);
    }

    #[test]
    fn first_write_in_range_preempts_and_lets_write_through() {
        let mut p = PreemptionState::new(3);
        let blocked = p.on_write_in_range(PgId::new(1));
        assert!(!blocked);
        assert!(p.is_preempted());
        assert_eq!(p.chunk_divisor(), 2);
    }

    #[test]
    fn second_write_same_chunk_also_proceeds_without_spending_budget_again() {
        let mut p = PreemptionState::new(3);
        p.on_write_in_range(PgId::new(1));
        let blocked = p.on_write_in_range(PgId::new(1));
        assert!(!blocked);
        assert_eq!(p.chunk_divisor(), 2, "divisor must not double again in the same chunk");
    }

    #[test]
    fn budget_exhaustion_forces_not_preemptible_for_rest_of_session() {
        let mut p = PreemptionState::new(1);
        p.on_write_in_range(PgId::new(1));
        assert!(!p.is_preemptible());
        p.reset_for_new_chunk();
        let blocked = p.on_write_in_range(PgId::new(1));
        assert!(blocked, "once budget is exhausted the write must wait");
    }

    #[test]
    fn reset_for_new_chunk_clears_preempted_but_keeps_divisor_and_budget() {
        let mut p = PreemptionState::new(5);
        p.on_write_in_range(PgId::new(1));
        p.reset_for_new_chunk();
        assert!(!p.is_preempted());
        assert_eq!(p.chunk_divisor(), 2);
    }
}
