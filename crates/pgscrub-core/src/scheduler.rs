//! C9: scheduler integration — sleep/requeue and priority computation.
//!
//! Per the design note in §9, the OSD's timer and work queue are abstracted
//! as a trait rather than modeled with ambient timers: `after` is the
//! `PendingTimer` sojourn's wall-clock sleep, `enqueue` is every other
//! requeue (a map-build slice boundary, a reservation reply, a chunk
//! abandoned for write availability). Nothing in this crate calls
//! `std::thread::sleep` or spawns its own timer thread.

use std::time::Duration;

use pgscrub_types::{PgId, ScrubPriority};

/// A deferred unit of work, handed back to the scheduler's caller once due.
/// Boxed rather than generic so `Scheduler` stays object-safe — a real
/// implementation stores these in a timer wheel or a work queue keyed by
/// `PgId`, not on this crate's call stack.
pub type ScheduledJob = Box<dyn FnOnce() + Send>;

/// The OSD-wide sleep/requeue surface (§6, `OsdServices (consumed)`
/// `sleepTimer`/`queueFor*` family; §9 design note).
pub trait Scheduler {
    /// Runs `job` no sooner than `delay` from now, on whatever thread the
    /// scheduler's event loop uses. This is the sole suspension point that
    /// is a true wall-clock sleep (`PendingTimer`, §5); every other wait in
    /// this crate is a same-tick state transition.
    fn after(&self, delay: Duration, job: ScheduledJob);

    /// Re-enters `pg` into the work queue at `priority` with no delay —
    /// the cooperative re-entry used by a map-build slice boundary, a
    /// reservation reply, or a chunk abandoned for write availability
    /// (§5 "Suspension points").
    fn enqueue(&self, pg: PgId, priority: ScrubPriority, job: ScheduledJob);
}

/// Computes the delay before the next `PendingTimer` wakeup, honoring
/// `markedMust` (an explicitly requested scrub skips the inter-chunk sleep
/// window, per `OsdServices::scrub_sleep_time`).
#[must_use]
pub fn chunk_sleep(osd: &dyn crate::host::OsdServices, marked_must: bool) -> Duration {
    osd.scrub_sleep_time(marked_must)
}

/// The priority a requeue should carry: the session's own priority, coerced
/// upward to at least the configured client-op floor so scrub work is never
/// starved behind it (§4.1, `Config::coerce_high_priority`).
#[must_use]
pub fn requeue_priority(cfg: &crate::config::Config, session_priority: ScrubPriority) -> ScrubPriority {
    cfg.coerce_high_priority(session_priority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct FakeScheduler {
        after_calls: RefCell<Vec<Duration>>,
        enqueue_calls: RefCell<Vec<(PgId, ScrubPriority)>>,
        ran: Cell<u32>,
    }

    impl Scheduler for FakeScheduler {
        fn after(&self, delay: Duration, job: ScheduledJob) {
            self.after_calls.borrow_mut().push(delay);
            job();
            self.ran.set(self.ran.get() + 1);
        }

        fn enqueue(&self, pg: PgId, priority: ScrubPriority, job: ScheduledJob) {
            self.enqueue_calls.borrow_mut().push((pg, priority));
            job();
            self.ran.set(self.ran.get() + 1);
        }
    }

    #[test]
    fn after_records_the_requested_delay_and_runs_the_job() {
        let sched = FakeScheduler::default();
        sched.after(Duration::from_secs(5), Box::new(|| {}));
        assert_eq!(sched.after_calls.borrow().as_slice(), [Duration::from_secs(5)]);
        assert_eq!(sched.ran.get(), 1);
    }

    #[test]
    fn enqueue_records_the_pg_and_priority() {
        let sched = FakeScheduler::default();
        sched.enqueue(PgId::new(7), ScrubPriority::new(3), Box::new(|| {}));
        assert_eq!(sched.enqueue_calls.borrow().as_slice(), [(PgId::new(7), ScrubPriority::new(3))]);
    }

    #[test]
    fn requeue_priority_coerces_up_to_the_client_op_floor() {
        let cfg = crate::config::Config::default();
        let low = ScrubPriority::new(0);
        assert_eq!(requeue_priority(&cfg, low), cfg.client_op_priority);
    }

    #[test]
    fn requeue_priority_never_lowers_an_already_high_session() {
        let cfg = crate::config::Config::default();
        let high = cfg.client_op_priority.max(ScrubPriority::new(255));
        assert_eq!(requeue_priority(&cfg, high), high);
    }
}
