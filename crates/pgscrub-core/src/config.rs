//! Scrub-tunable configuration.
//!
//! Captured by value at session start (see [`crate::scrubber::PgScrubber::start_scrub`])
//! rather than read through a global singleton, per the design note calling
//! for one consistent `Config` source per session: tests inject overrides by
//! constructing a [`Config`] directly, and a running process loads one from
//! whatever surrounds this crate (a TOML file, a cluster-wide config store)
//! before a session begins.

use serde::{Deserialize, Serialize};

use pgscrub_types::ScrubPriority;

/// Scrub-tunable configuration, captured once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lower bound on objects per chunk (before dividing by the preemption
    /// chunk divisor).
    pub scrub_chunk_min: u32,
    /// Upper bound on objects per chunk (before dividing by the preemption
    /// chunk divisor).
    pub scrub_chunk_max: u32,
    /// Number of times a chunk may be preempted by a concurrent write before
    /// the session stops yielding and starts blocking writers.
    pub scrub_max_preemptions: u32,
    /// Authoritative-set size above which auto-repair is suppressed for the
    /// session (a runaway-repair guard).
    pub auto_repair_max_errors: usize,
    /// Priority used for a session whose request was marked `mustScrub` or
    /// `needAuto`.
    pub requested_scrub_priority: ScrubPriority,
    /// Priority floor applied when a caller asks to enqueue "with priority"
    /// (coerces to at least this value).
    pub client_op_priority: ScrubPriority,
    /// Permits granting a replica reservation while recovery is active on
    /// this OSD.
    pub scrub_during_recovery: bool,
    /// Forces an immediate scrub registration when the PG's stored stats are
    /// invalid, bypassing the normal interval scheduling.
    pub scrub_invalid_stats: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scrub_chunk_min: 50,
            scrub_chunk_max: 200,
            scrub_max_preemptions: 5,
            auto_repair_max_errors: 5,
            requested_scrub_priority: ScrubPriority::new(5),
            client_op_priority: ScrubPriority::new(3),
            scrub_during_recovery: false,
            scrub_invalid_stats: true,
        }
    }
}

impl Config {
    /// The priority a newly started session should carry, per the policy in
    /// §4.1: a session whose request marked `must_scrub` or `need_auto` gets
    /// `requested_scrub_priority`; otherwise it gets the PG's own default,
    /// read from `PgHost::default_scrub_priority` rather than a
    /// session-config value, since the source varies this per PG.
    #[must_use]
    pub fn session_priority(&self, must_scrub: bool, need_auto: bool, pg_default: ScrubPriority) -> ScrubPriority {
        if must_scrub || need_auto {
            self.requested_scrub_priority
        } else {
            pg_default
        }
    }

    /// Coerces `priority` upward to at least `client_op_priority`, the rule
    /// applied whenever work is requeued "with high priority" so it is not
    /// starved behind ordinary client I/O.
    #[must_use]
    pub fn coerce_high_priority(&self, priority: ScrubPriority) -> ScrubPriority {
        priority.max(self.client_op_priority)
    }
}
