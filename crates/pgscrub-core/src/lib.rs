//! Per-placement-group scrub coordinator.
//!
//! Coordinates one PG's background consistency scan across its acting set:
//! reserving scrub slots on every replica, walking the key space in
//! preemptible chunks, collecting and comparing each chunk's per-shard maps,
//! and repairing or reporting whatever the comparator finds. Wire protocol,
//! storage, and the comparison algorithm itself are out of scope (§1) —
//! this crate is the orchestration layer above them, built the way the rest
//! of this workspace builds a coordination layer: a pure state machine
//! (`machine`) wrapped by an imperative shell (`scrubber`) that is the only
//! place touching the borrowed `PgHost`/`OsdServices`/`Scheduler`
//! capabilities.
//!
//! ```text
//! scrubber::PgScrubber      (C8, imperative shell)
//!   ├─ machine::ScrubMachine      (C7, pure session state machine)
//!   ├─ reservation / replica_reservations  (C2–C4, scoped slot guards)
//!   ├─ map_collector::MapCollector         (C5)
//!   ├─ chunk_selector::select_chunk        (C6)
//!   ├─ comparison::compare_chunk           (§4.8)
//!   └─ scheduler::Scheduler                (C9)
//! ```

pub mod chunk_selector;
pub mod comparison;
pub mod config;
pub mod error;
pub mod host;
pub mod machine;
pub mod map_collector;
pub mod message;
pub mod preemption;
pub mod replica_reservations;
pub mod reservation;
pub mod scheduler;
pub mod scrubber;

/// In-memory `PgHost`/`OsdServices`/`ScrubStore` doubles. Built for this
/// crate's own unit tests; exposed under `test-util` so the `tests/`
/// integration suite can drive a whole [`scrubber::PgScrubber`] session
/// without re-implementing the fixtures.
#[cfg(any(test, feature = "test-util"))]
pub mod test_support;

pub use config::Config;
pub use error::{ScrubError, ScrubResult};
pub use host::{BuildStatus, ComparisonResult, Messenger, OmapStats, OsdServices, PgHost, ScrubMap, ScrubMapSet, ScrubOutcome, ScrubStore, ScrubStoreFactory};
pub use machine::{MachineState, ScrubEvent, ScrubFlags, ScrubMachine, ScrubMachineSnapshot, ScrubStats, Transition};
pub use scheduler::{ScheduledJob, Scheduler};
pub use scrubber::{PgScrubber, StartScrubRequest};
