//! Recoverable error surface.
//!
//! Only the edges that the source documents as recoverable (see the
//! "Transient" and "Reservation failure" kinds) are modeled as `Result`.
//! Invariant violations — two objects sharing a head that are not clones, an
//! out-of-order event reaching a state that can't handle it — stay as
//! `assert!`/`panic!` in the modules that can observe them; turning those
//! into `Result` would hide a programmer error behind error-handling code.

use pgscrub_types::PgId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScrubError {
    #[error("pg {0} already has an active scrub session")]
    AlreadyActive(PgId),

    #[error("pg {0} has no active scrub session")]
    NotActive(PgId),

    #[error("event for pg {0} observed a stale epoch, dropped")]
    StaleEpoch(PgId),

    #[error("pg {0} denied a scrub reservation request")]
    ReservationDenied(PgId),

    #[error("pg {0} has no key range currently available for scrub")]
    RangeUnavailable(PgId),
}

pub type ScrubResult<T> = Result<T, ScrubError>;
