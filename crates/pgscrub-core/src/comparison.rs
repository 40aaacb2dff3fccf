//! §4.8: comparison and repair decision, the orchestration around the
//! backend comparator.
//!
//! Computing *how* two copies of an object are judged equal is delegated to
//! `PgHost::compare_scrub_maps` (a Non-goal, §1); what lives here is the
//! fixed sequence of steps around that call — running the omap check,
//! calling the comparator only when there's more than one copy to compare,
//! handing the authoritative set to the snapshot-metadata validator, and
//! flushing the store.

use pgscrub_types::ShardId;

use crate::host::{ComparisonResult, OmapStats, PgHost, ScrubMapSet, ScrubStore};

/// Everything a terminal scrub-finish decision needs out of one chunk's
/// comparison pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkComparison {
    pub omap: OmapStats,
    pub result: ComparisonResult,
}

/// Runs §4.8 steps 1–6 against one fully collected chunk, recording
/// disagreements into `store` and flushing it per the session's repair flag.
pub fn compare_chunk(host: &mut dyn PgHost, store: &mut dyn ScrubStore, maps: &ScrubMapSet, acting: &[ShardId], repair: bool) -> ChunkComparison {
    let omap = host.omap_checks(maps);

    let result = if acting.len() > 1 {
        host.compare_scrub_maps(maps, repair)
    } else {
        ComparisonResult::default()
    };

    if !result.authoritative.is_empty() {
        host.scrub_snapshot_metadata(&result);
    }

    for hobj in &result.missing {
        let good_shards: Vec<ShardId> = result.authoritative.get(hobj).cloned().unwrap_or_default();
        store.record_missing(hobj, &good_shards);
    }
    for hobj in &result.inconsistent {
        let authoritative = result.authoritative.get(hobj).cloned().unwrap_or_default();
        store.record_inconsistent(hobj, &authoritative);
    }
    store.flush(repair);

    ChunkComparison { omap, result }
}
