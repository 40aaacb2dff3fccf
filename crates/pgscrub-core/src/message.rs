//! Inter-replica wire messages, semantic payload only.
//!
//! The wire format and dispatch mechanics belong to `Messenger` (§6,
//! out of scope); what's specified here is the payload shape each message
//! carries, grouped by protocol phase the way the VSR engine's own
//! `MessagePayload` groups its variants by phase.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use pgscrub_types::{Epoch, ObjectKey, PgId, ScrubPriority, ShardId, Version};

/// Envelope shared by every scrub message: who sent it and which PG it's
/// for. `Messenger` is responsible for getting this to `to`; this crate only
/// ever inspects `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub from: ShardId,
    pub to: ShardId,
    pub pg: PgId,
    pub payload: P,
}

impl<P> Envelope<P> {
    #[must_use]
    pub fn new(from: ShardId, to: ShardId, pg: PgId, payload: P) -> Self {
        Self { from, to, pg, payload }
    }
}

/// Primary → Replica: asks the replica to scan `[start, end)` and return a
/// `RepScrubMap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepScrubRequest {
    pub version: Version,
    pub map_epoch: Epoch,
    pub peering_reset: Epoch,
    pub start: ObjectKey,
    pub end: ObjectKey,
    pub deep: bool,
    pub allow_preemption: bool,
    pub priority: ScrubPriority,
    pub ops_blocked: bool,
}

/// Replica → Primary: the scanned chunk, or a preemption notice in place of
/// one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepScrubMap {
    pub map_epoch: Epoch,
    pub from: ShardId,
    pub preempted: bool,
    /// Opaque, already-encoded `ScrubMap` bytes. Comparison logic decodes
    /// this; this crate never interprets the contents directly (§1
    /// Non-goals).
    pub scrub_map_bytes: Bytes,
}

/// Primary → Replica: asks for (or releases) a scrub reservation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrubReserveRequest {
    pub map_epoch: Epoch,
    pub from: ShardId,
}

/// Replica → Primary: the reservation was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrubReserveGrant {
    pub map_epoch: Epoch,
    pub from: ShardId,
}

/// Replica → Primary: the reservation was denied (e.g. the replica is
/// already scrubbing another PG at its local limit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrubReserveReject {
    pub map_epoch: Epoch,
    pub from: ShardId,
}

/// Primary → Replica: releases a previously granted (or still-pending)
/// reservation. Also sent to replicas that never responded, so a grant that
/// crosses this message in flight has somewhere to land (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrubReserveRelease {
    pub map_epoch: Epoch,
    pub from: ShardId,
}
