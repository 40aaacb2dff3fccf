//! Primitive types shared by the scrub coordinator and its external
//! collaborators.
//!
//! This crate intentionally holds no logic beyond construction and
//! comparison: the values here are the vocabulary the scrub session, the
//! reservation protocol, and the wire messages are all built out of.
//!
//! # Exported types
//!
//! - [`PgId`]: identifies a placement group.
//! - [`ShardId`]: identifies one member of a PG's acting set.
//! - [`Epoch`]: a peering-interval version number.
//! - [`ObjectKey`]: an object identity within a PG's key space, distinguishing
//!   a live "head" from its numbered snapshot "clones".
//! - [`Version`]: a PG-log position (epoch + op counter), used to fence chunk
//!   scans against concurrent writes.
//! - [`ScrubPriority`]: a work-queue priority value.
//!
//! ```rust
//! use pgscrub_types::{PgId, ShardId, ObjectKey};
//!
//! let pg = PgId::new(7);
//! let primary = ShardId::new(0);
//! let key = ObjectKey::head("widgets/42");
//! assert!(key.is_head());
//! assert_eq!(pg.to_string(), "7");
//! assert_eq!(primary, ShardId::from(0u32));
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a placement group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PgId(u64);

impl PgId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PgId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifies one member of a PG's acting set (a storage daemon hosting a
/// replica of the PG).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId(u32);

impl ShardId {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "osd.{}", self.0)
    }
}

impl From<u32> for ShardId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// A peering-interval epoch. Crossing an interval invalidates any in-flight
/// scrub session that started in an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Epoch(u64);

impl Epoch {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The epoch value reserved for "no epoch floor" on an event, meaning the
    /// event is never dropped purely for being stale.
    #[must_use]
    pub fn none() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A PG-log position: the epoch a write was accepted in, plus a
/// monotonically increasing counter within that epoch. Used as
/// `subsetLastUpdate`, the fence between scanning a chunk and comparing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Version {
    pub epoch: Epoch,
    pub counter: u64,
}

impl Version {
    #[must_use]
    pub fn new(epoch: Epoch, counter: u64) -> Self {
        Self { epoch, counter }
    }

    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'{}", self.epoch, self.counter)
    }
}

/// An object identity within a PG's key space.
///
/// Objects come in two flavors: the live **head**, and numbered **clones**
/// (point-in-time snapshots) that sort immediately before their head in key
/// order. The chunk selector (`pgscrub_core::chunk_selector`) must never
/// split a head from its clones across a chunk boundary (invariant P2).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    name: String,
    clone: Option<u64>,
}

impl ObjectKey {
    /// Constructs the head (live) key for `name`.
    #[must_use]
    pub fn head(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clone: None,
        }
    }

    /// Constructs a numbered clone (snapshot) key for `name`.
    #[must_use]
    pub fn clone_of(name: impl Into<String>, snap: u64) -> Self {
        Self {
            name: name.into(),
            clone: Some(snap),
        }
    }

    /// The sentinel key one-past the end of the PG's key space. Used as the
    /// implicit upper bound of the last chunk in a scrub pass.
    #[must_use]
    pub fn max() -> Self {
        Self {
            name: String::new(),
            clone: Some(u64::MAX),
        }
    }

    #[must_use]
    pub fn is_max(&self) -> bool {
        self.name.is_empty() && self.clone == Some(u64::MAX)
    }

    #[must_use]
    pub fn is_head(&self) -> bool {
        self.clone.is_none() && !self.is_max()
    }

    #[must_use]
    pub fn is_clone(&self) -> bool {
        self.clone.is_some() && !self.is_max()
    }

    /// The head key sharing this object's name, i.e. the key this clone (or
    /// this head itself) must stay in the same chunk as.
    #[must_use]
    pub fn head_key(&self) -> Self {
        Self::head(self.name.clone())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            return write!(f, "MAX");
        }
        match self.clone {
            None => write!(f, "{}/head", self.name),
            Some(snap) => write!(f, "{}/{snap}", self.name),
        }
    }
}

/// Key order: a clone sorts before its head (clones are visited first when
/// walking forward through the key space, matching the source's hobject_t
/// ordering where the head is the maximal version of a given name).
impl PartialOrd for ObjectKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectKey {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.is_max() && other.is_max() {
            return Ordering::Equal;
        }
        if self.is_max() {
            return Ordering::Greater;
        }
        if other.is_max() {
            return Ordering::Less;
        }
        self.name.cmp(&other.name).then_with(|| match (self.clone, other.clone) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(&b),
        })
    }
}

/// A work-queue priority. Higher sorts first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScrubPriority(u8);

impl ScrubPriority {
    #[must_use]
    pub fn new(value: u8) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }
}

impl fmt::Display for ScrubPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn object_key_max_sorts_last() {
        let a = ObjectKey::head("z");
        assert!(a < ObjectKey::max());
    }

    #[test_case(ObjectKey::clone_of("a", 1), ObjectKey::head("a") ; "clone sorts before its own head")]
    #[test_case(ObjectKey::head("a"), ObjectKey::head("b") ; "names sort lexically")]
    fn ordering_cases(lesser: ObjectKey, greater: ObjectKey) {
        assert!(lesser < greater);
    }

    #[test]
    fn head_key_of_a_clone_matches_its_head() {
        let clone = ObjectKey::clone_of("widgets/42", 3);
        assert_eq!(clone.head_key(), ObjectKey::head("widgets/42"));
    }

    #[test]
    fn priority_max_picks_the_larger() {
        assert_eq!(
            ScrubPriority::new(3).max(ScrubPriority::new(9)),
            ScrubPriority::new(9)
        );
    }

    #[test]
    fn epoch_none_is_never_stale() {
        assert!(Epoch::none().is_none());
    }

    #[test]
    fn serde_roundtrip_for_version() {
        let v = Version::new(Epoch::new(4), 12);
        let json = serde_json::to_string(&v).unwrap();
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
