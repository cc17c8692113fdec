//! Anchors: shared temporal/positional reference points.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::change::ChangeState;
use super::confidence::Confidence;

/// Unique identifier for an anchor within a graph.
///
/// Ids are assigned from a monotonic counter, so `Ord` on ids is
/// creation order - the deterministic tie-break used throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnchorId(u64);

impl AnchorId {
    /// Create an AnchorId from a raw counter value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw counter value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// A point in time (or text position) that annotations attach to.
///
/// Anchors are shared: many annotations may use the same anchor as their
/// start or end, which is how adjacency is represented - there is no
/// explicit "next" pointer anywhere in the graph.
///
/// The offset is optional; a `None` offset means the anchor's position is
/// not yet known and may be filled in by interpolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anchor {
    /// Unique anchor identifier.
    pub id: AnchorId,
    pub(crate) offset: Option<f64>,
    pub(crate) confidence: Confidence,
    #[serde(skip)]
    pub(crate) change: ChangeState,
    /// Offset before the first tracked mutation, captured once.
    #[serde(skip)]
    pub(crate) original_offset: Option<Option<f64>>,
}

impl Anchor {
    pub(crate) fn new(id: AnchorId, offset: Option<f64>, confidence: Confidence) -> Self {
        Self {
            id,
            offset,
            confidence,
            change: ChangeState::NoChange,
            original_offset: None,
        }
    }

    /// The anchor's offset in the graph's offset units, if known.
    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    /// How trustworthy the offset is.
    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    /// The change state since the last commit.
    pub fn change(&self) -> ChangeState {
        self.change
    }

    /// The offset this anchor had before the current batch of changes.
    ///
    /// Returns the current offset if the anchor has not been mutated.
    pub fn original_offset(&self) -> Option<f64> {
        self.original_offset.unwrap_or(self.offset)
    }

    /// Whether this anchor is marked for deletion.
    pub fn destroyed(&self) -> bool {
        self.change == ChangeState::Destroy
    }
}

impl PartialEq for Anchor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Anchor {}

impl PartialOrd for Anchor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Ordered by id for deterministic iteration; offset order is a property the
// validator enforces, not one the type can promise.
impl Ord for Anchor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(o) => write!(f, "[{}]{}", self.id, o),
            None => write!(f, "[{}]unset", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ordering_is_creation_order() {
        assert!(AnchorId::new(1) < AnchorId::new(2));
        assert!(AnchorId::new(9) < AnchorId::new(10));
    }

    #[test]
    fn test_original_offset_defaults_to_current() {
        let a = Anchor::new(AnchorId::new(1), Some(2.5), Confidence::Manual);
        assert_eq!(a.original_offset(), Some(2.5));
    }

    #[test]
    fn test_display() {
        let a = Anchor::new(AnchorId::new(3), Some(1.5), Confidence::Default);
        assert_eq!(a.to_string(), "[a3]1.5");
        let b = Anchor::new(AnchorId::new(4), None, Confidence::None);
        assert_eq!(b.to_string(), "[a4]unset");
    }
}
