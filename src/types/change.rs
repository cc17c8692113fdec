//! Change records and the tracker that accumulates them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::anchor::AnchorId;
use super::annotation::AnnotationId;

/// Lifecycle state of an anchor or annotation since the last commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ChangeState {
    /// Unchanged.
    #[default]
    NoChange,
    /// Created during the current batch of changes.
    Create,
    /// At least one field changed.
    Update,
    /// Marked for deletion; physically removed at commit.
    Destroy,
}

/// The kind of operation a [`Change`] records.
pub type Operation = ChangeState;

/// What a change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Target {
    /// An anchor, by id.
    Anchor(AnchorId),
    /// An annotation, by id.
    Annotation(AnnotationId),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anchor(id) => write!(f, "{id}"),
            Self::Annotation(id) => write!(f, "{id}"),
        }
    }
}

/// The field an `Update` change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Field {
    /// Anchor offset.
    Offset,
    /// Anchor or annotation confidence.
    Confidence,
    /// Annotation label.
    Label,
    /// Annotation start anchor.
    StartAnchor,
    /// Annotation end anchor.
    EndAnchor,
    /// Annotation parent.
    Parent,
    /// Annotation ordinal.
    Ordinal,
    /// Annotation annotator.
    Annotator,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Offset => "offset",
            Self::Confidence => "confidence",
            Self::Label => "label",
            Self::StartAnchor => "start",
            Self::EndAnchor => "end",
            Self::Parent => "parent",
            Self::Ordinal => "ordinal",
            Self::Annotator => "annotator",
        };
        write!(f, "{name}")
    }
}

/// One recorded mutation: an auditable, queryable entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// What kind of change this is.
    pub operation: Operation,
    /// The object changed.
    pub target: Target,
    /// The field changed, for `Update` operations.
    pub field: Option<Field>,
    /// Value before the change, JSON-encoded.
    pub old_value: Option<Value>,
    /// Value after the change, JSON-encoded.
    pub new_value: Option<Value>,
}

impl Change {
    /// Record an object creation.
    pub fn create(target: Target) -> Self {
        Self {
            operation: Operation::Create,
            target,
            field: None,
            old_value: None,
            new_value: None,
        }
    }

    /// Record an object destruction.
    pub fn destroy(target: Target) -> Self {
        Self {
            operation: Operation::Destroy,
            target,
            field: None,
            old_value: None,
            new_value: None,
        }
    }

    /// Record a field update.
    pub fn update(target: Target, field: Field, old_value: Value, new_value: Value) -> Self {
        Self {
            operation: Operation::Update,
            target,
            field: Some(field),
            old_value: Some(old_value),
            new_value: Some(new_value),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            Operation::Create => write!(f, "Create {}", self.target),
            Operation::Destroy => write!(f, "Destroy {}", self.target),
            Operation::NoChange => write!(f, "NoChange {}", self.target),
            Operation::Update => {
                let field = self.field.map(|x| x.to_string()).unwrap_or_default();
                let new = self
                    .new_value
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "null".to_string());
                let old = self
                    .old_value
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "null".to_string());
                write!(f, "Update {}: {} = {} (was {})", self.target, field, new, old)
            }
        }
    }
}

/// Accumulates [`Change`]s while attached to a graph.
///
/// The tracker exists only between "start tracking" and "read changes". It
/// merges repeated updates to the same field: the first recorded old value
/// wins, the latest new value wins, and an update that restores the first
/// old value drops out of the set entirely.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    entries: BTreeMap<(Target, Option<Field>), Change>,
}

impl ChangeTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change, merging with any prior change to the same field.
    pub fn accept(&mut self, change: Change) {
        let key = (change.target, change.field);
        match self.entries.get_mut(&key) {
            Some(existing) if existing.operation == Operation::Update => {
                if existing.old_value == change.new_value {
                    // restored to the original value: nothing changed overall
                    self.entries.remove(&key);
                } else {
                    existing.new_value = change.new_value;
                }
            }
            Some(_) => {
                // Create/Destroy entries are terminal for their key
            }
            None => {
                self.entries.insert(key, change);
            }
        }
    }

    /// Whether any changes have been recorded.
    pub fn has_changes(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tracker is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All recorded changes, ordered by target then field.
    pub fn changes(&self) -> Vec<Change> {
        self.entries.values().cloned().collect()
    }

    /// Changes recorded against one target.
    pub fn changes_for(&self, target: Target) -> Vec<Change> {
        self.entries
            .values()
            .filter(|c| c.target == target)
            .cloned()
            .collect()
    }

    /// The recorded change for one field of one target, if any.
    pub fn change(&self, target: Target, field: Field) -> Option<&Change> {
        self.entries.get(&(target, Some(field)))
    }

    /// Discard all recorded changes.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn anchor_target() -> Target {
        Target::Anchor(AnchorId::new(1))
    }

    #[test]
    fn test_merge_keeps_first_old_and_last_new() {
        let mut tracker = ChangeTracker::new();
        tracker.accept(Change::update(
            anchor_target(),
            Field::Offset,
            json!(null),
            json!(1.0),
        ));
        tracker.accept(Change::update(
            anchor_target(),
            Field::Offset,
            json!(1.0),
            json!(2.0),
        ));
        let changes = tracker.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_value, Some(json!(null)));
        assert_eq!(changes[0].new_value, Some(json!(2.0)));
    }

    #[test]
    fn test_reverted_update_drops_out() {
        let mut tracker = ChangeTracker::new();
        tracker.accept(Change::update(
            anchor_target(),
            Field::Offset,
            json!(5.0),
            json!(6.0),
        ));
        tracker.accept(Change::update(
            anchor_target(),
            Field::Offset,
            json!(6.0),
            json!(5.0),
        ));
        assert!(!tracker.has_changes());
    }

    #[test]
    fn test_changes_for_target() {
        let mut tracker = ChangeTracker::new();
        tracker.accept(Change::create(anchor_target()));
        tracker.accept(Change::create(Target::Annotation(AnnotationId::new(2))));
        assert_eq!(tracker.changes_for(anchor_target()).len(), 1);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_display() {
        let c = Change::update(anchor_target(), Field::Offset, json!(null), json!(1.5));
        assert_eq!(c.to_string(), "Update a1: offset = 1.5 (was null)");
    }
}
