//! Layer definitions: the structural rules annotations are validated against.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a layer in the schema (e.g. "turn", "word", "phone").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerId(String);

impl LayerId {
    /// Create a layer id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The layer name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LayerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// How annotations on a layer relate to time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Alignment {
    /// The annotation tags its parent; its anchors follow the parent's.
    Tag,
    /// The annotation spans an interval between two anchors of its own.
    Interval,
}

/// Static structural rules for one layer of annotations.
///
/// A layer is pure configuration - a closed set of flags the validator and
/// offset generator consult via explicit matches:
///
/// - `peers = false` means at most one live child per parent.
/// - `peers_overlap = false` means siblings must not overlap in time.
/// - `saturated` means children must tile the parent's full interval.
/// - `parent_includes` means a child's interval lies within its parent's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer name.
    pub id: LayerId,
    /// Tag or interval alignment.
    pub alignment: Alignment,
    /// Whether a parent may have more than one child on this layer.
    pub peers: bool,
    /// Whether sibling intervals may overlap.
    pub peers_overlap: bool,
    /// Whether children must tile the parent's interval with no gaps.
    pub saturated: bool,
    /// Parent layer, or `None` for a top-level layer.
    pub parent: Option<LayerId>,
    /// Whether children are temporally included in their parent.
    pub parent_includes: bool,
}

impl Layer {
    /// Define a top-level layer (no parent).
    pub fn top_level(
        id: impl Into<LayerId>,
        alignment: Alignment,
        peers: bool,
        peers_overlap: bool,
        saturated: bool,
    ) -> Self {
        Self {
            id: id.into(),
            alignment,
            peers,
            peers_overlap,
            saturated,
            parent: None,
            parent_includes: false,
        }
    }

    /// Define a child layer.
    pub fn child(
        id: impl Into<LayerId>,
        alignment: Alignment,
        peers: bool,
        peers_overlap: bool,
        saturated: bool,
        parent: impl Into<LayerId>,
        parent_includes: bool,
    ) -> Self {
        Self {
            id: id.into(),
            alignment,
            peers,
            peers_overlap,
            saturated,
            parent: Some(parent.into()),
            parent_includes,
        }
    }

    /// Whether annotations on this layer carry their own alignment.
    pub fn aligned(&self) -> bool {
        self.alignment == Alignment::Interval
    }
}

impl From<LayerId> for String {
    fn from(id: LayerId) -> Self {
        id.0
    }
}
