//! Annotations: labeled spans between anchors, positioned in a layer hierarchy.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::anchor::AnchorId;
use super::change::ChangeState;
use super::confidence::Confidence;
use super::layer::LayerId;

/// Unique identifier for an annotation within a graph.
///
/// Like [`AnchorId`], ids are creation-ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnnotationId(u64);

impl AnnotationId {
    /// Create an AnnotationId from a raw counter value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw counter value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Pre-transform values of an annotation's tracked fields, captured on the
/// first mutation of each field so a diff can be reconstructed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Original {
    pub(crate) label: Option<String>,
    pub(crate) start: Option<AnchorId>,
    pub(crate) end: Option<AnchorId>,
    pub(crate) parent: Option<Option<AnnotationId>>,
    pub(crate) ordinal: Option<usize>,
}

/// A labeled interval (or tag) between two anchors.
///
/// All relationships - start, end, parent - are held as ids resolved
/// through the owning [`Graph`](crate::Graph), never as references. The
/// same anchor id may be missing from a fragment graph, so resolution is
/// always fallible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    /// Unique annotation identifier.
    pub id: AnnotationId,
    /// The layer this annotation belongs to.
    pub layer: LayerId,
    pub(crate) label: String,
    pub(crate) start: AnchorId,
    pub(crate) end: AnchorId,
    pub(crate) parent: Option<AnnotationId>,
    pub(crate) ordinal: usize,
    pub(crate) confidence: Confidence,
    pub(crate) annotator: Option<String>,
    #[serde(skip)]
    pub(crate) change: ChangeState,
    #[serde(skip)]
    pub(crate) original: Original,
}

impl Annotation {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: AnnotationId,
        layer: LayerId,
        label: String,
        start: AnchorId,
        end: AnchorId,
        parent: Option<AnnotationId>,
        ordinal: usize,
    ) -> Self {
        Self {
            id,
            layer,
            label,
            start,
            end,
            parent,
            ordinal,
            // Annotations without explicit provenance are assumed to be
            // human work; only Automatic-or-below children may be deleted
            // during orphan reconciliation.
            confidence: Confidence::Manual,
            annotator: None,
            change: ChangeState::NoChange,
            original: Original::default(),
        }
    }

    /// The annotation's label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Id of the start anchor.
    pub fn start(&self) -> AnchorId {
        self.start
    }

    /// Id of the end anchor.
    pub fn end(&self) -> AnchorId {
        self.end
    }

    /// Id of the parent annotation, if any.
    pub fn parent(&self) -> Option<AnnotationId> {
        self.parent
    }

    /// 1-based position among same-parent, same-layer siblings.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// How trustworthy the annotation is.
    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    /// Who (or what) produced the annotation.
    pub fn annotator(&self) -> Option<&str> {
        self.annotator.as_deref()
    }

    /// The change state since the last commit.
    pub fn change(&self) -> ChangeState {
        self.change
    }

    /// Whether this annotation is marked for deletion.
    pub fn destroyed(&self) -> bool {
        self.change == ChangeState::Destroy
    }

    /// Whether start and end are the same anchor.
    pub fn instantaneous(&self) -> bool {
        self.start == self.end
    }

    /// The start anchor id before the current batch of changes.
    pub fn original_start(&self) -> AnchorId {
        self.original.start.unwrap_or(self.start)
    }

    /// The end anchor id before the current batch of changes.
    pub fn original_end(&self) -> AnchorId {
        self.original.end.unwrap_or(self.end)
    }

    /// The parent id before the current batch of changes.
    pub fn original_parent(&self) -> Option<AnnotationId> {
        self.original.parent.unwrap_or(self.parent)
    }

    /// The ordinal before the current batch of changes.
    pub fn original_ordinal(&self) -> usize {
        self.original.ordinal.unwrap_or(self.ordinal)
    }
}

impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Annotation {}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}#{}", self.id, self.ordinal, self.label)
    }
}
