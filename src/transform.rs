//! The uniform transform contract.

use crate::graph::Graph;
use crate::types::{AnchorId, AnnotationId, LayerId, SchemaError};

/// Error type for transformations that cannot be completed.
///
/// A fatal error means no safe repair exists; any changes already applied
/// remain recorded in the graph's tracker, and the caller decides whether
/// to alter input and re-run. Auto-corrected problems are not errors -
/// they are surfaced through each transformer's advisory issue list.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformationError {
    /// An anchor chain has no reachable bound in either direction, so no
    /// offset can be interpolated for it.
    #[error("could not determine bounds for anchor chain starting at {0}")]
    UnboundedChain(AnchorId),
    /// After generation, offsets were still missing for linked anchors.
    #[error("could not generate offsets for {count} anchors (first: {first})")]
    UnresolvedOffsets {
        /// How many anchors remained unset.
        count: usize,
        /// The first unresolved anchor, by id.
        first: AnchorId,
    },
    /// A structural boundary anchor (turn/utterance) is missing an offset
    /// or is below the trust floor; downstream repair cannot proceed
    /// without a trustworthy outer time frame.
    #[error("{layer} boundary anchor {anchor} of {annotation} is untrustworthy: {reason}")]
    UntrustworthyBoundary {
        /// The structural layer concerned.
        layer: LayerId,
        /// The offending anchor.
        anchor: AnchorId,
        /// The annotation whose boundary it is.
        annotation: AnnotationId,
        /// Why the anchor cannot be trusted.
        reason: String,
    },
    /// An annotation references a layer the schema does not define.
    #[error("layer {0} is not defined in the schema")]
    UndefinedLayer(LayerId),
    /// The schema itself is malformed (caller misuse).
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// A transformer that mutates a graph in place.
///
/// Transforms are synchronous, non-reentrant, and deterministic functions
/// of graph state plus configuration. All mutations are observable through
/// the graph's change tracker when one is attached. Implementations
/// accumulate auto-corrected problems as advisory issues rather than
/// failing.
pub trait GraphTransformer {
    /// Transform the graph, mutating it in place.
    fn transform(&mut self, graph: &mut Graph) -> Result<(), TransformationError>;
}
