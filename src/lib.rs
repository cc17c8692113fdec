//! # alignment-kernel
//!
//! Consistency repair and confidence-weighted offset interpolation for
//! layered annotation graphs.
//!
//! An annotation graph is a time-anchored, hierarchically-constrained
//! structured transcription of recorded speech or interaction: turns,
//! utterances, words, phones, tags. After arbitrary edits - import, forced
//! alignment, manual correction, merges - the graph must be put back into
//! a consistent state, and missing temporal information must be filled in
//! from partial, confidence-ranked evidence. This crate is that core:
//!
//! - the data model ([`Graph`], [`Anchor`], [`Annotation`], [`Layer`],
//!   [`Schema`]) with opt-in change tracking ([`ChangeTracker`]),
//! - the [`OffsetGenerator`], which interpolates missing or low-confidence
//!   anchor offsets between trusted pins, and
//! - the [`Validator`], which repairs hierarchy and anchor consistency:
//!   orphans, reversed anchors, overlaps, ordinals, duplicate peers,
//!   over-length labels.
//!
//! Both implement the uniform [`GraphTransformer`] contract: synchronous,
//! in-place, deterministic, with every mutation observable through the
//! graph's change tracker and auto-corrected problems surfaced as
//! advisory issues.
//!
//! ```
//! use alignment_kernel::{
//!     Alignment, Confidence, Graph, GraphTransformer, Layer, OffsetGenerator, Schema,
//! };
//!
//! let mut schema = Schema::new();
//! schema.add_layer(Layer::top_level("who", Alignment::Tag, true, true, true)).unwrap();
//! schema.add_layer(Layer::child("turn", Alignment::Interval, true, false, false, "who", true)).unwrap();
//! schema.add_layer(Layer::child("word", Alignment::Interval, true, false, false, "turn", true)).unwrap();
//! schema.set_turn_layer("turn");
//! schema.set_word_layer("word");
//!
//! let mut graph = Graph::new(schema);
//! let start = graph.add_anchor(Some(0.0), Confidence::Manual);
//! let middle = graph.add_unset_anchor();
//! let end = graph.add_anchor(Some(2.0), Confidence::Manual);
//! let who = graph.add_annotation("who", "ada", start, end, None);
//! let turn = graph.add_annotation("turn", "ada", start, end, Some(who));
//! graph.add_annotation("word", "hello", start, middle, Some(turn));
//! graph.add_annotation("word", "world", middle, end, Some(turn));
//!
//! OffsetGenerator::default().transform(&mut graph).unwrap();
//! assert_eq!(graph.offset_of(middle), Some(1.0));
//! ```
//!
//! ## Determinism
//!
//! Ids are creation-ordered and every store iterates in id order, so the
//! same graph and configuration always produce the same repairs - tie
//! breaks prefer the earliest-created object.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod generator;
pub mod graph;
pub mod transform;
pub mod types;
pub mod validator;

pub use chain::{chain_backward_until, chain_forward_until};
pub use generator::OffsetGenerator;
pub use graph::{Graph, OffsetUnits};
pub use transform::{GraphTransformer, TransformationError};
pub use types::{
    Alignment, Anchor, AnchorId, Annotation, AnnotationId, Change, ChangeState, ChangeTracker,
    Confidence, Field, Layer, LayerId, Operation, Schema, SchemaError, Target,
};
pub use validator::Validator;
