//! The annotation graph: anchor/annotation arenas, schema, indices, and
//! change tracking.
//!
//! The graph exclusively owns all anchors and annotations. Relationships
//! (start, end, parent) are held purely as ids looked up in the graph's
//! maps, never as embedded references - which is what makes fragment
//! extraction and anchor splitting tractable.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{
    Anchor, AnchorId, Annotation, AnnotationId, Change, ChangeState, ChangeTracker, Confidence,
    Field, LayerId, Schema, Target,
};

/// What the graph's offsets measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OffsetUnits {
    /// Offsets are seconds into the recording.
    #[default]
    Seconds,
    /// Offsets are character positions in a text.
    Characters,
}

/// A time-anchored, hierarchically-constrained annotation graph.
///
/// Mutation goes through the graph's tracked setters, which keep the
/// derived indices consistent and record every change through the attached
/// [`ChangeTracker`], when one is attached. Creations made while tracking
/// is off are treated as committed state.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    schema: Schema,
    offset_units: OffsetUnits,
    anchors: BTreeMap<AnchorId, Anchor>,
    annotations: BTreeMap<AnnotationId, Annotation>,
    /// anchor -> annotations starting there (destroyed ones included).
    starting: BTreeMap<AnchorId, BTreeSet<AnnotationId>>,
    /// anchor -> annotations ending there (destroyed ones included).
    ending: BTreeMap<AnchorId, BTreeSet<AnnotationId>>,
    /// parent annotation -> child annotations.
    children: BTreeMap<AnnotationId, BTreeSet<AnnotationId>>,
    /// layer -> annotations on that layer.
    by_layer: BTreeMap<LayerId, BTreeSet<AnnotationId>>,
    next_anchor: u64,
    next_annotation: u64,
    tracker: Option<ChangeTracker>,
}

impl Graph {
    /// Create an empty graph for the given schema.
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    /// Set the offset units (builder style).
    pub fn with_offset_units(mut self, units: OffsetUnits) -> Self {
        self.offset_units = units;
        self
    }

    /// The graph's schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// What the graph's offsets measure.
    pub fn offset_units(&self) -> OffsetUnits {
        self.offset_units
    }

    // ── change tracking ─────────────────────────────────────────────────

    /// Attach a fresh change tracker, discarding any existing one.
    pub fn track_changes(&mut self) {
        self.tracker = Some(ChangeTracker::new());
    }

    /// The attached tracker, if any.
    pub fn tracker(&self) -> Option<&ChangeTracker> {
        self.tracker.as_ref()
    }

    /// Swap the attached tracker, returning the previous one.
    ///
    /// Used to scope a sub-operation's diff: install a fresh tracker, run
    /// the sub-operation, then restore the original.
    pub fn replace_tracker(&mut self, tracker: Option<ChangeTracker>) -> Option<ChangeTracker> {
        std::mem::replace(&mut self.tracker, tracker)
    }

    /// All changes recorded so far, or empty when not tracking.
    pub fn changes(&self) -> Vec<Change> {
        self.tracker
            .as_ref()
            .map(|t| t.changes())
            .unwrap_or_default()
    }

    fn record(&mut self, change: Change) {
        if let Some(tracker) = &mut self.tracker {
            tracker.accept(change);
        }
    }

    // ── creation ────────────────────────────────────────────────────────

    /// Add an anchor with the given offset and confidence.
    pub fn add_anchor(&mut self, offset: Option<f64>, confidence: Confidence) -> AnchorId {
        self.next_anchor += 1;
        let id = AnchorId::new(self.next_anchor);
        let mut anchor = Anchor::new(id, offset, confidence);
        if self.tracker.is_some() {
            anchor.change = ChangeState::Create;
        }
        self.anchors.insert(id, anchor);
        self.record(Change::create(Target::Anchor(id)));
        id
    }

    /// Add an anchor with no offset and no confidence.
    pub fn add_unset_anchor(&mut self) -> AnchorId {
        self.add_anchor(None, Confidence::None)
    }

    /// Add an annotation; its ordinal is appended after existing live
    /// siblings on the same layer under the same parent.
    pub fn add_annotation(
        &mut self,
        layer: impl Into<LayerId>,
        label: impl Into<String>,
        start: AnchorId,
        end: AnchorId,
        parent: Option<AnnotationId>,
    ) -> AnnotationId {
        let layer = layer.into();
        self.next_annotation += 1;
        let id = AnnotationId::new(self.next_annotation);
        let ordinal = self.peers(parent, &layer).len() + 1;
        let mut annotation =
            Annotation::new(id, layer.clone(), label.into(), start, end, parent, ordinal);
        if self.tracker.is_some() {
            annotation.change = ChangeState::Create;
        }
        self.annotations.insert(id, annotation);
        self.starting.entry(start).or_default().insert(id);
        self.ending.entry(end).or_default().insert(id);
        if let Some(parent) = parent {
            self.children.entry(parent).or_default().insert(id);
        }
        self.by_layer.entry(layer).or_default().insert(id);
        self.record(Change::create(Target::Annotation(id)));
        id
    }

    // ── lookup ──────────────────────────────────────────────────────────

    /// Look up an anchor. `None` for unknown ids - fragments may be missing
    /// anchors that annotations still reference.
    pub fn anchor(&self, id: AnchorId) -> Option<&Anchor> {
        self.anchors.get(&id)
    }

    /// Look up an annotation.
    pub fn annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.get(&id)
    }

    /// All anchors, in creation order.
    pub fn anchors(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.values()
    }

    /// All annotations, in creation order.
    pub fn annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.values()
    }

    /// Ids of all anchors, in creation order.
    pub fn anchor_ids(&self) -> Vec<AnchorId> {
        self.anchors.keys().copied().collect()
    }

    /// Ids of all annotations, in creation order.
    pub fn annotation_ids(&self) -> Vec<AnnotationId> {
        self.annotations.keys().copied().collect()
    }

    /// Ids of annotations on a layer, in creation order.
    pub fn in_layer(&self, layer: &LayerId) -> Vec<AnnotationId> {
        self.by_layer
            .get(layer)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether the annotation exists and is not marked for deletion.
    pub fn is_live(&self, id: AnnotationId) -> bool {
        self.annotations
            .get(&id)
            .map(|a| !a.destroyed())
            .unwrap_or(false)
    }

    /// Live annotations starting at the given anchor.
    pub fn start_of(&self, anchor: AnchorId) -> Vec<AnnotationId> {
        self.starting
            .get(&anchor)
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|id| self.is_live(*id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live annotations ending at the given anchor.
    pub fn end_of(&self, anchor: AnchorId) -> Vec<AnnotationId> {
        self.ending
            .get(&anchor)
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|id| self.is_live(*id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live annotations on one layer starting at the given anchor.
    pub fn start_of_in(&self, anchor: AnchorId, layer: &LayerId) -> Vec<AnnotationId> {
        self.start_of(anchor)
            .into_iter()
            .filter(|id| self.annotations[id].layer == *layer)
            .collect()
    }

    /// Live annotations on one layer ending at the given anchor.
    pub fn end_of_in(&self, anchor: AnchorId, layer: &LayerId) -> Vec<AnnotationId> {
        self.end_of(anchor)
            .into_iter()
            .filter(|id| self.annotations[id].layer == *layer)
            .collect()
    }

    /// Annotations starting at the anchor, destroyed ones included.
    pub fn all_start_of(&self, anchor: AnchorId) -> Vec<AnnotationId> {
        self.starting
            .get(&anchor)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Annotations ending at the anchor, destroyed ones included.
    pub fn all_end_of(&self, anchor: AnchorId) -> Vec<AnnotationId> {
        self.ending
            .get(&anchor)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether any live annotation starts or ends at the anchor.
    pub fn is_linked(&self, anchor: AnchorId) -> bool {
        !self.start_of(anchor).is_empty() || !self.end_of(anchor).is_empty()
    }

    /// Live children of a parent on a layer, ordered by (ordinal, id).
    ///
    /// `parent = None` selects top-level annotations of the layer.
    pub fn peers(&self, parent: Option<AnnotationId>, layer: &LayerId) -> Vec<AnnotationId> {
        let mut result: Vec<AnnotationId> = match parent {
            Some(parent) => self
                .children
                .get(&parent)
                .map(|set| {
                    set.iter()
                        .copied()
                        .filter(|id| {
                            self.is_live(*id) && self.annotations[id].layer == *layer
                        })
                        .collect()
                })
                .unwrap_or_default(),
            None => self
                .in_layer(layer)
                .into_iter()
                .filter(|id| self.is_live(*id) && self.annotations[id].parent.is_none())
                .collect(),
        };
        result.sort_by_key(|id| (self.annotations[id].ordinal, *id));
        result
    }

    /// All children of a parent (any layer, destroyed included).
    pub fn all_children(&self, parent: AnnotationId) -> Vec<AnnotationId> {
        self.children
            .get(&parent)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The live sibling immediately before the annotation, by ordinal.
    pub fn previous_sibling(&self, id: AnnotationId) -> Option<AnnotationId> {
        let annotation = self.annotation(id)?;
        let peers = self.peers(annotation.parent, &annotation.layer);
        let index = peers.iter().position(|p| *p == id)?;
        index.checked_sub(1).map(|i| peers[i])
    }

    /// The live sibling immediately after the annotation, by ordinal.
    pub fn next_sibling(&self, id: AnnotationId) -> Option<AnnotationId> {
        let annotation = self.annotation(id)?;
        let peers = self.peers(annotation.parent, &annotation.layer);
        let index = peers.iter().position(|p| *p == id)?;
        peers.get(index + 1).copied()
    }

    // ── temporal queries ────────────────────────────────────────────────

    /// The offset of an anchor, when the anchor exists and is set.
    pub fn offset_of(&self, id: AnchorId) -> Option<f64> {
        self.anchors.get(&id).and_then(|a| a.offset)
    }

    /// Start offset of an annotation, when known.
    pub fn start_offset(&self, id: AnnotationId) -> Option<f64> {
        self.annotation(id).and_then(|a| self.offset_of(a.start))
    }

    /// End offset of an annotation, when known.
    pub fn end_offset(&self, id: AnnotationId) -> Option<f64> {
        self.annotation(id).and_then(|a| self.offset_of(a.end))
    }

    /// Whether both of the annotation's anchors exist and have offsets.
    pub fn anchored(&self, id: AnnotationId) -> bool {
        self.start_offset(id).is_some() && self.end_offset(id).is_some()
    }

    /// Midpoint of the annotation's interval, when anchored.
    pub fn midpoint(&self, id: AnnotationId) -> Option<f64> {
        let start = self.start_offset(id)?;
        let end = self.end_offset(id)?;
        Some(start + (end - start) / 2.0)
    }

    /// Duration of the annotation's interval, when anchored.
    pub fn duration(&self, id: AnnotationId) -> Option<f64> {
        let start = self.start_offset(id)?;
        let end = self.end_offset(id)?;
        Some(end - start)
    }

    /// Whether the annotation's interval includes the offset.
    pub fn includes_offset(&self, id: AnnotationId, offset: f64) -> Option<bool> {
        let start = self.start_offset(id)?;
        let end = self.end_offset(id)?;
        if start == end {
            return Some(offset == start);
        }
        Some(offset >= start && offset < end)
    }

    /// Whether `outer`'s interval includes `inner`'s midpoint.
    ///
    /// `None` when either side is unanchored - fragment callers treat that
    /// as boundless rather than failing.
    pub fn includes_midpoint_of(&self, outer: AnnotationId, inner: AnnotationId) -> Option<bool> {
        let midpoint = self.midpoint(inner)?;
        self.includes_offset(outer, midpoint)
    }

    /// Gap between two annotations' intervals: 0 when they overlap.
    pub fn distance(&self, a: AnnotationId, b: AnnotationId) -> Option<f64> {
        let (a_start, a_end) = (self.start_offset(a)?, self.end_offset(a)?);
        let (b_start, b_end) = (self.start_offset(b)?, self.end_offset(b)?);
        if b_start > a_end {
            Some(b_start - a_end)
        } else if a_start > b_end {
            Some(a_start - b_end)
        } else {
            Some(0.0)
        }
    }

    /// A live annotation running from `start` to `end`, if one exists.
    pub fn annotation_between(&self, start: AnchorId, end: AnchorId) -> Option<AnnotationId> {
        self.start_of(start)
            .into_iter()
            .find(|id| self.annotations[id].end == end)
    }

    // ── hierarchy queries ───────────────────────────────────────────────

    /// Ancestor annotation ids, nearest first.
    pub fn ancestors(&self, id: AnnotationId) -> Vec<AnnotationId> {
        let mut result = Vec::new();
        let mut current = self.annotation(id).and_then(|a| a.parent);
        while let Some(parent) = current {
            if result.contains(&parent) {
                break; // malformed parent cycle; stop rather than spin
            }
            result.push(parent);
            current = self.annotation(parent).and_then(|a| a.parent);
        }
        result
    }

    /// The nearest ancestor on the given layer, the annotation itself
    /// included.
    pub fn ancestor_in(&self, id: AnnotationId, layer: &LayerId) -> Option<AnnotationId> {
        if self.annotation(id)?.layer == *layer {
            return Some(id);
        }
        self.ancestors(id)
            .into_iter()
            .find(|a| self.annotations[a].layer == *layer)
    }

    /// The first ancestor the two annotations share, if any.
    pub fn first_common_ancestor(
        &self,
        a: AnnotationId,
        b: AnnotationId,
    ) -> Option<AnnotationId> {
        let b_chain: BTreeSet<AnnotationId> =
            std::iter::once(b).chain(self.ancestors(b)).collect();
        std::iter::once(a)
            .chain(self.ancestors(a))
            .find(|id| b_chain.contains(id))
    }

    /// Whether `id` has `ancestor` among its ancestors.
    pub fn is_descendant_of(&self, id: AnnotationId, ancestor: AnnotationId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// The live, anchored descendant with the earliest start offset.
    pub fn earliest_descendant(&self, id: AnnotationId) -> Option<AnnotationId> {
        self.descendants(id)
            .into_iter()
            .filter(|d| self.anchored(*d))
            .min_by(|a, b| {
                let sa = self.start_offset(*a).unwrap_or(f64::INFINITY);
                let sb = self.start_offset(*b).unwrap_or(f64::INFINITY);
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// The live, anchored descendant with the latest end offset.
    pub fn latest_descendant(&self, id: AnnotationId) -> Option<AnnotationId> {
        self.descendants(id)
            .into_iter()
            .filter(|d| self.anchored(*d))
            .max_by(|a, b| {
                let ea = self.end_offset(*a).unwrap_or(f64::NEG_INFINITY);
                let eb = self.end_offset(*b).unwrap_or(f64::NEG_INFINITY);
                ea.partial_cmp(&eb).unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// All live descendants.
    pub fn descendants(&self, id: AnnotationId) -> Vec<AnnotationId> {
        let mut result = Vec::new();
        let mut queue: Vec<AnnotationId> = self
            .all_children(id)
            .into_iter()
            .filter(|c| self.is_live(*c))
            .collect();
        while let Some(child) = queue.pop() {
            queue.extend(
                self.all_children(child)
                    .into_iter()
                    .filter(|c| self.is_live(*c)),
            );
            result.push(child);
        }
        result
    }

    /// Live annotations on `layer` that share both anchors with `id`.
    pub fn tags_on(&self, id: AnnotationId, layer: &LayerId) -> Vec<AnnotationId> {
        let Some(annotation) = self.annotation(id) else {
            return Vec::new();
        };
        self.start_of_in(annotation.start, layer)
            .into_iter()
            .filter(|other| self.annotations[other].end == annotation.end && *other != id)
            .collect()
    }

    /// Live annotations on `layer` whose interval fully includes `id`'s.
    pub fn including_on(&self, id: AnnotationId, layer: &LayerId) -> Vec<AnnotationId> {
        let (Some(start), Some(end)) = (self.start_offset(id), self.end_offset(id)) else {
            return Vec::new();
        };
        self.in_layer(layer)
            .into_iter()
            .filter(|other| {
                *other != id
                    && self.is_live(*other)
                    && matches!(
                        (self.start_offset(*other), self.end_offset(*other)),
                        (Some(s), Some(e)) if s <= start && e >= end
                    )
            })
            .collect()
    }

    /// Live annotations on `layer` whose interval includes `id`'s midpoint.
    pub fn midpoint_including_on(&self, id: AnnotationId, layer: &LayerId) -> Vec<AnnotationId> {
        let Some(midpoint) = self.midpoint(id) else {
            return Vec::new();
        };
        self.in_layer(layer)
            .into_iter()
            .filter(|other| {
                *other != id
                    && self.is_live(*other)
                    && self.includes_offset(*other, midpoint) == Some(true)
            })
            .collect()
    }

    // ── tracked mutation ────────────────────────────────────────────────

    fn mark_anchor_updated(&mut self, id: AnchorId) {
        if let Some(anchor) = self.anchors.get_mut(&id) {
            if anchor.change == ChangeState::NoChange {
                anchor.change = ChangeState::Update;
            }
        }
    }

    fn mark_annotation_updated(&mut self, id: AnnotationId) {
        if let Some(annotation) = self.annotations.get_mut(&id) {
            if annotation.change == ChangeState::NoChange {
                annotation.change = ChangeState::Update;
            }
        }
    }

    /// Set an anchor's offset.
    pub fn set_offset(&mut self, id: AnchorId, offset: Option<f64>) {
        let Some(anchor) = self.anchors.get_mut(&id) else {
            return;
        };
        if anchor.offset == offset {
            return;
        }
        let old = anchor.offset;
        if anchor.original_offset.is_none() {
            anchor.original_offset = Some(old);
        }
        anchor.offset = offset;
        self.mark_anchor_updated(id);
        self.record(Change::update(
            Target::Anchor(id),
            Field::Offset,
            json!(old),
            json!(offset),
        ));
    }

    /// Set an anchor's confidence.
    pub fn set_anchor_confidence(&mut self, id: AnchorId, confidence: Confidence) {
        let Some(anchor) = self.anchors.get_mut(&id) else {
            return;
        };
        if anchor.confidence == confidence {
            return;
        }
        let old = anchor.confidence;
        anchor.confidence = confidence;
        self.mark_anchor_updated(id);
        self.record(Change::update(
            Target::Anchor(id),
            Field::Confidence,
            confidence_value(old),
            confidence_value(confidence),
        ));
    }

    /// Set an annotation's label.
    pub fn set_label(&mut self, id: AnnotationId, label: impl Into<String>) {
        let label = label.into();
        let Some(annotation) = self.annotations.get_mut(&id) else {
            return;
        };
        if annotation.label == label {
            return;
        }
        let old = std::mem::replace(&mut annotation.label, label.clone());
        if annotation.original.label.is_none() {
            annotation.original.label = Some(old.clone());
        }
        self.mark_annotation_updated(id);
        self.record(Change::update(
            Target::Annotation(id),
            Field::Label,
            json!(old),
            json!(label),
        ));
    }

    /// Set an annotation's confidence.
    pub fn set_annotation_confidence(&mut self, id: AnnotationId, confidence: Confidence) {
        let Some(annotation) = self.annotations.get_mut(&id) else {
            return;
        };
        if annotation.confidence == confidence {
            return;
        }
        let old = annotation.confidence;
        annotation.confidence = confidence;
        self.mark_annotation_updated(id);
        self.record(Change::update(
            Target::Annotation(id),
            Field::Confidence,
            confidence_value(old),
            confidence_value(confidence),
        ));
    }

    /// Set an annotation's annotator.
    pub fn set_annotator(&mut self, id: AnnotationId, annotator: Option<String>) {
        let Some(annotation) = self.annotations.get_mut(&id) else {
            return;
        };
        if annotation.annotator == annotator {
            return;
        }
        let old = std::mem::replace(&mut annotation.annotator, annotator.clone());
        self.mark_annotation_updated(id);
        self.record(Change::update(
            Target::Annotation(id),
            Field::Annotator,
            json!(old),
            json!(annotator),
        ));
    }

    /// Move an annotation's start to another anchor.
    pub fn set_start(&mut self, id: AnnotationId, anchor: AnchorId) {
        let Some(annotation) = self.annotations.get_mut(&id) else {
            return;
        };
        if annotation.start == anchor {
            return;
        }
        let old = annotation.start;
        if annotation.original.start.is_none() {
            annotation.original.start = Some(old);
        }
        annotation.start = anchor;
        if let Some(set) = self.starting.get_mut(&old) {
            set.remove(&id);
        }
        self.starting.entry(anchor).or_default().insert(id);
        self.mark_annotation_updated(id);
        self.record(Change::update(
            Target::Annotation(id),
            Field::StartAnchor,
            json!(old.to_string()),
            json!(anchor.to_string()),
        ));
    }

    /// Move an annotation's end to another anchor.
    pub fn set_end(&mut self, id: AnnotationId, anchor: AnchorId) {
        let Some(annotation) = self.annotations.get_mut(&id) else {
            return;
        };
        if annotation.end == anchor {
            return;
        }
        let old = annotation.end;
        if annotation.original.end.is_none() {
            annotation.original.end = Some(old);
        }
        annotation.end = anchor;
        if let Some(set) = self.ending.get_mut(&old) {
            set.remove(&id);
        }
        self.ending.entry(anchor).or_default().insert(id);
        self.mark_annotation_updated(id);
        self.record(Change::update(
            Target::Annotation(id),
            Field::EndAnchor,
            json!(old.to_string()),
            json!(anchor.to_string()),
        ));
    }

    /// Reassign an annotation's parent; the annotation is appended after
    /// the new parent's existing live children on its layer.
    pub fn set_parent(&mut self, id: AnnotationId, parent: Option<AnnotationId>) {
        let Some(annotation) = self.annotations.get(&id) else {
            return;
        };
        if annotation.parent == parent {
            return;
        }
        let layer = annotation.layer.clone();
        let old = annotation.parent;
        let new_ordinal = self
            .peers(parent, &layer)
            .iter()
            .filter(|p| **p != id)
            .count()
            + 1;
        let annotation = self.annotations.get_mut(&id).expect("looked up above");
        if annotation.original.parent.is_none() {
            annotation.original.parent = Some(old);
        }
        annotation.parent = parent;
        if let Some(old_parent) = old {
            if let Some(set) = self.children.get_mut(&old_parent) {
                set.remove(&id);
            }
        }
        if let Some(new_parent) = parent {
            self.children.entry(new_parent).or_default().insert(id);
        }
        self.mark_annotation_updated(id);
        self.record(Change::update(
            Target::Annotation(id),
            Field::Parent,
            json!(old.map(|p| p.to_string())),
            json!(parent.map(|p| p.to_string())),
        ));
        self.set_ordinal(id, new_ordinal);
    }

    /// Set an annotation's ordinal.
    pub fn set_ordinal(&mut self, id: AnnotationId, ordinal: usize) {
        let Some(annotation) = self.annotations.get_mut(&id) else {
            return;
        };
        if annotation.ordinal == ordinal {
            return;
        }
        let old = annotation.ordinal;
        if annotation.original.ordinal.is_none() {
            annotation.original.ordinal = Some(old);
        }
        annotation.ordinal = ordinal;
        self.mark_annotation_updated(id);
        self.record(Change::update(
            Target::Annotation(id),
            Field::Ordinal,
            json!(old),
            json!(ordinal),
        ));
    }

    /// Mark an annotation for deletion. The object remains in the graph
    /// until [`commit`](Self::commit) physically removes it.
    pub fn destroy_annotation(&mut self, id: AnnotationId) {
        let Some(annotation) = self.annotations.get_mut(&id) else {
            return;
        };
        if annotation.change == ChangeState::Destroy {
            return;
        }
        annotation.change = ChangeState::Destroy;
        self.record(Change::destroy(Target::Annotation(id)));
    }

    /// Mark an anchor for deletion.
    pub fn destroy_anchor(&mut self, id: AnchorId) {
        let Some(anchor) = self.anchors.get_mut(&id) else {
            return;
        };
        if anchor.change == ChangeState::Destroy {
            return;
        }
        anchor.change = ChangeState::Destroy;
        self.record(Change::destroy(Target::Anchor(id)));
    }

    /// Physically remove Destroy-marked objects, renumber the ordinals of
    /// surviving siblings, reset all change states, and clear the tracker.
    pub fn commit(&mut self) {
        let destroyed_annotations: Vec<AnnotationId> = self
            .annotations
            .values()
            .filter(|a| a.destroyed())
            .map(|a| a.id)
            .collect();
        // remember which groups need renumbering before removal
        let mut groups: BTreeSet<(Option<AnnotationId>, LayerId)> = BTreeSet::new();
        for id in &destroyed_annotations {
            let annotation = &self.annotations[id];
            groups.insert((annotation.parent, annotation.layer.clone()));
        }
        for id in destroyed_annotations {
            let annotation = self.annotations.remove(&id).expect("listed above");
            if let Some(set) = self.starting.get_mut(&annotation.start) {
                set.remove(&id);
            }
            if let Some(set) = self.ending.get_mut(&annotation.end) {
                set.remove(&id);
            }
            if let Some(parent) = annotation.parent {
                if let Some(set) = self.children.get_mut(&parent) {
                    set.remove(&id);
                }
            }
            if let Some(set) = self.by_layer.get_mut(&annotation.layer) {
                set.remove(&id);
            }
        }
        for (parent, layer) in groups {
            let ordered = self.peers(parent, &layer);
            for (index, id) in ordered.into_iter().enumerate() {
                if let Some(annotation) = self.annotations.get_mut(&id) {
                    annotation.ordinal = index + 1;
                }
            }
        }
        let destroyed_anchors: Vec<AnchorId> = self
            .anchors
            .values()
            .filter(|a| a.destroyed())
            .map(|a| a.id)
            .collect();
        for id in destroyed_anchors {
            self.anchors.remove(&id);
            self.starting.remove(&id);
            self.ending.remove(&id);
        }
        for anchor in self.anchors.values_mut() {
            anchor.change = ChangeState::NoChange;
            anchor.original_offset = None;
        }
        for annotation in self.annotations.values_mut() {
            annotation.change = ChangeState::NoChange;
            annotation.original = Default::default();
        }
        if let Some(tracker) = &mut self.tracker {
            tracker.reset();
        }
    }

    // ── fragments ───────────────────────────────────────────────────────

    /// Extract a sub-graph around one boundary annotation and a chosen set
    /// of layers.
    ///
    /// The fragment contains the boundary annotation, its ancestors, and
    /// annotations on the chosen layers that either descend from the
    /// boundary or whose midpoint falls inside the boundary's interval
    /// within the same ancestor chain. Anchors are copied only when
    /// referenced by a copied annotation on a chosen layer (or the
    /// boundary itself) - ancestor annotations outside the layer set keep
    /// their anchor *ids* but the anchors themselves may be absent, which
    /// consumers must tolerate.
    ///
    /// Ids and id counters carry over, so fragment-local additions never
    /// collide with source ids.
    pub fn fragment(&self, boundary: AnnotationId, layers: &[LayerId]) -> Graph {
        let mut fragment = Graph::new(self.schema.clone()).with_offset_units(self.offset_units);
        fragment.next_anchor = self.next_anchor;
        fragment.next_annotation = self.next_annotation;

        let Some(boundary_annotation) = self.annotation(boundary) else {
            return fragment;
        };
        let boundary_span = (self.start_offset(boundary), self.end_offset(boundary));
        let boundary_chain: BTreeSet<AnnotationId> = std::iter::once(boundary)
            .chain(self.ancestors(boundary))
            .collect();

        let mut included: BTreeSet<AnnotationId> = boundary_chain.clone();
        for layer in layers {
            for id in self.in_layer(layer) {
                if !self.is_live(id) {
                    continue;
                }
                if self.is_descendant_of(id, boundary) {
                    included.insert(id);
                    continue;
                }
                // e.g. words are children of the turn, not the utterance:
                // include them by midpoint when their ancestor chain meets
                // the boundary's
                if let ((Some(start), Some(end)), Some(midpoint)) =
                    (boundary_span, self.midpoint(id))
                {
                    let related = self
                        .ancestors(id)
                        .iter()
                        .any(|a| boundary_chain.contains(a));
                    if related && midpoint >= start && midpoint <= end {
                        included.insert(id);
                    }
                }
            }
        }

        // anchors come from annotations on the chosen layers (and the
        // boundary itself); bare ancestors don't pull theirs in
        let mut anchor_layers: BTreeSet<&LayerId> = layers.iter().collect();
        anchor_layers.insert(&boundary_annotation.layer);
        let mut keep_anchors: BTreeSet<AnchorId> = BTreeSet::new();
        for id in &included {
            let annotation = &self.annotations[id];
            if anchor_layers.contains(&annotation.layer) {
                keep_anchors.insert(annotation.start);
                keep_anchors.insert(annotation.end);
            }
        }

        for id in keep_anchors {
            if let Some(anchor) = self.anchors.get(&id) {
                let mut copy = anchor.clone();
                copy.change = ChangeState::NoChange;
                copy.original_offset = None;
                fragment.anchors.insert(id, copy);
            }
        }
        for id in included {
            let annotation = &self.annotations[&id];
            let mut copy = annotation.clone();
            copy.change = ChangeState::NoChange;
            copy.original = Default::default();
            fragment.starting.entry(copy.start).or_default().insert(id);
            fragment.ending.entry(copy.end).or_default().insert(id);
            if let Some(parent) = copy.parent {
                fragment.children.entry(parent).or_default().insert(id);
            }
            fragment
                .by_layer
                .entry(copy.layer.clone())
                .or_default()
                .insert(id);
            fragment.annotations.insert(id, copy);
        }
        // drop parent links that point outside the fragment
        let dangling: Vec<AnnotationId> = fragment
            .annotations
            .values()
            .filter(|a| {
                a.parent
                    .map(|p| !fragment.annotations.contains_key(&p))
                    .unwrap_or(false)
            })
            .map(|a| a.id)
            .collect();
        for id in dangling {
            if let Some(annotation) = fragment.annotations.get_mut(&id) {
                if let Some(parent) = annotation.parent.take() {
                    fragment.children.remove(&parent);
                }
            }
        }
        fragment
    }
}

fn confidence_value(confidence: Confidence) -> Value {
    json!(confidence.to_string())
}
