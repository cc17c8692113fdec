//! Full-graph consistency repair.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::generator::OffsetGenerator;
use crate::graph::Graph;
use crate::transform::{GraphTransformer, TransformationError};
use crate::types::{
    Alignment, AnchorId, AnnotationId, ChangeState, Confidence, Layer, LayerId,
};

/// Checks the graph structure and makes changes to ensure it is valid.
///
/// Every repair is recorded through the graph's change tracker and listed
/// as an advisory [`issue`](Self::issues); only two classes of problem are
/// fatal - a missing/untrustworthy structural boundary anchor, and
/// annotations referencing layers the schema does not define.
///
/// The passes, in order:
///
/// 1. over-length labels are truncated,
/// 2. structural turn/utterance boundary anchors are checked (fatal),
/// 3. out-of-order anchor offsets are reset on the less trustworthy side,
/// 4. orphaned children are reparented (or destroyed, when generated),
/// 5. duplicated boundaries left by aligners that skipped a token are
///    spliced back into one shared anchor,
/// 6. the layer hierarchy is enforced bottom-up: duplicate peers pruned,
///    ordinals set chronologically, shared same-layer anchors split,
///    overlaps narrowed or teased apart, saturated gaps closed, parents
///    widened to include children, tag anchors shared with parents,
/// 7. optionally, default offsets are regenerated for anchors below the
///    configured threshold.
///
/// Re-running the validator on its own output makes no further changes.
#[derive(Debug, Clone)]
pub struct Validator {
    /// Maximum allowed label length in characters, or `None` for no limit.
    pub max_label_length: Option<usize>,
    /// Validate everything, rather than only parts affected by tracked
    /// changes.
    pub full_validation: bool,
    /// When set, run offset generation with this pin threshold after the
    /// structural passes.
    pub default_offset_threshold: Option<Confidence>,
    /// Confidence assigned to offsets the validator (or its trailing
    /// generation pass) computes.
    pub default_anchor_confidence: Confidence,
    issues: Vec<String>,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            max_label_length: None,
            full_validation: false,
            default_offset_threshold: Some(Confidence::Automatic),
            default_anchor_confidence: Confidence::Default,
            issues: Vec::new(),
        }
    }
}

impl Validator {
    /// Create a validator that checks everything.
    pub fn full() -> Self {
        Self {
            full_validation: true,
            ..Self::default()
        }
    }

    /// Set the maximum label length (builder style).
    pub fn with_max_label_length(mut self, max: usize) -> Self {
        self.max_label_length = Some(max);
        self
    }

    /// Advisory problems found (and corrected) by the last transform.
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    // ── smart validation gate ───────────────────────────────────────────

    /// Whether any tracked change warrants the structural passes.
    fn needs_validation(&self, graph: &Graph) -> bool {
        if self.full_validation {
            return true;
        }
        for annotation in graph.annotations() {
            let has_children = !graph.all_children(annotation.id).is_empty();
            let aligned = graph
                .schema()
                .layer(&annotation.layer)
                .map(|l| l.aligned())
                .unwrap_or(false);
            match annotation.change() {
                ChangeState::Destroy if has_children => return true,
                ChangeState::Create => {
                    if self.max_label_length.is_some() || aligned || has_children {
                        return true;
                    }
                }
                ChangeState::Update => {
                    let label_changed = annotation.original.label.is_some();
                    if (self.max_label_length.is_some() && label_changed)
                        || aligned
                        || has_children
                    {
                        return true;
                    }
                }
                _ => {}
            }
        }
        graph
            .anchors()
            .any(|a| a.change() != ChangeState::NoChange)
    }

    // ── label length ────────────────────────────────────────────────────

    fn check_labels(&mut self, graph: &mut Graph) {
        let Some(max) = self.max_label_length else {
            return;
        };
        for id in graph.annotation_ids() {
            if !graph.is_live(id) {
                continue;
            }
            let Some(annotation) = graph.annotation(id) else {
                continue;
            };
            if annotation.label().chars().count() > max {
                let message = format!(
                    "label too long (>{max}) for {}: {}",
                    annotation.layer, annotation
                );
                warn!("{message}");
                self.issues.push(message);
                let truncated: String = annotation.label().chars().take(max).collect();
                graph.set_label(id, truncated);
            }
        }
    }

    // ── structural anchor sanity (fatal) ────────────────────────────────

    /// Turn and utterance boundary anchors must exist with a concrete
    /// offset at a minimum confidence before any repair can be trusted.
    /// Anchors absent from a fragment are tolerated as boundless.
    fn check_structural_anchors(&self, graph: &Graph) -> Result<(), TransformationError> {
        let structural: Vec<LayerId> = [
            graph.schema().turn_layer.clone(),
            graph.schema().utterance_layer.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        for layer in structural {
            for id in graph.in_layer(&layer) {
                if !graph.is_live(id) {
                    continue;
                }
                let Some(annotation) = graph.annotation(id) else {
                    continue;
                };
                for anchor_id in [annotation.start(), annotation.end()] {
                    let Some(anchor) = graph.anchor(anchor_id) else {
                        continue; // fragment: ancestor anchor not copied
                    };
                    if anchor.offset().is_none() {
                        return Err(TransformationError::UntrustworthyBoundary {
                            layer: layer.clone(),
                            anchor: anchor_id,
                            annotation: id,
                            reason: "offset is unset".to_string(),
                        });
                    }
                    if anchor.confidence() < Confidence::Default {
                        return Err(TransformationError::UntrustworthyBoundary {
                            layer: layer.clone(),
                            anchor: anchor_id,
                            annotation: id,
                            reason: format!(
                                "confidence {} is below the trust floor",
                                anchor.confidence()
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    // ── reversed / out-of-order anchors ─────────────────────────────────

    /// Walk structurally contiguous anchor sequences; where an offset goes
    /// backwards, reset the less trustworthy side to unset so it can be
    /// re-interpolated.
    fn correct_reversed_anchors(&mut self, graph: &mut Graph) {
        for layer in graph.schema().top_aligned_layers() {
            for annotation in graph.in_layer(&layer) {
                if !graph.is_live(annotation) {
                    continue;
                }
                // direct child layers are processed separately so that one
                // child layer's descendants don't interleave with another's
                let child_layers: Vec<LayerId> = graph
                    .schema()
                    .child_layers(&layer)
                    .iter()
                    .map(|l| l.id.clone())
                    .collect();
                for child_layer in child_layers {
                    let sequence = self.anchor_sequence(graph, annotation, &child_layer);
                    if sequence.len() > 1 {
                        self.correct_sequence(graph, annotation, &sequence);
                    }
                }
            }
        }
    }

    /// Anchors of the annotation and its aligned, included, non-overlapping
    /// descendants through one child layer, in structure order.
    fn anchor_sequence(
        &self,
        graph: &Graph,
        annotation: AnnotationId,
        child_layer: &LayerId,
    ) -> Vec<AnchorId> {
        let mut sequence = Vec::new();
        let mut seen = BTreeSet::new();
        let mut push = |sequence: &mut Vec<AnchorId>, seen: &mut BTreeSet<AnchorId>, id| {
            if seen.insert(id) {
                sequence.push(id);
            }
        };
        let Some(root) = graph.annotation(annotation) else {
            return sequence;
        };
        if graph.anchor(root.start()).is_some() {
            push(&mut sequence, &mut seen, root.start());
        }
        for child in graph.peers(Some(annotation), child_layer) {
            self.visit_descendants(graph, child, &mut sequence, &mut seen);
        }
        if graph.anchor(root.end()).is_some() {
            push(&mut sequence, &mut seen, root.end());
        }
        sequence
    }

    fn visit_descendants(
        &self,
        graph: &Graph,
        id: AnnotationId,
        sequence: &mut Vec<AnchorId>,
        seen: &mut BTreeSet<AnchorId>,
    ) {
        let Some(annotation) = graph.annotation(id) else {
            return;
        };
        let eligible = graph
            .schema()
            .layer(&annotation.layer)
            .map(|l| l.aligned() && l.parent_includes && !l.peers_overlap)
            .unwrap_or(false);
        let (start, end) = (annotation.start(), annotation.end());
        let layer = annotation.layer.clone();
        if eligible && graph.anchor(start).is_some() && seen.insert(start) {
            sequence.push(start);
        }
        let child_layers: Vec<LayerId> = graph
            .schema()
            .child_layers(&layer)
            .iter()
            .map(|l| l.id.clone())
            .collect();
        for child_layer in child_layers {
            for child in graph.peers(Some(id), &child_layer) {
                self.visit_descendants(graph, child, sequence, seen);
            }
        }
        if eligible && graph.anchor(end).is_some() && seen.insert(end) {
            sequence.push(end);
        }
    }

    fn correct_sequence(
        &mut self,
        graph: &mut Graph,
        annotation: AnnotationId,
        sequence: &[AnchorId],
    ) {
        // the stack of the last in-order offsets; entries whose anchors
        // are reset fall out when re-read
        let floor = graph.start_offset(annotation).unwrap_or(f64::NEG_INFINITY);
        let mut stack: Vec<Option<AnchorId>> = vec![None]; // None = the floor sentinel
        let top_offset = |graph: &Graph, stack: &[Option<AnchorId>]| -> f64 {
            match stack.last() {
                Some(Some(id)) => graph.offset_of(*id).unwrap_or(floor),
                _ => floor,
            }
        };
        for (i, &anchor) in sequence.iter().enumerate() {
            let last = top_offset(graph, &stack);
            if let Some(offset) = graph.offset_of(anchor) {
                if offset < last {
                    debug!(anchor = %anchor, offset, last, "anchors out of order");
                    self.resolve_out_of_order(graph, sequence, i, last);
                    self.issues.push(format!(
                        "anchor {anchor} at {offset} is out of order (follows {last})"
                    ));
                }
            }
            if graph.offset_of(anchor).is_some() {
                stack.push(Some(anchor));
            }
            while matches!(stack.last(), Some(Some(id)) if graph.offset_of(*id).is_none()) {
                stack.pop();
            }
        }
    }

    /// Choose which side of an ordering conflict to reset, by confidence
    /// then by subset size, and reset it to unset/`None`.
    fn resolve_out_of_order(
        &mut self,
        graph: &mut Graph,
        sequence: &[AnchorId],
        index: usize,
        last_offset: f64,
    ) {
        let anchor = sequence[index];
        let anchor_offset = graph.offset_of(anchor).unwrap_or(last_offset);
        let confidence_of = |graph: &Graph, id: AnchorId| {
            graph.anchor(id).map(|a| a.confidence()).unwrap_or_default()
        };
        let anchor_confidence = confidence_of(graph, anchor);

        // prior anchors, nearest first, back to the earlier conflict bound
        let mut prior: Vec<AnchorId> = Vec::new();
        let mut higher_prior = false;
        for k in (0..index).rev() {
            let other = sequence[k];
            if let Some(offset) = graph.offset_of(other) {
                if offset < anchor_offset {
                    break;
                }
                if confidence_of(graph, other) > anchor_confidence {
                    higher_prior = true;
                }
            }
            prior.push(other);
        }
        // following anchors, the conflicting one included, forward to the
        // later conflict bound
        let mut following: Vec<AnchorId> = vec![anchor];
        let mut higher_following = false;
        for &other in &sequence[index + 1..] {
            if let Some(offset) = graph.offset_of(other) {
                if offset > last_offset {
                    break;
                }
                if confidence_of(graph, other) > anchor_confidence {
                    higher_following = true;
                }
            }
            following.push(other);
        }

        let to_reset: Vec<AnchorId> = match (higher_prior, higher_following) {
            (true, false) => following,
            (false, true) => prior,
            (false, false) => {
                // neither side has better evidence: reset the smaller side,
                // prior on ties
                if prior.len() > following.len() {
                    following
                } else {
                    prior
                }
            }
            (true, true) => {
                // both sides corroborated: consume lowest-confidence heads
                // from either side until order can hold
                let mut result = Vec::new();
                let mut use_prior = true;
                let mut current_confidence = anchor_confidence;
                while !prior.is_empty() && !following.is_empty() {
                    let prior_offset = graph.offset_of(prior[0]);
                    let following_offset = graph.offset_of(following[0]);
                    let conflicted = match (prior_offset, following_offset) {
                        (Some(p), Some(f)) => p >= f,
                        _ => true,
                    };
                    if !conflicted {
                        break;
                    }
                    let head = if use_prior { prior[0] } else { following[0] };
                    if graph.offset_of(head).is_some()
                        && confidence_of(graph, head) > current_confidence
                    {
                        use_prior = confidence_of(graph, prior[0])
                            < confidence_of(graph, following[0]);
                        let head = if use_prior { prior[0] } else { following[0] };
                        current_confidence = confidence_of(graph, head);
                    }
                    result.push(if use_prior {
                        prior.remove(0)
                    } else {
                        following.remove(0)
                    });
                }
                result
            }
        };
        for id in to_reset {
            debug!(anchor = %id, "resetting out-of-order anchor");
            graph.set_offset(id, None);
            graph.set_anchor_confidence(id, Confidence::None);
        }
    }

    // ── orphan reconciliation ───────────────────────────────────────────

    fn reconcile_orphans(&mut self, graph: &mut Graph) {
        for layer_id in graph.schema().top_down() {
            let Some(layer) = graph.schema().layer(&layer_id) else {
                continue;
            };
            if layer.parent.is_none() || !layer.parent_includes {
                continue;
            }
            let (parent_layer, aligned) = (layer.parent.clone(), layer.aligned());
            self.reconcile_layer_orphans(graph, &layer_id, parent_layer, aligned);
        }
    }

    fn reconcile_layer_orphans(
        &mut self,
        graph: &mut Graph,
        layer_id: &LayerId,
        parent_layer: Option<LayerId>,
        aligned: bool,
    ) {
        let Some(parent_layer) = parent_layer else {
            return;
        };
        for child in graph.in_layer(layer_id) {
            if !graph.is_live(child) {
                continue;
            }
            let Some(annotation) = graph.annotation(child) else {
                continue;
            };
            let old_parent = annotation.parent();
            if !self.full_validation
                && annotation.change() == ChangeState::NoChange
                && old_parent
                    .and_then(|p| graph.annotation(p))
                    .map(|p| p.change() == ChangeState::NoChange)
                    .unwrap_or(false)
            {
                continue;
            }
            let confidence = annotation.confidence();
            let reason = self.orphan_reason(graph, child, old_parent, &parent_layer, aligned);
            let Some(reason) = reason else { continue };
            if confidence <= Confidence::Automatic {
                // automatically generated, so it can be deleted rather
                // than reparented
                let message = format!("deleting orphan {child} on {layer_id} ({reason})");
                debug!("{message}");
                self.issues.push(message);
                graph.destroy_annotation(child);
            } else if let Some(new_parent) = self.find_best_parent(graph, child, &parent_layer) {
                let message =
                    format!("new parent {new_parent} for {child} on {layer_id} ({reason})");
                debug!("{message}");
                self.issues.push(message);
                graph.set_parent(child, Some(new_parent));
            } else {
                let message = format!(
                    "no new parent available for {child} on {layer_id}, but {parent_layer} parent is {reason}"
                );
                warn!("{message}");
                self.issues.push(message);
            }
        }
    }

    fn orphan_reason(
        &self,
        graph: &Graph,
        child: AnnotationId,
        old_parent: Option<AnnotationId>,
        parent_layer: &LayerId,
        aligned: bool,
    ) -> Option<String> {
        let Some(parent) = old_parent else {
            return Some("missing".to_string());
        };
        let Some(parent_annotation) = graph.annotation(parent) else {
            return Some("missing".to_string());
        };
        if parent_annotation.destroyed() {
            return Some("deleted".to_string());
        }
        if parent_annotation.layer != *parent_layer {
            return Some("wrong layer".to_string());
        }
        if aligned && graph.anchored(child) && graph.anchored(parent) {
            let includes = graph.includes_midpoint_of(parent, child).unwrap_or(true);
            // instants sitting exactly at the parent's end are fine
            let instant_at_end = graph.duration(child) == Some(0.0)
                && graph.start_offset(child) == graph.end_offset(parent);
            if !includes && !instant_at_end {
                // still a valid parent if linked by a shared anchor
                let child_annotation = graph.annotation(child)?;
                if child_annotation.start() != parent_annotation.start()
                    && child_annotation.end() != parent_annotation.end()
                {
                    return Some("not including".to_string());
                }
            }
        }
        None
    }

    /// The best available parent: same speaker preferred, then temporal
    /// inclusion, then linkage, then sheer proximity.
    fn find_best_parent(
        &self,
        graph: &Graph,
        child: AnnotationId,
        parent_layer: &LayerId,
    ) -> Option<AnnotationId> {
        let annotation = graph.annotation(child)?;
        let (start, end) = (annotation.start(), annotation.end());
        let old_parent = annotation.parent();

        let mut candidates: Vec<AnnotationId> = graph.tags_on(child, parent_layer);
        if candidates.is_empty() {
            candidates = graph.including_on(child, parent_layer);
        }
        if candidates.is_empty() {
            candidates = graph.midpoint_including_on(child, parent_layer);
        }
        if candidates.is_empty() {
            // fall back to linked annotations: start-to-start and
            // end-to-end first, then preceding/following linkage
            let mut seen = BTreeSet::new();
            for id in graph
                .start_of_in(start, parent_layer)
                .into_iter()
                .chain(graph.end_of_in(end, parent_layer))
                .chain(graph.end_of_in(start, parent_layer))
                .chain(graph.start_of_in(end, parent_layer))
            {
                if seen.insert(id) {
                    candidates.push(id);
                }
            }
            if candidates.is_empty() {
                if let Some(old_parent) = old_parent {
                    for neighbor in [
                        graph.previous_sibling(old_parent),
                        graph.next_sibling(old_parent),
                    ]
                    .into_iter()
                    .flatten()
                    {
                        if graph.is_live(neighbor) {
                            candidates.push(neighbor);
                        }
                    }
                }
            }
        }

        let grandparent = old_parent.and_then(|p| graph.annotation(p)).and_then(|p| p.parent());
        let mut best: Option<AnnotationId> = None;
        let mut nearest: Option<AnnotationId> = None;
        for candidate in candidates {
            if candidate == child {
                continue;
            }
            if let Some(grandparent) = grandparent {
                if graph.annotation(candidate).and_then(|c| c.parent()) == Some(grandparent) {
                    // same grandparent: the same speaker's sibling parent
                    return Some(candidate);
                }
            }
            if graph.first_common_ancestor(child, candidate).is_some() {
                // maximizes the chance the new parent is the same speaker
                best = Some(candidate);
            }
            let closer = match (nearest, graph.distance(child, candidate)) {
                (None, _) => true,
                (Some(n), Some(d)) => graph
                    .distance(child, n)
                    .map(|nd| d < nd)
                    .unwrap_or(true),
                (Some(_), None) => false,
            };
            if closer {
                nearest = Some(candidate);
            }
        }
        best.or(nearest)
    }

    // ── aligner-skip chain bridging ─────────────────────────────────────

    /// Splice abutting tokens whose end/start are different anchors at
    /// the same instant back onto one shared anchor.
    fn bridge_skipped_boundaries(&mut self, graph: &mut Graph) {
        let layers: Vec<Layer> = graph
            .schema()
            .layers()
            .filter(|l| l.aligned() && l.peers && !l.peers_overlap)
            .cloned()
            .collect();
        for layer in layers {
            let parents: BTreeSet<Option<AnnotationId>> = graph
                .in_layer(&layer.id)
                .into_iter()
                .filter(|id| graph.is_live(*id))
                .filter_map(|id| graph.annotation(id).map(|a| a.parent()))
                .collect();
            for parent in parents {
                let peers = graph.peers(parent, &layer.id);
                for pair in peers.windows(2) {
                    let (first, second) = (pair[0], pair[1]);
                    let (Some(first_end), Some(second_start)) = (
                        graph.annotation(first).map(|a| a.end()),
                        graph.annotation(second).map(|a| a.start()),
                    ) else {
                        continue;
                    };
                    if first_end == second_start {
                        continue;
                    }
                    let (Some(end_offset), Some(start_offset)) =
                        (graph.offset_of(first_end), graph.offset_of(second_start))
                    else {
                        continue;
                    };
                    if end_offset != start_offset {
                        continue;
                    }
                    // same instant on two anchors: keep the side with the
                    // better evidence, earliest id on ties
                    let end_confidence = graph
                        .anchor(first_end)
                        .map(|a| a.confidence())
                        .unwrap_or_default();
                    let start_confidence = graph
                        .anchor(second_start)
                        .map(|a| a.confidence())
                        .unwrap_or_default();
                    let (canonical, abandoned) = if end_confidence > start_confidence
                        || (end_confidence == start_confidence && first_end < second_start)
                    {
                        (first_end, second_start)
                    } else {
                        (second_start, first_end)
                    };
                    let message = format!(
                        "bridging duplicate boundary at {end_offset}: {abandoned} folded into {canonical}"
                    );
                    debug!("{message}");
                    self.issues.push(message);
                    for id in graph.start_of(abandoned) {
                        graph.set_start(id, canonical);
                    }
                    for id in graph.end_of(abandoned) {
                        graph.set_end(id, canonical);
                    }
                    if !graph.is_linked(abandoned) {
                        graph.destroy_anchor(abandoned);
                    }
                }
            }
        }
    }

    // ── hierarchy enforcement ───────────────────────────────────────────

    fn validate_hierarchy(&mut self, graph: &mut Graph) {
        // bottom up, aligned layers before tag layers, so widening and
        // narrowing trickles down before tags follow their parents
        let bottom_up = graph.schema().bottom_up();
        let mut layers: Vec<LayerId> = Vec::new();
        for id in &bottom_up {
            if graph.schema().layer(id).map(|l| l.aligned()).unwrap_or(false) {
                layers.push(id.clone());
            }
        }
        for id in &bottom_up {
            if !graph.schema().layer(id).map(|l| l.aligned()).unwrap_or(true) {
                layers.push(id.clone());
            }
        }
        for layer_id in layers {
            let Some(layer) = graph.schema().layer(&layer_id).cloned() else {
                continue;
            };
            if layer.parent.is_none() {
                continue;
            }
            if !self.full_validation {
                let changed = graph
                    .in_layer(&layer_id)
                    .into_iter()
                    .any(|id| {
                        graph
                            .annotation(id)
                            .map(|a| a.change() != ChangeState::NoChange)
                            .unwrap_or(false)
                    });
                if !changed {
                    continue;
                }
            }
            self.validate_layer(graph, &layer);
        }
    }

    fn validate_layer(&mut self, graph: &mut Graph, layer: &Layer) {
        let Some(parent_layer) = layer.parent.clone() else {
            return;
        };
        let parents: Vec<AnnotationId> = graph
            .in_layer(&parent_layer)
            .into_iter()
            .filter(|id| graph.is_live(*id))
            .collect();

        // at most one live child per parent on peerless layers; the
        // earliest (ordinal, id) survives
        if !layer.peers {
            for &parent in &parents {
                for (index, child) in graph.peers(Some(parent), &layer.id).into_iter().enumerate() {
                    if index > 0 {
                        let message = format!("deleting extra child {child} on {}", layer.id);
                        debug!("{message}");
                        self.issues.push(message);
                        graph.destroy_annotation(child);
                    }
                }
            }
        }

        // chronological ordinals, for layers where order is meaningful
        if layer.peers && layer.aligned() && layer.parent_includes {
            for &parent in &parents {
                let mut children = graph.peers(Some(parent), &layer.id);
                // stable by start offset; unanchored children keep their
                // relative order
                children.sort_by(|a, b| {
                    match (graph.start_offset(*a), graph.start_offset(*b)) {
                        (Some(x), Some(y)) => {
                            x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
                        }
                        _ => std::cmp::Ordering::Equal,
                    }
                });
                for (index, child) in children.into_iter().enumerate() {
                    graph.set_ordinal(child, index + 1);
                }
            }
        }

        for &parent in &parents {
            self.check_layer_anchors(graph, layer, &parent_layer, parent);
        }
    }

    /// The per-parent anchor checks: shared-anchor splits, overlap
    /// resolution, saturated gap closing, parent inclusion.
    fn check_layer_anchors(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        parent_layer: &LayerId,
        parent: AnnotationId,
    ) {
        let mut last_offset = f64::NEG_INFINITY;
        let mut last_child: Option<AnnotationId> = None;
        let mut last_anchored: Option<AnnotationId> = None;

        for child in graph.peers(Some(parent), &layer.id) {
            if graph.annotation(child).and_then(|a| a.parent()) != Some(parent) {
                continue; // reparented mid-pass
            }
            let Some(start_anchor) = graph.annotation(child).map(|a| a.start()) else {
                continue;
            };
            if graph.anchor(start_anchor).is_none() {
                continue; // fragment: treat the span as boundless
            }

            if !layer.peers_overlap && layer.aligned() {
                // a start anchor shared within one layer means simultaneous
                // peers; give this child its own anchor
                let parallel = graph
                    .start_of_in(start_anchor, &layer.id)
                    .into_iter()
                    .find(|other| *other != child);
                if parallel.is_some() {
                    let (offset, confidence) = graph
                        .anchor(start_anchor)
                        .map(|a| (a.offset(), a.confidence()))
                        .unwrap_or((None, Confidence::None));
                    let split = graph.add_anchor(offset, confidence);
                    let message = format!("splitting shared start anchor of {child}");
                    debug!("{message}");
                    self.issues.push(message);
                    change_start_with_related(graph, child, split, &mut BTreeSet::new());
                }

                let Some(end_anchor) = graph.annotation(child).map(|a| a.end()) else {
                    continue;
                };
                if graph.anchor(end_anchor).is_none() {
                    continue;
                }

                if let Some(start_offset) = graph.start_offset(child) {
                    if start_offset < last_offset {
                        self.resolve_overlap(graph, layer, child, last_anchored, last_offset);
                    } else if layer.saturated {
                        self.close_gap(
                            graph,
                            layer,
                            parent_layer,
                            parent,
                            child,
                            last_child,
                            last_offset,
                        );
                    }
                }

                // the same split for shared end anchors
                let Some(end_anchor) = graph.annotation(child).map(|a| a.end()) else {
                    continue;
                };
                let parallel = graph
                    .end_of_in(end_anchor, &layer.id)
                    .into_iter()
                    .find(|other| *other != child);
                if parallel.is_some() {
                    let (offset, confidence) = graph
                        .anchor(end_anchor)
                        .map(|a| (a.offset(), a.confidence()))
                        .unwrap_or((None, Confidence::None));
                    let split = graph.add_anchor(offset, confidence);
                    let message = format!("splitting shared end anchor of {child}");
                    debug!("{message}");
                    self.issues.push(message);
                    change_end_with_related(graph, child, split, &mut BTreeSet::new());
                }

                if let Some(end_offset) = graph.end_offset(child) {
                    last_offset = end_offset;
                }
            }

            // instantaneous annotations are tolerated; aligners produce them

            self.include_in_parent(graph, layer, parent, child);

            if graph.anchored(child) {
                last_anchored = Some(child);
            }
            last_child = Some(child);
        }

        if let Some(last_child) = last_child {
            if layer.saturated {
                self.close_trailing_gap(graph, layer, parent_layer, parent, last_child);
            }
        }
    }

    /// Saturated layers: no gap between the parent start, consecutive
    /// children, and the parent end.
    #[allow(clippy::too_many_arguments)]
    fn close_gap(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        parent_layer: &LayerId,
        parent: AnnotationId,
        child: AnnotationId,
        last_child: Option<AnnotationId>,
        last_offset: f64,
    ) {
        match last_child {
            None => {
                // first child must meet the parent start
                let (Some(child_start), Some(parent_start)) = (
                    graph.annotation(child).map(|a| a.start()),
                    graph.annotation(parent).map(|a| a.start()),
                ) else {
                    return;
                };
                if graph.anchor(parent_start).is_none() {
                    return;
                }
                let parent_offset = graph.offset_of(parent_start);
                let child_offset = graph.offset_of(child_start);
                if parent_offset.is_none()
                    || matches!((child_offset, parent_offset), (Some(c), Some(p)) if c > p)
                {
                    // narrow the parent to the first child
                    let mut exclude: BTreeSet<LayerId> = BTreeSet::new();
                    exclude.insert(parent_layer.clone());
                    let message = format!("narrowing {parent} to remove gap before {child}");
                    debug!("{message}");
                    self.issues.push(message);
                    change_start_with_related(graph, parent, child_start, &mut exclude);
                } else if child_start != parent_start {
                    let message = format!("sharing start anchor of {child} with {parent}");
                    debug!("{message}");
                    self.issues.push(message);
                    change_start_with_related(graph, child, parent_start, &mut BTreeSet::new());
                }
            }
            Some(last_child) => {
                let Some(child_start) = graph.annotation(child).map(|a| a.start()) else {
                    return;
                };
                if graph.offset_of(child_start) != Some(last_offset) {
                    // widen the previous child up to this one
                    let mut exclude: BTreeSet<LayerId> = BTreeSet::new();
                    if !layer.peers_overlap {
                        exclude.insert(layer.id.clone());
                    }
                    let message = format!("widening {last_child} to close gap before {child}");
                    debug!("{message}");
                    self.issues.push(message);
                    change_end_with_related(graph, last_child, child_start, &mut exclude);
                }
            }
        }
    }

    fn close_trailing_gap(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        parent_layer: &LayerId,
        parent: AnnotationId,
        last_child: AnnotationId,
    ) {
        let Some(last_end) = graph.annotation(last_child).map(|a| a.end()) else {
            return;
        };
        let Some(last_end_offset) = graph.offset_of(last_end) else {
            return;
        };
        let Some(parent_end) = graph.annotation(parent).map(|a| a.end()) else {
            return;
        };
        if graph.anchor(parent_end).is_none() {
            return;
        }
        let parent_end_offset = graph.offset_of(parent_end);
        if parent_end_offset.is_none()
            || parent_end_offset.map(|o| o > last_end_offset).unwrap_or(false)
        {
            // narrow the parent back to the last child
            let mut exclude: BTreeSet<LayerId> = BTreeSet::new();
            exclude.insert(layer.id.clone());
            let message = format!("narrowing {parent} to close gap after {last_child}");
            debug!("{message}");
            self.issues.push(message);
            change_end_with_related(graph, parent, last_end, &mut exclude);
            // following annotations that shared the old parent end come too
            for following in graph.start_of_in(parent_end, parent_layer) {
                change_start_with_related(graph, following, last_end, &mut BTreeSet::new());
            }
        } else if parent_end != last_end {
            let message = format!("sharing end anchor of {last_child} with {parent}");
            debug!("{message}");
            self.issues.push(message);
            graph.set_end(last_child, parent_end);
        }
    }

    /// Overlapping siblings: narrow one or both toward a midpoint when no
    /// grandchild would be orphaned by it, otherwise tease them apart onto
    /// fresh boundary anchors.
    fn resolve_overlap(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        child: AnnotationId,
        last_anchored: Option<AnnotationId>,
        last_offset: f64,
    ) {
        let Some(last_anchored) = last_anchored else {
            let message = format!(
                "cannot correct sequentiality of {child} (no prior anchored sibling; last offset {last_offset})"
            );
            warn!("{message}");
            self.issues.push(message);
            return;
        };
        let Some(child_start_offset) = graph.start_offset(child) else {
            return;
        };
        let Some(last_start_offset) = graph.start_offset(last_anchored) else {
            return;
        };
        let mut midpoint = child_start_offset + (last_offset - child_start_offset) / 2.0;
        if midpoint <= last_start_offset {
            midpoint = last_start_offset + (last_offset - last_start_offset) / 2.0;
        }
        let earliest_of_child = graph.earliest_descendant(child);
        let latest_of_last = graph.latest_descendant(last_anchored);

        let child_grandchild_blocks = earliest_of_child
            .and_then(|d| graph.start_offset(d))
            .map(|o| o < midpoint)
            .unwrap_or(false);
        let last_grandchild_blocks = latest_of_last
            .and_then(|d| graph.end_offset(d))
            .map(|o| o > midpoint)
            .unwrap_or(false);

        if !child_grandchild_blocks && !last_grandchild_blocks {
            // narrow both to the midpoint
            let message =
                format!("overlapping {last_anchored} and {child}: narrowed both to {midpoint}");
            debug!("{message}");
            self.issues.push(message);
            let Some(last_end) = graph.annotation(last_anchored).map(|a| a.end()) else {
                return;
            };
            if layer.saturated {
                change_start_with_related(graph, child, last_end, &mut BTreeSet::new());
                graph.set_offset(last_end, Some(midpoint));
                graph.set_anchor_confidence(last_end, self.default_anchor_confidence);
            } else {
                // consecutive words may legitimately not share anchors
                // (an utterance boundary may sit between them)
                graph.set_offset(last_end, Some(midpoint));
                graph.set_anchor_confidence(last_end, self.default_anchor_confidence);
                if let Some(child_start) = graph.annotation(child).map(|a| a.start()) {
                    graph.set_offset(child_start, Some(midpoint));
                    graph.set_anchor_confidence(child_start, self.default_anchor_confidence);
                }
            }
            let needs_end_fix = match (graph.end_offset(child), graph.start_offset(child)) {
                (None, _) => true,
                (Some(end), Some(start)) => end <= start,
                _ => false,
            };
            if needs_end_fix {
                if let Some(child_end) = graph.annotation(child).map(|a| a.end()) {
                    graph.set_offset(child_end, Some(last_offset));
                    graph.set_anchor_confidence(child_end, self.default_anchor_confidence);
                }
            }
            return;
        }

        // try narrowing just this child forward to follow the last one
        let last_end_offset = graph.end_offset(last_anchored);
        let child_blocks_narrowing = earliest_of_child
            .and_then(|d| graph.start_offset(d))
            .zip(last_end_offset)
            .map(|(o, last_end)| o < last_end)
            .unwrap_or(false);
        if !child_blocks_narrowing {
            if let (Some(last_end), Some(child_end)) = (last_end_offset, graph.end_offset(child)) {
                if last_end < child_end {
                    let message =
                        format!("overlapping {last_anchored} and {child}: narrowed second");
                    debug!("{message}");
                    self.issues.push(message);
                    let Some(last_end_anchor) =
                        graph.annotation(last_anchored).map(|a| a.end())
                    else {
                        return;
                    };
                    if layer.saturated {
                        change_start_with_related(
                            graph,
                            child,
                            last_end_anchor,
                            &mut BTreeSet::new(),
                        );
                    } else if let Some(child_start) = graph.annotation(child).map(|a| a.start()) {
                        graph.set_offset(child_start, Some(last_end));
                        graph.set_anchor_confidence(child_start, self.default_anchor_confidence);
                    }
                    return;
                }
            }
        }

        // try narrowing the last one back to meet this child
        let last_blocks_narrowing = latest_of_last
            .and_then(|d| graph.end_offset(d))
            .map(|o| o > child_start_offset)
            .unwrap_or(false);
        if !last_blocks_narrowing && child_start_offset > last_start_offset {
            let message = format!("overlapping {last_anchored} and {child}: narrowed first");
            debug!("{message}");
            self.issues.push(message);
            let Some(child_start) = graph.annotation(child).map(|a| a.start()) else {
                return;
            };
            if layer.saturated {
                change_end_with_related(graph, last_anchored, child_start, &mut BTreeSet::new());
            } else if let Some(last_end) = graph.annotation(last_anchored).map(|a| a.end()) {
                graph.set_offset(last_end, Some(child_start_offset));
                graph.set_anchor_confidence(last_end, self.default_anchor_confidence);
            }
            return;
        }

        let message = format!("overlapping {last_anchored} and {child}: teasing both apart");
        debug!("{message}");
        self.issues.push(message);
        self.tease_apart(graph, last_anchored, child, layer.saturated);
    }

    /// Parents must temporally include their children; tags share their
    /// parent's anchors outright.
    fn include_in_parent(
        &mut self,
        graph: &mut Graph,
        layer: &Layer,
        parent: AnnotationId,
        child: AnnotationId,
    ) {
        if !layer.parent_includes {
            return;
        }
        let (Some(child_annotation), Some(parent_annotation)) =
            (graph.annotation(child), graph.annotation(parent))
        else {
            return;
        };
        let (child_start, child_end) = (child_annotation.start(), child_annotation.end());
        let (parent_start, parent_end) = (parent_annotation.start(), parent_annotation.end());
        if graph.anchor(child_start).is_none() {
            return;
        }

        if layer.alignment == Alignment::Tag {
            if child_start != parent_start {
                debug!(child = %child, parent = %parent, "sharing tag start anchor");
                graph.set_start(child, parent_start);
            }
            let child_end = graph.annotation(child).map(|a| a.end()).unwrap_or(child_end);
            if child_end != parent_end {
                debug!(child = %child, parent = %parent, "sharing tag end anchor");
                graph.set_end(child, parent_end);
            }
            return;
        }

        // widen the parent when a child sticks out
        if graph.anchor(parent_start).is_some() {
            if let (Some(child_offset), Some(parent_offset)) =
                (graph.offset_of(child_start), graph.offset_of(parent_start))
            {
                if parent_offset > child_offset {
                    let new_anchor = if layer.saturated {
                        child_start
                    } else {
                        // sparse children don't share anchors with the parent
                        let (offset, confidence) = graph
                            .anchor(child_start)
                            .map(|a| (a.offset(), a.confidence()))
                            .unwrap_or((None, Confidence::None));
                        graph.add_anchor(offset, confidence)
                    };
                    let mut exclude: BTreeSet<LayerId> = BTreeSet::new();
                    if !layer.peers_overlap {
                        exclude.insert(layer.id.clone());
                    }
                    let message =
                        format!("widening {parent} to {child_offset} to include {child}");
                    debug!("{message}");
                    self.issues.push(message);
                    change_start_with_related(graph, parent, new_anchor, &mut exclude);
                }
            }
        }
        let (Some(child_end), Some(parent_end)) = (
            graph.annotation(child).map(|a| a.end()),
            graph.annotation(parent).map(|a| a.end()),
        ) else {
            return;
        };
        if graph.anchor(parent_end).is_some() {
            if let (Some(child_offset), Some(parent_offset)) =
                (graph.offset_of(child_end), graph.offset_of(parent_end))
            {
                if parent_offset < child_offset {
                    let new_anchor = if layer.saturated {
                        child_end
                    } else {
                        let (offset, confidence) = graph
                            .anchor(child_end)
                            .map(|a| (a.offset(), a.confidence()))
                            .unwrap_or((None, Confidence::None));
                        graph.add_anchor(offset, confidence)
                    };
                    let mut exclude: BTreeSet<LayerId> = BTreeSet::new();
                    if !layer.peers_overlap {
                        exclude.insert(layer.id.clone());
                    }
                    let message =
                        format!("widening {parent} to {child_offset} to include {child}");
                    debug!("{message}");
                    self.issues.push(message);
                    change_end_with_related(graph, parent, new_anchor, &mut exclude);
                }
            }
        }
    }

    /// Separate two incorrectly overlapping child-bearing annotations so
    /// each side ends up temporally independent, squeezing the fewest
    /// possible grandchildren toward the new shared midpoint.
    fn tease_apart(
        &mut self,
        graph: &mut Graph,
        first: AnnotationId,
        last: AnnotationId,
        share_anchors: bool,
    ) {
        let (Some(first_annotation), Some(last_annotation)) =
            (graph.annotation(first), graph.annotation(last))
        else {
            return;
        };
        let (first_start, first_end) = (first_annotation.start(), first_annotation.end());
        let (last_start, last_end) = (last_annotation.start(), last_annotation.end());

        // parallel annotations that must be relinked with each side
        let parallel = |graph: &Graph, anchor: AnchorId, ends: bool| -> Vec<AnnotationId> {
            let related = if ends {
                graph.end_of(anchor)
            } else {
                graph.start_of(anchor)
            };
            related
                .into_iter()
                .filter(|id| *id != first && *id != last)
                .collect()
        };
        let start_with_first = parallel(graph, first_start, false);
        let end_with_first = parallel(graph, first_end, true);
        let start_with_last = parallel(graph, last_start, false);
        let end_with_last = parallel(graph, last_end, true);

        // the four anchors in offset order; an unset or reversed last-end
        // falls back to the first's end
        let first_start_offset = graph.offset_of(first_start).unwrap_or(f64::NEG_INFINITY);
        let third = if graph.offset_of(last_start).unwrap_or(f64::NEG_INFINITY)
            >= first_start_offset
        {
            last_start
        } else {
            first_start
        };
        let fourth = match graph.offset_of(last_end) {
            Some(offset) if offset >= first_start_offset => last_end,
            _ => first_end,
        };
        let mut ordered = [first_start, first_end, third, fourth];
        ordered.sort_by(|a, b| {
            let oa = graph.offset_of(*a).unwrap_or(f64::INFINITY);
            let ob = graph.offset_of(*b).unwrap_or(f64::INFINITY);
            oa.partial_cmp(&ob)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(b))
        });
        let (Some(almost_earliest), Some(almost_latest)) = (
            graph.offset_of(ordered[1]),
            graph.offset_of(ordered[2]),
        ) else {
            return;
        };

        let earliest_source = graph
            .anchor(ordered[0])
            .map(|a| (a.offset(), a.confidence()))
            .unwrap_or((None, Confidence::None));
        let latest_source = graph
            .anchor(ordered[3])
            .map(|a| (a.offset(), a.confidence()))
            .unwrap_or((None, Confidence::None));
        let earliest = graph.add_anchor(earliest_source.0, earliest_source.1);
        let latest = graph.add_anchor(latest_source.0, latest_source.1);

        let midpoint = almost_earliest + (almost_latest - almost_earliest) / 2.0;
        let middle_first = graph.add_anchor(Some(midpoint), self.default_anchor_confidence);
        let middle_last = if share_anchors {
            middle_first
        } else {
            graph.add_anchor(Some(midpoint), self.default_anchor_confidence)
        };

        let relink = |graph: &mut Graph, ids: &[AnnotationId], anchor: AnchorId, ends: bool| {
            for &id in ids {
                let instant = graph
                    .annotation(id)
                    .map(|a| a.instantaneous())
                    .unwrap_or(false);
                if ends {
                    if instant {
                        graph.set_start(id, anchor);
                    }
                    graph.set_end(id, anchor);
                } else {
                    if instant {
                        graph.set_end(id, anchor);
                    }
                    graph.set_start(id, anchor);
                }
            }
        };

        change_start_with_related(graph, first, earliest, &mut BTreeSet::new());
        relink(graph, &start_with_first, earliest, false);
        change_end_with_related(graph, first, middle_first, &mut BTreeSet::new());
        relink(graph, &end_with_first, middle_first, true);
        change_start_with_related(graph, last, middle_last, &mut BTreeSet::new());
        relink(graph, &start_with_last, middle_last, false);
        change_end_with_related(graph, last, latest, &mut BTreeSet::new());
        relink(graph, &end_with_last, latest, true);

        debug!(first = %first, last = %last, midpoint, "teased apart");

        self.reset_child_anchors(graph, first, almost_earliest, ResetSide::After);
        self.reset_child_anchors(graph, last, almost_latest, ResetSide::Before);
    }

    /// Re-chain the children of `parent` from its start anchor to its end
    /// anchor, unsetting anchors that fell on the wrong side of the
    /// threshold so interpolation can place them afresh.
    fn reset_child_anchors(
        &mut self,
        graph: &mut Graph,
        parent: AnnotationId,
        threshold: f64,
        side: ResetSide,
    ) {
        let child_layers: Vec<LayerId> = graph
            .schema()
            .child_layers(
                &match graph.annotation(parent) {
                    Some(a) => a.layer.clone(),
                    None => return,
                },
            )
            .iter()
            .filter(|l| l.alignment == Alignment::Interval && l.saturated && l.parent_includes)
            .map(|l| l.id.clone())
            .collect();

        for child_layer in child_layers {
            let children = graph.peers(Some(parent), &child_layer);
            let (Some(parent_start), Some(parent_end)) = (
                graph.annotation(parent).map(|a| a.start()),
                graph.annotation(parent).map(|a| a.end()),
            ) else {
                return;
            };
            let mut last_child: Option<AnnotationId> = None;
            for child in children {
                match last_child {
                    None => {
                        // the first child shares its start with the parent
                        if graph.annotation(child).map(|a| a.start()) != Some(parent_start) {
                            graph.set_start(child, parent_start);
                        }
                    }
                    Some(last) => {
                        let last_end_offset = graph.end_offset(last);
                        let out_of_range = match (side, last_end_offset) {
                            (ResetSide::Before, Some(o)) => o <= threshold,
                            (ResetSide::After, Some(o)) => o >= threshold,
                            (_, None) => false,
                        };
                        if out_of_range {
                            let child_start = graph.annotation(child).map(|a| a.start());
                            let last_end = graph.annotation(last).map(|a| a.end());
                            let child_start_ok = match (side, child_start.and_then(|a| graph.offset_of(a))) {
                                (ResetSide::Before, Some(o)) => o > threshold,
                                (ResetSide::After, Some(o)) => o < threshold,
                                (_, None) => false,
                            };
                            if child_start != last_end && child_start_ok {
                                if let Some(child_start) = child_start {
                                    graph.set_end(last, child_start);
                                }
                            } else {
                                let fresh = graph.add_anchor(None, Confidence::None);
                                graph.set_end(last, fresh);
                            }
                            if !graph.anchored(last)
                                || graph.includes_offset(last, threshold) == Some(true)
                            {
                                self.reset_child_anchors(graph, last, threshold, side);
                            }
                        }
                        // this child must chain from the last one
                        let last_end = graph.annotation(last).map(|a| a.end());
                        if graph.annotation(child).map(|a| a.start()) != last_end {
                            if let Some(last_end) = last_end {
                                graph.set_start(child, last_end);
                            }
                        }
                    }
                }
                last_child = Some(child);
            }
            if let Some(last) = last_child {
                if graph.annotation(last).map(|a| a.end()) != Some(parent_end) {
                    graph.set_end(last, parent_end);
                }
                if !graph.anchored(last) || graph.includes_offset(last, threshold) == Some(true) {
                    self.reset_child_anchors(graph, last, threshold, side);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetSide {
    /// Unset anchors at or before the threshold.
    Before,
    /// Unset anchors at or after the threshold.
    After,
}

/// Move an annotation's start to a new anchor, bringing along related
/// annotations that started in the same place - parallel spans on other
/// layers (unless a sparse parent/child relationship precludes sharing)
/// and, recursively, the linked predecessor on the same layer.
pub(crate) fn change_start_with_related(
    graph: &mut Graph,
    id: AnnotationId,
    new_start: AnchorId,
    exclude: &mut BTreeSet<LayerId>,
) {
    let Some(annotation) = graph.annotation(id) else {
        return;
    };
    let original_start = annotation.start();
    let original_end = annotation.end();
    let layer = annotation.layer.clone();
    let parent = annotation.parent();
    graph.set_start(id, new_start);
    if original_start == original_end {
        // instantaneous: both anchors move
        graph.set_end(id, new_start);
    }

    for other in graph.start_of(original_start) {
        if other == id {
            continue;
        }
        let Some(other_annotation) = graph.annotation(other) else {
            continue;
        };
        if other_annotation.layer == layer || exclude.contains(&other_annotation.layer) {
            continue;
        }
        if other_annotation.start() != original_start {
            continue; // already moved
        }
        if precludes_sharing(graph, id, other) {
            continue;
        }
        let instant = other_annotation.instantaneous();
        debug!(annotation = %other, "moving related start");
        graph.set_start(other, new_start);
        if instant {
            graph.set_end(other, new_start);
        }
    }

    if !exclude.contains(&layer) {
        exclude.insert(layer.clone());
        for previous in graph.end_of_in(original_start, &layer) {
            let Some(previous_annotation) = graph.annotation(previous) else {
                continue;
            };
            if previous_annotation.end() != original_start {
                continue;
            }
            if !previous_annotation.instantaneous() && previous_annotation.start() == new_start {
                continue; // would create a new instant
            }
            if previous_annotation.parent() != parent {
                continue;
            }
            change_end_with_related(graph, previous, new_start, exclude);
        }
    }
}

/// The mirror of [`change_start_with_related`] for end anchors.
pub(crate) fn change_end_with_related(
    graph: &mut Graph,
    id: AnnotationId,
    new_end: AnchorId,
    exclude: &mut BTreeSet<LayerId>,
) {
    let Some(annotation) = graph.annotation(id) else {
        return;
    };
    let original_start = annotation.start();
    let original_end = annotation.end();
    let layer = annotation.layer.clone();
    graph.set_end(id, new_end);
    if original_start == original_end {
        graph.set_start(id, new_end);
    }

    for other in graph.end_of(original_end) {
        if other == id {
            continue;
        }
        let Some(other_annotation) = graph.annotation(other) else {
            continue;
        };
        if other_annotation.layer == layer || exclude.contains(&other_annotation.layer) {
            continue;
        }
        if other_annotation.end() != original_end {
            continue;
        }
        if precludes_sharing(graph, id, other) {
            continue;
        }
        let instant = other_annotation.instantaneous();
        debug!(annotation = %other, "moving related end");
        graph.set_end(other, new_end);
        if instant {
            graph.set_start(other, new_end);
        }
    }

    if !exclude.contains(&layer) {
        exclude.insert(layer.clone());
        let successors: Vec<AnnotationId> = graph
            .all_start_of(original_end)
            .into_iter()
            .filter(|next| {
                graph
                    .annotation(*next)
                    .map(|a| a.layer == layer)
                    .unwrap_or(false)
            })
            .collect();
        let mut survivors = 0usize;
        for &next in &successors {
            if !graph.is_live(next) {
                continue;
            }
            survivors += 1;
            let Some(next_annotation) = graph.annotation(next) else {
                continue;
            };
            if next_annotation.start() != original_end {
                continue;
            }
            if !next_annotation.instantaneous() && next_annotation.end() == new_end {
                continue; // would create a new instant
            }
            change_start_with_related(graph, next, new_end, exclude);
        }
        if survivors == 0 && !successors.is_empty() {
            // every successor on this layer was deleted; bring one
            // annotation starting here (any layer) so the rest follow
            for next in graph.start_of(original_end) {
                let Some(next_annotation) = graph.annotation(next) else {
                    continue;
                };
                if exclude.contains(&next_annotation.layer) {
                    continue;
                }
                change_start_with_related(graph, next, new_end, exclude);
                break;
            }
        }
    }
}

/// Whether a sparse parent/child relationship between the two layers
/// means the annotations should not be forced to share anchors.
fn precludes_sharing(graph: &Graph, id: AnnotationId, other: AnnotationId) -> bool {
    let (Some(annotation), Some(other_annotation)) =
        (graph.annotation(id), graph.annotation(other))
    else {
        return true;
    };
    let (Some(layer), Some(other_layer)) = (
        graph.schema().layer(&annotation.layer),
        graph.schema().layer(&other_annotation.layer),
    ) else {
        return false;
    };
    if layer.parent.as_ref() == Some(&other_layer.id) {
        // other is on this annotation's parent layer
        if !layer.saturated {
            return true;
        }
        if annotation.parent() != Some(other) {
            return true;
        }
    } else if other_layer.parent.as_ref() == Some(&layer.id) {
        // this annotation is on other's parent layer
        if !other_layer.saturated {
            return true;
        }
        if other_annotation.parent() != Some(id) {
            return true;
        }
    }
    false
}

impl GraphTransformer for Validator {
    fn transform(&mut self, graph: &mut Graph) -> Result<(), TransformationError> {
        self.issues.clear();

        // annotations must reference defined layers (caller misuse)
        for annotation in graph.annotations() {
            if graph.schema().layer(&annotation.layer).is_none() {
                return Err(TransformationError::UndefinedLayer(annotation.layer.clone()));
            }
        }

        if !self.needs_validation(graph) {
            debug!("no changes requiring validation");
            return Ok(());
        }

        self.check_labels(graph);
        self.check_structural_anchors(graph)?;
        self.correct_reversed_anchors(graph);
        self.reconcile_orphans(graph);
        self.bridge_skipped_boundaries(graph);
        self.validate_hierarchy(graph);

        if let Some(threshold) = self.default_offset_threshold {
            let anchors_changed = self.full_validation
                || graph.anchors().any(|a| {
                    a.change() != ChangeState::NoChange && a.change() != ChangeState::Destroy
                });
            if anchors_changed {
                let mut generator =
                    OffsetGenerator::new(threshold, self.default_anchor_confidence);
                generator.transform(graph)?;
                self.issues.extend(generator.issues().iter().cloned());
            } else {
                debug!("skipping default offset generation");
            }
        }
        Ok(())
    }
}
