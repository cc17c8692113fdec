//! Default offset generation: confidence-weighted temporal interpolation.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::chain::{chain_backward_until, chain_forward_until};
use crate::graph::Graph;
use crate::transform::{GraphTransformer, TransformationError};
use crate::types::{AnchorId, AnnotationId, Confidence, LayerId};

/// One position in an interpolation run: either a real anchor or an
/// immovable sentinel pinned at an offset.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Pin(f64),
    Anchor(AnchorId),
}

/// Fills in missing or low-confidence anchor offsets by linear
/// interpolation between trusted ("pinned") anchors.
///
/// An anchor is a pin iff its offset is set and its confidence is at or
/// above [`confidence_threshold`](Self::confidence_threshold); everything
/// below is recomputed. Anchors the generator has already placed in the
/// current run are treated as pins for later scopes, so words spread
/// through utterances first, and then phones spread through words without
/// moving the word boundaries.
///
/// ## Algorithm
///
/// 1. When the schema declares turn, utterance and word layers, words are
///    assigned to their turn's offset-ordered utterances, and each
///    utterance becomes an independent interpolation scope: its anchor
///    sequence is built by chaining forward from each word (catching
///    interspersed noise spans and words with unset offsets), bounded by
///    immovable sentinels at the utterance boundaries.
/// 2. Every remaining non-pin anchor is resolved by chaining backward and
///    forward to the nearest pins, falling back to the bounding parent's
///    start/end anchors when a chain end is a parent's first/last child.
/// 3. Within a run, the first and last non-pins collapse exactly onto a
///    bound they are not separated from by any annotation; interior
///    anchors are evenly spaced.
///
/// Anchors that still have no offset after both phases, but are linked to
/// live annotations, make the transform fail - there is no sane default
/// for a fully isolated chain.
#[derive(Debug, Clone)]
pub struct OffsetGenerator {
    /// Anchors at or above this confidence are pins.
    pub confidence_threshold: Confidence,
    /// Confidence assigned to anchors whose offsets this generator sets.
    pub default_anchor_confidence: Confidence,
    issues: Vec<String>,
}

impl Default for OffsetGenerator {
    fn default() -> Self {
        Self::new(Confidence::Automatic, Confidence::Default)
    }
}

impl OffsetGenerator {
    /// Create a generator with the given pin threshold and the confidence
    /// to assign to computed offsets.
    pub fn new(confidence_threshold: Confidence, default_anchor_confidence: Confidence) -> Self {
        Self {
            confidence_threshold,
            default_anchor_confidence,
            issues: Vec::new(),
        }
    }

    /// Advisory problems from the last transform (auto-skipped runs etc.).
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    fn pinned_offset(
        &self,
        graph: &Graph,
        slot: Slot,
        generated: &BTreeSet<AnchorId>,
    ) -> Option<f64> {
        match slot {
            Slot::Pin(offset) => Some(offset),
            Slot::Anchor(id) => {
                let anchor = graph.anchor(id)?;
                let offset = anchor.offset()?;
                (anchor.confidence() >= self.confidence_threshold || generated.contains(&id))
                    .then_some(offset)
            }
        }
    }

    fn is_pin(&self, graph: &Graph, id: AnchorId, generated: &BTreeSet<AnchorId>) -> bool {
        self.pinned_offset(graph, Slot::Anchor(id), generated).is_some()
    }

    /// Interpolate one run of slots. Assumes the slots are in chain order
    /// and the run is bookended by pinned slots.
    fn interpolate(
        &mut self,
        graph: &mut Graph,
        slots: &[Slot],
        generated: &BTreeSet<AnchorId>,
    ) -> Result<(), TransformationError> {
        let first_anchor = slots
            .iter()
            .find_map(|s| match s {
                Slot::Anchor(id) => Some(*id),
                Slot::Pin(_) => None,
            })
            .unwrap_or(AnchorId::new(0));
        let mut last: Option<(f64, Option<AnchorId>)> = None;
        let mut i = 0;
        while i < slots.len() {
            if let Some(offset) = self.pinned_offset(graph, slots[i], generated) {
                last = Some((
                    offset,
                    match slots[i] {
                        Slot::Anchor(id) => Some(id),
                        Slot::Pin(_) => None,
                    },
                ));
                i += 1;
                continue;
            }
            let Some((t0, lower_anchor)) = last else {
                return Err(TransformationError::UnboundedChain(first_anchor));
            };
            // gather the run of unpinned anchors and find the upper bound
            let mut j = i;
            let mut upper: Option<(f64, Option<AnchorId>)> = None;
            while j < slots.len() {
                if let Some(offset) = self.pinned_offset(graph, slots[j], generated) {
                    upper = Some((
                        offset,
                        match slots[j] {
                            Slot::Anchor(id) => Some(id),
                            Slot::Pin(_) => None,
                        },
                    ));
                    break;
                }
                j += 1;
            }
            let Some((t1, upper_anchor)) = upper else {
                return Err(TransformationError::UnboundedChain(first_anchor));
            };
            let mut run: Vec<AnchorId> = slots[i..j]
                .iter()
                .filter_map(|s| match s {
                    Slot::Anchor(id) => Some(*id),
                    Slot::Pin(_) => None,
                })
                .collect();

            // an unpinned anchor not separated from the bound by any
            // annotation collapses onto the bound exactly
            if let Some(&first) = run.first() {
                let spanned = lower_anchor
                    .and_then(|lower| graph.annotation_between(lower, first))
                    .is_some();
                if !spanned {
                    graph.set_offset(first, Some(t0));
                    graph.set_anchor_confidence(first, self.default_anchor_confidence);
                    run.remove(0);
                    debug!(anchor = %first, offset = t0, "collapsed to lower bound");
                }
            }
            if let Some(&last_unset) = run.last() {
                let spanned = upper_anchor
                    .and_then(|upper| graph.annotation_between(last_unset, upper))
                    .is_some();
                if !spanned {
                    graph.set_offset(last_unset, Some(t1));
                    graph.set_anchor_confidence(last_unset, self.default_anchor_confidence);
                    run.pop();
                    debug!(anchor = %last_unset, offset = t1, "collapsed to upper bound");
                }
            }

            if !run.is_empty() {
                let duration = t1 - t0;
                if duration < 0.0 {
                    let message =
                        format!("negative duration from {t0} to {t1}; leaving {} anchors", run.len());
                    warn!("{message}");
                    self.issues.push(message);
                } else {
                    let increment = duration / (run.len() + 1) as f64;
                    for (k, anchor) in run.iter().enumerate() {
                        let offset = t0 + (k + 1) as f64 * increment;
                        let unchanged = graph.offset_of(*anchor) == Some(offset)
                            && graph
                                .anchor(*anchor)
                                .map(|a| a.confidence() >= self.default_anchor_confidence)
                                .unwrap_or(false);
                        if !unchanged {
                            graph.set_offset(*anchor, Some(offset));
                            graph.set_anchor_confidence(*anchor, self.default_anchor_confidence);
                        }
                    }
                }
            }
            i = j;
        }
        Ok(())
    }

    /// Spread words through each turn's utterances, one utterance at a
    /// time, so that utterance boundaries partition the interpolation.
    fn partition_by_utterance(
        &mut self,
        graph: &mut Graph,
        prefer: &[LayerId],
        generated: &mut BTreeSet<AnchorId>,
    ) -> Result<(), TransformationError> {
        let schema = graph.schema();
        let (Some(turn_layer), Some(utterance_layer), Some(word_layer)) = (
            schema.turn_layer.clone(),
            schema.utterance_layer.clone(),
            schema.word_layer.clone(),
        ) else {
            return Ok(());
        };

        for turn in graph.in_layer(&turn_layer) {
            if !graph.is_live(turn) {
                continue;
            }
            // utterances in start-offset order; those without a start
            // offset cannot partition anything
            let mut utterances: Vec<AnnotationId> = graph
                .peers(Some(turn), &utterance_layer)
                .into_iter()
                .filter(|u| graph.start_offset(*u).is_some())
                .collect();
            utterances.sort_by(|a, b| {
                let sa = graph.start_offset(*a).unwrap_or(f64::INFINITY);
                let sb = graph.start_offset(*b).unwrap_or(f64::INFINITY);
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            });
            if utterances.is_empty() {
                continue;
            }

            // assign each word to the utterance it starts in
            let mut assignment: Vec<(AnnotationId, Vec<AnnotationId>)> =
                utterances.iter().map(|u| (*u, Vec::new())).collect();
            let mut current = 0usize;
            for word in graph.peers(Some(turn), &word_layer) {
                let Some(word_annotation) = graph.annotation(word) else {
                    continue;
                };
                if graph.anchor(word_annotation.start()).is_none() {
                    continue;
                }
                while current + 1 < assignment.len() {
                    let next_start = graph.start_offset(assignment[current + 1].0);
                    let Some(next_start) = next_start else { break };
                    let starts_later = match (graph.start_offset(word), graph.end_offset(word)) {
                        (Some(start), _) => start >= next_start,
                        (None, Some(end)) => end > next_start,
                        (None, None) => false,
                    };
                    if starts_later {
                        current += 1;
                    } else {
                        break;
                    }
                }
                assignment[current].1.push(word);
            }

            for (utterance, words) in assignment {
                let (Some(utterance_start), Some(utterance_end)) = (
                    graph.start_offset(utterance),
                    graph.end_offset(utterance),
                ) else {
                    continue;
                };
                if words.is_empty() {
                    continue;
                }
                let Some(utt) = graph.annotation(utterance) else {
                    continue;
                };
                let (utt_start_anchor, utt_end_anchor) = (utt.start(), utt.end());
                debug!(utterance = %utterance, words = words.len(), "utterance scope");

                let mut slots = Vec::new();
                let mut seen = BTreeSet::new();
                let push = |slots: &mut Vec<Slot>, seen: &mut BTreeSet<AnchorId>, id: AnchorId| {
                    if seen.insert(id) {
                        slots.push(Slot::Anchor(id));
                    }
                };
                slots.push(Slot::Pin(utterance_start));
                push(&mut slots, &mut seen, utt_start_anchor);

                let in_turn = |g: &Graph, id: AnnotationId| -> bool {
                    let Some(annotation) = g.annotation(id) else {
                        return false;
                    };
                    if !g.schema().is_ancestor(&annotation.layer, &turn_layer) {
                        return true;
                    }
                    g.ancestor_in(id, &turn_layer) == Some(turn)
                };

                let mut first_word = true;
                for word in words {
                    let Some(word_annotation) = graph.annotation(word) else {
                        continue;
                    };
                    let (word_start, word_end) = (word_annotation.start(), word_annotation.end());
                    if first_word {
                        // words with unset offsets may precede this one
                        let mut before = chain_backward_until(
                            graph,
                            word_start,
                            prefer,
                            in_turn,
                            |g, anchor| {
                                g.offset_of(anchor)
                                    .map(|o| o <= utterance_start)
                                    .unwrap_or(false)
                            },
                        );
                        if let Some(first) = before.first() {
                            if graph
                                .offset_of(*first)
                                .map(|o| o < utterance_start)
                                .unwrap_or(false)
                            {
                                before.remove(0);
                            }
                        }
                        for anchor in before {
                            push(&mut slots, &mut seen, anchor);
                        }
                        first_word = false;
                    }
                    push(&mut slots, &mut seen, word_start);
                    // forward to the end of the word, catching intervening
                    // noise chains and words with unset offsets
                    let mut after =
                        chain_forward_until(graph, word_start, prefer, in_turn, |g, anchor| {
                            anchor == word_end
                                || g.offset_of(anchor)
                                    .map(|o| o >= utterance_end)
                                    .unwrap_or(false)
                        });
                    if let Some(last) = after.last() {
                        if graph
                            .offset_of(*last)
                            .map(|o| o > utterance_end)
                            .unwrap_or(false)
                        {
                            after.pop();
                        }
                    }
                    for anchor in after {
                        push(&mut slots, &mut seen, anchor);
                    }
                }
                push(&mut slots, &mut seen, utt_end_anchor);
                slots.push(Slot::Pin(utterance_end));

                self.interpolate(graph, &slots, generated)?;
                for slot in &slots {
                    if let Slot::Anchor(id) = slot {
                        generated.insert(*id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve every remaining non-pin anchor through its chain.
    fn resolve_remaining(
        &mut self,
        graph: &mut Graph,
        prefer: &[LayerId],
        generated: &mut BTreeSet<AnchorId>,
    ) -> Result<(), TransformationError> {
        for id in graph.anchor_ids() {
            let Some(anchor) = graph.anchor(id) else { continue };
            if anchor.destroyed() {
                continue;
            }
            if self.is_pin(graph, id, generated) {
                continue;
            }
            let bounding =
                |g: &Graph, a: AnchorId| self.pinned_offset(g, Slot::Anchor(a), generated).is_some();
            let before = chain_backward_until(graph, id, prefer, |_, _| true, bounding);
            let after = chain_forward_until(graph, id, prefer, |_, _| true, bounding);
            let mut chain: Vec<AnchorId> = Vec::with_capacity(before.len() + after.len() + 1);
            chain.extend(before);
            chain.push(id);
            chain.extend(after);

            // children may have no offsets while the parent has them, so
            // fall back to the bounding parent's anchors
            if let Some(&first) = chain.first() {
                if !self.is_pin(graph, first, generated) {
                    if let Some(parent_start) = bounding_parent_start(graph, first) {
                        chain.insert(0, parent_start);
                    }
                }
            }
            if let Some(&last) = chain.last() {
                if !self.is_pin(graph, last, generated) {
                    if let Some(parent_end) = bounding_parent_end(graph, last) {
                        chain.push(parent_end);
                    }
                }
            }

            if chain.len() > 1 {
                let start_offset = chain.iter().find_map(|a| graph.offset_of(*a));
                let end_offset = chain.iter().rev().find_map(|a| graph.offset_of(*a));
                if let (Some(start), Some(end)) = (start_offset, end_offset) {
                    let mut slots = Vec::with_capacity(chain.len() + 2);
                    slots.push(Slot::Pin(start));
                    slots.extend(chain.iter().map(|a| Slot::Anchor(*a)));
                    slots.push(Slot::Pin(end));
                    self.interpolate(graph, &slots, generated)?;
                    for anchor in chain {
                        generated.insert(anchor);
                    }
                }
            }
        }
        Ok(())
    }
}

/// The start anchor of a parent whose first child starts at `anchor`.
fn bounding_parent_start(graph: &Graph, anchor: AnchorId) -> Option<AnchorId> {
    for id in graph.start_of(anchor) {
        let annotation = graph.annotation(id)?;
        let Some(parent) = annotation.parent() else {
            continue;
        };
        let peers = graph.peers(Some(parent), &annotation.layer);
        if peers.first() == Some(&id) {
            if let Some(parent_annotation) = graph.annotation(parent) {
                let start = parent_annotation.start();
                if graph.anchor(start).is_some() {
                    return Some(start);
                }
            }
        }
    }
    None
}

/// The end anchor of a parent whose last child ends at `anchor`.
fn bounding_parent_end(graph: &Graph, anchor: AnchorId) -> Option<AnchorId> {
    for id in graph.end_of(anchor) {
        let annotation = graph.annotation(id)?;
        let Some(parent) = annotation.parent() else {
            continue;
        };
        let peers = graph.peers(Some(parent), &annotation.layer);
        if peers.last() == Some(&id) {
            if let Some(parent_annotation) = graph.annotation(parent) {
                let end = parent_annotation.end();
                if graph.anchor(end).is_some() {
                    return Some(end);
                }
            }
        }
    }
    None
}

impl GraphTransformer for OffsetGenerator {
    fn transform(&mut self, graph: &mut Graph) -> Result<(), TransformationError> {
        self.issues.clear();
        let mut generated: BTreeSet<AnchorId> = BTreeSet::new();

        // chains through aligned word children first, so phones spread
        // evenly, then through words, so words spread evenly
        let mut prefer: Vec<LayerId> = Vec::new();
        if let Some(word_layer) = graph.schema().word_layer.clone() {
            for child in graph.schema().child_layers(&word_layer) {
                if child.aligned() {
                    prefer.push(child.id.clone());
                }
            }
            prefer.push(word_layer);
        }

        self.partition_by_utterance(graph, &prefer, &mut generated)?;
        self.resolve_remaining(graph, &prefer, &mut generated)?;

        // every anchor that matters must have an offset by now
        let unresolved: Vec<AnchorId> = graph
            .anchor_ids()
            .into_iter()
            .filter(|id| {
                graph
                    .anchor(*id)
                    .map(|a| !a.destroyed() && a.offset().is_none())
                    .unwrap_or(false)
                    && graph.is_linked(*id)
            })
            .collect();
        if let Some(first) = unresolved.first() {
            return Err(TransformationError::UnresolvedOffsets {
                count: unresolved.len(),
                first: *first,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alignment, Layer, Schema};

    fn word_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_layer(Layer::top_level("who", Alignment::Tag, true, true, true))
            .unwrap();
        schema
            .add_layer(Layer::child(
                "turn",
                Alignment::Interval,
                true,
                false,
                false,
                "who",
                true,
            ))
            .unwrap();
        schema
            .add_layer(Layer::child(
                "word",
                Alignment::Interval,
                true,
                false,
                false,
                "turn",
                true,
            ))
            .unwrap();
        schema.set_participant_layer("who");
        schema.set_turn_layer("turn");
        schema.set_word_layer("word");
        schema
    }

    /// Ten null-offset word boundaries in a 0-9s turn land on 0,1,…,9.
    #[test]
    fn test_even_spread_through_turn() {
        let mut g = Graph::new(word_schema());
        let turn_start = g.add_anchor(Some(0.0), Confidence::Manual);
        let turn_end = g.add_anchor(Some(9.0), Confidence::Manual);
        let word_anchors: Vec<AnchorId> = (0..10).map(|_| g.add_unset_anchor()).collect();
        let who = g.add_annotation("who", "sp1", turn_start, turn_end, None);
        let turn = g.add_annotation("turn", "sp1", turn_start, turn_end, Some(who));
        let labels = [
            "the", "quick", "brown", "fox", "jumps", "over", "a", "lazy", "dog",
        ];
        for (i, label) in labels.iter().enumerate() {
            g.add_annotation("word", *label, word_anchors[i], word_anchors[i + 1], Some(turn));
        }
        g.track_changes();

        let mut generator = OffsetGenerator::default();
        generator.transform(&mut g).unwrap();

        for (i, anchor) in word_anchors.iter().enumerate() {
            assert_eq!(g.offset_of(*anchor), Some(i as f64), "anchor {i}");
        }
        assert!(generator.issues().is_empty());
        // every word anchor got exactly one offset change and one
        // confidence change
        assert_eq!(g.changes().len(), word_anchors.len() * 2);
    }

    /// Low-confidence offsets are recomputed; pins at or above the
    /// threshold are untouched.
    #[test]
    fn test_threshold_respected() {
        let mut g = Graph::new(word_schema());
        let turn_start = g.add_anchor(Some(0.0), Confidence::Manual);
        let turn_end = g.add_anchor(Some(6.0), Confidence::Manual);
        let drifted = g.add_anchor(Some(1.4), Confidence::Default);
        let pinned = g.add_anchor(Some(4.0), Confidence::Automatic);
        let tail = g.add_anchor(None, Confidence::None);
        let who = g.add_annotation("who", "sp1", turn_start, turn_end, None);
        let turn = g.add_annotation("turn", "sp1", turn_start, turn_end, Some(who));
        g.add_annotation("word", "one", turn_start, drifted, Some(turn));
        g.add_annotation("word", "two", drifted, pinned, Some(turn));
        g.add_annotation("word", "three", pinned, tail, Some(turn));
        let _ = g.add_annotation("word", "four", tail, turn_end, Some(turn));

        let mut generator = OffsetGenerator::default();
        generator.transform(&mut g).unwrap();

        // drifted (below Automatic) was re-spaced between 0.0 and 4.0
        assert_eq!(g.offset_of(drifted), Some(2.0));
        // pinned (at the threshold) kept its value
        assert_eq!(g.offset_of(pinned), Some(4.0));
        assert_eq!(
            g.anchor(pinned).unwrap().confidence(),
            Confidence::Automatic
        );
        assert_eq!(g.offset_of(tail), Some(5.0));
    }

    /// An annotation with two never-aligned endpoints and no structural
    /// context cannot be generated.
    #[test]
    fn test_isolated_chain_fails() {
        let mut g = Graph::new(word_schema());
        let a = g.add_unset_anchor();
        let b = g.add_unset_anchor();
        g.add_annotation("word", "stray", a, b, None);

        let mut generator = OffsetGenerator::default();
        let err = generator.transform(&mut g).unwrap_err();
        assert!(matches!(
            err,
            TransformationError::UnresolvedOffsets { .. } | TransformationError::UnboundedChain(_)
        ));
    }
}
