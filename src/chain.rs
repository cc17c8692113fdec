//! Anchor chain traversal.
//!
//! Anchors are shared between annotations, so following "the annotation
//! that starts where the previous one ended" walks a chain of anchors
//! through the graph - words chained through a turn, phones through a
//! word, with interspersed noise or comment spans. The offset generator
//! builds its interpolation runs from these chains.

use std::collections::BTreeSet;

use crate::graph::Graph;
use crate::types::{AnchorId, AnnotationId, LayerId};

/// Walk forward from `start`, returning the anchors visited (excluding
/// `start`, including the anchor that satisfied `boundary`).
///
/// At each anchor the next hop is chosen from annotations starting there:
/// layers in `prefer_layers` are tried first, in order, then any layer.
/// Destroyed annotations never provide a hop, nor do instantaneous
/// annotations (which would not advance). `follow` can veto individual
/// annotations (e.g. to stay within one speaker's turn).
pub fn chain_forward_until(
    graph: &Graph,
    start: AnchorId,
    prefer_layers: &[LayerId],
    follow: impl Fn(&Graph, AnnotationId) -> bool,
    boundary: impl Fn(&Graph, AnchorId) -> bool,
) -> Vec<AnchorId> {
    let mut chain = Vec::new();
    let mut visited = BTreeSet::from([start]);
    let mut current = start;
    loop {
        let Some(next) = hop(graph, current, prefer_layers, &follow, Direction::Forward) else {
            break;
        };
        if !visited.insert(next) {
            break; // malformed cyclic chain; terminate rather than spin
        }
        chain.push(next);
        current = next;
        if boundary(graph, current) {
            break;
        }
    }
    chain
}

/// Walk backward from `start`; the result is in chain order (earliest
/// first), excluding `start`, including the boundary anchor.
pub fn chain_backward_until(
    graph: &Graph,
    start: AnchorId,
    prefer_layers: &[LayerId],
    follow: impl Fn(&Graph, AnnotationId) -> bool,
    boundary: impl Fn(&Graph, AnchorId) -> bool,
) -> Vec<AnchorId> {
    let mut chain = Vec::new();
    let mut visited = BTreeSet::from([start]);
    let mut current = start;
    loop {
        let Some(next) = hop(graph, current, prefer_layers, &follow, Direction::Backward) else {
            break;
        };
        if !visited.insert(next) {
            break; // malformed cyclic chain; terminate rather than spin
        }
        chain.insert(0, next);
        current = next;
        if boundary(graph, current) {
            break;
        }
    }
    chain
}

enum Direction {
    Forward,
    Backward,
}

fn hop(
    graph: &Graph,
    from: AnchorId,
    prefer_layers: &[LayerId],
    follow: &impl Fn(&Graph, AnnotationId) -> bool,
    direction: Direction,
) -> Option<AnchorId> {
    let candidates = match direction {
        Direction::Forward => graph.start_of(from),
        Direction::Backward => graph.end_of(from),
    };
    let step = |id: AnnotationId| -> Option<AnchorId> {
        if !follow(graph, id) {
            return None;
        }
        let annotation = graph.annotation(id)?;
        let to = match direction {
            Direction::Forward => annotation.end(),
            Direction::Backward => annotation.start(),
        };
        // instants would loop forever
        (to != from).then_some(to)
    };
    for layer in prefer_layers {
        for id in &candidates {
            if graph.annotation(*id).map(|a| &a.layer) == Some(layer) {
                if let Some(next) = step(*id) {
                    return Some(next);
                }
            }
        }
    }
    candidates.into_iter().find_map(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alignment, Confidence, Layer, Schema};

    fn word_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_layer(Layer::top_level(
                "word",
                Alignment::Interval,
                true,
                false,
                false,
            ))
            .unwrap();
        schema
            .add_layer(Layer::top_level(
                "noise",
                Alignment::Interval,
                true,
                true,
                false,
            ))
            .unwrap();
        schema
    }

    #[test]
    fn test_forward_chain_through_words() {
        let mut g = Graph::new(word_schema());
        let a: Vec<_> = (0..4)
            .map(|i| g.add_anchor(Some(i as f64), Confidence::Manual))
            .collect();
        g.add_annotation("word", "one", a[0], a[1], None);
        g.add_annotation("word", "two", a[1], a[2], None);
        g.add_annotation("word", "three", a[2], a[3], None);

        let chain = chain_forward_until(&g, a[0], &[], |_, _| true, |_, anchor| anchor == a[3]);
        assert_eq!(chain, vec![a[1], a[2], a[3]]);
    }

    #[test]
    fn test_backward_chain_is_in_chain_order() {
        let mut g = Graph::new(word_schema());
        let a: Vec<_> = (0..3)
            .map(|i| g.add_anchor(Some(i as f64), Confidence::Manual))
            .collect();
        g.add_annotation("word", "one", a[0], a[1], None);
        g.add_annotation("word", "two", a[1], a[2], None);

        let chain = chain_backward_until(&g, a[2], &[], |_, _| true, |_, _| false);
        assert_eq!(chain, vec![a[0], a[1]]);
    }

    #[test]
    fn test_prefers_listed_layer() {
        let mut g = Graph::new(word_schema());
        let a0 = g.add_anchor(Some(0.0), Confidence::Manual);
        let a1 = g.add_anchor(Some(1.0), Confidence::Manual);
        let a2 = g.add_anchor(Some(2.0), Confidence::Manual);
        // a noise span and a word both start at a0 but end differently
        g.add_annotation("noise", "cough", a0, a2, None);
        g.add_annotation("word", "one", a0, a1, None);

        let word = LayerId::new("word");
        let chain = chain_forward_until(&g, a0, &[word], |_, _| true, |_, anchor| anchor == a1);
        assert_eq!(chain.first(), Some(&a1));
    }

    #[test]
    fn test_destroyed_annotations_skipped() {
        let mut g = Graph::new(word_schema());
        let a0 = g.add_anchor(Some(0.0), Confidence::Manual);
        let a1 = g.add_anchor(Some(1.0), Confidence::Manual);
        let w = g.add_annotation("word", "one", a0, a1, None);
        g.destroy_annotation(w);
        let chain = chain_forward_until(&g, a0, &[], |_, _| true, |_, _| false);
        assert!(chain.is_empty());
    }
}
