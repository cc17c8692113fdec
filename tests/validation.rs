//! Scenario tests for the validator.
//!
//! Each test builds a deliberately inconsistent graph and verifies the
//! validator repairs it - and that the repairs are deterministic and
//! idempotent.

use alignment_kernel::{
    Alignment, ChangeTracker, Confidence, Field, Graph, GraphTransformer, Layer, LayerId, Schema,
    Target, Validator,
};

// ─────────────────────────────────────────────────────────────────────────
// Schemas
// ─────────────────────────────────────────────────────────────────────────

/// who/turn/word/phone/pos/phrase, as a transcription tool would define.
fn rich_schema() -> Schema {
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
    schema
        .add_layer(Layer::child(
            "phone",
            Alignment::Interval,
            true,
            false,
            true,
            "word",
            true,
        ))
        .unwrap();
    schema
        .add_layer(Layer::child(
            "pos", Alignment::Tag, false, false, true, "word", true,
        ))
        .unwrap();
    schema
        .add_layer(Layer::child(
            "phrase",
            Alignment::Interval,
            true,
            true,
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

fn utterance_schema() -> Schema {
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
            "utterance",
            Alignment::Interval,
            true,
            false,
            true,
            "turn",
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
    schema
        .add_layer(Layer::child(
            "pos", Alignment::Tag, false, false, true, "word", true,
        ))
        .unwrap();
    schema.set_participant_layer("who");
    schema.set_turn_layer("turn");
    schema.set_utterance_layer("utterance");
    schema.set_word_layer("word");
    schema
}

fn structural_validator() -> Validator {
    let mut validator = Validator::full();
    validator.default_offset_threshold = None;
    validator
}

/// `RUST_LOG=debug cargo test` prints the validator's repair trace.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

// ─────────────────────────────────────────────────────────────────────────
// Orphan reconciliation
// ─────────────────────────────────────────────────────────────────────────

/// Words assigned to the wrong turn are moved to an overlapping turn,
/// preferring one with the same speaker; a parent on the wrong layer
/// entirely is also corrected.
#[test]
fn orphans_find_new_parents_preferring_same_speaker() {
    let mut g = Graph::new(rich_schema());
    let a0 = g.add_anchor(Some(0.0), Confidence::Manual);
    let a1 = g.add_anchor(Some(1.0), Confidence::Manual);
    let a1_5 = g.add_anchor(Some(1.5), Confidence::Manual);
    let a2 = g.add_anchor(Some(2.0), Confidence::Manual);
    let a2_25 = g.add_anchor(Some(2.25), Confidence::Manual);
    let a2_5 = g.add_anchor(Some(2.5), Confidence::Manual);
    let a2_75 = g.add_anchor(Some(2.75), Confidence::Manual);
    let a3a = g.add_anchor(Some(3.0), Confidence::Manual);
    let a3b = g.add_anchor(Some(3.0), Confidence::Manual); // turn1 end & turn2 start
    let a3c = g.add_anchor(Some(3.0), Confidence::Manual);
    let a4a = g.add_anchor(Some(4.0), Confidence::Manual);
    let a4b = g.add_anchor(Some(4.0), Confidence::Manual); // turn3 start
    let a4c = g.add_anchor(Some(4.0), Confidence::Manual);
    let a4_125 = g.add_anchor(Some(4.125), Confidence::Manual);
    let a4_25 = g.add_anchor(Some(4.25), Confidence::Manual); // turn2 end
    let a4_5 = g.add_anchor(Some(4.5), Confidence::Manual);
    let a4_75 = g.add_anchor(Some(4.75), Confidence::Manual);
    let a5 = g.add_anchor(Some(5.0), Confidence::Manual);
    let a6 = g.add_anchor(Some(6.0), Confidence::Manual); // turn3 end

    let p1 = g.add_annotation("who", "john smith", a0, a6, None);
    let p2 = g.add_annotation("who", "jane doe", a0, a6, None);
    let turn1 = g.add_annotation("turn", "john smith", a0, a3b, Some(p1));
    let turn2 = g.add_annotation("turn", "jane doe", a3b, a4_25, Some(p2));
    let turn3 = g.add_annotation("turn", "john smith", a4b, a6, Some(p1));

    g.add_annotation("phrase", "AP", a2, a3a, Some(turn1));
    g.add_annotation("phrase", "NP", a3c, a4_125, Some(turn2));

    let word1 = g.add_annotation("word", "the", a1, a2, Some(turn1));
    let word2 = g.add_annotation("word", "quick", a2, a3a, Some(turn1));
    // wrong turn and speaker
    let word3 = g.add_annotation("word", "brown", a3b, a4a, Some(turn1));
    // wrong turn, two overlapping candidates
    let word4 = g.add_annotation("word", "fox", a4c, a4_125, Some(turn1));
    // wrong turn
    let word5 = g.add_annotation("word", "jumps", a4_5, a4_75, Some(turn1));
    // parent on the wrong layer entirely
    let word6 = g.add_annotation("word", "over", a4_75, a5, Some(p1));

    let pos1 = g.add_annotation("pos", "DT", a1, a2, Some(word1));
    g.set_annotation_confidence(pos1, Confidence::Automatic);
    let pos2 = g.add_annotation("pos", "A", a2, a3a, Some(word2));
    g.set_annotation_confidence(pos2, Confidence::Automatic);
    let pos3 = g.add_annotation("pos", "N", a4c, a4_125, Some(word4));
    g.set_annotation_confidence(pos3, Confidence::Automatic);

    g.add_annotation("phone", "D", a1, a1_5, Some(word1));
    g.add_annotation("phone", "@", a1_5, a2, Some(word1));
    g.add_annotation("phone", "k", a2, a2_25, Some(word2));
    g.add_annotation("phone", "w", a2_25, a2_5, Some(word2));
    g.add_annotation("phone", "I", a2_5, a2_75, Some(word2));
    g.add_annotation("phone", "k", a2_75, a3a, Some(word2));

    g.track_changes();
    let mut validator = structural_validator();
    validator.transform(&mut g).unwrap();

    // moved to the overlapping turn, changing speaker as a last resort
    assert_eq!(g.annotation(word3).unwrap().parent(), Some(turn2));
    assert_eq!(g.annotation(word3).unwrap().ordinal(), 1);
    // same-speaker candidate wins over the other overlapping turn
    assert_eq!(g.annotation(word4).unwrap().parent(), Some(turn3));
    assert_eq!(g.annotation(word4).unwrap().ordinal(), 1);
    assert_eq!(g.annotation(word5).unwrap().parent(), Some(turn3));
    assert_eq!(g.annotation(word5).unwrap().ordinal(), 2);
    // wrong-layer parent corrected
    assert_eq!(g.annotation(word6).unwrap().parent(), Some(turn3));
    assert_eq!(g.annotation(word6).unwrap().ordinal(), 3);
    // correctly parented annotations untouched
    assert_eq!(g.annotation(word1).unwrap().parent(), Some(turn1));
    assert_eq!(g.annotation(word2).unwrap().parent(), Some(turn1));

    // each move is one parent change plus one ordinal change, no more
    let tracker = g.tracker().unwrap();
    let parent_change = tracker
        .change(Target::Annotation(word3), Field::Parent)
        .expect("word3 parent change");
    assert_eq!(
        parent_change.new_value,
        Some(serde_json::json!(Some(turn2.to_string())))
    );
    assert_eq!(tracker.len(), 8);
}

/// Orphans that were generated automatically are deleted, not
/// reparented.
#[test]
fn generated_orphans_are_deleted() {
    let mut g = Graph::new(rich_schema());
    let a0 = g.add_anchor(Some(0.0), Confidence::Manual);
    let a2 = g.add_anchor(Some(2.5), Confidence::Manual);
    let a5 = g.add_anchor(Some(5.0), Confidence::Manual);
    let p1 = g.add_annotation("who", "sp1", a0, a5, None);
    let turn = g.add_annotation("turn", "sp1", a0, a5, Some(p1));
    let w1 = g.add_annotation("word", "one", a0, a2, Some(turn));
    let w2 = g.add_annotation("word", "two", a2, a5, Some(turn));
    g.set_annotation_confidence(w1, Confidence::Automatic);
    g.set_annotation_confidence(w2, Confidence::Automatic);
    g.destroy_annotation(turn);

    let mut validator = structural_validator();
    validator.transform(&mut g).unwrap();

    assert!(!g.is_live(w1));
    assert!(!g.is_live(w2));
    g.commit();
    assert!(g.annotation(w1).is_none());
    assert!(g.annotation(turn).is_none());
}

// ─────────────────────────────────────────────────────────────────────────
// Reversed anchors
// ─────────────────────────────────────────────────────────────────────────

/// The lower-confidence side of an ordering conflict is reset and
/// re-interpolated; corroborated anchors survive.
#[test]
fn reversed_anchors_reset_lower_confidence_side() {
    let mut g = Graph::new(rich_schema());
    let t0 = g.add_anchor(Some(0.0), Confidence::Manual);
    let t9 = g.add_anchor(Some(9.0), Confidence::Manual);
    let a0 = g.add_anchor(Some(0.5), Confidence::Automatic);
    let a1 = g.add_anchor(Some(4.0), Confidence::Automatic);
    let a2 = g.add_anchor(Some(2.0), Confidence::None); // contradicts a1
    let a3 = g.add_anchor(Some(6.0), Confidence::Automatic);
    let p1 = g.add_annotation("who", "sp1", t0, t9, None);
    let turn = g.add_annotation("turn", "sp1", t0, t9, Some(p1));
    g.add_annotation("word", "one", a0, a1, Some(turn));
    g.add_annotation("word", "two", a1, a2, Some(turn));
    g.add_annotation("word", "three", a2, a3, Some(turn));

    let mut validator = Validator::full();
    validator.transform(&mut g).unwrap();

    // the corroborated anchor kept its offset and confidence
    assert_eq!(g.offset_of(a1), Some(4.0));
    assert_eq!(g.anchor(a1).unwrap().confidence(), Confidence::Automatic);
    // the weak anchor was reset and re-interpolated between its pins
    assert_eq!(g.offset_of(a2), Some(5.0));
    assert_eq!(g.anchor(a2).unwrap().confidence(), Confidence::Default);
    assert_eq!(g.offset_of(a0), Some(0.5));
    assert_eq!(g.offset_of(a3), Some(6.0));
    assert!(validator
        .issues()
        .iter()
        .any(|issue| issue.contains("out of order")));
}

/// When confidences are equal, exactly one deterministic side is reset;
/// the final state is stable regardless of how often it is re-run.
#[test]
fn reversed_anchors_equal_confidence_is_deterministic() {
    let mut g = Graph::new(rich_schema());
    let t0 = g.add_anchor(Some(0.0), Confidence::Manual);
    let t9 = g.add_anchor(Some(9.0), Confidence::Manual);
    let a0 = g.add_anchor(Some(1.0), Confidence::Default);
    let a1 = g.add_anchor(Some(4.0), Confidence::Default);
    let a2 = g.add_anchor(Some(2.0), Confidence::Default);
    let a3 = g.add_anchor(Some(6.0), Confidence::Default);
    let p1 = g.add_annotation("who", "sp1", t0, t9, None);
    let turn = g.add_annotation("turn", "sp1", t0, t9, Some(p1));
    g.add_annotation("word", "one", a0, a1, Some(turn));
    g.add_annotation("word", "two", a1, a2, Some(turn));
    g.add_annotation("word", "three", a2, a3, Some(turn));

    let mut validator = Validator::full();
    validator.transform(&mut g).unwrap();

    // exactly one conflict was resolved, and regeneration leaves the
    // whole chain evenly placed between the turn bounds
    assert_eq!(
        validator
            .issues()
            .iter()
            .filter(|issue| issue.contains("out of order"))
            .count(),
        1
    );
    assert_eq!(g.offset_of(a0), Some(0.0));
    assert_eq!(g.offset_of(a1), Some(3.0));
    assert_eq!(g.offset_of(a2), Some(6.0));
    assert_eq!(g.offset_of(a3), Some(9.0));
}

// ─────────────────────────────────────────────────────────────────────────
// Duplicate peers
// ─────────────────────────────────────────────────────────────────────────

/// On a `peers = false` layer, all but the earliest live child are
/// destroyed; already-destroyed peers stay destroyed.
#[test]
fn duplicate_peers_are_pruned() {
    let mut g = Graph::new(rich_schema());
    let a0 = g.add_anchor(Some(0.0), Confidence::Manual);
    let a1 = g.add_anchor(Some(1.0), Confidence::Manual);
    let a5 = g.add_anchor(Some(5.0), Confidence::Manual);
    let p1 = g.add_annotation("who", "sp1", a0, a5, None);
    let turn = g.add_annotation("turn", "sp1", a0, a5, Some(p1));
    let word = g.add_annotation("word", "the", a0, a1, Some(turn));
    let pos1 = g.add_annotation("pos", "DT", a0, a1, Some(word));
    let pos2 = g.add_annotation("pos", "NN", a0, a1, Some(word));
    g.destroy_annotation(pos2);
    let pos3 = g.add_annotation("pos", "JJ", a0, a1, Some(word));

    let mut validator = structural_validator();
    validator.transform(&mut g).unwrap();

    // the earliest live child survives unchanged
    assert!(g.is_live(pos1));
    assert_eq!(g.annotation(pos1).unwrap().label(), "DT");
    // the extra live child is destroyed, the destroyed one stays destroyed
    assert!(!g.is_live(pos3));
    assert!(!g.is_live(pos2));
}

// ─────────────────────────────────────────────────────────────────────────
// Hierarchy enforcement
// ─────────────────────────────────────────────────────────────────────────

/// A gap between children of a saturated layer is closed by linking the
/// neighbors to a shared anchor.
#[test]
fn saturated_gap_closed_with_shared_anchor() {
    let mut g = Graph::new(utterance_schema());
    let t0 = g.add_anchor(Some(0.0), Confidence::Manual);
    let u4 = g.add_anchor(Some(4.0), Confidence::Manual);
    let u5 = g.add_anchor(Some(5.0), Confidence::Manual);
    let t9 = g.add_anchor(Some(9.0), Confidence::Manual);
    let p1 = g.add_annotation("who", "sp1", t0, t9, None);
    let turn = g.add_annotation("turn", "sp1", t0, t9, Some(p1));
    let utt1 = g.add_annotation("utterance", "line 1", t0, u4, Some(turn));
    let utt2 = g.add_annotation("utterance", "line 2", u5, t9, Some(turn));

    let mut validator = structural_validator();
    validator.transform(&mut g).unwrap();

    // the neighbors now share one boundary anchor
    assert_eq!(
        g.annotation(utt1).unwrap().end(),
        g.annotation(utt2).unwrap().start()
    );
    assert_eq!(g.end_offset(utt1), Some(5.0));
    // the abandoned anchor is no longer referenced
    assert!(!g.is_linked(u4));
}

/// A child sticking out of its parent widens the parent (and the
/// parent's own parent, transitively).
#[test]
fn parent_widened_to_include_child() {
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
            "span",
            Alignment::Interval,
            true,
            true,
            false,
            "turn",
            true,
        ))
        .unwrap();
    schema.set_participant_layer("who");
    schema.set_turn_layer("turn");

    let mut g = Graph::new(schema);
    let t2 = g.add_anchor(Some(2.0), Confidence::Manual);
    let t9 = g.add_anchor(Some(9.0), Confidence::Manual);
    let s1 = g.add_anchor(Some(1.0), Confidence::Manual);
    let s3 = g.add_anchor(Some(3.0), Confidence::Manual);
    let p1 = g.add_annotation("who", "sp1", t2, t9, None);
    let turn = g.add_annotation("turn", "sp1", t2, t9, Some(p1));
    let span = g.add_annotation("span", "uh", s1, s3, Some(turn));

    let mut validator = structural_validator();
    validator.transform(&mut g).unwrap();

    // containment holds afterwards
    assert_eq!(g.start_offset(turn), Some(1.0));
    assert_eq!(g.start_offset(p1), Some(1.0));
    assert_eq!(g.start_offset(span), Some(1.0));
    assert!(g.start_offset(span) >= g.start_offset(turn));
    assert!(g.end_offset(span) <= g.end_offset(turn));
}

/// Two abutting tokens left on separate same-instant anchors by an
/// aligner skip are spliced onto the higher-confidence anchor.
#[test]
fn aligner_skip_boundary_is_bridged() {
    let mut g = Graph::new(rich_schema());
    let t0 = g.add_anchor(Some(0.0), Confidence::Manual);
    let t5 = g.add_anchor(Some(5.0), Confidence::Manual);
    let p0 = g.add_anchor(Some(0.0), Confidence::Automatic);
    let p2 = g.add_anchor(Some(2.0), Confidence::Automatic);
    let q2 = g.add_anchor(Some(2.0), Confidence::Default); // duplicate instant
    let p5 = g.add_anchor(Some(5.0), Confidence::Automatic);
    let p1 = g.add_annotation("who", "sp1", t0, t5, None);
    let turn = g.add_annotation("turn", "sp1", t0, t5, Some(p1));
    let w1 = g.add_annotation("word", "one", p0, p2, Some(turn));
    let w2 = g.add_annotation("word", "two", q2, p5, Some(turn));

    let mut validator = structural_validator();
    validator.transform(&mut g).unwrap();

    // the higher-confidence anchor is now the shared boundary
    assert_eq!(g.annotation(w1).unwrap().end(), p2);
    assert_eq!(g.annotation(w2).unwrap().start(), p2);
    assert!(g.anchor(q2).unwrap().destroyed());
    g.commit();
    assert!(g.anchor(q2).is_none());
}

/// Deleting a sibling shifts the ordinals of all following siblings.
#[test]
fn ordinals_shift_after_deletion() {
    let mut g = Graph::new(rich_schema());
    let anchors: Vec<_> = (0..4)
        .map(|i| g.add_anchor(Some(i as f64), Confidence::Manual))
        .collect();
    let t0 = anchors[0];
    let t3 = anchors[3];
    let p1 = g.add_annotation("who", "sp1", t0, t3, None);
    let turn = g.add_annotation("turn", "sp1", t0, t3, Some(p1));
    let w1 = g.add_annotation("word", "one", anchors[0], anchors[1], Some(turn));
    let w2 = g.add_annotation("word", "two", anchors[1], anchors[2], Some(turn));
    let w3 = g.add_annotation("word", "three", anchors[2], anchors[3], Some(turn));
    g.destroy_annotation(w2);

    let mut validator = structural_validator();
    validator.transform(&mut g).unwrap();

    assert_eq!(g.annotation(w1).unwrap().ordinal(), 1);
    assert_eq!(g.annotation(w3).unwrap().ordinal(), 2);
    g.commit();
    assert!(g.annotation(w2).is_none());
    assert_eq!(g.annotation(w3).unwrap().ordinal(), 2);
}

// ─────────────────────────────────────────────────────────────────────────
// Idempotence
// ─────────────────────────────────────────────────────────────────────────

/// Re-running the validator on its own output records zero additional
/// changes, even for a graph needing several different repairs at once.
#[test]
fn validation_is_idempotent() {
    init_tracing();
    let mut g = Graph::new(utterance_schema());
    let t0 = g.add_anchor(Some(0.0), Confidence::Manual);
    let u4 = g.add_anchor(Some(4.0), Confidence::Manual);
    let u5 = g.add_anchor(Some(5.0), Confidence::Manual);
    let t10 = g.add_anchor(Some(10.0), Confidence::Manual);
    let wa = g.add_anchor(Some(1.0), Confidence::Automatic);
    let wb = g.add_anchor(Some(2.0), Confidence::Automatic);
    let wc = g.add_anchor(Some(8.0), Confidence::None); // out of order
    let wd = g.add_anchor(Some(6.0), Confidence::Automatic);
    let p1 = g.add_annotation("who", "sp1", t0, t10, None);
    let turn = g.add_annotation("turn", "sp1", t0, t10, Some(p1));
    g.add_annotation("utterance", "line 1", t0, u4, Some(turn)); // gap before utt2
    g.add_annotation("utterance", "line 2", u5, t10, Some(turn));
    let w1 = g.add_annotation("word", "one", wa, wb, Some(turn));
    g.add_annotation("word", "two", wb, wc, Some(turn));
    g.add_annotation("word", "three", wc, wd, Some(turn));
    let pos1 = g.add_annotation("pos", "DT", wa, wb, Some(w1));
    let pos2 = g.add_annotation("pos", "NN", wa, wb, Some(w1));

    let mut validator = Validator::full();
    validator.transform(&mut g).unwrap();

    // the repairs happened
    assert!(g.is_live(pos1));
    assert!(!g.is_live(pos2));
    assert_eq!(g.offset_of(wc), Some(5.0));

    // a second run makes no further changes
    g.replace_tracker(Some(ChangeTracker::new()));
    let mut second = Validator::full();
    second.transform(&mut g).unwrap();
    assert!(
        g.changes().is_empty(),
        "second validation changed the graph: {:?}",
        g.changes()
    );
}

// ─────────────────────────────────────────────────────────────────────────
// Fragments
// ─────────────────────────────────────────────────────────────────────────

/// Validating a fragment whose ancestor anchors are absent treats those
/// ancestors as boundless instead of failing.
#[test]
fn fragment_validation_tolerates_missing_ancestors() {
    let mut g = Graph::new(utterance_schema());
    let turn_start = g.add_anchor(Some(0.0), Confidence::Manual);
    let turn_end = g.add_anchor(Some(30.0), Confidence::Manual);
    let utt_start = g.add_anchor(Some(10.0), Confidence::Manual);
    let utt_end = g.add_anchor(Some(19.0), Confidence::Manual);
    let m1 = g.add_unset_anchor();
    let m2 = g.add_unset_anchor();
    let p1 = g.add_annotation("who", "sp1", turn_start, turn_end, None);
    let turn = g.add_annotation("turn", "sp1", turn_start, turn_end, Some(p1));
    let utterance = g.add_annotation("utterance", "line", utt_start, utt_end, Some(turn));
    g.add_annotation("word", "one", utt_start, m1, Some(turn));
    g.add_annotation("word", "two", m1, m2, Some(turn));
    g.add_annotation("word", "three", m2, utt_end, Some(turn));

    let mut fragment = g.fragment(
        utterance,
        &[LayerId::new("utterance"), LayerId::new("word")],
    );
    assert!(fragment.anchor(turn_start).is_none());

    let mut validator = Validator::full();
    validator.transform(&mut fragment).unwrap();

    // word offsets were generated from the utterance bounds
    assert_eq!(fragment.offset_of(m1), Some(13.0));
    assert_eq!(fragment.offset_of(m2), Some(16.0));
}
