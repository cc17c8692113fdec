//! Benchmarks for offset generation and validation at realistic corpus
//! scale: on the order of 10,000 words in typical turn/utterance ratios.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use alignment_kernel::{
    Alignment, Confidence, Graph, GraphTransformer, Layer, OffsetGenerator, Schema, Validator,
};

fn speech_schema() -> Schema {
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
    schema.set_participant_layer("who");
    schema.set_turn_layer("turn");
    schema.set_utterance_layer("utterance");
    schema.set_word_layer("word");
    schema
}

/// Build a transcript-shaped graph: aligned turn and utterance bounds,
/// words with no offsets at all.
fn build_graph(turns: usize, utterances_per_turn: usize, words_per_utterance: usize) -> Graph {
    let mut g = Graph::new(speech_schema());
    let turn_seconds = 60.0;
    let utterance_seconds = turn_seconds / utterances_per_turn as f64;

    let first = g.add_anchor(Some(0.0), Confidence::Manual);
    let last = g.add_anchor(
        Some(turns as f64 * turn_seconds),
        Confidence::Manual,
    );
    let who = g.add_annotation("who", "speaker", first, last, None);

    for t in 0..turns {
        let turn_offset = t as f64 * turn_seconds;
        let turn_start = g.add_anchor(Some(turn_offset), Confidence::Manual);
        let turn_end = g.add_anchor(Some(turn_offset + turn_seconds), Confidence::Manual);
        let turn = g.add_annotation("turn", "speaker", turn_start, turn_end, Some(who));

        for u in 0..utterances_per_turn {
            let utterance_offset = turn_offset + u as f64 * utterance_seconds;
            let utterance_start = g.add_anchor(Some(utterance_offset), Confidence::Manual);
            let utterance_end = g.add_anchor(
                Some(utterance_offset + utterance_seconds),
                Confidence::Manual,
            );
            g.add_annotation(
                "utterance",
                "line",
                utterance_start,
                utterance_end,
                Some(turn),
            );

            let mut previous = utterance_start;
            for w in 0..words_per_utterance {
                let end = if w + 1 == words_per_utterance {
                    utterance_end
                } else {
                    g.add_unset_anchor()
                };
                g.add_annotation("word", "token", previous, end, Some(turn));
                previous = end;
            }
        }
    }
    g
}

fn bench_offset_generation(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    // 100 turns x 5 utterances x 20 words = 10,000 words
    let graph = build_graph(100, 5, 20);
    c.bench_function("generate_offsets_10k_words", |b| {
        b.iter_batched(
            || graph.clone(),
            |mut g| {
                OffsetGenerator::default()
                    .transform(&mut g)
                    .expect("generation succeeds");
                g
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_validation(c: &mut Criterion) {
    let graph = build_graph(100, 5, 20);
    c.bench_function("validate_10k_words", |b| {
        b.iter_batched(
            || graph.clone(),
            |mut g| {
                Validator::full().transform(&mut g).expect("validation succeeds");
                g
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_offset_generation, bench_validation);
criterion_main!(benches);
