//! Retrieval latency over the brute-force in-memory index.
//!
//! Uses 1,000 passages by default. Set `BENCH_FULL_SCALE=1` to run with
//! 50,000 passages:
//!
//! ```bash
//! BENCH_FULL_SCALE=1 cargo bench -p chatty-vector
//! ```

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use chatty_vector::embedding::{EmbeddingService, HashEmbedding};
use chatty_vector::index::VectorIndex;
use chatty_vector::retriever::Retriever;

const CI_PASSAGE_COUNT: usize = 1_000;
const FULL_SCALE_PASSAGE_COUNT: usize = 50_000;

fn passage_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_PASSAGE_COUNT
    } else {
        CI_PASSAGE_COUNT
    }
}

fn passage_text(i: usize) -> String {
    format!(
        "The support handbook explains how refunds are processed, which \
         payment providers are accepted, and how long shipping takes to each \
         region. Section {} covers exceptions for damaged goods and the \
         escalation path for unresolved tickets.",
        i
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
}

fn build_index(rt: &tokio::runtime::Runtime, count: usize) -> (VectorIndex, HashEmbedding) {
    let index = VectorIndex::new();
    let embedder = HashEmbedding::default();

    for i in 0..count {
        let text = passage_text(i);
        let embedding = rt.block_on(embedder.embed(&text)).expect("embed failed");
        index
            .insert(&format!("passage-{}", i), embedding, &text)
            .expect("insert failed");
    }
    assert_eq!(index.len(), count);
    (index, embedder)
}

/// Raw k-NN over precomputed query vectors.
fn bench_index_search(c: &mut Criterion) {
    let rt = runtime();
    let count = passage_count();
    let (index, embedder) = build_index(&rt, count);
    let query = rt
        .block_on(embedder.embed("how are refunds processed"))
        .expect("query embed failed");

    let mut group = c.benchmark_group("index_search");
    group.measurement_time(Duration::from_secs(10));
    for k in [1usize, 5, 20] {
        group.bench_with_input(BenchmarkId::new(format!("{}passages", count), k), &k, |b, &k| {
            b.iter(|| index.search(&query, k).expect("search failed"));
        });
    }
    group.finish();
}

/// End-to-end `Retriever::retrieve`: query embedding plus k-NN and ranking.
fn bench_retrieve(c: &mut Criterion) {
    let rt = runtime();
    let count = passage_count();
    let (index, embedder) = build_index(&rt, count);
    let retriever = Retriever::new(Arc::new(index), Arc::new(embedder));

    let mut group = c.benchmark_group("retrieve");
    group.measurement_time(Duration::from_secs(10));
    group.bench_function(format!("top5_{}passages", count), |b| {
        b.iter(|| {
            let passages = rt.block_on(retriever.retrieve("which payment providers are accepted", 5));
            assert_eq!(passages.len(), 5);
            passages
        });
    });
    group.finish();
}

criterion_group!(benches, bench_index_search, bench_retrieve);
criterion_main!(benches);
