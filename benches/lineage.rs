use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use immagent::{AgentVersion, Error, LlmProvider, Message, ModelConfig, Result, Store, ToolRegistry};

/// Never actually invoked by these benchmarks — `Store` just needs something to hold.
struct UnusedLlm;

#[async_trait]
impl LlmProvider for UnusedLlm {
    async fn complete(
        &self,
        _system_prompt: &str,
        _messages: &[Message],
        _model: &str,
        _config: &ModelConfig,
        _timeout: Duration,
    ) -> Result<Message> {
        Err(Error::llm_permanent("not used by this benchmark"))
    }
}

fn store() -> Store {
    Store::in_memory(Arc::new(UnusedLlm), Arc::new(ToolRegistry::builder().build()))
}

/// Build a chain of `depth` agent versions, returning the deepest one.
async fn build_chain(store: &Store, depth: usize) -> AgentVersion {
    let mut agent = store
        .create_agent("bench", "You are helpful.", "bench-model", ModelConfig::default())
        .await
        .unwrap();

    for i in 0..depth {
        agent = store.clone_agent(&agent, Some(&format!("bench-{i}"))).await.unwrap();
        // clone_agent makes a sibling; with_metadata is what actually deepens the chain.
        agent = store
            .with_metadata(&agent, Default::default())
            .await
            .unwrap();
    }
    agent
}

fn bench_lineage_walk_by_depth(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("lineage_walk_by_depth");

    for depth in [1usize, 10, 50, 200] {
        let store = store();
        let leaf = runtime.block_on(build_chain(&store, depth));

        group.bench_with_input(BenchmarkId::from_parameter(depth), &leaf, |b, leaf| {
            b.to_async(&runtime).iter(|| async { store.get_lineage(black_box(leaf)).await.unwrap() });
        });
    }

    group.finish();
}

fn bench_cache_hit_vs_backend_fallback(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("get_agent_cache_hit");

    let store = store();
    let agent = runtime.block_on(store.create_agent("bench", "sys", "model", ModelConfig::default())).unwrap();
    // Prime the cache once; every subsequent get_agent is a hit.
    runtime.block_on(store.get_agent(agent.id)).unwrap();

    group.bench_function("warm", |b| {
        b.to_async(&runtime).iter(|| async { store.get_agent(black_box(agent.id)).await.unwrap() });
    });

    group.bench_function("cold_after_clear", |b| {
        b.to_async(&runtime).iter(|| async {
            store.clear_cache();
            store.get_agent(black_box(agent.id)).await.unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_lineage_walk_by_depth, bench_cache_hit_vs_backend_fallback);
criterion_main!(benches);
