//! Bridge round-trip benchmark suite.
//!
//! Measures request latency through an in-process bridge:
//! - Plain hand-over vs. wire-codec round trip
//! - Concurrency: 1, 16, 128 requests in flight
//!
//! Run with: cargo bench --bench bridge_roundtrip
//! Results saved to: target/criterion/

use std::sync::Arc;

use corelink::{ApiRegistry, Command, ConnectOptions, Duplex, Duplexer, Value};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CONCURRENCY: &[usize] = &[1, 16, 128];

// ============================================================================
// Setup
// ============================================================================

fn registry() -> Arc<ApiRegistry<()>> {
    let mut registry = ApiRegistry::new();
    registry.register("echo", |args, _meta| async move { Ok(Value::Array(args)) });
    Arc::new(registry)
}

fn duplex(rt: &Runtime, duplexer: &Duplexer) -> Duplex<()> {
    rt.block_on(async {
        let duplex = duplexer.from_client(&registry(), ());
        duplex
            .to_core
            .connect(ConnectOptions::new())
            .await
            .expect("connect");
        duplex
    })
}

fn payload() -> Command {
    Command::new("echo")
        .arg("payload")
        .arg(Value::object([("id", 42), ("depth", 3)]))
}

// ============================================================================
// Benchmark: Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("round_trip");

    for (name, duplexer) in [("plain", Duplexer::new()), ("serialized", Duplexer::serialized())] {
        let duplex = duplex(&rt, &duplexer);

        for &in_flight in CONCURRENCY {
            group.bench_with_input(BenchmarkId::new(name, in_flight), &in_flight, |b, &count| {
                b.to_async(&rt).iter(|| async {
                    let requests = (0..count).map(|_| duplex.to_core.send_request(payload(), None));
                    for result in futures_util::future::join_all(requests).await {
                        result.expect("reply");
                    }
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_round_trip);
criterion_main!(benches);
