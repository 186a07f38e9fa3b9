//! Deferred result slot benchmark suite.
//!
//! Measures the cost of handing a value from a producer to a blocked
//! reader:
//! - Same thread (fulfill, then wait)
//! - Cross thread (reader blocks, producer thread fulfills)
//! - Resource request round trip through an in-process transport
//!
//! Run with: cargo bench --bench deferred_slot
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use gateway_connections::{
    CompletionHook, DiagnosticsSender, HttpRequest, HttpResponse, ResourceRequest,
    ResourceRequestManager, Transaction, TransactionState, Transport, UpgradeHook, deferred,
};

// ============================================================================
// In-process transport
// ============================================================================

/// Completes every request immediately with `200 OK`.
struct InstantTransport;

struct InstantTransaction {
    response: HttpResponse,
}

impl Transport for InstantTransport {
    fn issue_request(
        &self,
        request: HttpRequest,
        _upgrade: Option<UpgradeHook>,
    ) -> Arc<dyn Transaction> {
        Arc::new(InstantTransaction {
            response: HttpResponse::new(200, "OK").with_body(request.body),
        })
    }
}

impl Transaction for InstantTransaction {
    fn state(&self) -> TransactionState {
        TransactionState::Completed
    }

    fn response(&self) -> HttpResponse {
        self.response.clone()
    }

    fn set_completion_hook(&self, hook: CompletionHook) {
        hook();
    }

    fn cancel(&self) {}
}

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BATCH_SIZES: &[usize] = &[1, 16, 128];

// ============================================================================
// Benchmark: Slot Handoff
// ============================================================================

fn bench_same_thread(c: &mut Criterion) {
    c.bench_function("deferred/same_thread", |b| {
        b.iter(|| {
            let (promise, result) = deferred();
            promise.fulfill(black_box(42_u64));
            result.wait()
        });
    });
}

fn bench_cross_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("deferred/cross_thread");

    for &count in BATCH_SIZES {
        group.bench_with_input(BenchmarkId::new("handoff", count), &count, |b, &count| {
            b.iter(|| {
                let (promises, results): (Vec<_>, Vec<_>) = (0..count).map(|_| deferred()).unzip();
                let producer = thread::spawn(move || {
                    for (i, promise) in promises.into_iter().enumerate() {
                        promise.fulfill(i);
                    }
                });
                for result in results {
                    black_box(result.wait().ok());
                }
                producer.join().ok();
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Request Round Trip
// ============================================================================

fn bench_resource_round_trip(c: &mut Criterion) {
    let manager = ResourceRequestManager::new(
        Arc::new(InstantTransport),
        DiagnosticsSender::new("Bench"),
        None,
    );

    c.bench_function("resource/round_trip", |b| {
        b.iter(|| {
            let handle = manager.submit(
                ResourceRequest::post("http://localhost/echo").with_body(black_box("ping")),
            );
            handle.response.wait().ok()
        });
    });
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(
    benches,
    bench_same_thread,
    bench_cross_thread,
    bench_resource_round_trip
);
criterion_main!(benches);
