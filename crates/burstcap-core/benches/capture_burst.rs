//! Capture Path Benchmarks

use burstcap_core::sim::SimRuntime;
use burstcap_core::{BufferPool, CaptureEngine, EngineConfig, Locality, ShutdownSignal};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_pool_cycle(c: &mut Criterion) {
    let pool = BufferPool::allocate(8192, 2048, Locality::Any).unwrap();

    c.bench_function("pool_borrow_release", |b| {
        b.iter(|| {
            let slot = pool.borrow().unwrap();
            pool.release(black_box(slot)).unwrap();
        })
    });

    let frame = [0x5au8; 64];
    c.bench_function("pool_fill_64", |b| {
        b.iter(|| {
            let mut slot = pool.borrow().unwrap();
            black_box(pool.fill(&mut slot, black_box(&frame)));
            pool.release(slot).unwrap();
        })
    });
}

fn bench_capture(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture_burst");

    for size in [64usize, 512, 1500] {
        let sim = SimRuntime::with_devices(1);
        let traffic = sim.traffic(0);
        let mut engine =
            CaptureEngine::initialize(sim, &EngineConfig::default(), ShutdownSignal::new()).unwrap();

        group.throughput(Throughput::Bytes((size * 32) as u64));
        group.bench_with_input(BenchmarkId::new("sim_32", size), &size, |b, &size| {
            b.iter(|| {
                traffic.inject_synthetic(32, size);
                let batch = engine.capture(32).unwrap();
                black_box(batch.total_bytes())
            })
        });
    }

    group.finish();
}

fn bench_empty_poll(c: &mut Criterion) {
    let mut engine =
        CaptureEngine::initialize(SimRuntime::default(), &EngineConfig::default(), ShutdownSignal::new())
            .unwrap();

    c.bench_function("capture_empty", |b| {
        b.iter(|| black_box(engine.capture(32).unwrap().len()))
    });
}

fn bench_copy_out(c: &mut Criterion) {
    let sim = SimRuntime::with_devices(1);
    let traffic = sim.traffic(0);
    let mut engine =
        CaptureEngine::initialize(sim, &EngineConfig::default(), ShutdownSignal::new()).unwrap();

    c.bench_function("capture_copy_out_32x256", |b| {
        b.iter(|| {
            traffic.inject_synthetic(32, 256);
            black_box(engine.capture(32).unwrap().copy_out())
        })
    });
}

criterion_group!(benches, bench_pool_cycle, bench_capture, bench_empty_poll, bench_copy_out);
criterion_main!(benches);
