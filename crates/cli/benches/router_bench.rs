use std::sync::Arc;

use agg::{assign, Aggregator, Router, RunDescriptor, VariableGeometry};
use comm::ThreadGroup;
use config::{AggregationConfig, AssignmentOrder};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use layout::{BlockLayout, DatasetDescriptor, DerivedMetadata, VariableDescriptor};
use patch::{HzFeed, HzLevel, PatchGroup, PatchGroupKind};

const PROCS: usize = 8;
const SPB: u64 = 256;
const BPF: u64 = 64;
const FACTOR: u64 = 4;

fn metadata() -> (Arc<DatasetDescriptor>, Arc<DerivedMetadata>) {
    let dataset = DatasetDescriptor::new(BPF).with_variable(VariableDescriptor::new("f", 1, 64));
    let derived = DerivedMetadata::new(SPB, FACTOR, BlockLayout::dense(2, BPF)).unwrap();
    (Arc::new(dataset), Arc::new(derived))
}

fn router_benchmark(c: &mut Criterion) {
    let (dataset, derived) = metadata();
    let a = assign(&dataset, &derived, 0..=0, AssignmentOrder::ChannelMajor, 0, PROCS).unwrap();
    let router = Router {
        derived: &derived,
        table: &a.table,
    };
    let geom = VariableGeometry::new(&dataset, 0);
    let spf = SPB * BPF;

    c.bench_function("route_10k_runs", |b| {
        b.iter(|| {
            let mut fragments = 0;
            for i in 0..10_000u64 {
                let start = (i * 37) % (spf - 64);
                let run = RunDescriptor {
                    variable: 0,
                    start_index: start,
                    count: 1 + i % 64,
                    source_offset: 0,
                };
                fragments += router.route(&run, geom).unwrap().len();
            }
            fragments
        });
    });
}

fn feed_for(rank: usize) -> HzFeed {
    let total = SPB * BPF * 2;
    let chunk = total / PROCS as u64;
    let start = rank as u64 * chunk;
    let mut feed = HzFeed::new(0, 0).unwrap();
    let p = feed
        .push(PatchGroup::new(
            PatchGroupKind::Regular,
            0,
            vec![HzLevel::contiguous(start, chunk)],
            1,
        ))
        .unwrap();
    feed.set_buffer(p, 0, 0, vec![rank as u8; chunk as usize * 8])
        .unwrap();
    feed
}

fn write_benchmark(c: &mut Criterion) {
    let (dataset, derived) = metadata();

    c.bench_function("write_8_ranks_256k", |b| {
        b.iter_batched(
            || (0..PROCS).map(feed_for).collect::<Vec<_>>(),
            |feeds| {
                ThreadGroup::run(PROCS, |g| {
                    let rank = comm::ProcessGroup::rank(&g);
                    let mut session = Aggregator::init(
                        Arc::clone(&dataset),
                        Arc::clone(&derived),
                        0,
                        0,
                        AggregationConfig::default(),
                    )
                    .unwrap();
                    session.set_process_group(g);
                    session.build_buffers().unwrap();
                    session.write(&feeds[rank]).unwrap();
                    session.stats().bytes_moved
                })
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, router_benchmark, write_benchmark);
criterion_main!(benches);
