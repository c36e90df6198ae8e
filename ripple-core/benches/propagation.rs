//! Benchmarks for change propagation and array diffs
//!
//! Run with: cargo bench -p ripple-core --bench propagation

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ripple_core::{compare_arrays, computed, observable, CompareOptions, Computed, Observable};

/// A chain of `depth` computeds, each adding one to the previous link.
fn make_chain(depth: usize) -> (Observable<u64>, Computed<u64>) {
    let source = observable(0_u64);
    let mut last = {
        let source = source.clone();
        computed(move || source.get() + 1)
    };
    for _ in 1..depth {
        let previous = last.clone();
        last = computed(move || previous.get() + 1);
    }
    (source, last)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/chain");

    for depth in [1, 10, 100] {
        let (source, tail) = make_chain(depth);
        let _sub = tail.subscribe(|value| {
            black_box(*value);
        });

        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("write", depth), &(), |b, _| {
            b.iter(|| source.update(|value| value + 1))
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/fan_out");

    for width in [10, 100, 1000] {
        let source = observable(0_u64);
        let readers: Vec<Computed<u64>> = (0..width)
            .map(|offset| {
                let source = source.clone();
                computed(move || source.get() + offset)
            })
            .collect();

        group.throughput(Throughput::Elements(width));
        group.bench_with_input(BenchmarkId::new("write", width), &(), |b, _| {
            b.iter(|| {
                source.update(|value| value + 1);
                black_box(readers[0].peek())
            })
        });
    }

    group.finish();
}

fn bench_compare_arrays(c: &mut Criterion) {
    let mut group = c.benchmark_group("array/compare");

    for len in [10_usize, 100, 500] {
        let old: Vec<usize> = (0..len).collect();
        let mut new = old.clone();
        new.rotate_left(len / 3);
        new.retain(|value| value % 7 != 0);

        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("sparse", len), &(), |b, _| {
            b.iter(|| black_box(compare_arrays(&old, &new, CompareOptions::sparse())))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chain, bench_fan_out, bench_compare_arrays);

criterion_main!(benches);
