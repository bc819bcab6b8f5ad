//! Benchmarks for DON identity hashing.
//!
//! Measures `sorted_peer_hash` across DON sizes seen in practice and well
//! beyond, in both pre-sorted and reversed input order.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use keystone_topology::{sorted_peer_hash, P2PId};

fn peers(n: usize) -> Vec<P2PId> {
    (0..n)
        .map(|i| {
            let mut bytes = [0u8; 32];
            bytes[..8].copy_from_slice(&(i as u64).to_be_bytes());
            P2PId::from_bytes(bytes)
        })
        .collect()
}

fn bench_sorted_peer_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_peer_hash");

    for &n in &[4usize, 16, 64, 256] {
        let sorted = peers(n);
        let mut reversed = sorted.clone();
        reversed.reverse();

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("sorted", n), &sorted, |b, p| {
            b.iter(|| sorted_peer_hash(black_box(p)))
        });
        group.bench_with_input(BenchmarkId::new("reversed", n), &reversed, |b, p| {
            b.iter(|| sorted_peer_hash(black_box(p)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sorted_peer_hash);
criterion_main!(benches);
