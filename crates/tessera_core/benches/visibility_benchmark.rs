//! # Visibility Flood Fill Benchmark
//!
//! Measures `resolve` on the section shapes the compiler actually produces:
//! open caves, layered terrain, and a worst-case checkerboard.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessera_core::{LocalPos, VisibilityGraph};

fn graph_from(opaque: impl Fn(LocalPos) -> bool) -> VisibilityGraph {
    let mut graph = VisibilityGraph::new();
    for cell in LocalPos::all().filter(|&p| opaque(p)) {
        graph.mark_opaque(cell);
    }
    graph
}

// =============================================================================
// RESOLVE BENCHMARKS
// =============================================================================

fn bench_terrain_surface(c: &mut Criterion) {
    // Ground below y = 6, a few pillars above.
    let graph = graph_from(|p| p.y < 6 || (p.x % 5 == 0 && p.z % 5 == 0 && p.y < 10));

    c.bench_function("visibility_terrain_surface", |b| {
        b.iter(|| black_box(graph.resolve()));
    });
}

fn bench_cave_tunnels(c: &mut Criterion) {
    let graph = graph_from(|p| !(p.y == 8 && p.z == 8) && !(p.x == 4 && p.z == 11));

    c.bench_function("visibility_cave_tunnels", |b| {
        b.iter(|| black_box(graph.resolve()));
    });
}

fn bench_checkerboard(c: &mut Criterion) {
    // Half the cells open but none 6-connected: many tiny components.
    let graph = graph_from(|p| (p.x + p.y + p.z) % 2 == 0);

    c.bench_function("visibility_checkerboard", |b| {
        b.iter(|| black_box(graph.flood_fill()));
    });
}

fn bench_mark_all(c: &mut Criterion) {
    c.bench_function("visibility_mark_4096", |b| {
        b.iter(|| {
            let mut graph = VisibilityGraph::new();
            for cell in LocalPos::all() {
                graph.mark_opaque(cell);
            }
            black_box(graph.opaque_count())
        });
    });
}

criterion_group!(
    benches,
    bench_terrain_surface,
    bench_cave_tunnels,
    bench_checkerboard,
    bench_mark_all,
);

criterion_main!(benches);
