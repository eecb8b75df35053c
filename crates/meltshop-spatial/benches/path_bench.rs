//! Criterion benchmarks for bay path computation and caching.

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use meltshop_core::config::{BayConfig, CarType, PlantConfig};
use meltshop_core::id::BayId;
use meltshop_spatial::SpatialService;

fn row_of_bays(n: usize) -> PlantConfig {
    PlantConfig::with_bays(
        (0..n)
            .map(|i| BayConfig::new(format!("bay{}", i + 1), i as f64 * 200.0, 0.0, 200.0, 100.0))
            .collect(),
    )
}

fn bench_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("bay_paths");
    group.sample_size(50);

    let config = Arc::new(row_of_bays(20));
    let ids: Vec<BayId> = config.bays.iter().map(|b| b.id.clone()).collect();

    // Every ordered pair, every car type, cold cache each iteration.
    group.bench_function("all_pairs_uncached", |b| {
        b.iter(|| {
            let mut service = SpatialService::new(Arc::clone(&config)).unwrap();
            for from in &ids {
                for to in &ids {
                    for car_type in CarType::ALL {
                        std::hint::black_box(service.path_between_bays(from, to, car_type));
                    }
                }
            }
        });
    });

    // Same queries against a warm cache.
    let mut warm = SpatialService::new(Arc::clone(&config)).unwrap();
    for from in &ids {
        for to in &ids {
            for car_type in CarType::ALL {
                warm.path_between_bays(from, to, car_type);
            }
        }
    }
    group.bench_function("all_pairs_cached", |b| {
        b.iter(|| {
            for from in &ids {
                for to in &ids {
                    for car_type in CarType::ALL {
                        std::hint::black_box(warm.path_between_bays(from, to, car_type));
                    }
                }
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_paths);
criterion_main!(benches);
