use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use stop_distance_core::{compute_stop_distances, Coordinate, DistanceSettings, Stop};

// Zigzag shape in lon/lat, stops slightly off every tenth point.
fn generate_zigzag(points: usize) -> (Vec<Coordinate>, Vec<Stop>) {
    let line: Vec<Coordinate> = (0..points)
        .map(|i| {
            let lat = i as f64 * 0.001;
            let lon = if i % 2 == 0 { 0.0 } else { 0.001 };
            Coordinate::new(lon, lat)
        })
        .collect();
    let stops = (0..points)
        .step_by(10)
        .map(|i| {
            let lat = i as f64 * 0.001;
            let lon = if i % 2 == 0 { 0.0001 } else { 0.0009 };
            Stop::new(format!("STOP_{i}"), Coordinate::new(lon, lat))
        })
        .collect();
    (line, stops)
}

// The same corridor driven back and forth; every stop has many near-equal
// candidates.
fn generate_corridor(passes: usize, stop_count: usize) -> (Vec<Coordinate>, Vec<Stop>) {
    let line = (0..passes)
        .map(|i| {
            let x = if i % 2 == 0 { 0.0 } else { 100.0 };
            Coordinate::new(x, i as f64)
        })
        .collect();
    let stops = (0..stop_count)
        .map(|i| {
            let x = 100.0 - (i as f64 * 7.0) % 100.0;
            Stop::new(format!("STOP_{i}"), Coordinate::new(x, passes as f64 / 2.0))
        })
        .collect();
    (line, stops)
}

fn benchmark_geographic(c: &mut Criterion) {
    let settings = DistanceSettings::geographic();
    let mut group = c.benchmark_group("zigzag_geographic");
    for points in [100, 500] {
        let (line, stops) = generate_zigzag(points);
        group.bench_with_input(BenchmarkId::from_parameter(points), &points, |b, _| {
            b.iter(|| compute_stop_distances(black_box(&line), black_box(&stops), None, &settings))
        });
    }
    group.finish();
}

fn benchmark_pathological(c: &mut Criterion) {
    let settings = DistanceSettings::planar();
    let (line, stops) = generate_corridor(40, 30);
    c.bench_function("corridor_40_passes_30_stops", |b| {
        b.iter(|| compute_stop_distances(black_box(&line), black_box(&stops), None, &settings))
    });
}

criterion_group!(benches, benchmark_geographic, benchmark_pathological);
criterion_main!(benches);
