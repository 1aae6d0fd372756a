#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use stop_distance_core::{compute_stop_distances, DistanceSettings};
use stop_distance_model::{Coordinate, Stop, TrustedShapeDistances};

#[derive(Debug, Arbitrary)]
struct FuzzData {
    line: Vec<(i16, i16)>,
    stops: Vec<StopData>,
    shape_distances: Option<(Vec<u16>, Vec<u16>)>,
    assume_complex_lines: bool,
}

#[derive(Debug, Arbitrary)]
struct StopData {
    id: u8,
    x: i16,
    y: i16,
}

fuzz_target!(|data: FuzzData| {
    // keep the search small enough for the fuzzer's time limit
    if data.line.len() > 64 || data.stops.len() > 24 {
        return;
    }
    let line: Vec<Coordinate> = data
        .line
        .iter()
        .map(|&(x, y)| Coordinate::new(x as f64, y as f64))
        .collect();
    let stops: Vec<Stop> = data
        .stops
        .iter()
        .map(|stop| Stop::new(stop.id.to_string(), Coordinate::new(stop.x as f64, stop.y as f64)))
        .collect();
    let shape_distances = data.shape_distances.map(|(stop_times, shape_points)| {
        TrustedShapeDistances::new(
            stop_times.into_iter().map(f64::from).collect(),
            shape_points.into_iter().map(f64::from).collect(),
        )
    });
    let settings = DistanceSettings {
        assume_complex_lines: data.assume_complex_lines,
        subdivision_epsilon: 500.0,
        ..DistanceSettings::planar()
    };

    if let Ok(outcome) = compute_stop_distances(&line, &stops, shape_distances.as_ref(), &settings) {
        assert_eq!(outcome.distances.len(), stops.len());
        for distance in &outcome.distances {
            assert!(*distance >= 0.0 && *distance <= outcome.line_length);
        }
        if !outcome.used_fallback() {
            assert!(outcome.is_monotonic(), "{:?}", outcome);
        }
    }
});
