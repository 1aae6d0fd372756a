#![no_main]
use libfuzzer_sys::fuzz_target;
use stop_distance_core::{compute_pattern_distances, DistanceSettings};
use stop_distance_model::RoutePattern;

fuzz_target!(|data: &[u8]| {
    if let Ok(pattern) = serde_json::from_slice::<RoutePattern>(data) {
        if pattern.line.len() <= 64 && pattern.stops.len() <= 24 {
            let _ = compute_pattern_distances(&pattern, &DistanceSettings::planar());
        }
    }
});
