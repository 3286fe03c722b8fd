//! Shared fixtures for unit tests.

use crate::geodesic::Node;
use crate::EARTH_RADIUS_M;

pub const RECT_ORIGIN: (f64, f64) = (32.0, 34.8);

/// Move `north_m` / `east_m` from a lat/lon on the sphere (small offsets).
pub fn offset(origin: (f64, f64), north_m: f64, east_m: f64) -> (f64, f64) {
    let lat = origin.0 + (north_m / EARTH_RADIUS_M).to_degrees();
    let lon = origin.1 + (east_m / (EARTH_RADIUS_M * origin.0.to_radians().cos())).to_degrees();
    (lat, lon)
}

/// Closed rectangular way: `length_m` northward, `width_m` eastward, back.
/// Node ids start at 1; the last node repeats the first.
pub fn rectangle_way(origin: (f64, f64), length_m: f64, width_m: f64) -> Vec<Node> {
    let corners = [
        offset(origin, 0.0, 0.0),
        offset(origin, length_m, 0.0),
        offset(origin, length_m, width_m),
        offset(origin, 0.0, width_m),
    ];

    let mut nodes: Vec<Node> = corners
        .iter()
        .enumerate()
        .map(|(i, &(lat, lon))| Node {
            id: i as i64 + 1,
            lat,
            lon,
        })
        .collect();
    nodes.push(nodes[0]);
    nodes
}
