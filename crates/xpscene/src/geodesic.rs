//! Great-circle edge measurement and the planar walk that turns a way into
//! a local polygon.

use crate::error::{Result, SceneryError};
use crate::EARTH_RADIUS_M;

/// An OSM node as fetched; never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
}

/// One row of a way's measurement chain: the node at `seq` plus the edge to
/// the node at `seq + 1`. The last row has no successor, so its edge is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMeasurement {
    pub seq: u32,
    pub way_id: i64,
    pub node_id: i64,
    pub lat: f64,
    pub lon: f64,
    /// Metres; `None` for the last row and for degenerate edges.
    pub distance_to_next: Option<f64>,
    /// Degrees clockwise from north in `[0, 360)`; `None` alongside distance.
    pub bearing_to_next: Option<f64>,
    /// Sum of all usable edge distances of the way (same on every row).
    pub perimeter: f64,
    pub max_seq: u32,
}

/// Source of measurement chains. Implementations must agree numerically.
pub trait MeasurementProvider {
    fn measure(&self, way_id: i64) -> Result<Vec<EdgeMeasurement>>;
}

/// Haversine distance in metres.
///
/// The operation order mirrors the SQL in `store::WINDOW_MEASUREMENT_SQL`
/// so both backends produce the same bits.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powf(2.0)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powf(2.0);

    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Initial great-circle bearing from point 1 to point 2, degrees in `[0, 360)`.
pub fn forward_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Distance and bearing of one edge, or `(None, None)` when degenerate.
pub fn measure_edge(from: (f64, f64), to: (f64, f64)) -> (Option<f64>, Option<f64>) {
    let distance = haversine_m(from.0, from.1, to.0, to.1);
    if !(distance.is_finite() && distance > 0.0) {
        return (None, None);
    }

    let bearing = forward_bearing_deg(from.0, from.1, to.0, to.1);
    if !bearing.is_finite() {
        return (None, None);
    }

    (Some(distance), Some(bearing))
}

/// In-process measurement keeping the caller's sequence numbers.
pub fn measure_sequenced(way_id: i64, chain: &[(u32, Node)]) -> Vec<EdgeMeasurement> {
    let max_seq = chain.iter().map(|(seq, _)| *seq).max().unwrap_or(0);

    let mut rows: Vec<EdgeMeasurement> = chain
        .iter()
        .enumerate()
        .map(|(index, &(seq, node))| {
            let (distance_to_next, bearing_to_next) = match chain.get(index + 1) {
                Some((_, next)) => measure_edge((node.lat, node.lon), (next.lat, next.lon)),
                None => (None, None),
            };

            EdgeMeasurement {
                seq,
                way_id,
                node_id: node.id,
                lat: node.lat,
                lon: node.lon,
                distance_to_next,
                bearing_to_next,
                perimeter: 0.0,
                max_seq,
            }
        })
        .collect();

    let perimeter: f64 = rows.iter().filter_map(|r| r.distance_to_next).sum();
    for row in &mut rows {
        row.perimeter = perimeter;
    }

    rows
}

/// A way flattened onto the local plane (`x`, `z`), origin at the first node.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarPath {
    pub way_id: i64,
    /// Walk order; the closing vertex is not repeated.
    pub vertices: Vec<[f64; 2]>,
    pub perimeter: f64,
    pub longest_edge: f64,
    /// Bearing of the second edge; persisted, not used for placement.
    pub rotation: f64,
    /// Placement anchor, taken from the closing row.
    pub anchor_lat: f64,
    pub anchor_lon: f64,
}

/// Footprint statistics that do not need the planar walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSummary {
    pub perimeter: f64,
    pub longest_edge: f64,
    pub anchor_lat: f64,
    pub anchor_lon: f64,
}

pub fn summarize(rows: &[EdgeMeasurement]) -> Option<ChainSummary> {
    let closing = rows.last()?;
    let longest_edge = rows
        .iter()
        .filter_map(|r| r.distance_to_next)
        .fold(0.0_f64, f64::max);

    Some(ChainSummary {
        perimeter: closing.perimeter,
        longest_edge,
        anchor_lat: closing.lat,
        anchor_lon: closing.lon,
    })
}

/// Walk the chain from (0, 0): `x += d·cos(b)`, `z += d·sin(b)`.
///
/// Every edge except the closing one (back to the first node) produces a
/// vertex; the closing row only contributes to the perimeter. Degenerate
/// edges are stepped over. Fewer than three vertices rejects the way.
pub fn integrate_path(rows: &[EdgeMeasurement]) -> Result<PlanarPath> {
    let summary = match summarize(rows) {
        Some(summary) => summary,
        None => return Err(SceneryError::NoMeasurements(0)),
    };
    let way_id = rows[0].way_id;

    let walk_len = rows.len().saturating_sub(2);
    let mut vertices = Vec::with_capacity(walk_len + 1);
    let (mut x, mut z) = (0.0_f64, 0.0_f64);
    vertices.push([x, z]);

    for row in &rows[..walk_len] {
        let (Some(distance), Some(bearing)) = (row.distance_to_next, row.bearing_to_next) else {
            log::debug!("way {way_id}: degenerate edge at seq {}", row.seq);
            continue;
        };

        let radians = bearing.to_radians();
        x += distance * radians.cos();
        z += distance * radians.sin();
        vertices.push([x, z]);
    }

    if vertices.len() < 3 {
        return Err(SceneryError::TooFewVertices {
            way_id,
            usable: vertices.len(),
        });
    }

    let rotation = rows
        .get(1)
        .and_then(|r| r.bearing_to_next)
        .unwrap_or(0.0);

    Ok(PlanarPath {
        way_id,
        vertices,
        perimeter: summary.perimeter,
        longest_edge: summary.longest_edge,
        rotation,
        anchor_lat: summary.anchor_lat,
        anchor_lon: summary.anchor_lon,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{rectangle_way, RECT_ORIGIN};

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    /// Seq numbered from 1, as the store does on import.
    fn measure_chain(way_id: i64, nodes: &[Node]) -> Vec<EdgeMeasurement> {
        let chain: Vec<(u32, Node)> = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (index as u32 + 1, *node))
            .collect();

        measure_sequenced(way_id, &chain)
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!(close(d, 111_194.93, 0.01), "got {d}");
    }

    #[test]
    fn bearings_of_cardinal_directions() {
        assert!(close(forward_bearing_deg(0.0, 0.0, 1.0, 0.0), 0.0, 1e-9));
        assert!(close(forward_bearing_deg(0.0, 0.0, 0.0, 1.0), 90.0, 1e-9));
        assert!(close(forward_bearing_deg(1.0, 0.0, 0.0, 0.0), 180.0, 1e-9));
        assert!(close(forward_bearing_deg(0.0, 1.0, 0.0, 0.0), 270.0, 1e-9));
    }

    #[test]
    fn chain_rows_and_perimeter() {
        let nodes = rectangle_way(RECT_ORIGIN, 10.0, 6.0);
        let rows = measure_chain(7, &nodes);

        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|r| r.max_seq == 5));
        assert!(rows[4].distance_to_next.is_none());
        assert!(close(rows[0].perimeter, 32.0, 1e-3), "perimeter {}", rows[0].perimeter);
    }

    #[test]
    fn walk_reproduces_edge_lengths() {
        let nodes = rectangle_way(RECT_ORIGIN, 10.0, 6.0);
        let rows = measure_chain(7, &nodes);
        let path = integrate_path(&rows).unwrap();

        assert_eq!(path.vertices.len(), 4);
        for (i, pair) in path.vertices.windows(2).enumerate() {
            let dx = pair[1][0] - pair[0][0];
            let dz = pair[1][1] - pair[0][1];
            let planar = (dx * dx + dz * dz).sqrt();
            let geodesic = rows[i].distance_to_next.unwrap();
            assert!(close(planar, geodesic, 1e-9), "edge {i}: {planar} vs {geodesic}");
        }
    }

    #[test]
    fn rotation_is_second_edge_bearing() {
        let nodes = rectangle_way(RECT_ORIGIN, 10.0, 6.0);
        let rows = measure_chain(7, &nodes);
        let path = integrate_path(&rows).unwrap();

        assert!(close(path.rotation, rows[1].bearing_to_next.unwrap(), 1e-12));
        assert!(close(path.rotation, 90.0, 1e-3));
        assert!(close(path.longest_edge, 10.0, 1e-3));
        assert_eq!(path.anchor_lat, nodes[0].lat);
    }

    #[test]
    fn duplicate_node_is_stepped_over() {
        let mut nodes = rectangle_way(RECT_ORIGIN, 10.0, 6.0);
        let dup = Node { id: 99, ..nodes[1] };
        nodes.insert(2, dup);

        let rows = measure_chain(7, &nodes);
        assert!(rows[1].distance_to_next.is_none());

        let path = integrate_path(&rows).unwrap();
        assert_eq!(path.vertices.len(), 4);
        assert!(close(path.perimeter, 32.0, 1e-3));
    }

    #[test]
    fn too_few_vertices_rejects_the_way() {
        let nodes = rectangle_way(RECT_ORIGIN, 10.0, 6.0);
        let degenerate = [nodes[0], nodes[1], nodes[0]];
        let rows = measure_chain(3, &degenerate);

        match integrate_path(&rows) {
            Err(SceneryError::TooFewVertices { way_id, usable }) => {
                assert_eq!(way_id, 3);
                assert_eq!(usable, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
