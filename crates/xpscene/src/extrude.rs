//! Multi-level prism extrusion and the minimal OBJ text handed to mesh
//! finishing.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::geodesic::PlanarPath;
use crate::height::{HeightResolution, MAX_LEVEL_COUNT};

/// OBJ8 frame: `y` up, `x` and `z` on the ground plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vertex {
    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Ground-level polygon in reversed walk order.
///
/// The reversal pairs with the side-quad winding in [`BuildingMesh::extrude`]
/// to keep normals facing out.
pub fn base_polygon(path: &PlanarPath) -> Vec<Vertex> {
    path.vertices
        .iter()
        .rev()
        .map(|&[x, z]| Vertex::new(x, 0.0, z))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildingMesh {
    pub way_id: i64,
    pub base_polygon: Vec<Vertex>,
    pub height: f64,
    pub level_count: u32,
    /// `level_count + 1` copies of the base polygon, bottom to top.
    pub rings: Vec<Vec<Vertex>>,
    /// Zero-based indices into the flattened rings.
    pub faces: Vec<Vec<u32>>,
}

impl BuildingMesh {
    pub fn extrude(way_id: i64, base_polygon: Vec<Vertex>, resolution: HeightResolution) -> Self {
        let HeightResolution {
            height,
            level_count,
        } = resolution;
        let level_count = level_count.clamp(1, MAX_LEVEL_COUNT);
        let level_height = height / level_count as f64;
        let n = base_polygon.len() as u32;

        let rings: Vec<Vec<Vertex>> = (0..=level_count)
            .map(|k| {
                let y = k as f64 * level_height;
                base_polygon.iter().map(|v| Vertex::new(v.x, y, v.z)).collect()
            })
            .collect();

        let index = |ring: u32, i: u32| ring * n + i;
        let mut faces = Vec::with_capacity(n as usize * level_count as usize + 2);

        for ring in 0..level_count {
            for i in 0..n {
                let j = (i + 1) % n;
                faces.push(vec![
                    index(ring, i),
                    index(ring, j),
                    index(ring + 1, j),
                    index(ring + 1, i),
                ]);
            }
        }

        faces.push((0..n).map(|i| index(0, i)).collect());
        faces.push((0..n).map(|i| index(level_count, i)).collect());

        Self {
            way_id,
            base_polygon,
            height,
            level_count,
            rings,
            faces,
        }
    }

    pub fn top_ring(&self) -> &[Vertex] {
        self.rings.last().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Header, object line, vertices, one smoothing + one material
    /// directive, then 1-based faces. No normals.
    pub fn write_obj<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "# osm2dsf {}", crate::VERSION)?;
        writeln!(out, "# way {}", self.way_id)?;
        writeln!(out, "o cube")?;

        for vertex in self.rings.iter().flatten() {
            writeln!(out, "v {:.2} {:.2} {:.2}", vertex.x, vertex.y, vertex.z)?;
        }

        writeln!(out, "s 0")?;
        writeln!(out, "usemtl blue")?;

        for face in &self.faces {
            let indices: Vec<String> = face.iter().map(|i| (i + 1).to_string()).collect();
            writeln!(out, "f {}", indices.join(" "))?;
        }

        out.flush()
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        self.write_obj(BufWriter::new(file))
    }
}
