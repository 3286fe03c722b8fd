//! xpscene: OSM building footprints to X-Plane scenery.
//!
//! - Turns a closed OSM way (ordered lat/lon nodes) into a local planar
//!   polygon by walking great-circle distance + forward bearing per edge.
//! - Resolves building height / level count from tags, falling back to
//!   footprint heuristics.
//! - Extrudes the polygon into a multi-level prism and writes it as a
//!   minimal Wavefront OBJ for the external mesh-finishing step.
//! - Fingerprints finished meshes so identical shapes share one object.
//! - Assembles DSF2TEXT (`OBJECT_DEF` + `OBJECT`) for DSFTool.
//! - In helipad mode, writes one apt.dat heliport per way instead.
//!
//! Mesh file (input to mesh finishing):
//!   # osm2dsf <version>
//!   # way <way_id>
//!   o cube
//!   v x y z            (two decimals, y is up)
//!   s 0
//!   usemtl blue
//!   f i1 i2 i3 i4      (1-based, no normals)
//!
//! Ledger line (generate-log / resume ledger):
//!   <path>|<lon> <lat> <heading>|<way_id>
//!
//! DSF text:
//!   <header / template>
//!   OBJECT_DEF <lib>/<file>        (all definitions first)
//!   OBJECT <def_index> <lon> <lat> <heading>

pub mod config;
pub mod dedup;
pub mod dsf;
pub mod error;
pub mod extrude;
pub mod filter;
pub mod geodesic;
pub mod height;
pub mod helipad;
pub mod ledger;
pub mod osm;
pub mod pipeline;
pub mod store;

#[cfg(test)]
mod testutil;

pub use config::{MeasurementBackend, RunConfig, RunMode, RunPaths};
pub use dedup::{DedupIndexer, DedupOutcome, EdgeSignature, Fingerprint};
pub use dsf::{DsfDocument, DsfStrategy, SceneryCompiler};
pub use error::{Result, SceneryError};
pub use extrude::{BuildingMesh, Vertex};
pub use filter::{FilterPipeline, FilterVerdict};
pub use geodesic::{EdgeMeasurement, MeasurementProvider, PlanarPath};
pub use height::{HeightResolution, HeightResolver};
pub use ledger::LedgerEntry;
pub use pipeline::{FinishJob, FinishedMesh, MeshFinisher, Pipeline, RunReport};
pub use store::{MeshRecord, Store};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Mean Earth radius used for all great-circle math, metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
