//! Per-way orchestration.
//!
//! For each way, in document order:
//!
//! 1. fetch the measurement chain (none at all is fatal)
//! 2. take the next filter position
//! 3. resume check: a finished artifact already on disk is recorded in the
//!    resume ledger and the way is done, without counting as skipped
//! 4. filter chain (may stop the whole run)
//! 5. planar walk, height, extrusion, mesh file + generate-log line
//! 6. mesh finishing (failure is fatal), then dedup indexing
//!
//! Counters live in the returned [`RunReport`].

use std::path::{Path, PathBuf};

use crate::config::{RunConfig, RunPaths};
use crate::dedup::{DedupIndexer, DedupOutcome, EdgeSignature};
use crate::dsf::DsfDocument;
use crate::error::{Result, SceneryError};
use crate::extrude::{base_polygon, BuildingMesh, Vertex};
use crate::filter::{FilterInput, FilterPipeline, FilterVerdict};
use crate::geodesic::{integrate_path, summarize, EdgeMeasurement, MeasurementProvider};
use crate::height::{HeightResolver, KeyRule, WayContext};
use crate::ledger::{finished_path, resume_ready, Ledger, LedgerEntry};
use crate::store::{MeshRecord, Store};

/// Input handed to the mesh-finishing step for one way.
#[derive(Debug, Clone)]
pub struct FinishJob {
    pub way_id: i64,
    pub mesh_path: PathBuf,
    /// Where the finished artifact is expected.
    pub finished_path: PathBuf,
    pub top_ring: Vec<Vertex>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishedMesh {
    pub finished_path: PathBuf,
    /// `None` when finishing did not report edge lengths; the way then
    /// gets a definition of its own.
    pub signature: Option<EdgeSignature>,
}

/// The external step that turns a raw mesh into a finished scenery object.
/// Called once per produced way, serially. Any error aborts the run.
pub trait MeshFinisher {
    fn finish(&mut self, job: &FinishJob, store: &Store) -> Result<FinishedMesh>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub ways_found: usize,
    pub processed: usize,
    pub skipped: usize,
    pub resumed: usize,
    pub definitions: usize,
    pub instances: usize,
    pub stopped_by_limit: bool,
}

impl RunReport {
    pub fn record_assembly(&mut self, doc: &DsfDocument) {
        self.definitions = doc.definitions().len();
        self.instances = doc.instances().len();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WayOutcome {
    Produced,
    Resumed,
    Skipped,
    Stop,
}

/// `debug_way_id`, when set, narrows the run to those ways, keeping
/// document order.
pub fn select_ways(all: Vec<i64>, debug_way_ids: Option<&[i64]>) -> Vec<i64> {
    match debug_way_ids {
        Some(wanted) if !wanted.is_empty() => {
            all.into_iter().filter(|id| wanted.contains(id)).collect()
        }
        _ => all,
    }
}

/// `<work>/xx_(<lat>_<lon>)_<way_id>_osm.obj`
pub fn mesh_path(work_folder: &Path, lat: f64, lon: f64, way_id: i64) -> PathBuf {
    work_folder.join(format!("xx_({lat}_{lon})_{way_id}_osm.obj"))
}

pub struct Pipeline<'a> {
    config: &'a RunConfig,
    paths: &'a RunPaths,
    store: &'a Store,
    provider: Box<dyn MeasurementProvider + 'a>,
    filters: FilterPipeline,
    heights: HeightResolver,
    key_rule: KeyRule,
    dedup: DedupIndexer,
    generate_log: Ledger,
    resume_ledger: Ledger,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a RunConfig, paths: &'a RunPaths, store: &'a Store) -> Self {
        Self {
            config,
            paths,
            store,
            provider: store.provider(config.measurement_backend()),
            filters: FilterPipeline::from_config(config),
            heights: HeightResolver::from_config(config),
            key_rule: KeyRule::new(&config.meta_keys),
            dedup: DedupIndexer::new(),
            generate_log: Ledger::new(&paths.generate_log),
            resume_ledger: Ledger::new(&paths.resume_ledger),
        }
    }

    pub fn run(&mut self, way_ids: &[i64], finisher: &mut dyn MeshFinisher) -> Result<RunReport> {
        self.generate_log.truncate()?;
        self.resume_ledger.truncate()?;

        let mut report = RunReport {
            ways_found: way_ids.len(),
            ..RunReport::default()
        };
        let mut position = 0usize;

        log::info!(
            "processing {} ways ({:?} measurements)",
            way_ids.len(),
            self.config.measurement_backend()
        );

        for &way_id in way_ids {
            let ordinal = report.processed as i64;
            match self.process_way(way_id, &mut position, ordinal, finisher)? {
                WayOutcome::Produced => report.processed += 1,
                WayOutcome::Resumed => report.resumed += 1,
                WayOutcome::Skipped => report.skipped += 1,
                WayOutcome::Stop => {
                    log::info!("limit of {} ways reached", self.config.limit);
                    report.stopped_by_limit = true;
                    break;
                }
            }
        }

        log::info!(
            "ways: {} produced, {} resumed, {} skipped of {}",
            report.processed,
            report.resumed,
            report.skipped,
            report.ways_found
        );
        Ok(report)
    }

    fn process_way(
        &mut self,
        way_id: i64,
        position: &mut usize,
        ordinal: i64,
        finisher: &mut dyn MeshFinisher,
    ) -> Result<WayOutcome> {
        let rows = self.provider.measure(way_id)?;
        let Some(summary) = summarize(&rows) else {
            return Err(SceneryError::NoMeasurements(way_id));
        };

        let raw_mesh = mesh_path(
            &self.paths.work_folder,
            summary.anchor_lat,
            summary.anchor_lon,
            way_id,
        );
        let finished = finished_path(&raw_mesh);

        // resumed ways take a position too
        *position += 1;

        if self.config.resume && resume_ready(&finished, self.config.resume_min_bytes) {
            log::info!("way {way_id}: {} exists, resuming", finished.display());
            let entry = LedgerEntry::new(&finished, summary.anchor_lon, summary.anchor_lat, way_id);
            self.resume_ledger.append(&entry)?;
            self.generate_log.append(&entry)?;
            return Ok(WayOutcome::Resumed);
        }

        let verdict = self.filters.evaluate(&FilterInput {
            position: *position,
            longest_edge: summary.longest_edge,
            perimeter: summary.perimeter,
        });
        match verdict {
            FilterVerdict::Admit => {}
            FilterVerdict::Skip(reason) => {
                log::info!("way {way_id}: skipped, {reason}");
                return Ok(WayOutcome::Skipped);
            }
            FilterVerdict::Stop => return Ok(WayOutcome::Stop),
        }

        self.produce(way_id, &rows, raw_mesh, finished, ordinal, finisher)
    }

    fn produce(
        &mut self,
        way_id: i64,
        rows: &[EdgeMeasurement],
        raw_mesh: PathBuf,
        finished: PathBuf,
        ordinal: i64,
        finisher: &mut dyn MeshFinisher,
    ) -> Result<WayOutcome> {
        let path = match integrate_path(rows) {
            Ok(path) => path,
            Err(e) if e.is_per_way() => {
                log::warn!("{e}");
                return Ok(WayOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let tags = self.store.way_tags(way_id, &self.key_rule)?;
        let resolution = self.heights.resolve(&WayContext {
            tags: &tags,
            longest_edge: path.longest_edge,
            perimeter: path.perimeter,
        });
        log::debug!(
            "way {way_id}: {} vertices, perimeter {:.2} m, height {:.2} m, {} levels",
            path.vertices.len(),
            path.perimeter,
            resolution.height,
            resolution.level_count
        );

        let mesh = BuildingMesh::extrude(way_id, base_polygon(&path), resolution);
        mesh.write_file(&raw_mesh)?;
        self.generate_log.append(&LedgerEntry::new(
            &raw_mesh,
            path.anchor_lon,
            path.anchor_lat,
            way_id,
        ))?;

        self.store.insert_mesh_record(&MeshRecord {
            ordinal,
            way_id,
            lat: path.anchor_lat,
            lon: path.anchor_lon,
            file_name_osm: raw_mesh.to_string_lossy().into_owned(),
            file_name_finished: None,
            signature: None,
            seq: None,
            similar_to_way_id: None,
            rotation: path.rotation,
        })?;

        let job = FinishJob {
            way_id,
            mesh_path: raw_mesh,
            finished_path: finished,
            top_ring: mesh.top_ring().to_vec(),
        };
        let done = finisher.finish(&job, self.store)?;

        self.store
            .set_finished_file(way_id, &done.finished_path.to_string_lossy())?;
        if let Some(signature) = &done.signature {
            self.store.set_edge_signature(way_id, signature)?;
        }

        let outcome = self.dedup.index(way_id, done.signature.as_ref());
        self.store.set_dedup_outcome(way_id, outcome)?;
        match outcome {
            DedupOutcome::Unique { seq } => log::info!("way {way_id}: produced, definition {seq}"),
            DedupOutcome::SimilarTo { way_id: other } => {
                log::info!("way {way_id}: produced, same shape as way {other}")
            }
        }

        Ok(WayOutcome::Produced)
    }
}
