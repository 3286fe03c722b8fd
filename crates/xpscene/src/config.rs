//! Immutable run configuration.
//!
//! Loaded once from a JSON file; lines starting with `//` are comments.
//! Everything downstream borrows `&RunConfig` and never mutates it.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, SceneryError};

pub const DEFAULT_LIMIT: usize = 1000;
pub const DEFAULT_RESUME_MIN_BYTES: u64 = 500;
const NTH_MESH_BOUNDS: std::ops::RangeInclusive<u32> = 3..=10;
const NTH_MESH_FALLBACK: u32 = 5;

/// What a run produces from the Overpass document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Extruded building objects placed through a DSF.
    #[default]
    Obj,
    /// One apt.dat heliport entry per way.
    Helipad,
}

/// Which side computes the edge trigonometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementBackend {
    /// Node chain from the store, trigonometry in Rust.
    InProcess,
    /// Everything, math included, in one window-function query.
    WindowQuery,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// `south,west,north,east`
    pub osm_bbox: String,
    /// Cached Overpass response to import.
    pub osm_json_file: PathBuf,
    pub blender_bin: PathBuf,

    #[serde(default)]
    pub mode: RunMode,

    #[serde(default)]
    pub debug_way_id: Option<Vec<i64>>,

    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default = "default_height_keys")]
    pub height_keys_list: Vec<String>,

    #[serde(default)]
    pub level_keys_list: Vec<String>,

    /// Tag keys kept for height resolution; a trailing `*` is a prefix match.
    #[serde(default = "default_meta_keys")]
    pub meta_keys: Vec<String>,

    #[serde(default)]
    pub max_wall_length: f64,

    #[serde(default)]
    pub filter_out_obj_with_perimeter_greater_than: f64,

    #[serde(default)]
    pub filter_out_obj_with_perimeter_less_than: f64,

    #[serde(default)]
    pub filter_in_obj_with_perimeter_between: Option<Vec<f64>>,

    #[serde(default)]
    pub filter_out_every_nth_mesh: Option<u32>,

    #[serde(default = "default_true")]
    pub sqlite_support_math: bool,

    /// Dedup-optimized DSF assembly from mesh records.
    #[serde(default)]
    pub use_sqlite_flow: bool,

    #[serde(default = "default_work_folder")]
    pub script_work_folder: PathBuf,

    #[serde(default = "default_log_folder")]
    pub log_folder: PathBuf,

    #[serde(default = "default_temp_folder")]
    pub temp_folder: PathBuf,

    #[serde(default = "default_dsf_output")]
    pub output_folder_for_the_dsf_text: PathBuf,

    #[serde(default)]
    pub root_scenery_folder_to_copy_obj8_files: Option<PathBuf>,

    #[serde(default = "default_lib_relative_path")]
    pub lib_relative_path: String,

    #[serde(default = "default_dsf_template")]
    pub dsf_template_file: PathBuf,

    #[serde(default)]
    pub dsf_tool_bin: Option<PathBuf>,

    #[serde(default = "default_blend_file")]
    pub blender_blend_file: PathBuf,

    #[serde(default = "default_blender_script")]
    pub blender_script: PathBuf,

    #[serde(default = "default_true")]
    pub resume: bool,

    #[serde(default = "default_resume_min_bytes")]
    pub resume_min_bytes: u64,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_true() -> bool {
    true
}

fn default_height_keys() -> Vec<String> {
    vec!["height".to_owned()]
}

fn default_meta_keys() -> Vec<String> {
    vec!["build*".to_owned(), "amenity".to_owned(), "height".to_owned()]
}

fn default_work_folder() -> PathBuf {
    PathBuf::from("out")
}

fn default_log_folder() -> PathBuf {
    PathBuf::from("logs")
}

fn default_temp_folder() -> PathBuf {
    PathBuf::from("temp")
}

fn default_dsf_output() -> PathBuf {
    PathBuf::from(".")
}

fn default_lib_relative_path() -> String {
    "objects".to_owned()
}

fn default_dsf_template() -> PathBuf {
    PathBuf::from("dsf_template.tmpl")
}

fn default_blend_file() -> PathBuf {
    PathBuf::from("blender/empty.blend")
}

fn default_blender_script() -> PathBuf {
    PathBuf::from("blender/run_blender_script.py")
}

fn default_resume_min_bytes() -> u64 {
    DEFAULT_RESUME_MIN_BYTES
}

/// Drop `//` comment lines so the remainder is plain JSON.
pub fn strip_comment_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl RunConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let cleaned = strip_comment_lines(text);
        let config: RunConfig = serde_json::from_str(&cleaned)
            .map_err(|e| SceneryError::Config(e.to_string()))?;
        config.validated()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SceneryError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Check cross-field constraints and clamp the sampling modulus.
    fn validated(mut self) -> Result<Self> {
        self.bbox()?;

        if let Some(n) = self.filter_out_every_nth_mesh {
            if !NTH_MESH_BOUNDS.contains(&n) {
                log::warn!(
                    "filter_out_every_nth_mesh={n} is outside {}..={}; using {NTH_MESH_FALLBACK}",
                    NTH_MESH_BOUNDS.start(),
                    NTH_MESH_BOUNDS.end()
                );
                self.filter_out_every_nth_mesh = Some(NTH_MESH_FALLBACK);
            }
        }

        if let Some(range) = self.perimeter_between() {
            if range.0 > range.1 {
                return Err(SceneryError::Config(format!(
                    "filter_in_obj_with_perimeter_between: low {} > high {}",
                    range.0, range.1
                )));
            }
        }

        Ok(self)
    }

    pub fn bbox(&self) -> Result<BoundingBox> {
        BoundingBox::parse(&self.osm_bbox)
    }

    pub fn measurement_backend(&self) -> MeasurementBackend {
        if self.sqlite_support_math {
            MeasurementBackend::WindowQuery
        } else {
            MeasurementBackend::InProcess
        }
    }

    /// The `[low, high]` pair, when at least two values were configured.
    pub fn perimeter_between(&self) -> Option<(f64, f64)> {
        match self.filter_in_obj_with_perimeter_between.as_deref() {
            Some([low, high, ..]) => Some((*low, *high)),
            _ => None,
        }
    }

    /// `osm_bbox` with commas swapped out, used as a file-name postfix.
    pub fn bbox_postfix(&self) -> String {
        self.osm_bbox.replace(',', "_")
    }
}

/// Overpass bbox order: south, west, north, east.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn parse(text: &str) -> Result<Self> {
        let values: Vec<f64> = text
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SceneryError::Config(format!("osm_bbox {text:?}: {e}")))?;

        match values.as_slice() {
            &[south, west, north, east] => Ok(Self {
                south,
                west,
                north,
                east,
            }),
            _ => Err(SceneryError::Config(format!(
                "osm_bbox {text:?}: expected south,west,north,east"
            ))),
        }
    }

    /// South-west corner of the 1°×1° DSF tile holding this bbox.
    pub fn tile_origin(&self) -> (i32, i32) {
        (self.south.floor() as i32, self.west.floor() as i32)
    }
}

/// Every file location a run touches, derived once from the config.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub work_folder: PathBuf,
    pub log_folder: PathBuf,
    pub generate_log: PathBuf,
    pub resume_ledger: PathBuf,
    pub blend_log: PathBuf,
    pub database: PathBuf,
    pub dsf_text: PathBuf,
    pub helipad_apt_dat: PathBuf,
}

impl RunPaths {
    pub fn new(config: &RunConfig) -> Self {
        let postfix = config.bbox_postfix();
        let log_folder = config.log_folder.clone();

        Self {
            work_folder: config.script_work_folder.clone(),
            generate_log: log_folder.join(format!("obj_files_{postfix}.txt")),
            resume_ledger: log_folder.join(format!("obj_resume_files_{postfix}.txt")),
            blend_log: log_folder.join(format!("osm_to_obj_blend_log_{postfix}.txt")),
            database: config.temp_folder.join(format!("osmdb_{postfix}.sqlite")),
            dsf_text: config
                .output_folder_for_the_dsf_text
                .join(format!("dsf_obj8_{postfix}.txt")),
            helipad_apt_dat: config
                .script_work_folder
                .join(format!("apt_dat_helipads_[{postfix}].dat")),
            log_folder,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.work_folder)?;
        std::fs::create_dir_all(&self.log_folder)?;

        for file in [&self.database, &self.dsf_text] {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config(root: &Path) -> RunConfig {
    let json = serde_json::json!({
        "osm_bbox": "32.0,34.7,32.1,34.9",
        "osm_json_file": root.join("overpass.json"),
        "blender_bin": "/usr/bin/true",
        "script_work_folder": root.join("out"),
        "log_folder": root.join("logs"),
        "temp_folder": root.join("temp"),
        "output_folder_for_the_dsf_text": root.join("dsf"),
        "dsf_template_file": root.join("missing.tmpl"),
    });
    RunConfig::from_json_str(&json.to_string()).unwrap()
}
