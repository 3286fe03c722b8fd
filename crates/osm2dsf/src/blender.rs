//! Mesh finishing through a headless Blender process.
//!
//! Blender is started once per way:
//!
//! ```text
//! blender <empty.blend> --background --python <script> -- '<settings json>' <mesh.obj>
//! ```
//!
//! The script exports `<mesh>_obj8.obj` and writes the top-face edge
//! signature into the way's `mesh_records` row, which is read back here.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, warn};
use serde::Serialize;

use xpscene::{FinishJob, FinishedMesh, MeshFinisher, RunConfig, RunPaths, SceneryError, Store};

/// What the Blender script reads from its first argument.
#[derive(Debug, Serialize)]
struct ScriptSettings<'a> {
    db_file: &'a Path,
    way_id: i64,
    finished_file: &'a Path,
    blend_log: &'a Path,
    use_sqlite_flow: bool,
}

pub struct BlenderFinisher {
    blender_bin: PathBuf,
    blend_file: PathBuf,
    script: PathBuf,
    blend_log: PathBuf,
    database: PathBuf,
    use_sqlite_flow: bool,
}

impl BlenderFinisher {
    /// Fails when the configured Blender binary is not an existing file.
    pub fn new(config: &RunConfig, paths: &RunPaths) -> xpscene::Result<Self> {
        if !config.blender_bin.is_file() {
            return Err(SceneryError::FinisherUnavailable(format!(
                "blender_bin {} is not a file",
                config.blender_bin.display()
            )));
        }

        File::create(&paths.blend_log)?;

        Ok(Self {
            blender_bin: config.blender_bin.clone(),
            blend_file: config.blender_blend_file.clone(),
            script: config.blender_script.clone(),
            blend_log: paths.blend_log.clone(),
            database: paths.database.clone(),
            use_sqlite_flow: config.use_sqlite_flow,
        })
    }

    fn settings_json(&self, job: &FinishJob) -> xpscene::Result<String> {
        let settings = ScriptSettings {
            db_file: &self.database,
            way_id: job.way_id,
            finished_file: &job.finished_path,
            blend_log: &self.blend_log,
            use_sqlite_flow: self.use_sqlite_flow,
        };
        Ok(serde_json::to_string(&settings)?)
    }

    fn command(&self, job: &FinishJob) -> xpscene::Result<Command> {
        let mut command = Command::new(&self.blender_bin);
        command
            .arg(&self.blend_file)
            .arg("--background")
            .arg("--python")
            .arg(&self.script)
            .arg("--")
            .arg(self.settings_json(job)?)
            .arg(&job.mesh_path);
        Ok(command)
    }

    fn append_to_log(&self, way_id: i64, output: &Output) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.blend_log)
            .and_then(|mut log| {
                writeln!(log, "==== way {way_id}: {} ====", output.status)?;
                log.write_all(&output.stdout)?;
                log.write_all(&output.stderr)
            });

        if let Err(e) = result {
            warn!("failed to append to {}: {e}", self.blend_log.display());
        }
    }
}

impl MeshFinisher for BlenderFinisher {
    fn finish(&mut self, job: &FinishJob, store: &Store) -> xpscene::Result<FinishedMesh> {
        debug!("blender: {}", job.mesh_path.display());

        let output = self
            .command(job)?
            .output()
            .map_err(|e| SceneryError::Finishing {
                way_id: job.way_id,
                reason: format!("failed to start {}: {e}", self.blender_bin.display()),
            })?;
        self.append_to_log(job.way_id, &output);

        if !output.status.success() {
            return Err(SceneryError::Finishing {
                way_id: job.way_id,
                reason: format!("blender exited with {}", output.status),
            });
        }

        if !job.finished_path.is_file() {
            warn!(
                "way {}: blender finished but {} is missing",
                job.way_id,
                job.finished_path.display()
            );
        }

        let signature = store.edge_signature(job.way_id)?;
        if signature.is_none() {
            debug!("way {}: no edge signature reported", job.way_id);
        }

        Ok(FinishedMesh {
            finished_path: job.finished_path.clone(),
            signature,
        })
    }
}
