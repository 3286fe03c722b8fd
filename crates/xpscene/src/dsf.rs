//! DSF2TEXT assembly.
//!
//! Placements address definitions by zero-based emission order, so every
//! `OBJECT_DEF` line is written before the first `OBJECT` line.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{BoundingBox, RunConfig, RunPaths};
use crate::error::{Result, SceneryError};
use crate::ledger::{finished_path, Ledger, LedgerEntry};
use crate::store::{MeshRecord, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsfStrategy {
    /// One definition per produced or resumed mesh.
    UniqueOnly,
    /// One definition per distinct shape, shared through `similar_to_way_id`.
    DedupOptimized,
}

impl DsfStrategy {
    pub fn from_config(config: &RunConfig) -> Self {
        if config.use_sqlite_flow {
            DsfStrategy::DedupOptimized
        } else {
            DsfStrategy::UniqueOnly
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectInstance {
    pub definition: usize,
    pub lon: f64,
    pub lat: f64,
    pub heading: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DsfDocument {
    header: String,
    definitions: Vec<String>,
    instances: Vec<ObjectInstance>,
}

impl DsfDocument {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            ..Self::default()
        }
    }

    /// Returns the definition index to place with.
    pub fn define(&mut self, object_path: impl Into<String>) -> usize {
        self.definitions.push(object_path.into());
        self.definitions.len() - 1
    }

    pub fn place(&mut self, definition: usize, lon: f64, lat: f64) {
        debug_assert!(definition < self.definitions.len());
        self.instances.push(ObjectInstance {
            definition,
            lon,
            lat,
            heading: 0.0,
        });
    }

    pub fn definitions(&self) -> &[String] {
        &self.definitions
    }

    pub fn instances(&self) -> &[ObjectInstance] {
        &self.instances
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(
            self.header.len() + 64 * (self.definitions.len() + self.instances.len()),
        );

        out.push_str(self.header.trim_end());
        out.push_str("\n\n");

        for path in &self.definitions {
            let _ = writeln!(out, "OBJECT_DEF {path}");
        }
        if !self.definitions.is_empty() {
            out.push('\n');
        }
        for inst in &self.instances {
            let _ = writeln!(
                out,
                "OBJECT {} {} {} {:.2}",
                inst.definition, inst.lon, inst.lat, inst.heading
            );
        }

        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }
}

/// Header used when no template file is present.
pub fn default_header(bbox: &BoundingBox) -> String {
    let (south, west) = bbox.tile_origin();
    format!(
        "A\n800\nDSF2TEXT\n\n\
         PROPERTY sim/planet earth\n\
         PROPERTY sim/overlay 1\n\
         PROPERTY sim/require_object 1/0\n\
         PROPERTY sim/creation_agent osm2dsf {version}\n\
         PROPERTY sim/west {west}\n\
         PROPERTY sim/east {east}\n\
         PROPERTY sim/north {north}\n\
         PROPERTY sim/south {south}\n",
        version = crate::VERSION,
        east = west + 1,
        north = south + 1,
    )
}

pub fn load_header(config: &RunConfig) -> Result<String> {
    match fs::read_to_string(&config.dsf_template_file) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!(
                "DSF template {} not found; generating a default header",
                config.dsf_template_file.display()
            );
            Ok(default_header(&config.bbox()?))
        }
        Err(e) => Err(e.into()),
    }
}

pub struct DsfAssembler<'a> {
    config: &'a RunConfig,
    paths: &'a RunPaths,
}

impl<'a> DsfAssembler<'a> {
    pub fn new(config: &'a RunConfig, paths: &'a RunPaths) -> Self {
        Self { config, paths }
    }

    pub fn assemble(&self, strategy: DsfStrategy, store: &Store) -> Result<DsfDocument> {
        let header = load_header(self.config)?;
        let doc = match strategy {
            DsfStrategy::UniqueOnly => self.assemble_unique(header)?,
            DsfStrategy::DedupOptimized => self.assemble_dedup(header, store)?,
        };

        log::info!(
            "assembled {} definitions, {} placements ({strategy:?})",
            doc.definitions.len(),
            doc.instances.len()
        );
        Ok(doc)
    }

    /// Generate-log entries, then resumed ways the log does not already
    /// mention; each gets its own definition.
    fn assemble_unique(&self, header: String) -> Result<DsfDocument> {
        let mut doc = DsfDocument::new(header);
        let generated = Ledger::new(&self.paths.generate_log).read_all()?;
        let resumed = Ledger::new(&self.paths.resume_ledger).read_all()?;

        let mut seen = std::collections::HashSet::new();
        for entry in generated.iter().chain(&resumed) {
            if !seen.insert(entry.way_id) {
                continue;
            }
            let index = doc.define(self.object_path(&entry.path));
            doc.place(index, entry.lon, entry.lat);
        }

        Ok(doc)
    }

    /// Seq-numbered records, then resumed ways as definitions; placements
    /// for every record in processing order, then for the resumed ways.
    fn assemble_dedup(&self, header: String, store: &Store) -> Result<DsfDocument> {
        let mut doc = DsfDocument::new(header);
        let mut index_of: HashMap<i64, usize> = HashMap::new();

        for record in store.definition_records()? {
            let index = doc.define(self.object_path(&record_finished_path(&record)));
            index_of.insert(record.way_id, index);
        }

        let resumed: Vec<LedgerEntry> = Ledger::new(&self.paths.resume_ledger)
            .read_all()?
            .into_iter()
            .filter(|entry| !index_of.contains_key(&entry.way_id))
            .collect();
        let mut resumed_index = Vec::with_capacity(resumed.len());
        for entry in &resumed {
            resumed_index.push(doc.define(self.object_path(&entry.path)));
        }

        for record in store.mesh_records()? {
            let owner = record.similar_to_way_id.unwrap_or(record.way_id);
            let index = *index_of
                .get(&owner)
                .ok_or(SceneryError::DanglingDefinition {
                    way_id: record.way_id,
                })?;
            doc.place(index, record.lon, record.lat);
        }

        for (entry, index) in resumed.iter().zip(resumed_index) {
            doc.place(index, entry.lon, entry.lat);
        }

        Ok(doc)
    }

    /// `<lib_relative_path>/<finished file name>`, copying the artifact into
    /// the scenery library when one is configured.
    fn object_path(&self, mesh_path: &Path) -> String {
        let finished = finished_path(mesh_path);
        let file_name = finished
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Some(root) = &self.config.root_scenery_folder_to_copy_obj8_files {
            copy_into_library(&finished, &root.join(&self.config.lib_relative_path), &file_name);
        }

        let lib = self.config.lib_relative_path.replace('\\', "/");
        format!("{}/{file_name}", lib.trim_end_matches('/'))
    }
}

fn record_finished_path(record: &MeshRecord) -> PathBuf {
    match &record.file_name_finished {
        Some(name) => PathBuf::from(name),
        None => finished_path(Path::new(&record.file_name_osm)),
    }
}

fn copy_into_library(finished: &Path, library: &Path, file_name: &str) {
    let result = fs::create_dir_all(library).and_then(|_| fs::copy(finished, library.join(file_name)));
    match result {
        Ok(_) => log::debug!("copied {} to {}", finished.display(), library.display()),
        Err(e) => log::warn!(
            "failed to copy {} to {}: {e}",
            finished.display(),
            library.display()
        ),
    }
}

/// External text→binary DSF conversion.
pub trait SceneryCompiler {
    fn compile(&mut self, text: &Path, dsf: &Path) -> Result<()>;

    /// Command line a user can run by hand after a failure.
    fn manual_command(&self, text: &Path, dsf: &Path) -> String;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    Compiled(PathBuf),
    /// The text file is still there; `command` converts it later.
    Failed { command: String },
}

/// `dsf_obj8_<bbox>.txt` → `dsf_obj8_<bbox>.txt.dsf`
pub fn binary_path(text: &Path) -> PathBuf {
    let mut name = OsString::from(text.as_os_str());
    name.push(".dsf");
    PathBuf::from(name)
}

/// Compile, and on success copy the `.dsf` into the scenery root. Failure
/// only warns.
pub fn compile_or_warn(
    compiler: &mut dyn SceneryCompiler,
    text: &Path,
    scenery_root: Option<&Path>,
) -> CompileOutcome {
    let dsf = binary_path(text);

    if let Err(e) = compiler.compile(text, &dsf) {
        let command = compiler.manual_command(text, &dsf);
        log::warn!("DSF compilation failed: {e}");
        log::warn!("the DSF text is kept at {}; convert it manually with:", text.display());
        log::warn!("  {command}");
        return CompileOutcome::Failed { command };
    }

    if let Some(root) = scenery_root {
        if let Some(name) = dsf.file_name() {
            let target = root.join(name);
            match fs::copy(&dsf, &target) {
                Ok(_) => log::info!("copied {} to {}", dsf.display(), target.display()),
                Err(e) => log::warn!("failed to copy {} to {}: {e}", dsf.display(), root.display()),
            }
        }
    }

    CompileOutcome::Compiled(dsf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::dedup::DedupOutcome;

    fn record(ordinal: i64, way_id: i64, outcome: DedupOutcome) -> MeshRecord {
        let (seq, similar_to_way_id) = match outcome {
            DedupOutcome::Unique { seq } => (Some(seq), None),
            DedupOutcome::SimilarTo { way_id } => (None, Some(way_id)),
        };
        MeshRecord {
            ordinal,
            way_id,
            lat: 32.0 + ordinal as f64 / 100.0,
            lon: 34.8,
            file_name_osm: format!("out/xx_{way_id}_osm.obj"),
            file_name_finished: None,
            signature: None,
            seq,
            similar_to_way_id,
            rotation: 0.0,
        }
    }

    fn store_with(records: &[MeshRecord]) -> Store {
        let store = Store::open_in_memory().unwrap();
        store.reset_schema().unwrap();
        for r in records {
            store.insert_mesh_record(r).unwrap();
        }
        store
    }

    /// Every OBJECT line refers to an OBJECT_DEF already emitted.
    fn assert_defs_precede_objects(text: &str) {
        let mut defs = 0usize;
        let mut seen_object = false;
        for line in text.lines() {
            if line.starts_with("OBJECT_DEF ") {
                assert!(!seen_object, "definition after placement: {line}");
                defs += 1;
            } else if let Some(rest) = line.strip_prefix("OBJECT ") {
                seen_object = true;
                let index: usize = rest.split_whitespace().next().unwrap().parse().unwrap();
                assert!(index < defs, "{line} with {defs} definitions");
            }
        }
    }

    #[test]
    fn dedup_strategy_shares_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let paths = RunPaths::new(&config);
        paths.ensure_dirs().unwrap();

        let store = store_with(&[
            record(0, 100, DedupOutcome::Unique { seq: 1 }),
            record(1, 200, DedupOutcome::SimilarTo { way_id: 100 }),
            record(2, 300, DedupOutcome::Unique { seq: 2 }),
            record(3, 400, DedupOutcome::SimilarTo { way_id: 300 }),
        ]);
        Ledger::new(&paths.resume_ledger)
            .append(&LedgerEntry::new("out/xx_500_osm_obj8.obj", 35.0, 33.0, 500))
            .unwrap();

        let doc = DsfAssembler::new(&config, &paths)
            .assemble(DsfStrategy::DedupOptimized, &store)
            .unwrap();

        assert_eq!(
            doc.definitions(),
            &[
                "objects/xx_100_osm_obj8.obj",
                "objects/xx_300_osm_obj8.obj",
                "objects/xx_500_osm_obj8.obj"
            ]
        );
        let targets: Vec<usize> = doc.instances().iter().map(|i| i.definition).collect();
        assert_eq!(targets, vec![0, 0, 1, 1, 2]);
        assert_defs_precede_objects(&doc.render());
    }

    #[test]
    fn dangling_reference_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let paths = RunPaths::new(&config);

        let store = store_with(&[record(0, 200, DedupOutcome::SimilarTo { way_id: 999 })]);
        let err = DsfAssembler::new(&config, &paths)
            .assemble(DsfStrategy::DedupOptimized, &store)
            .unwrap_err();
        assert!(matches!(err, SceneryError::DanglingDefinition { way_id: 200 }));
    }

    #[test]
    fn unique_strategy_reads_both_ledgers() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let paths = RunPaths::new(&config);
        paths.ensure_dirs().unwrap();

        let generated = Ledger::new(&paths.generate_log);
        generated.append(&LedgerEntry::new("out/xx_1_osm.obj", 34.81, 32.01, 1)).unwrap();
        generated.append(&LedgerEntry::new("out/xx_2_osm_obj8.obj", 34.82, 32.02, 2)).unwrap();
        let resumed = Ledger::new(&paths.resume_ledger);
        resumed.append(&LedgerEntry::new("out/xx_2_osm_obj8.obj", 34.82, 32.02, 2)).unwrap();
        resumed.append(&LedgerEntry::new("out/xx_3_osm_obj8.obj", 34.83, 32.03, 3)).unwrap();

        let store = store_with(&[]);
        let doc = DsfAssembler::new(&config, &paths)
            .assemble(DsfStrategy::UniqueOnly, &store)
            .unwrap();

        assert_eq!(doc.definitions().len(), 3);
        assert_eq!(doc.definitions()[0], "objects/xx_1_osm_obj8.obj");
        let text = doc.render();
        assert!(text.contains("OBJECT 2 34.83 32.03 0.00"));
        assert_defs_precede_objects(&text);
    }

    #[test]
    fn default_header_covers_the_tile() {
        let bbox = BoundingBox::parse("32.05,34.75,32.1,34.9").unwrap();
        let header = default_header(&bbox);

        assert!(header.starts_with("A\n800\nDSF2TEXT\n"));
        assert!(header.contains("PROPERTY sim/west 34\n"));
        assert!(header.contains("PROPERTY sim/east 35\n"));
        assert!(header.contains("PROPERTY sim/south 32\n"));
        assert!(header.contains("PROPERTY sim/north 33\n"));
    }

    #[test]
    fn template_header_is_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.dsf_template_file = dir.path().join("dsf_template.tmpl");
        fs::write(&config.dsf_template_file, "I\n800\nDSF2TEXT\n# custom\n").unwrap();

        assert!(load_header(&config).unwrap().contains("# custom"));
    }

    #[test]
    fn library_copy_and_backslashes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.lib_relative_path = "objects\\osm".to_owned();
        config.root_scenery_folder_to_copy_obj8_files = Some(dir.path().join("scenery"));
        let paths = RunPaths::new(&config);

        let finished = dir.path().join("xx_9_osm_obj8.obj");
        fs::write(&finished, "A\n800\nOBJ\n").unwrap();

        let assembler = DsfAssembler::new(&config, &paths);
        let object = assembler.object_path(&finished);
        assert_eq!(object, "objects/osm/xx_9_osm_obj8.obj");

        // a missing artifact only warns
        let missing = assembler.object_path(&dir.path().join("gone_osm.obj"));
        assert_eq!(missing, "objects/osm/gone_osm_obj8.obj");
    }

    struct ScriptedCompiler {
        succeed: bool,
        calls: usize,
    }

    impl SceneryCompiler for ScriptedCompiler {
        fn compile(&mut self, _text: &Path, dsf: &Path) -> Result<()> {
            self.calls += 1;
            if self.succeed {
                fs::write(dsf, b"XPLNEDSF")?;
                Ok(())
            } else {
                Err(SceneryError::Compiler("DSFTool missing".into()))
            }
        }

        fn manual_command(&self, text: &Path, dsf: &Path) -> String {
            format!("DSFTool -text2dsf {} {}", text.display(), dsf.display())
        }
    }

    #[test]
    fn compiler_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("dsf_obj8_x.txt");
        fs::write(&text, "A\n").unwrap();

        let mut failing = ScriptedCompiler {
            succeed: false,
            calls: 0,
        };
        match compile_or_warn(&mut failing, &text, None) {
            CompileOutcome::Failed { command } => assert!(command.contains("-text2dsf")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(text.exists());

        let root = tempfile::tempdir().unwrap();
        let mut working = ScriptedCompiler {
            succeed: true,
            calls: 0,
        };
        let outcome = compile_or_warn(&mut working, &text, Some(root.path()));
        assert_eq!(outcome, CompileOutcome::Compiled(binary_path(&text)));
        assert!(root.path().join("dsf_obj8_x.txt.dsf").exists());
    }
}
