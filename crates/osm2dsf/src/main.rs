mod blender;
mod dsftool;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};

use xpscene::dsf::{compile_or_warn, CompileOutcome, DsfAssembler};
use xpscene::osm::OverpassDocument;
use xpscene::pipeline::select_ways;
use xpscene::{helipad, DsfStrategy, Pipeline, RunConfig, RunMode, RunPaths, Store};

use crate::blender::BlenderFinisher;
use crate::dsftool::DsfTool;

#[derive(Parser, Debug, Clone)]
#[command(name = "osm2dsf", version)]
struct Args {
    /// JSON run configuration; lines starting with `//` are ignored.
    #[arg(default_value = "config.json")]
    config: PathBuf,

    /// Override the configured processing limit.
    #[arg(long)]
    limit: Option<usize>,

    /// Write the DSF text but do not run DSFTool.
    #[arg(long, default_value_t = false)]
    no_compile: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    run(Args::parse()).map_err(|e| {
        error!("{e:#}");
        e
    })
}

fn run(args: Args) -> Result<()> {
    let started = Instant::now();

    let mut config = RunConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(limit) = args.limit {
        config.limit = limit;
    }

    let paths = RunPaths::new(&config);
    paths
        .ensure_dirs()
        .context("creating work, log and output folders")?;

    if config.mode == RunMode::Helipad {
        return run_helipads(&config, &paths);
    }

    // Fail before importing anything when Blender is missing.
    let mut finisher = BlenderFinisher::new(&config, &paths)?;

    let doc = OverpassDocument::from_file(&config.osm_json_file)
        .with_context(|| format!("reading {}", config.osm_json_file.display()))?;

    let mut store = Store::open(&paths.database)
        .with_context(|| format!("opening {}", paths.database.display()))?;
    store.reset_schema()?;
    let stats = store.import(&doc)?;
    info!(
        "imported {} nodes, {} ways, {} tags into {} ({} elements ignored)",
        stats.nodes,
        stats.ways,
        stats.tags,
        paths.database.display(),
        stats.ignored
    );

    let way_ids = select_ways(doc.way_ids(), config.debug_way_id.as_deref());
    if way_ids.is_empty() {
        warn!("no ways to process");
    }

    let mut report = Pipeline::new(&config, &paths, &store).run(&way_ids, &mut finisher)?;

    let strategy = DsfStrategy::from_config(&config);
    let dsf = DsfAssembler::new(&config, &paths).assemble(strategy, &store)?;
    dsf.write_to(&paths.dsf_text)
        .with_context(|| format!("writing {}", paths.dsf_text.display()))?;
    report.record_assembly(&dsf);
    info!("wrote {}", paths.dsf_text.display());

    if args.no_compile {
        info!("skipping DSF compilation");
    } else {
        let mut tool = DsfTool::locate(&config);
        let root = config.root_scenery_folder_to_copy_obj8_files.as_deref();
        if let CompileOutcome::Compiled(binary) = compile_or_warn(&mut tool, &paths.dsf_text, root) {
            info!("binary DSF at {}", binary.display());
        }
    }

    info!(
        "{} ways found, {} processed, {} resumed, {} skipped{}",
        report.ways_found,
        report.processed,
        report.resumed,
        report.skipped,
        if report.stopped_by_limit { " (limit reached)" } else { "" }
    );
    info!(
        "{} object definitions, {} placements in {:.1?}",
        report.definitions,
        report.instances,
        started.elapsed()
    );

    Ok(())
}

fn run_helipads(config: &RunConfig, paths: &RunPaths) -> Result<()> {
    let doc = OverpassDocument::from_file(&config.osm_json_file)
        .with_context(|| format!("reading {}", config.osm_json_file.display()))?;

    let root = config.root_scenery_folder_to_copy_obj8_files.as_deref();
    let count = helipad::write_apt_dat(&doc, &paths.helipad_apt_dat, root)
        .with_context(|| format!("writing {}", paths.helipad_apt_dat.display()))?;
    info!("{count} helipads");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helipad_mode_needs_no_blender() {
        let dir = tempfile::tempdir().unwrap();
        let osm = dir.path().join("overpass.json");
        std::fs::write(
            &osm,
            serde_json::json!({"elements": [
                {"type": "node", "id": 1, "lat": 32.0, "lon": 34.8},
                {"type": "node", "id": 2, "lat": 32.0002, "lon": 34.8},
                {"type": "node", "id": 3, "lat": 32.0002, "lon": 34.8002},
                {"type": "way", "id": 7, "nodes": [1, 2, 3, 1], "tags": {"aeroway": "helipad"}},
            ]})
            .to_string(),
        )
        .unwrap();

        let work = dir.path().join("work");
        let config = dir.path().join("config.json");
        std::fs::write(
            &config,
            serde_json::json!({
                "mode": "helipad",
                "osm_bbox": "32.0,34.7,32.1,34.9",
                "osm_json_file": osm,
                "blender_bin": dir.path().join("no-blender"),
                "script_work_folder": work,
                "log_folder": dir.path().join("log"),
                "temp_folder": dir.path().join("tmp"),
                "output_folder_for_the_dsf_text": dir.path().join("out"),
            })
            .to_string(),
        )
        .unwrap();

        run(Args { config, limit: None, no_compile: true }).unwrap();

        let apt = std::fs::read_to_string(work.join("apt_dat_helipads_[32.0_34.7_32.1_34.9].dat")).unwrap();
        assert!(apt.contains("17   0 0 0 XOX0001 OSM To Xplane 1"));
        assert!(apt.ends_with("99\n"));
    }
}
