//! Append-only placement ledgers.
//!
//! Both the generate-log and the resume ledger hold one line per way:
//!
//! ```text
//! <mesh path>|<lon> <lat> <heading>|<way id>
//! ```

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SceneryError};

pub const FINISHED_SUFFIX: &str = "_obj8";

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub path: PathBuf,
    pub lon: f64,
    pub lat: f64,
    pub heading: f64,
    pub way_id: i64,
}

impl LedgerEntry {
    pub fn new(path: impl Into<PathBuf>, lon: f64, lat: f64, way_id: i64) -> Self {
        Self {
            path: path.into(),
            lon,
            lat,
            heading: 0.0,
            way_id,
        }
    }

    /// `line` is 1-based and only used for error reporting.
    pub fn parse(text: &str, line: usize) -> Result<Self> {
        let malformed = |reason: &str| SceneryError::Ledger {
            line,
            reason: reason.to_owned(),
        };

        let mut fields = text.trim_end_matches(['\r', '\n']).split('|');
        let (Some(path), Some(placement), Some(way_id), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed("expected three '|' separated fields"));
        };

        if path.is_empty() {
            return Err(malformed("empty path"));
        }

        let numbers = placement
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| malformed(&format!("placement {placement:?}: {e}")))?;
        let &[lon, lat, heading] = numbers.as_slice() else {
            return Err(malformed("placement must be 'lon lat heading'"));
        };

        let way_id = way_id
            .trim()
            .parse::<i64>()
            .map_err(|e| malformed(&format!("way id {way_id:?}: {e}")))?;

        Ok(Self {
            path: PathBuf::from(path),
            lon,
            lat,
            heading,
            way_id,
        })
    }

    /// `lon lat heading`, the middle field of a ledger line.
    pub fn placement(&self) -> String {
        format!("{} {} {:.2}", self.lon, self.lat, self.heading)
    }
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.path.display(),
            self.placement(),
            self.way_id
        )
    }
}

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{entry}")?;
        Ok(())
    }

    /// All entries in write order; a missing file reads as empty.
    pub fn read_all(&self) -> Result<Vec<LedgerEntry>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(LedgerEntry::parse(&line, index + 1)?);
        }

        Ok(entries)
    }

    pub fn truncate(&self) -> Result<()> {
        File::create(&self.path)?;
        Ok(())
    }
}

/// `dir/name_osm.obj` becomes `dir/name_osm_obj8.obj`; already finished
/// paths are returned unchanged.
pub fn finished_path(mesh_path: &Path) -> PathBuf {
    let stem = mesh_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.ends_with(FINISHED_SUFFIX) {
        return mesh_path.to_path_buf();
    }
    mesh_path.with_file_name(format!("{stem}{FINISHED_SUFFIX}.obj"))
}

/// A finished artifact counts as done when it exists and is larger than
/// `min_bytes`. Read-only, so repeated checks agree.
pub fn resume_ready(finished: &Path, min_bytes: u64) -> bool {
    fs::metadata(finished)
        .map(|meta| meta.is_file() && meta.len() > min_bytes)
        .unwrap_or(false)
}
