//! Relational store for one run.
//!
//! Tables (dropped and recreated per run):
//!
//! ```text
//! nodes         node_id PK, lat, lon
//! ways          seq, way_id, node_id          seq is 1-based per way
//! ways_meta     way_id, k, v                  PK (way_id, k)
//! mesh_records  ordinal, seq, way_id PK, lat, lon, file_name_osm,
//!               file_name_finished, edges, edges_length,
//!               edges_length_real, similar_to_way_id, rotation
//! ```
//!
//! A single connection, used sequentially. Math functions are registered on
//! the connection so the window-function measurement query does not depend
//! on how SQLite was compiled, and evaluates with the same Rust routines as
//! the in-process backend.

use std::path::Path;

use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::config::MeasurementBackend;
use crate::dedup::{DedupOutcome, EdgeSignature};
use crate::error::Result;
use crate::geodesic::{measure_sequenced, EdgeMeasurement, MeasurementProvider, Node};
use crate::height::{KeyRule, WayTags};
use crate::osm::{Element, OverpassDocument};

/// Elements per import transaction.
pub const IMPORT_COMMIT_INTERVAL: usize = 1000;

const SCHEMA: &str = "
    DROP TABLE IF EXISTS nodes;
    DROP TABLE IF EXISTS ways;
    DROP TABLE IF EXISTS ways_meta;
    DROP TABLE IF EXISTS mesh_records;

    CREATE TABLE nodes (
        node_id INTEGER PRIMARY KEY,
        lat REAL NOT NULL,
        lon REAL NOT NULL
    );

    CREATE TABLE ways (
        seq INTEGER NOT NULL,
        way_id INTEGER NOT NULL,
        node_id INTEGER NOT NULL
    );

    CREATE TABLE ways_meta (
        way_id INTEGER NOT NULL,
        k TEXT NOT NULL,
        v TEXT,
        PRIMARY KEY (way_id, k)
    );

    CREATE TABLE mesh_records (
        ordinal INTEGER NOT NULL,
        seq INTEGER,
        way_id INTEGER PRIMARY KEY,
        lat REAL NOT NULL,
        lon REAL NOT NULL,
        file_name_osm TEXT NOT NULL,
        file_name_finished TEXT,
        edges INTEGER,
        edges_length TEXT,
        edges_length_real TEXT,
        similar_to_way_id INTEGER,
        rotation REAL NOT NULL
    );
";

const INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS ways_way_seq ON ways (way_id, seq);
    CREATE INDEX IF NOT EXISTS mesh_records_seq ON mesh_records (seq);
";

/// Edge distance, bearing and perimeter for one way, entirely in SQL.
///
/// Expression shapes follow `geodesic::haversine_m` and
/// `geodesic::forward_bearing_deg` term by term.
pub const WINDOW_MEASUREMENT_SQL: &str = "
    WITH chain AS (
        SELECT w.seq, w.way_id, w.node_id, n.lat, n.lon,
               LEAD(n.lat) OVER win AS next_lat,
               LEAD(n.lon) OVER win AS next_lon,
               MAX(w.seq) OVER (PARTITION BY w.way_id) AS max_seq
        FROM ways w
        JOIN nodes n ON n.node_id = w.node_id
        WHERE w.way_id = ?1
        WINDOW win AS (PARTITION BY w.way_id ORDER BY w.seq)
    ),
    measured AS (
        SELECT seq, way_id, node_id, lat, lon, max_seq,
               2.0 * 6371000.0 * asin(sqrt(
                   pow(sin(radians(next_lat - lat) / 2.0), 2.0)
                   + cos(radians(lat)) * cos(radians(next_lat))
                     * pow(sin(radians(next_lon - lon) / 2.0), 2.0)
               )) AS raw_distance,
               mod(degrees(atan2(
                   sin(radians(next_lon - lon)) * cos(radians(next_lat)),
                   cos(radians(lat)) * sin(radians(next_lat))
                     - sin(radians(lat)) * cos(radians(next_lat)) * cos(radians(next_lon - lon))
               )) + 360.0, 360.0) AS raw_bearing
        FROM chain
    ),
    edges AS (
        SELECT seq, way_id, node_id, lat, lon, max_seq,
               CASE WHEN raw_distance > 0 THEN raw_distance END AS distance_to_next,
               CASE WHEN raw_distance > 0 THEN raw_bearing END AS bearing_to_next
        FROM measured
    )
    SELECT seq, way_id, node_id, lat, lon, distance_to_next, bearing_to_next,
           COALESCE(SUM(distance_to_next) OVER (PARTITION BY way_id), 0.0) AS perimeter,
           max_seq
    FROM edges
    ORDER BY seq
";

const MESH_RECORD_COLUMNS: &str = "ordinal, seq, way_id, lat, lon, file_name_osm, \
     file_name_finished, edges, edges_length, edges_length_real, similar_to_way_id, rotation";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub nodes: usize,
    pub ways: usize,
    pub tags: usize,
    pub ignored: usize,
}

/// Persisted lifecycle of one produced mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshRecord {
    /// Processing order within the run.
    pub ordinal: i64,
    pub way_id: i64,
    pub lat: f64,
    pub lon: f64,
    pub file_name_osm: String,
    pub file_name_finished: Option<String>,
    pub signature: Option<EdgeSignature>,
    pub seq: Option<u32>,
    pub similar_to_way_id: Option<i64>,
    pub rotation: f64,
}

impl MeshRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let edges: Option<u32> = row.get("edges")?;
        let rounded: Option<String> = row.get("edges_length")?;
        let exact: Option<String> = row.get("edges_length_real")?;

        let signature = match (edges, rounded, exact) {
            (Some(edge_count), Some(rounded), Some(exact)) => Some(EdgeSignature {
                edge_count,
                rounded,
                exact,
            }),
            _ => None,
        };

        Ok(Self {
            ordinal: row.get("ordinal")?,
            way_id: row.get("way_id")?,
            lat: row.get("lat")?,
            lon: row.get("lon")?,
            file_name_osm: row.get("file_name_osm")?,
            file_name_finished: row.get("file_name_finished")?,
            signature,
            seq: row.get("seq")?,
            similar_to_way_id: row.get("similar_to_way_id")?,
            rotation: row.get("rotation")?,
        })
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        register_math_functions(&conn)?;
        Ok(Self { conn })
    }

    pub fn reset_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn create_indexes(&self) -> Result<()> {
        self.conn.execute_batch(INDEXES)?;
        Ok(())
    }

    /// Load nodes, way chains and tags, committing every
    /// [`IMPORT_COMMIT_INTERVAL`] elements.
    pub fn import(&mut self, doc: &OverpassDocument) -> Result<ImportStats> {
        let mut stats = ImportStats::default();

        for chunk in doc.elements.chunks(IMPORT_COMMIT_INTERVAL) {
            let tx = self.conn.transaction()?;
            {
                let mut insert_node = tx.prepare_cached(
                    "INSERT OR REPLACE INTO nodes (node_id, lat, lon) VALUES (?1, ?2, ?3)",
                )?;
                let mut insert_way = tx.prepare_cached(
                    "INSERT INTO ways (seq, way_id, node_id) VALUES (?1, ?2, ?3)",
                )?;
                let mut insert_tag = tx.prepare_cached(
                    "INSERT OR REPLACE INTO ways_meta (way_id, k, v) VALUES (?1, ?2, ?3)",
                )?;

                for element in chunk {
                    match element {
                        Element::Node { id, lat, lon } => {
                            insert_node.execute(params![id, lat, lon])?;
                            stats.nodes += 1;
                        }
                        Element::Way { id, nodes, tags } => {
                            for (index, node_id) in nodes.iter().enumerate() {
                                insert_way.execute(params![index as i64 + 1, id, node_id])?;
                            }
                            for (k, v) in tags {
                                insert_tag.execute(params![id, k, v])?;
                            }
                            stats.ways += 1;
                            stats.tags += tags.len();
                        }
                        Element::Other => stats.ignored += 1,
                    }
                }
            }
            tx.commit()?;
            log::debug!("committed {} elements", chunk.len());
        }

        self.create_indexes()?;
        Ok(stats)
    }

    /// Nodes of a way in seq order, with their stored seq numbers.
    pub fn way_chain(&self, way_id: i64) -> Result<Vec<(u32, Node)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT w.seq, n.node_id, n.lat, n.lon
             FROM ways w
             JOIN nodes n ON n.node_id = w.node_id
             WHERE w.way_id = ?1
             ORDER BY w.seq",
        )?;

        let rows = stmt.query_map([way_id], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                Node {
                    id: row.get(1)?,
                    lat: row.get(2)?,
                    lon: row.get(3)?,
                },
            ))
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Tags of a way whose key passes `rule`.
    pub fn way_tags(&self, way_id: i64, rule: &KeyRule) -> Result<WayTags> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT k, v FROM ways_meta WHERE way_id = ?1")?;
        let rows = stmt.query_map([way_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut tags = WayTags::new();
        for row in rows {
            let (k, v) = row?;
            if let Some(v) = v.filter(|_| rule.matches(&k)) {
                tags.insert(k, v);
            }
        }
        Ok(tags)
    }

    pub fn window_measurements(&self, way_id: i64) -> Result<Vec<EdgeMeasurement>> {
        let mut stmt = self.conn.prepare_cached(WINDOW_MEASUREMENT_SQL)?;
        let rows = stmt.query_map([way_id], |row| {
            Ok(EdgeMeasurement {
                seq: row.get("seq")?,
                way_id: row.get("way_id")?,
                node_id: row.get("node_id")?,
                lat: row.get("lat")?,
                lon: row.get("lon")?,
                distance_to_next: row.get("distance_to_next")?,
                bearing_to_next: row.get("bearing_to_next")?,
                perimeter: row.get("perimeter")?,
                max_seq: row.get("max_seq")?,
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn provider(&self, backend: MeasurementBackend) -> Box<dyn MeasurementProvider + '_> {
        match backend {
            MeasurementBackend::InProcess => Box::new(InProcessMeasurement { store: self }),
            MeasurementBackend::WindowQuery => Box::new(WindowQueryMeasurement { store: self }),
        }
    }

    pub fn insert_mesh_record(&self, record: &MeshRecord) -> Result<()> {
        let signature = record.signature.as_ref();
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO mesh_records ({MESH_RECORD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                record.ordinal,
                record.seq,
                record.way_id,
                record.lat,
                record.lon,
                record.file_name_osm,
                record.file_name_finished,
                signature.map(|s| s.edge_count),
                signature.map(|s| s.rounded.as_str()),
                signature.map(|s| s.exact.as_str()),
                record.similar_to_way_id,
                record.rotation,
            ],
        )?;
        Ok(())
    }

    pub fn set_finished_file(&self, way_id: i64, file_name_finished: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE mesh_records SET file_name_finished = ?1 WHERE way_id = ?2",
            params![file_name_finished, way_id],
        )?;
        Ok(())
    }

    pub fn set_edge_signature(&self, way_id: i64, signature: &EdgeSignature) -> Result<()> {
        self.conn.execute(
            "UPDATE mesh_records SET edges = ?1, edges_length = ?2, edges_length_real = ?3
             WHERE way_id = ?4",
            params![signature.edge_count, signature.rounded, signature.exact, way_id],
        )?;
        Ok(())
    }

    /// Exactly one of `seq` / `similar_to_way_id` ends up set.
    pub fn set_dedup_outcome(&self, way_id: i64, outcome: DedupOutcome) -> Result<()> {
        let (seq, similar_to) = match outcome {
            DedupOutcome::Unique { seq } => (Some(seq), None),
            DedupOutcome::SimilarTo { way_id } => (None, Some(way_id)),
        };
        self.conn.execute(
            "UPDATE mesh_records SET seq = ?1, similar_to_way_id = ?2 WHERE way_id = ?3",
            params![seq, similar_to, way_id],
        )?;
        Ok(())
    }

    pub fn edge_signature(&self, way_id: i64) -> Result<Option<EdgeSignature>> {
        Ok(self.mesh_record(way_id)?.and_then(|r| r.signature))
    }

    pub fn mesh_record(&self, way_id: i64) -> Result<Option<MeshRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {MESH_RECORD_COLUMNS} FROM mesh_records WHERE way_id = ?1"),
                [way_id],
                MeshRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All records in processing order.
    pub fn mesh_records(&self) -> Result<Vec<MeshRecord>> {
        self.query_records(&format!(
            "SELECT {MESH_RECORD_COLUMNS} FROM mesh_records ORDER BY ordinal"
        ))
    }

    /// Records owning a definition, in seq order.
    pub fn definition_records(&self) -> Result<Vec<MeshRecord>> {
        self.query_records(&format!(
            "SELECT {MESH_RECORD_COLUMNS} FROM mesh_records WHERE seq IS NOT NULL ORDER BY seq"
        ))
    }

    fn query_records(&self, sql: &str) -> Result<Vec<MeshRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], MeshRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Node chain from the store, trigonometry in Rust.
pub struct InProcessMeasurement<'a> {
    store: &'a Store,
}

impl MeasurementProvider for InProcessMeasurement<'_> {
    fn measure(&self, way_id: i64) -> Result<Vec<EdgeMeasurement>> {
        let chain = self.store.way_chain(way_id)?;
        Ok(measure_sequenced(way_id, &chain))
    }
}

/// Everything in [`WINDOW_MEASUREMENT_SQL`].
pub struct WindowQueryMeasurement<'a> {
    store: &'a Store,
}

impl MeasurementProvider for WindowQueryMeasurement<'_> {
    fn measure(&self, way_id: i64) -> Result<Vec<EdgeMeasurement>> {
        self.store.window_measurements(way_id)
    }
}

fn register_math_functions(conn: &Connection) -> rusqlite::Result<()> {
    register_unary(conn, "radians", f64::to_radians)?;
    register_unary(conn, "degrees", f64::to_degrees)?;
    register_unary(conn, "sin", f64::sin)?;
    register_unary(conn, "cos", f64::cos)?;
    register_unary(conn, "asin", f64::asin)?;
    register_unary(conn, "sqrt", f64::sqrt)?;
    register_binary(conn, "atan2", f64::atan2)?;
    register_binary(conn, "pow", f64::powf)?;
    // SQLite's `%` truncates reals to integers first
    register_binary(conn, "mod", |a, b| a % b)?;
    Ok(())
}

fn math_flags() -> FunctionFlags {
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC
}

fn register_unary(conn: &Connection, name: &str, f: fn(f64) -> f64) -> rusqlite::Result<()> {
    conn.create_scalar_function(name, 1, math_flags(), move |ctx| {
        let x: Option<f64> = ctx.get(0)?;
        Ok(x.map(f))
    })
}

fn register_binary(
    conn: &Connection,
    name: &str,
    f: fn(f64, f64) -> f64,
) -> rusqlite::Result<()> {
    conn.create_scalar_function(name, 2, math_flags(), move |ctx| {
        let a: Option<f64> = ctx.get(0)?;
        let b: Option<f64> = ctx.get(1)?;
        Ok(a.zip(b).map(|(a, b)| f(a, b)))
    })
}

#[cfg(test)]
pub(crate) fn document_from_ways(ways: Vec<(i64, Vec<Node>, Vec<(&str, &str)>)>) -> OverpassDocument {
    let mut elements = Vec::new();
    for (way_id, nodes, tags) in ways {
        for node in &nodes {
            elements.push(Element::Node {
                id: node.id,
                lat: node.lat,
                lon: node.lon,
            });
        }
        elements.push(Element::Way {
            id: way_id,
            nodes: nodes.iter().map(|n| n.id).collect(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }
    OverpassDocument { elements }
}
