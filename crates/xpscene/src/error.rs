use thiserror::Error;

pub type Result<T, E = SceneryError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum SceneryError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no measurement rows for way {0}")]
    NoMeasurements(i64),

    #[error("way {way_id}: only {usable} usable vertices, need at least 3")]
    TooFewVertices { way_id: i64, usable: usize },

    #[error("mesh finishing unavailable: {0}")]
    FinisherUnavailable(String),

    #[error("mesh finishing failed for way {way_id}: {reason}")]
    Finishing { way_id: i64, reason: String },

    #[error("malformed ledger line {line}: {reason}")]
    Ledger { line: usize, reason: String },

    #[error("scenery compiler failed: {0}")]
    Compiler(String),

    #[error("{count} helipads exceed the apt.dat limit of {max}")]
    TooManyHelipads { count: usize, max: usize },

    #[error("way {way_id} has no resolvable object definition")]
    DanglingDefinition { way_id: i64 },

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SceneryError {
    /// Errors that only cost the current way; the batch keeps going.
    pub fn is_per_way(&self) -> bool {
        matches!(self, SceneryError::TooFewVertices { .. })
    }
}
