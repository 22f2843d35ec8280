use thiserror::Error;

/// Main error type for cuttle operations
#[derive(Error, Debug)]
pub enum CuttleError {
    /// The index has been closed (or is closing) and accepts no more work.
    #[error("index is closed")]
    Closed,

    #[error("unknown snapshot epoch: {0}")]
    UnknownEpoch(u64),

    #[error("fuzzy edit distance {0} is not supported (max 2)")]
    UnsupportedEditDistance(u8),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Corrupt segment: {0}")]
    CorruptSegment(String),

    #[error("Unknown segment plugin: {kind} v{version}")]
    UnknownSegmentPlugin { kind: String, version: u32 },

    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for cuttle operations
pub type Result<T> = std::result::Result<T, CuttleError>;

impl CuttleError {
    /// True when the error came from an index that is shutting down.
    pub fn is_closed(&self) -> bool {
        matches!(self, CuttleError::Closed)
    }

    /// Errors raised by the on-disk layer (catalog, segment files, io).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            CuttleError::Io(_) | CuttleError::Catalog(_) | CuttleError::CorruptSegment(_)
        )
    }
}
