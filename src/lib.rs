pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod models;
pub mod segment;
pub mod testing;

pub use analysis::{Analyzer, StandardAnalyzer};
pub use config::{AnalysisConfig, IndexConfig, PerformanceProfile, PersisterOptions};
pub use engine::{
    Callbacks, DocIdReader, DocValueReader, Event, EventKind, FieldDict, Index, IndexSnapshot,
    InternalId, RollbackPoint, StatsSnapshot, TermFieldDoc, TermFieldReader,
};
pub use error::{CuttleError, Result};
pub use models::*;
pub use segment::{Segment, SegmentPlugin, SegmentRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
