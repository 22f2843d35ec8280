pub mod analysis;
pub mod batch;
pub mod document;

pub use analysis::{AnalysisResult, AnalyzedField, TokenFreq, TokenLocation};
pub use batch::{Batch, PersistedCallback};
pub use document::{Document, Field, FieldOptions, FieldValue, ID_FIELD};
