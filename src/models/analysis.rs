use serde::{Deserialize, Serialize};

use super::document::{Document, FieldOptions};

/// Position and byte span of one token occurrence
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLocation {
    pub position: u32,
    pub start: u32,
    pub end: u32,
}

/// Frequency of a term within one field of one document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFreq {
    pub term: String,
    pub frequency: u32,
    /// Empty unless the field keeps term vectors.
    pub locations: Vec<TokenLocation>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedField {
    pub name: String,
    pub options: FieldOptions,
    /// Number of tokens produced, used for norms.
    pub length: u32,
    /// Sorted by term.
    pub tokens: Vec<TokenFreq>,
}

/// Output of analyzing one document, ready to be written to a segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub document: Document,
    pub fields: Vec<AnalyzedField>,
}

impl AnalysisResult {
    pub fn id(&self) -> &str {
        &self.document.id
    }

    pub fn field(&self, name: &str) -> Option<&AnalyzedField> {
        self.fields.iter().find(|f| f.name == name)
    }
}
