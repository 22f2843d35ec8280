//! Core types shared by segment implementations

use serde::{Deserialize, Serialize};

use crate::models::TokenLocation;

/// Postings are grouped into fixed-size blocks with one skip entry each.
pub const BLOCK_SIZE: usize = 128;

/// Marker in merge remap tables for documents that did not survive.
pub const DOC_DROPPED: u64 = u64::MAX;

/// Segment file extension
pub const SEGMENT_FILE_EXT: &str = "seg";

/// File name for a persisted segment id
pub fn segment_file_name(id: u64) -> String {
    format!("{:012x}.{}", id, SEGMENT_FILE_EXT)
}

/// Parse a segment id back out of a file name produced by
/// [`segment_file_name`].
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(SEGMENT_FILE_EXT)?.strip_suffix('.')?;
    u64::from_str_radix(stem, 16).ok()
}

/// A single posting as seen by readers
#[derive(Clone, Debug, PartialEq)]
pub struct Posting {
    /// Segment-local document number
    pub doc: u32,
    pub frequency: u32,
    /// 1 / sqrt(field length)
    pub norm: f32,
    pub locations: Vec<TokenLocation>,
}

impl Posting {
    pub fn new(doc: u32, frequency: u32) -> Self {
        Self {
            doc,
            frequency,
            norm: 1.0,
            locations: Vec::new(),
        }
    }
}

/// Posting list metadata stored in the term dictionary
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingListMeta {
    /// Offset in the field's postings data
    pub offset: u64,
    /// Length in bytes
    pub length: u64,
    /// Number of documents containing the term
    pub doc_frequency: u32,
    /// Total term frequency across all documents
    pub total_term_frequency: u64,
}

/// Term returned by dictionary enumeration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DictEntry {
    pub term: String,
    /// Live documents containing the term
    pub count: u64,
}

/// Selection of terms for a dictionary enumeration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DictQuery {
    All,
    /// Inclusive on both ends; `None` is unbounded.
    Range {
        start: Option<String>,
        end: Option<String>,
    },
    Prefix(String),
    /// Pattern must match the whole term.
    Regexp(String),
    Fuzzy { term: String, distance: u8 },
}

impl DictQuery {
    pub fn range(start: impl Into<String>, end: impl Into<String>) -> Self {
        DictQuery::Range {
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_file_name_round_trip() {
        let name = segment_file_name(42);
        assert_eq!(name, "00000000002a.seg");
        assert_eq!(parse_segment_file_name(&name), Some(42));
        assert_eq!(parse_segment_file_name("catalog"), None);
        assert_eq!(parse_segment_file_name("zz.seg"), None);
    }
}
