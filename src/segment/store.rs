//! Segment file format
//!
//! ```text
//! magic "CTSG" | u32 format version | bincode body | u32 crc32
//! ```
//!
//! The checksum covers everything before it. Files are written to a
//! temporary name, synced, then renamed into place.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use super::types::PostingListMeta;
use crate::error::CuttleError;
use crate::Result;

const MAGIC: &[u8; 4] = b"CTSG";
pub const FORMAT_VERSION: u32 = 1;

/// Serialized form of one indexed field
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldBody {
    pub name: String,
    pub options: u8,
    pub fst: Vec<u8>,
    pub term_meta: Vec<PostingListMeta>,
    pub postings: Vec<u8>,
    pub lengths: Vec<u8>,
    pub doc_values: Option<Vec<u8>>,
}

/// Serialized form of a whole segment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentBody {
    pub doc_count: u32,
    pub fields: Vec<FieldBody>,
    pub stored: Vec<u8>,
}

pub fn write_segment_file(path: &Path, body: &SegmentBody) -> Result<u64> {
    let mut bytes = Vec::with_capacity(4096);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bincode::serialize_into(&mut bytes, body)?;

    let mut hasher = Hasher::new();
    hasher.update(&bytes);
    bytes.extend_from_slice(&hasher.finalize().to_le_bytes());

    let tmp = path.with_extension("seg.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(bytes.len() as u64)
}

/// Read and verify a segment file. Returns the body and the file size.
pub fn read_segment_file(path: &Path) -> Result<(SegmentBody, u64)> {
    let bytes = fs::read(path)?;
    let corrupt = |msg: &str| CuttleError::CorruptSegment(format!("{}: {}", path.display(), msg));

    if bytes.len() < MAGIC.len() + 8 {
        return Err(corrupt("file too short"));
    }
    if &bytes[..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported format version {}", version)));
    }

    let (content, trailer) = bytes.split_at(bytes.len() - 4);
    let mut expected = [0u8; 4];
    expected.copy_from_slice(trailer);
    let mut hasher = Hasher::new();
    hasher.update(content);
    if hasher.finalize() != u32::from_le_bytes(expected) {
        return Err(corrupt("checksum mismatch"));
    }

    let body: SegmentBody = bincode::deserialize(&content[8..])?;
    Ok((body, bytes.len() as u64))
}
