//! Stored field section
//!
//! Dense per-document records of the fields marked `STORE`, always led by
//! the `_id` keyword.

use std::io;

use super::postings::{decode_vbyte, encode_vbyte};
use crate::models::FieldValue;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredField {
    pub name: String,
    pub value: FieldValue,
}

/// Stored fields for every document of a segment
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredFields {
    docs: Vec<Vec<StoredField>>,
}

impl StoredFields {
    pub fn with_doc_count(doc_count: usize) -> Self {
        Self {
            docs: vec![Vec::new(); doc_count],
        }
    }

    pub fn set(&mut self, doc: u32, fields: Vec<StoredField>) {
        let idx = doc as usize;
        if idx >= self.docs.len() {
            self.docs.resize_with(idx + 1, Vec::new);
        }
        self.docs[idx] = fields;
    }

    /// Grow to `doc_count` entries; never shrinks
    pub fn resize(&mut self, doc_count: usize) {
        if doc_count > self.docs.len() {
            self.docs.resize_with(doc_count, Vec::new);
        }
    }

    pub fn get(&self, doc: u32) -> Option<&[StoredField]> {
        self.docs.get(doc as usize).map(|d| d.as_slice())
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut output = Vec::new();
        encode_vbyte(self.docs.len() as u32, &mut output);
        for fields in &self.docs {
            encode_vbyte(fields.len() as u32, &mut output);
            for f in fields {
                write_str(&f.name, &mut output);
                output.push(f.value.kind());
                write_str(f.value.as_str(), &mut output);
            }
        }
        output
    }

    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let mut pos = 0;
        let count = decode_vbyte(data, &mut pos)? as usize;
        let mut docs = Vec::with_capacity(count);
        for _ in 0..count {
            let n = decode_vbyte(data, &mut pos)? as usize;
            let mut fields = Vec::with_capacity(n);
            for _ in 0..n {
                let name = read_str(data, &mut pos)?;
                let kind = *data.get(pos).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::UnexpectedEof, "stored field kind missing")
                })?;
                pos += 1;
                let value = read_str(data, &mut pos)?;
                fields.push(StoredField {
                    name,
                    value: FieldValue::from_kind(kind, value),
                });
            }
            docs.push(fields);
        }
        Ok(Self { docs })
    }
}

fn write_str(s: &str, output: &mut Vec<u8>) {
    encode_vbyte(s.len() as u32, output);
    output.extend_from_slice(s.as_bytes());
}

fn read_str(data: &[u8], pos: &mut usize) -> io::Result<String> {
    let len = decode_vbyte(data, pos)? as usize;
    let bytes = data
        .get(*pos..*pos + len)
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "stored string truncated"))?;
    *pos += len;
    String::from_utf8(bytes.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
