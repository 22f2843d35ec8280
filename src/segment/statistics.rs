//! Per-field length statistics
//!
//! Every indexed field keeps the token count of each document so readers
//! can report a length norm alongside each posting.

use std::io;

use super::postings::{bitpack_decode, bitpack_encode, decode_vbyte, encode_vbyte};

/// Field lengths indexed by segment-local doc number
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldLengths {
    lengths: Vec<u32>,
    total: u64,
}

impl FieldLengths {
    pub fn with_doc_count(doc_count: usize) -> Self {
        Self {
            lengths: vec![0; doc_count],
            total: 0,
        }
    }

    /// Record the length for `doc`, growing the column if needed
    pub fn set(&mut self, doc: u32, length: u32) {
        let idx = doc as usize;
        if idx >= self.lengths.len() {
            self.lengths.resize(idx + 1, 0);
        }
        self.total -= self.lengths[idx] as u64;
        self.lengths[idx] = length;
        self.total += length as u64;
    }

    /// Grow to `doc_count` entries; never shrinks
    pub fn resize(&mut self, doc_count: usize) {
        if doc_count > self.lengths.len() {
            self.lengths.resize(doc_count, 0);
        }
    }

    pub fn get(&self, doc: u32) -> Option<u32> {
        self.lengths.get(doc as usize).copied()
    }

    /// Length norm: 1/sqrt(length), 0 for documents without the field
    pub fn norm(&self, doc: u32) -> f32 {
        match self.get(doc) {
            Some(len) if len > 0 => 1.0 / (len as f32).sqrt(),
            _ => 0.0,
        }
    }

    pub fn average(&self) -> f64 {
        let with_field = self.lengths.iter().filter(|&&l| l > 0).count();
        if with_field == 0 {
            0.0
        } else {
            self.total as f64 / with_field as f64
        }
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut output = Vec::new();
        encode_vbyte(self.lengths.len() as u32, &mut output);
        bitpack_encode(&self.lengths, &mut output);
        output
    }

    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let mut pos = 0;
        let count = decode_vbyte(data, &mut pos)? as usize;
        let lengths = bitpack_decode(data, &mut pos, count)?;
        let total = lengths.iter().map(|&l| l as u64).sum();
        Ok(Self { lengths, total })
    }
}
