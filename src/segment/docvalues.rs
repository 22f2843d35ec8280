//! Column-stride doc values
//!
//! Each doc-values field is a multi-valued keyword column:
//! - dictionary of distinct terms (sorted) addressed by ordinal
//! - per-document ordinal counts and the flattened ordinal stream, both
//!   bitpacked

use std::collections::BTreeMap;
use std::io;

use super::postings::{bitpack_decode, bitpack_encode, decode_vbyte, encode_vbyte};

/// Builder collecting the terms of each document for one field
#[derive(Debug, Default)]
pub struct TermColumnBuilder {
    docs: Vec<Vec<String>>,
}

impl TermColumnBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, doc: u32, terms: impl IntoIterator<Item = String>) {
        let idx = doc as usize;
        if idx >= self.docs.len() {
            self.docs.resize_with(idx + 1, Vec::new);
        }
        self.docs[idx].extend(terms);
    }

    pub fn build(mut self, doc_count: usize) -> TermColumn {
        self.docs.resize_with(doc_count, Vec::new);

        let mut dictionary: BTreeMap<String, u32> = BTreeMap::new();
        for terms in &self.docs {
            for t in terms {
                dictionary.entry(t.clone()).or_insert(0);
            }
        }
        for (ord, v) in dictionary.values_mut().enumerate() {
            *v = ord as u32;
        }

        let mut counts = Vec::with_capacity(self.docs.len());
        let mut ordinals = Vec::new();
        for terms in &mut self.docs {
            terms.sort();
            terms.dedup();
            counts.push(terms.len() as u32);
            ordinals.extend(terms.iter().filter_map(|t| dictionary.get(t).copied()));
        }

        TermColumn::from_parts(dictionary.into_keys().collect(), counts, ordinals)
    }
}

/// Read side of a doc-values column
#[derive(Clone, Debug, PartialEq)]
pub struct TermColumn {
    dictionary: Vec<String>,
    counts: Vec<u32>,
    ordinals: Vec<u32>,
    /// Start of each document's ordinals in `ordinals`
    starts: Vec<usize>,
}

impl TermColumn {
    fn from_parts(dictionary: Vec<String>, counts: Vec<u32>, ordinals: Vec<u32>) -> Self {
        let mut starts = Vec::with_capacity(counts.len());
        let mut acc = 0usize;
        for &c in &counts {
            starts.push(acc);
            acc += c as usize;
        }
        Self {
            dictionary,
            counts,
            ordinals,
            starts,
        }
    }

    /// Terms of `doc`, in sorted order
    pub fn terms(&self, doc: u32) -> impl Iterator<Item = &str> {
        let idx = doc as usize;
        let (start, count) = match (self.starts.get(idx), self.counts.get(idx)) {
            (Some(&s), Some(&c)) => (s, c as usize),
            _ => (0, 0),
        };
        self.ordinals
            .get(start..start + count)
            .unwrap_or(&[])
            .iter()
            .filter_map(|&ord| self.dictionary.get(ord as usize).map(|s| s.as_str()))
    }

    pub fn doc_count(&self) -> usize {
        self.counts.len()
    }

    pub fn cardinality(&self) -> usize {
        self.dictionary.len()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut output = Vec::new();

        encode_vbyte(self.dictionary.len() as u32, &mut output);
        for term in &self.dictionary {
            encode_vbyte(term.len() as u32, &mut output);
            output.extend_from_slice(term.as_bytes());
        }

        encode_vbyte(self.counts.len() as u32, &mut output);
        bitpack_encode(&self.counts, &mut output);
        encode_vbyte(self.ordinals.len() as u32, &mut output);
        bitpack_encode(&self.ordinals, &mut output);
        output
    }

    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let mut pos = 0;

        let dict_len = decode_vbyte(data, &mut pos)? as usize;
        let mut dictionary = Vec::with_capacity(dict_len);
        for _ in 0..dict_len {
            let len = decode_vbyte(data, &mut pos)? as usize;
            let bytes = data.get(pos..pos + len).ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "doc values term truncated")
            })?;
            let term = String::from_utf8(bytes.to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            dictionary.push(term);
            pos += len;
        }

        let doc_count = decode_vbyte(data, &mut pos)? as usize;
        let counts = bitpack_decode(data, &mut pos, doc_count)?;
        let ord_count = decode_vbyte(data, &mut pos)? as usize;
        let ordinals = bitpack_decode(data, &mut pos, ord_count)?;

        Ok(Self::from_parts(dictionary, counts, ordinals))
    }
}
