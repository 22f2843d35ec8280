//! Term dictionary using FST (Finite State Transducer)
//!
//! Each indexed field gets its own FST mapping term -> index into a
//! parallel metadata array. Range, prefix and fuzzy enumeration run as
//! FST automata; regular expressions walk the subtree under their literal
//! prefix and filter it.

use std::io;

use fst::automaton::{Levenshtein, Str};
use fst::{Automaton, IntoStreamer, Map, MapBuilder, Streamer};
use regex::Regex;

use super::types::{DictQuery, PostingListMeta};
use crate::error::CuttleError;
use crate::Result;

/// Largest edit distance the fuzzy automaton is built for
pub const MAX_FUZZY_DISTANCE: u8 = 2;

/// Term dictionary backed by FST
pub struct TermDictionary {
    fst: Map<Vec<u8>>,
    metadata: Vec<PostingListMeta>,
}

impl TermDictionary {
    pub fn new(fst_data: Vec<u8>, metadata: Vec<PostingListMeta>) -> io::Result<Self> {
        let fst = Map::new(fst_data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if fst.len() != metadata.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "term dictionary metadata length mismatch",
            ));
        }
        Ok(Self { fst, metadata })
    }

    /// Look up a term and return its postings metadata
    pub fn get(&self, term: &str) -> Option<&PostingListMeta> {
        self.fst
            .get(term.as_bytes())
            .and_then(|idx| self.metadata.get(idx as usize))
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn fst_bytes(&self) -> &[u8] {
        self.fst.as_fst().as_bytes()
    }

    pub fn metadata(&self) -> &[PostingListMeta] {
        &self.metadata
    }

    /// All terms in byte order
    pub fn iter_terms(&self) -> Vec<(String, PostingListMeta)> {
        self.drain(self.fst.stream(), |_| true)
    }

    /// Terms selected by `query`, in byte order
    pub fn search(&self, query: &DictQuery) -> Result<Vec<(String, PostingListMeta)>> {
        match query {
            DictQuery::All => Ok(self.iter_terms()),
            DictQuery::Range { start, end } => {
                let mut builder = self.fst.range();
                if let Some(start) = start {
                    builder = builder.ge(start.as_bytes());
                }
                if let Some(end) = end {
                    builder = builder.le(end.as_bytes());
                }
                Ok(self.drain(builder.into_stream(), |_| true))
            }
            DictQuery::Prefix(prefix) => {
                let aut = Str::new(prefix).starts_with();
                Ok(self.drain(self.fst.search(aut).into_stream(), |_| true))
            }
            DictQuery::Regexp(pattern) => {
                let re = Regex::new(&format!("^(?:{})$", pattern))?;
                // only terms under the literal prefix can match
                let prefix = literal_prefix(pattern);
                let aut = Str::new(&prefix).starts_with();
                Ok(self.drain(self.fst.search(aut).into_stream(), |t| re.is_match(t)))
            }
            DictQuery::Fuzzy { term, distance } => {
                if *distance > MAX_FUZZY_DISTANCE {
                    return Err(CuttleError::UnsupportedEditDistance(*distance));
                }
                let aut = Levenshtein::new(term, *distance as u32)
                    .map_err(|e| CuttleError::InvalidRequest(format!("fuzzy term: {}", e)))?;
                Ok(self.drain(self.fst.search(aut).into_stream(), |_| true))
            }
        }
    }

    fn drain<A: Automaton>(
        &self,
        mut stream: fst::map::Stream<'_, A>,
        keep: impl Fn(&str) -> bool,
    ) -> Vec<(String, PostingListMeta)> {
        let mut out = Vec::new();
        while let Some((key, idx)) = stream.next() {
            let Ok(term) = std::str::from_utf8(key) else {
                continue;
            };
            if !keep(term) {
                continue;
            }
            if let Some(meta) = self.metadata.get(idx as usize) {
                out.push((term.to_string(), *meta));
            }
        }
        out
    }
}

/// Leading characters every match of `pattern` must start with
fn literal_prefix(pattern: &str) -> String {
    if pattern.contains('|') {
        return String::new();
    }
    let mut prefix = String::new();
    for c in pattern.chars() {
        match c {
            '?' | '*' | '{' => {
                // the previous literal is optional
                prefix.pop();
                break;
            }
            '\\' | '.' | '+' | '(' | ')' | '[' | ']' | '}' | '^' | '$' => break,
            c => prefix.push(c),
        }
    }
    prefix
}

/// Builder for term dictionaries
#[derive(Default)]
pub struct TermDictionaryBuilder {
    terms: Vec<(String, PostingListMeta)>,
}

impl TermDictionaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            terms: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, term: String, meta: PostingListMeta) {
        self.terms.push((term, meta));
    }

    pub fn build(mut self) -> io::Result<TermDictionary> {
        // FST requires sorted, unique input
        self.terms.sort_by(|a, b| a.0.cmp(&b.0));
        self.terms.dedup_by(|a, b| a.0 == b.0);

        let mut fst_builder = MapBuilder::memory();
        let mut metadata = Vec::with_capacity(self.terms.len());
        for (idx, (term, meta)) in self.terms.into_iter().enumerate() {
            fst_builder
                .insert(term.as_bytes(), idx as u64)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            metadata.push(meta);
        }

        let fst_data = fst_builder
            .into_inner()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        TermDictionary::new(fst_data, metadata)
    }
}
