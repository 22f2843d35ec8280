//! Accumulates documents before they are frozen into a [`SegmentBase`]
//!
//! Used both for fresh batches (from analysis results) and for merges,
//! which replay live documents of the source segments in order.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use super::docvalues::TermColumnBuilder;
use super::postings::PostingsWriter;
use super::reader::{FieldData, SegmentBase};
use super::statistics::FieldLengths;
use super::stored::{StoredField, StoredFields};
use super::term_dict::TermDictionaryBuilder;
use crate::error::CuttleError;
use crate::models::{AnalysisResult, FieldOptions, FieldValue, TokenLocation, ID_FIELD};
use crate::Result;

struct PendingPosting {
    doc: u32,
    frequency: u32,
    locations: Vec<TokenLocation>,
}

struct FieldAccumulator {
    options: FieldOptions,
    terms: BTreeMap<String, Vec<PendingPosting>>,
    lengths: FieldLengths,
    doc_values: Option<TermColumnBuilder>,
}

impl FieldAccumulator {
    fn new(options: FieldOptions) -> Self {
        Self {
            options,
            terms: BTreeMap::new(),
            lengths: FieldLengths::default(),
            doc_values: options.includes_doc_values().then(TermColumnBuilder::new),
        }
    }
}

/// In-memory segment builder
#[derive(Default)]
pub struct SegmentBuilder {
    doc_count: u32,
    fields: BTreeMap<String, FieldAccumulator>,
    stored: StoredFields,
}

impl SegmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next document number
    pub fn add_document(&mut self) -> u32 {
        let doc = self.doc_count;
        self.doc_count += 1;
        doc
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    fn field_mut(&mut self, field: &str, options: FieldOptions) -> &mut FieldAccumulator {
        self.fields
            .entry(field.to_string())
            .or_insert_with(|| FieldAccumulator::new(options))
    }

    /// Record one term occurrence list for `doc`. Docs must be added in
    /// increasing order per term.
    pub fn add_term(
        &mut self,
        doc: u32,
        field: &str,
        options: FieldOptions,
        term: &str,
        frequency: u32,
        locations: Vec<TokenLocation>,
    ) {
        let acc = self.field_mut(field, options);
        acc.terms.entry(term.to_string()).or_default().push(PendingPosting {
            doc,
            frequency,
            locations,
        });
    }

    pub fn set_field_length(&mut self, doc: u32, field: &str, options: FieldOptions, length: u32) {
        self.field_mut(field, options).lengths.set(doc, length);
    }

    pub fn add_doc_value(&mut self, doc: u32, field: &str, options: FieldOptions, term: &str) {
        if let Some(dv) = self.field_mut(field, options).doc_values.as_mut() {
            dv.add(doc, std::iter::once(term.to_string()));
        }
    }

    pub fn set_stored(&mut self, doc: u32, fields: Vec<StoredField>) {
        self.stored.set(doc, fields);
    }

    /// Add an analyzed document, returning its doc number
    pub fn add_analyzed(&mut self, result: &AnalysisResult) -> u32 {
        let doc = self.add_document();

        for field in &result.fields {
            self.set_field_length(doc, &field.name, field.options, field.length);
            for tf in &field.tokens {
                self.add_term(
                    doc,
                    &field.name,
                    field.options,
                    &tf.term,
                    tf.frequency,
                    tf.locations.clone(),
                );
            }
            if field.options.includes_doc_values() {
                let acc = self.field_mut(&field.name, field.options);
                if let Some(dv) = acc.doc_values.as_mut() {
                    dv.add(doc, field.tokens.iter().map(|t| t.term.clone()));
                }
            }
        }

        let mut stored = vec![StoredField {
            name: ID_FIELD.to_string(),
            value: FieldValue::Keyword(result.document.id.clone()),
        }];
        stored.extend(
            result
                .document
                .fields
                .iter()
                .filter(|f| f.options.is_stored() && f.name != ID_FIELD)
                .map(|f| StoredField {
                    name: f.name.clone(),
                    value: f.value.clone(),
                }),
        );
        self.set_stored(doc, stored);

        doc
    }

    /// Freeze into an immutable segment
    pub fn build(self) -> Result<SegmentBase> {
        let doc_count = self.doc_count as usize;
        let mut fields = Vec::with_capacity(self.fields.len());

        for (name, acc) in self.fields {
            let mut writer = PostingsWriter::new(acc.options.includes_term_vectors());
            let mut dict = TermDictionaryBuilder::with_capacity(acc.terms.len());
            for (term, postings) in acc.terms {
                writer.start_list();
                for p in &postings {
                    writer.add(p.doc, p.frequency, &p.locations);
                }
                dict.add(term, writer.finish_list());
            }
            let dict = dict
                .build()
                .map_err(|e| CuttleError::Internal(format!("term dictionary for {}: {}", name, e)))?;

            let mut lengths = acc.lengths;
            lengths.resize(doc_count);

            fields.push(FieldData {
                name,
                options: acc.options,
                dict,
                postings: Bytes::from(writer.into_data()),
                lengths: Arc::new(lengths),
                doc_values: acc.doc_values.map(|dv| dv.build(doc_count)),
            });
        }

        let mut stored = self.stored;
        stored.resize(doc_count);

        Ok(SegmentBase::new(self.doc_count, fields, stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analyzer, StandardAnalyzer};
    use crate::config::AnalysisConfig;
    use crate::models::Document;
    use crate::segment::{DictQuery, Segment};

    fn build(docs: &[Document]) -> SegmentBase {
        let analyzer = StandardAnalyzer::new(&AnalysisConfig::default());
        let mut builder = SegmentBuilder::new();
        for d in docs {
            builder.add_analyzed(&analyzer.analyze(d).unwrap());
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_build_and_read_back() {
        let seg = build(&[
            Document::new("a").with_text("body", "hello world"),
            Document::new("b").with_text("body", "hello there"),
        ]);
        assert_eq!(seg.count(), 2);
        assert_eq!(seg.fields(), vec!["_id".to_string(), "body".to_string()]);

        let mut it = seg.postings("body", "hello", None, false).unwrap();
        assert_eq!(it.count(), 2);
        assert_eq!(it.next().unwrap().map(|p| p.doc), Some(0));
        assert_eq!(it.next().unwrap().map(|p| p.doc), Some(1));
        assert!(it.next().unwrap().is_none());

        let ids = seg.doc_numbers(&["b", "zzz"]).unwrap();
        assert_eq!(ids.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_except_filters_postings_and_dictionary() {
        let seg = build(&[
            Document::new("a").with_text("body", "apple"),
            Document::new("b").with_text("body", "apple banana"),
        ]);
        let except: roaring::RoaringBitmap = [1u32].into_iter().collect();
        let shared = Arc::new(except.clone());

        let mut it = seg.postings("body", "apple", Some(&shared), false).unwrap();
        // the iterator shares the bitmap rather than copying it
        assert_eq!(Arc::strong_count(&shared), 2);
        assert_eq!(it.count(), 1);
        assert_eq!(it.next().unwrap().map(|p| p.doc), Some(0));
        assert!(it.next().unwrap().is_none());

        let dict = seg.dictionary("body", &DictQuery::All, Some(&except)).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict[0].term, "apple");
        assert_eq!(dict[0].count, 1);
    }

    #[test]
    fn test_stored_and_doc_values() {
        let seg = build(&[Document::new("a")
            .with_text("body", "red green")
            .with_keyword("tag", "t1")]);

        let mut seen = Vec::new();
        seg.visit_stored(0, &mut |name, value| {
            seen.push((name.to_string(), value.as_str().to_string()));
            true
        })
        .unwrap();
        assert_eq!(seen[0], ("_id".to_string(), "a".to_string()));
        assert_eq!(seen.len(), 3);

        let mut dv = Vec::new();
        seg.visit_doc_values(0, &["body".to_string()], &mut |_, term| dv.push(term.to_string()))
            .unwrap();
        assert_eq!(dv, vec!["green", "red"]);
        assert_eq!(seg.field_length("body", 0), Some(2));
    }

    #[test]
    fn test_persist_and_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("000000000007.seg");
        let seg = build(&[Document::new("x").with_text("body", "persist me")]);
        seg.persist(&path).unwrap();

        let opened = SegmentBase::open(&path).unwrap();
        assert_eq!(opened.count(), 1);
        assert_eq!(opened.path(), Some(path.as_path()));
        assert_eq!(opened.term_count("body"), 2);
        assert_eq!(opened.doc_numbers(&["x"]).unwrap().len(), 1);
    }
}
