//! Immutable in-memory segment
//!
//! `SegmentBase` is the built-in segment: one FST dictionary, postings
//! region, length column and optional doc-values column per field, plus
//! the stored field section. Segments loaded from disk are read fully
//! into memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use roaring::RoaringBitmap;

use super::docvalues::TermColumn;
use super::plugin::{PostingsIterator, Segment};
use super::postings::PostingCursor;
use super::statistics::FieldLengths;
use super::store::{self, FieldBody, SegmentBody};
use super::stored::StoredFields;
use super::term_dict::TermDictionary;
use super::types::{DictEntry, DictQuery, Posting, PostingListMeta};
use super::writer::FstSegmentPlugin;
use crate::error::CuttleError;
use crate::models::{FieldOptions, FieldValue, ID_FIELD};
use crate::Result;

pub(crate) struct FieldData {
    pub name: String,
    pub options: FieldOptions,
    pub dict: TermDictionary,
    pub postings: Bytes,
    pub lengths: Arc<FieldLengths>,
    pub doc_values: Option<TermColumn>,
}

impl FieldData {
    fn cursor(&self, meta: &PostingListMeta) -> Result<PostingCursor> {
        let start = meta.offset as usize;
        let end = start + meta.length as usize;
        if end > self.postings.len() {
            return Err(CuttleError::CorruptSegment(format!(
                "posting list for field {} extends beyond data",
                self.name
            )));
        }
        PostingCursor::new(self.postings.slice(start..end))
    }

    /// Postings of `meta` not present in `except`
    fn live_count(&self, meta: &PostingListMeta, except: Option<&RoaringBitmap>) -> Result<u64> {
        match except {
            Some(except) if !except.is_empty() => {
                let mut cursor = self.cursor(meta)?;
                let mut n = 0;
                while let Some(p) = cursor.next()? {
                    if !except.contains(p.doc) {
                        n += 1;
                    }
                }
                Ok(n)
            }
            _ => Ok(meta.doc_frequency as u64),
        }
    }

    fn to_body(&self) -> FieldBody {
        FieldBody {
            name: self.name.clone(),
            options: self.options.bits(),
            fst: self.dict.fst_bytes().to_vec(),
            term_meta: self.dict.metadata().to_vec(),
            postings: self.postings.to_vec(),
            lengths: self.lengths.serialize(),
            doc_values: self.doc_values.as_ref().map(|c| c.serialize()),
        }
    }

    fn from_body(body: FieldBody) -> Result<Self> {
        let corrupt = |e: std::io::Error| {
            CuttleError::CorruptSegment(format!("field {}: {}", body.name, e))
        };
        let dict = TermDictionary::new(body.fst, body.term_meta).map_err(corrupt)?;
        let lengths = FieldLengths::deserialize(&body.lengths).map_err(corrupt)?;
        let doc_values = match &body.doc_values {
            Some(bytes) => Some(TermColumn::deserialize(bytes).map_err(corrupt)?),
            None => None,
        };
        Ok(Self {
            name: body.name,
            options: FieldOptions::from_bits(body.options),
            dict,
            postings: Bytes::from(body.postings),
            lengths: Arc::new(lengths),
            doc_values,
        })
    }
}

/// The built-in segment implementation
pub struct SegmentBase {
    doc_count: u32,
    fields: Vec<FieldData>,
    stored: StoredFields,
    size: u64,
    path: Option<PathBuf>,
}

impl SegmentBase {
    pub(crate) fn new(doc_count: u32, mut fields: Vec<FieldData>, stored: StoredFields) -> Self {
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        let size = fields
            .iter()
            .map(|f| {
                f.dict.fst_bytes().len() as u64
                    + f.postings.len() as u64
                    + 4 * f.lengths.len() as u64
            })
            .sum::<u64>()
            + stored.serialize().len() as u64;
        Self {
            doc_count,
            fields,
            stored,
            size,
            path: None,
        }
    }

    /// Load a persisted segment
    pub fn open(path: &Path) -> Result<Self> {
        let (body, file_size) = store::read_segment_file(path)?;
        let mut segment = Self::from_body(body)?;
        segment.size = file_size;
        segment.path = Some(path.to_path_buf());
        Ok(segment)
    }

    pub fn from_body(body: SegmentBody) -> Result<Self> {
        let stored = StoredFields::deserialize(&body.stored)
            .map_err(|e| CuttleError::CorruptSegment(format!("stored fields: {}", e)))?;
        let fields = body
            .fields
            .into_iter()
            .map(FieldData::from_body)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(body.doc_count, fields, stored))
    }

    pub fn to_body(&self) -> SegmentBody {
        SegmentBody {
            doc_count: self.doc_count,
            fields: self.fields.iter().map(FieldData::to_body).collect(),
            stored: self.stored.serialize(),
        }
    }

    fn field(&self, name: &str) -> Option<&FieldData> {
        self.fields
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.fields[i])
    }

    /// Number of distinct terms in `field`
    pub fn term_count(&self, field: &str) -> usize {
        self.field(field).map(|f| f.dict.len()).unwrap_or(0)
    }
}

impl Segment for SegmentBase {
    fn format(&self) -> (&'static str, u32) {
        (FstSegmentPlugin::KIND, FstSegmentPlugin::VERSION)
    }

    fn count(&self) -> u64 {
        self.doc_count as u64
    }

    fn size_in_bytes(&self) -> u64 {
        self.size
    }

    fn fields(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    fn field_options(&self, field: &str) -> Option<FieldOptions> {
        self.field(field).map(|f| f.options)
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn postings(
        &self,
        field: &str,
        term: &str,
        except: Option<&Arc<RoaringBitmap>>,
        include_locations: bool,
    ) -> Result<Box<dyn PostingsIterator>> {
        let Some(data) = self.field(field) else {
            return Ok(Box::new(SegmentPostings::empty()));
        };
        let Some(meta) = data.dict.get(term) else {
            return Ok(Box::new(SegmentPostings::empty()));
        };
        let count = data.live_count(meta, except.map(|e| &**e))?;
        Ok(Box::new(SegmentPostings {
            cursor: data.cursor(meta)?,
            except: except.filter(|e| !e.is_empty()).cloned(),
            lengths: Some(data.lengths.clone()),
            include_locations,
            count,
        }))
    }

    fn dictionary(
        &self,
        field: &str,
        query: &DictQuery,
        except: Option<&RoaringBitmap>,
    ) -> Result<Vec<DictEntry>> {
        let Some(data) = self.field(field) else {
            // still validate the query so errors don't depend on data
            if let DictQuery::Fuzzy { distance, .. } = query {
                if *distance > super::term_dict::MAX_FUZZY_DISTANCE {
                    return Err(CuttleError::UnsupportedEditDistance(*distance));
                }
            }
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (term, meta) in data.dict.search(query)? {
            let count = data.live_count(&meta, except)?;
            if count > 0 {
                out.push(DictEntry { term, count });
            }
        }
        Ok(out)
    }

    fn doc_numbers(&self, ids: &[&str]) -> Result<RoaringBitmap> {
        let mut out = RoaringBitmap::new();
        let Some(data) = self.field(ID_FIELD) else {
            return Ok(out);
        };
        for id in ids {
            if let Some(meta) = data.dict.get(id) {
                let mut cursor = data.cursor(meta)?;
                while let Some(p) = cursor.next()? {
                    out.insert(p.doc);
                }
            }
        }
        Ok(out)
    }

    fn visit_stored(
        &self,
        doc: u32,
        visitor: &mut dyn FnMut(&str, &FieldValue) -> bool,
    ) -> Result<()> {
        if let Some(fields) = self.stored.get(doc) {
            for f in fields {
                if !visitor(&f.name, &f.value) {
                    break;
                }
            }
        }
        Ok(())
    }

    fn field_length(&self, field: &str, doc: u32) -> Option<u32> {
        self.field(field).and_then(|f| f.lengths.get(doc))
    }

    fn doc_value_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.doc_values.is_some())
            .map(|f| f.name.clone())
            .collect()
    }

    fn visit_doc_values(
        &self,
        doc: u32,
        fields: &[String],
        visitor: &mut dyn FnMut(&str, &str),
    ) -> Result<()> {
        for name in fields {
            if let Some(column) = self.field(name).and_then(|f| f.doc_values.as_ref()) {
                for term in column.terms(doc) {
                    visitor(name, term);
                }
            }
        }
        Ok(())
    }

    fn persist(&self, path: &Path) -> Result<()> {
        store::write_segment_file(path, &self.to_body())?;
        Ok(())
    }
}

/// Postings iterator over a [`SegmentBase`] field
pub struct SegmentPostings {
    cursor: PostingCursor,
    except: Option<Arc<RoaringBitmap>>,
    lengths: Option<Arc<FieldLengths>>,
    include_locations: bool,
    count: u64,
}

impl SegmentPostings {
    fn empty() -> Self {
        Self {
            cursor: PostingCursor::empty(),
            except: None,
            lengths: None,
            include_locations: false,
            count: 0,
        }
    }

    fn finish(&self, mut p: Posting) -> Posting {
        if let Some(lengths) = &self.lengths {
            p.norm = lengths.norm(p.doc);
        }
        if !self.include_locations {
            p.locations.clear();
        }
        p
    }

    fn excluded(&self, doc: u32) -> bool {
        self.except.as_ref().map(|e| e.contains(doc)).unwrap_or(false)
    }
}

impl PostingsIterator for SegmentPostings {
    fn next(&mut self) -> Result<Option<Posting>> {
        while let Some(p) = self.cursor.next()? {
            if !self.excluded(p.doc) {
                return Ok(Some(self.finish(p)));
            }
        }
        Ok(None)
    }

    fn advance(&mut self, target: u32) -> Result<Option<Posting>> {
        match self.cursor.seek(target)? {
            Some(p) if self.excluded(p.doc) => self.next(),
            Some(p) => Ok(Some(self.finish(p))),
            None => Ok(None),
        }
    }

    fn reset(&mut self) {
        self.cursor.reset();
    }

    fn count(&self) -> u64 {
        self.count
    }
}
