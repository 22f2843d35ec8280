//! Read paths over an [`IndexSnapshot`]
//!
//! Everything here works on the immutable snapshot graph only. The single
//! lock taken is the per-snapshot pool of iterator buffers.
//!
//! Global document numbers are `offsets[segment] + local` and are handed
//! out as [`InternalId`]s.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use roaring::RoaringBitmap;

use super::snapshot::IndexSnapshot;
use super::stats::Stats;
use crate::error::CuttleError;
use crate::models::{Document, Field, FieldOptions, ID_FIELD};
use crate::segment::{DictEntry, DictQuery, Posting, PostingsIterator, MAX_FUZZY_DISTANCE};
use crate::Result;

/// Pooled iterator buffers kept per field
const MAX_POOLED_PER_FIELD: usize = 16;

/// Snapshot-local document number, 8 big-endian bytes
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternalId([u8; 8]);

impl InternalId {
    pub fn from_number(n: u64) -> Self {
        Self(n.to_be_bytes())
    }

    pub fn number(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| {
            CuttleError::InvalidRequest(format!("internal id must be 8 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(raw))
    }
}

impl From<u64> for InternalId {
    fn from(n: u64) -> Self {
        Self::from_number(n)
    }
}

impl fmt::Debug for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternalId({})", self.number())
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TermVector {
    pub field: String,
    pub position: u32,
    pub start: u32,
    pub end: u32,
}

/// One hit of a [`TermFieldReader`]
#[derive(Clone, Debug, PartialEq)]
pub struct TermFieldDoc {
    pub id: InternalId,
    pub term: String,
    /// Zero unless frequencies were requested
    pub freq: u64,
    /// Zero unless norms were requested
    pub norm: f32,
    pub vectors: Vec<TermVector>,
}

/// Postings of one term in one field across every segment of a snapshot
pub struct TermFieldReader {
    snapshot: Arc<IndexSnapshot>,
    term: String,
    field: String,
    iterators: Vec<Box<dyn PostingsIterator>>,
    segment_offset: usize,
    current: Option<u64>,
    count: u64,
    include_freq: bool,
    include_norm: bool,
    include_vectors: bool,
    closed: bool,
}

impl TermFieldReader {
    /// Next matching document in global order
    pub fn next(&mut self) -> Result<Option<TermFieldDoc>> {
        while self.segment_offset < self.iterators.len() {
            if let Some(p) = self.iterators[self.segment_offset].next()? {
                return Ok(Some(self.hit(self.segment_offset, p)));
            }
            self.segment_offset += 1;
        }
        Ok(None)
    }

    /// First match at or after `id`.
    ///
    /// When `id` is at or behind the current position the reader restarts
    /// from the first segment and seeks forward again.
    pub fn advance(&mut self, id: InternalId) -> Result<Option<TermFieldDoc>> {
        let target = id.number();
        if self.current.map(|c| c >= target).unwrap_or(false) {
            self.restart();
        }

        let Some((seg, local)) = self.snapshot.locate(target) else {
            self.segment_offset = self.iterators.len();
            return Ok(None);
        };
        if seg < self.segment_offset {
            return self.next();
        }

        self.segment_offset = seg;
        match self.iterators[seg].advance(local)? {
            Some(p) => Ok(Some(self.hit(seg, p))),
            None => self.next(),
        }
    }

    /// Matching documents, deletes excluded
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Return the iterator buffer to the snapshot pool. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(stats) = self.snapshot.stats() {
            Stats::inc(&stats.term_searchers_finished);
        }

        let mut buffer = std::mem::take(&mut self.iterators);
        buffer.clear();
        let mut pool = self.snapshot.reader_pool.lock();
        let pooled = pool.entry(self.field.clone()).or_default();
        if pooled.len() < MAX_POOLED_PER_FIELD {
            pooled.push(buffer);
        }
        Ok(())
    }

    fn restart(&mut self) {
        for it in &mut self.iterators {
            it.reset();
        }
        self.segment_offset = 0;
        self.current = None;
    }

    fn hit(&mut self, segment: usize, p: Posting) -> TermFieldDoc {
        let global = self.snapshot.offsets[segment] + p.doc as u64;
        self.current = Some(global);
        let vectors = if self.include_vectors {
            p.locations
                .iter()
                .map(|l| TermVector {
                    field: self.field.clone(),
                    position: l.position,
                    start: l.start,
                    end: l.end,
                })
                .collect()
        } else {
            Vec::new()
        };
        TermFieldDoc {
            id: InternalId::from_number(global),
            term: self.term.clone(),
            freq: if self.include_freq { p.frequency as u64 } else { 0 },
            norm: if self.include_norm { p.norm } else { 0.0 },
            vectors,
        }
    }
}

impl Drop for TermFieldReader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for TermFieldReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TermFieldReader")
            .field("field", &self.field)
            .field("term", &self.term)
            .field("epoch", &self.snapshot.epoch)
            .field("count", &self.count)
            .finish()
    }
}

/// Terms of a field with their live document counts, sorted by term
#[derive(Debug)]
pub struct FieldDict {
    entries: std::vec::IntoIter<DictEntry>,
}

impl FieldDict {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }
}

impl Iterator for FieldDict {
    type Item = DictEntry;

    fn next(&mut self) -> Option<DictEntry> {
        self.entries.next()
    }
}

/// k-way merge of sorted term cursors, summing counts of equal terms
pub(crate) fn merge_dict_cursors<I>(cursors: Vec<I>) -> Vec<DictEntry>
where
    I: Iterator<Item = DictEntry>,
{
    let mut cursors = cursors;
    let mut heap = BinaryHeap::new();
    for (i, cursor) in cursors.iter_mut().enumerate() {
        if let Some(e) = cursor.next() {
            heap.push(Reverse((e.term, i, e.count)));
        }
    }

    let mut out: Vec<DictEntry> = Vec::new();
    while let Some(Reverse((term, source, count))) = heap.pop() {
        match out.last_mut() {
            Some(last) if last.term == term => last.count += count,
            _ => out.push(DictEntry { term, count }),
        }
        if let Some(e) = cursors[source].next() {
            heap.push(Reverse((e.term, source, e.count)));
        }
    }
    out
}

/// Live documents in global order
#[derive(Debug)]
pub struct DocIdReader {
    snapshot: Arc<IndexSnapshot>,
    live: Vec<RoaringBitmap>,
    segment: usize,
    rank: u64,
}

impl DocIdReader {
    pub fn next(&mut self) -> Option<InternalId> {
        while self.segment < self.live.len() {
            if let Some(local) = self.live[self.segment].select(self.rank as u32) {
                self.rank += 1;
                return Some(InternalId::from_number(
                    self.snapshot.offsets[self.segment] + local as u64,
                ));
            }
            self.segment += 1;
            self.rank = 0;
        }
        None
    }

    /// First document at or after `id`
    pub fn advance(&mut self, id: InternalId) -> Option<InternalId> {
        let Some((seg, local)) = self.snapshot.locate(id.number()) else {
            self.segment = self.live.len();
            return None;
        };
        self.segment = seg;
        self.rank = if local == 0 {
            0
        } else {
            self.live[seg].rank(local - 1)
        };
        self.next()
    }

    /// Total documents this reader yields
    pub fn size(&self) -> u64 {
        self.live.iter().map(|b| b.len()).sum()
    }
}

/// Visits doc values of a fixed field set, document by document.
///
/// Fields a segment does not carry as native doc values are served from
/// the segment's uninverting cache. Which is which is recomputed only when
/// the visited segment changes.
pub struct DocValueReader {
    snapshot: Arc<IndexSnapshot>,
    fields: Vec<String>,
    last_segment: Option<usize>,
    native: Vec<String>,
    uninverted: Vec<String>,
}

impl DocValueReader {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn visit(&mut self, id: InternalId, visitor: &mut dyn FnMut(&str, &str)) -> Result<()> {
        let Some((seg, local)) = self.snapshot.locate(id.number()) else {
            return Ok(());
        };
        let snapshot = self.snapshot.clone();
        let ss = &snapshot.segments[seg];

        if self.last_segment != Some(seg) {
            let native = ss.segment().doc_value_fields();
            let (have, missing): (Vec<String>, Vec<String>) =
                self.fields.iter().cloned().partition(|f| native.contains(f));
            self.native = have;
            self.uninverted = missing;
            self.last_segment = Some(seg);
        }

        ss.segment().visit_doc_values(local, &self.native, visitor)?;
        for field in &self.uninverted {
            let docs = ss.cached().field(ss.segment().as_ref(), field)?;
            if let Some(terms) = docs.get(local as usize) {
                for term in terms {
                    visitor(field, term);
                }
            }
        }
        Ok(())
    }
}

impl IndexSnapshot {
    pub fn term_field_reader(
        self: &Arc<Self>,
        term: &str,
        field: &str,
        include_freq: bool,
        include_norm: bool,
        include_vectors: bool,
    ) -> Result<TermFieldReader> {
        let mut iterators = self
            .reader_pool
            .lock()
            .get_mut(field)
            .and_then(|p| p.pop())
            .unwrap_or_default();
        iterators.clear();

        let mut count = 0;
        for s in &self.segments {
            let it = s
                .segment()
                .postings(field, term, s.deleted_shared(), include_vectors)?;
            count += it.count();
            iterators.push(it);
        }

        if let Some(stats) = self.stats() {
            Stats::inc(&stats.term_searchers_started);
        }
        Ok(TermFieldReader {
            snapshot: self.clone(),
            term: term.to_string(),
            field: field.to_string(),
            iterators,
            segment_offset: 0,
            current: None,
            count,
            include_freq,
            include_norm,
            include_vectors,
            closed: false,
        })
    }

    pub fn field_dict(&self, field: &str) -> Result<FieldDict> {
        self.field_dict_query(field, &DictQuery::All)
    }

    /// Terms in `[start, end]`; `None` leaves that side open
    pub fn field_dict_range(
        &self,
        field: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<FieldDict> {
        self.field_dict_query(
            field,
            &DictQuery::Range {
                start: start.map(str::to_string),
                end: end.map(str::to_string),
            },
        )
    }

    pub fn field_dict_prefix(&self, field: &str, prefix: &str) -> Result<FieldDict> {
        self.field_dict_query(field, &DictQuery::Prefix(prefix.to_string()))
    }

    /// Terms fully matching `pattern`
    pub fn field_dict_regexp(&self, field: &str, pattern: &str) -> Result<FieldDict> {
        self.field_dict_query(field, &DictQuery::Regexp(pattern.to_string()))
    }

    /// Terms within `distance` edits of `term`; distances above 2 fail
    pub fn field_dict_fuzzy(&self, field: &str, term: &str, distance: u8) -> Result<FieldDict> {
        self.field_dict_query(
            field,
            &DictQuery::Fuzzy {
                term: term.to_string(),
                distance,
            },
        )
    }

    /// Fan out to every segment on scoped threads, fan in by term
    pub fn field_dict_query(&self, field: &str, query: &DictQuery) -> Result<FieldDict> {
        match query {
            DictQuery::Fuzzy { distance, .. } if *distance > MAX_FUZZY_DISTANCE => {
                return Err(CuttleError::UnsupportedEditDistance(*distance));
            }
            DictQuery::Regexp(pattern) => {
                regex::Regex::new(pattern)?;
            }
            _ => {}
        }

        let lists: Vec<Vec<DictEntry>> = if self.segments.len() <= 1 {
            self.segments
                .iter()
                .map(|s| s.segment().dictionary(field, query, s.deleted()))
                .collect::<Result<_>>()?
        } else {
            std::thread::scope(|scope| {
                let handles: Vec<_> = self
                    .segments
                    .iter()
                    .map(|s| scope.spawn(move || s.segment().dictionary(field, query, s.deleted())))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| -> Result<Vec<DictEntry>> {
                        h.join().map_err(|_| {
                            CuttleError::Internal("dictionary worker panicked".into())
                        })?
                    })
                    .collect::<Result<Vec<_>>>()
            })?
        };

        let cursors: Vec<_> = lists.into_iter().map(|l| l.into_iter()).collect();
        Ok(FieldDict {
            entries: merge_dict_cursors(cursors).into_iter(),
        })
    }

    pub fn doc_id_reader_all(self: &Arc<Self>) -> DocIdReader {
        DocIdReader {
            snapshot: self.clone(),
            live: self.segments.iter().map(|s| s.live_docs()).collect(),
            segment: 0,
            rank: 0,
        }
    }

    /// Live documents whose external id is in `ids`
    pub fn doc_id_reader_only(self: &Arc<Self>, ids: &[&str]) -> Result<DocIdReader> {
        let mut live = Vec::with_capacity(self.segments.len());
        for s in &self.segments {
            let mut docs = s.segment().doc_numbers(ids)?;
            if let Some(deleted) = s.deleted() {
                docs -= deleted;
            }
            live.push(docs);
        }
        Ok(DocIdReader {
            snapshot: self.clone(),
            live,
            segment: 0,
            rank: 0,
        })
    }

    pub fn doc_value_reader(self: &Arc<Self>, fields: &[&str]) -> DocValueReader {
        DocValueReader {
            snapshot: self.clone(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            last_segment: None,
            native: Vec::new(),
            uninverted: Vec::new(),
        }
    }

    /// Resolve an external id to its live global document number
    pub fn internal_id(&self, id: &str) -> Result<Option<InternalId>> {
        for (i, s) in self.segments.iter().enumerate().rev() {
            let mut docs = s.segment().doc_numbers(&[id])?;
            if let Some(deleted) = s.deleted() {
                docs -= deleted;
            }
            if let Some(local) = docs.min() {
                return Ok(Some(InternalId::from_number(self.offsets[i] + local as u64)));
            }
        }
        Ok(None)
    }

    pub fn external_id(&self, id: InternalId) -> Result<Option<String>> {
        let Some((seg, local)) = self.locate(id.number()) else {
            return Ok(None);
        };
        let mut found = None;
        self.segments[seg]
            .segment()
            .visit_stored(local, &mut |name, value| {
                if name == ID_FIELD {
                    found = Some(value.as_str().to_string());
                    return false;
                }
                true
            })?;
        Ok(found)
    }

    /// Stored fields of a live document
    pub fn document(&self, id: &str) -> Result<Option<Document>> {
        let Some(internal) = self.internal_id(id)? else {
            return Ok(None);
        };
        let Some((seg, local)) = self.locate(internal.number()) else {
            return Ok(None);
        };
        let segment = self.segments[seg].segment();

        let mut doc = Document::new(id);
        segment.visit_stored(local, &mut |name, value| {
            if name != ID_FIELD {
                let options = segment
                    .field_options(name)
                    .unwrap_or(FieldOptions::STORE);
                doc.add_field(Field {
                    name: name.to_string(),
                    value: value.clone(),
                    options,
                });
            }
            true
        })?;
        Ok(Some(doc))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::analysis::{Analyzer, StandardAnalyzer};
    use crate::config::AnalysisConfig;
    use crate::engine::snapshot::SegmentSnapshot;
    use crate::segment::{FstSegmentPlugin, Segment, SegmentPlugin};

    fn segment(docs: &[(&str, &str)]) -> Arc<dyn Segment> {
        let analyzer = StandardAnalyzer::new(&AnalysisConfig::default());
        let results: Vec<_> = docs
            .iter()
            .map(|(id, body)| analyzer.analyze(&Document::new(*id).with_text("body", *body)).unwrap())
            .collect();
        FstSegmentPlugin.build(&results).unwrap()
    }

    /// Two segments, "b" deleted from the first:
    /// globals 0:a 1:b(deleted) 2:c | 3:d 4:e
    fn snapshot() -> Arc<IndexSnapshot> {
        let first = SegmentSnapshot::new(
            1,
            segment(&[("a", "apple pie"), ("b", "apple tart"), ("c", "apple crumble")]),
            Some([1u32].into_iter().collect()),
        );
        let second = SegmentSnapshot::new(
            2,
            segment(&[("d", "apple juice"), ("e", "banana split")]),
            None,
        );
        Arc::new(IndexSnapshot::new(vec![first, second], BTreeMap::new(), 3, None))
    }

    fn drain(reader: &mut TermFieldReader) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some(hit) = reader.next().unwrap() {
            out.push(hit.id.number());
        }
        out
    }

    #[test]
    fn test_internal_id_bytes() {
        let id = InternalId::from_number(258);
        assert_eq!(id.as_bytes(), &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(InternalId::from_bytes(id.as_bytes()).unwrap(), id);
        assert!(InternalId::from_bytes(&[1, 2]).is_err());
        assert!(InternalId::from_number(3) < InternalId::from_number(256));
    }

    #[test]
    fn test_term_field_reader_walks_segments() {
        let snap = snapshot();
        let mut reader = snap.term_field_reader("apple", "body", true, true, false).unwrap();
        assert_eq!(reader.count(), 3);
        assert_eq!(drain(&mut reader), vec![0, 2, 3]);
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_term_field_reader_fills_requested_parts() {
        let snap = snapshot();
        let mut reader = snap.term_field_reader("apple", "body", true, true, true).unwrap();
        let hit = reader.next().unwrap().unwrap();
        assert_eq!(hit.freq, 1);
        assert!((hit.norm - 1.0 / 2f32.sqrt()).abs() < 1e-6);
        assert_eq!(hit.vectors.len(), 1);
        assert_eq!(hit.vectors[0].position, 0);

        let mut bare = snap.term_field_reader("apple", "body", false, false, false).unwrap();
        let hit = bare.next().unwrap().unwrap();
        assert_eq!(hit.freq, 0);
        assert_eq!(hit.norm, 0.0);
        assert!(hit.vectors.is_empty());
    }

    #[test]
    fn test_advance_forward_and_across_segments() {
        let snap = snapshot();
        let mut reader = snap.term_field_reader("apple", "body", false, false, false).unwrap();
        // deleted doc 1 is skipped
        assert_eq!(reader.advance(1.into()).unwrap().unwrap().id.number(), 2);
        assert_eq!(reader.advance(3.into()).unwrap().unwrap().id.number(), 3);
        assert!(reader.advance(4.into()).unwrap().is_none());
        assert!(reader.advance(99.into()).unwrap().is_none());
    }

    #[test]
    fn test_advance_backwards_restarts_from_the_beginning() {
        let snap = snapshot();
        let mut reader = snap.term_field_reader("apple", "body", false, false, false).unwrap();
        assert_eq!(drain(&mut reader)[..2], [0, 2]);

        // at or behind the current position: the reader starts over
        let hit = reader.advance(0.into()).unwrap().unwrap();
        assert_eq!(hit.id.number(), 0);
        assert_eq!(drain(&mut reader), vec![2, 3]);

        let hit = reader.advance(2.into()).unwrap().unwrap();
        assert_eq!(hit.id.number(), 2);
        let hit = reader.advance(2.into()).unwrap().unwrap();
        assert_eq!(hit.id.number(), 2);
    }

    #[test]
    fn test_reader_buffers_are_pooled() {
        let snap = snapshot();
        let mut reader = snap.term_field_reader("apple", "body", false, false, false).unwrap();
        reader.close().unwrap();
        reader.close().unwrap();
        assert_eq!(snap.reader_pool.lock().get("body").map(|p| p.len()), Some(1));

        let reader = snap.term_field_reader("pie", "body", false, false, false).unwrap();
        assert_eq!(snap.reader_pool.lock().get("body").map(|p| p.len()), Some(0));
        drop(reader);
        assert_eq!(snap.reader_pool.lock().get("body").map(|p| p.len()), Some(1));
    }

    #[test]
    fn test_field_dict_merges_counts() {
        let snap = snapshot();
        let terms: Vec<_> = snap
            .field_dict("body")
            .unwrap()
            .map(|e| (e.term, e.count))
            .collect();
        assert_eq!(
            terms,
            vec![
                ("apple".to_string(), 3),
                ("banana".to_string(), 1),
                ("crumble".to_string(), 1),
                ("juice".to_string(), 1),
                ("pie".to_string(), 1),
                ("split".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_field_dict_variants() {
        let snap = snapshot();
        let prefix: Vec<_> = snap.field_dict_prefix("body", "ba").unwrap().map(|e| e.term).collect();
        assert_eq!(prefix, vec!["banana"]);

        let range: Vec<_> = snap
            .field_dict_range("body", Some("c"), Some("p"))
            .unwrap()
            .map(|e| e.term)
            .collect();
        assert_eq!(range, vec!["crumble", "juice"]);

        let regexp: Vec<_> = snap.field_dict_regexp("body", "s.*").unwrap().map(|e| e.term).collect();
        assert_eq!(regexp, vec!["split"]);

        let fuzzy: Vec<_> = snap.field_dict_fuzzy("body", "appel", 2).unwrap().map(|e| e.term).collect();
        assert_eq!(fuzzy, vec!["apple"]);
    }

    #[test]
    fn test_fuzzy_distance_above_two_is_rejected() {
        let snap = snapshot();
        let err = snap.field_dict_fuzzy("body", "apple", 3).unwrap_err();
        assert!(matches!(err, CuttleError::UnsupportedEditDistance(3)));

        let empty = Arc::new(IndexSnapshot::empty(None));
        assert!(empty.field_dict_fuzzy("body", "apple", 5).is_err());
        assert!(empty.field_dict_regexp("body", "(").is_err());
    }

    #[test]
    fn test_merge_dict_cursors() {
        let e = |t: &str, c| DictEntry {
            term: t.to_string(),
            count: c,
        };
        let merged = merge_dict_cursors(vec![
            vec![e("a", 1), e("c", 2)].into_iter(),
            vec![].into_iter(),
            vec![e("a", 4), e("b", 1), e("c", 1)].into_iter(),
        ]);
        assert_eq!(merged, vec![e("a", 5), e("b", 1), e("c", 3)]);
    }

    #[test]
    fn test_identity_lookups() {
        let snap = snapshot();
        assert_eq!(snap.internal_id("c").unwrap(), Some(2.into()));
        assert_eq!(snap.internal_id("b").unwrap(), None);
        assert_eq!(snap.internal_id("zzz").unwrap(), None);
        assert_eq!(snap.external_id(3.into()).unwrap().as_deref(), Some("d"));
        assert_eq!(snap.external_id(50.into()).unwrap(), None);

        let doc = snap.document("e").unwrap().unwrap();
        assert_eq!(doc.id, "e");
        assert_eq!(doc.field("body").map(|f| f.value.as_str()), Some("banana split"));
        assert!(doc.field(ID_FIELD).is_none());
        assert!(snap.document("b").unwrap().is_none());
    }

    #[test]
    fn test_doc_id_readers() {
        let snap = snapshot();
        let mut all = snap.doc_id_reader_all();
        assert_eq!(all.size(), 4);
        let mut ids = Vec::new();
        while let Some(id) = all.next() {
            ids.push(id.number());
        }
        assert_eq!(ids, vec![0, 2, 3, 4]);

        let mut all = snap.doc_id_reader_all();
        assert_eq!(all.advance(1.into()).map(|i| i.number()), Some(2));
        assert_eq!(all.advance(4.into()).map(|i| i.number()), Some(4));
        assert_eq!(all.next(), None);

        let mut only = snap.doc_id_reader_only(&["b", "e", "a"]).unwrap();
        assert_eq!(only.next().map(|i| i.number()), Some(0));
        assert_eq!(only.next().map(|i| i.number()), Some(4));
        assert_eq!(only.next(), None);
    }

    #[test]
    fn test_doc_value_reader_caches_segment() {
        let snap = snapshot();
        let mut dv = snap.doc_value_reader(&["body", ID_FIELD]);
        let mut seen = Vec::new();
        dv.visit(3.into(), &mut |f, t| seen.push(format!("{f}={t}"))).unwrap();
        assert!(seen.contains(&"body=juice".to_string()));
        assert!(seen.contains(&"_id=d".to_string()));
        assert_eq!(dv.last_segment, Some(1));

        seen.clear();
        dv.visit(4.into(), &mut |f, t| seen.push(format!("{f}={t}"))).unwrap();
        assert!(seen.contains(&"body=banana".to_string()));
    }
}
