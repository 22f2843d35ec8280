//! Immutable point-in-time views of the index
//!
//! An [`IndexSnapshot`] is shared through `Arc`: cloning the `Arc` takes a
//! reference and dropping it releases one. When the last reference to a
//! snapshot goes away its segment references are released with it and the
//! epoch is reported to the [`EpochTracker`] so the persister may drop it
//! from the catalog.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use roaring::RoaringBitmap;

use super::stats::Stats;
use crate::segment::{segment_file_name, DictQuery, PostingsIterator, Segment};
use crate::Result;

/// Tracks the root epoch and the epochs no snapshot refers to anymore
#[derive(Debug, Default)]
pub(crate) struct EpochTracker {
    root_epoch: AtomicU64,
    eligible: Mutex<Vec<u64>>,
}

impl EpochTracker {
    pub(crate) fn set_root(&self, epoch: u64) {
        self.root_epoch.store(epoch, Ordering::SeqCst);
    }

    pub(crate) fn root_epoch(&self) -> u64 {
        self.root_epoch.load(Ordering::SeqCst)
    }

    /// A snapshot of `epoch` was dropped
    pub(crate) fn release(&self, epoch: u64) {
        if epoch != self.root_epoch() {
            self.eligible.lock().push(epoch);
        }
    }

    pub(crate) fn mark_eligible(&self, epoch: u64) {
        self.eligible.lock().push(epoch);
    }

    pub(crate) fn take_eligible(&self) -> Vec<u64> {
        std::mem::take(&mut *self.eligible.lock())
    }

    /// Put back epochs that are still protected
    pub(crate) fn restore(&self, epochs: Vec<u64>) {
        self.eligible.lock().extend(epochs);
    }
}

/// Engine-side state a snapshot reports back to
#[derive(Clone, Debug)]
pub(crate) struct SnapshotOwner {
    pub(crate) tracker: Arc<EpochTracker>,
    pub(crate) stats: Arc<Stats>,
}

/// Per-document terms of fields that a segment does not carry as native
/// doc values, uninverted from the postings on first use
#[derive(Default)]
pub(crate) struct CachedDocs {
    fields: Mutex<HashMap<String, Arc<Vec<Vec<String>>>>>,
}

impl CachedDocs {
    pub(crate) fn field(&self, segment: &dyn Segment, field: &str) -> Result<Arc<Vec<Vec<String>>>> {
        if let Some(docs) = self.fields.lock().get(field) {
            return Ok(docs.clone());
        }

        let mut docs = vec![Vec::new(); segment.count() as usize];
        for entry in segment.dictionary(field, &DictQuery::All, None)? {
            let mut postings = segment.postings(field, &entry.term, None, false)?;
            while let Some(p) = postings.next()? {
                if let Some(terms) = docs.get_mut(p.doc as usize) {
                    terms.push(entry.term.clone());
                }
            }
        }

        let docs = Arc::new(docs);
        self.fields.lock().insert(field.to_string(), docs.clone());
        Ok(docs)
    }

    pub(crate) fn len(&self) -> usize {
        self.fields.lock().len()
    }
}

/// A segment together with the documents deleted from it as of one epoch
#[derive(Clone)]
pub struct SegmentSnapshot {
    id: u64,
    segment: Arc<dyn Segment>,
    deleted: Option<Arc<RoaringBitmap>>,
    cached: Arc<CachedDocs>,
}

impl SegmentSnapshot {
    pub(crate) fn new(id: u64, segment: Arc<dyn Segment>, deleted: Option<RoaringBitmap>) -> Self {
        Self {
            id,
            segment,
            deleted: deleted.filter(|d| !d.is_empty()).map(Arc::new),
            cached: Arc::new(CachedDocs::default()),
        }
    }

    /// Same segment and cache, different tombstones
    pub(crate) fn with_deleted(&self, deleted: Option<RoaringBitmap>) -> Self {
        Self {
            id: self.id,
            segment: self.segment.clone(),
            deleted: deleted.filter(|d| !d.is_empty()).map(Arc::new),
            cached: self.cached.clone(),
        }
    }

    /// Same id and tombstones backed by another handle of the segment data
    pub(crate) fn with_segment(&self, segment: Arc<dyn Segment>) -> Self {
        Self {
            id: self.id,
            segment,
            deleted: self.deleted.clone(),
            cached: self.cached.clone(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn segment(&self) -> &Arc<dyn Segment> {
        &self.segment
    }

    pub fn deleted(&self) -> Option<&RoaringBitmap> {
        self.deleted.as_deref()
    }

    pub(crate) fn deleted_shared(&self) -> Option<&Arc<RoaringBitmap>> {
        self.deleted.as_ref()
    }

    /// Documents in the segment, deleted or not
    pub fn count(&self) -> u64 {
        self.segment.count()
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted.as_ref().map(|d| d.len()).unwrap_or(0)
    }

    pub fn live_count(&self) -> u64 {
        self.count().saturating_sub(self.deleted_count())
    }

    pub fn is_persisted(&self) -> bool {
        self.segment.path().is_some()
    }

    pub fn file_name(&self) -> String {
        segment_file_name(self.id)
    }

    /// Local numbers of the documents not deleted
    pub fn live_docs(&self) -> RoaringBitmap {
        let mut live = RoaringBitmap::new();
        live.insert_range(0..self.count() as u32);
        if let Some(deleted) = &self.deleted {
            live -= deleted.as_ref();
        }
        live
    }

    pub(crate) fn cached(&self) -> &CachedDocs {
        &self.cached
    }
}

impl fmt::Debug for SegmentSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentSnapshot")
            .field("id", &self.id)
            .field("count", &self.count())
            .field("deleted", &self.deleted_count())
            .field("persisted", &self.is_persisted())
            .finish()
    }
}

pub(crate) type ReaderPool = Mutex<HashMap<String, Vec<Vec<Box<dyn PostingsIterator>>>>>;

/// An immutable view of the whole index at one epoch
pub struct IndexSnapshot {
    pub(crate) segments: Vec<SegmentSnapshot>,
    pub(crate) offsets: Vec<u64>,
    pub(crate) internal: BTreeMap<String, Vec<u8>>,
    pub(crate) epoch: u64,
    pub(crate) owner: Option<SnapshotOwner>,
    pub(crate) reader_pool: ReaderPool,
}

impl IndexSnapshot {
    /// Offsets are the running sum of raw segment counts
    pub(crate) fn new(
        segments: Vec<SegmentSnapshot>,
        internal: BTreeMap<String, Vec<u8>>,
        epoch: u64,
        owner: Option<SnapshotOwner>,
    ) -> Self {
        let mut offsets = Vec::with_capacity(segments.len());
        let mut running = 0u64;
        for s in &segments {
            offsets.push(running);
            running += s.count();
        }
        Self {
            segments,
            offsets,
            internal,
            epoch,
            owner,
            reader_pool: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn empty(owner: Option<SnapshotOwner>) -> Self {
        Self::new(Vec::new(), BTreeMap::new(), 0, owner)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn segments(&self) -> &[SegmentSnapshot] {
        &self.segments
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn internal(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.internal
    }

    pub fn get_internal(&self, key: &str) -> Option<&[u8]> {
        self.internal.get(key).map(|v| v.as_slice())
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Live documents across all segments
    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.live_count()).sum()
    }

    pub fn size(&self) -> u64 {
        self.segments.iter().map(|s| s.segment.size_in_bytes()).sum()
    }

    /// Union of the indexed field names, sorted
    pub fn fields(&self) -> Vec<String> {
        let fields: BTreeSet<String> = self
            .segments
            .iter()
            .flat_map(|s| s.segment.fields())
            .collect();
        fields.into_iter().collect()
    }

    /// Segment index and local doc number of a global doc number
    pub(crate) fn locate(&self, global: u64) -> Option<(usize, u32)> {
        let idx = self.offsets.partition_point(|&o| o <= global);
        if idx == 0 {
            return None;
        }
        let i = idx - 1;
        let local = global - self.offsets[i];
        if local >= self.segments[i].count() {
            return None;
        }
        Some((i, local as u32))
    }

    pub(crate) fn stats(&self) -> Option<&Stats> {
        self.owner.as_ref().map(|o| o.stats.as_ref())
    }
}

impl Drop for IndexSnapshot {
    fn drop(&mut self) {
        if let Some(owner) = &self.owner {
            owner.tracker.release(self.epoch);
        }
    }
}

impl fmt::Debug for IndexSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSnapshot")
            .field("epoch", &self.epoch)
            .field("segments", &self.segments)
            .field("offsets", &self.offsets)
            .field("internal_keys", &self.internal.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analyzer, StandardAnalyzer};
    use crate::config::AnalysisConfig;
    use crate::models::Document;
    use crate::segment::{FstSegmentPlugin, SegmentPlugin};

    fn segment(ids: &[&str]) -> Arc<dyn Segment> {
        let analyzer = StandardAnalyzer::new(&AnalysisConfig::default());
        let results: Vec<_> = ids
            .iter()
            .map(|id| analyzer.analyze(&Document::new(*id).with_text("body", "shared words")).unwrap())
            .collect();
        FstSegmentPlugin.build(&results).unwrap()
    }

    #[test]
    fn test_offsets_and_locate() {
        let a = SegmentSnapshot::new(1, segment(&["a", "b", "c"]), None);
        let b = SegmentSnapshot::new(2, segment(&["d", "e"]), Some([0u32].into_iter().collect()));
        let snap = IndexSnapshot::new(vec![a, b], BTreeMap::new(), 4, None);

        assert_eq!(snap.offsets(), &[0, 3]);
        assert_eq!(snap.doc_count(), 4);
        assert_eq!(snap.locate(0), Some((0, 0)));
        assert_eq!(snap.locate(2), Some((0, 2)));
        assert_eq!(snap.locate(3), Some((1, 0)));
        assert_eq!(snap.locate(4), Some((1, 1)));
        assert_eq!(snap.locate(5), None);
        assert_eq!(snap.fields(), vec!["_id".to_string(), "body".to_string()]);
    }

    #[test]
    fn test_empty_tombstones_are_dropped() {
        let s = SegmentSnapshot::new(1, segment(&["a"]), Some(RoaringBitmap::new()));
        assert!(s.deleted().is_none());
        assert_eq!(s.live_docs().len(), 1);

        let s = s.with_deleted(Some([0u32].into_iter().collect()));
        assert_eq!(s.live_count(), 0);
        assert!(s.live_docs().is_empty());
    }

    #[test]
    fn test_drop_reports_non_root_epoch() {
        let owner = SnapshotOwner {
            tracker: Arc::new(EpochTracker::default()),
            stats: Arc::new(Stats::default()),
        };
        owner.tracker.set_root(2);

        drop(Arc::new(IndexSnapshot::new(Vec::new(), BTreeMap::new(), 2, Some(owner.clone()))));
        assert!(owner.tracker.take_eligible().is_empty());

        let old = Arc::new(IndexSnapshot::new(Vec::new(), BTreeMap::new(), 1, Some(owner.clone())));
        let reader = old.clone();
        drop(old);
        assert!(owner.tracker.take_eligible().is_empty());
        drop(reader);
        assert_eq!(owner.tracker.take_eligible(), vec![1]);
    }

    #[test]
    fn test_cached_docs_uninvert() {
        let s = SegmentSnapshot::new(1, segment(&["a", "b"]), None);
        let docs = s.cached().field(s.segment().as_ref(), "body").unwrap();
        assert_eq!(docs[1], vec!["shared".to_string(), "words".to_string()]);
        assert_eq!(s.cached().len(), 1);
    }
}
