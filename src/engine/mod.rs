//! Index engine
//!
//! # Architecture
//!
//! - [`Index`]: the public handle; batches, readers, stats, rollback
//! - introducer: single thread that owns every root swap
//! - persister: writes new roots to segment files and the catalog, then
//!   removes epochs and files nothing references
//! - merger: plans and runs merges of persisted segments
//! - [`IndexSnapshot`]: immutable, reference-counted point-in-time view
//!
//! Foreground callers never touch the root directly; they hand requests to
//! the introducer over channels and wait on a reply channel, racing the
//! close signal so a closing index never leaves a caller blocked.

mod catalog;
mod events;
mod index;
mod introducer;
mod merger;
mod persister;
mod reader;
mod rollback;
mod snapshot;
mod stats;

pub use catalog::{SegmentRecord, SnapshotRecord};
pub use events::{AsyncErrorCallback, Callbacks, Event, EventCallback, EventKind};
pub use index::Index;
pub use reader::{
    DocIdReader, DocValueReader, FieldDict, InternalId, TermFieldDoc, TermFieldReader, TermVector,
};
pub use rollback::RollbackPoint;
pub use snapshot::{IndexSnapshot, SegmentSnapshot};
pub use stats::StatsSnapshot;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use roaring::RoaringBitmap;

    use super::introducer::{
        introduce_merge, revert_to_snapshot, MergeIntroduction, MergedSource, RevertRequest,
    };
    use super::*;
    use crate::config::IndexConfig;
    use crate::models::{AnalysisResult, Batch, Document, FieldOptions, FieldValue};
    use crate::segment::{
        DictEntry, DictQuery, FstSegmentPlugin, MergeOutput, PostingsIterator, Segment,
        SegmentPlugin, SegmentRegistry,
    };
    use crate::Result;

    fn doc(id: &str, body: &str) -> Document {
        Document::new(id).with_text("body", body)
    }

    fn ids_of(reader: &Arc<IndexSnapshot>) -> Vec<String> {
        let mut ids = Vec::new();
        let mut all = reader.doc_id_reader_all();
        while let Some(id) = all.next() {
            if let Some(ext) = reader.external_id(id).unwrap() {
                ids.push(ext);
            }
        }
        ids.sort();
        ids
    }

    #[test]
    fn test_merge_reconciles_concurrent_deletes() {
        let index = Index::open_default(IndexConfig::in_memory()).unwrap();
        let mut batch = Batch::new();
        for id in ["a", "b", "c"] {
            batch.update(doc(id, "alpha"));
        }
        index.batch(batch).unwrap();
        let mut batch = Batch::new();
        for id in ["d", "e"] {
            batch.update(doc(id, "beta"));
        }
        index.batch(batch).unwrap();
        index.delete("a").unwrap();

        // capture merge inputs, then delete more while the "merge" runs
        let before = index.reader();
        let sources: Vec<SegmentSnapshot> = before.segments().to_vec();
        let plugin = FstSegmentPlugin;
        let segments: Vec<Arc<dyn Segment>> = sources.iter().map(|s| s.segment().clone()).collect();
        let drops: Vec<Option<RoaringBitmap>> =
            sources.iter().map(|s| s.deleted().cloned()).collect();
        let output = plugin
            .merge(&segments, &drops, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(output.segment.count(), 4);

        let mut batch = Batch::new();
        batch.delete("b");
        batch.delete("e");
        index.batch(batch).unwrap();

        let (tx, rx) = crossbeam::channel::bounded(1);
        let merged: HashMap<u64, MergedSource> = sources
            .iter()
            .zip(output.remap)
            .map(|(s, remap)| {
                (
                    s.id(),
                    MergedSource {
                        snapshot: s.clone(),
                        remap,
                    },
                )
            })
            .collect();
        introduce_merge(
            &index.shared_for_tests(),
            MergeIntroduction {
                sources: merged,
                new_id: 99,
                new_segment: output.segment,
                notify: tx,
            },
        );
        let outcome = rx.recv().unwrap();
        assert!(!outcome.skipped);

        let after = index.reader();
        assert_eq!(after.segment_count(), 1);
        assert_eq!(after.segments()[0].id(), 99);
        assert_eq!(after.segments()[0].deleted_count(), 2);
        assert_eq!(ids_of(&after), vec!["c".to_string(), "d".to_string()]);
        assert_eq!(after.doc_count(), 2);
        // the snapshot taken before still sees its own state
        assert_eq!(before.doc_count(), 4);
    }

    #[test]
    fn test_merge_started_before_revert_is_dropped() {
        let index = Index::open_default(IndexConfig::in_memory()).unwrap();
        let mut batch = Batch::new();
        for id in ["a", "b", "c"] {
            batch.update(doc(id, "alpha"));
        }
        index.batch(batch).unwrap();
        let point = index.reader();
        index.delete("a").unwrap();

        let sources: Vec<SegmentSnapshot> = index.reader().segments().to_vec();
        let segments: Vec<Arc<dyn Segment>> = sources.iter().map(|s| s.segment().clone()).collect();
        let drops: Vec<Option<RoaringBitmap>> =
            sources.iter().map(|s| s.deleted().cloned()).collect();
        let output = FstSegmentPlugin
            .merge(&segments, &drops, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(output.segment.count(), 2);

        // revert to the root from before the delete while the merge runs
        let shared = index.shared_for_tests();
        let (applied_tx, applied_rx) = crossbeam::channel::bounded(1);
        revert_to_snapshot(
            &shared,
            RevertRequest {
                segments: point.segments().to_vec(),
                internal: point.internal.clone(),
                applied: applied_tx,
                persisted: None,
            },
        );
        let reverted_epoch = applied_rx.recv().unwrap();
        assert_eq!(ids_of(&index.reader()), vec!["a", "b", "c"]);

        let (tx, rx) = crossbeam::channel::bounded(1);
        let merged = sources
            .iter()
            .zip(output.remap)
            .map(|(s, remap)| (s.id(), MergedSource { snapshot: s.clone(), remap }))
            .collect();
        introduce_merge(
            &shared,
            MergeIntroduction {
                sources: merged,
                new_id: 77,
                new_segment: output.segment,
                notify: tx,
            },
        );
        let outcome = rx.recv().unwrap();
        assert!(outcome.skipped);

        let after = index.reader();
        assert_eq!(after.epoch(), reverted_epoch);
        assert_eq!(ids_of(&after), vec!["a", "b", "c"]);
        assert!(after.segments().iter().all(|s| s.id() != 77));
        assert!(shared.root.read().ineligible.is_empty());
    }

    #[test]
    fn test_merge_result_fully_deleted_is_skipped() {
        let index = Index::open_default(IndexConfig::in_memory()).unwrap();
        index.update(doc("a", "x")).unwrap();
        index.update(doc("b", "x")).unwrap();

        let sources: Vec<SegmentSnapshot> = index.reader().segments().to_vec();
        let segments: Vec<Arc<dyn Segment>> = sources.iter().map(|s| s.segment().clone()).collect();
        let output = FstSegmentPlugin
            .merge(&segments, &[None, None], &AtomicBool::new(false))
            .unwrap();

        let mut batch = Batch::new();
        batch.delete("a");
        batch.delete("b");
        index.batch(batch).unwrap();
        assert_eq!(index.reader().segment_count(), 0);

        let (tx, rx) = crossbeam::channel::bounded(1);
        let merged = sources
            .iter()
            .zip(output.remap)
            .map(|(s, remap)| (s.id(), MergedSource { snapshot: s.clone(), remap }))
            .collect();
        introduce_merge(
            &index.shared_for_tests(),
            MergeIntroduction {
                sources: merged,
                new_id: 50,
                new_segment: output.segment,
                notify: tx,
            },
        );
        assert!(rx.recv().unwrap().skipped);
        assert_eq!(index.reader().segment_count(), 0);
        assert_eq!(index.stats().merges_skipped, 1);
    }

    /// Wraps the built-in segments and counts live handles
    struct CountingPlugin {
        live: Arc<AtomicUsize>,
    }

    struct CountingSegment {
        inner: Arc<dyn Segment>,
        live: Arc<AtomicUsize>,
    }

    impl CountingSegment {
        fn wrap(inner: Arc<dyn Segment>, live: &Arc<AtomicUsize>) -> Arc<dyn Segment> {
            live.fetch_add(1, Ordering::SeqCst);
            Arc::new(Self {
                inner,
                live: live.clone(),
            })
        }
    }

    impl Drop for CountingSegment {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Segment for CountingSegment {
        fn format(&self) -> (&'static str, u32) {
            ("counting", 1)
        }
        fn count(&self) -> u64 {
            self.inner.count()
        }
        fn size_in_bytes(&self) -> u64 {
            self.inner.size_in_bytes()
        }
        fn fields(&self) -> Vec<String> {
            self.inner.fields()
        }
        fn field_options(&self, field: &str) -> Option<FieldOptions> {
            self.inner.field_options(field)
        }
        fn path(&self) -> Option<&Path> {
            self.inner.path()
        }
        fn postings(
            &self,
            field: &str,
            term: &str,
            except: Option<&Arc<RoaringBitmap>>,
            include_locations: bool,
        ) -> Result<Box<dyn PostingsIterator>> {
            self.inner.postings(field, term, except, include_locations)
        }
        fn dictionary(
            &self,
            field: &str,
            query: &DictQuery,
            except: Option<&RoaringBitmap>,
        ) -> Result<Vec<DictEntry>> {
            self.inner.dictionary(field, query, except)
        }
        fn doc_numbers(&self, ids: &[&str]) -> Result<RoaringBitmap> {
            self.inner.doc_numbers(ids)
        }
        fn visit_stored(
            &self,
            doc: u32,
            visitor: &mut dyn FnMut(&str, &FieldValue) -> bool,
        ) -> Result<()> {
            self.inner.visit_stored(doc, visitor)
        }
        fn field_length(&self, field: &str, doc: u32) -> Option<u32> {
            self.inner.field_length(field, doc)
        }
        fn doc_value_fields(&self) -> Vec<String> {
            self.inner.doc_value_fields()
        }
        fn visit_doc_values(
            &self,
            doc: u32,
            fields: &[String],
            visitor: &mut dyn FnMut(&str, &str),
        ) -> Result<()> {
            self.inner.visit_doc_values(doc, fields, visitor)
        }
        fn persist(&self, path: &Path) -> Result<()> {
            self.inner.persist(path)
        }
    }

    impl SegmentPlugin for CountingPlugin {
        fn kind(&self) -> &'static str {
            "counting"
        }
        fn version(&self) -> u32 {
            1
        }
        fn build(&self, results: &[AnalysisResult]) -> Result<Arc<dyn Segment>> {
            Ok(CountingSegment::wrap(FstSegmentPlugin.build(results)?, &self.live))
        }
        fn open(&self, path: &Path) -> Result<Arc<dyn Segment>> {
            Ok(CountingSegment::wrap(FstSegmentPlugin.open(path)?, &self.live))
        }
        fn merge(
            &self,
            segments: &[Arc<dyn Segment>],
            drops: &[Option<RoaringBitmap>],
            closing: &AtomicBool,
        ) -> Result<MergeOutput> {
            let output = FstSegmentPlugin.merge(segments, drops, closing)?;
            Ok(MergeOutput {
                segment: CountingSegment::wrap(output.segment, &self.live),
                remap: output.remap,
            })
        }
    }

    #[test]
    fn test_segment_references_balance() {
        let live = Arc::new(AtomicUsize::new(0));
        let registry = SegmentRegistry::new(Arc::new(CountingPlugin { live: live.clone() }));
        let index = Index::open(IndexConfig::in_memory(), registry, Callbacks::default()).unwrap();

        index.update(doc("a", "one")).unwrap();
        let held = index.reader();
        index.update(doc("b", "two")).unwrap();
        index.update(doc("c", "three")).unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 3);

        index.delete("a").unwrap();
        // the held reader keeps segment "a" alive
        assert_eq!(live.load(Ordering::SeqCst), 3);
        {
            let mut reader = held.term_field_reader("one", "body", true, true, false).unwrap();
            assert!(reader.next().unwrap().is_some());
            reader.close().unwrap();
        }
        drop(held);
        assert_eq!(live.load(Ordering::SeqCst), 2);

        index.force_merge().unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);

        let stats = index.stats();
        assert_eq!(stats.open_term_searchers(), 0);

        index.close().unwrap();
        drop(index);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_segment_references_balance_under_concurrency() {
        let live = Arc::new(AtomicUsize::new(0));
        let registry = SegmentRegistry::new(Arc::new(CountingPlugin { live: live.clone() }));
        let index = Index::open(IndexConfig::in_memory(), registry, Callbacks::default()).unwrap();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let writers: Vec<_> = (0..4)
                .map(|w| {
                    let index = &index;
                    scope.spawn(move || {
                        for i in 0..25 {
                            let id = format!("w{w}-{}", i % 5);
                            if i % 3 == 2 {
                                index.delete(&id).unwrap();
                            } else {
                                index.update(doc(&id, "shared words")).unwrap();
                            }
                        }
                    })
                })
                .collect();

            for _ in 0..3 {
                let (index, done) = (&index, &done);
                scope.spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        let reader = index.reader();
                        let mut postings = reader
                            .term_field_reader("shared", "body", true, false, false)
                            .unwrap();
                        while postings.next().unwrap().is_some() {}
                        postings.close().unwrap();
                        drop(reader);
                    }
                });
            }

            for w in writers {
                w.join().unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        index.force_merge().unwrap();
        assert_eq!(index.stats().open_term_searchers(), 0);
        assert_eq!(live.load(Ordering::SeqCst), index.reader().segment_count());

        index.close().unwrap();
        drop(index);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    fn registry_with_counting(live: &Arc<AtomicUsize>) -> SegmentRegistry {
        let mut registry = SegmentRegistry::default();
        registry.register(Arc::new(CountingPlugin { live: live.clone() }));
        registry
    }

    #[test]
    fn test_forced_format_is_recorded_per_segment() {
        let dir = tempfile::TempDir::new().unwrap();
        let live = Arc::new(AtomicUsize::new(0));

        let config = IndexConfig::new(dir.path()).with_segment_format("counting", None);
        let index = Index::open(config, registry_with_counting(&live), Callbacks::default()).unwrap();
        index.update(doc("a", "forced format")).unwrap();
        assert_eq!(index.reader().segments()[0].segment().format(), ("counting", 1));
        index.close().unwrap();
        drop(index);
        assert_eq!(live.load(Ordering::SeqCst), 0);

        // reopened with the built-in default; the old segment keeps its plugin
        let index = Index::open(
            IndexConfig::new(dir.path()),
            registry_with_counting(&live),
            Callbacks::default(),
        )
        .unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);
        index.update(doc("b", "default format")).unwrap();
        let mut formats: Vec<_> = index
            .reader()
            .segments()
            .iter()
            .map(|s| s.segment().format().0)
            .collect();
        formats.sort();
        assert_eq!(formats, vec!["counting", "fst"]);
        index.close().unwrap();
        drop(index);

        let index = Index::open(
            IndexConfig::new(dir.path()),
            registry_with_counting(&live),
            Callbacks::default(),
        )
        .unwrap();
        assert_eq!(ids_of(&index.reader()), vec!["a", "b"]);
        index.close().unwrap();
    }

    #[test]
    fn test_forcing_unknown_format_fails_open() {
        let config = IndexConfig::in_memory().with_segment_format("missing", Some(3));
        let err = Index::open_default(config).unwrap_err();
        assert!(matches!(
            err,
            crate::CuttleError::UnknownSegmentPlugin { ref kind, version: 3 } if kind == "missing"
        ));
    }

    #[test]
    fn test_callbacks_see_batch_events() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let callbacks = {
            let seen = seen.clone();
            Callbacks::new().with_event_callback(move |e| seen.lock().push(e.kind))
        };
        let index =
            Index::open(IndexConfig::in_memory(), SegmentRegistry::default(), callbacks).unwrap();
        index.update(doc("a", "x")).unwrap();
        index.close().unwrap();

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                EventKind::BatchIntroductionStart,
                EventKind::BatchIntroduction,
                EventKind::CloseStart,
                EventKind::Closed,
            ]
        );
    }
}
