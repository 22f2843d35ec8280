use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;
use tracing::{debug, error, info, warn};

use super::catalog::Catalog;
use super::events::{Callbacks, EventKind};
use super::introducer::{
    self, EpochWatcher, IntroducerInbox, MergeIntroduction, PersistIntroduction, RevertRequest,
    SegmentIntroduction,
};
use super::merger::{self, ForceMergeRequest};
use super::persister;
use super::rollback::{self, RollbackPoint};
use super::snapshot::{EpochTracker, IndexSnapshot, SnapshotOwner};
use super::stats::{Stats, StatsSnapshot};
use crate::analysis::{AnalysisQueue, Analyzer, StandardAnalyzer};
use crate::config::IndexConfig;
use crate::error::CuttleError;
use crate::metrics::EngineMetrics;
use crate::models::{Batch, Document, PersistedCallback};
use crate::segment::{segment_file_name, SegmentRegistry, TieredMergePolicy};
use crate::Result;

/// Everything guarded by the root lock
pub(crate) struct RootState {
    pub(crate) root: Arc<IndexSnapshot>,
    pub(crate) next_snapshot_epoch: u64,
    /// Batches waiting for the root they were introduced in to be durable
    pub(crate) persisted_waiters: Vec<Sender<Result<()>>>,
    /// Callbacks are only `Send`; the mutex keeps `RootState` `Sync`
    pub(crate) persisted_callbacks: Mutex<Vec<PersistedCallback>>,
    /// Segment files being written or opened outside the root and catalog
    pub(crate) ineligible: HashSet<String>,
}

pub(crate) struct Channels {
    pub(crate) introductions: Sender<SegmentIntroduction>,
    pub(crate) persists: Sender<PersistIntroduction>,
    pub(crate) merges: Sender<MergeIntroduction>,
    pub(crate) reverts: Sender<RevertRequest>,
    pub(crate) introducer_watchers: Sender<EpochWatcher>,
    pub(crate) persister_notifier: Sender<EpochWatcher>,
    pub(crate) force_merge: Sender<ForceMergeRequest>,
}

/// State shared between the foreground API and the background loops
pub(crate) struct Shared {
    pub(crate) config: IndexConfig,
    pub(crate) registry: SegmentRegistry,
    pub(crate) callbacks: Callbacks,
    pub(crate) root: RwLock<RootState>,
    pub(crate) owner: SnapshotOwner,
    pub(crate) metrics: EngineMetrics,
    pub(crate) catalog: Option<Catalog>,
    pub(crate) next_segment_id: AtomicU64,
    pub(crate) closing: AtomicBool,
    /// Disconnects when the index starts closing
    pub(crate) close_rx: Receiver<()>,
    pub(crate) channels: Channels,
    pub(crate) merge_policy: TieredMergePolicy,
}

impl Shared {
    pub(crate) fn root(&self) -> Arc<IndexSnapshot> {
        self.root.read().root.clone()
    }

    pub(crate) fn stats(&self) -> &Stats {
        &self.owner.stats
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Persistent indexes run the persister and merger
    pub(crate) fn is_persistent(&self) -> bool {
        self.catalog.is_some() && !self.config.read_only
    }

    pub(crate) fn dir(&self) -> Result<&Path> {
        self.config
            .path
            .as_deref()
            .ok_or_else(|| CuttleError::InvalidRequest("index has no directory".into()))
    }

    pub(crate) fn segment_path(&self, id: u64) -> Result<PathBuf> {
        Ok(self.dir()?.join(segment_file_name(id)))
    }

    /// Send unless the index closes first
    pub(crate) fn send<T>(&self, tx: &Sender<T>, msg: T) -> Result<()> {
        if self.is_closing() {
            return Err(CuttleError::Closed);
        }
        select! {
            send(tx, msg) -> r => r.map_err(|_| CuttleError::Closed),
            recv(self.close_rx) -> _ => Err(CuttleError::Closed),
        }
    }

    /// Receive a reply unless the index closes first
    pub(crate) fn wait<T>(&self, rx: &Receiver<T>) -> Result<T> {
        select! {
            recv(rx) -> r => r.map_err(|_| CuttleError::Closed),
            recv(self.close_rx) -> _ => Err(CuttleError::Closed),
        }
    }

    /// Sleep unless the index closes first; false when closing
    pub(crate) fn nap(&self, duration: Duration) -> bool {
        select! {
            recv(self.close_rx) -> _ => false,
            default(duration) => true,
        }
    }

    pub(crate) fn mark_ineligible(&self, name: &str) {
        self.root.write().ineligible.insert(name.to_string());
    }

    pub(crate) fn unmark_ineligible(&self, name: &str) {
        self.root.write().ineligible.remove(name);
    }

    pub(crate) fn report_async_error(&self, err: &CuttleError) {
        error!(error = %err, "background error");
        self.metrics.async_errors.inc();
        self.callbacks.async_error(err);
    }

    /// Files and bytes under the index directory
    pub(crate) fn disk_stats(&self) -> (u64, u64) {
        match &self.config.path {
            Some(dir) => walk_disk_usage(dir),
            None => (0, 0),
        }
    }
}

fn walk_disk_usage(dir: &Path) -> (u64, u64) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return (0, 0);
    };
    let mut files = 0;
    let mut bytes = 0;
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            let (f, b) = walk_disk_usage(&entry.path());
            files += f;
            bytes += b;
        } else {
            files += 1;
            bytes += meta.len();
        }
    }
    (files, bytes)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closing,
    Closed,
}

/// A segment-based search index.
///
/// Writers go through [`Index::batch`]; readers take an immutable
/// [`IndexSnapshot`] with [`Index::reader`]. A persistent index persists
/// and merges segments in background threads until [`Index::close`].
pub struct Index {
    shared: Arc<Shared>,
    close_tx: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    analysis: AnalysisQueue,
    lifecycle: Mutex<Lifecycle>,
}

impl Index {
    /// Open (or create) an index and start its background threads
    pub fn open(config: IndexConfig, registry: SegmentRegistry, callbacks: Callbacks) -> Result<Self> {
        let analyzer = Arc::new(StandardAnalyzer::new(&config.analysis));
        Self::open_with_analyzer(config, registry, callbacks, analyzer)
    }

    /// Open with a caller-supplied analyzer in place of [`StandardAnalyzer`]
    pub fn open_with_analyzer(
        config: IndexConfig,
        registry: SegmentRegistry,
        callbacks: Callbacks,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<Self> {
        let mut config = config;
        if config.is_in_memory() {
            config.unsafe_batch = true;
        }
        let mut registry = registry;
        if config.force_segment_kind.is_some() || config.force_segment_version.is_some() {
            registry.force(
                config.force_segment_kind.as_deref(),
                config.force_segment_version,
            )?;
        }

        let owner = SnapshotOwner {
            tracker: Arc::new(EpochTracker::default()),
            stats: Arc::new(Stats::default()),
        };
        let metrics = EngineMetrics::new()?;

        let (catalog, loaded) = match (&config.path, config.catalog_dir()) {
            (Some(dir), Some(catalog_dir)) => {
                std::fs::create_dir_all(dir)?;
                let catalog = Catalog::open(&catalog_dir, config.persister.sync)?;
                let loaded = persister::load_from_catalog(&catalog, dir, &registry, &owner)?;
                (Some(catalog), loaded)
            }
            _ => (None, persister::LoadedRoot::empty(&owner)),
        };
        let persisted_epoch = loaded.root.epoch;
        metrics.set_root(loaded.root.epoch, loaded.root.segments.len());

        let (close_tx, close_rx) = bounded::<()>(0);
        let (introductions_tx, introductions_rx) = unbounded();
        let (persists_tx, persists_rx) = unbounded();
        let (merges_tx, merges_rx) = unbounded();
        let (reverts_tx, reverts_rx) = unbounded();
        let (watchers_tx, watchers_rx) = unbounded();
        let (notifier_tx, notifier_rx) = unbounded();
        let (force_tx, force_rx) = unbounded();

        let analysis = AnalysisQueue::new(analyzer, config.analysis.worker_threads);
        let merge_policy = TieredMergePolicy::new(config.merge.clone());

        let shared = Arc::new(Shared {
            config,
            registry,
            callbacks,
            root: RwLock::new(RootState {
                root: Arc::new(loaded.root),
                next_snapshot_epoch: loaded.next_epoch,
                persisted_waiters: Vec::new(),
                persisted_callbacks: Mutex::new(Vec::new()),
                ineligible: HashSet::new(),
            }),
            owner,
            metrics,
            catalog,
            next_segment_id: AtomicU64::new(loaded.next_segment_id),
            closing: AtomicBool::new(false),
            close_rx,
            channels: Channels {
                introductions: introductions_tx,
                persists: persists_tx,
                merges: merges_tx,
                reverts: reverts_tx,
                introducer_watchers: watchers_tx,
                persister_notifier: notifier_tx,
                force_merge: force_tx,
            },
            merge_policy,
        });

        if shared.is_persistent() {
            if let Err(e) = persister::remove_old_data(&shared) {
                warn!(error = %e, "cleanup on open failed");
            }
        }

        let mut workers = Vec::new();
        let inbox = IntroducerInbox {
            introductions: introductions_rx,
            persists: persists_rx,
            merges: merges_rx,
            reverts: reverts_rx,
            watchers: watchers_rx,
        };
        workers.push(spawn("cuttle-introducer", {
            let shared = shared.clone();
            move || introducer::run(shared, inbox)
        })?);

        if shared.is_persistent() {
            workers.push(spawn("cuttle-persister", {
                let shared = shared.clone();
                move || persister::run(shared, notifier_rx, persisted_epoch)
            })?);
            workers.push(spawn("cuttle-merger", {
                let shared = shared.clone();
                move || merger::run(shared, force_rx)
            })?);
        }

        info!(
            path = ?shared.config.path,
            epoch = persisted_epoch,
            segments = shared.root().segments.len(),
            read_only = shared.config.read_only,
            "index opened"
        );

        Ok(Self {
            shared,
            close_tx: Mutex::new(Some(close_tx)),
            workers: Mutex::new(workers),
            analysis,
            lifecycle: Mutex::new(Lifecycle::Open),
        })
    }

    /// Open with the built-in segment format and no callbacks
    pub fn open_default(config: IndexConfig) -> Result<Self> {
        Self::open(config, SegmentRegistry::default(), Callbacks::default())
    }

    pub fn config(&self) -> &IndexConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.shared.metrics
    }

    #[cfg(test)]
    pub(crate) fn shared_for_tests(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.lifecycle.lock() != Lifecycle::Open || self.shared.is_closing() {
            return Err(CuttleError::Closed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.shared.config.read_only {
            return Err(CuttleError::InvalidRequest("index is read-only".into()));
        }
        Ok(())
    }

    /// Apply a batch atomically.
    ///
    /// Returns once the batch is visible to new readers and, unless the
    /// index runs with `unsafe_batch`, durable.
    pub fn batch(&self, batch: Batch) -> Result<()> {
        self.ensure_writable()?;
        let start = Instant::now();
        let result = self.apply_batch(batch);
        if let Err(e) = &result {
            Stats::inc(&self.shared.stats().errors);
            self.shared.metrics.record_batch_error();
            debug!(error = %e, "batch failed");
        }
        self.shared
            .callbacks
            .fire(EventKind::BatchIntroduction, start.elapsed());
        result
    }

    fn apply_batch(&self, batch: Batch) -> Result<()> {
        let start = Instant::now();
        let shared = &self.shared;
        let Batch {
            index_ops,
            internal_ops,
            persisted_callback,
        } = batch;

        let mut ids = Vec::with_capacity(index_ops.len());
        let mut docs = Vec::new();
        let mut num_deletes = 0u64;
        for (id, op) in index_ops {
            match op {
                Some(mut doc) => {
                    doc.id = id.clone();
                    docs.push(doc);
                }
                None => num_deletes += 1,
            }
            ids.push(id);
        }
        ids.sort_unstable();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        let num_updates = docs.len() as u64;

        let analysis_start = Instant::now();
        let results = if docs.is_empty() {
            Vec::new()
        } else {
            self.analysis.analyze_all(docs)?
        };
        Stats::add(
            &shared.stats().analysis_time_ns,
            analysis_start.elapsed().as_nanos() as u64,
        );

        shared
            .callbacks
            .fire(EventKind::BatchIntroductionStart, start.elapsed());

        let segment = if results.is_empty() {
            Stats::inc(&shared.stats().empty_batches);
            None
        } else {
            Some(shared.registry.default_plugin().build(&results)?)
        };
        let id = shared.next_segment_id.fetch_add(1, Ordering::SeqCst);

        // computed against the current root; the introducer fills in
        // segments that appear in between
        let mut obsoletes = HashMap::new();
        if !ids.is_empty() {
            let root = shared.root();
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            for s in root.segments() {
                let delta: RoaringBitmap = s.segment().doc_numbers(&id_refs)?;
                obsoletes.insert(s.id(), delta);
            }
        }

        // nothing ever becomes durable in memory
        let (persisted_callback, immediate_callback) = if shared.config.is_in_memory() {
            (None, persisted_callback)
        } else {
            (persisted_callback, None)
        };

        let (applied_tx, applied_rx) = bounded(1);
        let (persisted_tx, persisted_rx) = if shared.config.unsafe_batch {
            (None, None)
        } else {
            let (tx, rx) = bounded(1);
            (Some(tx), Some(rx))
        };

        shared.send(
            &shared.channels.introductions,
            SegmentIntroduction {
                id,
                segment,
                ids,
                obsoletes,
                internal: internal_ops,
                applied: applied_tx,
                persisted: persisted_tx,
                persisted_callback,
            },
        )?;
        shared.wait(&applied_rx)??;

        if let Some(cb) = immediate_callback {
            cb(Ok(()));
        }
        if let Some(rx) = persisted_rx {
            shared.wait(&rx)??;
        }

        let elapsed = start.elapsed();
        Stats::add(&shared.stats().updates, num_updates);
        Stats::add(&shared.stats().deletes, num_deletes);
        Stats::inc(&shared.stats().batches);
        Stats::add(&shared.stats().index_time_ns, elapsed.as_nanos() as u64);
        shared
            .metrics
            .record_batch(num_updates, num_deletes, elapsed.as_secs_f64());
        Ok(())
    }

    /// Insert or replace one document
    pub fn update(&self, doc: Document) -> Result<()> {
        let mut batch = Batch::new();
        batch.update(doc);
        self.batch(batch)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut batch = Batch::new();
        batch.delete(id);
        self.batch(batch)
    }

    pub fn set_internal(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut batch = Batch::new();
        batch.set_internal(key, value);
        self.batch(batch)
    }

    pub fn delete_internal(&self, key: &str) -> Result<()> {
        let mut batch = Batch::new();
        batch.delete_internal(key);
        self.batch(batch)
    }

    /// The current root snapshot. It stays valid after later batches
    /// and after close.
    pub fn reader(&self) -> Arc<IndexSnapshot> {
        self.shared.root()
    }

    /// Merge segments down as far as the policy allows, blocking until done
    pub fn force_merge(&self) -> Result<()> {
        self.ensure_writable()?;
        if !self.shared.is_persistent() {
            return merger::plan_and_merge(&self.shared, true).map(|_| ());
        }
        let (tx, rx) = bounded(1);
        self.shared
            .send(&self.shared.channels.force_merge, ForceMergeRequest { done: tx })?;
        self.shared.wait(&rx)?
    }

    /// Persisted epochs that can be rolled back to, newest first
    pub fn rollback_points(&self) -> Result<Vec<RollbackPoint>> {
        rollback::rollback_points(&self.shared)
    }

    /// Install the snapshot of an earlier persisted epoch as the new root
    pub fn rollback(&self, point: &RollbackPoint) -> Result<()> {
        self.ensure_writable()?;
        rollback::rollback(&self.shared, point)
    }

    pub fn stats(&self) -> StatsSnapshot {
        let mut snap = self.shared.stats().snapshot();
        let (root, ineligible) = {
            let state = self.shared.root.read();
            (state.root.clone(), state.ineligible.len())
        };
        let file_segments = root.segments().iter().filter(|s| s.is_persisted()).count() as u64;
        snap.bytes_in_memory = root
            .segments()
            .iter()
            .map(|s| {
                let data = if s.is_persisted() { 0 } else { s.segment().size_in_bytes() };
                data + s.deleted().map(|d| d.serialized_size() as u64).unwrap_or(0)
            })
            .sum();
        snap.root_epoch = root.epoch();
        snap.root_segments = root.segment_count() as u64;
        snap.root_file_segments = file_segments;
        snap.root_memory_segments = snap.root_segments - file_segments;
        snap.doc_count = root.doc_count();
        snap.ineligible_files = ineligible as u64;
        let (files, bytes) = self.shared.disk_stats();
        snap.files_on_disk = files;
        snap.bytes_on_disk = bytes;
        snap
    }

    pub fn stats_map(&self) -> serde_json::Value {
        self.stats().to_json()
    }

    pub fn is_closed(&self) -> bool {
        *self.lifecycle.lock() != Lifecycle::Open
    }

    /// Stop the background threads. Pending durability waiters and
    /// persisted callbacks fail with [`CuttleError::Closed`]. Calling it
    /// again is a no-op.
    pub fn close(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Open {
                return Ok(());
            }
            *lifecycle = Lifecycle::Closing;
        }
        let start = Instant::now();
        self.shared
            .callbacks
            .fire(EventKind::CloseStart, Duration::ZERO);

        self.shared.closing.store(true, Ordering::SeqCst);
        drop(self.close_tx.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "background thread panicked");
            }
        }

        let (waiters, callbacks) = {
            let mut state = self.shared.root.write();
            (
                std::mem::take(&mut state.persisted_waiters),
                std::mem::take(state.persisted_callbacks.get_mut()),
            )
        };
        for waiter in waiters {
            let _ = waiter.send(Err(CuttleError::Closed));
        }
        for cb in callbacks {
            cb(Err(CuttleError::Closed));
        }

        *self.lifecycle.lock() = Lifecycle::Closed;
        self.shared
            .callbacks
            .fire(EventKind::Closed, start.elapsed());
        info!(path = ?self.shared.config.path, "index closed");
        Ok(())
    }
}

fn spawn(name: &str, f: impl FnOnce() + Send + 'static) -> Result<thread::JoinHandle<()>> {
    Ok(thread::Builder::new().name(name.to_string()).spawn(f)?)
}

impl Drop for Index {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "close on drop failed");
        }
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("path", &self.shared.config.path)
            .field("lifecycle", &*self.lifecycle.lock())
            .field("root", &self.shared.root())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;

    fn doc(id: &str, body: &str) -> Document {
        Document::new(id).with_text("body", body)
    }

    #[test]
    fn test_in_memory_batch_and_read() {
        let index = Index::open_default(IndexConfig::in_memory()).unwrap();
        assert!(index.config().unsafe_batch);

        let mut batch = Batch::new();
        batch.update(doc("a", "red apple"));
        batch.update(doc("b", "green apple"));
        batch.set_internal("seq", b"1".to_vec());
        index.batch(batch).unwrap();

        let reader = index.reader();
        assert_eq!(reader.epoch(), 1);
        assert_eq!(reader.doc_count(), 2);
        assert_eq!(reader.get_internal("seq"), Some(&b"1"[..]));
        assert_eq!(
            index.stats().bytes_in_memory,
            reader.segments()[0].segment().size_in_bytes()
        );

        index.update(doc("a", "yellow")).unwrap();
        let next = index.reader();
        assert_eq!(next.epoch(), 2);
        assert_eq!(next.doc_count(), 2);
        // the older snapshot is unchanged
        assert_eq!(reader.doc_count(), 2);
        assert_eq!(reader.segment_count(), 1);
        assert_eq!(next.segment_count(), 2);
    }

    #[test]
    fn test_delete_only_batch_drops_empty_segments() {
        let index = Index::open_default(IndexConfig::in_memory()).unwrap();
        index.update(doc("a", "one")).unwrap();
        index.delete("a").unwrap();

        let reader = index.reader();
        assert_eq!(reader.doc_count(), 0);
        assert_eq!(reader.segment_count(), 0);

        let stats = index.stats();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.empty_batches, 1);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.updates, 1);
    }

    #[test]
    fn test_internal_values_set_and_delete() {
        let index = Index::open_default(IndexConfig::in_memory()).unwrap();
        index.set_internal("k", b"v".to_vec()).unwrap();
        assert_eq!(index.reader().get_internal("k"), Some(&b"v"[..]));
        index.delete_internal("k").unwrap();
        assert_eq!(index.reader().get_internal("k"), None);
    }

    #[test]
    fn test_in_memory_persisted_callback_fires() {
        let index = Index::open_default(IndexConfig::in_memory()).unwrap();
        let (tx, rx) = bounded(1);
        let mut batch = Batch::new();
        batch.update(doc("a", "x"));
        batch.on_persisted(move |r| {
            let _ = tx.send(r.is_ok());
        });
        index.batch(batch).unwrap();
        assert_eq!(rx.recv().unwrap(), true);
    }

    /// Rejects any document carrying a `poison` keyword
    struct PickyAnalyzer(StandardAnalyzer);

    impl Analyzer for PickyAnalyzer {
        fn analyze(&self, doc: &Document) -> Result<crate::models::AnalysisResult> {
            if doc.fields.iter().any(|f| f.name == "poison") {
                return Err(CuttleError::Analysis(format!("rejected {}", doc.id)));
            }
            self.0.analyze(doc)
        }
    }

    #[test]
    fn test_analysis_failure_aborts_batch() {
        let analyzer = Arc::new(PickyAnalyzer(StandardAnalyzer::new(&Default::default())));
        let index = Index::open_with_analyzer(
            IndexConfig::in_memory(),
            SegmentRegistry::default(),
            Callbacks::default(),
            analyzer,
        )
        .unwrap();
        index.update(doc("a", "kept")).unwrap();
        let epoch = index.reader().epoch();

        let mut batch = Batch::new();
        batch.update(doc("b", "fine"));
        batch.update(Document::new("c").with_keyword("poison", "yes"));
        batch.delete("a");
        let err = index.batch(batch).unwrap_err();
        assert!(matches!(err, CuttleError::Analysis(_)));

        let reader = index.reader();
        assert_eq!(reader.epoch(), epoch);
        assert_eq!(reader.doc_count(), 1);
        assert_eq!(index.stats().errors, 1);

        index.update(doc("b", "fine")).unwrap();
        assert_eq!(index.reader().doc_count(), 2);
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_send_only_persisted_callback_on_disk() {
        assert_send_sync::<Shared>();

        let dir = tempfile::TempDir::new().unwrap();
        let index = Index::open_default(IndexConfig::new(dir.path())).unwrap();
        let (tx, rx) = bounded(1);
        // a Cell is Send but not Sync
        let seen = std::cell::Cell::new(false);
        let mut batch = Batch::new();
        batch.update(doc("a", "x"));
        batch.on_persisted(move |r| {
            seen.set(r.is_ok());
            let _ = tx.send(seen.get());
        });
        index.batch(batch).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap());
        index.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_work() {
        let index = Index::open_default(IndexConfig::in_memory()).unwrap();
        index.update(doc("a", "x")).unwrap();
        let reader = index.reader();

        index.close().unwrap();
        index.close().unwrap();
        assert!(index.is_closed());

        let err = index.update(doc("b", "y")).unwrap_err();
        assert!(err.is_closed());
        // snapshots taken before close stay readable
        assert_eq!(reader.doc_count(), 1);
    }

    #[test]
    fn test_in_memory_force_merge() {
        let index = Index::open_default(IndexConfig::in_memory()).unwrap();
        for i in 0..4 {
            index.update(doc(&format!("d{i}"), "shared")).unwrap();
        }
        index.delete("d0").unwrap();
        assert_eq!(index.reader().segment_count(), 3);

        index.force_merge().unwrap();
        let reader = index.reader();
        assert_eq!(reader.segment_count(), 1);
        assert_eq!(reader.doc_count(), 3);
        assert_eq!(index.stats().mem_merges, 1);
    }

    #[test]
    fn test_read_only_rejects_batches() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = IndexConfig::new(dir.path()).with_read_only(true);
        let index = Index::open_default(config).unwrap();
        let err = index.update(doc("a", "x")).unwrap_err();
        assert!(matches!(err, CuttleError::InvalidRequest(_)));
    }
}
