//! Background persistence and cleanup
//!
//! The persister writes every new root to disk, commits it to the catalog
//! and wakes the batches waiting for durability. Between rounds it drops
//! catalog epochs nobody references anymore and deletes the segment files
//! they leave behind.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, select, Receiver};
use tracing::{debug, info, warn};

use super::catalog::{Catalog, SegmentRecord, SnapshotRecord};
use super::events::EventKind;
use super::index::Shared;
use super::introducer::{EpochWatcher, PersistIntroduction};
use super::merger;
use super::snapshot::{IndexSnapshot, SegmentSnapshot, SnapshotOwner};
use super::stats::Stats;
use crate::error::CuttleError;
use crate::segment::{parse_segment_file_name, Segment, SegmentRegistry, SEGMENT_FILE_EXT};
use crate::Result;

const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Root snapshot and counters recovered from the catalog
pub(crate) struct LoadedRoot {
    pub(crate) root: IndexSnapshot,
    pub(crate) next_epoch: u64,
    pub(crate) next_segment_id: u64,
}

impl LoadedRoot {
    pub(crate) fn empty(owner: &SnapshotOwner) -> Self {
        owner.tracker.set_root(0);
        Self {
            root: IndexSnapshot::empty(Some(owner.clone())),
            next_epoch: 1,
            next_segment_id: 1,
        }
    }
}

/// Open every segment a catalog record references
pub(crate) fn load_segments(
    record: &SnapshotRecord,
    dir: &Path,
    registry: &SegmentRegistry,
) -> Result<Vec<SegmentSnapshot>> {
    let mut segments = Vec::with_capacity(record.segments.len());
    for seg in &record.segments {
        let plugin = registry.get(&seg.kind, seg.version)?;
        let segment = plugin.open(&dir.join(&seg.path))?;
        segments.push(SegmentSnapshot::new(seg.id, segment, seg.deleted_bitmap()?));
    }
    Ok(segments)
}

/// Load the newest loadable epoch as the root. Older epochs and ones that
/// fail to load become eligible for removal.
pub(crate) fn load_from_catalog(
    catalog: &Catalog,
    dir: &Path,
    registry: &SegmentRegistry,
    owner: &SnapshotOwner,
) -> Result<LoadedRoot> {
    let epochs = catalog.epochs()?;
    let mut root: Option<IndexSnapshot> = None;

    for &epoch in &epochs {
        if root.is_some() {
            owner.tracker.mark_eligible(epoch);
            continue;
        }
        let Some(record) = catalog.get(epoch)? else {
            continue;
        };
        match load_segments(&record, dir, registry) {
            Ok(segments) => {
                owner.tracker.set_root(epoch);
                info!(epoch, segments = segments.len(), "loaded snapshot");
                root = Some(IndexSnapshot::new(
                    segments,
                    record.internal,
                    epoch,
                    Some(owner.clone()),
                ));
            }
            Err(e) => {
                warn!(epoch, error = %e, "skipping unloadable snapshot");
                owner.tracker.mark_eligible(epoch);
            }
        }
    }

    let Some(root) = root else {
        let mut loaded = LoadedRoot::empty(owner);
        loaded.next_epoch = epochs.first().map(|e| e + 1).unwrap_or(1);
        loaded.next_segment_id = max_segment_id_on_disk(dir).map(|id| id + 1).unwrap_or(1);
        return Ok(loaded);
    };

    let max_in_root = root.segments.iter().map(|s| s.id()).max();
    let max_id = max_segment_id_on_disk(dir).max(max_in_root);
    Ok(LoadedRoot {
        next_epoch: epochs.first().map(|e| e + 1).unwrap_or(root.epoch + 1),
        next_segment_id: max_id.map(|id| id + 1).unwrap_or(1),
        root,
    })
}

fn max_segment_id_on_disk(dir: &Path) -> Option<u64> {
    std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|e| e.file_name().to_str().and_then(parse_segment_file_name))
        .max()
}

fn segment_files_on_disk(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(parse_segment_file_name)
                .is_some()
        })
        .count()
}

struct PersisterState {
    last_persisted: u64,
    last_merged: u64,
    /// Merger watchers waiting for `last_persisted` to pass their epoch
    watchers: Vec<EpochWatcher>,
}

impl PersisterState {
    fn notify_merge_watchers(&mut self) {
        let last = self.last_persisted;
        self.watchers.retain(|w| {
            if w.epoch < last {
                w.wake();
                false
            } else {
                true
            }
        });
    }

    fn add_watcher(&mut self, watcher: EpochWatcher) {
        self.last_merged = watcher.epoch;
        self.watchers.push(watcher);
    }
}

enum Wake {
    Ready,
    Stop,
}

pub(crate) fn run(shared: Arc<Shared>, notifier: Receiver<EpochWatcher>, persisted_epoch: u64) {
    let mut state = PersisterState {
        last_persisted: persisted_epoch,
        last_merged: 0,
        watchers: Vec::new(),
    };

    loop {
        if shared.is_closing() {
            break;
        }
        for w in notifier.try_iter() {
            state.add_watcher(w);
        }
        if !pause_for_merger(&shared, &notifier, &mut state) {
            break;
        }

        let taken = {
            let mut root = shared.root.write();
            if root.root.epoch > state.last_persisted {
                Some((
                    root.root.clone(),
                    std::mem::take(&mut root.persisted_waiters),
                    std::mem::take(root.persisted_callbacks.get_mut()),
                ))
            } else {
                None
            }
        };

        if let Some((snapshot, waiters, callbacks)) = taken {
            let start = Instant::now();
            match persist_snapshot(&shared, &snapshot) {
                Ok(()) => {
                    state.last_persisted = snapshot.epoch;
                    for w in waiters {
                        let _ = w.send(Ok(()));
                    }
                    for cb in callbacks {
                        cb(Ok(()));
                    }
                    Stats::inc(&shared.stats().persisted_epochs);
                    Stats::set(&shared.stats().last_persisted_epoch, snapshot.epoch);
                    shared.metrics.record_persist(start.elapsed().as_secs_f64());
                    state.notify_merge_watchers();
                    shared
                        .callbacks
                        .fire(EventKind::PersisterProgress, start.elapsed());
                    debug!(epoch = snapshot.epoch, "persisted");
                }
                Err(e) if e.is_closed() => {
                    let mut root = shared.root.write();
                    root.persisted_waiters.extend(waiters);
                    root.persisted_callbacks.get_mut().extend(callbacks);
                    break;
                }
                Err(e) => {
                    Stats::inc(&shared.stats().persist_errors);
                    for w in waiters {
                        let _ = w.send(Err(CuttleError::Internal(format!("persist failed: {}", e))));
                    }
                    // later rounds retry for the callbacks
                    shared.root.write().persisted_callbacks.get_mut().extend(callbacks);
                    shared.report_async_error(&e);
                    if !shared.nap(RETRY_BACKOFF) {
                        break;
                    }
                    continue;
                }
            }
            drop(snapshot);

            if shared.root().epoch > state.last_persisted {
                continue;
            }
        }

        let (tx, rx) = bounded(1);
        let watcher = EpochWatcher {
            epoch: state.last_persisted,
            notify: tx,
        };
        if shared
            .send(&shared.channels.introducer_watchers, watcher)
            .is_err()
        {
            break;
        }

        if let Err(e) = remove_old_data(&shared) {
            if e.is_closed() {
                break;
            }
            shared.report_async_error(&e);
        }

        let wake = select! {
            recv(shared.close_rx) -> _ => Wake::Stop,
            recv(rx) -> _ => Wake::Ready,
            recv(notifier) -> msg => match msg {
                Ok(w) => {
                    state.add_watcher(w);
                    state.notify_merge_watchers();
                    Wake::Ready
                }
                Err(_) => Wake::Ready,
            },
        };
        if let Wake::Stop = wake {
            break;
        }
    }
    debug!(last_persisted = state.last_persisted, "persister stopped");
}

/// Give the merger a chance to keep the number of files on disk down.
/// Returns false when the index is closing.
fn pause_for_merger(shared: &Shared, notifier: &Receiver<EpochWatcher>, state: &mut PersisterState) -> bool {
    state.notify_merge_watchers();

    let Ok(dir) = shared.dir() else {
        return true;
    };
    let opts = &shared.config.persister;
    let mut files = segment_files_on_disk(dir);

    if files < opts.nap_under_num_files && opts.nap_time_ms > 0 {
        let wake = select! {
            recv(shared.close_rx) -> _ => Wake::Stop,
            recv(notifier) -> msg => {
                if let Ok(w) = msg {
                    state.add_watcher(w);
                    state.notify_merge_watchers();
                }
                Wake::Ready
            },
            default(Duration::from_millis(opts.nap_time_ms)) => {
                Stats::inc(&shared.stats().persister_nap_pauses);
                Wake::Ready
            },
        };
        return matches!(wake, Wake::Ready);
    }

    if files > opts.nap_under_num_files {
        if let Err(e) = remove_old_data(shared) {
            shared.report_async_error(&e);
        }
        files = segment_files_on_disk(dir);
    }

    while opts.nap_under_num_files > 0
        && files >= opts.nap_under_num_files
        && state.last_merged < state.last_persisted
    {
        Stats::inc(&shared.stats().persister_slow_merger_pauses);
        let wake = select! {
            recv(shared.close_rx) -> _ => Wake::Stop,
            recv(notifier) -> msg => match msg {
                Ok(w) => {
                    state.add_watcher(w);
                    Wake::Ready
                }
                Err(_) => Wake::Stop,
            },
        };
        if let Wake::Stop = wake {
            return !shared.is_closing();
        }
        state.notify_merge_watchers();
        files = segment_files_on_disk(dir);
    }
    true
}

/// Make `snapshot` durable, merging its in-memory segments first when
/// there are enough of them
pub(crate) fn persist_snapshot(shared: &Shared, snapshot: &IndexSnapshot) -> Result<()> {
    if persist_maybe_merge(shared, snapshot)? {
        return Ok(());
    }
    persist_direct(shared, snapshot)
}

fn persist_maybe_merge(shared: &Shared, snapshot: &IndexSnapshot) -> Result<bool> {
    let volatile: Vec<SegmentSnapshot> = snapshot
        .segments
        .iter()
        .filter(|s| !s.is_persisted())
        .cloned()
        .collect();
    let min = shared.config.persister.min_segments_for_in_memory_merge.max(2);
    if volatile.len() < min {
        return Ok(false);
    }

    let merged = merger::merge_and_introduce(shared, &volatile, false)?;
    let merged_ids: HashSet<u64> = volatile.iter().map(|s| s.id()).collect();

    // same content as `snapshot`, with the volatile segments replaced by
    // their merge result
    let mut segments: Vec<SegmentSnapshot> = snapshot
        .segments
        .iter()
        .filter(|s| !merged_ids.contains(&s.id()))
        .cloned()
        .collect();
    if merged.segment.count() > 0 {
        segments.push(SegmentSnapshot::new(merged.new_id, merged.segment, None));
    }
    let equivalent = IndexSnapshot::new(segments, snapshot.internal.clone(), snapshot.epoch, None);
    persist_direct(shared, &equivalent)?;
    Ok(true)
}

fn persist_direct(shared: &Shared, snapshot: &IndexSnapshot) -> Result<()> {
    let dir = shared.dir()?;
    let catalog = shared
        .catalog
        .as_ref()
        .ok_or_else(|| CuttleError::Internal("persisting without a catalog".into()))?;
    let mut records = Vec::with_capacity(snapshot.segments.len());
    let mut persisted: HashMap<u64, Arc<dyn Segment>> = HashMap::new();
    let mut items = 0u64;
    for s in &snapshot.segments {
        if shared.is_closing() {
            return Err(CuttleError::Closed);
        }
        let name = s.file_name();
        let (kind, version) = s.segment().format();
        if !s.is_persisted() {
            let path = dir.join(&name);
            let plugin = shared.registry.get(kind, version)?;
            s.segment().persist(&path)?;
            persisted.insert(s.id(), plugin.open(&path)?);
            items += s.count();
        }
        records.push(SegmentRecord::new(s.id(), name, (kind, version), s.deleted())?);
    }

    let record = SnapshotRecord {
        segments: records,
        internal: snapshot.internal.clone(),
    };
    catalog.put(snapshot.epoch, &record)?;

    if !persisted.is_empty() {
        let (tx, rx) = bounded(1);
        shared.send(
            &shared.channels.persists,
            PersistIntroduction {
                persisted,
                applied: tx,
            },
        )?;
        shared.wait(&rx)?;
    }
    Stats::add(&shared.stats().items_persisted, items);
    Ok(())
}

/// Drop unreferenced catalog epochs, then the files nothing refers to
pub(crate) fn remove_old_data(shared: &Shared) -> Result<()> {
    let snapshots = remove_old_snapshots(shared)?;
    let files = remove_old_files(shared)?;
    if snapshots > 0 || files > 0 {
        debug!(snapshots, files, "removed old data");
    }
    Ok(())
}

fn remove_old_snapshots(shared: &Shared) -> Result<usize> {
    let Some(catalog) = &shared.catalog else {
        return Ok(0);
    };
    let epochs = catalog.epochs()?;
    let keep = shared.config.num_snapshots_to_keep.max(1);
    let protected: HashSet<u64> = epochs.iter().take(keep).copied().collect();
    let present: HashSet<u64> = epochs.into_iter().collect();
    let root_epoch = shared.owner.tracker.root_epoch();

    let mut eligible = shared.owner.tracker.take_eligible();
    eligible.sort_unstable();
    eligible.dedup();

    let mut remove = Vec::new();
    let mut restore = Vec::new();
    for epoch in eligible {
        if protected.contains(&epoch) || epoch == root_epoch {
            restore.push(epoch);
        } else if present.contains(&epoch) {
            remove.push(epoch);
        }
    }
    shared.owner.tracker.restore(restore);

    if let Err(e) = catalog.remove(&remove) {
        shared.owner.tracker.restore(remove);
        return Err(e);
    }
    Stats::add(&shared.stats().snapshots_removed, remove.len() as u64);
    Ok(remove.len())
}

fn remove_old_files(shared: &Shared) -> Result<usize> {
    let dir = shared.dir()?;
    let tmp_ext = format!("{}.tmp", SEGMENT_FILE_EXT);
    let mut on_disk = Vec::new();
    for entry in std::fs::read_dir(dir)?.flatten() {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if parse_segment_file_name(&name).is_some() || name.ends_with(&tmp_ext) {
            on_disk.push(name);
        }
    }
    if on_disk.is_empty() {
        return Ok(0);
    }

    let (in_root, ineligible) = {
        let state = shared.root.read();
        let in_root: HashSet<String> = state
            .root
            .segments
            .iter()
            .filter(|s| s.is_persisted())
            .map(|s| s.file_name())
            .collect();
        (in_root, state.ineligible.clone())
    };
    let referenced = match &shared.catalog {
        Some(catalog) => catalog.file_names()?,
        None => HashSet::new(),
    };

    let mut removed = 0;
    for name in on_disk {
        let base = name.strip_suffix(".tmp").unwrap_or(&name);
        if referenced.contains(base) || in_root.contains(base) || ineligible.contains(base) {
            continue;
        }
        match std::fs::remove_file(dir.join(&name)) {
            Ok(()) => removed += 1,
            Err(e) => warn!(file = %name, error = %e, "failed to remove segment file"),
        }
    }
    Stats::add(&shared.stats().files_removed, removed as u64);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analyzer, StandardAnalyzer};
    use crate::config::AnalysisConfig;
    use crate::engine::snapshot::EpochTracker;
    use crate::models::Document;
    use crate::segment::{segment_file_name, FstSegmentPlugin, SegmentPlugin};
    use roaring::RoaringBitmap;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    const FST: (&str, u32) = (FstSegmentPlugin::KIND, FstSegmentPlugin::VERSION);

    fn owner() -> SnapshotOwner {
        SnapshotOwner {
            tracker: Arc::new(EpochTracker::default()),
            stats: Arc::new(Stats::default()),
        }
    }

    fn write_segment(dir: &Path, id: u64, ids: &[&str]) -> SegmentRecord {
        let analyzer = StandardAnalyzer::new(&AnalysisConfig::default());
        let results: Vec<_> = ids
            .iter()
            .map(|id| analyzer.analyze(&Document::new(*id).with_text("body", "text")).unwrap())
            .collect();
        let segment = FstSegmentPlugin.build(&results).unwrap();
        segment.persist(&dir.join(segment_file_name(id))).unwrap();
        SegmentRecord::new(id, segment_file_name(id), segment.format(), None).unwrap()
    }

    fn record(segments: Vec<SegmentRecord>) -> SnapshotRecord {
        SnapshotRecord {
            segments,
            internal: BTreeMap::new(),
        }
    }

    #[test]
    fn test_load_newest_epoch() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog"), false).unwrap();
        let a = write_segment(dir.path(), 1, &["a", "b"]);
        write_segment(dir.path(), 4, &["c", "d"]);
        let deleted: RoaringBitmap = [0u32].into_iter().collect();
        let b = SegmentRecord::new(4, segment_file_name(4), FST, Some(&deleted)).unwrap();
        catalog.put(2, &record(vec![a.clone()])).unwrap();
        catalog.put(5, &record(vec![a, b])).unwrap();

        let owner = owner();
        let loaded =
            load_from_catalog(&catalog, dir.path(), &SegmentRegistry::default(), &owner).unwrap();
        assert_eq!(loaded.root.epoch, 5);
        assert_eq!(loaded.root.doc_count(), 3);
        assert_eq!(loaded.next_epoch, 6);
        assert_eq!(loaded.next_segment_id, 5);
        assert_eq!(owner.tracker.root_epoch(), 5);
        assert_eq!(owner.tracker.take_eligible(), vec![2]);
    }

    #[test]
    fn test_unloadable_epoch_is_skipped() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog"), false).unwrap();
        let a = write_segment(dir.path(), 1, &["a"]);
        catalog.put(1, &record(vec![a])).unwrap();
        let missing = SegmentRecord::new(9, segment_file_name(9), FST, None).unwrap();
        catalog.put(2, &record(vec![missing])).unwrap();

        let owner = owner();
        let loaded =
            load_from_catalog(&catalog, dir.path(), &SegmentRegistry::default(), &owner).unwrap();
        assert_eq!(loaded.root.epoch, 1);
        assert_eq!(loaded.next_epoch, 3);
        assert_eq!(owner.tracker.take_eligible(), vec![2]);
    }

    #[test]
    fn test_empty_catalog_counts_orphan_files() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(&dir.path().join("catalog"), false).unwrap();
        write_segment(dir.path(), 7, &["a"]);

        let loaded =
            load_from_catalog(&catalog, dir.path(), &SegmentRegistry::default(), &owner()).unwrap();
        assert_eq!(loaded.root.epoch, 0);
        assert_eq!(loaded.next_epoch, 1);
        assert_eq!(loaded.next_segment_id, 8);
    }
}
