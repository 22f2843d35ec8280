//! The introducer: the only code that replaces the root snapshot
//!
//! A single thread drains the request channels one message at a time, so
//! root swaps are totally ordered and need no retry loop. Each request
//! carries its own reply channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{select, Receiver, Sender};
use roaring::RoaringBitmap;
use tracing::{debug, warn};

use super::events::EventKind;
use super::index::Shared;
use super::snapshot::{IndexSnapshot, SegmentSnapshot};
use super::stats::Stats;
use crate::models::PersistedCallback;
use crate::segment::{Segment, DOC_DROPPED};
use crate::Result;

/// A new segment built from one batch, plus the ids it obsoletes
pub(crate) struct SegmentIntroduction {
    pub(crate) id: u64,
    pub(crate) segment: Option<Arc<dyn Segment>>,
    pub(crate) ids: Vec<String>,
    /// Obsoleted local doc numbers per segment id, computed against an
    /// earlier root. Segments missing here are computed under the loop.
    pub(crate) obsoletes: HashMap<u64, RoaringBitmap>,
    pub(crate) internal: HashMap<String, Option<Vec<u8>>>,
    pub(crate) applied: Sender<Result<()>>,
    pub(crate) persisted: Option<Sender<Result<()>>>,
    pub(crate) persisted_callback: Option<PersistedCallback>,
}

/// Disk-backed replacements for volatile segments, same epoch
pub(crate) struct PersistIntroduction {
    pub(crate) persisted: HashMap<u64, Arc<dyn Segment>>,
    pub(crate) applied: Sender<()>,
}

/// One merge input: the segment as it was when the merge started and its
/// old -> new doc number table
pub(crate) struct MergedSource {
    pub(crate) snapshot: SegmentSnapshot,
    pub(crate) remap: Vec<u64>,
}

pub(crate) struct MergeIntroduction {
    pub(crate) sources: HashMap<u64, MergedSource>,
    pub(crate) new_id: u64,
    pub(crate) new_segment: Arc<dyn Segment>,
    pub(crate) notify: Sender<MergeOutcome>,
}

pub(crate) struct MergeOutcome {
    pub(crate) snapshot: Arc<IndexSnapshot>,
    /// Every document of the merge result was deleted meanwhile
    pub(crate) skipped: bool,
}

/// Install previously persisted segments as a new root
pub(crate) struct RevertRequest {
    pub(crate) segments: Vec<SegmentSnapshot>,
    pub(crate) internal: BTreeMap<String, Vec<u8>>,
    pub(crate) applied: Sender<u64>,
    pub(crate) persisted: Option<Sender<Result<()>>>,
}

/// Woken once the root (introducer side) or the last persisted epoch
/// (persister side) moves past `epoch`
pub(crate) struct EpochWatcher {
    pub(crate) epoch: u64,
    pub(crate) notify: Sender<()>,
}

impl EpochWatcher {
    pub(crate) fn wake(&self) {
        let _ = self.notify.try_send(());
    }
}

pub(crate) struct IntroducerInbox {
    pub(crate) introductions: Receiver<SegmentIntroduction>,
    pub(crate) persists: Receiver<PersistIntroduction>,
    pub(crate) merges: Receiver<MergeIntroduction>,
    pub(crate) reverts: Receiver<RevertRequest>,
    pub(crate) watchers: Receiver<EpochWatcher>,
}

enum Request {
    Segment(SegmentIntroduction),
    Persist(PersistIntroduction),
    Merge(MergeIntroduction),
    Revert(RevertRequest),
    Watch(EpochWatcher),
    Stop,
}

pub(crate) fn run(shared: Arc<Shared>, inbox: IntroducerInbox) {
    let mut watchers: Vec<EpochWatcher> = Vec::new();
    loop {
        let current = shared.root.read().root.epoch;
        watchers.retain(|w| {
            if w.epoch < current {
                w.wake();
                false
            } else {
                true
            }
        });

        let request = select! {
            recv(shared.close_rx) -> _ => Request::Stop,
            recv(inbox.watchers) -> msg => msg.map(Request::Watch).unwrap_or(Request::Stop),
            recv(inbox.introductions) -> msg => msg.map(Request::Segment).unwrap_or(Request::Stop),
            recv(inbox.persists) -> msg => msg.map(Request::Persist).unwrap_or(Request::Stop),
            recv(inbox.merges) -> msg => msg.map(Request::Merge).unwrap_or(Request::Stop),
            recv(inbox.reverts) -> msg => msg.map(Request::Revert).unwrap_or(Request::Stop),
        };

        match request {
            Request::Stop => break,
            Request::Watch(w) => watchers.push(w),
            Request::Segment(req) => introduce_segment(&shared, req),
            Request::Persist(req) => introduce_persist(&shared, req),
            Request::Merge(req) => introduce_merge(&shared, req),
            Request::Revert(req) => revert_to_snapshot(&shared, req),
        }
    }
    // dropping the watchers disconnects their receivers
    drop(watchers);
    debug!("introducer stopped");
}

/// Install `segments` as the new root under a fresh epoch
fn swap_root(
    shared: &Shared,
    segments: Vec<SegmentSnapshot>,
    internal: BTreeMap<String, Vec<u8>>,
    before_swap: impl FnOnce(&mut super::index::RootState),
) -> Arc<IndexSnapshot> {
    let (snapshot, prev) = {
        let mut state = shared.root.write();
        before_swap(&mut state);
        let epoch = state.next_snapshot_epoch;
        state.next_snapshot_epoch += 1;
        let snapshot = Arc::new(IndexSnapshot::new(
            segments,
            internal,
            epoch,
            Some(shared.owner.clone()),
        ));
        shared.owner.tracker.set_root(epoch);
        let prev = std::mem::replace(&mut state.root, snapshot.clone());
        (snapshot, prev)
    };
    // released outside the lock
    drop(prev);
    shared
        .metrics
        .set_root(snapshot.epoch, snapshot.segments.len());
    snapshot
}

pub(crate) fn introduce_segment(shared: &Shared, req: SegmentIntroduction) {
    let SegmentIntroduction {
        id,
        segment,
        ids,
        mut obsoletes,
        internal,
        applied,
        persisted,
        persisted_callback,
    } = req;

    let root = shared.root();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    let mut segments = Vec::with_capacity(root.segments.len() + 1);
    for s in &root.segments {
        let delta = match obsoletes.remove(&s.id()) {
            Some(delta) => delta,
            None => match s.segment().doc_numbers(&id_refs) {
                Ok(delta) => delta,
                Err(e) => {
                    warn!(segment = s.id(), error = %e, "obsoletion failed, batch not applied");
                    Stats::inc(&shared.stats().introduction_errors);
                    let _ = applied.send(Err(e));
                    return;
                }
            },
        };
        let deleted = match s.deleted() {
            Some(d) => d | &delta,
            None => delta,
        };
        let next = s.with_deleted(Some(deleted));
        if next.live_count() > 0 {
            segments.push(next);
        }
    }

    if let Some(seg) = segment {
        Stats::add(&shared.stats().items_introduced, seg.count());
        segments.push(SegmentSnapshot::new(id, seg, None));
    }

    let mut map = root.internal.clone();
    for (key, value) in internal {
        match value {
            Some(v) => {
                map.insert(key, v);
            }
            None => {
                map.remove(&key);
            }
        }
    }
    drop(root);

    swap_root(shared, segments, map, |state| {
        if let Some(tx) = persisted {
            state.persisted_waiters.push(tx);
        }
        if let Some(cb) = persisted_callback {
            state.persisted_callbacks.get_mut().push(cb);
        }
    });
    Stats::inc(&shared.stats().introductions);
    let _ = applied.send(Ok(()));
}

pub(crate) fn introduce_persist(shared: &Shared, req: PersistIntroduction) {
    let root = shared.root();
    let segments: Vec<SegmentSnapshot> = root
        .segments
        .iter()
        .map(|s| match req.persisted.get(&s.id()) {
            Some(seg) => s.with_segment(seg.clone()),
            None => s.clone(),
        })
        .collect();

    let prev = {
        let mut state = shared.root.write();
        let snapshot = Arc::new(IndexSnapshot::new(
            segments,
            root.internal.clone(),
            root.epoch,
            Some(shared.owner.clone()),
        ));
        std::mem::replace(&mut state.root, snapshot)
    };
    drop(prev);
    drop(root);
    let _ = req.applied.send(());
}

fn remap_into(remap: &[u64], old: u32, into: &mut RoaringBitmap) {
    if let Some(&new) = remap.get(old as usize) {
        if new != DOC_DROPPED {
            into.insert(new as u32);
        }
    }
}

/// Some doc deleted when the merge started is live again
fn lost_deletes(then: Option<&RoaringBitmap>, now: Option<&RoaringBitmap>) -> bool {
    match (then, now) {
        (None, _) => false,
        (Some(then), None) => !then.is_empty(),
        (Some(then), Some(now)) => !then.is_subset(now),
    }
}

pub(crate) fn introduce_merge(shared: &Shared, req: MergeIntroduction) {
    let start = Instant::now();
    let MergeIntroduction {
        mut sources,
        new_id,
        new_segment,
        notify,
    } = req;

    let root = shared.root();
    let file_name = crate::segment::segment_file_name(new_id);

    // a revert reinstalled a source with fewer deletes than the merge saw;
    // the merge result would drop documents the revert brought back
    let reverted = root.segments.iter().any(|s| {
        sources
            .get(&s.id())
            .is_some_and(|source| lost_deletes(source.snapshot.deleted(), s.deleted()))
    });
    if reverted {
        shared.unmark_ineligible(&file_name);
        Stats::inc(&shared.stats().merges_skipped);
        debug!(segment = new_id, "merge predates a revert, dropped");
        shared
            .callbacks
            .fire(EventKind::MergeIntroduction, start.elapsed());
        let _ = notify.send(MergeOutcome {
            snapshot: root,
            skipped: true,
        });
        return;
    }

    let mut new_deleted = RoaringBitmap::new();
    let mut segments = Vec::with_capacity(root.segments.len());

    for s in &root.segments {
        if let Some(source) = sources.remove(&s.id()) {
            // replaced; carry over deletes that landed after the merge started
            if let Some(now) = s.deleted() {
                let since = match source.snapshot.deleted() {
                    Some(then) => now - then,
                    None => now.clone(),
                };
                for old in since.iter() {
                    remap_into(&source.remap, old, &mut new_deleted);
                }
            }
        } else if s.live_count() > 0 {
            segments.push(s.clone());
        }
    }

    // sources no longer in the root lost all their live docs meanwhile
    for source in sources.values() {
        for old in source.snapshot.live_docs().iter() {
            remap_into(&source.remap, old, &mut new_deleted);
        }
    }
    drop(sources);

    let skipped = new_segment.count() <= new_deleted.len();
    if !skipped {
        segments.push(SegmentSnapshot::new(new_id, new_segment, Some(new_deleted)));
    }

    let internal = root.internal.clone();
    drop(root);
    // from here on the root protects the file, or nothing does when skipped
    let snapshot = swap_root(shared, segments, internal, |state| {
        state.ineligible.remove(&file_name);
    });

    if skipped {
        Stats::inc(&shared.stats().merges_skipped);
    }
    shared
        .callbacks
        .fire(EventKind::MergeIntroduction, start.elapsed());
    let _ = notify.send(MergeOutcome { snapshot, skipped });
}

pub(crate) fn revert_to_snapshot(shared: &Shared, req: RevertRequest) {
    let RevertRequest {
        segments,
        internal,
        applied,
        persisted,
    } = req;

    let names: Vec<String> = segments.iter().map(|s| s.file_name()).collect();
    let snapshot = swap_root(shared, segments, internal, |state| {
        for name in &names {
            state.ineligible.remove(name);
        }
        if let Some(tx) = persisted {
            state.persisted_waiters.push(tx);
        }
    });
    Stats::inc(&shared.stats().reverts);
    let _ = applied.send(snapshot.epoch);
}
