//! Background segment merging
//!
//! The merger plans over the persisted segments of the root each time the
//! persister moves past the epoch it last planned for. Each task is merged
//! into a new segment file and handed to the introducer, which reconciles
//! deletes that arrived while the merge ran.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{bounded, select, Receiver, Sender};
use roaring::RoaringBitmap;
use tracing::{debug, info};

use super::events::EventKind;
use super::index::Shared;
use super::introducer::{EpochWatcher, MergeIntroduction, MergeOutcome, MergedSource};
use super::snapshot::SegmentSnapshot;
use super::stats::Stats;
use crate::error::CuttleError;
use crate::segment::{segment_file_name, PlanSegment, Segment};
use crate::Result;

/// Upper bound on planning passes for one forced merge
const MAX_FORCED_PASSES: usize = 32;

pub(crate) struct ForceMergeRequest {
    pub(crate) done: Sender<Result<()>>,
}

pub(crate) struct MergeResult {
    pub(crate) new_id: u64,
    pub(crate) segment: Arc<dyn Segment>,
    pub(crate) outcome: MergeOutcome,
}

enum Wake {
    Ready,
    Force,
    Stop,
}

pub(crate) fn run(shared: Arc<Shared>, force_rx: Receiver<ForceMergeRequest>) {
    let mut last_planned = 0u64;
    let mut pending: Vec<ForceMergeRequest> = Vec::new();

    loop {
        if shared.is_closing() {
            break;
        }
        pending.extend(force_rx.try_iter());

        let epoch = shared.root().epoch;
        if !pending.is_empty() || epoch != last_planned {
            let forced = !pending.is_empty();
            let start = Instant::now();
            let result = plan_and_merge(&shared, forced);
            // failed tasks are retried on the next persisted epoch
            last_planned = epoch;
            match &result {
                Ok(merges) => {
                    Stats::set(&shared.stats().last_merged_epoch, epoch);
                    shared
                        .callbacks
                        .fire(EventKind::MergerProgress, start.elapsed());
                    if *merges > 0 {
                        debug!(merges, forced, "merge pass done");
                    }
                }
                Err(e) if e.is_closed() => break,
                Err(e) => shared.report_async_error(e),
            }
            for req in pending.drain(..) {
                let reply = match &result {
                    Ok(_) => Ok(()),
                    Err(e) => Err(CuttleError::Internal(format!("merge failed: {}", e))),
                };
                let _ = req.done.send(reply);
            }
        }

        let (tx, rx) = bounded(1);
        let wake = select! {
            send(shared.channels.persister_notifier, EpochWatcher { epoch: last_planned, notify: tx }) -> r => {
                if r.is_ok() { Wake::Ready } else { Wake::Stop }
            },
            recv(force_rx) -> msg => match msg {
                Ok(req) => {
                    pending.push(req);
                    Wake::Force
                }
                Err(_) => Wake::Stop,
            },
            recv(shared.close_rx) -> _ => Wake::Stop,
        };
        match wake {
            Wake::Stop => break,
            Wake::Force => continue,
            Wake::Ready => {}
        }

        let wake = select! {
            recv(rx) -> _ => Wake::Ready,
            recv(force_rx) -> msg => match msg {
                Ok(req) => {
                    pending.push(req);
                    Wake::Force
                }
                Err(_) => Wake::Stop,
            },
            recv(shared.close_rx) -> _ => Wake::Stop,
        };
        if let Wake::Stop = wake {
            break;
        }
    }

    for req in pending.drain(..).chain(force_rx.try_iter()) {
        let _ = req.done.send(Err(CuttleError::Closed));
    }
    debug!("merger stopped");
}

/// Plan and run merges against the current root. A forced pass repeats
/// until the policy has nothing left to do.
pub(crate) fn plan_and_merge(shared: &Shared, forced: bool) -> Result<usize> {
    let persistent = shared.is_persistent();
    let mut merges = 0;

    for _ in 0..MAX_FORCED_PASSES {
        let root = shared.root();
        let candidates: Vec<PlanSegment> = root
            .segments
            .iter()
            .filter(|s| !persistent || s.is_persisted())
            .map(|s| PlanSegment {
                id: s.id(),
                live_docs: s.live_count(),
                total_docs: s.count(),
            })
            .collect();

        let tasks = if forced {
            shared.merge_policy.plan_forced(&candidates)
        } else {
            shared.merge_policy.plan(&candidates)
        };
        if tasks.is_empty() {
            break;
        }

        for task in tasks {
            if shared.is_closing() {
                return Err(CuttleError::Closed);
            }
            let sources: Vec<SegmentSnapshot> = task
                .segment_ids
                .iter()
                .filter_map(|id| root.segments.iter().find(|s| s.id() == *id).cloned())
                .collect();
            if sources.is_empty() {
                continue;
            }
            debug!(segments = ?task.segment_ids, reason = ?task.reason, "merging");
            merge_and_introduce(shared, &sources, persistent)?;
            merges += 1;
        }

        if !forced {
            break;
        }
    }
    Ok(merges)
}

/// Merge `sources` into one new segment and introduce it. With `persist`
/// the result is written to its segment file and reopened first.
pub(crate) fn merge_and_introduce(
    shared: &Shared,
    sources: &[SegmentSnapshot],
    persist: bool,
) -> Result<MergeResult> {
    let start = Instant::now();
    let new_id = shared.next_segment_id.fetch_add(1, Ordering::SeqCst);
    let file_name = segment_file_name(new_id);
    if persist {
        shared.mark_ineligible(&file_name);
    }

    match merge_inner(shared, sources, persist, new_id) {
        Ok(result) => {
            let elapsed = start.elapsed();
            if persist {
                Stats::inc(&shared.stats().file_merges);
            } else {
                Stats::inc(&shared.stats().mem_merges);
            }
            shared.metrics.record_merge(elapsed.as_secs_f64());
            info!(
                segment = new_id,
                epoch = result.outcome.snapshot.epoch(),
                sources = sources.len(),
                docs = result.segment.count(),
                skipped = result.outcome.skipped,
                persisted = persist,
                elapsed_ms = elapsed.as_millis() as u64,
                "merge introduced"
            );
            Ok(result)
        }
        Err(e) => {
            if persist {
                Stats::inc(&shared.stats().file_merge_errors);
                shared.unmark_ineligible(&file_name);
            }
            Err(e)
        }
    }
}

fn merge_inner(
    shared: &Shared,
    sources: &[SegmentSnapshot],
    persist: bool,
    new_id: u64,
) -> Result<MergeResult> {
    let plugin = shared.registry.default_plugin();
    let segments: Vec<Arc<dyn Segment>> = sources.iter().map(|s| s.segment().clone()).collect();
    let drops: Vec<Option<RoaringBitmap>> = sources.iter().map(|s| s.deleted().cloned()).collect();

    let output = plugin.merge(&segments, &drops, &shared.closing)?;
    let segment = if persist {
        let path = shared.segment_path(new_id)?;
        output.segment.persist(&path)?;
        plugin.open(&path)?
    } else {
        output.segment
    };

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

    let (tx, rx) = bounded(1);
    shared.send(
        &shared.channels.merges,
        MergeIntroduction {
            sources: merged,
            new_id,
            new_segment: segment.clone(),
            notify: tx,
        },
    )?;
    let outcome = shared.wait(&rx)?;

    Ok(MergeResult {
        new_id,
        segment,
        outcome,
    })
}
