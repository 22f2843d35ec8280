//! Engine counters
//!
//! Counters are plain atomics bumped from the foreground and background
//! paths. [`StatsSnapshot`] is a point-in-time copy that also carries the
//! values computed on demand (root shape, disk usage).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct Stats {
    pub(crate) updates: AtomicU64,
    pub(crate) deletes: AtomicU64,
    pub(crate) batches: AtomicU64,
    pub(crate) empty_batches: AtomicU64,
    pub(crate) errors: AtomicU64,
    pub(crate) analysis_time_ns: AtomicU64,
    pub(crate) index_time_ns: AtomicU64,

    pub(crate) term_searchers_started: AtomicU64,
    pub(crate) term_searchers_finished: AtomicU64,

    pub(crate) introductions: AtomicU64,
    pub(crate) introduction_errors: AtomicU64,
    pub(crate) items_introduced: AtomicU64,
    pub(crate) items_persisted: AtomicU64,

    pub(crate) persisted_epochs: AtomicU64,
    pub(crate) persist_errors: AtomicU64,
    pub(crate) persister_nap_pauses: AtomicU64,
    pub(crate) persister_slow_merger_pauses: AtomicU64,
    pub(crate) last_persisted_epoch: AtomicU64,

    pub(crate) file_merges: AtomicU64,
    pub(crate) file_merge_errors: AtomicU64,
    pub(crate) mem_merges: AtomicU64,
    pub(crate) merges_skipped: AtomicU64,
    pub(crate) last_merged_epoch: AtomicU64,

    pub(crate) snapshots_removed: AtomicU64,
    pub(crate) files_removed: AtomicU64,
    pub(crate) reverts: AtomicU64,
}

impl Stats {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set(counter: &AtomicU64, value: u64) {
        counter.store(value, Ordering::Relaxed);
    }

    /// Copy the counters; the on-demand fields are left at zero
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            updates: get(&self.updates),
            deletes: get(&self.deletes),
            batches: get(&self.batches),
            empty_batches: get(&self.empty_batches),
            errors: get(&self.errors),
            analysis_time_ns: get(&self.analysis_time_ns),
            index_time_ns: get(&self.index_time_ns),
            term_searchers_started: get(&self.term_searchers_started),
            term_searchers_finished: get(&self.term_searchers_finished),
            introductions: get(&self.introductions),
            introduction_errors: get(&self.introduction_errors),
            items_introduced: get(&self.items_introduced),
            items_persisted: get(&self.items_persisted),
            persisted_epochs: get(&self.persisted_epochs),
            persist_errors: get(&self.persist_errors),
            persister_nap_pauses: get(&self.persister_nap_pauses),
            persister_slow_merger_pauses: get(&self.persister_slow_merger_pauses),
            last_persisted_epoch: get(&self.last_persisted_epoch),
            file_merges: get(&self.file_merges),
            file_merge_errors: get(&self.file_merge_errors),
            mem_merges: get(&self.mem_merges),
            merges_skipped: get(&self.merges_skipped),
            last_merged_epoch: get(&self.last_merged_epoch),
            snapshots_removed: get(&self.snapshots_removed),
            files_removed: get(&self.files_removed),
            reverts: get(&self.reverts),
            ..Default::default()
        }
    }
}

/// Point-in-time engine statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub updates: u64,
    pub deletes: u64,
    pub batches: u64,
    pub empty_batches: u64,
    pub errors: u64,
    pub analysis_time_ns: u64,
    pub index_time_ns: u64,

    pub term_searchers_started: u64,
    pub term_searchers_finished: u64,

    pub introductions: u64,
    pub introduction_errors: u64,
    pub items_introduced: u64,
    pub items_persisted: u64,

    pub persisted_epochs: u64,
    pub persist_errors: u64,
    pub persister_nap_pauses: u64,
    pub persister_slow_merger_pauses: u64,
    pub last_persisted_epoch: u64,

    pub file_merges: u64,
    pub file_merge_errors: u64,
    pub mem_merges: u64,
    pub merges_skipped: u64,
    pub last_merged_epoch: u64,

    pub snapshots_removed: u64,
    pub files_removed: u64,
    pub reverts: u64,

    pub root_epoch: u64,
    pub root_segments: u64,
    pub root_memory_segments: u64,
    pub root_file_segments: u64,
    pub doc_count: u64,
    pub files_on_disk: u64,
    pub bytes_on_disk: u64,
    /// Volatile segment data plus every segment's tombstones
    pub bytes_in_memory: u64,
    pub ineligible_files: u64,
}

impl StatsSnapshot {
    /// Term searchers not yet closed
    pub fn open_term_searchers(&self) -> u64 {
        self.term_searchers_started
            .saturating_sub(self.term_searchers_finished)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
