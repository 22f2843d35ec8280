use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::segment::MergePolicyConfig;

/// Top-level index configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index directory. `None` keeps everything in memory with no persister
    /// or merger running.
    pub path: Option<PathBuf>,
    pub read_only: bool,
    /// Return from `batch` as soon as the segment is introduced instead of
    /// waiting for it to be durable.
    pub unsafe_batch: bool,
    /// Number of most recent catalog epochs protected from removal.
    pub num_snapshots_to_keep: usize,
    pub persister: PersisterOptions,
    pub merge: MergePolicyConfig,
    pub analysis: AnalysisConfig,
    /// Plugin kind for new segments instead of the registry default
    pub force_segment_kind: Option<String>,
    /// Plugin version for new segments instead of the registry default
    pub force_segment_version: Option<u32>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            unsafe_batch: false,
            num_snapshots_to_keep: 1,
            persister: PersisterOptions::default(),
            merge: MergePolicyConfig::default(),
            analysis: AnalysisConfig::default(),
            force_segment_kind: None,
            force_segment_version: None,
        }
    }
}

/// Persister pacing and durability knobs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersisterOptions {
    /// Sleep between persisting and the next cycle, giving the merger a
    /// chance to catch up.
    pub nap_time_ms: u64,
    /// Only nap while the number of files on disk is below this.
    pub nap_under_num_files: usize,
    /// Merge volatile segments in memory before writing them once at
    /// least this many are pending.
    pub min_segments_for_in_memory_merge: usize,
    /// fsync the catalog after every committed epoch.
    pub sync: bool,
}

impl Default for PersisterOptions {
    fn default() -> Self {
        Self {
            nap_time_ms: 0,
            nap_under_num_files: 1000,
            min_segments_for_in_memory_merge: 2,
            sync: true,
        }
    }
}

/// Analyzer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub lowercase: bool,
    pub remove_stopwords: bool,
    pub stem: bool,
    pub min_token_length: usize,
    pub max_token_length: usize,
    pub language: String,
    pub worker_threads: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            remove_stopwords: false,
            stem: false,
            min_token_length: 1,
            max_token_length: 255,
            language: "english".to_string(),
            worker_threads: num_cpus::get().clamp(1, 8),
        }
    }
}

/// Configuration profiles for different workloads
#[derive(Clone, Debug)]
pub enum PerformanceProfile {
    LowLatency,
    Balanced,
    HighThroughput,
    Durable,
}

impl PerformanceProfile {
    /// Persister nap for this profile
    pub fn nap_time_ms(&self) -> u64 {
        match self {
            PerformanceProfile::LowLatency => 0,
            PerformanceProfile::Balanced => 0,
            PerformanceProfile::HighThroughput => 200,
            PerformanceProfile::Durable => 0,
        }
    }

    /// Whether batches wait for durability
    pub fn unsafe_batch(&self) -> bool {
        matches!(
            self,
            PerformanceProfile::LowLatency | PerformanceProfile::HighThroughput
        )
    }

    /// Apply this profile to an IndexConfig
    pub fn apply_to(&self, config: &mut IndexConfig) {
        config.persister.nap_time_ms = self.nap_time_ms();
        config.unsafe_batch = self.unsafe_batch();
        config.persister.sync = !matches!(self, PerformanceProfile::HighThroughput);
    }
}

impl IndexConfig {
    /// Configuration for an on-disk index rooted at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Configuration for a purely in-memory index
    pub fn in_memory() -> Self {
        Self {
            unsafe_batch: true,
            ..Default::default()
        }
    }

    /// Apply a performance profile to this configuration
    pub fn with_profile(mut self, profile: PerformanceProfile) -> Self {
        profile.apply_to(&mut self);
        self
    }

    pub fn with_unsafe_batch(mut self, unsafe_batch: bool) -> Self {
        self.unsafe_batch = unsafe_batch;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_snapshots_to_keep(mut self, n: usize) -> Self {
        self.num_snapshots_to_keep = n;
        self
    }

    pub fn with_merge_policy(mut self, merge: MergePolicyConfig) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_persister(mut self, persister: PersisterOptions) -> Self {
        self.persister = persister;
        self
    }

    pub fn with_analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.analysis = analysis;
        self
    }

    /// Build new segments with a specific registered plugin
    pub fn with_segment_format(mut self, kind: impl Into<String>, version: Option<u32>) -> Self {
        self.force_segment_kind = Some(kind.into());
        self.force_segment_version = version;
        self
    }

    /// True when there is no directory to persist into
    pub fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }

    /// Catalog database directory
    pub fn catalog_dir(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|p| p.join("catalog"))
    }
}
