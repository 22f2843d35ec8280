//! Tiered merge policy
//!
//! Segments are sized by live document count:
//! - segments are grouped into tiers of `floor * segments_per_tier^n`
//! - a tier holding more than `segments_per_tier` segments merges its
//!   smallest members
//! - segments whose delete ratio exceeds the threshold are merged first,
//!   padded with the smallest other segments up to `min_merge_count`
//! - tasks never share a segment and never exceed `max_merged_segment_docs`

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Configuration for the tiered merge policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergePolicyConfig {
    /// Upper bound on live docs in a merged segment
    pub max_merged_segment_docs: u64,
    /// Target number of segments per tier
    pub segments_per_tier: usize,
    /// Minimum number of segments in a tier merge
    pub min_merge_count: usize,
    /// Maximum number of segments merged at once
    pub max_merge_count: usize,
    /// Delete ratio above which a segment is rewritten
    pub delete_ratio_threshold: f64,
    /// Segments smaller than this all land in the lowest tier
    pub floor_segment_docs: u64,
}

impl Default for MergePolicyConfig {
    fn default() -> Self {
        Self {
            max_merged_segment_docs: 5_000_000,
            segments_per_tier: 10,
            min_merge_count: 2,
            max_merge_count: 10,
            delete_ratio_threshold: 0.15,
            floor_segment_docs: 2_000,
        }
    }
}

/// A segment as seen by the planner
#[derive(Clone, Debug, PartialEq)]
pub struct PlanSegment {
    pub id: u64,
    pub live_docs: u64,
    pub total_docs: u64,
}

impl PlanSegment {
    pub fn delete_ratio(&self) -> f64 {
        if self.total_docs == 0 {
            0.0
        } else {
            1.0 - (self.live_docs as f64 / self.total_docs as f64)
        }
    }
}

/// Reason why segments should be merged
#[derive(Clone, Debug, PartialEq)]
pub enum MergeReason {
    TierOverflow,
    HighDeleteRatio,
    Forced,
}

/// A planned merge
#[derive(Clone, Debug, PartialEq)]
pub struct MergeTask {
    pub segment_ids: Vec<u64>,
    pub live_docs: u64,
    pub reason: MergeReason,
}

/// Tiered merge policy implementation
#[derive(Clone, Debug, Default)]
pub struct TieredMergePolicy {
    config: MergePolicyConfig,
}

impl TieredMergePolicy {
    pub fn new(config: MergePolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergePolicyConfig {
        &self.config
    }

    /// Plan merges for the given segments. Tasks are disjoint.
    pub fn plan(&self, segments: &[PlanSegment]) -> Vec<MergeTask> {
        let mut used = HashSet::new();
        let mut tasks = Vec::new();

        if let Some(task) = self.high_delete_task(segments) {
            used.extend(task.segment_ids.iter().copied());
            tasks.push(task);
        }

        let remaining: Vec<&PlanSegment> =
            segments.iter().filter(|s| !used.contains(&s.id)).collect();
        for tier in self.group_by_tier(&remaining) {
            if tier.len() <= self.config.segments_per_tier {
                continue;
            }
            let min = self.config.min_merge_count.max(2);
            let merge_count = (tier.len() - self.config.segments_per_tier + 1)
                .max(min)
                .min(self.config.max_merge_count.max(min));

            let mut sorted = tier;
            sorted.sort_by_key(|s| (s.live_docs, s.id));
            let picked = self.take_within_limit(sorted.into_iter(), merge_count);
            if picked.len() >= self.config.min_merge_count {
                tasks.push(Self::task(&picked, MergeReason::TierOverflow));
            }
        }

        tasks
    }

    /// Merge everything down, in chunks of at most `max_merge_count`
    pub fn plan_forced(&self, segments: &[PlanSegment]) -> Vec<MergeTask> {
        let mut sorted: Vec<&PlanSegment> = segments.iter().collect();
        sorted.sort_by_key(|s| s.id);

        let chunk = self.config.max_merge_count.max(2);
        sorted
            .chunks(chunk)
            .filter(|c| c.len() > 1 || c.iter().any(|s| s.live_docs < s.total_docs))
            .map(|c| Self::task(c, MergeReason::Forced))
            .collect()
    }

    fn high_delete_task(&self, segments: &[PlanSegment]) -> Option<MergeTask> {
        let mut candidates: Vec<&PlanSegment> = segments
            .iter()
            .filter(|s| s.delete_ratio() > self.config.delete_ratio_threshold)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| {
            b.delete_ratio()
                .partial_cmp(&a.delete_ratio())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let max = self.config.max_merge_count.max(self.config.min_merge_count);
        let mut picked = self.take_within_limit(candidates.into_iter(), max);

        // too few candidates: fill up with the smallest clean segments
        if picked.len() < self.config.min_merge_count {
            let mut others: Vec<&PlanSegment> = segments
                .iter()
                .filter(|s| picked.iter().all(|p| p.id != s.id))
                .collect();
            others.sort_by_key(|s| (s.live_docs, s.id));
            let mut total: u64 = picked.iter().map(|s| s.live_docs).sum();
            for s in others {
                if picked.len() >= self.config.min_merge_count {
                    break;
                }
                if total + s.live_docs > self.config.max_merged_segment_docs {
                    continue;
                }
                total += s.live_docs;
                picked.push(s);
            }
        }
        (picked.len() >= self.config.min_merge_count.max(1))
            .then(|| Self::task(&picked, MergeReason::HighDeleteRatio))
    }

    fn take_within_limit<'a>(
        &self,
        segments: impl Iterator<Item = &'a PlanSegment>,
        max: usize,
    ) -> Vec<&'a PlanSegment> {
        let mut picked = Vec::new();
        let mut total = 0u64;
        for s in segments {
            if picked.len() >= max {
                break;
            }
            if total + s.live_docs > self.config.max_merged_segment_docs && !picked.is_empty() {
                continue;
            }
            total += s.live_docs;
            picked.push(s);
        }
        picked
    }

    fn group_by_tier<'a>(&self, segments: &[&'a PlanSegment]) -> Vec<Vec<&'a PlanSegment>> {
        let mut tiers: Vec<Vec<&PlanSegment>> = Vec::new();
        for s in segments {
            let tier = self.size_to_tier(s.live_docs);
            if tiers.len() <= tier {
                tiers.resize_with(tier + 1, Vec::new);
            }
            tiers[tier].push(s);
        }
        tiers
    }

    fn size_to_tier(&self, live_docs: u64) -> usize {
        let floor = self.config.floor_segment_docs.max(1);
        let ratio = (self.config.segments_per_tier as u64).max(2);
        let mut tier_max = floor;
        let mut tier = 0;
        while live_docs > tier_max && tier < 16 {
            tier += 1;
            tier_max = tier_max.saturating_mul(ratio);
        }
        tier
    }

    fn task(segments: &[&PlanSegment], reason: MergeReason) -> MergeTask {
        MergeTask {
            segment_ids: segments.iter().map(|s| s.id).collect(),
            live_docs: segments.iter().map(|s| s.live_docs).sum(),
            reason,
        }
    }
}
