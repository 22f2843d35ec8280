//! Invariant checking framework for correctness verification
//!
//! Invariants are checked against a [`SnapshotHistory`] after the fact.
//! Tombstone monotonicity assumes the history contains no rollback.

use super::history::SnapshotHistory;
use super::observation::Observation;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A violation of an invariant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub invariant: String,
    pub description: String,
    /// Sequence numbers of the offending observations
    pub violating_observations: Vec<usize>,
    pub context: HashMap<String, String>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "INVARIANT VIOLATION: {}", self.invariant)?;
        writeln!(f, "  Description: {}", self.description)?;
        writeln!(f, "  Violating observations: {:?}", self.violating_observations)?;
        if !self.context.is_empty() {
            writeln!(f, "  Context:")?;
            for (key, value) in &self.context {
                writeln!(f, "    {}: {}", key, value)?;
            }
        }
        Ok(())
    }
}

/// Trait for invariant checkers
pub trait Invariant: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, history: &SnapshotHistory) -> Result<(), Violation>;

    fn description(&self) -> &str {
        "No description provided"
    }
}

/// Check all invariants and return violations
pub fn check_all_invariants(
    history: &SnapshotHistory,
    invariants: &[Box<dyn Invariant>],
) -> Vec<Violation> {
    invariants
        .iter()
        .filter_map(|inv| inv.check(history).err())
        .collect()
}

pub fn default_invariants() -> Vec<Box<dyn Invariant>> {
    vec![
        Box::new(EpochsStrictlyIncrease),
        Box::new(OffsetsStrictlyIncrease),
        Box::new(TombstonesMonotonic),
        Box::new(NoEmptySegments),
    ]
}

fn violation(
    invariant: &dyn Invariant,
    description: String,
    observations: &[&Observation],
) -> Violation {
    let mut context = HashMap::new();
    for (i, o) in observations.iter().enumerate() {
        context.insert(format!("observation_{}", i), o.to_string());
    }
    Violation {
        invariant: invariant.name().to_string(),
        description,
        violating_observations: observations.iter().map(|o| o.seq).collect(),
        context,
    }
}

/// Invariant: distinct roots carry strictly increasing epochs
///
/// Observations are in record order. A later observation may repeat an
/// epoch only with identical content (a persist swap or a re-read).
pub struct EpochsStrictlyIncrease;

impl Invariant for EpochsStrictlyIncrease {
    fn name(&self) -> &str {
        "EpochsStrictlyIncrease"
    }

    fn description(&self) -> &str {
        "Root epochs never go backwards and a new root always gets a new epoch"
    }

    fn check(&self, history: &SnapshotHistory) -> Result<(), Violation> {
        let observations = history.observations();
        for pair in observations.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.epoch < prev.epoch {
                return Err(violation(
                    self,
                    format!("epoch went back from {} to {}", prev.epoch, next.epoch),
                    &[prev, next],
                ));
            }
            if next.epoch == prev.epoch && !next.same_content(prev) {
                return Err(violation(
                    self,
                    format!("epoch {} names two different roots", next.epoch),
                    &[prev, next],
                ));
            }
        }
        Ok(())
    }
}

/// Invariant: segment offsets are the running sum of segment counts
pub struct OffsetsStrictlyIncrease;

impl Invariant for OffsetsStrictlyIncrease {
    fn name(&self) -> &str {
        "OffsetsStrictlyIncrease"
    }

    fn description(&self) -> &str {
        "Offsets start at zero and strictly increase by each segment's count"
    }

    fn check(&self, history: &SnapshotHistory) -> Result<(), Violation> {
        for o in history.observations() {
            if o.offsets.len() != o.segments.len() {
                return Err(violation(
                    self,
                    format!(
                        "{} offsets for {} segments",
                        o.offsets.len(),
                        o.segments.len()
                    ),
                    &[&o],
                ));
            }
            let mut expected = 0u64;
            for (offset, segment) in o.offsets.iter().zip(&o.segments) {
                if *offset != expected {
                    return Err(violation(
                        self,
                        format!(
                            "segment {} starts at {}, expected {}",
                            segment.id, offset, expected
                        ),
                        &[&o],
                    ));
                }
                if segment.count == 0 {
                    return Err(violation(
                        self,
                        format!("segment {} has no documents", segment.id),
                        &[&o],
                    ));
                }
                expected += segment.count;
            }
        }
        Ok(())
    }
}

/// Invariant: a segment's tombstones only ever grow
pub struct TombstonesMonotonic;

impl Invariant for TombstonesMonotonic {
    fn name(&self) -> &str {
        "TombstonesMonotonic"
    }

    fn description(&self) -> &str {
        "Documents deleted from a segment stay deleted in every later root"
    }

    fn check(&self, history: &SnapshotHistory) -> Result<(), Violation> {
        let observations = history.by_epoch();
        let mut last_seen: HashMap<u64, (HashSet<u32>, usize)> = HashMap::new();

        for (idx, o) in observations.iter().enumerate() {
            for segment in &o.segments {
                let deleted: HashSet<u32> = segment.deleted.iter().copied().collect();
                if let Some((earlier, at)) = last_seen.get(&segment.id) {
                    let resurrected: Vec<u32> = earlier.difference(&deleted).copied().collect();
                    if !resurrected.is_empty() {
                        return Err(violation(
                            self,
                            format!(
                                "segment {} undeleted docs {:?}",
                                segment.id, resurrected
                            ),
                            &[&observations[*at], o],
                        ));
                    }
                }
                last_seen.insert(segment.id, (deleted, idx));
            }
        }
        Ok(())
    }
}

/// Invariant: a root never holds a segment with no live documents
pub struct NoEmptySegments;

impl Invariant for NoEmptySegments {
    fn name(&self) -> &str {
        "NoEmptySegments"
    }

    fn description(&self) -> &str {
        "Fully deleted segments are dropped from the root"
    }

    fn check(&self, history: &SnapshotHistory) -> Result<(), Violation> {
        for o in history.observations() {
            if let Some(s) = o.segments.iter().find(|s| s.live_count() == 0) {
                return Err(violation(
                    self,
                    format!("segment {} has no live documents", s.id),
                    &[&o],
                ));
            }
        }
        Ok(())
    }
}
