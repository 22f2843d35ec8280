//! Recorded shape of one root snapshot
//!
//! An [`Observation`] copies what the invariants need out of an
//! [`IndexSnapshot`] so the snapshot itself can be released right away.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::IndexSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedSegment {
    pub id: u64,
    pub count: u64,
    /// Deleted local doc numbers, ascending
    pub deleted: Vec<u32>,
}

impl ObservedSegment {
    pub fn live_count(&self) -> u64 {
        self.count.saturating_sub(self.deleted.len() as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Position in the history
    pub seq: usize,
    pub epoch: u64,
    pub segments: Vec<ObservedSegment>,
    pub offsets: Vec<u64>,
}

impl Observation {
    pub fn from_snapshot(seq: usize, snapshot: &IndexSnapshot) -> Self {
        Self {
            seq,
            epoch: snapshot.epoch(),
            segments: snapshot
                .segments()
                .iter()
                .map(|s| ObservedSegment {
                    id: s.id(),
                    count: s.count(),
                    deleted: s.deleted().map(|d| d.iter().collect()).unwrap_or_default(),
                })
                .collect(),
            offsets: snapshot.offsets().to_vec(),
        }
    }

    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.live_count()).sum()
    }

    /// Same segments with the same tombstones
    pub fn same_content(&self, other: &Observation) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.id == b.id && a.count == b.count && a.deleted == b.deleted)
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} epoch={} segments=[", self.seq, self.epoch)?;
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}/{}", s.id, s.live_count(), s.count)?;
        }
        write!(f, "]")
    }
}
