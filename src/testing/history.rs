//! Snapshot history capture for testing
//!
//! Tests record every root they observe, from any thread, and check the
//! resulting history against the invariants afterwards.

use parking_lot::RwLock;
use std::sync::Arc;

use super::observation::Observation;
use crate::engine::{Index, IndexSnapshot};

/// Thread-safe log of observed root snapshots
#[derive(Clone, Default)]
pub struct SnapshotHistory {
    inner: Arc<RwLock<Vec<Observation>>>,
}

impl SnapshotHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the shape of `snapshot`
    pub fn record(&self, snapshot: &IndexSnapshot) {
        let mut inner = self.inner.write();
        let seq = inner.len();
        inner.push(Observation::from_snapshot(seq, snapshot));
    }

    /// Record the current root of `index`
    pub fn record_index(&self, index: &Index) {
        self.record(&index.reader());
    }

    pub fn push(&self, observation: Observation) {
        self.inner.write().push(observation);
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.inner.read().clone()
    }

    /// Observations ordered by epoch, keeping record order within an epoch
    pub fn by_epoch(&self) -> Vec<Observation> {
        let mut out = self.observations();
        out.sort_by_key(|o| (o.epoch, o.seq));
        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.observations())
    }

    /// Import from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let observations: Vec<Observation> = serde_json::from_str(json)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(observations)),
        })
    }
}
