use std::collections::BTreeMap;
use std::time::Instant;

use crossbeam::channel::bounded;
use tracing::info;

use super::events::EventKind;
use super::index::Shared;
use super::introducer::RevertRequest;
use super::persister::load_segments;
use crate::error::CuttleError;
use crate::Result;

/// A persisted epoch the index can be reverted to
#[derive(Clone, Debug, PartialEq)]
pub struct RollbackPoint {
    epoch: u64,
    internal: BTreeMap<String, Vec<u8>>,
}

impl RollbackPoint {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Internal key/value map as of this epoch
    pub fn internal(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.internal
    }

    pub fn get_internal(&self, key: &str) -> Option<&[u8]> {
        self.internal.get(key).map(|v| v.as_slice())
    }
}

pub(crate) fn rollback_points(shared: &Shared) -> Result<Vec<RollbackPoint>> {
    let Some(catalog) = &shared.catalog else {
        return Ok(Vec::new());
    };
    let mut points = Vec::new();
    for epoch in catalog.epochs()? {
        if let Some(record) = catalog.get(epoch)? {
            points.push(RollbackPoint {
                epoch,
                internal: record.internal,
            });
        }
    }
    Ok(points)
}

/// Reinstall the segments and internal map of `point` under a new epoch
/// and wait until that epoch is durable
pub(crate) fn rollback(shared: &Shared, point: &RollbackPoint) -> Result<()> {
    let start = Instant::now();
    let (Some(catalog), Some(dir)) = (&shared.catalog, shared.config.path.as_deref()) else {
        return Err(CuttleError::InvalidRequest(
            "rollback needs a persistent index".into(),
        ));
    };
    let record = catalog
        .get(point.epoch)?
        .ok_or(CuttleError::UnknownEpoch(point.epoch))?;

    // the files stay protected until the revert lands in the root
    let names: Vec<String> = record.segments.iter().map(|s| s.path.clone()).collect();
    for name in &names {
        shared.mark_ineligible(name);
    }
    let unmark = |shared: &Shared| {
        for name in &names {
            shared.unmark_ineligible(name);
        }
    };

    let segments = match load_segments(&record, dir, &shared.registry) {
        Ok(segments) => segments,
        Err(e) => {
            unmark(shared);
            return Err(e);
        }
    };

    let (applied_tx, applied_rx) = bounded(1);
    let (persisted_tx, persisted_rx) = bounded(1);
    let request = RevertRequest {
        segments,
        internal: record.internal,
        applied: applied_tx,
        persisted: Some(persisted_tx),
    };
    if let Err(e) = shared.send(&shared.channels.reverts, request) {
        unmark(shared);
        return Err(e);
    }
    let epoch = shared.wait(&applied_rx)?;
    info!(from = point.epoch, epoch, "rolled back");
    shared.callbacks.fire(EventKind::Reverted, start.elapsed());

    shared.wait(&persisted_rx)?
}
