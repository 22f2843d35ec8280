//! Durable epoch catalog
//!
//! One fjall keyspace, `snapshots`, keyed by the big-endian epoch. Each
//! value is a bincode [`SnapshotRecord`] describing one persisted root: the
//! segment files it references with their tombstones, and the internal
//! key/value map. An epoch is written with a single insert so it is either
//! fully present or absent.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::error::CuttleError;
use crate::Result;

const SNAPSHOTS_KEYSPACE: &str = "snapshots";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: u64,
    /// File name relative to the index directory
    pub path: String,
    /// Plugin that reopens the file
    pub kind: String,
    pub version: u32,
    /// Serialized roaring bitmap, empty when nothing is deleted
    pub deleted: Vec<u8>,
}

impl SegmentRecord {
    pub fn new(
        id: u64,
        path: String,
        (kind, version): (&str, u32),
        deleted: Option<&RoaringBitmap>,
    ) -> Result<Self> {
        let mut bytes = Vec::new();
        if let Some(d) = deleted.filter(|d| !d.is_empty()) {
            d.serialize_into(&mut bytes)?;
        }
        Ok(Self {
            id,
            path,
            kind: kind.to_string(),
            version,
            deleted: bytes,
        })
    }

    pub fn deleted_bitmap(&self) -> Result<Option<RoaringBitmap>> {
        if self.deleted.is_empty() {
            return Ok(None);
        }
        let bitmap = RoaringBitmap::deserialize_from(self.deleted.as_slice()).map_err(|e| {
            CuttleError::Catalog(format!("segment {} tombstones: {}", self.id, e))
        })?;
        Ok(Some(bitmap))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub segments: Vec<SegmentRecord>,
    pub internal: BTreeMap<String, Vec<u8>>,
}

/// Fjall-backed catalog of persisted epochs
pub struct Catalog {
    db: Database,
    snapshots: Keyspace,
    sync: bool,
}

impl Catalog {
    pub fn open(dir: &Path, sync: bool) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db = Database::builder(dir)
            .open()
            .map_err(|e| CuttleError::Catalog(format!("failed to open catalog: {}", e)))?;
        let snapshots = db
            .keyspace(SNAPSHOTS_KEYSPACE, || KeyspaceCreateOptions::default())
            .map_err(|e| {
                CuttleError::Catalog(format!("failed to open {} keyspace: {}", SNAPSHOTS_KEYSPACE, e))
            })?;
        Ok(Self {
            db,
            snapshots,
            sync,
        })
    }

    fn encode_epoch(epoch: u64) -> [u8; 8] {
        epoch.to_be_bytes()
    }

    fn decode_epoch(key: &[u8]) -> Option<u64> {
        let raw: [u8; 8] = key.try_into().ok()?;
        Some(u64::from_be_bytes(raw))
    }

    /// Write one epoch and make it durable
    pub fn put(&self, epoch: u64, record: &SnapshotRecord) -> Result<()> {
        let value = bincode::serialize(record)?;
        self.snapshots
            .insert(Self::encode_epoch(epoch), value)
            .map_err(|e| CuttleError::Catalog(e.to_string()))?;
        self.flush()
    }

    pub fn get(&self, epoch: u64) -> Result<Option<SnapshotRecord>> {
        let Some(value) = self
            .snapshots
            .get(Self::encode_epoch(epoch))
            .map_err(|e| CuttleError::Catalog(e.to_string()))?
        else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(value.as_ref())?))
    }

    /// Persisted epochs, newest first
    pub fn epochs(&self) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        for kv in self.snapshots.iter() {
            let key = kv.key().map_err(|e| CuttleError::Catalog(e.to_string()))?;
            if let Some(epoch) = Self::decode_epoch(key.as_ref()) {
                out.push(epoch);
            }
        }
        out.sort_unstable_by(|a, b| b.cmp(a));
        Ok(out)
    }

    pub fn remove(&self, epochs: &[u64]) -> Result<()> {
        if epochs.is_empty() {
            return Ok(());
        }
        for epoch in epochs {
            self.snapshots
                .remove(Self::encode_epoch(*epoch))
                .map_err(|e| CuttleError::Catalog(e.to_string()))?;
        }
        self.flush()
    }

    /// Every segment file referenced by any persisted epoch
    pub fn file_names(&self) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        for epoch in self.epochs()? {
            if let Some(record) = self.get(epoch)? {
                names.extend(record.segments.into_iter().map(|s| s.path));
            }
        }
        Ok(names)
    }

    fn flush(&self) -> Result<()> {
        if self.sync {
            self.db
                .persist(PersistMode::SyncAll)
                .map_err(|e| CuttleError::Catalog(format!("catalog sync failed: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(ids: &[u64]) -> SnapshotRecord {
        SnapshotRecord {
            segments: ids
                .iter()
                .map(|id| {
                    SegmentRecord::new(*id, format!("{:012x}.seg", id), ("fst", 1), None).unwrap()
                })
                .collect(),
            internal: BTreeMap::from([("k".to_string(), b"v".to_vec())]),
        }
    }

    #[test]
    fn test_put_get_remove() {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::open(dir.path(), true).unwrap();

        catalog.put(3, &record(&[1])).unwrap();
        catalog.put(10, &record(&[1, 2])).unwrap();
        catalog.put(7, &record(&[2])).unwrap();

        assert_eq!(catalog.epochs().unwrap(), vec![10, 7, 3]);
        assert_eq!(catalog.get(10).unwrap(), Some(record(&[1, 2])));
        assert_eq!(catalog.get(4).unwrap(), None);

        catalog.remove(&[3, 7]).unwrap();
        assert_eq!(catalog.epochs().unwrap(), vec![10]);
        let names = catalog.file_names().unwrap();
        assert!(names.contains("000000000002.seg"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_reopen_keeps_epochs() {
        let dir = TempDir::new().unwrap();
        {
            let catalog = Catalog::open(dir.path(), true).unwrap();
            catalog.put(1, &record(&[5])).unwrap();
        }
        let catalog = Catalog::open(dir.path(), true).unwrap();
        assert_eq!(catalog.epochs().unwrap(), vec![1]);
    }

    #[test]
    fn test_tombstones_round_trip() {
        let deleted: RoaringBitmap = [1u32, 9, 40_000].into_iter().collect();
        let rec = SegmentRecord::new(4, "x".into(), ("fst", 1), Some(&deleted)).unwrap();
        assert_eq!(rec.deleted_bitmap().unwrap(), Some(deleted));

        let clean =
            SegmentRecord::new(4, "x".into(), ("fst", 1), Some(&RoaringBitmap::new())).unwrap();
        assert!(clean.deleted.is_empty());
        assert_eq!(clean.deleted_bitmap().unwrap(), None);
    }
}
