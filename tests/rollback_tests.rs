//! Rollback to persisted epochs

use cuttle::{Batch, CuttleError, Document, Index, IndexConfig};
use std::collections::HashMap;
use tempfile::TempDir;

fn live_ids(index: &Index) -> Vec<String> {
    let reader = index.reader();
    let mut all = reader.doc_id_reader_all();
    let mut ids = Vec::new();
    while let Some(id) = all.next() {
        ids.push(reader.external_id(id).unwrap().unwrap());
    }
    ids.sort();
    ids
}

fn open(dir: &TempDir) -> Index {
    Index::open_default(IndexConfig::new(dir.path()).with_snapshots_to_keep(100)).unwrap()
}

#[test]
fn test_rollback_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let index = open(&temp_dir);

    let mut seen: HashMap<u64, Vec<String>> = HashMap::new();
    let mut epochs = Vec::new();
    for k in 0..5 {
        let mut batch = Batch::new();
        batch.update(Document::new(format!("doc{}", k)).with_text("body", "versioned"));
        if k == 3 {
            batch.delete("doc0");
        }
        batch.set_internal("seq", k.to_string().into_bytes());
        index.batch(batch).unwrap();

        let epoch = index.reader().epoch();
        seen.insert(epoch, live_ids(&index));
        epochs.push(epoch);
    }
    let newest = *epochs.last().unwrap();

    let points = index.rollback_points().unwrap();
    assert!(points.windows(2).all(|w| w[0].epoch() > w[1].epoch()));
    assert_eq!(points[0].epoch(), newest);

    let target = points
        .iter()
        .find(|p| p.epoch() == epochs[2])
        .expect("epoch of the third batch is retained");
    assert_eq!(target.get_internal("seq"), Some(&b"2"[..]));

    index.rollback(target).unwrap();
    assert_eq!(live_ids(&index), seen[&epochs[2]]);
    assert_eq!(index.reader().get_internal("seq"), Some(&b"2"[..]));
    let reverted = index.reader().epoch();
    assert!(reverted > newest);
    assert_eq!(index.stats().reverts, 1);

    index
        .update(Document::new("after").with_text("body", "versioned"))
        .unwrap();
    let forward = index.reader().epoch();
    assert!(forward > reverted);
    assert!(live_ids(&index).contains(&"after".to_string()));
    assert!(!live_ids(&index).contains(&"doc3".to_string()));
}

#[test]
fn test_rollback_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let first_epoch;
    {
        let index = open(&temp_dir);
        index
            .update(Document::new("a").with_text("body", "first"))
            .unwrap();
        first_epoch = index.reader().epoch();
        index
            .update(Document::new("b").with_text("body", "second"))
            .unwrap();

        let points = index.rollback_points().unwrap();
        let point = points.iter().find(|p| p.epoch() == first_epoch).unwrap();
        index.rollback(point).unwrap();
        index.close().unwrap();
    }

    let index = open(&temp_dir);
    assert_eq!(live_ids(&index), vec!["a"]);
    assert!(index.reader().epoch() > first_epoch);
}

#[test]
fn test_rollback_to_missing_epoch_fails() {
    let temp_dir = TempDir::new().unwrap();
    let index = Index::open_default(IndexConfig::new(temp_dir.path())).unwrap();
    for i in 0..3 {
        index
            .update(Document::new(format!("d{}", i)).with_text("body", "x"))
            .unwrap();
    }

    // only the newest epoch is kept by default
    let points = index.rollback_points().unwrap();
    let stale = points.last().unwrap().clone();
    index
        .update(Document::new("d9").with_text("body", "x"))
        .unwrap();
    index
        .update(Document::new("d10").with_text("body", "x"))
        .unwrap();

    // old epochs are removed by the persister after it catches up
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while index
        .rollback_points()
        .unwrap()
        .iter()
        .any(|p| p.epoch() == stale.epoch())
    {
        assert!(std::time::Instant::now() < deadline, "stale epoch never removed");
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    let before = index.reader().epoch();
    let err = index.rollback(&stale).unwrap_err();
    assert!(matches!(err, CuttleError::UnknownEpoch(e) if e == stale.epoch()));
    assert_eq!(index.reader().epoch(), before);
}

#[test]
fn test_in_memory_has_no_rollback_points() {
    let index = Index::open_default(IndexConfig::in_memory()).unwrap();
    index
        .update(Document::new("a").with_text("body", "x"))
        .unwrap();
    assert!(index.rollback_points().unwrap().is_empty());
}
