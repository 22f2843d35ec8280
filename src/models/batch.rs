use std::collections::HashMap;
use std::fmt;

use super::document::Document;
use crate::Result;

/// Callback fired once the batch's segment is durable, or with an error
/// if the index closes first.
pub type PersistedCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// A set of document and internal-key mutations applied atomically.
///
/// A `None` document deletes the id; a `None` internal value deletes the
/// key. Later operations on the same id replace earlier ones.
#[derive(Default)]
pub struct Batch {
    pub index_ops: HashMap<String, Option<Document>>,
    pub internal_ops: HashMap<String, Option<Vec<u8>>>,
    pub(crate) persisted_callback: Option<PersistedCallback>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document
    pub fn update(&mut self, doc: Document) {
        self.index_ops.insert(doc.id.clone(), Some(doc));
    }

    /// Delete a document by external id
    pub fn delete(&mut self, id: impl Into<String>) {
        self.index_ops.insert(id.into(), None);
    }

    pub fn set_internal(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.internal_ops.insert(key.into(), Some(value));
    }

    pub fn delete_internal(&mut self, key: impl Into<String>) {
        self.internal_ops.insert(key.into(), None);
    }

    /// Register a callback run after the batch is persisted
    pub fn on_persisted<F>(&mut self, f: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.persisted_callback = Some(Box::new(f));
    }

    /// Number of document operations
    pub fn len(&self) -> usize {
        self.index_ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_ops.is_empty() && self.internal_ops.is_empty()
    }

    pub fn reset(&mut self) {
        self.index_ops.clear();
        self.internal_ops.clear();
        self.persisted_callback = None;
    }

    /// Documents to be indexed
    pub(crate) fn updates(&self) -> impl Iterator<Item = &Document> {
        self.index_ops.values().filter_map(|d| d.as_ref())
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("index_ops", &self.index_ops.len())
            .field("internal_ops", &self.internal_ops.len())
            .field("persisted_callback", &self.persisted_callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_last_op_wins() {
        let mut batch = Batch::new();
        batch.update(Document::new("a").with_text("f", "x"));
        batch.delete("a");
        assert_eq!(batch.len(), 1);
        assert!(batch.index_ops["a"].is_none());
        assert_eq!(batch.updates().count(), 0);
    }

    #[test]
    fn test_batch_internal_ops() {
        let mut batch = Batch::new();
        assert!(batch.is_empty());
        batch.set_internal("k", b"v".to_vec());
        batch.delete_internal("gone");
        assert!(!batch.is_empty());
        assert_eq!(batch.len(), 0);
        batch.reset();
        assert!(batch.is_empty());
    }
}
