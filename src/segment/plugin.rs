//! Segment abstraction and the registry of segment implementations

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use roaring::RoaringBitmap;

use super::types::{DictEntry, DictQuery, Posting};
use crate::error::CuttleError;
use crate::models::{AnalysisResult, FieldOptions, FieldValue};
use crate::Result;

/// Iterator over one term's postings in one segment.
///
/// Documents in the `except` bitmap given at construction are skipped.
pub trait PostingsIterator: Send {
    fn next(&mut self) -> Result<Option<Posting>>;

    /// First posting with `doc >= target`, never moving backwards
    fn advance(&mut self, target: u32) -> Result<Option<Posting>>;

    /// Rewind to the start of the list
    fn reset(&mut self);

    /// Postings not excluded by the except set
    fn count(&self) -> u64;
}

/// An immutable, shareable segment.
///
/// Segment-local document numbers are dense in `0..count()`.
pub trait Segment: Send + Sync {
    /// `(kind, version)` of the plugin that reopens this segment's file
    fn format(&self) -> (&'static str, u32);

    /// Documents in the segment, deleted or not
    fn count(&self) -> u64;

    fn size_in_bytes(&self) -> u64;

    /// Indexed field names, sorted
    fn fields(&self) -> Vec<String>;

    fn field_options(&self, field: &str) -> Option<FieldOptions>;

    /// Backing file, `None` for an in-memory segment
    fn path(&self) -> Option<&Path>;

    /// Documents in `except` are skipped. The iterator shares the bitmap.
    fn postings(
        &self,
        field: &str,
        term: &str,
        except: Option<&Arc<RoaringBitmap>>,
        include_locations: bool,
    ) -> Result<Box<dyn PostingsIterator>>;

    /// Terms matching `query`, sorted, with counts of documents outside
    /// `except`. Terms whose count drops to zero are omitted.
    fn dictionary(
        &self,
        field: &str,
        query: &DictQuery,
        except: Option<&RoaringBitmap>,
    ) -> Result<Vec<DictEntry>>;

    /// Local numbers of documents whose `_id` is in `ids`
    fn doc_numbers(&self, ids: &[&str]) -> Result<RoaringBitmap>;

    /// Visit stored fields of `doc` until the visitor returns false
    fn visit_stored(
        &self,
        doc: u32,
        visitor: &mut dyn FnMut(&str, &FieldValue) -> bool,
    ) -> Result<()>;

    /// Token count of `field` in `doc`
    fn field_length(&self, field: &str, doc: u32) -> Option<u32>;

    fn doc_value_fields(&self) -> Vec<String>;

    /// Visit every `(field, term)` doc value of `doc` for the requested fields
    fn visit_doc_values(
        &self,
        doc: u32,
        fields: &[String],
        visitor: &mut dyn FnMut(&str, &str),
    ) -> Result<()>;

    /// Write this segment to `path`
    fn persist(&self, path: &Path) -> Result<()>;
}

/// Result of merging segments
pub struct MergeOutput {
    pub segment: Arc<dyn Segment>,
    /// For each input segment, old local doc number -> new doc number or
    /// `DOC_DROPPED`.
    pub remap: Vec<Vec<u64>>,
}

impl std::fmt::Debug for MergeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeOutput")
            .field("docs", &self.segment.count())
            .field("inputs", &self.remap.len())
            .finish()
    }
}

/// A segment implementation: how to build, open and merge its segments.
pub trait SegmentPlugin: Send + Sync {
    fn kind(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Build an in-memory segment from analyzed documents
    fn build(&self, results: &[AnalysisResult]) -> Result<Arc<dyn Segment>>;

    /// Open a persisted segment file
    fn open(&self, path: &Path) -> Result<Arc<dyn Segment>>;

    /// Merge segments dropping the given docs. Fails with
    /// [`CuttleError::Closed`] once `closing` is set.
    fn merge(
        &self,
        segments: &[Arc<dyn Segment>],
        drops: &[Option<RoaringBitmap>],
        closing: &AtomicBool,
    ) -> Result<MergeOutput>;
}

/// Segment implementations keyed by `(kind, version)`, with one default
/// used for new segments.
#[derive(Clone)]
pub struct SegmentRegistry {
    plugins: HashMap<(String, u32), Arc<dyn SegmentPlugin>>,
    default: Arc<dyn SegmentPlugin>,
}

impl SegmentRegistry {
    pub fn new(default: Arc<dyn SegmentPlugin>) -> Self {
        let mut plugins = HashMap::new();
        plugins.insert(
            (default.kind().to_string(), default.version()),
            default.clone(),
        );
        Self { plugins, default }
    }

    pub fn register(&mut self, plugin: Arc<dyn SegmentPlugin>) {
        self.plugins
            .insert((plugin.kind().to_string(), plugin.version()), plugin);
    }

    pub fn default_plugin(&self) -> &Arc<dyn SegmentPlugin> {
        &self.default
    }

    /// Build new segments with a registered plugin other than the default.
    /// Without a version the newest registered version of `kind` is used;
    /// without a kind the default's kind is kept.
    pub fn force(&mut self, kind: Option<&str>, version: Option<u32>) -> Result<()> {
        let kind = kind.unwrap_or(self.default.kind()).to_string();
        let version = match version {
            Some(v) => v,
            None => self
                .plugins
                .keys()
                .filter(|(k, _)| *k == kind)
                .map(|(_, v)| *v)
                .max()
                .ok_or_else(|| CuttleError::UnknownSegmentPlugin {
                    kind: kind.clone(),
                    version: 0,
                })?,
        };
        self.default = self.get(&kind, version)?;
        Ok(())
    }

    pub fn get(&self, kind: &str, version: u32) -> Result<Arc<dyn SegmentPlugin>> {
        self.plugins
            .get(&(kind.to_string(), version))
            .cloned()
            .ok_or_else(|| CuttleError::UnknownSegmentPlugin {
                kind: kind.to_string(),
                version,
            })
    }
}

impl Default for SegmentRegistry {
    fn default() -> Self {
        Self::new(Arc::new(super::FstSegmentPlugin))
    }
}

impl std::fmt::Debug for SegmentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.plugins.keys().collect();
        keys.sort();
        f.debug_struct("SegmentRegistry")
            .field("plugins", &keys)
            .field("default", &(self.default.kind(), self.default.version()))
            .finish()
    }
}
