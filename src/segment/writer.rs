//! Building and merging built-in segments
//!
//! Merging replays the live documents of each source segment, in segment
//! order, through a [`SegmentBuilder`]. Any [`Segment`] implementation can
//! be merged this way since only the trait surface is used.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use roaring::RoaringBitmap;
use tracing::debug;

use super::builder::SegmentBuilder;
use super::plugin::{MergeOutput, Segment, SegmentPlugin};
use super::reader::SegmentBase;
use super::stored::StoredField;
use super::types::{DictQuery, DOC_DROPPED};
use crate::error::CuttleError;
use crate::models::{AnalysisResult, FieldOptions};
use crate::Result;

/// Build a segment from analyzed documents, numbered in input order
pub fn build_segment(results: &[AnalysisResult]) -> Result<SegmentBase> {
    let mut builder = SegmentBuilder::new();
    for result in results {
        builder.add_analyzed(result);
    }
    builder.build()
}

/// Compute old -> new doc numbers for a merge
pub fn compute_remap(segments: &[Arc<dyn Segment>], drops: &[Option<RoaringBitmap>]) -> Vec<Vec<u64>> {
    let mut next = 0u64;
    segments
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            let drop = drops.get(i).and_then(|d| d.as_ref());
            (0..seg.count())
                .map(|doc| {
                    if drop.map(|d| d.contains(doc as u32)).unwrap_or(false) {
                        DOC_DROPPED
                    } else {
                        next += 1;
                        next - 1
                    }
                })
                .collect()
        })
        .collect()
}

/// Merge segments into a new in-memory segment, dropping `drops[i]` from
/// segment `i`.
pub fn merge_segments(
    segments: &[Arc<dyn Segment>],
    drops: &[Option<RoaringBitmap>],
    closing: &AtomicBool,
) -> Result<MergeOutput> {
    if segments.is_empty() {
        return Err(CuttleError::InvalidRequest("no segments to merge".into()));
    }

    let remap = compute_remap(segments, drops);
    let mut builder = SegmentBuilder::new();
    let new_count = remap
        .iter()
        .flat_map(|r| r.iter())
        .filter(|&&d| d != DOC_DROPPED)
        .count();
    for _ in 0..new_count {
        builder.add_document();
    }

    let mut fields: Vec<(String, FieldOptions)> = Vec::new();
    for seg in segments {
        for name in seg.fields() {
            if fields.iter().all(|(n, _)| n != &name) {
                let options = seg.field_options(&name).unwrap_or_default();
                fields.push((name, options));
            }
        }
    }
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    let shared_drops: Vec<Option<Arc<RoaringBitmap>>> = (0..segments.len())
        .map(|i| drops.get(i).cloned().flatten().map(Arc::new))
        .collect();

    for (field, options) in &fields {
        if closing.load(Ordering::Relaxed) {
            return Err(CuttleError::Closed);
        }

        for (i, seg) in segments.iter().enumerate() {
            let drop = shared_drops[i].as_ref();
            let map = &remap[i];

            for entry in seg.dictionary(field, &DictQuery::All, drop.map(|d| &**d))? {
                let mut postings = seg.postings(field, &entry.term, drop, true)?;
                while let Some(p) = postings.next()? {
                    let new_doc = map[p.doc as usize];
                    if new_doc == DOC_DROPPED {
                        return Err(CuttleError::Internal(format!(
                            "dropped doc {} seen in postings of {}",
                            p.doc, field
                        )));
                    }
                    builder.add_term(
                        new_doc as u32,
                        field,
                        *options,
                        &entry.term,
                        p.frequency,
                        p.locations,
                    );
                }
            }

            for (old, &new_doc) in map.iter().enumerate() {
                if new_doc == DOC_DROPPED {
                    continue;
                }
                if let Some(len) = seg.field_length(field, old as u32) {
                    builder.set_field_length(new_doc as u32, field, *options, len);
                }
            }
        }
    }

    for (i, seg) in segments.iter().enumerate() {
        if closing.load(Ordering::Relaxed) {
            return Err(CuttleError::Closed);
        }
        let dv_fields = seg.doc_value_fields();
        for (old, &new_doc) in remap[i].iter().enumerate() {
            if new_doc == DOC_DROPPED {
                continue;
            }
            let mut stored = Vec::new();
            seg.visit_stored(old as u32, &mut |name, value| {
                stored.push(StoredField {
                    name: name.to_string(),
                    value: value.clone(),
                });
                true
            })?;
            builder.set_stored(new_doc as u32, stored);

            let mut values: Vec<(String, String)> = Vec::new();
            seg.visit_doc_values(old as u32, &dv_fields, &mut |f, t| {
                values.push((f.to_string(), t.to_string()))
            })?;
            for (f, t) in values {
                let options = seg.field_options(&f).unwrap_or_default();
                builder.add_doc_value(new_doc as u32, &f, options, &t);
            }
        }
    }

    let merged = builder.build()?;
    debug!(
        inputs = segments.len(),
        docs = new_count,
        "merged segments"
    );
    Ok(MergeOutput {
        segment: Arc::new(merged),
        remap,
    })
}

/// The built-in FST + roaring segment format
#[derive(Debug, Default, Clone, Copy)]
pub struct FstSegmentPlugin;

impl FstSegmentPlugin {
    pub const KIND: &'static str = "fst";
    pub const VERSION: u32 = super::store::FORMAT_VERSION;
}

impl SegmentPlugin for FstSegmentPlugin {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn version(&self) -> u32 {
        Self::VERSION
    }

    fn build(&self, results: &[AnalysisResult]) -> Result<Arc<dyn Segment>> {
        Ok(Arc::new(build_segment(results)?))
    }

    fn open(&self, path: &Path) -> Result<Arc<dyn Segment>> {
        Ok(Arc::new(SegmentBase::open(path)?))
    }

    fn merge(
        &self,
        segments: &[Arc<dyn Segment>],
        drops: &[Option<RoaringBitmap>],
        closing: &AtomicBool,
    ) -> Result<MergeOutput> {
        merge_segments(segments, drops, closing)
    }
}
