//! Immutable segments
//!
//! A segment is a self-contained inverted index over a fixed set of
//! documents. Segments are never modified after construction; deletes are
//! tracked outside them by the snapshot that references them.
//!
//! # Architecture
//!
//! - [`Segment`] / [`PostingsIterator`]: read interface used by the engine
//! - [`SegmentPlugin`]: build, open and merge for one segment format,
//!   registered in a [`SegmentRegistry`]
//! - [`SegmentBase`]: the built-in format (FST dictionaries, block
//!   postings, stored fields, doc values)
//! - [`TieredMergePolicy`]: picks which persisted segments to merge

mod builder;
mod docvalues;
mod merge;
mod plugin;
mod postings;
mod reader;
mod statistics;
mod store;
mod stored;
mod term_dict;
mod types;
mod writer;

pub use builder::SegmentBuilder;
pub use docvalues::{TermColumn, TermColumnBuilder};
pub use merge::{MergePolicyConfig, MergeReason, MergeTask, PlanSegment, TieredMergePolicy};
pub use plugin::{MergeOutput, PostingsIterator, Segment, SegmentPlugin, SegmentRegistry};
pub use postings::{PostingCursor, PostingsWriter};
pub use reader::{SegmentBase, SegmentPostings};
pub use statistics::FieldLengths;
pub use store::{read_segment_file, write_segment_file, SegmentBody, FORMAT_VERSION};
pub use stored::{StoredField, StoredFields};
pub use term_dict::{TermDictionary, TermDictionaryBuilder, MAX_FUZZY_DISTANCE};
pub use types::*;
pub use writer::{build_segment, compute_remap, merge_segments, FstSegmentPlugin};
