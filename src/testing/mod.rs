//! Testing infrastructure for correctness verification
//!
//! This module provides:
//! - Snapshot history capture from any thread
//! - Invariant checking over the captured roots
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use cuttle::testing::prelude::*;
//!
//! let history = SnapshotHistory::new();
//! index.batch(batch)?;
//! history.record_index(&index);
//!
//! let violations = check_all_invariants(&history, &default_invariants());
//! assert!(violations.is_empty());
//! ```
//!
//! # Invariants
//!
//! - **EpochsStrictlyIncrease**: every new root gets a larger epoch
//! - **OffsetsStrictlyIncrease**: offsets are running sums of segment counts
//! - **TombstonesMonotonic**: deleted documents stay deleted
//! - **NoEmptySegments**: fully deleted segments leave the root

pub mod history;
pub mod invariants;
pub mod observation;

pub use history::SnapshotHistory;
pub use invariants::{
    check_all_invariants, default_invariants, EpochsStrictlyIncrease, Invariant, NoEmptySegments,
    OffsetsStrictlyIncrease, TombstonesMonotonic, Violation,
};
pub use observation::{ObservedSegment, Observation};

/// Prelude for easy imports
pub mod prelude {
    pub use super::history::SnapshotHistory;
    pub use super::invariants::{check_all_invariants, default_invariants, Invariant, Violation};
    pub use super::observation::Observation;
}
