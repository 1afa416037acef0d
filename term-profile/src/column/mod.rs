//! Per-column accumulators.
//!
//! A dataset profile treats its columns as opaque, mergeable accumulators. The
//! [`ColumnAccumulator`] trait is the complete contract a profile relies on:
//! creation, tracking, pairwise merge, summary and a self-contained binary form.
//! [`ColumnProfile`] is the accumulator used unless a profile is parameterized
//! with another implementation.

mod profile;

use std::fmt::Debug;

use serde::Serialize;

use crate::error::ProfileResult;
use crate::record::Value;

pub use profile::{ColumnProfile, ColumnSummary, InferredType, NumberSummary, StringSummary};

/// Contract for a per-column statistics accumulator.
///
/// `merge` must be commutative and associative so that profiles computed on
/// arbitrary partitions combine into the same result. Implementations do not
/// need internal synchronization: the owning profile serializes access.
///
/// # Example
///
/// ```rust
/// use term_profile::column::{ColumnAccumulator, ColumnProfile};
/// use term_profile::record::Value;
///
/// let mut left = ColumnProfile::new("age");
/// left.track(&Value::Integer(30));
/// let mut right = ColumnProfile::new("age");
/// right.track(&Value::Integer(40));
///
/// let merged = left.merge(&right).unwrap();
/// assert_eq!(merged.count(), 2);
/// ```
pub trait ColumnAccumulator: Clone + Send + Sync + Debug + Sized {
    /// Summary produced by [`ColumnAccumulator::to_summary`].
    type Summary: Serialize + Clone + Debug + Send + Sync;

    /// Creates an empty accumulator for the named column.
    fn new(column_name: &str) -> Self;

    /// The column this accumulator observes.
    fn column_name(&self) -> &str;

    /// Folds one observed value into the accumulator.
    fn track(&mut self, value: &Value);

    /// Combines two accumulators of the same column into a new one.
    fn merge(&self, other: &Self) -> ProfileResult<Self>;

    /// Produces a flat, human-consumable summary.
    fn to_summary(&self) -> Self::Summary;

    /// Serializes the accumulator into a self-contained byte form.
    fn to_wire(&self) -> ProfileResult<Vec<u8>>;

    /// Reconstructs an accumulator from [`ColumnAccumulator::to_wire`] output.
    fn from_wire(bytes: &[u8]) -> ProfileResult<Self>;

    /// Number of values observed, nulls included.
    fn count(&self) -> u64;
}
