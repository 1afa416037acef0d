//! Dataset profiles.
//!
//! A [`DatasetProfile`] summarizes a dataset, or a partition of one, as a map of
//! column accumulators plus the session and grouping identity of the data:
//!
//! - `session_id` / `session_timestamp`: the profiling run
//! - `data_timestamp`: the logical time bucket of the data, if any
//! - `tags`: grouping identity; profiles with different tags are different groups
//! - `metadata`: free-form annotations that carry no identity
//!
//! Profiles merge (see [`DatasetProfile::merge`] and
//! [`DatasetProfile::merge_strict`]) and serialize to a versioned wire format
//! (see [`crate::wire`]).
//!
//! ## Sharing
//!
//! Column storage sits behind a lock so `track` works through a shared
//! reference: several threads may feed one profile, and get-or-create of a new
//! column is race-free. Attaching model metrics with
//! [`DatasetProfile::with_classification_model`] consumes the profile and hands
//! its column storage to the new value, so there is never a second handle that
//! could keep mutating the same columns.

mod merge;
mod summary;

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::column::{ColumnAccumulator, ColumnProfile};
use crate::error::{ProfileError, ProfileResult};
use crate::metrics::ModelMetrics;
use crate::record::{Record, Value};

pub(crate) use merge::format_optional_instant;
pub use summary::{DatasetPropertiesSummary, DatasetSummary};

/// Ordered string map used for tags and metadata.
pub type StringMap = BTreeMap<String, String>;

/// A mergeable statistical profile of a dataset.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use term_profile::profile::DatasetProfile;
///
/// let now = Utc::now();
/// let first: DatasetProfile = DatasetProfile::new("users", now);
/// first.track("age", 31).unwrap();
/// let second: DatasetProfile = DatasetProfile::new("users", now);
/// second.track("age", 45).unwrap();
///
/// let merged = first.merge(&second).unwrap();
/// assert_eq!(merged.column_count("age"), Some(2));
/// ```
#[derive(Debug)]
pub struct DatasetProfile<C: ColumnAccumulator = ColumnProfile> {
    session_id: String,
    session_timestamp: DateTime<Utc>,
    data_timestamp: Option<DateTime<Utc>>,
    tags: StringMap,
    metadata: StringMap,
    columns: RwLock<BTreeMap<String, C>>,
    model: Option<Mutex<ModelMetrics>>,
}

impl<C: ColumnAccumulator> DatasetProfile<C> {
    /// Creates an unscoped profile with no tags, metadata or columns.
    ///
    /// This is the identity element of [`DatasetProfile::merge`].
    pub fn new(session_id: impl Into<String>, session_timestamp: DateTime<Utc>) -> Self {
        Self::scoped(
            session_id,
            session_timestamp,
            None,
            StringMap::new(),
            BTreeMap::new(),
        )
    }

    /// Creates an unscoped profile carrying grouping tags.
    pub fn with_tags(
        session_id: impl Into<String>,
        session_timestamp: DateTime<Utc>,
        tags: StringMap,
    ) -> Self {
        Self::scoped(session_id, session_timestamp, None, tags, BTreeMap::new())
    }

    /// General constructor, used for fresh profiles and for reconstruction.
    ///
    /// `columns` is taken over by the new profile.
    pub fn scoped(
        session_id: impl Into<String>,
        session_timestamp: DateTime<Utc>,
        data_timestamp: Option<DateTime<Utc>>,
        tags: StringMap,
        columns: BTreeMap<String, C>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            session_timestamp,
            data_timestamp,
            tags,
            metadata: StringMap::new(),
            columns: RwLock::new(columns),
            model: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session_timestamp(&self) -> DateTime<Utc> {
        self.session_timestamp
    }

    pub fn data_timestamp(&self) -> Option<DateTime<Utc>> {
        self.data_timestamp
    }

    pub fn tags(&self) -> &StringMap {
        &self.tags
    }

    pub fn metadata(&self) -> &StringMap {
        &self.metadata
    }

    /// Snapshot of the column accumulators.
    pub fn columns(&self) -> BTreeMap<String, C> {
        self.read_columns().clone()
    }

    /// Snapshot of one column accumulator.
    pub fn column(&self, name: &str) -> Option<C> {
        self.read_columns().get(name).cloned()
    }

    /// Number of values tracked for a column.
    pub fn column_count(&self, name: &str) -> Option<u64> {
        self.read_columns().get(name).map(ColumnAccumulator::count)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.read_columns().keys().cloned().collect()
    }

    pub fn num_columns(&self) -> usize {
        self.read_columns().len()
    }

    /// Snapshot of the model metrics, if model tracking is configured.
    pub fn model_metrics(&self) -> Option<ModelMetrics> {
        self.model
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// True for the sentinel profile: no data timestamp, columns, tags,
    /// metadata or model metrics.
    pub fn is_empty(&self) -> bool {
        self.data_timestamp.is_none()
            && self.tags.is_empty()
            && self.metadata.is_empty()
            && self.model.is_none()
            && self.read_columns().is_empty()
    }

    /// Adds one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Adds all metadata entries.
    pub fn with_all_metadata<I, K, V>(mut self, metadata: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata
            .extend(metadata.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Returns a profile that tracks classification outputs, taking over this
    /// profile's columns.
    pub fn with_classification_model(
        self,
        prediction_field: impl Into<String>,
        target_field: impl Into<String>,
        score_field: Option<String>,
    ) -> Self {
        self.with_model(ModelMetrics::classification(
            prediction_field,
            target_field,
            score_field,
        ))
    }

    /// Returns a profile that tracks regression outputs, taking over this
    /// profile's columns.
    pub fn with_regression_model(
        self,
        prediction_field: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        self.with_model(ModelMetrics::regression(prediction_field, target_field))
    }

    /// Attaches fresh (or reconstructed) model metrics.
    pub fn with_model(mut self, model: ModelMetrics) -> Self {
        self.model = Some(Mutex::new(model));
        self
    }

    /// Rebuilds the profile under a different session id, keeping everything else.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Tracks one value for a column, creating the accumulator on first sight.
    pub fn track(&self, column: &str, value: impl Into<Value>) -> ProfileResult<()> {
        let value = value.into();
        let mut columns = self.write_columns()?;
        match columns.get_mut(column) {
            Some(accumulator) => accumulator.track(&value),
            None => {
                let mut accumulator = C::new(column);
                accumulator.track(&value);
                columns.insert(column.to_string(), accumulator);
            }
        }
        Ok(())
    }

    /// Tracks every field of a record, then feeds the record to the model metrics.
    pub fn track_record(&self, record: &Record) -> ProfileResult<()> {
        {
            let mut columns = self.write_columns()?;
            for (name, value) in record.iter() {
                columns
                    .entry(name.to_string())
                    .or_insert_with(|| C::new(name))
                    .track(value);
            }
        }
        self.track_model(record)
    }

    /// Feeds a record to the model metrics only; a no-op without model tracking.
    pub fn track_model(&self, record: &Record) -> ProfileResult<()> {
        match &self.model {
            Some(model) => model
                .lock()
                .map_err(|e| ProfileError::Internal(format!("Failed to acquire model lock: {e}")))?
                .track(record),
            None => Ok(()),
        }
    }

    /// Produces a flat summary of every column.
    pub fn to_summary(&self) -> ProfileResult<DatasetSummary<C::Summary>> {
        self.validate()?;
        let columns = self
            .read_columns()
            .iter()
            .map(|(name, column)| (name.clone(), column.to_summary()))
            .collect();
        Ok(DatasetSummary {
            properties: DatasetPropertiesSummary::of(self),
            columns,
            model: self.model_metrics().map(|m| m.summary()),
        })
    }

    /// Checks the structural invariants every serialized or merged profile must hold.
    pub fn validate(&self) -> ProfileResult<()> {
        if self.session_id.is_empty() {
            return Err(ProfileError::integrity("session id must not be empty"));
        }
        if self.columns.is_poisoned() {
            return Err(ProfileError::integrity("column storage is poisoned"));
        }
        if let Some(key) = self.tags.keys().find(|k| k.is_empty()) {
            return Err(ProfileError::integrity(format!(
                "tag keys must not be empty (value '{}')",
                self.tags[key]
            )));
        }
        Ok(())
    }

    pub(crate) fn read_columns(&self) -> RwLockReadGuard<'_, BTreeMap<String, C>> {
        self.columns.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_columns(&self) -> ProfileResult<RwLockWriteGuard<'_, BTreeMap<String, C>>> {
        self.columns
            .write()
            .map_err(|e| ProfileError::Internal(format!("Failed to acquire column lock: {e}")))
    }

    fn lock_model(&self) -> Option<MutexGuard<'_, ModelMetrics>> {
        self.model
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<C: ColumnAccumulator> Clone for DatasetProfile<C> {
    /// Deep copy: the clone owns independent column and model state.
    fn clone(&self) -> Self {
        Self {
            session_id: self.session_id.clone(),
            session_timestamp: self.session_timestamp,
            data_timestamp: self.data_timestamp,
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
            columns: RwLock::new(self.columns()),
            model: self.lock_model().map(|m| Mutex::new(m.copy())),
        }
    }
}

impl<C: ColumnAccumulator + PartialEq> PartialEq for DatasetProfile<C> {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id
            && self.session_timestamp == other.session_timestamp
            && self.data_timestamp == other.data_timestamp
            && self.tags == other.tags
            && self.metadata == other.metadata
            && *self.read_columns() == *other.read_columns()
            && self.model_metrics() == other.model_metrics()
    }
}
