//! Distributed fold/combine contract.
//!
//! An external engine builds one profile per logical group by driving four
//! operations over partitioned input:
//!
//! - `zero()` creates the sentinel accumulator;
//! - `reduce(acc, record)` folds one record into an accumulator (sequential, one
//!   worker per partition);
//! - `merge(a, b)` combines partial accumulators in any order and association;
//! - `finish(acc)` stamps the dataset name and serializes the result.
//!
//! [`ProfileFold`] implements the contract for [`DatasetProfile`];
//! [`LocalFoldRunner`] drives it in process.
//!
//! # Example
//!
//! ```rust
//! use term_profile::fold::{FoldCombine, FoldConfig, ProfileFold};
//! use term_profile::profile::DatasetProfile;
//! use term_profile::record::Record;
//!
//! let config = FoldConfig::new("orders").with_group_by(["country"]);
//! let fold: ProfileFold = ProfileFold::new(config).unwrap();
//!
//! let acc = fold.zero();
//! let acc = fold
//!     .reduce(acc, &Record::new().with("country", "FR").with("amount", 12.5))
//!     .unwrap();
//! let bytes = fold.finish(acc).unwrap();
//!
//! let profile: DatasetProfile = DatasetProfile::from_bytes(&bytes).unwrap();
//! assert_eq!(profile.session_id(), "orders");
//! assert_eq!(profile.tags()["country"], "FR");
//! ```

mod runner;

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::column::{ColumnAccumulator, ColumnProfile};
use crate::error::{ProfileError, ProfileResult};
use crate::logging::render_map;
use crate::profile::{format_optional_instant, DatasetProfile, StringMap};
use crate::record::{format_instant, Record};
use crate::wire::ids::{IdGenerator, UuidGenerator};

pub use runner::{GroupOutput, LocalFoldRunner, RunnerConfig};

/// Tag key carrying the dataset name on every grouped profile.
pub const NAME_TAG: &str = "name";

/// The zero/reduce/merge/finish protocol.
///
/// `merge` must be commutative and associative, with `zero()` as identity.
pub trait FoldCombine: Send + Sync {
    type Input;
    type Accumulator: Send;
    type Output;

    fn zero(&self) -> Self::Accumulator;

    fn reduce(&self, acc: Self::Accumulator, input: &Self::Input)
        -> ProfileResult<Self::Accumulator>;

    fn merge(
        &self,
        left: Self::Accumulator,
        right: Self::Accumulator,
    ) -> ProfileResult<Self::Accumulator>;

    fn finish(&self, acc: Self::Accumulator) -> ProfileResult<Self::Output>;
}

/// A fold whose inputs carry the key of the group they belong to.
pub trait GroupedFold: FoldCombine {
    type Key: Ord + Clone + Send;

    fn group_key(&self, input: &Self::Input) -> ProfileResult<Self::Key>;
}

/// Model outputs to track while folding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelConfig {
    Classification {
        prediction: String,
        target: String,
        #[serde(default)]
        score: Option<String>,
    },
    Regression {
        prediction: String,
        target: String,
    },
}

impl ModelConfig {
    fn fields(&self) -> Vec<&str> {
        match self {
            ModelConfig::Classification {
                prediction,
                target,
                score,
            } => {
                let mut fields = vec![prediction.as_str(), target.as_str()];
                fields.extend(score.as_deref());
                fields
            }
            ModelConfig::Regression { prediction, target } => {
                vec![prediction.as_str(), target.as_str()]
            }
        }
    }

    fn attach<C: ColumnAccumulator>(&self, profile: DatasetProfile<C>) -> DatasetProfile<C> {
        match self {
            ModelConfig::Classification {
                prediction,
                target,
                score,
            } => profile.with_classification_model(prediction, target, score.clone()),
            ModelConfig::Regression { prediction, target } => {
                profile.with_regression_model(prediction, target)
            }
        }
    }
}

/// Configuration surface handed over by the external engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldConfig {
    /// Stamped as the session id of every finished profile.
    pub dataset_name: String,
    pub session_time: DateTime<Utc>,
    /// Column holding each record's logical timestamp.
    #[serde(default)]
    pub time_column: Option<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub model: Option<ModelConfig>,
}

impl FoldConfig {
    /// Creates a configuration with the session time set to now.
    pub fn new(dataset_name: impl Into<String>) -> Self {
        Self {
            dataset_name: dataset_name.into(),
            session_time: Utc::now(),
            time_column: None,
            group_by: Vec::new(),
            model: None,
        }
    }

    pub fn with_session_time(mut self, session_time: DateTime<Utc>) -> Self {
        self.session_time = session_time;
        self
    }

    pub fn with_time_column(mut self, column: impl Into<String>) -> Self {
        self.time_column = Some(column.into());
        self
    }

    pub fn with_group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_classification(
        mut self,
        prediction: impl Into<String>,
        target: impl Into<String>,
        score: Option<String>,
    ) -> Self {
        self.model = Some(ModelConfig::Classification {
            prediction: prediction.into(),
            target: target.into(),
            score,
        });
        self
    }

    pub fn with_regression(mut self, prediction: impl Into<String>, target: impl Into<String>) -> Self {
        self.model = Some(ModelConfig::Regression {
            prediction: prediction.into(),
            target: target.into(),
        });
        self
    }

    pub fn from_json(json: &str) -> ProfileResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> ProfileResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn validate(&self) -> ProfileResult<()> {
        if self.dataset_name.is_empty() {
            return Err(ProfileError::Configuration(
                "dataset name must not be empty".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for column in &self.group_by {
            if column.is_empty() {
                return Err(ProfileError::Configuration(
                    "group-by column names must not be empty".to_string(),
                ));
            }
            if column == NAME_TAG {
                return Err(ProfileError::Configuration(format!(
                    "group-by column '{NAME_TAG}' collides with the dataset name tag"
                )));
            }
            if !seen.insert(column.as_str()) {
                return Err(ProfileError::Configuration(format!(
                    "group-by column '{column}' is listed twice"
                )));
            }
        }
        if let Some(time_column) = &self.time_column {
            if time_column.is_empty() || time_column == NAME_TAG {
                return Err(ProfileError::Configuration(format!(
                    "invalid time column '{time_column}'"
                )));
            }
            if seen.contains(time_column.as_str()) {
                return Err(ProfileError::Configuration(format!(
                    "time column '{time_column}' is also a group-by column"
                )));
            }
        }
        if let Some(model) = &self.model {
            if model.fields().iter().any(|f| f.is_empty()) {
                return Err(ProfileError::Configuration(
                    "model field names must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn is_grouping_field(&self, name: &str) -> bool {
        self.time_column.as_deref() == Some(name) || self.group_by.iter().any(|g| g == name)
    }
}

/// Grouping identity derived from one record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub tags: StringMap,
    pub data_timestamp: Option<DateTime<Utc>>,
}

/// [`FoldCombine`] over records producing serialized [`DatasetProfile`]s.
#[derive(Debug)]
pub struct ProfileFold<C: ColumnAccumulator = ColumnProfile> {
    config: FoldConfig,
    ids: Arc<dyn IdGenerator>,
    _columns: PhantomData<fn() -> C>,
}

impl<C: ColumnAccumulator> ProfileFold<C> {
    pub fn new(config: FoldConfig) -> ProfileResult<Self> {
        Self::with_id_generator(config, Arc::new(UuidGenerator))
    }

    /// Uses `ids` for provisional session ids.
    pub fn with_id_generator(config: FoldConfig, ids: Arc<dyn IdGenerator>) -> ProfileResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ids,
            _columns: PhantomData,
        })
    }

    pub fn config(&self) -> &FoldConfig {
        &self.config
    }

    /// Derives the tags and data timestamp of a record.
    pub fn group_key(&self, record: &Record) -> ProfileResult<GroupKey> {
        let mut tags = StringMap::new();
        tags.insert(NAME_TAG.to_string(), self.config.dataset_name.clone());
        for column in &self.config.group_by {
            let value = record
                .get(column)
                .ok_or_else(|| ProfileError::missing_field(column.as_str()))?;
            tags.insert(column.clone(), value.to_string());
        }

        let data_timestamp = match &self.config.time_column {
            Some(column) => {
                let value = record
                    .get(column)
                    .ok_or_else(|| ProfileError::missing_field(column.as_str()))?;
                let ts = value.as_timestamp().ok_or_else(|| {
                    ProfileError::invalid_value(
                        column.as_str(),
                        format!("expected a timestamp, got {value}"),
                    )
                })?;
                tags.insert(column.clone(), format_instant(&ts));
                Some(ts)
            }
            None => None,
        };

        Ok(GroupKey {
            tags,
            data_timestamp,
        })
    }

    fn promote(&self, key: GroupKey) -> DatasetProfile<C> {
        let profile = DatasetProfile::scoped(
            self.ids.next_id(),
            self.config.session_time,
            key.data_timestamp,
            key.tags,
            Default::default(),
        );
        debug!(session_id = %profile.session_id(), "Promoted sentinel accumulator");
        match &self.config.model {
            Some(model) => model.attach(profile),
            None => profile,
        }
    }
}

impl<C: ColumnAccumulator> FoldCombine for ProfileFold<C> {
    type Input = Record;
    type Accumulator = DatasetProfile<C>;
    type Output = Vec<u8>;

    fn zero(&self) -> DatasetProfile<C> {
        DatasetProfile::new(self.ids.next_id(), self.config.session_time)
    }

    fn reduce(&self, acc: DatasetProfile<C>, record: &Record) -> ProfileResult<DatasetProfile<C>> {
        let key = self.group_key(record)?;
        let profile = if acc.is_empty() {
            self.promote(key)
        } else {
            if acc.data_timestamp() != key.data_timestamp {
                let previous = format_optional_instant(acc.data_timestamp().as_ref());
                let current = format_optional_instant(key.data_timestamp.as_ref());
                warn!(%previous, %current, "Record routed to accumulator of another time bucket");
                return Err(ProfileError::inconsistent_grouping(
                    "data timestamp",
                    previous,
                    current,
                ));
            }
            if acc.tags() != &key.tags {
                let previous = render_map(acc.tags());
                let current = render_map(&key.tags);
                warn!(%previous, %current, "Record routed to accumulator of another group");
                return Err(ProfileError::inconsistent_grouping("tags", previous, current));
            }
            acc
        };

        for (name, value) in record.iter() {
            if !self.config.is_grouping_field(name) {
                profile.track(name, value.clone())?;
            }
        }
        profile.track_model(record)?;
        Ok(profile)
    }

    fn merge(&self, left: DatasetProfile<C>, right: DatasetProfile<C>) -> ProfileResult<DatasetProfile<C>> {
        left.merge(&right)
    }

    #[instrument(skip_all, fields(dataset = %self.config.dataset_name))]
    fn finish(&self, acc: DatasetProfile<C>) -> ProfileResult<Vec<u8>> {
        let profile = acc.with_session_id(self.config.dataset_name.clone());
        let bytes = profile.to_bytes()?;
        debug!(
            columns = profile.num_columns(),
            bytes = bytes.len(),
            "Finished grouped profile"
        );
        Ok(bytes)
    }
}

impl<C: ColumnAccumulator> GroupedFold for ProfileFold<C> {
    type Key = GroupKey;

    fn group_key(&self, record: &Record) -> ProfileResult<GroupKey> {
        ProfileFold::group_key(self, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::wire::ids::SequentialGenerator;
    use chrono::TimeZone;

    fn fold(config: FoldConfig) -> ProfileFold {
        ProfileFold::with_id_generator(config, Arc::new(SequentialGenerator::new("acc"))).unwrap()
    }

    fn session() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_zero_is_sentinel() {
        let fold = fold(FoldConfig::new("ds"));
        assert!(fold.zero().is_empty());
    }

    #[test]
    fn test_reduce_promotes_without_time_column() {
        let fold = fold(
            FoldConfig::new("ds")
                .with_session_time(session())
                .with_group_by(["country"]),
        );
        let acc = fold
            .reduce(
                fold.zero(),
                &Record::new().with("country", "FR").with("amount", 3),
            )
            .unwrap();

        assert_eq!(acc.data_timestamp(), None);
        assert_eq!(acc.session_timestamp(), session());
        assert_eq!(acc.tags()[NAME_TAG], "ds");
        assert_eq!(acc.tags()["country"], "FR");
        assert_eq!(acc.column_names(), vec!["amount"]);
    }

    #[test]
    fn test_reduce_promotes_with_time_column() {
        let fold = fold(FoldConfig::new("ds").with_time_column("day"));
        let acc = fold
            .reduce(fold.zero(), &Record::new().with("day", day(2)).with("x", 1))
            .unwrap();

        assert_eq!(acc.data_timestamp(), Some(day(2)));
        assert_eq!(acc.tags()["day"], "2024-05-02T00:00:00.000Z");
        assert!(acc.column("day").is_none());
    }

    #[test]
    fn test_reduce_rejects_other_time_bucket() {
        let fold = fold(FoldConfig::new("ds").with_time_column("day"));
        let acc = fold
            .reduce(fold.zero(), &Record::new().with("day", day(2)))
            .unwrap();
        let err = fold
            .reduce(acc, &Record::new().with("day", day(3)))
            .unwrap_err();

        assert!(matches!(
            &err,
            ProfileError::InconsistentGrouping { field, .. } if field == "data timestamp"
        ));
        assert!(err.to_string().contains("2024-05-02T00:00:00.000Z"));
        assert!(err.to_string().contains("2024-05-03T00:00:00.000Z"));
    }

    #[test]
    fn test_reduce_rejects_other_group() {
        let fold = fold(FoldConfig::new("ds").with_group_by(["country"]));
        let acc = fold
            .reduce(fold.zero(), &Record::new().with("country", "FR"))
            .unwrap();
        let err = fold
            .reduce(acc, &Record::new().with("country", "DE"))
            .unwrap_err();
        assert!(matches!(
            err,
            ProfileError::InconsistentGrouping { field, .. } if field == "tags"
        ));
    }

    #[test]
    fn test_reduce_reports_missing_group_field() {
        let fold = fold(FoldConfig::new("ds").with_group_by(["country"]));
        assert!(matches!(
            fold.reduce(fold.zero(), &Record::new().with("x", 1)),
            Err(ProfileError::MissingField { .. })
        ));
    }

    #[test]
    fn test_reduce_tracks_model() {
        let fold = fold(FoldConfig::new("ds").with_classification("pred", "label", None));
        let mut acc = fold.zero();
        for (p, t) in [("a", "a"), ("a", "b"), ("b", "b")] {
            acc = fold
                .reduce(acc, &Record::new().with("pred", p).with("label", t))
                .unwrap();
        }
        let metrics = acc.model_metrics().unwrap();
        let classification = metrics.as_classification().unwrap();
        assert_eq!(classification.count(), 3);
        assert_eq!(classification.cell_count("a", "b"), 1);
    }

    #[test]
    fn test_merge_with_zero_is_identity() {
        let fold = fold(FoldConfig::new("ds"));
        let acc = fold
            .reduce(fold.zero(), &Record::new().with("x", 1))
            .unwrap();
        let merged = fold.merge(fold.zero(), acc.clone()).unwrap();
        assert_eq!(merged, acc);
        let merged = fold.merge(acc.clone(), fold.zero()).unwrap();
        assert_eq!(merged, acc);
    }

    #[test]
    fn test_finish_stamps_dataset_name() {
        let fold = fold(
            FoldConfig::new("orders")
                .with_session_time(session())
                .with_time_column("day"),
        );
        let acc = fold
            .reduce(
                fold.zero(),
                &Record::new().with("day", day(1)).with("amount", Value::Null),
            )
            .unwrap();
        assert_eq!(acc.session_id(), "acc-1");

        let profile: DatasetProfile = DatasetProfile::from_bytes(&fold.finish(acc).unwrap()).unwrap();
        assert_eq!(profile.session_id(), "orders");
        assert_eq!(profile.data_timestamp(), Some(day(1)));
        assert_eq!(profile.column_count("amount"), Some(1));
    }

    #[test]
    fn test_config_validation() {
        assert!(FoldConfig::new("").validate().is_err());
        assert!(FoldConfig::new("ds")
            .with_group_by(["a", "a"])
            .validate()
            .is_err());
        assert!(FoldConfig::new("ds")
            .with_group_by(["day"])
            .with_time_column("day")
            .validate()
            .is_err());
        assert!(FoldConfig::new("ds").with_group_by([NAME_TAG]).validate().is_err());
        assert!(FoldConfig::new("ds")
            .with_regression("", "target")
            .validate()
            .is_err());
        assert!(ProfileFold::<ColumnProfile>::new(FoldConfig::new("")).is_err());
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = FoldConfig::new("ds")
            .with_session_time(session())
            .with_time_column("day")
            .with_group_by(["country", "device"])
            .with_classification("pred", "label", Some("score".to_string()));
        let json = config.to_json().unwrap();
        assert_eq!(FoldConfig::from_json(&json).unwrap(), config);

        let minimal = r#"{"dataset_name":"ds","session_time":"2024-05-01T08:00:00Z"}"#;
        let parsed = FoldConfig::from_json(minimal).unwrap();
        assert!(parsed.group_by.is_empty());
        assert_eq!(parsed.session_time, session());

        let model = r#"{"dataset_name":"ds","session_time":"2024-05-01T08:00:00Z",
            "model":{"type":"regression","prediction":"p","target":"t"}}"#;
        assert!(matches!(
            FoldConfig::from_json(model).unwrap().model,
            Some(ModelConfig::Regression { .. })
        ));
    }
}
