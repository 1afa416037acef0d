//! Merge algebra for [`DatasetProfile`].
//!
//! Both merges share one general path. They differ only in how grouping
//! identity is handled:
//!
//! - [`DatasetProfile::merge_strict`] requires session id, session timestamp,
//!   data timestamp and tags to be equal on both sides.
//! - [`DatasetProfile::merge`] keeps the tags equal on both sides and takes the
//!   session id and timestamps from `self` without checking them. Callers must
//!   only use it for profiles known to belong to the same group.
//!
//! When either side is the sentinel (see [`DatasetProfile::is_empty`]) the other
//! side is returned unchanged and no validation happens.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use tracing::{debug, instrument, warn};

use super::{DatasetProfile, StringMap};
use crate::column::ColumnAccumulator;
use crate::error::{ProfileError, ProfileResult};
use crate::logging::render_map;
use crate::record::format_instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grouping {
    Strict,
    Intersect,
}

impl<C: ColumnAccumulator> DatasetProfile<C> {
    /// Lenient merge: tags and metadata are intersected on equal values.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    pub fn merge(&self, other: &Self) -> ProfileResult<Self> {
        self.merge_with(other, Grouping::Intersect)
    }

    /// Strict merge: fails with [`ProfileError::InconsistentGrouping`] unless
    /// both sides share session id, session timestamp, data timestamp and tags.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    pub fn merge_strict(&self, other: &Self) -> ProfileResult<Self> {
        self.merge_with(other, Grouping::Strict)
    }

    fn merge_with(&self, other: &Self, grouping: Grouping) -> ProfileResult<Self> {
        if other.is_empty() {
            debug!("Right operand is the sentinel, returning left");
            return Ok(self.clone());
        }
        if self.is_empty() {
            debug!("Left operand is the sentinel, returning right");
            return Ok(other.clone());
        }

        self.validate()?;
        other.validate()?;

        let tags = match grouping {
            Grouping::Strict => {
                self.check_same_group(other)?;
                self.tags.clone()
            }
            Grouping::Intersect => intersect(&self.tags, &other.tags),
        };

        let columns = merge_columns(&self.read_columns(), &other.read_columns())?;
        let model = match (self.model_metrics(), other.model_metrics()) {
            (Some(left), Some(right)) => Some(left.merge(&right)?),
            (Some(only), None) | (None, Some(only)) => Some(only.copy()),
            (None, None) => None,
        };

        Ok(Self {
            session_id: self.session_id.clone(),
            session_timestamp: self.session_timestamp,
            data_timestamp: self.data_timestamp,
            tags,
            metadata: intersect(&self.metadata, &other.metadata),
            columns: RwLock::new(columns),
            model: model.map(Mutex::new),
        })
    }

    fn check_same_group(&self, other: &Self) -> ProfileResult<()> {
        let mismatch = if self.session_id != other.session_id {
            Some(("name", self.session_id.clone(), other.session_id.clone()))
        } else if self.session_timestamp != other.session_timestamp {
            Some((
                "session timestamp",
                format_instant(&self.session_timestamp),
                format_instant(&other.session_timestamp),
            ))
        } else if self.data_timestamp != other.data_timestamp {
            Some((
                "data timestamp",
                format_optional_instant(self.data_timestamp.as_ref()),
                format_optional_instant(other.data_timestamp.as_ref()),
            ))
        } else if self.tags != other.tags {
            Some(("tags", render_map(&self.tags), render_map(&other.tags)))
        } else {
            None
        };

        match mismatch {
            Some((field, previous, current)) => {
                warn!(field, %previous, %current, "Rejecting strict merge of different groups");
                Err(ProfileError::inconsistent_grouping(field, previous, current))
            }
            None => Ok(()),
        }
    }
}

/// Renders an optional instant, `none` when absent.
pub(crate) fn format_optional_instant(ts: Option<&chrono::DateTime<chrono::Utc>>) -> String {
    ts.map_or_else(|| "none".to_string(), format_instant)
}

/// Pairs present and equal on both sides.
fn intersect(left: &StringMap, right: &StringMap) -> StringMap {
    left.iter()
        .filter(|(k, v)| right.get(*k) == Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn merge_columns<C: ColumnAccumulator>(
    left: &BTreeMap<String, C>,
    right: &BTreeMap<String, C>,
) -> ProfileResult<BTreeMap<String, C>> {
    let mut merged = left.clone();
    for (name, column) in right {
        let combined = match left.get(name) {
            Some(existing) => existing.merge(column)?,
            None => column.clone(),
        };
        merged.insert(name.clone(), combined);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use chrono::{Duration, Utc};

    type Profile = DatasetProfile;

    fn map(pairs: &[(&str, &str)]) -> StringMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_sentinel_is_identity() {
        let now = Utc::now();
        let profile = Profile::with_tags("test", now, map(&[("key", "foo")])).with_metadata("m", "v");
        profile.track("col1", 1).unwrap();
        let zero = Profile::new("zero", now);

        let left = zero.merge(&profile).unwrap();
        let right = profile.merge(&zero).unwrap();
        assert_eq!(left, profile);
        assert_eq!(right, profile);
        assert_eq!(profile.merge_strict(&zero).unwrap(), profile);
    }

    #[test]
    fn test_merge_unions_columns() {
        let now = Utc::now();
        let a = Profile::new("test", now);
        a.track("col1", "value").unwrap();
        let b = Profile::new("test", now);
        b.track("col2", "value").unwrap();

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.column_names(), vec!["col1", "col2"]);
        assert_eq!(merged.column_count("col1"), Some(1));
        assert_eq!(merged.column_count("col2"), Some(1));

        let c = Profile::new("test", now);
        c.track("col1", "value").unwrap();
        assert_eq!(a.merge(&c).unwrap().column_count("col1"), Some(2));
    }

    #[test]
    fn test_merge_intersects_tags() {
        let now = Utc::now();
        let a = Profile::with_tags("test", now, map(&[("key", "foo"), ("key2", "foo2")]));
        let b = Profile::with_tags("test", now, map(&[("key", "foo"), ("key2", "foo3")]));

        assert_eq!(a.merge(&b).unwrap().tags(), &map(&[("key", "foo")]));
    }

    #[test]
    fn test_merge_intersects_metadata() {
        let now = Utc::now();
        let a = Profile::new("test", now).with_all_metadata([("m1", "v1"), ("m2", "v2"), ("m3", "v3")]);
        let b = Profile::new("test", now).with_all_metadata([("m1", "v1"), ("m2", "v2"), ("m3", "other")]);

        assert_eq!(
            a.merge(&b).unwrap().metadata(),
            &map(&[("m1", "v1"), ("m2", "v2")])
        );
    }

    #[test]
    fn test_merge_strict_rejects_different_tags() {
        let now = Utc::now();
        let a = Profile::with_tags("test", now, map(&[("key", "foo")]));
        let b = Profile::with_tags("test", now, map(&[("key", "bar")]));

        let err = a.merge_strict(&b).unwrap_err();
        assert!(err.is_grouping_error());
        assert_eq!(
            err.to_string(),
            "Mismatched tags. Current [{key=foo}] is merged with [{key=bar}]"
        );
        assert!(a.merge(&b).unwrap().tags().is_empty());
    }

    #[test]
    fn test_merge_strict_rejects_different_identity() {
        let now = Utc::now();
        let a = Profile::new("test", now);
        a.track("col1", 1).unwrap();

        let other_name = Profile::new("other", now);
        other_name.track("col1", 1).unwrap();
        assert!(matches!(
            a.merge_strict(&other_name),
            Err(ProfileError::InconsistentGrouping { field, .. }) if field == "name"
        ));

        let other_time = Profile::new("test", now + Duration::seconds(1));
        other_time.track("col1", 1).unwrap();
        assert!(matches!(
            a.merge_strict(&other_time),
            Err(ProfileError::InconsistentGrouping { field, .. }) if field == "session timestamp"
        ));

        let scoped = Profile::scoped("test", now, Some(now), StringMap::new(), BTreeMap::new());
        scoped.track("col1", 1).unwrap();
        assert!(matches!(
            a.merge_strict(&scoped),
            Err(ProfileError::InconsistentGrouping { field, .. }) if field == "data timestamp"
        ));
    }

    #[test]
    fn test_lenient_merge_keeps_left_identity() {
        let now = Utc::now();
        let later = now + Duration::hours(1);
        let a = Profile::scoped("left", now, Some(now), StringMap::new(), BTreeMap::new());
        a.track("col1", 1).unwrap();
        let b = Profile::scoped("right", later, Some(later), StringMap::new(), BTreeMap::new());
        b.track("col1", 2).unwrap();

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.session_id(), "left");
        assert_eq!(merged.session_timestamp(), now);
        assert_eq!(merged.data_timestamp(), Some(now));
        assert_eq!(merged.column_count("col1"), Some(2));
    }

    #[test]
    fn test_merge_copies_one_sided_model() {
        let now = Utc::now();
        let with_model = Profile::new("test", now).with_regression_model("pred", "target");
        with_model
            .track_record(&Record::new().with("pred", 1.0).with("target", 0.0))
            .unwrap();
        let plain = Profile::new("test", now);
        plain.track("pred", 2.0).unwrap();

        let merged = plain.merge(&with_model).unwrap();
        let metrics = merged.model_metrics().unwrap();
        assert_eq!(metrics.as_regression().unwrap().count(), 1);
        assert_eq!(merged.column_count("pred"), Some(2));
    }

    #[test]
    fn test_merge_rejects_mixed_model_types() {
        let now = Utc::now();
        let a = Profile::new("test", now).with_regression_model("pred", "target");
        let b = Profile::new("test", now).with_classification_model("pred", "target", None);

        assert!(matches!(
            a.merge(&b),
            Err(ProfileError::ModelTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_merge_validates_operands() {
        let now = Utc::now();
        let a = Profile::new("", now);
        a.track("col1", 1).unwrap();
        let b = Profile::new("test", now);
        b.track("col1", 1).unwrap();

        assert!(matches!(a.merge(&b), Err(ProfileError::Integrity(_))));
    }
}
