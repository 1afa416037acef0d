use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DatasetProfile, StringMap};
use crate::column::ColumnAccumulator;
use crate::error::ProfileResult;
use crate::metrics::ModelMetricsSummary;

/// Identity of a summarized profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetPropertiesSummary {
    pub session_id: String,
    pub session_timestamp: DateTime<Utc>,
    pub data_timestamp: Option<DateTime<Utc>>,
    pub tags: StringMap,
    pub metadata: StringMap,
}

impl DatasetPropertiesSummary {
    pub(super) fn of<C: ColumnAccumulator>(profile: &DatasetProfile<C>) -> Self {
        Self {
            session_id: profile.session_id.clone(),
            session_timestamp: profile.session_timestamp,
            data_timestamp: profile.data_timestamp,
            tags: profile.tags.clone(),
            metadata: profile.metadata.clone(),
        }
    }
}

/// Flat, serializable view of a [`DatasetProfile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary<S> {
    pub properties: DatasetPropertiesSummary,
    pub columns: BTreeMap<String, S>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelMetricsSummary>,
}

impl<S: Serialize> DatasetSummary<S> {
    pub fn to_json(&self) -> ProfileResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
