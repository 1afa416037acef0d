//! Model output metrics attached to a dataset profile.
//!
//! A profile may track the outputs of one model, either a classifier or a
//! regressor. [`ModelMetrics`] is a closed sum type over the two; tracking and
//! merging dispatch on the variant, and metrics of different variants never
//! combine.

mod classification;
mod regression;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProfileError, ProfileResult};
use crate::record::Record;
use crate::wire::messages::{ModelMetricsMessage, ModelPayload, WireModelType};

pub use classification::{
    ClassificationMetrics, ClassificationSummary, ConfusionCell, DEFAULT_SCORE,
};
pub use regression::{RegressionMetrics, RegressionSummary};

/// Declared model kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    Classification,
    Regression,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelType::Classification => write!(f, "CLASSIFICATION"),
            ModelType::Regression => write!(f, "REGRESSION"),
        }
    }
}

/// Metrics for the outputs of one model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelMetrics {
    Classification(ClassificationMetrics),
    Regression(RegressionMetrics),
}

impl ModelMetrics {
    /// Creates classification metrics. Without a score field every observation scores 1.0.
    pub fn classification(
        prediction_field: impl Into<String>,
        target_field: impl Into<String>,
        score_field: Option<String>,
    ) -> Self {
        Self::Classification(ClassificationMetrics::new(
            prediction_field,
            target_field,
            score_field,
        ))
    }

    pub fn regression(prediction_field: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self::Regression(RegressionMetrics::new(prediction_field, target_field))
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            ModelMetrics::Classification(_) => ModelType::Classification,
            ModelMetrics::Regression(_) => ModelType::Regression,
        }
    }

    pub fn as_classification(&self) -> Option<&ClassificationMetrics> {
        match self {
            ModelMetrics::Classification(m) => Some(m),
            ModelMetrics::Regression(_) => None,
        }
    }

    pub fn as_regression(&self) -> Option<&RegressionMetrics> {
        match self {
            ModelMetrics::Regression(m) => Some(m),
            ModelMetrics::Classification(_) => None,
        }
    }

    /// Folds the declared model fields of a record.
    pub fn track(&mut self, record: &Record) -> ProfileResult<()> {
        match self {
            ModelMetrics::Classification(m) => m.track(record),
            ModelMetrics::Regression(m) => m.track(record),
        }
    }

    /// Merges metrics of the same variant.
    pub fn merge(&self, other: &Self) -> ProfileResult<Self> {
        match (self, other) {
            (ModelMetrics::Classification(a), ModelMetrics::Classification(b)) => {
                Ok(ModelMetrics::Classification(a.merge(b)?))
            }
            (ModelMetrics::Regression(a), ModelMetrics::Regression(b)) => {
                Ok(ModelMetrics::Regression(a.merge(b)?))
            }
            _ => Err(ProfileError::ModelTypeMismatch {
                expected: self.model_type(),
                found: other.model_type(),
            }),
        }
    }

    /// Deep, independent copy of the accumulated state.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn summary(&self) -> ModelMetricsSummary {
        match self {
            ModelMetrics::Classification(m) => ModelMetricsSummary::Classification(m.summary()),
            ModelMetrics::Regression(m) => ModelMetricsSummary::Regression(m.summary()),
        }
    }

    pub(crate) fn to_message(&self) -> ModelMetricsMessage {
        match self {
            ModelMetrics::Classification(m) => ModelMetricsMessage {
                model_type: WireModelType::Classification as i32,
                payload: Some(ModelPayload::Classification(m.to_message())),
            },
            ModelMetrics::Regression(m) => ModelMetricsMessage {
                model_type: WireModelType::Regression as i32,
                payload: Some(ModelPayload::Regression(m.to_message())),
            },
        }
    }

    /// Rebuilds metrics from the wire, checking the declared type against the payload.
    pub(crate) fn from_message(msg: ModelMetricsMessage) -> ProfileResult<Self> {
        let declared = WireModelType::try_from(msg.model_type)
            .map_err(|_| ProfileError::wire(format!("Unknown model type {}", msg.model_type)))?;

        match (declared, msg.payload) {
            (WireModelType::Classification, Some(ModelPayload::Classification(m))) => Ok(
                ModelMetrics::Classification(ClassificationMetrics::from_message(m)),
            ),
            (WireModelType::Regression, Some(ModelPayload::Regression(m))) => {
                Ok(ModelMetrics::Regression(RegressionMetrics::from_message(m)))
            }
            (declared, payload) => Err(ProfileError::wire(format!(
                "Model type {declared:?} does not match payload {}",
                match payload {
                    Some(ModelPayload::Classification(_)) => "classification",
                    Some(ModelPayload::Regression(_)) => "regression",
                    None => "none",
                }
            ))),
        }
    }
}

/// Serializable summary of [`ModelMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum ModelMetricsSummary {
    Classification(ClassificationSummary),
    Regression(RegressionSummary),
}
