//! Regression metrics: error moments between prediction and target.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classification::check_field;
use crate::error::{ProfileError, ProfileResult};
use crate::record::{Record, Value};
use crate::wire::messages::RegressionMetricsMessage;

/// Accumulates `prediction - target` differences of a regression model.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionMetrics {
    prediction_field: String,
    target_field: String,
    count: u64,
    sum_diff: f64,
    sum_abs_diff: f64,
    sum2_diff: f64,
}

impl RegressionMetrics {
    pub fn new(prediction_field: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            prediction_field: prediction_field.into(),
            target_field: target_field.into(),
            count: 0,
            sum_diff: 0.0,
            sum_abs_diff: 0.0,
            sum2_diff: 0.0,
        }
    }

    pub fn prediction_field(&self) -> &str {
        &self.prediction_field
    }

    pub fn target_field(&self) -> &str {
        &self.target_field
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn track(&mut self, record: &Record) -> ProfileResult<()> {
        let prediction = numeric(record, &self.prediction_field)?;
        let target = numeric(record, &self.target_field)?;
        let (Some(prediction), Some(target)) = (prediction, target) else {
            debug!(
                prediction_field = %self.prediction_field,
                target_field = %self.target_field,
                "Skipping record with null model output"
            );
            return Ok(());
        };

        let diff = prediction - target;
        self.count += 1;
        self.sum_diff += diff;
        self.sum_abs_diff += diff.abs();
        self.sum2_diff += diff * diff;
        Ok(())
    }

    pub fn merge(&self, other: &Self) -> ProfileResult<Self> {
        check_field("prediction", &self.prediction_field, &other.prediction_field)?;
        check_field("target", &self.target_field, &other.target_field)?;

        Ok(Self {
            prediction_field: self.prediction_field.clone(),
            target_field: self.target_field.clone(),
            count: self.count + other.count,
            sum_diff: self.sum_diff + other.sum_diff,
            sum_abs_diff: self.sum_abs_diff + other.sum_abs_diff,
            sum2_diff: self.sum2_diff + other.sum2_diff,
        })
    }

    pub fn summary(&self) -> RegressionSummary {
        let n = self.count as f64;
        let (mean_error, mae, mse) = if self.count == 0 {
            (None, None, None)
        } else {
            (
                Some(self.sum_diff / n),
                Some(self.sum_abs_diff / n),
                Some(self.sum2_diff / n),
            )
        };

        RegressionSummary {
            prediction_field: self.prediction_field.clone(),
            target_field: self.target_field.clone(),
            count: self.count,
            mean_error,
            mean_absolute_error: mae,
            mean_squared_error: mse,
            root_mean_squared_error: mse.map(f64::sqrt),
        }
    }

    pub(crate) fn to_message(&self) -> RegressionMetricsMessage {
        RegressionMetricsMessage {
            prediction_field: self.prediction_field.clone(),
            target_field: self.target_field.clone(),
            count: self.count,
            sum_diff: self.sum_diff,
            sum_abs_diff: self.sum_abs_diff,
            sum2_diff: self.sum2_diff,
        }
    }

    pub(crate) fn from_message(msg: RegressionMetricsMessage) -> Self {
        Self {
            prediction_field: msg.prediction_field,
            target_field: msg.target_field,
            count: msg.count,
            sum_diff: msg.sum_diff,
            sum_abs_diff: msg.sum_abs_diff,
            sum2_diff: msg.sum2_diff,
        }
    }
}

/// Reads a declared field as a number; `None` for null.
fn numeric(record: &Record, name: &str) -> ProfileResult<Option<f64>> {
    match record.get(name) {
        None => Err(ProfileError::missing_field(name)),
        Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            ProfileError::invalid_value(name, format!("expected a numeric value, got {value}"))
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionSummary {
    pub prediction_field: String,
    pub target_field: String,
    pub count: u64,
    pub mean_error: Option<f64>,
    pub mean_absolute_error: Option<f64>,
    pub mean_squared_error: Option<f64>,
    pub root_mean_squared_error: Option<f64>,
}
