//! Classification metrics: a confusion matrix with per-cell score statistics.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProfileError, ProfileResult};
use crate::record::{Record, Value};
use crate::wire::messages::{ScoreCellMessage, ScoreMatrixMessage};

/// Score applied to every observation when no score field is declared.
pub const DEFAULT_SCORE: f64 = 1.0;

/// Statistics for one (prediction, target) cell.
#[derive(Debug, Clone, PartialEq)]
struct ScoreCell {
    count: u64,
    score_sum: f64,
    score_min: f64,
    score_max: f64,
}

impl ScoreCell {
    fn new(score: f64) -> Self {
        Self {
            count: 1,
            score_sum: score,
            score_min: score,
            score_max: score,
        }
    }

    fn add(&mut self, score: f64) {
        self.count += 1;
        self.score_sum += score;
        self.score_min = self.score_min.min(score);
        self.score_max = self.score_max.max(score);
    }

    fn merge(&self, other: &Self) -> Self {
        Self {
            count: self.count + other.count,
            score_sum: self.score_sum + other.score_sum,
            score_min: self.score_min.min(other.score_min),
            score_max: self.score_max.max(other.score_max),
        }
    }
}

/// Accumulates prediction/target pairs of a classification model.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationMetrics {
    prediction_field: String,
    target_field: String,
    score_field: Option<String>,
    /// Keyed by (prediction label, target label).
    cells: BTreeMap<(String, String), ScoreCell>,
}

impl ClassificationMetrics {
    pub fn new(
        prediction_field: impl Into<String>,
        target_field: impl Into<String>,
        score_field: Option<String>,
    ) -> Self {
        Self {
            prediction_field: prediction_field.into(),
            target_field: target_field.into(),
            score_field,
            cells: BTreeMap::new(),
        }
    }

    pub fn prediction_field(&self) -> &str {
        &self.prediction_field
    }

    pub fn target_field(&self) -> &str {
        &self.target_field
    }

    pub fn score_field(&self) -> Option<&str> {
        self.score_field.as_deref()
    }

    /// Total number of tracked observations.
    pub fn count(&self) -> u64 {
        self.cells.values().map(|c| c.count).sum()
    }

    /// Number of observations for a (prediction, target) pair.
    pub fn cell_count(&self, prediction: &str, target: &str) -> u64 {
        self.cells
            .get(&(prediction.to_string(), target.to_string()))
            .map_or(0, |c| c.count)
    }

    /// Folds the declared fields of one record into the matrix.
    ///
    /// Fails if a declared field is absent from the record. A record whose
    /// prediction or target is null contributes nothing.
    pub fn track(&mut self, record: &Record) -> ProfileResult<()> {
        let prediction = field(record, &self.prediction_field)?;
        let target = field(record, &self.target_field)?;
        let score = match &self.score_field {
            Some(name) => {
                let value = field(record, name)?;
                if value.is_null() {
                    None
                } else {
                    Some(value.as_f64().ok_or_else(|| {
                        ProfileError::invalid_value(name.as_str(), format!("score must be numeric, got {value}"))
                    })?)
                }
            }
            None => Some(DEFAULT_SCORE),
        };

        let (Some(score), false, false) = (score, prediction.is_null(), target.is_null()) else {
            debug!(
                prediction_field = %self.prediction_field,
                target_field = %self.target_field,
                "Skipping record with null model output"
            );
            return Ok(());
        };

        self.cells
            .entry((prediction.to_string(), target.to_string()))
            .and_modify(|cell| cell.add(score))
            .or_insert_with(|| ScoreCell::new(score));
        Ok(())
    }

    /// Merges two matrices tracking the same fields.
    pub fn merge(&self, other: &Self) -> ProfileResult<Self> {
        check_field("prediction", &self.prediction_field, &other.prediction_field)?;
        check_field("target", &self.target_field, &other.target_field)?;
        if self.score_field != other.score_field {
            return Err(ProfileError::ModelFieldMismatch {
                role: "score",
                expected: self.score_field.clone().unwrap_or_default(),
                found: other.score_field.clone().unwrap_or_default(),
            });
        }

        let mut cells = self.cells.clone();
        for (key, cell) in &other.cells {
            cells
                .entry(key.clone())
                .and_modify(|existing| *existing = existing.merge(cell))
                .or_insert_with(|| cell.clone());
        }

        Ok(Self {
            prediction_field: self.prediction_field.clone(),
            target_field: self.target_field.clone(),
            score_field: self.score_field.clone(),
            cells,
        })
    }

    pub fn summary(&self) -> ClassificationSummary {
        let labels: BTreeSet<String> = self
            .cells
            .keys()
            .flat_map(|(p, t)| [p.clone(), t.clone()])
            .collect();
        let total = self.count();
        let correct: u64 = self
            .cells
            .iter()
            .filter(|((p, t), _)| p == t)
            .map(|(_, c)| c.count)
            .sum();

        ClassificationSummary {
            prediction_field: self.prediction_field.clone(),
            target_field: self.target_field.clone(),
            score_field: self.score_field.clone(),
            labels: labels.into_iter().collect(),
            count: total,
            accuracy: (total > 0).then(|| correct as f64 / total as f64),
            cells: self
                .cells
                .iter()
                .map(|((prediction, target), cell)| ConfusionCell {
                    prediction: prediction.clone(),
                    target: target.clone(),
                    count: cell.count,
                    mean_score: cell.score_sum / cell.count as f64,
                    min_score: cell.score_min,
                    max_score: cell.score_max,
                })
                .collect(),
        }
    }

    pub(crate) fn to_message(&self) -> ScoreMatrixMessage {
        ScoreMatrixMessage {
            prediction_field: self.prediction_field.clone(),
            target_field: self.target_field.clone(),
            score_field: self.score_field.clone(),
            cells: self
                .cells
                .iter()
                .map(|((prediction, target), cell)| ScoreCellMessage {
                    prediction: prediction.clone(),
                    target: target.clone(),
                    count: cell.count,
                    score_sum: cell.score_sum,
                    score_min: cell.score_min,
                    score_max: cell.score_max,
                })
                .collect(),
        }
    }

    pub(crate) fn from_message(msg: ScoreMatrixMessage) -> Self {
        let cells = msg
            .cells
            .into_iter()
            .map(|c| {
                (
                    (c.prediction, c.target),
                    ScoreCell {
                        count: c.count,
                        score_sum: c.score_sum,
                        score_min: c.score_min,
                        score_max: c.score_max,
                    },
                )
            })
            .collect();
        Self {
            prediction_field: msg.prediction_field,
            target_field: msg.target_field,
            score_field: msg.score_field,
            cells,
        }
    }
}

fn field<'a>(record: &'a Record, name: &str) -> ProfileResult<&'a Value> {
    record
        .get(name)
        .ok_or_else(|| ProfileError::missing_field(name))
}

pub(super) fn check_field(role: &'static str, expected: &str, found: &str) -> ProfileResult<()> {
    if expected != found {
        return Err(ProfileError::ModelFieldMismatch {
            role,
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

/// One cell of the confusion matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionCell {
    pub prediction: String,
    pub target: String,
    pub count: u64,
    pub mean_score: f64,
    pub min_score: f64,
    pub max_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub prediction_field: String,
    pub target_field: String,
    pub score_field: Option<String>,
    pub labels: Vec<String>,
    pub count: u64,
    pub accuracy: Option<f64>,
    pub cells: Vec<ConfusionCell>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> ClassificationMetrics {
        ClassificationMetrics::new("pred", "target", Some("score".to_string()))
    }

    #[test]
    fn test_track_and_summary() {
        let mut m = metrics();
        m.track(&Record::new().with("pred", 1).with("target", 1).with("score", 0.5))
            .unwrap();
        m.track(&Record::new().with("pred", 1).with("target", 0).with("score", 0.7))
            .unwrap();

        assert_eq!(m.count(), 2);
        assert_eq!(m.cell_count("1", "1"), 1);
        assert_eq!(m.cell_count("1", "0"), 1);

        let summary = m.summary();
        assert_eq!(summary.labels, vec!["0".to_string(), "1".to_string()]);
        assert_eq!(summary.accuracy, Some(0.5));
    }

    #[test]
    fn test_default_score_without_score_field() {
        let mut m = ClassificationMetrics::new("pred", "target", None);
        m.track(&Record::new().with("pred", "cat").with("target", "cat"))
            .unwrap();
        let cell = &m.summary().cells[0];
        assert_eq!(cell.mean_score, DEFAULT_SCORE);
    }

    #[test]
    fn test_missing_field_is_reported() {
        let mut m = metrics();
        let err = m
            .track(&Record::new().with("pred", 1).with("score", 0.5))
            .unwrap_err();
        assert!(matches!(err, ProfileError::MissingField { field } if field == "target"));
    }

    #[test]
    fn test_null_output_is_skipped() {
        let mut m = metrics();
        m.track(
            &Record::new()
                .with("pred", Value::Null)
                .with("target", 1)
                .with("score", 0.1),
        )
        .unwrap();
        assert_eq!(m.count(), 0);
    }

    #[test]
    fn test_merge_sums_cells() {
        let mut a = metrics();
        a.track(&Record::new().with("pred", 1).with("target", 1).with("score", 0.2))
            .unwrap();
        let mut b = metrics();
        b.track(&Record::new().with("pred", 1).with("target", 1).with("score", 0.8))
            .unwrap();

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.cell_count("1", "1"), 2);
        let cell = &merged.summary().cells[0];
        assert!((cell.mean_score - 0.5).abs() < 1e-9);
        assert_eq!(cell.min_score, 0.2);
        assert_eq!(cell.max_score, 0.8);
    }

    #[test]
    fn test_merge_rejects_different_fields() {
        let other = ClassificationMetrics::new("other_pred", "target", Some("score".to_string()));
        assert!(matches!(
            metrics().merge(&other),
            Err(ProfileError::ModelFieldMismatch { role: "prediction", .. })
        ));
    }
}
