//! Default column accumulator.

use std::collections::BTreeMap;

use prost::Message;
use serde::{Deserialize, Serialize};

use super::ColumnAccumulator;
use crate::error::{ProfileError, ProfileResult};
use crate::record::Value;
use crate::wire::messages::{ColumnMessage, NumberMessage, StringMessage};

/// Kind of value observed in a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InferredType {
    Null = 1,
    Boolean = 2,
    Integral = 3,
    Fractional = 4,
    String = 5,
    Timestamp = 6,
}

impl InferredType {
    /// Classifies a value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Boolean(_) => Self::Boolean,
            Value::Integer(_) => Self::Integral,
            Value::Double(_) => Self::Fractional,
            Value::String(_) => Self::String,
            Value::Timestamp(_) => Self::Timestamp,
        }
    }

    fn from_wire(code: i32) -> ProfileResult<Self> {
        match code {
            1 => Ok(Self::Null),
            2 => Ok(Self::Boolean),
            3 => Ok(Self::Integral),
            4 => Ok(Self::Fractional),
            5 => Ok(Self::String),
            6 => Ok(Self::Timestamp),
            other => Err(ProfileError::wire(format!("Unknown inferred type code {other}"))),
        }
    }
}

/// Streaming numeric statistics (Welford), mergeable across partitions.
#[derive(Debug, Clone, PartialEq)]
struct NumberTracker {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for NumberTracker {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl NumberTracker {
    fn update(&mut self, x: f64) {
        if x.is_nan() {
            return;
        }
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    fn merge(&self, other: &Self) -> Self {
        if other.count == 0 {
            return self.clone();
        }
        if self.count == 0 {
            return other.clone();
        }
        let count = self.count + other.count;
        let delta = other.mean - self.mean;
        let mean = self.mean + delta * other.count as f64 / count as f64;
        let m2 = self.m2
            + other.m2
            + delta * delta * self.count as f64 * other.count as f64 / count as f64;
        Self {
            count,
            mean,
            m2,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    fn summary(&self) -> Option<NumberSummary> {
        if self.count == 0 {
            return None;
        }
        let stddev = if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        };
        Some(NumberSummary {
            count: self.count,
            mean: self.mean,
            stddev,
            min: self.min,
            max: self.max,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct StringTracker {
    count: u64,
    min_length: u64,
    max_length: u64,
    total_length: u64,
}

impl StringTracker {
    fn update(&mut self, s: &str) {
        let len = s.chars().count() as u64;
        self.min_length = if self.count == 0 {
            len
        } else {
            self.min_length.min(len)
        };
        self.max_length = self.max_length.max(len);
        self.total_length += len;
        self.count += 1;
    }

    fn merge(&self, other: &Self) -> Self {
        let min_length = match (self.count, other.count) {
            (0, _) => other.min_length,
            (_, 0) => self.min_length,
            _ => self.min_length.min(other.min_length),
        };
        Self {
            count: self.count + other.count,
            min_length,
            max_length: self.max_length.max(other.max_length),
            total_length: self.total_length + other.total_length,
        }
    }
}

/// Numeric part of a column summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberSummary {
    pub count: u64,
    pub mean: f64,
    /// Sample standard deviation.
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

/// String part of a column summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringSummary {
    pub count: u64,
    pub min_length: u64,
    pub max_length: u64,
    pub mean_length: f64,
}

/// Flat summary of a [`ColumnProfile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub column_name: String,
    pub count: u64,
    pub null_count: u64,
    pub true_count: u64,
    /// Most frequent non-null type, `None` when only nulls were seen.
    pub inferred_type: Option<InferredType>,
    pub type_counts: BTreeMap<InferredType, u64>,
    pub numbers: Option<NumberSummary>,
    pub strings: Option<StringSummary>,
}

/// Default accumulator: counters, type counts, numeric moments and string lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProfile {
    name: String,
    count: u64,
    null_count: u64,
    true_count: u64,
    type_counts: BTreeMap<InferredType, u64>,
    numbers: NumberTracker,
    strings: StringTracker,
}

impl ColumnProfile {
    pub fn null_count(&self) -> u64 {
        self.null_count
    }

    pub fn type_count(&self, inferred: InferredType) -> u64 {
        self.type_counts.get(&inferred).copied().unwrap_or(0)
    }

    fn to_message(&self) -> ColumnMessage {
        ColumnMessage {
            name: self.name.clone(),
            count: self.count,
            null_count: self.null_count,
            true_count: self.true_count,
            type_counts: self
                .type_counts
                .iter()
                .map(|(t, c)| (*t as i32, *c))
                .collect(),
            numbers: (self.numbers.count > 0).then(|| NumberMessage {
                count: self.numbers.count,
                mean: self.numbers.mean,
                m2: self.numbers.m2,
                min: self.numbers.min,
                max: self.numbers.max,
            }),
            strings: (self.strings.count > 0).then(|| StringMessage {
                count: self.strings.count,
                min_length: self.strings.min_length,
                max_length: self.strings.max_length,
                total_length: self.strings.total_length,
            }),
        }
    }

    fn from_message(msg: ColumnMessage) -> ProfileResult<Self> {
        let mut type_counts = BTreeMap::new();
        for (code, count) in msg.type_counts {
            type_counts.insert(InferredType::from_wire(code)?, count);
        }
        let numbers = msg
            .numbers
            .map(|n| NumberTracker {
                count: n.count,
                mean: n.mean,
                m2: n.m2,
                min: n.min,
                max: n.max,
            })
            .unwrap_or_default();
        let strings = msg
            .strings
            .map(|s| StringTracker {
                count: s.count,
                min_length: s.min_length,
                max_length: s.max_length,
                total_length: s.total_length,
            })
            .unwrap_or_default();

        Ok(Self {
            name: msg.name,
            count: msg.count,
            null_count: msg.null_count,
            true_count: msg.true_count,
            type_counts,
            numbers,
            strings,
        })
    }
}

impl ColumnAccumulator for ColumnProfile {
    type Summary = ColumnSummary;

    fn new(column_name: &str) -> Self {
        Self {
            name: column_name.to_string(),
            count: 0,
            null_count: 0,
            true_count: 0,
            type_counts: BTreeMap::new(),
            numbers: NumberTracker::default(),
            strings: StringTracker::default(),
        }
    }

    fn column_name(&self) -> &str {
        &self.name
    }

    fn track(&mut self, value: &Value) {
        self.count += 1;
        *self.type_counts.entry(InferredType::of(value)).or_insert(0) += 1;
        match value {
            Value::Null => self.null_count += 1,
            Value::Boolean(b) => {
                if *b {
                    self.true_count += 1;
                }
            }
            Value::Integer(v) => self.numbers.update(*v as f64),
            Value::Double(v) => self.numbers.update(*v),
            Value::String(s) => self.strings.update(s),
            Value::Timestamp(_) => {}
        }
    }

    fn merge(&self, other: &Self) -> ProfileResult<Self> {
        if self.name != other.name {
            return Err(ProfileError::ColumnMerge {
                column: self.name.clone(),
                message: format!("cannot merge with column '{}'", other.name),
            });
        }

        let mut type_counts = self.type_counts.clone();
        for (t, c) in &other.type_counts {
            *type_counts.entry(*t).or_insert(0) += c;
        }

        Ok(Self {
            name: self.name.clone(),
            count: self.count + other.count,
            null_count: self.null_count + other.null_count,
            true_count: self.true_count + other.true_count,
            type_counts,
            numbers: self.numbers.merge(&other.numbers),
            strings: self.strings.merge(&other.strings),
        })
    }

    fn to_summary(&self) -> ColumnSummary {
        let inferred_type = self
            .type_counts
            .iter()
            .filter(|(t, _)| **t != InferredType::Null)
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(t, _)| *t);

        ColumnSummary {
            column_name: self.name.clone(),
            count: self.count,
            null_count: self.null_count,
            true_count: self.true_count,
            inferred_type,
            type_counts: self.type_counts.clone(),
            numbers: self.numbers.summary(),
            strings: (self.strings.count > 0).then(|| StringSummary {
                count: self.strings.count,
                min_length: self.strings.min_length,
                max_length: self.strings.max_length,
                mean_length: self.strings.total_length as f64 / self.strings.count as f64,
            }),
        }
    }

    fn to_wire(&self) -> ProfileResult<Vec<u8>> {
        Ok(self.to_message().encode_to_vec())
    }

    fn from_wire(bytes: &[u8]) -> ProfileResult<Self> {
        Self::from_message(ColumnMessage::decode(bytes)?)
    }

    fn count(&self) -> u64 {
        self.count
    }
}
