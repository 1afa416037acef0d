//! Protobuf messages for the profile wire format.
//!
//! These are hand-declared `prost` messages; field tags are part of the
//! on-disk format and must never be reused.

use std::collections::BTreeMap;

/// Dataset-level properties shared by the single-message and chunked forms.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DatasetProperties {
    #[prost(uint32, tag = "1")]
    pub schema_major_version: u32,
    #[prost(uint32, tag = "2")]
    pub schema_minor_version: u32,
    #[prost(string, tag = "3")]
    pub session_id: String,
    /// Epoch milliseconds.
    #[prost(int64, tag = "4")]
    pub session_timestamp: i64,
    /// Epoch milliseconds, or `-1` when the profile is not scoped to a data time.
    #[prost(int64, tag = "5")]
    pub data_timestamp: i64,
    #[prost(btree_map = "string, string", tag = "6")]
    pub tags: BTreeMap<String, String>,
    #[prost(btree_map = "string, string", tag = "7")]
    pub metadata: BTreeMap<String, String>,
}

/// A whole profile in one message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DatasetProfileMessage {
    #[prost(message, optional, tag = "1")]
    pub properties: Option<DatasetProperties>,
    /// Column name to serialized column accumulator.
    #[prost(btree_map = "string, bytes", tag = "2")]
    pub columns: BTreeMap<String, Vec<u8>>,
    #[prost(message, optional, tag = "3")]
    pub model_profile: Option<ModelMetricsMessage>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum WireModelType {
    Unknown = 0,
    Classification = 1,
    Regression = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ModelMetricsMessage {
    #[prost(enumeration = "WireModelType", tag = "1")]
    pub model_type: i32,
    #[prost(oneof = "ModelPayload", tags = "2, 3")]
    pub payload: Option<ModelPayload>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum ModelPayload {
    #[prost(message, tag = "2")]
    Classification(ScoreMatrixMessage),
    #[prost(message, tag = "3")]
    Regression(RegressionMetricsMessage),
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ScoreMatrixMessage {
    #[prost(string, tag = "1")]
    pub prediction_field: String,
    #[prost(string, tag = "2")]
    pub target_field: String,
    #[prost(string, optional, tag = "3")]
    pub score_field: Option<String>,
    #[prost(message, repeated, tag = "4")]
    pub cells: Vec<ScoreCellMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ScoreCellMessage {
    #[prost(string, tag = "1")]
    pub prediction: String,
    #[prost(string, tag = "2")]
    pub target: String,
    #[prost(uint64, tag = "3")]
    pub count: u64,
    #[prost(double, tag = "4")]
    pub score_sum: f64,
    #[prost(double, tag = "5")]
    pub score_min: f64,
    #[prost(double, tag = "6")]
    pub score_max: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegressionMetricsMessage {
    #[prost(string, tag = "1")]
    pub prediction_field: String,
    #[prost(string, tag = "2")]
    pub target_field: String,
    #[prost(uint64, tag = "3")]
    pub count: u64,
    #[prost(double, tag = "4")]
    pub sum_diff: f64,
    #[prost(double, tag = "5")]
    pub sum_abs_diff: f64,
    #[prost(double, tag = "6")]
    pub sum2_diff: f64,
}

/// Serialized form of the default column accumulator.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ColumnMessage {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint64, tag = "2")]
    pub count: u64,
    #[prost(uint64, tag = "3")]
    pub null_count: u64,
    #[prost(uint64, tag = "4")]
    pub true_count: u64,
    /// Inferred type discriminant to number of observations.
    #[prost(btree_map = "int32, uint64", tag = "5")]
    pub type_counts: BTreeMap<i32, u64>,
    #[prost(message, optional, tag = "6")]
    pub numbers: Option<NumberMessage>,
    #[prost(message, optional, tag = "7")]
    pub strings: Option<StringMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NumberMessage {
    #[prost(uint64, tag = "1")]
    pub count: u64,
    #[prost(double, tag = "2")]
    pub mean: f64,
    #[prost(double, tag = "3")]
    pub m2: f64,
    #[prost(double, tag = "4")]
    pub min: f64,
    #[prost(double, tag = "5")]
    pub max: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StringMessage {
    #[prost(uint64, tag = "1")]
    pub count: u64,
    #[prost(uint64, tag = "2")]
    pub min_length: u64,
    #[prost(uint64, tag = "3")]
    pub max_length: u64,
    #[prost(uint64, tag = "4")]
    pub total_length: u64,
}

/// Metadata segment of the chunked form; always the first frame for a marker.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DatasetMetadataSegment {
    #[prost(message, optional, tag = "1")]
    pub properties: Option<DatasetProperties>,
    #[prost(message, optional, tag = "2")]
    pub model_profile: Option<ModelMetricsMessage>,
}

/// A bounded batch of serialized columns.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ColumnsChunkSegment {
    #[prost(btree_map = "string, bytes", tag = "1")]
    pub columns: BTreeMap<String, Vec<u8>>,
}

/// One frame of the chunked stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MessageSegment {
    #[prost(string, tag = "1")]
    pub marker: String,
    #[prost(oneof = "Segment", tags = "2, 3")]
    pub segment: Option<Segment>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Segment {
    #[prost(message, tag = "2")]
    Metadata(DatasetMetadataSegment),
    #[prost(message, tag = "3")]
    Columns(ColumnsChunkSegment),
}
