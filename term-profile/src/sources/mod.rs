//! Record sources for profiling.
//!
//! Arrow batches are converted to [`Record`]s column by column; any registered
//! DataFusion table can then be profiled with [`profile_table`].

use std::fmt;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Date64Array, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, Int8Array, LargeStringArray, StringArray,
    StringViewArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray, UInt16Array, UInt32Array, UInt64Array,
    UInt8Array,
};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datafusion::prelude::SessionContext;
use futures::StreamExt;
use tracing::{debug, instrument};

use crate::error::{ErrorContext, ProfileError, ProfileResult};
use crate::fold::{FoldConfig, GroupKey, GroupOutput, LocalFoldRunner, ProfileFold, RunnerConfig};
use crate::record::{Record, Value};

const SECONDS_PER_DAY: i64 = 86_400;

/// Finished group produced by [`profile_source`] or [`profile_table`].
pub type ProfileOutput = GroupOutput<GroupKey, Vec<u8>>;

/// A source of records to profile.
#[async_trait]
pub trait RecordSource: fmt::Debug + Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Loads every record of the source.
    async fn records(&self) -> ProfileResult<Vec<Record>>;
}

/// Records already held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    records: Vec<Record>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn records(&self) -> ProfileResult<Vec<Record>> {
        Ok(self.records.clone())
    }
}

/// A table registered with a DataFusion session.
#[derive(Clone)]
pub struct TableSource {
    ctx: SessionContext,
    table: String,
}

impl TableSource {
    pub fn new(ctx: SessionContext, table: impl Into<String>) -> Self {
        Self {
            ctx,
            table: table.into(),
        }
    }
}

impl fmt::Debug for TableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableSource")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RecordSource for TableSource {
    fn name(&self) -> &str {
        &self.table
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn records(&self) -> ProfileResult<Vec<Record>> {
        let df = self
            .ctx
            .table(self.table.as_str())
            .await
            .with_context(|| format!("Failed to open table '{}'", self.table))?;
        let mut stream = df.execute_stream().await?;
        let mut records = Vec::new();
        let mut batches = 0usize;
        while let Some(batch) = stream.next().await {
            records.extend(records_from_batch(&batch?)?);
            batches += 1;
        }
        debug!(batches, records = records.len(), "Collected table records");
        Ok(records)
    }
}

/// Loads a source and folds it into one serialized profile per group.
#[instrument(skip_all, fields(source = source.name(), dataset = %config.dataset_name))]
pub async fn profile_source(
    source: &dyn RecordSource,
    config: FoldConfig,
    runner: RunnerConfig,
) -> ProfileResult<Vec<ProfileOutput>> {
    let fold: ProfileFold = ProfileFold::new(config)?;
    let records = source.records().await?;
    LocalFoldRunner::with_config(fold, runner).run(records).await
}

/// Profiles a table registered with `ctx`.
pub async fn profile_table(
    ctx: &SessionContext,
    table: &str,
    config: FoldConfig,
) -> ProfileResult<Vec<ProfileOutput>> {
    let source = TableSource::new(ctx.clone(), table);
    profile_source(&source, config, RunnerConfig::default()).await
}

/// Converts every row of a batch into a record keyed by field name.
pub fn records_from_batch(batch: &RecordBatch) -> ProfileResult<Vec<Record>> {
    let schema = batch.schema();
    let columns = schema
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, array)| Ok((field.name().clone(), column_values(field.name(), array)?)))
        .collect::<ProfileResult<Vec<_>>>()?;

    Ok((0..batch.num_rows())
        .map(|row| {
            columns
                .iter()
                .map(|(name, values)| (name.clone(), values[row].clone()))
                .collect()
        })
        .collect())
}

macro_rules! collect_values {
    ($array:expr, $name:expr, $ty:ty, $convert:expr) => {{
        let typed = $array
            .as_any()
            .downcast_ref::<$ty>()
            .ok_or_else(|| downcast_error($name, stringify!($ty)))?;
        (0..typed.len())
            .map(|i| {
                if typed.is_null(i) {
                    Ok(Value::Null)
                } else {
                    $convert(typed.value(i))
                }
            })
            .collect::<ProfileResult<Vec<Value>>>()
    }};
}

fn column_values(name: &str, array: &ArrayRef) -> ProfileResult<Vec<Value>> {
    let int = |v: i64| -> ProfileResult<Value> { Ok(Value::Integer(v)) };
    let double = |v: f64| -> ProfileResult<Value> { Ok(Value::Double(v)) };
    let text = |v: &str| -> ProfileResult<Value> { Ok(Value::String(v.to_string())) };
    let instant = |ts: Option<DateTime<Utc>>| -> ProfileResult<Value> {
        ts.map(Value::Timestamp)
            .ok_or_else(|| ProfileError::invalid_value(name, "timestamp out of range"))
    };

    match array.data_type() {
        DataType::Null => Ok(vec![Value::Null; array.len()]),
        DataType::Boolean => collect_values!(array, name, BooleanArray, |v: bool| Ok(Value::Boolean(v))),
        DataType::Int8 => collect_values!(array, name, Int8Array, |v: i8| int(v.into())),
        DataType::Int16 => collect_values!(array, name, Int16Array, |v: i16| int(v.into())),
        DataType::Int32 => collect_values!(array, name, Int32Array, |v: i32| int(v.into())),
        DataType::Int64 => collect_values!(array, name, Int64Array, int),
        DataType::UInt8 => collect_values!(array, name, UInt8Array, |v: u8| int(v.into())),
        DataType::UInt16 => collect_values!(array, name, UInt16Array, |v: u16| int(v.into())),
        DataType::UInt32 => collect_values!(array, name, UInt32Array, |v: u32| int(v.into())),
        DataType::UInt64 => collect_values!(array, name, UInt64Array, |v: u64| {
            Ok(i64::try_from(v).map_or(Value::Double(v as f64), Value::Integer))
        }),
        DataType::Float32 => collect_values!(array, name, Float32Array, |v: f32| double(v.into())),
        DataType::Float64 => collect_values!(array, name, Float64Array, double),
        DataType::Utf8 => collect_values!(array, name, StringArray, text),
        DataType::LargeUtf8 => collect_values!(array, name, LargeStringArray, text),
        DataType::Utf8View => collect_values!(array, name, StringViewArray, text),
        DataType::Timestamp(TimeUnit::Second, _) => {
            collect_values!(array, name, TimestampSecondArray, |v: i64| instant(
                DateTime::from_timestamp(v, 0)
            ))
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            collect_values!(array, name, TimestampMillisecondArray, |v: i64| instant(
                DateTime::from_timestamp_millis(v)
            ))
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            collect_values!(array, name, TimestampMicrosecondArray, |v: i64| instant(
                DateTime::from_timestamp_micros(v)
            ))
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            collect_values!(array, name, TimestampNanosecondArray, |v: i64| instant(Some(
                DateTime::from_timestamp_nanos(v)
            )))
        }
        DataType::Date32 => collect_values!(array, name, Date32Array, |days: i32| instant(
            DateTime::from_timestamp(i64::from(days) * SECONDS_PER_DAY, 0)
        )),
        DataType::Date64 => collect_values!(array, name, Date64Array, |v: i64| instant(
            DateTime::from_timestamp_millis(v)
        )),
        other => {
            debug!(column = name, data_type = %other, "Profiling column through its display form");
            display_values(array)
        }
    }
}

/// Fallback for types without a native [`Value`]: the arrow display string.
fn display_values(array: &ArrayRef) -> ProfileResult<Vec<Value>> {
    let formatter = ArrayFormatter::try_new(array.as_ref(), &FormatOptions::default())?;
    Ok((0..array.len())
        .map(|i| {
            if array.is_null(i) {
                Value::Null
            } else {
                Value::String(formatter.value(i).to_string())
            }
        })
        .collect())
}

fn downcast_error(column: &str, expected: &str) -> ProfileError {
    ProfileError::Internal(format!(
        "Failed to downcast column '{column}' to {expected}"
    ))
}

/// Wraps a batch as a source, for callers that already hold arrow data.
pub fn batch_source(name: impl Into<String>, batch: &RecordBatch) -> ProfileResult<Arc<dyn RecordSource>> {
    Ok(Arc::new(MemorySource::new(name, records_from_batch(batch)?)))
}
