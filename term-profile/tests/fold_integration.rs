//! End-to-end tests: DataFusion tables and in-memory records folded into
//! grouped profiles.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, TimeZone, Utc};
use datafusion::prelude::SessionContext;
use term_profile::fold::{GroupedFold, RunnerConfig, NAME_TAG};
use term_profile::logging::setup::{init_logging, LoggingConfig};
use term_profile::prelude::*;
use term_profile::sources::{profile_source, profile_table, MemorySource};
use term_profile::wire::SequentialGenerator;

type Profile = DatasetProfile<ColumnProfile>;

const DAY_MS: i64 = 86_400_000;
const START_MS: i64 = 1_718_236_800_000; // 2024-06-13T00:00:00Z

/// Predictions of a churn model over two countries and two days.
fn predictions_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("customer_id", DataType::Int64, false),
        Field::new("country", DataType::Utf8, false),
        Field::new(
            "scored_at",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("predicted", DataType::Utf8, true),
        Field::new("actual", DataType::Utf8, true),
        Field::new("confidence", DataType::Float64, true),
    ]));

    let rows = 40i64;
    let countries: Vec<&str> = (0..rows).map(|i| if i % 2 == 0 { "FR" } else { "US" }).collect();
    let days: Vec<i64> = (0..rows).map(|i| START_MS + (i % 4 / 2) * DAY_MS).collect();
    let predicted: Vec<Option<&str>> = (0..rows)
        .map(|i| Some(if i % 3 == 0 { "churn" } else { "stay" }))
        .collect();
    let actual: Vec<Option<&str>> = (0..rows)
        .map(|i| if i == 5 { None } else { Some(if i % 5 == 0 { "churn" } else { "stay" }) })
        .collect();
    let confidence: Vec<Option<f64>> = (0..rows).map(|i| Some(0.5 + (i % 5) as f64 / 10.0)).collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(0..rows)),
        Arc::new(StringArray::from(countries)),
        Arc::new(TimestampMillisecondArray::from(days)),
        Arc::new(StringArray::from(predicted)),
        Arc::new(StringArray::from(actual)),
        Arc::new(Float64Array::from(confidence)),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

/// Installs a subscriber once per test binary; later calls are no-ops.
fn init_test_logging() {
    let _ = init_logging(LoggingConfig::default().with_env_filter("warn,term_profile=debug"));
}

fn session_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap()
}

fn churn_config() -> FoldConfig {
    FoldConfig::new("churn")
        .with_session_time(session_time())
        .with_group_by(["country"])
        .with_time_column("scored_at")
        .with_classification("predicted", "actual", Some("confidence".to_string()))
}

// ============================================================================
// Table profiling
// ============================================================================

#[tokio::test]
async fn test_profile_table_by_country_and_day() {
    init_test_logging();
    let ctx = SessionContext::new();
    ctx.register_batch("predictions", predictions_batch()).unwrap();

    let outputs = profile_table(&ctx, "predictions", churn_config()).await.unwrap();
    assert_eq!(outputs.len(), 4);
    assert_eq!(outputs.iter().map(|o| o.records).sum::<usize>(), 40);

    let first_day = Utc.timestamp_millis_opt(START_MS).unwrap();
    for output in &outputs {
        let profile = Profile::from_bytes(&output.output).unwrap();
        assert_eq!(profile.session_id(), "churn");
        assert_eq!(profile.session_timestamp(), session_time());
        assert_eq!(profile.tags(), &output.key.tags);
        assert_eq!(profile.tags()[NAME_TAG], "churn");
        assert_eq!(profile.data_timestamp(), output.key.data_timestamp);
        assert!(profile.column("country").is_none());
        assert!(profile.column("scored_at").is_none());
        assert_eq!(profile.column_count("customer_id"), Some(output.records as u64));
        assert!(profile.model_metrics().is_some());
    }

    let fr_first_day = outputs
        .iter()
        .find(|o| o.key.tags["country"] == "FR" && o.key.data_timestamp == Some(first_day))
        .unwrap();
    assert_eq!(fr_first_day.key.tags["scored_at"], "2024-06-13T00:00:00.000Z");
    assert_eq!(fr_first_day.records, 10);
}

#[tokio::test]
async fn test_model_metrics_skip_null_targets() {
    let ctx = SessionContext::new();
    ctx.register_batch("predictions", predictions_batch()).unwrap();

    let outputs = profile_table(&ctx, "predictions", churn_config()).await.unwrap();
    let tracked: u64 = outputs
        .iter()
        .map(|o| {
            let profile = Profile::from_bytes(&o.output).unwrap();
            let model = profile.model_metrics().unwrap();
            model.as_classification().unwrap().count()
        })
        .sum();

    assert_eq!(tracked, 39);
}

#[tokio::test]
async fn test_partitioning_does_not_change_group_profiles() {
    let records = term_profile::sources::records_from_batch(&predictions_batch()).unwrap();
    let source = MemorySource::new("predictions", records);

    let serial = profile_source(&source, churn_config(), RunnerConfig::default().with_partitions(1))
        .await
        .unwrap();
    let parallel = profile_source(&source, churn_config(), RunnerConfig::default().with_partitions(8))
        .await
        .unwrap();

    assert_eq!(serial.len(), parallel.len());
    for (a, b) in serial.iter().zip(&parallel) {
        assert_eq!(a.key, b.key);
        let pa = Profile::from_bytes(&a.output).unwrap();
        let pb = Profile::from_bytes(&b.output).unwrap();
        for name in pa.column_names() {
            assert_eq!(pa.column_count(&name), pb.column_count(&name), "column {name}");
        }
        let ma = pa.model_metrics().unwrap();
        let mb = pb.model_metrics().unwrap();
        assert_eq!(
            ma.as_classification().unwrap().count(),
            mb.as_classification().unwrap().count()
        );
    }
}

#[tokio::test]
async fn test_config_from_json_drives_the_fold() {
    let json = r#"{
        "dataset_name": "churn",
        "session_time": "2024-06-20T12:00:00Z",
        "time_column": "scored_at",
        "group_by": ["country"],
        "model": {
            "type": "classification",
            "prediction": "predicted",
            "target": "actual",
            "score": "confidence"
        }
    }"#;
    let config = FoldConfig::from_json(json).unwrap();
    assert_eq!(config, churn_config());

    let ctx = SessionContext::new();
    ctx.register_batch("predictions", predictions_batch()).unwrap();
    let outputs = profile_table(&ctx, "predictions", config).await.unwrap();
    assert_eq!(outputs.len(), 4);
}

// ============================================================================
// Grouping violations
// ============================================================================

fn fold() -> ProfileFold {
    ProfileFold::with_id_generator(churn_config(), Arc::new(SequentialGenerator::new("acc"))).unwrap()
}

fn record(country: &str, day: i64) -> Record {
    Record::new()
        .with("customer_id", 1i64)
        .with("country", country)
        .with("scored_at", Utc.timestamp_millis_opt(START_MS + day * DAY_MS).unwrap())
        .with("predicted", "stay")
        .with("actual", "stay")
        .with("confidence", 0.7)
}

#[test]
fn test_reduce_rejects_record_from_another_day() {
    let fold = fold();
    let acc = fold.reduce(fold.zero(), &record("FR", 0)).unwrap();

    let err = fold.reduce(acc, &record("FR", 1)).unwrap_err();
    assert!(err.is_grouping_error());
    assert_eq!(
        err.to_string(),
        "Mismatched data timestamp. Current [2024-06-13T00:00:00.000Z] is merged with [2024-06-14T00:00:00.000Z]"
    );
}

#[test]
fn test_reduce_rejects_record_from_another_group() {
    init_test_logging();
    let fold = fold();
    let acc = fold.reduce(fold.zero(), &record("FR", 0)).unwrap();

    let err = fold.reduce(acc, &record("US", 0)).unwrap_err();
    match err {
        ProfileError::InconsistentGrouping { field, previous, current } => {
            assert_eq!(field, "tags");
            assert!(previous.contains("country=FR"));
            assert!(current.contains("country=US"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_strict_merge_of_finished_groups_fails() {
    let fold = fold();
    let fr = fold.reduce(fold.zero(), &record("FR", 0)).unwrap();
    let us = fold.reduce(fold.zero(), &record("US", 0)).unwrap();
    let fr = Profile::from_bytes(&fold.finish(fr).unwrap()).unwrap();
    let us = Profile::from_bytes(&fold.finish(us).unwrap()).unwrap();

    let err = fr.merge_strict(&us).unwrap_err();
    assert!(err.is_grouping_error());

    let lenient = fr.merge(&us).unwrap();
    assert_eq!(lenient.tags().get("country"), None);
    assert_eq!(lenient.tags()[NAME_TAG], "churn");
    assert_eq!(lenient.column_count("customer_id"), Some(2));
}

#[test]
fn test_group_key_reports_missing_time_column() {
    let fold = fold();
    let record = Record::new().with("country", "FR");

    let err = GroupedFold::group_key(&fold, &record).unwrap_err();
    assert!(matches!(err, ProfileError::MissingField { .. }));
}
