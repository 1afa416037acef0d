//! # term-profile - Mergeable dataset profiles for Rust
//!
//! term-profile computes statistical profiles of tabular data for ML
//! data-quality monitoring. A profile summarizes a dataset, or a partition of
//! one, as a collection of per-column accumulators plus session and grouping
//! metadata. Profiles merge, serialize to a versioned binary format, and can be
//! rebuilt and merged again anywhere.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use term_profile::prelude::*;
//!
//! # fn example() -> ProfileResult<()> {
//! let now = Utc::now();
//! let morning: DatasetProfile = DatasetProfile::new("orders", now);
//! morning.track_record(&Record::new().with("amount", 12.5).with("country", "FR"))?;
//!
//! let evening: DatasetProfile = DatasetProfile::new("orders", now);
//! evening.track_record(&Record::new().with("amount", 8.0).with("country", "DE"))?;
//!
//! let daily = morning.merge_strict(&evening)?;
//! assert_eq!(daily.column_count("amount"), Some(2));
//!
//! let bytes = daily.to_bytes()?;
//! let restored: DatasetProfile = DatasetProfile::from_bytes(&bytes)?;
//! assert_eq!(restored.column_count("country"), Some(2));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Modules
//!
//! - [`profile`]: the [`profile::DatasetProfile`] model and its merge algebra
//! - [`column`]: the column accumulator boundary and the default accumulator
//! - [`metrics`]: classification and regression model metrics
//! - [`wire`]: single-message and chunked binary forms
//! - [`fold`]: the zero/reduce/merge/finish contract for partitioned input
//! - [`sources`]: Arrow and DataFusion ingestion
//!
//! ## Merge laws
//!
//! For any profile `p`, merging with an empty profile returns `p`. Merging is
//! commutative and associative on column counts, so partial profiles built on
//! different workers can be combined in any order.
//!
//! ## Logging
//!
//! The crate emits `tracing` events and spans. See [`logging::setup`] to
//! install a subscriber.

pub mod column;
pub mod error;
pub mod fold;
pub mod logging;
pub mod metrics;
pub mod prelude;
pub mod profile;
pub mod record;
pub mod sources;
pub mod wire;
