//! utrack - usage tracking and reporting for multi-tenant object storage
//!
//! This library records per-operation usage metrics (object PUT/GET/DELETE,
//! bucket lifecycle, multipart-upload lifecycle) and reconstructs
//! point-in-time and range reports from the recorded data. It provides:
//!
//! - A stable key schema over a flat key-value/sorted-set store
//! - An ingestion engine turning operation events into atomic counter and
//!   time-series mutations, with per-action delta rules
//! - An aggregation engine answering "how much storage, bandwidth, and
//!   operation volume did scope X use between T1 and T2"
//! - Pluggable store backends: pooled Redis and in-process memory
//!
//! Gauges (storage bytes, object count) and accumulators (transferred
//! bytes, operation counts) share one flat keyspace; accumulators bucket at
//! 15-minute granularity, and gauge snapshots record each counter's value
//! per bucket for as-of queries.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use utrack::aggregation::AggregationEngine;
//! use utrack::ingestion::IngestionEngine;
//! use utrack::store::MemoryStore;
//! use utrack::types::{Action, MetricEvent, PriorSize, Scope, ScopeType, TimeRange};
//!
//! # async fn example() -> Result<(), utrack::Error> {
//! let store = Arc::new(MemoryStore::new());
//! let ingestion = IngestionEngine::new(store.clone());
//!
//! let mut event = MetricEvent::for_scope(Scope::bucket("demo"));
//! event.fields.new_byte_length = Some(2048);
//! event.fields.old_byte_length = Some(PriorSize::Absent);
//! ingestion.push_metric_at(Action::PutObject, &event, 900_000).await?;
//!
//! let aggregation = AggregationEngine::new(store);
//! let range = TimeRange::new(0, 1_800_000)?;
//! let reports = aggregation
//!     .get_metrics(ScopeType::Bucket, &["demo".to_string()], range)
//!     .await?;
//! assert_eq!(reports[0].storage_utilized[1], 2048);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregation;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod schema;
pub mod store;
pub mod types;

pub use aggregation::AggregationEngine;
pub use config::Config;
pub use error::{Error, Result, StoreError, ValidationError};
pub use ingestion::IngestionEngine;
pub use store::{MemoryStore, MetricStore, RedisStore};
pub use types::{Action, MetricEvent, Scope, ScopeReport, ScopeType, TimeRange};
