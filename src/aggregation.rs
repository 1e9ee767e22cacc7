//! Aggregation engine
//!
//! Reconstructs point-in-time and range reports from recorded metrics:
//!
//! - Gauge fields (storage bytes, object count) resolve each range boundary
//!   independently to the latest snapshot at or before it
//! - Accumulator fields (incoming/outgoing bytes, per-action occurrence
//!   counts) sum every 15-minute bucket inside the range
//!
//! Absence of data is never an error: a scope with no recorded activity
//! reports zeros everywhere. Only store failures propagate, and they fail
//! the whole report request; partial reports are not returned.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use utrack::aggregation::AggregationEngine;
//! use utrack::store::MemoryStore;
//! use utrack::types::{ScopeType, TimeRange};
//!
//! # async fn example() -> Result<(), utrack::Error> {
//! let engine = AggregationEngine::new(Arc::new(MemoryStore::new()));
//! let range = TimeRange::new(0, 3_600_000)?;
//! let reports = engine
//!     .get_metrics(ScopeType::Bucket, &["demo".to_string()], range)
//!     .await?;
//! assert_eq!(reports[0].storage_utilized, [0, 0]);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{Result, StoreError, ValidationError};
use crate::schema::{self, CounterMetric};
use crate::store::{MetricStore, StoreCommand};
use crate::types::{Action, Scope, ScopeReport, ScopeType, TimeRange};

/// Assembles usage reports from an injected [`MetricStore`]
pub struct AggregationEngine {
    store: Arc<dyn MetricStore>,
}

impl AggregationEngine {
    /// Create an engine reading from the given store
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    /// Build one report per scope id over the given time range
    ///
    /// Range boundaries are arbitrary timestamps. Reports for different
    /// scopes never share mutable state and are computed concurrently.
    pub async fn get_metrics(
        &self,
        scope_type: ScopeType,
        scope_ids: &[String],
        time_range: TimeRange,
    ) -> Result<Vec<ScopeReport>> {
        if time_range.start > time_range.end {
            return Err(ValidationError::InvalidTimeRange {
                start: time_range.start,
                end: time_range.end,
            }
            .into());
        }
        debug!(
            scope_type = %scope_type,
            scopes = scope_ids.len(),
            start = time_range.start,
            end = time_range.end,
            "assembling usage reports"
        );

        let reports = futures::future::try_join_all(scope_ids.iter().map(|id| {
            let scope = Scope::new(scope_type, id.clone());
            async move { self.scope_report(&scope, time_range).await }
        }))
        .await?;
        Ok(reports)
    }

    /// Build the report for a single scope
    pub async fn scope_report(&self, scope: &Scope, time_range: TimeRange) -> Result<ScopeReport> {
        let mut report = ScopeReport::empty(scope.id.clone(), time_range);

        for (metric, slot) in [
            (CounterMetric::StorageUtilized, &mut report.storage_utilized),
            (CounterMetric::NumberOfObjects, &mut report.number_of_objects),
        ] {
            *slot = [
                self.gauge_value_at(scope, metric, time_range.start).await?,
                self.gauge_value_at(scope, metric, time_range.end).await?,
            ];
        }

        self.sum_buckets(scope, time_range, &mut report).await?;
        Ok(report)
    }

    /// Latest gauge-snapshot value at or before `at`, zero when the series
    /// has no entry that old
    async fn gauge_value_at(
        &self,
        scope: &Scope,
        metric: CounterMetric,
        at: i64,
    ) -> Result<i64> {
        let entries = self
            .store
            .sorted_set_range_by_score(&schema::gauge_key(scope, metric), i64::MIN, at)
            .await
            .map_err(|e| log_read_error(scope, e))?;
        Ok(entries.last().map(|(_, value)| *value).unwrap_or(0))
    }

    /// Sum every accumulator bucket inside the range into the report
    ///
    /// All bucket keys are read in one atomic batch so the whole report
    /// reflects a single consistent view of the store.
    async fn sum_buckets(
        &self,
        scope: &Scope,
        time_range: TimeRange,
        report: &mut ScopeReport,
    ) -> Result<()> {
        let buckets = time_range.bucket_timestamps();
        if buckets.is_empty() {
            return Ok(());
        }

        // Per bucket: incoming bytes, outgoing bytes, then one occurrence
        // key per action
        let mut commands = Vec::with_capacity(buckets.len() * (2 + Action::ALL.len()));
        for &bucket in &buckets {
            commands.push(StoreCommand::Get {
                key: schema::incoming_bytes_key(scope, bucket),
            });
            commands.push(StoreCommand::Get {
                key: schema::outgoing_bytes_key(scope, bucket),
            });
            for action in Action::ALL {
                commands.push(StoreCommand::Get {
                    key: schema::action_key(scope, *action, bucket),
                });
            }
        }

        let results = self
            .store
            .execute_atomic_batch(commands.clone())
            .await
            .map_err(|e| log_read_error(scope, e))?;

        let stride = 2 + Action::ALL.len();
        for (index, (command, result)) in commands.iter().zip(results).enumerate() {
            let value = result.map_err(|e| log_read_error(scope, e))?.as_int();
            match index % stride {
                0 => report.incoming_bytes += value,
                1 => report.outgoing_bytes += value,
                _ => {
                    // Attribute occurrence counts by parsing the action back
                    // out of the key
                    if let Some(action) = schema::action_from_key(command.key(), &scope.id) {
                        *report
                            .operations
                            .entry(format!("s3:{}", action.name()))
                            .or_insert(0) += value;
                    }
                }
            }
        }
        Ok(())
    }
}

fn log_read_error(scope: &Scope, error: StoreError) -> crate::error::Error {
    error!(
        scope = %scope,
        error = %error,
        "store read failed while assembling report"
    );
    error.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_invalid_range_is_rejected() {
        let engine = AggregationEngine::new(Arc::new(MemoryStore::new()));
        let inverted = TimeRange {
            start: 2_000,
            end: 1_000,
        };
        assert!(engine
            .get_metrics(ScopeType::Bucket, &["demo".to_string()], inverted)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_no_ids_yields_no_reports() {
        let engine = AggregationEngine::new(Arc::new(MemoryStore::new()));
        let range = TimeRange::new(0, 1_000).unwrap();
        let reports = engine
            .get_metrics(ScopeType::Account, &[], range)
            .await
            .unwrap();
        assert!(reports.is_empty());
    }
}
