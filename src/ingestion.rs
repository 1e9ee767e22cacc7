//! Ingestion engine
//!
//! Turns one completed storage operation into a set of counter and
//! time-series mutations, applied through atomic store batches:
//!
//! - Scope-level counters (storage bytes, object count) move by the
//!   action's delta rule
//! - A gauge-snapshot sorted set mirrors each counter at 15-minute
//!   granularity
//! - Per-bucket accumulators collect transferred bytes and one occurrence
//!   count per action
//!
//! Counter-changing actions use a two-phase write: phase 1 applies the
//! arithmetic mutations in one atomic batch and collects each counter's
//! post-mutation value; phase 2 replaces the gauge-snapshot entry for the
//! current bucket with that value. A failed phase-1 sub-command only skips
//! its own snapshot; independent sub-metrics in the same event still
//! proceed.
//!
//! An engine constructed without a store accepts every call as a no-op, so
//! metrics recording can never block or fail the operation it instruments.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use utrack::ingestion::IngestionEngine;
//! use utrack::store::MemoryStore;
//! use utrack::types::{Action, MetricEvent, Scope};
//!
//! # async fn example() -> Result<(), utrack::Error> {
//! let engine = IngestionEngine::new(Arc::new(MemoryStore::new()));
//! let event = MetricEvent::for_scope(Scope::bucket("demo"));
//! engine.push_metric(Action::CreateBucket, &event).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::error::{Result, StoreError};
use crate::schema::{self, CounterMetric};
use crate::store::{BatchResults, MetricStore, StoreCommand};
use crate::types::{
    normalized_timestamp, now_ms, Action, MetricEvent, MetricFields, PriorSize, Scope,
};

/// How an action moves the per-scope metrics
enum DeltaRule {
    /// Reset both counters and their gauges to zero (bucket creation)
    ResetCounters,
    /// Record an occurrence only
    Occurrence,
    /// Storage bytes grow by the part size; bytes count as incoming
    UploadPart,
    /// Object count grows by one (assembled upload)
    CompleteUpload,
    /// Object write: storage moves by the size delta, object count grows
    /// only for new objects
    Write {
        /// Whether the written bytes count toward the incoming accumulator
        accumulate_incoming: bool,
    },
    /// Object removal: both counters shrink
    Delete,
    /// Object read: bytes count as outgoing
    Read,
}

fn delta_rule(action: Action) -> DeltaRule {
    match action {
        Action::CreateBucket => DeltaRule::ResetCounters,
        Action::UploadPart => DeltaRule::UploadPart,
        Action::CompleteMultipartUpload => DeltaRule::CompleteUpload,
        Action::PutObject => DeltaRule::Write {
            accumulate_incoming: true,
        },
        Action::CopyObject => DeltaRule::Write {
            accumulate_incoming: false,
        },
        Action::DeleteObject | Action::MultiObjectDelete => DeltaRule::Delete,
        Action::GetObject => DeltaRule::Read,
        _ => DeltaRule::Occurrence,
    }
}

/// Records operation events against an injected [`MetricStore`]
pub struct IngestionEngine {
    store: Option<Arc<dyn MetricStore>>,
}

impl IngestionEngine {
    /// Create an engine recording into the given store
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Create an engine that accepts every call as an immediate no-op
    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// Whether the engine has a store to record into
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Record one operation event at the current wall-clock time
    ///
    /// Validation happens before any store access; a validation error
    /// leaves no partial state behind. The caller may discard the returned
    /// result: the mutations are attempted either way.
    pub async fn push_metric(&self, action: Action, event: &MetricEvent) -> Result<()> {
        self.push_metric_at(action, event, now_ms()).await
    }

    /// Record one operation event against an explicit event time
    ///
    /// The timestamp is normalized to its 15-minute bucket once and shared
    /// by every key the event touches. Used for replaying buffered events;
    /// `push_metric` delegates here.
    pub async fn push_metric_at(
        &self,
        action: Action,
        event: &MetricEvent,
        timestamp_ms: i64,
    ) -> Result<()> {
        let Some(store) = &self.store else {
            trace!(action = %action, "metrics disabled, dropping event");
            return Ok(());
        };

        event.validate(action)?;
        let timestamp = normalized_timestamp(timestamp_ms);
        debug!(
            action = %action,
            timestamp,
            scopes = event.scopes.len(),
            request_id = event.request_id.as_deref().unwrap_or(""),
            "pushing metric"
        );

        for scope in &event.scopes {
            self.apply(store.as_ref(), action, scope, &event.fields, timestamp)
                .await?;
        }
        Ok(())
    }

    async fn apply(
        &self,
        store: &dyn MetricStore,
        action: Action,
        scope: &Scope,
        fields: &MetricFields,
        timestamp: i64,
    ) -> Result<()> {
        match delta_rule(action) {
            DeltaRule::Occurrence => {
                store
                    .increment(&schema::action_key(scope, action, timestamp))
                    .await
                    .map_err(|e| log_store_error(action, scope, e))?;
                Ok(())
            }

            DeltaRule::ResetCounters => {
                // One batch: zero both counters regardless of leftover
                // state, restart both gauge series at zero, count the
                // occurrence
                let mut commands = vec![
                    StoreCommand::Set {
                        key: schema::counter_key(scope, CounterMetric::StorageUtilized),
                        value: 0,
                    },
                    StoreCommand::Set {
                        key: schema::counter_key(scope, CounterMetric::NumberOfObjects),
                        value: 0,
                    },
                    StoreCommand::Increment {
                        key: schema::action_key(scope, action, timestamp),
                    },
                ];
                for metric in CounterMetric::ALL {
                    commands.extend(snapshot_commands(
                        schema::gauge_key(scope, *metric),
                        timestamp,
                        0,
                    ));
                }
                let results = store
                    .execute_atomic_batch(commands)
                    .await
                    .map_err(|e| log_store_error(action, scope, e))?;
                log_sub_errors(action, scope, &results);
                Ok(())
            }

            DeltaRule::UploadPart => {
                let size = fields.new_byte_length.unwrap_or(0);
                let results = store
                    .execute_atomic_batch(vec![
                        StoreCommand::IncrementBy {
                            key: schema::counter_key(scope, CounterMetric::StorageUtilized),
                            delta: size,
                        },
                        StoreCommand::IncrementBy {
                            key: schema::incoming_bytes_key(scope, timestamp),
                            delta: size,
                        },
                        StoreCommand::Increment {
                            key: schema::action_key(scope, action, timestamp),
                        },
                    ])
                    .await
                    .map_err(|e| log_store_error(action, scope, e))?;
                self.write_snapshots(
                    store,
                    action,
                    scope,
                    timestamp,
                    &results,
                    &[(0, CounterMetric::StorageUtilized)],
                )
                .await
            }

            DeltaRule::CompleteUpload => {
                let results = store
                    .execute_atomic_batch(vec![
                        StoreCommand::Increment {
                            key: schema::counter_key(scope, CounterMetric::NumberOfObjects),
                        },
                        StoreCommand::Increment {
                            key: schema::action_key(scope, action, timestamp),
                        },
                    ])
                    .await
                    .map_err(|e| log_store_error(action, scope, e))?;
                self.write_snapshots(
                    store,
                    action,
                    scope,
                    timestamp,
                    &results,
                    &[(0, CounterMetric::NumberOfObjects)],
                )
                .await
            }

            DeltaRule::Write {
                accumulate_incoming,
            } => {
                let new_size = fields.new_byte_length.unwrap_or(0);
                let prior = fields.old_byte_length.unwrap_or(PriorSize::Absent);
                let mut commands = vec![
                    StoreCommand::IncrementBy {
                        key: schema::counter_key(scope, CounterMetric::StorageUtilized),
                        delta: new_size - prior.bytes(),
                    },
                    // A new object grows the count; an overwrite only
                    // re-reads the current value for the snapshot
                    if prior.is_absent() {
                        StoreCommand::Increment {
                            key: schema::counter_key(scope, CounterMetric::NumberOfObjects),
                        }
                    } else {
                        StoreCommand::Get {
                            key: schema::counter_key(scope, CounterMetric::NumberOfObjects),
                        }
                    },
                ];
                if accumulate_incoming {
                    commands.push(StoreCommand::IncrementBy {
                        key: schema::incoming_bytes_key(scope, timestamp),
                        delta: new_size,
                    });
                }
                commands.push(StoreCommand::Increment {
                    key: schema::action_key(scope, action, timestamp),
                });

                let results = store
                    .execute_atomic_batch(commands)
                    .await
                    .map_err(|e| log_store_error(action, scope, e))?;
                self.write_snapshots(
                    store,
                    action,
                    scope,
                    timestamp,
                    &results,
                    &[
                        (0, CounterMetric::StorageUtilized),
                        (1, CounterMetric::NumberOfObjects),
                    ],
                )
                .await
            }

            DeltaRule::Delete => {
                let bytes = fields.byte_length.unwrap_or(0);
                let objects = fields.number_of_objects.unwrap_or(0);
                let results = store
                    .execute_atomic_batch(vec![
                        StoreCommand::DecrementBy {
                            key: schema::counter_key(scope, CounterMetric::StorageUtilized),
                            delta: bytes,
                        },
                        StoreCommand::DecrementBy {
                            key: schema::counter_key(scope, CounterMetric::NumberOfObjects),
                            delta: objects,
                        },
                        StoreCommand::Increment {
                            key: schema::action_key(scope, action, timestamp),
                        },
                    ])
                    .await
                    .map_err(|e| log_store_error(action, scope, e))?;
                self.write_snapshots(
                    store,
                    action,
                    scope,
                    timestamp,
                    &results,
                    &[
                        (0, CounterMetric::StorageUtilized),
                        (1, CounterMetric::NumberOfObjects),
                    ],
                )
                .await
            }

            DeltaRule::Read => {
                let size = fields.new_byte_length.unwrap_or(0);
                let results = store
                    .execute_atomic_batch(vec![
                        StoreCommand::IncrementBy {
                            key: schema::outgoing_bytes_key(scope, timestamp),
                            delta: size,
                        },
                        StoreCommand::Increment {
                            key: schema::action_key(scope, action, timestamp),
                        },
                    ])
                    .await
                    .map_err(|e| log_store_error(action, scope, e))?;
                log_sub_errors(action, scope, &results);
                Ok(())
            }
        }
    }

    /// Phase 2: overwrite the gauge-snapshot entry at the current bucket
    /// for every counter whose phase-1 mutation succeeded
    ///
    /// `tracked` pairs a phase-1 result index with the counter metric it
    /// moved. Failed sub-commands are skipped (their snapshot stays stale
    /// until the next push into this bucket); the rest proceed in one
    /// atomic batch.
    async fn write_snapshots(
        &self,
        store: &dyn MetricStore,
        action: Action,
        scope: &Scope,
        timestamp: i64,
        results: &BatchResults,
        tracked: &[(usize, CounterMetric)],
    ) -> Result<()> {
        let mut commands = Vec::with_capacity(tracked.len() * 2);
        for (index, metric) in tracked {
            match results.get(*index) {
                Some(Ok(reply)) => {
                    commands.extend(snapshot_commands(
                        schema::gauge_key(scope, *metric),
                        timestamp,
                        reply.as_int(),
                    ));
                }
                Some(Err(e)) => {
                    warn!(
                        action = %action,
                        scope = %scope,
                        metric = metric.name(),
                        error = %e,
                        "counter update failed, skipping gauge snapshot"
                    );
                }
                None => {
                    warn!(
                        action = %action,
                        scope = %scope,
                        metric = metric.name(),
                        "missing batch result, skipping gauge snapshot"
                    );
                }
            }
        }
        if commands.is_empty() {
            return Ok(());
        }
        let results = store
            .execute_atomic_batch(commands)
            .await
            .map_err(|e| log_store_error(action, scope, e))?;
        log_sub_errors(action, scope, &results);
        Ok(())
    }
}

/// Remove any existing snapshot at this bucket, then insert the new value
///
/// The stored value is clamped to zero: the gauge never reports a negative
/// count even when the arithmetic counter has gone under.
fn snapshot_commands(gauge_key: String, timestamp: i64, value: i64) -> [StoreCommand; 2] {
    [
        StoreCommand::SortedSetRemoveRange {
            key: gauge_key.clone(),
            min: timestamp,
            max: timestamp,
        },
        StoreCommand::SortedSetAdd {
            key: gauge_key,
            score: timestamp,
            value: value.max(0),
        },
    ]
}

fn log_store_error(action: Action, scope: &Scope, error: StoreError) -> crate::error::Error {
    error!(
        action = %action,
        scope = %scope,
        error = %error,
        "store operation failed while pushing metric"
    );
    error.into()
}

fn log_sub_errors(action: Action, scope: &Scope, results: &BatchResults) {
    for result in results {
        if let Err(e) = result {
            warn!(
                action = %action,
                scope = %scope,
                error = %e,
                "batch sub-command failed"
            );
        }
    }
}
