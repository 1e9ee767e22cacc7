//! Integration tests for the ingestion engine
//!
//! These tests drive full push flows against the in-process store and
//! validate the delta rules end to end:
//! - Bucket creation resets counters and gauges
//! - Object writes, overwrites, reads, and deletes move the right keys
//! - Gauge snapshots clamp at zero while raw counters may go negative
//! - Failed counter updates skip only their own snapshot

use std::sync::Arc;

use async_trait::async_trait;
use utrack::error::StoreError;
use utrack::ingestion::IngestionEngine;
use utrack::schema::{self, CounterMetric};
use utrack::store::{BatchResults, MemoryStore, MetricStore, StoreCommand};
use utrack::types::{Action, MetricEvent, PriorSize, Scope, BUCKET_INTERVAL_MS};

// ============================================================================
// Helper Functions
// ============================================================================

const T0: i64 = 1_888 * BUCKET_INTERVAL_MS;

fn engine_with_store() -> (IngestionEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (IngestionEngine::new(store.clone()), store)
}

fn bucket_event(name: &str) -> MetricEvent {
    MetricEvent::for_scope(Scope::bucket(name))
}

/// Read both authoritative counters; absent keys read as zero
async fn counters(store: &MemoryStore, scope: &Scope) -> (i64, i64) {
    let storage = store
        .get(&schema::counter_key(scope, CounterMetric::StorageUtilized))
        .await
        .unwrap()
        .unwrap_or(0);
    let objects = store
        .get(&schema::counter_key(scope, CounterMetric::NumberOfObjects))
        .await
        .unwrap()
        .unwrap_or(0);
    (storage, objects)
}

async fn gauge_entries(store: &MemoryStore, scope: &Scope, metric: CounterMetric) -> Vec<(i64, i64)> {
    store
        .sorted_set_range_by_score(&schema::gauge_key(scope, metric), i64::MIN, i64::MAX)
        .await
        .unwrap()
}

async fn push(engine: &IngestionEngine, action: Action, event: &MetricEvent, ts: i64) {
    engine.push_metric_at(action, event, ts).await.unwrap();
}

async fn put_object(
    engine: &IngestionEngine,
    name: &str,
    new_size: i64,
    old_size: PriorSize,
    ts: i64,
) {
    let mut event = bucket_event(name);
    event.fields.new_byte_length = Some(new_size);
    event.fields.old_byte_length = Some(old_size);
    push(engine, Action::PutObject, &event, ts).await;
}

async fn delete_object(engine: &IngestionEngine, name: &str, bytes: i64, count: i64, ts: i64) {
    let mut event = bucket_event(name);
    event.fields.byte_length = Some(bytes);
    event.fields.number_of_objects = Some(count);
    push(engine, Action::DeleteObject, &event, ts).await;
}

// ============================================================================
// Bucket lifecycle
// ============================================================================

#[tokio::test]
async fn test_create_bucket_resets_counters_and_gauges() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("fresh");

    push(&engine, Action::CreateBucket, &bucket_event("fresh"), T0).await;

    assert_eq!(counters(&store, &scope).await, (0, 0));
    assert_eq!(
        gauge_entries(&store, &scope, CounterMetric::StorageUtilized).await,
        vec![(T0, 0)]
    );
    assert_eq!(
        gauge_entries(&store, &scope, CounterMetric::NumberOfObjects).await,
        vec![(T0, 0)]
    );
    // The occurrence counter for the bucket landed too
    assert_eq!(
        store
            .get(&schema::action_key(&scope, Action::CreateBucket, T0))
            .await
            .unwrap(),
        Some(1)
    );
}

#[tokio::test]
async fn test_recreation_resets_rather_than_accumulates() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("cycle");

    // Full lifecycle: create, list, write, read, delete, drop, recreate
    push(&engine, Action::CreateBucket, &bucket_event("cycle"), T0).await;
    push(&engine, Action::ListBucket, &bucket_event("cycle"), T0).await;
    put_object(&engine, "cycle", 8, PriorSize::Absent, T0).await;

    let mut get = bucket_event("cycle");
    get.fields.new_byte_length = Some(8);
    push(&engine, Action::GetObject, &get, T0).await;

    delete_object(&engine, "cycle", 8, 1, T0).await;
    push(&engine, Action::DeleteBucket, &bucket_event("cycle"), T0).await;
    push(&engine, Action::CreateBucket, &bucket_event("cycle"), T0).await;

    assert_eq!(counters(&store, &scope).await, (0, 0));
}

#[tokio::test]
async fn test_create_bucket_discards_leftover_state() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("stale");

    // Leftover counters from a previous incarnation of the name
    store
        .set(&schema::counter_key(&scope, CounterMetric::StorageUtilized), 4096)
        .await
        .unwrap();
    store
        .set(&schema::counter_key(&scope, CounterMetric::NumberOfObjects), 7)
        .await
        .unwrap();

    push(&engine, Action::CreateBucket, &bucket_event("stale"), T0).await;
    assert_eq!(counters(&store, &scope).await, (0, 0));
}

// ============================================================================
// Object writes
// ============================================================================

#[tokio::test]
async fn test_put_new_object_grows_both_counters() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("demo");

    put_object(&engine, "demo", 1024, PriorSize::Absent, T0).await;

    assert_eq!(counters(&store, &scope).await, (1024, 1));
    assert_eq!(
        gauge_entries(&store, &scope, CounterMetric::StorageUtilized).await,
        vec![(T0, 1024)]
    );
    assert_eq!(
        gauge_entries(&store, &scope, CounterMetric::NumberOfObjects).await,
        vec![(T0, 1)]
    );
    // PutObject bytes count as incoming
    assert_eq!(
        store
            .get(&schema::incoming_bytes_key(&scope, T0))
            .await
            .unwrap(),
        Some(1024)
    );
}

#[tokio::test]
async fn test_overwrite_moves_bytes_by_delta_and_keeps_count() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("demo");

    put_object(&engine, "demo", 1024, PriorSize::Absent, T0).await;
    put_object(&engine, "demo", 2048, PriorSize::Bytes(1024), T0).await;

    assert_eq!(counters(&store, &scope).await, (2048, 1));
    assert_eq!(
        gauge_entries(&store, &scope, CounterMetric::NumberOfObjects).await,
        vec![(T0, 1)]
    );
}

#[tokio::test]
async fn test_shrinking_overwrite() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("demo");

    put_object(&engine, "demo", 4096, PriorSize::Absent, T0).await;
    put_object(&engine, "demo", 1024, PriorSize::Bytes(4096), T0).await;

    assert_eq!(counters(&store, &scope).await, (1024, 1));
}

#[tokio::test]
async fn test_copy_object_skips_incoming_bytes() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("demo");

    let mut event = bucket_event("demo");
    event.fields.new_byte_length = Some(512);
    event.fields.old_byte_length = Some(PriorSize::Absent);
    push(&engine, Action::CopyObject, &event, T0).await;

    assert_eq!(counters(&store, &scope).await, (512, 1));
    assert_eq!(
        store
            .get(&schema::incoming_bytes_key(&scope, T0))
            .await
            .unwrap(),
        None
    );
}

// ============================================================================
// Multipart uploads
// ============================================================================

#[tokio::test]
async fn test_upload_part_grows_storage_only() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("demo");

    let mut event = bucket_event("demo");
    event.fields.new_byte_length = Some(5 * 1024 * 1024);
    push(&engine, Action::UploadPart, &event, T0).await;

    assert_eq!(counters(&store, &scope).await, (5 * 1024 * 1024, 0));
    assert_eq!(
        store
            .get(&schema::incoming_bytes_key(&scope, T0))
            .await
            .unwrap(),
        Some(5 * 1024 * 1024)
    );
    // No object-count gauge write for a bare part
    assert!(gauge_entries(&store, &scope, CounterMetric::NumberOfObjects)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_complete_multipart_upload_grows_object_count() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("demo");

    let mut part = bucket_event("demo");
    part.fields.new_byte_length = Some(1024);
    push(&engine, Action::UploadPart, &part, T0).await;
    push(
        &engine,
        Action::CompleteMultipartUpload,
        &bucket_event("demo"),
        T0,
    )
    .await;

    assert_eq!(counters(&store, &scope).await, (1024, 1));
    assert_eq!(
        gauge_entries(&store, &scope, CounterMetric::NumberOfObjects).await,
        vec![(T0, 1)]
    );
}

// ============================================================================
// Deletes and clamping
// ============================================================================

#[tokio::test]
async fn test_delete_returns_counters_to_zero() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("demo");

    put_object(&engine, "demo", 1024, PriorSize::Absent, T0).await;
    delete_object(&engine, "demo", 1024, 1, T0).await;

    assert_eq!(counters(&store, &scope).await, (0, 0));
    assert_eq!(
        gauge_entries(&store, &scope, CounterMetric::StorageUtilized).await,
        vec![(T0, 0)]
    );
}

#[tokio::test]
async fn test_over_delete_clamps_gauge_but_not_counter() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("demo");

    put_object(&engine, "demo", 1024, PriorSize::Absent, T0).await;
    // Under-reported prior state: more bytes deleted than were recorded
    delete_object(&engine, "demo", 2048, 2, T0).await;

    // The raw counters go negative and stay negative
    assert_eq!(counters(&store, &scope).await, (-1024, -1));
    // The reported gauges clamp at zero
    assert_eq!(
        gauge_entries(&store, &scope, CounterMetric::StorageUtilized).await,
        vec![(T0, 0)]
    );
    assert_eq!(
        gauge_entries(&store, &scope, CounterMetric::NumberOfObjects).await,
        vec![(T0, 0)]
    );
}

// ============================================================================
// Occurrence counters
// ============================================================================

#[tokio::test]
async fn test_same_bucket_pushes_accumulate() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("demo");

    push(&engine, Action::HeadObject, &bucket_event("demo"), T0).await;
    push(&engine, Action::HeadObject, &bucket_event("demo"), T0 + 60_000).await;

    assert_eq!(
        store
            .get(&schema::action_key(&scope, Action::HeadObject, T0))
            .await
            .unwrap(),
        Some(2)
    );
}

#[tokio::test]
async fn test_next_bucket_pushes_split() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("demo");

    push(&engine, Action::HeadObject, &bucket_event("demo"), T0).await;
    push(
        &engine,
        Action::HeadObject,
        &bucket_event("demo"),
        T0 + BUCKET_INTERVAL_MS,
    )
    .await;

    assert_eq!(
        store
            .get(&schema::action_key(&scope, Action::HeadObject, T0))
            .await
            .unwrap(),
        Some(1)
    );
    assert_eq!(
        store
            .get(&schema::action_key(
                &scope,
                Action::HeadObject,
                T0 + BUCKET_INTERVAL_MS
            ))
            .await
            .unwrap(),
        Some(1)
    );
}

#[tokio::test]
async fn test_get_object_counts_outgoing_bytes() {
    let (engine, store) = engine_with_store();
    let scope = Scope::bucket("demo");

    let mut event = bucket_event("demo");
    event.fields.new_byte_length = Some(9000);
    push(&engine, Action::GetObject, &event, T0).await;
    push(&engine, Action::GetObject, &event, T0).await;

    assert_eq!(
        store
            .get(&schema::outgoing_bytes_key(&scope, T0))
            .await
            .unwrap(),
        Some(18000)
    );
    // Reads never move the storage counters
    assert_eq!(counters(&store, &scope).await, (0, 0));
}

// ============================================================================
// Multi-scope fan-out
// ============================================================================

#[tokio::test]
async fn test_event_records_once_per_scope() {
    let (engine, store) = engine_with_store();
    let bucket = Scope::bucket("demo");
    let account = Scope::account("123456789012");

    let mut event = MetricEvent::for_scope(bucket.clone()).with_scope(account.clone());
    event.fields.new_byte_length = Some(1024);
    event.fields.old_byte_length = Some(PriorSize::Absent);
    push(&engine, Action::PutObject, &event, T0).await;

    // Identical deltas landed independently under each scope
    assert_eq!(counters(&store, &bucket).await, (1024, 1));
    assert_eq!(counters(&store, &account).await, (1024, 1));
}

// ============================================================================
// Partial-write behavior
// ============================================================================

/// Store wrapper that fails every batch sub-command touching a matching key
struct FlakyStore {
    inner: MemoryStore,
    fail_key_containing: String,
}

#[async_trait]
impl MetricStore for FlakyStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.inner.increment(key).await
    }

    async fn increment_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.inner.increment_by(key, delta).await
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        self.inner.decrement(key).await
    }

    async fn decrement_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.inner.decrement_by(key, delta).await
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn sorted_set_add(&self, key: &str, score: i64, value: i64) -> Result<(), StoreError> {
        self.inner.sorted_set_add(key, score, value).await
    }

    async fn sorted_set_remove_by_score_range(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<(), StoreError> {
        self.inner
            .sorted_set_remove_by_score_range(key, min, max)
            .await
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<(i64, i64)>, StoreError> {
        self.inner.sorted_set_range_by_score(key, min, max).await
    }

    async fn execute_atomic_batch(
        &self,
        commands: Vec<StoreCommand>,
    ) -> Result<BatchResults, StoreError> {
        let mut results = self.inner.execute_atomic_batch(commands.clone()).await?;
        for (index, command) in commands.iter().enumerate() {
            if command.key().contains(&self.fail_key_containing) {
                results[index] = Err(StoreError::Command("injected failure".to_string()));
            }
        }
        Ok(results)
    }
}

#[tokio::test]
async fn test_failed_counter_skips_only_its_own_snapshot() {
    let scope = Scope::bucket("demo");
    let flaky = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        fail_key_containing: "storageUtilized:counter".to_string(),
    });
    let engine = IngestionEngine::new(flaky.clone());

    let mut event = bucket_event("demo");
    event.fields.new_byte_length = Some(1024);
    event.fields.old_byte_length = Some(PriorSize::Absent);
    // The push itself still completes
    engine
        .push_metric_at(Action::PutObject, &event, T0)
        .await
        .unwrap();

    // The storage gauge was skipped, the object-count gauge proceeded
    let storage_gauge = flaky
        .inner
        .sorted_set_range_by_score(
            &schema::gauge_key(&scope, CounterMetric::StorageUtilized),
            i64::MIN,
            i64::MAX,
        )
        .await
        .unwrap();
    assert!(storage_gauge.is_empty());

    let objects_gauge = flaky
        .inner
        .sorted_set_range_by_score(
            &schema::gauge_key(&scope, CounterMetric::NumberOfObjects),
            i64::MIN,
            i64::MAX,
        )
        .await
        .unwrap();
    assert_eq!(objects_gauge, vec![(T0, 1)]);
}
