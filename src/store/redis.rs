//! Redis metric store
//!
//! Implements [`MetricStore`] over a multiplexed asynchronous Redis
//! connection with:
//! - Configurable command and connection timeouts
//! - Exponential backoff retry with jitter
//! - Concurrency limiting through a semaphore
//! - Credential-sanitized error messages
//!
//! Atomic batches map to MULTI/EXEC pipelines, so a batch either applies
//! completely or is never observed by other readers.
//!
//! # Example
//!
//! ```rust,no_run
//! use utrack::store::{RedisConfig, RedisStore};
//!
//! # async fn example() -> Result<(), utrack::Error> {
//! let store = RedisStore::connect(RedisConfig::with_url("redis://127.0.0.1:6379")).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, warn};

use super::util::safe_driver_error;
use super::{BatchResults, CommandReply, MetricStore, StoreCommand};
use crate::error::StoreError;

/// Connection settings for the Redis metric store
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Redis server URL (e.g. "redis://localhost:6379")
    pub url: String,

    /// Maximum number of in-flight operations
    pub max_concurrency: u32,

    /// Timeout for establishing a connection
    pub connection_timeout: Duration,

    /// Timeout for an individual command or batch
    pub command_timeout: Duration,

    /// Retry policy for failed operations
    pub retry_policy: RetryPolicy,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_concurrency: 16,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl RedisConfig {
    /// Create a config with the given URL and default tuning
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Retry policy with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound for the backoff delay
    pub max_delay: Duration,

    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay for a given attempt number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let with_jitter = if self.jitter {
            capped * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            capped
        };
        Duration::from_millis(with_jitter as u64)
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Operation counters for the driver
#[derive(Debug, Default)]
pub struct DriverMetrics {
    commands_executed: AtomicU64,
    command_failures: AtomicU64,
    retries: AtomicU64,
    reconnects: AtomicU64,
}

impl DriverMetrics {
    /// Point-in-time snapshot of the counters
    pub fn snapshot(&self) -> DriverMetricsSnapshot {
        DriverMetricsSnapshot {
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            command_failures: self.command_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`DriverMetrics`]
#[derive(Debug, Clone, Copy)]
pub struct DriverMetricsSnapshot {
    /// Commands completed successfully
    pub commands_executed: u64,
    /// Commands that failed after retries
    pub command_failures: u64,
    /// Retry attempts made
    pub retries: u64,
    /// Connections (re-)established
    pub reconnects: u64,
}

/// Redis-backed [`MetricStore`]
pub struct RedisStore {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    config: RedisConfig,
    semaphore: Arc<Semaphore>,
    metrics: Arc<DriverMetrics>,
}

impl RedisStore {
    /// Connect to Redis and return a ready store
    pub async fn connect(config: RedisConfig) -> Result<Self, StoreError> {
        config.validate().map_err(StoreError::Connection)?;

        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Connection(safe_driver_error(&config.url, &e)))?;

        let store = Self {
            client,
            connection: RwLock::new(None),
            semaphore: Arc::new(Semaphore::new(config.max_concurrency as usize)),
            metrics: Arc::new(DriverMetrics::default()),
            config,
        };
        store.reconnect().await?;

        debug!(url = %super::util::sanitize_url(&store.config.url), "redis store connected");
        Ok(store)
    }

    /// Current operation counters
    pub fn metrics(&self) -> DriverMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The configuration the store was built with
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Check connectivity with a PING round trip
    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.execute(|mut conn| async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        let conn_future = self.client.get_multiplexed_async_connection();
        let conn = tokio::time::timeout(self.config.connection_timeout, conn_future)
            .await
            .map_err(|_| StoreError::Connection(format!(
                "connection attempt timed out after {:?}",
                self.config.connection_timeout
            )))?
            .map_err(|e| StoreError::Connection(safe_driver_error(&self.config.url, &e)))?;

        *self.connection.write().await = Some(conn);
        self.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn current_connection(&self) -> Result<MultiplexedConnection, StoreError> {
        if let Some(conn) = self.connection.read().await.clone() {
            return Ok(conn);
        }
        self.reconnect().await?;
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| StoreError::Connection("no connection available".to_string()))
    }

    /// Run a command closure with timeout and retry
    async fn execute<F, Fut, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Connection("store is shutting down".to_string()))?;

        let mut attempt = 0;
        loop {
            let conn = self.current_connection().await?;
            let result = tokio::time::timeout(self.config.command_timeout, f(conn)).await;

            match result {
                Ok(Ok(value)) => {
                    self.metrics.commands_executed.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    if self.config.retry_policy.should_retry(attempt) && is_retriable(&e) {
                        self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                        let delay = self.config.retry_policy.delay_for_attempt(attempt);
                        warn!(attempt = attempt + 1, ?delay, "redis command failed, retrying");
                        tokio::time::sleep(delay).await;
                        if e.is_connection_dropped() || e.is_io_error() {
                            let _ = self.reconnect().await;
                        }
                        attempt += 1;
                        continue;
                    }
                    self.metrics.command_failures.fetch_add(1, Ordering::Relaxed);
                    return Err(StoreError::Command(safe_driver_error(&self.config.url, &e)));
                }
                Err(_) => {
                    if self.config.retry_policy.should_retry(attempt) {
                        self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                        let delay = self.config.retry_policy.delay_for_attempt(attempt);
                        warn!(attempt = attempt + 1, ?delay, "redis command timed out, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    self.metrics.command_failures.fetch_add(1, Ordering::Relaxed);
                    return Err(StoreError::Command(format!(
                        "command timed out after {:?}",
                        self.config.command_timeout
                    )));
                }
            }
        }
    }
}

/// Append one batch command to a MULTI/EXEC pipeline
fn push_command(pipe: &mut redis::Pipeline, command: &StoreCommand) {
    match command {
        StoreCommand::Increment { key } => {
            pipe.incr(key, 1);
        }
        StoreCommand::IncrementBy { key, delta } => {
            pipe.incr(key, *delta);
        }
        StoreCommand::Decrement { key } => {
            pipe.decr(key, 1);
        }
        StoreCommand::DecrementBy { key, delta } => {
            pipe.decr(key, *delta);
        }
        StoreCommand::Get { key } => {
            pipe.get(key);
        }
        StoreCommand::Set { key, value } => {
            pipe.set(key, *value);
        }
        StoreCommand::SortedSetAdd { key, score, value } => {
            pipe.zadd(key, *value, *score);
        }
        StoreCommand::SortedSetRemoveRange { key, min, max } => {
            pipe.zrembyscore(key, *min, *max);
        }
    }
}

/// Decode one pipeline reply into the shape its command promises
fn decode_reply(command: &StoreCommand, value: redis::Value) -> Result<CommandReply, StoreError> {
    let unexpected = |e: RedisError| {
        StoreError::UnexpectedReply(format!("key {}: {}", command.key(), e.category()))
    };
    match command {
        StoreCommand::Increment { .. }
        | StoreCommand::IncrementBy { .. }
        | StoreCommand::Decrement { .. }
        | StoreCommand::DecrementBy { .. }
        | StoreCommand::SortedSetAdd { .. }
        | StoreCommand::SortedSetRemoveRange { .. } => redis::from_redis_value(&value)
            .map(CommandReply::Int)
            .map_err(unexpected),
        StoreCommand::Get { .. } => redis::from_redis_value(&value)
            .map(CommandReply::Value)
            .map_err(unexpected),
        StoreCommand::Set { .. } => Ok(CommandReply::Done),
    }
}

#[async_trait]
impl MetricStore for RedisStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let key = key.to_string();
        self.execute(move |mut conn| {
            let key = key.clone();
            async move { conn.incr(key, 1).await }
        })
        .await
    }

    async fn increment_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let key = key.to_string();
        self.execute(move |mut conn| {
            let key = key.clone();
            async move { conn.incr(key, delta).await }
        })
        .await
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        let key = key.to_string();
        self.execute(move |mut conn| {
            let key = key.clone();
            async move { conn.decr(key, 1).await }
        })
        .await
    }

    async fn decrement_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let key = key.to_string();
        self.execute(move |mut conn| {
            let key = key.clone();
            async move { conn.decr(key, delta).await }
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let key = key.to_string();
        self.execute(move |mut conn| {
            let key = key.clone();
            async move { conn.get(key).await }
        })
        .await
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        let key = key.to_string();
        self.execute(move |mut conn| {
            let key = key.clone();
            async move { conn.set(key, value).await }
        })
        .await
    }

    async fn sorted_set_add(&self, key: &str, score: i64, value: i64) -> Result<(), StoreError> {
        let key = key.to_string();
        self.execute(move |mut conn| {
            let key = key.clone();
            async move { conn.zadd::<_, _, _, ()>(key, value, score).await }
        })
        .await
    }

    async fn sorted_set_remove_by_score_range(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<(), StoreError> {
        let key = key.to_string();
        self.execute(move |mut conn| {
            let key = key.clone();
            async move { conn.zrembyscore::<_, _, _, ()>(key, min, max).await }
        })
        .await
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<(i64, i64)>, StoreError> {
        let key = key.to_string();
        let entries: Vec<(i64, i64)> = self
            .execute(move |mut conn| {
                let key = key.clone();
                async move { conn.zrangebyscore_withscores(key, min, max).await }
            })
            .await?;
        // The driver yields (value, score) pairs; callers expect score-first
        Ok(entries.into_iter().map(|(value, score)| (score, value)).collect())
    }

    async fn execute_atomic_batch(
        &self,
        commands: Vec<StoreCommand>,
    ) -> Result<BatchResults, StoreError> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &commands {
            push_command(&mut pipe, command);
        }

        let values: Vec<redis::Value> = self
            .execute(move |mut conn| {
                let pipe = pipe.clone();
                async move { pipe.query_async(&mut conn).await }
            })
            .await?;

        if values.len() != commands.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "batch of {} commands returned {} replies",
                commands.len(),
                values.len()
            )));
        }

        Ok(commands
            .iter()
            .zip(values)
            .map(|(command, value)| decode_reply(command, value))
            .collect())
    }
}

fn is_retriable(e: &RedisError) -> bool {
    e.is_connection_dropped()
        || e.is_timeout()
        || e.is_io_error()
        || matches!(e.kind(), redis::ErrorKind::BusyLoadingError)
}
