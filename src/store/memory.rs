//! In-process metric store
//!
//! A [`MetricStore`] backed by process memory, mirroring the backend's
//! observable semantics: integer strings, sorted sets with member→score
//! mapping, wrong-type errors, and atomic batches. Used by the test suites
//! and as a dependency-free backend for embedded deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BatchResults, CommandReply, MetricStore, StoreCommand};
use crate::error::StoreError;

/// Sorted set: member value → score
type Zset = HashMap<i64, i64>;

#[derive(Default)]
struct Inner {
    strings: HashMap<String, i64>,
    zsets: HashMap<String, Zset>,
}

impl Inner {
    fn wrong_type(key: &str) -> StoreError {
        StoreError::Command(format!(
            "WRONGTYPE operation against key {} holding the wrong kind of value",
            key
        ))
    }

    fn add_to(&mut self, key: &str, delta: i64) -> Result<i64, StoreError> {
        if self.zsets.contains_key(key) {
            return Err(Self::wrong_type(key));
        }
        let slot = self.strings.entry(key.to_string()).or_insert(0);
        *slot = slot
            .checked_add(delta)
            .ok_or_else(|| StoreError::Command(format!("integer overflow on key {}", key)))?;
        Ok(*slot)
    }

    fn sub_from(&mut self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let negated = delta
            .checked_neg()
            .ok_or_else(|| StoreError::Command(format!("integer overflow on key {}", key)))?;
        self.add_to(key, negated)
    }

    fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        if self.zsets.contains_key(key) {
            return Err(Self::wrong_type(key));
        }
        Ok(self.strings.get(key).copied())
    }

    fn set(&mut self, key: &str, value: i64) -> Result<(), StoreError> {
        if self.zsets.contains_key(key) {
            return Err(Self::wrong_type(key));
        }
        self.strings.insert(key.to_string(), value);
        Ok(())
    }

    fn zadd(&mut self, key: &str, score: i64, value: i64) -> Result<i64, StoreError> {
        if self.strings.contains_key(key) {
            return Err(Self::wrong_type(key));
        }
        let zset = self.zsets.entry(key.to_string()).or_default();
        // Re-adding an existing member updates its score in place
        let added = if zset.insert(value, score).is_none() { 1 } else { 0 };
        Ok(added)
    }

    fn zremrangebyscore(&mut self, key: &str, min: i64, max: i64) -> Result<i64, StoreError> {
        if self.strings.contains_key(key) {
            return Err(Self::wrong_type(key));
        }
        let Some(zset) = self.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = zset.len();
        zset.retain(|_, score| *score < min || *score > max);
        Ok((before - zset.len()) as i64)
    }

    fn zrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<Vec<(i64, i64)>, StoreError> {
        if self.strings.contains_key(key) {
            return Err(Self::wrong_type(key));
        }
        let mut entries: Vec<(i64, i64)> = self
            .zsets
            .get(key)
            .map(|zset| {
                zset.iter()
                    .filter(|(_, score)| **score >= min && **score <= max)
                    .map(|(value, score)| (*score, *value))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_unstable();
        Ok(entries)
    }

    fn apply(&mut self, command: &StoreCommand) -> Result<CommandReply, StoreError> {
        match command {
            StoreCommand::Increment { key } => self.add_to(key, 1).map(CommandReply::Int),
            StoreCommand::IncrementBy { key, delta } => {
                self.add_to(key, *delta).map(CommandReply::Int)
            }
            StoreCommand::Decrement { key } => self.add_to(key, -1).map(CommandReply::Int),
            StoreCommand::DecrementBy { key, delta } => {
                self.sub_from(key, *delta).map(CommandReply::Int)
            }
            StoreCommand::Get { key } => self.get(key).map(CommandReply::Value),
            StoreCommand::Set { key, value } => self.set(key, *value).map(|_| CommandReply::Done),
            StoreCommand::SortedSetAdd { key, score, value } => {
                self.zadd(key, *score, *value).map(CommandReply::Int)
            }
            StoreCommand::SortedSetRemoveRange { key, min, max } => self
                .zremrangebyscore(key, *min, *max)
                .map(CommandReply::Int),
        }
    }
}

/// In-memory [`MetricStore`] implementation
///
/// # Example
///
/// ```rust
/// use utrack::store::{MemoryStore, MetricStore};
///
/// # async fn example() -> Result<(), utrack::Error> {
/// let store = MemoryStore::new();
/// assert_eq!(store.increment_by("k", 5).await?, 5);
/// assert_eq!(store.get("k").await?, Some(5));
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every key
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.strings.clear();
        inner.zsets.clear();
    }

    /// Number of keys currently held (both kinds)
    pub fn key_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.strings.len() + inner.zsets.len()
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.inner.lock().add_to(key, 1)
    }

    async fn increment_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.inner.lock().add_to(key, delta)
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        self.inner.lock().add_to(key, -1)
    }

    async fn decrement_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.inner.lock().sub_from(key, delta)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        self.inner.lock().get(key)
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.inner.lock().set(key, value)
    }

    async fn sorted_set_add(&self, key: &str, score: i64, value: i64) -> Result<(), StoreError> {
        self.inner.lock().zadd(key, score, value).map(|_| ())
    }

    async fn sorted_set_remove_by_score_range(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<(), StoreError> {
        self.inner.lock().zremrangebyscore(key, min, max).map(|_| ())
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<(i64, i64)>, StoreError> {
        self.inner.lock().zrangebyscore(key, min, max)
    }

    async fn execute_atomic_batch(
        &self,
        commands: Vec<StoreCommand>,
    ) -> Result<BatchResults, StoreError> {
        // One lock held across the whole batch keeps intermediate states
        // invisible to concurrent readers
        let mut inner = self.inner.lock();
        Ok(commands.iter().map(|cmd| inner.apply(cmd)).collect())
    }
}
