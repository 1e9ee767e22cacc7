//! Metric store abstraction
//!
//! The engines only require a narrow interface from the key-value/sorted-set
//! backend: single-key arithmetic, plain get/set, sorted-set maintenance,
//! and an atomic multi-command batch. Two implementations are provided:
//!
//! - [`RedisStore`]: pooled Redis driver with retries and health checking
//! - [`MemoryStore`]: in-process backend for tests and embedded use
//!
//! Engines receive their store by explicit injection; there is no ambient
//! global client.

pub mod memory;
pub mod redis;
mod util;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisConfig, RedisStore, RetryPolicy};

use async_trait::async_trait;

use crate::error::StoreError;

/// One command inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// Increment an integer key by 1, returning the new value
    Increment {
        /// Target key
        key: String,
    },
    /// Increment an integer key by `delta`, returning the new value
    IncrementBy {
        /// Target key
        key: String,
        /// Amount to add
        delta: i64,
    },
    /// Decrement an integer key by 1, returning the new value
    Decrement {
        /// Target key
        key: String,
    },
    /// Decrement an integer key by `delta`, returning the new value
    DecrementBy {
        /// Target key
        key: String,
        /// Amount to subtract
        delta: i64,
    },
    /// Read an integer key
    Get {
        /// Target key
        key: String,
    },
    /// Overwrite an integer key
    Set {
        /// Target key
        key: String,
        /// Value to store
        value: i64,
    },
    /// Add an entry to a sorted set
    SortedSetAdd {
        /// Target sorted set
        key: String,
        /// Entry score
        score: i64,
        /// Entry value
        value: i64,
    },
    /// Remove every sorted-set entry with a score in `[min, max]`
    SortedSetRemoveRange {
        /// Target sorted set
        key: String,
        /// Minimum score (inclusive)
        min: i64,
        /// Maximum score (inclusive)
        max: i64,
    },
}

impl StoreCommand {
    /// The key the command operates on
    pub fn key(&self) -> &str {
        match self {
            StoreCommand::Increment { key }
            | StoreCommand::IncrementBy { key, .. }
            | StoreCommand::Decrement { key }
            | StoreCommand::DecrementBy { key, .. }
            | StoreCommand::Get { key }
            | StoreCommand::Set { key, .. }
            | StoreCommand::SortedSetAdd { key, .. }
            | StoreCommand::SortedSetRemoveRange { key, .. } => key,
        }
    }
}

/// Reply to one command inside an atomic batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandReply {
    /// Post-mutation value of an arithmetic command, or an entry count
    Int(i64),
    /// Value read by `Get`; `None` when the key is absent
    Value(Option<i64>),
    /// Acknowledgement with no value (`Set`)
    Done,
}

impl CommandReply {
    /// Interpret the reply as an integer, treating an absent value as 0
    pub fn as_int(&self) -> i64 {
        match self {
            CommandReply::Int(v) => *v,
            CommandReply::Value(v) => v.unwrap_or(0),
            CommandReply::Done => 0,
        }
    }
}

/// Per-command results of an atomic batch
///
/// The outer `Result` of [`MetricStore::execute_atomic_batch`] covers
/// transport-level failure; each inner entry carries the outcome of one
/// command, in submission order.
pub type BatchResults = Vec<Result<CommandReply, StoreError>>;

/// Narrow transactional interface required from the key-value/sorted-set
/// backend
///
/// Single-key mutations are atomic at the store. `execute_atomic_batch`
/// applies all commands atomically from an external reader's perspective.
#[async_trait]
pub trait MetricStore: Send + Sync + 'static {
    /// Increment an integer key by 1, returning the new value
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Increment an integer key by `delta`, returning the new value
    async fn increment_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Decrement an integer key by 1, returning the new value
    async fn decrement(&self, key: &str) -> Result<i64, StoreError>;

    /// Decrement an integer key by `delta`, returning the new value
    async fn decrement_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    /// Read an integer key; `None` when absent
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Overwrite an integer key
    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError>;

    /// Add an entry to a sorted set
    async fn sorted_set_add(&self, key: &str, score: i64, value: i64) -> Result<(), StoreError>;

    /// Remove every sorted-set entry with a score in `[min, max]`
    async fn sorted_set_remove_by_score_range(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<(), StoreError>;

    /// List sorted-set entries with scores in `[min, max]`, ordered by score
    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<(i64, i64)>, StoreError>;

    /// Apply a batch of commands atomically, returning one result per
    /// command in submission order
    async fn execute_atomic_batch(
        &self,
        commands: Vec<StoreCommand>,
    ) -> Result<BatchResults, StoreError>;
}
