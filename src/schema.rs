//! Storage-backend key schema
//!
//! Pure string construction mapping a scope and a metric name to a stable
//! store key. No state, no I/O.
//!
//! ```text
//! Key layout:
//! s3:{level}:{id}:storageUtilized            → ZSET(timestamp → gauge value)
//! s3:{level}:{id}:storageUtilized:counter    → INT (authoritative counter)
//! s3:{level}:{id}:numberOfObjects            → ZSET(timestamp → gauge value)
//! s3:{level}:{id}:numberOfObjects:counter    → INT
//! s3:{level}:{ts}:{id}:{Action}              → INT (occurrences per bucket)
//! s3:{level}:{ts}:{id}:incomingBytes         → INT (bytes per bucket)
//! s3:{level}:{ts}:{id}:outgoingBytes         → INT (bytes per bucket)
//! ```
//!
//! `{level}` is the scope type's level segment (`buckets`, `accounts`,
//! `service`, `users`), `{id}` the scope id, and `{ts}` a normalized
//! 15-minute timestamp. Segments are joined with `:`; keys are recovered by
//! splitting on that delimiter, never by character offsets.

use crate::types::{Action, Scope};

/// Component prefix shared by every key
const COMPONENT: &str = "s3";

/// Key delimiter
const DELIMITER: char = ':';

/// The two counter-backed metrics tracked per scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMetric {
    /// Total bytes currently stored
    StorageUtilized,
    /// Number of objects currently stored
    NumberOfObjects,
}

impl CounterMetric {
    /// Both counter metrics, in a stable order
    pub const ALL: &'static [CounterMetric] =
        &[CounterMetric::StorageUtilized, CounterMetric::NumberOfObjects];

    /// The metric name segment used in keys
    pub fn name(&self) -> &'static str {
        match self {
            CounterMetric::StorageUtilized => "storageUtilized",
            CounterMetric::NumberOfObjects => "numberOfObjects",
        }
    }
}

fn scope_prefix(scope: &Scope) -> String {
    format!(
        "{}{}{}{}{}",
        COMPONENT,
        DELIMITER,
        scope.scope_type.level(),
        DELIMITER,
        scope.id
    )
}

fn bucketed_prefix(scope: &Scope, timestamp: i64) -> String {
    format!(
        "{}{}{}{}{}{}{}",
        COMPONENT,
        DELIMITER,
        scope.scope_type.level(),
        DELIMITER,
        timestamp,
        DELIMITER,
        scope.id
    )
}

/// Key of the gauge-snapshot sorted set for a counter metric
pub fn gauge_key(scope: &Scope, metric: CounterMetric) -> String {
    format!("{}{}{}", scope_prefix(scope), DELIMITER, metric.name())
}

/// Key of the authoritative arithmetic counter for a counter metric
pub fn counter_key(scope: &Scope, metric: CounterMetric) -> String {
    format!(
        "{}{}{}{}counter",
        scope_prefix(scope),
        DELIMITER,
        metric.name(),
        DELIMITER
    )
}

/// Key of an action's occurrence counter in one 15-minute bucket
pub fn action_key(scope: &Scope, action: Action, timestamp: i64) -> String {
    format!(
        "{}{}{}",
        bucketed_prefix(scope, timestamp),
        DELIMITER,
        action.name()
    )
}

/// Key of the incoming-bytes accumulator in one 15-minute bucket
pub fn incoming_bytes_key(scope: &Scope, timestamp: i64) -> String {
    format!(
        "{}{}incomingBytes",
        bucketed_prefix(scope, timestamp),
        DELIMITER
    )
}

/// Key of the outgoing-bytes accumulator in one 15-minute bucket
pub fn outgoing_bytes_key(scope: &Scope, timestamp: i64) -> String {
    format!(
        "{}{}outgoingBytes",
        bucketed_prefix(scope, timestamp),
        DELIMITER
    )
}

/// Recover the action name from a bucket-level occurrence key
///
/// The prefix and the scope-id segment are stripped structurally, by
/// locating the `:{scope_id}:` component and parsing whatever trails it.
/// Returns `None` for keys that do not end in a known action name (such as
/// the byte accumulators).
///
/// # Example
///
/// ```rust
/// use utrack::schema::{action_from_key, action_key};
/// use utrack::types::{Action, Scope};
///
/// let scope = Scope::bucket("demo");
/// let key = action_key(&scope, Action::PutObject, 0);
/// assert_eq!(action_from_key(&key, "demo"), Some(Action::PutObject));
/// ```
pub fn action_from_key(key: &str, scope_id: &str) -> Option<Action> {
    let marker = format!("{}{}{}", DELIMITER, scope_id, DELIMITER);
    let idx = key.rfind(&marker)?;
    Action::from_name(&key[idx + marker.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScopeType;

    const TS: i64 = 1_700_000_100_000 - (1_700_000_100_000 % 900_000);

    #[test]
    fn test_scope_level_keys() {
        let scope = Scope::bucket("demo");
        assert_eq!(
            gauge_key(&scope, CounterMetric::StorageUtilized),
            "s3:buckets:demo:storageUtilized"
        );
        assert_eq!(
            counter_key(&scope, CounterMetric::NumberOfObjects),
            "s3:buckets:demo:numberOfObjects:counter"
        );

        let scope = Scope::account("123456789012");
        assert_eq!(
            gauge_key(&scope, CounterMetric::NumberOfObjects),
            "s3:accounts:123456789012:numberOfObjects"
        );
    }

    #[test]
    fn test_bucketed_keys() {
        let scope = Scope::bucket("demo");
        assert_eq!(
            action_key(&scope, Action::PutObject, TS),
            format!("s3:buckets:{}:demo:PutObject", TS)
        );
        assert_eq!(
            incoming_bytes_key(&scope, TS),
            format!("s3:buckets:{}:demo:incomingBytes", TS)
        );
        assert_eq!(
            outgoing_bytes_key(&scope, TS),
            format!("s3:buckets:{}:demo:outgoingBytes", TS)
        );
    }

    #[test]
    fn test_key_construction_is_idempotent() {
        let scope = Scope::new(ScopeType::User, "alice");
        assert_eq!(
            action_key(&scope, Action::GetObject, TS),
            action_key(&scope, Action::GetObject, TS)
        );
        assert_eq!(
            gauge_key(&scope, CounterMetric::StorageUtilized),
            gauge_key(&scope, CounterMetric::StorageUtilized)
        );
    }

    #[test]
    fn test_distinct_scopes_never_collide() {
        let a = Scope::bucket("alpha");
        let b = Scope::bucket("beta");
        for action in Action::ALL {
            assert_ne!(action_key(&a, *action, TS), action_key(&b, *action, TS));
        }
        for metric in CounterMetric::ALL {
            assert_ne!(counter_key(&a, *metric), counter_key(&b, *metric));
            assert_ne!(gauge_key(&a, *metric), gauge_key(&b, *metric));
        }
    }

    #[test]
    fn test_scope_types_never_collide() {
        let bucket = Scope::bucket("shared-id");
        let account = Scope::account("shared-id");
        assert_ne!(
            action_key(&bucket, Action::ListBucket, TS),
            action_key(&account, Action::ListBucket, TS)
        );
    }

    #[test]
    fn test_action_from_key_round_trip() {
        // Scope ids of widely different lengths parse identically
        for id in ["d", "demo-bucket", "a-very-long-bucket-name-indeed-0123456789"] {
            let scope = Scope::bucket(id);
            for action in Action::ALL {
                let key = action_key(&scope, *action, TS);
                assert_eq!(action_from_key(&key, id), Some(*action));
            }
        }
    }

    #[test]
    fn test_action_from_key_rejects_accumulators() {
        let scope = Scope::bucket("demo");
        let key = incoming_bytes_key(&scope, TS);
        assert_eq!(action_from_key(&key, "demo"), None);
    }
}
