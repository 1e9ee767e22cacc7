//! Core data types shared by the ingestion and aggregation engines
//!
//! This module defines the fundamental structures used across the system:
//!
//! # Key Types
//!
//! - **`Scope`**: the tenant/resource identity a metric is recorded against
//!   (bucket, account, service, or user)
//! - **`Action`**: an enumerated storage-service operation type
//! - **`MetricEvent`**: one completed operation reported by the storage
//!   service, carrying scopes and the action's numeric fields
//! - **`TimeRange`**: inclusive time window for reporting queries
//! - **`ScopeReport`**: the per-scope usage report assembled by the
//!   aggregation engine
//!
//! # Example
//!
//! ```rust
//! use utrack::types::{normalized_timestamp, Action, Scope, ScopeType, TimeRange};
//!
//! let scope = Scope::new(ScopeType::Bucket, "demo-bucket");
//! assert_eq!(scope.scope_type.level(), "buckets");
//!
//! // Wall-clock time truncates down to the 15-minute boundary
//! assert_eq!(normalized_timestamp(1_000_000_000), 999_900_000);
//!
//! let range = TimeRange::new(1_000, 2_000).unwrap();
//! assert!(range.contains(1_500));
//!
//! assert_eq!(Action::PutObject.name(), "PutObject");
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Width of one accumulation bucket in milliseconds (15 minutes)
pub const BUCKET_INTERVAL_MS: i64 = 15 * 60 * 1000;

/// Truncate a wall-clock timestamp down to the nearest 15-minute boundary
///
/// All time-bucketed keys for a single operation event use one normalized
/// timestamp, computed once per event.
///
/// # Example
///
/// ```rust
/// use utrack::types::{normalized_timestamp, BUCKET_INTERVAL_MS};
///
/// let t = normalized_timestamp(1_700_000_123_456);
/// assert_eq!(t % BUCKET_INTERVAL_MS, 0);
/// assert!(t <= 1_700_000_123_456);
/// ```
pub fn normalized_timestamp(timestamp_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(BUCKET_INTERVAL_MS)
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The kind of tenant/resource identity a metric belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    /// A single bucket
    Bucket,
    /// An account owning one or more buckets
    Account,
    /// The storage service as a whole
    Service,
    /// An individual user within an account
    User,
}

impl ScopeType {
    /// The level segment used in storage-backend keys for this scope type
    pub fn level(&self) -> &'static str {
        match self {
            ScopeType::Bucket => "buckets",
            ScopeType::Account => "accounts",
            ScopeType::Service => "service",
            ScopeType::User => "users",
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.level())
    }
}

/// A tenant/resource identity that metrics are recorded against
///
/// Scope records are implicitly created on first ingestion referencing the
/// scope id; there is no registration step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// The kind of identity
    pub scope_type: ScopeType,
    /// Identity value (bucket name, account id, service name, user id)
    pub id: String,
}

impl Scope {
    /// Create a new scope
    pub fn new(scope_type: ScopeType, id: impl Into<String>) -> Self {
        Self {
            scope_type,
            id: id.into(),
        }
    }

    /// Bucket scope shorthand
    pub fn bucket(id: impl Into<String>) -> Self {
        Self::new(ScopeType::Bucket, id)
    }

    /// Account scope shorthand
    pub fn account(id: impl Into<String>) -> Self {
        Self::new(ScopeType::Account, id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope_type, self.id)
    }
}

macro_rules! actions {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// A trackable storage-service operation type
        ///
        /// Each action maps to exactly one delta-computation rule in the
        /// ingestion engine and one occurrence counter per scope per
        /// 15-minute bucket.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Action {
            $(
                #[allow(missing_docs)]
                $variant,
            )+
        }

        impl Action {
            /// Every known action, in a stable order
            pub const ALL: &'static [Action] = &[$(Action::$variant),+];

            /// The canonical operation name, as used in key suffixes and
            /// report operation labels
            pub fn name(&self) -> &'static str {
                match self {
                    $(Action::$variant => $name),+
                }
            }

            /// Parse an action from its canonical name
            pub fn from_name(name: &str) -> Option<Action> {
                match name {
                    $($name => Some(Action::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

actions! {
    CreateBucket => "CreateBucket",
    DeleteBucket => "DeleteBucket",
    ListBucket => "ListBucket",
    GetBucketAcl => "GetBucketAcl",
    PutBucketAcl => "PutBucketAcl",
    PutBucketWebsite => "PutBucketWebsite",
    GetBucketWebsite => "GetBucketWebsite",
    DeleteBucketWebsite => "DeleteBucketWebsite",
    ListBucketMultipartUploads => "ListBucketMultipartUploads",
    ListMultipartUploadParts => "ListMultipartUploadParts",
    InitiateMultipartUpload => "InitiateMultipartUpload",
    CompleteMultipartUpload => "CompleteMultipartUpload",
    AbortMultipartUpload => "AbortMultipartUpload",
    UploadPart => "UploadPart",
    DeleteObject => "DeleteObject",
    MultiObjectDelete => "MultiObjectDelete",
    GetObject => "GetObject",
    GetObjectAcl => "GetObjectAcl",
    PutObject => "PutObject",
    CopyObject => "CopyObject",
    PutObjectAcl => "PutObjectAcl",
    HeadBucket => "HeadBucket",
    HeadObject => "HeadObject",
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size of the object an overwrite replaced
///
/// `Absent` means the write created a new object; `Bytes` carries the
/// previous content length (which may be 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorSize {
    /// No previous object existed at this key
    Absent,
    /// The previous object's content length in bytes
    Bytes(i64),
}

impl PriorSize {
    /// The byte count to subtract when computing a storage delta
    pub fn bytes(&self) -> i64 {
        match self {
            PriorSize::Absent => 0,
            PriorSize::Bytes(n) => *n,
        }
    }

    /// Whether the write created a new object
    pub fn is_absent(&self) -> bool {
        matches!(self, PriorSize::Absent)
    }
}

/// Numeric fields attached to an operation event
///
/// Which fields are required depends on the action; validation happens in
/// [`MetricEvent::validate`] before any store access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFields {
    /// Total bytes removed by a delete
    pub byte_length: Option<i64>,
    /// Size of the object written or read, in bytes
    pub new_byte_length: Option<i64>,
    /// Previous object size for overwriting writes
    pub old_byte_length: Option<PriorSize>,
    /// Number of objects removed by a delete
    pub number_of_objects: Option<i64>,
}

/// One completed storage operation, as reported by the service
///
/// An event may carry several scopes simultaneously (e.g. both a bucket and
/// its owning account); the operation is then recorded independently once
/// per scope with identical deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricEvent {
    /// Scopes to record the operation against; at least one is required
    pub scopes: Vec<Scope>,
    /// Numeric fields for the action's delta rules
    pub fields: MetricFields,
    /// Caller-supplied identifier for log correlation
    pub request_id: Option<String>,
}

impl MetricEvent {
    /// Create an event for a single scope with no numeric fields
    pub fn for_scope(scope: Scope) -> Self {
        Self {
            scopes: vec![scope],
            ..Default::default()
        }
    }

    /// Add another scope to the event
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scopes.push(scope);
        self
    }

    /// Attach a request id for log correlation
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Check that the event carries a scope and every field the action
    /// requires
    ///
    /// Fails fast: a validation error is returned before any store command
    /// is issued.
    pub fn validate(&self, action: Action) -> Result<(), ValidationError> {
        if self.scopes.is_empty() {
            return Err(ValidationError::MissingScope);
        }
        match action {
            Action::UploadPart | Action::GetObject => {
                self.require_new_byte_length()?;
            }
            Action::PutObject | Action::CopyObject => {
                self.require_new_byte_length()?;
                if self.fields.old_byte_length.is_none() {
                    return Err(ValidationError::MissingField("old_byte_length"));
                }
            }
            Action::DeleteObject | Action::MultiObjectDelete => {
                if self.fields.byte_length.is_none() {
                    return Err(ValidationError::MissingField("byte_length"));
                }
                if self.fields.number_of_objects.is_none() {
                    return Err(ValidationError::MissingField("number_of_objects"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn require_new_byte_length(&self) -> Result<(), ValidationError> {
        if self.fields.new_byte_length.is_none() {
            return Err(ValidationError::MissingField("new_byte_length"));
        }
        Ok(())
    }
}

/// Inclusive time window for reporting queries
///
/// Boundaries are arbitrary wall-clock timestamps; they do not need to fall
/// on 15-minute boundaries.
///
/// # Example
///
/// ```rust
/// use utrack::types::TimeRange;
///
/// let range = TimeRange::new(1_000, 2_000).unwrap();
/// assert!(range.contains(1_000));
/// assert!(range.contains(2_000));
/// assert!(!range.contains(2_001));
///
/// // start > end is rejected
/// assert!(TimeRange::new(2_000, 1_000).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: i64,
    /// End timestamp in milliseconds (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range, validating that start <= end
    pub fn new(start: i64, end: i64) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Check whether a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Enumerate every normalized 15-minute bucket timestamp inside the
    /// range, inclusive on both ends
    ///
    /// ```rust
    /// use utrack::types::{TimeRange, BUCKET_INTERVAL_MS};
    ///
    /// let range = TimeRange::new(0, 2 * BUCKET_INTERVAL_MS).unwrap();
    /// assert_eq!(
    ///     range.bucket_timestamps(),
    ///     vec![0, BUCKET_INTERVAL_MS, 2 * BUCKET_INTERVAL_MS]
    /// );
    /// ```
    pub fn bucket_timestamps(&self) -> Vec<i64> {
        let mut bucket = normalized_timestamp(self.start);
        if bucket < self.start {
            bucket += BUCKET_INTERVAL_MS;
        }
        let mut buckets = Vec::new();
        while bucket <= self.end {
            buckets.push(bucket);
            bucket += BUCKET_INTERVAL_MS;
        }
        buckets
    }
}

/// Usage report for one scope over one time range
///
/// Gauge fields report `[value_at_start, value_at_end]`; accumulator fields
/// report the sum over every 15-minute bucket inside the range. The
/// `operations` map carries one `s3:`-prefixed entry per known action, with
/// zero counts for actions that never occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeReport {
    /// The scope id the report describes
    pub id: String,
    /// The queried time range
    pub time_range: TimeRange,
    /// Storage bytes utilized at the range start and end
    pub storage_utilized: [i64; 2],
    /// Object count at the range start and end
    pub number_of_objects: [i64; 2],
    /// Bytes received from clients within the range
    pub incoming_bytes: i64,
    /// Bytes sent to clients within the range
    pub outgoing_bytes: i64,
    /// Occurrence count per operation within the range
    pub operations: BTreeMap<String, i64>,
}

impl ScopeReport {
    /// Create an empty report with every operation count preset to zero
    pub fn empty(id: impl Into<String>, time_range: TimeRange) -> Self {
        let operations = Action::ALL
            .iter()
            .map(|action| (format!("s3:{}", action.name()), 0))
            .collect();
        Self {
            id: id.into(),
            time_range,
            storage_utilized: [0, 0],
            number_of_objects: [0, 0],
            incoming_bytes: 0,
            outgoing_bytes: 0,
            operations,
        }
    }
}
