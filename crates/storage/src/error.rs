//! Error taxonomy for the storage product

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the lifecycle engine, charge workflow, and their
/// data-access layers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Balance is short of the required amount. Surfaced synchronously on
    /// creation; on recurring billing it drives the grace/suspend state
    /// machine instead of propagating.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    /// Force-less delete of a bucket that still contains objects.
    #[error("bucket is not empty ({object_count} objects); retry with force or empty it first")]
    BucketNotEmpty { object_count: u64 },

    #[error("bucket not found")]
    BucketNotFound,

    #[error("account not found")]
    AccountNotFound,

    #[error("access key not found")]
    AccessKeyNotFound,

    #[error("unknown storage plan `{0}`")]
    UnknownPlan(String),

    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),

    #[error("invalid bucket name `{name}`: {reason}")]
    InvalidBucketName { name: String, reason: String },

    /// Suspended buckets refuse data-plane operations until the owner
    /// resolves the balance manually.
    #[error("bucket is suspended")]
    BucketSuspended,

    /// Any object-store adapter failure. On the creation path this triggers
    /// compensating rollback; on best-effort steps it is logged only.
    #[error("object store error: {0}")]
    ExternalStore(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;
