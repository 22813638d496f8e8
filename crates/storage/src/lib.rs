#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Cirrus Storage Module
//!
//! The metered object-storage product: provisioning, billing, and usage
//! accounting for S3-style buckets backed by the storage-node fleet.
//!
//! ## Features
//!
//! - **Lifecycle**: Create, reconfigure, rename, and delete buckets with
//!   compensating cleanup so no external bucket exists unpaid
//! - **Ledger**: Append-only account ledger; balances change only with an
//!   entry, under the account row lock
//! - **Recurring billing**: 30-day cycles with a single one-day grace
//!   period before suspension
//! - **Usage sync**: On-demand byte/object counts with a freshness window
//! - **Access keys**: Per-bucket credentials and presigned URLs

pub mod access_keys;
pub mod charge;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod object_store;
pub mod plans;
pub mod registry;
pub mod usage;

#[cfg(test)]
mod edge_case_tests;

// Access keys
pub use access_keys::{AccessKey, AccessKeyService, CreatedAccessKey, PRESIGN_MAX_EXPIRY_SECS};

// Charge workflow
pub use charge::{
    lapse_action, ChargeOutcome, ChargeRunner, LapseAction, SweepSummary, BILLING_CYCLE,
    GRACE_RETRY,
};

// Error
pub use error::{StorageError, StorageResult};

// Ledger
pub use ledger::{EntryType, Ledger, LedgerEntry};

// Lifecycle
pub use lifecycle::{BucketLifecycle, CreateBucketParams, UpdateSettingsParams};

// Object store adapter
pub use object_store::{
    count_usage, public_read_policy, scrub_bucket, ListPage, MemoryObjectStore, NodeObjectStore,
    ObjectInfo, ObjectStore, ObjectStoreError, PresignMethod, REMOVE_BATCH_MAX,
};

// Plans
pub use plans::{PlanCatalog, StoragePlan};

// Registry
pub use registry::{
    physical_bucket_name, validate_bucket_name, BucketRegistry, BucketStatus, NewBucket,
    StorageBucket,
};

// Usage sync
pub use usage::{needs_refresh, UsageSync, USAGE_FRESHNESS};

use std::sync::Arc;

use cirrus_shared::Notifier;
use sqlx::PgPool;

/// Main storage service combining the product's moving parts.
pub struct StorageService {
    pub lifecycle: BucketLifecycle,
    pub charges: ChargeRunner,
    pub access_keys: AccessKeyService,
    pub ledger: Ledger,
}

impl StorageService {
    pub fn new(pool: PgPool, store: Arc<dyn ObjectStore>, notifier: Notifier) -> Self {
        Self {
            lifecycle: BucketLifecycle::new(pool.clone(), store.clone(), notifier.clone()),
            charges: ChargeRunner::new(pool.clone(), notifier),
            access_keys: AccessKeyService::new(pool.clone(), store),
            ledger: Ledger::new(pool),
        }
    }
}
