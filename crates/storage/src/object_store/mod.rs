//! Object Store Adapter
//!
//! Thin interface to the external bucket/object backend. The backend itself
//! is out of scope; the lifecycle engine's correctness depends only on this
//! contract. Two implementations:
//!
//! - [`MemoryObjectStore`] — deterministic in-memory store for tests and
//!   dev mode
//! - [`NodeObjectStore`] — HTTP client for the cirrus storage-node gateway

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

pub mod memory;
pub mod node;

pub use memory::MemoryObjectStore;
pub use node::NodeObjectStore;

/// Hard cap on keys per batch-delete call.
pub const REMOVE_BATCH_MAX: usize = 1000;

/// Page size used when walking a full listing.
const LIST_PAGE_SIZE: usize = 1000;

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub last_modified: Option<OffsetDateTime>,
}

/// One page of a listing. `next_cursor` is an opaque start-after marker;
/// None means the listing is exhausted.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    pub next_cursor: Option<String>,
}

/// HTTP method a presigned URL authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    Get,
    Put,
}

impl PresignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresignMethod::Get => "GET",
            PresignMethod::Put => "PUT",
        }
    }
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },
    #[error("batch of {0} keys exceeds the {REMOVE_BATCH_MAX}-key limit")]
    BatchTooLarge(usize),
    #[error("storage node request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage node returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("presign failed: {0}")]
    Presign(String),
}

/// Contract consumed by the lifecycle engine, usage sync, and presign
/// endpoints.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Idempotent create: succeeds whether or not the bucket already exists.
    async fn ensure_bucket(&self, physical: &str, region: &str) -> Result<(), ObjectStoreError>;

    /// Remove a bucket. The bucket must be empty; a missing bucket is not
    /// an error (compensating deletes re-run safely).
    async fn remove_bucket(&self, physical: &str) -> Result<(), ObjectStoreError>;

    /// One page of keys under `prefix`, starting strictly after `cursor`,
    /// at most `limit` entries. The backend stream is not consumed past the
    /// requested page.
    async fn list_objects(
        &self,
        physical: &str,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, ObjectStoreError>;

    /// Delete up to [`REMOVE_BATCH_MAX`] keys. Missing keys are ignored.
    async fn remove_objects(&self, physical: &str, keys: &[String])
        -> Result<(), ObjectStoreError>;

    /// Replace the bucket policy; `None` resets to private.
    async fn set_bucket_policy(
        &self,
        physical: &str,
        policy_json: Option<&str>,
    ) -> Result<(), ObjectStoreError>;

    async fn set_bucket_versioning(
        &self,
        physical: &str,
        enabled: bool,
    ) -> Result<(), ObjectStoreError>;

    /// Full object read (rename migration only).
    async fn get_object(&self, physical: &str, key: &str) -> Result<Bytes, ObjectStoreError>;

    /// Full object write (rename migration only).
    async fn put_object(
        &self,
        physical: &str,
        key: &str,
        data: Bytes,
    ) -> Result<(), ObjectStoreError>;

    /// Signed data-plane URL; pure computation, no backend round-trip.
    fn presigned_url(
        &self,
        method: PresignMethod,
        physical: &str,
        key: &str,
        expiry_secs: u64,
    ) -> Result<String, ObjectStoreError>;
}

/// Anonymous-read policy document applied to public buckets.
pub fn public_read_policy(physical: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "AWS": ["*"] },
            "Action": ["s3:GetObject"],
            "Resource": [format!("arn:aws:s3:::{physical}/*")],
        }]
    })
    .to_string()
}

/// Walk the full listing, summing sizes and counting objects.
pub async fn count_usage(
    store: &dyn ObjectStore,
    physical: &str,
) -> Result<(u64, u64), ObjectStoreError> {
    let mut used_bytes = 0u64;
    let mut object_count = 0u64;
    let mut cursor: Option<String> = None;

    loop {
        let page = store
            .list_objects(physical, "", cursor.as_deref(), LIST_PAGE_SIZE)
            .await?;
        for obj in &page.objects {
            used_bytes += obj.size;
            object_count += 1;
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok((used_bytes, object_count))
}

/// Delete every object, then the bucket itself. Used both by forced
/// deletion and as the compensating cleanup when the creation transaction
/// fails after the external bucket was created.
pub async fn scrub_bucket(store: &dyn ObjectStore, physical: &str) -> Result<(), ObjectStoreError> {
    loop {
        let page = store
            .list_objects(physical, "", None, REMOVE_BATCH_MAX)
            .await?;
        if page.objects.is_empty() {
            break;
        }
        let keys: Vec<String> = page.objects.into_iter().map(|o| o.key).collect();
        store.remove_objects(physical, &keys).await?;
    }
    store.remove_bucket(physical).await
}
