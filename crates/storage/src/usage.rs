//! Usage sync
//!
//! On-demand refresh of used-bytes/object-count from the object store,
//! throttled by a freshness window. A failed refresh keeps the stale
//! snapshot rather than blocking the caller.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::object_store::{count_usage, ObjectStore};
use crate::registry::{BucketRegistry, StorageBucket};

/// Snapshots older than this are refreshed before list/get responses.
pub const USAGE_FRESHNESS: Duration = Duration::minutes(5);

/// True when the snapshot has never been taken or has aged out.
pub fn needs_refresh(usage_synced_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    match usage_synced_at {
        None => true,
        Some(synced) => now - synced > USAGE_FRESHNESS,
    }
}

#[derive(Clone)]
pub struct UsageSync {
    registry: BucketRegistry,
    store: Arc<dyn ObjectStore>,
}

impl UsageSync {
    pub fn new(registry: BucketRegistry, store: Arc<dyn ObjectStore>) -> Self {
        Self { registry, store }
    }

    /// Walk the full listing and persist the snapshot. Any failure is
    /// logged and the unmodified bucket comes back — stale data is
    /// preferred over failing the read path.
    pub async fn sync(&self, bucket: StorageBucket) -> StorageBucket {
        let now = OffsetDateTime::now_utc();

        let (used_bytes, object_count) =
            match count_usage(self.store.as_ref(), &bucket.physical_name).await {
                Ok(counts) => counts,
                Err(e) => {
                    tracing::warn!(
                        bucket_id = %bucket.id,
                        physical_name = %bucket.physical_name,
                        error = %e,
                        "Usage sync failed; keeping stale snapshot"
                    );
                    return bucket;
                }
            };

        let used_bytes = used_bytes as i64;
        let object_count = object_count as i64;

        if let Err(e) = self
            .registry
            .set_usage(bucket.id, used_bytes, object_count, now)
            .await
        {
            tracing::error!(
                bucket_id = %bucket.id,
                error = %e,
                "Failed to persist usage snapshot"
            );
            return bucket;
        }

        StorageBucket {
            used_bytes,
            object_count,
            usage_synced_at: Some(now),
            ..bucket
        }
    }

    /// Refresh only when the freshness window has lapsed.
    pub async fn refresh_if_stale(&self, bucket: StorageBucket) -> StorageBucket {
        if needs_refresh(bucket.usage_synced_at, OffsetDateTime::now_utc()) {
            self.sync(bucket).await
        } else {
            bucket
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_synced_needs_refresh() {
        let now = OffsetDateTime::now_utc();
        assert!(needs_refresh(None, now));
    }

    #[test]
    fn fresh_snapshot_is_kept() {
        let now = OffsetDateTime::now_utc();
        assert!(!needs_refresh(Some(now - Duration::minutes(4)), now));
    }

    #[test]
    fn aged_snapshot_needs_refresh() {
        let now = OffsetDateTime::now_utc();
        assert!(needs_refresh(Some(now - Duration::minutes(6)), now));
    }
}
