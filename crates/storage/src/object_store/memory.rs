//! In-memory object store
//!
//! BTreeMaps behind an RwLock give deterministic listing order, which the
//! tests rely on. Also backs dev mode when no storage node is configured.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{
    ListPage, ObjectInfo, ObjectStore, ObjectStoreError, PresignMethod, REMOVE_BATCH_MAX,
};

#[derive(Debug, Clone, Default)]
struct BucketState {
    region: String,
    policy: Option<String>,
    versioning: bool,
    objects: BTreeMap<String, Bytes>,
}

#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    buckets: Arc<RwLock<BTreeMap<String, BucketState>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live buckets (test assertions on orphan cleanup).
    pub async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }

    pub async fn has_bucket(&self, physical: &str) -> bool {
        self.buckets.read().await.contains_key(physical)
    }

    pub async fn policy_of(&self, physical: &str) -> Option<String> {
        self.buckets
            .read()
            .await
            .get(physical)
            .and_then(|b| b.policy.clone())
    }

    pub async fn versioning_of(&self, physical: &str) -> Option<bool> {
        self.buckets.read().await.get(physical).map(|b| b.versioning)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_bucket(&self, physical: &str, region: &str) -> Result<(), ObjectStoreError> {
        let mut buckets = self.buckets.write().await;
        buckets.entry(physical.to_string()).or_insert_with(|| BucketState {
            region: region.to_string(),
            ..BucketState::default()
        });
        Ok(())
    }

    async fn remove_bucket(&self, physical: &str) -> Result<(), ObjectStoreError> {
        let mut buckets = self.buckets.write().await;
        if let Some(state) = buckets.get(physical) {
            if !state.objects.is_empty() {
                return Err(ObjectStoreError::Status {
                    status: 409,
                    body: format!("bucket {physical} is not empty"),
                });
            }
            buckets.remove(physical);
        }
        Ok(())
    }

    async fn list_objects(
        &self,
        physical: &str,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, ObjectStoreError> {
        let buckets = self.buckets.read().await;
        let state = buckets
            .get(physical)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(physical.to_string()))?;

        let mut objects = Vec::new();
        let mut more = false;
        for (key, data) in &state.objects {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(after) = cursor {
                if key.as_str() <= after {
                    continue;
                }
            }
            if objects.len() == limit {
                more = true;
                break;
            }
            objects.push(ObjectInfo {
                key: key.clone(),
                size: data.len() as u64,
                etag: format!("{:x}", data.len()),
                last_modified: Some(OffsetDateTime::now_utc()),
            });
        }

        let next_cursor = if more {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_cursor,
        })
    }

    async fn remove_objects(
        &self,
        physical: &str,
        keys: &[String],
    ) -> Result<(), ObjectStoreError> {
        if keys.len() > REMOVE_BATCH_MAX {
            return Err(ObjectStoreError::BatchTooLarge(keys.len()));
        }
        let mut buckets = self.buckets.write().await;
        let state = buckets
            .get_mut(physical)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(physical.to_string()))?;
        for key in keys {
            state.objects.remove(key);
        }
        Ok(())
    }

    async fn set_bucket_policy(
        &self,
        physical: &str,
        policy_json: Option<&str>,
    ) -> Result<(), ObjectStoreError> {
        let mut buckets = self.buckets.write().await;
        let state = buckets
            .get_mut(physical)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(physical.to_string()))?;
        state.policy = policy_json.map(str::to_string);
        Ok(())
    }

    async fn set_bucket_versioning(
        &self,
        physical: &str,
        enabled: bool,
    ) -> Result<(), ObjectStoreError> {
        let mut buckets = self.buckets.write().await;
        let state = buckets
            .get_mut(physical)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(physical.to_string()))?;
        state.versioning = enabled;
        Ok(())
    }

    async fn get_object(&self, physical: &str, key: &str) -> Result<Bytes, ObjectStoreError> {
        let buckets = self.buckets.read().await;
        let state = buckets
            .get(physical)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(physical.to_string()))?;
        state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::ObjectNotFound {
                bucket: physical.to_string(),
                key: key.to_string(),
            })
    }

    async fn put_object(
        &self,
        physical: &str,
        key: &str,
        data: Bytes,
    ) -> Result<(), ObjectStoreError> {
        let mut buckets = self.buckets.write().await;
        let state = buckets
            .get_mut(physical)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(physical.to_string()))?;
        state.objects.insert(key.to_string(), data);
        Ok(())
    }

    fn presigned_url(
        &self,
        method: PresignMethod,
        physical: &str,
        key: &str,
        expiry_secs: u64,
    ) -> Result<String, ObjectStoreError> {
        Ok(format!(
            "memory://{physical}/{key}?method={}&expires_in={expiry_secs}",
            method.as_str()
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::object_store::{count_usage, scrub_bucket};

    async fn seeded(objects: &[(&str, usize)]) -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        store.ensure_bucket("b1", "ru-1").await.unwrap();
        for (key, size) in objects {
            store
                .put_object("b1", key, Bytes::from(vec![0u8; *size]))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn ensure_bucket_is_idempotent() {
        let store = seeded(&[("a", 1)]).await;
        store.ensure_bucket("b1", "ru-1").await.unwrap();
        // The existing object survives the second create.
        assert_eq!(store.get_object("b1", "a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_pages_with_cursor() {
        let store = seeded(&[("a", 1), ("b", 2), ("c", 3)]).await;

        let first = store.list_objects("b1", "", None, 2).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("b"));

        let second = store
            .list_objects("b1", "", first.next_cursor.as_deref(), 2)
            .await
            .unwrap();
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "c");
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn listing_respects_prefix() {
        let store = seeded(&[("logs/a", 1), ("logs/b", 1), ("data/c", 1)]).await;
        let page = store.list_objects("b1", "logs/", None, 10).await.unwrap();
        assert_eq!(page.objects.len(), 2);
    }

    #[tokio::test]
    async fn remove_objects_rejects_oversized_batch() {
        let store = seeded(&[]).await;
        let keys: Vec<String> = (0..1001).map(|i| format!("k{i}")).collect();
        assert!(matches!(
            store.remove_objects("b1", &keys).await,
            Err(ObjectStoreError::BatchTooLarge(1001))
        ));
    }

    #[tokio::test]
    async fn remove_bucket_refuses_non_empty() {
        let store = seeded(&[("a", 1)]).await;
        assert!(store.remove_bucket("b1").await.is_err());

        store.remove_objects("b1", &["a".to_string()]).await.unwrap();
        store.remove_bucket("b1").await.unwrap();
        assert_eq!(store.bucket_count().await, 0);

        // Removing again is a no-op, not an error.
        store.remove_bucket("b1").await.unwrap();
    }

    #[tokio::test]
    async fn policy_and_versioning_round_trip() {
        let store = seeded(&[]).await;

        store.set_bucket_policy("b1", Some("{}")).await.unwrap();
        assert_eq!(store.policy_of("b1").await.as_deref(), Some("{}"));
        store.set_bucket_policy("b1", None).await.unwrap();
        assert!(store.policy_of("b1").await.is_none());

        store.set_bucket_versioning("b1", true).await.unwrap();
        assert_eq!(store.versioning_of("b1").await, Some(true));
    }

    #[tokio::test]
    async fn count_usage_sums_the_full_listing() {
        let store = seeded(&[("a", 100), ("b", 250), ("c", 50)]).await;
        let (bytes, count) = count_usage(&store, "b1").await.unwrap();
        assert_eq!(bytes, 400);
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn scrub_bucket_removes_everything() {
        let store = seeded(&[("a", 1), ("b", 1)]).await;
        scrub_bucket(&store, "b1").await.unwrap();
        assert_eq!(store.bucket_count().await, 0);
    }
}
