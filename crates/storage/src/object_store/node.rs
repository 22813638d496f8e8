//! Storage-node gateway client
//!
//! Speaks the storage node's JSON REST API: bucket create/delete at
//! `/{bucket}`, object payloads at `/{bucket}/{key}`, listing via query
//! parameters, and config sub-resources (`?policy`, `?versioning`,
//! `?delete`). Requests carry a bearer token; transport failures are
//! retried with exponential backoff. Presigned URLs are HMAC-SHA256 query
//! signatures the gateway verifies with the shared secret.

use async_trait::async_trait;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;

use super::{
    ListPage, ObjectInfo, ObjectStore, ObjectStoreError, PresignMethod, REMOVE_BATCH_MAX,
};

type HmacSha256 = Hmac<Sha256>;

/// Transport retries: 3 attempts, 100ms/200ms between them.
fn retry_strategy() -> impl Iterator<Item = std::time::Duration> {
    ExponentialBackoff::from_millis(2).factor(50).take(2)
}

#[derive(Clone)]
pub struct NodeObjectStore {
    client: reqwest::Client,
    base_url: String,
    token: String,
    presign_secret: String,
}

#[derive(Debug, Serialize)]
struct CreateBucketRequest<'a> {
    region: &'a str,
}

#[derive(Debug, Serialize)]
struct RemoveObjectsRequest<'a> {
    objects: &'a [String],
}

#[derive(Debug, Serialize)]
struct PolicyRequest<'a> {
    policy: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct VersioningRequest {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    key: String,
    size: u64,
    etag: String,
    last_modified_unix_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListObjectsResponse {
    objects: Vec<ListedObject>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

impl NodeObjectStore {
    pub fn new(base_url: &str, token: &str, presign_secret: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            presign_secret: presign_secret.to_string(),
        }
    }

    fn bucket_url(&self, physical: &str) -> String {
        format!("{}/{}", self.base_url, physical)
    }

    fn object_url(&self, physical: &str, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, physical, key)
    }

    /// Send with bearer auth, retrying transport failures only; HTTP error
    /// statuses are returned to the caller for interpretation.
    async fn send(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ObjectStoreError> {
        let response = Retry::spawn(retry_strategy(), || async {
            build().bearer_auth(&self.token).send().await
        })
        .await?;
        Ok(response)
    }

    async fn expect_ok(response: reqwest::Response) -> Result<reqwest::Response, ObjectStoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ObjectStoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ObjectStore for NodeObjectStore {
    async fn ensure_bucket(&self, physical: &str, region: &str) -> Result<(), ObjectStoreError> {
        let url = self.bucket_url(physical);
        let response = self
            .send(|| {
                self.client
                    .put(&url)
                    .json(&CreateBucketRequest { region })
            })
            .await?;

        // 409 means the bucket already exists, which is the desired state.
        if response.status().as_u16() == 409 {
            return Ok(());
        }
        Self::expect_ok(response).await?;
        Ok(())
    }

    async fn remove_bucket(&self, physical: &str) -> Result<(), ObjectStoreError> {
        let url = self.bucket_url(physical);
        let response = self.send(|| self.client.delete(&url)).await?;

        // Already gone: compensating deletes re-run safely.
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        Self::expect_ok(response).await?;
        Ok(())
    }

    async fn list_objects(
        &self,
        physical: &str,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, ObjectStoreError> {
        let url = self.bucket_url(physical);
        let response = self
            .send(|| {
                let mut req = self
                    .client
                    .get(&url)
                    .query(&[("prefix", prefix.to_string()), ("max-keys", limit.to_string())]);
                if let Some(after) = cursor {
                    req = req.query(&[("start-after", after.to_string())]);
                }
                req
            })
            .await?;

        if response.status().as_u16() == 404 {
            return Err(ObjectStoreError::BucketNotFound(physical.to_string()));
        }
        let body: ListObjectsResponse = Self::expect_ok(response).await?.json().await?;

        let objects: Vec<ObjectInfo> = body
            .objects
            .into_iter()
            .map(|o| ObjectInfo {
                key: o.key,
                size: o.size,
                etag: o.etag,
                last_modified: o
                    .last_modified_unix_secs
                    .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
            })
            .collect();

        let next_cursor = if body.is_truncated {
            body.next_continuation_token
                .or_else(|| objects.last().map(|o| o.key.clone()))
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
        if keys.is_empty() {
            return Ok(());
        }
        let url = format!("{}?delete", self.bucket_url(physical));
        let response = self
            .send(|| {
                self.client
                    .post(&url)
                    .json(&RemoveObjectsRequest { objects: keys })
            })
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    async fn set_bucket_policy(
        &self,
        physical: &str,
        policy_json: Option<&str>,
    ) -> Result<(), ObjectStoreError> {
        let url = format!("{}?policy", self.bucket_url(physical));
        let response = self
            .send(|| {
                self.client
                    .put(&url)
                    .json(&PolicyRequest {
                        policy: policy_json,
                    })
            })
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    async fn set_bucket_versioning(
        &self,
        physical: &str,
        enabled: bool,
    ) -> Result<(), ObjectStoreError> {
        let url = format!("{}?versioning", self.bucket_url(physical));
        let response = self
            .send(|| self.client.put(&url).json(&VersioningRequest { enabled }))
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    async fn get_object(&self, physical: &str, key: &str) -> Result<Bytes, ObjectStoreError> {
        let url = self.object_url(physical, key);
        let response = self.send(|| self.client.get(&url)).await?;

        if response.status().as_u16() == 404 {
            return Err(ObjectStoreError::ObjectNotFound {
                bucket: physical.to_string(),
                key: key.to_string(),
            });
        }
        let bytes = Self::expect_ok(response).await?.bytes().await?;
        Ok(bytes)
    }

    async fn put_object(
        &self,
        physical: &str,
        key: &str,
        data: Bytes,
    ) -> Result<(), ObjectStoreError> {
        let url = self.object_url(physical, key);
        let response = self
            .send(|| self.client.put(&url).body(data.clone()))
            .await?;
        Self::expect_ok(response).await?;
        Ok(())
    }

    fn presigned_url(
        &self,
        method: PresignMethod,
        physical: &str,
        key: &str,
        expiry_secs: u64,
    ) -> Result<String, ObjectStoreError> {
        let expires = OffsetDateTime::now_utc().unix_timestamp() + expiry_secs as i64;
        let canonical = format!("{}\n/{}/{}\n{}", method.as_str(), physical, key, expires);

        let mut mac = HmacSha256::new_from_slice(self.presign_secret.as_bytes())
            .map_err(|e| ObjectStoreError::Presign(e.to_string()))?;
        mac.update(canonical.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!(
            "{}/{}/{}?X-Cirrus-Expires={}&X-Cirrus-Signature={}",
            self.base_url, physical, key, expires, signature
        ))
    }
}
