//! Access keys
//!
//! Per-bucket credential pairs for the data plane. The secret is generated
//! once, stored as a SHA-256 digest, and returned in plaintext exactly once
//! at creation. Keys are owned by their bucket and cascade on delete.

use std::sync::Arc;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::object_store::{ObjectStore, PresignMethod};
use crate::registry::{BucketRegistry, BucketStatus};

const ACCESS_KEY_LEN: usize = 20;
const SECRET_KEY_LEN: usize = 40;

/// Presigned URLs live at most 7 days, S3-style.
pub const PRESIGN_MAX_EXPIRY_SECS: u64 = 7 * 24 * 3600;

/// Stored key metadata; never carries the secret.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AccessKey {
    pub id: Uuid,
    pub bucket_id: Uuid,
    pub access_key: String,
    pub label: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
}

/// Creation response: the only moment the secret exists in plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedAccessKey {
    pub id: Uuid,
    pub bucket_id: Uuid,
    pub access_key: String,
    pub secret_key: String,
    pub label: Option<String>,
    pub created_at: OffsetDateTime,
}

fn random_token(len: usize, uppercase: bool) -> String {
    let token: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    if uppercase {
        token.to_ascii_uppercase()
    } else {
        token
    }
}

fn sha256_hex(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

#[derive(Clone)]
pub struct AccessKeyService {
    pool: PgPool,
    registry: BucketRegistry,
    store: Arc<dyn ObjectStore>,
}

impl AccessKeyService {
    pub fn new(pool: PgPool, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            registry: BucketRegistry::new(pool.clone()),
            pool,
            store,
        }
    }

    /// Generate a key pair for an owned bucket.
    pub async fn create(
        &self,
        account_id: Uuid,
        bucket_id: Uuid,
        label: Option<&str>,
    ) -> StorageResult<CreatedAccessKey> {
        // Ownership check doubles as the NotFound gate.
        self.registry.fetch_owned(account_id, bucket_id).await?;

        let access_key = random_token(ACCESS_KEY_LEN, true);
        let secret_key = random_token(SECRET_KEY_LEN, false);

        let (id, created_at): (Uuid, OffsetDateTime) = sqlx::query_as(
            r#"
            INSERT INTO access_keys (bucket_id, access_key, secret_sha256, label)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at
            "#,
        )
        .bind(bucket_id)
        .bind(&access_key)
        .bind(sha256_hex(&secret_key))
        .bind(label)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            bucket_id = %bucket_id,
            access_key = %access_key,
            "Access key created"
        );

        Ok(CreatedAccessKey {
            id,
            bucket_id,
            access_key,
            secret_key,
            label: label.map(str::to_string),
            created_at,
        })
    }

    pub async fn list(&self, account_id: Uuid, bucket_id: Uuid) -> StorageResult<Vec<AccessKey>> {
        self.registry.fetch_owned(account_id, bucket_id).await?;

        let keys = sqlx::query_as(
            r#"
            SELECT id, bucket_id, access_key, label, created_at, last_used_at
            FROM access_keys
            WHERE bucket_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(bucket_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    pub async fn delete(
        &self,
        account_id: Uuid,
        bucket_id: Uuid,
        key_id: Uuid,
    ) -> StorageResult<()> {
        self.registry.fetch_owned(account_id, bucket_id).await?;

        let result = sqlx::query("DELETE FROM access_keys WHERE id = $1 AND bucket_id = $2")
            .bind(key_id)
            .bind(bucket_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::AccessKeyNotFound);
        }
        Ok(())
    }

    /// Signed data-plane URL for an owned, non-suspended bucket.
    pub async fn presign(
        &self,
        account_id: Uuid,
        bucket_id: Uuid,
        method: PresignMethod,
        object_key: &str,
        expiry_secs: u64,
    ) -> StorageResult<String> {
        let bucket = self.registry.fetch_owned(account_id, bucket_id).await?;
        if bucket.status() == BucketStatus::Suspended {
            return Err(StorageError::BucketSuspended);
        }

        let expiry = expiry_secs.min(PRESIGN_MAX_EXPIRY_SECS);
        self.store
            .presigned_url(method, &bucket.physical_name, object_key, expiry)
            .map_err(|e| StorageError::ExternalStore(e.to_string()))
    }
}
