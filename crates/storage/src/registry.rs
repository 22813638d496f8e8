//! Bucket registry
//!
//! Durable record per logical storage bucket. A registry row and its
//! physical bucket on the storage backend are kept 1:1 by the lifecycle
//! engine's compensating actions; nothing else writes these rows except
//! the charge workflow (status/billing fields) and usage sync (snapshot
//! fields).

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

pub const BUCKET_NAME_MIN_LEN: usize = 3;
pub const BUCKET_NAME_MAX_LEN: usize = 63;

/// Billing state of a bucket.
///
/// active → grace on a missed charge (one retry a day later), grace →
/// suspended on the second miss. Suspended is terminal for billing and
/// requires manual owner action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketStatus {
    Active,
    Grace,
    Suspended,
}

impl BucketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketStatus::Active => "active",
            BucketStatus::Grace => "grace",
            BucketStatus::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(BucketStatus::Active),
            "grace" => Some(BucketStatus::Grace),
            "suspended" => Some(BucketStatus::Suspended),
            _ => None,
        }
    }
}

/// One registry row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StorageBucket {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub physical_name: String,
    pub plan: String,
    pub quota_gb: i32,
    pub region: String,
    pub storage_class: String,
    pub is_public: bool,
    pub versioning: bool,
    pub monthly_price: Decimal,
    pub status: String,
    pub auto_renew: bool,
    pub last_billed_at: Option<OffsetDateTime>,
    pub next_billing_at: Option<OffsetDateTime>,
    pub used_bytes: i64,
    pub object_count: i64,
    pub usage_synced_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl StorageBucket {
    pub fn status(&self) -> BucketStatus {
        // The column has a CHECK constraint; anything else is a migration bug.
        BucketStatus::parse(&self.status).unwrap_or(BucketStatus::Suspended)
    }
}

/// Fields fixed at creation time.
#[derive(Debug, Clone)]
pub struct NewBucket {
    pub account_id: Uuid,
    pub name: String,
    pub physical_name: String,
    pub plan: String,
    pub quota_gb: i32,
    pub region: String,
    pub storage_class: String,
    pub is_public: bool,
    pub versioning: bool,
    pub monthly_price: Decimal,
    pub next_billing_at: OffsetDateTime,
}

/// Derive the physical bucket name from (owner, logical name).
///
/// Deterministic so re-running a half-finished creation converges on the
/// same external resource instead of leaking a second one.
pub fn physical_bucket_name(account_id: Uuid, name: &str) -> String {
    let owner = account_id.simple().to_string();
    format!("c{}-{}", &owner[..12], name)
}

/// S3-ish logical name rules: 3-63 chars, lowercase letters, digits and
/// hyphens, no leading/trailing hyphen.
pub fn validate_bucket_name(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| StorageError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, and hyphens",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("cannot begin or end with a hyphen"));
    }
    Ok(())
}

/// Serialize a bucket id into the advisory-lock keyspace.
fn advisory_key(bucket_id: Uuid) -> i64 {
    let bytes = bucket_id.as_bytes();
    i64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Take the per-bucket advisory transaction lock. Held until commit or
/// rollback; serializes lifecycle mutations against the billing sweep for
/// the same bucket.
pub async fn lock_bucket(tx: &mut Transaction<'_, Postgres>, bucket_id: Uuid) -> StorageResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(advisory_key(bucket_id))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

const BUCKET_COLUMNS: &str = r#"
    id, account_id, name, physical_name, plan, quota_gb, region, storage_class,
    is_public, versioning, monthly_price, status, auto_renew,
    last_billed_at, next_billing_at, used_bytes, object_count, usage_synced_at,
    created_at, updated_at
"#;

/// Registry data access.
#[derive(Clone)]
pub struct BucketRegistry {
    pool: PgPool,
}

impl BucketRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert inside the creation transaction, atomically with the debit.
    pub async fn insert_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        bucket: &NewBucket,
    ) -> StorageResult<StorageBucket> {
        let row = sqlx::query_as(&format!(
            r#"
            INSERT INTO storage_buckets
                (account_id, name, physical_name, plan, quota_gb, region, storage_class,
                 is_public, versioning, monthly_price, status, auto_renew,
                 last_billed_at, next_billing_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'active', TRUE, NOW(), $11)
            RETURNING {BUCKET_COLUMNS}
            "#
        ))
        .bind(bucket.account_id)
        .bind(&bucket.name)
        .bind(&bucket.physical_name)
        .bind(&bucket.plan)
        .bind(bucket.quota_gb)
        .bind(&bucket.region)
        .bind(&bucket.storage_class)
        .bind(bucket.is_public)
        .bind(bucket.versioning)
        .bind(bucket.monthly_price)
        .bind(bucket.next_billing_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    /// Owner-scoped lookup; a miss or another owner's bucket is the same
    /// `BucketNotFound` (no cross-owner visibility).
    pub async fn fetch_owned(
        &self,
        account_id: Uuid,
        bucket_id: Uuid,
    ) -> StorageResult<StorageBucket> {
        sqlx::query_as(&format!(
            "SELECT {BUCKET_COLUMNS} FROM storage_buckets WHERE id = $1 AND account_id = $2"
        ))
        .bind(bucket_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::BucketNotFound)
    }

    pub async fn list_owned(&self, account_id: Uuid) -> StorageResult<Vec<StorageBucket>> {
        let rows = sqlx::query_as(&format!(
            "SELECT {BUCKET_COLUMNS} FROM storage_buckets WHERE account_id = $1 ORDER BY created_at"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The billing sweep's work list: renewing buckets whose billing date
    /// has passed. No cross-owner ordering is guaranteed or required.
    pub async fn due_buckets(&self, now: OffsetDateTime) -> StorageResult<Vec<StorageBucket>> {
        let rows = sqlx::query_as(&format!(
            r#"
            SELECT {BUCKET_COLUMNS}
            FROM storage_buckets
            WHERE auto_renew
              AND status IN ('active', 'grace')
              AND next_billing_at IS NOT NULL
              AND next_billing_at <= $1
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Persist settings changes (policy fields and auto-renew).
    pub async fn update_settings(
        &self,
        bucket_id: Uuid,
        is_public: bool,
        versioning: bool,
        storage_class: &str,
        auto_renew: bool,
        next_billing_at: Option<OffsetDateTime>,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE storage_buckets
            SET is_public = $2, versioning = $3, storage_class = $4,
                auto_renew = $5, next_billing_at = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(bucket_id)
        .bind(is_public)
        .bind(versioning)
        .bind(storage_class)
        .bind(auto_renew)
        .bind(next_billing_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove the registry row; access keys cascade.
    pub async fn delete(&self, bucket_id: Uuid) -> StorageResult<()> {
        sqlx::query("DELETE FROM storage_buckets WHERE id = $1")
            .bind(bucket_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Charge success, inside the charge transaction: back to active with
    /// billing dates advanced.
    pub async fn mark_charged_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        bucket_id: Uuid,
        now: OffsetDateTime,
        next_billing_at: OffsetDateTime,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE storage_buckets
            SET status = 'active', auto_renew = TRUE,
                last_billed_at = $2, next_billing_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(bucket_id)
        .bind(now)
        .bind(next_billing_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Missed charge on an active bucket: one retry window.
    pub async fn mark_grace(&self, bucket_id: Uuid, retry_at: OffsetDateTime) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE storage_buckets
            SET status = 'grace', next_billing_at = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(bucket_id)
        .bind(retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Missed charge in grace: terminal for billing.
    pub async fn mark_suspended(&self, bucket_id: Uuid) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE storage_buckets
            SET status = 'suspended', auto_renew = FALSE,
                next_billing_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(bucket_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a usage snapshot.
    pub async fn set_usage(
        &self,
        bucket_id: Uuid,
        used_bytes: i64,
        object_count: i64,
        synced_at: OffsetDateTime,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE storage_buckets
            SET used_bytes = $2, object_count = $3, usage_synced_at = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(bucket_id)
        .bind(used_bytes)
        .bind(object_count)
        .bind(synced_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_name_is_deterministic() {
        let owner = Uuid::new_v4();
        let a = physical_bucket_name(owner, "backups");
        let b = physical_bucket_name(owner, "backups");
        assert_eq!(a, b);
        assert!(a.ends_with("-backups"));
        assert!(a.starts_with('c'));
    }

    #[test]
    fn physical_name_differs_per_owner() {
        let name = "backups";
        let a = physical_bucket_name(Uuid::new_v4(), name);
        let b = physical_bucket_name(Uuid::new_v4(), name);
        assert_ne!(a, b);
    }

    #[test]
    fn valid_names_pass() {
        for name in ["abc", "my-bucket", "b-2024", "a1b2c3"] {
            assert!(validate_bucket_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn invalid_names_fail() {
        for name in ["ab", "UPPER", "under_score", "-lead", "trail-", "dots.bad"] {
            assert!(
                validate_bucket_name(name).is_err(),
                "{name} should be invalid"
            );
        }
        let long = "a".repeat(64);
        assert!(validate_bucket_name(&long).is_err());
    }

    #[test]
    fn status_round_trip() {
        for status in [
            BucketStatus::Active,
            BucketStatus::Grace,
            BucketStatus::Suspended,
        ] {
            assert_eq!(BucketStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BucketStatus::parse("deleted"), None);
    }

    #[test]
    fn advisory_key_is_stable() {
        let id = Uuid::new_v4();
        assert_eq!(advisory_key(id), advisory_key(id));
    }
}
