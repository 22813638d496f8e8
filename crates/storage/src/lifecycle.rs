//! Bucket lifecycle engine
//!
//! Orchestrates creation, settings updates, rename, and deletion of
//! storage buckets, keeping the ledger, the registry row, and the external
//! physical bucket consistent. The ledger debit and the registry write
//! commit as one transaction; if that transaction fails after the external
//! bucket was created, compensating deletes remove the external resource
//! before the original error propagates. No external bucket survives
//! without a paid registry row, and no registry row exists without its
//! external bucket.

use std::sync::Arc;

use cirrus_shared::notify::{NotificationColor, Notifier};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::charge::BILLING_CYCLE;
use crate::error::{StorageError, StorageResult};
use crate::ledger::Ledger;
use crate::object_store::{
    count_usage, public_read_policy, scrub_bucket, ObjectStore, ObjectStoreError,
    REMOVE_BATCH_MAX,
};
use crate::plans::PlanCatalog;
use crate::registry::{
    lock_bucket, physical_bucket_name, validate_bucket_name, BucketRegistry, BucketStatus,
    NewBucket, StorageBucket,
};
use crate::usage::UsageSync;

/// Objects copied per listing page during a rename migration.
const MIGRATION_PAGE: usize = 250;

/// Creation parameters. Price is resolved from the plan catalog and fixed
/// on the row for the bucket's life.
#[derive(Debug, Clone)]
pub struct CreateBucketParams {
    pub name: String,
    pub plan: String,
    pub quota_gb: Option<i32>,
    pub region: String,
    pub storage_class: String,
    pub is_public: bool,
    pub versioning: bool,
}

/// Settings patch; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct UpdateSettingsParams {
    pub is_public: Option<bool>,
    pub versioning: Option<bool>,
    pub auto_renew: Option<bool>,
    pub storage_class: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct BucketLifecycle {
    pool: PgPool,
    registry: BucketRegistry,
    ledger: Ledger,
    store: Arc<dyn ObjectStore>,
    notifier: Notifier,
    plans: PlanCatalog,
    usage: UsageSync,
}

impl BucketLifecycle {
    pub fn new(pool: PgPool, store: Arc<dyn ObjectStore>, notifier: Notifier) -> Self {
        let registry = BucketRegistry::new(pool.clone());
        Self {
            usage: UsageSync::new(registry.clone(), store.clone()),
            registry,
            ledger: Ledger::new(pool.clone()),
            pool,
            store,
            notifier,
            plans: PlanCatalog::default(),
        }
    }

    pub fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    /// Provision a bucket and charge the first month.
    pub async fn create_bucket(
        &self,
        account_id: Uuid,
        params: CreateBucketParams,
    ) -> StorageResult<StorageBucket> {
        validate_bucket_name(&params.name)?;
        let plan = self.plans.resolve(&params.plan)?;
        let price = plan.monthly_price;
        let quota_gb = params.quota_gb.unwrap_or(plan.quota_gb);

        // A duplicate name would derive the physical name of the existing
        // live bucket; refuse before touching the external store so the
        // compensating path can never scrub a paid bucket.
        if self.name_taken(account_id, &params.name).await? {
            return Err(StorageError::BucketAlreadyExists(params.name));
        }

        // Optimistic pre-check; the authoritative one runs under the row
        // lock inside the transaction.
        let balance = self.ledger.balance(account_id).await?;
        if balance < price {
            return Err(StorageError::InsufficientFunds {
                required: price,
                available: balance,
            });
        }

        let physical_name = physical_bucket_name(account_id, &params.name);
        self.store
            .ensure_bucket(&physical_name, &params.region)
            .await
            .map_err(|e| StorageError::ExternalStore(e.to_string()))?;

        let now = OffsetDateTime::now_utc();
        let new_bucket = NewBucket {
            account_id,
            name: params.name.clone(),
            physical_name: physical_name.clone(),
            plan: plan.code.to_string(),
            quota_gb,
            region: params.region.clone(),
            storage_class: params.storage_class.clone(),
            is_public: params.is_public,
            versioning: params.versioning,
            monthly_price: price,
            next_billing_at: now + BILLING_CYCLE,
        };

        let bucket = match self.debit_and_register(&new_bucket, price).await {
            Ok(bucket) => bucket,
            Err(e) => {
                // The external bucket exists but nobody paid for it. Unless
                // the failure was a uniqueness conflict (the physical name
                // belongs to a concurrently created row), tear it down
                // before propagating the original error.
                if !is_unique_violation(&e) {
                    if let Err(cleanup) = scrub_bucket(self.store.as_ref(), &physical_name).await {
                        tracing::error!(
                            physical_name = %physical_name,
                            error = %cleanup,
                            "Compensating cleanup failed; external bucket may be orphaned"
                        );
                    }
                }
                return Err(e);
            }
        };

        // Best-effort: the bucket is usable with default policy if these
        // fail, so log and continue.
        self.apply_external_settings(&physical_name, params.is_public, params.versioning)
            .await;

        tracing::info!(
            bucket_id = %bucket.id,
            account_id = %account_id,
            plan = %bucket.plan,
            price = %price,
            "Bucket created"
        );

        self.notifier
            .notify(
                account_id,
                "storage_bucket_created",
                "Bucket created",
                &format!(
                    "Bucket \"{}\" is ready. {} ₽ charged; next renewal on {}.",
                    bucket.name,
                    price,
                    (now + BILLING_CYCLE).date()
                ),
                NotificationColor::Success,
            )
            .await;

        Ok(bucket)
    }

    /// The atomic unit of creation: authoritative balance re-check, debit,
    /// registry insert. All or nothing.
    async fn debit_and_register(
        &self,
        new_bucket: &NewBucket,
        price: rust_decimal::Decimal,
    ) -> StorageResult<StorageBucket> {
        let mut tx = self.pool.begin().await?;

        Ledger::debit_in_tx(
            &mut tx,
            new_bucket.account_id,
            price,
            &format!("New storage bucket {}", new_bucket.name),
        )
        .await?;

        let bucket = BucketRegistry::insert_in_tx(&mut tx, new_bucket).await?;
        tx.commit().await?;
        Ok(bucket)
    }

    /// Apply policy/versioning settings on the external bucket, update the
    /// registry, and migrate objects on a rename.
    pub async fn update_settings(
        &self,
        account_id: Uuid,
        bucket_id: Uuid,
        params: UpdateSettingsParams,
    ) -> StorageResult<StorageBucket> {
        let bucket = self.registry.fetch_owned(account_id, bucket_id).await?;

        let is_public = params.is_public.unwrap_or(bucket.is_public);
        let versioning = params.versioning.unwrap_or(bucket.versioning);
        let auto_renew = params.auto_renew.unwrap_or(bucket.auto_renew);
        let storage_class = params
            .storage_class
            .unwrap_or_else(|| bucket.storage_class.clone());

        // Rename first so policy changes land on the final physical name.
        let mut physical_name = bucket.physical_name.clone();
        let mut renamed = false;
        if let Some(new_name) = params.name.as_deref() {
            if new_name != bucket.name {
                physical_name = self.rename_bucket(&bucket, new_name).await?;
                renamed = true;
            }
        }

        if renamed {
            // The migrated bucket starts with default policy, so the
            // effective settings are reapplied wholesale. The rename itself
            // already committed; failures here are logged, not fatal.
            self.apply_external_settings(&physical_name, is_public, versioning)
                .await;
        } else {
            // External settings are applied before the registry write; a
            // failure here leaves the row untouched.
            if is_public != bucket.is_public {
                let policy = is_public.then(|| public_read_policy(&physical_name));
                self.store
                    .set_bucket_policy(&physical_name, policy.as_deref())
                    .await
                    .map_err(|e| StorageError::ExternalStore(e.to_string()))?;
            }
            if versioning != bucket.versioning {
                self.store
                    .set_bucket_versioning(&physical_name, versioning)
                    .await
                    .map_err(|e| StorageError::ExternalStore(e.to_string()))?;
            }
        }

        // Re-enabling auto-renew on a bucket with no billing date starts a
        // fresh cycle from now.
        let next_billing_at = if auto_renew && bucket.next_billing_at.is_none() {
            Some(OffsetDateTime::now_utc() + BILLING_CYCLE)
        } else {
            bucket.next_billing_at
        };

        self.registry
            .update_settings(
                bucket_id,
                is_public,
                versioning,
                &storage_class,
                auto_renew,
                next_billing_at,
            )
            .await?;

        self.registry.fetch_owned(account_id, bucket_id).await
    }

    /// Delete a bucket and everything it owns. Refuses non-empty buckets
    /// unless forced; no refund is issued for unused time.
    pub async fn delete_bucket(
        &self,
        account_id: Uuid,
        bucket_id: Uuid,
        force: bool,
    ) -> StorageResult<()> {
        let bucket = self.registry.fetch_owned(account_id, bucket_id).await?;

        let (_, object_count) = count_usage(self.store.as_ref(), &bucket.physical_name)
            .await
            .map_err(|e| StorageError::ExternalStore(e.to_string()))?;

        if object_count > 0 && !force {
            return Err(StorageError::BucketNotEmpty { object_count });
        }

        scrub_bucket(self.store.as_ref(), &bucket.physical_name)
            .await
            .map_err(|e| StorageError::ExternalStore(e.to_string()))?;

        // Access keys cascade with the row.
        self.registry.delete(bucket_id).await?;

        tracing::info!(
            bucket_id = %bucket_id,
            account_id = %account_id,
            forced = force,
            deleted_objects = object_count,
            "Bucket deleted"
        );

        self.notifier
            .notify(
                account_id,
                "storage_bucket_deleted",
                "Bucket deleted",
                &format!("Bucket \"{}\" and its access keys were deleted.", bucket.name),
                NotificationColor::Info,
            )
            .await;

        Ok(())
    }

    /// The manual action that ends a suspension: the owner pays one month
    /// up front and the bucket re-enters the billing cycle. Fails with
    /// `InsufficientFunds` if the balance still does not cover the price.
    pub async fn resume_bucket(
        &self,
        account_id: Uuid,
        bucket_id: Uuid,
    ) -> StorageResult<StorageBucket> {
        let bucket = self.registry.fetch_owned(account_id, bucket_id).await?;
        if bucket.status() != BucketStatus::Suspended {
            return Ok(bucket);
        }

        let now = OffsetDateTime::now_utc();
        let next_billing_at = now + BILLING_CYCLE;

        let mut tx = self.pool.begin().await?;
        lock_bucket(&mut tx, bucket_id).await?;
        Ledger::debit_in_tx(
            &mut tx,
            account_id,
            bucket.monthly_price,
            &format!("Reactivation of bucket {}", bucket.name),
        )
        .await?;
        BucketRegistry::mark_charged_in_tx(&mut tx, bucket_id, now, next_billing_at).await?;
        tx.commit().await?;

        tracing::info!(
            bucket_id = %bucket_id,
            account_id = %account_id,
            amount = %bucket.monthly_price,
            "Suspended bucket resumed"
        );

        self.notifier
            .notify(
                account_id,
                "storage_bucket_resumed",
                "Bucket resumed",
                &format!(
                    "Bucket \"{}\" is active again. {} ₽ charged; next renewal on {}.",
                    bucket.name,
                    bucket.monthly_price,
                    next_billing_at.date()
                ),
                NotificationColor::Success,
            )
            .await;

        self.registry.fetch_owned(account_id, bucket_id).await
    }

    /// Owner-scoped fetch with a usage refresh when the snapshot is stale.
    pub async fn get_bucket(
        &self,
        account_id: Uuid,
        bucket_id: Uuid,
    ) -> StorageResult<StorageBucket> {
        let bucket = self.registry.fetch_owned(account_id, bucket_id).await?;
        Ok(self.usage.refresh_if_stale(bucket).await)
    }

    pub async fn list_buckets(&self, account_id: Uuid) -> StorageResult<Vec<StorageBucket>> {
        let buckets = self.registry.list_owned(account_id).await?;
        let mut refreshed = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            refreshed.push(self.usage.refresh_if_stale(bucket).await);
        }
        Ok(refreshed)
    }

    async fn name_taken(&self, account_id: Uuid, name: &str) -> StorageResult<bool> {
        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM storage_buckets WHERE account_id = $1 AND name = $2",
        )
        .bind(account_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(existing.is_some())
    }

    async fn apply_external_settings(&self, physical_name: &str, is_public: bool, versioning: bool) {
        if is_public {
            let policy = public_read_policy(physical_name);
            if let Err(e) = self
                .store
                .set_bucket_policy(physical_name, Some(&policy))
                .await
            {
                tracing::warn!(
                    physical_name = %physical_name,
                    error = %e,
                    "Failed to apply public policy; bucket stays private"
                );
            }
        }
        if versioning {
            if let Err(e) = self.store.set_bucket_versioning(physical_name, true).await {
                tracing::warn!(
                    physical_name = %physical_name,
                    error = %e,
                    "Failed to enable versioning"
                );
            }
        }
    }

    // -------------------------------------------------------------------
    // Rename migration
    //
    // Copy-then-delete across two physical buckets cannot be transactional,
    // so the walk is journaled: a checkpoint row advances after every
    // object, and the worker resumes `running` jobs at startup. Re-copying
    // an already-migrated object is an idempotent overwrite.
    // -------------------------------------------------------------------

    /// Migrate the bucket's objects to the physical name derived from
    /// `new_name` and commit the rename. Returns the new physical name.
    async fn rename_bucket(
        &self,
        bucket: &StorageBucket,
        new_name: &str,
    ) -> StorageResult<String> {
        validate_bucket_name(new_name)?;
        if self.name_taken(bucket.account_id, new_name).await? {
            return Err(StorageError::BucketAlreadyExists(new_name.to_string()));
        }

        let target_physical = physical_bucket_name(bucket.account_id, new_name);
        let job_id = self
            .create_migration_job(bucket.id, &bucket.physical_name, &target_physical)
            .await?;

        self.run_migration(job_id, bucket, &bucket.physical_name, &target_physical)
            .await?;

        self.commit_rename(bucket.id, new_name, &target_physical)
            .await?;
        self.complete_migration_job(job_id).await?;

        tracing::info!(
            bucket_id = %bucket.id,
            from = %bucket.physical_name,
            to = %target_physical,
            "Bucket renamed"
        );

        Ok(target_physical)
    }

    /// The journaled copy walk. Lists the source repeatedly from the top:
    /// each migrated object is deleted from the source, so remaining work
    /// is always the head of the listing and a crashed walk resumes where
    /// it stopped.
    async fn run_migration(
        &self,
        job_id: Uuid,
        bucket: &StorageBucket,
        source: &str,
        target: &str,
    ) -> StorageResult<()> {
        let external = |e: crate::object_store::ObjectStoreError| {
            StorageError::ExternalStore(e.to_string())
        };

        self.store
            .ensure_bucket(target, &bucket.region)
            .await
            .map_err(external)?;

        loop {
            // A missing source means a previous walk already drained and
            // removed it; only the registry commit is left to redo.
            let page = match self
                .store
                .list_objects(source, "", None, MIGRATION_PAGE)
                .await
            {
                Ok(page) => page,
                Err(ObjectStoreError::BucketNotFound(_)) => return Ok(()),
                Err(e) => return Err(external(e)),
            };
            if page.objects.is_empty() {
                break;
            }

            for obj in page.objects {
                let data = self
                    .store
                    .get_object(source, &obj.key)
                    .await
                    .map_err(external)?;
                self.store
                    .put_object(target, &obj.key, data)
                    .await
                    .map_err(external)?;
                self.store
                    .remove_objects(source, std::slice::from_ref(&obj.key))
                    .await
                    .map_err(external)?;

                self.checkpoint_migration(job_id, &obj.key).await?;
            }
        }

        self.store.remove_bucket(source).await.map_err(external)?;
        Ok(())
    }

    /// Persist the rename under the per-bucket advisory lock so it cannot
    /// interleave with a charge transaction on the same row.
    async fn commit_rename(
        &self,
        bucket_id: Uuid,
        new_name: &str,
        target_physical: &str,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        lock_bucket(&mut tx, bucket_id).await?;
        sqlx::query(
            r#"
            UPDATE storage_buckets
            SET name = $2, physical_name = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(bucket_id)
        .bind(new_name)
        .bind(target_physical)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_migration_job(
        &self,
        bucket_id: Uuid,
        source: &str,
        target: &str,
    ) -> StorageResult<Uuid> {
        let job_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO bucket_migrations (bucket_id, source_physical, target_physical)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(bucket_id)
        .bind(source)
        .bind(target)
        .fetch_one(&self.pool)
        .await?;
        Ok(job_id)
    }

    async fn checkpoint_migration(&self, job_id: Uuid, key: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE bucket_migrations
            SET last_migrated_key = $2, migrated_objects = migrated_objects + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_migration_job(&self, job_id: Uuid) -> StorageResult<()> {
        sqlx::query(
            "UPDATE bucket_migrations SET status = 'completed', updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Pick up `running` migration jobs left behind by a crash and drive
    /// them to completion. Called by the worker at startup.
    pub async fn resume_incomplete_migrations(&self) -> StorageResult<usize> {
        let jobs: Vec<(Uuid, Uuid, String, String)> = sqlx::query_as(
            r#"
            SELECT id, bucket_id, source_physical, target_physical
            FROM bucket_migrations
            WHERE status = 'running'
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut resumed = 0;
        for (job_id, bucket_id, source, target) in jobs {
            let bucket: Option<StorageBucket> = sqlx::query_as(
                r#"
                SELECT id, account_id, name, physical_name, plan, quota_gb, region,
                       storage_class, is_public, versioning, monthly_price, status,
                       auto_renew, last_billed_at, next_billing_at, used_bytes,
                       object_count, usage_synced_at, created_at, updated_at
                FROM storage_buckets WHERE id = $1
                "#,
            )
            .bind(bucket_id)
            .fetch_optional(&self.pool)
            .await?;

            let Some(bucket) = bucket else {
                // Bucket deleted mid-migration; nothing left to move.
                self.fail_migration_job(job_id).await?;
                continue;
            };

            // The logical target name is recoverable from the derived
            // physical name.
            let Some((_, new_name)) = target.split_once('-') else {
                self.fail_migration_job(job_id).await?;
                continue;
            };

            match self.run_migration(job_id, &bucket, &source, &target).await {
                Ok(()) => {
                    self.commit_rename(bucket_id, new_name, &target).await?;
                    self.complete_migration_job(job_id).await?;
                    resumed += 1;
                    tracing::info!(
                        bucket_id = %bucket_id,
                        job_id = %job_id,
                        "Resumed and completed interrupted rename migration"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        bucket_id = %bucket_id,
                        job_id = %job_id,
                        error = %e,
                        "Failed to resume rename migration; will retry next start"
                    );
                }
            }
        }

        Ok(resumed)
    }

    async fn fail_migration_job(&self, job_id: Uuid) -> StorageResult<()> {
        sqlx::query(
            "UPDATE bucket_migrations SET status = 'failed', updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Postgres unique-violation detection (SQLSTATE 23505): distinguishes a
/// duplicate-name conflict, where the physical bucket must NOT be scrubbed,
/// from other transaction failures, where it must.
fn is_unique_violation(err: &StorageError) -> bool {
    if let StorageError::Database(sqlx::Error::Database(db)) = err {
        return db.code().as_deref() == Some("23505");
    }
    false
}

const _: () = {
    // A migration listing page must stay within the delete batch cap so a
    // page's worth of source deletes is always a single valid batch.
    assert!(MIGRATION_PAGE <= REMOVE_BATCH_MAX);
};
