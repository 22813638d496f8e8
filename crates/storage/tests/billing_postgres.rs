// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Postgres integration tests for the lifecycle engine and charge workflow.
//!
//! These run against a real database. Set `DATABASE_URL` and run with:
//!
//! ```text
//! cargo test --test billing_postgres -- --ignored
//! ```
//!
//! The object store side uses the in-memory adapter so external-resource
//! invariants (no orphans, compensating deletes) can be asserted exactly.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use cirrus_shared::Notifier;
use cirrus_storage::{
    BucketStatus, ChargeOutcome, CreateBucketParams, Ledger, MemoryObjectStore, ObjectStore,
    StorageBucket, StorageError, StorageService, UpdateSettingsParams, BILLING_CYCLE,
};

async fn pool() -> sqlx::PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for these tests");
    let pool = cirrus_shared::create_pool(&url).await.expect("connect");
    cirrus_shared::run_migrations(&pool).await.expect("migrate");
    pool
}

async fn create_account(pool: &sqlx::PgPool, balance: Decimal) -> Uuid {
    sqlx::query_scalar("INSERT INTO accounts (email, balance) VALUES ($1, $2) RETURNING id")
        .bind(format!("test-{}@cirrus.test", Uuid::new_v4()))
        .bind(balance)
        .fetch_one(pool)
        .await
        .expect("insert account")
}

fn harness(pool: sqlx::PgPool) -> (StorageService, Arc<MemoryObjectStore>) {
    let store = Arc::new(MemoryObjectStore::new());
    let notifier = Notifier::new(pool.clone());
    let service = StorageService::new(pool, store.clone(), notifier);
    (service, store)
}

fn default_params(name: &str) -> CreateBucketParams {
    CreateBucketParams {
        name: name.to_string(),
        plan: "s3-50".to_string(),
        quota_gb: None,
        region: "ru-1".to_string(),
        storage_class: "standard".to_string(),
        is_public: false,
        versioning: false,
    }
}

/// Force a bucket's billing date into the past so the sweep picks it up.
async fn make_due(pool: &sqlx::PgPool, bucket_id: Uuid) {
    sqlx::query("UPDATE storage_buckets SET next_billing_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(bucket_id)
        .execute(pool)
        .await
        .expect("backdate billing");
}

async fn reload(pool: &sqlx::PgPool, bucket_id: Uuid) -> StorageBucket {
    sqlx::query_as(
        r#"
        SELECT id, account_id, name, physical_name, plan, quota_gb, region, storage_class,
               is_public, versioning, monthly_price, status, auto_renew,
               last_billed_at, next_billing_at, used_bytes, object_count, usage_synced_at,
               created_at, updated_at
        FROM storage_buckets WHERE id = $1
        "#,
    )
    .bind(bucket_id)
    .fetch_one(pool)
    .await
    .expect("reload bucket")
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn create_debits_exactly_the_price() {
    let pool = pool().await;
    let (service, store) = harness(pool.clone());
    let account = create_account(&pool, dec!(500)).await;

    let bucket = service
        .lifecycle
        .create_bucket(account, default_params("backups"))
        .await
        .unwrap();

    assert_eq!(bucket.monthly_price, dec!(199));
    assert_eq!(bucket.status(), BucketStatus::Active);
    assert!(bucket.auto_renew);
    let next = bucket.next_billing_at.expect("billing date set");
    let drift = (next - (OffsetDateTime::now_utc() + BILLING_CYCLE)).abs();
    assert!(drift < Duration::minutes(1), "billing date ~now+30d");

    let ledger = Ledger::new(pool.clone());
    assert_eq!(ledger.balance(account).await.unwrap(), dec!(301));

    let entries = ledger.entries(account, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, "withdrawal");
    assert_eq!(entries[0].amount, dec!(-199));

    // Exactly one live external bucket.
    assert!(store.has_bucket(&bucket.physical_name).await);
    assert_eq!(store.bucket_count().await, 1);
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn create_with_short_balance_leaves_nothing_behind() {
    let pool = pool().await;
    let (service, store) = harness(pool.clone());
    let account = create_account(&pool, dec!(100)).await;

    let err = service
        .lifecycle
        .create_bucket(account, default_params("poor"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InsufficientFunds { .. }));

    // Pre-check fires before the external create: zero buckets, zero rows,
    // untouched balance.
    assert_eq!(store.bucket_count().await, 0);
    let ledger = Ledger::new(pool.clone());
    assert_eq!(ledger.balance(account).await.unwrap(), dec!(100));
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM storage_buckets WHERE account_id = $1")
            .bind(account)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn concurrent_spend_never_leaves_an_orphan_bucket() {
    let pool = pool().await;
    let (service, store) = harness(pool.clone());
    let account = create_account(&pool, dec!(250)).await;
    let ledger = Ledger::new(pool.clone());

    // Drain the account concurrently with the create. The account row lock
    // serializes the two debits; whichever loses the race, the invariant
    // must hold: a registry row exists iff its external bucket does, and
    // the ledger replays to the stored balance.
    let drain_pool = pool.clone();
    let drainer = tokio::spawn(async move {
        let mut tx = drain_pool.begin().await.unwrap();
        let outcome = Ledger::debit_in_tx(&mut tx, account, dec!(200), "concurrent spend").await;
        tx.commit().await.unwrap();
        outcome.is_ok()
    });

    let result = service
        .lifecycle
        .create_bucket(account, default_params("raced"))
        .await;
    drainer.await.unwrap();

    match result {
        Ok(bucket) => {
            assert!(store.has_bucket(&bucket.physical_name).await);
            assert_eq!(store.bucket_count().await, 1);
        }
        Err(e) => {
            assert!(matches!(e, StorageError::InsufficientFunds { .. }));
            // Compensating cleanup: the external bucket (if it was created
            // before the authoritative check failed) is gone.
            assert_eq!(store.bucket_count().await, 0);
        }
    }

    let (replayed, stored) = ledger.replay_balance(account).await.unwrap();
    assert_eq!(replayed, stored);
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn charge_renews_a_funded_bucket() {
    let pool = pool().await;
    let (service, _store) = harness(pool.clone());
    let account = create_account(&pool, dec!(500)).await;

    let bucket = service
        .lifecycle
        .create_bucket(account, default_params("renewme"))
        .await
        .unwrap();
    make_due(&pool, bucket.id).await;

    let summary = service.charges.run_sweep().await.unwrap();
    assert_eq!(summary.charged, 1);
    assert_eq!(summary.errors, 0);

    let after = reload(&pool, bucket.id).await;
    assert_eq!(after.status(), BucketStatus::Active);
    let next = after.next_billing_at.unwrap();
    assert!(next > OffsetDateTime::now_utc() + Duration::days(29));

    // 500 - 199 (create) - 199 (renewal) = 102
    let ledger = Ledger::new(pool.clone());
    assert_eq!(ledger.balance(account).await.unwrap(), dec!(102));
    let (replayed, stored) = ledger.replay_balance(account).await.unwrap();
    assert_eq!(replayed, stored);
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn missed_charges_walk_grace_then_suspension() {
    let pool = pool().await;
    let (service, _store) = harness(pool.clone());
    // Covers the full scenario: 500 ₽, create at 199 ₽ leaves 301; drain to
    // 50 so renewal fails.
    let account = create_account(&pool, dec!(500)).await;

    let bucket = service
        .lifecycle
        .create_bucket(account, default_params("lapsing"))
        .await
        .unwrap();
    {
        let mut tx = pool.begin().await.unwrap();
        Ledger::debit_in_tx(&mut tx, account, dec!(251), "drain to 50")
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    // First miss: active -> grace, retry in one day, balance untouched.
    make_due(&pool, bucket.id).await;
    let now = OffsetDateTime::now_utc();
    let outcome = service
        .charges
        .charge_bucket(&reload(&pool, bucket.id).await, now)
        .await
        .unwrap();
    assert!(matches!(outcome, ChargeOutcome::EnteredGrace { .. }));

    let after = reload(&pool, bucket.id).await;
    assert_eq!(after.status(), BucketStatus::Grace);
    let retry = after.next_billing_at.unwrap();
    assert!((retry - (now + Duration::days(1))).abs() < Duration::minutes(1));

    let ledger = Ledger::new(pool.clone());
    assert_eq!(ledger.balance(account).await.unwrap(), dec!(50));

    // Second miss: grace -> suspended, auto-renew off, no billing date.
    let outcome = service
        .charges
        .charge_bucket(&after, now + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(outcome, ChargeOutcome::Suspended);

    let after = reload(&pool, bucket.id).await;
    assert_eq!(after.status(), BucketStatus::Suspended);
    assert!(!after.auto_renew);
    assert!(after.next_billing_at.is_none());
    assert_eq!(ledger.balance(account).await.unwrap(), dec!(50));

    // Third attempt: suspended is terminal, nothing changes.
    let outcome = service
        .charges
        .charge_bucket(&after, now + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(outcome, ChargeOutcome::Skipped);
    let entries = Ledger::new(pool.clone()).entries(account, 50).await.unwrap();
    // create + drain only; the misses wrote nothing.
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn resume_charges_and_reactivates_a_suspended_bucket() {
    let pool = pool().await;
    let (service, _store) = harness(pool.clone());
    let account = create_account(&pool, dec!(500)).await;

    let bucket = service
        .lifecycle
        .create_bucket(account, default_params("comeback"))
        .await
        .unwrap();
    sqlx::query(
        "UPDATE storage_buckets SET status = 'suspended', auto_renew = FALSE, next_billing_at = NULL WHERE id = $1",
    )
    .bind(bucket.id)
    .execute(&pool)
    .await
    .unwrap();

    let resumed = service
        .lifecycle
        .resume_bucket(account, bucket.id)
        .await
        .unwrap();
    assert_eq!(resumed.status(), BucketStatus::Active);
    assert!(resumed.auto_renew);
    assert!(resumed.next_billing_at.is_some());

    // 500 - 199 (create) - 199 (resume) = 102
    let ledger = Ledger::new(pool.clone());
    assert_eq!(ledger.balance(account).await.unwrap(), dec!(102));

    // Resuming an active bucket is a no-op with no extra charge.
    let again = service
        .lifecycle
        .resume_bucket(account, bucket.id)
        .await
        .unwrap();
    assert_eq!(again.status(), BucketStatus::Active);
    assert_eq!(ledger.balance(account).await.unwrap(), dec!(102));
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn delete_respects_force_semantics() {
    let pool = pool().await;
    let (service, store) = harness(pool.clone());
    let account = create_account(&pool, dec!(500)).await;

    let bucket = service
        .lifecycle
        .create_bucket(account, default_params("todelete"))
        .await
        .unwrap();
    service
        .access_keys
        .create(account, bucket.id, Some("ci"))
        .await
        .unwrap();

    store
        .put_object(&bucket.physical_name, "keep.bin", bytes::Bytes::from_static(b"data"))
        .await
        .unwrap();

    let err = service
        .lifecycle
        .delete_bucket(account, bucket.id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::BucketNotEmpty { object_count: 1 }));
    assert!(store.has_bucket(&bucket.physical_name).await);

    service
        .lifecycle
        .delete_bucket(account, bucket.id, true)
        .await
        .unwrap();
    assert_eq!(store.bucket_count().await, 0);

    let keys: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM access_keys WHERE bucket_id = $1")
        .bind(bucket.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(keys, 0, "access keys cascade with the bucket");
    assert!(matches!(
        service.lifecycle.get_bucket(account, bucket.id).await,
        Err(StorageError::BucketNotFound)
    ));
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn rename_migrates_objects_and_reapplies_settings() {
    let pool = pool().await;
    let (service, store) = harness(pool.clone());
    let account = create_account(&pool, dec!(500)).await;

    let mut params = default_params("oldname");
    params.is_public = true;
    let bucket = service.lifecycle.create_bucket(account, params).await.unwrap();

    for i in 0..10 {
        store
            .put_object(
                &bucket.physical_name,
                &format!("obj-{i}"),
                bytes::Bytes::from(vec![i as u8; 100]),
            )
            .await
            .unwrap();
    }

    let updated = service
        .lifecycle
        .update_settings(
            account,
            bucket.id,
            UpdateSettingsParams {
                name: Some("newname".to_string()),
                ..UpdateSettingsParams::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "newname");
    assert_ne!(updated.physical_name, bucket.physical_name);
    assert!(!store.has_bucket(&bucket.physical_name).await, "source removed");
    assert!(store.has_bucket(&updated.physical_name).await);

    let (bytes_used, count) =
        cirrus_storage::count_usage(store.as_ref(), &updated.physical_name)
            .await
            .unwrap();
    assert_eq!(count, 10);
    assert_eq!(bytes_used, 1000);

    let job: (String, i64) = sqlx::query_as(
        "SELECT status, migrated_objects FROM bucket_migrations WHERE bucket_id = $1",
    )
    .bind(bucket.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(job.0, "completed");
    assert_eq!(job.1, 10);

    // The public policy followed the bucket onto its new physical name.
    assert!(store.policy_of(&updated.physical_name).await.is_some());
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn interrupted_rename_resumes_at_startup() {
    let pool = pool().await;
    let (service, store) = harness(pool.clone());
    let account = create_account(&pool, dec!(500)).await;

    let bucket = service
        .lifecycle
        .create_bucket(account, default_params("srcname"))
        .await
        .unwrap();
    for i in 0..6 {
        store
            .put_object(
                &bucket.physical_name,
                &format!("o{i}"),
                bytes::Bytes::from(vec![0u8; 10]),
            )
            .await
            .unwrap();
    }

    // Simulate a crash mid-rename: the journal row exists, two objects
    // already moved, the registry still carries the old names.
    let target = cirrus_storage::physical_bucket_name(account, "dstname");
    sqlx::query(
        r#"
        INSERT INTO bucket_migrations
            (bucket_id, source_physical, target_physical, last_migrated_key, migrated_objects)
        VALUES ($1, $2, $3, 'o1', 2)
        "#,
    )
    .bind(bucket.id)
    .bind(&bucket.physical_name)
    .bind(&target)
    .execute(&pool)
    .await
    .unwrap();

    store.ensure_bucket(&target, "ru-1").await.unwrap();
    for key in ["o0", "o1"] {
        let data = store.get_object(&bucket.physical_name, key).await.unwrap();
        store.put_object(&target, key, data).await.unwrap();
        store
            .remove_objects(&bucket.physical_name, &[key.to_string()])
            .await
            .unwrap();
    }

    // Worker startup picks the job up and drives it to completion.
    let resumed = service.lifecycle.resume_incomplete_migrations().await.unwrap();
    assert_eq!(resumed, 1);

    let after = reload(&pool, bucket.id).await;
    assert_eq!(after.name, "dstname");
    assert_eq!(after.physical_name, target);
    assert!(!store.has_bucket(&bucket.physical_name).await);

    let (_, count) = cirrus_storage::count_usage(store.as_ref(), &target)
        .await
        .unwrap();
    assert_eq!(count, 6, "every object survived the interrupted rename");

    let status: String =
        sqlx::query_scalar("SELECT status FROM bucket_migrations WHERE bucket_id = $1")
            .bind(bucket.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "completed");
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn auto_renew_reenable_assigns_a_billing_date() {
    let pool = pool().await;
    let (service, _store) = harness(pool.clone());
    let account = create_account(&pool, dec!(500)).await;

    let bucket = service
        .lifecycle
        .create_bucket(account, default_params("renewflip"))
        .await
        .unwrap();

    // Simulate a suspended bucket with no billing date.
    sqlx::query(
        "UPDATE storage_buckets SET status = 'suspended', auto_renew = FALSE, next_billing_at = NULL WHERE id = $1",
    )
    .bind(bucket.id)
    .execute(&pool)
    .await
    .unwrap();

    let updated = service
        .lifecycle
        .update_settings(
            account,
            bucket.id,
            UpdateSettingsParams {
                auto_renew: Some(true),
                ..UpdateSettingsParams::default()
            },
        )
        .await
        .unwrap();

    assert!(updated.auto_renew);
    let next = updated.next_billing_at.expect("fresh billing date assigned");
    assert!(next > OffsetDateTime::now_utc() + Duration::days(29));
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn usage_sync_snapshots_the_listing() {
    let pool = pool().await;
    let (service, store) = harness(pool.clone());
    let account = create_account(&pool, dec!(500)).await;

    let bucket = service
        .lifecycle
        .create_bucket(account, default_params("usage"))
        .await
        .unwrap();
    for i in 0..4 {
        store
            .put_object(
                &bucket.physical_name,
                &format!("f{i}"),
                bytes::Bytes::from(vec![0u8; 256]),
            )
            .await
            .unwrap();
    }

    // get_bucket refreshes because creation never synced usage.
    let fetched = service.lifecycle.get_bucket(account, bucket.id).await.unwrap();
    assert_eq!(fetched.object_count, 4);
    assert_eq!(fetched.used_bytes, 1024);
    assert!(fetched.usage_synced_at.is_some());
}

#[tokio::test]
#[ignore] // Run with --ignored against DATABASE_URL
async fn ledger_replay_matches_stored_balance() {
    let pool = pool().await;
    let ledger = Ledger::new(pool.clone());
    let account = create_account(&pool, dec!(0)).await;

    ledger.deposit(account, dec!(1000), "manual check #1").await.unwrap();
    {
        let mut tx = pool.begin().await.unwrap();
        Ledger::debit_in_tx(&mut tx, account, dec!(199), "bucket").await.unwrap();
        tx.commit().await.unwrap();
    }
    ledger.deposit(account, dec!(250.50), "manual check #2").await.unwrap();

    let (replayed, stored) = ledger.replay_balance(account).await.unwrap();
    assert_eq!(replayed, stored);
    assert_eq!(stored, dec!(1051.50));

    // Entries carry a consistent before/after chain.
    let mut entries = ledger.entries(account, 10).await.unwrap();
    entries.reverse();
    let mut running = dec!(0);
    for entry in entries {
        assert_eq!(entry.balance_before, running);
        assert_eq!(entry.balance_after, running + entry.amount);
        running = entry.balance_after;
    }
    assert_eq!(running, dec!(1051.50));
}
