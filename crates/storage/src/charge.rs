//! Charge workflow
//!
//! Per-bucket recurring charge attempted by the billing sweep. A successful
//! charge debits the monthly price and advances the billing date; a missed
//! charge drives the grace/suspend state machine. Exactly one grace period
//! (one day) is granted before suspension; suspension is terminal for
//! billing and only manual owner action resumes service.

use cirrus_shared::notify::{NotificationColor, Notifier};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use crate::error::{StorageError, StorageResult};
use crate::ledger::Ledger;
use crate::registry::{lock_bucket, BucketRegistry, BucketStatus, StorageBucket};

/// Length of one paid period.
pub const BILLING_CYCLE: Duration = Duration::days(30);

/// The single retry window granted after a missed charge.
pub const GRACE_RETRY: Duration = Duration::days(1);

/// What a missed charge does to a bucket, decided purely from its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapseAction {
    /// active → grace, retry in one day.
    EnterGrace,
    /// grace → suspended, auto-renew off, billing date cleared.
    Suspend,
    /// Already suspended: nothing to do.
    Ignore,
}

pub fn lapse_action(status: BucketStatus) -> LapseAction {
    match status {
        BucketStatus::Active => LapseAction::EnterGrace,
        BucketStatus::Grace => LapseAction::Suspend,
        BucketStatus::Suspended => LapseAction::Ignore,
    }
}

/// Result of one charge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Charged { next_billing_at: OffsetDateTime },
    EnteredGrace { retry_at: OffsetDateTime },
    Suspended,
    Skipped,
}

/// Tally of one sweep, for the worker's cycle log.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepSummary {
    pub due: usize,
    pub charged: usize,
    pub entered_grace: usize,
    pub suspended: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct ChargeRunner {
    pool: PgPool,
    registry: BucketRegistry,
    ledger: Ledger,
    notifier: Notifier,
}

impl ChargeRunner {
    pub fn new(pool: PgPool, notifier: Notifier) -> Self {
        Self {
            registry: BucketRegistry::new(pool.clone()),
            ledger: Ledger::new(pool.clone()),
            pool,
            notifier,
        }
    }

    /// Process every due bucket. Attempts are independent: one bucket's
    /// failure is logged and skipped, never aborting the sweep.
    pub async fn run_sweep(&self) -> StorageResult<SweepSummary> {
        let now = OffsetDateTime::now_utc();
        let due = self.registry.due_buckets(now).await?;

        let mut summary = SweepSummary {
            due: due.len(),
            ..SweepSummary::default()
        };

        for bucket in due {
            let bucket_id = bucket.id;
            match self.charge_bucket(&bucket, now).await {
                Ok(ChargeOutcome::Charged { .. }) => summary.charged += 1,
                Ok(ChargeOutcome::EnteredGrace { .. }) => summary.entered_grace += 1,
                Ok(ChargeOutcome::Suspended) => summary.suspended += 1,
                Ok(ChargeOutcome::Skipped) => {}
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(bucket_id = %bucket_id, error = %e, "Charge attempt failed");
                }
            }
        }

        tracing::info!(
            due = summary.due,
            charged = summary.charged,
            entered_grace = summary.entered_grace,
            suspended = summary.suspended,
            errors = summary.errors,
            "Billing sweep complete"
        );

        Ok(summary)
    }

    /// One charge attempt. The outer balance check is optimistic; the
    /// authoritative re-check happens under the account row lock inside
    /// the transaction, so a balance that changed in between routes to the
    /// state machine instead of double-charging.
    pub async fn charge_bucket(
        &self,
        bucket: &StorageBucket,
        now: OffsetDateTime,
    ) -> StorageResult<ChargeOutcome> {
        let balance = self.ledger.balance(bucket.account_id).await?;
        if balance < bucket.monthly_price {
            return self.handle_insufficient_funds(bucket, now).await;
        }

        let next_billing_at = now + BILLING_CYCLE;

        let mut tx = self.pool.begin().await?;
        lock_bucket(&mut tx, bucket.id).await?;

        let debit = Ledger::debit_in_tx(
            &mut tx,
            bucket.account_id,
            bucket.monthly_price,
            &format!("Monthly renewal for bucket {}", bucket.name),
        )
        .await;

        match debit {
            Ok(_) => {}
            Err(StorageError::InsufficientFunds { .. }) => {
                // Balance moved between the outer check and the lock.
                tx.rollback().await?;
                return self.handle_insufficient_funds(bucket, now).await;
            }
            Err(e) => return Err(e),
        }

        BucketRegistry::mark_charged_in_tx(&mut tx, bucket.id, now, next_billing_at).await?;
        tx.commit().await?;

        tracing::info!(
            bucket_id = %bucket.id,
            account_id = %bucket.account_id,
            amount = %bucket.monthly_price,
            next_billing_at = %next_billing_at,
            "Bucket renewed"
        );

        self.notifier
            .notify(
                bucket.account_id,
                "storage_payment_charged",
                "Storage renewed",
                &format!(
                    "Bucket \"{}\" renewed for {} ₽. Next charge on {}.",
                    bucket.name,
                    bucket.monthly_price,
                    next_billing_at.date()
                ),
                NotificationColor::Success,
            )
            .await;

        Ok(ChargeOutcome::Charged { next_billing_at })
    }

    /// The grace/suspend state machine for a missed charge.
    pub async fn handle_insufficient_funds(
        &self,
        bucket: &StorageBucket,
        now: OffsetDateTime,
    ) -> StorageResult<ChargeOutcome> {
        match lapse_action(bucket.status()) {
            LapseAction::Ignore => Ok(ChargeOutcome::Skipped),
            LapseAction::Suspend => {
                self.registry.mark_suspended(bucket.id).await?;

                tracing::warn!(
                    bucket_id = %bucket.id,
                    account_id = %bucket.account_id,
                    "Bucket suspended after grace period"
                );

                self.notifier
                    .notify(
                        bucket.account_id,
                        "storage_bucket_suspended",
                        "Bucket suspended",
                        &format!(
                            "Bucket \"{}\" was suspended: the renewal charge of {} ₽ failed twice. \
                             Top up your balance and re-enable the bucket to resume.",
                            bucket.name, bucket.monthly_price
                        ),
                        NotificationColor::Danger,
                    )
                    .await;

                Ok(ChargeOutcome::Suspended)
            }
            LapseAction::EnterGrace => {
                let retry_at = now + GRACE_RETRY;
                self.registry.mark_grace(bucket.id, retry_at).await?;

                tracing::warn!(
                    bucket_id = %bucket.id,
                    account_id = %bucket.account_id,
                    retry_at = %retry_at,
                    "Insufficient funds; bucket entered grace period"
                );

                self.notifier
                    .notify(
                        bucket.account_id,
                        "storage_payment_pending",
                        "Storage payment pending",
                        &format!(
                            "Could not charge {} ₽ for bucket \"{}\". The charge will be retried \
                             by {}; after that the bucket is suspended.",
                            bucket.monthly_price,
                            bucket.name,
                            retry_at.date()
                        ),
                        NotificationColor::Warning,
                    )
                    .await;

                Ok(ChargeOutcome::EnteredGrace { retry_at })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missed_charge_transitions() {
        assert_eq!(lapse_action(BucketStatus::Active), LapseAction::EnterGrace);
        assert_eq!(lapse_action(BucketStatus::Grace), LapseAction::Suspend);
        assert_eq!(lapse_action(BucketStatus::Suspended), LapseAction::Ignore);
    }

    #[test]
    fn billing_constants() {
        assert_eq!(BILLING_CYCLE, Duration::days(30));
        assert_eq!(GRACE_RETRY, Duration::days(1));
    }
}
