//! Account ledger
//!
//! Append-only transaction log plus a running balance per account. The
//! balance column is never written on its own: every mutation inserts a
//! ledger entry and updates the balance in the same transaction, holding
//! the account row lock so concurrent attempts against a stale balance
//! cannot both succeed.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Deposit,
    Withdrawal,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Deposit => "deposit",
            EntryType::Withdrawal => "withdrawal",
        }
    }
}

/// One immutable ledger record.
///
/// Invariant: `balance_after == balance_before + amount`, enforced by a
/// CHECK constraint and by construction here.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub entry_type: String,
    pub description: String,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub created_at: OffsetDateTime,
}

/// Ledger data access.
#[derive(Clone)]
pub struct Ledger {
    pool: PgPool,
}

impl Ledger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current balance. Fine for optimistic pre-checks; the authoritative
    /// read happens under the row lock in [`Ledger::debit_in_tx`].
    pub async fn balance(&self, account_id: Uuid) -> StorageResult<Decimal> {
        sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::AccountNotFound)
    }

    /// Credit an account (manual-check top-up). One transaction: row lock,
    /// entry insert, balance update.
    pub async fn deposit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> StorageResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;

        let balance_before = lock_balance(&mut tx, account_id).await?;
        let entry = append_entry(
            &mut tx,
            account_id,
            amount,
            EntryType::Deposit,
            description,
            balance_before,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            account_id = %account_id,
            amount = %amount,
            balance_after = %entry.balance_after,
            "Deposit recorded"
        );

        Ok(entry)
    }

    /// Authoritative debit inside a caller-owned transaction: re-read the
    /// balance under the row lock, fail with `InsufficientFunds` if still
    /// short, append a withdrawal entry and update the balance.
    ///
    /// The caller decides what else commits atomically with the debit
    /// (registry insert on creation, billing-date advance on renewal).
    pub async fn debit_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> StorageResult<LedgerEntry> {
        let balance_before = lock_balance(tx, account_id).await?;

        if balance_before < amount {
            return Err(StorageError::InsufficientFunds {
                required: amount,
                available: balance_before,
            });
        }

        append_entry(
            tx,
            account_id,
            -amount,
            EntryType::Withdrawal,
            description,
            balance_before,
        )
        .await
    }

    /// Newest-first audit listing.
    pub async fn entries(&self, account_id: Uuid, limit: i64) -> StorageResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as(
            r#"
            SELECT id, account_id, amount, entry_type, description,
                   balance_before, balance_after, created_at
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Audit invariant: replaying every entry must reproduce the stored
    /// balance exactly. Returns (replayed sum, stored balance).
    pub async fn replay_balance(&self, account_id: Uuid) -> StorageResult<(Decimal, Decimal)> {
        let stored = self.balance(account_id).await?;

        let replayed: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM ledger_entries WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((replayed, stored))
    }
}

/// `SELECT ... FOR UPDATE` on the account row; the lock linearizes all
/// balance mutations for this account until the transaction ends.
async fn lock_balance(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
) -> StorageResult<Decimal> {
    sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1 FOR UPDATE")
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StorageError::AccountNotFound)
}

async fn append_entry(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    amount: Decimal,
    entry_type: EntryType,
    description: &str,
    balance_before: Decimal,
) -> StorageResult<LedgerEntry> {
    let balance_after = balance_before + amount;

    let entry: LedgerEntry = sqlx::query_as(
        r#"
        INSERT INTO ledger_entries
            (account_id, amount, entry_type, description, balance_before, balance_after)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, account_id, amount, entry_type, description,
                  balance_before, balance_after, created_at
        "#,
    )
    .bind(account_id)
    .bind(amount)
    .bind(entry_type.as_str())
    .bind(description)
    .bind(balance_before)
    .bind(balance_after)
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query("UPDATE accounts SET balance = $2 WHERE id = $1")
        .bind(account_id)
        .bind(balance_after)
        .execute(&mut **tx)
        .await?;

    Ok(entry)
}
