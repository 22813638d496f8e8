//! Notification outbox
//!
//! User-facing notifications ("bucket created", "payment pending", ...) are
//! recorded as rows after the transaction that caused them commits. The
//! worker delivers undelivered rows to the configured webhook at-least-once.
//! Writing the row is best-effort from the caller's point of view: a failure
//! is logged and must never fail the operation that triggered it.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

/// Accent color the panel frontend renders the notification with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationColor {
    Info,
    Success,
    Warning,
    Danger,
}

impl NotificationColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationColor::Info => "info",
            NotificationColor::Success => "success",
            NotificationColor::Warning => "warning",
            NotificationColor::Danger => "danger",
        }
    }
}

/// A stored notification row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub color: String,
    pub delivered: bool,
    pub created_at: OffsetDateTime,
}

/// Outbox writer shared by the lifecycle engine and the charge workflow.
#[derive(Clone)]
pub struct Notifier {
    pool: PgPool,
}

impl Notifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a notification. Never fails the caller: errors are logged
    /// and swallowed.
    pub async fn notify(
        &self,
        account_id: Uuid,
        kind: &str,
        title: &str,
        message: &str,
        color: NotificationColor,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (account_id, kind, title, message, color)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(account_id)
        .bind(kind)
        .bind(title)
        .bind(message)
        .bind(color.as_str())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                account_id = %account_id,
                kind = kind,
                error = %e,
                "Failed to enqueue notification"
            );
        }
    }

    /// Fetch undelivered notifications, oldest first (worker delivery).
    pub async fn undelivered(&self, limit: i64) -> Result<Vec<Notification>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT id, account_id, kind, title, message, color, delivered, created_at
            FROM notifications
            WHERE NOT delivered
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Mark a notification delivered after the sink accepted it.
    pub async fn mark_delivered(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE notifications SET delivered = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_as_str_matches_serde() {
        assert_eq!(NotificationColor::Info.as_str(), "info");
        assert_eq!(NotificationColor::Success.as_str(), "success");
        assert_eq!(NotificationColor::Warning.as_str(), "warning");
        assert_eq!(NotificationColor::Danger.as_str(), "danger");
    }
}
