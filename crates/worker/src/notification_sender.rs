//! Notification outbox delivery
//!
//! Drains undelivered notification rows and pushes them to the configured
//! webhook sink (the panel's push/email fan-out service). Delivery is
//! at-least-once: a row is only marked delivered after the sink accepted
//! it, and failures are retried on the next tick.

use cirrus_shared::Notifier;
use tracing::{error, info};

const DELIVERY_BATCH: i64 = 100;

pub async fn deliver_pending(
    notifier: &Notifier,
    http_client: &reqwest::Client,
    webhook_url: Option<&str>,
) {
    let pending = match notifier.undelivered(DELIVERY_BATCH).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "Failed to fetch undelivered notifications");
            return;
        }
    };

    if pending.is_empty() {
        return;
    }

    let total = pending.len();
    let mut delivered = 0;
    let mut failed = 0;

    for notification in pending {
        let accepted = match webhook_url {
            // No sink configured: the panel frontend reads the rows
            // directly, so they count as delivered.
            None => true,
            Some(url) => match http_client.post(url).json(&notification).send().await {
                Ok(response) if response.status().is_success() => true,
                Ok(response) => {
                    error!(
                        notification_id = %notification.id,
                        status = %response.status(),
                        "Notification sink rejected delivery"
                    );
                    false
                }
                Err(e) => {
                    error!(
                        notification_id = %notification.id,
                        error = %e,
                        "Notification delivery failed"
                    );
                    false
                }
            },
        };

        if accepted {
            match notifier.mark_delivered(notification.id).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    // The sink saw it but the mark failed; the retry next
                    // tick makes delivery at-least-once, not exactly-once.
                    error!(
                        notification_id = %notification.id,
                        error = %e,
                        "Failed to mark notification delivered"
                    );
                    failed += 1;
                }
            }
        } else {
            failed += 1;
        }
    }

    info!(
        total = total,
        delivered = delivered,
        failed = failed,
        "Notification delivery cycle complete"
    );
}
