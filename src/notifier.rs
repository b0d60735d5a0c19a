//! Outbound notification seam.
//!
//! Delivery is fire-and-forget: the engine calls `notify` and moves on,
//! and a delivery failure never affects a state transition. The webhook
//! implementation posts to an internal delivery service; the log
//! implementation is for local runs and tests.

use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::RiskError;

/// Category of an outbound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// A scheduled payment was collected.
    PaymentCollected,
    /// A collection attempt failed; retries remain.
    PaymentRetryScheduled,
    /// The borrower was blocked.
    BorrowerBlocked,
    /// Sent to the lender when their loan defaults.
    LenderDefaultNotice,
    /// Outstanding debt on a defaulted loan reached zero.
    DebtCleared,
    /// The post-clearance restriction window ended.
    RestrictionLifted,
    /// Urgent: a vouchee of this user defaulted.
    VouchDefaultAlert,
    /// A vouchee of this user completed a loan.
    VouchCompletionNotice,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PaymentCollected => "payment_collected",
            NotificationKind::PaymentRetryScheduled => "payment_retry_scheduled",
            NotificationKind::BorrowerBlocked => "borrower_blocked",
            NotificationKind::LenderDefaultNotice => "lender_default_notice",
            NotificationKind::DebtCleared => "debt_cleared",
            NotificationKind::RestrictionLifted => "restriction_lifted",
            NotificationKind::VouchDefaultAlert => "vouch_default_alert",
            NotificationKind::VouchCompletionNotice => "vouch_completion_notice",
        }
    }
}

/// Fire-and-forget notification delivery.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) -> Result<(), RiskError>;
}

/// Posts notifications to an internal delivery webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String) -> Result<Self, RiskError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                RiskError::GatewayError(format!("Failed to create notifier client: {}", e))
            })?;

        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) -> Result<(), RiskError> {
        let body = json!({
            "user_id": user_id,
            "type": kind.as_str(),
            "title": title,
            "message": message,
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RiskError::GatewayError(format!("Notification send failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RiskError::GatewayError(format!(
                "Notifier returned {}",
                response.status()
            )));
        }

        tracing::debug!("✓ Notification {} sent to user {}", kind.as_str(), user_id);
        Ok(())
    }
}

/// Log-only notifier for local runs and tests.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: &str,
        message: &str,
    ) -> Result<(), RiskError> {
        tracing::info!(
            "Notification [{}] for user {}: {}: {}",
            kind.as_str(),
            user_id,
            title,
            message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable_and_distinct() {
        let kinds = [
            NotificationKind::PaymentCollected,
            NotificationKind::PaymentRetryScheduled,
            NotificationKind::BorrowerBlocked,
            NotificationKind::LenderDefaultNotice,
            NotificationKind::DebtCleared,
            NotificationKind::RestrictionLifted,
            NotificationKind::VouchDefaultAlert,
            NotificationKind::VouchCompletionNotice,
        ];
        let mut seen: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), kinds.len());
    }
}
