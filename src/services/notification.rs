use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationType {
    PaymentSucceeded,
    PaymentFailed,
    PaymentRefunded,
    DriverCredited,
    SettlementFailed,
    ClawbackFailed,
}

/// Payload handed to a [`Notifier`]
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub notification_type: NotificationType,
    pub user_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub amount: Option<BigDecimal>,
    pub message: String,
}

impl Notification {
    pub fn new(notification_type: NotificationType, user_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            notification_type,
            user_id,
            payment_id: None,
            amount: None,
            message: message.into(),
        }
    }

    pub fn for_payment(mut self, payment_id: Uuid) -> Self {
        self.payment_id = Some(payment_id);
        self
    }

    pub fn with_amount(mut self, amount: BigDecimal) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// Outbound user and operator notifications. Delivery is fire-and-forget:
/// implementations swallow their own failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for NotificationService {
    async fn notify(&self, n: Notification) {
        let payment_id = n.payment_id.map(|id| id.to_string()).unwrap_or_default();
        let amount = n.amount.as_ref().map(|a| a.to_string()).unwrap_or_default();

        match n.notification_type {
            NotificationType::PaymentSucceeded => {
                info!(
                    user_id = %n.user_id,
                    payment_id = %payment_id,
                    amount = %amount,
                    "🔔 NOTIFICATION: Payment Succeeded - {}", n.message
                );
            }
            NotificationType::PaymentFailed => {
                warn!(
                    user_id = %n.user_id,
                    payment_id = %payment_id,
                    "🔔 NOTIFICATION: Payment Failed - {}", n.message
                );
            }
            NotificationType::PaymentRefunded => {
                info!(
                    user_id = %n.user_id,
                    payment_id = %payment_id,
                    amount = %amount,
                    "🔔 NOTIFICATION: Payment Refunded - {}", n.message
                );
            }
            NotificationType::DriverCredited => {
                info!(
                    user_id = %n.user_id,
                    payment_id = %payment_id,
                    amount = %amount,
                    "🔔 NOTIFICATION: Earnings Credited - {}", n.message
                );
            }
            NotificationType::SettlementFailed | NotificationType::ClawbackFailed => {
                error!(
                    user_id = %n.user_id,
                    payment_id = %payment_id,
                    amount = %amount,
                    kind = ?n.notification_type,
                    "🔔 ALERT: {}", n.message
                );
            }
        }
    }
}
