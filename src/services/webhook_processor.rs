use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{WebhookEvent, WebhookEventType};
use crate::services::payment_service::{PaymentService, PaymentServiceError};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Missing {0} in webhook payload")]
    MissingReference(&'static str),
    #[error("Processing error: {0}")]
    ProcessingError(#[from] PaymentServiceError),
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        match err {
            WebhookProcessorError::InvalidSignature => {
                AppError::new(AppErrorKind::Domain(DomainError::PaymentVerificationFailed))
            }
            WebhookProcessorError::InvalidPayload(reason) => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidFormat {
                    field: "payload".to_string(),
                    reason,
                }))
            }
            WebhookProcessorError::MissingReference(field) => {
                AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
                    field: field.to_string(),
                }))
            }
            WebhookProcessorError::ProcessingError(e) => e.into(),
        }
    }
}

/// What happened to an authenticated webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    /// Acknowledged without a state change
    Ignored,
}

pub struct WebhookProcessor {
    gateway: Arc<dyn PaymentGateway>,
    payments: Arc<PaymentService>,
}

impl WebhookProcessor {
    pub fn new(gateway: Arc<dyn PaymentGateway>, payments: Arc<PaymentService>) -> Self {
        Self { gateway, payments }
    }

    /// Verify the raw body against the signature header, then apply the event.
    /// Errors that a redelivery cannot fix are acknowledged as `Ignored`.
    pub async fn process_webhook(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let signature = signature.ok_or(WebhookProcessorError::InvalidSignature)?;

        if !self.gateway.verify_webhook_signature(payload, signature) {
            error!(provider = self.gateway.name(), "Invalid webhook signature");
            return Err(WebhookProcessorError::InvalidSignature);
        }

        let event = self
            .gateway
            .parse_webhook_event(payload)
            .map_err(|e| WebhookProcessorError::InvalidPayload(e.to_string()))?;

        match self.process_event(&event).await {
            Ok(outcome) => Ok(outcome),
            Err(WebhookProcessorError::ProcessingError(
                e @ (PaymentServiceError::PaymentNotFound { .. }
                | PaymentServiceError::InvalidStateTransition { .. }),
            )) => {
                warn!(event = ?event.event_type, error = %e, "Webhook acknowledged without change");
                Ok(WebhookOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    async fn process_event(
        &self,
        event: &WebhookEvent,
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        match &event.event_type {
            WebhookEventType::PaymentCaptured | WebhookEventType::OrderPaid => {
                let order_id = Self::order_id(event)?;
                let payment_id = event
                    .payment_id
                    .as_deref()
                    .ok_or(WebhookProcessorError::MissingReference("payment id"))?;

                info!(order_id = %order_id, gateway_payment_id = %payment_id, "Processing capture webhook");
                self.payments
                    .record_capture(order_id, payment_id, event.method)
                    .await?;
            }
            WebhookEventType::PaymentAuthorized => {
                let order_id = Self::order_id(event)?;
                info!(order_id = %order_id, "Processing authorization webhook");
                self.payments.mark_pending(order_id).await?;
            }
            WebhookEventType::PaymentFailed => {
                let order_id = Self::order_id(event)?;
                let reason = event
                    .error_description
                    .as_deref()
                    .unwrap_or("Payment failed");

                info!(order_id = %order_id, "Processing payment failure webhook");
                self.payments
                    .handle_payment_failure(order_id, reason)
                    .await?;
            }
            WebhookEventType::RefundProcessed => {
                info!(gateway_payment_id = ?event.payment_id, "Refund processed by gateway");
                return Ok(WebhookOutcome::Ignored);
            }
            WebhookEventType::Other(kind) => {
                warn!(event_type = %kind, "Unknown webhook event type");
                return Ok(WebhookOutcome::Ignored);
            }
        }

        Ok(WebhookOutcome::Processed)
    }

    fn order_id(event: &WebhookEvent) -> Result<&str, WebhookProcessorError> {
        event
            .order_id
            .as_deref()
            .ok_or(WebhookProcessorError::MissingReference("order id"))
    }
}
