//! Payment Order Manager
//!
//! Owns the payment state machine:
//!
//! ```text
//! CREATED ─┬─> PENDING ─┬─> SUCCESS ─> PARTIAL_REFUND ─> REFUNDED
//!          │            ├─> FAILED
//!          │            └─> CANCELLED
//!          ├─> SUCCESS
//!          ├─> FAILED
//!          └─> CANCELLED
//! ```
//!
//! Every move is a compare-and-set on the stored status, so when a client
//! callback and a gateway webhook race only one of them captures the payment
//! and settles the driver. The loser re-reads and returns the current record.

use crate::clock::Clock;
use crate::database::booking_repository::BookingDirectory;
use crate::database::error::DatabaseError;
use crate::database::payment_repository::{
    Payment, PaymentRepository, PaymentStatus, PaymentTransition,
};
use crate::database::wallet_repository::WalletTransaction;
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::money::{format_amount, is_valid_amount};
use crate::payments::error::PaymentError;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{CreateOrderRequest, GatewayRefund, PaymentMethod};
use crate::services::notification::{Notification, NotificationType, Notifier};
use crate::services::settlement::SettlementService;
use crate::services::wallet_ledger::WalletLedger;
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const INVALID_SIGNATURE_REASON: &str = "Invalid payment signature";
pub const TIMEOUT_REASON: &str = "Payment timeout - automatically cancelled";

const CAPTURED: &[PaymentStatus] = &[
    PaymentStatus::Success,
    PaymentStatus::PartialRefund,
    PaymentStatus::Refunded,
];

#[derive(Debug, Error)]
pub enum PaymentServiceError {
    #[error("invalid payment amount {amount}")]
    InvalidAmount { amount: BigDecimal },

    #[error("booking {booking_id} not found")]
    BookingNotFound { booking_id: Uuid },

    #[error("booking {booking_id} already has a successful payment")]
    DuplicatePayment { booking_id: Uuid },

    #[error("payment {reference} not found")]
    PaymentNotFound { reference: String },

    #[error("payment signature verification failed")]
    SignatureVerificationFailed,

    #[error("payment {payment_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("refund of {requested} exceeds refundable {refundable}")]
    RefundExceedsRefundable {
        requested: BigDecimal,
        refundable: BigDecimal,
    },

    #[error("payment {payment_id} was modified concurrently")]
    ConcurrentUpdate { payment_id: Uuid },

    #[error("gateway error: {0}")]
    Gateway(#[from] PaymentError),

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl From<PaymentServiceError> for AppError {
    fn from(err: PaymentServiceError) -> Self {
        let kind = match err {
            PaymentServiceError::InvalidAmount { amount } => {
                AppErrorKind::Domain(DomainError::InvalidAmount {
                    amount: amount.to_string(),
                    reason: "Amount must be greater than zero with at most two decimal places"
                        .to_string(),
                })
            }
            PaymentServiceError::BookingNotFound { booking_id } => {
                AppErrorKind::Domain(DomainError::BookingNotFound {
                    booking_id: booking_id.to_string(),
                })
            }
            PaymentServiceError::DuplicatePayment { booking_id } => {
                AppErrorKind::Domain(DomainError::DuplicatePayment {
                    booking_id: booking_id.to_string(),
                })
            }
            PaymentServiceError::PaymentNotFound { reference } => {
                AppErrorKind::Domain(DomainError::PaymentNotFound { reference })
            }
            PaymentServiceError::SignatureVerificationFailed => {
                AppErrorKind::Domain(DomainError::PaymentVerificationFailed)
            }
            PaymentServiceError::InvalidStateTransition {
                payment_id,
                from,
                to,
            } => AppErrorKind::Domain(DomainError::InvalidStateTransition {
                payment_id: payment_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            }),
            PaymentServiceError::RefundExceedsRefundable { refundable, .. } => {
                AppErrorKind::Validation(ValidationError::OutOfRange {
                    field: "amount".to_string(),
                    min: Some("0.01".to_string()),
                    max: Some(format_amount(&refundable)),
                })
            }
            PaymentServiceError::ConcurrentUpdate { payment_id } => {
                AppErrorKind::Domain(DomainError::InvalidStateTransition {
                    payment_id: payment_id.to_string(),
                    from: "MODIFIED".to_string(),
                    to: PaymentStatus::Refunded.to_string(),
                })
            }
            PaymentServiceError::Gateway(e) => return e.into(),
            PaymentServiceError::Storage(e) => return e.into(),
        };
        AppError::new(kind)
    }
}

pub type PaymentServiceResult<T> = Result<T, PaymentServiceError>;

/// What the client checkout needs to open the gateway widget
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOrder {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub gateway_order_id: String,
    pub amount: BigDecimal,
    /// Amount in minor units as sent to the gateway
    pub gateway_amount: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    pub payment: Payment,
    pub refund: GatewayRefund,
    /// Driver wallet debit, when the clawback went through
    pub clawback: Option<WalletTransaction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayPublicConfig {
    pub provider: String,
    pub key_id: String,
    pub currency: String,
    pub configured: bool,
}

pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    bookings: Arc<dyn BookingDirectory>,
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<WalletLedger>,
    settlement: Arc<SettlementService>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    currency: String,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        bookings: Arc<dyn BookingDirectory>,
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<WalletLedger>,
        settlement: Arc<SettlementService>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            payments,
            bookings,
            gateway,
            ledger,
            settlement,
            notifier,
            clock,
            currency: currency.into(),
        }
    }

    pub fn gateway_config(&self) -> GatewayPublicConfig {
        GatewayPublicConfig {
            provider: self.gateway.name().to_string(),
            key_id: self.gateway.public_key_id().to_string(),
            currency: self.currency.clone(),
            configured: self.gateway.is_configured(),
        }
    }

    // ------------------------------------------------------------------------
    // Order creation
    // ------------------------------------------------------------------------

    pub async fn create_payment(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        amount: &BigDecimal,
    ) -> PaymentServiceResult<PaymentOrder> {
        if !is_valid_amount(amount) {
            return Err(PaymentServiceError::InvalidAmount {
                amount: amount.clone(),
            });
        }

        self.bookings
            .find_booking(booking_id)
            .await?
            .ok_or(PaymentServiceError::BookingNotFound { booking_id })?;

        if self.payments.has_successful_payment(booking_id).await? {
            warn!(booking_id = %booking_id, "payment requested for already paid booking");
            return Err(PaymentServiceError::DuplicatePayment { booking_id });
        }

        let order = self
            .gateway
            .create_order(CreateOrderRequest {
                amount: amount.clone(),
                currency: self.currency.clone(),
                receipt: format!("booking_{}", booking_id.simple()),
            })
            .await?;

        let payment = Payment::new(
            booking_id,
            user_id,
            order.order_id.clone(),
            amount.clone(),
            self.currency.clone(),
            self.clock.now(),
        );
        let payment = self.payments.insert(&payment).await?;

        info!(
            payment_id = %payment.id,
            booking_id = %booking_id,
            order_id = %payment.gateway_order_id,
            amount = %amount,
            "payment order created"
        );

        Ok(PaymentOrder {
            payment_id: payment.id,
            booking_id,
            gateway_order_id: payment.gateway_order_id,
            amount: payment.amount,
            gateway_amount: order.amount_minor,
            currency: order.currency,
            key_id: self.gateway.public_key_id().to_string(),
        })
    }

    // ------------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------------

    /// Confirm a payment from the client callback. An invalid signature marks
    /// an open payment FAILED before the error is returned.
    pub async fn process_payment(
        &self,
        gateway_payment_id: &str,
        gateway_order_id: &str,
        signature: &str,
    ) -> PaymentServiceResult<Payment> {
        let payment = self.require_by_order_id(gateway_order_id).await?;

        if !self
            .gateway
            .verify_payment_signature(gateway_payment_id, gateway_order_id, signature)
        {
            warn!(
                payment_id = %payment.id,
                order_id = %gateway_order_id,
                "payment signature verification failed"
            );
            if payment.status.is_open() {
                let update = PaymentTransition::failed(INVALID_SIGNATURE_REASON, self.clock.now());
                if let Some(failed) = self
                    .payments
                    .transition(gateway_order_id, &PaymentStatus::OPEN, &update)
                    .await?
                {
                    self.notify_failure(&failed).await;
                }
            }
            return Err(PaymentServiceError::SignatureVerificationFailed);
        }

        if CAPTURED.contains(&payment.status) {
            debug!(payment_id = %payment.id, "payment already captured");
            return Ok(payment);
        }
        self.ensure_open(&payment, PaymentStatus::Success)?;

        let method = self.lookup_method(gateway_payment_id).await;

        let now = self.clock.now();
        let mut update = PaymentTransition::to(PaymentStatus::Success, now);
        update.gateway_payment_id = Some(gateway_payment_id.to_string());
        update.gateway_signature = Some(signature.to_string());
        update.payment_method = method;
        update.paid_at = Some(now);

        self.capture(&payment, &update).await
    }

    /// Capture reported by an authenticated gateway webhook.
    pub async fn record_capture(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        method: Option<PaymentMethod>,
    ) -> PaymentServiceResult<Payment> {
        let payment = self.require_by_order_id(gateway_order_id).await?;

        if CAPTURED.contains(&payment.status) {
            debug!(payment_id = %payment.id, "capture webhook for captured payment");
            return Ok(payment);
        }
        self.ensure_open(&payment, PaymentStatus::Success)?;

        let now = self.clock.now();
        let mut update = PaymentTransition::to(PaymentStatus::Success, now);
        update.gateway_payment_id = Some(gateway_payment_id.to_string());
        update.payment_method = method;
        update.paid_at = Some(now);

        self.capture(&payment, &update).await
    }

    async fn capture(
        &self,
        payment: &Payment,
        update: &PaymentTransition,
    ) -> PaymentServiceResult<Payment> {
        let captured = match self
            .payments
            .transition(&payment.gateway_order_id, &PaymentStatus::OPEN, update)
            .await?
        {
            Some(captured) => captured,
            None => {
                // Another caller moved the payment first.
                let current = self.require_by_order_id(&payment.gateway_order_id).await?;
                if CAPTURED.contains(&current.status) {
                    debug!(payment_id = %current.id, "lost capture race, returning current state");
                    return Ok(current);
                }
                return Err(PaymentServiceError::InvalidStateTransition {
                    payment_id: current.id,
                    from: current.status,
                    to: PaymentStatus::Success,
                });
            }
        };

        info!(
            payment_id = %captured.id,
            order_id = %captured.gateway_order_id,
            amount = %captured.amount,
            method = ?captured.payment_method,
            "payment captured"
        );

        if let Err(e) = self
            .bookings
            .confirm_after_payment(captured.booking_id)
            .await
        {
            error!(
                payment_id = %captured.id,
                booking_id = %captured.booking_id,
                error = %e,
                "failed to confirm booking after payment"
            );
        }

        self.settlement.settle_or_alert(&captured).await;

        self.notifier
            .notify(
                Notification::new(
                    NotificationType::PaymentSucceeded,
                    captured.user_id,
                    format!("Payment of {} received", format_amount(&captured.amount)),
                )
                .for_payment(captured.id)
                .with_amount(captured.amount.clone()),
            )
            .await;

        // Re-read so settled_at is reflected.
        Ok(self
            .payments
            .find_by_id(captured.id)
            .await?
            .unwrap_or(captured))
    }

    async fn lookup_method(&self, gateway_payment_id: &str) -> Option<PaymentMethod> {
        match self.gateway.fetch_payment_method(gateway_payment_id).await {
            Ok(method) => Some(method),
            Err(PaymentError::TestModeUnsupported { .. }) => None,
            Err(e) => {
                warn!(
                    gateway_payment_id = %gateway_payment_id,
                    error = %e,
                    "could not fetch payment method"
                );
                None
            }
        }
    }

    /// Gateway authorized the payment; capture follows.
    pub async fn mark_pending(&self, gateway_order_id: &str) -> PaymentServiceResult<Payment> {
        let payment = self.require_by_order_id(gateway_order_id).await?;
        if payment.status != PaymentStatus::Created {
            return Ok(payment);
        }

        let update = PaymentTransition::to(PaymentStatus::Pending, self.clock.now());
        match self
            .payments
            .transition(gateway_order_id, &[PaymentStatus::Created], &update)
            .await?
        {
            Some(pending) => {
                info!(payment_id = %pending.id, "payment authorized, awaiting capture");
                Ok(pending)
            }
            None => self.require_by_order_id(gateway_order_id).await,
        }
    }

    // ------------------------------------------------------------------------
    // Failure, cancellation, cleanup
    // ------------------------------------------------------------------------

    pub async fn handle_payment_failure(
        &self,
        gateway_order_id: &str,
        reason: &str,
    ) -> PaymentServiceResult<Payment> {
        let payment = self.require_by_order_id(gateway_order_id).await?;
        self.ensure_open(&payment, PaymentStatus::Failed)?;

        let update = PaymentTransition::failed(reason, self.clock.now());
        let failed = self
            .transition_open(&payment, &update)
            .await?;

        info!(payment_id = %failed.id, reason = %reason, "payment marked failed");
        self.notify_failure(&failed).await;
        Ok(failed)
    }

    pub async fn cancel_payment(&self, payment_id: Uuid) -> PaymentServiceResult<Payment> {
        let payment = self.get_payment(payment_id).await?;
        self.ensure_open(&payment, PaymentStatus::Cancelled)?;

        let update = PaymentTransition::to(PaymentStatus::Cancelled, self.clock.now());
        let cancelled = self.transition_open(&payment, &update).await?;

        info!(payment_id = %cancelled.id, "payment cancelled");
        Ok(cancelled)
    }

    /// Fail every open payment created more than `timeout` ago. Returns how
    /// many were moved.
    pub async fn cleanup_stale_payments(
        &self,
        timeout: chrono::Duration,
    ) -> PaymentServiceResult<usize> {
        let now = self.clock.now();
        let stale = self.payments.find_stale(now - timeout).await?;

        let mut cleaned = 0;
        for payment in &stale {
            let update = PaymentTransition::failed(TIMEOUT_REASON, now);
            match self
                .payments
                .transition(&payment.gateway_order_id, &PaymentStatus::OPEN, &update)
                .await
            {
                Ok(Some(_)) => cleaned += 1,
                Ok(None) => {
                    debug!(payment_id = %payment.id, "stale payment moved concurrently")
                }
                Err(e) => {
                    warn!(payment_id = %payment.id, error = %e, "failed to expire stale payment")
                }
            }
        }

        if cleaned > 0 {
            info!(count = cleaned, "expired stale payments");
        }
        Ok(cleaned)
    }

    async fn transition_open(
        &self,
        payment: &Payment,
        update: &PaymentTransition,
    ) -> PaymentServiceResult<Payment> {
        match self
            .payments
            .transition(&payment.gateway_order_id, &PaymentStatus::OPEN, update)
            .await?
        {
            Some(updated) => Ok(updated),
            None => {
                let current = self.require_by_order_id(&payment.gateway_order_id).await?;
                Err(PaymentServiceError::InvalidStateTransition {
                    payment_id: current.id,
                    from: current.status,
                    to: update.to,
                })
            }
        }
    }

    fn ensure_open(&self, payment: &Payment, to: PaymentStatus) -> PaymentServiceResult<()> {
        if payment.status.can_transition_to(to) && payment.status.is_open() {
            Ok(())
        } else {
            Err(PaymentServiceError::InvalidStateTransition {
                payment_id: payment.id,
                from: payment.status,
                to,
            })
        }
    }

    async fn notify_failure(&self, payment: &Payment) {
        self.notifier
            .notify(
                Notification::new(
                    NotificationType::PaymentFailed,
                    payment.user_id,
                    payment
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "Payment failed".to_string()),
                )
                .for_payment(payment.id),
            )
            .await;
    }

    // ------------------------------------------------------------------------
    // Refunds
    // ------------------------------------------------------------------------

    /// Refund all or part of a captured payment. The driver's share of the
    /// refunded amount is clawed back from their wallet when possible; a
    /// failed clawback is alerted and never fails the refund.
    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        amount: Option<BigDecimal>,
        reason: Option<&str>,
    ) -> PaymentServiceResult<RefundOutcome> {
        let payment = self.get_payment(payment_id).await?;

        let gateway_payment_id = match (&payment.gateway_payment_id, payment.status) {
            (Some(id), status) if PaymentStatus::REFUNDABLE.contains(&status) => id.clone(),
            _ => {
                return Err(PaymentServiceError::InvalidStateTransition {
                    payment_id,
                    from: payment.status,
                    to: PaymentStatus::Refunded,
                })
            }
        };

        let refundable = payment.refundable_amount();
        let amount = amount.unwrap_or_else(|| refundable.clone());
        if !is_valid_amount(&amount) {
            return Err(PaymentServiceError::InvalidAmount { amount });
        }
        if amount > refundable {
            return Err(PaymentServiceError::RefundExceedsRefundable {
                requested: amount,
                refundable,
            });
        }

        // Claim the amount locally before any money moves, so two concurrent
        // requests cannot both reach the gateway for the same slice.
        let refunded_total = &payment.refunded_amount + &amount;
        let to = if refunded_total == payment.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartialRefund
        };

        let mut claim = PaymentTransition::to(to, self.clock.now());
        claim.refunded_amount = Some(refunded_total.clone());
        claim.expected_refunded_amount = Some(payment.refunded_amount.clone());

        let updated = self
            .payments
            .transition(&payment.gateway_order_id, &PaymentStatus::REFUNDABLE, &claim)
            .await?
            .ok_or(PaymentServiceError::ConcurrentUpdate { payment_id })?;

        let refund = match self
            .gateway
            .create_refund(&gateway_payment_id, &amount, reason)
            .await
        {
            Ok(refund) => refund,
            Err(e) => {
                self.release_refund_claim(&payment, &updated).await;
                return Err(e.into());
            }
        };

        info!(
            payment_id = %payment_id,
            refund_id = %refund.refund_id,
            amount = %amount,
            status = %updated.status,
            "payment refunded"
        );

        let clawback = self
            .claw_back(&updated, &payment.refunded_amount, &refunded_total, &refund)
            .await;

        self.notifier
            .notify(
                Notification::new(
                    NotificationType::PaymentRefunded,
                    updated.user_id,
                    format!("Refund of {} issued", format_amount(&amount)),
                )
                .for_payment(updated.id)
                .with_amount(amount),
            )
            .await;

        Ok(RefundOutcome {
            payment: updated,
            refund,
            clawback,
        })
    }

    /// Undo a refund claim after the gateway refused the refund. Guarded on
    /// the claimed amount so a later claim is never overwritten.
    async fn release_refund_claim(&self, original: &Payment, claimed: &Payment) {
        let mut release = PaymentTransition::to(original.status, self.clock.now());
        release.refunded_amount = Some(original.refunded_amount.clone());
        release.expected_refunded_amount = Some(claimed.refunded_amount.clone());

        match self
            .payments
            .transition(&claimed.gateway_order_id, &[claimed.status], &release)
            .await
        {
            Ok(Some(_)) => {
                warn!(payment_id = %original.id, "gateway refund failed, claim released");
            }
            Ok(None) => error!(
                payment_id = %original.id,
                "refund claim changed before it could be released"
            ),
            Err(e) => error!(
                payment_id = %original.id,
                error = %e,
                "failed to release refund claim"
            ),
        }
    }

    /// Debit the driver's share of the newly refunded slice. The share is the
    /// difference between the splits of the cumulative refunded totals, so a
    /// series of partial refunds claws back exactly the original credit.
    async fn claw_back(
        &self,
        payment: &Payment,
        refunded_before: &BigDecimal,
        refunded_after: &BigDecimal,
        refund: &GatewayRefund,
    ) -> Option<WalletTransaction> {
        let credited = payment.gateway_payment_id.as_deref()?;
        match self.ledger.find_by_reference(credited).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(payment_id = %payment.id, "driver never credited, nothing to claw back");
                return None;
            }
            Err(e) => {
                self.alert_clawback(payment, refunded_after, &e.to_string()).await;
                return None;
            }
        }

        let share = &self.settlement.split(refunded_after).driver_share
            - &self.settlement.split(refunded_before).driver_share;
        if share <= BigDecimal::from(0) {
            return None;
        }

        let driver = match self.bookings.find_booking(payment.booking_id).await {
            Ok(Some(booking)) => booking.driver_id,
            Ok(None) => {
                self.alert_clawback(payment, &share, "booking not found").await;
                return None;
            }
            Err(e) => {
                self.alert_clawback(payment, &share, &e.to_string()).await;
                return None;
            }
        };

        let reference = format!("refund_{}", refund.refund_id);
        let description = format!("Refund clawback for payment {}", payment.id);
        match self
            .ledger
            .debit(driver, &share, &description, Some(&reference))
            .await
        {
            Ok(outcome) => Some(outcome.into_transaction()),
            Err(e) => {
                self.alert_clawback(payment, &share, &e.to_string()).await;
                None
            }
        }
    }

    async fn alert_clawback(&self, payment: &Payment, amount: &BigDecimal, reason: &str) {
        error!(
            payment_id = %payment.id,
            amount = %amount,
            reason = %reason,
            "driver clawback failed"
        );
        self.notifier
            .notify(
                Notification::new(
                    NotificationType::ClawbackFailed,
                    payment.user_id,
                    format!("Clawback for payment {} failed: {}", payment.id, reason),
                )
                .for_payment(payment.id)
                .with_amount(amount.clone()),
            )
            .await;
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub async fn get_payment(&self, payment_id: Uuid) -> PaymentServiceResult<Payment> {
        self.payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| PaymentServiceError::PaymentNotFound {
                reference: payment_id.to_string(),
            })
    }

    pub async fn get_payment_by_order_id(
        &self,
        gateway_order_id: &str,
    ) -> PaymentServiceResult<Option<Payment>> {
        Ok(self.payments.find_by_order_id(gateway_order_id).await?)
    }

    async fn require_by_order_id(&self, gateway_order_id: &str) -> PaymentServiceResult<Payment> {
        self.payments
            .find_by_order_id(gateway_order_id)
            .await?
            .ok_or_else(|| PaymentServiceError::PaymentNotFound {
                reference: gateway_order_id.to_string(),
            })
    }

    pub async fn payments_for_user(&self, user_id: Uuid) -> PaymentServiceResult<Vec<Payment>> {
        Ok(self.payments.find_by_user(user_id).await?)
    }

    pub async fn has_successful_payment(&self, booking_id: Uuid) -> PaymentServiceResult<bool> {
        Ok(self.payments.has_successful_payment(booking_id).await?)
    }

    pub async fn total_paid_by_user(&self, user_id: Uuid) -> PaymentServiceResult<BigDecimal> {
        Ok(self.payments.total_paid_by_user(user_id).await?)
    }
}
