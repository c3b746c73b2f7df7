//! Settlement Orchestrator
//!
//! Splits a captured fare into platform commission and driver share and
//! credits the driver's wallet exactly once, keyed by the gateway payment id.
//! A failed settlement never rolls back the payment; the reconciler retries
//! it with the same reference.

use crate::clock::Clock;
use crate::database::booking_repository::BookingDirectory;
use crate::database::error::DatabaseError;
use crate::database::payment_repository::{Payment, PaymentRepository, PaymentStatus};
use crate::database::wallet_repository::WalletTransaction;
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::money::{format_amount, round_minor};
use crate::services::notification::{Notification, NotificationType, Notifier};
use crate::services::wallet_ledger::{LedgerError, WalletLedger};
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Commission and driver share of one fare. `driver_share + commission == total`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FareSplit {
    pub total: BigDecimal,
    pub commission: BigDecimal,
    pub driver_share: BigDecimal,
}

impl FareSplit {
    /// Split of what remains after `refunded` is returned to the payer. The
    /// driver share is the difference of the two full splits, which is the
    /// same total a credit of the full share followed by per-refund clawbacks
    /// arrives at.
    pub fn net_of_refunds(
        total: &BigDecimal,
        refunded: &BigDecimal,
        commission_rate: &BigDecimal,
    ) -> Self {
        let full = Self::compute(total, commission_rate);
        let returned = Self::compute(refunded, commission_rate);
        let net = total - refunded;
        let driver_share = &full.driver_share - &returned.driver_share;
        Self {
            commission: &net - &driver_share,
            total: net,
            driver_share,
        }
    }

    /// Commission is rounded half-up to the minor unit; the driver gets the remainder.
    pub fn compute(total: &BigDecimal, commission_rate: &BigDecimal) -> Self {
        let commission = round_minor(&(total * commission_rate));
        let driver_share = total - &commission;
        Self {
            total: total.clone(),
            commission,
            driver_share,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("payment {payment_id} is {status} and cannot be settled")]
    NotSettleable {
        payment_id: Uuid,
        status: PaymentStatus,
    },

    #[error("payment {payment_id} has no gateway payment id")]
    MissingGatewayPaymentId { payment_id: Uuid },

    #[error("booking {booking_id} not found")]
    BookingNotFound { booking_id: Uuid },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::NotSettleable { payment_id, status } => {
                AppError::new(AppErrorKind::Domain(DomainError::InvalidStateTransition {
                    payment_id: payment_id.to_string(),
                    from: status.to_string(),
                    to: "SETTLED".to_string(),
                }))
            }
            SettlementError::MissingGatewayPaymentId { payment_id } => {
                AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
                    reference: payment_id.to_string(),
                }))
            }
            SettlementError::BookingNotFound { booking_id } => {
                AppError::new(AppErrorKind::Domain(DomainError::BookingNotFound {
                    booking_id: booking_id.to_string(),
                }))
            }
            SettlementError::Ledger(e) => e.into(),
            SettlementError::Storage(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementOutcome {
    pub payment_id: Uuid,
    pub driver_id: Uuid,
    /// Split of the fare still held after refunds
    pub split: FareSplit,
    /// `None` when nothing was owed to the driver
    pub transaction: Option<WalletTransaction>,
    /// False when the credit already existed or nothing was owed
    pub newly_credited: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub settled: usize,
    pub already_settled: usize,
    pub failed: usize,
}

pub struct SettlementService {
    ledger: Arc<WalletLedger>,
    payments: Arc<dyn PaymentRepository>,
    bookings: Arc<dyn BookingDirectory>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    commission_rate: BigDecimal,
}

impl SettlementService {
    pub fn new(
        ledger: Arc<WalletLedger>,
        payments: Arc<dyn PaymentRepository>,
        bookings: Arc<dyn BookingDirectory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        commission_rate: BigDecimal,
    ) -> Self {
        Self {
            ledger,
            payments,
            bookings,
            notifier,
            clock,
            commission_rate,
        }
    }

    pub fn commission_rate(&self) -> &BigDecimal {
        &self.commission_rate
    }

    pub fn split(&self, total: &BigDecimal) -> FareSplit {
        FareSplit::compute(total, &self.commission_rate)
    }

    /// Credit the driver's share of a captured payment, net of any refund
    /// issued before settlement. Safe to call any number of times for the
    /// same payment.
    pub async fn settle(&self, payment: &Payment) -> Result<SettlementOutcome, SettlementError> {
        // Reconciliation hands over snapshots; refunds may have landed since.
        let payment = self
            .payments
            .find_by_id(payment.id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("payment", payment.id))?;

        if !PaymentStatus::CAPTURED.contains(&payment.status) {
            return Err(SettlementError::NotSettleable {
                payment_id: payment.id,
                status: payment.status,
            });
        }

        let reference = payment
            .gateway_payment_id
            .as_deref()
            .ok_or(SettlementError::MissingGatewayPaymentId {
                payment_id: payment.id,
            })?;

        let booking = self
            .bookings
            .find_booking(payment.booking_id)
            .await?
            .ok_or(SettlementError::BookingNotFound {
                booking_id: payment.booking_id,
            })?;

        let split = FareSplit::net_of_refunds(
            &payment.amount,
            &payment.refunded_amount,
            &self.commission_rate,
        );

        let (transaction, newly_credited) = match self.ledger.find_by_reference(reference).await? {
            Some(existing) => (Some(existing), false),
            None if split.driver_share <= BigDecimal::from(0) => (None, false),
            None => {
                let description = format!(
                    "Ride earnings: {} ({} - {} commission)",
                    booking.route,
                    format_amount(&split.total),
                    format_amount(&split.commission)
                );
                let outcome = self
                    .ledger
                    .credit(
                        booking.driver_id,
                        &split.driver_share,
                        &description,
                        Some(reference),
                    )
                    .await?;
                let applied = outcome.is_applied();
                (Some(outcome.into_transaction()), applied)
            }
        };

        self.payments
            .mark_settled(payment.id, self.clock.now())
            .await?;

        match &transaction {
            Some(tx) if newly_credited => {
                info!(
                    payment_id = %payment.id,
                    driver_id = %booking.driver_id,
                    fare = %split.total,
                    commission = %split.commission,
                    driver_share = %split.driver_share,
                    "driver credited"
                );
                self.notifier
                    .notify(
                        Notification::new(
                            NotificationType::DriverCredited,
                            booking.driver_id,
                            tx.description.clone(),
                        )
                        .for_payment(payment.id)
                        .with_amount(split.driver_share.clone()),
                    )
                    .await;
            }
            Some(_) => info!(
                payment_id = %payment.id,
                reference = %reference,
                "driver already credited for payment"
            ),
            None => info!(
                payment_id = %payment.id,
                refunded = %payment.refunded_amount,
                "nothing owed to driver, settled without credit"
            ),
        }

        Ok(SettlementOutcome {
            payment_id: payment.id,
            driver_id: booking.driver_id,
            split,
            transaction,
            newly_credited,
        })
    }

    /// Settle and report failures instead of returning them. The payment
    /// stays successful; reconciliation picks it up later.
    pub async fn settle_or_alert(&self, payment: &Payment) -> Option<SettlementOutcome> {
        match self.settle(payment).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(
                    payment_id = %payment.id,
                    booking_id = %payment.booking_id,
                    error = %e,
                    "settlement failed, left for reconciliation"
                );
                self.notifier
                    .notify(
                        Notification::new(
                            NotificationType::SettlementFailed,
                            payment.user_id,
                            format!("Settlement failed for payment {}: {}", payment.id, e),
                        )
                        .for_payment(payment.id)
                        .with_amount(payment.amount.clone()),
                    )
                    .await;
                None
            }
        }
    }

    /// Re-settle captured payments paid more than `grace` ago that were never
    /// marked settled, including ones refunded in the meantime.
    pub async fn reconcile_unsettled(
        &self,
        grace: chrono::Duration,
        limit: i64,
    ) -> Result<ReconcileReport, SettlementError> {
        let cutoff = self.clock.now() - grace;
        let pending = self.payments.find_unsettled(cutoff, limit).await?;

        let mut report = ReconcileReport {
            examined: pending.len(),
            ..Default::default()
        };

        for payment in &pending {
            match self.settle(payment).await {
                Ok(outcome) if outcome.newly_credited => report.settled += 1,
                Ok(_) => report.already_settled += 1,
                Err(e) => {
                    warn!(payment_id = %payment.id, error = %e, "reconciliation attempt failed");
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                settled = report.settled,
                already_settled = report.already_settled,
                failed = report.failed,
                "settlement reconciliation finished"
            );
        }
        Ok(report)
    }
}
