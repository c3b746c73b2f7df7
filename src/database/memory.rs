//! In-process stores with the same semantics as the Postgres repositories.
//!
//! Each store serializes its mutations behind one async mutex, which stands in
//! for row locks and unique indexes. Used by tests and by `SKIP_EXTERNALS` runs.

use crate::database::booking_repository::{BookingDirectory, BookingSummary};
use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::payment_repository::{
    Payment, PaymentRepository, PaymentStatus, PaymentTransition,
};
use crate::database::wallet_repository::{
    LedgerEntry, LedgerWrite, PendingChange, PendingWrite, PlatformTotals, TransactionFilter,
    Wallet, WalletRepository, WalletTransaction,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

fn unavailable() -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::Connection {
        message: "store unavailable".to_string(),
    })
}

// ----------------------------------------------------------------------------
// Payments
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    payments: Mutex<Vec<Payment>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, payment: &Payment) -> Result<Payment, DatabaseError> {
        let mut payments = self.payments.lock().await;
        if payments
            .iter()
            .any(|p| p.gateway_order_id == payment.gateway_order_id || p.id == payment.id)
        {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: Some("idx_payments_gateway_order_id".to_string()),
            }));
        }
        payments.push(payment.clone());
        Ok(payment.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let payments = self.payments.lock().await;
        Ok(payments.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let payments = self.payments.lock().await;
        Ok(payments
            .iter()
            .find(|p| p.gateway_order_id == gateway_order_id)
            .cloned())
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>, DatabaseError> {
        let payments = self.payments.lock().await;
        let mut found: Vec<Payment> = payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        found.reverse();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn has_successful_payment(&self, booking_id: Uuid) -> Result<bool, DatabaseError> {
        let payments = self.payments.lock().await;
        Ok(payments
            .iter()
            .any(|p| p.booking_id == booking_id && PaymentStatus::REFUNDABLE.contains(&p.status)))
    }

    async fn total_paid_by_user(&self, user_id: Uuid) -> Result<BigDecimal, DatabaseError> {
        let payments = self.payments.lock().await;
        Ok(payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .filter(|p| PaymentStatus::CAPTURED.contains(&p.status))
            .fold(BigDecimal::from(0), |acc, p| acc + p.refundable_amount()))
    }

    async fn transition(
        &self,
        gateway_order_id: &str,
        from: &[PaymentStatus],
        update: &PaymentTransition,
    ) -> Result<Option<Payment>, DatabaseError> {
        let mut payments = self.payments.lock().await;
        let Some(payment) = payments
            .iter_mut()
            .find(|p| p.gateway_order_id == gateway_order_id)
        else {
            return Ok(None);
        };

        if !from.contains(&payment.status) || !update.guard_matches(payment) {
            return Ok(None);
        }

        payment.apply(update);
        Ok(Some(payment.clone()))
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>, DatabaseError> {
        let payments = self.payments.lock().await;
        Ok(payments
            .iter()
            .filter(|p| p.status.is_open() && p.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn find_unsettled(
        &self,
        paid_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let payments = self.payments.lock().await;
        Ok(payments
            .iter()
            .filter(|p| PaymentStatus::CAPTURED.contains(&p.status) && p.settled_at.is_none())
            .filter(|p| p.paid_at.map_or(false, |paid| paid < paid_before))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_settled(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let mut payments = self.payments.lock().await;
        let payment = payments
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| DatabaseError::not_found("payment", id))?;
        if payment.settled_at.is_none() {
            payment.settled_at = Some(at);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Wallets
// ----------------------------------------------------------------------------

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<Uuid, Wallet>,
    /// Append-only, in creation order
    transactions: Vec<WalletTransaction>,
}

/// In-memory ledger. `set_unavailable(true)` makes every call fail with a
/// connection error, which lets callers exercise their outage paths.
#[derive(Default)]
pub struct InMemoryWalletRepository {
    state: Mutex<LedgerState>,
    unavailable: AtomicBool,
}

impl InMemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), DatabaseError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

impl LedgerState {
    fn wallet_for(&mut self, user_id: Uuid, now: DateTime<Utc>) -> &mut Wallet {
        self.wallets
            .entry(user_id)
            .or_insert_with(|| Wallet::new(user_id, now))
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn get_or_create(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Wallet, DatabaseError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state.wallet_for(user_id, now).clone())
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Wallet>, DatabaseError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.wallets.get(&user_id).cloned())
    }

    async fn find_by_id(&self, wallet_id: Uuid) -> Result<Option<Wallet>, DatabaseError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.wallets.values().find(|w| w.id == wallet_id).cloned())
    }

    async fn post_entry(
        &self,
        user_id: Uuid,
        entry: &LedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<LedgerWrite, DatabaseError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if let Some(reference) = &entry.reference_id {
            if let Some(existing) = state
                .transactions
                .iter()
                .find(|tx| tx.reference_id.as_deref() == Some(reference.as_str()))
            {
                return Ok(LedgerWrite::AlreadyApplied(existing.clone()));
            }
        }

        let planned = match state.wallet_for(user_id, now).plan(entry, now) {
            Ok(planned) => planned,
            Err(rejection) => return Ok(LedgerWrite::Rejected(rejection)),
        };

        let next_id = state.transactions.len() as i64 + 1;
        let (wallet, transaction) = planned.into_transaction(next_id, entry, now);
        state.wallets.insert(user_id, wallet.clone());
        state.transactions.push(transaction.clone());

        Ok(LedgerWrite::Applied {
            wallet,
            transaction,
        })
    }

    async fn adjust_pending(
        &self,
        user_id: Uuid,
        change: PendingChange,
        amount: &BigDecimal,
        now: DateTime<Utc>,
    ) -> Result<PendingWrite, DatabaseError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let wallet = state.wallet_for(user_id, now);

        match wallet.plan_pending(change, amount, now) {
            Ok(next) => {
                *wallet = next.clone();
                Ok(PendingWrite::Applied(next))
            }
            Err(rejection) => Ok(PendingWrite::Rejected(rejection)),
        }
    }

    async fn find_transaction(&self, id: i64) -> Result<Option<WalletTransaction>, DatabaseError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.transactions.iter().find(|tx| tx.id == id).cloned())
    }

    async fn find_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<WalletTransaction>, DatabaseError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .find(|tx| tx.reference_id.as_deref() == Some(reference_id))
            .cloned())
    }

    async fn transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<WalletTransaction>, DatabaseError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.wallet_id == wallet_id && filter.matches(tx))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ledger(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>, DatabaseError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.wallet_id == wallet_id)
            .cloned()
            .collect())
    }

    async fn count_transactions(&self, wallet_id: Uuid) -> Result<i64, DatabaseError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.wallet_id == wallet_id)
            .count() as i64)
    }

    async fn platform_totals(&self) -> Result<PlatformTotals, DatabaseError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let zero = BigDecimal::from(0);
        Ok(PlatformTotals {
            total_earnings: state
                .wallets
                .values()
                .fold(zero.clone(), |acc, w| acc + &w.total_earnings),
            total_withdrawn: state
                .wallets
                .values()
                .fold(zero, |acc, w| acc + &w.total_withdrawn),
            wallet_count: state.wallets.len() as i64,
        })
    }
}

// ----------------------------------------------------------------------------
// Bookings
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryBookingDirectory {
    bookings: Mutex<HashMap<Uuid, BookingSummary>>,
}

impl InMemoryBookingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, booking: BookingSummary) {
        self.bookings.lock().await.insert(booking.booking_id, booking);
    }
}

#[async_trait]
impl BookingDirectory for InMemoryBookingDirectory {
    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<BookingSummary>, DatabaseError> {
        Ok(self.bookings.lock().await.get(&booking_id).cloned())
    }

    async fn confirm_after_payment(
        &self,
        booking_id: Uuid,
    ) -> Result<BookingSummary, DatabaseError> {
        let mut bookings = self.bookings.lock().await;
        let booking = bookings
            .get_mut(&booking_id)
            .ok_or_else(|| DatabaseError::not_found("booking", booking_id))?;
        booking.confirmed = true;
        Ok(booking.clone())
    }
}
