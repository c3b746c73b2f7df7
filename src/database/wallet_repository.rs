//! Wallet and ledger persistence.
//!
//! A wallet mutation is one unit of work: lock the wallet row, check the
//! reference id, validate, update the cached balance and append the audit row.
//! `Wallet::plan` holds the balance arithmetic so the Postgres and in-memory
//! stores apply identical rules.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Transaction vocabulary
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Credit,
    Debit,
    Withdrawal,
    Refund,
    Commission,
    Bonus,
    Penalty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "CREDIT",
            TransactionType::Debit => "DEBIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::Refund => "REFUND",
            TransactionType::Commission => "COMMISSION",
            TransactionType::Bonus => "BONUS",
            TransactionType::Penalty => "PENALTY",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            TransactionType::Credit
            | TransactionType::Refund
            | TransactionType::Commission
            | TransactionType::Bonus => Direction::Credit,
            TransactionType::Debit | TransactionType::Withdrawal | TransactionType::Penalty => {
                Direction::Debit
            }
        }
    }

    /// Type of the entry that undoes this one
    pub fn reversal(&self) -> TransactionType {
        match self.direction() {
            Direction::Credit => TransactionType::Debit,
            Direction::Debit => TransactionType::Refund,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREDIT" => Ok(TransactionType::Credit),
            "DEBIT" => Ok(TransactionType::Debit),
            "WITHDRAWAL" => Ok(TransactionType::Withdrawal),
            "REFUND" => Ok(TransactionType::Refund),
            "COMMISSION" => Ok(TransactionType::Commission),
            "BONUS" => Ok(TransactionType::Bonus),
            "PENALTY" => Ok(TransactionType::Penalty),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Reversed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Reversed => "REVERSED",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "PROCESSING" => Ok(TransactionStatus::Processing),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            "CANCELLED" => Ok(TransactionStatus::Cancelled),
            "REVERSED" => Ok(TransactionStatus::Reversed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

// ----------------------------------------------------------------------------
// Entities
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: BigDecimal,
    pub total_earnings: BigDecimal,
    pub total_withdrawn: BigDecimal,
    pub pending_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable ledger row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletTransaction {
    /// Monotonic; gives creation order
    pub id: i64,
    pub wallet_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: BigDecimal,
    pub description: String,
    pub reference_id: Option<String>,
    pub status: TransactionStatus,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// A mutation requested of the ledger
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub transaction_type: TransactionType,
    pub amount: BigDecimal,
    pub description: String,
    pub reference_id: Option<String>,
}

/// Why the ledger refused an entry. No state was changed.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerRejection {
    NonPositiveAmount,
    InsufficientBalance {
        available: BigDecimal,
        requested: BigDecimal,
    },
    InsufficientPending {
        pending: BigDecimal,
        requested: BigDecimal,
    },
}

#[derive(Debug, Clone)]
pub enum LedgerWrite {
    Applied {
        wallet: Wallet,
        transaction: WalletTransaction,
    },
    /// A transaction with the same reference id already exists
    AlreadyApplied(WalletTransaction),
    Rejected(LedgerRejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingChange {
    Reserve,
    Release,
}

#[derive(Debug, Clone)]
pub enum PendingWrite {
    Applied(Wallet),
    Rejected(LedgerRejection),
}

/// Balance movement computed for an entry
#[derive(Debug, Clone)]
pub struct PlannedPosting {
    pub wallet: Wallet,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
}

impl Wallet {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance: BigDecimal::from(0),
            total_earnings: BigDecimal::from(0),
            total_withdrawn: BigDecimal::from(0),
            pending_amount: BigDecimal::from(0),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn available_balance(&self) -> BigDecimal {
        &self.balance - &self.pending_amount
    }

    /// Compute the wallet state after `entry` without touching storage.
    pub fn plan(
        &self,
        entry: &LedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<PlannedPosting, LedgerRejection> {
        if entry.amount <= BigDecimal::from(0) {
            return Err(LedgerRejection::NonPositiveAmount);
        }

        let mut next = self.clone();
        match entry.transaction_type.direction() {
            Direction::Credit => {
                next.balance = &self.balance + &entry.amount;
                next.total_earnings = &self.total_earnings + &entry.amount;
            }
            Direction::Debit => {
                let available = self.available_balance();
                if available < entry.amount {
                    return Err(LedgerRejection::InsufficientBalance {
                        available,
                        requested: entry.amount.clone(),
                    });
                }
                next.balance = &self.balance - &entry.amount;
                next.total_withdrawn = &self.total_withdrawn + &entry.amount;
            }
        }
        next.updated_at = now;

        Ok(PlannedPosting {
            balance_before: self.balance.clone(),
            balance_after: next.balance.clone(),
            wallet: next,
        })
    }

    pub fn plan_pending(
        &self,
        change: PendingChange,
        amount: &BigDecimal,
        now: DateTime<Utc>,
    ) -> Result<Wallet, LedgerRejection> {
        if *amount <= BigDecimal::from(0) {
            return Err(LedgerRejection::NonPositiveAmount);
        }

        let mut next = self.clone();
        match change {
            PendingChange::Reserve => {
                let available = self.available_balance();
                if available < *amount {
                    return Err(LedgerRejection::InsufficientBalance {
                        available,
                        requested: amount.clone(),
                    });
                }
                next.pending_amount = &self.pending_amount + amount;
            }
            PendingChange::Release => {
                if self.pending_amount < *amount {
                    return Err(LedgerRejection::InsufficientPending {
                        pending: self.pending_amount.clone(),
                        requested: amount.clone(),
                    });
                }
                next.pending_amount = &self.pending_amount - amount;
            }
        }
        next.updated_at = now;
        Ok(next)
    }
}

impl PlannedPosting {
    pub fn into_transaction(
        self,
        id: i64,
        entry: &LedgerEntry,
        now: DateTime<Utc>,
    ) -> (Wallet, WalletTransaction) {
        let transaction = WalletTransaction {
            id,
            wallet_id: self.wallet.id,
            transaction_type: entry.transaction_type,
            amount: entry.amount.clone(),
            description: entry.description.clone(),
            reference_id: entry.reference_id.clone(),
            status: TransactionStatus::Completed,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            created_at: now,
            processed_at: Some(now),
        };
        (self.wallet, transaction)
    }
}

/// Replay ledger rows from a zero opening balance.
pub fn replay_balance<'a>(
    transactions: impl IntoIterator<Item = &'a WalletTransaction>,
) -> BigDecimal {
    transactions
        .into_iter()
        .fold(BigDecimal::from(0), |balance, tx| {
            match tx.transaction_type.direction() {
                Direction::Credit => balance + &tx.amount,
                Direction::Debit => balance - &tx.amount,
            }
        })
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &WalletTransaction) -> bool {
        self.transaction_type
            .map_or(true, |t| t == tx.transaction_type)
            && self.from.map_or(true, |from| tx.created_at >= from)
            && self.to.map_or(true, |to| tx.created_at <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformTotals {
    pub total_earnings: BigDecimal,
    pub total_withdrawn: BigDecimal,
    pub wallet_count: i64,
}

// ----------------------------------------------------------------------------
// Repository
// ----------------------------------------------------------------------------

#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Returns the user's wallet, creating an empty one on first access.
    async fn get_or_create(&self, user_id: Uuid, now: DateTime<Utc>)
        -> Result<Wallet, DatabaseError>;

    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Wallet>, DatabaseError>;

    async fn find_by_id(&self, wallet_id: Uuid) -> Result<Option<Wallet>, DatabaseError>;

    /// Apply one entry atomically; see [`LedgerWrite`] for the outcomes.
    async fn post_entry(
        &self,
        user_id: Uuid,
        entry: &LedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<LedgerWrite, DatabaseError>;

    async fn adjust_pending(
        &self,
        user_id: Uuid,
        change: PendingChange,
        amount: &BigDecimal,
        now: DateTime<Utc>,
    ) -> Result<PendingWrite, DatabaseError>;

    async fn find_transaction(&self, id: i64) -> Result<Option<WalletTransaction>, DatabaseError>;

    async fn find_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<WalletTransaction>, DatabaseError>;

    /// Most recent first
    async fn transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<WalletTransaction>, DatabaseError>;

    /// Every row of the wallet in creation order
    async fn ledger(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>, DatabaseError>;

    async fn count_transactions(&self, wallet_id: Uuid) -> Result<i64, DatabaseError>;

    async fn platform_totals(&self) -> Result<PlatformTotals, DatabaseError>;
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    id: i64,
    wallet_id: Uuid,
    transaction_type: String,
    amount: BigDecimal,
    description: String,
    reference_id: Option<String>,
    status: String,
    balance_before: BigDecimal,
    balance_after: BigDecimal,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TransactionRow> for WalletTransaction {
    type Error = DatabaseError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let corrupt = |message: String| DatabaseError::new(DatabaseErrorKind::Unknown { message });

        Ok(WalletTransaction {
            id: row.id,
            wallet_id: row.wallet_id,
            transaction_type: row.transaction_type.parse().map_err(corrupt)?,
            amount: row.amount,
            description: row.description,
            reference_id: row.reference_id,
            status: row.status.parse().map_err(corrupt)?,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

const WALLET_COLUMNS: &str = "id, user_id, balance, total_earnings, total_withdrawn, \
     pending_amount, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, wallet_id, transaction_type, amount, description, \
     reference_id, status, balance_before, balance_after, created_at, processed_at";

/// Postgres-backed ledger. Each mutation runs in its own transaction holding
/// `FOR UPDATE` on the wallet row.
pub struct PgWalletRepository {
    pool: PgPool,
}

impl PgWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_wallet(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Wallet, DatabaseError> {
        sqlx::query(
            "INSERT INTO wallets (id, user_id, created_at, updated_at) VALUES ($1, $2, $3, $3) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let sql = format!(
            "SELECT {} FROM wallets WHERE user_id = $1 FOR UPDATE",
            WALLET_COLUMNS
        );
        sqlx::query_as::<_, Wallet>(&sql)
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn save_wallet(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        wallet: &Wallet,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE wallets SET balance = $2, total_earnings = $3, total_withdrawn = $4, \
             pending_amount = $5, updated_at = $6 WHERE id = $1",
        )
        .bind(wallet.id)
        .bind(&wallet.balance)
        .bind(&wallet.total_earnings)
        .bind(&wallet.total_withdrawn)
        .bind(&wallet.pending_amount)
        .bind(wallet.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }
}

#[async_trait]
impl WalletRepository for PgWalletRepository {
    async fn get_or_create(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Wallet, DatabaseError> {
        sqlx::query(
            "INSERT INTO wallets (id, user_id, created_at, updated_at) VALUES ($1, $2, $3, $3) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        self.find_by_user(user_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("wallet", user_id))
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Wallet>, DatabaseError> {
        let sql = format!("SELECT {} FROM wallets WHERE user_id = $1", WALLET_COLUMNS);
        sqlx::query_as::<_, Wallet>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_id(&self, wallet_id: Uuid) -> Result<Option<Wallet>, DatabaseError> {
        let sql = format!("SELECT {} FROM wallets WHERE id = $1", WALLET_COLUMNS);
        sqlx::query_as::<_, Wallet>(&sql)
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn post_entry(
        &self,
        user_id: Uuid,
        entry: &LedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<LedgerWrite, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let wallet = Self::lock_wallet(&mut tx, user_id, now).await?;

        // Under the wallet lock a same-wallet duplicate is always visible here.
        if let Some(reference) = &entry.reference_id {
            let sql = format!(
                "SELECT {} FROM wallet_transactions WHERE reference_id = $1",
                TRANSACTION_COLUMNS
            );
            let existing = sqlx::query_as::<_, TransactionRow>(&sql)
                .bind(reference)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;

            if let Some(row) = existing {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Ok(LedgerWrite::AlreadyApplied(row.try_into()?));
            }
        }

        let planned = match wallet.plan(entry, now) {
            Ok(planned) => planned,
            Err(rejection) => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Ok(LedgerWrite::Rejected(rejection));
            }
        };

        Self::save_wallet(&mut tx, &planned.wallet).await?;

        let sql = format!(
            "INSERT INTO wallet_transactions (wallet_id, transaction_type, amount, description, \
             reference_id, status, balance_before, balance_after, created_at, processed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let inserted = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(planned.wallet.id)
            .bind(entry.transaction_type.as_str())
            .bind(&entry.amount)
            .bind(&entry.description)
            .bind(&entry.reference_id)
            .bind(TransactionStatus::Completed.as_str())
            .bind(&planned.balance_before)
            .bind(&planned.balance_after)
            .bind(now)
            .fetch_one(&mut *tx)
            .await;

        match inserted {
            Ok(row) => {
                tx.commit().await.map_err(DatabaseError::from_sqlx)?;
                Ok(LedgerWrite::Applied {
                    wallet: planned.wallet,
                    transaction: row.try_into()?,
                })
            }
            Err(e) => {
                let err = DatabaseError::from_sqlx(e);
                // Lost the race to a writer on another wallet with the same reference.
                if let (true, Some(reference)) = (err.is_unique_violation(), &entry.reference_id) {
                    tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                    debug!(reference = %reference, "duplicate reference detected on insert");
                    return match self.find_by_reference(reference).await? {
                        Some(existing) => Ok(LedgerWrite::AlreadyApplied(existing)),
                        None => Err(err),
                    };
                }
                Err(err)
            }
        }
    }

    async fn adjust_pending(
        &self,
        user_id: Uuid,
        change: PendingChange,
        amount: &BigDecimal,
        now: DateTime<Utc>,
    ) -> Result<PendingWrite, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let wallet = Self::lock_wallet(&mut tx, user_id, now).await?;

        match wallet.plan_pending(change, amount, now) {
            Ok(next) => {
                Self::save_wallet(&mut tx, &next).await?;
                tx.commit().await.map_err(DatabaseError::from_sqlx)?;
                Ok(PendingWrite::Applied(next))
            }
            Err(rejection) => {
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                Ok(PendingWrite::Rejected(rejection))
            }
        }
    }

    async fn find_transaction(&self, id: i64) -> Result<Option<WalletTransaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM wallet_transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(WalletTransaction::try_from)
            .transpose()
    }

    async fn find_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<WalletTransaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM wallet_transactions WHERE reference_id = $1",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(reference_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(WalletTransaction::try_from)
            .transpose()
    }

    async fn transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<Vec<WalletTransaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM wallet_transactions \
             WHERE wallet_id = $1 \
               AND ($2::text IS NULL OR transaction_type = $2) \
               AND ($3::timestamptz IS NULL OR created_at >= $3) \
               AND ($4::timestamptz IS NULL OR created_at <= $4) \
             ORDER BY id DESC \
             LIMIT $5",
            TRANSACTION_COLUMNS
        );

        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(wallet_id)
            .bind(filter.transaction_type.map(|t| t.as_str()))
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(WalletTransaction::try_from)
            .collect()
    }

    async fn ledger(&self, wallet_id: Uuid) -> Result<Vec<WalletTransaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM wallet_transactions WHERE wallet_id = $1 ORDER BY id ASC",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(wallet_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(WalletTransaction::try_from)
            .collect()
    }

    async fn count_transactions(&self, wallet_id: Uuid) -> Result<i64, DatabaseError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM wallet_transactions WHERE wallet_id = $1")
            .bind(wallet_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn platform_totals(&self) -> Result<PlatformTotals, DatabaseError> {
        let (total_earnings, total_withdrawn, wallet_count): (
            Option<BigDecimal>,
            Option<BigDecimal>,
            i64,
        ) = sqlx::query_as(
            "SELECT SUM(total_earnings), SUM(total_withdrawn), COUNT(*) FROM wallets",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(PlatformTotals {
            total_earnings: total_earnings.unwrap_or_else(|| BigDecimal::from(0)),
            total_withdrawn: total_withdrawn.unwrap_or_else(|| BigDecimal::from(0)),
            wallet_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn entry(transaction_type: TransactionType, value: &str) -> LedgerEntry {
        LedgerEntry {
            transaction_type,
            amount: amount(value),
            description: "test".to_string(),
            reference_id: None,
        }
    }

    #[test]
    fn credit_plan_moves_balance_and_earnings() {
        let now = Utc::now();
        let wallet = Wallet::new(Uuid::new_v4(), now);
        let planned = wallet
            .plan(&entry(TransactionType::Credit, "900.00"), now)
            .unwrap();

        assert_eq!(planned.balance_before, amount("0"));
        assert_eq!(planned.balance_after, amount("900.00"));
        assert_eq!(planned.wallet.total_earnings, amount("900.00"));
        assert_eq!(planned.wallet.total_withdrawn, amount("0"));
    }

    #[test]
    fn debit_plan_respects_pending_reservation() {
        let now = Utc::now();
        let mut wallet = Wallet::new(Uuid::new_v4(), now);
        wallet.balance = amount("100.00");
        wallet.total_earnings = amount("100.00");
        wallet.pending_amount = amount("30.00");

        let rejection = wallet
            .plan(&entry(TransactionType::Withdrawal, "80.00"), now)
            .unwrap_err();
        assert_eq!(
            rejection,
            LedgerRejection::InsufficientBalance {
                available: amount("70.00"),
                requested: amount("80.00"),
            }
        );

        let planned = wallet
            .plan(&entry(TransactionType::Withdrawal, "70.00"), now)
            .unwrap();
        assert_eq!(planned.balance_after, amount("30.00"));
        assert_eq!(planned.wallet.total_withdrawn, amount("70.00"));
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let now = Utc::now();
        let wallet = Wallet::new(Uuid::new_v4(), now);
        assert_eq!(
            wallet.plan(&entry(TransactionType::Credit, "0"), now).unwrap_err(),
            LedgerRejection::NonPositiveAmount
        );
        assert_eq!(
            wallet.plan(&entry(TransactionType::Bonus, "-1"), now).unwrap_err(),
            LedgerRejection::NonPositiveAmount
        );
    }

    #[test]
    fn transaction_directions() {
        assert_eq!(TransactionType::Refund.direction(), Direction::Credit);
        assert_eq!(TransactionType::Penalty.direction(), Direction::Debit);
        assert_eq!(TransactionType::Credit.reversal(), TransactionType::Debit);
        assert_eq!(TransactionType::Withdrawal.reversal(), TransactionType::Refund);
    }

    #[test]
    fn release_cannot_exceed_pending() {
        let now = Utc::now();
        let mut wallet = Wallet::new(Uuid::new_v4(), now);
        wallet.balance = amount("50");
        wallet.pending_amount = amount("10");

        assert!(matches!(
            wallet.plan_pending(PendingChange::Release, &amount("20"), now),
            Err(LedgerRejection::InsufficientPending { .. })
        ));
        let released = wallet
            .plan_pending(PendingChange::Release, &amount("10"), now)
            .unwrap();
        assert_eq!(released.pending_amount, amount("0"));
    }

    #[test]
    fn replay_reproduces_planned_balance() {
        let now = Utc::now();
        let mut wallet = Wallet::new(Uuid::new_v4(), now);
        let mut rows = Vec::new();
        let steps = [
            (TransactionType::Credit, "900.00"),
            (TransactionType::Bonus, "50.25"),
            (TransactionType::Withdrawal, "400.10"),
            (TransactionType::Penalty, "0.15"),
        ];

        for (i, (kind, value)) in steps.iter().enumerate() {
            let e = entry(*kind, value);
            let (next, tx) = wallet.plan(&e, now).unwrap().into_transaction(i as i64 + 1, &e, now);
            wallet = next;
            rows.push(tx);
        }

        assert_eq!(replay_balance(&rows), wallet.balance);
        assert_eq!(wallet.balance, &wallet.total_earnings - &wallet.total_withdrawn);
    }

    #[test]
    fn filter_matches_type_and_range() {
        let now = Utc::now();
        let tx = WalletTransaction {
            id: 1,
            wallet_id: Uuid::new_v4(),
            transaction_type: TransactionType::Credit,
            amount: amount("1"),
            description: String::new(),
            reference_id: None,
            status: TransactionStatus::Completed,
            balance_before: amount("0"),
            balance_after: amount("1"),
            created_at: now,
            processed_at: Some(now),
        };

        assert!(TransactionFilter::default().matches(&tx));
        assert!(!TransactionFilter {
            transaction_type: Some(TransactionType::Withdrawal),
            ..Default::default()
        }
        .matches(&tx));
        assert!(!TransactionFilter {
            from: Some(now + chrono::Duration::seconds(1)),
            ..Default::default()
        }
        .matches(&tx));
    }
}
