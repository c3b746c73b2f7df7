//! Wallet Ledger service
//!
//! Every balance change goes through [`WalletLedger::post`], which hands one
//! entry to the store as a single atomic unit. Entries carrying an external
//! reference id are applied at most once; a repeat returns the original row
//! as [`PostingOutcome::AlreadyApplied`].

use crate::clock::Clock;
use crate::database::error::DatabaseError;
use crate::database::wallet_repository::{
    replay_balance, LedgerEntry, LedgerRejection, LedgerWrite, PendingChange, PendingWrite,
    PlatformTotals, TransactionFilter, TransactionType, Wallet, WalletRepository,
    WalletTransaction,
};
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::money::{format_amount, is_valid_amount};
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("amount {amount} must be positive with at most two decimal places")]
    InvalidAmount { amount: BigDecimal },

    #[error("wallet not found for user {user_id}")]
    WalletNotFound { user_id: Uuid },

    #[error("wallet transaction {transaction_id} not found")]
    TransactionNotFound { transaction_id: i64 },

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: BigDecimal,
        requested: BigDecimal,
    },

    #[error("cannot release {requested}: only {pending} is reserved")]
    InsufficientPending {
        pending: BigDecimal,
        requested: BigDecimal,
    },

    /// The reference id already belongs to a transaction on another wallet
    #[error("reference {reference} already used by another wallet")]
    DuplicateReference { reference: String },

    #[error("ledger storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl LedgerError {
    fn from_rejection(rejection: LedgerRejection, amount: &BigDecimal) -> Self {
        match rejection {
            LedgerRejection::NonPositiveAmount => LedgerError::InvalidAmount {
                amount: amount.clone(),
            },
            LedgerRejection::InsufficientBalance {
                available,
                requested,
            } => LedgerError::InsufficientBalance {
                available,
                requested,
            },
            LedgerRejection::InsufficientPending { pending, requested } => {
                LedgerError::InsufficientPending { pending, requested }
            }
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let kind = match err {
            LedgerError::InvalidAmount { amount } => {
                AppErrorKind::Domain(DomainError::InvalidAmount {
                    amount: amount.to_string(),
                    reason: "Amount must be greater than zero with at most two decimal places"
                        .to_string(),
                })
            }
            LedgerError::WalletNotFound { user_id } => {
                AppErrorKind::Domain(DomainError::WalletNotFound {
                    user_id: user_id.to_string(),
                })
            }
            LedgerError::TransactionNotFound { transaction_id } => {
                AppErrorKind::Domain(DomainError::TransactionNotFound {
                    transaction_id: transaction_id.to_string(),
                })
            }
            LedgerError::InsufficientBalance {
                available,
                requested,
            } => AppErrorKind::Domain(DomainError::InsufficientBalance {
                available: format_amount(&available),
                requested: format_amount(&requested),
            }),
            LedgerError::InsufficientPending { pending, requested } => {
                AppErrorKind::Domain(DomainError::InsufficientBalance {
                    available: format_amount(&pending),
                    requested: format_amount(&requested),
                })
            }
            LedgerError::DuplicateReference { reference } => {
                AppErrorKind::Domain(DomainError::DuplicateReference { reference })
            }
            LedgerError::Storage(db) => return db.into(),
        };
        AppError::new(kind)
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result of a posting. A repeat of a known reference id is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PostingOutcome {
    Applied(WalletTransaction),
    AlreadyApplied(WalletTransaction),
}

impl PostingOutcome {
    pub fn transaction(&self) -> &WalletTransaction {
        match self {
            PostingOutcome::Applied(tx) | PostingOutcome::AlreadyApplied(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> WalletTransaction {
        match self {
            PostingOutcome::Applied(tx) | PostingOutcome::AlreadyApplied(tx) => tx,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, PostingOutcome::Applied(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletBalance {
    pub user_id: Uuid,
    pub balance: BigDecimal,
    pub available_balance: BigDecimal,
    pub total_earnings: BigDecimal,
    pub total_withdrawn: BigDecimal,
    pub pending_amount: BigDecimal,
}

impl From<&Wallet> for WalletBalance {
    fn from(wallet: &Wallet) -> Self {
        Self {
            user_id: wallet.user_id,
            balance: wallet.balance.clone(),
            available_balance: wallet.available_balance(),
            total_earnings: wallet.total_earnings.clone(),
            total_withdrawn: wallet.total_withdrawn.clone(),
            pending_amount: wallet.pending_amount.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletSummary {
    #[serde(flatten)]
    pub balance: WalletBalance,
    pub transaction_count: i64,
}

/// Cached balance compared against a replay of the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerAudit {
    pub wallet_id: Uuid,
    pub cached_balance: BigDecimal,
    pub replayed_balance: BigDecimal,
    pub transaction_count: usize,
    pub consistent: bool,
}

pub struct WalletLedger {
    wallets: Arc<dyn WalletRepository>,
    clock: Arc<dyn Clock>,
}

impl WalletLedger {
    pub fn new(wallets: Arc<dyn WalletRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { wallets, clock }
    }

    pub async fn get_or_create_wallet(&self, user_id: Uuid) -> LedgerResult<Wallet> {
        Ok(self.wallets.get_or_create(user_id, self.clock.now()).await?)
    }

    pub async fn balance(&self, user_id: Uuid) -> LedgerResult<WalletBalance> {
        let wallet = self.get_or_create_wallet(user_id).await?;
        Ok(WalletBalance::from(&wallet))
    }

    /// Credit `amount` to the user's wallet. With a reference id the credit
    /// is applied at most once.
    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        description: &str,
        reference_id: Option<&str>,
    ) -> LedgerResult<PostingOutcome> {
        self.post(
            user_id,
            LedgerEntry {
                transaction_type: TransactionType::Credit,
                amount: amount.clone(),
                description: description.to_string(),
                reference_id: reference_id.map(str::to_string),
            },
        )
        .await
    }

    /// Withdraw from the available balance.
    pub async fn withdraw(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        description: &str,
    ) -> LedgerResult<WalletTransaction> {
        let outcome = self
            .post(
                user_id,
                LedgerEntry {
                    transaction_type: TransactionType::Withdrawal,
                    amount: amount.clone(),
                    description: description.to_string(),
                    reference_id: None,
                },
            )
            .await?;
        Ok(outcome.into_transaction())
    }

    /// Debit of type DEBIT, e.g. a clawback. Idempotent on `reference_id`.
    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: &BigDecimal,
        description: &str,
        reference_id: Option<&str>,
    ) -> LedgerResult<PostingOutcome> {
        self.post(
            user_id,
            LedgerEntry {
                transaction_type: TransactionType::Debit,
                amount: amount.clone(),
                description: description.to_string(),
                reference_id: reference_id.map(str::to_string),
            },
        )
        .await
    }

    pub async fn post(&self, user_id: Uuid, entry: LedgerEntry) -> LedgerResult<PostingOutcome> {
        if !is_valid_amount(&entry.amount) {
            return Err(LedgerError::InvalidAmount {
                amount: entry.amount,
            });
        }

        let written = self
            .wallets
            .post_entry(user_id, &entry, self.clock.now())
            .await?;

        match written {
            LedgerWrite::Applied {
                wallet,
                transaction,
            } => {
                info!(
                    user_id = %user_id,
                    wallet_id = %wallet.id,
                    transaction_id = transaction.id,
                    transaction_type = %transaction.transaction_type,
                    amount = %transaction.amount,
                    balance_after = %transaction.balance_after,
                    "ledger entry applied"
                );
                Ok(PostingOutcome::Applied(transaction))
            }
            LedgerWrite::AlreadyApplied(existing) => {
                let reference = entry.reference_id.unwrap_or_default();
                let owner = self.wallets.find_by_user(user_id).await?;
                if owner.map(|w| w.id) != Some(existing.wallet_id) {
                    warn!(
                        user_id = %user_id,
                        reference = %reference,
                        "reference id belongs to another wallet"
                    );
                    return Err(LedgerError::DuplicateReference { reference });
                }

                info!(
                    user_id = %user_id,
                    reference = %reference,
                    transaction_id = existing.id,
                    "duplicate reference, returning existing transaction"
                );
                Ok(PostingOutcome::AlreadyApplied(existing))
            }
            LedgerWrite::Rejected(rejection) => {
                let err = LedgerError::from_rejection(rejection, &entry.amount);
                warn!(user_id = %user_id, error = %err, "ledger entry rejected");
                Err(err)
            }
        }
    }

    /// Append the opposite of an existing transaction. The original row is
    /// left untouched; repeating the call returns the first reversal.
    pub async fn reverse_transaction(
        &self,
        transaction_id: i64,
        reason: &str,
    ) -> LedgerResult<PostingOutcome> {
        let original = self
            .wallets
            .find_transaction(transaction_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound { transaction_id })?;

        let wallet = self
            .wallets
            .find_by_id(original.wallet_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound { transaction_id })?;

        let reversal_ref = format!("reversal_{}", original.id);
        self.post(
            wallet.user_id,
            LedgerEntry {
                transaction_type: original.transaction_type.reversal(),
                amount: original.amount.clone(),
                description: format!("Reversal of transaction {}: {}", original.id, reason),
                reference_id: Some(reversal_ref),
            },
        )
        .await
    }

    /// Hold funds out of the available balance.
    pub async fn reserve(&self, user_id: Uuid, amount: &BigDecimal) -> LedgerResult<Wallet> {
        self.adjust_pending(user_id, PendingChange::Reserve, amount)
            .await
    }

    pub async fn release(&self, user_id: Uuid, amount: &BigDecimal) -> LedgerResult<Wallet> {
        self.adjust_pending(user_id, PendingChange::Release, amount)
            .await
    }

    async fn adjust_pending(
        &self,
        user_id: Uuid,
        change: PendingChange,
        amount: &BigDecimal,
    ) -> LedgerResult<Wallet> {
        if !is_valid_amount(amount) {
            return Err(LedgerError::InvalidAmount {
                amount: amount.clone(),
            });
        }

        match self
            .wallets
            .adjust_pending(user_id, change, amount, self.clock.now())
            .await?
        {
            PendingWrite::Applied(wallet) => {
                info!(
                    user_id = %user_id,
                    ?change,
                    amount = %amount,
                    pending = %wallet.pending_amount,
                    "pending amount adjusted"
                );
                Ok(wallet)
            }
            PendingWrite::Rejected(rejection) => Err(LedgerError::from_rejection(rejection, amount)),
        }
    }

    /// Most recent first. A user without a wallet has an empty history.
    pub async fn transaction_history(
        &self,
        user_id: Uuid,
        filter: &TransactionFilter,
    ) -> LedgerResult<Vec<WalletTransaction>> {
        match self.wallets.find_by_user(user_id).await? {
            Some(wallet) => Ok(self.wallets.transactions(wallet.id, filter).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn transaction_exists(&self, reference_id: &str) -> LedgerResult<bool> {
        Ok(self.wallets.find_by_reference(reference_id).await?.is_some())
    }

    pub async fn find_by_reference(
        &self,
        reference_id: &str,
    ) -> LedgerResult<Option<WalletTransaction>> {
        Ok(self.wallets.find_by_reference(reference_id).await?)
    }

    pub async fn wallet_summary(&self, user_id: Uuid) -> LedgerResult<WalletSummary> {
        let wallet = self
            .wallets
            .find_by_user(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound { user_id })?;
        let transaction_count = self.wallets.count_transactions(wallet.id).await?;

        Ok(WalletSummary {
            balance: WalletBalance::from(&wallet),
            transaction_count,
        })
    }

    pub async fn audit_wallet(&self, user_id: Uuid) -> LedgerResult<LedgerAudit> {
        let wallet = self
            .wallets
            .find_by_user(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound { user_id })?;
        let ledger = self.wallets.ledger(wallet.id).await?;
        let replayed_balance = replay_balance(&ledger);

        let audit = LedgerAudit {
            wallet_id: wallet.id,
            consistent: replayed_balance == wallet.balance,
            cached_balance: wallet.balance,
            replayed_balance,
            transaction_count: ledger.len(),
        };

        if !audit.consistent {
            warn!(
                wallet_id = %audit.wallet_id,
                cached = %audit.cached_balance,
                replayed = %audit.replayed_balance,
                "wallet balance diverges from ledger"
            );
        }
        Ok(audit)
    }

    pub async fn platform_totals(&self) -> LedgerResult<PlatformTotals> {
        Ok(self.wallets.platform_totals().await?)
    }
}
