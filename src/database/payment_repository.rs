use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::payments::types::PaymentMethod;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Payment status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Created,
    Pending,
    Success,
    Failed,
    Cancelled,
    Refunded,
    PartialRefund,
}

impl PaymentStatus {
    pub const OPEN: [PaymentStatus; 2] = [PaymentStatus::Created, PaymentStatus::Pending];
    pub const REFUNDABLE: [PaymentStatus; 2] =
        [PaymentStatus::Success, PaymentStatus::PartialRefund];
    /// Money was captured at some point; the driver is owed the unrefunded share.
    pub const CAPTURED: [PaymentStatus; 3] = [
        PaymentStatus::Success,
        PaymentStatus::PartialRefund,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "CREATED",
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::PartialRefund => "PARTIAL_REFUND",
        }
    }

    /// Still waiting on the payer or the gateway.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Created | PaymentStatus::Pending)
    }

    /// No way back to an open state. `PartialRefund` counts: it only accepts
    /// further refunds.
    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        use PaymentStatus::*;
        match self {
            Created => &[Pending, Success, Failed, Cancelled],
            Pending => &[Success, Failed, Cancelled],
            Success => &[PartialRefund, Refunded],
            PartialRefund => &[PartialRefund, Refunded],
            Failed | Cancelled | Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(PaymentStatus::Created),
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            "CANCELLED" => Ok(PaymentStatus::Cancelled),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            "PARTIAL_REFUND" => Ok(PaymentStatus::PartialRefund),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

// ============================================================================
// Entity
// ============================================================================

/// One payment attempt against the gateway for one booking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    #[serde(skip_serializing)]
    pub gateway_signature: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub failure_reason: Option<String>,
    pub refunded_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(
        booking_id: Uuid,
        user_id: Uuid,
        gateway_order_id: String,
        amount: BigDecimal,
        currency: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            user_id,
            gateway_order_id,
            gateway_payment_id: None,
            gateway_signature: None,
            amount,
            currency,
            status: PaymentStatus::Created,
            payment_method: None,
            failure_reason: None,
            refunded_amount: BigDecimal::from(0),
            created_at: now,
            updated_at: now,
            paid_at: None,
            settled_at: None,
        }
    }

    /// Amount still refundable
    pub fn refundable_amount(&self) -> BigDecimal {
        &self.amount - &self.refunded_amount
    }

    /// Apply a transition in memory using the same rules as the SQL update:
    /// gateway payment id and paid_at are write-once.
    pub fn apply(&mut self, update: &PaymentTransition) {
        self.status = update.to;
        self.updated_at = update.at;
        if self.gateway_payment_id.is_none() {
            self.gateway_payment_id = update.gateway_payment_id.clone();
        }
        if update.gateway_signature.is_some() {
            self.gateway_signature = update.gateway_signature.clone();
        }
        if update.payment_method.is_some() {
            self.payment_method = update.payment_method;
        }
        if update.failure_reason.is_some() {
            self.failure_reason = update.failure_reason.clone();
        }
        if let Some(refunded) = &update.refunded_amount {
            self.refunded_amount = refunded.clone();
        }
        if self.paid_at.is_none() {
            self.paid_at = update.paid_at;
        }
    }
}

/// Field changes carried by a status transition
#[derive(Debug, Clone)]
pub struct PaymentTransition {
    pub to: PaymentStatus,
    pub at: DateTime<Utc>,
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub failure_reason: Option<String>,
    pub refunded_amount: Option<BigDecimal>,
    /// Guard for refunds: only apply if the stored refunded amount still matches
    pub expected_refunded_amount: Option<BigDecimal>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl PaymentTransition {
    pub fn to(status: PaymentStatus, at: DateTime<Utc>) -> Self {
        Self {
            to: status,
            at,
            gateway_payment_id: None,
            gateway_signature: None,
            payment_method: None,
            failure_reason: None,
            refunded_amount: None,
            expected_refunded_amount: None,
            paid_at: None,
        }
    }

    pub fn failed(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Self::to(PaymentStatus::Failed, at)
        }
    }

    /// Whether a stored payment satisfies the refund guard
    pub fn guard_matches(&self, payment: &Payment) -> bool {
        match &self.expected_refunded_amount {
            Some(expected) => &payment.refunded_amount == expected,
            None => true,
        }
    }
}

// ============================================================================
// Repository
// ============================================================================

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, payment: &Payment) -> Result<Payment, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_order_id(&self, gateway_order_id: &str)
        -> Result<Option<Payment>, DatabaseError>;

    /// Most recent first
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>, DatabaseError>;

    async fn has_successful_payment(&self, booking_id: Uuid) -> Result<bool, DatabaseError>;

    /// Sum of captured amounts net of refunds
    async fn total_paid_by_user(&self, user_id: Uuid) -> Result<BigDecimal, DatabaseError>;

    /// Compare-and-set: applies `update` only if the payment is currently in
    /// one of `from`. Returns `None` when the guard did not match.
    async fn transition(
        &self,
        gateway_order_id: &str,
        from: &[PaymentStatus],
        update: &PaymentTransition,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Open payments created before `cutoff`
    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>, DatabaseError>;

    /// Captured payments (refunded or not) paid before `paid_before` whose
    /// driver credit is not confirmed
    async fn find_unsettled(
        &self,
        paid_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError>;

    async fn mark_settled(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError>;
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    user_id: Uuid,
    gateway_order_id: String,
    gateway_payment_id: Option<String>,
    gateway_signature: Option<String>,
    amount: BigDecimal,
    currency: String,
    status: String,
    payment_method: Option<String>,
    failure_reason: Option<String>,
    refunded_amount: BigDecimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let corrupt = |message: String| DatabaseError::new(DatabaseErrorKind::Unknown { message });

        Ok(Payment {
            id: row.id,
            booking_id: row.booking_id,
            user_id: row.user_id,
            gateway_order_id: row.gateway_order_id,
            gateway_payment_id: row.gateway_payment_id,
            gateway_signature: row.gateway_signature,
            amount: row.amount,
            currency: row.currency,
            status: row.status.parse().map_err(corrupt)?,
            payment_method: row
                .payment_method
                .map(|m| m.parse::<PaymentMethod>())
                .transpose()
                .map_err(corrupt)?,
            failure_reason: row.failure_reason,
            refunded_amount: row.refunded_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
            paid_at: row.paid_at,
            settled_at: row.settled_at,
        })
    }
}

const PAYMENT_COLUMNS: &str = "id, booking_id, user_id, gateway_order_id, gateway_payment_id, \
     gateway_signature, amount, currency, status, payment_method, failure_reason, \
     refunded_amount, created_at, updated_at, paid_at, settled_at";

fn status_list(statuses: &[PaymentStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Postgres-backed payment store
pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_many(
        &self,
        query: sqlx::query::QueryAs<'_, sqlx::Postgres, PaymentRow, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<Payment>, DatabaseError> {
        query
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert(&self, payment: &Payment) -> Result<Payment, DatabaseError> {
        let sql = format!(
            "INSERT INTO payments ({cols}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {cols}",
            cols = PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.id)
            .bind(payment.booking_id)
            .bind(payment.user_id)
            .bind(&payment.gateway_order_id)
            .bind(&payment.gateway_payment_id)
            .bind(&payment.gateway_signature)
            .bind(&payment.amount)
            .bind(&payment.currency)
            .bind(payment.status.as_str())
            .bind(payment.payment_method.map(|m| m.as_str()))
            .bind(&payment.failure_reason)
            .bind(&payment.refunded_amount)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .bind(payment.paid_at)
            .bind(payment.settled_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Payment::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_by_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE gateway_order_id = $1",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(gateway_order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE user_id = $1 ORDER BY created_at DESC",
            PAYMENT_COLUMNS
        );
        self.fetch_many(sqlx::query_as::<_, PaymentRow>(&sql).bind(user_id))
            .await
    }

    async fn has_successful_payment(&self, booking_id: Uuid) -> Result<bool, DatabaseError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM payments WHERE booking_id = $1 AND status = ANY($2))",
        )
        .bind(booking_id)
        .bind(status_list(&PaymentStatus::REFUNDABLE))
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(exists)
    }

    async fn total_paid_by_user(&self, user_id: Uuid) -> Result<BigDecimal, DatabaseError> {
        let total: Option<BigDecimal> = sqlx::query_scalar(
            "SELECT SUM(amount - refunded_amount) FROM payments \
             WHERE user_id = $1 AND status = ANY($2)",
        )
        .bind(user_id)
        .bind(status_list(&[
            PaymentStatus::Success,
            PaymentStatus::PartialRefund,
            PaymentStatus::Refunded,
        ]))
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(total.unwrap_or_else(|| BigDecimal::from(0)))
    }

    async fn transition(
        &self,
        gateway_order_id: &str,
        from: &[PaymentStatus],
        update: &PaymentTransition,
    ) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!(
            "UPDATE payments SET \
                 status = $2, \
                 updated_at = $3, \
                 gateway_payment_id = COALESCE(gateway_payment_id, $4), \
                 gateway_signature = COALESCE($5, gateway_signature), \
                 payment_method = COALESCE($6, payment_method), \
                 failure_reason = COALESCE($7, failure_reason), \
                 refunded_amount = COALESCE($8, refunded_amount), \
                 paid_at = COALESCE(paid_at, $9) \
             WHERE gateway_order_id = $1 \
               AND status = ANY($10) \
               AND ($11::numeric IS NULL OR refunded_amount = $11) \
             RETURNING {}",
            PAYMENT_COLUMNS
        );

        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(gateway_order_id)
            .bind(update.to.as_str())
            .bind(update.at)
            .bind(&update.gateway_payment_id)
            .bind(&update.gateway_signature)
            .bind(update.payment_method.map(|m| m.as_str()))
            .bind(&update.failure_reason)
            .bind(&update.refunded_amount)
            .bind(update.paid_at)
            .bind(status_list(from))
            .bind(&update.expected_refunded_amount)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE status = ANY($1) AND created_at < $2 \
             ORDER BY created_at ASC",
            PAYMENT_COLUMNS
        );
        self.fetch_many(
            sqlx::query_as::<_, PaymentRow>(&sql)
                .bind(status_list(&PaymentStatus::OPEN))
                .bind(cutoff),
        )
        .await
    }

    async fn find_unsettled(
        &self,
        paid_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments \
             WHERE status = ANY($1) AND settled_at IS NULL AND paid_at < $2 \
             ORDER BY paid_at ASC LIMIT $3",
            PAYMENT_COLUMNS
        );
        self.fetch_many(
            sqlx::query_as::<_, PaymentRow>(&sql)
                .bind(status_list(&PaymentStatus::CAPTURED))
                .bind(paid_before)
                .bind(limit),
        )
        .await
    }

    async fn mark_settled(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE payments SET settled_at = COALESCE(settled_at, $2) WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("payment", id));
        }
        Ok(())
    }
}
