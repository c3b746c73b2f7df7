use crate::database::wallet_repository::{TransactionFilter, TransactionType, WalletTransaction};
use crate::error::ValidationError;
use crate::middleware::error::error_response;
use crate::services::wallet_ledger::WalletLedger;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const MAX_HISTORY_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct WalletApiState {
    pub ledger: Arc<WalletLedger>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    #[serde(rename = "type")]
    pub transaction_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl TransactionQuery {
    fn into_filter(self) -> Result<TransactionFilter, ValidationError> {
        let transaction_type = match self.transaction_type {
            Some(raw) => Some(raw.parse::<TransactionType>().map_err(|reason| {
                ValidationError::InvalidFormat {
                    field: "type".to_string(),
                    reason,
                }
            })?),
            None => None,
        };

        if let Some(limit) = self.limit {
            if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
                return Err(ValidationError::OutOfRange {
                    field: "limit".to_string(),
                    min: Some("1".to_string()),
                    max: Some(MAX_HISTORY_LIMIT.to_string()),
                });
            }
        }

        Ok(TransactionFilter {
            transaction_type,
            from: self.from,
            to: self.to,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalBody {
    pub amount: BigDecimal,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransactionHistoryResponse {
    pub transactions: Vec<WalletTransaction>,
}

/// GET /api/wallets/{user_id}
pub async fn get_balance(
    State(state): State<WalletApiState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> Response {
    match state.ledger.balance(user_id).await {
        Ok(balance) => Json(balance).into_response(),
        Err(e) => error_response(e, &headers),
    }
}

/// GET /api/wallets/{user_id}/transactions
pub async fn list_transactions(
    State(state): State<WalletApiState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Query(query): Query<TransactionQuery>,
) -> Response {
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(e) => return error_response(e, &headers),
    };

    match state.ledger.transaction_history(user_id, &filter).await {
        Ok(transactions) => Json(TransactionHistoryResponse { transactions }).into_response(),
        Err(e) => error_response(e, &headers),
    }
}

/// POST /api/wallets/{user_id}/withdrawals
pub async fn request_withdrawal(
    State(state): State<WalletApiState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(body): Json<WithdrawalBody>,
) -> Response {
    info!(user_id = %user_id, amount = %body.amount, "Withdrawal requested");

    let description = body.description.as_deref().unwrap_or("Withdrawal");
    match state.ledger.withdraw(user_id, &body.amount, description).await {
        Ok(tx) => (StatusCode::CREATED, Json(tx)).into_response(),
        Err(e) => error_response(e, &headers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_is_rejected() {
        let query = TransactionQuery {
            transaction_type: Some("TIP".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            query.into_filter(),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn type_filter_is_case_insensitive() {
        let query = TransactionQuery {
            transaction_type: Some("withdrawal".to_string()),
            limit: Some(10),
            ..Default::default()
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.transaction_type, Some(TransactionType::Withdrawal));
        assert_eq!(filter.limit, Some(10));
    }

    #[test]
    fn limit_must_be_positive() {
        let query = TransactionQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            query.into_filter(),
            Err(ValidationError::OutOfRange { .. })
        ));
    }
}
