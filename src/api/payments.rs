//! Payment order endpoints used by the rider checkout.

use crate::database::payment_repository::Payment;
use crate::error::ValidationError;
use crate::middleware::error::error_response;
use crate::services::payment_service::{
    GatewayPublicConfig, PaymentOrder, PaymentService, RefundOutcome,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
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

#[derive(Clone)]
pub struct PaymentsState {
    pub payment_service: Arc<PaymentService>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
}

/// Checkout callback; accepts the gateway's own field names.
#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentBody {
    #[serde(alias = "razorpay_payment_id")]
    pub gateway_payment_id: String,
    #[serde(alias = "razorpay_order_id")]
    pub gateway_order_id: String,
    #[serde(alias = "razorpay_signature")]
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentFailureBody {
    #[serde(alias = "razorpay_order_id")]
    pub gateway_order_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundBody {
    #[serde(default)]
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmPaymentResponse {
    pub payment_id: Uuid,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub settled: bool,
}

#[derive(Debug, Serialize)]
pub struct UserPaymentsResponse {
    pub payments: Vec<Payment>,
    pub total_paid: BigDecimal,
}

/// POST /api/payments/orders
pub async fn create_order(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Json(body): Json<CreateOrderBody>,
) -> Response {
    info!(booking_id = %body.booking_id, amount = %body.amount, "Payment order requested");

    match state
        .payment_service
        .create_payment(body.booking_id, body.user_id, &body.amount)
        .await
    {
        Ok(order) => (StatusCode::CREATED, Json::<PaymentOrder>(order)).into_response(),
        Err(e) => error_response(e, &headers),
    }
}

/// POST /api/payments/confirm
pub async fn confirm_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Json(body): Json<ConfirmPaymentBody>,
) -> Response {
    match state
        .payment_service
        .process_payment(
            &body.gateway_payment_id,
            &body.gateway_order_id,
            &body.signature,
        )
        .await
    {
        Ok(payment) => Json(ConfirmPaymentResponse {
            payment_id: payment.id,
            status: payment.status.to_string(),
            paid_at: payment.paid_at,
            settled: payment.settled_at.is_some(),
        })
        .into_response(),
        Err(e) => error_response(e, &headers),
    }
}

/// POST /api/payments/failure
pub async fn report_failure(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Json(body): Json<PaymentFailureBody>,
) -> Response {
    let reason = body.reason.as_deref().unwrap_or("Payment failed");
    match state
        .payment_service
        .handle_payment_failure(&body.gateway_order_id, reason)
        .await
    {
        Ok(payment) => Json(payment).into_response(),
        Err(e) => error_response(e, &headers),
    }
}

/// POST /api/payments/{payment_id}/cancel
pub async fn cancel_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
) -> Response {
    match state.payment_service.cancel_payment(payment_id).await {
        Ok(payment) => Json(payment).into_response(),
        Err(e) => error_response(e, &headers),
    }
}

/// POST /api/payments/{payment_id}/refund
pub async fn refund_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
    body: Bytes,
) -> Response {
    // The body is optional: an empty request refunds the outstanding amount.
    let body: RefundBody = if body.is_empty() {
        RefundBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                return error_response(
                    ValidationError::InvalidFormat {
                        field: "body".to_string(),
                        reason: e.to_string(),
                    },
                    &headers,
                )
            }
        }
    };
    match state
        .payment_service
        .refund_payment(payment_id, body.amount, body.reason.as_deref())
        .await
    {
        Ok(outcome) => Json::<RefundOutcome>(outcome).into_response(),
        Err(e) => error_response(e, &headers),
    }
}

/// GET /api/payments/{payment_id}
pub async fn get_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
) -> Response {
    match state.payment_service.get_payment(payment_id).await {
        Ok(payment) => Json(payment).into_response(),
        Err(e) => error_response(e, &headers),
    }
}

/// GET /api/payments/config
pub async fn gateway_config(State(state): State<PaymentsState>) -> Json<GatewayPublicConfig> {
    Json(state.payment_service.gateway_config())
}

/// GET /api/users/{user_id}/payments
pub async fn list_user_payments(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> Response {
    let payments = match state.payment_service.payments_for_user(user_id).await {
        Ok(payments) => payments,
        Err(e) => return error_response(e, &headers),
    };
    match state.payment_service.total_paid_by_user(user_id).await {
        Ok(total_paid) => Json(UserPaymentsResponse {
            payments,
            total_paid,
        })
        .into_response(),
        Err(e) => error_response(e, &headers),
    }
}
