use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::middleware::error::error_response;
use crate::services::webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Clone)]
pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
}

/// POST /webhooks/razorpay
///
/// The body is taken raw: the signature covers the exact bytes sent.
pub async fn handle_razorpay_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(bytes = body.len(), "Received gateway webhook");

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    if signature.is_none() {
        warn!("Missing webhook signature");
        return (StatusCode::UNAUTHORIZED, "Missing signature").into_response();
    }

    match state.processor.process_webhook(signature, &body).await {
        Ok(WebhookOutcome::Processed) => {
            info!("Webhook processed successfully");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Ok(WebhookOutcome::Ignored) => {
            (StatusCode::OK, Json(serde_json::json!({"status": "ignored"}))).into_response()
        }
        Err(WebhookProcessorError::InvalidSignature) => {
            warn!("Invalid webhook signature");
            (StatusCode::UNAUTHORIZED, "Invalid signature").into_response()
        }
        Err(e) => {
            // Anything left is either a malformed body (4xx, not retried) or a
            // storage/gateway failure (5xx, so the gateway redelivers).
            error!(error = %e, "Webhook processing failed");
            error_response(e, &headers)
        }
    }
}
