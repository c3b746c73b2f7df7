pub mod payments;
pub mod wallet;
pub mod webhooks;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::payment_service::PaymentService;
use crate::services::wallet_ledger::WalletLedger;
use crate::services::webhook_processor::WebhookProcessor;

/// Everything the HTTP layer needs, already wired together.
#[derive(Clone)]
pub struct AppServices {
    pub payment_service: Arc<PaymentService>,
    pub ledger: Arc<WalletLedger>,
    pub webhook_processor: Arc<WebhookProcessor>,
    pub health_checker: HealthChecker,
}

/// Full application router with request-id and request logging layers.
pub fn router(services: AppServices) -> Router {
    let payment_routes = Router::new()
        .route("/api/payments/orders", post(payments::create_order))
        .route("/api/payments/confirm", post(payments::confirm_payment))
        .route("/api/payments/failure", post(payments::report_failure))
        .route("/api/payments/config", get(payments::gateway_config))
        .route("/api/payments/{payment_id}", get(payments::get_payment))
        .route(
            "/api/payments/{payment_id}/cancel",
            post(payments::cancel_payment),
        )
        .route(
            "/api/payments/{payment_id}/refund",
            post(payments::refund_payment),
        )
        .route(
            "/api/users/{user_id}/payments",
            get(payments::list_user_payments),
        )
        .with_state(payments::PaymentsState {
            payment_service: services.payment_service,
        });

    let wallet_routes = Router::new()
        .route("/api/wallets/{user_id}", get(wallet::get_balance))
        .route(
            "/api/wallets/{user_id}/transactions",
            get(wallet::list_transactions),
        )
        .route(
            "/api/wallets/{user_id}/withdrawals",
            post(wallet::request_withdrawal),
        )
        .with_state(wallet::WalletApiState {
            ledger: services.ledger,
        });

    let webhook_routes = Router::new()
        .route(
            "/webhooks/razorpay",
            post(webhooks::handle_razorpay_webhook),
        )
        .with_state(webhooks::WebhookState {
            processor: services.webhook_processor,
        });

    Router::new()
        .route("/health", get(health))
        .with_state(services.health_checker)
        .merge(payment_routes)
        .merge(wallet_routes)
        .merge(webhook_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(
    State(checker): State<HealthChecker>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let status = checker.check_health().await;

    // Degraded still serves traffic; only a dead dependency returns 503.
    if status.status == HealthState::Unhealthy {
        error!("Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(status)))
    } else {
        info!(status = ?status.status, "Health check passed");
        Ok(Json(status))
    }
}
