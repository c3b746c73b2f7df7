//! HTTP surface tests driven through the router with `tower::ServiceExt`.

mod common;

use axum::body::Body;
use axum::Router;
use common::{checkout_signature, dec, webhook_signature, TestApp};
use http::{Request, StatusCode};
use ridepay_backend::api::{router, AppServices};
use ridepay_backend::health::HealthChecker;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

fn build_app(app: &TestApp) -> Router {
    router(AppServices {
        payment_service: app.payments.clone(),
        ledger: app.ledger.clone(),
        webhook_processor: app.webhooks.clone(),
        health_checker: HealthChecker::new(None, app.gateway.clone()),
    })
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, http::HeaderMap, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, headers, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_checkout_flow_over_http() {
    let app = TestApp::new();
    let ride = app.book_ride("1000.00").await;
    let router = build_app(&app);

    let (status, _, order) = send(
        &router,
        post_json(
            "/api/payments/orders",
            json!({
                "booking_id": ride.booking_id,
                "user_id": ride.passenger_id,
                "amount": "1000.00"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["gateway_amount"], 100_000);
    assert_eq!(order["key_id"], "rzp_test_it");
    let order_id = order["gateway_order_id"].as_str().unwrap().to_string();

    let (status, _, confirmed) = send(
        &router,
        post_json(
            "/api/payments/confirm",
            json!({
                "razorpay_payment_id": "pay_http",
                "razorpay_order_id": order_id,
                "razorpay_signature": checkout_signature(&order_id, "pay_http"),
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "SUCCESS");
    assert_eq!(confirmed["settled"], true);

    let (status, _, wallet) = send(
        &router,
        get(&format!("/api/wallets/{}", ride.driver_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(wallet["balance"].as_str().unwrap()), dec("900.00"));

    let (status, _, history) = send(
        &router,
        get(&format!(
            "/api/wallets/{}/transactions?type=CREDIT&limit=10",
            ride.driver_id
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["transactions"].as_array().unwrap().len(), 1);

    let (status, _, payments) = send(
        &router,
        get(&format!("/api/users/{}/payments", ride.passenger_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payments["payments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_forged_confirmation_is_rejected_with_request_id() {
    let app = TestApp::new();
    let ride = app.book_ride("300.00").await;
    let router = build_app(&app);
    let order = app
        .payments
        .create_payment(ride.booking_id, ride.passenger_id, &dec("300.00"))
        .await
        .unwrap();

    let mut request = post_json(
        "/api/payments/confirm",
        json!({
            "gateway_payment_id": "pay_forged",
            "gateway_order_id": order.gateway_order_id,
            "signature": "0000",
        }),
    );
    request
        .headers_mut()
        .insert("x-request-id", "req-forged-1".parse().unwrap());

    let (status, headers, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "PAYMENT_VERIFICATION_FAILED");
    assert_eq!(body["request_id"], "req-forged-1");
    assert_eq!(headers["x-request-id"], "req-forged-1");

    // Nothing about the expected signature leaks into the response.
    assert!(!body.to_string().contains(&checkout_signature(
        &order.gateway_order_id,
        "pay_forged"
    )));
}

#[tokio::test]
async fn test_withdrawal_endpoint_enforces_available_balance() {
    let app = TestApp::new();
    let driver = Uuid::new_v4();
    app.ledger
        .credit(driver, &dec("50.00"), "Ride earnings", Some("seed_http"))
        .await
        .unwrap();
    let router = build_app(&app);

    let (status, _, tx) = send(
        &router,
        post_json(
            &format!("/api/wallets/{}/withdrawals", driver),
            json!({ "amount": "20.00", "description": "Weekly payout" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tx["transaction_type"], "WITHDRAWAL");

    let (status, _, body) = send(
        &router,
        post_json(
            &format!("/api/wallets/{}/withdrawals", driver),
            json!({ "amount": "40.00" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "INSUFFICIENT_BALANCE");

    let (status, _, _) = send(
        &router,
        get(&format!("/api/wallets/{}/transactions?type=TIP", driver)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refund_without_body_refunds_everything() {
    let app = TestApp::new();
    let ride = app.book_ride("400.00").await;
    let payment_id = app.pay(&ride, "400.00", "pay_http_refund").await;
    let router = build_app(&app);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/payments/{}/refund", payment_id))
        .body(Body::empty())
        .unwrap();
    let (status, _, outcome) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["payment"]["status"], "REFUNDED");

    let (status, _, body) = send(
        &router,
        post_json(
            &format!("/api/payments/{}/refund", payment_id),
            json!({ "amount": "1.00" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "INVALID_STATE_TRANSITION");
}

#[tokio::test]
async fn test_webhook_endpoint_verifies_raw_body() {
    let app = TestApp::new();
    let ride = app.book_ride("250.00").await;
    let order = app
        .payments
        .create_payment(ride.booking_id, ride.passenger_id, &dec("250.00"))
        .await
        .unwrap();
    let router = build_app(&app);

    let raw = json!({
        "event": "payment.captured",
        "payload": {
            "payment": {
                "entity": {
                    "id": "pay_hook",
                    "order_id": order.gateway_order_id,
                    "method": "card"
                }
            }
        }
    })
    .to_string();

    let unsigned = Request::builder()
        .method("POST")
        .uri("/webhooks/razorpay")
        .body(Body::from(raw.clone()))
        .unwrap();
    let (status, _, _) = send(&router, unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let signed = Request::builder()
        .method("POST")
        .uri("/webhooks/razorpay")
        .header("x-razorpay-signature", webhook_signature(raw.as_bytes()))
        .body(Body::from(raw.clone()))
        .unwrap();
    let (status, _, body) = send(&router, signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let payment = app.payments.get_payment(order.payment_id).await.unwrap();
    assert!(payment.settled_at.is_some());
    assert_eq!(
        app.ledger.balance(ride.driver_id).await.unwrap().balance,
        dec("225.00")
    );
}

#[tokio::test]
async fn test_health_reports_degraded_on_in_memory_stores() {
    let app = TestApp::new();
    let router = build_app(&app);

    let (status, _, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Degraded");
    assert_eq!(body["checks"]["gateway:razorpay"]["status"], "Up");
}

#[tokio::test]
async fn test_unknown_payment_is_not_found() {
    let app = TestApp::new();
    let router = build_app(&app);

    let (status, _, body) = send(
        &router,
        get(&format!("/api/payments/{}", Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "PAYMENT_NOT_FOUND");
}
