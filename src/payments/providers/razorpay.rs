use crate::logging::mask_secret;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    CreateOrderRequest, GatewayOrder, GatewayRefund, PaymentMethod, WebhookEvent,
    WebhookEventType,
};
use crate::payments::utils::{
    from_minor_units, to_minor_units, verify_hmac_sha256_hex, PaymentHttpClient,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const PLACEHOLDER_MARKERS: &[&str] = &["your_key", "your_secret", "changeme", "placeholder"];

#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub base_url: String,
    /// Sandbox mode: orders and refunds are synthesized locally
    pub test_mode: bool,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for RazorpayConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            key_secret: String::new(),
            webhook_secret: String::new(),
            base_url: "https://api.razorpay.com/v1".to_string(),
            test_mode: false,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl RazorpayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            key_id: std::env::var("RAZORPAY_KEY_ID").unwrap_or_default(),
            key_secret: std::env::var("RAZORPAY_KEY_SECRET").unwrap_or_default(),
            webhook_secret: std::env::var("RAZORPAY_WEBHOOK_SECRET").unwrap_or_default(),
            base_url: std::env::var("RAZORPAY_BASE_URL").unwrap_or(defaults.base_url),
            test_mode: std::env::var("PAYMENT_TEST_MODE")
                .ok()
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(false),
            timeout_secs: std::env::var("RAZORPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("RAZORPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        }
    }

    /// Both credentials present and not left at template values.
    pub fn is_configured(&self) -> bool {
        let usable = |value: &str| {
            let lowered = value.trim().to_lowercase();
            !lowered.is_empty() && !PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m))
        };
        usable(&self.key_id) && usable(&self.key_secret)
    }
}

pub struct RazorpayGateway {
    config: RazorpayConfig,
    http: PaymentHttpClient,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;

        if config.test_mode {
            info!("Razorpay gateway running in test mode");
        } else if config.is_configured() {
            info!(key_id = %mask_secret(&config.key_id), "Razorpay gateway configured");
        } else {
            warn!("Razorpay credentials missing; live calls will fail");
        }

        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(RazorpayConfig::from_env())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn credentials(&self) -> PaymentResult<(&str, &str)> {
        if !self.config.is_configured() {
            return Err(PaymentError::NotConfigured {
                message: "Razorpay key id/secret are not configured".to_string(),
            });
        }
        Ok((&self.config.key_id, &self.config.key_secret))
    }

    fn synthetic_id(prefix: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}{}{}", prefix, Utc::now().timestamp_millis(), &suffix[..8])
    }
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayPayment {
    #[serde(default)]
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayRefund {
    id: String,
    payment_id: String,
    amount: i64,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayWebhook {
    event: String,
    #[serde(default)]
    payload: RazorpayWebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct RazorpayWebhookPayload {
    #[serde(default)]
    payment: Option<EntityWrapper<RazorpayPaymentEntity>>,
    #[serde(default)]
    order: Option<EntityWrapper<RazorpayOrderEntity>>,
}

#[derive(Debug, Deserialize)]
struct EntityWrapper<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct RazorpayPaymentEntity {
    id: String,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrderEntity {
    id: String,
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(&self, request: CreateOrderRequest) -> PaymentResult<GatewayOrder> {
        let amount_minor = to_minor_units(&request.amount)?;
        if amount_minor <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }

        if self.config.test_mode {
            let order_id = Self::synthetic_id("order_test_");
            info!(order_id = %order_id, receipt = %request.receipt, "created test-mode order");
            return Ok(GatewayOrder {
                order_id,
                amount_minor,
                currency: request.currency,
            });
        }

        let credentials = self.credentials()?;
        let payload = serde_json::json!({
            "amount": amount_minor,
            "currency": request.currency,
            "receipt": request.receipt,
        });

        let order: RazorpayOrder = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/orders"),
                Some(credentials),
                Some(&payload),
            )
            .await?;

        info!(order_id = %order.id, receipt = %request.receipt, "created gateway order");
        Ok(GatewayOrder {
            order_id: order.id,
            amount_minor: order.amount,
            currency: order.currency,
        })
    }

    async fn fetch_payment_method(&self, gateway_payment_id: &str) -> PaymentResult<PaymentMethod> {
        if self.config.test_mode {
            return Err(PaymentError::TestModeUnsupported {
                operation: "fetch_payment".to_string(),
            });
        }

        let credentials = self.credentials()?;
        let payment: RazorpayPayment = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/payments/{}", gateway_payment_id)),
                Some(credentials),
                None,
            )
            .await?;

        Ok(payment
            .method
            .as_deref()
            .map(PaymentMethod::from_gateway)
            .unwrap_or(PaymentMethod::Card))
    }

    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: &BigDecimal,
        reason: Option<&str>,
    ) -> PaymentResult<GatewayRefund> {
        let amount_minor = to_minor_units(amount)?;

        if self.config.test_mode {
            return Ok(GatewayRefund {
                refund_id: Self::synthetic_id("rfnd_test_"),
                payment_id: gateway_payment_id.to_string(),
                amount: from_minor_units(amount_minor),
                status: "processed".to_string(),
            });
        }

        let credentials = self.credentials()?;
        let payload = serde_json::json!({
            "amount": amount_minor,
            "notes": { "reason": reason.unwrap_or("Refund requested") },
        });

        let refund: RazorpayRefund = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/payments/{}/refund", gateway_payment_id)),
                Some(credentials),
                Some(&payload),
            )
            .await?;

        info!(refund_id = %refund.id, payment_id = %refund.payment_id, "created gateway refund");
        Ok(GatewayRefund {
            refund_id: refund.id,
            payment_id: refund.payment_id,
            amount: from_minor_units(refund.amount),
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }

    fn verify_payment_signature(
        &self,
        gateway_payment_id: &str,
        gateway_order_id: &str,
        signature: &str,
    ) -> bool {
        let payload = format!("{}|{}", gateway_order_id, gateway_payment_id);
        verify_hmac_sha256_hex(payload.as_bytes(), &self.config.key_secret, signature)
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_sha256_hex(payload, &self.config.webhook_secret, signature)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        let raw: RazorpayWebhook =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid razorpay webhook payload: {}", e),
                field: Some("payload".to_string()),
            })?;

        let payment = raw.payload.payment.map(|w| w.entity);
        let order_id = payment
            .as_ref()
            .and_then(|p| p.order_id.clone())
            .or_else(|| raw.payload.order.map(|w| w.entity.id));

        Ok(WebhookEvent {
            event_type: WebhookEventType::parse(&raw.event),
            order_id,
            payment_id: payment.as_ref().map(|p| p.id.clone()),
            method: payment
                .as_ref()
                .and_then(|p| p.method.as_deref())
                .map(PaymentMethod::from_gateway),
            error_description: payment.and_then(|p| p.error_description),
        })
    }

    fn name(&self) -> &'static str {
        "razorpay"
    }

    fn public_key_id(&self) -> &str {
        &self.config.key_id
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::utils::hmac_sha256_hex;
    use std::str::FromStr;

    fn config(test_mode: bool) -> RazorpayConfig {
        RazorpayConfig {
            key_id: "rzp_test_k3y".to_string(),
            key_secret: "s3cr3t".to_string(),
            webhook_secret: "wh_s3cr3t".to_string(),
            test_mode,
            ..RazorpayConfig::default()
        }
    }

    fn gateway(test_mode: bool) -> RazorpayGateway {
        RazorpayGateway::new(config(test_mode)).unwrap()
    }

    #[test]
    fn placeholder_credentials_are_not_configured() {
        let mut cfg = config(false);
        assert!(cfg.is_configured());

        cfg.key_id = "rzp_test_your_key_id".to_string();
        assert!(!cfg.is_configured());

        cfg.key_id = String::new();
        assert!(!cfg.is_configured());
    }

    #[test]
    fn payment_signature_uses_order_pipe_payment() {
        let gw = gateway(true);
        let signature = hmac_sha256_hex(b"order_abc|pay_xyz", "s3cr3t").unwrap();

        assert!(gw.verify_payment_signature("pay_xyz", "order_abc", &signature));
        assert!(!gw.verify_payment_signature("pay_xyz", "order_other", &signature));
        assert!(!gw.verify_payment_signature("pay_xyz", "order_abc", "deadbeef"));
    }

    #[test]
    fn webhook_signature_uses_webhook_secret() {
        let gw = gateway(true);
        let body = br#"{"event":"payment.captured"}"#;
        let with_webhook_secret = hmac_sha256_hex(body, "wh_s3cr3t").unwrap();
        let with_key_secret = hmac_sha256_hex(body, "s3cr3t").unwrap();

        assert!(gw.verify_webhook_signature(body, &with_webhook_secret));
        assert!(!gw.verify_webhook_signature(body, &with_key_secret));
    }

    #[tokio::test]
    async fn test_mode_synthesizes_order_ids() {
        let gw = gateway(true);
        let request = CreateOrderRequest {
            amount: BigDecimal::from_str("1000.00").unwrap(),
            currency: "INR".to_string(),
            receipt: "booking_1".to_string(),
        };

        let first = gw.create_order(request.clone()).await.unwrap();
        let second = gw.create_order(request).await.unwrap();

        assert!(first.order_id.starts_with("order_test_"));
        assert_ne!(first.order_id, second.order_id);
        assert_eq!(first.amount_minor, 100_000);
    }

    #[tokio::test]
    async fn live_mode_without_credentials_is_unavailable() {
        let gw = RazorpayGateway::new(RazorpayConfig::default()).unwrap();
        let err = gw
            .create_order(CreateOrderRequest {
                amount: BigDecimal::from(10),
                currency: "INR".to_string(),
                receipt: "r".to_string(),
            })
            .await
            .unwrap_err();

        assert!(err.is_gateway_unavailable());
    }

    #[tokio::test]
    async fn test_mode_method_lookup_is_unsupported() {
        let err = gateway(true).fetch_payment_method("pay_1").await.unwrap_err();
        assert!(matches!(err, PaymentError::TestModeUnsupported { .. }));
    }

    #[test]
    fn parses_captured_webhook() {
        let body = br#"{
            "event": "payment.captured",
            "payload": {
                "payment": {
                    "entity": { "id": "pay_xyz", "order_id": "order_abc", "method": "upi" }
                }
            }
        }"#;

        let event = gateway(true).parse_webhook_event(body).unwrap();
        assert_eq!(event.event_type, WebhookEventType::PaymentCaptured);
        assert_eq!(event.order_id.as_deref(), Some("order_abc"));
        assert_eq!(event.payment_id.as_deref(), Some("pay_xyz"));
        assert_eq!(event.method, Some(PaymentMethod::Upi));
    }

    #[test]
    fn parses_failed_webhook_with_reason() {
        let body = br#"{
            "event": "payment.failed",
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_1",
                        "order_id": "order_1",
                        "error_description": "Card declined"
                    }
                }
            }
        }"#;

        let event = gateway(true).parse_webhook_event(body).unwrap();
        assert_eq!(event.event_type, WebhookEventType::PaymentFailed);
        assert_eq!(event.error_description.as_deref(), Some("Card declined"));
    }

    #[test]
    fn rejects_malformed_webhook() {
        assert!(gateway(true).parse_webhook_event(b"not json").is_err());
    }
}
