use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CreateOrderRequest, GatewayOrder, GatewayRefund, PaymentMethod, WebhookEvent,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;

/// External payment gateway as seen by the settlement flow.
///
/// Signature checks are synchronous and never fail: a bad or malformed
/// signature is simply `false`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: CreateOrderRequest) -> PaymentResult<GatewayOrder>;

    async fn fetch_payment_method(&self, gateway_payment_id: &str) -> PaymentResult<PaymentMethod>;

    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: &BigDecimal,
        reason: Option<&str>,
    ) -> PaymentResult<GatewayRefund>;

    fn verify_payment_signature(
        &self,
        gateway_payment_id: &str,
        gateway_order_id: &str,
        signature: &str,
    ) -> bool;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;

    fn name(&self) -> &'static str;

    /// Public key id handed to the client checkout
    fn public_key_id(&self) -> &str;

    fn is_configured(&self) -> bool;
}
